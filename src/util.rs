//! Small dependency-free helpers shared across subsystems.
//!
//! Kept intentionally lightweight: glob matching for package and repo id
//! patterns, human-readable byte counts, and a timestamp formatter for
//! history listings.

/// What: Decode and XML-unescape a text event's content.
///
/// Output:
/// - The fully decoded, entity-unescaped text, or the first of the
///   decode/unescape errors stringified.
pub(crate) fn unescape_xml_text(t: &quick_xml::events::BytesText<'_>) -> Result<String, String> {
    let decoded = t.decode().map_err(|e| e.to_string())?;
    quick_xml::escape::unescape(&decoded)
        .map(|s| s.into_owned())
        .map_err(|e| e.to_string())
}

/// What: Match a shell-style glob pattern against a name.
///
/// Inputs:
/// - `pattern`: Glob with `*`, `?` and `[...]` character classes.
/// - `text`: The candidate string.
///
/// Output:
/// - `true` when the whole of `text` matches the whole of `pattern`.
///
/// Details:
/// - `*` matches any run including the empty one, `?` exactly one
///   character, `[abc]`/`[a-z]` a class, `[!...]` a negated class.
/// - An unterminated class matches the literal `[`.
/// - Used for `exclude=` masks, `--enablerepo`/`--disablerepo`, and the
///   name-glob rung of the package selector.
#[must_use]
pub fn glob_match(pattern: &str, text: &str) -> bool {
    glob_match_at(pattern.as_bytes(), text.as_bytes())
}

fn glob_match_at(pat: &[u8], text: &[u8]) -> bool {
    if pat.is_empty() {
        return text.is_empty();
    }
    match pat[0] {
        b'*' => {
            let rest = &pat[1..];
            (0..=text.len()).any(|skip| glob_match_at(rest, &text[skip..]))
        }
        b'?' => !text.is_empty() && glob_match_at(&pat[1..], &text[1..]),
        b'[' => match parse_class(&pat[1..]) {
            Some((class, negated, rest)) => {
                if text.is_empty() {
                    return false;
                }
                class_matches(class, text[0]) != negated && glob_match_at(rest, &text[1..])
            }
            None => !text.is_empty() && text[0] == b'[' && glob_match_at(&pat[1..], &text[1..]),
        },
        c => !text.is_empty() && text[0] == c && glob_match_at(&pat[1..], &text[1..]),
    }
}

/// Split a `[...]` class body; returns (class bytes, negated, rest after `]`).
fn parse_class(pat: &[u8]) -> Option<(&[u8], bool, &[u8])> {
    let (negated, body) = match pat.first() {
        Some(b'!') | Some(b'^') => (true, &pat[1..]),
        _ => (false, pat),
    };
    // A leading `]` is a literal member of the class.
    let mut end = usize::from(body.first() == Some(&b']'));
    while end < body.len() && body[end] != b']' {
        end += 1;
    }
    if end >= body.len() {
        return None;
    }
    Some((&body[..end], negated, &body[end + 1..]))
}

/// Test one byte against a class body with `a-z` range support.
fn class_matches(class: &[u8], c: u8) -> bool {
    let mut i = 0;
    while i < class.len() {
        if i + 2 < class.len() && class[i + 1] == b'-' {
            if class[i] <= c && c <= class[i + 2] {
                return true;
            }
            i += 3;
        } else {
            if class[i] == c {
                return true;
            }
            i += 1;
        }
    }
    false
}

/// What: Render a byte count with a binary unit suffix.
///
/// Inputs:
/// - `bytes`: Raw byte count.
///
/// Output:
/// - A short human string such as `1.4 MiB` or `312 B`.
#[must_use]
pub fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}

/// What: Format a Unix timestamp for history listings.
///
/// Inputs:
/// - `stamp`: Seconds since the epoch.
///
/// Output:
/// - Local time rendered as `YYYY-MM-DD HH:MM`, or the raw number if the
///   stamp is out of range.
#[must_use]
pub fn format_stamp(stamp: i64) -> String {
    use chrono::{Local, TimeZone};
    match Local.timestamp_opt(stamp, 0) {
        chrono::LocalResult::Single(dt) => dt.format("%Y-%m-%d %H:%M").to_string(),
        _ => stamp.to_string(),
    }
}
