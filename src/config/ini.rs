//! Line-oriented INI reader for `.conf` and `.repo` files.
//!
//! Parsing is split from model construction: this reader only produces
//! sections of raw key/value pairs with their line numbers; the typed
//! config models decide what the keys mean.

use std::path::Path;

use crate::error::{Error, Result};

/// One `[name]` section with its raw entries in file order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IniSection {
    /// Section name without brackets.
    pub name: String,
    /// `(key, value, line-number)` triples in file order.
    pub entries: Vec<(String, String, usize)>,
}

impl IniSection {
    /// What: Fetch the last value of a key in this section.
    ///
    /// Inputs:
    /// - `key`: Key name, matched case-sensitively.
    ///
    /// Output:
    /// - The value, with later duplicates overriding earlier ones.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .rev()
            .find(|(k, _, _)| k == key)
            .map(|(_, v, _)| v.as_str())
    }
}

/// What: Check if a line should be skipped (empty or comment).
///
/// Inputs:
/// - `line`: Line to check.
///
/// Output:
/// - `true` if the line should be skipped, `false` otherwise.
///
/// Details:
/// - Skips empty lines and lines starting with `#` or `;`.
#[must_use]
pub fn skip_comment_or_empty(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with(';')
}

/// What: Parse a key-value pair from a line.
///
/// Inputs:
/// - `line`: Line containing `key=value`.
///
/// Output:
/// - `Some((key, value))` if parsing succeeds, `None` otherwise.
///
/// Details:
/// - Splits on the first `=` and trims whitespace from both sides.
/// - An empty key yields `None`; an empty value is legal.
#[must_use]
pub fn parse_key_value(line: &str) -> Option<(String, String)> {
    let trimmed = line.trim();
    let (key, value) = trimmed.split_once('=')?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    Some((key.to_string(), value.trim().to_string()))
}

/// What: Parse an INI document into its sections.
///
/// Inputs:
/// - `path`: Name used in error messages.
/// - `content`: The full file text.
///
/// Output:
/// - Sections in file order.
///
/// Details:
/// - A key before any section header and a malformed non-comment,
///   non-key line are both configuration errors carrying the line
///   number.
pub fn parse_ini(path: &Path, content: &str) -> Result<Vec<IniSection>> {
    let mut sections: Vec<IniSection> = Vec::new();

    for (idx, raw) in content.lines().enumerate() {
        let lineno = idx + 1;
        if skip_comment_or_empty(raw) {
            continue;
        }
        let line = raw.trim();

        if let Some(rest) = line.strip_prefix('[') {
            let Some(name) = rest.strip_suffix(']') else {
                return Err(Error::Config {
                    path: path.to_path_buf(),
                    detail: format!("unterminated section header on line {lineno}"),
                });
            };
            let name = name.trim();
            if name.is_empty() {
                return Err(Error::Config {
                    path: path.to_path_buf(),
                    detail: format!("empty section name on line {lineno}"),
                });
            }
            sections.push(IniSection {
                name: name.to_string(),
                entries: Vec::new(),
            });
            continue;
        }

        let Some((key, value)) = parse_key_value(line) else {
            return Err(Error::Config {
                path: path.to_path_buf(),
                detail: format!("expected key=value on line {lineno}"),
            });
        };
        match sections.last_mut() {
            Some(section) => section.entries.push((key, value, lineno)),
            None => {
                return Err(Error::Config {
                    path: path.to_path_buf(),
                    detail: format!("key on line {lineno} appears before any [section] header"),
                });
            }
        }
    }

    Ok(sections)
}

/// What: Read and parse an INI file from disk.
///
/// Inputs:
/// - `path`: The file to read.
///
/// Output:
/// - Sections in file order, or an I/O or parse error.
pub fn read_ini(path: &Path) -> Result<Vec<IniSection>> {
    let content = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    parse_ini(path, &content)
}

/// What: Interpret a config value as a boolean flag.
///
/// Inputs:
/// - `value`: Raw string value.
///
/// Output:
/// - `Some(bool)` for the accepted spellings, `None` otherwise.
///
/// Details:
/// - Accepts `1/0`, `true/false`, `yes/no`, `enabled/disabled`, case
///   insensitively.
#[must_use]
pub fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "enabled" => Some(true),
        "0" | "false" | "no" | "disabled" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn p() -> PathBuf {
        PathBuf::from("test.conf")
    }

    #[test]
    fn parses_sections_and_entries() {
        let text = "\n# comment\n[main]\ngpgcheck=1\ncachedir = /var/cache/ferrite\n\n[base]\nname=Base OS\nenabled=1\n";
        let sections = parse_ini(&p(), text).unwrap();
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].name, "main");
        assert_eq!(sections[0].get("cachedir"), Some("/var/cache/ferrite"));
        assert_eq!(sections[1].name, "base");
        assert_eq!(sections[1].get("name"), Some("Base OS"));
    }

    #[test]
    fn later_duplicate_key_wins() {
        let text = "[main]\ngpgcheck=0\ngpgcheck=1\n";
        let sections = parse_ini(&p(), text).unwrap();
        assert_eq!(sections[0].get("gpgcheck"), Some("1"));
    }

    #[test]
    fn rejects_key_before_section() {
        let text = "gpgcheck=1\n[main]\n";
        assert!(parse_ini(&p(), text).is_err());
    }

    #[test]
    fn rejects_unterminated_header() {
        assert!(parse_ini(&p(), "[main\nk=v\n").is_err());
    }

    #[test]
    fn bool_spellings() {
        assert_eq!(parse_bool("1"), Some(true));
        assert_eq!(parse_bool("No"), Some(false));
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool("2"), None);
    }
}
