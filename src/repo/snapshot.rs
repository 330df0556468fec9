//! Snapshot time filter for primary metadata.
//!
//! When a snapshot cutoff is configured, the primary document is passed
//! through this streaming transform between download and pool loading.
//! Each `<package>` element is buffered until its `<time file="N"/>`
//! attribute is seen; elements published after the cutoff are dropped,
//! everything else is replayed byte-faithfully. Non-package top-level
//! content always passes through, so the output re-parses exactly like
//! an ordinary primary document.

use std::io::Write;

use quick_xml::Reader;
use quick_xml::Writer;
use quick_xml::events::Event;

use crate::error::{Error, Result};
use crate::repo::md::{attr, local_name, local_name_bytes};

/// Hard ceiling on the buffered size of one `<package>` element.
pub const FILTER_BUFFER_MAX: usize = 8 * 1024 * 1024;

/// Counters reported by a filter run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FilterStats {
    /// Packages written to the output.
    pub kept: usize,
    /// Packages dropped for exceeding the cutoff.
    pub dropped: usize,
}

/// What: Filter a primary document by publication time.
///
/// Inputs:
/// - `xml`: The decompressed primary document.
/// - `cutoff`: Maximum `<time file=...>` value allowed through.
/// - `out`: Destination for the filtered document.
///
/// Output:
/// - Kept/dropped counters.
///
/// Details:
/// - Replayed events keep their original escaping, so attribute values
///   and character data survive unchanged.
/// - A package element buffering more than [`FILTER_BUFFER_MAX`] bytes
///   aborts with [`Error::FilterOverflow`].
/// - A package without a `<time>` element is kept.
pub fn filter_primary<W: Write>(xml: &str, cutoff: i64, out: W) -> Result<FilterStats> {
    let mut reader = Reader::from_str(xml);
    let mut writer = Writer::new(out);
    let mut stats = FilterStats::default();

    // Buffered events of the package element currently being scanned.
    let mut buffer: Vec<Event<'_>> = Vec::new();
    let mut buffered_bytes = 0usize;
    let mut depth = 0usize;
    let mut in_package = false;
    let mut keep = true;

    loop {
        let event = reader.read_event().map_err(|e| Error::CacheCorrupt {
            repo: "snapshot filter".to_string(),
            detail: format!("primary parse error: {e}"),
        })?;

        match &event {
            Event::Eof => break,
            Event::Start(e) if !in_package && local_name(e) == b"package" => {
                in_package = true;
                keep = true;
                depth = 1;
                buffered_bytes = event_len(&event);
                buffer.clear();
                buffer.push(event);
                continue;
            }
            _ => {}
        }

        if !in_package {
            write_event(&mut writer, event)?;
            continue;
        }

        // Inside a package element: track nesting and the time attribute.
        match &event {
            Event::Start(e) => {
                depth += 1;
                if local_name(e) == b"time" {
                    keep = time_within_cutoff(e, cutoff)? && keep;
                }
            }
            Event::Empty(e) => {
                if local_name(e) == b"time" {
                    keep = time_within_cutoff(e, cutoff)? && keep;
                }
            }
            Event::End(e) => {
                depth -= 1;
                if depth == 0 && local_name_bytes(e.name().as_ref()) != b"package" {
                    return Err(Error::CacheCorrupt {
                        repo: "snapshot filter".to_string(),
                        detail: "mismatched package element nesting".to_string(),
                    });
                }
            }
            _ => {}
        }

        buffered_bytes += event_len(&event);
        if buffered_bytes > FILTER_BUFFER_MAX {
            return Err(Error::FilterOverflow);
        }
        let ended = depth == 0;
        buffer.push(event);

        if ended {
            if keep {
                for buffered in buffer.drain(..) {
                    write_event(&mut writer, buffered)?;
                }
                stats.kept += 1;
            } else {
                buffer.clear();
                stats.dropped += 1;
            }
            in_package = false;
        }
    }

    Ok(stats)
}

fn time_within_cutoff(e: &quick_xml::events::BytesStart<'_>, cutoff: i64) -> Result<bool> {
    let Some(value) = attr(e, b"file")? else {
        return Ok(true);
    };
    match value.parse::<i64>() {
        Ok(stamp) => Ok(stamp <= cutoff),
        Err(_) => Ok(true),
    }
}

fn write_event<W: Write>(writer: &mut Writer<W>, event: Event<'_>) -> Result<()> {
    writer.write_event(event).map_err(|e| Error::Io {
        path: "<snapshot output>".into(),
        source: std::io::Error::other(e),
    })
}

/// Approximate serialized size of an event, for the buffer ceiling.
///
/// Only events buffered inside a package element are measured, so the
/// fixed costs for declaration-like events never matter in practice.
fn event_len(event: &Event<'_>) -> usize {
    match event {
        Event::Start(e) | Event::Empty(e) => e.len() + 2,
        Event::End(e) => e.name().as_ref().len() + 3,
        Event::Text(t) => t.len(),
        Event::CData(t) => t.len() + 12,
        Event::Comment(t) => t.len() + 7,
        _ => 32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::primary::parse_primary;

    const INPUT: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<metadata xmlns="http://linux.duke.edu/metadata/common" xmlns:rpm="http://linux.duke.edu/metadata/rpm" packages="2">
<package type="rpm">
  <name>old</name>
  <arch>x86_64</arch>
  <version epoch="0" ver="1.0" rel="1"/>
  <summary>Old &amp; stable</summary>
  <time file="100" build="90"/>
  <location href="packages/old-1.0-1.x86_64.rpm"/>
  <format/>
</package>
<package type="rpm">
  <name>new</name>
  <arch>x86_64</arch>
  <version epoch="0" ver="2.0" rel="1"/>
  <summary>Too new</summary>
  <time file="200" build="190"/>
  <location href="packages/new-2.0-1.x86_64.rpm"/>
  <format/>
</package>
</metadata>
"#;

    #[test]
    fn drops_packages_beyond_cutoff() {
        let mut out = Vec::new();
        let stats = filter_primary(INPUT, 150, &mut out).unwrap();
        assert_eq!(stats, FilterStats { kept: 1, dropped: 1 });

        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("<name>old</name>"));
        assert!(!text.contains("<name>new</name>"));
        // Escaping survives the round trip.
        assert!(text.contains("Old &amp; stable"));

        let pkgs = parse_primary("base", &text).unwrap();
        assert_eq!(pkgs.len(), 1);
        assert_eq!(pkgs[0].nevra.name, "old");
    }

    #[test]
    fn keeps_everything_at_or_below_cutoff() {
        let mut out = Vec::new();
        let stats = filter_primary(INPUT, 200, &mut out).unwrap();
        assert_eq!(stats, FilterStats { kept: 2, dropped: 0 });
        let pkgs = parse_primary("base", &String::from_utf8(out).unwrap()).unwrap();
        assert_eq!(pkgs.len(), 2);
    }

    #[test]
    fn package_without_time_is_kept() {
        let input = r#"<metadata><package><name>x</name></package></metadata>"#;
        let mut out = Vec::new();
        let stats = filter_primary(input, 1, &mut out).unwrap();
        assert_eq!(stats.kept, 1);
    }

    #[test]
    fn non_package_content_passes_through() {
        let mut out = Vec::new();
        filter_primary(INPUT, 150, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains(r#"packages="2""#));
        assert!(text.starts_with("<?xml"));
    }

    #[test]
    fn oversized_package_overflows() {
        let huge_summary = "x".repeat(FILTER_BUFFER_MAX + 1);
        let input = format!(
            "<metadata><package><name>big</name><summary>{huge_summary}</summary><time file=\"1\"/></package></metadata>"
        );
        match filter_primary(&input, 100, &mut Vec::new()) {
            Err(Error::FilterOverflow) => {}
            other => panic!("unexpected: {other:?}"),
        }
    }
}
