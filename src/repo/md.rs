//! `repomd.xml` parsing.
//!
//! The repomd document is the top-level manifest of a repository: one
//! `<data>` record per metadata artifact with its location, digest,
//! open (decompressed) digest, size and timestamp.

use std::path::Path;

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use crate::crypto::ChecksumKind;
use crate::error::{Error, Result};

/// One `<data>` record of a repomd document.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RepomdRecord {
    /// Artifact type: `primary`, `filelists`, `other`, `updateinfo`, ...
    pub mdtype: String,
    /// Location relative to the repo base URL.
    pub location: String,
    /// Digest of the artifact as downloaded.
    pub checksum: Option<(ChecksumKind, String)>,
    /// Digest of the decompressed content.
    pub open_checksum: Option<(ChecksumKind, String)>,
    /// Size in bytes as downloaded.
    pub size: Option<u64>,
    /// Publication timestamp.
    pub timestamp: Option<i64>,
}

/// Parsed repomd manifest.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Repomd {
    /// Repository revision string.
    pub revision: String,
    /// All artifact records in document order.
    pub records: Vec<RepomdRecord>,
}

impl Repomd {
    /// What: Look up an artifact record by type.
    #[must_use]
    pub fn get(&self, mdtype: &str) -> Option<&RepomdRecord> {
        self.records.iter().find(|r| r.mdtype == mdtype)
    }

    /// What: Parse a repomd document.
    ///
    /// Inputs:
    /// - `path`: Source file, for error messages.
    /// - `xml`: The document text.
    ///
    /// Output:
    /// - The manifest; records missing a location are rejected.
    pub fn parse(path: &Path, xml: &str) -> Result<Self> {
        let mut reader = Reader::from_str(xml);
        let mut repomd = Self::default();
        let mut current: Option<RepomdRecord> = None;
        let mut text_target: Option<TextTarget> = None;

        loop {
            let event = reader.read_event().map_err(|e| Error::CacheCorrupt {
                repo: path.display().to_string(),
                detail: format!("repomd parse error: {e}"),
            })?;
            match event {
                Event::Start(e) => match local_name(&e) {
                    b"data" => {
                        let mut record = RepomdRecord::default();
                        record.mdtype = attr(&e, b"type")?.unwrap_or_default();
                        current = Some(record);
                    }
                    b"checksum" if current.is_some() => {
                        text_target = Some(TextTarget::Checksum(parse_checksum_type(&e)?));
                    }
                    b"open-checksum" if current.is_some() => {
                        text_target = Some(TextTarget::OpenChecksum(parse_checksum_type(&e)?));
                    }
                    b"size" if current.is_some() => text_target = Some(TextTarget::Size),
                    b"timestamp" if current.is_some() => {
                        text_target = Some(TextTarget::Timestamp);
                    }
                    b"revision" => text_target = Some(TextTarget::Revision),
                    _ => {}
                },
                Event::Empty(e) => {
                    if local_name(&e) == b"location" {
                        if let Some(record) = current.as_mut() {
                            record.location = attr(&e, b"href")?.unwrap_or_default();
                        }
                    }
                }
                Event::Text(t) => {
                    let text = crate::util::unescape_xml_text(&t).map_err(|e| Error::CacheCorrupt {
                        repo: path.display().to_string(),
                        detail: format!("repomd text error: {e}"),
                    })?;
                    let text = text.trim();
                    if text.is_empty() {
                        continue;
                    }
                    match (&text_target, current.as_mut()) {
                        (Some(TextTarget::Revision), _) => {
                            repomd.revision = text.to_string();
                        }
                        (Some(TextTarget::Checksum(kind)), Some(record)) => {
                            record.checksum = Some((*kind, text.to_ascii_lowercase()));
                        }
                        (Some(TextTarget::OpenChecksum(kind)), Some(record)) => {
                            record.open_checksum = Some((*kind, text.to_ascii_lowercase()));
                        }
                        (Some(TextTarget::Size), Some(record)) => {
                            record.size = text.parse().ok();
                        }
                        (Some(TextTarget::Timestamp), Some(record)) => {
                            record.timestamp = text.parse().ok();
                        }
                        _ => {}
                    }
                }
                Event::End(e) => match local_name_bytes(e.name().as_ref()) {
                    b"data" => {
                        if let Some(record) = current.take() {
                            if record.location.is_empty() {
                                return Err(Error::CacheCorrupt {
                                    repo: path.display().to_string(),
                                    detail: format!(
                                        "repomd record '{}' has no location",
                                        record.mdtype
                                    ),
                                });
                            }
                            repomd.records.push(record);
                        }
                    }
                    _ => text_target = None,
                },
                Event::Eof => break,
                _ => {}
            }
        }

        Ok(repomd)
    }
}

enum TextTarget {
    Revision,
    Checksum(ChecksumKind),
    OpenChecksum(ChecksumKind),
    Size,
    Timestamp,
}

/// Strip an XML namespace prefix from a start tag's name.
pub(crate) fn local_name<'a>(e: &'a BytesStart<'_>) -> &'a [u8] {
    local_name_bytes(e.name().as_ref())
}

pub(crate) fn local_name_bytes(name: &[u8]) -> &[u8] {
    match name.iter().position(|&b| b == b':') {
        Some(pos) => &name[pos + 1..],
        None => name,
    }
}

/// Fetch one attribute value as a string, namespace prefixes ignored.
pub(crate) fn attr(e: &BytesStart<'_>, name: &[u8]) -> Result<Option<String>> {
    for attribute in e.attributes() {
        let attribute = attribute.map_err(|err| Error::CacheCorrupt {
            repo: String::from_utf8_lossy(e.name().as_ref()).into_owned(),
            detail: format!("bad attribute: {err}"),
        })?;
        if local_name_bytes(attribute.key.as_ref()) == name {
            let value = attribute
                .unescape_value()
                .map_err(|err| Error::CacheCorrupt {
                    repo: String::from_utf8_lossy(e.name().as_ref()).into_owned(),
                    detail: format!("bad attribute value: {err}"),
                })?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

fn parse_checksum_type(e: &BytesStart<'_>) -> Result<ChecksumKind> {
    let name = attr(e, b"type")?.unwrap_or_default();
    ChecksumKind::parse(&name).ok_or_else(|| Error::BadHex {
        value: format!("unknown checksum type '{name}'"),
    })
}
