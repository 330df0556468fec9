//! `updateinfo.xml` advisory parsing.
//!
//! Advisories drive `updateinfo` reporting and the `--security` /
//! `--sec-severity` upgrade restrictions: an upgrade candidate is
//! security-relevant when an advisory of the right kind and severity
//! names its NEVRA.

use quick_xml::Reader;
use quick_xml::events::Event;

use crate::error::{Error, Result};
use crate::nevra::{Evr, Nevra};
use crate::repo::md::{attr, local_name, local_name_bytes};

/// Advisory classification from the `type` attribute.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AdvisoryKind {
    /// Security fixes; selected by `--security`.
    Security,
    /// Bug fixes.
    Bugfix,
    /// Feature enhancements.
    Enhancement,
    /// Newly added packages.
    NewPackage,
    /// Anything else.
    Unknown,
}

impl AdvisoryKind {
    fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "security" => Self::Security,
            "bugfix" => Self::Bugfix,
            "enhancement" => Self::Enhancement,
            "newpackage" => Self::NewPackage,
            _ => Self::Unknown,
        }
    }

    /// Display word used in summaries.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Security => "security",
            Self::Bugfix => "bugfix",
            Self::Enhancement => "enhancement",
            Self::NewPackage => "newpackage",
            Self::Unknown => "unknown",
        }
    }
}

/// One external reference of an advisory.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AdvisoryRef {
    /// Link target.
    pub href: String,
    /// Reference id, e.g. a CVE number.
    pub id: String,
    /// Reference kind, e.g. `cve` or `bugzilla`.
    pub kind: String,
    /// Human title.
    pub title: String,
}

/// One advisory with the packages it covers.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Advisory {
    /// Advisory id, e.g. `FEDORA-2024-0001`.
    pub id: String,
    /// Classification.
    pub kind_label: String,
    /// Severity string as published (`Critical`, `Important`, ...).
    pub severity: Option<String>,
    /// Title line.
    pub title: String,
    /// Long description.
    pub description: String,
    /// Issue date string as published.
    pub issued: String,
    /// External references.
    pub references: Vec<AdvisoryRef>,
    /// NEVRAs the advisory updates.
    pub packages: Vec<Nevra>,
    /// Whether any covered package suggests a reboot.
    pub reboot_suggested: bool,
}

impl Advisory {
    /// Parsed classification of this advisory.
    #[must_use]
    pub fn kind(&self) -> AdvisoryKind {
        AdvisoryKind::parse(&self.kind_label)
    }

    /// What: Compare the advisory severity against a floor.
    ///
    /// Inputs:
    /// - `floor`: Minimum severity name, case-insensitive.
    ///
    /// Output:
    /// - `true` when the advisory's severity ranks at or above the
    ///   floor; advisories without a severity never pass.
    #[must_use]
    pub fn severity_at_least(&self, floor: &str) -> bool {
        match (&self.severity, severity_rank(floor)) {
            (Some(sev), Some(min)) => severity_rank(sev).is_some_and(|r| r >= min),
            _ => false,
        }
    }
}

fn severity_rank(name: &str) -> Option<u8> {
    match name.to_ascii_lowercase().as_str() {
        "low" => Some(0),
        "moderate" => Some(1),
        "important" => Some(2),
        "critical" => Some(3),
        _ => None,
    }
}

/// What: Parse an updateinfo document.
///
/// Inputs:
/// - `repo_id`: For error messages.
/// - `xml`: Decompressed updateinfo document.
///
/// Output:
/// - All advisories in document order.
pub fn parse_updateinfo(repo_id: &str, xml: &str) -> Result<Vec<Advisory>> {
    let corrupt = |detail: String| Error::CacheCorrupt {
        repo: repo_id.to_string(),
        detail,
    };

    let mut reader = Reader::from_str(xml);
    let mut advisories = Vec::new();
    let mut current: Option<Advisory> = None;
    let mut text_field: Option<Field> = None;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| corrupt(format!("updateinfo parse error: {e}")))?;
        match event {
            Event::Start(ref e) | Event::Empty(ref e) => match local_name(e) {
                b"update" => {
                    let mut adv = Advisory::default();
                    adv.kind_label = attr(e, b"type")?.unwrap_or_default();
                    current = Some(adv);
                }
                b"id" => text_field = Some(Field::Id),
                b"title" => text_field = Some(Field::Title),
                b"severity" => text_field = Some(Field::Severity),
                b"description" => text_field = Some(Field::Description),
                b"issued" => {
                    if let Some(adv) = current.as_mut() {
                        adv.issued = attr(e, b"date")?.unwrap_or_default();
                    }
                }
                b"reference" => {
                    if let Some(adv) = current.as_mut() {
                        adv.references.push(AdvisoryRef {
                            href: attr(e, b"href")?.unwrap_or_default(),
                            id: attr(e, b"id")?.unwrap_or_default(),
                            kind: attr(e, b"type")?.unwrap_or_default(),
                            title: attr(e, b"title")?.unwrap_or_default(),
                        });
                    }
                }
                b"package" => {
                    if let Some(adv) = current.as_mut() {
                        let name = attr(e, b"name")?.unwrap_or_default();
                        let arch = attr(e, b"arch")?.unwrap_or_default();
                        let evr = Evr {
                            epoch: attr(e, b"epoch")?.and_then(|v| v.parse().ok()).unwrap_or(0),
                            version: attr(e, b"version")?.unwrap_or_default(),
                            release: attr(e, b"release")?.unwrap_or_default(),
                        };
                        if !name.is_empty() {
                            adv.packages.push(Nevra::new(name, evr, arch));
                        }
                    }
                }
                b"reboot_suggested" => {
                    if let Some(adv) = current.as_mut() {
                        adv.reboot_suggested = true;
                    }
                }
                _ => {}
            },
            Event::Text(t) => {
                let Some(field) = text_field else { continue };
                let Some(adv) = current.as_mut() else { continue };
                let text = crate::util::unescape_xml_text(&t)
                    .map_err(|e| corrupt(format!("updateinfo text error: {e}")))?;
                let text = text.trim();
                if text.is_empty() {
                    continue;
                }
                match field {
                    Field::Id => adv.id = text.to_string(),
                    Field::Title => adv.title = text.to_string(),
                    Field::Severity => adv.severity = Some(text.to_string()),
                    Field::Description => adv.description = text.to_string(),
                }
            }
            Event::End(e) => match local_name_bytes(e.name().as_ref()) {
                b"update" => {
                    if let Some(adv) = current.take() {
                        advisories.push(adv);
                    }
                }
                _ => text_field = None,
            },
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(advisories)
}

#[derive(Clone, Copy)]
enum Field {
    Id,
    Title,
    Severity,
    Description,
}
