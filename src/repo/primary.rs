//! `primary.xml`, `filelists.xml` and `other.xml` parsing.
//!
//! Primary metadata yields the [`Package`] values loaded into the pool;
//! filelists and changelog metadata are merged into already-parsed
//! packages by NEVRA. Namespace prefixes (`rpm:`) are matched by local
//! name only.

use std::collections::HashMap;

use quick_xml::Reader;
use quick_xml::events::Event;

use crate::crypto::ChecksumKind;
use crate::error::{Error, Result};
use crate::nevra::{CmpOp, Dependency, Evr, Nevra};
use crate::pool::{Changelog, Package};
use crate::repo::md::{attr, local_name, local_name_bytes};

/// Which dependency set `rpm:entry` elements currently land in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum DepSet {
    Provides,
    Requires,
    Conflicts,
    Obsoletes,
    Recommends,
    Suggests,
    Supplements,
    Enhances,
}

/// Which simple element text currently fills.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TextField {
    Name,
    Arch,
    Summary,
    Description,
    Url,
    License,
    SourceRpm,
    Checksum,
    File,
}

fn corrupt(repo_id: &str, detail: impl Into<String>) -> Error {
    Error::CacheCorrupt {
        repo: repo_id.to_string(),
        detail: detail.into(),
    }
}

/// What: Parse a primary metadata document.
///
/// Inputs:
/// - `repo_id`: Repo the packages belong to, stamped on each one.
/// - `xml`: Decompressed primary document.
///
/// Output:
/// - All packages in document order, each carrying its implicit
///   self-provide.
///
/// Details:
/// - Rich (boolean) dependency entries, recognizable by a leading `(`,
///   are skipped; they never name a plain capability.
pub fn parse_primary(repo_id: &str, xml: &str) -> Result<Vec<Package>> {
    let mut reader = Reader::from_str(xml);
    let mut packages = Vec::new();

    let mut current: Option<Package> = None;
    let mut evr = Evr::default();
    let mut checksum_kind: Option<ChecksumKind> = None;
    let mut dep_set: Option<DepSet> = None;
    let mut text_field: Option<TextField> = None;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| corrupt(repo_id, format!("primary parse error: {e}")))?;
        match event {
            Event::Start(ref e) | Event::Empty(ref e) => {
                let empty = matches!(event, Event::Empty(_));
                match local_name(e) {
                    b"package" if !empty => {
                        current = Some(Package::new(
                            Nevra::new("", Evr::default(), ""),
                            repo_id,
                        ));
                        evr = Evr::default();
                    }
                    b"name" => text_field = Some(TextField::Name),
                    b"arch" => text_field = Some(TextField::Arch),
                    b"summary" => text_field = Some(TextField::Summary),
                    b"description" => text_field = Some(TextField::Description),
                    b"url" => text_field = Some(TextField::Url),
                    b"license" => text_field = Some(TextField::License),
                    b"sourcerpm" => text_field = Some(TextField::SourceRpm),
                    b"file" => text_field = Some(TextField::File),
                    b"version" => {
                        if current.is_some() {
                            evr = Evr {
                                epoch: attr(e, b"epoch")?
                                    .and_then(|v| v.parse().ok())
                                    .unwrap_or(0),
                                version: attr(e, b"ver")?.unwrap_or_default(),
                                release: attr(e, b"rel")?.unwrap_or_default(),
                            };
                        }
                    }
                    b"checksum" => {
                        checksum_kind = attr(e, b"type")?
                            .as_deref()
                            .and_then(ChecksumKind::parse);
                        text_field = Some(TextField::Checksum);
                    }
                    b"time" => {
                        if let Some(pkg) = current.as_mut() {
                            pkg.file_time = attr(e, b"file")?
                                .and_then(|v| v.parse().ok())
                                .unwrap_or(0);
                            pkg.build_time = attr(e, b"build")?
                                .and_then(|v| v.parse().ok())
                                .unwrap_or(0);
                        }
                    }
                    b"size" => {
                        if let Some(pkg) = current.as_mut() {
                            pkg.download_size = attr(e, b"package")?
                                .and_then(|v| v.parse().ok())
                                .unwrap_or(0);
                            pkg.install_size = attr(e, b"installed")?
                                .and_then(|v| v.parse().ok())
                                .unwrap_or(0);
                        }
                    }
                    b"location" => {
                        if let Some(pkg) = current.as_mut() {
                            pkg.location = attr(e, b"href")?.unwrap_or_default();
                        }
                    }
                    b"provides" => dep_set = Some(DepSet::Provides),
                    b"requires" => dep_set = Some(DepSet::Requires),
                    b"conflicts" => dep_set = Some(DepSet::Conflicts),
                    b"obsoletes" => dep_set = Some(DepSet::Obsoletes),
                    b"recommends" => dep_set = Some(DepSet::Recommends),
                    b"suggests" => dep_set = Some(DepSet::Suggests),
                    b"supplements" => dep_set = Some(DepSet::Supplements),
                    b"enhances" => dep_set = Some(DepSet::Enhances),
                    b"entry" => {
                        if let (Some(set), Some(pkg)) = (dep_set, current.as_mut()) {
                            if let Some((dep, pre)) = parse_entry(e)? {
                                push_dep(pkg, set, dep, pre);
                            }
                        }
                    }
                    _ => {}
                }
            }
            Event::Text(t) => {
                let Some(field) = text_field else { continue };
                let Some(pkg) = current.as_mut() else { continue };
                let text = crate::util::unescape_xml_text(&t)
                    .map_err(|e| corrupt(repo_id, format!("primary text error: {e}")))?;
                let text = text.trim();
                if text.is_empty() {
                    continue;
                }
                match field {
                    TextField::Name => pkg.nevra.name = text.to_string(),
                    TextField::Arch => pkg.nevra.arch = text.to_string(),
                    TextField::Summary => pkg.summary = text.to_string(),
                    TextField::Description => pkg.description = text.to_string(),
                    TextField::Url => pkg.url = text.to_string(),
                    TextField::License => pkg.license = text.to_string(),
                    TextField::SourceRpm => pkg.source_rpm = text.to_string(),
                    TextField::File => pkg.files.push(text.to_string()),
                    TextField::Checksum => {
                        if let Some(kind) = checksum_kind {
                            pkg.checksum = Some((kind, text.to_ascii_lowercase()));
                        }
                    }
                }
            }
            Event::End(e) => match local_name_bytes(e.name().as_ref()) {
                b"package" => {
                    if let Some(mut pkg) = current.take() {
                        pkg.nevra.evr = std::mem::take(&mut evr);
                        if pkg.nevra.name.is_empty() {
                            return Err(corrupt(repo_id, "package element without a name"));
                        }
                        ensure_self_provide(&mut pkg);
                        packages.push(pkg);
                    }
                    dep_set = None;
                    text_field = None;
                }
                b"provides" | b"requires" | b"conflicts" | b"obsoletes" | b"recommends"
                | b"suggests" | b"supplements" | b"enhances" => dep_set = None,
                _ => text_field = None,
            },
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(packages)
}

fn push_dep(pkg: &mut Package, set: DepSet, dep: Dependency, pre: bool) {
    match set {
        DepSet::Provides => pkg.provides.push(dep),
        DepSet::Requires => {
            if pre {
                pkg.requires_pre.push(dep);
            } else {
                pkg.requires.push(dep);
            }
        }
        DepSet::Conflicts => pkg.conflicts.push(dep),
        DepSet::Obsoletes => pkg.obsoletes.push(dep),
        DepSet::Recommends => pkg.recommends.push(dep),
        DepSet::Suggests => pkg.suggests.push(dep),
        DepSet::Supplements => pkg.supplements.push(dep),
        DepSet::Enhances => pkg.enhances.push(dep),
    }
}

/// Parse one `rpm:entry`; returns the dependency and its `pre` flag.
fn parse_entry(e: &quick_xml::events::BytesStart<'_>) -> Result<Option<(Dependency, bool)>> {
    let Some(name) = attr(e, b"name")? else {
        return Ok(None);
    };
    // Rich deps carry boolean expressions, not capability names.
    if name.starts_with('(') {
        return Ok(None);
    }
    let pre = attr(e, b"pre")?.as_deref() == Some("1");
    let relation = match attr(e, b"flags")? {
        Some(flags) => {
            let Some(op) = CmpOp::parse(&flags) else {
                return Ok(None);
            };
            let evr = Evr {
                epoch: attr(e, b"epoch")?.and_then(|v| v.parse().ok()).unwrap_or(0),
                version: attr(e, b"ver")?.unwrap_or_default(),
                release: attr(e, b"rel")?.unwrap_or_default(),
            };
            Some((op, evr))
        }
        None => None,
    };
    Ok(Some((Dependency { name, relation }, pre)))
}

fn ensure_self_provide(pkg: &mut Package) {
    let has_self = pkg
        .provides
        .iter()
        .any(|p| p.name == pkg.nevra.name);
    if !has_self {
        let self_provide = pkg.self_provide();
        pkg.provides.push(self_provide);
    }
}

/// Key used to merge auxiliary metadata into primary packages.
fn merge_key(name: &str, arch: &str, evr: &Evr) -> (String, String, Evr) {
    (name.to_string(), arch.to_string(), evr.clone())
}

/// What: Merge filelists metadata into parsed packages.
///
/// Inputs:
/// - `repo_id`: For error messages.
/// - `packages`: Primary parse output, mutated in place.
/// - `xml`: Decompressed filelists document.
///
/// Output:
/// - `Ok(())`; packages present only in the filelists are ignored.
pub fn merge_filelists(repo_id: &str, packages: &mut [Package], xml: &str) -> Result<()> {
    merge_aux(repo_id, packages, xml, AuxKind::Filelists)
}

/// What: Merge changelog ("other") metadata into parsed packages.
pub fn merge_other(repo_id: &str, packages: &mut [Package], xml: &str) -> Result<()> {
    merge_aux(repo_id, packages, xml, AuxKind::Other)
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum AuxKind {
    Filelists,
    Other,
}

fn merge_aux(repo_id: &str, packages: &mut [Package], xml: &str, kind: AuxKind) -> Result<()> {
    let mut index: HashMap<(String, String, Evr), usize> = HashMap::new();
    for (idx, pkg) in packages.iter().enumerate() {
        index.insert(
            merge_key(&pkg.nevra.name, &pkg.nevra.arch, &pkg.nevra.evr),
            idx,
        );
    }

    let mut reader = Reader::from_str(xml);
    let mut name = String::new();
    let mut arch = String::new();
    let mut evr = Evr::default();
    let mut target: Option<usize> = None;
    let mut in_file = false;
    let mut changelog: Option<Changelog> = None;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| corrupt(repo_id, format!("metadata parse error: {e}")))?;
        match event {
            Event::Start(ref e) | Event::Empty(ref e) => match local_name(e) {
                b"package" => {
                    name = attr(e, b"name")?.unwrap_or_default();
                    arch = attr(e, b"arch")?.unwrap_or_default();
                    target = None;
                }
                b"version" => {
                    evr = Evr {
                        epoch: attr(e, b"epoch")?.and_then(|v| v.parse().ok()).unwrap_or(0),
                        version: attr(e, b"ver")?.unwrap_or_default(),
                        release: attr(e, b"rel")?.unwrap_or_default(),
                    };
                    target = index.get(&merge_key(&name, &arch, &evr)).copied();
                }
                b"file" if kind == AuxKind::Filelists => in_file = true,
                b"changelog" if kind == AuxKind::Other => {
                    changelog = Some(Changelog {
                        author: attr(e, b"author")?.unwrap_or_default(),
                        time: attr(e, b"date")?.and_then(|v| v.parse().ok()).unwrap_or(0),
                        text: String::new(),
                    });
                }
                _ => {}
            },
            Event::Text(t) => {
                let text = crate::util::unescape_xml_text(&t)
                    .map_err(|e| corrupt(repo_id, format!("metadata text error: {e}")))?;
                let text = text.trim();
                if text.is_empty() {
                    continue;
                }
                if in_file {
                    if let Some(idx) = target {
                        let files = &mut packages[idx].files;
                        if !files.iter().any(|f| f == text) {
                            files.push(text.to_string());
                        }
                    }
                } else if let Some(entry) = changelog.as_mut() {
                    entry.text.push_str(text);
                }
            }
            Event::End(e) => match local_name_bytes(e.name().as_ref()) {
                b"file" => in_file = false,
                b"changelog" => {
                    if let (Some(idx), Some(entry)) = (target, changelog.take()) {
                        packages[idx].changelogs.push(entry);
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(())
}
