//! Shared fixtures for integration tests.
//!
//! Builds throwaway `file://` repositories (repomd plus primary
//! metadata and package payloads) and small pools, so the full
//! metadata-to-transaction pipeline runs without any network or a real
//! RPM database. Each test crate uses its own subset of these helpers.
#![allow(dead_code)]

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use ferrite::crypto::{ChecksumKind, bytes_to_hex, digest_file};
use ferrite::nevra::{Dependency, Evr, Nevra};
use ferrite::pool::Package;

/// Declarative spec of one fixture package.
#[derive(Clone, Debug, Default)]
pub struct PkgSpec {
    pub name: &'static str,
    pub evr: &'static str,
    pub arch: &'static str,
    pub requires: Vec<&'static str>,
    pub provides: Vec<&'static str>,
    pub obsoletes: Vec<&'static str>,
    /// `<time file=...>` value in the primary metadata.
    pub file_time: i64,
    /// Payload bytes of the fixture RPM artifact.
    pub payload: &'static [u8],
    /// Declare this hex digest instead of the payload's real one.
    pub forged_digest: Option<&'static str>,
}

impl PkgSpec {
    pub fn new(name: &'static str, evr: &'static str) -> Self {
        Self {
            name,
            evr,
            arch: "x86_64",
            file_time: 100,
            payload: b"rpm-payload",
            ..Self::default()
        }
    }

    pub fn requires(mut self, dep: &'static str) -> Self {
        self.requires.push(dep);
        self
    }

    pub fn obsoletes(mut self, dep: &'static str) -> Self {
        self.obsoletes.push(dep);
        self
    }

    pub fn file_time(mut self, stamp: i64) -> Self {
        self.file_time = stamp;
        self
    }

    pub fn forged_digest(mut self, hex: &'static str) -> Self {
        self.forged_digest = Some(hex);
        self
    }

    fn nevra(&self) -> Nevra {
        Nevra::new(self.name, Evr::parse(self.evr).unwrap(), self.arch)
    }

    fn location(&self) -> String {
        format!("packages/{}.rpm", self.nevra())
    }
}

/// A fixture repository on disk.
pub struct RepoFixture {
    pub dir: tempfile::TempDir,
    pub base_url: String,
}

impl RepoFixture {
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Rewrite the repo with a new package set (same base URL).
    pub fn rewrite(&self, specs: &[PkgSpec]) {
        write_repo_into(self.dir.path(), specs);
    }
}

fn dep_entry(raw: &str) -> String {
    let dep = Dependency::parse(raw).unwrap();
    match &dep.relation {
        None => format!(r#"<rpm:entry name="{}"/>"#, dep.name),
        Some((op, evr)) => {
            let flags = match op {
                ferrite::nevra::CmpOp::Lt => "LT",
                ferrite::nevra::CmpOp::Le => "LE",
                ferrite::nevra::CmpOp::Eq => "EQ",
                ferrite::nevra::CmpOp::Ge => "GE",
                ferrite::nevra::CmpOp::Gt => "GT",
            };
            format!(
                r#"<rpm:entry name="{}" flags="{}" epoch="{}" ver="{}" rel="{}"/>"#,
                dep.name, flags, evr.epoch, evr.version, evr.release
            )
        }
    }
}

fn write_repo_into(root: &Path, specs: &[PkgSpec]) {
    let repodata = root.join("repodata");
    let packages_dir = root.join("packages");
    std::fs::create_dir_all(&repodata).unwrap();
    std::fs::create_dir_all(&packages_dir).unwrap();

    let mut body = String::new();
    for spec in specs {
        let nevra = spec.nevra();
        let rpm_path = root.join(spec.location());
        std::fs::write(&rpm_path, spec.payload).unwrap();
        let digest = match spec.forged_digest {
            Some(forged) => forged.to_string(),
            None => bytes_to_hex(&digest_file(&rpm_path, ChecksumKind::Sha256).unwrap()),
        };

        let _ = write!(
            body,
            r#"<package type="rpm">
  <name>{name}</name>
  <arch>{arch}</arch>
  <version epoch="{epoch}" ver="{ver}" rel="{rel}"/>
  <checksum type="sha256" pkgid="YES">{digest}</checksum>
  <summary>{name} fixture</summary>
  <description>{name} fixture package</description>
  <time file="{time}" build="{time}"/>
  <size package="{size}" installed="{size}"/>
  <location href="{location}"/>
  <format>
    <rpm:license>MIT</rpm:license>
    <rpm:provides>{provides}</rpm:provides>
    <rpm:requires>{requires}</rpm:requires>
    <rpm:obsoletes>{obsoletes}</rpm:obsoletes>
  </format>
</package>
"#,
            name = spec.name,
            arch = spec.arch,
            epoch = nevra.evr.epoch,
            ver = nevra.evr.version,
            rel = nevra.evr.release,
            digest = digest,
            time = spec.file_time,
            size = spec.payload.len(),
            location = spec.location(),
            provides = {
                let mut entries = vec![format!(
                    r#"<rpm:entry name="{}" flags="EQ" epoch="{}" ver="{}" rel="{}"/>"#,
                    spec.name, nevra.evr.epoch, nevra.evr.version, nevra.evr.release
                )];
                entries.extend(spec.provides.iter().map(|p| dep_entry(p)));
                entries.join("")
            },
            requires = spec
                .requires
                .iter()
                .map(|r| dep_entry(r))
                .collect::<Vec<_>>()
                .join(""),
            obsoletes = spec
                .obsoletes
                .iter()
                .map(|o| dep_entry(o))
                .collect::<Vec<_>>()
                .join(""),
        );
    }

    let primary = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<metadata xmlns="http://linux.duke.edu/metadata/common" xmlns:rpm="http://linux.duke.edu/metadata/rpm" packages="{count}">
{body}</metadata>
"#,
        count = specs.len(),
        body = body
    );
    let primary_path = repodata.join("primary.xml");
    std::fs::write(&primary_path, &primary).unwrap();
    let primary_digest = bytes_to_hex(&digest_file(&primary_path, ChecksumKind::Sha256).unwrap());

    let repomd = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<repomd xmlns="http://linux.duke.edu/metadata/repo">
  <revision>{revision}</revision>
  <data type="primary">
    <checksum type="sha256">{digest}</checksum>
    <open-checksum type="sha256">{digest}</open-checksum>
    <location href="repodata/primary.xml"/>
    <timestamp>{revision}</timestamp>
    <size>{size}</size>
  </data>
</repomd>
"#,
        revision = 1_700_000_000u64,
        digest = primary_digest,
        size = primary.len(),
    );
    std::fs::write(repodata.join("repomd.xml"), repomd).unwrap();
}

/// Build a `file://` repository containing the given packages.
pub fn write_repo(specs: &[PkgSpec]) -> RepoFixture {
    let dir = tempfile::tempdir().unwrap();
    write_repo_into(dir.path(), specs);
    let base_url = format!("file://{}", dir.path().display());
    RepoFixture { dir, base_url }
}

/// An installed package value for pool fixtures.
pub fn installed_pkg(name: &str, evr: &str, requires: &[&str]) -> Package {
    let nevra = Nevra::new(name, Evr::parse(evr).unwrap(), "x86_64");
    let mut pkg = Package::new(nevra, ferrite::pool::SYSTEM_REPO_ID);
    let self_provide = pkg.self_provide();
    pkg.provides.push(self_provide);
    for dep in requires {
        pkg.requires.push(Dependency::parse(dep).unwrap());
    }
    pkg
}

/// A repo package value for pool fixtures.
pub fn repo_pkg(name: &str, evr: &str, requires: &[&str], obsoletes: &[&str]) -> Package {
    let nevra = Nevra::new(name, Evr::parse(evr).unwrap(), "x86_64");
    let mut pkg = Package::new(nevra, "r");
    let self_provide = pkg.self_provide();
    pkg.provides.push(self_provide);
    for dep in requires {
        pkg.requires.push(Dependency::parse(dep).unwrap());
    }
    for dep in obsoletes {
        pkg.obsoletes.push(Dependency::parse(dep).unwrap());
    }
    pkg
}

/// Paths for a session-like cache/persist environment.
pub struct Env {
    pub dir: tempfile::TempDir,
}

impl Env {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.dir.path().join("cache")
    }

    pub fn persist_dir(&self) -> PathBuf {
        self.dir.path().join("persist")
    }

    pub fn lock_path(&self) -> PathBuf {
        self.dir.path().join("instance.lock")
    }
}
