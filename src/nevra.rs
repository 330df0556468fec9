//! Package identity types and RPM version ordering.
//!
//! A package is identified by its NEVRA tuple: name, epoch, version,
//! release, architecture. This module carries the [`Evr`] and [`Nevra`]
//! value types, the segment-based RPM version comparison they order by,
//! and [`Dependency`] with the range-overlap test used to match
//! `Requires:` entries against `Provides:` entries.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Epoch, version and release of a package, ordered by RPM semantics.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Evr {
    /// Epoch; absent epochs are treated as zero.
    pub epoch: u32,
    /// Upstream version string.
    pub version: String,
    /// Package release string; may be empty for version-only relations.
    pub release: String,
}

impl Evr {
    /// What: Build an [`Evr`] from its three parts.
    ///
    /// Inputs:
    /// - `epoch`: Epoch number, `0` when the package has none.
    /// - `version`: Upstream version.
    /// - `release`: Distribution release, may be empty.
    ///
    /// Output:
    /// - The assembled value.
    pub fn new(epoch: u32, version: impl Into<String>, release: impl Into<String>) -> Self {
        Self {
            epoch,
            version: version.into(),
            release: release.into(),
        }
    }

    /// What: Parse an `[epoch:]version[-release]` string.
    ///
    /// Inputs:
    /// - `s`: The textual EVR, e.g. `2:1.4-3` or `1.4`.
    ///
    /// Output:
    /// - `Some(Evr)` when the epoch (if present) parses as an integer,
    ///   `None` otherwise.
    ///
    /// Details:
    /// - The release is everything after the last `-`; a string without a
    ///   `-` yields an empty release, which comparisons then ignore.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        let (epoch, rest) = match s.split_once(':') {
            Some((e, rest)) => (e.parse::<u32>().ok()?, rest),
            None => (0, s),
        };
        let (version, release) = match rest.rsplit_once('-') {
            Some((v, r)) => (v.to_string(), r.to_string()),
            None => (rest.to_string(), String::new()),
        };
        if version.is_empty() {
            return None;
        }
        Some(Self {
            epoch,
            version,
            release,
        })
    }

    /// What: Compare two EVRs, optionally ignoring the release.
    ///
    /// Inputs:
    /// - `other`: The EVR to compare against.
    ///
    /// Output:
    /// - The RPM ordering of the pair.
    ///
    /// Details:
    /// - When either side carries an empty release, releases are skipped
    ///   entirely. This is how an unreleased relation like `>= 1.4`
    ///   matches any release of version 1.4.
    #[must_use]
    pub fn compare(&self, other: &Self) -> Ordering {
        match self.epoch.cmp(&other.epoch) {
            Ordering::Equal => {}
            ord => return ord,
        }
        match rpmvercmp(&self.version, &other.version) {
            Ordering::Equal => {}
            ord => return ord,
        }
        if self.release.is_empty() || other.release.is_empty() {
            return Ordering::Equal;
        }
        rpmvercmp(&self.release, &other.release)
    }
}

impl Ord for Evr {
    fn cmp(&self, other: &Self) -> Ordering {
        self.compare(other)
    }
}

impl PartialOrd for Evr {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Evr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.epoch != 0 {
            write!(f, "{}:", self.epoch)?;
        }
        write!(f, "{}", self.version)?;
        if !self.release.is_empty() {
            write!(f, "-{}", self.release)?;
        }
        Ok(())
    }
}

/// Full package identity: name, epoch, version, release, architecture.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Nevra {
    /// Package name.
    pub name: String,
    /// Epoch, version and release.
    pub evr: Evr,
    /// Architecture, e.g. `x86_64` or `noarch`.
    pub arch: String,
}

impl Nevra {
    /// What: Build a NEVRA from its parts.
    pub fn new(name: impl Into<String>, evr: Evr, arch: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            evr,
            arch: arch.into(),
        }
    }

    /// What: Parse a canonical `name-[epoch:]version-release.arch` string.
    ///
    /// Inputs:
    /// - `s`: The textual NEVRA, e.g. `bash-2:5.1-4.x86_64`.
    ///
    /// Output:
    /// - `Some(Nevra)` when the string has the full shape, `None` otherwise.
    ///
    /// Details:
    /// - The arch is everything after the last `.` in the final
    ///   `release.arch` segment; release and version are split off the
    ///   tail with `rsplit`, so names containing `-` parse correctly.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        let (rest, arch) = s.rsplit_once('.')?;
        if arch.is_empty() || arch.contains('-') {
            return None;
        }
        let (rest, release) = rest.rsplit_once('-')?;
        let (name, ev) = rest.rsplit_once('-')?;
        if name.is_empty() || release.is_empty() {
            return None;
        }
        let (epoch, version) = match ev.split_once(':') {
            Some((e, v)) => (e.parse::<u32>().ok()?, v),
            None => (0, ev),
        };
        if version.is_empty() {
            return None;
        }
        Some(Self {
            name: name.to_string(),
            evr: Evr::new(epoch, version, release),
            arch: arch.to_string(),
        })
    }
}

impl fmt::Display for Nevra {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}.{}", self.name, self.evr, self.arch)
    }
}

/// Comparison operator of a versioned dependency relation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CmpOp {
    /// Strictly less than.
    Lt,
    /// Less than or equal.
    Le,
    /// Exactly equal.
    Eq,
    /// Greater than or equal.
    Ge,
    /// Strictly greater than.
    Gt,
}

impl CmpOp {
    /// Whether the operator admits values below the anchor.
    #[must_use]
    pub fn allows_less(self) -> bool {
        matches!(self, Self::Lt | Self::Le)
    }

    /// Whether the operator admits the anchor itself.
    #[must_use]
    pub fn allows_equal(self) -> bool {
        matches!(self, Self::Le | Self::Eq | Self::Ge)
    }

    /// Whether the operator admits values above the anchor.
    #[must_use]
    pub fn allows_greater(self) -> bool {
        matches!(self, Self::Gt | Self::Ge)
    }

    /// What: Parse the textual form used in repo metadata and CLI specs.
    ///
    /// Inputs:
    /// - `s`: One of `LT`, `LE`, `EQ`, `GE`, `GT`, `<`, `<=`, `=`, `==`,
    ///   `>=`, `>`.
    ///
    /// Output:
    /// - The operator, or `None` for anything else.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "LT" | "<" => Some(Self::Lt),
            "LE" | "<=" => Some(Self::Le),
            "EQ" | "=" | "==" => Some(Self::Eq),
            "GE" | ">=" => Some(Self::Ge),
            "GT" | ">" => Some(Self::Gt),
            _ => None,
        }
    }
}

impl fmt::Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Eq => "=",
            Self::Ge => ">=",
            Self::Gt => ">",
        };
        f.write_str(s)
    }
}

/// A dependency relation: a capability name and an optional EVR bound.
///
/// Used for all eight RPM dependency sets (provides, requires, conflicts,
/// obsoletes, and the weak variants). File paths are plain names starting
/// with `/`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dependency {
    /// Capability name or absolute file path.
    pub name: String,
    /// Version bound; `None` matches any version of the capability.
    pub relation: Option<(CmpOp, Evr)>,
}

impl Dependency {
    /// What: Build an unversioned dependency on a capability name.
    pub fn unversioned(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            relation: None,
        }
    }

    /// What: Build a versioned dependency.
    pub fn versioned(name: impl Into<String>, op: CmpOp, evr: Evr) -> Self {
        Self {
            name: name.into(),
            relation: Some((op, evr)),
        }
    }

    /// What: Parse a textual relation like `libfoo >= 2:1.4-3`.
    ///
    /// Inputs:
    /// - `s`: Whitespace-separated `name [op evr]`.
    ///
    /// Output:
    /// - `Some(Dependency)`; `None` when an operator is present but the
    ///   EVR is missing or malformed.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        let mut parts = s.split_whitespace();
        let name = parts.next()?.to_string();
        match parts.next() {
            None => Some(Self {
                name,
                relation: None,
            }),
            Some(op) => {
                let op = CmpOp::parse(op)?;
                let evr = Evr::parse(parts.next()?)?;
                if parts.next().is_some() {
                    return None;
                }
                Some(Self {
                    name,
                    relation: Some((op, evr)),
                })
            }
        }
    }

    /// What: Test whether this relation is satisfied by a provide.
    ///
    /// Inputs:
    /// - `provide`: A `Provides:` entry of some candidate package.
    ///
    /// Output:
    /// - `true` when the capability names match and the version ranges
    ///   overlap.
    ///
    /// Details:
    /// - An unversioned side matches any version of the same name.
    /// - Range overlap follows the RPM dependency-set rules: a pair of
    ///   open ends in the same direction always overlaps; otherwise the
    ///   anchors are compared and the operators decide.
    #[must_use]
    pub fn intersects(&self, provide: &Self) -> bool {
        if self.name != provide.name {
            return false;
        }
        let (Some((my_op, my_evr)), Some((their_op, their_evr))) =
            (&self.relation, &provide.relation)
        else {
            return true;
        };
        match my_evr.compare(their_evr) {
            Ordering::Less => my_op.allows_greater() || their_op.allows_less(),
            Ordering::Greater => my_op.allows_less() || their_op.allows_greater(),
            Ordering::Equal => {
                (my_op.allows_equal() && their_op.allows_equal())
                    || (my_op.allows_less() && their_op.allows_less())
                    || (my_op.allows_greater() && their_op.allows_greater())
            }
        }
    }

    /// What: Test whether a concrete EVR satisfies this relation.
    ///
    /// Inputs:
    /// - `evr`: The candidate's own EVR.
    ///
    /// Output:
    /// - `true` when the relation admits the value (always, if
    ///   unversioned).
    #[must_use]
    pub fn matches_evr(&self, evr: &Evr) -> bool {
        match &self.relation {
            None => true,
            Some((op, anchor)) => match evr.compare(anchor) {
                Ordering::Less => op.allows_less(),
                Ordering::Equal => op.allows_equal(),
                Ordering::Greater => op.allows_greater(),
            },
        }
    }
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.relation {
            None => f.write_str(&self.name),
            Some((op, evr)) => write!(f, "{} {} {}", self.name, op, evr),
        }
    }
}

/// What: Compare two RPM version strings segment by segment.
///
/// Inputs:
/// - `a`, `b`: Raw version or release strings.
///
/// Output:
/// - Their ordering under the RPM algorithm.
///
/// Details:
/// - Strings are walked in alternating numeric and alphabetic segments;
///   separators only delimit. Numeric segments beat alphabetic ones.
/// - `~` sorts before everything including the end of the string
///   (pre-release), `^` sorts after the end of the string but before any
///   ordinary continuation (post-release snapshot).
#[must_use]
pub fn rpmvercmp(a: &str, b: &str) -> Ordering {
    if a == b {
        return Ordering::Equal;
    }
    let a = a.as_bytes();
    let b = b.as_bytes();
    let (mut i, mut j) = (0, 0);

    loop {
        // Skip separators: anything that is not alphanumeric, '~' or '^'.
        while i < a.len() && !a[i].is_ascii_alphanumeric() && a[i] != b'~' && a[i] != b'^' {
            i += 1;
        }
        while j < b.len() && !b[j].is_ascii_alphanumeric() && b[j] != b'~' && b[j] != b'^' {
            j += 1;
        }

        // Tilde: sorts before everything, including end of string.
        let a_tilde = i < a.len() && a[i] == b'~';
        let b_tilde = j < b.len() && b[j] == b'~';
        if a_tilde || b_tilde {
            if a_tilde && b_tilde {
                i += 1;
                j += 1;
                continue;
            }
            return if a_tilde {
                Ordering::Less
            } else {
                Ordering::Greater
            };
        }

        // Caret: newer than the bare string end, older than any other
        // continuation.
        let a_caret = i < a.len() && a[i] == b'^';
        let b_caret = j < b.len() && b[j] == b'^';
        if a_caret || b_caret {
            if a_caret && b_caret {
                i += 1;
                j += 1;
                continue;
            }
            if a_caret {
                return if j == b.len() {
                    Ordering::Greater
                } else {
                    Ordering::Less
                };
            }
            return if i == a.len() {
                Ordering::Less
            } else {
                Ordering::Greater
            };
        }

        if i == a.len() || j == b.len() {
            break;
        }

        // Grab one run of digits or one run of letters from each side.
        let a_digits = a[i].is_ascii_digit();
        let seg_a = take_segment(a, i, a_digits);
        let seg_b = take_segment(b, j, a_digits);

        if seg_b.is_empty() {
            // Different segment types: numeric always wins.
            return if a_digits {
                Ordering::Greater
            } else {
                Ordering::Less
            };
        }

        let ord = if a_digits {
            compare_numeric(seg_a, seg_b)
        } else {
            seg_a.cmp(seg_b)
        };
        if ord != Ordering::Equal {
            return ord;
        }

        i += seg_a.len();
        j += seg_b.len();
    }

    // Whichever string has leftover content is newer.
    (a.len() - i).cmp(&(b.len() - j))
}

/// Take a maximal digit run or letter run starting at `pos`.
fn take_segment(s: &[u8], pos: usize, digits: bool) -> &[u8] {
    let mut end = pos;
    while end < s.len() {
        let matches = if digits {
            s[end].is_ascii_digit()
        } else {
            s[end].is_ascii_alphabetic()
        };
        if !matches {
            break;
        }
        end += 1;
    }
    &s[pos..end]
}

/// Compare two digit runs numerically without overflow.
fn compare_numeric(a: &[u8], b: &[u8]) -> Ordering {
    let a = strip_leading_zeros(a);
    let b = strip_leading_zeros(b);
    match a.len().cmp(&b.len()) {
        Ordering::Equal => a.cmp(b),
        ord => ord,
    }
}

/// Drop leading ASCII zeros.
fn strip_leading_zeros(s: &[u8]) -> &[u8] {
    let start = s.iter().take_while(|&&c| c == b'0').count();
    &s[start..]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vc(a: &str, b: &str) -> Ordering {
        rpmvercmp(a, b)
    }

    #[test]
    fn rpmvercmp_basic_ordering() {
        assert_eq!(vc("1.0", "1.0"), Ordering::Equal);
        assert_eq!(vc("1.0", "1.1"), Ordering::Less);
        assert_eq!(vc("2.0", "1.9"), Ordering::Greater);
        assert_eq!(vc("10", "9"), Ordering::Greater);
        assert_eq!(vc("1.05", "1.5"), Ordering::Equal);
        assert_eq!(vc("1.0010", "1.9"), Ordering::Greater);
    }

    #[test]
    fn rpmvercmp_alpha_vs_numeric() {
        // Numeric segments always beat alphabetic segments.
        assert_eq!(vc("1.0.a", "1.0.1"), Ordering::Less);
        assert_eq!(vc("abc", "1"), Ordering::Less);
        assert_eq!(vc("1.0A", "1.0a"), Ordering::Less);
        // A longer string with extra segments is newer.
        assert_eq!(vc("1.0", "1.0.1"), Ordering::Less);
    }

    #[test]
    fn rpmvercmp_tilde_is_prerelease() {
        assert_eq!(vc("1.0~rc1", "1.0"), Ordering::Less);
        assert_eq!(vc("1.0~rc1", "1.0~rc2"), Ordering::Less);
        assert_eq!(vc("1.0~rc1~git1", "1.0~rc1"), Ordering::Less);
        assert_eq!(vc("1.0", "1.0~rc1"), Ordering::Greater);
    }

    #[test]
    fn rpmvercmp_caret_is_postrelease() {
        assert_eq!(vc("1.0^git1", "1.0"), Ordering::Greater);
        assert_eq!(vc("1.0^git1", "1.0.1"), Ordering::Less);
        assert_eq!(vc("1.0^git1", "1.0^git2"), Ordering::Less);
        assert_eq!(vc("1.0^20240101", "1.0^20240102"), Ordering::Less);
    }

    #[test]
    fn evr_ordering_uses_epoch_first() {
        let low = Evr::new(0, "9.9", "9");
        let high = Evr::new(1, "0.1", "1");
        assert!(low < high);
    }

    #[test]
    fn evr_empty_release_matches_any() {
        let bare = Evr::parse("1.4").unwrap();
        let full = Evr::parse("1.4-7").unwrap();
        assert_eq!(bare.compare(&full), Ordering::Equal);
    }

    #[test]
    fn nevra_parse_round_trips() {
        let n = Nevra::parse("bash-5.1-4.x86_64").unwrap();
        assert_eq!(n.name, "bash");
        assert_eq!(n.evr, Evr::new(0, "5.1", "4"));
        assert_eq!(n.arch, "x86_64");
        assert_eq!(n.to_string(), "bash-5.1-4.x86_64");

        let n = Nevra::parse("gcc-c++-2:12.2.0-1.aarch64").unwrap();
        assert_eq!(n.name, "gcc-c++");
        assert_eq!(n.evr, Evr::new(2, "12.2.0", "1"));
        assert_eq!(n.to_string(), "gcc-c++-2:12.2.0-1.aarch64");
    }

    #[test]
    fn nevra_parse_rejects_partial_forms() {
        assert!(Nevra::parse("bash").is_none());
        assert!(Nevra::parse("bash-5.1").is_none());
        assert!(Nevra::parse("bash-5.1-4").is_none());
    }

    #[test]
    fn dependency_intersection() {
        let req = Dependency::parse("libfoo >= 1.2").unwrap();
        let prov_newer = Dependency::parse("libfoo = 1.5").unwrap();
        let prov_older = Dependency::parse("libfoo = 1.0").unwrap();
        let prov_any = Dependency::parse("libfoo").unwrap();
        assert!(req.intersects(&prov_newer));
        assert!(!req.intersects(&prov_older));
        assert!(req.intersects(&prov_any));

        let conflicting_name = Dependency::parse("libbar = 1.5").unwrap();
        assert!(!req.intersects(&conflicting_name));
    }

    #[test]
    fn dependency_matches_concrete_evr() {
        let lt = Dependency::parse("foo < 2").unwrap();
        assert!(lt.matches_evr(&Evr::parse("1.9").unwrap()));
        assert!(!lt.matches_evr(&Evr::parse("2").unwrap()));
        assert!(!lt.matches_evr(&Evr::parse("2.1").unwrap()));
    }
}
