// src/version/mod.rs

//! Version parsing and comparison
//!
//! Two kinds of versions flow through the harness: the content server's own
//! release (`2.18.1`), which gates scenarios and known issues, and unit
//! versions (`0.71`, `1:2.3-4.el8`) reported by unit search. Both use the
//! RPM `[epoch:]version[-release]` shape.

use crate::error::{Error, Result};
use semver::Version;
use std::cmp::Ordering;
use std::fmt;

/// A parsed RPM-style version with epoch, version, and release components
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RpmVersion {
    pub epoch: u64,
    pub version: String,
    pub release: Option<String>,
}

impl RpmVersion {
    /// Parse a version string
    ///
    /// Format: [epoch:]version[-release]
    /// - "2.21" → epoch=0, version="2.21", release=None
    /// - "1:2.3.4-5.el8" → epoch=1, version="2.3.4", release=Some("5.el8")
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        let (epoch, rest) = match s.split_once(':') {
            Some(("", rest)) => (0, rest),
            Some((epoch, rest)) => {
                let epoch = epoch.parse::<u64>().map_err(|e| {
                    Error::ParseError(format!("Invalid epoch in version '{}': {}", s, e))
                })?;
                (epoch, rest)
            }
            None => (0, s),
        };

        let (version, release) = match rest.split_once('-') {
            Some((v, r)) => (v.to_string(), Some(r.to_string())),
            None => (rest.to_string(), None),
        };

        if version.is_empty() {
            return Err(Error::ParseError(format!("Empty version component in '{}'", s)));
        }

        Ok(Self {
            epoch,
            version,
            release,
        })
    }

    /// Build from the separate fields a unit search returns
    pub fn from_parts(epoch: Option<&str>, version: &str, release: Option<&str>) -> Result<Self> {
        let epoch = match epoch {
            None | Some("") => 0,
            Some(e) => e.parse::<u64>().map_err(|err| {
                Error::ParseError(format!("Invalid epoch '{}': {}", e, err))
            })?,
        };
        if version.is_empty() {
            return Err(Error::ParseError("Empty version component".to_string()));
        }
        Ok(Self {
            epoch,
            version: version.to_string(),
            release: release.filter(|r| !r.is_empty()).map(str::to_string),
        })
    }

    /// Numeric major.minor.patch view, when the version has that shape
    ///
    /// Short versions are padded ("2.21" → 2.21.0) so server releases
    /// compare naturally.
    fn to_semver(&self) -> Option<Version> {
        if let Ok(v) = Version::parse(&self.version) {
            return Some(v);
        }
        let parts: Vec<&str> = self.version.split('.').collect();
        if parts.len() > 3 {
            return None;
        }
        let mut numbers = [0u64; 3];
        for (slot, part) in numbers.iter_mut().zip(&parts) {
            *slot = part.parse().ok()?;
        }
        Some(Version::new(numbers[0], numbers[1], numbers[2]))
    }

    /// Compare two versions
    pub fn compare(&self, other: &RpmVersion) -> Ordering {
        self.epoch
            .cmp(&other.epoch)
            .then_with(|| match (self.to_semver(), other.to_semver()) {
                (Some(a), Some(b)) => a.cmp(&b),
                _ => compare_segments(&self.version, &other.version),
            })
            .then_with(|| match (&self.release, &other.release) {
                (Some(a), Some(b)) => compare_segments(a, b),
                (a, b) => a.cmp(b),
            })
    }
}

/// Segment-wise comparison: digit runs compare numerically, letter runs
/// lexically, and a numeric segment beats an alphabetic one
fn compare_segments(a: &str, b: &str) -> Ordering {
    let mut left = segments(a).into_iter();
    let mut right = segments(b).into_iter();
    loop {
        match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (Some(_), None) => return Ordering::Greater,
            (None, Some(_)) => return Ordering::Less,
            (Some(x), Some(y)) => {
                let x_num = x.chars().all(|c| c.is_ascii_digit());
                let y_num = y.chars().all(|c| c.is_ascii_digit());
                let ord = match (x_num, y_num) {
                    (true, true) => {
                        let x = x.trim_start_matches('0');
                        let y = y.trim_start_matches('0');
                        x.len().cmp(&y.len()).then_with(|| x.cmp(y))
                    }
                    (true, false) => Ordering::Greater,
                    (false, true) => Ordering::Less,
                    (false, false) => x.cmp(y),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
    }
}

fn segments(s: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = None;
    let mut digits = false;
    for (i, c) in s.char_indices() {
        if !c.is_ascii_alphanumeric() {
            if let Some(st) = start.take() {
                out.push(&s[st..i]);
            }
            continue;
        }
        match start {
            Some(st) if c.is_ascii_digit() != digits => {
                out.push(&s[st..i]);
                start = Some(i);
                digits = c.is_ascii_digit();
            }
            Some(_) => {}
            None => {
                start = Some(i);
                digits = c.is_ascii_digit();
            }
        }
    }
    if let Some(st) = start {
        out.push(&s[st..]);
    }
    out
}

impl fmt::Display for RpmVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.epoch > 0 {
            write!(f, "{}:", self.epoch)?;
        }
        write!(f, "{}", self.version)?;
        if let Some(ref release) = self.release {
            write!(f, "-{}", release)?;
        }
        Ok(())
    }
}

impl Ord for RpmVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.compare(other)
    }
}

impl PartialOrd for RpmVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Version constraint, e.g. a scenario's minimum server release
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionConstraint {
    /// Any version is acceptable
    Any,
    Exact(RpmVersion),
    GreaterThan(RpmVersion),
    GreaterOrEqual(RpmVersion),
    LessThan(RpmVersion),
    LessOrEqual(RpmVersion),
    NotEqual(RpmVersion),
    /// Both constraints must be satisfied (">= 2.18, < 3.0")
    And(Box<VersionConstraint>, Box<VersionConstraint>),
}

/// Operators in match order; two-character operators first
const OPERATORS: &[(&str, fn(RpmVersion) -> VersionConstraint)] = &[
    (">=", VersionConstraint::GreaterOrEqual),
    ("<=", VersionConstraint::LessOrEqual),
    ("!=", VersionConstraint::NotEqual),
    ("==", VersionConstraint::Exact),
    (">", VersionConstraint::GreaterThan),
    ("<", VersionConstraint::LessThan),
    ("=", VersionConstraint::Exact),
];

impl VersionConstraint {
    /// Parse a constraint string
    ///
    /// Accepts "*", a bare version (exact), an operator plus version, or two
    /// comma-separated constraints.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();

        if s.is_empty() || s == "*" {
            return Ok(VersionConstraint::Any);
        }

        if let Some((left, right)) = s.split_once(',') {
            return Ok(VersionConstraint::And(
                Box::new(Self::parse(left)?),
                Box::new(Self::parse(right)?),
            ));
        }

        for (op, build) in OPERATORS {
            if let Some(rest) = s.strip_prefix(op) {
                return Ok(build(RpmVersion::parse(rest)?));
            }
        }

        Ok(VersionConstraint::Exact(RpmVersion::parse(s)?))
    }

    /// Check if a version satisfies this constraint
    pub fn satisfies(&self, version: &RpmVersion) -> bool {
        match self {
            VersionConstraint::Any => true,
            VersionConstraint::Exact(v) => version == v,
            VersionConstraint::GreaterThan(v) => version > v,
            VersionConstraint::GreaterOrEqual(v) => version >= v,
            VersionConstraint::LessThan(v) => version < v,
            VersionConstraint::LessOrEqual(v) => version <= v,
            VersionConstraint::NotEqual(v) => version != v,
            VersionConstraint::And(left, right) => {
                left.satisfies(version) && right.satisfies(version)
            }
        }
    }
}

impl fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionConstraint::Any => write!(f, "*"),
            VersionConstraint::Exact(v) => write!(f, "= {}", v),
            VersionConstraint::GreaterThan(v) => write!(f, "> {}", v),
            VersionConstraint::GreaterOrEqual(v) => write!(f, ">= {}", v),
            VersionConstraint::LessThan(v) => write!(f, "< {}", v),
            VersionConstraint::LessOrEqual(v) => write!(f, "<= {}", v),
            VersionConstraint::NotEqual(v) => write!(f, "!= {}", v),
            VersionConstraint::And(left, right) => write!(f, "{}, {}", left, right),
        }
    }
}
