//! Release versions and their ordering.
//!
//! Versions follow semver precedence: `major.minor.patch`, an optional
//! `-prerelease` that sorts below the plain release, and optional `+build`
//! metadata that is accepted but ignored. A leading `v` is tolerated and
//! missing minor/patch components read as zero (`1.2` == `1.2.0`).

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Result, UpdateError};

/// One dot-separated pre-release identifier.
///
/// Variant order matters: numeric identifiers sort below alphanumeric ones.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
enum Identifier {
    Numeric(u64),
    Alpha(String),
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identifier::Numeric(n) => write!(f, "{n}"),
            Identifier::Alpha(s) => f.write_str(s),
        }
    }
}

/// An installed or published release version.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Version {
    major: u64,
    minor: u64,
    patch: u64,
    pre: Vec<Identifier>,
}

impl Version {
    /// Construct a plain release version.
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
            pre: Vec::new(),
        }
    }

    /// The version assumed when no version record exists.
    pub const fn zero() -> Self {
        Self::new(0, 0, 0)
    }

    /// Parse a version string, returning `None` when it is not a version.
    pub fn parse(input: &str) -> Option<Self> {
        let s = input.trim();
        let s = s.strip_prefix('v').unwrap_or(s);
        // Build metadata never participates in precedence.
        let s = s.split_once('+').map_or(s, |(core, _)| core);
        let (core, pre) = match s.split_once('-') {
            Some((core, pre)) => (core, Some(pre)),
            None => (s, None),
        };

        let mut parts = core.split('.');
        let major = parse_component(parts.next()?)?;
        let minor = match parts.next() {
            Some(p) => parse_component(p)?,
            None => 0,
        };
        let patch = match parts.next() {
            Some(p) => parse_component(p)?,
            None => 0,
        };
        if parts.next().is_some() {
            return None;
        }

        let pre = match pre {
            Some(pre) => pre
                .split('.')
                .map(parse_identifier)
                .collect::<Option<Vec<_>>>()?,
            None => Vec::new(),
        };

        Some(Self {
            major,
            minor,
            patch,
            pre,
        })
    }

    /// Returns `true` if `self` is strictly newer than `other`.
    pub fn is_newer_than(&self, other: &Version) -> bool {
        self > other
    }
}

fn parse_component(s: &str) -> Option<u64> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

fn parse_identifier(s: &str) -> Option<Identifier> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-') {
        return None;
    }
    if s.bytes().all(|b| b.is_ascii_digit()) {
        s.parse().ok().map(Identifier::Numeric)
    } else {
        Some(Identifier::Alpha(s.to_string()))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch)
            .cmp(&(other.major, other.minor, other.patch))
            .then_with(|| match (self.pre.is_empty(), other.pre.is_empty()) {
                (true, true) => Ordering::Equal,
                // A pre-release sorts below its release.
                (true, false) => Ordering::Greater,
                (false, true) => Ordering::Less,
                (false, false) => self.pre.cmp(&other.pre),
            })
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        for (i, id) in self.pre.iter().enumerate() {
            f.write_str(if i == 0 { "-" } else { "." })?;
            write!(f, "{id}")?;
        }
        Ok(())
    }
}

impl FromStr for Version {
    type Err = UpdateError;

    fn from_str(s: &str) -> Result<Self> {
        Version::parse(s).ok_or_else(|| UpdateError::Validation(format!("invalid version '{s}'")))
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Version::parse(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid version '{raw}'")))
    }
}
