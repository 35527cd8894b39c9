//! Image version parsing and comparison.
//!
//! Image versions are not semantic versions: authors write whatever upstream uses,
//! from a bare `12` to `2024.1.0-beta`. Velocity accepts the shape
//! `MAJOR[.MINOR[.PATCH]][-SUFFIX]` and defines two relations over it:
//!
//! - A **total order** ([`Ord`]) used to pick the highest candidate. Components are compared
//!   left to right, a missing component sorts below any present one, and a version
//!   without suffix sorts above the same version with one (`12.3.0` > `12.3.0-rc1`).
//! - **Prefix equality** ([`Version::prefix_eq`]) used by constraints. Only the components
//!   both sides name are compared, so `12` is prefix-equal to `12.3.1`.
//!
//! # Module Organization
//!
//! - [`constraints`] - Constraint parsing, constraint sets and version selection
//!
//! # Examples
//!
//! ```rust,ignore
//! use velocity_cli::version::Version;
//!
//! let a: Version = "12.3.0".parse()?;
//! let b: Version = "12".parse()?;
//! assert!(a > b);
//! assert!(a.prefix_eq(&b));
//! ```

use serde::{Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;
use thiserror::Error;

pub mod constraints;

pub use constraints::{Comparator, ConstraintSet, SelectionPolicy, VersionConstraint};

static VERSION_RE: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(
        r"^(?P<major>[0-9]+)(?:\.(?P<minor>[0-9]+)(?:\.(?P<patch>[0-9]+))?)?(?:-(?P<suffix>[A-Za-z0-9]+))?$",
    )
    .unwrap_or_else(|_| unreachable!("version pattern is a valid regex"))
});

/// Error returned when a string is not a valid image version or constraint.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid version '{input}': {reason}")]
pub struct ParseVersionError {
    /// The rejected input
    pub input: String,
    /// Why it was rejected
    pub reason: String,
}

impl ParseVersionError {
    pub(crate) fn new(input: &str, reason: impl Into<String>) -> Self {
        Self {
            input: input.to_string(),
            reason: reason.into(),
        }
    }
}

/// A concrete image version.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Version {
    /// Major component, always present
    pub major: u64,
    /// Minor component
    pub minor: Option<u64>,
    /// Patch component, only present when minor is
    pub patch: Option<u64>,
    /// Alphanumeric suffix after `-`
    pub suffix: Option<String>,
}

impl Version {
    /// Parse a version string.
    ///
    /// # Errors
    ///
    /// Returns [`ParseVersionError`] when the input does not match
    /// `MAJOR[.MINOR[.PATCH]][-SUFFIX]` or a component overflows `u64`.
    pub fn parse(input: &str) -> Result<Self, ParseVersionError> {
        let trimmed = input.trim();
        let caps = VERSION_RE
            .captures(trimmed)
            .ok_or_else(|| ParseVersionError::new(input, "expected MAJOR[.MINOR[.PATCH]][-SUFFIX]"))?;

        let number = |name: &str| -> Result<Option<u64>, ParseVersionError> {
            caps.name(name)
                .map(|m| {
                    m.as_str()
                        .parse::<u64>()
                        .map_err(|e| ParseVersionError::new(input, format!("{name} component: {e}")))
                })
                .transpose()
        };

        Ok(Self {
            major: number("major")?.unwrap_or_default(),
            minor: number("minor")?,
            patch: number("patch")?,
            suffix: caps.name("suffix").map(|m| m.as_str().to_string()),
        })
    }

    /// Number of leading components this version names.
    ///
    /// A suffix only counts once the patch component is present, so `12.3-rc1`
    /// names two components and compares like `12.3` under [`prefix_eq`](Self::prefix_eq).
    #[must_use]
    pub const fn precision(&self) -> usize {
        match (self.minor, self.patch, &self.suffix) {
            (None, _, _) => 1,
            (Some(_), None, _) => 2,
            (Some(_), Some(_), None) => 3,
            (Some(_), Some(_), Some(_)) => 4,
        }
    }

    /// Compare only the components both versions name.
    #[must_use]
    pub fn prefix_eq(&self, other: &Self) -> bool {
        let depth = self.precision().min(other.precision());
        self.major == other.major
            && (depth < 2 || self.minor == other.minor)
            && (depth < 3 || self.patch == other.patch)
            && (depth < 4 || self.suffix == other.suffix)
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        // Option<u64> orders None below Some, which is what missing components need
        self.major
            .cmp(&other.major)
            .then_with(|| self.minor.cmp(&other.minor))
            .then_with(|| self.patch.cmp(&other.patch))
            .then_with(|| match (&self.suffix, &other.suffix) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Greater,
                (Some(_), None) => Ordering::Less,
                (Some(a), Some(b)) => a.cmp(b),
            })
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl FromStr for Version {
    type Err = ParseVersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.major)?;
        if let Some(minor) = self.minor {
            write!(f, ".{minor}")?;
            if let Some(patch) = self.patch {
                write!(f, ".{patch}")?;
            }
        }
        if let Some(suffix) = &self.suffix {
            write!(f, "-{suffix}")?;
        }
        Ok(())
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    #[test]
    fn test_parse_components() {
        let version = v("12.3.1-rc1");
        assert_eq!(version.major, 12);
        assert_eq!(version.minor, Some(3));
        assert_eq!(version.patch, Some(1));
        assert_eq!(version.suffix.as_deref(), Some("rc1"));
        assert_eq!(version.to_string(), "12.3.1-rc1");

        let version = v("7");
        assert_eq!(version.minor, None);
        assert_eq!(version.to_string(), "7");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(Version::parse("").is_err());
        assert!(Version::parse("latest").is_err());
        assert!(Version::parse("1.2.3.4").is_err());
        assert!(Version::parse("1.2-rc.1").is_err());
    }

    #[test]
    fn test_total_order() {
        assert!(v("12.3") > v("12"));
        assert!(v("12.3.0") > v("12.3.0-rc1"));
        assert!(v("12.10") > v("12.9"));
        assert!(v("13") > v("12.99.99"));
        assert!(v("1.0.0-beta") > v("1.0.0-alpha"));

        let mut versions = vec![v("3"), v("1.2"), v("1.2.0-rc1"), v("1")];
        versions.sort();
        let rendered: Vec<String> = versions.iter().map(ToString::to_string).collect();
        assert_eq!(rendered, vec!["1", "1.2", "1.2.0-rc1", "3"]);
    }

    #[test]
    fn test_prefix_equality() {
        assert!(v("12").prefix_eq(&v("12.3.1")));
        assert!(v("12.3.1").prefix_eq(&v("12")));
        assert!(!v("12.4").prefix_eq(&v("12.3.1")));
        assert!(v("12.3.1").prefix_eq(&v("12.3.1-rc1")));
        assert!(!v("12.3.1-rc2").prefix_eq(&v("12.3.1-rc1")));
    }
}
