//! Version constraint parsing and matching.
//!
//! A constraint pairs a [`Comparator`] with a bound [`Version`]. Matching is prefix-aware:
//! the bound only constrains the components it names, so `<=3` admits `3.9` and `=12`
//! admits `12.3.1`.
//!
//! # Constraint Syntax
//!
//! | Written | Meaning |
//! |---------|---------|
//! | `1.2`, `=1.2` | prefix-equal to 1.2 |
//! | `>1`, `>=1` | above (or prefix-equal to) 1 |
//! | `<3`, `<=3` | below (or prefix-equal to) 3 |
//! | `1:3` | `>=1` and `<=3` |
//! | `1:` | `>=1` |
//! | `:3` | `<=3` |
//!
//! Several constraints may be joined with commas (`>=1, <=3`); range and comma
//! expressions parse into a [`ConstraintSet`].

use std::fmt;

use super::{ParseVersionError, Version};

pub mod constraint_set;

pub use constraint_set::{ConstraintSet, SelectionPolicy};

/// Relation between a candidate version and a constraint bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Comparator {
    /// `=`
    Eq,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `<`
    Lt,
    /// `<=`
    Le,
}

impl Comparator {
    const fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Lt => "<",
            Self::Le => "<=",
        }
    }

    /// Whether this comparator bounds candidates from below.
    #[must_use]
    pub const fn is_lower(self) -> bool {
        matches!(self, Self::Eq | Self::Gt | Self::Ge)
    }

    /// Whether this comparator bounds candidates from above.
    #[must_use]
    pub const fn is_upper(self) -> bool {
        matches!(self, Self::Eq | Self::Lt | Self::Le)
    }

    /// Whether the bound itself (and everything prefix-equal to it) is excluded.
    #[must_use]
    pub const fn is_strict(self) -> bool {
        matches!(self, Self::Gt | Self::Lt)
    }
}

/// A single comparison against a bound version.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VersionConstraint {
    /// How candidates relate to the bound
    pub comparator: Comparator,
    /// The bound
    pub version: Version,
}

impl VersionConstraint {
    /// Create a constraint from its parts.
    #[must_use]
    pub const fn new(comparator: Comparator, version: Version) -> Self {
        Self {
            comparator,
            version,
        }
    }

    /// Parse a single comparison such as `>=1.2` or `12`.
    ///
    /// Range expressions (`1:3`) are not single comparisons; use
    /// [`ConstraintSet::parse`] for those.
    ///
    /// # Errors
    ///
    /// Returns [`ParseVersionError`] when the bound is not a valid version.
    pub fn parse(input: &str) -> Result<Self, ParseVersionError> {
        let trimmed = input.trim();
        let (comparator, rest) = if let Some(rest) = trimmed.strip_prefix(">=") {
            (Comparator::Ge, rest)
        } else if let Some(rest) = trimmed.strip_prefix("<=") {
            (Comparator::Le, rest)
        } else if let Some(rest) = trimmed.strip_prefix('>') {
            (Comparator::Gt, rest)
        } else if let Some(rest) = trimmed.strip_prefix('<') {
            (Comparator::Lt, rest)
        } else if let Some(rest) = trimmed.strip_prefix('=') {
            (Comparator::Eq, rest)
        } else {
            (Comparator::Eq, trimmed)
        };

        let version = Version::parse(rest).map_err(|e| ParseVersionError::new(input, e.reason))?;
        Ok(Self::new(comparator, version))
    }

    /// Check whether a candidate version satisfies this constraint.
    #[must_use]
    pub fn matches(&self, candidate: &Version) -> bool {
        let same = candidate.prefix_eq(&self.version);
        match self.comparator {
            Comparator::Eq => same,
            Comparator::Ge => same || candidate > &self.version,
            Comparator::Gt => !same && candidate > &self.version,
            Comparator::Le => same || candidate < &self.version,
            Comparator::Lt => !same && candidate < &self.version,
        }
    }

    /// Whether no version can satisfy both constraints.
    ///
    /// Only a lower bound paired with an upper bound can conflict; two lower (or two
    /// upper) bounds always overlap. `=` is both, so it is checked in both roles.
    #[must_use]
    pub fn excludes(&self, other: &Self) -> bool {
        Self::bounds_cross(self, other) || Self::bounds_cross(other, self)
    }

    fn bounds_cross(lower: &Self, upper: &Self) -> bool {
        if !lower.comparator.is_lower() || !upper.comparator.is_upper() {
            return false;
        }

        if lower.version.prefix_eq(&upper.version) {
            lower.comparator.is_strict() || upper.comparator.is_strict()
        } else {
            upper.version < lower.version
        }
    }
}

impl fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.comparator.symbol(), self.version)
    }
}
