//! Constraint set implementation for intersecting version constraints.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use super::{Comparator, VersionConstraint};
use crate::version::{ParseVersionError, Version};

/// Two constraints in a set that no version can satisfy together.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{existing} and {incoming} cannot both hold")]
pub struct ConstraintConflict {
    /// Constraint already in the set
    pub existing: VersionConstraint,
    /// Constraint that was being added
    pub incoming: VersionConstraint,
}

/// How to choose among several versions that satisfy the same constraints.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SelectionPolicy {
    /// The highest satisfying version under the version total order
    #[default]
    Highest,
    /// The satisfying version declared last in the specification
    MostRecentlyDeclared,
}

impl std::str::FromStr for SelectionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "highest" => Ok(Self::Highest),
            "most-recently-declared" | "latest-declared" => Ok(Self::MostRecentlyDeclared),
            other => Err(format!(
                "unknown selection policy '{other}' (expected 'highest' or 'most-recently-declared')"
            )),
        }
    }
}

/// A collection of version constraints that must all be satisfied simultaneously.
///
/// `ConstraintSet` is the intersection of every constraint placed on one image, from
/// every path through the dependency graph that reaches it. Adding is order-independent:
/// the same constraints added in any order accept the same versions and detect the same
/// conflicts.
///
/// # Examples
///
/// ```rust,ignore
/// use velocity_cli::version::{ConstraintSet, SelectionPolicy, Version};
///
/// let mut set = ConstraintSet::parse(">=1")?;
/// set.extend(&ConstraintSet::parse("<=3")?)?;
///
/// let versions: Vec<Version> = ["1", "2", "3", "4"].iter().map(|v| v.parse().unwrap()).collect();
/// let best = set.find_best_match(&versions, SelectionPolicy::Highest).unwrap();
/// assert_eq!(best.to_string(), "3");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConstraintSet {
    constraints: Vec<VersionConstraint>,
}

impl ConstraintSet {
    /// Creates a new empty constraint set, which every version satisfies.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            constraints: Vec::new(),
        }
    }

    /// Parse a constraint expression.
    ///
    /// Accepts comma-separated single comparisons and `LOW:HIGH` ranges with either side
    /// optional. An empty expression yields an empty set.
    ///
    /// # Errors
    ///
    /// Returns [`ParseVersionError`] for a malformed bound or a bare `:`. A parsed
    /// expression whose own parts conflict (`>3, <2`) is reported the same way.
    pub fn parse(input: &str) -> Result<Self, ParseVersionError> {
        let mut set = Self::new();

        for part in input.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let parsed = if let Some((low, high)) = part.split_once(':') {
                let (low, high) = (low.trim(), high.trim());
                if low.is_empty() && high.is_empty() {
                    return Err(ParseVersionError::new(input, "range needs at least one bound"));
                }
                let mut range = Vec::new();
                if !low.is_empty() {
                    range.push(VersionConstraint::new(Comparator::Ge, Version::parse(low)?));
                }
                if !high.is_empty() {
                    range.push(VersionConstraint::new(Comparator::Le, Version::parse(high)?));
                }
                range
            } else {
                vec![VersionConstraint::parse(part)?]
            };

            for constraint in parsed {
                set.add(constraint)
                    .map_err(|conflict| ParseVersionError::new(input, conflict.to_string()))?;
            }
        }

        Ok(set)
    }

    /// Add a constraint, narrowing the set.
    ///
    /// Adding a constraint that is already present is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`ConstraintConflict`] naming the first existing constraint that cannot
    /// hold together with the new one. The set is left unchanged.
    pub fn add(&mut self, constraint: VersionConstraint) -> Result<(), ConstraintConflict> {
        if self.constraints.contains(&constraint) {
            return Ok(());
        }

        if let Some(existing) = self.constraints.iter().find(|c| c.excludes(&constraint)) {
            return Err(ConstraintConflict {
                existing: existing.clone(),
                incoming: constraint,
            });
        }

        self.constraints.push(constraint);
        Ok(())
    }

    /// Intersect with another set.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConstraintConflict`] encountered; constraints added before
    /// the conflict remain in the set.
    pub fn extend(&mut self, other: &Self) -> Result<(), ConstraintConflict> {
        for constraint in &other.constraints {
            self.add(constraint.clone())?;
        }
        Ok(())
    }

    /// Check if a version satisfies all constraints in this set.
    #[must_use]
    pub fn satisfies(&self, version: &Version) -> bool {
        self.constraints.iter().all(|c| c.matches(version))
    }

    /// Find the best matching version from the versions an image declares.
    ///
    /// `versions` must be in declaration order for
    /// [`SelectionPolicy::MostRecentlyDeclared`] to be meaningful. Returns `None` when no
    /// version satisfies every constraint.
    #[must_use]
    pub fn find_best_match<'a>(
        &self,
        versions: &'a [Version],
        policy: SelectionPolicy,
    ) -> Option<&'a Version> {
        let mut candidates = versions.iter().filter(|v| self.satisfies(v));
        match policy {
            SelectionPolicy::Highest => candidates.max(),
            SelectionPolicy::MostRecentlyDeclared => candidates.last(),
        }
    }

    /// Whether the set is unconstrained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }

    /// Number of distinct constraints in the set.
    #[must_use]
    pub fn len(&self) -> usize {
        self.constraints.len()
    }

    /// Iterate over the constraints in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &VersionConstraint> {
        self.constraints.iter()
    }
}

impl fmt::Display for ConstraintSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.constraints.is_empty() {
            return write!(f, "*");
        }
        let parts: Vec<String> = self.constraints.iter().map(ToString::to_string).collect();
        write!(f, "{}", parts.join(", "))
    }
}
