//! `when:` selectors.
//!
//! A selector is a whitespace-separated list of terms that must all hold for the image
//! being evaluated:
//!
//! | Term | Holds when |
//! |------|------------|
//! | `gcc` | the image is `gcc` |
//! | `gcc@13` | the image is `gcc` at a version matching `13` |
//! | `gcc@12:` / `gcc@:13` / `gcc@12:13` | the image is `gcc` inside the range |
//! | `system=X`, `backend=X`, `distro=X`, `arch=X` | the invocation setting equals `X` |
//!
//! A name term naming a different image never holds. The empty selector always holds.

use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::backend::Backend;
use crate::version::{ConstraintSet, ParseVersionError, Version};

/// Invocation settings a selector can test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetSettings {
    pub backend: Backend,
    pub distro: String,
    pub system: String,
    pub arch: String,
}

/// The image a selector is evaluated against.
#[derive(Debug, Clone, Copy)]
pub struct SelectorContext<'a> {
    pub name: &'a str,
    pub version: &'a Version,
    pub settings: &'a TargetSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SettingKey {
    System,
    Backend,
    Distro,
    Arch,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Term {
    Image {
        name: String,
        versions: ConstraintSet,
    },
    Setting {
        key: SettingKey,
        value: String,
    },
}

impl Term {
    fn holds(&self, ctx: &SelectorContext<'_>) -> bool {
        match self {
            Self::Image {
                name,
                versions,
            } => name == ctx.name && versions.satisfies(ctx.version),
            Self::Setting {
                key,
                value,
            } => {
                let actual = match key {
                    SettingKey::System => ctx.settings.system.as_str(),
                    SettingKey::Backend => ctx.settings.backend.name(),
                    SettingKey::Distro => ctx.settings.distro.as_str(),
                    SettingKey::Arch => ctx.settings.arch.as_str(),
                };
                actual == value
            }
        }
    }
}

/// Error returned for a selector term that cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid selector term '{term}': {reason}")]
pub struct SelectorError {
    pub term: String,
    pub reason: String,
}

/// A parsed `when:` condition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selector {
    source: String,
    terms: Vec<Term>,
}

impl Selector {
    /// Selector that always holds.
    #[must_use]
    pub fn always() -> Self {
        Self::default()
    }

    /// Whether every term holds for `ctx`.
    #[must_use]
    pub fn matches(&self, ctx: &SelectorContext<'_>) -> bool {
        self.terms.iter().all(|t| t.holds(ctx))
    }

    #[must_use]
    pub fn is_always(&self) -> bool {
        self.terms.is_empty()
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.source
    }
}

fn parse_term(term: &str) -> Result<Term, SelectorError> {
    let error = |reason: String| SelectorError {
        term: term.to_string(),
        reason,
    };

    if let Some((key, value)) = term.split_once('=') {
        let key = match key {
            "system" => SettingKey::System,
            "backend" => SettingKey::Backend,
            "distro" => SettingKey::Distro,
            "arch" => SettingKey::Arch,
            other => return Err(error(format!("unknown setting '{other}'"))),
        };
        if value.is_empty() {
            return Err(error("missing value".to_string()));
        }
        return Ok(Term::Setting {
            key,
            value: value.to_string(),
        });
    }

    let (name, versions) = match term.split_once('@') {
        Some((name, expr)) => {
            if expr.is_empty() {
                return Err(error("missing version after '@'".to_string()));
            }
            let versions = ConstraintSet::parse(expr).map_err(|e: ParseVersionError| error(e.reason))?;
            (name, versions)
        }
        None => (term, ConstraintSet::new()),
    };

    if !super::is_image_name(name) {
        return Err(error(format!("'{name}' is not a valid image name")));
    }

    Ok(Term::Image {
        name: name.to_string(),
        versions,
    })
}

impl FromStr for Selector {
    type Err = SelectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let terms = s.split_whitespace().map(parse_term).collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            source: s.trim().to_string(),
            terms,
        })
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source)
    }
}

impl Serialize for Selector {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> TargetSettings {
        TargetSettings {
            backend: Backend::Apptainer,
            distro: "ubuntu".to_string(),
            system: "frontier".to_string(),
            arch: "x86_64".to_string(),
        }
    }

    fn holds(selector: &str, name: &str, version: &str) -> bool {
        let selector: Selector = selector.parse().unwrap();
        let version = Version::parse(version).unwrap();
        let settings = settings();
        selector.matches(&SelectorContext {
            name,
            version: &version,
            settings: &settings,
        })
    }

    #[test]
    fn test_empty_selector_always_holds() {
        assert!(holds("", "gcc", "13"));
        assert!(holds("   ", "gcc", "13"));
        assert!(Selector::always().is_always());
    }

    #[test]
    fn test_name_terms() {
        assert!(holds("gcc", "gcc", "13"));
        assert!(!holds("clang", "gcc", "13"));
        assert!(holds("gcc@13", "gcc", "13.2.0"));
        assert!(!holds("gcc@12", "gcc", "13.2.0"));
        assert!(holds("gcc@12:", "gcc", "13"));
        assert!(!holds("gcc@:12", "gcc", "13"));
        assert!(holds("gcc@12:13", "gcc", "13.1"));
        assert!(!holds("gcc@12:13", "gcc", "14"));
    }

    #[test]
    fn test_setting_terms_must_all_hold() {
        assert!(holds("system=frontier distro=ubuntu", "gcc", "13"));
        assert!(!holds("system=frontier distro=rockylinux", "gcc", "13"));
        assert!(holds("backend=apptainer gcc@13:", "gcc", "13"));
        assert!(!holds("arch=aarch64", "gcc", "13"));
    }

    #[test]
    fn test_invalid_terms() {
        assert!("colour=blue".parse::<Selector>().is_err());
        assert!("gcc@".parse::<Selector>().is_err());
        assert!("gcc@abc".parse::<Selector>().is_err());
        assert!("system=".parse::<Selector>().is_err());
    }
}
