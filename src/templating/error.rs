//! Template error locations and variable suggestions.
//!
//! Parse and render errors are raised with a line number only; the build pipeline
//! attaches the image and template path once it knows which chain node failed
//! (see [`VelocityError::at_template`]).

use std::fmt;
use std::path::{Path, PathBuf};

use strsim::levenshtein;

use crate::core::VelocityError;

/// Maximum allowed Levenshtein distance as a percentage of target length for suggestions.
const SIMILARITY_THRESHOLD_PERCENT: usize = 50;

/// Where in which template an error occurred.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateLocation {
    /// Image (build chain node) whose template failed
    pub image: Option<String>,
    /// Template file path
    pub template: Option<PathBuf>,
    /// 1-based line number
    pub line: usize,
}

impl TemplateLocation {
    /// A location known only by line.
    #[must_use]
    pub const fn line(line: usize) -> Self {
        Self {
            image: None,
            template: None,
            line,
        }
    }
}

impl fmt::Display for TemplateLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.image, &self.template) {
            (Some(image), Some(template)) => {
                write!(f, "{}:{} (image '{image}')", template.display(), self.line)
            }
            (None, Some(template)) => write!(f, "{}:{}", template.display(), self.line),
            (Some(image), None) => write!(f, "line {} of image '{image}'", self.line),
            (None, None) => write!(f, "line {}", self.line),
        }
    }
}

impl VelocityError {
    /// Attach the image and template path to a template error.
    ///
    /// Errors that carry no [`TemplateLocation`] are returned unchanged.
    #[must_use]
    pub fn at_template(mut self, image: &str, template: &Path) -> Self {
        if let Self::UnknownDirective {
            location,
            ..
        }
        | Self::UnbalancedSection {
            location,
            ..
        }
        | Self::TemplateSyntax {
            location,
            ..
        }
        | Self::UndefinedVariable {
            location,
            ..
        } = &mut self
        {
            location.image = Some(image.to_string());
            location.template = Some(template.to_path_buf());
        }
        self
    }

    /// Template location of a parse or render error.
    #[must_use]
    pub const fn template_location(&self) -> Option<&TemplateLocation> {
        match self {
            Self::UnknownDirective {
                location,
                ..
            }
            | Self::UnbalancedSection {
                location,
                ..
            }
            | Self::TemplateSyntax {
                location,
                ..
            }
            | Self::UndefinedVariable {
                location,
                ..
            } => Some(location),
            _ => None,
        }
    }
}

/// Up to three defined names close to `target`, closest first.
pub(crate) fn find_similar_variables<'a, I>(target: &str, available: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut scored: Vec<(&str, usize)> =
        available.into_iter().map(|var| (var, levenshtein(target, var))).collect();

    // Stable sort keeps the store's name order among equal distances
    scored.sort_by_key(|(_, dist)| *dist);

    scored
        .into_iter()
        .filter(|(_, dist)| *dist <= target.len() * SIMILARITY_THRESHOLD_PERCENT / 100)
        .take(3)
        .map(|(var, _)| var.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_display() {
        assert_eq!(TemplateLocation::line(3).to_string(), "line 3");

        let error = VelocityError::TemplateSyntax {
            location: TemplateLocation::line(7),
            reason: "bad".to_string(),
        }
        .at_template("gcc", Path::new("/images/gcc/templates/default.vtmp"));

        let location = error.template_location().unwrap();
        assert_eq!(location.image.as_deref(), Some("gcc"));
        assert_eq!(
            location.to_string(),
            "/images/gcc/templates/default.vtmp:7 (image 'gcc')"
        );
    }

    #[test]
    fn test_at_template_ignores_other_errors() {
        let error = VelocityError::ImageNotFound {
            name: "gcc".to_string(),
        }
        .at_template("gcc", Path::new("x.vtmp"));
        assert!(error.template_location().is_none());
    }

    #[test]
    fn test_find_similar_variables() {
        let available = ["PREFIX", "VERSION", "__name__", "PREFIXES"];
        let suggestions = find_similar_variables("PREFX", available);
        assert_eq!(suggestions, vec!["PREFIX".to_string()]);

        let suggestions = find_similar_variables("PREFIXS", available);
        assert_eq!(suggestions, vec!["PREFIX".to_string(), "PREFIXES".to_string()]);

        assert!(find_similar_variables("COMPLETELY_DIFFERENT", available).is_empty());
    }
}
