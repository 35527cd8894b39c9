//! Lookup of specifications and templates by image name.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::Specification;
use crate::constants::{SPECS_FILE, SPECS_FILE_ALT, TEMPLATE_EXTENSION, TEMPLATES_DIR};
use crate::core::VelocityError;

/// Source of image specifications.
pub trait SpecStore {
    /// Every image name the store knows, sorted.
    fn names(&self) -> Vec<String>;

    /// Load and validate the specification of `name`.
    ///
    /// # Errors
    ///
    /// [`VelocityError::ImageNotFound`] for unknown names, or the parse error of the
    /// specification document.
    fn load(&self, name: &str) -> Result<Specification, VelocityError>;

    /// Path and source of the template `spec` selects.
    ///
    /// # Errors
    ///
    /// [`VelocityError::MalformedSpec`] when the named template does not exist.
    fn template(&self, spec: &Specification) -> Result<(PathBuf, String), VelocityError>;
}

/// Image repositories on disk, searched in order.
///
/// An image present under several roots is taken from the first root listing it.
#[derive(Debug, Clone)]
pub struct DirectorySpecStore {
    roots: Vec<PathBuf>,
}

impl DirectorySpecStore {
    pub fn new(roots: impl IntoIterator<Item = PathBuf>) -> Self {
        Self {
            roots: roots.into_iter().collect(),
        }
    }

    #[must_use]
    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    fn specs_file(dir: &Path) -> Option<PathBuf> {
        [SPECS_FILE, SPECS_FILE_ALT].iter().map(|f| dir.join(f)).find(|p| p.is_file())
    }

    fn image_dir(&self, name: &str) -> Option<(PathBuf, PathBuf)> {
        self.roots.iter().find_map(|root| {
            let dir = root.join(name);
            Self::specs_file(&dir).map(|file| (dir, file))
        })
    }
}

impl SpecStore for DirectorySpecStore {
    fn names(&self) -> Vec<String> {
        let mut found: BTreeMap<String, PathBuf> = BTreeMap::new();

        for root in &self.roots {
            let Ok(entries) = std::fs::read_dir(root) else {
                tracing::debug!("Image root {} is not readable, skipping", root.display());
                continue;
            };
            for entry in entries.flatten() {
                let dir = entry.path();
                if !dir.is_dir() || Self::specs_file(&dir).is_none() {
                    continue;
                }
                let Some(name) = dir.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
                    continue;
                };
                if let Some(first) = found.get(&name) {
                    tracing::info!(
                        "Image '{name}' in {} is shadowed by {}",
                        root.display(),
                        first.display()
                    );
                    continue;
                }
                found.insert(name, root.clone());
            }
        }

        found.into_keys().collect()
    }

    fn load(&self, name: &str) -> Result<Specification, VelocityError> {
        let (dir, file) = self.image_dir(name).ok_or_else(|| VelocityError::ImageNotFound {
            name: name.to_string(),
        })?;
        tracing::debug!("Loading specification {}", file.display());

        let text = std::fs::read_to_string(&file).map_err(|e| VelocityError::MalformedSpec {
            image: name.to_string(),
            reason: format!("failed to read {}: {e}", file.display()),
        })?;
        Specification::from_yaml(name, &text, Some(dir))
    }

    fn template(&self, spec: &Specification) -> Result<(PathBuf, String), VelocityError> {
        let missing = |path: &Path| VelocityError::MalformedSpec {
            image: spec.name.clone(),
            reason: format!("template '{}' not found at {}", spec.template, path.display()),
        };

        let dir = match &spec.path {
            Some(dir) => dir.clone(),
            None => self.image_dir(&spec.name).map(|(dir, _)| dir).ok_or_else(|| VelocityError::ImageNotFound {
                name: spec.name.clone(),
            })?,
        };
        let path = dir.join(TEMPLATES_DIR).join(format!("{}.{TEMPLATE_EXTENSION}", spec.template));
        let source = std::fs::read_to_string(&path).map_err(|_| missing(&path))?;
        Ok((path, source))
    }
}

/// Specifications and templates held in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemorySpecStore {
    specs: BTreeMap<String, String>,
    templates: BTreeMap<(String, String), String>,
}

impl InMemorySpecStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an image with its `specs.yaml` text and default template.
    #[must_use]
    pub fn with_image(mut self, name: &str, specs_yaml: &str, template: &str) -> Self {
        self.insert(name, specs_yaml);
        self.insert_template(name, crate::constants::DEFAULT_TEMPLATE, template);
        self
    }

    pub fn insert(&mut self, name: &str, specs_yaml: &str) {
        self.specs.insert(name.to_string(), specs_yaml.to_string());
    }

    pub fn insert_template(&mut self, image: &str, template: &str, source: &str) {
        self.templates.insert((image.to_string(), template.to_string()), source.to_string());
    }
}

impl SpecStore for InMemorySpecStore {
    fn names(&self) -> Vec<String> {
        self.specs.keys().cloned().collect()
    }

    fn load(&self, name: &str) -> Result<Specification, VelocityError> {
        let text = self.specs.get(name).ok_or_else(|| VelocityError::ImageNotFound {
            name: name.to_string(),
        })?;
        Specification::from_yaml(name, text, None)
    }

    fn template(&self, spec: &Specification) -> Result<(PathBuf, String), VelocityError> {
        let path = PathBuf::from(&spec.name)
            .join(TEMPLATES_DIR)
            .join(format!("{}.{TEMPLATE_EXTENSION}", spec.template));
        self.templates
            .get(&(spec.name.clone(), spec.template.clone()))
            .map(|source| (path.clone(), source.clone()))
            .ok_or_else(|| VelocityError::MalformedSpec {
                image: spec.name.clone(),
                reason: format!("template '{}' not found at {}", spec.template, path.display()),
            })
    }
}
