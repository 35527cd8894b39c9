//! On-disk image repository fixtures.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use crate::backend::Backend;
use crate::constants::{FILES_DIR, SPECS_FILE, TEMPLATES_DIR};
use crate::resolver::ResolveOptions;
use crate::specification::{DirectorySpecStore, TargetSettings};
use crate::version::SelectionPolicy;

/// Settings used throughout the tests: docker on ubuntu/x86_64, system `local`.
#[must_use]
pub fn test_settings() -> TargetSettings {
    TargetSettings {
        backend: Backend::Docker,
        distro: "ubuntu".to_string(),
        system: "local".to_string(),
        arch: "x86_64".to_string(),
    }
}

/// Resolve options with [`test_settings`], no constraints and no arguments.
#[must_use]
pub fn test_options(build_dir: &Path) -> ResolveOptions {
    ResolveOptions {
        settings: test_settings(),
        build_dir: build_dir.to_path_buf(),
        policy: SelectionPolicy::Highest,
        constraints: Vec::new(),
        arguments: Vec::new(),
    }
}

/// A temporary directory holding `images/` (one image root) and `build/`.
///
/// Dropping the fixture removes everything.
pub struct ImageRepoFixture {
    temp: TempDir,
}

impl ImageRepoFixture {
    /// Create an empty repository.
    ///
    /// # Errors
    ///
    /// Returns an error if the temporary directory cannot be created.
    pub fn new() -> Result<Self> {
        let temp = TempDir::new().context("Failed to create temp dir")?;
        fs::create_dir_all(temp.path().join("images"))?;
        fs::create_dir_all(temp.path().join("build"))?;
        Ok(Self {
            temp,
        })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        self.temp.path()
    }

    #[must_use]
    pub fn images_dir(&self) -> PathBuf {
        self.temp.path().join("images")
    }

    #[must_use]
    pub fn build_dir(&self) -> PathBuf {
        self.temp.path().join("build")
    }

    #[must_use]
    pub fn image_dir(&self, name: &str) -> PathBuf {
        self.images_dir().join(name)
    }

    /// Add an image with its `specs.yaml` and `templates/default.vtmp`.
    ///
    /// # Errors
    ///
    /// Returns an error if a file cannot be written.
    pub fn image(self, name: &str, specs_yaml: &str, template: &str) -> Result<Self> {
        let dir = self.image_dir(name);
        fs::create_dir_all(dir.join(TEMPLATES_DIR))
            .with_context(|| format!("Failed to create {}", dir.display()))?;
        fs::write(dir.join(SPECS_FILE), specs_yaml)?;
        fs::write(dir.join(TEMPLATES_DIR).join("default.vtmp"), template)?;
        Ok(self)
    }

    /// Add a file under the image's `files/` directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn file(self, image: &str, relative: &str, contents: &str) -> Result<Self> {
        let path = self.image_dir(image).join(FILES_DIR).join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, contents).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(self)
    }

    /// A store over this repository's single image root.
    #[must_use]
    pub fn store(&self) -> DirectorySpecStore {
        DirectorySpecStore::new([self.images_dir()])
    }
}
