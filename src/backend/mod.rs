//! Container backends.
//!
//! A [`Backend`] translates a rendered [`BuildScript`] into its native recipe format and
//! names the commands that build, tag and copy images. Two formats exist:
//!
//! - Apptainer and Singularity: definition files ([`apptainer`])
//! - Docker and Podman: Dockerfiles ([`docker`])
//!
//! Both formats emit the same logical order: header (`@from`, `@arg`), `@pre` content,
//! copies, main body, labels, entrypoint, `@post` content. A script holding only literal
//! text formats to exactly that text.
//!
//! Process execution lives in [`runner`].

pub mod apptainer;
pub mod docker;
pub mod runner;

use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::core::VelocityError;
use crate::templating::BuildScript;

pub use runner::{BackendCommand, CommandOutcome};

/// A supported container build tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Apptainer,
    Singularity,
    Docker,
    Podman,
}

impl Backend {
    /// All backends, in the order `velocity` documents them.
    pub const ALL: [Self; 4] = [Self::Apptainer, Self::Singularity, Self::Docker, Self::Podman];

    /// Configuration name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Apptainer => "apptainer",
            Self::Singularity => "singularity",
            Self::Docker => "docker",
            Self::Podman => "podman",
        }
    }

    /// Executable searched for on `PATH`.
    #[must_use]
    pub const fn executable(self) -> &'static str {
        self.name()
    }

    /// Whether images are files on disk (`.sif`) rather than entries in a local store.
    #[must_use]
    pub const fn produces_files(self) -> bool {
        matches!(self, Self::Apptainer | Self::Singularity)
    }

    /// Whether the backend executable can be found.
    #[must_use]
    pub fn is_available(self) -> bool {
        which::which(self.executable()).is_ok()
    }

    /// Full path of the backend executable.
    ///
    /// # Errors
    ///
    /// Returns [`VelocityError::BackendNotAvailable`] when it is not on `PATH`.
    pub fn locate(self) -> Result<PathBuf, VelocityError> {
        which::which(self.executable()).map_err(|_| VelocityError::BackendNotAvailable {
            executable: self.executable().to_string(),
        })
    }

    /// Translate a rendered script into the backend's recipe format.
    ///
    /// # Errors
    ///
    /// Returns [`VelocityError::TemplateSyntax`] for a base image reference the backend
    /// cannot express, or [`VelocityError::Json`] if the entrypoint cannot be encoded.
    pub fn format(self, script: &BuildScript) -> Result<String, VelocityError> {
        if self.produces_files() {
            apptainer::format(script)
        } else {
            docker::format(script)
        }
    }

    /// Reference by which later chain nodes use an image built under `tag`.
    ///
    /// File-based backends name a `.sif` in `dir`; store-based backends a local tag.
    #[must_use]
    pub fn image_reference(self, dir: &Path, tag: &str) -> String {
        if self.produces_files() {
            let file = if Path::new(tag).extension().is_some_and(|e| e == "sif") {
                tag.to_string()
            } else {
                format!("{tag}.sif")
            };
            dir.join(file).display().to_string()
        } else {
            let mut reference = String::new();
            if !tag.contains('/') {
                reference.push_str("localhost/");
            }
            reference.push_str(tag);
            if !tag.contains(':') {
                reference.push_str(":latest");
            }
            reference
        }
    }

    /// Command that builds `context_dir/script` into `image`.
    #[must_use]
    pub fn build_command(self, context_dir: &Path, script: &Path, image: &str, arguments: &[(String, String)]) -> BackendCommand {
        let mut command = BackendCommand::new(self.executable()).arg("build").current_dir(context_dir);
        for (name, value) in arguments {
            command = command.arg("--build-arg").arg(format!("{name}={value}"));
        }

        if self.produces_files() {
            command.arg(image).arg(script.display().to_string())
        } else {
            command
                .arg("-f")
                .arg(script.display().to_string())
                .arg("-t")
                .arg(image)
                .arg(context_dir.display().to_string())
        }
    }

    /// Command that publishes the last chain image under its final name.
    ///
    /// `None` for file-based backends, which copy the `.sif` instead.
    #[must_use]
    pub fn tag_command(self, source: &str, destination: &str) -> Option<BackendCommand> {
        if self.produces_files() {
            None
        } else {
            Some(BackendCommand::new(self.executable()).arg("tag").arg(source).arg(destination))
        }
    }
}

impl FromStr for Backend {
    type Err = VelocityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|b| b.name() == wanted).ok_or_else(|| VelocityError::BackendNotSupported {
            name: s.to_string(),
        })
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Append a generated line, starting a new line first if the output does not end in one.
pub(crate) fn push_line(out: &mut String, line: &str) {
    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
    out.push_str(line);
    out.push('\n');
}
