//! Configuration management for Velocity
//!
//! Settings come from four layers, later layers winning:
//!
//! 1. Built-in defaults
//! 2. `config.yaml` in the config directory (`VELOCITY_CONFIG_DIR`, default `~/.velocity`)
//! 3. `VELOCITY_*` environment variables
//! 4. Command-line flags
//!
//! The root image's `config:` block sits between layers 2 and 3: it fills in target
//! settings the user did not choose through the environment or a flag.
//!
//! # Configuration file
//!
//! ```yaml
//! backend: podman
//! distro: rockylinux
//! system: frontier
//! arch: x86_64
//! image_path: ["~/images", "/shared/velocity/images"]   # or "a:b"
//! build_dir: /scratch/$USER/velocity
//! selection_policy: highest                            # or most-recently-declared
//! logging:
//!   level: info
//! constraints:
//!   variables:
//!     - { name: CUDA_ARCH, value: "90", when: "system=frontier" }
//!   arguments:
//!     - { name: MAKE_JOBS, value: 16 }
//! ```
//!
//! A missing file is not an error. `~` and `$VAR` are expanded in paths.
//!
//! # Environment
//!
//! Lookups go through an injected function ([`VelocityConfig::load_with`]) so tests never
//! touch the process environment.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::backend::Backend;
use crate::constants::{CONFIG_FILE, env};
use crate::core::VelocityError;
use crate::resolver::{ConstraintKind, GlobalConstraint, ResolveOptions};
use crate::specification::{SpecConfig, TargetSettings};
use crate::version::SelectionPolicy;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PathList {
    Joined(String),
    List(Vec<String>),
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct LoggingSection {
    #[serde(default)]
    level: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConstraintEntry {
    name: String,
    value: serde_yaml::Value,
    #[serde(default)]
    when: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConstraintsSection {
    #[serde(default)]
    variables: Vec<ConstraintEntry>,
    #[serde(default)]
    arguments: Vec<ConstraintEntry>,
}

/// Contents of `config.yaml`.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    #[serde(default)]
    backend: Option<String>,
    #[serde(default)]
    distro: Option<String>,
    #[serde(default)]
    system: Option<String>,
    #[serde(default)]
    arch: Option<String>,
    #[serde(default)]
    image_path: Option<PathList>,
    #[serde(default)]
    build_dir: Option<String>,
    #[serde(default)]
    selection_policy: Option<String>,
    #[serde(default)]
    logging: LoggingSection,
    #[serde(default)]
    constraints: ConstraintsSection,
}

/// Target settings given on the command line.
#[derive(Debug, Clone, Default)]
pub struct SettingOverrides {
    pub backend: Option<String>,
    pub distro: Option<String>,
    pub system: Option<String>,
    pub arch: Option<String>,
    pub policy: Option<String>,
}

/// Which target settings came from the environment or a flag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Explicit {
    backend: bool,
    distro: bool,
    system: bool,
    arch: bool,
}

/// Fully resolved Velocity configuration.
#[derive(Debug, Clone)]
pub struct VelocityConfig {
    pub backend: Backend,
    pub distro: String,
    pub system: String,
    pub arch: String,
    /// Image roots, searched in order
    pub image_path: Vec<PathBuf>,
    pub build_dir: PathBuf,
    pub config_dir: PathBuf,
    pub logging_level: Option<String>,
    pub selection_policy: SelectionPolicy,
    pub constraints: Vec<GlobalConstraint>,
    explicit: Explicit,
}

impl VelocityConfig {
    /// Load configuration from the process environment and the config file.
    ///
    /// # Errors
    ///
    /// See [`VelocityConfig::load_with`].
    pub fn load() -> Result<Self> {
        Self::load_with(|name| std::env::var(name).ok())
    }

    /// Load configuration, reading environment variables through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be read or parsed, or a
    /// backend, policy or constraint selector is invalid.
    pub fn load_with<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let value = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let expand = |path: &str| expand_path(path, &lookup);

        let config_dir = match value(env::CONFIG_DIR) {
            Some(dir) => expand(&dir),
            None => dirs::home_dir()
                .ok_or_else(|| anyhow::anyhow!("Unable to determine home directory"))?
                .join(".velocity"),
        };
        let file = read_config_file(&config_dir.join(CONFIG_FILE))?;

        let host_arch = std::env::consts::ARCH.to_string();
        let user = value("USER").unwrap_or_else(|| "velocity".to_string());
        let mut config = Self {
            backend: Backend::Apptainer,
            distro: "ubuntu".to_string(),
            system: host_arch.clone(),
            arch: host_arch,
            image_path: vec![config_dir.join("images")],
            build_dir: std::env::temp_dir().join(user).join("velocity"),
            config_dir,
            logging_level: None,
            selection_policy: SelectionPolicy::default(),
            constraints: Vec::new(),
            explicit: Explicit::default(),
        };

        if let Some(backend) = &file.backend {
            config.backend = backend.parse()?;
        }
        if let Some(distro) = file.distro {
            config.distro = distro;
        }
        if let Some(system) = file.system {
            config.system = system;
        }
        if let Some(arch) = file.arch {
            config.arch = arch;
        }
        if let Some(paths) = file.image_path {
            config.image_path = match paths {
                PathList::Joined(joined) => split_path_list(&joined).map(|p| expand(p)).collect(),
                PathList::List(list) => list.iter().map(|p| expand(p)).collect(),
            };
        }
        if let Some(dir) = &file.build_dir {
            config.build_dir = expand(dir);
        }
        if let Some(policy) = &file.selection_policy {
            config.selection_policy = parse_policy(policy)?;
        }
        config.logging_level = file.logging.level;
        config.constraints = global_constraints(file.constraints)?;

        if let Some(backend) = value(env::BACKEND) {
            config.backend = backend.parse()?;
            config.explicit.backend = true;
        }
        if let Some(distro) = value(env::DISTRO) {
            config.distro = distro;
            config.explicit.distro = true;
        }
        if let Some(system) = value(env::SYSTEM) {
            config.system = system;
            config.explicit.system = true;
        }
        if let Some(arch) = value(env::ARCH) {
            config.arch = arch;
            config.explicit.arch = true;
        }
        if let Some(paths) = value(env::IMAGE_PATH) {
            config.image_path = split_path_list(&paths).map(|p| expand(p)).collect();
        }
        if let Some(dir) = value(env::BUILD_DIR) {
            config.build_dir = expand(&dir);
        }
        if let Some(level) = value(env::LOGGING_LEVEL) {
            config.logging_level = Some(level);
        }

        tracing::debug!(
            "Configuration: backend={} distro={} system={} arch={} build_dir={}",
            config.backend,
            config.distro,
            config.system,
            config.arch,
            config.build_dir.display()
        );
        Ok(config)
    }

    /// Apply command-line flags.
    ///
    /// # Errors
    ///
    /// Returns [`VelocityError::BackendNotSupported`] for an unknown backend and
    /// [`VelocityError::ConfigError`] for an unknown policy.
    pub fn apply_overrides(&mut self, overrides: &SettingOverrides) -> Result<(), VelocityError> {
        if let Some(backend) = &overrides.backend {
            self.backend = backend.parse()?;
            self.explicit.backend = true;
        }
        if let Some(distro) = &overrides.distro {
            self.distro.clone_from(distro);
            self.explicit.distro = true;
        }
        if let Some(system) = &overrides.system {
            self.system.clone_from(system);
            self.explicit.system = true;
        }
        if let Some(arch) = &overrides.arch {
            self.arch.clone_from(arch);
            self.explicit.arch = true;
        }
        if let Some(policy) = &overrides.policy {
            self.selection_policy = parse_policy(policy)?;
        }
        Ok(())
    }

    /// Fill settings the user did not choose from an image's `config:` block.
    ///
    /// # Errors
    ///
    /// Returns [`VelocityError::BackendNotSupported`] for an unknown backend name.
    pub fn apply_spec_config(&mut self, spec: &SpecConfig) -> Result<(), VelocityError> {
        if !self.explicit.backend
            && let Some(backend) = &spec.backend
        {
            self.backend = backend.parse()?;
        }
        if !self.explicit.distro
            && let Some(distro) = &spec.distro
        {
            self.distro.clone_from(distro);
        }
        if !self.explicit.system
            && let Some(system) = &spec.system
        {
            self.system.clone_from(system);
        }
        if !self.explicit.arch
            && let Some(arch) = &spec.arch
        {
            self.arch.clone_from(arch);
        }
        Ok(())
    }

    #[must_use]
    pub fn target_settings(&self) -> TargetSettings {
        TargetSettings {
            backend: self.backend,
            distro: self.distro.clone(),
            system: self.system.clone(),
            arch: self.arch.clone(),
        }
    }

    /// Resolver inputs for a build with `arguments` from `--arg`.
    #[must_use]
    pub fn resolve_options(&self, arguments: Vec<(String, String)>) -> ResolveOptions {
        ResolveOptions {
            settings: self.target_settings(),
            build_dir: self.build_dir.clone(),
            policy: self.selection_policy,
            constraints: self.constraints.clone(),
            arguments,
        }
    }
}

fn read_config_file(path: &Path) -> Result<ConfigFile> {
    if !path.exists() {
        tracing::debug!("No config file at {}", path.display());
        return Ok(ConfigFile::default());
    }
    let content =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read config file: {}", path.display()))?;
    if content.trim().is_empty() {
        return Ok(ConfigFile::default());
    }
    serde_yaml::from_str(&content).with_context(|| format!("Failed to parse config file: {}", path.display()))
}

fn split_path_list(joined: &str) -> impl Iterator<Item = &str> {
    joined.split(':').map(str::trim).filter(|p| !p.is_empty())
}

/// Expand `$VAR` through `lookup`, then a leading `~`.
fn expand_path<F>(path: &str, lookup: &F) -> PathBuf
where
    F: Fn(&str) -> Option<String>,
{
    let with_vars = shellexpand::env_with_context_no_errors(path, |name: &str| lookup(name));
    PathBuf::from(shellexpand::tilde(&with_vars).into_owned())
}

fn parse_policy(policy: &str) -> Result<SelectionPolicy, VelocityError> {
    policy.parse().map_err(|message| VelocityError::ConfigError {
        message,
    })
}

fn global_constraints(section: ConstraintsSection) -> Result<Vec<GlobalConstraint>> {
    let entries = section
        .variables
        .into_iter()
        .map(|e| (ConstraintKind::Variable, e))
        .chain(section.arguments.into_iter().map(|e| (ConstraintKind::Argument, e)));

    let mut constraints = Vec::new();
    for (kind, entry) in entries {
        let value = match &entry.value {
            serde_yaml::Value::String(s) => s.clone(),
            serde_yaml::Value::Number(n) => n.to_string(),
            serde_yaml::Value::Bool(b) => b.to_string(),
            other => {
                return Err(VelocityError::ConfigError {
                    message: format!("constraint '{}' must have a scalar value, got {other:?}", entry.name),
                }
                .into());
            }
        };
        let when = entry.when.as_deref().unwrap_or_default().parse().map_err(|e| VelocityError::ConfigError {
            message: format!("constraint '{}': {e}", entry.name),
        })?;
        constraints.push(GlobalConstraint {
            kind,
            name: entry.name,
            value,
            when,
        });
    }
    Ok(constraints)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn load(vars: &[(&str, &str)]) -> Result<VelocityConfig> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect();
        VelocityConfig::load_with(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults_without_config_file() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().display().to_string();
        let config = load(&[(env::CONFIG_DIR, &dir), ("USER", "alice")]).unwrap();

        assert_eq!(config.backend, Backend::Apptainer);
        assert_eq!(config.distro, "ubuntu");
        assert_eq!(config.arch, std::env::consts::ARCH);
        assert_eq!(config.image_path, vec![temp.path().join("images")]);
        assert!(config.build_dir.ends_with("alice/velocity"));
        assert_eq!(config.selection_policy, SelectionPolicy::Highest);
        assert!(config.constraints.is_empty());
    }

    #[test]
    fn test_file_then_environment() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join(CONFIG_FILE),
            r#"
backend: podman
distro: rockylinux
image_path: "$IMAGES/a:/opt/b"
build_dir: ~/scratch
selection_policy: most-recently-declared
logging: { level: info }
constraints:
  variables:
    - { name: CUDA_ARCH, value: 90, when: "system=frontier" }
  arguments:
    - { name: JOBS, value: "8" }
"#,
        )
        .unwrap();
        let dir = temp.path().display().to_string();
        let config = load(&[(env::CONFIG_DIR, &dir), ("IMAGES", "/srv"), (env::DISTRO, "debian")]).unwrap();

        assert_eq!(config.backend, Backend::Podman);
        assert_eq!(config.distro, "debian");
        assert_eq!(config.image_path, vec![PathBuf::from("/srv/a"), PathBuf::from("/opt/b")]);
        assert!(!config.build_dir.starts_with("~"));
        assert_eq!(config.selection_policy, SelectionPolicy::MostRecentlyDeclared);
        assert_eq!(config.logging_level.as_deref(), Some("info"));
        assert_eq!(config.constraints.len(), 2);
        assert_eq!(config.constraints[0].value, "90");
        assert_eq!(config.constraints[1].kind, ConstraintKind::Argument);
    }

    #[test]
    fn test_invalid_config_file() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join(CONFIG_FILE), "backend: [docker\n").unwrap();
        let dir = temp.path().display().to_string();
        assert!(load(&[(env::CONFIG_DIR, &dir)]).is_err());

        std::fs::write(temp.path().join(CONFIG_FILE), "backend: kubernetes\n").unwrap();
        let err = load(&[(env::CONFIG_DIR, &dir)]).unwrap_err();
        assert!(matches!(err.downcast_ref::<VelocityError>(), Some(VelocityError::BackendNotSupported { .. })));
    }

    #[test]
    fn test_spec_config_only_fills_implicit_settings() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().display().to_string();
        let mut config = load(&[(env::CONFIG_DIR, &dir), (env::DISTRO, "debian")]).unwrap();
        config
            .apply_overrides(&SettingOverrides {
                system: Some("frontier".to_string()),
                ..SettingOverrides::default()
            })
            .unwrap();

        let spec = SpecConfig {
            backend: Some("docker".to_string()),
            distro: Some("ubuntu".to_string()),
            system: Some("perlmutter".to_string()),
            arch: None,
            extra: Default::default(),
        };
        config.apply_spec_config(&spec).unwrap();

        assert_eq!(config.backend, Backend::Docker);
        assert_eq!(config.distro, "debian");
        assert_eq!(config.system, "frontier");
    }

    #[test]
    fn test_bad_policy_override() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().display().to_string();
        let mut config = load(&[(env::CONFIG_DIR, &dir)]).unwrap();
        let result = config.apply_overrides(&SettingOverrides {
            policy: Some("random".to_string()),
            ..SettingOverrides::default()
        });
        assert!(matches!(result, Err(VelocityError::ConfigError { .. })));
    }
}
