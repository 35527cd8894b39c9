//! Image specifications (`specs.yaml`).
//!
//! Every image lives in its own directory under an image root:
//!
//! ```text
//! <image_root>/gcc/
//! ├── specs.yaml        # versions, dependencies, arguments, variables, prolog
//! ├── templates/
//! │   └── default.vtmp  # VTMP build template
//! └── files/            # @copy sources and `files:` entries
//! ```
//!
//! A [`Specification`] is parsed once per invocation and never changes afterwards.
//! Structural problems are reported as [`VelocityError::MalformedSpec`] before any
//! resolution starts.
//!
//! # File format
//!
//! ```yaml
//! versions:
//!   - spec: ["12.3.0", "13.2.0"]
//!   - spec: "14.1.0"
//!     when: "distro=rockylinux"
//! dependencies:
//!   - "cmake@>=3.20"
//!   - name: ubuntu
//!     version: ">=20.04"
//!     when: "distro=ubuntu"
//! arguments:
//!   BUILD_TYPE: release
//!   TOKEN: { required: true }
//! variables:
//!   SRC_URL: https://example.org/gcc.tgz
//! prolog: |
//!   echo "GIT_HASH=$(git rev-parse HEAD)"
//! files: [patches]
//! template: default
//! config: { backend: podman, distro: ubuntu }
//! ```
//!
//! `arguments`, `variables` and `files` may also be written as lists whose entries carry a
//! `when` selector, and `templates:` / `prologs:` list guarded alternatives to `template`
//! and `prolog`. Guarded entries only take effect for the versions and settings their
//! selector matches:
//!
//! ```yaml
//! variables:
//!   - { name: PKG, value: apt }
//!   - { name: PKG, value: dnf, when: "distro=rockylinux" }
//! files:
//!   - patches
//!   - { name: rhel-repos, when: "distro=rockylinux" }
//! templates:
//!   - { name: legacy, when: "gcc@:12" }
//! prologs:
//!   - { script: "echo ARCH_FLAGS=-march=armv8-a", when: "arch=aarch64" }
//! ```
//!
//! Unquoted YAML numbers are accepted wherever a string is expected. Quote versions such
//! as `"12.10"`, which YAML would otherwise read as the float `12.1`.

pub mod selector;
pub mod store;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;

use crate::constants::DEFAULT_TEMPLATE;
use crate::core::VelocityError;
use crate::templating::parser::is_identifier;
use crate::variables::is_reserved;
use crate::version::{ConstraintSet, Version};

pub use selector::{Selector, SelectorContext, SelectorError, TargetSettings};
pub use store::{DirectorySpecStore, InMemorySpecStore, SpecStore};

static IMAGE_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*$").unwrap_or_else(|_| unreachable!("image name pattern is a valid regex"))
});

/// Whether `name` can name an image directory.
#[must_use]
pub fn is_image_name(name: &str) -> bool {
    IMAGE_NAME_RE.is_match(name)
}

/// A YAML scalar read as text.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Scalar {
    Text(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => write!(f, "{s}"),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Bool(b) => write!(f, "{b}"),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            Self::One(item) => vec![item],
            Self::Many(items) => items,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawVersionEntry {
    spec: OneOrMany<Scalar>,
    #[serde(default)]
    when: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawDependencyEntry {
    name: String,
    #[serde(default)]
    version: Option<Scalar>,
    #[serde(default)]
    when: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawDependency {
    Inline(String),
    Detailed(RawDependencyEntry),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawArgumentEntry {
    #[serde(default)]
    default: Option<Scalar>,
    #[serde(default)]
    required: bool,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawArgument {
    Default(Scalar),
    Detailed(RawArgumentEntry),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawArgumentListEntry {
    name: String,
    #[serde(default, alias = "value")]
    default: Option<Scalar>,
    #[serde(default)]
    required: bool,
    #[serde(default)]
    when: Option<String>,
}

/// `arguments:` as a `NAME: default` mapping or a list of (possibly guarded) entries.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawArguments {
    Map(BTreeMap<String, Option<RawArgument>>),
    List(Vec<RawArgumentListEntry>),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawVariableEntry {
    name: String,
    value: Scalar,
    #[serde(default)]
    when: Option<String>,
}

/// `variables:` as a `NAME: value` mapping or a list of (possibly guarded) entries.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawVariables {
    Map(BTreeMap<String, Scalar>),
    List(Vec<RawVariableEntry>),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawNamedEntry {
    name: String,
    #[serde(default)]
    when: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawFile {
    Path(String),
    Detailed(RawNamedEntry),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawPrologEntry {
    script: String,
    #[serde(default)]
    when: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawSpecification {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    versions: Vec<RawVersionEntry>,
    #[serde(default)]
    dependencies: Vec<RawDependency>,
    #[serde(default)]
    arguments: Option<RawArguments>,
    #[serde(default)]
    variables: Option<RawVariables>,
    #[serde(default)]
    prolog: Option<String>,
    #[serde(default)]
    prologs: Vec<RawPrologEntry>,
    #[serde(default)]
    files: Vec<RawFile>,
    #[serde(default)]
    template: Option<String>,
    #[serde(default)]
    templates: Vec<RawNamedEntry>,
    #[serde(default)]
    config: BTreeMap<String, Scalar>,
}

/// A concrete version an image offers, optionally only under a selector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionEntry {
    pub version: Version,
    pub when: Selector,
}

/// A dependency on another image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencySpec {
    pub name: String,
    pub constraint: ConstraintSet,
    /// Condition on the depending image under which the dependency applies
    pub when: Selector,
}

impl fmt::Display for DependencySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.constraint.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}@{}", self.name, self.constraint)
        }
    }
}

/// A declared build argument.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ArgumentSpec {
    pub default: Option<String>,
    pub required: bool,
}

/// Something a `specs.yaml` entry contributes when its `when` selector holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConditionalItem {
    Argument {
        name: String,
        declared: ArgumentSpec,
    },
    Variable {
        name: String,
        value: String,
    },
    File(String),
    Template(String),
    Prolog(String),
}

/// A guarded `specs.yaml` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionalEntry {
    pub when: Selector,
    pub item: ConditionalItem,
}

/// Invocation settings an image suggests for itself.
///
/// Only consulted for the root image of a build, and only for settings the user did not
/// choose explicitly.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SpecConfig {
    pub backend: Option<String>,
    pub distro: Option<String>,
    pub system: Option<String>,
    pub arch: Option<String>,
    /// Keys Velocity does not interpret
    pub extra: BTreeMap<String, String>,
}

/// A parsed and validated image specification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Specification {
    pub name: String,
    /// Declared versions, in file order
    pub versions: Vec<VersionEntry>,
    pub dependencies: Vec<DependencySpec>,
    pub arguments: BTreeMap<String, ArgumentSpec>,
    pub variables: BTreeMap<String, String>,
    pub prolog: Option<String>,
    /// Entries under `files/` staged into every build context of this image
    pub files: Vec<String>,
    /// Template name, without directory or extension
    pub template: String,
    pub config: SpecConfig,
    /// Guarded entries, in file order; see [`Specification::specialize`]
    pub conditionals: Vec<ConditionalEntry>,
    /// Image directory, when loaded from disk
    pub path: Option<PathBuf>,
}

impl Specification {
    /// Parse and validate a specification document for image `name`.
    ///
    /// # Errors
    ///
    /// Returns [`VelocityError::MalformedSpec`] for YAML that does not match the schema,
    /// unknown keys, duplicate dependencies, non-alphanumeric or reserved identifiers,
    /// unparseable versions, constraints or selectors, and a `name` key that disagrees
    /// with the image directory.
    pub fn from_yaml(name: &str, text: &str, path: Option<PathBuf>) -> Result<Self, VelocityError> {
        let malformed = |reason: String| VelocityError::MalformedSpec {
            image: name.to_string(),
            reason,
        };

        if !is_image_name(name) {
            return Err(malformed(format!("'{name}' is not a valid image name")));
        }

        let raw: RawSpecification = if text.trim().is_empty() {
            RawSpecification::default()
        } else {
            serde_yaml::from_str(text).map_err(|e| malformed(e.to_string()))?
        };

        if let Some(declared) = &raw.name
            && declared != name
        {
            return Err(malformed(format!("name '{declared}' does not match image directory '{name}'")));
        }

        let selector = |text: Option<String>| -> Result<Selector, VelocityError> {
            text.as_deref().unwrap_or_default().parse().map_err(|e: SelectorError| malformed(e.to_string()))
        };

        let mut versions: Vec<VersionEntry> = Vec::new();
        for entry in raw.versions {
            let when = selector(entry.when)?;
            for spec in entry.spec.into_vec() {
                let version = Version::parse(&spec.to_string()).map_err(|e| malformed(e.to_string()))?;
                if versions.iter().any(|v| v.version == version && v.when == when) {
                    return Err(malformed(format!("version {version} declared twice")));
                }
                versions.push(VersionEntry {
                    version,
                    when: when.clone(),
                });
            }
        }

        let mut dependencies: Vec<DependencySpec> = Vec::new();
        for dependency in raw.dependencies {
            let (dep_name, constraint, when) = match dependency {
                RawDependency::Inline(text) => match text.split_once('@') {
                    Some((dep, expr)) => (dep.trim().to_string(), Some(expr.to_string()), None),
                    None => (text.trim().to_string(), None, None),
                },
                RawDependency::Detailed(entry) => {
                    let (dep, inline) = match entry.name.split_once('@') {
                        Some((dep, expr)) => (dep.trim().to_string(), Some(expr.to_string())),
                        None => (entry.name.trim().to_string(), None),
                    };
                    let explicit = entry.version.map(|v| v.to_string());
                    if inline.is_some() && explicit.is_some() {
                        return Err(malformed(format!("dependency '{dep}' gives its version twice")));
                    }
                    (dep, inline.or(explicit), entry.when)
                }
            };

            if !is_image_name(&dep_name) {
                return Err(malformed(format!("dependency '{dep_name}' is not a valid image name")));
            }
            if dependencies.iter().any(|d| d.name == dep_name) {
                return Err(malformed(format!("dependency '{dep_name}' declared twice")));
            }
            let constraint = ConstraintSet::parse(constraint.as_deref().unwrap_or_default())
                .map_err(|e| malformed(format!("dependency '{dep_name}': {e}")))?;

            dependencies.push(DependencySpec {
                name: dep_name,
                constraint,
                when: selector(when)?,
            });
        }

        let check_identifier = |kind: &str, ident: &str| -> Result<(), VelocityError> {
            if !is_identifier(ident) {
                return Err(malformed(format!("{kind} name '{ident}' must be alphanumeric")));
            }
            if is_reserved(ident) {
                return Err(malformed(format!("{kind} name '{ident}' is reserved for built-in variables")));
            }
            Ok(())
        };

        let check_file = |file: &str| -> Result<(), VelocityError> {
            let relative = std::path::Path::new(file);
            if file.is_empty()
                || relative.is_absolute()
                || relative.components().any(|c| matches!(c, std::path::Component::ParentDir))
            {
                return Err(malformed(format!("file entry '{file}' must be a relative path inside files/")));
            }
            Ok(())
        };
        let check_template = |template: &str| -> Result<(), VelocityError> {
            if is_image_name(template) {
                Ok(())
            } else {
                Err(malformed(format!("template name '{template}' is not a plain file name")))
            }
        };

        let mut conditionals: Vec<ConditionalEntry> = Vec::new();
        let mut add = |when: Option<String>, item: ConditionalItem| -> Result<Option<ConditionalItem>, VelocityError> {
            let when = selector(when)?;
            if when.is_always() {
                return Ok(Some(item));
            }
            conditionals.push(ConditionalEntry {
                when,
                item,
            });
            Ok(None)
        };

        let mut arguments = BTreeMap::new();
        match raw.arguments {
            None => {}
            Some(RawArguments::Map(map)) => {
                for (arg_name, raw_arg) in map {
                    check_identifier("argument", &arg_name)?;
                    let spec = match raw_arg {
                        None => ArgumentSpec::default(),
                        Some(RawArgument::Default(value)) => ArgumentSpec {
                            default: Some(value.to_string()),
                            required: false,
                        },
                        Some(RawArgument::Detailed(entry)) => ArgumentSpec {
                            default: entry.default.map(|v| v.to_string()),
                            required: entry.required,
                        },
                    };
                    arguments.insert(arg_name, spec);
                }
            }
            Some(RawArguments::List(entries)) => {
                for entry in entries {
                    check_identifier("argument", &entry.name)?;
                    let item = ConditionalItem::Argument {
                        name: entry.name,
                        declared: ArgumentSpec {
                            default: entry.default.map(|v| v.to_string()),
                            required: entry.required,
                        },
                    };
                    if let Some(ConditionalItem::Argument {
                        name,
                        declared,
                    }) = add(entry.when, item)?
                    {
                        arguments.insert(name, declared);
                    }
                }
            }
        }

        let mut variables = BTreeMap::new();
        match raw.variables {
            None => {}
            Some(RawVariables::Map(map)) => {
                for (var_name, value) in map {
                    check_identifier("variable", &var_name)?;
                    variables.insert(var_name, value.to_string());
                }
            }
            Some(RawVariables::List(entries)) => {
                for entry in entries {
                    check_identifier("variable", &entry.name)?;
                    let item = ConditionalItem::Variable {
                        name: entry.name,
                        value: entry.value.to_string(),
                    };
                    if let Some(ConditionalItem::Variable {
                        name,
                        value,
                    }) = add(entry.when, item)?
                    {
                        variables.insert(name, value);
                    }
                }
            }
        }

        let mut files: Vec<String> = Vec::new();
        for file in raw.files {
            let (file, when) = match file {
                RawFile::Path(path) => (path, None),
                RawFile::Detailed(entry) => (entry.name, entry.when),
            };
            check_file(&file)?;
            if let Some(ConditionalItem::File(file)) = add(when, ConditionalItem::File(file))? {
                if files.contains(&file) {
                    return Err(malformed(format!("file entry '{file}' listed twice")));
                }
                files.push(file);
            }
        }

        let mut template = raw.template.unwrap_or_else(|| DEFAULT_TEMPLATE.to_string());
        check_template(&template)?;
        for entry in raw.templates {
            check_template(&entry.name)?;
            if let Some(ConditionalItem::Template(name)) = add(entry.when, ConditionalItem::Template(entry.name))? {
                template = name;
            }
        }

        let mut prolog = raw.prolog.filter(|p| !p.trim().is_empty());
        for entry in raw.prologs {
            if let Some(ConditionalItem::Prolog(script)) = add(entry.when, ConditionalItem::Prolog(entry.script))? {
                prolog = Some(script);
            }
        }

        let mut config = SpecConfig::default();
        for (key, value) in raw.config {
            let value = value.to_string();
            match key.as_str() {
                "backend" => config.backend = Some(value),
                "distro" => config.distro = Some(value),
                "system" => config.system = Some(value),
                "arch" => config.arch = Some(value),
                _ => {
                    tracing::info!("image '{name}': ignoring unknown config key '{key}'");
                    config.extra.insert(key, value);
                }
            }
        }

        Ok(Self {
            name: name.to_string(),
            versions,
            dependencies,
            arguments,
            variables,
            prolog: prolog.filter(|p| !p.trim().is_empty()),
            files,
            template,
            config,
            conditionals,
            path,
        })
    }

    /// This image at `version` under `settings`: every guarded entry whose selector holds
    /// is folded into the plain fields, in file order.
    ///
    /// A matching guarded entry overrides an unguarded one of the same name; among
    /// matching entries the last one wins. Guarded files are added to the unguarded ones.
    #[must_use]
    pub fn specialize(&self, version: &Version, settings: &TargetSettings) -> Self {
        let ctx = SelectorContext {
            name: &self.name,
            version,
            settings,
        };
        let mut specialized = self.clone();
        specialized.conditionals.clear();

        for entry in self.conditionals.iter().filter(|e| e.when.matches(&ctx)) {
            tracing::trace!("{}@{version}: applying entry guarded by '{}'", self.name, entry.when.as_str());
            match &entry.item {
                ConditionalItem::Argument {
                    name,
                    declared,
                } => {
                    specialized.arguments.insert(name.clone(), declared.clone());
                }
                ConditionalItem::Variable {
                    name,
                    value,
                } => {
                    specialized.variables.insert(name.clone(), value.clone());
                }
                ConditionalItem::File(file) => {
                    if !specialized.files.contains(file) {
                        specialized.files.push(file.clone());
                    }
                }
                ConditionalItem::Template(template) => specialized.template = template.clone(),
                ConditionalItem::Prolog(script) => {
                    specialized.prolog = Some(script.clone()).filter(|p| !p.trim().is_empty());
                }
            }
        }
        specialized
    }

    /// Versions offered under `settings`, in declaration order.
    ///
    /// Each entry's `when` is evaluated against this image at that version.
    #[must_use]
    pub fn available_versions(&self, settings: &TargetSettings) -> Vec<Version> {
        let mut available: Vec<Version> = Vec::new();
        for entry in &self.versions {
            let ctx = SelectorContext {
                name: &self.name,
                version: &entry.version,
                settings,
            };
            if entry.when.matches(&ctx) && !available.contains(&entry.version) {
                available.push(entry.version.clone());
            }
        }
        available
    }

    /// Dependencies that apply to this image at `version` under `settings`.
    pub fn active_dependencies<'a>(
        &'a self,
        version: &'a Version,
        settings: &'a TargetSettings,
    ) -> impl Iterator<Item = &'a DependencySpec> + 'a {
        let ctx = SelectorContext {
            name: &self.name,
            version,
            settings,
        };
        self.dependencies.iter().filter(move |d| d.when.matches(&ctx))
    }

    /// Every declared version regardless of selectors, sorted and deduplicated.
    #[must_use]
    pub fn all_versions(&self) -> Vec<Version> {
        let mut all: Vec<Version> = self.versions.iter().map(|v| v.version.clone()).collect();
        all.sort();
        all.dedup();
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Backend;

    fn settings(distro: &str) -> TargetSettings {
        TargetSettings {
            backend: Backend::Docker,
            distro: distro.to_string(),
            system: "local".to_string(),
            arch: "x86_64".to_string(),
        }
    }

    const GCC: &str = r#"
versions:
  - spec: ["12.3.0", "13.2.0"]
  - spec: 14.1
    when: "distro=rockylinux"
dependencies:
  - "cmake@>=3.20"
  - name: ubuntu
    version: 22.04
    when: "distro=ubuntu gcc@:13"
arguments:
  BUILD_TYPE: release
  TOKEN: { required: true }
  JOBS:
variables:
  SRC_URL: https://example.org/gcc.tgz
  RETRIES: 3
prolog: |
  echo "GIT_HASH=abc"
files: [patches]
config:
  backend: podman
  registry: example.org
"#;

    #[test]
    fn test_parse_full_specification() {
        let spec = Specification::from_yaml("gcc", GCC, None).unwrap();

        assert_eq!(spec.versions.len(), 3);
        assert_eq!(spec.dependencies.len(), 2);
        assert_eq!(spec.dependencies[0].to_string(), "cmake@>=3.20");
        assert!(spec.dependencies[1].constraint.satisfies(&Version::parse("22.04.3").unwrap()));
        assert_eq!(spec.arguments["BUILD_TYPE"].default.as_deref(), Some("release"));
        assert!(spec.arguments["TOKEN"].required);
        assert_eq!(spec.arguments["JOBS"], ArgumentSpec::default());
        assert_eq!(spec.variables["RETRIES"], "3");
        assert_eq!(spec.template, "default");
        assert_eq!(spec.config.backend.as_deref(), Some("podman"));
        assert_eq!(spec.config.extra["registry"], "example.org");
    }

    #[test]
    fn test_available_versions_respect_selectors() {
        let spec = Specification::from_yaml("gcc", GCC, None).unwrap();

        let ubuntu: Vec<String> = spec.available_versions(&settings("ubuntu")).iter().map(ToString::to_string).collect();
        assert_eq!(ubuntu, vec!["12.3.0", "13.2.0"]);

        let rocky = spec.available_versions(&settings("rockylinux"));
        assert_eq!(rocky.len(), 3);
    }

    #[test]
    fn test_active_dependencies_follow_version_and_settings() {
        let spec = Specification::from_yaml("gcc", GCC, None).unwrap();
        let settings = settings("ubuntu");

        let v13 = Version::parse("13.2.0").unwrap();
        let names: Vec<&str> = spec.active_dependencies(&v13, &settings).map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["cmake", "ubuntu"]);

        let v14 = Version::parse("14.1").unwrap();
        let names: Vec<&str> = spec.active_dependencies(&v14, &settings).map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["cmake"]);
    }

    #[test]
    fn test_empty_document_is_valid() {
        let spec = Specification::from_yaml("empty", "", None).unwrap();
        assert!(spec.versions.is_empty());
        assert!(spec.dependencies.is_empty());
    }

    #[test]
    fn test_structural_violations_are_malformed() {
        let cases = [
            ("dependencies: [a, a]", "declared twice"),
            ("arguments: { BAD-NAME: x }", "alphanumeric"),
            ("variables: { __name__: x }", "reserved"),
            ("versions: [{ spec: banana }]", "invalid version"),
            ("dependencies: ['a@>>1']", "dependency 'a'"),
            ("dependencies: [{ name: a, when: 'colour=red' }]", "selector"),
            ("unknown_key: 1", "unknown field"),
            ("name: other", "does not match"),
            ("files: ['../etc']", "relative path"),
            ("dependencies: [{ name: 'a@1', version: 2 }]", "twice"),
            ("variables: [{ name: X, value: 1, when: 'colour=red' }]", "selector"),
            ("templates: [{ name: '../t', when: distro=ubuntu }]", "plain file name"),
            ("files: [{ name: '/abs', when: distro=ubuntu }]", "relative path"),
            ("arguments: [{ name: __base__ }]", "reserved"),
        ];

        for (yaml, expected) in cases {
            let err = Specification::from_yaml("img", yaml, None).unwrap_err();
            let VelocityError::MalformedSpec {
                reason,
                ..
            } = &err
            else {
                panic!("expected MalformedSpec for {yaml}, got {err:?}");
            };
            assert!(reason.contains(expected), "{yaml}: {reason}");
        }
    }

    const GUARDED: &str = r#"
versions:
  - spec: ["1.0", "2.0"]
arguments:
  - name: JOBS
    default: 4
  - name: CUDA
    required: true
    when: "distro=rockylinux"
variables:
  - name: PKG
    value: apt
  - name: PKG
    value: dnf
    when: "distro=rockylinux"
  - name: LEGACY
    value: "yes"
    when: "app@:1"
files:
  - common
  - name: rhel-repos
    when: "distro=rockylinux"
template: default
templates:
  - name: rocky
    when: "distro=rockylinux"
  - name: modern
    when: "app@2:"
prolog: echo "A=1"
prologs:
  - script: echo "A=2"
    when: "distro=rockylinux"
"#;

    #[test]
    fn test_guarded_entries_apply_only_when_selected() {
        let spec = Specification::from_yaml("app", GUARDED, None).unwrap();
        assert_eq!(spec.conditionals.len(), 7);
        assert_eq!(spec.files, vec!["common"]);
        assert_eq!(spec.template, "default");

        let v1 = Version::parse("1.0").unwrap();
        let ubuntu = spec.specialize(&v1, &settings("ubuntu"));
        assert!(ubuntu.conditionals.is_empty());
        assert_eq!(ubuntu.variables["PKG"], "apt");
        assert_eq!(ubuntu.variables["LEGACY"], "yes");
        assert!(!ubuntu.arguments.contains_key("CUDA"));
        assert_eq!(ubuntu.arguments["JOBS"].default.as_deref(), Some("4"));
        assert_eq!(ubuntu.files, vec!["common"]);
        assert_eq!(ubuntu.template, "default");
        assert_eq!(ubuntu.prolog.as_deref(), Some("echo \"A=1\""));

        let rocky = spec.specialize(&v1, &settings("rockylinux"));
        assert_eq!(rocky.variables["PKG"], "dnf");
        assert!(rocky.arguments["CUDA"].required);
        assert_eq!(rocky.files, vec!["common", "rhel-repos"]);
        assert_eq!(rocky.template, "rocky");
        assert_eq!(rocky.prolog.as_deref(), Some("echo \"A=2\""));
    }

    #[test]
    fn test_last_matching_template_wins() {
        let spec = Specification::from_yaml("app", GUARDED, None).unwrap();
        let v2 = Version::parse("2.0").unwrap();

        let ubuntu = spec.specialize(&v2, &settings("ubuntu"));
        assert_eq!(ubuntu.template, "modern");
        assert!(!ubuntu.variables.contains_key("LEGACY"));

        let rocky = spec.specialize(&v2, &settings("rockylinux"));
        assert_eq!(rocky.template, "modern");
        assert_eq!(rocky.variables["PKG"], "dnf");
    }

    #[test]
    fn test_image_name_rules() {
        for name in ["gcc", "python-3", "my_lib.v2", "A1"] {
            assert!(is_image_name(name), "{name}");
        }
        for name in ["", "-gcc", ".hidden", "a/b", "a b", "x@1"] {
            assert!(!is_image_name(name), "{name}");
        }
    }
}
