//! Global constants used throughout the Velocity codebase.
//!
//! File names of the image repository layout, build context layout and the
//! environment variables read by the configuration layer.

/// Specification file inside an image directory.
pub const SPECS_FILE: &str = "specs.yaml";

/// Alternate specification file name accepted for compatibility.
pub const SPECS_FILE_ALT: &str = "Specifications.yaml";

/// Directory inside an image directory holding VTMP templates.
pub const TEMPLATES_DIR: &str = "templates";

/// Extension of VTMP template files.
pub const TEMPLATE_EXTENSION: &str = "vtmp";

/// Template used when a specification does not name one.
pub const DEFAULT_TEMPLATE: &str = "default";

/// Directory inside an image directory holding `@copy` sources.
pub const FILES_DIR: &str = "files";

/// Rendered build script inside a build context.
pub const SCRIPT_FILE: &str = "script";

/// Reproducibility manifest inside a build context.
pub const MANIFEST_FILE: &str = "manifest.json";

/// Shell-sourceable variable snapshot inside a build context.
pub const VARIABLES_FILE: &str = "variables";

/// Backend output log inside a build context.
pub const LOG_FILE: &str = "log";

/// Marker left in a build context whose assembly or build failed.
pub const FAILED_MARKER: &str = ".velocity-failed";

/// Configuration file inside the config directory.
pub const CONFIG_FILE: &str = "config.yaml";

/// Upper bound on resolver passes before giving up on a fixed point.
///
/// Every pass either adds a constraint or stops, so this is only reached by
/// pathological `when` guards that flip selections back and forth.
pub const MAX_RESOLUTION_PASSES: usize = 32;

/// Environment variable names read by the configuration layer.
pub mod env {
    /// Directory holding `config.yaml`
    pub const CONFIG_DIR: &str = "VELOCITY_CONFIG_DIR";
    /// Target system name
    pub const SYSTEM: &str = "VELOCITY_SYSTEM";
    /// Backend name
    pub const BACKEND: &str = "VELOCITY_BACKEND";
    /// Target distro
    pub const DISTRO: &str = "VELOCITY_DISTRO";
    /// Target architecture
    pub const ARCH: &str = "VELOCITY_ARCH";
    /// Colon-separated image roots
    pub const IMAGE_PATH: &str = "VELOCITY_IMAGE_PATH";
    /// Root of all build contexts
    pub const BUILD_DIR: &str = "VELOCITY_BUILD_DIR";
    /// Log level used when neither `--debug` nor `RUST_LOG` is set
    pub const LOGGING_LEVEL: &str = "VELOCITY_LOGGING_LEVEL";
}
