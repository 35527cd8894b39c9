//! Prolog execution.
//!
//! A prolog is a shell script an image runs before its template is rendered. It sees
//! the node's variables as environment variables and reports derived values by printing
//! `NAME=value` lines on stdout; every other line is ignored.

use std::collections::BTreeMap;
use std::path::Path;
use std::process::{Command, Stdio};

use crate::core::VelocityError;
use crate::templating::parser::is_identifier;
use crate::variables::is_reserved;

/// Runs prolog scripts.
pub trait PrologRunner {
    /// Run `script` for `image` with `env` set, returning the assignments it printed.
    ///
    /// # Errors
    ///
    /// Returns [`VelocityError::PrologExecution`] when the script cannot be started or
    /// exits non-zero.
    fn run(
        &self,
        image: &str,
        script: &str,
        env: &BTreeMap<String, String>,
        workdir: Option<&Path>,
    ) -> Result<BTreeMap<String, String>, VelocityError>;
}

/// Runs prologs with `bash -c`, falling back to `sh`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShellPrologRunner;

impl PrologRunner for ShellPrologRunner {
    fn run(
        &self,
        image: &str,
        script: &str,
        env: &BTreeMap<String, String>,
        workdir: Option<&Path>,
    ) -> Result<BTreeMap<String, String>, VelocityError> {
        let failed = |reason: String| VelocityError::PrologExecution {
            image: image.to_string(),
            reason,
        };

        let shell = if which::which("bash").is_ok() {
            "bash"
        } else {
            "sh"
        };
        tracing::debug!("Running prolog of '{image}' with {shell}");

        let mut command = Command::new(shell);
        command.arg("-c").arg(script).envs(env).stdin(Stdio::null());
        if let Some(dir) = workdir {
            command.current_dir(dir);
        }

        let output = command.output().map_err(|e| failed(format!("could not start {shell}: {e}")))?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !output.status.success() {
            let status = output.status.code().map_or_else(|| "a signal".to_string(), |c| c.to_string());
            let mut reason = format!("exited with {status}");
            if !stderr.trim().is_empty() {
                reason.push_str(": ");
                reason.push_str(stderr.trim());
            }
            return Err(failed(reason));
        }
        if !stderr.trim().is_empty() {
            tracing::debug!("prolog of '{image}' stderr: {}", stderr.trim());
        }

        Ok(parse_assignments(image, &stdout))
    }
}

/// Collect `NAME=value` lines from prolog output.
///
/// Later assignments to the same name win. Reserved built-in names are dropped.
pub fn parse_assignments(image: &str, output: &str) -> BTreeMap<String, String> {
    let mut values = BTreeMap::new();
    for line in output.lines() {
        let Some((name, value)) = line.split_once('=') else {
            tracing::trace!("prolog of '{image}': {line}");
            continue;
        };
        let name = name.trim();
        if !is_identifier(name) {
            tracing::trace!("prolog of '{image}': {line}");
            continue;
        }
        if is_reserved(name) {
            tracing::warn!("prolog of '{image}' tried to set built-in variable '{name}', ignoring");
            continue;
        }
        values.insert(name.to_string(), value.to_string());
    }
    values
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_assignments() {
        let output = "building...\nGIT_HASH=abc123\nURL=https://x.org/?a=b\n__name__=evil\nbad name=1\nGIT_HASH=def456\n";
        let values = parse_assignments("gcc", output);
        assert_eq!(values.len(), 2);
        assert_eq!(values["GIT_HASH"], "def456");
        assert_eq!(values["URL"], "https://x.org/?a=b");
    }

    #[cfg(unix)]
    #[test]
    fn test_shell_runner_sees_environment() {
        let mut env = BTreeMap::new();
        env.insert("__version__".to_string(), "13.2".to_string());
        let values = ShellPrologRunner
            .run("gcc", "echo \"MAJOR=${__version__%%.*}\"", &env, None)
            .unwrap();
        assert_eq!(values["MAJOR"], "13");
    }

    #[cfg(unix)]
    #[test]
    fn test_shell_runner_failure() {
        let err = ShellPrologRunner.run("gcc", "echo oops >&2; exit 4", &BTreeMap::new(), None).unwrap_err();
        let VelocityError::PrologExecution {
            image,
            reason,
        } = err
        else {
            panic!("expected prolog failure");
        };
        assert_eq!(image, "gcc");
        assert!(reason.contains('4'));
        assert!(reason.contains("oops"));
    }
}
