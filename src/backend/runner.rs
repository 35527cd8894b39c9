//! Backend process execution.
//!
//! [`BackendCommand`] is a small fluent builder over [`tokio::process::Command`]. Output
//! of a build is streamed line by line into the image's log file, and echoed to the
//! terminal when verbose output is requested.

use anyhow::{Context, Result};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;

/// Builder for one backend invocation.
///
/// # Examples
///
/// ```rust,ignore
/// use velocity_cli::backend::BackendCommand;
///
/// let outcome = BackendCommand::new("apptainer")
///     .args(["build", "/tmp/build/gcc.sif", "script"])
///     .current_dir("/tmp/build/gcc-13-abc1234")
///     .execute_logged(Path::new("/tmp/build/gcc-13-abc1234/log"), false)
///     .await?;
/// assert!(outcome.success());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendCommand {
    program: String,
    args: Vec<String>,
    current_dir: Option<PathBuf>,
    env_vars: Vec<(String, String)>,
}

/// Exit status of a finished command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandOutcome {
    /// Exit code; `-1` when the process was killed by a signal
    pub status: i32,
}

impl CommandOutcome {
    #[must_use]
    pub const fn success(self) -> bool {
        self.status == 0
    }
}

impl BackendCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            current_dir: None,
            env_vars: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.current_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_vars.push((key.into(), value.into()));
        self
    }

    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    #[must_use]
    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        if let Some(dir) = &self.current_dir {
            cmd.current_dir(dir);
        }
        for (key, value) in &self.env_vars {
            tracing::trace!(target: "backend", "Setting env var: {}={}", key, value);
            cmd.env(key, value);
        }
        cmd
    }

    /// Run the command, appending its combined output to `log_path`.
    ///
    /// The command line itself is the first line written. A non-zero exit is reported in
    /// the returned [`CommandOutcome`], not as an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the log file cannot be written or the process cannot be
    /// spawned.
    pub async fn execute_logged(self, log_path: &Path, verbose: bool) -> Result<CommandOutcome> {
        let start = std::time::Instant::now();
        tracing::debug!(target: "backend", "Executing command: {}", self);

        let mut log = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)
            .await
            .with_context(|| format!("Failed to open build log {}", log_path.display()))?;
        log.write_all(format!("$ {self}\n").as_bytes()).await?;

        let mut child = self
            .command()
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("Failed to execute {}", self.program))?;

        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let mut readers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(forward_lines(stdout, tx.clone())));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(forward_lines(stderr, tx.clone())));
        }
        drop(tx);

        while let Some(line) = rx.recv().await {
            if verbose {
                println!("{line}");
            }
            log.write_all(line.as_bytes()).await?;
            log.write_all(b"\n").await?;
        }
        for reader in readers {
            reader.await.context("Output reader task panicked")?;
        }
        log.flush().await?;

        let status = child.wait().await.with_context(|| format!("Failed to wait for {}", self.program))?;
        let outcome = CommandOutcome {
            status: status.code().unwrap_or(-1),
        };

        tracing::debug!(
            target: "backend::perf",
            "{} finished with status {} in {:.2}s",
            self.program,
            outcome.status,
            start.elapsed().as_secs_f64()
        );
        Ok(outcome)
    }
}

async fn forward_lines<R: AsyncRead + Unpin>(reader: R, tx: mpsc::UnboundedSender<String>) {
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if tx.send(line).is_err() {
            break;
        }
    }
}

impl fmt::Display for BackendCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_display_joins_arguments() {
        let cmd = BackendCommand::new("podman").arg("tag").args(["a", "b"]);
        assert_eq!(cmd.to_string(), "podman tag a b");
        assert_eq!(cmd.program(), "podman");
        assert_eq!(cmd.arguments().len(), 3);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_execute_logged_captures_output_and_status() {
        let temp = TempDir::new().unwrap();
        let log = temp.path().join("log");

        let outcome = BackendCommand::new("sh")
            .args(["-c", "echo out; echo err >&2; exit 3"])
            .current_dir(temp.path())
            .execute_logged(&log, false)
            .await
            .unwrap();

        assert_eq!(outcome.status, 3);
        assert!(!outcome.success());
        let contents = std::fs::read_to_string(&log).unwrap();
        assert!(contents.starts_with("$ sh -c"));
        assert!(contents.contains("out\n"));
        assert!(contents.contains("err\n"));
    }

    #[tokio::test]
    async fn test_missing_program_is_an_error() {
        let temp = TempDir::new().unwrap();
        let result = BackendCommand::new("velocity-definitely-missing-binary")
            .execute_logged(&temp.path().join("log"), false)
            .await;
        assert!(result.is_err());
    }
}
