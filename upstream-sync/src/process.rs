//! External process execution.
//!
//! Cherry-picks and the configured before-commit hooks run as external
//! commands. A non-zero exit is captured as a [`ProcessError`] carrying the
//! command line, the exit code and the combined stdout+stderr, which is later
//! rendered into tracking issue bodies.

use std::path::Path;
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// A failed external command: exit status, combined output and the command
/// line that was run. Created only on non-zero exit.
#[derive(Debug, Clone, Error)]
#[error("command `{command}` exited with code {code}: {output}", code = display_code(.exit_code))]
pub struct ProcessError {
    /// The full command line, e.g. `git cherry-pick -n <sha>`.
    pub command: String,
    /// Exit code, if the process exited normally.
    pub exit_code: Option<i32>,
    /// Combined stdout and stderr.
    pub output: String,
}

/// Errors that can occur while running an external command.
#[derive(Debug, Error)]
pub enum ExecError {
    /// The command ran and exited with a non-zero status.
    #[error(transparent)]
    Process(#[from] ProcessError),

    /// The command could not be spawned at all.
    #[error("could not run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The command was killed because the run was cancelled.
    #[error("command `{command}` was cancelled")]
    Canceled { command: String },
}

impl ExecError {
    /// Returns the captured process failure, if the command ran at all.
    pub fn process_error(&self) -> Option<&ProcessError> {
        match self {
            Self::Process(pe) => Some(pe),
            Self::Spawn { .. } | Self::Canceled { .. } => None,
        }
    }

    /// Returns true if the command was killed by cancellation.
    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled { .. })
    }
}

/// Runs external commands in a working directory, capturing their output.
#[derive(Debug, Clone, Default)]
pub struct Executor;

impl Executor {
    /// Runs `bin args...` inside `dir` and returns the combined output.
    ///
    /// The process is killed and [`ExecError::Canceled`] returned when
    /// `cancel` fires before it exits.
    ///
    /// # Errors
    ///
    /// Returns [`ExecError::Process`] on non-zero exit, carrying the exit
    /// code and combined stdout+stderr, or [`ExecError::Spawn`] if the
    /// binary could not be started.
    pub async fn run_command(
        &self,
        bin: &str,
        dir: &Path,
        args: &[&str],
        cancel: &CancellationToken,
    ) -> Result<String, ExecError> {
        let command = render_command_line(bin, args);

        info!(command = %command, dir = %dir.display(), "Running command");

        let child = Command::new(bin)
            .args(args)
            .current_dir(dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ExecError::Spawn {
                command: command.clone(),
                source,
            })?;

        let output = tokio::select! {
            _ = cancel.cancelled() => {
                // Dropping the child kills the process.
                return Err(ExecError::Canceled { command });
            }
            output = child.wait_with_output() => {
                output.map_err(|source| ExecError::Spawn {
                    command: command.clone(),
                    source,
                })?
            }
        };

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        if !output.status.success() {
            return Err(ProcessError {
                command,
                exit_code: output.status.code(),
                output: combined,
            }
            .into());
        }

        debug!(output = %combined, "Process exited normally");

        Ok(combined)
    }
}

fn display_code(code: &Option<i32>) -> String {
    match code {
        Some(c) => c.to_string(),
        None => "unknown".to_string(),
    }
}

fn render_command_line(bin: &str, args: &[&str]) -> String {
    let mut line = bin.to_string();

    for arg in args {
        line.push(' ');
        line.push_str(arg);
    }

    line
}
