//! Bounded-time execution of host tools.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

use crate::core::decode::normalize_output;

/// Why a tool invocation did not produce a successful result.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("{program} timed out after {secs}s")]
    Timeout { program: String, secs: u64 },

    #[error("{program} exited with {status}: {message}")]
    Failed {
        program: String,
        status: String,
        /// Normalized stderr, or stdout when stderr is empty.
        message: String,
    },
}

/// Normalized output of a successful run.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub stdout: String,
}

/// Runs host tools with a per-invocation timeout.
#[derive(Debug, Clone)]
pub struct CommandRunner {
    timeout: Duration,
}

impl CommandRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Run `program args...`, returning normalized output on exit status 0.
    ///
    /// The child is killed if the timeout elapses.
    pub async fn run(&self, program: &str, args: &[&str]) -> Result<ToolOutput, RunError> {
        tracing::trace!("exec: {program} {}", args.join(" "));

        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, command.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(source)) => {
                return Err(RunError::Spawn {
                    program: program.to_string(),
                    source,
                })
            }
            Err(_) => {
                return Err(RunError::Timeout {
                    program: program.to_string(),
                    secs: self.timeout.as_secs(),
                })
            }
        };

        let stdout = normalize_output(&output.stdout);
        let stderr = normalize_output(&output.stderr);
        if !output.status.success() {
            let message = if stderr.trim().is_empty() {
                stdout.trim().to_string()
            } else {
                stderr.trim().to_string()
            };
            return Err(RunError::Failed {
                program: program.to_string(),
                status: output.status.to_string(),
                message,
            });
        }

        Ok(ToolOutput { stdout })
    }
}
