//! One-shot external command execution with a hard timeout.
//!
//! Status and version probes, CLI adapters, and module install steps all
//! shell out through here. Every invocation has a deadline; a child that
//! overruns it is SIGKILLed and the caller gets a typed `Timeout` instead
//! of a hang.

use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::Command as AsyncCommand;
use tracing::{debug, error};

use crate::error::{Result, TerminalError};

/// Default deadline for read-only probes (seconds). Mutating operations
/// (image pulls, installs) should pass an explicit larger value.
pub const DEFAULT_EXEC_TIMEOUT_SECS: u64 = 10;

/// Status strings that commonly come back from probes like
/// `systemctl is-active` -- a non-zero exit carrying one of these is an
/// answer, not a failure worth an error-level log.
const BENIGN_OUTPUTS: &[&str] = &["inactive", "failed", "deactivating", "not-found", "unknown"];

#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    /// Hard deadline in seconds; 0 selects [`DEFAULT_EXEC_TIMEOUT_SECS`].
    pub timeout_secs: u64,
    /// Payload written to the child's stdin, which is then closed.
    pub stdin: Option<Vec<u8>>,
    /// Extra environment variables for the child.
    pub env: Vec<(String, String)>,
}

impl ExecOptions {
    pub fn with_timeout(timeout_secs: u64) -> Self {
        Self {
            timeout_secs,
            ..Self::default()
        }
    }

    fn effective_timeout_secs(&self) -> u64 {
        if self.timeout_secs == 0 {
            DEFAULT_EXEC_TIMEOUT_SECS
        } else {
            self.timeout_secs
        }
    }
}

/// Captured result of a completed (exit code 0) command.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    /// Stdout and stderr joined in that order, for callers that treat the
    /// streams as one log.
    pub fn combined(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}{}", self.stdout, self.stderr)
        }
    }
}

/// Run `program` with `args`, capture both output streams, and enforce the
/// deadline from `options`.
///
/// # Errors
///
/// - `CommandFailed` -- child exited non-zero (combined output attached).
/// - `Timeout`       -- child exceeded the deadline and was SIGKILLed.
/// - `PtySpawn`      -- child could not be spawned.
/// - `IoError`       -- underlying I/O failure.
pub async fn run(program: &str, args: &[&str], options: ExecOptions) -> Result<ExecOutput> {
    debug!(program, ?args, "exec");

    let timeout_secs = options.effective_timeout_secs();
    let timeout_duration = Duration::from_secs(timeout_secs);

    let mut cmd = AsyncCommand::new(program);
    cmd.args(args)
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .stdin(if options.stdin.is_some() {
            std::process::Stdio::piped()
        } else {
            std::process::Stdio::null()
        });
    for (key, value) in &options.env {
        cmd.env(key, value);
    }

    let mut child = cmd
        .spawn()
        .map_err(|e| TerminalError::PtySpawn(format!("spawn failed: {e}")))?;

    let stdin_pipe = child.stdin.take();
    let payload = options.stdin;

    // `wait_with_output` takes `self` by value, so we drive it on a spawned
    // task and communicate back via a oneshot channel. The PID is captured
    // first so the timeout path can issue a SIGKILL.
    let pid = child.id();
    let (tx, rx) = tokio::sync::oneshot::channel();

    tokio::spawn(async move {
        if let (Some(mut sink), Some(data)) = (stdin_pipe, payload) {
            let _ = sink.write_all(&data).await;
            // Dropping the handle closes the pipe so the child sees EOF.
        }
        let _ = tx.send(child.wait_with_output().await);
    });

    match tokio::time::timeout(timeout_duration, rx).await {
        // The task completed within the deadline and sent a result.
        Ok(Ok(Ok(output))) => {
            let exit_code = output.status.code().unwrap_or(-1);
            let result = ExecOutput {
                exit_code,
                stdout: strip_text(&output.stdout),
                stderr: strip_text(&output.stderr),
            };

            if exit_code != 0 {
                let combined = result.combined();
                let trimmed = combined.trim();
                if !BENIGN_OUTPUTS.contains(&trimmed) {
                    error!(program, exit_code, output = %trimmed, "command failed");
                }
                return Err(TerminalError::CommandFailed {
                    code: exit_code,
                    output: combined,
                });
            }
            Ok(result)
        }

        // wait_with_output() returned an I/O error.
        Ok(Ok(Err(e))) => Err(TerminalError::IoError(e)),

        // The oneshot channel was dropped -- the spawned task panicked.
        Ok(Err(_recv_err)) => Err(TerminalError::PtySpawn(
            "wait task panicked unexpectedly".to_string(),
        )),

        // Deadline expired -- kill the child via its PID.
        Err(_elapsed) => {
            if let Some(raw_pid) = pid {
                // Safety: raw_pid is our direct child, still running.
                #[cfg(unix)]
                unsafe {
                    libc::kill(raw_pid as libc::pid_t, libc::SIGKILL);
                }
                #[cfg(not(unix))]
                {
                    let _ = std::process::Command::new("taskkill")
                        .args(["/F", "/PID", &raw_pid.to_string()])
                        .output();
                }
            }
            Err(TerminalError::Timeout {
                ms: timeout_secs * 1_000,
            })
        }
    }
}

/// Strip ANSI escape codes and convert bytes to a UTF-8 string.
fn strip_text(raw: &[u8]) -> String {
    let clean = strip_ansi_escapes::strip(raw);
    String::from_utf8_lossy(&clean).into_owned()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_stdout() {
        let result = run("echo", &["hello"], ExecOptions::default()).await.unwrap();
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn nonzero_exit_is_a_typed_error() {
        let err = run("sh", &["-c", "echo broken >&2; exit 3"], ExecOptions::default())
            .await
            .unwrap_err();
        match err {
            TerminalError::CommandFailed { code, output } => {
                assert_eq!(code, 3);
                assert!(output.contains("broken"));
            }
            other => panic!("expected CommandFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn deadline_kills_the_child() {
        let start = std::time::Instant::now();
        let err = run("sleep", &["30"], ExecOptions::with_timeout(1))
            .await
            .unwrap_err();
        assert!(matches!(err, TerminalError::Timeout { ms: 1_000 }));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn stdin_payload_reaches_the_child() {
        let options = ExecOptions {
            stdin: Some(b"from stdin\n".to_vec()),
            ..ExecOptions::default()
        };
        let result = run("cat", &[], options).await.unwrap();
        assert_eq!(result.stdout, "from stdin\n");
    }

    #[tokio::test]
    async fn env_vars_are_passed_through() {
        let options = ExecOptions {
            env: vec![("OPSDECK_PROBE".to_string(), "42".to_string())],
            ..ExecOptions::default()
        };
        let result = run("sh", &["-c", "echo $OPSDECK_PROBE"], options)
            .await
            .unwrap();
        assert_eq!(result.stdout.trim(), "42");
    }
}
