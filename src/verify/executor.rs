//! Process execution for verification commands.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// How long to keep draining pipes after the child exits or is killed.
/// Grandchildren can hold the pipes open.
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// How an executed command ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecOutcome {
    /// The process exited on its own. `exit_code` is `None` when killed by a signal.
    Completed {
        exit_code: Option<i32>,
        stdout: String,
        stderr: String,
    },
    /// The process ran past its deadline and was killed.
    TimedOut {
        after: Duration,
        stdout: String,
        stderr: String,
    },
    /// The caller cancelled the run and the process was killed.
    Cancelled,
}

/// Runs a verification command.
///
/// `Err` means the command could not be run at all (not found, permission
/// denied); callers treat that as a failed verification.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn execute(
        &self,
        argv: &[String],
        working_dir: &Path,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> std::io::Result<ExecOutcome>;
}

/// Executes commands as child processes via tokio.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessExecutor;

impl ProcessExecutor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandExecutor for ProcessExecutor {
    async fn execute(
        &self,
        argv: &[String],
        working_dir: &Path,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> std::io::Result<ExecOutcome> {
        let (program, args) = argv.split_first().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty argument vector")
        })?;

        tracing::info!(
            program = %program,
            args = ?args,
            working_dir = ?working_dir,
            timeout_secs = timeout.as_secs(),
            "running verification command"
        );

        let mut command = Command::new(program);
        command
            .args(args)
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // own process group, so build tools spawned by the verifier die with it
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn()?;
        let group = ProcessGroup::of(&child);

        let stdout_task = child.stdout.take().map(|s| tokio::spawn(read_lossy(s)));
        let stderr_task = child.stderr.take().map(|s| tokio::spawn(read_lossy(s)));

        enum Ended {
            Exited(Option<i32>),
            TimedOut,
            Cancelled,
        }

        let ended = tokio::select! {
            status = child.wait() => Ended::Exited(status?.code()),
            () = tokio::time::sleep(timeout) => {
                tracing::warn!(program = %program, timeout_secs = timeout.as_secs(), "verification timed out; killing");
                group.kill();
                if let Err(e) = child.kill().await {
                    tracing::warn!(error = %e, "failed to kill timed-out verification");
                }
                Ended::TimedOut
            }
            () = cancel.cancelled() => {
                tracing::info!(program = %program, "cancellation requested; killing verification");
                group.kill();
                if let Err(e) = child.kill().await {
                    tracing::warn!(error = %e, "failed to kill cancelled verification");
                }
                Ended::Cancelled
            }
        };

        // stragglers left in the group would keep the pipes open and the tree busy
        group.kill();

        let stdout = drain(stdout_task).await;
        let stderr = drain(stderr_task).await;

        Ok(match ended {
            Ended::Exited(exit_code) => ExecOutcome::Completed {
                exit_code,
                stdout,
                stderr,
            },
            Ended::TimedOut => ExecOutcome::TimedOut {
                after: timeout,
                stdout,
                stderr,
            },
            Ended::Cancelled => ExecOutcome::Cancelled,
        })
    }
}

/// The verifier's process group. Every member is killed on [`kill`](Self::kill)
/// and again on drop, which covers a cancelled `execute` future.
struct ProcessGroup {
    pgid: Option<i32>,
}

impl ProcessGroup {
    fn of(child: &tokio::process::Child) -> Self {
        Self {
            pgid: child.id().and_then(|id| i32::try_from(id).ok()),
        }
    }

    fn kill(&self) {
        #[cfg(unix)]
        {
            if let Some(pgid) = self.pgid {
                // ESRCH just means the group is already gone
                unsafe {
                    libc::kill(-pgid, libc::SIGKILL);
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = self.pgid;
        }
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.kill();
    }
}

async fn read_lossy<R: AsyncRead + Unpin>(mut reader: R) -> std::io::Result<String> {
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf).await?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

async fn drain(task: Option<tokio::task::JoinHandle<std::io::Result<String>>>) -> String {
    let Some(task) = task else {
        return String::new();
    };
    match tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, task).await {
        Ok(Ok(Ok(text))) => text,
        Ok(Ok(Err(e))) => {
            tracing::warn!(error = %e, "failed to capture command output");
            String::new()
        }
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "output capture task failed");
            String::new()
        }
        Err(_) => {
            tracing::warn!("output capture timed out");
            String::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".to_string(), "-c".to_string(), script.to_string()]
    }

    #[tokio::test]
    async fn captures_exit_code_and_both_streams() {
        let temp = TempDir::new().unwrap();
        let outcome = ProcessExecutor::new()
            .execute(
                &sh("echo out; echo err >&2; exit 3"),
                temp.path(),
                Duration::from_secs(10),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        match outcome {
            ExecOutcome::Completed {
                exit_code,
                stdout,
                stderr,
            } => {
                assert_eq!(exit_code, Some(3));
                assert_eq!(stdout.trim(), "out");
                assert_eq!(stderr.trim(), "err");
            }
            other => panic!("expected Completed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn runs_in_the_requested_directory() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("marker.txt"), "here").unwrap();

        let outcome = ProcessExecutor::new()
            .execute(
                &sh("cat marker.txt"),
                temp.path(),
                Duration::from_secs(10),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(matches!(
            outcome,
            ExecOutcome::Completed { exit_code: Some(0), ref stdout, .. } if stdout == "here"
        ));
    }

    #[tokio::test]
    async fn missing_program_is_an_io_error() {
        let temp = TempDir::new().unwrap();
        let err = ProcessExecutor::new()
            .execute(
                &["definitely-not-a-real-verifier-binary".to_string()],
                temp.path(),
                Duration::from_secs(10),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn empty_argv_is_rejected() {
        let temp = TempDir::new().unwrap();
        let err = ProcessExecutor::new()
            .execute(&[], temp.path(), Duration::from_secs(1), &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), std::io::ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn slow_command_times_out() {
        let temp = TempDir::new().unwrap();
        let started = std::time::Instant::now();

        let outcome = ProcessExecutor::new()
            .execute(
                &["sleep".to_string(), "10".to_string()],
                temp.path(),
                Duration::from_millis(200),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(matches!(outcome, ExecOutcome::TimedOut { .. }));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn timeout_kills_background_grandchildren() {
        let temp = TempDir::new().unwrap();

        let outcome = ProcessExecutor::new()
            .execute(
                &sh("(sleep 2; echo late > late.txt) & wait"),
                temp.path(),
                Duration::from_millis(300),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(matches!(outcome, ExecOutcome::TimedOut { .. }));

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(!temp.path().join("late.txt").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stragglers_do_not_outlive_a_completed_command() {
        let temp = TempDir::new().unwrap();
        let started = std::time::Instant::now();

        let outcome = ProcessExecutor::new()
            .execute(
                &sh("(sleep 2; echo late > late.txt) & echo done"),
                temp.path(),
                Duration::from_secs(10),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            ExecOutcome::Completed { exit_code: Some(0), .. }
        ));
        assert!(started.elapsed() < Duration::from_secs(2));

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(!temp.path().join("late.txt").exists());
    }

    #[tokio::test]
    async fn cancellation_kills_the_process() {
        let temp = TempDir::new().unwrap();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let outcome = ProcessExecutor::new()
            .execute(
                &["sleep".to_string(), "10".to_string()],
                temp.path(),
                Duration::from_secs(30),
                &cancel,
            )
            .await
            .unwrap();

        assert_eq!(outcome, ExecOutcome::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
