//! Stage a change set, verify it, put the tree back.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::changeset::ChangeSet;
use crate::config::SandboxConfig;
use crate::error::{Error, Result};
use crate::verify::{shape_output, CommandExecutor, ExecOutcome, ProcessSpec, VerifyCommand};

use super::transaction::SandboxTransaction;

/// Outcome of one sandboxed verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationReport {
    /// True only when the command exited with code 0 (or was a no-op).
    pub passed: bool,
    /// stderr followed by stdout, possibly truncated; or the failure reason.
    pub output: String,
    /// Exit code, when the command ran to completion.
    pub exit_code: Option<i32>,
    /// What was run.
    pub command: VerifyCommand,
}

impl VerificationReport {
    fn failed(command: &VerifyCommand, output: impl Into<String>) -> Self {
        Self {
            passed: false,
            output: output.into(),
            exit_code: None,
            command: command.clone(),
        }
    }
}

/// Applies change sets onto a working directory transactionally and verifies them.
///
/// Every call leaves the directory as it found it. The only error returned is
/// [`Error::Restore`] (the tree could not be put back) or [`Error::Cancelled`].
pub struct SandboxRunner {
    root: PathBuf,
    executor: Arc<dyn CommandExecutor>,
    config: SandboxConfig,
}

impl SandboxRunner {
    /// Creates a runner over `root`.
    pub fn new(root: PathBuf, executor: Arc<dyn CommandExecutor>, config: SandboxConfig) -> Self {
        Self {
            root,
            executor,
            config,
        }
    }

    /// Returns the working directory root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Stages `changes`, runs `command`, restores the tree.
    pub async fn run(
        &self,
        changes: &ChangeSet,
        command: &VerifyCommand,
        cancel: &CancellationToken,
    ) -> Result<VerificationReport> {
        if changes.is_empty() {
            return Ok(VerificationReport::failed(
                command,
                "generator produced no changes",
            ));
        }
        if let Err(e) = changes.validate_paths() {
            tracing::warn!(error = %e, "rejecting malformed change set");
            return Ok(VerificationReport::failed(command, e.to_string()));
        }

        let mut tx = SandboxTransaction::begin(&self.root);
        let staged = changes
            .files()
            .iter()
            .try_for_each(|(path, content)| tx.stage(path, content));

        let outcome = match staged {
            Ok(()) => {
                tracing::info!(
                    files = tx.staged_count(),
                    command = %command.describe(),
                    "staged change set, verifying"
                );
                self.execute(command, cancel).await
            }
            Err(e) => {
                tracing::warn!(error = %e, "staging failed, rolling back");
                Some(VerificationReport::failed(
                    command,
                    format!("failed to stage changes: {}", e),
                ))
            }
        };

        tx.restore()?;

        match outcome {
            Some(report) => {
                tracing::info!(
                    passed = report.passed,
                    exit_code = ?report.exit_code,
                    output_chars = report.output.chars().count(),
                    "verification finished, working tree restored"
                );
                Ok(report)
            }
            None => Err(Error::Cancelled),
        }
    }

    /// Runs the verification. `None` means the run was cancelled.
    async fn execute(
        &self,
        command: &VerifyCommand,
        cancel: &CancellationToken,
    ) -> Option<VerificationReport> {
        let spec = match command {
            VerifyCommand::Noop { reason } => {
                tracing::info!(reason = %reason, "no verifier applies, passing");
                return Some(VerificationReport {
                    passed: true,
                    output: String::new(),
                    exit_code: None,
                    command: command.clone(),
                });
            }
            VerifyCommand::Process(spec) => spec,
        };

        let limit = self.config.output_limit();
        let working_dir = self.root.join(&spec.working_dir);
        let result = self
            .executor
            .execute(&spec.argv, &working_dir, self.config.verify_timeout(), cancel)
            .await;

        let report = match result {
            Ok(ExecOutcome::Completed {
                exit_code,
                stdout,
                stderr,
            }) => VerificationReport {
                passed: exit_code == Some(0),
                output: shape_output(&stderr, &stdout, limit),
                exit_code,
                command: command.clone(),
            },
            Ok(ExecOutcome::TimedOut {
                after,
                stdout,
                stderr,
            }) => {
                let header = format!(
                    "verification timed out after {}s: {}",
                    after.as_secs(),
                    spec.display()
                );
                let stderr = if stderr.is_empty() {
                    header
                } else {
                    format!("{}\n{}", header, stderr)
                };
                VerificationReport::failed(command, shape_output(&stderr, &stdout, limit))
            }
            Ok(ExecOutcome::Cancelled) => return None,
            Err(e) => VerificationReport::failed(command, describe_spawn_error(spec, &e)),
        };
        Some(report)
    }
}

fn describe_spawn_error(spec: &ProcessSpec, error: &std::io::Error) -> String {
    if error.kind() == std::io::ErrorKind::NotFound {
        format!("verifier not found: `{}` ({})", spec.display(), error)
    } else {
        format!("failed to run `{}`: {}", spec.display(), error)
    }
}
