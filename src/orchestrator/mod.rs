//! The workflow state machine.
//!
//! ```text
//! Generate -> Verify -> RetryDecision -+-> Generate        (retry, budget left)
//!                                      +-> Approve -+-> Commit -> Done
//!                                                   +-> Aborted
//! ```
//!
//! [`Orchestrator`] owns its working directory and configuration. Nothing
//! outlives a run except what the Commit state writes.

mod result;
mod state;

pub use result::{AttemptRecord, WorkflowOutcome};
pub use state::{Transition, WorkflowState};

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::approval::{ApprovalGate, ApprovalPrompt, AutoApprove, StdinPrompt};
use crate::changeset::ChangeSet;
use crate::commit::{CommitSink, FsCommitSink};
use crate::config::PipelineConfig;
use crate::error::{Error, Result};
use crate::generator::{load_source_context, GenerationRequest, Generator, SourceContext};
use crate::retry::{RetryDecision, RetryPolicy};
use crate::sandbox::{SandboxRunner, VerificationReport};
use crate::verify::{CommandExecutor, ProcessExecutor, VerifierDispatch};

use state::StateTracker;

/// A task to run through the workflow.
#[derive(Debug, Clone, Default)]
pub struct WorkflowRequest {
    /// Natural-language task for the generator.
    pub task: String,
    /// Relative paths of existing files to show the generator.
    pub source_files: Vec<PathBuf>,
}

impl WorkflowRequest {
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            source_files: Vec::new(),
        }
    }

    /// Adds source files passed to every generation attempt.
    pub fn with_source_files<I, P>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.source_files.extend(files.into_iter().map(Into::into));
        self
    }
}

/// Drives one task through generate, verify, retry, approve and commit.
pub struct Orchestrator {
    root: PathBuf,
    config: PipelineConfig,
    dispatch: VerifierDispatch,
    sandbox: SandboxRunner,
    retry: RetryPolicy,
    gate: ApprovalGate,
    generator: Box<dyn Generator>,
    prompt: Box<dyn ApprovalPrompt>,
    sink: Box<dyn CommitSink>,
    cancel: CancellationToken,
}

impl Orchestrator {
    /// Creates an orchestrator over `root` with process-based verification,
    /// filesystem commits and a terminal prompt (or auto-approval, if configured).
    pub fn new(root: PathBuf, config: PipelineConfig, generator: Box<dyn Generator>) -> Self {
        let prompt: Box<dyn ApprovalPrompt> = if config.approval.auto_approve {
            Box::new(AutoApprove::new(config.approval.affirmative_token.clone()))
        } else {
            Box::new(StdinPrompt::new())
        };

        Self {
            dispatch: config.verify.dispatcher(),
            sandbox: SandboxRunner::new(
                root.clone(),
                Arc::new(ProcessExecutor::new()),
                config.sandbox.clone(),
            ),
            retry: RetryPolicy::from_config(&config.retry),
            gate: ApprovalGate::new(root.clone(), config.approval.clone()),
            sink: Box::new(FsCommitSink::new(root.clone())),
            cancel: CancellationToken::new(),
            generator,
            prompt,
            config,
            root,
        }
    }

    /// Replaces the verification executor.
    pub fn with_executor(mut self, executor: Arc<dyn CommandExecutor>) -> Self {
        self.sandbox = SandboxRunner::new(self.root.clone(), executor, self.config.sandbox.clone());
        self
    }

    /// Replaces the approval prompt.
    pub fn with_prompt(mut self, prompt: Box<dyn ApprovalPrompt>) -> Self {
        self.prompt = prompt;
        self
    }

    /// Replaces the commit sink.
    pub fn with_commit_sink(mut self, sink: Box<dyn CommitSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Uses an externally owned cancellation token.
    pub fn with_cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that cancels the current run; the sandbox is restored first.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Returns the working directory root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the configuration.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Runs `request` to `Done` or `Aborted`.
    ///
    /// Errors are reserved for restore failures, commit failures,
    /// cancellation and internal state-machine violations.
    pub async fn run(&mut self, request: WorkflowRequest) -> Result<WorkflowOutcome> {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("workflow", run_id = %run_id);
        self.drive(run_id, request).instrument(span).await
    }

    async fn drive(&mut self, run_id: Uuid, request: WorkflowRequest) -> Result<WorkflowOutcome> {
        let started = Instant::now();
        tracing::info!(
            task = %request.task,
            max_attempts = self.retry.max_attempts(),
            root = ?self.root,
            "workflow started"
        );

        let source_context = load_source_context(&self.root, &request.source_files);
        let mut tracker = StateTracker::new();
        let mut changes = ChangeSet::new();
        let mut attempts = Vec::new();
        let mut committed = Vec::new();
        let mut report: Option<VerificationReport> = None;

        while !tracker.current().is_terminal() {
            match tracker.current() {
                WorkflowState::Generate => {
                    self.check_cancelled()?;
                    debug_assert!(
                        tracker.entries(WorkflowState::Generate)
                            <= self.retry.max_attempts() as usize,
                        "generate entered past the retry budget"
                    );
                    self.generate(&request.task, &source_context, &mut changes)
                        .await;
                    tracker.advance(WorkflowState::Verify)?;
                }
                WorkflowState::Verify => {
                    let command = self.dispatch.dispatch(&self.root, &changes);
                    let verified = self.sandbox.run(&changes, &command, &self.cancel).await?;
                    attempts.push(AttemptRecord {
                        attempt: changes.iteration + 1,
                        files: changes.len(),
                        passed: verified.passed,
                        command: command.describe(),
                        exit_code: verified.exit_code,
                    });
                    report = Some(verified);
                    tracker.advance(WorkflowState::RetryDecision)?;
                }
                WorkflowState::RetryDecision => {
                    let Some(verified) = report.take() else {
                        return Err(Error::InvalidTransition {
                            from: WorkflowState::RetryDecision,
                            to: WorkflowState::Approve,
                        });
                    };
                    let next = self.route(&verified, &mut changes);
                    tracker.advance(next)?;
                }
                WorkflowState::Approve => {
                    self.check_cancelled()?;
                    let approved = self.gate.review(&mut changes, self.prompt.as_ref()).await;
                    let next = if approved {
                        WorkflowState::Commit
                    } else {
                        WorkflowState::Aborted
                    };
                    tracker.advance(next)?;
                }
                WorkflowState::Commit => {
                    committed = self.sink.commit(&changes)?;
                    tracker.advance(WorkflowState::Done)?;
                }
                WorkflowState::Done | WorkflowState::Aborted => break,
            }
        }

        let final_state = tracker.current();
        let outcome = WorkflowOutcome {
            run_id,
            task: request.task,
            final_state,
            changes,
            committed,
            attempts,
            transitions: tracker.into_trail(),
            duration: started.elapsed(),
        };

        tracing::info!(
            final_state = ?outcome.final_state,
            iteration = outcome.iteration(),
            attempts = outcome.attempts.len(),
            duration_ms = outcome.duration.as_millis() as u64,
            "workflow finished"
        );
        Ok(outcome)
    }

    /// Asks the generator for a proposal and normalizes it into `changes`.
    async fn generate(&self, task: &str, context: &SourceContext, changes: &mut ChangeSet) {
        let request = GenerationRequest {
            task: task.to_string(),
            prior_error: changes.last_error.clone(),
            source_context: context.clone(),
        };

        let proposal = self.generator.generate(&request).await;
        changes.replace_files(proposal.into_files());
        changes.approved = None;

        tracing::info!(
            generator = self.generator.name(),
            iteration = changes.iteration,
            files = changes.len(),
            "generation finished"
        );
    }

    /// Applies the retry decision to `changes` and returns the next state.
    fn route(&self, verified: &VerificationReport, changes: &mut ChangeSet) -> WorkflowState {
        match self.retry.decide(verified.passed, changes.iteration) {
            RetryDecision::Retry => {
                changes.iteration += 1;
                changes.last_error = Some(verified.output.clone());
                tracing::info!(
                    iteration = changes.iteration,
                    max_attempts = self.retry.max_attempts(),
                    "verification failed, retrying"
                );
                WorkflowState::Generate
            }
            RetryDecision::Proceed if verified.passed => {
                changes.last_error = None;
                WorkflowState::Approve
            }
            RetryDecision::Proceed => {
                changes.last_error = Some(verified.output.clone());
                tracing::warn!(
                    iteration = changes.iteration,
                    "retry budget exhausted, asking for approval anyway"
                );
                WorkflowState::Approve
            }
        }
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            tracing::info!("workflow cancelled");
            return Err(Error::Cancelled);
        }
        Ok(())
    }
}
