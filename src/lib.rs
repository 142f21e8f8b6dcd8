//! Luma pipeline - control core for automated code modification.
//!
//! This library drives a generated change set through a bounded
//! generate-verify-retry loop inside a self-restoring sandbox, then gates
//! the durable write behind explicit human approval.

pub mod approval;
pub mod changeset;
pub mod commit;
pub mod config;
pub mod error;
pub mod generator;
pub mod orchestrator;
pub mod retry;
pub mod sandbox;
pub mod verify;

pub use error::{Error, RestoreFailure, Result};

pub use approval::{
    draft_path_for, parse_decision, ApprovalGate, ApprovalPrompt, ApprovalRequest, AutoApprove,
    FilePreview, StdinPrompt,
};
pub use changeset::{validate_relative_path, ChangeProposal, ChangeSet, FileChanges};
pub use commit::{CommitSink, FsCommitSink};
pub use config::{
    ApprovalConfig, PipelineConfig, RetryConfig, SandboxConfig, Validate, ValidationResult,
    VerifyConfig,
};
pub use generator::{load_source_context, CommandGenerator, GenerationRequest, Generator};
pub use orchestrator::{
    AttemptRecord, Orchestrator, Transition, WorkflowOutcome, WorkflowRequest, WorkflowState,
};
pub use retry::{RetryDecision, RetryPolicy};
pub use sandbox::{SandboxRunner, VerificationReport};
pub use verify::{
    default_rules, CommandExecutor, DispatchRule, ExecOutcome, ProcessExecutor, ProcessSpec,
    VerifierDispatch, VerifyCommand,
};
