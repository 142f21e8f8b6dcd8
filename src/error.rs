//! Error types for the luma pipeline.

use std::path::PathBuf;
use thiserror::Error;

use crate::orchestrator::WorkflowState;

/// A single path that could not be put back during sandbox rollback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreFailure {
    /// Absolute path that was left inconsistent.
    pub path: PathBuf,
    /// Why restoring it failed.
    pub reason: String,
}

impl std::fmt::Display for RestoreFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path.display(), self.reason)
    }
}

/// Top-level error type for pipeline operations.
///
/// Verification failures are not errors; they travel as
/// [`VerificationReport`](crate::sandbox::VerificationReport) data.
#[derive(Error, Debug)]
pub enum Error {
    /// IO error outside of the sandbox transaction.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Pipeline configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// A change targets a path outside the working directory.
    #[error("invalid change path: {0}")]
    InvalidPath(PathBuf),

    /// The working tree could not be restored after staging.
    ///
    /// The working directory may be inconsistent; every failed path is listed.
    #[error("sandbox restore failed for {} path(s): {}", failures.len(), join_failures(failures))]
    Restore { failures: Vec<RestoreFailure> },

    /// Writing an approved change failed.
    #[error("failed to commit {path}: {source}")]
    Commit {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The orchestrator attempted an edge that is not in the workflow graph.
    #[error("invalid workflow transition {from:?} -> {to:?}")]
    InvalidTransition {
        from: WorkflowState,
        to: WorkflowState,
    },

    /// The run was cancelled by the caller.
    #[error("workflow cancelled")]
    Cancelled,
}

fn join_failures(failures: &[RestoreFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, Error>;
