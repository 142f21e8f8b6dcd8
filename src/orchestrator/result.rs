//! Result types for workflow runs.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::changeset::ChangeSet;

use super::state::{Transition, WorkflowState};

/// One generate-verify cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// 1-based attempt number.
    pub attempt: u32,
    /// Number of files the generator proposed.
    pub files: usize,
    /// Whether verification passed.
    pub passed: bool,
    /// Verification command, as described in logs.
    pub command: String,
    /// Exit code, if the command completed.
    pub exit_code: Option<i32>,
}

/// Result of a workflow run that reached a terminal state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowOutcome {
    /// Unique id for this run, also attached to its log span.
    pub run_id: Uuid,
    /// The task as given.
    pub task: String,
    /// `Done` or `Aborted`.
    pub final_state: WorkflowState,
    /// The change set at the end of the run.
    pub changes: ChangeSet,
    /// Files written by the commit, in order. Empty unless `Done`.
    pub committed: Vec<PathBuf>,
    /// Every generate-verify cycle, in order.
    pub attempts: Vec<AttemptRecord>,
    /// Every state transition, in order.
    pub transitions: Vec<Transition>,
    /// Wall-clock duration of the run.
    pub duration: Duration,
}

impl WorkflowOutcome {
    /// Returns true if the changes were committed.
    pub fn is_done(&self) -> bool {
        self.final_state == WorkflowState::Done
    }

    /// Retries taken.
    pub fn iteration(&self) -> u32 {
        self.changes.iteration
    }

    /// Failure output carried into approval, if verification never passed.
    pub fn last_error(&self) -> Option<&str> {
        self.changes.last_error.as_deref()
    }

    /// One-line human summary.
    pub fn summary(&self) -> String {
        let passed = self.attempts.iter().filter(|a| a.passed).count();
        match self.final_state {
            WorkflowState::Done => format!(
                "committed {} file(s) after {} attempt(s)",
                self.committed.len(),
                self.attempts.len()
            ),
            _ => format!(
                "aborted after {} attempt(s) ({} passed verification); nothing written",
                self.attempts.len(),
                passed
            ),
        }
    }
}
