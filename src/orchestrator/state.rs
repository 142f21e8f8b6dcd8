//! Workflow states and the legal edges between them.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A state of the generate-verify-approve workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    Generate,
    Verify,
    RetryDecision,
    Approve,
    Commit,
    Aborted,
    Done,
}

impl WorkflowState {
    /// Returns true if `next` is a legal successor of this state.
    pub fn can_transition_to(self, next: WorkflowState) -> bool {
        use WorkflowState::*;
        matches!(
            (self, next),
            (Generate, Verify)
                | (Verify, RetryDecision)
                | (RetryDecision, Generate)
                | (RetryDecision, Approve)
                | (Approve, Commit)
                | (Approve, Aborted)
                | (Commit, Done)
        )
    }

    /// Returns true for `Done` and `Aborted`.
    pub fn is_terminal(self) -> bool {
        matches!(self, WorkflowState::Done | WorkflowState::Aborted)
    }
}

/// One recorded edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub from: WorkflowState,
    pub to: WorkflowState,
}

/// Current state plus the trail of edges taken to reach it.
#[derive(Debug, Clone)]
pub(crate) struct StateTracker {
    current: WorkflowState,
    trail: Vec<Transition>,
}

impl StateTracker {
    pub(crate) fn new() -> Self {
        Self {
            current: WorkflowState::Generate,
            trail: Vec::new(),
        }
    }

    pub(crate) fn current(&self) -> WorkflowState {
        self.current
    }

    /// Moves to `next`, refusing edges outside the workflow graph.
    pub(crate) fn advance(&mut self, next: WorkflowState) -> Result<()> {
        if !self.current.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                from: self.current,
                to: next,
            });
        }
        tracing::debug!(from = ?self.current, to = ?next, "workflow transition");
        self.trail.push(Transition {
            from: self.current,
            to: next,
        });
        self.current = next;
        Ok(())
    }

    /// Number of times `state` has been entered, counting the initial state.
    pub(crate) fn entries(&self, state: WorkflowState) -> usize {
        let initial = usize::from(state == WorkflowState::Generate);
        initial + self.trail.iter().filter(|t| t.to == state).count()
    }

    pub(crate) fn into_trail(self) -> Vec<Transition> {
        self.trail
    }
}
