//! Transactional staging of change sets into the working directory.
//!
//! [`SandboxRunner`] writes a change set into place, runs its verification
//! command and restores every touched path before returning, whether the
//! verification passed, failed, timed out, errored or was cancelled.

mod runner;
mod transaction;

pub use runner::{SandboxRunner, VerificationReport};
