//! Verification commands: which one to run and how to run it.
//!
//! [`VerifierDispatch`] maps the changed paths to a [`VerifyCommand`];
//! a [`CommandExecutor`] runs it.

mod dispatch;
mod executor;

pub use dispatch::{default_rules, DispatchRule, VerifierDispatch};
pub use executor::{CommandExecutor, ExecOutcome, ProcessExecutor};

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Marker appended to output that was cut short.
pub const TRUNCATION_MARKER: &str = "\n...(Truncated)...";

/// A process invocation chosen by dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessSpec {
    /// Name of the dispatch rule that produced this command.
    pub label: String,
    /// Program followed by its arguments.
    pub argv: Vec<String>,
    /// Working directory, relative to the workflow root.
    pub working_dir: PathBuf,
}

impl ProcessSpec {
    /// Renders the argument vector for logs and reports.
    pub fn display(&self) -> String {
        self.argv.join(" ")
    }
}

/// The verification step for a change set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum VerifyCommand {
    /// Nothing to run; verification passes.
    Noop { reason: String },
    /// Run an external build/test process.
    Process(ProcessSpec),
}

impl VerifyCommand {
    /// Short description used in reports.
    pub fn describe(&self) -> String {
        match self {
            Self::Noop { reason } => format!("noop ({})", reason),
            Self::Process(spec) => spec.display(),
        }
    }
}

/// Joins stderr and stdout and applies the character limit.
///
/// `limit` of `None` returns the full text.
pub fn shape_output(stderr: &str, stdout: &str, limit: Option<usize>) -> String {
    let combined = match (stderr.is_empty(), stdout.is_empty()) {
        (true, _) => stdout.to_string(),
        (false, true) => stderr.to_string(),
        (false, false) => format!("{}\n{}", stderr, stdout),
    };

    match limit {
        Some(max) => truncate_chars(&combined, max),
        None => combined,
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => format!("{}{}", &text[..cut], TRUNCATION_MARKER),
        None => text.to_string(),
    }
}
