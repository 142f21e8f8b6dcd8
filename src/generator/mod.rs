//! Change generators: whatever turns a task into proposed file contents.
//!
//! The pipeline treats generated content as opaque text. A generator never
//! fails; it returns an empty proposal instead, which the sandbox reports
//! as a failed verification so the normal retry routing applies.

mod command;

pub use command::CommandGenerator;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::changeset::{resolve_in, ChangeProposal};

/// Source files shown to the generator, keyed by relative path.
pub type SourceContext = IndexMap<PathBuf, String>;

/// Input for one generation attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Natural-language task.
    pub task: String,
    /// Failure output from the previous attempt, if it failed verification.
    pub prior_error: Option<String>,
    /// Existing source the generator may build on.
    pub source_context: SourceContext,
}

/// Produces a change proposal for a task.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Generates changes. Returns an empty proposal on failure.
    async fn generate(&self, request: &GenerationRequest) -> ChangeProposal;

    /// Returns the name of this generator.
    fn name(&self) -> &str;
}

/// Reads the named source files under `root`.
///
/// Unsafe, missing or unreadable paths are skipped with a warning.
pub fn load_source_context(root: &Path, files: &[PathBuf]) -> SourceContext {
    let mut context = SourceContext::new();
    for relative in files {
        let absolute = match resolve_in(root, relative) {
            Ok(path) => path,
            Err(e) => {
                tracing::warn!(path = ?relative, error = %e, "skipping source file");
                continue;
            }
        };
        match std::fs::read_to_string(&absolute) {
            Ok(content) => {
                context.insert(relative.clone(), content);
            }
            Err(e) => {
                tracing::warn!(path = ?relative, error = %e, "source file not readable, skipping");
            }
        }
    }
    tracing::debug!(files = context.len(), "loaded source context");
    context
}
