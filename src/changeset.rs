//! Proposed file edits for one workflow attempt.

use std::path::{Component, Path, PathBuf};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Ordered mapping of relative path to proposed file content.
pub type FileChanges = IndexMap<PathBuf, String>;

/// The proposed set of edits plus the workflow bookkeeping that travels with it.
///
/// Insertion order of `files` is preserved so staging, previews and commits
/// always walk the files in the order the generator produced them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    files: FileChanges,
    /// Number of failed-and-retried verifications so far.
    pub iteration: u32,
    /// Failure output from the last verification, fed to the next generation.
    pub last_error: Option<String>,
    /// Human decision; unset until the approval gate has run.
    pub approved: Option<bool>,
}

impl ChangeSet {
    /// Creates an empty change set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a file, replacing any earlier content for the same path.
    pub fn with_file(mut self, path: impl Into<PathBuf>, content: impl Into<String>) -> Self {
        self.insert(path, content);
        self
    }

    /// Inserts or replaces a file. An existing key keeps its position.
    pub fn insert(&mut self, path: impl Into<PathBuf>, content: impl Into<String>) {
        self.files.insert(path.into(), content.into());
    }

    /// Replaces all files wholesale; bookkeeping is left untouched.
    pub fn replace_files(&mut self, files: FileChanges) {
        self.files = files;
    }

    /// Returns the files in insertion order.
    pub fn files(&self) -> &FileChanges {
        &self.files
    }

    /// Iterates over the changed paths in insertion order.
    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.files.keys().map(PathBuf::as_path)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Checks every path with [`validate_relative_path`].
    pub fn validate_paths(&self) -> Result<()> {
        self.paths().try_for_each(validate_relative_path)
    }
}

/// What a generator hands back: either a multi-file mapping or the legacy
/// single `filename` + `code_content` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChangeProposal {
    /// Multi-file proposal.
    Files { changes: FileChanges },
    /// Legacy single-file proposal.
    Single {
        filename: PathBuf,
        #[serde(alias = "content")]
        code_content: String,
    },
}

impl Default for ChangeProposal {
    fn default() -> Self {
        Self::empty()
    }
}

impl ChangeProposal {
    /// An empty proposal, which is how generators signal failure.
    pub fn empty() -> Self {
        Self::Files {
            changes: FileChanges::new(),
        }
    }

    /// Builds a multi-file proposal from `(path, content)` pairs.
    pub fn from_files<P, C>(files: impl IntoIterator<Item = (P, C)>) -> Self
    where
        P: Into<PathBuf>,
        C: Into<String>,
    {
        Self::Files {
            changes: files
                .into_iter()
                .map(|(p, c)| (p.into(), c.into()))
                .collect(),
        }
    }

    /// Normalizes either shape into the ordered file mapping.
    pub fn into_files(self) -> FileChanges {
        match self {
            Self::Files { changes } => changes,
            Self::Single {
                filename,
                code_content,
            } => {
                let mut changes = FileChanges::with_capacity(1);
                changes.insert(filename, code_content);
                changes
            }
        }
    }
}

/// Rejects empty paths, absolute paths and anything with a `..` component.
pub fn validate_relative_path(path: &Path) -> Result<()> {
    if path.as_os_str().is_empty() {
        return Err(Error::InvalidPath(path.to_path_buf()));
    }

    let mut has_name = false;
    for component in path.components() {
        match component {
            Component::Normal(_) => has_name = true,
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(Error::InvalidPath(path.to_path_buf()));
            }
        }
    }

    if !has_name {
        return Err(Error::InvalidPath(path.to_path_buf()));
    }
    Ok(())
}

/// Joins a validated relative path onto the working directory root.
pub fn resolve_in(root: &Path, relative: &Path) -> Result<PathBuf> {
    validate_relative_path(relative)?;
    Ok(root.join(relative))
}
