//! Staged writes with guaranteed rollback.

use std::path::{Path, PathBuf};

use indexmap::IndexMap;

use crate::error::{Error, RestoreFailure, Result};

/// Records everything staging changed so it can be undone.
///
/// Call [`restore`](Self::restore) to roll back and learn about failures.
/// If the transaction is dropped without it (early return, cancelled future,
/// panic) the rollback still runs and failures are logged.
pub(crate) struct SandboxTransaction {
    root: PathBuf,
    /// Original bytes of files that existed before staging.
    backups: IndexMap<PathBuf, Vec<u8>>,
    /// Files that did not exist before staging.
    created: Vec<PathBuf>,
    /// Directories made for created files, outermost first.
    created_dirs: Vec<PathBuf>,
    finished: bool,
}

impl SandboxTransaction {
    /// Opens a transaction over `root`.
    pub(crate) fn begin(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            backups: IndexMap::new(),
            created: Vec::new(),
            created_dirs: Vec::new(),
            finished: false,
        }
    }

    /// Writes `content` to `relative`, remembering what was there before.
    ///
    /// The path must already be validated as relative.
    pub(crate) fn stage(&mut self, relative: &Path, content: &str) -> std::io::Result<()> {
        let target = self.root.join(relative);

        if !self.is_tracked(&target) {
            if let Some(parent) = target.parent() {
                self.create_missing_dirs(parent)?;
            }

            match std::fs::read(&target) {
                Ok(original) => {
                    self.backups.insert(target.clone(), original);
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    // recorded before the write so a partial write is still removed
                    self.created.push(target.clone());
                }
                Err(e) => return Err(e),
            }
        }

        tracing::debug!(path = ?target, bytes = content.len(), "staging file");
        std::fs::write(&target, content)
    }

    /// Number of files staged so far.
    pub(crate) fn staged_count(&self) -> usize {
        self.backups.len() + self.created.len()
    }

    /// Rolls back every staged change.
    ///
    /// Keeps going past individual failures and reports all of them.
    pub(crate) fn restore(mut self) -> Result<()> {
        let failures = self.rollback();
        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::Restore { failures })
        }
    }

    fn is_tracked(&self, target: &Path) -> bool {
        self.backups.contains_key(target) || self.created.iter().any(|p| p == target)
    }

    fn create_missing_dirs(&mut self, dir: &Path) -> std::io::Result<()> {
        let mut missing = Vec::new();
        let mut cursor = Some(dir);
        while let Some(d) = cursor {
            if d.exists() {
                break;
            }
            missing.push(d.to_path_buf());
            cursor = d.parent();
        }

        for d in missing.into_iter().rev() {
            match std::fs::create_dir(&d) {
                Ok(()) => self.created_dirs.push(d),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn rollback(&mut self) -> Vec<RestoreFailure> {
        if self.finished {
            return Vec::new();
        }
        self.finished = true;

        let mut failures = Vec::new();

        for (path, original) in self.backups.drain(..) {
            if let Err(e) = std::fs::write(&path, &original) {
                failures.push(RestoreFailure {
                    path,
                    reason: e.to_string(),
                });
            }
        }

        for path in self.created.drain(..).rev() {
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => failures.push(RestoreFailure {
                    path,
                    reason: e.to_string(),
                }),
            }
        }

        for dir in self.created_dirs.drain(..).rev() {
            match std::fs::remove_dir(&dir) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) if has_entries(&dir) => {
                    // the verifier left its own output behind
                    tracing::warn!(path = ?dir, error = %e, "created directory is not empty, leaving it");
                }
                Err(e) => failures.push(RestoreFailure {
                    path: dir,
                    reason: e.to_string(),
                }),
            }
        }

        if failures.is_empty() {
            tracing::debug!(root = ?self.root, "sandbox restored");
        }
        failures
    }
}

impl Drop for SandboxTransaction {
    fn drop(&mut self) {
        if !self.finished {
            for failure in self.rollback() {
                tracing::error!(
                    path = ?failure.path,
                    reason = %failure.reason,
                    "failed to restore file on drop"
                );
            }
        }
    }
}

fn has_entries(dir: &Path) -> bool {
    std::fs::read_dir(dir)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}
