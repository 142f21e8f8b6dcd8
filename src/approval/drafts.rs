//! Draft preview files written next to their targets during approval.

use std::path::{Path, PathBuf};

/// Returns the draft path for `target`: `logic.cpp` becomes `logic.cpp.draft.cpp`,
/// `Makefile` becomes `Makefile.draft`.
pub fn draft_path_for(target: &Path) -> PathBuf {
    let mut name = target
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".draft");
    if let Some(ext) = target.extension() {
        name.push(".");
        name.push(ext);
    }
    target.with_file_name(name)
}

/// Draft files written for one approval round.
///
/// Cleaned up explicitly via [`cleanup`](Self::cleanup), or on drop.
#[derive(Debug, Default)]
pub(crate) struct DraftSet {
    written: Vec<PathBuf>,
    created_dirs: Vec<PathBuf>,
    cleaned_up: bool,
}

impl DraftSet {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Writes the draft for `target` (absolute). Returns the draft path, or
    /// `None` if a file already sits at the draft path and was left alone.
    pub(crate) fn write(&mut self, target: &Path, content: &str) -> std::io::Result<Option<PathBuf>> {
        let draft = draft_path_for(target);
        if draft.exists() {
            tracing::warn!(path = ?draft, "draft path already taken, not overwriting");
            return Ok(None);
        }

        if let Some(parent) = draft.parent() {
            self.create_missing_dirs(parent)?;
        }

        self.written.push(draft.clone());
        std::fs::write(&draft, content)?;
        tracing::debug!(path = ?draft, "wrote draft");
        Ok(Some(draft))
    }

    /// Removes every draft and every directory created for them. Safe to call twice.
    pub(crate) fn cleanup(&mut self) {
        if self.cleaned_up {
            return;
        }
        self.cleaned_up = true;

        for draft in self.written.drain(..) {
            match std::fs::remove_file(&draft) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => tracing::error!(path = ?draft, error = %e, "failed to remove draft"),
            }
        }

        for dir in self.created_dirs.drain(..).rev() {
            if let Err(e) = std::fs::remove_dir(&dir) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = ?dir, error = %e, "failed to remove draft directory");
                }
            }
        }
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
            std::fs::create_dir(&d)?;
            self.created_dirs.push(d);
        }
        Ok(())
    }
}

impl Drop for DraftSet {
    fn drop(&mut self) {
        self.cleanup();
    }
}
