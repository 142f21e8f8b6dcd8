//! Durable write-through of approved changes.

use std::io::Write;
use std::path::{Path, PathBuf};

use crate::changeset::{resolve_in, ChangeSet};
use crate::error::{Error, Result};

/// Persists an approved change set. Nothing is rolled back afterwards.
pub trait CommitSink: Send + Sync {
    /// Writes every file and returns the relative paths written, in order.
    fn commit(&self, changes: &ChangeSet) -> Result<Vec<PathBuf>>;
}

/// Writes files under a working directory root.
///
/// Each file goes to a sibling temporary file first, is synced, then renamed
/// over the target so a reader never sees a half-written file. An existing
/// target keeps its permissions, and a symlink is written through to its
/// destination.
#[derive(Debug, Clone)]
pub struct FsCommitSink {
    root: PathBuf,
}

impl FsCommitSink {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn write_one(&self, relative: &Path, content: &str) -> Result<()> {
        let wrap = |source: std::io::Error| Error::Commit {
            path: relative.to_path_buf(),
            source,
        };
        // a symlinked target is written through, leaving the link in place
        let target = follow_links(&resolve_in(&self.root, relative)?).map_err(wrap)?;

        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(wrap)?;
        }

        let permissions = match std::fs::metadata(&target) {
            Ok(meta) => Some(meta.permissions()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(wrap(e)),
        };

        let tmp = temp_sibling(&target);
        let written = (|| {
            let mut file = std::fs::File::create(&tmp)?;
            file.write_all(content.as_bytes())?;
            if let Some(permissions) = permissions {
                file.set_permissions(permissions)?;
            }
            file.sync_all()?;
            std::fs::rename(&tmp, &target)
        })();

        if let Err(e) = written {
            let _ = std::fs::remove_file(&tmp);
            return Err(wrap(e));
        }
        Ok(())
    }
}

impl CommitSink for FsCommitSink {
    fn commit(&self, changes: &ChangeSet) -> Result<Vec<PathBuf>> {
        changes.validate_paths()?;

        let mut committed = Vec::with_capacity(changes.len());
        for (path, content) in changes.files() {
            self.write_one(path, content)?;
            tracing::info!(path = ?path, bytes = content.len(), "committed file");
            committed.push(path.clone());
        }
        Ok(committed)
    }
}

/// Maximum symlink hops before giving up, matching the usual `ELOOP` limit.
const MAX_LINK_HOPS: usize = 40;

/// Resolves `path` through any chain of symlinks. A dangling link resolves to
/// the path it names, so the write creates the link's destination.
fn follow_links(path: &Path) -> std::io::Result<PathBuf> {
    let mut current = path.to_path_buf();
    for _ in 0..MAX_LINK_HOPS {
        match std::fs::symlink_metadata(&current) {
            Ok(meta) if meta.file_type().is_symlink() => {
                let dest = std::fs::read_link(&current)?;
                current = match current.parent() {
                    Some(parent) if dest.is_relative() => parent.join(dest),
                    _ => dest,
                };
            }
            Ok(_) => return Ok(current),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(current),
            Err(e) => return Err(e),
        }
    }
    Err(std::io::Error::other(format!(
        "too many levels of symbolic links: {}",
        path.display()
    )))
}

fn temp_sibling(target: &Path) -> PathBuf {
    let mut name = std::ffi::OsString::from(".");
    name.push(target.file_name().unwrap_or_default());
    name.push(format!(".{}.tmp", uuid::Uuid::new_v4().simple()));
    target.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn commit_writes_files_and_creates_directories() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("server.go"), "OLD").unwrap();
        let changes = ChangeSet::new()
            .with_file("server.go", "NEW")
            .with_file("client/src/logic.cpp", "int f();");

        let committed = FsCommitSink::new(temp.path().to_path_buf())
            .commit(&changes)
            .unwrap();

        assert_eq!(
            committed,
            vec![PathBuf::from("server.go"), PathBuf::from("client/src/logic.cpp")]
        );
        assert_eq!(std::fs::read_to_string(temp.path().join("server.go")).unwrap(), "NEW");
        assert_eq!(
            std::fs::read_to_string(temp.path().join("client/src/logic.cpp")).unwrap(),
            "int f();"
        );
    }

    #[test]
    fn commit_leaves_no_temp_files() {
        let temp = TempDir::new().unwrap();
        let changes = ChangeSet::new().with_file("a.txt", "x");

        FsCommitSink::new(temp.path().to_path_buf())
            .commit(&changes)
            .unwrap();

        let names: Vec<_> = std::fs::read_dir(temp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("a.txt")]);
    }

    #[test]
    fn commit_rejects_escaping_paths_before_writing() {
        let temp = TempDir::new().unwrap();
        let inner = temp.path().join("work");
        std::fs::create_dir(&inner).unwrap();
        let changes = ChangeSet::new()
            .with_file("ok.txt", "fine")
            .with_file("../escape.txt", "bad");

        let err = FsCommitSink::new(inner.clone()).commit(&changes).unwrap_err();

        assert!(matches!(err, Error::InvalidPath(_)));
        assert!(!inner.join("ok.txt").exists());
        assert!(!temp.path().join("escape.txt").exists());
    }

    #[cfg(unix)]
    #[test]
    fn commit_keeps_existing_file_mode() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let script = temp.path().join("build.sh");
        std::fs::write(&script, "#!/bin/sh\necho old\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        let changes = ChangeSet::new().with_file("build.sh", "#!/bin/sh\necho new\n");

        FsCommitSink::new(temp.path().to_path_buf())
            .commit(&changes)
            .unwrap();

        let mode = std::fs::metadata(&script).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
        assert_eq!(std::fs::read_to_string(&script).unwrap(), "#!/bin/sh\necho new\n");
    }

    #[cfg(unix)]
    #[test]
    fn commit_writes_through_symlinks() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir(temp.path().join("shared")).unwrap();
        std::fs::write(temp.path().join("shared/config.go"), "OLD").unwrap();
        std::os::unix::fs::symlink("shared/config.go", temp.path().join("config.go")).unwrap();
        let changes = ChangeSet::new().with_file("config.go", "NEW");

        FsCommitSink::new(temp.path().to_path_buf())
            .commit(&changes)
            .unwrap();

        let link = temp.path().join("config.go");
        assert!(std::fs::symlink_metadata(&link).unwrap().file_type().is_symlink());
        assert_eq!(
            std::fs::read_to_string(temp.path().join("shared/config.go")).unwrap(),
            "NEW"
        );
        assert_eq!(std::fs::read_to_string(&link).unwrap(), "NEW");
    }

    #[cfg(unix)]
    #[test]
    fn commit_through_dangling_symlink_creates_destination() {
        let temp = TempDir::new().unwrap();
        std::os::unix::fs::symlink("real/app.py", temp.path().join("app.py")).unwrap();
        let changes = ChangeSet::new().with_file("app.py", "print(1)");

        FsCommitSink::new(temp.path().to_path_buf())
            .commit(&changes)
            .unwrap();

        assert_eq!(
            std::fs::read_to_string(temp.path().join("real/app.py")).unwrap(),
            "print(1)"
        );
        assert!(std::fs::symlink_metadata(temp.path().join("app.py"))
            .unwrap()
            .file_type()
            .is_symlink());
    }

    #[test]
    fn commit_onto_directory_is_a_commit_error() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("taken/inner")).unwrap();
        let changes = ChangeSet::new().with_file("taken", "x");

        let err = FsCommitSink::new(temp.path().to_path_buf())
            .commit(&changes)
            .unwrap_err();

        match err {
            Error::Commit { path, .. } => assert_eq!(path, PathBuf::from("taken")),
            other => panic!("expected Commit error, got {:?}", other),
        }
        assert_eq!(std::fs::read_dir(temp.path()).unwrap().count(), 1);
    }
}
