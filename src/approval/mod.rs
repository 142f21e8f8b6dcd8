//! Human sign-off before anything is written for good.
//!
//! The gate writes a draft next to each target, hands an [`ApprovalRequest`]
//! to an [`ApprovalPrompt`], and removes the drafts again whatever the answer.
//! Only the configured affirmative token approves; everything else rejects.

mod drafts;
mod prompt;

pub use drafts::draft_path_for;
pub use prompt::{ApprovalPrompt, AutoApprove, StdinPrompt};

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::changeset::{resolve_in, ChangeSet};
use crate::config::ApprovalConfig;

use drafts::DraftSet;

/// One file as presented for review.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilePreview {
    /// Target path, relative to the working directory.
    pub path: PathBuf,
    /// Where the full draft can be inspected, if one was written.
    pub draft_path: Option<PathBuf>,
    /// Whether the target already exists (overwrite vs. create).
    pub target_exists: bool,
    /// First lines of the proposed content.
    pub preview: String,
    /// Line count of the proposed content.
    pub total_lines: usize,
}

/// Everything the human sees before deciding.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub files: Vec<FilePreview>,
    /// Retries so far.
    pub iteration: u32,
    /// Output of the last failed verification when the retry budget ran out.
    pub last_error: Option<String>,
}

impl ApprovalRequest {
    /// Renders the request for a terminal.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "\nProposed changes ({} file(s)):", self.files.len());
        for file in &self.files {
            let action = if file.target_exists { "modify" } else { "create" };
            let _ = writeln!(
                out,
                "\n--- {} ({}, {} lines) ---",
                file.path.display(),
                action,
                file.total_lines
            );
            if let Some(draft) = &file.draft_path {
                let _ = writeln!(out, "draft: {}", draft.display());
            }
            let _ = writeln!(out, "{}", file.preview);
        }
        if let Some(error) = &self.last_error {
            let _ = writeln!(
                out,
                "\nWARNING: verification still failing after {} retries:\n{}",
                self.iteration, error
            );
        }
        out
    }
}

/// Returns true only if `reply` is the affirmative token, ignoring
/// surrounding whitespace and case.
pub fn parse_decision(reply: Option<&str>, affirmative_token: &str) -> bool {
    let token = affirmative_token.trim();
    match reply {
        Some(reply) => !token.is_empty() && reply.trim().eq_ignore_ascii_case(token),
        None => false,
    }
}

/// Presents a change set for approval and records the decision.
pub struct ApprovalGate {
    root: PathBuf,
    config: ApprovalConfig,
}

impl ApprovalGate {
    pub fn new(root: PathBuf, config: ApprovalConfig) -> Self {
        Self { root, config }
    }

    /// Asks `prompt` about `changes`. Sets `changes.approved` and returns it.
    ///
    /// Drafts never outlive this call. A change set that is empty or holds an
    /// unsafe path is rejected without asking.
    pub async fn review(&self, changes: &mut ChangeSet, prompt: &dyn ApprovalPrompt) -> bool {
        let approved = self.decide(changes, prompt).await;
        changes.approved = Some(approved);
        tracing::info!(approved, files = changes.len(), "approval decision recorded");
        approved
    }

    async fn decide(&self, changes: &ChangeSet, prompt: &dyn ApprovalPrompt) -> bool {
        if changes.is_empty() {
            tracing::warn!("nothing to approve, rejecting");
            return false;
        }
        if let Err(e) = changes.validate_paths() {
            tracing::warn!(error = %e, "change set is unsafe to commit, rejecting");
            return false;
        }

        let mut drafts = DraftSet::new();
        let request = match self.prepare(changes, &mut drafts) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!(error = %e, "failed to write drafts, rejecting");
                drafts.cleanup();
                return false;
            }
        };

        let reply = match prompt.ask(&request).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(error = %e, "approval prompt failed, rejecting");
                None
            }
        };
        drafts.cleanup();

        parse_decision(reply.as_deref(), &self.config.affirmative_token)
    }

    fn prepare(&self, changes: &ChangeSet, drafts: &mut DraftSet) -> crate::Result<ApprovalRequest> {
        // checked up front: a draft written below may sit at another entry's target
        let targets = changes
            .paths()
            .map(|path| {
                resolve_in(&self.root, path).map(|target| {
                    let exists = target.exists();
                    (target, exists)
                })
            })
            .collect::<crate::Result<Vec<_>>>()?;

        let mut files = Vec::with_capacity(changes.len());
        for ((path, content), (target, target_exists)) in changes.files().iter().zip(targets) {
            let draft_path = drafts
                .write(&target, content)?
                .map(|d| self.relative(&d));
            files.push(FilePreview {
                path: path.clone(),
                draft_path,
                target_exists,
                preview: preview(content, self.config.preview_lines),
                total_lines: content.lines().count(),
            });
        }

        Ok(ApprovalRequest {
            files,
            iteration: changes.iteration,
            last_error: changes.last_error.clone(),
        })
    }

    fn relative(&self, path: &Path) -> PathBuf {
        path.strip_prefix(&self.root)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| path.to_path_buf())
    }
}

fn preview(content: &str, lines: usize) -> String {
    let mut shown: Vec<&str> = content.lines().take(lines).collect();
    if content.lines().count() > lines {
        shown.push("...");
    }
    shown.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Replies with a fixed answer and remembers what it was shown.
    struct Scripted {
        reply: std::io::Result<Option<String>>,
        seen: Mutex<Vec<ApprovalRequest>>,
        root: PathBuf,
        drafts_seen: Mutex<Vec<bool>>,
    }

    impl Scripted {
        fn new(root: &Path, reply: Option<&str>) -> Self {
            Self {
                reply: Ok(reply.map(str::to_string)),
                seen: Mutex::new(Vec::new()),
                root: root.to_path_buf(),
                drafts_seen: Mutex::new(Vec::new()),
            }
        }

        fn failing(root: &Path) -> Self {
            Self {
                reply: Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "tty gone")),
                ..Self::new(root, None)
            }
        }
    }

    #[async_trait]
    impl ApprovalPrompt for Scripted {
        async fn ask(&self, request: &ApprovalRequest) -> std::io::Result<Option<String>> {
            self.seen.lock().unwrap().push(request.clone());
            for file in &request.files {
                let exists = file
                    .draft_path
                    .as_ref()
                    .is_some_and(|d| self.root.join(d).exists());
                self.drafts_seen.lock().unwrap().push(exists);
            }
            match &self.reply {
                Ok(reply) => Ok(reply.clone()),
                Err(e) => Err(std::io::Error::new(e.kind(), e.to_string())),
            }
        }
    }

    fn gate(root: &Path) -> ApprovalGate {
        ApprovalGate::new(root.to_path_buf(), ApprovalConfig::default())
    }

    fn entries(root: &Path) -> usize {
        std::fs::read_dir(root).unwrap().count()
    }

    #[test]
    fn only_affirmative_token_approves() {
        assert!(parse_decision(Some("y"), "y"));
        assert!(parse_decision(Some("  Y \n"), "y"));
        for reply in ["n", "", "yes", "yy", "no", " ", "ok"] {
            assert!(!parse_decision(Some(reply), "y"), "{reply:?} must reject");
        }
        assert!(!parse_decision(None, "y"));
        assert!(!parse_decision(Some(""), "  "));
    }

    #[test]
    fn custom_token_is_honoured() {
        assert!(parse_decision(Some("APPROVE"), "approve"));
        assert!(!parse_decision(Some("y"), "approve"));
    }

    #[tokio::test]
    async fn approval_sets_flag_and_leaves_no_drafts() {
        let temp = TempDir::new().unwrap();
        let prompt = Scripted::new(temp.path(), Some("y"));
        let mut changes = ChangeSet::new().with_file("client/logic.cpp", "int f();");

        assert!(gate(temp.path()).review(&mut changes, &prompt).await);
        assert_eq!(changes.approved, Some(true));
        assert_eq!(*prompt.drafts_seen.lock().unwrap(), vec![true]);
        assert_eq!(entries(temp.path()), 0);
    }

    #[tokio::test]
    async fn target_is_never_written_during_review() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("main.go"), "OLD").unwrap();
        let prompt = Scripted::new(temp.path(), Some("y"));
        let mut changes = ChangeSet::new().with_file("main.go", "NEW");

        gate(temp.path()).review(&mut changes, &prompt).await;

        assert_eq!(std::fs::read_to_string(temp.path().join("main.go")).unwrap(), "OLD");
        let seen = prompt.seen.lock().unwrap();
        assert!(seen[0].files[0].target_exists);
        assert_eq!(
            seen[0].files[0].draft_path.as_deref(),
            Some(Path::new("main.go.draft.go"))
        );
    }

    #[tokio::test]
    async fn anything_but_the_token_rejects() {
        let temp = TempDir::new().unwrap();
        for reply in [Some("n"), Some(""), Some("sure"), None] {
            let prompt = Scripted::new(temp.path(), reply);
            let mut changes = ChangeSet::new().with_file("a.txt", "x");
            assert!(!gate(temp.path()).review(&mut changes, &prompt).await);
            assert_eq!(changes.approved, Some(false));
        }
        assert_eq!(entries(temp.path()), 0);
    }

    #[tokio::test]
    async fn prompt_error_rejects() {
        let temp = TempDir::new().unwrap();
        let prompt = Scripted::failing(temp.path());
        let mut changes = ChangeSet::new().with_file("a.txt", "x");

        assert!(!gate(temp.path()).review(&mut changes, &prompt).await);
        assert_eq!(entries(temp.path()), 0);
    }

    #[tokio::test]
    async fn reviewing_twice_leaves_nothing_behind() {
        let temp = TempDir::new().unwrap();
        let mut changes = ChangeSet::new()
            .with_file("a.txt", "x")
            .with_file("deep/dir/b.rs", "fn b() {}");

        for _ in 0..2 {
            let prompt = Scripted::new(temp.path(), Some("n"));
            gate(temp.path()).review(&mut changes, &prompt).await;
        }
        assert_eq!(entries(temp.path()), 0);
    }

    #[tokio::test]
    async fn empty_or_unsafe_change_sets_are_rejected_without_asking() {
        let temp = TempDir::new().unwrap();
        let prompt = Scripted::new(temp.path(), Some("y"));

        let mut empty = ChangeSet::new();
        assert!(!gate(temp.path()).review(&mut empty, &prompt).await);

        let mut escaping = ChangeSet::new().with_file("../evil.sh", "rm -rf /");
        assert!(!gate(temp.path()).review(&mut escaping, &prompt).await);

        assert!(prompt.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn target_existence_ignores_drafts_of_earlier_entries() {
        let temp = TempDir::new().unwrap();
        let prompt = Scripted::new(temp.path(), Some("n"));
        let mut changes = ChangeSet::new()
            .with_file("a.txt", "x")
            .with_file("a.txt.draft.txt", "y");

        gate(temp.path()).review(&mut changes, &prompt).await;

        let seen = prompt.seen.lock().unwrap();
        let exists: Vec<_> = seen[0].files.iter().map(|f| f.target_exists).collect();
        assert_eq!(exists, vec![false, false]);
        assert_eq!(entries(temp.path()), 0);
    }

    #[tokio::test]
    async fn request_carries_failure_context_and_preview() {
        let temp = TempDir::new().unwrap();
        let prompt = Scripted::new(temp.path(), Some("n"));
        let content = (1..=15).map(|i| format!("line {i}")).collect::<Vec<_>>().join("\n");
        let mut changes = ChangeSet::new().with_file("a.txt", content);
        changes.iteration = 2;
        changes.last_error = Some("undefined: foo".to_string());

        gate(temp.path()).review(&mut changes, &prompt).await;

        let seen = prompt.seen.lock().unwrap();
        let request = &seen[0];
        assert_eq!(request.iteration, 2);
        assert_eq!(request.last_error.as_deref(), Some("undefined: foo"));
        assert_eq!(request.files[0].total_lines, 15);
        assert!(!request.files[0].target_exists);
        assert!(request.files[0].preview.starts_with("line 1\n"));
        assert!(request.files[0].preview.ends_with("line 10\n..."));
        assert!(request.render().contains("undefined: foo"));
    }
}
