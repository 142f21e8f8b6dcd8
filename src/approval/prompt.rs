//! Human interfaces for the approval gate.

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use super::ApprovalRequest;

/// Asks a human (or a stand-in) whether to commit.
///
/// Returns the raw reply, or `None` when input is closed.
#[async_trait]
pub trait ApprovalPrompt: Send + Sync {
    async fn ask(&self, request: &ApprovalRequest) -> std::io::Result<Option<String>>;
}

/// Prompts on the terminal and reads one line from stdin.
#[derive(Debug, Clone)]
pub struct StdinPrompt {
    question: String,
}

impl Default for StdinPrompt {
    fn default() -> Self {
        Self::new()
    }
}

impl StdinPrompt {
    pub fn new() -> Self {
        Self {
            question: "Apply these changes? (y/n): ".to_string(),
        }
    }

    /// Overrides the question printed after the summary.
    pub fn with_question(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
        }
    }
}

#[async_trait]
impl ApprovalPrompt for StdinPrompt {
    async fn ask(&self, request: &ApprovalRequest) -> std::io::Result<Option<String>> {
        let mut stdout = tokio::io::stdout();
        stdout.write_all(request.render().as_bytes()).await?;
        stdout.write_all(self.question.as_bytes()).await?;
        stdout.flush().await?;

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        lines.next_line().await
    }
}

/// Answers every request with a fixed reply. Used for unattended runs.
#[derive(Debug, Clone)]
pub struct AutoApprove {
    reply: String,
}

impl AutoApprove {
    /// Replies with `token`, which should be the configured affirmative token.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            reply: token.into(),
        }
    }
}

#[async_trait]
impl ApprovalPrompt for AutoApprove {
    async fn ask(&self, request: &ApprovalRequest) -> std::io::Result<Option<String>> {
        tracing::info!(files = request.files.len(), "auto-approving change set");
        Ok(Some(self.reply.clone()))
    }
}
