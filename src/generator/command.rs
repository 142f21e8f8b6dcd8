//! Generator backed by an external program.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::changeset::ChangeProposal;

use super::{GenerationRequest, Generator};

/// Runs a program that reads a JSON [`GenerationRequest`] on stdin and prints
/// a JSON proposal on stdout.
///
/// Accepted output shapes:
/// - `{"changes": {"path": "content", ...}}`
/// - `{"filename": "path", "code_content": "content"}`
pub struct CommandGenerator {
    program: String,
    args: Vec<String>,
    working_dir: PathBuf,
}

impl CommandGenerator {
    /// Creates a generator that runs `program` from `working_dir`.
    pub fn new(program: impl Into<String>, working_dir: PathBuf) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir,
        }
    }

    /// Adds arguments passed to the program.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    async fn run(&self, request: &GenerationRequest) -> Result<ChangeProposal, String> {
        let payload =
            serde_json::to_vec(request).map_err(|e| format!("failed to encode request: {}", e))?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .current_dir(&self.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| format!("failed to spawn {}: {}", self.program, e))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(&payload)
                .await
                .map_err(|e| format!("failed to send request: {}", e))?;
            // closing stdin signals end of request
            drop(stdin);
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| format!("failed to wait for {}: {}", self.program, e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            ));
        }

        parse_proposal(&String::from_utf8_lossy(&output.stdout))
    }
}

#[async_trait]
impl Generator for CommandGenerator {
    async fn generate(&self, request: &GenerationRequest) -> ChangeProposal {
        tracing::info!(
            program = %self.program,
            retry = request.prior_error.is_some(),
            context_files = request.source_context.len(),
            "invoking generator"
        );

        match self.run(request).await {
            Ok(proposal) => proposal,
            Err(reason) => {
                tracing::warn!(program = %self.program, reason = %reason, "generator failed");
                ChangeProposal::empty()
            }
        }
    }

    fn name(&self) -> &str {
        &self.program
    }
}

/// Parses generator stdout. Tolerates leading chatter before the JSON object.
fn parse_proposal(stdout: &str) -> Result<ChangeProposal, String> {
    let trimmed = stdout.trim();
    if let Ok(proposal) = serde_json::from_str::<ChangeProposal>(trimmed) {
        return Ok(proposal);
    }

    let start = trimmed
        .find('{')
        .ok_or_else(|| "generator output contains no JSON object".to_string())?;
    let end = trimmed
        .rfind('}')
        .ok_or_else(|| "generator output contains no JSON object".to_string())?;
    if end < start {
        return Err("generator output contains no JSON object".to_string());
    }

    serde_json::from_str(&trimmed[start..=end])
        .map_err(|e| format!("failed to parse generator output: {}", e))
}
