//! Pipeline configuration and its validation.
//!
//! Configuration is read from a TOML or YAML file; every field has a default,
//! so an empty file (or no file) is a valid configuration.
//!
//! Environment overrides:
//! - `LUMA_MAX_ATTEMPTS=<n>` - retry budget
//! - `LUMA_VERBOSE_LOGS=1` - return verification output untruncated
//! - `LUMA_AUTO_APPROVE=1` - approve without prompting

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::verify::{default_rules, DispatchRule, VerifierDispatch};

/// Retry budget configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of generate-verify cycles.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_max_attempts() -> u32 {
    3
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
        }
    }
}

/// Sandbox and verification-output configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Wall-clock limit for one verification command.
    #[serde(default = "default_verify_timeout")]
    pub verify_timeout_secs: u64,
    /// Character limit for captured verification output.
    #[serde(default = "default_max_output_chars")]
    pub max_output_chars: usize,
    /// Return verification output without truncation.
    #[serde(default)]
    pub verbose_logs: bool,
}

fn default_verify_timeout() -> u64 {
    300
}

fn default_max_output_chars() -> usize {
    2000
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            verify_timeout_secs: default_verify_timeout(),
            max_output_chars: default_max_output_chars(),
            verbose_logs: false,
        }
    }
}

impl SandboxConfig {
    /// Returns the verification timeout as a Duration.
    pub fn verify_timeout(&self) -> Duration {
        Duration::from_secs(self.verify_timeout_secs)
    }

    /// Output limit, or `None` when verbose logs are on.
    pub fn output_limit(&self) -> Option<usize> {
        if self.verbose_logs {
            None
        } else {
            Some(self.max_output_chars)
        }
    }
}

/// Approval gate configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalConfig {
    /// The only reply that counts as approval (compared trimmed, case-insensitively).
    #[serde(default = "default_affirmative_token")]
    pub affirmative_token: String,
    /// Approve without asking.
    #[serde(default)]
    pub auto_approve: bool,
    /// Lines of each file shown in the approval preview.
    #[serde(default = "default_preview_lines")]
    pub preview_lines: usize,
}

fn default_affirmative_token() -> String {
    "y".to_string()
}

fn default_preview_lines() -> usize {
    10
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            affirmative_token: default_affirmative_token(),
            auto_approve: false,
            preview_lines: default_preview_lines(),
        }
    }
}

/// Verifier dispatch configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyConfig {
    /// Dispatch table in priority order. Empty means the built-in table.
    #[serde(default)]
    pub rules: Vec<DispatchRule>,
}

impl VerifyConfig {
    /// Builds the dispatcher for this configuration.
    pub fn dispatcher(&self) -> VerifierDispatch {
        if self.rules.is_empty() {
            VerifierDispatch::new(default_rules())
        } else {
            VerifierDispatch::new(self.rules.clone())
        }
    }
}

/// Top-level pipeline configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub approval: ApprovalConfig,
    #[serde(default)]
    pub verify: VerifyConfig,
}

impl PipelineConfig {
    /// Loads configuration from a `.toml`, `.yaml` or `.yml` file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml_str(&text),
            _ => Self::from_toml_str(&text),
        }
    }

    /// Parses TOML configuration.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config(format!("invalid TOML config: {}", e)))
    }

    /// Parses YAML configuration.
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        serde_yaml::from_str(text)
            .map_err(|e| Error::Config(format!("invalid YAML config: {}", e)))
    }

    /// Applies `LUMA_*` overrides from the process environment.
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Applies `LUMA_*` overrides from an arbitrary lookup.
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup("LUMA_MAX_ATTEMPTS") {
            self.retry.max_attempts = raw.trim().parse().map_err(|_| {
                Error::Config(format!("LUMA_MAX_ATTEMPTS must be an integer, got '{}'", raw))
            })?;
        }
        if let Some(raw) = lookup("LUMA_VERBOSE_LOGS") {
            self.sandbox.verbose_logs = is_truthy(&raw);
        }
        if let Some(raw) = lookup("LUMA_AUTO_APPROVE") {
            self.approval.auto_approve = is_truthy(&raw);
        }
        Ok(self)
    }
}

fn is_truthy(raw: &str) -> bool {
    raw == "1" || raw.eq_ignore_ascii_case("true")
}

/// Validation result containing all found issues.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    /// List of validation errors (fatal).
    pub errors: Vec<String>,
    /// List of validation warnings (non-fatal).
    pub warnings: Vec<String>,
}

impl ValidationResult {
    /// Returns true if validation passed (no errors).
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Adds an error to the result.
    pub fn add_error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    /// Adds a warning to the result.
    pub fn add_warning(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }

    /// Merges another validation result into this one.
    pub fn merge(&mut self, other: ValidationResult) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }

    /// Converts to a Result, failing if there are errors.
    pub fn into_result(self) -> Result<Vec<String>> {
        if self.is_valid() {
            Ok(self.warnings)
        } else {
            Err(Error::Config(self.errors.join("; ")))
        }
    }
}

/// Trait for validatable configuration types.
pub trait Validate {
    /// Validates the configuration and returns any issues found.
    fn validate(&self) -> ValidationResult;
}

impl Validate for RetryConfig {
    fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        if self.max_attempts == 0 {
            result.add_error("max_attempts must be at least 1");
        }

        if self.max_attempts > 10 {
            result.add_warning("max_attempts > 10 may lead to excessive generator calls");
        }

        result
    }
}

impl Validate for SandboxConfig {
    fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        if self.verify_timeout_secs == 0 {
            result.add_error("verify_timeout_secs must be greater than zero");
        }

        if self.verify_timeout_secs > 3600 {
            result.add_warning("verify_timeout_secs over 1 hour may indicate a misconfiguration");
        }

        if self.max_output_chars == 0 && !self.verbose_logs {
            result.add_warning("max_output_chars = 0 hides all verification output");
        }

        result
    }
}

impl Validate for ApprovalConfig {
    fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        if self.affirmative_token.trim().is_empty() {
            result.add_error("affirmative_token cannot be empty");
        }

        if self.auto_approve {
            result.add_warning("auto_approve is on - changes will be committed without review");
        }

        result
    }
}

impl Validate for VerifyConfig {
    fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        for rule in &self.rules {
            if rule.command.is_empty() {
                result.add_error(format!("dispatch rule '{}' has an empty command", rule.name));
            }
            if rule.extensions.is_empty() && rule.file_names.is_empty() {
                result.add_warning(format!(
                    "dispatch rule '{}' has no extensions or file names and never matches",
                    rule.name
                ));
            }
        }

        result
    }
}

impl Validate for PipelineConfig {
    fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();
        result.merge(self.retry.validate());
        result.merge(self.sandbox.validate());
        result.merge(self.approval.validate());
        result.merge(self.verify.validate());
        result
    }
}
