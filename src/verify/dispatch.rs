//! Table-driven choice of the verification command.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::changeset::ChangeSet;

use super::{ProcessSpec, VerifyCommand};

/// Placeholder argument replaced by the matching changed paths.
pub const FILES_PLACEHOLDER: &str = "{files}";

/// One row of the dispatch table: a path predicate and the command it selects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchRule {
    /// Rule name, reported as the command label.
    pub name: String,
    /// File extensions (without the leading dot) that select this rule.
    #[serde(default)]
    pub extensions: Vec<String>,
    /// Exact file names that select this rule (e.g. `CMakeLists.txt`).
    #[serde(default)]
    pub file_names: Vec<String>,
    /// Command template. `{files}` expands to the matching paths.
    pub command: Vec<String>,
    /// Build manifest whose directory becomes the working directory.
    /// `None` runs from the workflow root.
    #[serde(default)]
    pub manifest: Option<String>,
}

impl DispatchRule {
    /// Creates a rule that runs from the workflow root.
    pub fn new(name: impl Into<String>, command: &[&str]) -> Self {
        Self {
            name: name.into(),
            extensions: Vec::new(),
            file_names: Vec::new(),
            command: command.iter().map(|s| s.to_string()).collect(),
            manifest: None,
        }
    }

    /// Adds extensions that select this rule.
    pub fn with_extensions(mut self, extensions: &[&str]) -> Self {
        self.extensions
            .extend(extensions.iter().map(|e| e.trim_start_matches('.').to_string()));
        self
    }

    /// Adds exact file names that select this rule.
    pub fn with_file_names(mut self, names: &[&str]) -> Self {
        self.file_names.extend(names.iter().map(|n| n.to_string()));
        self
    }

    /// Runs the command from the directory holding `manifest`.
    pub fn in_manifest_dir(mut self, manifest: impl Into<String>) -> Self {
        self.manifest = Some(manifest.into());
        self
    }

    /// Returns true if `path` selects this rule.
    pub fn matches(&self, path: &Path) -> bool {
        let by_extension = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| {
                self.extensions
                    .iter()
                    .any(|want| want.trim_start_matches('.') == ext)
            });
        if by_extension {
            return true;
        }

        path.file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|name| self.file_names.iter().any(|want| want == name))
    }

    fn expand(&self, matched: &[&Path]) -> Vec<String> {
        let mut argv = Vec::with_capacity(self.command.len() + matched.len());
        for arg in &self.command {
            if arg == FILES_PLACEHOLDER {
                argv.extend(matched.iter().map(|p| p.to_string_lossy().into_owned()));
            } else {
                argv.push(arg.clone());
            }
        }
        argv
    }
}

/// The built-in table, tried in order.
pub fn default_rules() -> Vec<DispatchRule> {
    vec![
        DispatchRule::new("go", &["go", "test", "./..."]).with_extensions(&["go"]),
        DispatchRule::new(
            "cmake",
            &["sh", "-c", "mkdir -p build && cd build && cmake .. && make"],
        )
        .with_extensions(&["cpp", "cc", "cxx", "h", "hpp"])
        .with_file_names(&["CMakeLists.txt"])
        .in_manifest_dir("CMakeLists.txt"),
        DispatchRule::new("cargo", &["cargo", "check"])
            .with_extensions(&["rs"])
            .with_file_names(&["Cargo.toml"])
            .in_manifest_dir("Cargo.toml"),
        DispatchRule::new("python", &["python3", "-m", "py_compile", FILES_PLACEHOLDER])
            .with_extensions(&["py"]),
        DispatchRule::new("typecheck", &["npm", "run", "typecheck"])
            .with_extensions(&["ts", "vue"])
            .in_manifest_dir("package.json"),
    ]
}

/// Chooses the verification command for a change set.
///
/// First matching rule wins; no match yields a passing no-op.
#[derive(Debug, Clone)]
pub struct VerifierDispatch {
    rules: Vec<DispatchRule>,
}

impl Default for VerifierDispatch {
    fn default() -> Self {
        Self::new(default_rules())
    }
}

impl VerifierDispatch {
    /// Creates a dispatcher over the given rules.
    pub fn new(rules: Vec<DispatchRule>) -> Self {
        Self { rules }
    }

    /// Returns the rules in priority order.
    pub fn rules(&self) -> &[DispatchRule] {
        &self.rules
    }

    /// Picks the command for `changes`, resolving manifests under `root`.
    pub fn dispatch(&self, root: &Path, changes: &ChangeSet) -> VerifyCommand {
        for rule in &self.rules {
            let matched: Vec<&Path> = changes.paths().filter(|p| rule.matches(p)).collect();
            let Some(first) = matched.first() else {
                continue;
            };

            let working_dir = match &rule.manifest {
                None => PathBuf::new(),
                Some(manifest) => match locate_manifest(root, changes, first, manifest) {
                    Some(dir) => dir,
                    None => {
                        tracing::warn!(
                            rule = %rule.name,
                            manifest = %manifest,
                            "no build manifest found, skipping verification"
                        );
                        return VerifyCommand::Noop {
                            reason: format!("{} matched but no {} was found", rule.name, manifest),
                        };
                    }
                },
            };

            tracing::debug!(
                rule = %rule.name,
                matched = matched.len(),
                working_dir = ?working_dir,
                "dispatched verifier"
            );

            return VerifyCommand::Process(ProcessSpec {
                label: rule.name.clone(),
                argv: rule.expand(&matched),
                working_dir,
            });
        }

        VerifyCommand::Noop {
            reason: "no verifier matches the changed files".to_string(),
        }
    }
}

/// Finds the directory (relative to `root`) that holds `manifest`.
///
/// A manifest in the change set wins; otherwise the working tree is searched
/// upward from the first matching file's directory.
fn locate_manifest(
    root: &Path,
    changes: &ChangeSet,
    first: &Path,
    manifest: &str,
) -> Option<PathBuf> {
    let staged = changes
        .paths()
        .find(|p| p.file_name().and_then(|n| n.to_str()) == Some(manifest));
    if let Some(path) = staged {
        return Some(path.parent().map(Path::to_path_buf).unwrap_or_default());
    }

    let mut dir = first.parent().map(Path::to_path_buf).unwrap_or_default();
    loop {
        if root.join(&dir).join(manifest).is_file() {
            return Some(dir);
        }
        if !dir.pop() {
            return None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn process(command: VerifyCommand) -> ProcessSpec {
        match command {
            VerifyCommand::Process(spec) => spec,
            other => panic!("expected process command, got {:?}", other),
        }
    }

    #[test]
    fn go_files_run_go_test_from_root() {
        let temp = TempDir::new().unwrap();
        let changes = ChangeSet::new().with_file("server/server.go", "package server");

        let spec = process(VerifierDispatch::default().dispatch(temp.path(), &changes));

        assert_eq!(spec.label, "go");
        assert_eq!(spec.argv, vec!["go", "test", "./..."]);
        assert_eq!(spec.working_dir, PathBuf::new());
    }

    #[test]
    fn unknown_extensions_dispatch_to_noop() {
        let temp = TempDir::new().unwrap();
        let changes = ChangeSet::new()
            .with_file("notes.txt", "hello")
            .with_file("README.md", "# hi");

        let command = VerifierDispatch::default().dispatch(temp.path(), &changes);
        assert!(matches!(command, VerifyCommand::Noop { .. }));
    }

    #[test]
    fn first_matching_rule_wins() {
        let temp = TempDir::new().unwrap();
        // python appears first in the change set but go is earlier in the table
        let changes = ChangeSet::new()
            .with_file("tool.py", "print(1)")
            .with_file("main.go", "package main");

        let spec = process(VerifierDispatch::default().dispatch(temp.path(), &changes));
        assert_eq!(spec.label, "go");
    }

    #[test]
    fn cmake_runs_in_directory_of_staged_manifest() {
        let temp = TempDir::new().unwrap();
        let changes = ChangeSet::new()
            .with_file("client/src/logic.cpp", "int f();")
            .with_file("client/CMakeLists.txt", "project(client)");

        let spec = process(VerifierDispatch::default().dispatch(temp.path(), &changes));

        assert_eq!(spec.label, "cmake");
        assert_eq!(spec.working_dir, PathBuf::from("client"));
        assert_eq!(spec.argv[0], "sh");
    }

    #[test]
    fn cmake_finds_manifest_on_disk_walking_upward() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("client/src/game")).unwrap();
        std::fs::write(temp.path().join("client/CMakeLists.txt"), "project(client)").unwrap();
        let changes = ChangeSet::new().with_file("client/src/game/board.cpp", "int b;");

        let spec = process(VerifierDispatch::default().dispatch(temp.path(), &changes));
        assert_eq!(spec.working_dir, PathBuf::from("client"));
    }

    #[test]
    fn missing_manifest_skips_verification() {
        let temp = TempDir::new().unwrap();
        let changes = ChangeSet::new().with_file("main.cpp", "int main(){}");

        match VerifierDispatch::default().dispatch(temp.path(), &changes) {
            VerifyCommand::Noop { reason } => assert!(reason.contains("CMakeLists.txt")),
            other => panic!("expected noop, got {:?}", other),
        }
    }

    #[test]
    fn files_placeholder_expands_to_matching_paths() {
        let temp = TempDir::new().unwrap();
        let changes = ChangeSet::new()
            .with_file("a.py", "x = 1")
            .with_file("notes.txt", "n")
            .with_file("pkg/b.py", "y = 2");

        let spec = process(VerifierDispatch::default().dispatch(temp.path(), &changes));
        assert_eq!(
            spec.argv,
            vec!["python3", "-m", "py_compile", "a.py", "pkg/b.py"]
        );
    }

    #[test]
    fn custom_table_adds_languages_without_code_changes() {
        let temp = TempDir::new().unwrap();
        let dispatch = VerifierDispatch::new(vec![DispatchRule::new(
            "zig",
            &["zig", "build", "test"],
        )
        .with_extensions(&[".zig"])]);
        let changes = ChangeSet::new().with_file("src/main.zig", "const std = @import(\"std\");");

        let spec = process(dispatch.dispatch(temp.path(), &changes));
        assert_eq!(spec.argv, vec!["zig", "build", "test"]);
    }

    #[test]
    fn empty_change_set_dispatches_to_noop() {
        let temp = TempDir::new().unwrap();
        let command = VerifierDispatch::default().dispatch(temp.path(), &ChangeSet::new());
        assert!(matches!(command, VerifyCommand::Noop { .. }));
    }

    #[test]
    fn rule_deserializes_from_toml() {
        let rule: DispatchRule = toml::from_str(
            r#"
            name = "cargo"
            extensions = ["rs"]
            command = ["cargo", "test"]
            manifest = "Cargo.toml"
            "#,
        )
        .unwrap();

        assert_eq!(rule.name, "cargo");
        assert!(rule.file_names.is_empty());
        assert_eq!(rule.manifest.as_deref(), Some("Cargo.toml"));
        assert!(rule.matches(Path::new("src/lib.rs")));
    }
}
