//! Linter invocation and output normalization.
//!
//! The configured executable is resolved against the static [`registry`]
//! once; [`LinterInvoker::invoke`] then runs it inside a workspace and turns
//! its text output into [`Finding`]s.

pub mod parsers;
pub mod registry;

use std::collections::BTreeSet;
use std::path::Path;
use std::process::Command;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::domain::{Finding, Severity};
use crate::process::{run_bounded, Deadline, ProcessError};
use parsers::parse_output;
use registry::ToolSpec;

/// Budget for the `--version` query, independent of the lint budget.
const VERSION_QUERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Linter settings for one invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinterConfig {
    /// Check run name shown on the host.
    pub display_name: String,

    /// Executable to run (name on `PATH` or absolute path).
    pub executable: String,

    /// Registry id; defaults to the executable's file stem.
    pub tool: Option<String>,

    /// Path handed to the tool, relative to the workspace root.
    pub target_path: String,

    /// Extra arguments placed before the target.
    pub args: Vec<String>,

    /// Per-tool time limit on top of the invocation deadline.
    pub timeout: Option<Duration>,

    /// Severities that fail the check.
    pub blocking: BTreeSet<Severity>,
}

impl LinterConfig {
    pub fn new(display_name: impl Into<String>, executable: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            executable: executable.into(),
            tool: None,
            target_path: ".".to_string(),
            args: Vec::new(),
            timeout: None,
            blocking: BTreeSet::from([Severity::Error]),
        }
    }

    /// Registry id this configuration resolves to.
    pub fn tool_id(&self) -> String {
        match &self.tool {
            Some(tool) => tool.clone(),
            None => Path::new(&self.executable)
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_else(|| self.executable.clone()),
        }
    }
}

/// Result of one linter run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LintReport {
    pub findings: Vec<Finding>,

    /// The tool crashed or was misconfigured (exit code outside its ok set,
    /// or killed by a signal). Distinct from "ran and found problems".
    pub tool_error: bool,

    /// `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,

    /// Non-blank output lines that matched no known shape.
    pub dropped_lines: usize,

    /// Combined stdout and stderr.
    pub log: String,

    /// First line of `<tool> --version`, when available.
    pub version: Option<String>,

    /// Command line that was run.
    pub command: String,

    pub duration_ms: u64,
}

impl LintReport {
    /// The tool signalled failure but produced nothing we could attribute.
    pub fn policy_violation(&self) -> bool {
        !self.tool_error && self.exit_code != Some(0) && self.findings.is_empty()
    }

    /// Whether any finding has a blocking severity.
    pub fn has_blocking(&self, blocking: &BTreeSet<Severity>) -> bool {
        self.findings.iter().any(|f| blocking.contains(&f.severity))
    }

    /// Finding count for one severity.
    pub fn count(&self, severity: Severity) -> usize {
        self.findings.iter().filter(|f| f.severity == severity).count()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LintError {
    #[error("unknown linter {id:?} (known: {})", known.join(", "))]
    UnknownTool { id: String, known: Vec<&'static str> },

    #[error("failed to start {program}: {reason}")]
    Spawn { program: String, reason: String },

    #[error("linter timed out after {budget_secs}s")]
    Timeout { budget_secs: u64 },
}

/// A linter resolved against the registry, ready to run.
#[derive(Debug, Clone)]
pub struct LinterInvoker {
    config: LinterConfig,
    spec: &'static ToolSpec,
}

impl LinterInvoker {
    /// Resolve the configured tool through the registry.
    pub fn resolve(config: &LinterConfig) -> Result<Self, LintError> {
        let id = config.tool_id();
        let spec = registry::lookup(&id).ok_or_else(|| LintError::UnknownTool {
            id,
            known: registry::known_tools(),
        })?;
        Ok(Self {
            config: config.clone(),
            spec,
        })
    }

    pub fn spec(&self) -> &'static ToolSpec {
        self.spec
    }

    pub fn config(&self) -> &LinterConfig {
        &self.config
    }

    /// Arguments after the executable, in invocation order.
    pub fn arguments(&self) -> Vec<String> {
        let mut args: Vec<String> = self
            .spec
            .leading_args
            .iter()
            .map(|a| a.to_string())
            .collect();
        args.extend(self.config.args.iter().cloned());
        if self.spec.takes_target {
            args.push(self.config.target_path.clone());
        }
        args
    }

    /// The command line as shown to users.
    pub fn command_line(&self) -> String {
        std::iter::once(self.config.executable.clone())
            .chain(self.arguments())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Run the linter in `workspace` and normalize its output.
    pub fn invoke(&self, workspace: &Path, deadline: &Deadline) -> Result<LintReport, LintError> {
        let deadline = match self.config.timeout {
            Some(limit) => deadline.earliest(Deadline::after(limit)),
            None => *deadline,
        };
        let version = self.version(workspace, &deadline);

        let command_line = self.command_line();
        info!(command = %command_line, "running linter");

        let mut command = Command::new(&self.config.executable);
        command.args(self.arguments()).current_dir(workspace);

        let output = run_bounded(&mut command, &deadline).map_err(|e| match e {
            ProcessError::TimedOut { after, .. } => LintError::Timeout {
                budget_secs: after.as_secs(),
            },
            ProcessError::Spawn { program, source } => LintError::Spawn {
                program,
                reason: source.to_string(),
            },
            ProcessError::Wait { program, source } => LintError::Spawn {
                program,
                reason: source.to_string(),
            },
        })?;

        let tool_error = match output.exit_code {
            Some(code) => !self.spec.is_ok_exit(code),
            None => true,
        };

        let mut parsed = parse_output(self.spec.format, &output.stdout);
        let from_stderr = parse_output(self.spec.format, &output.stderr);
        parsed.findings.extend(from_stderr.findings);
        // stderr noise (progress lines, banners) is expected; only stdout
        // lines count as dropped.
        if parsed.dropped_lines > 0 {
            warn!(dropped = parsed.dropped_lines, "dropped unparseable linter output lines");
        }

        info!(
            exit_code = ?output.exit_code,
            findings = parsed.findings.len(),
            duration_ms = output.duration_ms,
            tool_error,
            "linter finished"
        );

        let mut log = output.stdout;
        if !output.stderr.is_empty() {
            if !log.is_empty() && !log.ends_with('\n') {
                log.push('\n');
            }
            log.push_str(&output.stderr);
        }

        Ok(LintReport {
            findings: parsed.findings,
            tool_error,
            exit_code: output.exit_code,
            dropped_lines: parsed.dropped_lines,
            log,
            version,
            command: command_line,
            duration_ms: output.duration_ms,
        })
    }

    /// Best-effort `--version` query; failures are logged and ignored.
    fn version(&self, workspace: &Path, deadline: &Deadline) -> Option<String> {
        let args = self.spec.version_args?;
        let version_deadline = deadline.earliest(Deadline::after(VERSION_QUERY_TIMEOUT));
        let mut command = Command::new(&self.config.executable);
        command.args(args).current_dir(workspace);
        match run_bounded(&mut command, &version_deadline) {
            Ok(output) if output.success() => output
                .stdout
                .lines()
                .chain(output.stderr.lines())
                .map(str::trim)
                .find(|l| !l.is_empty())
                .map(str::to_string),
            Ok(output) => {
                warn!(exit_code = ?output.exit_code, "version query failed");
                None
            }
            Err(e) => {
                warn!(error = %e, "version query failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(findings: Vec<Finding>, exit_code: Option<i32>, tool_error: bool) -> LintReport {
        LintReport {
            findings,
            tool_error,
            exit_code,
            dropped_lines: 0,
            log: String::new(),
            version: None,
            command: "flake8 .".to_string(),
            duration_ms: 1,
        }
    }

    #[test]
    fn test_tool_id_from_executable_stem() {
        let config = LinterConfig::new("flake8", "/opt/venv/bin/flake8");
        assert_eq!(config.tool_id(), "flake8");

        let mut config = LinterConfig::new("lint", "/usr/bin/sh");
        config.tool = Some("generic".to_string());
        assert_eq!(config.tool_id(), "generic");
    }

    #[test]
    fn test_resolve_unknown_tool() {
        let config = LinterConfig::new("eslint", "eslint");
        let err = LinterInvoker::resolve(&config).unwrap_err();
        assert!(err.to_string().contains("flake8"));
    }

    #[test]
    fn test_arguments_follow_template() {
        let mut config = LinterConfig::new("flake8", "flake8");
        config.args = vec!["--max-line-length=100".to_string()];
        config.target_path = "src".to_string();
        let invoker = LinterInvoker::resolve(&config).unwrap();
        assert_eq!(invoker.arguments(), vec!["--max-line-length=100", "src"]);
        assert_eq!(invoker.command_line(), "flake8 --max-line-length=100 src");
    }

    #[test]
    fn test_clippy_template_has_no_target() {
        let config = LinterConfig::new("clippy", "cargo");
        let mut config = config;
        config.tool = Some("clippy".to_string());
        let invoker = LinterInvoker::resolve(&config).unwrap();
        assert_eq!(
            invoker.arguments(),
            vec!["clippy", "--quiet", "--message-format=short"]
        );
    }

    #[test]
    fn test_policy_violation() {
        assert!(report(vec![], Some(1), false).policy_violation());
        assert!(!report(vec![], Some(0), false).policy_violation());
        assert!(!report(vec![], Some(2), true).policy_violation());
        let warning = Finding::new("foo.py", 1, Severity::Warning, "x");
        assert!(!report(vec![warning], Some(1), false).policy_violation());
    }

    #[test]
    fn test_has_blocking() {
        let blocking = BTreeSet::from([Severity::Error]);
        let warning = Finding::new("foo.py", 1, Severity::Warning, "x");
        let error = Finding::new("foo.py", 2, Severity::Error, "y");
        assert!(!report(vec![warning.clone()], Some(1), false).has_blocking(&blocking));
        assert!(report(vec![warning, error], Some(1), false).has_blocking(&blocking));
    }
}
