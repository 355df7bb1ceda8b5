//! Normalized static-analysis findings.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Severity of a finding, ordered from least to most severe.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    /// Accepts the spellings linters commonly print (`note`, `warn`, `fatal error`, ...).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "info" | "notice" | "note" | "help" | "hint" => Ok(Severity::Info),
            "warning" | "warn" => Ok(Severity::Warning),
            "error" | "fatal error" | "fatal" | "failure" => Ok(Severity::Error),
            other => Err(format!("unknown severity: {other}")),
        }
    }
}

/// A single normalized linter result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Finding {
    /// File path relative to the workspace root.
    pub path: String,

    /// First line (1-indexed).
    pub line_start: u32,

    /// Last line (1-indexed, never before `line_start`).
    pub line_end: u32,

    pub severity: Severity,

    pub message: String,

    /// Tool-specific rule code (e.g. `E501`).
    pub rule_id: Option<String>,
}

impl Finding {
    /// Create a single-line finding. Line 0 is clamped to 1.
    pub fn new(
        path: impl Into<String>,
        line: u32,
        severity: Severity,
        message: impl Into<String>,
    ) -> Self {
        let line = line.max(1);
        Self {
            path: normalize_path(path.into()),
            line_start: line,
            line_end: line,
            severity,
            message: message.into(),
            rule_id: None,
        }
    }

    /// Widen the finding to a line range; swapped bounds are reordered.
    pub fn with_range(mut self, start: u32, end: u32) -> Self {
        let (start, end) = (start.max(1), end.max(1));
        self.line_start = start.min(end);
        self.line_end = start.max(end);
        self
    }

    pub fn with_rule(mut self, rule_id: impl Into<String>) -> Self {
        self.rule_id = Some(rule_id.into());
        self
    }
}

/// Strip the `./` prefix linters print when run against `.`.
fn normalize_path(path: String) -> String {
    match path.strip_prefix("./") {
        Some(stripped) => stripped.to_string(),
        None => path,
    }
}
