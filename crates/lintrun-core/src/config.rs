//! Handler configuration.
//!
//! Loaded once, from a TOML file or `LINTRUN_*` environment variables, and
//! never mutated afterwards.

use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::{Conclusion, Severity};
use crate::linter::LinterConfig;
use crate::reporter::RetryPolicy;
use crate::translate::HOST_MAX_ANNOTATIONS;

const ENV_PREFIX: &str = "LINTRUN_";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("missing required setting {0}")]
    Missing(String),

    #[error("invalid value for {key}: {reason}")]
    Invalid { key: String, reason: String },
}

/// Conclusion reported when the linter itself crashes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrashConclusion {
    #[default]
    Neutral,
    Failure,
}

impl CrashConclusion {
    pub fn conclusion(self) -> Conclusion {
        match self {
            CrashConclusion::Neutral => Conclusion::Neutral,
            CrashConclusion::Failure => Conclusion::Failure,
        }
    }
}

fn default_target_path() -> String {
    ".".to_string()
}

fn default_timeout_seconds() -> u64 {
    200
}

fn default_max_annotations() -> usize {
    HOST_MAX_ANNOTATIONS
}

fn default_blocking() -> BTreeSet<Severity> {
    BTreeSet::from([Severity::Error])
}

fn default_api_base_url() -> String {
    "https://api.github.com".to_string()
}

fn default_git_base_url() -> String {
    "https://github.com".to_string()
}

fn default_request_timeout_seconds() -> u64 {
    30
}

fn default_report_max_retries() -> u32 {
    3
}

fn default_report_backoff_ms() -> u64 {
    500
}

/// Everything one handler invocation needs to know.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HandlerConfig {
    /// Check run name; events for other check runs are ignored.
    pub display_name: String,

    pub linter_executable: String,

    /// Registry id, when it differs from the executable's name.
    #[serde(default)]
    pub linter_tool: Option<String>,

    #[serde(default)]
    pub linter_args: Vec<String>,

    #[serde(default = "default_target_path")]
    pub target_path: String,

    /// Budget for checkout plus linting.
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,

    /// Tighter budget for the linter alone, within `timeout_seconds`.
    #[serde(default)]
    pub linter_timeout_seconds: Option<u64>,

    #[serde(default = "default_max_annotations")]
    pub max_annotations_per_batch: usize,

    #[serde(default = "default_blocking")]
    pub blocking_severities: BTreeSet<Severity>,

    #[serde(default)]
    pub tool_crash_conclusion: CrashConclusion,

    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    #[serde(default = "default_git_base_url")]
    pub git_base_url: String,

    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,

    #[serde(default = "default_report_max_retries")]
    pub report_max_retries: u32,

    #[serde(default = "default_report_backoff_ms")]
    pub report_backoff_ms: u64,
}

impl HandlerConfig {
    /// Defaults for everything but the name and executable.
    pub fn new(display_name: impl Into<String>, linter_executable: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            linter_executable: linter_executable.into(),
            linter_tool: None,
            linter_args: Vec::new(),
            target_path: default_target_path(),
            timeout_seconds: default_timeout_seconds(),
            linter_timeout_seconds: None,
            max_annotations_per_batch: default_max_annotations(),
            blocking_severities: default_blocking(),
            tool_crash_conclusion: CrashConclusion::default(),
            api_base_url: default_api_base_url(),
            git_base_url: default_git_base_url(),
            request_timeout_seconds: default_request_timeout_seconds(),
            report_max_retries: default_report_max_retries(),
            report_backoff_ms: default_report_backoff_ms(),
        }
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Read `LINTRUN_*` variables from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (`LINTRUN_DISPLAY_NAME`, ...).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &str| {
            lookup(&format!("{ENV_PREFIX}{name}"))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let required = |name: &str| {
            get(name).ok_or_else(|| ConfigError::Missing(format!("{ENV_PREFIX}{name}")))
        };

        let mut config = Self::new(required("DISPLAY_NAME")?, required("LINTER")?);
        config.linter_tool = get("LINTER_TOOL");
        if let Some(args) = get("LINTER_ARGS") {
            config.linter_args = args.split_whitespace().map(str::to_string).collect();
        }
        if let Some(target) = get("TARGET_PATH") {
            config.target_path = target;
        }
        if let Some(v) = get("TIMEOUT_SECONDS") {
            config.timeout_seconds = parse_number("TIMEOUT_SECONDS", &v)?;
        }
        if let Some(v) = get("LINTER_TIMEOUT_SECONDS") {
            config.linter_timeout_seconds = Some(parse_number("LINTER_TIMEOUT_SECONDS", &v)?);
        }
        if let Some(v) = get("MAX_ANNOTATIONS") {
            config.max_annotations_per_batch = parse_number("MAX_ANNOTATIONS", &v)?;
        }
        if let Some(v) = get("BLOCKING_SEVERITIES") {
            config.blocking_severities = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| {
                    s.parse::<Severity>().map_err(|reason| ConfigError::Invalid {
                        key: format!("{ENV_PREFIX}BLOCKING_SEVERITIES"),
                        reason,
                    })
                })
                .collect::<Result<_, _>>()?;
        }
        if let Some(v) = get("TOOL_CRASH_CONCLUSION") {
            config.tool_crash_conclusion = match v.to_ascii_lowercase().as_str() {
                "neutral" => CrashConclusion::Neutral,
                "failure" => CrashConclusion::Failure,
                other => {
                    return Err(ConfigError::Invalid {
                        key: format!("{ENV_PREFIX}TOOL_CRASH_CONCLUSION"),
                        reason: format!("expected neutral or failure, got {other:?}"),
                    })
                }
            };
        }
        if let Some(v) = get("API_BASE_URL") {
            config.api_base_url = v;
        }
        if let Some(v) = get("GIT_BASE_URL") {
            config.git_base_url = v;
        }
        if let Some(v) = get("REQUEST_TIMEOUT_SECONDS") {
            config.request_timeout_seconds = parse_number("REQUEST_TIMEOUT_SECONDS", &v)?;
        }
        if let Some(v) = get("REPORT_MAX_RETRIES") {
            config.report_max_retries = parse_number("REPORT_MAX_RETRIES", &v)?;
        }
        if let Some(v) = get("REPORT_BACKOFF_MS") {
            config.report_backoff_ms = parse_number("REPORT_BACKOFF_MS", &v)?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |key: &str, reason: &str| ConfigError::Invalid {
            key: key.to_string(),
            reason: reason.to_string(),
        };
        if self.display_name.trim().is_empty() {
            return Err(invalid("display_name", "must not be empty"));
        }
        if self.linter_executable.trim().is_empty() {
            return Err(invalid("linter_executable", "must not be empty"));
        }
        if self.max_annotations_per_batch == 0 {
            return Err(invalid("max_annotations_per_batch", "must be at least 1"));
        }
        if self.timeout_seconds == 0 {
            return Err(invalid("timeout_seconds", "must be at least 1"));
        }
        if self.linter_timeout_seconds == Some(0) {
            return Err(invalid("linter_timeout_seconds", "must be at least 1"));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds.max(1))
    }

    /// Annotations per update call, never above what the host accepts.
    pub fn batch_cap(&self) -> usize {
        self.max_annotations_per_batch.clamp(1, HOST_MAX_ANNOTATIONS)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.report_max_retries,
            backoff_base_ms: self.report_backoff_ms,
        }
    }

    pub fn crash_conclusion(&self) -> Conclusion {
        self.tool_crash_conclusion.conclusion()
    }

    /// Linter settings derived from this configuration.
    pub fn linter_config(&self) -> LinterConfig {
        LinterConfig {
            display_name: self.display_name.clone(),
            executable: self.linter_executable.clone(),
            tool: self.linter_tool.clone(),
            target_path: self.target_path.clone(),
            args: self.linter_args.clone(),
            timeout: self.linter_timeout_seconds.map(Duration::from_secs),
            blocking: self.blocking_severities.clone(),
        }
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e: T::Err| ConfigError::Invalid {
        key: format!("{ENV_PREFIX}{name}"),
        reason: e.to_string(),
    })
}
