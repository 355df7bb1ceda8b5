//! Handler facade: one raw event in, one outcome out.
//!
//! ```text
//! parse -> create/fetch run -> in_progress -> checkout -> lint
//!       -> annotate (batches) -> complete
//! ```
//!
//! Once a check run is bound, every path ends in exactly one completion
//! attempt. Stage failures become a conclusion and a summary naming the
//! stage; only host failures and internal faults reach the caller.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, info_span, warn};
use uuid::Uuid;

use crate::config::{ConfigError, HandlerConfig};
use crate::domain::{CheckEvent, Conclusion, HandlerError, Severity};
use crate::event::parse_event;
use crate::github::{Connector, GithubConnector, TokenSource};
use crate::lifecycle::{decide_conclusion, Completion, LifecycleState};
use crate::linter::{LintError, LintReport, LinterInvoker};
use crate::process::Deadline;
use crate::reporter::{CheckSummary, Reporter};
use crate::translate::{translate, LevelMap};
use crate::workspace::{CheckoutRequest, GitProvisioner, Provisioner, WorkspaceError};

/// Longest log excerpt placed in the check output.
pub const MAX_LOG_CHARS: usize = 9000;

const TRUNCATION_NOTICE: &str =
    "\nFull output truncated. Please run the linter locally to see the full output.\n";

/// What one invocation did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    /// Nothing was reported.
    Ignored { reason: String },
    /// The run was already completed; nothing new was reported.
    AlreadyCompleted { check_run_id: u64 },
    Completed {
        check_run_id: u64,
        conclusion: Conclusion,
        batches: usize,
        findings: usize,
    },
}

/// Pipeline stage, named in summaries when it fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Start,
    Checkout,
    Lint,
    Annotate,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Start => write!(f, "start"),
            Stage::Checkout => write!(f, "checkout"),
            Stage::Lint => write!(f, "lint"),
            Stage::Annotate => write!(f, "annotate"),
        }
    }
}

/// Conclusion and output decided by the stages.
#[derive(Debug, Clone)]
struct Verdict {
    conclusion: Conclusion,
    summary: CheckSummary,
    batches: usize,
    findings: usize,
}

/// Runs one configured linter for check events.
pub struct Handler {
    config: HandlerConfig,
    invoker: LinterInvoker,
    connector: Arc<dyn Connector>,
    provisioner: Arc<dyn Provisioner>,
}

impl Handler {
    /// Validate the config and resolve the linter up front.
    pub fn new(
        config: HandlerConfig,
        connector: Arc<dyn Connector>,
        provisioner: Arc<dyn Provisioner>,
    ) -> Result<Self, HandlerError> {
        config.validate()?;
        let invoker = LinterInvoker::resolve(&config.linter_config()).map_err(|e| {
            ConfigError::Invalid {
                key: "linter_executable".to_string(),
                reason: e.to_string(),
            }
        })?;
        Ok(Self {
            config,
            invoker,
            connector,
            provisioner,
        })
    }

    /// Handler talking to GitHub and checking out with git.
    pub fn github(
        config: HandlerConfig,
        tokens: Arc<dyn TokenSource>,
    ) -> Result<Self, HandlerError> {
        let connector = GithubConnector::new(
            config.api_base_url.clone(),
            config.request_timeout(),
            tokens,
        );
        let provisioner = GitProvisioner::new(config.git_base_url.clone());
        Self::new(config, Arc::new(connector), Arc::new(provisioner))
    }

    pub fn config(&self) -> &HandlerConfig {
        &self.config
    }

    /// Process one raw event.
    ///
    /// `Err` means the host may not have seen a terminal report and the
    /// event should be redelivered.
    pub fn handle(&self, raw: &[u8]) -> Result<Outcome, HandlerError> {
        let event = match parse_event(raw) {
            Ok(event) => event,
            Err(e) => {
                info!(reason = %e, "ignoring event");
                return Ok(Outcome::Ignored {
                    reason: e.to_string(),
                });
            }
        };
        if !event.is_for(&self.config.display_name) {
            info!(
                check = event.check_run_name.as_deref().unwrap_or_default(),
                "not this check, no action required"
            );
            return Ok(Outcome::Ignored {
                reason: format!("event is not for {}", self.config.display_name),
            });
        }

        let span = info_span!(
            "check",
            invocation = %Uuid::new_v4(),
            repo = %event.repository,
            head_sha = %event.short_sha(),
            check_run_id = tracing::field::Empty,
        );
        let _enter = span.enter();

        let deadline = Deadline::after(self.config.timeout());
        let session = self.connector.connect(event.installation_id)?;
        let mut reporter = Reporter::create_or_fetch(
            session.api.as_ref(),
            &event,
            &self.config.display_name,
            self.config.retry_policy(),
        )?;
        let check_run_id = reporter.check_run_id();
        span.record("check_run_id", check_run_id);

        match reporter.state() {
            LifecycleState::Completed(conclusion) => {
                info!(%conclusion, "check run already completed");
                return Ok(Outcome::AlreadyCompleted { check_run_id });
            }
            LifecycleState::InProgress => {
                info!("check run already in progress elsewhere");
                return Ok(Outcome::Ignored {
                    reason: format!("check run {check_run_id} is already in progress"),
                });
            }
            LifecycleState::Queued => {}
        }

        let staged = panic::catch_unwind(AssertUnwindSafe(|| {
            self.run_stages(&mut reporter, &event, session.token(), &deadline)
        }));

        let verdict = match staged {
            Ok(verdict) => verdict,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(panic = %message, "internal fault while checking");
                let summary = CheckSummary {
                    title: format!("{}: internal error", self.config.display_name),
                    summary: format!("The check crashed: {message}"),
                    text: None,
                };
                if let Err(e) = reporter.complete(Conclusion::Failure, &summary) {
                    warn!(error = %e, "could not report internal fault");
                }
                return Err(HandlerError::Internal(message));
            }
        };

        match reporter.complete(verdict.conclusion, &verdict.summary)? {
            Completion::AlreadyCompleted => Ok(Outcome::AlreadyCompleted { check_run_id }),
            Completion::Applied => Ok(Outcome::Completed {
                check_run_id,
                conclusion: verdict.conclusion,
                batches: verdict.batches,
                findings: verdict.findings,
            }),
        }
    }

    fn run_stages(
        &self,
        reporter: &mut Reporter<'_>,
        event: &CheckEvent,
        token: &str,
        deadline: &Deadline,
    ) -> Verdict {
        if let Err(e) = reporter.start("Downloading code...") {
            return self.stage_failed(Stage::Start, &e);
        }

        let request = CheckoutRequest::new(event.repository.clone(), event.head_sha.clone(), token);
        let workspace = match self.provisioner.provision(&request, deadline) {
            Ok(workspace) => workspace,
            Err(WorkspaceError::Timeout { budget_secs }) => {
                return self.timed_out(Stage::Checkout, budget_secs)
            }
            Err(e) => return self.stage_failed(Stage::Checkout, &e),
        };

        if let Err(e) = reporter.progress("Running linter...") {
            return self.stage_failed(Stage::Lint, &e);
        }

        let report = match self.invoker.invoke(workspace.path(), deadline) {
            Ok(report) => report,
            Err(LintError::Timeout { budget_secs }) => {
                return self.timed_out(Stage::Lint, budget_secs)
            }
            Err(e) => return self.tool_crashed(&e),
        };
        drop(workspace);

        let conclusion = decide_conclusion(
            &report,
            &self.invoker.config().blocking,
            self.config.crash_conclusion(),
        );
        let headline = headline(&report);

        let batches = translate(&report.findings, self.config.batch_cap(), &LevelMap::default());
        for (index, batch) in batches.iter().enumerate() {
            if let Err(e) = reporter.update(batch, &headline) {
                warn!(batch = index, error = %e, "annotation batch rejected");
                return self.stage_failed(Stage::Annotate, &e);
            }
        }
        info!(
            %conclusion,
            findings = report.findings.len(),
            batches = batches.len(),
            "lint finished"
        );

        Verdict {
            conclusion,
            summary: self.render(&report, conclusion, &headline),
            batches: batches.len(),
            findings: report.findings.len(),
        }
    }

    fn render(&self, report: &LintReport, conclusion: Conclusion, headline: &str) -> CheckSummary {
        let mut summary = headline.to_string();
        if report.tool_error {
            summary.push_str(&format!(
                "\n\n`{}` exited with {}; treating the run as {conclusion}.",
                report.command,
                describe_exit(report.exit_code),
            ));
        } else if report.policy_violation() {
            summary.push_str(&format!(
                "\n\n`{}` reported failure (exit code {}) without any findings.",
                report.command,
                describe_exit(report.exit_code),
            ));
        }
        if report.dropped_lines > 0 {
            summary.push_str(&format!(
                "\n\n{} output lines could not be parsed.",
                report.dropped_lines
            ));
        }
        CheckSummary {
            title: format!("{}: {conclusion}", self.config.display_name),
            summary,
            text: render_log(report.version.as_deref(), &report.log),
        }
    }

    fn stage_failed(&self, stage: Stage, error: &dyn fmt::Display) -> Verdict {
        warn!(%stage, error = %error, "stage failed");
        Verdict {
            conclusion: Conclusion::Failure,
            summary: CheckSummary {
                title: format!("{}: {stage} failed", self.config.display_name),
                summary: format!("The {stage} stage failed: {error}"),
                text: None,
            },
            batches: 0,
            findings: 0,
        }
    }

    fn timed_out(&self, stage: Stage, budget_secs: u64) -> Verdict {
        warn!(%stage, budget_secs, "deadline expired");
        Verdict {
            conclusion: Conclusion::TimedOut,
            summary: CheckSummary {
                title: format!("{}: timed out", self.config.display_name),
                summary: format!(
                    "Timeout: the {stage} stage did not finish within the {budget_secs}s timeout."
                ),
                text: None,
            },
            batches: 0,
            findings: 0,
        }
    }

    fn tool_crashed(&self, error: &LintError) -> Verdict {
        let conclusion = self.config.crash_conclusion();
        warn!(error = %error, %conclusion, "linter could not run");
        Verdict {
            conclusion,
            summary: CheckSummary {
                title: format!("{}: linter error", self.config.display_name),
                summary: format!("The {} stage failed: {error}", Stage::Lint),
                text: None,
            },
            batches: 0,
            findings: 0,
        }
    }
}

/// `N errors, N warnings, N notices`.
fn headline(report: &LintReport) -> String {
    let plural = |n: usize, word: &str| {
        if n == 1 {
            format!("{n} {word}")
        } else {
            format!("{n} {word}s")
        }
    };
    format!(
        "{}, {}, {}",
        plural(report.count(Severity::Error), "error"),
        plural(report.count(Severity::Warning), "warning"),
        plural(report.count(Severity::Info), "notice"),
    )
}

fn describe_exit(code: Option<i32>) -> String {
    match code {
        Some(code) => code.to_string(),
        None => "a signal".to_string(),
    }
}

/// Tool log in a fenced block, version line first, cut at [`MAX_LOG_CHARS`].
pub fn render_log(version: Option<&str>, log: &str) -> Option<String> {
    if log.trim().is_empty() && version.is_none() {
        return None;
    }
    let mut text = String::from("```\n");
    if let Some(version) = version {
        text.push_str(version);
        text.push('\n');
    }
    match log.char_indices().nth(MAX_LOG_CHARS) {
        Some((cut, _)) => {
            text.push_str(&log[..cut]);
            text.push_str(TRUNCATION_NOTICE);
        }
        None => {
            text.push_str(log);
            if !log.ends_with('\n') {
                text.push('\n');
            }
        }
    }
    text.push_str("```");
    Some(text)
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
