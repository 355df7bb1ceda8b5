//! Reporter: drives one check run on the host.
//!
//! Local lifecycle transitions are validated before each host call and only
//! applied once the host accepted it, so the local view never runs ahead of
//! what the host has seen.

use std::thread;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::domain::{CheckEvent, CheckRun, CheckStatus, Conclusion, RepoRef, RunLookup};
use crate::github::{ChecksApi, CheckRunOutput, CreateCheckRun, ReportError, UpdateCheckRun};
use crate::lifecycle::{CheckRunLifecycle, Completion, LifecycleState};
use crate::translate::AnnotationBatch;

/// Bounded retry with exponential backoff for host calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,

    /// Delay before the first retry; doubles on every further retry.
    pub backoff_base_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base_ms: 500,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        Duration::from_millis(self.backoff_base_ms.saturating_mul(factor))
    }
}

/// Run `call` until it succeeds, fails permanently, or retries run out.
pub fn with_retry<T>(
    policy: &RetryPolicy,
    operation: &str,
    mut call: impl FnMut() -> Result<T, ReportError>,
) -> Result<T, ReportError> {
    let max_attempts = policy.max_retries + 1;
    let mut attempt = 1;
    loop {
        match call() {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) if attempt >= max_attempts => {
                return Err(ReportError::Exhausted {
                    operation: operation.to_string(),
                    attempts: attempt,
                    last: Box::new(e),
                })
            }
            Err(e) => {
                let delay = policy.delay(attempt);
                warn!(
                    operation,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "host call failed, retrying"
                );
                thread::sleep(delay);
                attempt += 1;
            }
        }
    }
}

/// Rendered result of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CheckSummary {
    pub title: String,
    pub summary: String,
    pub text: Option<String>,
}

/// Reports progress and the outcome of one check run.
pub struct Reporter<'a> {
    api: &'a dyn ChecksApi,
    repo: RepoRef,
    name: String,
    retry: RetryPolicy,
    lifecycle: CheckRunLifecycle,
}

impl<'a> Reporter<'a> {
    /// Bind to the run named in a `check_run.created` event, reuse the run
    /// a redelivered suite request already created, or create a queued run
    /// for `name` at the event's head commit.
    pub fn create_or_fetch(
        api: &'a dyn ChecksApi,
        event: &CheckEvent,
        name: &str,
        retry: RetryPolicy,
    ) -> Result<Self, ReportError> {
        let repo = &event.repository;
        let existing = match event.run_lookup() {
            RunLookup::ById(id) => {
                Some(with_retry(&retry, "fetch check run", || api.fetch(repo, id))?)
            }
            RunLookup::ByName => with_retry(&retry, "find check run", || {
                api.find(repo, &event.head_sha, name)
            })?,
            RunLookup::Create => None,
        };

        let run: CheckRun = match existing {
            Some(run) => {
                info!(
                    check_run_id = run.id,
                    status = %run.status,
                    "bound to existing check run"
                );
                run
            }
            None => {
                let request = CreateCheckRun {
                    name: name.to_string(),
                    head_sha: event.head_sha.clone(),
                    status: CheckStatus::Queued,
                };
                let run = with_retry(&retry, "create check run", || api.create(repo, &request))?;
                info!(check_run_id = run.id, "created check run");
                run
            }
        };

        Ok(Self {
            api,
            repo: event.repository.clone(),
            name: name.to_string(),
            retry,
            lifecycle: CheckRunLifecycle::new(&run),
        })
    }

    pub fn check_run_id(&self) -> u64 {
        self.lifecycle.run_id()
    }

    pub fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    fn patch(&self, operation: &str, request: &UpdateCheckRun) -> Result<CheckRun, ReportError> {
        let id = self.lifecycle.run_id();
        with_retry(&self.retry, operation, || self.api.update(&self.repo, id, request))
    }

    /// Queued -> in_progress, with a short progress summary.
    pub fn start(&mut self, summary: &str) -> Result<(), ReportError> {
        let mut next = self.lifecycle.clone();
        next.start()?;
        let request = UpdateCheckRun {
            status: Some(CheckStatus::InProgress),
            started_at: Some(Utc::now()),
            output: Some(CheckRunOutput {
                title: self.name.clone(),
                summary: summary.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        };
        self.patch("start check run", &request)?;
        self.lifecycle = next;
        info!(check_run_id = self.check_run_id(), "check run in progress");
        Ok(())
    }

    /// Replace the progress summary shown while in progress.
    pub fn progress(&mut self, summary: &str) -> Result<(), ReportError> {
        self.update(&AnnotationBatch::new(), summary)
    }

    /// Send one annotation batch. Only valid while in progress.
    pub fn update(&mut self, batch: &AnnotationBatch, summary: &str) -> Result<(), ReportError> {
        self.lifecycle.annotate()?;
        let request = UpdateCheckRun {
            status: Some(CheckStatus::InProgress),
            output: Some(CheckRunOutput {
                title: self.name.clone(),
                summary: summary.to_string(),
                text: None,
                annotations: batch.clone(),
            }),
            ..Default::default()
        };
        self.patch("annotate check run", &request)?;
        Ok(())
    }

    /// Complete the run. Repeating an identical completion is a no-op.
    pub fn complete(
        &mut self,
        conclusion: Conclusion,
        summary: &CheckSummary,
    ) -> Result<Completion, ReportError> {
        let mut next = self.lifecycle.clone();
        if next.complete(conclusion)? == Completion::AlreadyCompleted {
            info!(check_run_id = self.check_run_id(), %conclusion, "check run already completed");
            return Ok(Completion::AlreadyCompleted);
        }

        let request = UpdateCheckRun {
            status: Some(CheckStatus::Completed),
            conclusion: Some(conclusion),
            completed_at: Some(Utc::now()),
            output: Some(CheckRunOutput {
                title: summary.title.clone(),
                summary: summary.summary.clone(),
                text: summary.text.clone(),
                annotations: Vec::new(),
            }),
            ..Default::default()
        };
        self.patch("complete check run", &request)?;
        self.lifecycle = next;
        info!(check_run_id = self.check_run_id(), %conclusion, "check run completed");
        Ok(Completion::Applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CheckAction, EventKind, TransitionError};
    use crate::fakes::{HostCall, RecordingChecksApi};
    use std::cell::Cell;

    const SHA: &str = "0d1a26e67d8f5eaf1f6ba5c57fc3c7d91ac0fd1c";

    fn fast() -> RetryPolicy {
        RetryPolicy {
            max_retries: 2,
            backoff_base_ms: 1,
        }
    }

    fn suite_event() -> CheckEvent {
        CheckEvent {
            kind: EventKind::CheckSuite,
            action: CheckAction::Requested,
            check_run_id: None,
            check_run_name: None,
            check_suite_id: Some(11),
            head_sha: SHA.into(),
            repository: RepoRef::parse("octo/widgets").unwrap(),
            installation_id: 1,
        }
    }

    #[test]
    fn test_retry_policy_delay_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay(1), Duration::from_millis(500));
        assert_eq!(policy.delay(2), Duration::from_millis(1000));
        assert_eq!(policy.delay(3), Duration::from_millis(2000));
    }

    #[test]
    fn test_with_retry_recovers() {
        let calls = Cell::new(0);
        let value = with_retry(&fast(), "op", || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(ReportError::Status { status: 502, body: String::new() })
            } else {
                Ok(7)
            }
        })
        .unwrap();
        assert_eq!(value, 7);
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_with_retry_gives_up() {
        let calls = Cell::new(0);
        let err = with_retry(&fast(), "op", || -> Result<(), _> {
            calls.set(calls.get() + 1);
            Err(ReportError::Transport("reset".into()))
        })
        .unwrap_err();
        assert_eq!(calls.get(), 3);
        assert!(matches!(err, ReportError::Exhausted { attempts: 3, .. }));
    }

    #[test]
    fn test_with_retry_does_not_retry_client_errors() {
        let calls = Cell::new(0);
        let err = with_retry(&fast(), "op", || -> Result<(), _> {
            calls.set(calls.get() + 1);
            Err(ReportError::Status { status: 422, body: "bad".into() })
        })
        .unwrap_err();
        assert_eq!(calls.get(), 1);
        assert!(matches!(err, ReportError::Status { status: 422, .. }));
    }

    #[test]
    fn test_full_run_against_fake() {
        let api = RecordingChecksApi::new();
        let mut reporter =
            Reporter::create_or_fetch(&api, &suite_event(), "flake8", fast()).unwrap();
        reporter.start("Running linter...").unwrap();
        reporter.update(&Vec::new(), "1 warning").unwrap();
        let summary = CheckSummary {
            title: "flake8".into(),
            summary: "done".into(),
            text: None,
        };
        assert_eq!(reporter.complete(Conclusion::Success, &summary).unwrap(), Completion::Applied);
        assert_eq!(
            reporter.complete(Conclusion::Success, &summary).unwrap(),
            Completion::AlreadyCompleted
        );

        let calls = api.calls();
        assert!(matches!(calls[0], HostCall::Find { .. }));
        assert!(matches!(calls[1], HostCall::Create { .. }));
        assert_eq!(api.completions().len(), 1);
        assert_eq!(calls.len(), 5);
    }

    #[test]
    fn test_annotate_before_start_is_rejected_without_host_call() {
        let api = RecordingChecksApi::new();
        let mut reporter =
            Reporter::create_or_fetch(&api, &suite_event(), "flake8", fast()).unwrap();
        let err = reporter.update(&Vec::new(), "x").unwrap_err();
        assert!(matches!(
            err,
            ReportError::Lifecycle(TransitionError::AnnotationRejected { .. })
        ));
        assert_eq!(api.calls().len(), 2);
    }

    #[test]
    fn test_suite_request_reuses_existing_run() {
        let api = RecordingChecksApi::new();
        let mut done = CheckRun::queued(3, "flake8", SHA);
        done.status = CheckStatus::Completed;
        done.conclusion = Some(Conclusion::Success);
        api.seed_run(done);

        let reporter =
            Reporter::create_or_fetch(&api, &suite_event(), "flake8", fast()).unwrap();
        assert_eq!(reporter.check_run_id(), 3);
        assert_eq!(reporter.state(), LifecycleState::Completed(Conclusion::Success));
        assert!(!api.calls().iter().any(|c| matches!(c, HostCall::Create { .. })));
    }

    #[test]
    fn test_suite_rerequest_creates_fresh_run() {
        let api = RecordingChecksApi::new();
        let mut done = CheckRun::queued(3, "flake8", SHA);
        done.status = CheckStatus::Completed;
        api.seed_run(done);

        let mut event = suite_event();
        event.action = CheckAction::Rerequested;
        let reporter = Reporter::create_or_fetch(&api, &event, "flake8", fast()).unwrap();
        assert_eq!(reporter.check_run_id(), 4);
        assert_eq!(reporter.state(), LifecycleState::Queued);
        assert!(matches!(api.calls()[0], HostCall::Create { .. }));
    }

    #[test]
    fn test_failed_start_keeps_state() {
        let api = RecordingChecksApi::new();
        let mut reporter =
            Reporter::create_or_fetch(&api, &suite_event(), "flake8", fast()).unwrap();
        api.fail_next(3, 503);
        assert!(reporter.start("Running linter...").is_err());
        assert_eq!(reporter.state(), LifecycleState::Queued);
    }
}
