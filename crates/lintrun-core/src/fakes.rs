//! In-memory fakes for the host API and workspace provisioning (testing only)
//!
//! `RecordingChecksApi` keeps check runs in a `HashMap` and records every
//! call made against it; `StaticProvisioner` materializes a fixed file tree
//! or fails in a scripted way; `FakeConnector` hands out sessions backed by
//! a shared `RecordingChecksApi`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::domain::{CheckRun, CheckStatus, RepoRef};
use crate::github::{ChecksApi, Connector, CreateCheckRun, ReportError, Session, UpdateCheckRun};
use crate::process::Deadline;
use crate::workspace::{CheckoutRequest, Provisioner, Workspace, WorkspaceError};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ---------------------------------------------------------------------------
// RecordingChecksApi
// ---------------------------------------------------------------------------

/// One call made against the fake host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostCall {
    Create { repo: RepoRef, request: CreateCheckRun },
    Fetch { repo: RepoRef, check_run_id: u64 },
    Find { repo: RepoRef, head_sha: String, name: String },
    Update { repo: RepoRef, check_run_id: u64, request: UpdateCheckRun },
}

#[derive(Debug, Default)]
struct HostState {
    runs: HashMap<u64, CheckRun>,
    next_id: u64,
    calls: Vec<HostCall>,
    failures: Option<ScriptedStatus>,
}

/// Calls to let through, then calls to fail with `status`.
#[derive(Debug, Clone, Copy)]
struct ScriptedStatus {
    skip: usize,
    remaining: usize,
    status: u16,
}

impl HostState {
    fn scripted_failure(&mut self) -> Option<ReportError> {
        let script = self.failures.as_mut()?;
        if script.skip > 0 {
            script.skip -= 1;
            return None;
        }
        let status = script.status;
        script.remaining -= 1;
        if script.remaining == 0 {
            self.failures = None;
        }
        Some(ReportError::Status {
            status,
            body: "scripted failure".to_string(),
        })
    }
}

/// In-memory check-run host that records every call.
#[derive(Debug, Default)]
pub struct RecordingChecksApi {
    state: Mutex<HostState>,
}

impl RecordingChecksApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a run known to the host, e.g. one GitHub created before the event.
    pub fn seed_run(&self, run: CheckRun) {
        let mut state = lock(&self.state);
        state.next_id = state.next_id.max(run.id);
        state.runs.insert(run.id, run);
    }

    /// Fail the next `count` calls with HTTP `status`.
    pub fn fail_next(&self, count: usize, status: u16) {
        self.fail_after(0, count, status);
    }

    /// Let `skip` calls through, then fail `count` calls with HTTP `status`.
    pub fn fail_after(&self, skip: usize, count: usize, status: u16) {
        lock(&self.state).failures = (count > 0).then_some(ScriptedStatus {
            skip,
            remaining: count,
            status,
        });
    }

    pub fn calls(&self) -> Vec<HostCall> {
        lock(&self.state).calls.clone()
    }

    pub fn run(&self, id: u64) -> Option<CheckRun> {
        lock(&self.state).runs.get(&id).cloned()
    }

    /// All update requests, in call order.
    pub fn updates(&self) -> Vec<UpdateCheckRun> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                HostCall::Update { request, .. } => Some(request),
                _ => None,
            })
            .collect()
    }

    /// Update requests that complete a run.
    pub fn completions(&self) -> Vec<UpdateCheckRun> {
        self.updates()
            .into_iter()
            .filter(|u| u.status == Some(CheckStatus::Completed))
            .collect()
    }

    /// Statuses reported by updates, in call order.
    pub fn reported_statuses(&self) -> Vec<CheckStatus> {
        self.updates().into_iter().filter_map(|u| u.status).collect()
    }
}

impl ChecksApi for RecordingChecksApi {
    fn create(&self, repo: &RepoRef, request: &CreateCheckRun) -> Result<CheckRun, ReportError> {
        let mut state = lock(&self.state);
        state.calls.push(HostCall::Create {
            repo: repo.clone(),
            request: request.clone(),
        });
        if let Some(err) = state.scripted_failure() {
            return Err(err);
        }
        state.next_id += 1;
        let mut run = CheckRun::queued(state.next_id, &request.name, &request.head_sha);
        run.status = request.status;
        state.runs.insert(run.id, run.clone());
        Ok(run)
    }

    fn fetch(&self, repo: &RepoRef, check_run_id: u64) -> Result<CheckRun, ReportError> {
        let mut state = lock(&self.state);
        state.calls.push(HostCall::Fetch {
            repo: repo.clone(),
            check_run_id,
        });
        if let Some(err) = state.scripted_failure() {
            return Err(err);
        }
        state.runs.get(&check_run_id).cloned().ok_or(ReportError::Status {
            status: 404,
            body: "Not Found".to_string(),
        })
    }

    fn find(
        &self,
        repo: &RepoRef,
        head_sha: &str,
        name: &str,
    ) -> Result<Option<CheckRun>, ReportError> {
        let mut state = lock(&self.state);
        state.calls.push(HostCall::Find {
            repo: repo.clone(),
            head_sha: head_sha.to_string(),
            name: name.to_string(),
        });
        if let Some(err) = state.scripted_failure() {
            return Err(err);
        }
        Ok(state
            .runs
            .values()
            .filter(|run| run.name == name && run.head_sha == head_sha)
            .max_by_key(|run| run.id)
            .cloned())
    }

    fn update(
        &self,
        repo: &RepoRef,
        check_run_id: u64,
        request: &UpdateCheckRun,
    ) -> Result<CheckRun, ReportError> {
        let mut state = lock(&self.state);
        state.calls.push(HostCall::Update {
            repo: repo.clone(),
            check_run_id,
            request: request.clone(),
        });
        if let Some(err) = state.scripted_failure() {
            return Err(err);
        }
        let run = state.runs.get_mut(&check_run_id).ok_or(ReportError::Status {
            status: 404,
            body: "Not Found".to_string(),
        })?;
        if let Some(status) = request.status {
            run.status = status;
        }
        if request.conclusion.is_some() {
            run.conclusion = request.conclusion;
        }
        if request.started_at.is_some() {
            run.started_at = request.started_at;
        }
        if request.completed_at.is_some() {
            run.completed_at = request.completed_at;
        }
        Ok(run.clone())
    }
}

// ---------------------------------------------------------------------------
// FakeConnector
// ---------------------------------------------------------------------------

/// Connector whose sessions all share one `RecordingChecksApi`.
#[derive(Debug, Clone)]
pub struct FakeConnector {
    api: Arc<RecordingChecksApi>,
    token: Option<String>,
}

impl FakeConnector {
    pub fn new(api: Arc<RecordingChecksApi>) -> Self {
        Self {
            api,
            token: Some("fake-token".to_string()),
        }
    }

    /// A connector that cannot obtain credentials.
    pub fn without_token(api: Arc<RecordingChecksApi>) -> Self {
        Self { api, token: None }
    }
}

impl Connector for FakeConnector {
    fn connect(&self, _installation_id: u64) -> Result<Session, ReportError> {
        let token = self
            .token
            .clone()
            .ok_or_else(|| ReportError::Token("no token configured".to_string()))?;
        Ok(Session::new(Box::new(Arc::clone(&self.api)), token))
    }
}

// ---------------------------------------------------------------------------
// StaticProvisioner
// ---------------------------------------------------------------------------

/// How a `StaticProvisioner` misbehaves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedFailure {
    Fetch(String),
    /// Check out a different commit than requested.
    Integrity { actual: String },
    Timeout,
    Panic(String),
}

/// Provisioner that writes a fixed set of files into a fresh temp dir.
#[derive(Debug, Default)]
pub struct StaticProvisioner {
    files: Vec<(PathBuf, String)>,
    failure: Option<ScriptedFailure>,
    requests: Mutex<Vec<CheckoutRequest>>,
}

impl StaticProvisioner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, path: impl Into<PathBuf>, contents: impl Into<String>) -> Self {
        self.files.push((path.into(), contents.into()));
        self
    }

    pub fn failing(failure: ScriptedFailure) -> Self {
        Self {
            failure: Some(failure),
            ..Self::default()
        }
    }

    /// Requests received so far.
    pub fn requests(&self) -> Vec<CheckoutRequest> {
        lock(&self.requests).clone()
    }
}

impl Provisioner for StaticProvisioner {
    fn provision(
        &self,
        request: &CheckoutRequest,
        deadline: &Deadline,
    ) -> Result<Workspace, WorkspaceError> {
        lock(&self.requests).push(request.clone());
        if deadline.is_expired() {
            return Err(WorkspaceError::Timeout {
                budget_secs: deadline.budget().as_secs(),
            });
        }

        match &self.failure {
            Some(ScriptedFailure::Fetch(reason)) => {
                return Err(WorkspaceError::Fetch {
                    repo: request.repository.full_name(),
                    sha: request.head_sha.clone(),
                    reason: reason.clone(),
                })
            }
            Some(ScriptedFailure::Integrity { actual }) => {
                crate::workspace::verify_checkout(&request.head_sha, actual)?;
            }
            Some(ScriptedFailure::Timeout) => {
                return Err(WorkspaceError::Timeout {
                    budget_secs: deadline.budget().as_secs(),
                })
            }
            Some(ScriptedFailure::Panic(message)) => panic!("{message}"),
            None => {}
        }

        let dir = tempfile::Builder::new().prefix("lintrun-fake-").tempdir()?;
        let root = dir.path().join("src");
        std::fs::create_dir(&root)?;
        for (path, contents) in &self.files {
            let target = root.join(path);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(target, contents)?;
        }
        Ok(Workspace::new(dir, "src", request.head_sha.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn repo() -> RepoRef {
        RepoRef::parse("octo/widgets").unwrap()
    }

    #[test]
    fn test_create_update_fetch() {
        let api = RecordingChecksApi::new();
        let run = api
            .create(
                &repo(),
                &CreateCheckRun {
                    name: "flake8".into(),
                    head_sha: "abc".into(),
                    status: CheckStatus::Queued,
                },
            )
            .unwrap();
        assert_eq!(run.id, 1);

        let update = UpdateCheckRun {
            status: Some(CheckStatus::InProgress),
            ..Default::default()
        };
        api.update(&repo(), run.id, &update).unwrap();
        assert_eq!(api.fetch(&repo(), run.id).unwrap().status, CheckStatus::InProgress);
        assert_eq!(api.calls().len(), 3);
        assert_eq!(api.reported_statuses(), vec![CheckStatus::InProgress]);
    }

    #[test]
    fn test_fetch_unknown_is_404() {
        let api = RecordingChecksApi::new();
        let err = api.fetch(&repo(), 99).unwrap_err();
        assert!(matches!(err, ReportError::Status { status: 404, .. }));
    }

    #[test]
    fn test_scripted_failures_run_out() {
        let api = RecordingChecksApi::new();
        api.seed_run(CheckRun::queued(5, "flake8", "abc"));
        api.fail_next(2, 500);
        assert!(api.fetch(&repo(), 5).is_err());
        assert!(api.fetch(&repo(), 5).is_err());
        assert!(api.fetch(&repo(), 5).is_ok());
    }

    #[test]
    fn test_scripted_failures_after_skip() {
        let api = RecordingChecksApi::new();
        api.seed_run(CheckRun::queued(5, "flake8", "abc"));
        api.fail_after(1, 1, 502);
        assert!(api.fetch(&repo(), 5).is_ok());
        assert!(api.fetch(&repo(), 5).is_err());
        assert!(api.fetch(&repo(), 5).is_ok());
    }

    #[test]
    fn test_find_returns_latest_matching_run() {
        let api = RecordingChecksApi::new();
        api.seed_run(CheckRun::queued(2, "flake8", "abc"));
        api.seed_run(CheckRun::queued(4, "flake8", "abc"));
        api.seed_run(CheckRun::queued(6, "pydocstyle", "abc"));
        let found = api.find(&repo(), "abc", "flake8").unwrap().unwrap();
        assert_eq!(found.id, 4);
        assert!(api.find(&repo(), "def", "flake8").unwrap().is_none());
    }

    #[test]
    fn test_static_provisioner_writes_files() {
        let provisioner = StaticProvisioner::new().with_file("pkg/mod.py", "x = 1\n");
        let request = CheckoutRequest::new(repo(), "abc", "t");
        let workspace = provisioner
            .provision(&request, &Deadline::after(Duration::from_secs(5)))
            .unwrap();
        let contents = std::fs::read_to_string(workspace.path().join("pkg/mod.py")).unwrap();
        assert_eq!(contents, "x = 1\n");
        assert_eq!(provisioner.requests().len(), 1);
    }

    #[test]
    fn test_static_provisioner_integrity_failure() {
        let provisioner = StaticProvisioner::failing(ScriptedFailure::Integrity {
            actual: "def456".into(),
        });
        let request = CheckoutRequest::new(repo(), "abc123", "t");
        let err = provisioner
            .provision(&request, &Deadline::after(Duration::from_secs(5)))
            .unwrap_err();
        assert!(matches!(err, WorkspaceError::Integrity { .. }));
    }
}
