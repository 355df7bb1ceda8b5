//! GitHub check-run API.
//!
//! [`ChecksApi`] is the seam the reporter talks to. [`GithubChecksClient`]
//! implements it over blocking `reqwest`; tests use
//! [`crate::fakes::RecordingChecksApi`]. A [`Connector`] turns an
//! installation into an authenticated [`Session`].

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::{CheckRun, CheckStatus, Conclusion, RepoRef, TransitionError};
use crate::translate::Annotation;

/// Longest response body kept in an error.
const MAX_ERROR_BODY: usize = 512;

/// Serialize timestamps the way the checks API documents them
/// (`YYYY-MM-DDTHH:MM:SSZ`).
pub mod github_timestamp_opt {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::Serializer;

    pub fn serialize<S>(date: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match date {
            Some(d) => serializer.serialize_str(&d.to_rfc3339_opts(SecondsFormat::Secs, true)),
            None => serializer.serialize_none(),
        }
    }
}

/// Errors talking to the host.
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("host returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("could not decode host response: {0}")]
    Decode(String),

    #[error("no credential available: {0}")]
    Token(String),

    #[error("{operation} failed after {attempts} attempts: {last}")]
    Exhausted {
        operation: String,
        attempts: u32,
        #[source]
        last: Box<ReportError>,
    },

    #[error(transparent)]
    Lifecycle(#[from] TransitionError),
}

impl ReportError {
    /// Transport failures, 5xx and 429 may succeed on retry. Nothing else will.
    pub fn is_retryable(&self) -> bool {
        match self {
            ReportError::Transport(_) => true,
            ReportError::Status { status, .. } => *status == 429 || (500..600).contains(status),
            _ => false,
        }
    }
}

impl From<reqwest::Error> for ReportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ReportError::Decode(err.to_string())
        } else {
            ReportError::Transport(err.to_string())
        }
    }
}

/// `POST /repos/{owner}/{repo}/check-runs` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateCheckRun {
    pub name: String,
    pub head_sha: String,
    pub status: CheckStatus,
}

/// Rendered check output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckRunOutput {
    pub title: String,
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub annotations: Vec<Annotation>,
}

/// `PATCH /repos/{owner}/{repo}/check-runs/{id}` body. Unset fields are
/// left out so the host keeps their current values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UpdateCheckRun {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<CheckStatus>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub conclusion: Option<Conclusion>,

    #[serde(skip_serializing_if = "Option::is_none", with = "github_timestamp_opt")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none", with = "github_timestamp_opt")]
    pub completed_at: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<CheckRunOutput>,
}

/// `GET /repos/{owner}/{repo}/commits/{ref}/check-runs` response.
#[derive(Debug, Clone, Deserialize)]
struct CheckRunList {
    check_runs: Vec<CheckRun>,
}

/// Host operations on check runs.
pub trait ChecksApi: Send + Sync {
    fn create(&self, repo: &RepoRef, request: &CreateCheckRun) -> Result<CheckRun, ReportError>;

    fn fetch(&self, repo: &RepoRef, check_run_id: u64) -> Result<CheckRun, ReportError>;

    /// The latest run called `name` at `head_sha`, if any.
    fn find(
        &self,
        repo: &RepoRef,
        head_sha: &str,
        name: &str,
    ) -> Result<Option<CheckRun>, ReportError>;

    fn update(
        &self,
        repo: &RepoRef,
        check_run_id: u64,
        request: &UpdateCheckRun,
    ) -> Result<CheckRun, ReportError>;
}

impl<T: ChecksApi + ?Sized> ChecksApi for Arc<T> {
    fn create(&self, repo: &RepoRef, request: &CreateCheckRun) -> Result<CheckRun, ReportError> {
        (**self).create(repo, request)
    }

    fn fetch(&self, repo: &RepoRef, check_run_id: u64) -> Result<CheckRun, ReportError> {
        (**self).fetch(repo, check_run_id)
    }

    fn find(
        &self,
        repo: &RepoRef,
        head_sha: &str,
        name: &str,
    ) -> Result<Option<CheckRun>, ReportError> {
        (**self).find(repo, head_sha, name)
    }

    fn update(
        &self,
        repo: &RepoRef,
        check_run_id: u64,
        request: &UpdateCheckRun,
    ) -> Result<CheckRun, ReportError> {
        (**self).update(repo, check_run_id, request)
    }
}

/// Source of installation credentials.
pub trait TokenSource: Send + Sync {
    fn token(&self, installation_id: u64) -> Result<String, ReportError>;
}

/// A fixed token for every installation.
#[derive(Clone)]
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Read `LINTRUN_TOKEN`, falling back to `GITHUB_TOKEN`.
    pub fn from_env() -> Option<Self> {
        ["LINTRUN_TOKEN", "GITHUB_TOKEN"]
            .iter()
            .filter_map(|key| std::env::var(key).ok())
            .map(|value| value.trim().to_string())
            .find(|value| !value.is_empty())
            .map(Self)
    }
}

impl std::fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StaticToken(***)")
    }
}

impl TokenSource for StaticToken {
    fn token(&self, _installation_id: u64) -> Result<String, ReportError> {
        if self.0.is_empty() {
            return Err(ReportError::Token("empty token".to_string()));
        }
        Ok(self.0.clone())
    }
}

/// Blocking client for the GitHub checks API.
#[derive(Debug, Clone)]
pub struct GithubChecksClient {
    http: Client,
    api_base: String,
}

impl GithubChecksClient {
    pub fn new(
        api_base: &str,
        token: &str,
        request_timeout: Duration,
    ) -> Result<Self, ReportError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(concat!("lintrun/", env!("CARGO_PKG_VERSION"))),
        );
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        headers.insert("x-github-api-version", HeaderValue::from_static("2022-11-28"));
        let mut auth = HeaderValue::from_str(&format!("Bearer {}", token.trim()))
            .map_err(|_| ReportError::Token("token is not a valid header value".to_string()))?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);

        let http = Client::builder()
            .default_headers(headers)
            .timeout(request_timeout)
            .build()
            .map_err(|e| ReportError::Transport(format!("failed to build http client: {e}")))?;

        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
        })
    }

    fn runs_url(&self, repo: &RepoRef) -> String {
        format!("{}/repos/{}/{}/check-runs", self.api_base, repo.owner, repo.name)
    }

    fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ReportError> {
        let response = request.send()?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(ReportError::Status {
                status: status.as_u16(),
                body: truncate_body(&body),
            });
        }
        Ok(response.json()?)
    }

    fn send_run(&self, request: RequestBuilder) -> Result<CheckRun, ReportError> {
        let run: CheckRun = self.send(request)?;
        debug!(check_run_id = run.id, status = %run.status, "host acknowledged check run");
        Ok(run)
    }
}

impl ChecksApi for GithubChecksClient {
    fn create(&self, repo: &RepoRef, request: &CreateCheckRun) -> Result<CheckRun, ReportError> {
        self.send_run(self.http.post(self.runs_url(repo)).json(request))
    }

    fn fetch(&self, repo: &RepoRef, check_run_id: u64) -> Result<CheckRun, ReportError> {
        self.send_run(self.http.get(format!("{}/{check_run_id}", self.runs_url(repo))))
    }

    fn find(
        &self,
        repo: &RepoRef,
        head_sha: &str,
        name: &str,
    ) -> Result<Option<CheckRun>, ReportError> {
        let url = format!(
            "{}/repos/{}/{}/commits/{head_sha}/check-runs",
            self.api_base, repo.owner, repo.name
        );
        let list: CheckRunList = self.send(
            self.http
                .get(url)
                .query(&[("check_name", name), ("filter", "latest")]),
        )?;
        Ok(list.check_runs.into_iter().max_by_key(|run| run.id))
    }

    fn update(
        &self,
        repo: &RepoRef,
        check_run_id: u64,
        request: &UpdateCheckRun,
    ) -> Result<CheckRun, ReportError> {
        self.send_run(
            self.http
                .patch(format!("{}/{check_run_id}", self.runs_url(repo)))
                .json(request),
        )
    }
}

fn truncate_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.len() <= MAX_ERROR_BODY {
        return trimmed.to_string();
    }
    let mut end = MAX_ERROR_BODY;
    while !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &trimmed[..end])
}

/// An authenticated connection for one installation.
pub struct Session {
    pub api: Box<dyn ChecksApi>,
    token: String,
}

impl Session {
    pub fn new(api: Box<dyn ChecksApi>, token: impl Into<String>) -> Self {
        Self {
            api,
            token: token.into(),
        }
    }

    /// Credential for fetching the repository.
    pub fn token(&self) -> &str {
        &self.token
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").field("token", &"***").finish()
    }
}

/// Opens sessions against the host.
pub trait Connector: Send + Sync {
    fn connect(&self, installation_id: u64) -> Result<Session, ReportError>;
}

/// Connector for the real GitHub API.
pub struct GithubConnector {
    api_base: String,
    request_timeout: Duration,
    tokens: Arc<dyn TokenSource>,
}

impl GithubConnector {
    pub fn new(
        api_base: impl Into<String>,
        request_timeout: Duration,
        tokens: Arc<dyn TokenSource>,
    ) -> Self {
        Self {
            api_base: api_base.into(),
            request_timeout,
            tokens,
        }
    }
}

impl Connector for GithubConnector {
    fn connect(&self, installation_id: u64) -> Result<Session, ReportError> {
        let token = self.tokens.token(installation_id)?;
        let client = GithubChecksClient::new(&self.api_base, &token, self.request_timeout)?;
        Ok(Session::new(Box::new(client), token))
    }
}
