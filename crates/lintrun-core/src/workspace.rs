//! Workspace provisioning: a commit-pinned checkout in a private temp dir.
//!
//! The [`Workspace`] owns its [`TempDir`], so the checkout is removed when
//! the workspace is dropped, on success, error and unwind alike.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use tempfile::TempDir;
use tracing::{debug, info};

use crate::domain::{is_commit_sha, RepoRef};
use crate::process::{run_bounded, Deadline, ProcessError};

/// Errors produced while acquiring a workspace.
#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    #[error("fetching {repo}@{sha} failed: {reason}")]
    Fetch {
        repo: String,
        sha: String,
        reason: String,
    },

    #[error("checkout integrity check failed: expected {expected}, got {actual}")]
    Integrity { expected: String, actual: String },

    #[error("checkout did not finish within {budget_secs}s")]
    Timeout { budget_secs: u64 },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// What to check out, and with which credential.
#[derive(Clone)]
pub struct CheckoutRequest {
    pub repository: RepoRef,
    pub head_sha: String,
    token: String,
}

impl CheckoutRequest {
    pub fn new(repository: RepoRef, head_sha: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            repository,
            head_sha: head_sha.into(),
            token: token.into(),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// Replace any occurrence of the token in `text`.
    fn redact(&self, text: &str) -> String {
        if self.token.is_empty() {
            text.to_string()
        } else {
            text.replace(&self.token, "***")
        }
    }
}

impl fmt::Debug for CheckoutRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CheckoutRequest")
            .field("repository", &self.repository)
            .field("head_sha", &self.head_sha)
            .field("token", &"***")
            .finish()
    }
}

/// A checked-out working copy. Deleted on drop.
#[derive(Debug)]
pub struct Workspace {
    dir: TempDir,
    root: PathBuf,
    head_sha: String,
}

impl Workspace {
    /// Wrap an already populated directory. `root` is relative to `dir`.
    pub fn new(dir: TempDir, root: impl AsRef<Path>, head_sha: impl Into<String>) -> Self {
        let root = dir.path().join(root);
        Self {
            dir,
            root,
            head_sha: head_sha.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// The temp directory holding the checkout.
    pub fn scratch_dir(&self) -> &Path {
        self.dir.path()
    }

    pub fn head_sha(&self) -> &str {
        &self.head_sha
    }
}

/// Source of commit-pinned working copies.
pub trait Provisioner: Send + Sync {
    fn provision(
        &self,
        request: &CheckoutRequest,
        deadline: &Deadline,
    ) -> Result<Workspace, WorkspaceError>;
}

/// Provisioner that shallow-fetches exactly one commit with the git CLI.
#[derive(Debug, Clone)]
pub struct GitProvisioner {
    base_url: String,
}

impl Default for GitProvisioner {
    fn default() -> Self {
        Self::new("https://github.com")
    }
}

impl GitProvisioner {
    /// `base_url` is the git host root, e.g. `https://github.com` or
    /// `file:///srv/mirrors` for local mirrors.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Remote URL for the request. Never carries a credential.
    pub fn remote_url(&self, request: &CheckoutRequest) -> String {
        format!(
            "{}/{}/{}.git",
            self.base_url, request.repository.owner, request.repository.name
        )
    }

    /// `http.extraHeader` value authenticating as the installation, for
    /// http(s) hosts with a token.
    pub fn auth_header(&self, request: &CheckoutRequest) -> Option<String> {
        let http = self.base_url.starts_with("https://") || self.base_url.starts_with("http://");
        if !http || request.token().is_empty() {
            return None;
        }
        let basic = BASE64.encode(format!("x-access-token:{}", request.token()));
        Some(format!("Authorization: Basic {basic}"))
    }

    fn git(
        &self,
        dir: &Path,
        args: &[&str],
        request: &CheckoutRequest,
        deadline: &Deadline,
    ) -> Result<String, WorkspaceError> {
        let mut command = Command::new("git");
        command
            .args(args)
            .current_dir(dir)
            .env("GIT_TERMINAL_PROMPT", "0");
        // config through the environment keeps the credential off argv
        if let Some(header) = self.auth_header(request) {
            command
                .env("GIT_CONFIG_COUNT", "1")
                .env("GIT_CONFIG_KEY_0", "http.extraHeader")
                .env("GIT_CONFIG_VALUE_0", header);
        }

        let output = run_bounded(&mut command, deadline).map_err(|e| match e {
            ProcessError::TimedOut { after, .. } => WorkspaceError::Timeout {
                budget_secs: after.as_secs(),
            },
            other => WorkspaceError::Fetch {
                repo: request.repository.full_name(),
                sha: request.head_sha.clone(),
                reason: request.redact(&other.to_string()),
            },
        })?;

        if !output.success() {
            return Err(WorkspaceError::Fetch {
                repo: request.repository.full_name(),
                sha: request.head_sha.clone(),
                reason: format!(
                    "git {} failed: {}",
                    args.first().copied().unwrap_or_default(),
                    request.redact(output.stderr.trim())
                ),
            });
        }
        Ok(output.stdout.trim().to_string())
    }
}

impl Provisioner for GitProvisioner {
    fn provision(
        &self,
        request: &CheckoutRequest,
        deadline: &Deadline,
    ) -> Result<Workspace, WorkspaceError> {
        if !is_commit_sha(&request.head_sha) {
            return Err(WorkspaceError::Fetch {
                repo: request.repository.full_name(),
                sha: request.head_sha.clone(),
                reason: "not a full commit id".to_string(),
            });
        }
        let dir = tempfile::Builder::new().prefix("lintrun-").tempdir()?;
        let checkout = dir.path().join("src");
        std::fs::create_dir(&checkout)?;
        info!(
            repo = %request.repository,
            sha = %request.head_sha,
            dir = %checkout.display(),
            "provisioning workspace"
        );

        let remote = self.remote_url(request);
        self.git(&checkout, &["init", "--quiet"], request, deadline)?;
        self.git(
            &checkout,
            &[
                "fetch",
                "--quiet",
                "--depth",
                "1",
                "--end-of-options",
                &remote,
                &request.head_sha,
            ],
            request,
            deadline,
        )?;
        self.git(
            &checkout,
            &["checkout", "--quiet", "--detach", "FETCH_HEAD"],
            request,
            deadline,
        )?;

        let actual = self.git(&checkout, &["rev-parse", "HEAD"], request, deadline)?;
        verify_checkout(&request.head_sha, &actual)?;
        debug!(sha = %actual, "checkout verified");

        Ok(Workspace::new(dir, "src", actual))
    }
}

/// Ensure the checked-out HEAD is the commit that was asked for.
pub fn verify_checkout(expected: &str, actual: &str) -> Result<(), WorkspaceError> {
    if actual.is_empty() || !actual.eq_ignore_ascii_case(expected.trim()) {
        return Err(WorkspaceError::Integrity {
            expected: expected.to_string(),
            actual: actual.to_string(),
        });
    }
    Ok(())
}
