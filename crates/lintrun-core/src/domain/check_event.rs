//! Typed check events decoded from host webhook payloads.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Which webhook the event came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    CheckRun,
    CheckSuite,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::CheckRun => "check_run",
            EventKind::CheckSuite => "check_suite",
        }
    }
}

/// Triggering actions we react to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CheckAction {
    /// `check_run.created`: a run already exists on the host.
    Created,
    /// `check_suite.requested`: a push produced a new suite.
    Requested,
    /// `check_run.rerequested` / `check_suite.rerequested`: a user asked for a rerun.
    Rerequested,
}

impl CheckAction {
    /// Resolve an action string for the given event kind.
    ///
    /// Returns `None` for actions that must not trigger a lint run.
    pub fn for_kind(kind: EventKind, action: &str) -> Option<Self> {
        match (kind, action) {
            (EventKind::CheckRun, "created") => Some(CheckAction::Created),
            (EventKind::CheckRun, "rerequested") => Some(CheckAction::Rerequested),
            (EventKind::CheckSuite, "requested") => Some(CheckAction::Requested),
            (EventKind::CheckSuite, "rerequested") => Some(CheckAction::Rerequested),
            _ => None,
        }
    }
}

/// Repository coordinates (`owner/name`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
}

impl RepoRef {
    /// Parse a `full_name` such as `octo-org/widgets`.
    pub fn parse(full_name: &str) -> Option<Self> {
        let (owner, name) = full_name.split_once('/')?;
        if owner.is_empty() || name.is_empty() || name.contains('/') {
            return None;
        }
        Some(Self {
            owner: owner.to_string(),
            name: name.to_string(),
        })
    }

    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// A relevant check event. Built from one message, consumed by the handler.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CheckEvent {
    pub kind: EventKind,
    pub action: CheckAction,

    /// Present for `check_run` events.
    pub check_run_id: Option<u64>,

    /// Name of the check run the event refers to (`check_run` events only).
    pub check_run_name: Option<String>,

    pub check_suite_id: Option<u64>,

    /// Commit the check applies to.
    pub head_sha: String,

    pub repository: RepoRef,

    /// GitHub App installation used to obtain credentials.
    pub installation_id: u64,
}

/// Whether `sha` is a full hex commit id (SHA-1 or SHA-256).
pub fn is_commit_sha(sha: &str) -> bool {
    matches!(sha.len(), 40 | 64) && sha.bytes().all(|b| b.is_ascii_hexdigit())
}

/// How the reporter finds the check run to drive for an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunLookup {
    /// The host created the run and named it in the event.
    ById(u64),
    /// Reuse a run with our name at the head commit, creating one if none exists.
    ByName,
    /// Always start a fresh run.
    Create,
}

impl CheckEvent {
    /// Where the check run for this event comes from.
    ///
    /// A redelivered suite request must land on the run created the first
    /// time; rerequests ask for a new run.
    pub fn run_lookup(&self) -> RunLookup {
        match (self.kind, self.action, self.check_run_id) {
            (EventKind::CheckRun, CheckAction::Created, Some(id)) => RunLookup::ById(id),
            (EventKind::CheckSuite, CheckAction::Requested, _) => RunLookup::ByName,
            _ => RunLookup::Create,
        }
    }

    /// Whether this event concerns the check with the given display name.
    ///
    /// Suite events are addressed to every check; run events only to the
    /// check whose name they carry.
    pub fn is_for(&self, display_name: &str) -> bool {
        match self.kind {
            EventKind::CheckSuite => true,
            EventKind::CheckRun => self.check_run_name.as_deref() == Some(display_name),
        }
    }

    /// First seven characters of the head SHA, for summaries.
    pub fn short_sha(&self) -> &str {
        self.head_sha.get(..7).unwrap_or(&self.head_sha)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_event(action: CheckAction, name: &str) -> CheckEvent {
        CheckEvent {
            kind: EventKind::CheckRun,
            action,
            check_run_id: Some(4),
            check_run_name: Some(name.to_string()),
            check_suite_id: Some(5),
            head_sha: "0d1a26e67d8f5eaf1f6ba5c57fc3c7d91ac0fd1c".to_string(),
            repository: RepoRef::parse("baxterthehacker/public-repo").unwrap(),
            installation_id: 234,
        }
    }

    #[test]
    fn test_repo_ref_parse() {
        let repo = RepoRef::parse("octo-org/widgets").unwrap();
        assert_eq!(repo.owner, "octo-org");
        assert_eq!(repo.name, "widgets");
        assert_eq!(repo.to_string(), "octo-org/widgets");
    }

    #[test]
    fn test_repo_ref_rejects_bad_names() {
        assert!(RepoRef::parse("widgets").is_none());
        assert!(RepoRef::parse("/widgets").is_none());
        assert!(RepoRef::parse("a/b/c").is_none());
    }

    #[test]
    fn test_action_for_kind() {
        assert_eq!(
            CheckAction::for_kind(EventKind::CheckSuite, "requested"),
            Some(CheckAction::Requested)
        );
        assert_eq!(
            CheckAction::for_kind(EventKind::CheckRun, "created"),
            Some(CheckAction::Created)
        );
        assert_eq!(CheckAction::for_kind(EventKind::CheckRun, "completed"), None);
        assert_eq!(CheckAction::for_kind(EventKind::CheckSuite, "created"), None);
    }

    #[test]
    fn test_is_for_matches_run_name() {
        let event = run_event(CheckAction::Created, "flake8");
        assert!(event.is_for("flake8"));
        assert!(!event.is_for("pydocstyle"));
    }

    #[test]
    fn test_short_sha() {
        assert_eq!(run_event(CheckAction::Created, "x").short_sha(), "0d1a26e");
    }

    #[test]
    fn test_short_sha_does_not_split_characters() {
        let mut event = run_event(CheckAction::Created, "x");
        event.head_sha = "ééééé".to_string();
        assert_eq!(event.short_sha(), "ééééé");
        event.head_sha = "abc".to_string();
        assert_eq!(event.short_sha(), "abc");
    }

    #[test]
    fn test_is_commit_sha() {
        assert!(is_commit_sha("0d1a26e67d8f5eaf1f6ba5c57fc3c7d91ac0fd1c"));
        assert!(is_commit_sha(&"AB12".repeat(16)));
        assert!(!is_commit_sha("0d1a26e"));
        assert!(!is_commit_sha("--upload-pack=touch /tmp/x"));
        assert!(!is_commit_sha(&"g".repeat(40)));
        assert!(!is_commit_sha(""));
    }

    #[test]
    fn test_run_lookup() {
        assert_eq!(run_event(CheckAction::Created, "x").run_lookup(), RunLookup::ById(4));
        assert_eq!(run_event(CheckAction::Rerequested, "x").run_lookup(), RunLookup::Create);

        let mut suite = run_event(CheckAction::Requested, "x");
        suite.kind = EventKind::CheckSuite;
        suite.check_run_id = None;
        assert_eq!(suite.run_lookup(), RunLookup::ByName);
        suite.action = CheckAction::Rerequested;
        assert_eq!(suite.run_lookup(), RunLookup::Create);
    }
}
