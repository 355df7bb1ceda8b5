//! Host-side check run record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a check run. Ordered: statuses only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    /// GitHub Actions also uses `requested`, `waiting` and `pending` for runs
    /// that have not started.
    #[serde(alias = "requested", alias = "waiting", alias = "pending")]
    Queued,
    InProgress,
    Completed,
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckStatus::Queued => write!(f, "queued"),
            CheckStatus::InProgress => write!(f, "in_progress"),
            CheckStatus::Completed => write!(f, "completed"),
        }
    }
}

/// Final conclusion of a completed check run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Conclusion {
    Success,
    Failure,
    Neutral,
    Cancelled,
    TimedOut,
    ActionRequired,
}

impl fmt::Display for Conclusion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Conclusion::Success => write!(f, "success"),
            Conclusion::Failure => write!(f, "failure"),
            Conclusion::Neutral => write!(f, "neutral"),
            Conclusion::Cancelled => write!(f, "cancelled"),
            Conclusion::TimedOut => write!(f, "timed_out"),
            Conclusion::ActionRequired => write!(f, "action_required"),
        }
    }
}

/// A check run as returned by the host API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CheckRun {
    pub id: u64,

    pub name: String,

    pub head_sha: String,

    pub status: CheckStatus,

    /// Only set once `status` is `completed`.
    #[serde(default)]
    pub conclusion: Option<Conclusion>,

    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl CheckRun {
    /// A freshly queued run, as the host returns it after creation.
    pub fn queued(id: u64, name: impl Into<String>, head_sha: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            head_sha: head_sha.into(),
            status: CheckStatus::Queued,
            conclusion: None,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == CheckStatus::Completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_is_forward_ordered() {
        assert!(CheckStatus::Queued < CheckStatus::InProgress);
        assert!(CheckStatus::InProgress < CheckStatus::Completed);
    }

    #[test]
    fn test_conclusion_wire_names() {
        assert_eq!(serde_json::to_string(&Conclusion::TimedOut).unwrap(), "\"timed_out\"");
        assert_eq!(
            serde_json::to_string(&Conclusion::ActionRequired).unwrap(),
            "\"action_required\""
        );
        assert_eq!(Conclusion::TimedOut.to_string(), "timed_out");
    }

    #[test]
    fn test_check_run_from_host_json() {
        let json = r#"{
            "id": 4,
            "name": "flake8",
            "head_sha": "ce587453ced02b1526dfb4cb910479d431683101",
            "status": "completed",
            "conclusion": "neutral",
            "started_at": "2018-05-04T01:14:52Z",
            "completed_at": "2018-05-04T01:14:52Z",
            "html_url": "https://github.com/github/hello-world/runs/4"
        }"#;
        let run: CheckRun = serde_json::from_str(json).unwrap();
        assert_eq!(run.id, 4);
        assert!(run.is_completed());
        assert_eq!(run.conclusion, Some(Conclusion::Neutral));
        assert!(run.started_at.is_some());
    }

    #[test]
    fn test_pending_status_alias_is_queued() {
        let json = r#"{"id": 1, "name": "x", "head_sha": "abc", "status": "pending"}"#;
        let run: CheckRun = serde_json::from_str(json).unwrap();
        assert_eq!(run.status, CheckStatus::Queued);
        assert!(run.conclusion.is_none());
    }
}
