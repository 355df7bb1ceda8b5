//! Event parser: transport envelope -> [`CheckEvent`].
//!
//! Two envelope shapes are accepted:
//! - `{"Message": "<json>"}`, the pub/sub contract
//! - `{"Records": [{"Sns": {"Message": "<json>"}}]}`, raw SNS deliveries
//!
//! Parsing is pure. A `ParseError` means "not for us" and must not cause any
//! host activity.

use serde::Deserialize;
use tracing::debug;

use crate::domain::{is_commit_sha, CheckAction, CheckEvent, EventKind, ParseError, RepoRef};

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "Message")]
    message: Option<String>,

    #[serde(rename = "Records")]
    records: Option<Vec<SnsRecord>>,
}

#[derive(Debug, Deserialize)]
struct SnsRecord {
    #[serde(rename = "Sns")]
    sns: SnsMessage,
}

#[derive(Debug, Deserialize)]
struct SnsMessage {
    #[serde(rename = "Message")]
    message: String,
}

#[derive(Debug, Deserialize)]
struct Payload {
    action: Option<String>,
    check_run: Option<RunPayload>,
    check_suite: Option<SuitePayload>,
    repository: Option<RepositoryPayload>,
    installation: Option<InstallationPayload>,
}

#[derive(Debug, Deserialize)]
struct RunPayload {
    id: Option<u64>,
    name: Option<String>,
    head_sha: Option<String>,
    check_suite: Option<SuitePayload>,
}

#[derive(Debug, Deserialize)]
struct SuitePayload {
    id: Option<u64>,
    head_sha: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RepositoryPayload {
    full_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InstallationPayload {
    id: Option<u64>,
}

/// Extract the inner payload string from the transport envelope.
fn unwrap_envelope(raw: &[u8]) -> Result<String, ParseError> {
    let envelope: Envelope = serde_json::from_slice(raw)
        .map_err(|e| ParseError::MalformedEnvelope(e.to_string()))?;

    if let Some(message) = envelope.message {
        return Ok(message);
    }
    envelope
        .records
        .and_then(|records| records.into_iter().next())
        .map(|record| record.sns.message)
        .ok_or_else(|| ParseError::MalformedEnvelope("no Message field".to_string()))
}

/// Decode raw transport bytes into a relevant [`CheckEvent`].
pub fn parse_event(raw: &[u8]) -> Result<CheckEvent, ParseError> {
    let message = unwrap_envelope(raw)?;
    let payload: Payload = serde_json::from_str(&message)?;
    debug!(action = ?payload.action, "decoded event payload");

    let action = payload.action.ok_or(ParseError::MissingField("action"))?;

    let (kind, check_run, suite) = match (payload.check_run, payload.check_suite) {
        (Some(run), suite) => (EventKind::CheckRun, Some(run), suite),
        (None, Some(suite)) => (EventKind::CheckSuite, None, Some(suite)),
        (None, None) => return Err(ParseError::NotACheckEvent),
    };

    let action =
        CheckAction::for_kind(kind, &action).ok_or_else(|| ParseError::UnrecognizedAction {
            kind: kind.as_str(),
            action,
        })?;

    let full_name = payload
        .repository
        .and_then(|r| r.full_name)
        .ok_or(ParseError::MissingField("repository.full_name"))?;
    let repository =
        RepoRef::parse(&full_name).ok_or(ParseError::MissingField("repository.full_name"))?;

    let installation_id = payload
        .installation
        .and_then(|i| i.id)
        .ok_or(ParseError::MissingField("installation.id"))?;

    let event = match check_run {
        Some(run) => {
            let nested_suite = run.check_suite;
            let check_suite_id = nested_suite
                .as_ref()
                .and_then(|s| s.id)
                .or_else(|| suite.as_ref().and_then(|s| s.id));
            CheckEvent {
                kind,
                action,
                check_run_id: Some(run.id.ok_or(ParseError::MissingField("check_run.id"))?),
                check_run_name: Some(run.name.ok_or(ParseError::MissingField("check_run.name"))?),
                check_suite_id,
                head_sha: commit_sha(run.head_sha, "check_run.head_sha")?,
                repository,
                installation_id,
            }
        }
        None => {
            let suite = suite.ok_or(ParseError::NotACheckEvent)?;
            CheckEvent {
                kind,
                action,
                check_run_id: None,
                check_run_name: None,
                check_suite_id: suite.id,
                head_sha: commit_sha(suite.head_sha, "check_suite.head_sha")?,
                repository,
                installation_id,
            }
        }
    };

    Ok(event)
}

/// A present, full hex commit id. Anything else never reaches git.
fn commit_sha(value: Option<String>, field: &'static str) -> Result<String, ParseError> {
    let sha = value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or(ParseError::MissingField(field))?;
    if !is_commit_sha(&sha) {
        return Err(ParseError::InvalidField(field));
    }
    Ok(sha)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SHA: &str = "0d1a26e67d8f5eaf1f6ba5c57fc3c7d91ac0fd1c";

    fn wrap(payload: serde_json::Value) -> Vec<u8> {
        serde_json::to_vec(&json!({ "Message": payload.to_string() })).unwrap()
    }

    fn check_run_payload(action: &str) -> serde_json::Value {
        json!({
            "action": action,
            "check_run": {
                "id": 128620228,
                "name": "flake8",
                "head_sha": SHA,
                "status": "queued",
                "check_suite": { "id": 118578147, "head_sha": SHA }
            },
            "repository": { "full_name": "baxterthehacker/public-repo" },
            "installation": { "id": 234 }
        })
    }

    #[test]
    fn test_parse_check_run_created() {
        let event = parse_event(&wrap(check_run_payload("created"))).unwrap();
        assert_eq!(event.kind, EventKind::CheckRun);
        assert_eq!(event.action, CheckAction::Created);
        assert_eq!(event.check_run_id, Some(128620228));
        assert_eq!(event.check_run_name.as_deref(), Some("flake8"));
        assert_eq!(event.check_suite_id, Some(118578147));
        assert_eq!(event.head_sha, SHA);
        assert_eq!(event.repository.full_name(), "baxterthehacker/public-repo");
        assert_eq!(event.installation_id, 234);
    }

    #[test]
    fn test_parse_check_suite_requested() {
        let payload = json!({
            "action": "requested",
            "check_suite": { "id": 9, "head_sha": SHA },
            "repository": { "full_name": "octo/widgets" },
            "installation": { "id": 1 }
        });
        let event = parse_event(&wrap(payload)).unwrap();
        assert_eq!(event.kind, EventKind::CheckSuite);
        assert_eq!(event.action, CheckAction::Requested);
        assert_eq!(event.check_run_id, None);
        assert_eq!(event.check_suite_id, Some(9));
    }

    #[test]
    fn test_parse_sns_records_envelope() {
        let raw = serde_json::to_vec(&json!({
            "Records": [{
                "Sns": {
                    "Subject": "check_run",
                    "Message": check_run_payload("rerequested").to_string()
                }
            }]
        }))
        .unwrap();
        let event = parse_event(&raw).unwrap();
        assert_eq!(event.action, CheckAction::Rerequested);
    }

    #[test]
    fn test_malformed_envelope() {
        let err = parse_event(b"not json at all").unwrap_err();
        assert!(matches!(err, ParseError::MalformedEnvelope(_)));

        let err = parse_event(br#"{"Other": 1}"#).unwrap_err();
        assert!(matches!(err, ParseError::MalformedEnvelope(_)));
    }

    #[test]
    fn test_malformed_inner_payload() {
        let raw = serde_json::to_vec(&json!({ "Message": "{ nope" })).unwrap();
        let err = parse_event(&raw).unwrap_err();
        assert!(matches!(err, ParseError::MalformedPayload(_)));
    }

    #[test]
    fn test_unrecognized_action() {
        let err = parse_event(&wrap(check_run_payload("completed"))).unwrap_err();
        match err {
            ParseError::UnrecognizedAction { kind, action } => {
                assert_eq!(kind, "check_run");
                assert_eq!(action, "completed");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_missing_installation() {
        let mut payload = check_run_payload("created");
        payload.as_object_mut().unwrap().remove("installation");
        let err = parse_event(&wrap(payload)).unwrap_err();
        assert!(matches!(err, ParseError::MissingField("installation.id")));
    }

    #[test]
    fn test_missing_head_sha() {
        let mut payload = check_run_payload("created");
        payload["check_run"]["head_sha"] = json!("");
        let err = parse_event(&wrap(payload)).unwrap_err();
        assert!(matches!(err, ParseError::MissingField("check_run.head_sha")));
    }

    #[test]
    fn test_option_like_head_sha_is_rejected() {
        let mut payload = check_run_payload("created");
        payload["check_run"]["head_sha"] = json!("--upload-pack=touch /tmp/owned");
        let err = parse_event(&wrap(payload)).unwrap_err();
        assert!(matches!(err, ParseError::InvalidField("check_run.head_sha")));
    }

    #[test]
    fn test_non_hex_suite_head_sha_is_rejected() {
        for sha in ["ééééé", "0d1a26e", "zzzz26e67d8f5eaf1f6ba5c57fc3c7d91ac0fd1c"] {
            let payload = json!({
                "action": "requested",
                "check_suite": { "id": 9, "head_sha": sha },
                "repository": { "full_name": "octo/widgets" },
                "installation": { "id": 1 }
            });
            let err = parse_event(&wrap(payload)).unwrap_err();
            assert!(matches!(err, ParseError::InvalidField("check_suite.head_sha")), "{sha}");
        }
    }

    #[test]
    fn test_push_event_is_not_a_check_event() {
        let payload = json!({
            "ref": "refs/heads/main",
            "action": "requested",
            "repository": { "full_name": "octo/widgets" },
            "installation": { "id": 1 }
        });
        let err = parse_event(&wrap(payload)).unwrap_err();
        assert!(matches!(err, ParseError::NotACheckEvent));
    }
}
