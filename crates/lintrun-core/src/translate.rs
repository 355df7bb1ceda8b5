//! Findings -> host annotation batches.
//!
//! Output is deterministic: the same findings always produce the same
//! batches in the same order, so a redelivered event reports identically.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::domain::{Finding, Severity};

/// Most annotations GitHub accepts in one check-run update.
pub const HOST_MAX_ANNOTATIONS: usize = 50;

/// GitHub rejects annotation messages longer than this (bytes).
pub const MAX_MESSAGE_BYTES: usize = 64 * 1024;

/// Annotation levels understood by the host, lowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnnotationLevel {
    Notice,
    Warning,
    Failure,
}

impl AnnotationLevel {
    const ALL: [AnnotationLevel; 3] = [
        AnnotationLevel::Notice,
        AnnotationLevel::Warning,
        AnnotationLevel::Failure,
    ];

    /// The level a severity maps to when the host supports everything.
    pub fn natural(severity: Severity) -> Self {
        match severity {
            Severity::Info => AnnotationLevel::Notice,
            Severity::Warning => AnnotationLevel::Warning,
            Severity::Error => AnnotationLevel::Failure,
        }
    }
}

/// Which annotation levels the host accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelMap {
    supported: BTreeSet<AnnotationLevel>,
}

impl Default for LevelMap {
    fn default() -> Self {
        Self {
            supported: AnnotationLevel::ALL.into_iter().collect(),
        }
    }
}

impl LevelMap {
    /// Restrict to `supported`. An empty set falls back to all levels.
    pub fn new(supported: impl IntoIterator<Item = AnnotationLevel>) -> Self {
        let supported: BTreeSet<_> = supported.into_iter().collect();
        if supported.is_empty() {
            return Self::default();
        }
        Self { supported }
    }

    /// Level for `severity`: the natural level if supported, else the
    /// nearest lower supported level, else the nearest higher one.
    pub fn level_for(&self, severity: Severity) -> AnnotationLevel {
        let natural = AnnotationLevel::natural(severity);
        if self.supported.contains(&natural) {
            return natural;
        }
        self.supported
            .range(..natural)
            .next_back()
            .or_else(|| self.supported.range(natural..).next())
            .copied()
            .unwrap_or(natural)
    }
}

/// One file/line annotation in the host's wire shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    pub path: String,
    pub start_line: u32,
    pub end_line: u32,
    pub annotation_level: AnnotationLevel,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// Annotations sent in a single update call.
pub type AnnotationBatch = Vec<Annotation>;

/// Deterministic order: path, first line, last line, message.
pub fn sort_findings(findings: &mut [Finding]) {
    findings.sort_by(|a, b| {
        (&a.path, a.line_start, a.line_end, &a.message).cmp(&(
            &b.path,
            b.line_start,
            b.line_end,
            &b.message,
        ))
    });
}

fn truncate_message(message: &str) -> String {
    if message.len() <= MAX_MESSAGE_BYTES {
        return message.to_string();
    }
    let mut end = MAX_MESSAGE_BYTES;
    while !message.is_char_boundary(end) {
        end -= 1;
    }
    message[..end].to_string()
}

fn to_annotation(finding: &Finding, levels: &LevelMap) -> Annotation {
    Annotation {
        path: finding.path.clone(),
        start_line: finding.line_start,
        end_line: finding.line_end,
        annotation_level: levels.level_for(finding.severity),
        message: truncate_message(&finding.message),
        title: finding.rule_id.clone(),
    }
}

/// Turn findings into host-sized annotation batches.
///
/// `max_per_batch` is clamped to `1..=HOST_MAX_ANNOTATIONS`. No findings
/// yields no batches; every returned batch is non-empty.
pub fn translate(
    findings: &[Finding],
    max_per_batch: usize,
    levels: &LevelMap,
) -> Vec<AnnotationBatch> {
    let cap = max_per_batch.clamp(1, HOST_MAX_ANNOTATIONS);
    let mut sorted = findings.to_vec();
    sort_findings(&mut sorted);

    sorted
        .chunks(cap)
        .map(|chunk| chunk.iter().map(|f| to_annotation(f, levels)).collect())
        .collect()
}
