//! Check-run state machine.
//!
//! ```text
//! Queued -> InProgress -> Completed(conclusion)
//! ```
//!
//! Transitions only move forward. A completed run accepts nothing further
//! except a repeat of the same conclusion, which is reported as
//! [`Completion::AlreadyCompleted`] so redelivered events stay harmless.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::domain::{CheckRun, CheckStatus, Conclusion, Severity, TransitionError};
use crate::linter::LintReport;

/// Local view of where a check run is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "conclusion")]
pub enum LifecycleState {
    Queued,
    InProgress,
    Completed(Conclusion),
}

impl LifecycleState {
    pub fn status(&self) -> CheckStatus {
        match self {
            LifecycleState::Queued => CheckStatus::Queued,
            LifecycleState::InProgress => CheckStatus::InProgress,
            LifecycleState::Completed(_) => CheckStatus::Completed,
        }
    }
}

/// Effect of a `complete` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// The run moved to completed now.
    Applied,
    /// The run was already completed with this conclusion.
    AlreadyCompleted,
}

/// Forward-only lifecycle of a single check run.
#[derive(Debug, Clone)]
pub struct CheckRunLifecycle {
    run_id: u64,
    state: LifecycleState,
}

impl CheckRunLifecycle {
    /// Start from the host's view of the run.
    pub fn new(run: &CheckRun) -> Self {
        let state = match (run.status, run.conclusion) {
            (CheckStatus::Completed, Some(conclusion)) => LifecycleState::Completed(conclusion),
            // a completed run without a conclusion is treated as neutral
            (CheckStatus::Completed, None) => LifecycleState::Completed(Conclusion::Neutral),
            (CheckStatus::InProgress, _) => LifecycleState::InProgress,
            (CheckStatus::Queued, _) => LifecycleState::Queued,
        };
        Self {
            run_id: run.id,
            state,
        }
    }

    pub fn run_id(&self) -> u64 {
        self.run_id
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn is_completed(&self) -> bool {
        matches!(self.state, LifecycleState::Completed(_))
    }

    /// Queued -> InProgress.
    pub fn start(&mut self) -> Result<(), TransitionError> {
        match self.state {
            LifecycleState::Queued => {
                self.state = LifecycleState::InProgress;
                Ok(())
            }
            current => Err(TransitionError::InvalidTransition {
                current: current.status(),
                requested: CheckStatus::InProgress,
            }),
        }
    }

    /// Check that an annotation batch may be sent.
    pub fn annotate(&self) -> Result<(), TransitionError> {
        match self.state {
            LifecycleState::InProgress => Ok(()),
            current => Err(TransitionError::AnnotationRejected {
                current: current.status(),
            }),
        }
    }

    /// Validate a completion without applying it.
    pub fn check_complete(&self, conclusion: Conclusion) -> Result<Completion, TransitionError> {
        match self.state {
            LifecycleState::Completed(current) if current == conclusion => {
                Ok(Completion::AlreadyCompleted)
            }
            LifecycleState::Completed(current) => Err(TransitionError::ConclusionOverwrite {
                current,
                requested: conclusion,
            }),
            LifecycleState::Queued | LifecycleState::InProgress => Ok(Completion::Applied),
        }
    }

    /// Any non-terminal state -> Completed(conclusion).
    pub fn complete(&mut self, conclusion: Conclusion) -> Result<Completion, TransitionError> {
        let completion = self.check_complete(conclusion)?;
        self.state = LifecycleState::Completed(conclusion);
        Ok(completion)
    }
}

/// Conclusion for a linter run that finished within the deadline.
///
/// A crashed tool gets `crash_conclusion`. Otherwise the run fails when a
/// blocking finding exists or the tool reported a failure it did not
/// explain with findings.
pub fn decide_conclusion(
    report: &LintReport,
    blocking: &BTreeSet<Severity>,
    crash_conclusion: Conclusion,
) -> Conclusion {
    if report.tool_error {
        return crash_conclusion;
    }
    if report.has_blocking(blocking) || report.policy_violation() {
        Conclusion::Failure
    } else {
        Conclusion::Success
    }
}
