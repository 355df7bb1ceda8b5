//! Domain models for lintrun.
//!
//! Canonical definitions for the entities one invocation works with:
//! - `CheckEvent`: the decoded host event that triggered the invocation
//! - `CheckRun`: the host-side record whose lifecycle we drive
//! - `Finding`: a normalized linter result

pub mod check_event;
pub mod check_run;
pub mod error;
pub mod finding;

pub use check_event::{is_commit_sha, CheckAction, CheckEvent, EventKind, RepoRef, RunLookup};
pub use check_run::{CheckRun, CheckStatus, Conclusion};
pub use error::{HandlerError, ParseError, Result, TransitionError};
pub use finding::{Finding, Severity};
