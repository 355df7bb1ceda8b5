//! lintrun core library
//!
//! Turns GitHub check events into linter runs and reports the results back
//! as check-run status, annotations and a conclusion.

pub mod config;
pub mod domain;
pub mod event;
pub mod fakes;
pub mod github;
pub mod handler;
pub mod lifecycle;
pub mod linter;
pub mod process;
pub mod reporter;
pub mod telemetry;
pub mod translate;
pub mod workspace;

pub use config::{ConfigError, CrashConclusion, HandlerConfig};

pub use domain::{
    CheckAction, CheckEvent, CheckRun, CheckStatus, Conclusion, EventKind, Finding, HandlerError,
    ParseError, RepoRef, Result, Severity, TransitionError,
};

pub use event::parse_event;

pub use github::{
    ChecksApi, Connector, GithubChecksClient, GithubConnector, ReportError, Session, StaticToken,
    TokenSource,
};

pub use handler::{Handler, Outcome};

pub use lifecycle::{decide_conclusion, CheckRunLifecycle, Completion, LifecycleState};

pub use linter::{LintError, LintReport, LinterConfig, LinterInvoker};

pub use process::Deadline;

pub use reporter::{CheckSummary, Reporter, RetryPolicy};

pub use telemetry::{init_tracing, LogFormat};

pub use translate::{translate, Annotation, AnnotationBatch, AnnotationLevel, LevelMap};

pub use workspace::{CheckoutRequest, GitProvisioner, Provisioner, Workspace, WorkspaceError};
