//! Deadline-bounded subprocess execution.
//!
//! Both the workspace checkout (git) and the linter are external processes
//! whose wall-clock time counts against one invocation-wide [`Deadline`].

use std::io::{self, Read};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};
use wait_timeout::ChildExt;

/// Point in time after which an invocation must stop working and report.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Instant,
    budget: Duration,
}

impl Deadline {
    /// A deadline `budget` from now.
    pub fn after(budget: Duration) -> Self {
        Self {
            at: Instant::now() + budget,
            budget,
        }
    }

    /// The budget this deadline was created with.
    pub fn budget(&self) -> Duration {
        self.budget
    }

    /// Time left, or `None` once expired.
    pub fn remaining(&self) -> Option<Duration> {
        self.at
            .checked_duration_since(Instant::now())
            .filter(|left| !left.is_zero())
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_none()
    }

    /// Whichever of the two deadlines comes first.
    pub fn earliest(self, other: Deadline) -> Deadline {
        if other.at < self.at {
            other
        } else {
            self
        }
    }
}

/// Captured result of a finished process.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,

    pub stdout: String,

    pub stderr: String,

    pub duration_ms: u64,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("{program} did not finish within {:.1}s", .after.as_secs_f64())]
    TimedOut { program: String, after: Duration },

    #[error("io error while waiting for {program}: {source}")]
    Wait {
        program: String,
        #[source]
        source: io::Error,
    },
}

fn drain<R: Read + Send + 'static>(mut pipe: R) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Err(e) = pipe.read_to_end(&mut buf) {
            debug!(error = %e, "pipe read ended early");
        }
        buf
    })
}

/// Run `command` to completion or until `deadline` expires.
///
/// stdout and stderr are drained on helper threads so a chatty child can
/// never block on a full pipe. On expiry the child is killed and the readers
/// are abandoned: a grandchild may still hold the pipes open.
pub fn run_bounded(
    command: &mut Command,
    deadline: &Deadline,
) -> Result<ProcessOutput, ProcessError> {
    let program = command.get_program().to_string_lossy().into_owned();
    let start = Instant::now();

    let Some(remaining) = deadline.remaining() else {
        return Err(ProcessError::TimedOut {
            program,
            after: deadline.budget(),
        });
    };

    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| ProcessError::Spawn {
            program: program.clone(),
            source,
        })?;

    let stdout = child.stdout.take().map(drain);
    let stderr = child.stderr.take().map(drain);

    let status = child
        .wait_timeout(remaining)
        .map_err(|source| ProcessError::Wait {
            program: program.clone(),
            source,
        })?;

    let Some(status) = status else {
        warn!(
            program = %program,
            budget_s = deadline.budget().as_secs(),
            "deadline expired, killing process"
        );
        if let Err(e) = child.kill() {
            debug!(error = %e, "kill after timeout failed");
        }
        // Reap the child; the readers are left to finish on their own.
        let _ = child.wait();
        return Err(ProcessError::TimedOut {
            program,
            after: deadline.budget(),
        });
    };

    let collect = |handle: Option<thread::JoinHandle<Vec<u8>>>| -> String {
        handle
            .and_then(|h| h.join().ok())
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
            .unwrap_or_default()
    };

    Ok(ProcessOutput {
        exit_code: status.code(),
        stdout: collect(stdout),
        stderr: collect(stderr),
        duration_ms: start.elapsed().as_millis() as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deadline_remaining_and_expiry() {
        let deadline = Deadline::after(Duration::from_secs(60));
        assert!(!deadline.is_expired());
        assert!(deadline.remaining().unwrap() <= Duration::from_secs(60));

        let expired = Deadline::after(Duration::ZERO);
        assert!(expired.is_expired());
    }

    #[test]
    fn test_deadline_earliest() {
        let long = Deadline::after(Duration::from_secs(60));
        let short = Deadline::after(Duration::from_secs(1));
        assert_eq!(long.earliest(short).budget(), Duration::from_secs(1));
        assert_eq!(short.earliest(long).budget(), Duration::from_secs(1));
    }

    #[test]
    fn test_run_captures_output() {
        let deadline = Deadline::after(Duration::from_secs(30));
        let output = run_bounded(
            Command::new("sh").args(["-c", "echo out; echo err >&2"]),
            &deadline,
        )
        .expect("run failed");
        assert!(output.success());
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
    }

    #[test]
    fn test_run_reports_exit_code() {
        let deadline = Deadline::after(Duration::from_secs(30));
        let output = run_bounded(Command::new("sh").args(["-c", "exit 3"]), &deadline).unwrap();
        assert_eq!(output.exit_code, Some(3));
        assert!(!output.success());
    }

    #[test]
    fn test_run_spawn_failure() {
        let deadline = Deadline::after(Duration::from_secs(30));
        let mut command = Command::new("/nonexistent-binary-that-does-not-exist");
        let err = run_bounded(&mut command, &deadline).unwrap_err();
        assert!(matches!(err, ProcessError::Spawn { .. }));
    }

    #[test]
    fn test_run_times_out() {
        let deadline = Deadline::after(Duration::from_millis(200));
        let start = Instant::now();
        let err = run_bounded(Command::new("sleep").arg("10"), &deadline).unwrap_err();
        assert!(matches!(err, ProcessError::TimedOut { .. }));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_run_with_expired_deadline_never_spawns() {
        let deadline = Deadline::after(Duration::ZERO);
        let err = run_bounded(Command::new("sh").args(["-c", "exit 0"]), &deadline).unwrap_err();
        assert!(matches!(err, ProcessError::TimedOut { .. }));
    }
}
