//! LinterInvoker with real processes.

use std::path::Path;
use std::time::Duration;

use lintrun_core::domain::Severity;
use lintrun_core::linter::{LintError, LinterConfig, LinterInvoker};
use lintrun_core::process::Deadline;

fn deadline() -> Deadline {
    Deadline::after(Duration::from_secs(30))
}

fn sh_as(tool: &str, script: &str) -> LinterConfig {
    let mut config = LinterConfig::new("lint", "sh");
    config.tool = Some(tool.to_string());
    config.args = vec!["-c".to_string(), script.to_string()];
    config
}

/// Write an executable stand-in for a real linter.
#[cfg(unix)]
fn fake_tool(dir: &Path, name: &str, body: &str) -> String {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path.display().to_string()
}

#[test]
fn parses_pep8_output_from_stdout_and_stderr() {
    let workspace = tempfile::tempdir().unwrap();
    let config = sh_as(
        "flake8",
        "echo './pkg/a.py:3:1: F401 unused import'; \
         echo 'pkg/b.py:9:5: E999 SyntaxError' >&2; exit 1",
    );
    let invoker = LinterInvoker::resolve(&config).unwrap();
    let report = invoker.invoke(workspace.path(), &deadline()).unwrap();

    assert!(!report.tool_error);
    assert_eq!(report.exit_code, Some(1));
    assert_eq!(report.findings.len(), 2);
    assert_eq!(report.findings[0].path, "pkg/a.py");
    assert_eq!(report.findings[0].severity, Severity::Warning);
    assert_eq!(report.findings[1].severity, Severity::Error);
    assert!(report.log.contains("SyntaxError"));
}

#[test]
fn exit_code_outside_ok_set_is_a_tool_error() {
    let workspace = tempfile::tempdir().unwrap();
    let invoker = LinterInvoker::resolve(&sh_as("pycodestyle", "exit 2")).unwrap();
    let report = invoker.invoke(workspace.path(), &deadline()).unwrap();
    assert!(report.tool_error);
    assert!(!report.policy_violation());
}

#[test]
fn killed_by_signal_is_a_tool_error() {
    let workspace = tempfile::tempdir().unwrap();
    let invoker = LinterInvoker::resolve(&sh_as("generic", "kill -9 $$")).unwrap();
    let report = invoker.invoke(workspace.path(), &deadline()).unwrap();
    assert_eq!(report.exit_code, None);
    assert!(report.tool_error);
}

#[test]
fn noise_is_dropped_and_counted() {
    let workspace = tempfile::tempdir().unwrap();
    let invoker = LinterInvoker::resolve(&sh_as(
        "generic",
        "echo 'checking 3 files'; echo 'x.c:1:2: warning: w'; echo 'done'; exit 1",
    ))
    .unwrap();
    let report = invoker.invoke(workspace.path(), &deadline()).unwrap();
    assert_eq!(report.findings.len(), 1);
    assert_eq!(report.dropped_lines, 2);
}

#[test]
fn runs_in_the_workspace_directory() {
    let workspace = tempfile::tempdir().unwrap();
    std::fs::write(workspace.path().join("marker.txt"), "").unwrap();
    let invoker = LinterInvoker::resolve(&sh_as(
        "generic",
        "test -f marker.txt && echo 'marker.txt:1: note: here'; exit 0",
    ))
    .unwrap();
    let report = invoker.invoke(workspace.path(), &deadline()).unwrap();
    assert_eq!(report.findings.len(), 1);
}

#[test]
fn config_timeout_is_enforced() {
    let workspace = tempfile::tempdir().unwrap();
    let mut config = sh_as("generic", "sleep 10");
    config.timeout = Some(Duration::from_millis(300));
    let invoker = LinterInvoker::resolve(&config).unwrap();
    let err = invoker.invoke(workspace.path(), &deadline()).unwrap_err();
    assert!(matches!(err, LintError::Timeout { .. }));
}

#[test]
fn missing_executable_is_a_spawn_error() {
    let workspace = tempfile::tempdir().unwrap();
    let config = LinterConfig::new("lint", "/nonexistent/bin/flake8");
    let invoker = LinterInvoker::resolve(&config).unwrap();
    let err = invoker.invoke(workspace.path(), &deadline()).unwrap_err();
    assert!(matches!(err, LintError::Spawn { .. }));
}

#[cfg(unix)]
#[test]
fn version_line_is_captured() {
    let bin = tempfile::tempdir().unwrap();
    let workspace = tempfile::tempdir().unwrap();
    let exe = fake_tool(
        bin.path(),
        "flake8",
        r#"if [ "$1" = "--version" ]; then echo "7.0.0 (fake)"; exit 0; fi
echo "$1:1:1: W291 trailing whitespace"
exit 1"#,
    );
    let mut config = LinterConfig::new("flake8", exe);
    config.target_path = "src/app.py".to_string();
    let invoker = LinterInvoker::resolve(&config).unwrap();
    let report = invoker.invoke(workspace.path(), &deadline()).unwrap();

    assert_eq!(report.version.as_deref(), Some("7.0.0 (fake)"));
    assert_eq!(report.findings.len(), 1);
    assert_eq!(report.findings[0].path, "src/app.py");
    assert_eq!(report.findings[0].rule_id.as_deref(), Some("W291"));
}
