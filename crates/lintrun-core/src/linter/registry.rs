//! Static registry of supported linters.
//!
//! Each entry pairs an invocation template with the parser for the text
//! format that tool prints. Lookup happens once, when the configuration is
//! resolved.

/// Text formats we know how to turn into findings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// `path:line:col: CODE message` (flake8, pycodestyle).
    Pep8,
    /// Two-line `path:line in context:` / `    CODE: message` records.
    Pydocstyle,
    /// `path:line:col: severity[CODE]: message` (rustc/clippy `--message-format=short`).
    RustcShort,
    /// `path:line[:col]: severity: message` (gcc-style, many generic tools).
    Gcc,
}

/// How to invoke one tool and read its output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToolSpec {
    /// Registry identifier (`flake8`, `clippy`, ...).
    pub id: &'static str,

    /// Arguments placed before user-configured ones.
    pub leading_args: &'static [&'static str],

    /// Whether the target path is appended as the last argument.
    pub takes_target: bool,

    pub format: OutputFormat,

    /// Exit codes meaning "ran to completion" (clean or with findings).
    /// Anything else is a tool crash or misconfiguration.
    pub ok_exit_codes: &'static [i32],

    /// Arguments that print the tool version, if it supports that.
    pub version_args: Option<&'static [&'static str]>,
}

impl ToolSpec {
    pub fn is_ok_exit(&self, code: i32) -> bool {
        self.ok_exit_codes.contains(&code)
    }
}

/// All supported tools.
pub static REGISTRY: &[ToolSpec] = &[
    ToolSpec {
        id: "flake8",
        leading_args: &[],
        takes_target: true,
        format: OutputFormat::Pep8,
        ok_exit_codes: &[0, 1],
        version_args: Some(&["--version"]),
    },
    ToolSpec {
        id: "pycodestyle",
        leading_args: &[],
        takes_target: true,
        format: OutputFormat::Pep8,
        ok_exit_codes: &[0, 1],
        version_args: Some(&["--version"]),
    },
    ToolSpec {
        id: "pydocstyle",
        leading_args: &[],
        takes_target: true,
        format: OutputFormat::Pydocstyle,
        ok_exit_codes: &[0, 1],
        version_args: Some(&["--version"]),
    },
    ToolSpec {
        id: "clippy",
        leading_args: &["clippy", "--quiet", "--message-format=short"],
        takes_target: false,
        format: OutputFormat::RustcShort,
        ok_exit_codes: &[0, 101],
        version_args: Some(&["clippy", "--version"]),
    },
    ToolSpec {
        id: "generic",
        leading_args: &[],
        takes_target: true,
        format: OutputFormat::Gcc,
        ok_exit_codes: &[0, 1],
        version_args: None,
    },
];

/// Find a tool by identifier (case-insensitive).
pub fn lookup(id: &str) -> Option<&'static ToolSpec> {
    REGISTRY.iter().find(|spec| spec.id.eq_ignore_ascii_case(id))
}

/// Identifiers of all registered tools.
pub fn known_tools() -> Vec<&'static str> {
    REGISTRY.iter().map(|spec| spec.id).collect()
}
