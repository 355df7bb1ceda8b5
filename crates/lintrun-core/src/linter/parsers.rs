//! Output parsers: tool text -> [`Finding`]s.
//!
//! Lines that match no known shape are dropped and counted; a noisy tool
//! must never fail the check by itself.

use std::sync::OnceLock;

use regex::Regex;

use super::registry::OutputFormat;
use crate::domain::{Finding, Severity};

/// Findings plus the number of non-blank lines we could not interpret.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedOutput {
    pub findings: Vec<Finding>,
    pub dropped_lines: usize,
}

fn pep8_line() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?P<path>[^:\s][^:]*):(?P<line>\d+):(?:(?P<col>\d+):)?\s*(?P<code>[A-Z]+\d+)\s+(?P<msg>.+)$")
            .expect("pep8 pattern is valid")
    })
}

fn pydocstyle_header() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?P<path>[^:\s][^:]*):(?P<line>\d+)\s+(?:in|at)\s+.*:\s*$")
            .expect("pydocstyle header pattern is valid")
    })
}

fn pydocstyle_body() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s+(?P<code>D\d+):\s*(?P<msg>.+)$").expect("pydocstyle body pattern is valid")
    })
}

fn rustc_short_line() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?P<path>[^:\s][^:]*):(?P<line>\d+):(?P<col>\d+):\s+(?P<sev>error|warning|note|help)(?:\[(?P<code>[^\]]+)\])?:\s+(?P<msg>.+)$")
            .expect("rustc pattern is valid")
    })
}

fn gcc_line() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?P<path>[^:\s][^:]*):(?P<line>\d+):(?:(?P<col>\d+):)?\s*(?P<sev>fatal error|error|warning|note|info):\s*(?P<msg>.+)$")
            .expect("gcc pattern is valid")
    })
}

/// Severity of a pycodestyle/pyflakes code.
///
/// Syntax errors and undefined names break the program; everything else
/// is style.
pub fn pep8_severity(code: &str) -> Severity {
    const FATAL_PREFIXES: [&str; 4] = ["E9", "F63", "F7", "F82"];
    if FATAL_PREFIXES.iter().any(|p| code.starts_with(p)) {
        return Severity::Error;
    }
    match code.chars().next() {
        Some('E' | 'W' | 'F' | 'C' | 'N') => Severity::Warning,
        _ => Severity::Info,
    }
}

fn line_number(raw: &str) -> Option<u32> {
    raw.parse().ok()
}

fn parse_pep8(text: &str) -> ParsedOutput {
    let mut out = ParsedOutput::default();
    for line in text.lines().filter(|l| !l.trim().is_empty()) {
        let finding = pep8_line().captures(line).and_then(|caps| {
            let code = caps.name("code")?.as_str();
            Some(
                Finding::new(
                    caps.name("path")?.as_str(),
                    line_number(caps.name("line")?.as_str())?,
                    pep8_severity(code),
                    caps.name("msg")?.as_str().trim(),
                )
                .with_rule(code),
            )
        });
        match finding {
            Some(f) => out.findings.push(f),
            None => out.dropped_lines += 1,
        }
    }
    out
}

fn parse_pydocstyle(text: &str) -> ParsedOutput {
    let mut out = ParsedOutput::default();
    let mut pending: Option<(String, u32)> = None;

    for line in text.lines().filter(|l| !l.trim().is_empty()) {
        if let Some(caps) = pydocstyle_header().captures(line) {
            if pending.is_some() {
                // header without a body
                out.dropped_lines += 1;
            }
            pending = line_number(&caps["line"]).map(|n| (caps["path"].to_string(), n));
            if pending.is_none() {
                out.dropped_lines += 1;
            }
            continue;
        }
        match (pending.take(), pydocstyle_body().captures(line)) {
            (Some((path, line_no)), Some(caps)) => out.findings.push(
                Finding::new(path, line_no, Severity::Warning, caps["msg"].trim())
                    .with_rule(&caps["code"]),
            ),
            (pending_header, _) => {
                if pending_header.is_some() {
                    out.dropped_lines += 1;
                }
                out.dropped_lines += 1;
            }
        }
    }
    if pending.is_some() {
        out.dropped_lines += 1;
    }
    out
}

fn parse_with_severity(text: &str, pattern: &Regex) -> ParsedOutput {
    let mut out = ParsedOutput::default();
    for line in text.lines().filter(|l| !l.trim().is_empty()) {
        let finding = pattern.captures(line).and_then(|caps| {
            let severity = caps.name("sev")?.as_str().parse::<Severity>().ok()?;
            let finding = Finding::new(
                caps.name("path")?.as_str(),
                line_number(caps.name("line")?.as_str())?,
                severity,
                caps.name("msg")?.as_str().trim(),
            );
            Some(match caps.name("code") {
                Some(code) => finding.with_rule(code.as_str()),
                None => finding,
            })
        });
        match finding {
            Some(f) => out.findings.push(f),
            None => out.dropped_lines += 1,
        }
    }
    out
}

/// Parse tool output in the given format.
pub fn parse_output(format: OutputFormat, text: &str) -> ParsedOutput {
    match format {
        OutputFormat::Pep8 => parse_pep8(text),
        OutputFormat::Pydocstyle => parse_pydocstyle(text),
        OutputFormat::RustcShort => parse_with_severity(text, rustc_short_line()),
        OutputFormat::Gcc => parse_with_severity(text, gcc_line()),
    }
}
