//! lintrun - run a linter for a GitHub check event
//!
//! ## Commands
//!
//! - `handle`: process one event and report to GitHub
//! - `parse`: decode an event without acting on it
//! - `check-config`: validate and print the effective configuration
//! - `tools`: list supported linters
//!
//! `handle` exits non-zero when the outcome could not be reported, so the
//! invoking runtime redelivers the event.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{info, Level};

use lintrun_core::linter::registry::{OutputFormat, REGISTRY};
use lintrun_core::{init_tracing, parse_event, Handler, HandlerConfig, LogFormat, StaticToken};

#[derive(Parser)]
#[command(name = "lintrun")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Run a linter for GitHub check events and report the results", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Config file (TOML); LINTRUN_* variables are used when omitted
    #[arg(short, long, global = true, env = "LINTRUN_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process one event: run the linter and report the check run
    Handle {
        /// Event file; `-` or omitted reads stdin
        event: Option<PathBuf>,
    },

    /// Decode an event and print it without touching GitHub
    Parse {
        /// Event file; `-` or omitted reads stdin
        event: Option<PathBuf>,
    },

    /// Validate the configuration and print it
    CheckConfig,

    /// List supported linters
    Tools,
}

#[derive(Serialize)]
struct ToolRow {
    id: &'static str,
    format: &'static str,
    ok_exit_codes: &'static [i32],
}

fn format_name(format: OutputFormat) -> &'static str {
    match format {
        OutputFormat::Pep8 => "pep8",
        OutputFormat::Pydocstyle => "pydocstyle",
        OutputFormat::RustcShort => "rustc-short",
        OutputFormat::Gcc => "gcc",
    }
}

fn read_event(path: Option<&Path>) -> Result<Vec<u8>> {
    match path {
        Some(path) if path != Path::new("-") => std::fs::read(path)
            .with_context(|| format!("failed to read event from {}", path.display())),
        _ => {
            let mut buf = Vec::new();
            std::io::stdin()
                .read_to_end(&mut buf)
                .context("failed to read event from stdin")?;
            Ok(buf)
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<HandlerConfig> {
    match path {
        Some(path) => HandlerConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display())),
        None => HandlerConfig::from_env().context("failed to read LINTRUN_* configuration"),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn cmd_handle(config: HandlerConfig, event: Option<&Path>) -> Result<()> {
    let raw = read_event(event)?;
    let token = StaticToken::from_env().context("LINTRUN_TOKEN or GITHUB_TOKEN must be set")?;
    let handler =
        Handler::github(config, Arc::new(token)).context("invalid handler configuration")?;
    let outcome = handler.handle(&raw).context("check run was not reported")?;
    info!(?outcome, "invocation finished");
    print_json(&outcome)
}

fn cmd_parse(event: Option<&Path>) -> Result<()> {
    let raw = read_event(event)?;
    let event = parse_event(&raw).context("event is not a relevant check event")?;
    print_json(&event)
}

fn cmd_check_config(config: HandlerConfig) -> Result<()> {
    // resolving the handler also resolves the linter against the registry
    let tokens = Arc::new(StaticToken::new("unused"));
    let handler = Handler::github(config, tokens).context("invalid handler configuration")?;
    print_json(handler.config())
}

fn cmd_tools() -> Result<()> {
    let rows: Vec<ToolRow> = REGISTRY
        .iter()
        .map(|spec| ToolRow {
            id: spec.id,
            format: format_name(spec.format),
            ok_exit_codes: spec.ok_exit_codes,
        })
        .collect();
    print_json(&rows)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let format = if cli.json {
        LogFormat::Json
    } else {
        LogFormat::Text
    };
    init_tracing(format, level);

    match cli.command {
        Commands::Handle { event } => {
            let config = load_config(cli.config.as_deref())?;
            cmd_handle(config, event.as_deref())
        }
        Commands::Parse { event } => cmd_parse(event.as_deref()),
        Commands::CheckConfig => {
            let config = load_config(cli.config.as_deref())?;
            cmd_check_config(config)
        }
        Commands::Tools => cmd_tools(),
    }
}
