//! # ben
//!
//! Entry point for the `ben` binary (§6): loads a playbook, builds a
//! `Framework` from it, and dispatches to one of three actions — `desc`
//! (print the normalized playbook), `run` (drive the plan and report),
//! or `analyst` (replay a previous recording and report). Every fallible
//! stage maps to one of the exit codes in `errors::exit`.

mod analyst;
mod driver;
mod errors;
mod eval;
mod model;
mod monitor;
mod playbook;
mod recorder;
mod reporter;
mod scheduler;
mod source;
mod statistics;
mod telemetry;
mod template;
mod value;

use clap::{Parser, Subcommand, ValueEnum};
use playbook::{Playbook, PlaybookError};
use scheduler::{Framework, RunResult};
use std::path::PathBuf;
use tracing::Level;

#[derive(Parser)]
#[command(name = "ben", version, about = "Declarative concurrent load and behavior testing engine")]
struct Cli {
    /// Path to the playbook document (YAML or JSON).
    #[arg(long, default_value = "ben.yaml", global = true)]
    playbook: PathBuf,

    /// Normalize camelCase playbook keys to snake_case before decoding.
    #[arg(long, global = true)]
    camel_name: bool,

    /// Verbose error output (full cause chain) and debug-level logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable OpenTelemetry trace export.
    #[arg(long, global = true)]
    otel: bool,

    /// OTLP collector endpoint (implies --otel if set).
    #[arg(long, global = true)]
    otel_endpoint: Option<String>,

    /// Action to perform. Defaults to `run` when omitted, matching the
    /// `-a <action>` contract.
    #[arg(short = 'a', long = "action", value_enum, global = true)]
    action: Option<ActionArg>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Clone, Copy)]
enum Command {
    /// Print the normalized, resolved playbook as sorted-key JSON.
    Desc,
    /// Run the plan and print the report.
    Run,
    /// Re-read a previous recording via the configured analyst and print
    /// the same report a run would have produced.
    Analyst,
}

#[derive(ValueEnum, Clone, Copy)]
enum ActionArg {
    Desc,
    Run,
    Analyst,
}

impl From<Command> for ActionArg {
    fn from(cmd: Command) -> Self {
        match cmd {
            Command::Desc => ActionArg::Desc,
            Command::Run => ActionArg::Run,
            Command::Analyst => ActionArg::Analyst,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let action = cli.command.map(ActionArg::from).or(cli.action).unwrap_or(ActionArg::Run);

    let mut telemetry_config = telemetry::TelemetryConfig::from_env();
    telemetry_config.log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    if let Some(endpoint) = &cli.otel_endpoint {
        telemetry_config.otlp_endpoint = Some(endpoint.clone());
    } else if cli.otel && telemetry_config.otlp_endpoint.is_none() {
        telemetry_config.otlp_endpoint = Some("http://localhost:4317".to_string());
    } else if !cli.otel {
        telemetry_config.otlp_endpoint = None;
    }

    if let Err(err) = telemetry::init_telemetry(telemetry_config) {
        eprintln!("warning: failed to initialize telemetry, falling back to plain logging: {err}");
    }

    let playbook = load_playbook(&cli);

    match action {
        ActionArg::Desc => match playbook.to_sorted_json() {
            Ok(json) => println!("{json}"),
            Err(err) => errors::fail("failed to render playbook", err.into(), errors::exit::PLAYBOOK_DECODE, cli.verbose),
        },
        ActionArg::Run => {
            let framework = build_framework(&playbook, cli.verbose);
            match framework.run().await {
                Ok(result) => print_report(&result, cli.verbose),
                Err(err) => errors::fail("run failed", err.into(), errors::exit::RUN, cli.verbose),
            }
        }
        ActionArg::Analyst => {
            let framework = build_framework(&playbook, cli.verbose);
            match framework.replay().await {
                Ok(result) => print_report(&result, cli.verbose),
                Err(err) => errors::fail("analyst replay failed", err.into(), errors::exit::ANALYST, cli.verbose),
            }
        }
    }

    telemetry::shutdown_telemetry();
}

fn load_playbook(cli: &Cli) -> Playbook {
    match Playbook::load(&cli.playbook, cli.camel_name) {
        Ok(p) => p,
        Err(err) => {
            let code = match &err {
                PlaybookError::Decode(_) => errors::exit::PLAYBOOK_DECODE,
                PlaybookError::Io { .. } | PlaybookError::Yaml(_) | PlaybookError::Json(_) => errors::exit::PLAYBOOK_LOAD,
            };
            errors::fail("failed to load playbook", err.into(), code, cli.verbose);
        }
    }
}

fn build_framework(playbook: &Playbook, verbose: bool) -> Framework {
    match Framework::build(playbook) {
        Ok(framework) => framework,
        Err(err) => errors::fail("failed to build framework", err.into(), errors::exit::FRAMEWORK_BUILD, verbose),
    }
}

fn print_report(result: &RunResult, verbose: bool) {
    let input = reporter::ReportInput {
        meta: &result.meta,
        metrics: &result.metrics,
        monitor_windows: &result.monitor_windows,
    };
    match reporter::render(&result.reporter_kind, &input) {
        Ok(text) => println!("{text}"),
        Err(err) => errors::fail("failed to render report", err.into(), errors::exit::RUN, verbose),
    }
}
