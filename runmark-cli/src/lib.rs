#![warn(missing_docs)]
//! Runmark CLI Library
//!
//! This crate hosts the orchestration engine and the CLI harness around it.
//! Use `runmark::run()` (or `runmark_cli::run()`) in your main function to get the
//! full runmark CLI experience with your registered workloads.
//!
//! # Example
//!
//! ```ignore
//! use runmark::prelude::*;
//!
//! #[workload]
//! fn train() -> u64 {
//!     expensive_training_step()
//! }
//!
//! fn main() -> anyhow::Result<()> {
//!     runmark_cli::run()
//! }
//! ```

mod config;
mod orchestrator;
mod planner;
mod progress;

pub use config::*;
pub use orchestrator::*;
pub use progress::{PROGRESS_REFRESH, ProgressWriter, progress_message};

use clap::{Parser, Subcommand};
use regex::Regex;
use runmark_core::{CommandWorkload, Workload, WorkloadDef, registered_workloads};
use runmark_report::{BenchmarkRecord, OutputFormat, format_human_output};
use std::io::IsTerminal;
use std::path::PathBuf;

/// Runmark CLI arguments
#[derive(Parser, Debug)]
#[command(name = "runmark")]
#[command(author, version, about = "Runmark - run workloads under resource monitors")]
pub struct Cli {
    /// Optional subcommand (List, Run, Exec, Init); defaults to Run
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Filter workloads by regex pattern
    #[arg(default_value = ".*")]
    pub filter: String,

    /// Sampling interval (e.g. 500ms, 1s)
    #[arg(long)]
    pub interval: Option<String>,

    /// Kill a workload that runs longer than this (e.g. 60s, 5m)
    #[arg(long)]
    pub timeout: Option<String>,

    /// Monitor to attach: cpu, memory, gpu (repeatable; replaces the config list)
    #[arg(long = "monitor", value_name = "KIND")]
    pub monitors: Vec<String>,

    /// When writers persist: on-completion or live
    #[arg(long)]
    pub persist: Option<String>,

    /// Output format: human, json
    #[arg(long)]
    pub format: Option<String>,

    /// Directory for JSON records
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Do not write JSON records
    #[arg(long)]
    pub no_write: bool,

    /// Keep the full sample series in each record
    #[arg(long)]
    pub series: bool,

    /// Hide the live progress spinner
    #[arg(long)]
    pub no_progress: bool,

    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Internal: Absorb cargo bench's --bench flag
    #[arg(long, hide = true)]
    pub bench: bool,
}

/// CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List all registered workloads
    List,
    /// Run registered workloads (default)
    Run,
    /// Run an external command as the workload
    Exec {
        /// Program and its arguments
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
    /// Write a default runmark.toml in the current directory
    Init,
}

/// Run the Runmark CLI with the process arguments.
///
/// In a re-executed workload process this runs the workload and exits
/// instead of parsing arguments.
pub fn run() -> anyhow::Result<()> {
    // Handle worker mode first (before any other initialization)
    runmark_core::run_if_worker();

    let cli = Cli::parse();
    run_with_cli(cli)
}

/// Run the Runmark CLI with pre-parsed arguments.
pub fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    runmark_core::run_if_worker();

    // Initialize logging
    let filter = if cli.verbose {
        "runmark=debug"
    } else {
        "runmark=info"
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();

    // Discover runmark.toml configuration (CLI flags override)
    let config = RunmarkConfig::discover().unwrap_or_default();

    let format = output_format(&cli, &config)?;

    match &cli.command {
        Some(Commands::List) => list_workloads(&cli),
        Some(Commands::Init) => write_default_config(),
        Some(Commands::Exec { command }) => {
            let (program, args) = command
                .split_first()
                .ok_or_else(|| anyhow::anyhow!("exec needs a program"))?;
            let workload = Workload::Command(CommandWorkload::new(program).args(args));
            let orchestrator = Orchestrator::new(build_orchestrator_config(&cli, &config, format)?)?;
            run_workloads(&orchestrator, vec![workload], format)
        }
        Some(Commands::Run) | None => {
            let workloads = filter_workloads(&cli)?
                .into_iter()
                .map(Workload::Registered)
                .collect::<Vec<_>>();
            if workloads.is_empty() {
                println!("No workloads found.");
                return Ok(());
            }
            let orchestrator = Orchestrator::new(build_orchestrator_config(&cli, &config, format)?)?;
            run_workloads(&orchestrator, workloads, format)
        }
    }
}

/// Output format from `--format`, else `[output] format`
fn output_format(cli: &Cli, config: &RunmarkConfig) -> anyhow::Result<OutputFormat> {
    let value = cli.format.as_deref().unwrap_or(&config.output.format);
    value
        .parse()
        .map_err(|e: String| anyhow::anyhow!("{} (expected human or json)", e))
}

/// Filter registered workloads by the CLI regex, sorted by name.
fn filter_workloads(cli: &Cli) -> anyhow::Result<Vec<&'static WorkloadDef>> {
    let filter_re = Regex::new(&cli.filter)
        .map_err(|e| anyhow::anyhow!("Invalid filter {:?}: {}", cli.filter, e))?;
    let plan = planner::build_plan(registered_workloads(), Some(&filter_re));
    Ok(plan.workloads)
}

fn list_workloads(cli: &Cli) -> anyhow::Result<()> {
    println!("Runmark Plan:");

    let workloads = filter_workloads(cli)?;
    for def in &workloads {
        let annotations: Vec<String> = def
            .annotations
            .iter()
            .map(|(k, v)| format!("{}: {}", k, v))
            .collect();
        let annotations = if annotations.is_empty() {
            String::new()
        } else {
            format!(" [{}]", annotations.join(", "))
        };
        println!("├── {}{} ({}:{})", def.name, annotations, def.file, def.line);
    }

    println!("{} workloads found.", workloads.len());
    Ok(())
}

fn write_default_config() -> anyhow::Result<()> {
    let path = std::env::current_dir()?.join(CONFIG_FILE_NAME);
    if path.exists() {
        anyhow::bail!("{} already exists", path.display());
    }
    std::fs::write(&path, RunmarkConfig::default_toml())?;
    println!("Wrote {}", path.display());
    Ok(())
}

/// Build an OrchestratorConfig by layering: runmark.toml values → CLI overrides.
pub fn build_orchestrator_config(
    cli: &Cli,
    config: &RunmarkConfig,
    format: OutputFormat,
) -> anyhow::Result<OrchestratorConfig> {
    let mut config = config.clone();

    if let Some(interval) = &cli.interval {
        config.runner.interval = interval.clone();
    }
    if let Some(timeout) = &cli.timeout {
        config.runner.timeout = Some(timeout.clone());
    }
    if !cli.monitors.is_empty() {
        config.runner.monitors = cli.monitors.clone();
    }
    if let Some(persist) = &cli.persist {
        config.runner.persist = persist.parse().map_err(|e: String| anyhow::anyhow!(e))?;
    }
    if cli.series {
        config.runner.keep_series = true;
    }
    if let Some(output) = &cli.output {
        config.output.directory = output.display().to_string();
    }

    let mut orchestrator = config.to_orchestrator_config()?;

    if !cli.no_write {
        orchestrator = orchestrator.with_writer(config.json_writer());
    }

    let show_progress =
        !cli.no_progress && format == OutputFormat::Human && std::io::stderr().is_terminal();
    if show_progress {
        orchestrator = orchestrator.with_writer(ProgressWriter::spec());
    }

    Ok(orchestrator)
}

fn run_workloads(
    orchestrator: &Orchestrator,
    workloads: Vec<Workload>,
    format: OutputFormat,
) -> anyhow::Result<()> {
    println!(
        "Running {} workload(s), sampling every {:?}...\n",
        workloads.len(),
        orchestrator.config().interval
    );

    let mut records: Vec<BenchmarkRecord> = Vec::with_capacity(workloads.len());
    let mut errors = 0usize;

    for workload in &workloads {
        match orchestrator.run(workload) {
            Ok(report) => {
                for (writer, error) in report.writer_failures() {
                    eprintln!("Warning: writer {} failed: {}", writer, error);
                }
                records.push(report.record);
            }
            Err(e) => {
                eprintln!("Error: {} failed: {}", workload.function_name(), e);
                errors += 1;
            }
        }
    }

    let output = match format {
        OutputFormat::Json => serde_json::to_string_pretty(&records)?,
        OutputFormat::Human => format_human_output(&records),
    };
    print!("{}", output);
    if format == OutputFormat::Json {
        println!();
    }

    let failed_workloads = records
        .iter()
        .filter(|r| r.outcome.as_ref().is_some_and(|o| !o.success))
        .count();

    if errors > 0 || failed_workloads > 0 {
        if errors > 0 {
            eprintln!("\n{} run(s) could not complete", errors);
        }
        if failed_workloads > 0 {
            eprintln!("\n{} workload(s) exited unsuccessfully", failed_workloads);
        }
        std::process::exit(1);
    }

    Ok(())
}
