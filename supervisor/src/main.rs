//! Sequential task supervisor demonstrations.
//!
//! Each subcommand runs one demonstration pipeline and prints its outcome as
//! pretty JSON on stdout. A failing pipeline still prints its outcome and
//! exits with `exit_codes::FAILED`.

mod demo;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use supervisor::io::config::{init_config, load_config};
use supervisor::{
    DependencyResolver, ScopedRun, StageResult, StageValue, SupervisorConfig, Task,
    TaskDefinition, TaskRunner, TracingLogger, exit_codes, logging,
};
use tracing::info;

const DEFAULT_CONFIG_PATH: &str = "supervisor.toml";

#[derive(Parser)]
#[command(
    name = "supervisor",
    version,
    about = "Run demonstration pipelines of the sequential task supervisor"
)]
struct Cli {
    /// Path to the TOML config. Missing files fall back to defaults.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch, process and save data through shared task data.
    Basic,
    /// Pipeline whose second stage fails; the third never runs.
    Failing,
    /// Conditional pipeline that skips the review stage.
    Conditional,
    /// Pipeline run inside both state and dependency scopes.
    Effects,
    /// Pipeline whose stage panics; the panic is reported as a failure.
    Fault,
    /// Write the default config file.
    InitConfig {
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
    },
}

/// Outcome of a plain task run plus the per-stage results it recorded.
#[derive(Serialize)]
struct Report<T: Serialize> {
    result: StageResult<T>,
    stages: Vec<StageReport>,
}

#[derive(Serialize)]
struct StageReport {
    name: String,
    result: Option<StageResult<StageValue>>,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let config_path = cli
        .config
        .as_deref()
        .unwrap_or(Path::new(DEFAULT_CONFIG_PATH));
    if let Command::InitConfig { force } = cli.command {
        let config = init_config(config_path, force)?;
        logging::init(&config.log_filter);
        info!(path = %config_path.display(), "config written");
        println!("{}", config_path.display());
        return Ok(exit_codes::OK);
    }

    let config = load_config(config_path)?;
    logging::init(&config.log_filter);

    match cli.command {
        Command::Basic => {
            let mut task = demo::data_pipeline(&config);
            let result = task.run();
            emit(&report(&task, result))
        }
        Command::Failing => {
            let mut task = demo::failing_pipeline(&config);
            let result = task.run();
            emit(&report(&task, result))
        }
        Command::Conditional => {
            let mut task =
                Task::from_definition(demo::ReviewPipeline::new()).with_config(config.clone());
            let result = task.run_conditional();
            emit(&report(&task, result))
        }
        Command::Effects => run_effects(&config),
        Command::Fault => {
            let mut task = demo::faulty_pipeline(&config);
            let result = task.run();
            emit(&report(&task, result))
        }
        Command::InitConfig { .. } => Ok(exit_codes::OK),
    }
}

fn run_effects(config: &SupervisorConfig) -> Result<i32> {
    let resolver = DependencyResolver::new()
        .with_logger(Arc::new(TracingLogger))
        .with_repository(demo::MemoryRepository::default())
        .with_config(json!({
            "backtrace_frames": config.backtrace_frames,
            "environment": "demo",
        }));
    let runner = TaskRunner::new(resolver);

    let mut task = demo::announced_pipeline(config);
    let run = runner.run_scoped(&mut task);
    info!(history = run.history.len(), "effects pipeline finished");
    emit_scoped(&run)
}

fn report<T: Serialize, D: TaskDefinition>(task: &Task<D>, result: StageResult<T>) -> Report<T> {
    let stages = task
        .executed_stages()
        .iter()
        .map(|stage| StageReport {
            name: stage.name().to_string(),
            result: stage.result().cloned(),
        })
        .collect();
    Report { result, stages }
}

fn emit<T: Serialize>(report: &Report<T>) -> Result<i32> {
    print_json(report)?;
    Ok(code_for(report.result.is_ok()))
}

fn emit_scoped<T: Serialize>(run: &ScopedRun<T>) -> Result<i32> {
    print_json(run)?;
    Ok(code_for(run.result.is_ok()))
}

fn print_json(value: &impl Serialize) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("serialize run report")?;
    println!("{rendered}");
    Ok(())
}

fn code_for(success: bool) -> i32 {
    if success {
        exit_codes::OK
    } else {
        exit_codes::FAILED
    }
}
