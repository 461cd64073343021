//! taskgate - bounded-concurrency task dispatch
//!
//! CLI entry point for running synthetic loads through the executors.

use std::fs;

use clap::{CommandFactory, Parser};
use colored::Colorize;
use eyre::{Context, Result};
use tracing::info;

use taskgate::cli::{Cli, Command, OutputFormat, get_log_path};
use taskgate::config::Config;
use taskgate::load::{LoadReport, run_load};

fn setup_logging(verbose: bool) -> Result<()> {
    let log_path = get_log_path();
    if let Some(log_dir) = log_path.parent() {
        fs::create_dir_all(log_dir).context("Failed to create log directory")?;
    }

    // Setup tracing subscriber - write to log file, not stdout/stderr
    let level = if verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };
    let log_file = fs::File::create(&log_path).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (verbose: {})", verbose);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    info!(
        "taskgate loaded config: variant={}, parallelism={}",
        config.dispatch.variant, config.dispatch.parallelism
    );

    match cli.command {
        Some(Command::Run {
            variant,
            parallelism,
            tasks,
            task_ms,
            format,
        }) => {
            let mut config = config;
            if let Some(variant) = variant {
                config.dispatch.variant = variant;
            }
            if let Some(parallelism) = parallelism {
                config.dispatch.parallelism = parallelism;
            }
            if let Some(tasks) = tasks {
                config.load.tasks = tasks;
            }
            if let Some(task_ms) = task_ms {
                config.load.task_ms = task_ms;
            }
            cmd_run(&config, format).await
        }
        Some(Command::Config) => cmd_config(&config),
        None => {
            // Default: print help
            Cli::command().print_help()?;
            println!();
            Ok(())
        }
    }
}

/// Run the synthetic load and print its report
async fn cmd_run(config: &Config, format: OutputFormat) -> Result<()> {
    config.validate()?;

    let report = run_load(
        config.dispatch.variant,
        config.dispatch.parallelism,
        config.load.tasks,
        config.load.task_duration(),
    )
    .await?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => print_report(&report),
    }
    Ok(())
}

fn print_report(report: &LoadReport) {
    println!("{}", format!("taskgate run ({})", report.variant).bold());
    println!("-----------------");
    println!("Parallelism:  {}", report.parallelism);
    println!("Tasks:        {} x {}ms", report.tasks, report.task_ms);
    println!("Elapsed:      {}ms", report.elapsed_ms);

    let finished = format!("{}/{}", report.finished, report.tasks);
    if report.finished == report.tasks {
        println!("Finished:     {}", finished.green());
    } else {
        println!("Finished:     {}", finished.red());
    }

    let stats = &report.stats;
    println!("Dispatched:   {}", stats.dispatched);
    println!("Rejected:     {}", stats.rejected);
    println!("Dropped:      {}", stats.dropped);
    println!("Peak running: {}", stats.peak_running);
}

/// Print the effective configuration
fn cmd_config(config: &Config) -> Result<()> {
    let yaml = serde_yaml::to_string(config).context("Failed to serialize config")?;
    print!("{}", yaml);
    Ok(())
}
