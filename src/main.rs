// ABOUTME: CLI entry point for stage-migrator
// ABOUTME: Parses operation tokens, prints run banners, and maps the run report to an exit status

use anyhow::{Context, Result};
use chrono::Local;
use clap::Parser;
use stage_migrator::commands;
use stage_migrator::migration::{Operation, PhaseSet};
use stage_migrator::utils;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Mutex;
use std::time::Instant;

const BANNER: &str = "#################################";
const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Parser)]
#[command(name = "stage-migrator")]
#[command(
    about = "Bulk table migration through S3-compatible object storage",
    long_about = "Exports tables on the source server, uploads the export files to an \
                  object storage bucket with multipart uploads, and loads them into the \
                  target database as external tables."
)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    /// Write the detailed log to this file instead of the console
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Disable the transfer progress bar
    #[arg(long)]
    no_progress: bool,

    /// Operations to run: RUNALL, or any combination of EXPORT, PUT and LOAD
    #[arg(value_enum, ignore_case = true)]
    operations: Vec<Operation>,
}

fn init_logging(log_file: Option<&Path>) -> Result<()> {
    // Initialize logging - default to INFO level if RUST_LOG not set
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    match log_file {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create log file at {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }

    Ok(())
}

fn print_usage() {
    println!("USAGE:  stage-migrator [--config <PATH>] <OPERATION>...");
    println!("Valid Operations: RUNALL, EXPORT, PUT, LOAD");
    println!(
        "NOTE:  RUNALL can be used only by itself.  EXPORT, PUT and LOAD can be used in any combination."
    );
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let phases = match PhaseSet::from_operations(&cli.operations) {
        Ok(phases) => phases,
        Err(e) => {
            eprintln!("Error: {}", e);
            print_usage();
            return ExitCode::from(2);
        }
    };

    if let Err(e) = init_logging(cli.log_file.as_deref()) {
        eprintln!("Error: {:#}", e);
        return ExitCode::FAILURE;
    }

    let started = Instant::now();
    let start_time = Local::now().format(TIME_FORMAT).to_string();

    println!("{}", BANNER);
    match &cli.log_file {
        Some(path) => println!(
            "Migration started. See {} for process details.",
            path.display()
        ),
        None => println!("Migration started."),
    }
    println!("PROCESS START TIME: {}", start_time);
    println!();
    tracing::info!("Migration started at {}", start_time);

    let result = commands::migrate(&cli.config, &phases, !cli.no_progress).await;

    let end_time = Local::now().format(TIME_FORMAT).to_string();
    let elapsed = utils::format_elapsed(started.elapsed());
    tracing::info!("Migration finished at {} (total {})", end_time, elapsed);

    let status = match result {
        Ok(report) => {
            for line in report.summary_lines() {
                println!("{}", line);
            }
            if report.has_failures() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            }
        }
        Err(e) => {
            tracing::error!("Migration failed: {:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    };

    println!();
    println!("PROCESS END TIME: {}", end_time);
    println!("TOTAL PROCESS TIME: {}", elapsed);
    println!("Migration completed.");
    println!("{}", BANNER);

    status
}
