//! Request Debug Bar CLI
//!
//! Replays recorded request scripts through the collector and browses
//! persisted request snapshots.

use anyhow::Result;
use clap::{Parser, Subcommand};
use env_logger::Env;
use std::path::PathBuf;

use request_debugbar::commands::{
    execute_list, execute_replay, execute_show, validate_args, ReplayArgs,
};
use request_debugbar::utils::config::SCHEMA_VERSION;

/// Request Debug Bar - request-scoped performance metrics
#[derive(Parser, Debug)]
#[command(name = "debugbar")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Available commands
#[derive(Subcommand, Debug)]
enum Commands {
    /// Replay a request script and write its report
    Replay {
        /// Path to the JSON request script
        #[arg(short, long)]
        script: PathBuf,

        /// Options TOML file
        #[arg(short, long, env = "DEBUGBAR_CONFIG")]
        config: Option<PathBuf>,

        /// Output path for the JSON report
        #[arg(short, long, default_value = "report.json")]
        output: PathBuf,

        /// Write the compact snapshot instead of the full report
        #[arg(long)]
        compact: bool,

        /// Print text summary to stdout
        #[arg(long)]
        summary: bool,
    },

    /// List recorded request snapshots, newest first
    List {
        /// Snapshot storage directory
        #[arg(short, long, default_value = "storage/temp/debugbar", env = "DEBUGBAR_STORAGE")]
        dir: PathBuf,

        /// Show at most this many snapshots
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Print one recorded snapshot
    Show {
        /// Snapshot key
        key: String,

        /// Snapshot storage directory
        #[arg(short, long, default_value = "storage/temp/debugbar", env = "DEBUGBAR_STORAGE")]
        dir: PathBuf,
    },

    /// Validate a report JSON file
    Validate {
        /// Path to report JSON file
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Display version information
    Version,
}

fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Setup logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level)).init();

    // Execute command
    match cli.command {
        Commands::Replay {
            script,
            config,
            output,
            compact,
            summary,
        } => {
            let args = ReplayArgs {
                script,
                config,
                output,
                compact,
                print_summary: summary,
            };

            // Validate args first
            validate_args(&args)?;

            execute_replay(args)?;
        }

        Commands::List { dir, limit } => {
            execute_list(&dir, limit)?;
        }

        Commands::Show { key, dir } => {
            execute_show(&dir, &key)?;
        }

        Commands::Validate { file } => {
            validate_report_file(file)?;
        }

        Commands::Version => {
            display_version();
        }
    }

    Ok(())
}

/// Validate a report JSON file
///
/// **Private** - internal command implementation
fn validate_report_file(file_path: PathBuf) -> Result<()> {
    use request_debugbar::output::read_report;
    use serde_json::Value;

    println!("Validating report: {}", file_path.display());

    let report: Value = read_report(&file_path)?;

    for section in ["performance", "database", "request", "memory"] {
        if !report.get(section).is_some_and(Value::is_object) {
            anyhow::bail!("Missing report section: {}", section);
        }
    }

    println!("✓ Valid report JSON");
    println!("  Generated: {}", report["generated_at"].as_str().unwrap_or("N/A"));
    println!(
        "  Request: {} {}",
        report["request"]["method"].as_str().unwrap_or("N/A"),
        report["request"]["url"].as_str().unwrap_or("N/A")
    );
    println!("  Execution: {}ms", report["performance"]["execution_time"]);
    println!("  Queries: {}", report["database"]["query_count"]);
    println!("  Status: {}", report["performance"]["status"].as_str().unwrap_or("N/A"));

    Ok(())
}

/// Display version information
///
/// **Private** - internal command implementation
fn display_version() {
    println!("Request Debug Bar v{}", env!("CARGO_PKG_VERSION"));
    println!("Report Schema: v{}", SCHEMA_VERSION);
    println!();
    println!("Request-scoped performance metrics for web applications.");
}
