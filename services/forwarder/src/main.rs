//! Forwarding agent - ships records read from stdin to every configured output
//!
//! Usage:
//!   forwarder --config outputs.toml < records.jsonl
//!   producer | forwarder --config outputs.toml --json-logs
//!
//! Each stdin line is one JSON record:
//!   {"name": "cpu.load", "value": 0.7, "kind": "gauge", "tags": {"host": "web-1"}}

use anyhow::{Context, Result};
use clap::Parser;
use output_sink::{OutputRegistry, OutputsConfig, Record};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "forwarder")]
#[command(about = "Metrics forwarding agent")]
#[command(version)]
struct Args {
    /// Path to the outputs configuration file
    #[arg(short, long)]
    config: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Enable JSON logging format
    #[arg(long)]
    json_logs: bool,

    /// Print per-output metrics as JSON on stdout at exit
    #[arg(long)]
    print_metrics: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args)?;

    info!("Starting forwarder");
    info!("Configuration: {}", args.config);

    let config = OutputsConfig::from_file(&args.config).map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;
    if config.is_empty() {
        warn!("No outputs configured, records will be discarded");
    }

    let registry = OutputRegistry::build(&config)
        .with_context(|| format!("failed to build outputs from {}", args.config))?;
    info!("Outputs: {}", registry.ids().collect::<Vec<_>>().join(", "));

    let interrupted = tokio::select! {
        result = forward_stdin(&registry) => {
            result?;
            info!("Input closed");
            false
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
            true
        }
    };

    let snapshots = registry.shutdown_all().await;
    for snapshot in &snapshots {
        info!(
            "Output '{}': {} delivered, {} failed, {} dropped",
            snapshot.sink_name,
            snapshot.records_delivered,
            snapshot.records_failed,
            snapshot.records_dropped
        );
    }

    if args.print_metrics {
        println!("{}", serde_json::to_string_pretty(&snapshots)?);
    }

    if interrupted {
        // The blocking stdin read cannot be cancelled and would keep the
        // runtime from shutting down
        std::process::exit(0);
    }

    Ok(())
}

/// Feed stdin lines to every output until EOF
async fn forward_stdin(registry: &OutputRegistry) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut line_number = 0u64;

    while let Some(line) = lines.next_line().await.context("failed to read stdin")? {
        line_number += 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match serde_json::from_str::<Record>(line) {
            Ok(record) => {
                registry.accept_all(&record);
            }
            Err(e) => warn!("Skipping line {}: {}", line_number, e),
        }
    }

    Ok(())
}

fn init_logging(args: &Args) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(args.log_level.to_lowercase()))
        .context("invalid log level")?;

    // stdout is reserved for --print-metrics
    if args.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }

    Ok(())
}
