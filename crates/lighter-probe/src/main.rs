//! Lighter nonce probe - Entry Point
//!
//! Initializes every configured nonce slot for one account against the venue
//! and prints the resulting state.

use anyhow::Result;
use clap::Parser;
use lighter_nonce::ApiKeyIndex;
use lighter_probe::{Probe, ProbeConfig, ProbeOptions};
use tracing::info;

/// Lighter nonce slot probe
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via LIGHTER_PROBE_CONFIG env var)
    #[arg(short, long)]
    config: Option<String>,

    /// Refetch every slot from the venue
    #[arg(long)]
    force: bool,

    /// Refetch a single api key index after initialization (repeatable)
    #[arg(long = "refresh", value_name = "API_KEY_INDEX")]
    refresh: Vec<u8>,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,

    /// Append Prometheus metrics to the output
    #[arg(long)]
    metrics: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Determine config path: CLI arg > LIGHTER_PROBE_CONFIG env var > default
    let config_path = args
        .config
        .or_else(|| std::env::var("LIGHTER_PROBE_CONFIG").ok())
        .unwrap_or_else(|| "config/default.toml".to_string());

    let config = ProbeConfig::from_file(&config_path)?;

    match config.log_format {
        Some(format) => lighter_telemetry::init_logging_with(format)?,
        None => lighter_telemetry::init_logging()?,
    }

    info!("Starting lighter-probe v{}", env!("CARGO_PKG_VERSION"));
    info!(
        config_path = %config_path,
        account_index = %config.account_index,
        base_url = %config.base_url,
        "Configuration loaded"
    );

    let probe = Probe::new(&config)?;
    let options = ProbeOptions {
        force: args.force,
        refresh: args.refresh.into_iter().map(ApiKeyIndex::new).collect(),
    };
    let report = probe.run(&options).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", report.render_text());
    }

    if args.metrics {
        print!("{}", lighter_telemetry::Metrics::render()?);
    }

    Ok(())
}
