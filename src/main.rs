//! Fragment-driven API gateway.
//!
//! # Architecture Overview
//!
//! ```text
//!                        ┌──────────────────────────────────────────────────────────┐
//!                        │                        GATEWAY                           │
//!                        │                                                          │
//!   fragments/*.toml     │  ┌───────────┐   ┌────────────┐   ┌───────────────────┐  │
//!   fragments/*.json ────┼─▶│ fragments │──▶│ aggregator │──▶│  RoutingTable vN  │  │
//!                        │  │  + watch  │   │  (merge)   │   │  (ArcSwap)        │  │
//!                        │  └───────────┘   └────────────┘   └─────────┬─────────┘  │
//!                        │                                            │ snapshot   │
//!   Client Request       │  ┌───────────┐   ┌────────────┐            ▼            │
//!   ─────────────────────┼─▶│   http    │──▶│  resolve   │──┬─▶ route ──▶ client ──┼──▶ Downstream
//!                        │  │  server   │   └────────────┘  │                      │
//!                        │  └───────────┘                   └─▶ aggregate          │
//!   Client Response      │        ▲                             fan-out + merge ───┼──▶ Downstreams
//!   ◀────────────────────┼────────┘                                                │
//!                        │                                                          │
//!                        │  admin API · metrics · tracing · signals/shutdown        │
//!                        └──────────────────────────────────────────────────────────┘
//! ```

use clap::Parser;
use std::path::PathBuf;

use fragment_gateway::config::{load_config, GatewayConfig};
use fragment_gateway::lifecycle::{signals, startup, Gateway, Shutdown};
use fragment_gateway::observability::init_logging;

#[derive(Parser)]
#[command(name = "fragment-gateway")]
#[command(about = "API gateway serving routes merged from config fragments", long_about = None)]
struct Args {
    /// Gateway configuration file (TOML). Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the fragment directory from the config file.
    #[arg(short, long)]
    fragments: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => GatewayConfig::default(),
    };
    if let Some(dir) = args.fragments {
        config.fragments.directory = dir;
    }

    init_logging(&config.observability.log_level)?;
    tracing::info!("fragment-gateway v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.listener.bind_address,
        fragments = %config.fragments.directory,
        request_timeout_secs = config.listener.request_timeout_secs,
        "Configuration loaded"
    );

    startup::start_metrics(&config)?;

    let shutdown = Shutdown::new();
    signals::spawn_signal_handler(shutdown.clone());

    let gateway = Gateway::bootstrap(config).await?;
    gateway.run(&shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
