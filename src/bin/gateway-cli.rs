use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use fragment_gateway::aggregation::StrategyRegistry;
use fragment_gateway::config::{load_config, GatewayConfig};
use fragment_gateway::fragments::{DiskFragmentStore, FragmentStore};
use fragment_gateway::routing::{AggregationError, ConfigAggregator};

#[derive(Parser)]
#[command(name = "gateway-cli")]
#[command(about = "Management CLI for the fragment gateway", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8081")]
    url: String,

    #[arg(short, long, default_value = "CHANGE_ME_IN_PRODUCTION")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Merge a fragment directory offline and print the report
    Check {
        dir: PathBuf,

        /// Gateway config supplying route defaults
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Show the running gateway's status
    Status,
    /// Dump the active routing table
    Table,
    /// Force a reload of all fragments
    Reload,
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let (method, path) = match cli.command {
        Commands::Check { dir, config } => return check(dir, config),
        Commands::Status => (reqwest::Method::GET, "status"),
        Commands::Table => (reqwest::Method::GET, "table"),
        Commands::Reload => (reqwest::Method::POST, "reload"),
    };

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );

    let res = reqwest::Client::new()
        .request(method, format!("{}/admin/{}", cli.url.trim_end_matches('/'), path))
        .headers(headers)
        .send()
        .await?;
    print_response(res).await
}

/// Run the merge the gateway would run at startup, without serving.
fn check(dir: PathBuf, config: Option<PathBuf>) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let config = match config {
        Some(path) => load_config(&path)?,
        None => GatewayConfig::default(),
    };
    let store = DiskFragmentStore::new(dir, Duration::from_secs(config.fragments.poll_interval_secs));
    let aggregator = ConfigAggregator::new(config.defaults, Arc::new(StrategyRegistry::default()))
        .with_request_timeout(Duration::from_secs(config.listener.request_timeout_secs));

    let fragments = store.list()?;
    match aggregator.merge(&fragments) {
        Ok(outcome) => {
            let table = &outcome.table;
            let summary = json!({ "contents": table.contents(), "report": outcome.report() });
            println!("{}", serde_json::to_string_pretty(&summary)?);
            eprintln!(
                "{} routes, {} aggregates, {} warnings",
                table.route_count(),
                table.aggregate_count(),
                outcome.report().warnings().count()
            );
            Ok(ExitCode::SUCCESS)
        }
        Err(AggregationError::NoValidFragments { report }) => {
            println!("{}", serde_json::to_string_pretty(&report)?);
            eprintln!("Error: no valid fragments");
            Ok(ExitCode::FAILURE)
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn print_response(res: reqwest::Response) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let status = res.status();
    let text = res.text().await?;
    match serde_json::from_str::<Value>(&text) {
        Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
        Err(_) => println!("{}", text),
    }
    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}
