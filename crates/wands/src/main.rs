//! Wands binary entry point.
//!
//! Usage:
//!   wands serve --source <doc.json>
//!   wands fetch --file <name> <AXIS>...
//!   wands cache-location

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axis_protocol::{AxisResponder, JsonSourceStore};
use axis_stream::TcpTransport;
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::{error, info};
use wands::{CacheOrchestrator, WandsConfig};

/// How long `fetch` waits for population notifications before exiting.
const NOTIFY_GRACE: Duration = Duration::from_secs(5);

/// Wands: on-demand remote dataset access with a local cache.
#[derive(Parser, Debug)]
#[command(name = "wands", version)]
#[command(about = "On-demand remote dataset access with a local cache")]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Address the data channels bind/connect to.
    #[arg(long, global = true, env = "WANDS_ADDRESS")]
    address: Option<String>,

    /// Port shared by the data channels.
    #[arg(long, global = true, env = "WANDS_PORT")]
    port: Option<u16>,

    /// Connection identifier naming the consumer/producer pairing.
    #[arg(long, global = true, env = "WANDS_CONNECTION_ID")]
    connection_id: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "WANDS_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Answer axis requests from a JSON dataset document until Ctrl-C.
    Serve {
        /// Nested JSON document holding the datasets.
        #[arg(long)]
        source: PathBuf,
    },

    /// Request signals of a file, using the local cache where possible.
    Fetch {
        /// Logical file the signals belong to.
        #[arg(long)]
        file: String,

        /// Cache directory.
        #[arg(long, env = "WANDS_CACHE_DIR")]
        cache_dir: Option<PathBuf>,

        /// Signal paths to request.
        #[arg(required = true)]
        axes: Vec<String>,
    },

    /// Print where the local cache lives.
    CacheLocation {
        /// Cache directory.
        #[arg(long, env = "WANDS_CACHE_DIR")]
        cache_dir: Option<PathBuf>,
    },
}

fn load_config(args: &Args) -> anyhow::Result<WandsConfig> {
    let mut config = WandsConfig::from_env().context("Failed to load configuration")?;

    if let Some(address) = &args.address {
        config.params.address = address.clone();
    }
    if let Some(port) = args.port {
        config.params.port = port;
    }
    if let Some(id) = &args.connection_id {
        config.connection_id = id.as_str().into();
    }
    match &args.command {
        Command::Fetch {
            cache_dir: Some(dir),
            ..
        }
        | Command::CacheLocation {
            cache_dir: Some(dir),
        } => config.cache_dir = dir.clone(),
        _ => {}
    }

    Ok(config)
}

async fn serve(config: WandsConfig, source: PathBuf) -> anyhow::Result<()> {
    let store = JsonSourceStore::open(&source)
        .await
        .with_context(|| format!("Failed to load {}", source.display()))?;
    let transport = Arc::new(TcpTransport::new(config.params.clone()));
    let responder = AxisResponder::new(transport, &config.connection_id, Arc::new(store));

    info!(
        source = %source.display(),
        endpoint = %config.params.endpoint(),
        connection = %config.connection_id,
        "Serving datasets"
    );

    responder
        .serve_until(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Received shutdown signal, exiting...");
        })
        .await?;
    Ok(())
}

async fn fetch(config: WandsConfig, file: String, axes: Vec<String>) -> anyhow::Result<()> {
    let orchestrator = CacheOrchestrator::from_config(&config).await?;
    info!(
        cache = %orchestrator.cache_location(),
        endpoint = %config.params.endpoint(),
        connection = %config.connection_id,
        "Configuration loaded"
    );

    let result = orchestrator.request(&file, &axes).await;
    orchestrator.flush_notifications(NOTIFY_GRACE).await;
    let data = result?;

    let summary: BTreeMap<&String, serde_json::Value> = data
        .iter()
        .map(|(name, payload)| {
            (
                name,
                json!({ "dtype": payload.dtype().as_str(), "shape": payload.shape }),
            )
        })
        .collect();
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging via observability crate
    observability::init_with_config(observability::LogConfig {
        service_name: "wands".into(),
        default_level: args.log_level.clone(),
        also_stderr: true,
        ..Default::default()
    });

    let config = load_config(&args)?;

    let result = match args.command {
        Command::Serve { source } => serve(config, source).await,
        Command::Fetch { file, axes, .. } => fetch(config, file, axes).await,
        Command::CacheLocation { .. } => {
            let orchestrator = CacheOrchestrator::from_config(&config).await?;
            println!("{}", orchestrator.cache_location());
            Ok(())
        }
    };

    if let Err(e) = &result {
        error!(error = %e, "wands exited with error");
    }
    result
}
