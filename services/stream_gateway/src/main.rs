//! Stream gateway entry point

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use stream_gateway::sim::{SimPriceProvider, StaticDirectory, StaticVerifier};
use stream_gateway::{Collaborators, GatewayConfig, GatewayServer};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path (TOML or JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind address
    #[arg(long)]
    bind_address: Option<String>,

    /// Port
    #[arg(short, long)]
    port: Option<u16>,

    /// Redis connection target for the shared rate-limit store
    #[arg(long)]
    redis_url: Option<String>,

    /// Poll interval during trading hours, in seconds
    #[arg(long)]
    poll_interval: Option<u64>,

    /// Maximum concurrent streaming connections
    #[arg(long)]
    max_connections: Option<usize>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stream_gateway=info,ratelimit=info,warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    info!("Starting stream gateway");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = match &args.config {
        Some(path) => GatewayConfig::load(path)?,
        None => GatewayConfig::default(),
    };
    config.apply_env_overrides();

    // CLI flags win over file and environment.
    if let Some(bind_address) = args.bind_address {
        config.bind_address = bind_address;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(url) = args.redis_url {
        config.limiter.store = stream_gateway::config::StoreConfig::Redis { url };
    }
    if let Some(secs) = args.poll_interval {
        config.poll.trading_interval_secs = secs;
    }
    if let Some(max) = args.max_connections {
        config.max_connections = max;
    }

    info!("Configuration loaded: {:?}", config);

    // The binary runs against simulated collaborators; production embeds
    // the library and injects real ones.
    let collaborators = Collaborators {
        verifier: Arc::new(StaticVerifier::from_config(&config.sim)),
        directory: Arc::new(StaticDirectory::from_config(&config.sim)),
        provider: Arc::new(SimPriceProvider::new()),
    };

    let server = GatewayServer::new(config, collaborators)?;

    let shutdown_signal = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install CTRL+C signal handler: {}", e);
        }
        info!("Shutdown signal received");
    };

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("Stream gateway error: {}", e);
                return Err(e.into());
            }
        }
        _ = shutdown_signal => {
            info!("Shutting down stream gateway");
        }
    }

    Ok(())
}
