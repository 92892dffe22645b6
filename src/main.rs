//! HostScore daemon entry point.
//!
//! Loads configuration, connects the database and the per-network
//! daemons, assembles the observation node and runs it until interrupted.

use std::sync::Arc;

use clap::Parser;
use eyre::{eyre, WrapErr};
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use hostscore::clients::{
    http_client, DaemonChainClient, DaemonSyncer, DaemonWallet, RhpGatewayClient,
};
use hostscore::config::Settings;
use hostscore::exchange::HttpExchangeRate;
use hostscore::geo::IpInfoLocator;
use hostscore::ports::resolver::DnsResolver;
use hostscore::service::{NetworkAdapters, Node};
use hostscore::store::PostgresPersistence;
use hostscore::types::Network;

/// HostScore observation daemon
#[derive(Parser, Debug)]
#[command(name = "hostscored")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Persistence directory
    #[arg(long)]
    dir: Option<String>,

    /// TCP address the update feed listens on
    #[arg(long)]
    portal: Option<String>,

    /// Geolocation service token
    #[arg(long)]
    token: Option<String>,

    /// Networks to observe (repeatable); defaults to every configured one
    #[arg(long = "network")]
    networks: Vec<String>,

    /// Environment name for layered configuration files
    #[arg(short, long, default_value = "production")]
    env: String,

    /// Explicit configuration file, bypassing the layered lookup
    #[arg(short, long)]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let mut settings = match &cli.config {
        Some(path) => Settings::from_file(path),
        None => Settings::load(&cli.env),
    }
    .wrap_err("failed to load configuration")?;

    // CLI flags override the configuration files.
    if let Some(dir) = cli.dir {
        settings.node.dir = dir;
    }
    if let Some(portal) = cli.portal {
        settings.portal.listen = portal;
    }
    if let Some(token) = cli.token {
        settings.geolocation.token = token;
    }
    if !cli.networks.is_empty() {
        settings
            .networks
            .retain(|n| cli.networks.contains(&n.name));
        if settings.networks.is_empty() {
            return Err(eyre!(
                "none of the requested networks are configured: {:?}",
                cli.networks
            ));
        }
    }
    settings
        .validate()
        .map_err(|errors| eyre!("invalid configuration:\n  {}", errors.join("\n  ")))?;

    init_logging(&settings, cli.verbose)?;
    info!(version = hostscore::VERSION, node = %settings.node.name, "Starting HostScore");

    let pool = PgPoolOptions::new()
        .max_connections(settings.database.max_connections)
        .min_connections(settings.database.min_connections)
        .acquire_timeout(settings.database.connect_timeout())
        .connect(&settings.database.url)
        .await
        .wrap_err("failed to connect to the database")?;
    let persistence = Arc::new(PostgresPersistence::new(pool));
    persistence
        .run_migrations()
        .await
        .map_err(|e| eyre!("migrations failed: {e}"))?;

    let http = http_client().map_err(|e| eyre!("{e}"))?;
    let token = CancellationToken::new();

    let mut adapters = Vec::with_capacity(settings.networks.len());
    let mut pollers = Vec::new();
    for network_settings in &settings.networks {
        let network: Network = network_settings
            .name
            .parse()
            .map_err(|e| eyre!("{e}"))?;
        let chain = Arc::new(DaemonChainClient::new(
            http.clone(),
            network_settings.chain_url.clone(),
            network,
        ));
        pollers.push(tokio::spawn(DaemonChainClient::run_event_poller(
            Arc::clone(&chain),
            token.clone(),
        )));
        let wallet = DaemonWallet::connect(http.clone(), network_settings.wallet_url.clone())
            .await
            .map_err(|e| eyre!("wallet for {network}: {e}"))?;
        adapters.push(NetworkAdapters {
            network,
            chain,
            wallet: Arc::new(wallet),
            syncer: Arc::new(DaemonSyncer::new(
                http.clone(),
                network_settings.syncer_url.clone(),
            )),
            rhp: Arc::new(RhpGatewayClient::new(
                http.clone(),
                network_settings.rhp_url.clone(),
            )),
        });
    }

    let node = Node::build(
        settings.clone(),
        persistence,
        adapters,
        Arc::new(DnsResolver::new()),
        Arc::new(IpInfoLocator::new(
            http.clone(),
            settings.geolocation.url.clone(),
            settings.geolocation.token.clone(),
        )),
        Arc::new(HttpExchangeRate::new(http, settings.exchange.url.clone())),
    )
    .await
    .map_err(|e| eyre!("node assembly failed: {e}"))?;

    // Ctrl-C flips the token; every loop drains at its next suspension
    // point and cancelled probes are never persisted.
    let interrupt = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, shutting down");
            interrupt.cancel();
        }
    });

    node.run(token).await.map_err(|e| eyre!("{e}"))?;
    for poller in pollers {
        poller.abort();
    }
    info!("Shutdown complete");
    Ok(())
}

fn init_logging(settings: &Settings, verbose: bool) -> eyre::Result<()> {
    let level = if verbose {
        "debug".to_owned()
    } else {
        settings.logging.level.clone()
    };
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&level))
        .wrap_err("invalid log filter")?;

    if settings.logging.format == "json" {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .compact()
            .init();
    }
    Ok(())
}
