//! bxfeed-connector: hub feed binary
//!
//! Subscribes to the configured hub channels, logs decoded events and serves
//! health and metrics. SIGINT stops the feed, SIGHUP restarts the session.

mod sink;

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bxfeed_connector_lib::{
    resolve_credentials, run_server, ApiCredentials, ClientConfig, EnvResolver,
    FeedOrchestrator, HandlerRegistry, ResolverError, RestAccessors, ServerState,
    SignalrTransport, SubscriptionClient,
};
use bxfeed_exchange_bittrex::BittrexClient;
use bxfeed_metadata::{Environment, Feed, KeyType};
use bxfeed_middleware::CallOptions;

use crate::sink::LogSink;

type Orchestrator = FeedOrchestrator<SignalrTransport, BittrexClient>;

/// Open orders fetched per poll
const POLL_ORDER_LIMIT: usize = 100;

#[derive(Parser, Debug)]
#[command(name = "bxfeed-connector")]
#[command(about = "Authenticated hub feed connector")]
struct Args {
    /// Path to feed configuration file
    #[arg(short, long)]
    feed: PathBuf,

    /// Path to environment configuration file
    #[arg(short, long)]
    env: PathBuf,

    /// Health server bind address
    #[arg(long, default_value = "0.0.0.0:8080")]
    health_addr: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let feed = Feed::load(&args.feed)?;
    info!(feed = %feed.name, endpoint = %feed.endpoint, "Loaded feed configuration");
    if !feed.is_enabled() {
        error!(feed = %feed.name, "Feed is disabled");
        return Err(format!("feed {} is disabled", feed.name).into());
    }

    let env_config = Environment::load(&args.env)?;
    info!(env = %env_config.name, "Loaded environment configuration");
    if env_config.feed != feed.name {
        warn!(env_feed = %env_config.feed, feed = %feed.name, "Environment targets a different feed");
    }

    let health_addr: SocketAddr = args.health_addr.parse()?;
    let credentials = load_credentials(&env_config)?;
    let authenticated = credentials.is_some();

    let transport = SignalrTransport::new(&feed.endpoint)?;
    let mut client = SubscriptionClient::new(
        transport,
        ClientConfig {
            feed: feed.name.clone(),
            hub: feed.hub.clone(),
            heartbeat_timeout: feed.heartbeat_timeout(),
            invoke_timeout: feed.invoke_timeout(),
        },
    );
    if let Some(credentials) = credentials.clone() {
        client = client.with_credentials(credentials);
    }

    let mut registry = HandlerRegistry::new();
    for category in feed.categories() {
        registry.register(category, Arc::new(LogSink));
    }

    let rest = BittrexClient::new(feed.rest_url.clone(), credentials)?;
    let accessors = RestAccessors::new(rest, &env_config.cache);
    let orchestrator: Arc<Orchestrator> = Arc::new(FeedOrchestrator::new(
        client,
        registry,
        feed.markets(),
        accessors,
    ));

    // Health server
    let state = ServerState::new(feed.name.clone(), orchestrator.client().connected_handle());
    tokio::spawn(async move {
        if let Err(e) = run_server(health_addr, state).await {
            error!(error = %e, "Health server failed");
        }
    });

    // Handle Ctrl+C
    let stopper = Arc::clone(&orchestrator);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received shutdown signal");
        stopper.stop();
    });

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut hangup = signal(SignalKind::hangup())?;
        let restarter = Arc::clone(&orchestrator);
        tokio::spawn(async move {
            while hangup.recv().await.is_some() {
                info!("Received SIGHUP, restarting feed");
                restarter.restart();
            }
        });
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    if let Some(secs) = env_config.poll_interval_secs.filter(|s| *s > 0) {
        info!(interval_secs = secs, "Starting REST poller");
        tokio::spawn(poll_rest(
            Arc::clone(&orchestrator),
            Duration::from_secs(secs),
            authenticated,
            shutdown_rx,
        ));
    }

    let result = orchestrator.run().await;
    shutdown_tx.send(true).ok();

    match result {
        Ok(()) => {
            info!("Connector stopped");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Connector terminated");
            Err(e.into())
        }
    }
}

/// API credentials from the environment's api_key entry. Missing optional
/// credentials run the feed unauthenticated.
fn load_credentials(env_config: &Environment) -> Result<Option<ApiCredentials>, ResolverError> {
    let Some((name, spec)) = env_config.key_of_type(KeyType::ApiKey) else {
        warn!("No api_key in environment config, running unauthenticated");
        return Ok(None);
    };
    let Some(source) = spec.source.as_deref() else {
        warn!(key = name, "api_key has no source, running unauthenticated");
        return Ok(None);
    };

    match resolve_credentials(&EnvResolver::new(), source) {
        Ok(credentials) => {
            info!(key = name, "Loaded API credentials");
            Ok(Some(credentials))
        }
        Err(e) if spec.required != Some(true) => {
            warn!(key = name, error = %e, "API credentials unavailable, running unauthenticated");
            Ok(None)
        }
        Err(e) => {
            error!(key = name, error = %e, source = %source, "Failed to resolve required credentials");
            Err(e)
        }
    }
}

/// Periodically refresh the memoized REST views
async fn poll_rest(
    orchestrator: Arc<Orchestrator>,
    every: Duration,
    authenticated: bool,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(every);
    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shutdown.changed() => return,
        }

        match orchestrator.tickers(CallOptions::default()).await {
            Ok(tickers) => info!(markets = tickers.len(), "Polled tickers"),
            Err(e) => warn!(error = %e, "Ticker poll failed"),
        }
        if !authenticated {
            continue;
        }
        match orchestrator.balances(true, CallOptions::default()).await {
            Ok(balances) => info!(currencies = balances.len(), "Polled balances"),
            Err(e) => warn!(error = %e, "Balance poll failed"),
        }
        match orchestrator
            .orders(true, false, POLL_ORDER_LIMIT, CallOptions::default())
            .await
        {
            Ok(orders) => info!(open_orders = orders.len(), "Polled orders"),
            Err(e) => warn!(error = %e, "Order poll failed"),
        }
    }
}
