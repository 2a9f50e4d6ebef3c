//! paywatch server
//!
//! Watches an ERC20 token contract and settles pending payments once the
//! expected amount arrives at their address.

mod config;
mod server;
mod shutdown;
mod state;

use clap::Parser;
use config::{ConfigLoader, get_database_url};
use paywatch_core::chain::TokenContract;
use paywatch_core::entities::SharedPaymentStore;
use paywatch_core::events::{transfer_event_channel, work_queue};
use paywatch_core::framework::DatabaseProcessor;
use paywatch_core::processors::{
    HttpPostback, InFlightSet, PaymentDispatcher, PaymentVerifier, ReconciliationScheduler,
    TransferWatcher, VerificationPool,
};
use paywatch_core::stream::EventStreamSubscriber;
use server::{build_router, run_server};
use sqlx::postgres::PgPoolOptions;
use state::AppState;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// paywatch - ERC20 payment reconciliation service
#[derive(Parser, Debug)]
#[command(name = "paywatch-server")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "./paywatch.toml")]
    config: PathBuf,

    /// Override the listen address (e.g., 0.0.0.0:3000)
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Run database migrations on startup
    #[arg(long, default_value = "false")]
    migrate: bool,

    /// Do not subscribe to the event stream, rely on polling only
    #[arg(long, default_value = "false")]
    no_stream: bool,

    /// Emit logs as JSON lines
    #[arg(long, env = "PAYWATCH_LOG_JSON", default_value = "false")]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Initialize tracing
    init_tracing(args.log_json);

    tracing::info!("Starting paywatch-server v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config_loader = ConfigLoader::new(&args.config, args.listen);
    let config = config_loader.load().map_err(|e| {
        tracing::error!("Failed to load configuration: {}", e);
        e
    })?;
    tracing::info!("Configuration loaded from {:?}", args.config);

    // Get database URL from environment
    let database_url = get_database_url().map_err(|e| {
        tracing::error!("DATABASE_URL environment variable not set");
        e
    })?;

    // Create database connection pool
    tracing::info!("Connecting to database...");
    let db_pool = PgPoolOptions::new()
        .max_connections(config.database_pool_size())
        .connect(&database_url)
        .await
        .map_err(|e| {
            tracing::error!("Failed to connect to database: {}", e);
            e
        })?;
    tracing::info!("Database connection established");

    // Run migrations if requested
    if args.migrate {
        tracing::info!("Running database migrations...");
        sqlx::migrate!("../migrations")
            .run(&db_pool)
            .await
            .map_err(|e| {
                tracing::error!("Failed to run migrations: {}", e);
                e
            })?;
        tracing::info!("Migrations completed successfully");
    }

    let db = DatabaseProcessor::new(db_pool.clone());
    let store: SharedPaymentStore = Arc::new(db.clone());
    let ledger = Arc::new(TokenContract::from_config(&config.chain)?);
    let notifier = Arc::new(HttpPostback::new(config.worker.postback_timeout)?);

    // Pipeline wiring
    let in_flight = Arc::new(InFlightSet::new());
    let (work_tx, work_rx) = work_queue();
    let dispatcher = PaymentDispatcher::new(in_flight.clone(), work_tx);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let verifier = PaymentVerifier::new(store.clone(), ledger, notifier, &config.worker);
    let mut tasks = VerificationPool::new(
        verifier,
        in_flight.clone(),
        work_rx,
        config.worker.threads,
    )
    .spawn(shutdown_rx.clone());

    let scheduler = ReconciliationScheduler::new(
        store.clone(),
        dispatcher.clone(),
        config.worker.poll_interval,
    );
    tasks.push(tokio::spawn(scheduler.run(shutdown_rx.clone())));

    if args.no_stream {
        tracing::info!("Event stream disabled, reconciling by polling only");
    } else {
        let (event_tx, event_rx) = transfer_event_channel();
        let subscriber = EventStreamSubscriber::from_config(
            &config.chain,
            config.stream.clone(),
            event_tx,
            shutdown_rx.clone(),
        );
        tasks.push(tokio::spawn(subscriber.run()));

        let watcher = TransferWatcher::new(store.clone(), dispatcher.clone());
        tasks.push(tokio::spawn(watcher.run(shutdown_rx.clone(), event_rx)));
    }

    // Build the router
    let state = AppState::new(db, store, dispatcher, !args.no_stream);
    let router = build_router(state);

    // Run the server until a shutdown signal arrives
    tracing::info!("Starting HTTP server on {}", config.server.listen);
    let result = run_server(router, config.server.listen).await;

    // Stop the pipeline
    tracing::info!("Stopping pipeline tasks...");
    let _ = shutdown_tx.send(true);
    for task in tasks {
        if let Err(e) = task.await {
            tracing::error!("Pipeline task failed: {}", e);
        }
    }

    // Close database connections gracefully
    tracing::info!("Closing database connections...");
    db_pool.close().await;
    tracing::info!("Server shutdown complete");

    result.map_err(Into::into)
}

/// Initialize the tracing subscriber with environment-based filtering.
fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
