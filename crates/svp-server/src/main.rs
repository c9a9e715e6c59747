//! SVP Server - Main entry point

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use svp_common::logging::{init_logging, LogConfig};
use tokio::{signal, sync::watch};
use tracing::info;

use svp_server::{
    api::{self, AppState},
    bulk::{pipeline::ensure_scratch_dir, BulkWriter, Dispatcher, PgJobStore, Pipeline},
    config::Config,
    db,
    features::FeatureState,
    queue::PgQueue,
    records::PgRecords,
    storage::Storage,
};

#[derive(Parser, Debug)]
#[command(name = "svp-server", version, about = "School vaccination portal bulk upload service")]
struct Cli {
    #[command(subcommand)]
    service: Option<Service>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Service {
    /// HTTP front door: submission and status endpoints
    Server,
    /// Queue consumer running bulk jobs
    Worker,
    /// Both services in one process (default)
    All,
}

/// Handles shared by both services
struct Infra {
    db: sqlx::PgPool,
    storage: Storage,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let service = cli.service.unwrap_or(Service::All);

    let log_config = LogConfig::builder()
        .log_file_prefix("svp-server")
        .filter_directives("svp_server=debug,tower_http=debug,sqlx=warn")
        .build()
        .merge_env()?;

    let _log_guard = init_logging(&log_config)?;

    info!(?service, "Starting SVP Server");

    let config = Config::load()?;
    ensure_scratch_dir(&config.bulk.scratch_dir).with_context(|| {
        format!("Failed to create scratch dir {}", config.bulk.scratch_dir.display())
    })?;

    let infra = connect(&config).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown_timeout = config.server.shutdown_timeout_secs;
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    match service {
        Service::Server => run_server(&config, &infra, shutdown_rx, shutdown_timeout).await?,
        Service::Worker => run_worker(&config, &infra, shutdown_rx).await,
        Service::All => {
            let worker = run_worker(&config, &infra, shutdown_rx.clone());
            let server = run_server(&config, &infra, shutdown_rx, shutdown_timeout);
            let (_, served) = tokio::join!(worker, server);
            served?;
        },
    }

    info!("SVP Server shut down gracefully");

    Ok(())
}

async fn connect(config: &Config) -> Result<Infra> {
    let db = db::create_pool(&config.database)
        .await
        .context("Failed to connect to database")?;
    info!("Database connection pool established");

    db::run_migrations(&db).await?;

    let storage = Storage::new(config.storage.clone())
        .await
        .context("Failed to initialize storage")?;
    info!(bucket = %storage.bucket(), "Storage client initialized");

    Ok(Infra { db, storage })
}

async fn run_server(
    config: &Config,
    infra: &Infra,
    mut shutdown: watch::Receiver<bool>,
    shutdown_timeout_secs: u64,
) -> Result<()> {
    let feature_state = FeatureState {
        jobs: Arc::new(PgJobStore::new(infra.db.clone())),
        blobs: Arc::new(infra.storage.clone()),
        queue: Arc::new(PgQueue::new(infra.db.clone(), &config.queue)),
        bulk: config.bulk.clone(),
    };
    let app = api::create_router(
        AppState {
            db: infra.db.clone(),
        },
        feature_state,
        config,
    );

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
            info!("Waiting up to {} seconds for connections to close", shutdown_timeout_secs);
            tokio::time::sleep(Duration::from_secs(shutdown_timeout_secs.min(5))).await;
        })
        .await?;

    Ok(())
}

async fn run_worker(config: &Config, infra: &Infra, shutdown: watch::Receiver<bool>) {
    let records = Arc::new(PgRecords::new(infra.db.clone()));
    let writer = BulkWriter::new(records.clone(), records.clone(), records);
    let pipeline = Pipeline::new(
        Arc::new(PgJobStore::new(infra.db.clone())),
        Arc::new(infra.storage.clone()),
        writer,
        config.bulk.clone(),
    );

    let queue = PgQueue::new(infra.db.clone(), &config.queue);
    info!(queue = %queue.name(), "Worker consuming queue");

    let dispatcher = Dispatcher::new(Arc::new(queue), Arc::new(pipeline), &config.queue);
    dispatcher.run(shutdown).await;
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        },
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        },
    }
}
