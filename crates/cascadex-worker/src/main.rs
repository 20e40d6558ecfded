//! Worker binary for the CascadeX simulation engine.
//!
//! Any number of identical workers can run against the same Redis,
//! `PostgreSQL`, and NATS instances; all coordination happens through
//! shared state, so adding a worker adds tick throughput without any
//! leader election.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `cascadex-config.yaml`
//! 2. Initialize structured logging (tracing) at the configured level
//! 3. Connect to Redis, `PostgreSQL`, and NATS
//! 4. Run database migrations
//! 5. Recovery sweep: re-enqueue tick jobs for orphaned running
//!    simulations
//! 6. Spawn the configured number of tick-job poller tasks
//! 7. Wait for ctrl-c, then drain the pollers and shut down

mod error;
mod nats_publisher;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use cascadex_db::{PostgresPool, RedisPool};
use cascadex_engine::{Engine, EngineConfig};
use tokio::sync::watch;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use crate::error::WorkerError;
use crate::nats_publisher::NatsPublisher;

/// Default configuration file path, relative to the working directory.
const DEFAULT_CONFIG_PATH: &str = "cascadex-config.yaml";

/// Application entry point for the worker.
///
/// # Errors
///
/// Returns an error if any startup step fails.
#[tokio::main]
async fn main() -> Result<(), WorkerError> {
    // 1. Load configuration. A missing file falls back to defaults so a
    //    bare Docker Compose deployment works out of the box.
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_owned());
    let config_file_found = Path::new(&config_path).exists();
    let config = if config_file_found {
        EngineConfig::from_file(Path::new(&config_path))?
    } else {
        let mut config = EngineConfig::default();
        config.infrastructure.apply_env_overrides();
        config
    };

    // 2. Initialize structured logging. RUST_LOG wins; the configured
    //    level is the fallback.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .with_target(true)
        .init();

    info!("cascadex-worker starting");
    if !config_file_found {
        info!(config_path, "Config file not found; using defaults");
    }
    info!(
        tick_interval_ms = config.simulation.tick_interval_ms,
        claim_ttl_secs = config.simulation.claim_ttl_secs,
        worker_count = config.worker.worker_count,
        poll_interval_ms = config.worker.poll_interval_ms,
        "Configuration loaded"
    );

    // 3. Connect to infrastructure.
    let redis = RedisPool::connect(&config.infrastructure.redis_url).await?;
    let postgres = PostgresPool::connect_url(&config.infrastructure.postgres_url).await?;
    let publisher = NatsPublisher::connect(&config.infrastructure.nats_url).await?;
    info!("Connected to Redis, PostgreSQL, and NATS");

    // 4. Run migrations.
    postgres.run_migrations().await?;

    // 5. Recovery sweep.
    let engine = Arc::new(Engine::new(
        redis,
        &postgres,
        Arc::new(publisher),
        &config,
    ));
    let recovered = engine.recover_running_simulations().await?;
    info!(recovered, "Recovery sweep complete");

    // 6. Spawn poller tasks.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let poll_interval = Duration::from_millis(config.worker.poll_interval_ms);
    let mut handles = Vec::new();
    for worker_id in 0..config.worker.worker_count {
        let engine = Arc::clone(&engine);
        let shutdown = shutdown_rx.clone();
        handles.push(tokio::spawn(poll_loop(
            worker_id,
            engine,
            poll_interval,
            shutdown,
        )));
    }
    info!(pollers = handles.len(), "Tick pollers running");

    // 7. Wait for shutdown and drain.
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received; draining pollers");
    let _ = shutdown_tx.send(true);
    for handle in handles {
        let _ = handle.await;
    }
    postgres.close().await;
    info!("cascadex-worker stopped");
    Ok(())
}

/// One poller: claim due tick jobs and execute them until shutdown.
///
/// An idle queue and transient store failures both back off for the
/// poll interval; only the shutdown signal ends the loop.
async fn poll_loop(
    worker_id: u32,
    engine: Arc<Engine>,
    poll_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }
        match engine.process_next_job().await {
            Ok(true) => {}
            Ok(false) => {
                idle(poll_interval, &mut shutdown).await;
            }
            Err(error) => {
                warn!(worker_id, %error, "Queue poll failed");
                idle(poll_interval, &mut shutdown).await;
            }
        }
    }
    debug!(worker_id, "Poller stopped");
}

/// Sleep for the poll interval, waking early on shutdown.
async fn idle(poll_interval: Duration, shutdown: &mut watch::Receiver<bool>) {
    tokio::select! {
        () = tokio::time::sleep(poll_interval) => {}
        _ = shutdown.changed() => {}
    }
}
