use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tracing::info;
use tracing_subscriber::EnvFilter;

use studiokeep::clock::SystemClock;
use studiokeep::config::Config;
use studiokeep::engine::Engine;
use studiokeep::notify::NotifyHub;
use studiokeep::reaper;
use studiokeep::schedule::LoggingSink;
use studiokeep::store::{MemoryStore, wal_path};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env();
    studiokeep::observability::init(config.metrics_port)?;

    std::fs::create_dir_all(&config.data_dir)?;
    let path = wal_path(&config.data_dir, &config.resource);
    let store = Arc::new(MemoryStore::open(&path)?);

    info!("studiokeep keeping {}", config.resource);
    info!("  wal: {}", path.display());
    info!("  utc offset: {}", config.calendar.offset());
    info!("  reaper every {:?}", config.reaper_interval);
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    let reaper_interval = config.reaper_interval;
    let compact_threshold = config.compact_threshold;
    let notify = Arc::new(NotifyHub::new());
    let engine = Arc::new(Engine::new(
        store.clone(),
        Arc::new(SystemClock),
        config,
        Arc::new(LoggingSink),
        notify.clone(),
    ));

    tokio::spawn(reaper::run_reaper(engine.clone(), reaper_interval));
    tokio::spawn(reaper::run_compactor(
        store.clone(),
        compact_threshold,
        reaper_interval,
    ));

    // Change feed goes to the log until a transport subscribes.
    let mut events = notify.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(json) => info!(target: "studiokeep::events", "{json}"),
                    Err(e) => tracing::warn!("unserializable event: {e}"),
                },
                Err(RecvError::Lagged(n)) => tracing::warn!("event log lagged by {n} events"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    // Graceful shutdown on SIGTERM/ctrl-c
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result?,
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c().await?;

    info!("shutdown signal received, compacting WAL");
    if let Err(e) = store.compact_wal().await {
        tracing::error!("final compaction failed: {e}");
    }
    info!("studiokeep stopped");
    Ok(())
}
