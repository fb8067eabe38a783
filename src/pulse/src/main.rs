//! Pulse: event tracking and analytics aggregation service.
//!
//! Wires the event store, counter cache and query engines together and
//! serves the REST API.

use anyhow::Context;
use clap::Parser;
use pulse_analytics::{ClickHouseEventStore, CounterWriter, MemoryEventStore};
use pulse_api::{ApiServer, AppState};
use pulse_cache::{LocalCounterCache, RedisCounterCache};
use pulse_core::config::{AppConfig, StorageBackend};
use pulse_core::{CounterCache, EventStore};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

const LOCAL_CACHE_SWEEP: Duration = Duration::from_secs(60);

#[derive(Parser, Debug)]
#[command(name = "pulse")]
#[command(about = "Event tracking and analytics aggregation service")]
#[command(version)]
struct Cli {
    /// Node identifier (overrides config)
    #[arg(long, env = "PULSE__NODE_ID")]
    node_id: Option<String>,

    /// HTTP port (overrides config)
    #[arg(long, env = "PULSE__API__HTTP_PORT")]
    http_port: Option<u16>,

    /// Keep events in process memory instead of ClickHouse
    #[arg(long, default_value_t = false)]
    memory: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pulse=info,pulse_api=info,tower_http=info".into()),
        )
        .json()
        .init();

    let cli = Cli::parse();

    let mut config = AppConfig::load().unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });

    if let Some(node_id) = cli.node_id {
        config.node_id = node_id;
    }
    if let Some(port) = cli.http_port {
        config.api.http_port = port;
    }
    if cli.memory {
        config.storage.backend = StorageBackend::Memory;
    }

    info!(
        node_id = %config.node_id,
        http_port = config.api.http_port,
        backend = ?config.storage.backend,
        "Configuration loaded"
    );

    let store: Arc<dyn EventStore> = match config.storage.backend {
        StorageBackend::Clickhouse => Arc::new(
            ClickHouseEventStore::new(&config.storage)
                .await
                .context("ClickHouse event store unavailable")?,
        ),
        StorageBackend::Memory => {
            warn!("Using in-memory event store, data is lost on restart");
            Arc::new(MemoryEventStore::new())
        }
    };

    let counters = if config.redis.enabled {
        let cache = connect_cache(&config).await;
        let (writer, _worker) = CounterWriter::spawn(
            cache.clone(),
            config.redis.counter_ttl(),
            config.analytics.counter_queue_capacity,
        );
        Some((cache, writer))
    } else {
        info!("Per-user counters disabled");
        None
    };

    let state = AppState::new(
        config.node_id.clone(),
        store,
        config.analytics.query_timeout(),
        counters,
    );
    let api_server = ApiServer::new(config.clone(), state);

    if let Err(e) = api_server.start_metrics() {
        error!(error = %e, "Failed to start metrics exporter");
    }

    info!("Pulse is ready to serve traffic");

    api_server.start_http().await?;

    Ok(())
}

/// Redis when reachable, otherwise an in-process cache swept in the background.
async fn connect_cache(config: &AppConfig) -> Arc<dyn CounterCache> {
    match RedisCounterCache::new(&config.redis).await {
        Ok(cache) => Arc::new(cache),
        Err(e) => {
            error!(error = %e, "Failed to connect to Redis, counting in process");
            let local = Arc::new(LocalCounterCache::new());
            let sweeper = local.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(LOCAL_CACHE_SWEEP);
                loop {
                    interval.tick().await;
                    let evicted = sweeper.evict_expired();
                    if evicted > 0 {
                        info!(evicted, remaining = sweeper.len(), "Local counter sweep");
                    }
                }
            });
            local
        }
    }
}
