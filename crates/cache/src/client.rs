//! Redis-backed per-user counters.

use async_trait::async_trait;
use pulse_core::config::RedisConfig;
use pulse_core::{CounterCache, PulseError, PulseResult};
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::time::Duration;
use tracing::info;

/// Counter cache on a single Redis node.
pub struct RedisCounterCache {
    client: redis::Client,
    connect_timeout: Duration,
}

impl RedisCounterCache {
    /// Connect to Redis and verify the connection with a PING.
    pub async fn new(config: &RedisConfig) -> anyhow::Result<Self> {
        let url = config
            .urls
            .first()
            .cloned()
            .unwrap_or_else(|| "redis://localhost:6379".to_string());

        info!(url = %url, "Connecting to Redis");

        let client = redis::Client::open(url.as_str())?;
        let cache = Self {
            client,
            connect_timeout: Duration::from_millis(config.connect_timeout_ms),
        };

        // Verify connectivity
        let mut conn = cache.connection().await?;
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        info!(response = %pong, "Redis connection established");

        Ok(cache)
    }

    async fn connection(&self) -> PulseResult<MultiplexedConnection> {
        match tokio::time::timeout(
            self.connect_timeout,
            self.client.get_multiplexed_async_connection(),
        )
        .await
        {
            Ok(conn) => conn.map_err(cache_error),
            Err(_) => {
                metrics::counter!("cache.connect_timeouts").increment(1);
                Err(PulseError::Cache(format!(
                    "connection timed out after {:?}",
                    self.connect_timeout
                )))
            }
        }
    }
}

fn cache_error(err: redis::RedisError) -> PulseError {
    PulseError::Cache(err.to_string())
}

#[async_trait]
impl CounterCache for RedisCounterCache {
    async fn increment(&self, key: &str) -> PulseResult<i64> {
        let mut conn = self.connection().await?;
        conn.incr(key, 1i64).await.map_err(cache_error)
    }

    async fn increment_field(&self, key: &str, field: &str, by: i64) -> PulseResult<i64> {
        let mut conn = self.connection().await?;
        conn.hincr(key, field, by).await.map_err(cache_error)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> PulseResult<()> {
        let mut conn = self.connection().await?;
        let _: () = redis::cmd("EXPIRE")
            .arg(key)
            .arg(ttl.as_secs())
            .query_async(&mut conn)
            .await
            .map_err(cache_error)?;
        Ok(())
    }

    async fn get(&self, key: &str) -> PulseResult<Option<i64>> {
        let mut conn = self.connection().await?;
        conn.get(key).await.map_err(cache_error)
    }

    async fn get_fields(&self, key: &str) -> PulseResult<HashMap<String, i64>> {
        let mut conn = self.connection().await?;
        conn.hgetall(key).await.map_err(cache_error)
    }
}
