//! Per-user counters kept beside the event store. Updates are queued on a
//! channel and applied by a background task so a slow or unavailable cache
//! never holds up ingestion.

use pulse_core::counters::{event_types_key, total_events_key};
use pulse_core::types::UserCounters;
use pulse_core::{CounterCache, PulseError, PulseResult};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
struct CounterUpdate {
    user_id: String,
    event_name: String,
}

/// Handle for queueing counter updates. Cloning shares the same worker.
#[derive(Clone)]
pub struct CounterWriter {
    sender: mpsc::Sender<CounterUpdate>,
}

impl CounterWriter {
    /// Spawn the background worker. It exits once every writer is dropped and
    /// the queue has drained.
    pub fn spawn(
        cache: Arc<dyn CounterCache>,
        ttl: Duration,
        capacity: usize,
    ) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let handle = tokio::spawn(run(cache, ttl, receiver));
        (Self { sender }, handle)
    }

    /// Queue an update without waiting. A full or closed queue drops it.
    pub fn record(&self, user_id: &str, event_name: &str) {
        let update = CounterUpdate {
            user_id: user_id.to_string(),
            event_name: event_name.to_string(),
        };
        if let Err(e) = self.sender.try_send(update) {
            metrics::counter!("counters.dropped").increment(1);
            warn!(user_id = user_id, error = %e, "Counter update dropped");
        }
    }
}

async fn run(cache: Arc<dyn CounterCache>, ttl: Duration, mut receiver: mpsc::Receiver<CounterUpdate>) {
    while let Some(update) = receiver.recv().await {
        if let Err(e) = apply(cache.as_ref(), &update, ttl).await {
            metrics::counter!("counters.errors").increment(1);
            warn!(user_id = %update.user_id, error = %e, "Counter update failed");
        } else {
            metrics::counter!("counters.applied").increment(1);
        }
    }
    debug!("Counter writer stopped");
}

async fn apply(cache: &dyn CounterCache, update: &CounterUpdate, ttl: Duration) -> PulseResult<()> {
    let total_key = total_events_key(&update.user_id);
    let types_key = event_types_key(&update.user_id);

    // Both keys get their TTL even when an increment fails; the first error wins.
    let results = [
        cache.increment(&total_key).await.map(|_| ()),
        cache
            .increment_field(&types_key, &update.event_name, 1)
            .await
            .map(|_| ()),
        cache.expire(&total_key, ttl).await,
        cache.expire(&types_key, ttl).await,
    ];
    results.into_iter().collect()
}

/// Read a user's cached counters. A missing total, or an unreachable cache,
/// is reported as not found.
pub async fn user_counters(cache: &dyn CounterCache, user_id: &str) -> PulseResult<UserCounters> {
    let total = match cache.get(&total_events_key(user_id)).await {
        Ok(Some(total)) => total,
        Ok(None) => return Err(PulseError::not_found("user stats", user_id)),
        Err(e) => {
            warn!(user_id = user_id, error = %e, "Counter lookup failed");
            return Err(PulseError::not_found("user stats", user_id));
        }
    };

    let event_types = cache
        .get_fields(&event_types_key(user_id))
        .await
        .unwrap_or_else(|e| {
            warn!(user_id = user_id, error = %e, "Event type counters unavailable");
            Default::default()
        });

    Ok(UserCounters {
        user_id: user_id.to_string(),
        total_events: total,
        event_types,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pulse_cache::LocalCounterCache;
    use std::collections::HashMap;

    struct DownCache;

    #[async_trait]
    impl CounterCache for DownCache {
        async fn increment(&self, _key: &str) -> PulseResult<i64> {
            Err(PulseError::Cache("connection refused".into()))
        }
        async fn increment_field(&self, _key: &str, _field: &str, _by: i64) -> PulseResult<i64> {
            Err(PulseError::Cache("connection refused".into()))
        }
        async fn expire(&self, _key: &str, _ttl: Duration) -> PulseResult<()> {
            Err(PulseError::Cache("connection refused".into()))
        }
        async fn get(&self, _key: &str) -> PulseResult<Option<i64>> {
            Err(PulseError::Cache("connection refused".into()))
        }
        async fn get_fields(&self, _key: &str) -> PulseResult<HashMap<String, i64>> {
            Err(PulseError::Cache("connection refused".into()))
        }
    }

    /// Records which keys were touched; `increment_field` always fails.
    #[derive(Default)]
    struct HalfDownCache {
        incremented: parking_lot::Mutex<Vec<String>>,
        expired: parking_lot::Mutex<Vec<String>>,
    }

    #[async_trait]
    impl CounterCache for HalfDownCache {
        async fn increment(&self, key: &str) -> PulseResult<i64> {
            self.incremented.lock().push(key.to_string());
            Ok(1)
        }
        async fn increment_field(&self, _key: &str, _field: &str, _by: i64) -> PulseResult<i64> {
            Err(PulseError::Cache("READONLY replica".into()))
        }
        async fn expire(&self, key: &str, _ttl: Duration) -> PulseResult<()> {
            self.expired.lock().push(key.to_string());
            Ok(())
        }
        async fn get(&self, _key: &str) -> PulseResult<Option<i64>> {
            Ok(None)
        }
        async fn get_fields(&self, _key: &str) -> PulseResult<HashMap<String, i64>> {
            Ok(HashMap::new())
        }
    }

    /// Holds every `increment` until permits are released.
    struct StalledCache {
        gate: tokio::sync::Semaphore,
        applied: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl CounterCache for StalledCache {
        async fn increment(&self, _key: &str) -> PulseResult<i64> {
            self.gate.acquire().await.unwrap().forget();
            self.applied
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(1)
        }
        async fn increment_field(&self, _key: &str, _field: &str, _by: i64) -> PulseResult<i64> {
            Ok(1)
        }
        async fn expire(&self, _key: &str, _ttl: Duration) -> PulseResult<()> {
            Ok(())
        }
        async fn get(&self, _key: &str) -> PulseResult<Option<i64>> {
            Ok(None)
        }
        async fn get_fields(&self, _key: &str) -> PulseResult<HashMap<String, i64>> {
            Ok(HashMap::new())
        }
    }

    #[tokio::test]
    async fn test_failed_increment_still_sets_ttl_on_both_keys() {
        let cache = HalfDownCache::default();
        let update = CounterUpdate {
            user_id: "u1".into(),
            event_name: "click".into(),
        };

        let err = apply(&cache, &update, Duration::from_secs(60))
            .await
            .unwrap_err();

        assert!(matches!(err, PulseError::Cache(_)));
        assert_eq!(*cache.incremented.lock(), vec!["user_stats:u1:total_events".to_string()]);
        assert_eq!(
            *cache.expired.lock(),
            vec![
                "user_stats:u1:total_events".to_string(),
                "user_stats:u1:event_types".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_full_queue_drops_updates_without_blocking() {
        let cache = Arc::new(StalledCache {
            gate: tokio::sync::Semaphore::new(0),
            applied: Default::default(),
        });
        let (writer, handle) = CounterWriter::spawn(cache.clone(), Duration::from_secs(60), 1);

        let started = std::time::Instant::now();
        for _ in 0..10 {
            writer.record("u1", "click");
        }
        assert!(started.elapsed() < Duration::from_secs(1));

        cache.gate.add_permits(10);
        drop(writer);
        handle.await.unwrap();

        // One update queued, at most one more in flight at the worker.
        let applied = cache.applied.load(std::sync::atomic::Ordering::SeqCst);
        assert!(applied >= 1);
        assert!(applied <= 2);
    }

    #[tokio::test]
    async fn test_worker_applies_updates() {
        let cache = Arc::new(LocalCounterCache::new());
        let (writer, handle) = CounterWriter::spawn(cache.clone(), Duration::from_secs(60), 16);

        writer.record("u1", "page_view");
        writer.record("u1", "page_view");
        writer.record("u1", "conversion_purchase");
        drop(writer);
        handle.await.unwrap();

        let counters = user_counters(cache.as_ref(), "u1").await.unwrap();
        assert_eq!(counters.total_events, 3);
        assert_eq!(counters.event_types.get("page_view"), Some(&2));
        assert_eq!(counters.event_types.get("conversion_purchase"), Some(&1));
    }

    #[tokio::test]
    async fn test_worker_survives_cache_outage() {
        let (writer, handle) = CounterWriter::spawn(Arc::new(DownCache), Duration::from_secs(60), 4);
        writer.record("u1", "click");
        drop(writer);
        // Must drain and stop rather than panic.
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_user_is_not_found() {
        let cache = LocalCounterCache::new();
        let err = user_counters(&cache, "ghost").await.unwrap_err();
        assert!(matches!(err, PulseError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_lookup_with_cache_down_is_not_found() {
        let err = user_counters(&DownCache, "u1").await.unwrap_err();
        assert!(matches!(err, PulseError::NotFound { .. }));
    }
}
