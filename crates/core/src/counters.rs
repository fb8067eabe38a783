//! Counter cache port. Counters are advisory: callers must never let a
//! failure here affect ingestion or analytics results.

use crate::error::PulseResult;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

#[async_trait]
pub trait CounterCache: Send + Sync {
    /// Increment a plain counter by one, returning the new value.
    async fn increment(&self, key: &str) -> PulseResult<i64>;

    /// Increment one field of a hash-like mapping, returning the new value.
    async fn increment_field(&self, key: &str, field: &str, by: i64) -> PulseResult<i64>;

    async fn expire(&self, key: &str, ttl: Duration) -> PulseResult<()>;

    async fn get(&self, key: &str) -> PulseResult<Option<i64>>;

    /// All fields of a mapping; empty when the key is absent.
    async fn get_fields(&self, key: &str) -> PulseResult<HashMap<String, i64>>;
}

/// Key holding a user's total event count.
pub fn total_events_key(user_id: &str) -> String {
    format!("user_stats:{user_id}:total_events")
}

/// Key holding a user's per-event-name counts.
pub fn event_types_key(user_id: &str) -> String {
    format!("user_stats:{user_id}:event_types")
}
