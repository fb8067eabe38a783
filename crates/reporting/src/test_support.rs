//! Store wrapper for exercising degraded and failing query paths.

use async_trait::async_trait;
use pulse_analytics::MemoryEventStore;
use pulse_core::types::{DailyStats, Event, Funnel, UserSession};
use pulse_core::{DailyRollup, EventFilter, EventStore, InsertOutcome, PulseError, PulseResult};
use std::time::Duration;

#[derive(Default)]
pub(crate) struct FlakyStore {
    pub inner: MemoryEventStore,
    pub fail_counts: bool,
    pub fail_distinct: bool,
    pub fail_rollup: bool,
    pub stall: Option<Duration>,
}

impl FlakyStore {
    async fn maybe_stall(&self) {
        if let Some(delay) = self.stall {
            tokio::time::sleep(delay).await;
        }
    }
}

fn down() -> PulseError {
    PulseError::Storage("connection reset".into())
}

#[async_trait]
impl EventStore for FlakyStore {
    async fn insert_event(&self, event: &Event) -> PulseResult<InsertOutcome> {
        self.inner.insert_event(event).await
    }

    async fn count_where(&self, filter: &EventFilter) -> PulseResult<u64> {
        self.maybe_stall().await;
        if self.fail_counts {
            return Err(down());
        }
        self.inner.count_where(filter).await
    }

    async fn distinct_users(&self, filter: &EventFilter) -> PulseResult<u64> {
        if self.fail_distinct {
            return Err(down());
        }
        self.inner.distinct_users(filter).await
    }

    async fn daily_rollup(
        &self,
        filter: &EventFilter,
        rollup: &DailyRollup,
    ) -> PulseResult<Vec<DailyStats>> {
        self.maybe_stall().await;
        if self.fail_rollup {
            return Err(down());
        }
        self.inner.daily_rollup(filter, rollup).await
    }

    async fn insert_funnel(&self, funnel: &Funnel) -> PulseResult<()> {
        self.inner.insert_funnel(funnel).await
    }

    async fn find_funnel(&self, id: &str) -> PulseResult<Option<Funnel>> {
        self.inner.find_funnel(id).await
    }

    async fn update_funnel(&self, funnel: &Funnel) -> PulseResult<bool> {
        self.inner.update_funnel(funnel).await
    }

    async fn list_funnels(&self) -> PulseResult<Vec<Funnel>> {
        self.inner.list_funnels().await
    }

    async fn recent_sessions(
        &self,
        user_id: Option<&str>,
        limit: usize,
    ) -> PulseResult<Vec<UserSession>> {
        self.inner.recent_sessions(user_id, limit).await
    }
}
