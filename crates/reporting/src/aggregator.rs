//! Daily rollups over a date range and realtime activity over a trailing
//! five-minute window. Everything is recomputed from the event store on
//! each call.

use crate::deadline::{within, DEFAULT_QUERY_TIMEOUT};
use crate::window::DateRange;
use chrono::{DateTime, Duration, Utc};
use pulse_core::types::{DashboardStats, DailyStats, RealtimeStats};
use pulse_core::{DailyRollup, EventFilter, EventStore, PulseResult};
use std::sync::Arc;
use tracing::{debug, warn};

pub const REALTIME_WINDOW_MINUTES: i64 = 5;

pub struct TimeWindowAggregator {
    store: Arc<dyn EventStore>,
    rollup: DailyRollup,
    query_timeout: std::time::Duration,
}

impl TimeWindowAggregator {
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self {
            store,
            rollup: DailyRollup::default(),
            query_timeout: DEFAULT_QUERY_TIMEOUT,
        }
    }

    pub fn with_query_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    /// Daily stats for `YYYY-MM-DD` bounds, defaulting to the last 30 days.
    /// Malformed dates are rejected.
    pub async fn daily_stats(
        &self,
        start_date: Option<&str>,
        end_date: Option<&str>,
    ) -> PulseResult<Vec<DailyStats>> {
        let range = DateRange::parse_strict(start_date, end_date, Utc::now())?;
        self.daily_stats_in(&range).await
    }

    /// One row per day with activity, ascending. Quiet days are omitted.
    pub async fn daily_stats_in(&self, range: &DateRange) -> PulseResult<Vec<DailyStats>> {
        if range.is_empty() {
            return Ok(Vec::new());
        }

        let days = within(
            self.query_timeout,
            "daily_rollup",
            self.store.daily_rollup(&range.filter(), &self.rollup),
        )
        .await?;

        metrics::counter!("stats.daily.computed").increment(1);
        debug!(range = %range.label(), days = days.len(), "Daily stats computed");
        Ok(days)
    }

    pub async fn realtime_stats(&self) -> PulseResult<RealtimeStats> {
        self.realtime_stats_at(Utc::now()).await
    }

    /// Snapshot of the five minutes leading up to `now`. A failed event count
    /// reads as zero; a failed active-user query fails the call.
    pub async fn realtime_stats_at(&self, now: DateTime<Utc>) -> PulseResult<RealtimeStats> {
        let filter = EventFilter::since(now - Duration::minutes(REALTIME_WINDOW_MINUTES));

        let active_users = within(
            self.query_timeout,
            "realtime_active_users",
            self.store.distinct_users(&filter),
        )
        .await?;

        let events = match within(
            self.query_timeout,
            "realtime_event_count",
            self.store.count_where(&filter),
        )
        .await
        {
            Ok(count) => count,
            Err(e) => {
                metrics::counter!("stats.realtime.degraded").increment(1);
                warn!(error = %e, "Realtime event count unavailable, reporting zero");
                0
            }
        };

        Ok(RealtimeStats {
            active_users,
            events_last_5_minutes: events,
            timestamp: now,
        })
    }

    pub async fn dashboard_stats(&self) -> PulseResult<DashboardStats> {
        self.dashboard_stats_at(Utc::now()).await
    }

    /// Total events ever stored plus the realtime snapshot at `now`. Unlike
    /// the windowed count, a failed total fails the call.
    pub async fn dashboard_stats_at(&self, now: DateTime<Utc>) -> PulseResult<DashboardStats> {
        let total_events = within(
            self.query_timeout,
            "dashboard_total_events",
            self.store.count_where(&EventFilter::default()),
        )
        .await?;
        let realtime = self.realtime_stats_at(now).await?;

        metrics::counter!("stats.dashboard.computed").increment(1);
        Ok(DashboardStats {
            total_events,
            realtime,
        })
    }
}
