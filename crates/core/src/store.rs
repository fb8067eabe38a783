//! Event store port: the query capabilities the aggregation engine needs.
//!
//! Engines accept an `Arc<dyn EventStore>`; backends live in
//! `pulse-analytics` (ClickHouse, in-memory).

use crate::error::PulseResult;
use crate::types::{
    DailyStats, Event, Funnel, UserSession, CONVERSION_PREFIX, PAGE_VIEW_EVENT, REVENUE_FIELD,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::{BTreeMap, HashSet};

/// How an event name is matched by a filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameMatch {
    Exact(String),
    Prefix(String),
}

impl NameMatch {
    pub fn matches(&self, name: &str) -> bool {
        match self {
            NameMatch::Exact(expected) => name == expected,
            NameMatch::Prefix(prefix) => name.starts_with(prefix.as_str()),
        }
    }
}

/// Filter predicate over events. Both time bounds are inclusive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventFilter {
    pub name: Option<NameMatch>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl EventFilter {
    pub fn between(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self {
            name: None,
            from: Some(from),
            to: Some(to),
        }
    }

    pub fn since(from: DateTime<Utc>) -> Self {
        Self {
            name: None,
            from: Some(from),
            to: None,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(NameMatch::Exact(name.into()));
        self
    }

    pub fn name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.name = Some(NameMatch::Prefix(prefix.into()));
        self
    }

    pub fn matches(&self, event: &Event) -> bool {
        if let Some(from) = self.from {
            if event.timestamp < from {
                return false;
            }
        }
        if let Some(to) = self.to {
            if event.timestamp > to {
                return false;
            }
        }
        self.name
            .as_ref()
            .map_or(true, |name| name.matches(&event.event_name))
    }
}

/// Which fields a daily rollup derives. Backends compute the grouping; the
/// naming conventions come from the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DailyRollup {
    pub page_view_event: String,
    pub conversion_prefix: String,
    pub revenue_field: String,
}

impl Default for DailyRollup {
    fn default() -> Self {
        Self {
            page_view_event: PAGE_VIEW_EVENT.to_string(),
            conversion_prefix: CONVERSION_PREFIX.to_string(),
            revenue_field: REVENUE_FIELD.to_string(),
        }
    }
}

#[derive(Default)]
struct DayAccumulator<'a> {
    total_events: u64,
    users: HashSet<&'a str>,
    page_views: u64,
    conversions: u64,
    revenue: f64,
}

impl DailyRollup {
    /// Group already-filtered events by UTC calendar day, ascending.
    pub fn fold<'a>(&self, events: impl IntoIterator<Item = &'a Event>) -> Vec<DailyStats> {
        let mut days: BTreeMap<NaiveDate, DayAccumulator<'a>> = BTreeMap::new();

        for event in events {
            let day = days.entry(event.timestamp.date_naive()).or_default();
            day.total_events += 1;
            day.users.insert(event.user_id.as_str());
            if event.event_name == self.page_view_event {
                day.page_views += 1;
            }
            if event.event_name.starts_with(self.conversion_prefix.as_str()) {
                day.conversions += 1;
            }
            day.revenue += event.metadata_number(&self.revenue_field);
        }

        days.into_iter()
            .map(|(date, acc)| DailyStats {
                date: date.format("%Y-%m-%d").to_string(),
                total_events: acc.total_events,
                unique_users: acc.users.len() as u64,
                page_views: acc.page_views,
                conversions: acc.conversions,
                revenue: acc.revenue,
            })
            .collect()
    }
}

/// Result of persisting an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Written,
    /// An event with this identifier is already stored; nothing was written.
    AlreadyStored,
}

/// Persistence and query capabilities over events, funnels and sessions.
/// Implementations must be safe for concurrent use.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Persist one event once the write is confirmed. Identifiers are unique:
    /// a repeated identifier is reported as `AlreadyStored`, not written again.
    async fn insert_event(&self, event: &Event) -> PulseResult<InsertOutcome>;

    /// Number of events matching the filter.
    async fn count_where(&self, filter: &EventFilter) -> PulseResult<u64>;

    /// Number of distinct user identifiers among matching events.
    async fn distinct_users(&self, filter: &EventFilter) -> PulseResult<u64>;

    /// Per-day aggregates over matching events, ascending by date.
    async fn daily_rollup(
        &self,
        filter: &EventFilter,
        rollup: &DailyRollup,
    ) -> PulseResult<Vec<DailyStats>>;

    async fn insert_funnel(&self, funnel: &Funnel) -> PulseResult<()>;

    /// `Ok(None)` when no funnel has this identifier.
    async fn find_funnel(&self, id: &str) -> PulseResult<Option<Funnel>>;

    /// Replace a stored funnel. Returns `false` when it does not exist.
    async fn update_funnel(&self, funnel: &Funnel) -> PulseResult<bool>;

    /// All funnels, newest first.
    async fn list_funnels(&self) -> PulseResult<Vec<Funnel>>;

    /// Most recent sessions by start time, optionally for a single user.
    async fn recent_sessions(
        &self,
        user_id: Option<&str>,
        limit: usize,
    ) -> PulseResult<Vec<UserSession>>;
}
