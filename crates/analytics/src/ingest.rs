//! Event ingestion. Validates and normalises incoming events, writes them to
//! the event store, then queues per-user counter updates.

use crate::counters::CounterWriter;
use chrono::{DateTime, Utc};
use pulse_core::types::{
    Conversion, Event, EventDetails, NewEvent, PageView, CONVERSION_CATEGORY, CONVERSION_PREFIX,
    PAGE_VIEW_CATEGORY, PAGE_VIEW_EVENT, REVENUE_FIELD,
};
use pulse_core::{EventStore, InsertOutcome, PulseError, PulseResult};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error};
use uuid::Uuid;

pub struct EventIngestor {
    store: Arc<dyn EventStore>,
    counters: Option<CounterWriter>,
}

impl EventIngestor {
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self {
            store,
            counters: None,
        }
    }

    /// Also maintain per-user counters through the given writer.
    pub fn with_counters(mut self, counters: CounterWriter) -> Self {
        self.counters = Some(counters);
        self
    }

    /// Normalise and persist an event, returning its identifier once stored.
    /// Resubmitting a stored identifier returns it without writing or
    /// counting the event again.
    pub async fn ingest(&self, event: NewEvent) -> PulseResult<String> {
        let start = Instant::now();
        let event = normalize(event, Utc::now())?;

        match self.store.insert_event(&event).await {
            Ok(InsertOutcome::Written) => {}
            Ok(InsertOutcome::AlreadyStored) => {
                metrics::counter!("ingest.duplicates").increment(1);
                debug!(event_id = %event.id, "Event already stored, skipping");
                return Ok(event.id);
            }
            Err(e) => {
                metrics::counter!("ingest.store_errors").increment(1);
                error!(event_name = %event.event_name, error = %e, "Failed to store event");
                return Err(match e {
                    PulseError::Storage(_) => e,
                    other => PulseError::Storage(other.to_string()),
                });
            }
        }

        if let Some(counters) = &self.counters {
            counters.record(&event.user_id, &event.event_name);
        }

        metrics::counter!("ingest.accepted").increment(1);
        metrics::histogram!("ingest.latency_us").record(start.elapsed().as_micros() as f64);
        debug!(
            event_id = %event.id,
            event_name = %event.event_name,
            user_id = %event.user_id,
            "event ingested"
        );

        Ok(event.id)
    }

    /// Record a page view. The event name and category are fixed.
    pub async fn track_page_view(&self, mut event: NewEvent, page: PageView) -> PulseResult<String> {
        event.details = Some(EventDetails::PageView(page));
        self.ingest(event).await
    }

    /// Record a conversion, stored as `conversion_<type>`.
    pub async fn track_conversion(
        &self,
        mut event: NewEvent,
        conversion: Conversion,
    ) -> PulseResult<String> {
        event.details = Some(EventDetails::Conversion(conversion));
        self.ingest(event).await
    }
}

/// The epoch is what clients send for an unset timestamp.
fn is_unset(ts: Option<DateTime<Utc>>) -> bool {
    ts.map_or(true, |ts| ts.timestamp_millis() == 0)
}

fn normalize(mut input: NewEvent, now: DateTime<Utc>) -> PulseResult<Event> {
    if input.user_id.trim().is_empty() {
        return Err(PulseError::invalid("userId is required"));
    }

    match &input.details {
        Some(EventDetails::PageView(_)) => {
            input.event_name = PAGE_VIEW_EVENT.to_string();
            input.category = PAGE_VIEW_CATEGORY.to_string();
        }
        Some(EventDetails::Conversion(conversion)) => {
            if conversion.conversion_type.trim().is_empty() {
                return Err(PulseError::invalid("conversionType is required"));
            }
            input.event_name = format!("{CONVERSION_PREFIX}{}", conversion.conversion_type);
            input.category = CONVERSION_CATEGORY.to_string();
            if conversion.revenue != 0.0 && !input.metadata.contains_key(REVENUE_FIELD) {
                input
                    .metadata
                    .insert(REVENUE_FIELD.to_string(), serde_json::json!(conversion.revenue));
            }
        }
        None => {
            if input.event_name.trim().is_empty() {
                return Err(PulseError::invalid("eventName is required"));
            }
        }
    }

    let id = match input.id {
        Some(id) if !id.is_empty() => id,
        _ => Uuid::new_v4().to_string(),
    };
    let timestamp = if is_unset(input.timestamp) {
        now
    } else {
        input.timestamp.unwrap_or(now)
    };

    Ok(Event {
        id,
        user_id: input.user_id,
        session_id: input.session_id.filter(|s| !s.is_empty()),
        event_name: input.event_name,
        category: input.category,
        action: input.action,
        label: input.label,
        value: input.value,
        metadata: input.metadata,
        url: input.url,
        user_agent: input.user_agent,
        ip_address: input.ip_address,
        timestamp,
        duration: input.duration,
        details: input.details,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::memory::MemoryEventStore;
    use async_trait::async_trait;
    use pulse_cache::LocalCounterCache;
    use pulse_core::types::{DailyStats, Funnel, UserSession};
    use pulse_core::{CounterCache, DailyRollup, EventFilter};
    use std::collections::HashSet;
    use std::time::Duration;

    fn click(user: &str) -> NewEvent {
        NewEvent {
            user_id: user.to_string(),
            event_name: "click".to_string(),
            ..Default::default()
        }
    }

    fn setup() -> (Arc<MemoryEventStore>, EventIngestor) {
        let store = Arc::new(MemoryEventStore::new());
        let ingestor = EventIngestor::new(store.clone());
        (store, ingestor)
    }

    struct ReadOnlyStore;

    #[async_trait]
    impl EventStore for ReadOnlyStore {
        async fn insert_event(&self, _event: &Event) -> PulseResult<InsertOutcome> {
            Err(PulseError::Storage("read-only replica".into()))
        }
        async fn count_where(&self, _filter: &EventFilter) -> PulseResult<u64> {
            Ok(0)
        }
        async fn distinct_users(&self, _filter: &EventFilter) -> PulseResult<u64> {
            Ok(0)
        }
        async fn daily_rollup(
            &self,
            _filter: &EventFilter,
            _rollup: &DailyRollup,
        ) -> PulseResult<Vec<DailyStats>> {
            Ok(Vec::new())
        }
        async fn insert_funnel(&self, _funnel: &Funnel) -> PulseResult<()> {
            Ok(())
        }
        async fn find_funnel(&self, _id: &str) -> PulseResult<Option<Funnel>> {
            Ok(None)
        }
        async fn update_funnel(&self, _funnel: &Funnel) -> PulseResult<bool> {
            Ok(false)
        }
        async fn list_funnels(&self) -> PulseResult<Vec<Funnel>> {
            Ok(Vec::new())
        }
        async fn recent_sessions(
            &self,
            _user_id: Option<&str>,
            _limit: usize,
        ) -> PulseResult<Vec<UserSession>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_assigns_distinct_ids() {
        let (store, ingestor) = setup();
        let mut ids = HashSet::new();
        for _ in 0..20 {
            let id = ingestor.ingest(click("u1")).await.unwrap();
            assert!(!id.is_empty());
            ids.insert(id);
        }
        assert_eq!(ids.len(), 20);
        assert_eq!(store.event_count(), 20);
    }

    #[tokio::test]
    async fn test_keeps_caller_supplied_id() {
        let (store, ingestor) = setup();
        let mut event = click("u1");
        event.id = Some("evt-42".into());

        assert_eq!(ingestor.ingest(event).await.unwrap(), "evt-42");
        assert_eq!(store.events()[0].id, "evt-42");
    }

    #[tokio::test]
    async fn test_resubmitted_id_is_stored_and_counted_once() {
        let store = Arc::new(MemoryEventStore::new());
        let cache = Arc::new(LocalCounterCache::new());
        let (writer, handle) = CounterWriter::spawn(cache.clone(), Duration::from_secs(60), 8);
        let ingestor = EventIngestor::new(store.clone()).with_counters(writer);

        let mut event = click("u1");
        event.id = Some("evt-1".into());
        assert_eq!(ingestor.ingest(event.clone()).await.unwrap(), "evt-1");
        assert_eq!(ingestor.ingest(event).await.unwrap(), "evt-1");
        drop(ingestor);
        handle.await.unwrap();

        assert_eq!(store.event_count(), 1);
        assert_eq!(cache.get("user_stats:u1:total_events").await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn test_missing_timestamp_defaults_to_now() {
        let (store, ingestor) = setup();
        let before = Utc::now();
        ingestor.ingest(click("u1")).await.unwrap();

        let mut epoch = click("u1");
        epoch.timestamp = DateTime::from_timestamp_millis(0);
        ingestor.ingest(epoch).await.unwrap();
        let after = Utc::now();

        for event in store.events() {
            assert!(event.timestamp >= before && event.timestamp <= after);
        }
    }

    #[tokio::test]
    async fn test_supplied_timestamp_is_kept() {
        let (store, ingestor) = setup();
        let at = Utc::now() - chrono::Duration::days(3);
        let mut event = click("u1");
        event.timestamp = Some(at);
        ingestor.ingest(event).await.unwrap();
        assert_eq!(store.events()[0].timestamp, at);
    }

    #[tokio::test]
    async fn test_page_view_name_is_forced() {
        let (store, ingestor) = setup();
        let mut event = click("u1");
        event.event_name = "homepage_hit".into();
        event.category = "custom".into();

        let page = PageView {
            page_url: "https://shop.example/".into(),
            ..Default::default()
        };
        ingestor.track_page_view(event, page).await.unwrap();

        let stored = &store.events()[0];
        assert_eq!(stored.event_name, "page_view");
        assert_eq!(stored.category, "engagement");
        assert!(matches!(stored.details, Some(EventDetails::PageView(_))));
    }

    #[tokio::test]
    async fn test_conversion_name_and_revenue() {
        let (store, ingestor) = setup();
        let conversion = Conversion {
            conversion_type: "purchase".into(),
            revenue: 50.0,
            currency: "USD".into(),
            ..Default::default()
        };
        ingestor
            .track_conversion(click("u1"), conversion)
            .await
            .unwrap();

        let stored = &store.events()[0];
        assert_eq!(stored.event_name, "conversion_purchase");
        assert_eq!(stored.category, "conversion");
        assert!((stored.metadata_number("revenue") - 50.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_conversion_keeps_explicit_metadata_revenue() {
        let (store, ingestor) = setup();
        let mut event = click("u1");
        event.metadata.insert("revenue".into(), serde_json::json!(45.5));
        let conversion = Conversion {
            conversion_type: "purchase".into(),
            revenue: 50.0,
            ..Default::default()
        };
        ingestor.track_conversion(event, conversion).await.unwrap();
        assert!((store.events()[0].metadata_number("revenue") - 45.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_rejects_missing_required_fields() {
        let (store, ingestor) = setup();

        let err = ingestor.ingest(click("")).await.unwrap_err();
        assert!(matches!(err, PulseError::InvalidInput(_)));

        let mut nameless = click("u1");
        nameless.event_name.clear();
        let err = ingestor.ingest(nameless).await.unwrap_err();
        assert!(matches!(err, PulseError::InvalidInput(_)));

        let err = ingestor
            .track_conversion(click("u1"), Conversion::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PulseError::InvalidInput(_)));

        assert_eq!(store.event_count(), 0);
    }

    #[tokio::test]
    async fn test_store_failure_is_storage_error() {
        let ingestor = EventIngestor::new(Arc::new(ReadOnlyStore));
        let err = ingestor.ingest(click("u1")).await.unwrap_err();
        assert!(matches!(err, PulseError::Storage(_)));
    }

    #[tokio::test]
    async fn test_counters_updated_after_store_write() {
        let store = Arc::new(MemoryEventStore::new());
        let cache = Arc::new(LocalCounterCache::new());
        let (writer, handle) = CounterWriter::spawn(cache.clone(), Duration::from_secs(86_400), 64);
        let ingestor = EventIngestor::new(store).with_counters(writer);

        ingestor.ingest(click("u1")).await.unwrap();
        ingestor
            .track_page_view(click("u1"), PageView::default())
            .await
            .unwrap();
        drop(ingestor);
        handle.await.unwrap();

        assert_eq!(cache.get("user_stats:u1:total_events").await.unwrap(), Some(2));
        let types = cache.get_fields("user_stats:u1:event_types").await.unwrap();
        assert_eq!(types.get("click"), Some(&1));
        assert_eq!(types.get("page_view"), Some(&1));
    }

    #[tokio::test]
    async fn test_failed_write_skips_counters() {
        let cache = Arc::new(LocalCounterCache::new());
        let (writer, handle) = CounterWriter::spawn(cache.clone(), Duration::from_secs(60), 8);
        let ingestor = EventIngestor::new(Arc::new(ReadOnlyStore)).with_counters(writer);

        assert!(ingestor.ingest(click("u1")).await.is_err());
        drop(ingestor);
        handle.await.unwrap();

        assert!(cache.is_empty());
    }
}
