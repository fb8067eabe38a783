//! In-memory event store. Implements the full query semantics and is the
//! backend for development and tests.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use pulse_core::types::{DailyStats, Event, Funnel, UserSession};
use pulse_core::{DailyRollup, EventFilter, EventStore, InsertOutcome, PulseResult};
use std::collections::HashSet;

#[derive(Default)]
pub struct MemoryEventStore {
    events: RwLock<Vec<Event>>,
    ids: DashMap<String, ()>,
    funnels: DashMap<String, Funnel>,
    sessions: RwLock<Vec<UserSession>>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a session. Sessions are produced outside the ingestion path.
    pub fn insert_session(&self, session: UserSession) {
        self.sessions.write().push(session);
    }

    pub fn event_count(&self) -> usize {
        self.events.read().len()
    }

    /// Snapshot of all stored events, in insertion order.
    pub fn events(&self) -> Vec<Event> {
        self.events.read().clone()
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn insert_event(&self, event: &Event) -> PulseResult<InsertOutcome> {
        match self.ids.entry(event.id.clone()) {
            Entry::Occupied(_) => Ok(InsertOutcome::AlreadyStored),
            Entry::Vacant(slot) => {
                self.events.write().push(event.clone());
                slot.insert(());
                Ok(InsertOutcome::Written)
            }
        }
    }

    async fn count_where(&self, filter: &EventFilter) -> PulseResult<u64> {
        let events = self.events.read();
        Ok(events.iter().filter(|e| filter.matches(e)).count() as u64)
    }

    async fn distinct_users(&self, filter: &EventFilter) -> PulseResult<u64> {
        let events = self.events.read();
        let users: HashSet<&str> = events
            .iter()
            .filter(|e| filter.matches(e))
            .map(|e| e.user_id.as_str())
            .collect();
        Ok(users.len() as u64)
    }

    async fn daily_rollup(
        &self,
        filter: &EventFilter,
        rollup: &DailyRollup,
    ) -> PulseResult<Vec<DailyStats>> {
        let events = self.events.read();
        Ok(rollup.fold(events.iter().filter(|e| filter.matches(e))))
    }

    async fn insert_funnel(&self, funnel: &Funnel) -> PulseResult<()> {
        self.funnels.insert(funnel.id.clone(), funnel.clone());
        Ok(())
    }

    async fn find_funnel(&self, id: &str) -> PulseResult<Option<Funnel>> {
        Ok(self.funnels.get(id).map(|f| f.value().clone()))
    }

    async fn update_funnel(&self, funnel: &Funnel) -> PulseResult<bool> {
        match self.funnels.get_mut(&funnel.id) {
            Some(mut stored) => {
                *stored = funnel.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list_funnels(&self) -> PulseResult<Vec<Funnel>> {
        let mut funnels: Vec<Funnel> = self.funnels.iter().map(|f| f.value().clone()).collect();
        funnels.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(funnels)
    }

    async fn recent_sessions(
        &self,
        user_id: Option<&str>,
        limit: usize,
    ) -> PulseResult<Vec<UserSession>> {
        let sessions = self.sessions.read();
        let mut matching: Vec<UserSession> = sessions
            .iter()
            .filter(|s| user_id.map_or(true, |u| s.user_id == u))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        matching.truncate(limit);
        Ok(matching)
    }
}
