use crate::deadline::{within, DEFAULT_QUERY_TIMEOUT};
use pulse_core::types::UserSession;
use pulse_core::{EventStore, PulseResult};
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_SESSION_LIMIT: usize = 50;

/// Read-only view over sessions written by the session builder.
pub struct SessionBrowser {
    store: Arc<dyn EventStore>,
    query_timeout: Duration,
}

impl SessionBrowser {
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self {
            store,
            query_timeout: DEFAULT_QUERY_TIMEOUT,
        }
    }

    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    /// Most recent sessions first, optionally for one user. A missing or
    /// non-positive limit means 50.
    pub async fn recent(
        &self,
        user_id: Option<&str>,
        limit: Option<i64>,
    ) -> PulseResult<Vec<UserSession>> {
        let limit = match limit {
            Some(n) if n > 0 => n as usize,
            _ => DEFAULT_SESSION_LIMIT,
        };
        let user_id = user_id.map(str::trim).filter(|u| !u.is_empty());

        within(
            self.query_timeout,
            "recent_sessions",
            self.store.recent_sessions(user_id, limit),
        )
        .await
    }
}
