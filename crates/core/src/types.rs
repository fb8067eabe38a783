use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Event name every page view is stored under.
pub const PAGE_VIEW_EVENT: &str = "page_view";
pub const PAGE_VIEW_CATEGORY: &str = "engagement";
/// Conversions are stored as `conversion_<type>`; rollups match on the prefix.
pub const CONVERSION_PREFIX: &str = "conversion_";
pub const CONVERSION_CATEGORY: &str = "conversion";
/// Metadata key summed into daily revenue.
pub const REVENUE_FIELD: &str = "revenue";

pub type Metadata = HashMap<String, serde_json::Value>;

/// An event as submitted by a client. Everything except the user id and
/// (for generic events) the event name is optional; ingestion fills the rest.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewEvent {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub event_name: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub value: f64,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub user_agent: String,
    #[serde(default)]
    pub ip_address: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    /// Duration in milliseconds.
    #[serde(default)]
    pub duration: i64,
    #[serde(default)]
    pub details: Option<EventDetails>,
}

/// A stored event. Identifier, user, name and timestamp are always populated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: String,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub event_name: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub value: f64,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub user_agent: String,
    #[serde(default)]
    pub ip_address: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub duration: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<EventDetails>,
}

impl Event {
    /// Bare event with a fresh identifier.
    pub fn new(
        user_id: impl Into<String>,
        event_name: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            session_id: None,
            event_name: event_name.into(),
            category: String::new(),
            action: String::new(),
            label: String::new(),
            value: 0.0,
            metadata: Metadata::new(),
            url: String::new(),
            user_agent: String::new(),
            ip_address: String::new(),
            timestamp,
            duration: 0,
            details: None,
        }
    }

    /// Numeric metadata entry, or 0 when missing or not a number.
    pub fn metadata_number(&self, field: &str) -> f64 {
        self.metadata
            .get(field)
            .and_then(serde_json::Value::as_f64)
            .unwrap_or(0.0)
    }
}

/// Variant-specific payload carried on top of the base event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventDetails {
    PageView(PageView),
    Conversion(Conversion),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageView {
    #[serde(default)]
    pub page_title: String,
    pub page_url: String,
    #[serde(default)]
    pub referrer: String,
    #[serde(default)]
    pub screen_width: u32,
    #[serde(default)]
    pub screen_height: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversion {
    /// e.g. "purchase", "signup"
    pub conversion_type: String,
    #[serde(default)]
    pub revenue: f64,
    #[serde(default)]
    pub currency: String,
    #[serde(default)]
    pub transaction_id: String,
    #[serde(default)]
    pub products: Vec<ProductInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductInfo {
    pub product_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub price: f64,
    #[serde(default)]
    pub quantity: u32,
}

/// A browsing session, written by an external session builder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSession {
    pub id: String,
    pub user_id: String,
    pub session_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Seconds.
    pub duration: i64,
    pub page_views: u32,
    pub events: u32,
    #[serde(default)]
    pub device_type: String,
    #[serde(default)]
    pub browser: String,
    #[serde(default)]
    pub operating_system: String,
    #[serde(default)]
    pub is_bounce: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunnelStep {
    pub step_name: String,
    pub event_name: String,
    #[serde(default)]
    pub order: i32,
}

/// Funnel definition as submitted for create/update.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewFunnel {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub steps: Vec<FunnelStep>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Funnel {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub steps: Vec<FunnelStep>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunnelStepResult {
    pub step_name: String,
    pub event_name: String,
    pub users: u64,
    pub completion_rate: f64,
    pub drop_off: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunnelResult {
    pub funnel_id: String,
    pub funnel_name: String,
    pub date_range: String,
    pub step_results: Vec<FunnelStepResult>,
    pub conversion_rate: f64,
    pub drop_offs: HashMap<String, i64>,
}

/// One calendar day of activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyStats {
    /// `YYYY-MM-DD`, UTC.
    pub date: String,
    pub total_events: u64,
    pub unique_users: u64,
    pub page_views: u64,
    pub conversions: u64,
    pub revenue: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealtimeStats {
    pub active_users: u64,
    pub events_last_5_minutes: u64,
    pub timestamp: DateTime<Utc>,
}

/// All-time event total alongside the current realtime snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardStats {
    pub total_events: u64,
    pub realtime: RealtimeStats,
}

/// Cached per-user counters. Approximate; never used for aggregate math.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserCounters {
    pub user_id: String,
    pub total_events: i64,
    pub event_types: HashMap<String, i64>,
}
