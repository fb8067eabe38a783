//! ClickHouse event store. Events, funnel definitions and sessions live in
//! three tables created on startup; rollups are computed server-side.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use clickhouse::Row;
use pulse_core::config::StorageConfig;
use pulse_core::types::{DailyStats, Event, Funnel, FunnelStep, UserSession};
use pulse_core::{
    DailyRollup, EventFilter, EventStore, InsertOutcome, NameMatch, PulseError, PulseResult,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub struct ClickHouseEventStore {
    client: clickhouse::Client,
}

#[derive(Row, Serialize)]
struct EventRow {
    id: String,
    user_id: String,
    session_id: String,
    event_name: String,
    category: String,
    action: String,
    label: String,
    value: f64,
    metadata: String,
    url: String,
    user_agent: String,
    ip_address: String,
    /// DateTime64(3) as epoch milliseconds.
    timestamp: i64,
    duration: i64,
    details: String,
}

#[derive(Row, Serialize, Deserialize)]
struct FunnelRow {
    id: String,
    name: String,
    description: String,
    steps: String,
    created_at: i64,
    updated_at: i64,
}

#[derive(Row, Deserialize)]
struct SessionRow {
    id: String,
    user_id: String,
    session_id: String,
    start_time: i64,
    end_time: i64,
    duration: i64,
    page_views: u32,
    events: u32,
    device_type: String,
    browser: String,
    operating_system: String,
    is_bounce: bool,
}

#[derive(Row, Deserialize)]
struct CountRow {
    count: u64,
}

#[derive(Row, Deserialize)]
struct DayRow {
    date: String,
    total_events: u64,
    unique_users: u64,
    page_views: u64,
    conversions: u64,
    revenue: f64,
}

fn storage_error(err: clickhouse::error::Error) -> PulseError {
    metrics::counter!("clickhouse.errors").increment(1);
    PulseError::Storage(err.to_string())
}

fn from_millis(ms: i64) -> PulseResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| PulseError::Storage(format!("timestamp out of range: {ms}")))
}

fn to_clickhouse_time(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S%.3f").to_string()
}

/// Event reads go through `FINAL` so rows sharing an id count once.
fn events_query(select: &str, clause: &str) -> String {
    format!("SELECT {select} FROM events FINAL{clause}")
}

/// WHERE clause and its bind values for an event filter.
fn where_clause(filter: &EventFilter) -> (String, Vec<String>) {
    let mut clauses = Vec::new();
    let mut binds = Vec::new();

    if let Some(from) = filter.from {
        clauses.push("timestamp >= toDateTime64(?, 3, 'UTC')");
        binds.push(to_clickhouse_time(from));
    }
    if let Some(to) = filter.to {
        clauses.push("timestamp <= toDateTime64(?, 3, 'UTC')");
        binds.push(to_clickhouse_time(to));
    }
    match &filter.name {
        Some(NameMatch::Exact(name)) => {
            clauses.push("event_name = ?");
            binds.push(name.clone());
        }
        Some(NameMatch::Prefix(prefix)) => {
            clauses.push("startsWith(event_name, ?)");
            binds.push(prefix.clone());
        }
        None => {}
    }

    if clauses.is_empty() {
        (String::new(), binds)
    } else {
        (format!(" WHERE {}", clauses.join(" AND ")), binds)
    }
}

impl FunnelRow {
    fn from_funnel(funnel: &Funnel) -> PulseResult<Self> {
        Ok(Self {
            id: funnel.id.clone(),
            name: funnel.name.clone(),
            description: funnel.description.clone(),
            steps: serde_json::to_string(&funnel.steps)?,
            created_at: funnel.created_at.timestamp_millis(),
            updated_at: funnel.updated_at.timestamp_millis(),
        })
    }

    fn into_funnel(self) -> PulseResult<Funnel> {
        let steps: Vec<FunnelStep> = serde_json::from_str(&self.steps)?;
        Ok(Funnel {
            id: self.id,
            name: self.name,
            description: self.description,
            steps,
            created_at: from_millis(self.created_at)?,
            updated_at: from_millis(self.updated_at)?,
        })
    }
}

impl SessionRow {
    fn into_session(self) -> PulseResult<UserSession> {
        Ok(UserSession {
            id: self.id,
            user_id: self.user_id,
            session_id: self.session_id,
            start_time: from_millis(self.start_time)?,
            end_time: from_millis(self.end_time)?,
            duration: self.duration,
            page_views: self.page_views,
            events: self.events,
            device_type: self.device_type,
            browser: self.browser,
            operating_system: self.operating_system,
            is_bounce: self.is_bounce,
        })
    }
}

impl ClickHouseEventStore {
    /// Connect and create the tables if they do not exist.
    pub async fn new(config: &StorageConfig) -> anyhow::Result<Self> {
        let mut client = clickhouse::Client::default()
            .with_url(&config.url)
            .with_database(&config.database);
        if let Some(user) = &config.user {
            client = client.with_user(user);
        }
        if let Some(password) = &config.password {
            client = client.with_password(password);
        }

        Self::ensure_schema(&client).await?;
        info!(url = %config.url, database = %config.database, "ClickHouse event store ready");

        Ok(Self { client })
    }

    async fn ensure_schema(client: &clickhouse::Client) -> anyhow::Result<()> {
        client
            .query(
                "CREATE TABLE IF NOT EXISTS events (
                    id String,
                    user_id String,
                    session_id String,
                    event_name String,
                    category String,
                    action String,
                    label String,
                    value Float64,
                    metadata String,
                    url String,
                    user_agent String,
                    ip_address String,
                    timestamp DateTime64(3, 'UTC'),
                    duration Int64,
                    details String
                ) ENGINE = ReplacingMergeTree()
                ORDER BY id",
            )
            .execute()
            .await?;

        client
            .query(
                "CREATE TABLE IF NOT EXISTS funnels (
                    id String,
                    name String,
                    description String,
                    steps String,
                    created_at DateTime64(3, 'UTC'),
                    updated_at DateTime64(3, 'UTC')
                ) ENGINE = ReplacingMergeTree(updated_at)
                ORDER BY id",
            )
            .execute()
            .await?;

        client
            .query(
                "CREATE TABLE IF NOT EXISTS sessions (
                    id String,
                    user_id String,
                    session_id String,
                    start_time DateTime64(3, 'UTC'),
                    end_time DateTime64(3, 'UTC'),
                    duration Int64,
                    page_views UInt32,
                    events UInt32,
                    device_type String,
                    browser String,
                    operating_system String,
                    is_bounce Bool
                ) ENGINE = MergeTree()
                ORDER BY (user_id, start_time)",
            )
            .execute()
            .await?;

        info!("ClickHouse schema verified");
        Ok(())
    }

    async fn write_funnel(&self, funnel: &Funnel) -> PulseResult<()> {
        let row = FunnelRow::from_funnel(funnel)?;
        let mut insert = self.client.insert("funnels").map_err(storage_error)?;
        insert.write(&row).await.map_err(storage_error)?;
        insert.end().await.map_err(storage_error)
    }
}

#[async_trait]
impl EventStore for ClickHouseEventStore {
    async fn insert_event(&self, event: &Event) -> PulseResult<InsertOutcome> {
        let existing: CountRow = self
            .client
            .query("SELECT count() AS count FROM events WHERE id = ?")
            .bind(event.id.as_str())
            .fetch_one()
            .await
            .map_err(storage_error)?;
        if existing.count > 0 {
            debug!(event_id = %event.id, "Event already stored");
            return Ok(InsertOutcome::AlreadyStored);
        }

        let details = match &event.details {
            Some(details) => serde_json::to_string(details)?,
            None => String::new(),
        };
        let row = EventRow {
            id: event.id.clone(),
            user_id: event.user_id.clone(),
            session_id: event.session_id.clone().unwrap_or_default(),
            event_name: event.event_name.clone(),
            category: event.category.clone(),
            action: event.action.clone(),
            label: event.label.clone(),
            value: event.value,
            metadata: serde_json::to_string(&event.metadata)?,
            url: event.url.clone(),
            user_agent: event.user_agent.clone(),
            ip_address: event.ip_address.clone(),
            timestamp: event.timestamp.timestamp_millis(),
            duration: event.duration,
            details,
        };

        let mut insert = self.client.insert("events").map_err(storage_error)?;
        insert.write(&row).await.map_err(storage_error)?;
        insert.end().await.map_err(storage_error)?;

        debug!(event_id = %event.id, event_name = %event.event_name, "Event written to ClickHouse");
        Ok(InsertOutcome::Written)
    }

    async fn count_where(&self, filter: &EventFilter) -> PulseResult<u64> {
        let (clause, binds) = where_clause(filter);
        let sql = events_query("count() AS count", &clause);
        let mut query = self.client.query(&sql);
        for value in binds {
            query = query.bind(value);
        }
        let row: CountRow = query.fetch_one().await.map_err(storage_error)?;
        Ok(row.count)
    }

    async fn distinct_users(&self, filter: &EventFilter) -> PulseResult<u64> {
        let (clause, binds) = where_clause(filter);
        let sql = events_query("uniqExact(user_id) AS count", &clause);
        let mut query = self.client.query(&sql);
        for value in binds {
            query = query.bind(value);
        }
        let row: CountRow = query.fetch_one().await.map_err(storage_error)?;
        Ok(row.count)
    }

    async fn daily_rollup(
        &self,
        filter: &EventFilter,
        rollup: &DailyRollup,
    ) -> PulseResult<Vec<DailyStats>> {
        let (clause, binds) = where_clause(filter);
        let select = "formatDateTime(timestamp, '%Y-%m-%d', 'UTC') AS date,
                count() AS total_events,
                uniqExact(user_id) AS unique_users,
                countIf(event_name = ?) AS page_views,
                countIf(startsWith(event_name, ?)) AS conversions,
                sum(JSONExtractFloat(metadata, ?)) AS revenue";
        let sql = format!(
            "{} GROUP BY date ORDER BY date ASC",
            events_query(select, &clause)
        );
        let mut query = self
            .client
            .query(&sql)
            .bind(rollup.page_view_event.as_str())
            .bind(rollup.conversion_prefix.as_str())
            .bind(rollup.revenue_field.as_str());
        for value in binds {
            query = query.bind(value);
        }

        let rows: Vec<DayRow> = query.fetch_all().await.map_err(storage_error)?;
        Ok(rows
            .into_iter()
            .map(|row| DailyStats {
                date: row.date,
                total_events: row.total_events,
                unique_users: row.unique_users,
                page_views: row.page_views,
                conversions: row.conversions,
                revenue: row.revenue,
            })
            .collect())
    }

    async fn insert_funnel(&self, funnel: &Funnel) -> PulseResult<()> {
        self.write_funnel(funnel).await
    }

    async fn find_funnel(&self, id: &str) -> PulseResult<Option<Funnel>> {
        let rows: Vec<FunnelRow> = self
            .client
            .query("SELECT ?fields FROM funnels FINAL WHERE id = ? LIMIT 1")
            .bind(id)
            .fetch_all()
            .await
            .map_err(storage_error)?;
        rows.into_iter().next().map(FunnelRow::into_funnel).transpose()
    }

    async fn update_funnel(&self, funnel: &Funnel) -> PulseResult<bool> {
        if self.find_funnel(&funnel.id).await?.is_none() {
            return Ok(false);
        }
        // ReplacingMergeTree keeps the row with the newest updated_at.
        self.write_funnel(funnel).await?;
        Ok(true)
    }

    async fn list_funnels(&self) -> PulseResult<Vec<Funnel>> {
        let rows: Vec<FunnelRow> = self
            .client
            .query("SELECT ?fields FROM funnels FINAL ORDER BY created_at DESC")
            .fetch_all()
            .await
            .map_err(storage_error)?;
        rows.into_iter().map(FunnelRow::into_funnel).collect()
    }

    async fn recent_sessions(
        &self,
        user_id: Option<&str>,
        limit: usize,
    ) -> PulseResult<Vec<UserSession>> {
        let rows: Vec<SessionRow> = match user_id {
            Some(user) => {
                self.client
                    .query(
                        "SELECT ?fields FROM sessions WHERE user_id = ? \
                         ORDER BY start_time DESC LIMIT ?",
                    )
                    .bind(user)
                    .bind(limit as u64)
                    .fetch_all()
                    .await
            }
            None => {
                self.client
                    .query("SELECT ?fields FROM sessions ORDER BY start_time DESC LIMIT ?")
                    .bind(limit as u64)
                    .fetch_all()
                    .await
            }
        }
        .map_err(storage_error)?;

        rows.into_iter().map(SessionRow::into_session).collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_where_clause_orders_binds() {
        let from = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single().unwrap_or_default();
        let to = Utc.with_ymd_and_hms(2024, 1, 31, 23, 59, 59).single().unwrap_or_default();
        let filter = EventFilter::between(from, to).named("page_view");

        let (clause, binds) = where_clause(&filter);

        assert_eq!(
            clause,
            " WHERE timestamp >= toDateTime64(?, 3, 'UTC') \
             AND timestamp <= toDateTime64(?, 3, 'UTC') AND event_name = ?"
        );
        assert_eq!(
            binds,
            vec![
                "2024-01-01 00:00:00.000".to_string(),
                "2024-01-31 23:59:59.000".to_string(),
                "page_view".to_string(),
            ]
        );
    }

    #[test]
    fn test_where_clause_prefix_only() {
        let filter = EventFilter::default().name_prefix("conversion_");
        let (clause, binds) = where_clause(&filter);
        assert_eq!(clause, " WHERE startsWith(event_name, ?)");
        assert_eq!(binds, vec!["conversion_".to_string()]);
    }

    #[test]
    fn test_event_reads_collapse_repeated_ids() {
        let filter = EventFilter::default().named("click");
        let (clause, _) = where_clause(&filter);
        assert_eq!(
            events_query("count() AS count", &clause),
            "SELECT count() AS count FROM events FINAL WHERE event_name = ?"
        );
    }

    #[test]
    fn test_empty_filter_has_no_where() {
        let (clause, binds) = where_clause(&EventFilter::default());
        assert!(clause.is_empty());
        assert!(binds.is_empty());
    }
}
