//! REST handlers for event tracking, stats, sessions and funnels, plus the
//! operational endpoints.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use pulse_analytics::{user_counters, CounterWriter, EventIngestor};
use pulse_core::types::{
    Conversion, DailyStats, DashboardStats, Funnel, FunnelResult, NewEvent, NewFunnel, PageView, RealtimeStats,
    UserCounters, UserSession,
};
use pulse_core::{CounterCache, EventStore, PulseError};
use pulse_reporting::{FunnelAnalyzer, FunnelRegistry, SessionBrowser, TimeWindowAggregator};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, warn};

/// Shared application state for REST handlers.
#[derive(Clone)]
pub struct AppState {
    pub ingestor: Arc<EventIngestor>,
    pub aggregator: Arc<TimeWindowAggregator>,
    pub funnels: Arc<FunnelRegistry>,
    pub analyzer: Arc<FunnelAnalyzer>,
    pub sessions: Arc<SessionBrowser>,
    pub counters: Option<Arc<dyn CounterCache>>,
    pub node_id: String,
    pub start_time: Instant,
}

impl AppState {
    /// Wire every engine against one event store. With `counters`, ingestion
    /// feeds the writer and per-user lookups read the cache.
    pub fn new(
        node_id: impl Into<String>,
        store: Arc<dyn EventStore>,
        query_timeout: Duration,
        counters: Option<(Arc<dyn CounterCache>, CounterWriter)>,
    ) -> Self {
        let (ingestor, cache) = match counters {
            Some((cache, writer)) => (
                EventIngestor::new(store.clone()).with_counters(writer),
                Some(cache),
            ),
            None => (EventIngestor::new(store.clone()), None),
        };

        Self {
            ingestor: Arc::new(ingestor),
            aggregator: Arc::new(
                TimeWindowAggregator::new(store.clone()).with_query_timeout(query_timeout),
            ),
            funnels: Arc::new(FunnelRegistry::new(store.clone())),
            analyzer: Arc::new(FunnelAnalyzer::new(store.clone()).with_query_timeout(query_timeout)),
            sessions: Arc::new(SessionBrowser::new(store).with_query_timeout(query_timeout)),
            counters: cache,
            node_id: node_id.into(),
            start_time: Instant::now(),
        }
    }
}

/// Routes under `/api/v1/analytics` plus the health endpoints.
pub fn router(state: AppState) -> Router {
    let analytics = Router::new()
        .route("/events", post(track_event))
        .route("/events/pageview", post(track_page_view))
        .route("/events/conversion", post(track_conversion))
        .route("/stats/daily", get(daily_stats))
        .route("/stats/realtime", get(realtime_stats))
        .route("/dashboard", get(dashboard_stats))
        .route("/stats/users/:user_id", get(user_stats))
        .route("/sessions", get(recent_sessions))
        .route("/funnels", get(list_funnels).post(create_funnel))
        .route("/funnels/:id", get(get_funnel).put(update_funnel))
        .route("/funnels/:id/analysis", get(analyze_funnel));

    Router::new()
        .nest("/api/v1/analytics", analytics)
        .route("/health", get(health_check))
        .route("/ready", get(readiness))
        .route("/live", get(liveness))
        .with_state(state)
}

// ─── Errors ──────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

/// `PulseError` rendered as an HTTP response.
#[derive(Debug)]
pub struct ApiError(PulseError);

impl From<PulseError> for ApiError {
    fn from(e: PulseError) -> Self {
        Self(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(PulseError::invalid(rejection.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self.0 {
            PulseError::InvalidInput(msg) => {
                metrics::counter!("api.validation_errors").increment(1);
                (StatusCode::BAD_REQUEST, "invalid_request", msg.clone())
            }
            PulseError::NotFound { .. } => (StatusCode::NOT_FOUND, "not_found", self.0.to_string()),
            PulseError::Timeout(_) => {
                warn!(error = %self.0, "Request timed out");
                (StatusCode::SERVICE_UNAVAILABLE, "timeout", self.0.to_string())
            }
            other => {
                error!(error = %other, "Request failed");
                metrics::counter!("api.errors").increment(1);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "Internal processing error".to_string(),
                )
            }
        };
        (
            status,
            Json(ErrorResponse {
                error: code.to_string(),
                message,
            }),
        )
            .into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

// ─── Tracking ────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackResponse {
    pub message: String,
    pub event_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revenue: Option<f64>,
}

/// Base event fields with the page view fields alongside them.
#[derive(Debug, Deserialize)]
pub struct PageViewRequest {
    #[serde(flatten)]
    pub event: NewEvent,
    #[serde(flatten)]
    pub page: PageView,
}

#[derive(Debug, Deserialize)]
pub struct ConversionRequest {
    #[serde(flatten)]
    pub event: NewEvent,
    #[serde(flatten)]
    pub conversion: Conversion,
}

fn created(message: &str, event_id: String, revenue: Option<f64>) -> (StatusCode, Json<TrackResponse>) {
    (
        StatusCode::CREATED,
        Json(TrackResponse {
            message: message.to_string(),
            event_id,
            revenue,
        }),
    )
}

/// POST /api/v1/analytics/events
pub async fn track_event(
    State(state): State<AppState>,
    body: Result<Json<NewEvent>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(event) = body?;
    let id = state.ingestor.ingest(event).await?;
    Ok(created("Event tracked successfully", id, None))
}

/// POST /api/v1/analytics/events/pageview
pub async fn track_page_view(
    State(state): State<AppState>,
    body: Result<Json<PageViewRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(request) = body?;
    if request.page.page_url.trim().is_empty() {
        return Err(PulseError::invalid("pageUrl is required").into());
    }
    let id = state
        .ingestor
        .track_page_view(request.event, request.page)
        .await?;
    Ok(created("Page view tracked successfully", id, None))
}

/// POST /api/v1/analytics/events/conversion
pub async fn track_conversion(
    State(state): State<AppState>,
    body: Result<Json<ConversionRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(request) = body?;
    let revenue = request.conversion.revenue;
    let id = state
        .ingestor
        .track_conversion(request.event, request.conversion)
        .await?;
    Ok(created("Conversion tracked successfully", id, Some(revenue)))
}

// ─── Stats ───────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct DateRangeQuery {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

/// GET /api/v1/analytics/stats/daily
pub async fn daily_stats(
    State(state): State<AppState>,
    Query(range): Query<DateRangeQuery>,
) -> ApiResult<Json<Vec<DailyStats>>> {
    let days = state
        .aggregator
        .daily_stats(range.start_date.as_deref(), range.end_date.as_deref())
        .await?;
    Ok(Json(days))
}

/// GET /api/v1/analytics/stats/realtime
pub async fn realtime_stats(State(state): State<AppState>) -> ApiResult<Json<RealtimeStats>> {
    Ok(Json(state.aggregator.realtime_stats().await?))
}

/// GET /api/v1/analytics/dashboard
pub async fn dashboard_stats(State(state): State<AppState>) -> ApiResult<Json<DashboardStats>> {
    Ok(Json(state.aggregator.dashboard_stats().await?))
}

/// GET /api/v1/analytics/stats/users/:user_id
pub async fn user_stats(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> ApiResult<Json<UserCounters>> {
    let cache = state
        .counters
        .as_ref()
        .ok_or_else(|| PulseError::not_found("user stats", &user_id))?;
    Ok(Json(user_counters(cache.as_ref(), &user_id).await?))
}

#[derive(Debug, Default, Deserialize)]
pub struct SessionQuery {
    pub user_id: Option<String>,
    pub limit: Option<i64>,
}

/// GET /api/v1/analytics/sessions
pub async fn recent_sessions(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
) -> ApiResult<Json<Vec<UserSession>>> {
    let sessions = state
        .sessions
        .recent(query.user_id.as_deref(), query.limit)
        .await?;
    Ok(Json(sessions))
}

// ─── Funnels ─────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct FunnelCreated {
    pub message: String,
    pub funnel: Funnel,
}

/// POST /api/v1/analytics/funnels
pub async fn create_funnel(
    State(state): State<AppState>,
    body: Result<Json<NewFunnel>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(definition) = body?;
    let funnel = state.funnels.create(definition).await?;
    Ok((
        StatusCode::CREATED,
        Json(FunnelCreated {
            message: "Funnel created successfully".to_string(),
            funnel,
        }),
    ))
}

/// GET /api/v1/analytics/funnels
pub async fn list_funnels(State(state): State<AppState>) -> ApiResult<Json<Vec<Funnel>>> {
    Ok(Json(state.funnels.list().await?))
}

/// GET /api/v1/analytics/funnels/:id
pub async fn get_funnel(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Funnel>> {
    Ok(Json(state.funnels.get(&id).await?))
}

/// PUT /api/v1/analytics/funnels/:id
pub async fn update_funnel(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<NewFunnel>, JsonRejection>,
) -> ApiResult<Json<Funnel>> {
    let Json(definition) = body?;
    Ok(Json(state.funnels.update(&id, definition).await?))
}

/// GET /api/v1/analytics/funnels/:id/analysis
pub async fn analyze_funnel(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(range): Query<DateRangeQuery>,
) -> ApiResult<Json<FunnelResult>> {
    let result = state
        .analyzer
        .analyze(&id, range.start_date.as_deref(), range.end_date.as_deref())
        .await?;
    Ok(Json(result))
}

// ─── Operational ─────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub node_id: String,
    pub uptime_secs: u64,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "analytics".to_string(),
        node_id: state.node_id.clone(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

/// GET /ready
pub async fn readiness(State(_state): State<AppState>) -> StatusCode {
    StatusCode::OK
}

/// GET /live
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}
