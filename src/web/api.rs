//! REST API handlers for token queries and daemon diagnostics

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::Json,
};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use tokentrack_core::tracker::{EntrySummary, SharedRegistry, TokenSnapshot};
use tokentrack_core::usage::UsageCounters;

use crate::config::{format_duration, format_timeout};

/// Delay before a requested shutdown takes effect, so the response is flushed
const SHUTDOWN_DELAY: Duration = Duration::from_millis(100);

/// Helper to create JSON error responses
fn json_error(status: StatusCode, message: &str) -> (StatusCode, Json<serde_json::Value>) {
    (status, Json(serde_json::json!({"error": message})))
}

fn rfc3339(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Shared application state for API handlers
pub struct ApiState {
    pub registry: SharedRegistry,
}

/// Query string of `/tokens`
#[derive(Debug, Deserialize)]
pub struct TokensQuery {
    pub path: Option<String>,
}

/// Token counters for one transcript
#[derive(Debug, Serialize)]
pub struct TokensResponse {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_create_tokens: u64,
    pub last_cache_create_tokens: u64,
    pub cache_rebuilding: bool,
}

impl From<TokenSnapshot> for TokensResponse {
    fn from(snapshot: TokenSnapshot) -> Self {
        Self {
            input_tokens: snapshot.usage.input_tokens,
            output_tokens: snapshot.usage.output_tokens,
            cache_read_tokens: snapshot.usage.cache_read_tokens,
            cache_create_tokens: snapshot.usage.cache_create_tokens,
            last_cache_create_tokens: snapshot.last_cache_create_tokens,
            cache_rebuilding: snapshot.cache_rebuilding,
        }
    }
}

/// Overview of tracked transcripts
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub active_sessions: usize,
    pub timeout: String,
    pub sessions: Vec<SessionStatus>,
}

#[derive(Debug, Serialize)]
pub struct SessionStatus {
    pub path: String,
    pub last_access: String,
    pub tokens: UsageCounters,
}

/// Detailed daemon diagnostics
#[derive(Debug, Serialize)]
pub struct MetricsResponse {
    pub active_sessions: usize,
    pub session_timeout: String,
    pub idle_timeout: String,
    pub last_request: String,
    pub idle_for: String,
    pub sessions: Vec<SessionMetrics>,
}

/// Per-transcript parse statistics
#[derive(Debug, Serialize)]
pub struct SessionMetrics {
    pub path: String,
    pub file_size: u64,
    pub last_modified: Option<String>,
    pub last_access: String,
    pub tracking_since: String,
    pub tracking_duration: String,
    pub parse_count: u64,
    pub total_parse_time: String,
    pub avg_parse_time: String,
    pub tokens: UsageCounters,
}

/// Round to the nearest second, halves rounding up
fn round_to_secs(d: Duration) -> Duration {
    let carry = u64::from(d.subsec_nanos() >= 500_000_000);
    Duration::from_secs(d.as_secs().saturating_add(carry))
}

/// Round to the nearest millisecond, halves rounding up
fn round_to_millis(d: Duration) -> Duration {
    let carry = u128::from(d.subsec_nanos() % 1_000_000 >= 500_000);
    let millis = d.as_millis().saturating_add(carry);
    Duration::from_millis(millis.try_into().unwrap_or(u64::MAX))
}

fn elapsed_since(now: DateTime<Utc>, then: DateTime<Utc>) -> Duration {
    now.signed_duration_since(then).to_std().unwrap_or_default()
}

fn session_metrics(summary: &EntrySummary, now: DateTime<Utc>) -> SessionMetrics {
    SessionMetrics {
        path: summary.path.display().to_string(),
        file_size: summary.file_size,
        last_modified: summary.last_modified.map(rfc3339),
        last_access: rfc3339(summary.last_access),
        tracking_since: rfc3339(summary.tracking_since),
        tracking_duration: format_duration(round_to_secs(elapsed_since(
            now,
            summary.tracking_since,
        ))),
        parse_count: summary.parse_count,
        total_parse_time: format_duration(round_to_millis(summary.total_parse_time)),
        avg_parse_time: format_duration(round_to_millis(summary.avg_parse_time())),
        tokens: summary.usage,
    }
}

/// Liveness probe
pub async fn health(State(state): State<Arc<ApiState>>) -> Json<serde_json::Value> {
    state.registry.touch_request();
    Json(serde_json::json!({"status": "ok"}))
}

/// Token counters for the transcript named by `?path=`, tracking it on first use
pub async fn get_tokens(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<TokensQuery>,
) -> Result<Json<TokensResponse>, (StatusCode, Json<serde_json::Value>)> {
    state.registry.touch_request();

    let path = match query.path.as_deref() {
        Some(p) if !p.is_empty() => p,
        _ => {
            return Err(json_error(
                StatusCode::BAD_REQUEST,
                "Missing required query parameter: path",
            ))
        }
    };

    match state.registry.snapshot(path).await {
        Ok(snapshot) => Ok(Json(snapshot.into())),
        Err(e) => {
            tracing::warn!("Failed to track {}: {}", path, e);
            Err(json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                &format!("Failed to track file: {}", e),
            ))
        }
    }
}

/// Tracked transcripts with their counters
pub async fn get_status(State(state): State<Arc<ApiState>>) -> Json<StatusResponse> {
    state.registry.touch_request();

    let sessions: Vec<SessionStatus> = state
        .registry
        .list_all()
        .into_iter()
        .map(|summary| SessionStatus {
            path: summary.path.display().to_string(),
            last_access: rfc3339(summary.last_access),
            tokens: summary.usage,
        })
        .collect();

    Json(StatusResponse {
        active_sessions: sessions.len(),
        timeout: format_timeout(state.registry.settings().session_timeout),
        sessions,
    })
}

/// Parse statistics and timers
pub async fn get_metrics(State(state): State<Arc<ApiState>>) -> Json<MetricsResponse> {
    // Read before touching, otherwise idle_for is always zero
    let last_request = state.registry.last_request();
    state.registry.touch_request();

    let now = Utc::now();
    let settings = state.registry.settings();
    let sessions: Vec<SessionMetrics> = state
        .registry
        .list_all()
        .iter()
        .map(|summary| session_metrics(summary, now))
        .collect();

    Json(MetricsResponse {
        active_sessions: sessions.len(),
        session_timeout: format_timeout(settings.session_timeout),
        idle_timeout: format_timeout(settings.idle_timeout),
        last_request: rfc3339(last_request),
        idle_for: format_duration(round_to_secs(elapsed_since(now, last_request))),
        sessions,
    })
}

/// Stop tracking everything and ask the daemon to exit
pub async fn shutdown(State(state): State<Arc<ApiState>>) -> Json<serde_json::Value> {
    tracing::info!("Shutdown requested via API");

    let registry = state.registry.clone();
    tokio::spawn(async move {
        tokio::time::sleep(SHUTDOWN_DELAY).await;
        registry.stop_all();
        registry.request_shutdown();
    });

    Json(serde_json::json!({"status": "shutting down"}))
}
