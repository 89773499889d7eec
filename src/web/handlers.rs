//! HTTP request handlers.

use super::AppState;
use crate::db::{
    ChannelConfig, DbError, Event, EventType, Impact, Incident, IncidentStatus, IncidentUpdate,
    MaintenanceWindow, Monitor, MonitorConfig, MonitorKind, MonitorStatus, NotificationChannel,
};
use crate::probe::{resolve_tcp_target, validate_http_target};
use crate::scheduler::unix_now;
use crate::status::{compute_snapshot, latency_stats, monitor_uptime, monitor_uptime_overview,
    SNAPSHOT_KEY};

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::Deserialize;
use serde_json::json;

// Snapshot freshness rules (seconds)
const SNAPSHOT_FRESH_SEC: i64 = 60;
const SNAPSHOT_REFRESH_SEC: i64 = 30;
const SNAPSHOT_STALE_LIMIT_SEC: i64 = 600;

const DEFAULT_PAGE_LIMIT: usize = 20;
const MAX_PAGE_LIMIT: usize = 100;

fn db_error(e: DbError) -> Response {
    match e {
        DbError::NotFound => (StatusCode::NOT_FOUND, "not found").into_response(),
        other => {
            tracing::error!("Web: store error: {}", other);
            (StatusCode::INTERNAL_SERVER_ERROR, other.to_string()).into_response()
        }
    }
}

fn bad_request(msg: impl Into<String>) -> Response {
    (StatusCode::BAD_REQUEST, msg.into()).into_response()
}

/// Parse a `range` query value like `24h`, `7d`, `30d` into seconds.
fn parse_range(range: Option<&str>, default_sec: i64) -> i64 {
    let Some(range) = range else {
        return default_sec;
    };
    let (digits, unit) = range.split_at(range.len().saturating_sub(1));
    let Ok(n) = digits.parse::<i64>() else {
        return default_sec;
    };
    if n <= 0 {
        return default_sec;
    }
    match unit {
        "h" => n * 3600,
        "d" => n * 86400,
        _ => default_sec,
    }
}

fn page_limit(limit: Option<usize>) -> usize {
    limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT)
}

// ============================================================================
// Public: status snapshot
// ============================================================================

fn recompute_snapshot(state: &AppState, now: i64) -> Result<String, DbError> {
    let snapshot = compute_snapshot(&state.store, now)?;
    let body = serde_json::to_string(&snapshot).map_err(|e| DbError::BadConfig(e.to_string()))?;
    state.store.put_snapshot(SNAPSHOT_KEY, now, &body)?;
    Ok(body)
}

fn snapshot_response(body: String, max_age: i64) -> Response {
    (
        [
            (header::CONTENT_TYPE, "application/json".to_string()),
            (
                header::CACHE_CONTROL,
                format!("public, max-age={}", max_age.max(0)),
            ),
        ],
        body,
    )
        .into_response()
}

pub async fn handle_status(State(state): State<AppState>) -> Response {
    let now = unix_now();

    let cached = match state.store.get_snapshot(SNAPSHOT_KEY) {
        Ok(snapshot) => snapshot,
        Err(e) => return db_error(e),
    };

    if let Some(snapshot) = &cached {
        let age = now - snapshot.generated_at;
        if age < SNAPSHOT_FRESH_SEC {
            // Near expiry: refresh in the background, serve the cached body
            if age >= SNAPSHOT_REFRESH_SEC {
                let state = state.clone();
                tokio::spawn(async move {
                    if let Err(e) = recompute_snapshot(&state, unix_now()) {
                        tracing::warn!("Web: background snapshot refresh failed: {}", e);
                    }
                });
            }
            return snapshot_response(snapshot.body.clone(), SNAPSHOT_FRESH_SEC - age);
        }
    }

    match recompute_snapshot(&state, now) {
        Ok(body) => snapshot_response(body, SNAPSHOT_FRESH_SEC),
        Err(e) => {
            // Bounded-stale fallback; never serve unbounded-stale content
            if let Some(snapshot) = cached {
                if now - snapshot.generated_at <= SNAPSHOT_STALE_LIMIT_SEC {
                    tracing::warn!("Web: serving stale snapshot after compute failure: {}", e);
                    return snapshot_response(snapshot.body, 0);
                }
            }
            (StatusCode::SERVICE_UNAVAILABLE, "status unavailable").into_response()
        }
    }
}

// ============================================================================
// Public: per-monitor series
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct RangeQuery {
    pub range: Option<String>,
}

pub async fn handle_monitor_latency(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<RangeQuery>,
) -> Response {
    let monitor = match state.store.get_monitor(id) {
        Ok(monitor) => monitor,
        Err(e) => return db_error(e),
    };

    let now = unix_now();
    let range_sec = parse_range(query.range.as_deref(), 86400);
    let checks = match state
        .store
        .list_check_results(monitor.id, now - range_sec, now, 100_000)
    {
        Ok(checks) => checks,
        Err(e) => return db_error(e),
    };

    let latencies: Vec<i64> = checks
        .iter()
        .filter(|c| c.status == MonitorStatus::Up)
        .filter_map(|c| c.latency_ms)
        .collect();
    let (avg, p95) = latency_stats(&latencies);

    let points: Vec<_> = checks
        .iter()
        .filter(|c| c.latency_ms.is_some())
        .map(|c| json!({"checked_at": c.checked_at, "latency_ms": c.latency_ms, "status": c.status}))
        .collect();

    Json(json!({
        "monitor_id": monitor.id,
        "points": points,
        "avg_latency_ms": avg,
        "p95_latency_ms": p95,
    }))
    .into_response()
}

pub async fn handle_monitor_uptime(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<RangeQuery>,
) -> Response {
    let monitor = match state.store.get_monitor(id) {
        Ok(monitor) => monitor,
        Err(e) => return db_error(e),
    };

    let now = unix_now();
    let range_sec = parse_range(query.range.as_deref(), 86400);
    match monitor_uptime(&state.store, &monitor, now - range_sec, now) {
        Ok(totals) => Json(totals).into_response(),
        Err(e) => db_error(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct OutagesQuery {
    pub range: Option<String>,
    pub limit: Option<usize>,
    pub cursor: Option<i64>,
}

pub async fn handle_monitor_outages(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<OutagesQuery>,
) -> Response {
    if let Err(e) = state.store.get_monitor(id) {
        return db_error(e);
    }

    let now = unix_now();
    let since = now - parse_range(query.range.as_deref(), 30 * 86400);
    let limit = page_limit(query.limit);
    match state.store.list_outages_page(id, since, query.cursor, limit) {
        Ok(outages) => {
            let next_cursor = (outages.len() == limit)
                .then(|| outages.last().map(|o| o.id))
                .flatten();
            Json(json!({"outages": outages, "next_cursor": next_cursor})).into_response()
        }
        Err(e) => db_error(e),
    }
}

pub async fn handle_analytics_uptime(
    State(state): State<AppState>,
    Query(query): Query<RangeQuery>,
) -> Response {
    let now = unix_now();
    let days = parse_range(query.range.as_deref(), 30 * 86400) / 86400;

    let monitors = match state.store.list_monitors(true) {
        Ok(monitors) => monitors,
        Err(e) => return db_error(e),
    };

    let mut overall = crate::status::UptimeTotals::empty();
    let mut per_monitor = Vec::with_capacity(monitors.len());
    for monitor in &monitors {
        match monitor_uptime_overview(&state.store, monitor, days, now) {
            Ok(totals) => {
                overall.add(&totals);
                per_monitor.push(json!({
                    "monitor_id": monitor.id,
                    "name": monitor.name,
                    "totals": totals,
                }));
            }
            Err(e) => return db_error(e),
        }
    }

    Json(json!({"range_days": days, "overall": overall, "monitors": per_monitor})).into_response()
}

// ============================================================================
// Public: incidents & maintenance windows
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub limit: Option<usize>,
    pub cursor: Option<i64>,
}

pub async fn handle_list_incidents(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> Response {
    let limit = page_limit(query.limit);
    match state.store.list_incidents_page(query.cursor, limit) {
        Ok(incidents) => {
            let next_cursor = (incidents.len() == limit)
                .then(|| incidents.last().map(|i| i.id))
                .flatten();
            Json(json!({"incidents": incidents, "next_cursor": next_cursor})).into_response()
        }
        Err(e) => db_error(e),
    }
}

pub async fn handle_list_windows(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> Response {
    let limit = page_limit(query.limit);
    match state.store.list_maintenance_windows_page(query.cursor, limit) {
        Ok(windows) => {
            let next_cursor = (windows.len() == limit)
                .then(|| windows.last().map(|w| w.id))
                .flatten();
            Json(json!({"maintenance_windows": windows, "next_cursor": next_cursor}))
                .into_response()
        }
        Err(e) => db_error(e),
    }
}

// ============================================================================
// Admin: monitors
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct MonitorRequest {
    pub name: String,
    pub kind: String,
    #[serde(default = "default_interval_sec")]
    pub interval_sec: i64,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_threshold")]
    pub failures_to_down: u32,
    #[serde(default = "default_threshold")]
    pub successes_to_up: u32,
    pub config: serde_json::Value,
}

fn default_interval_sec() -> i64 {
    60
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_threshold() -> u32 {
    2
}

async fn validate_monitor_request(
    req: &MonitorRequest,
    allow_private: bool,
) -> Result<(MonitorKind, MonitorConfig), String> {
    if req.name.trim().is_empty() {
        return Err("name must not be empty".to_string());
    }
    if req.interval_sec < 20 {
        return Err("interval_sec must be at least 20".to_string());
    }
    if req.timeout_ms == 0 {
        return Err("timeout_ms must be positive".to_string());
    }
    if req.failures_to_down == 0 || req.successes_to_up == 0 {
        return Err("thresholds must be at least 1".to_string());
    }

    let kind = match req.kind.as_str() {
        "http" => MonitorKind::Http,
        "tcp" => MonitorKind::Tcp,
        other => return Err(format!("unknown monitor kind: {}", other)),
    };

    let config = MonitorConfig::from_json(kind, &req.config.to_string())
        .map_err(|e| format!("invalid config: {}", e))?;
    match &config {
        MonitorConfig::Http(http) => {
            validate_http_target(&http.url, allow_private)
                .await
                .map_err(|e| format!("invalid target: {}", e.reason()))?;
        }
        MonitorConfig::Tcp(tcp) => {
            if tcp.host.trim().is_empty() {
                return Err("host must not be empty".to_string());
            }
            resolve_tcp_target(&tcp.host, tcp.port, allow_private)
                .await
                .map_err(|e| format!("invalid target: {}", e.reason()))?;
        }
    }
    Ok((kind, config))
}

pub async fn handle_admin_list_monitors(State(state): State<AppState>) -> Response {
    match state.store.list_monitors(false) {
        Ok(monitors) => Json(monitors).into_response(),
        Err(e) => db_error(e),
    }
}

pub async fn handle_get_monitor(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    match state.store.get_monitor(id) {
        Ok(monitor) => Json(monitor).into_response(),
        Err(e) => db_error(e),
    }
}

pub async fn handle_create_monitor(
    State(state): State<AppState>,
    Json(req): Json<MonitorRequest>,
) -> Response {
    let (kind, config) =
        match validate_monitor_request(&req, state.config.allow_private_targets).await {
            Ok(validated) => validated,
            Err(msg) => return bad_request(msg),
        };

    let mut monitor = Monitor {
        id: 0,
        name: req.name,
        kind,
        is_active: true,
        interval_sec: req.interval_sec,
        timeout_ms: req.timeout_ms,
        failures_to_down: req.failures_to_down,
        successes_to_up: req.successes_to_up,
        config,
        created_at: unix_now(),
    };

    match state.store.add_monitor(&mut monitor) {
        Ok(_) => (StatusCode::CREATED, Json(monitor)).into_response(),
        Err(e) => db_error(e),
    }
}

pub async fn handle_update_monitor(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<MonitorRequest>,
) -> Response {
    let existing = match state.store.get_monitor(id) {
        Ok(monitor) => monitor,
        Err(e) => return db_error(e),
    };

    let (kind, config) =
        match validate_monitor_request(&req, state.config.allow_private_targets).await {
            Ok(validated) => validated,
            Err(msg) => return bad_request(msg),
        };

    let updated = Monitor {
        id,
        name: req.name,
        kind,
        is_active: existing.is_active,
        interval_sec: req.interval_sec,
        timeout_ms: req.timeout_ms,
        failures_to_down: req.failures_to_down,
        successes_to_up: req.successes_to_up,
        config,
        created_at: existing.created_at,
    };

    match state.store.update_monitor(&updated) {
        Ok(_) => Json(updated).into_response(),
        Err(e) => db_error(e),
    }
}

pub async fn handle_pause_monitor(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    match state.store.set_monitor_active(id, false) {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => db_error(e),
    }
}

pub async fn handle_resume_monitor(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    match state.store.set_monitor_active(id, true) {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => db_error(e),
    }
}

// ============================================================================
// Admin: notification channels
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ChannelRequest {
    pub name: String,
    pub config: ChannelConfig,
}

fn validate_channel_request(req: &ChannelRequest) -> Result<(), String> {
    if req.name.trim().is_empty() {
        return Err("name must not be empty".to_string());
    }
    let url = url::Url::parse(&req.config.url).map_err(|e| format!("invalid url: {}", e))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(format!("unsupported scheme: {}", url.scheme()));
    }
    if req.config.timeout_ms == 0 {
        return Err("timeout_ms must be positive".to_string());
    }
    Ok(())
}

pub async fn handle_list_channels(State(state): State<AppState>) -> Response {
    match state.store.list_channels() {
        Ok(channels) => Json(channels).into_response(),
        Err(e) => db_error(e),
    }
}

pub async fn handle_create_channel(
    State(state): State<AppState>,
    Json(req): Json<ChannelRequest>,
) -> Response {
    if let Err(msg) = validate_channel_request(&req) {
        return bad_request(msg);
    }
    let mut channel = NotificationChannel {
        id: 0,
        name: req.name,
        config: req.config,
        created_at: unix_now(),
    };
    match state.store.add_channel(&mut channel) {
        Ok(_) => (StatusCode::CREATED, Json(channel)).into_response(),
        Err(e) => db_error(e),
    }
}

pub async fn handle_update_channel(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<ChannelRequest>,
) -> Response {
    if let Err(msg) = validate_channel_request(&req) {
        return bad_request(msg);
    }
    let channel = NotificationChannel {
        id,
        name: req.name,
        config: req.config,
        created_at: 0,
    };
    match state.store.update_channel(&channel) {
        Ok(_) => Json(channel).into_response(),
        Err(e) => db_error(e),
    }
}

pub async fn handle_delete_channel(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Response {
    match state.store.delete_channel(id) {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => db_error(e),
    }
}

/// Send a `test.ping` through one channel, bypassing its event filter.
pub async fn handle_test_channel(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    let channel = match state.store.get_channel(id) {
        Ok(channel) => channel,
        Err(e) => return db_error(e),
    };

    let now = unix_now();
    let event = Event {
        event_type: EventType::TestPing,
        event_key: format!("test.ping:{}:{}", channel.id, now),
        payload: json!({"channel_id": channel.id, "channel_name": channel.name}),
    };
    state.notifier.dispatch_to(&event, channel.id, now).await;

    match state.store.get_delivery(&event.event_key, channel.id) {
        Ok(Some(delivery)) => Json(delivery).into_response(),
        Ok(None) => (StatusCode::INTERNAL_SERVER_ERROR, "delivery not recorded").into_response(),
        Err(e) => db_error(e),
    }
}

// ============================================================================
// Admin: incidents
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateIncidentRequest {
    pub title: String,
    #[serde(default)]
    pub impact: Option<String>,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub monitor_ids: Vec<i64>,
}

pub async fn handle_create_incident(
    State(state): State<AppState>,
    Json(req): Json<CreateIncidentRequest>,
) -> Response {
    if req.title.trim().is_empty() {
        return bad_request("title must not be empty");
    }

    let now = unix_now();
    let mut incident = Incident {
        id: 0,
        title: req.title,
        status: IncidentStatus::Investigating,
        impact: Impact::parse(req.impact.as_deref().unwrap_or("none")),
        message: req.message,
        started_at: now,
        resolved_at: None,
    };
    if let Err(e) = state.store.add_incident(&mut incident) {
        return db_error(e);
    }
    if let Err(e) = state.store.set_incident_monitors(incident.id, &req.monitor_ids) {
        return db_error(e);
    }

    emit_incident_event(
        &state,
        EventType::IncidentCreated,
        &incident,
        format!("incident.created:{}:{}", incident.id, incident.started_at),
        now,
    );
    (StatusCode::CREATED, Json(incident)).into_response()
}

pub async fn handle_get_incident(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    let incident = match state.store.get_incident(id) {
        Ok(incident) => incident,
        Err(e) => return db_error(e),
    };
    let updates = match state.store.list_incident_updates(id) {
        Ok(updates) => updates,
        Err(e) => return db_error(e),
    };
    let monitor_ids = match state.store.monitor_ids_for_incident(id) {
        Ok(ids) => ids,
        Err(e) => return db_error(e),
    };
    Json(json!({"incident": incident, "updates": updates, "monitor_ids": monitor_ids}))
        .into_response()
}

#[derive(Debug, Deserialize)]
pub struct UpdateIncidentRequest {
    pub title: Option<String>,
    pub impact: Option<String>,
    pub message: Option<String>,
    pub monitor_ids: Option<Vec<i64>>,
}

pub async fn handle_update_incident(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateIncidentRequest>,
) -> Response {
    let mut incident = match state.store.get_incident(id) {
        Ok(incident) => incident,
        Err(e) => return db_error(e),
    };

    if let Some(title) = req.title {
        if title.trim().is_empty() {
            return bad_request("title must not be empty");
        }
        incident.title = title;
    }
    if let Some(impact) = req.impact.as_deref() {
        incident.impact = Impact::parse(impact);
    }
    if let Some(message) = req.message {
        incident.message = message;
    }
    if let Err(e) = state.store.update_incident(&incident) {
        return db_error(e);
    }
    if let Some(monitor_ids) = &req.monitor_ids {
        if let Err(e) = state.store.set_incident_monitors(id, monitor_ids) {
            return db_error(e);
        }
    }
    Json(incident).into_response()
}

#[derive(Debug, Deserialize)]
pub struct IncidentUpdateRequest {
    pub status: String,
    #[serde(default)]
    pub message: String,
}

pub async fn handle_add_incident_update(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<IncidentUpdateRequest>,
) -> Response {
    let mut incident = match state.store.get_incident(id) {
        Ok(incident) => incident,
        Err(e) => return db_error(e),
    };
    if incident.resolved_at.is_some() {
        return bad_request("incident is already resolved");
    }

    let now = unix_now();
    let status = IncidentStatus::parse(&req.status);
    let mut update = IncidentUpdate {
        id: 0,
        incident_id: id,
        status,
        message: req.message,
        created_at: now,
    };
    if let Err(e) = state.store.add_incident_update(&mut update) {
        return db_error(e);
    }

    incident.status = status;
    if status == IncidentStatus::Resolved {
        incident.resolved_at = Some(now);
    }
    if let Err(e) = state.store.update_incident(&incident) {
        return db_error(e);
    }

    if status == IncidentStatus::Resolved {
        emit_incident_event(
            &state,
            EventType::IncidentResolved,
            &incident,
            format!("incident.resolved:{}:{}", incident.id, now),
            now,
        );
    } else {
        emit_incident_event(
            &state,
            EventType::IncidentUpdated,
            &incident,
            format!("incident.updated:{}:{}", incident.id, update.id),
            now,
        );
    }
    (StatusCode::CREATED, Json(update)).into_response()
}

fn emit_incident_event(
    state: &AppState,
    event_type: EventType,
    incident: &Incident,
    event_key: String,
    now: i64,
) {
    let event = Event {
        event_type,
        event_key,
        payload: json!({
            "incident_id": incident.id,
            "title": incident.title,
            "status": incident.status,
            "impact": incident.impact,
            "message": incident.message,
        }),
    };
    let notifier = state.notifier.clone();
    tokio::spawn(async move {
        notifier.dispatch(&event, now).await;
    });
}

// ============================================================================
// Admin: maintenance windows
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct WindowRequest {
    pub title: String,
    #[serde(default)]
    pub message: String,
    pub starts_at: i64,
    pub ends_at: i64,
    #[serde(default)]
    pub monitor_ids: Vec<i64>,
}

fn validate_window_request(req: &WindowRequest) -> Result<(), String> {
    if req.title.trim().is_empty() {
        return Err("title must not be empty".to_string());
    }
    if req.starts_at >= req.ends_at {
        return Err("starts_at must be before ends_at".to_string());
    }
    Ok(())
}

pub async fn handle_create_window(
    State(state): State<AppState>,
    Json(req): Json<WindowRequest>,
) -> Response {
    if let Err(msg) = validate_window_request(&req) {
        return bad_request(msg);
    }

    let mut window = MaintenanceWindow {
        id: 0,
        title: req.title,
        message: req.message,
        starts_at: req.starts_at,
        ends_at: req.ends_at,
        created_at: unix_now(),
    };
    if let Err(e) = state.store.add_maintenance_window(&mut window) {
        return db_error(e);
    }
    if let Err(e) = state.store.set_window_monitors(window.id, &req.monitor_ids) {
        return db_error(e);
    }
    (StatusCode::CREATED, Json(window)).into_response()
}

pub async fn handle_update_window(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<WindowRequest>,
) -> Response {
    if let Err(msg) = validate_window_request(&req) {
        return bad_request(msg);
    }
    let existing = match state.store.get_maintenance_window(id) {
        Ok(window) => window,
        Err(e) => return db_error(e),
    };

    let window = MaintenanceWindow {
        id,
        title: req.title,
        message: req.message,
        starts_at: req.starts_at,
        ends_at: req.ends_at,
        created_at: existing.created_at,
    };
    if let Err(e) = state.store.update_maintenance_window(&window) {
        return db_error(e);
    }
    if let Err(e) = state.store.set_window_monitors(id, &req.monitor_ids) {
        return db_error(e);
    }
    Json(window).into_response()
}

pub async fn handle_delete_window(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    match state.store.delete_maintenance_window(id) {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => db_error(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Store;
    use crate::notify::Notifier;
    use axum::body::Body;
    use axum::http::Request;
    use std::sync::Arc;
    use tempfile::NamedTempFile;
    use tower::ServiceExt;

    fn test_app() -> (NamedTempFile, Store, axum::Router) {
        let tmp = NamedTempFile::new().unwrap();
        let store = Store::new(tmp.path()).unwrap();
        let config = crate::config::Config {
            allow_private_targets: true,
            ..Default::default()
        };
        let notifier = Arc::new(Notifier::new(store.clone(), 5));
        let server = crate::web::Server::new(config, store.clone(), notifier);
        let router = server.routes();
        (tmp, store, router)
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_parse_range() {
        assert_eq!(parse_range(Some("24h"), 0), 86400);
        assert_eq!(parse_range(Some("7d"), 0), 7 * 86400);
        assert_eq!(parse_range(Some("90d"), 0), 90 * 86400);
        assert_eq!(parse_range(Some("bogus"), 42), 42);
        assert_eq!(parse_range(Some("-3d"), 42), 42);
        assert_eq!(parse_range(None, 42), 42);
    }

    #[tokio::test]
    async fn test_status_endpoint_serves_snapshot() {
        let (_tmp, store, router) = test_app();

        let response = router
            .oneshot(Request::get("/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let cache_control = response
            .headers()
            .get(header::CACHE_CONTROL)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert!(cache_control.contains("max-age="));

        let body = body_json(response).await;
        assert_eq!(body["overall_status"], "unknown");
        assert!(body["monitors"].as_array().unwrap().is_empty());

        // The snapshot was written through to the store
        assert!(store.get_snapshot(SNAPSHOT_KEY).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_create_monitor_roundtrip() {
        let (_tmp, store, router) = test_app();

        let request = Request::post("/api/monitors")
            .header("content-type", "application/json")
            .body(Body::from(
                serde_json::to_vec(&json!({
                    "name": "db",
                    "kind": "tcp",
                    "interval_sec": 30,
                    "config": {"host": "127.0.0.1", "port": 5432}
                }))
                .unwrap(),
            ))
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let body = body_json(response).await;
        let id = body["id"].as_i64().unwrap();
        let monitor = store.get_monitor(id).unwrap();
        assert_eq!(monitor.name, "db");
        assert_eq!(monitor.interval_sec, 30);
        assert!(monitor.is_active);
    }

    #[tokio::test]
    async fn test_create_monitor_validation() {
        let (_tmp, _store, router) = test_app();

        // Interval below the floor
        let request = Request::post("/api/monitors")
            .header("content-type", "application/json")
            .body(Body::from(
                serde_json::to_vec(&json!({
                    "name": "x",
                    "kind": "tcp",
                    "interval_sec": 5,
                    "config": {"host": "127.0.0.1", "port": 80}
                }))
                .unwrap(),
            ))
            .unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        // Bad scheme
        let request = Request::post("/api/monitors")
            .header("content-type", "application/json")
            .body(Body::from(
                serde_json::to_vec(&json!({
                    "name": "x",
                    "kind": "http",
                    "config": {"url": "ftp://example.com"}
                }))
                .unwrap(),
            ))
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_private_target_rejected_on_admin_write() {
        let (_tmp, store, router) = {
            let tmp = NamedTempFile::new().unwrap();
            let store = Store::new(tmp.path()).unwrap();
            // Default policy: private targets rejected
            let config = crate::config::Config::default();
            let notifier = Arc::new(Notifier::new(store.clone(), 5));
            let server = crate::web::Server::new(config, store.clone(), notifier);
            let router = server.routes();
            (tmp, store, router)
        };

        let request = Request::post("/api/monitors")
            .header("content-type", "application/json")
            .body(Body::from(
                serde_json::to_vec(&json!({
                    "name": "internal",
                    "kind": "http",
                    "config": {"url": "http://192.168.1.1/health"}
                }))
                .unwrap(),
            ))
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(store.list_monitors(false).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_incident_lifecycle() {
        let (_tmp, store, router) = test_app();

        let request = Request::post("/api/incidents")
            .header("content-type", "application/json")
            .body(Body::from(
                serde_json::to_vec(&json!({
                    "title": "elevated errors",
                    "impact": "minor",
                    "message": "investigating"
                }))
                .unwrap(),
            ))
            .unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = body_json(response).await;
        let id = body["id"].as_i64().unwrap();

        let request = Request::post(format!("/api/incidents/{}/updates", id))
            .header("content-type", "application/json")
            .body(Body::from(
                serde_json::to_vec(&json!({"status": "resolved", "message": "fixed"})).unwrap(),
            ))
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let incident = store.get_incident(id).unwrap();
        assert_eq!(incident.status, IncidentStatus::Resolved);
        assert!(incident.resolved_at.is_some());
        assert_eq!(store.list_open_incidents(10).unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_window_validation() {
        let (_tmp, _store, router) = test_app();

        let request = Request::post("/api/maintenance-windows")
            .header("content-type", "application/json")
            .body(Body::from(
                serde_json::to_vec(&json!({
                    "title": "upgrade",
                    "starts_at": 2000,
                    "ends_at": 1000
                }))
                .unwrap(),
            ))
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
