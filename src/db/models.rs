//! Database model types and closed status vocabularies.
//!
//! Stored enum values parse leniently: a value written by an older schema
//! degrades to a safe member instead of failing the row.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Monitor probe kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorKind {
    Http,
    Tcp,
}

impl MonitorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MonitorKind::Http => "http",
            MonitorKind::Tcp => "tcp",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "tcp" => MonitorKind::Tcp,
            _ => MonitorKind::Http,
        }
    }
}

/// Monitor status vocabulary, shared by `monitor_state` and `check_results`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorStatus {
    Up,
    Down,
    Maintenance,
    Paused,
    Unknown,
}

impl MonitorStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MonitorStatus::Up => "up",
            MonitorStatus::Down => "down",
            MonitorStatus::Maintenance => "maintenance",
            MonitorStatus::Paused => "paused",
            MonitorStatus::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "up" => MonitorStatus::Up,
            "down" => MonitorStatus::Down,
            "maintenance" => MonitorStatus::Maintenance,
            "paused" => MonitorStatus::Paused,
            _ => MonitorStatus::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IncidentStatus {
    Investigating,
    Identified,
    Monitoring,
    Resolved,
}

impl IncidentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IncidentStatus::Investigating => "investigating",
            IncidentStatus::Identified => "identified",
            IncidentStatus::Monitoring => "monitoring",
            IncidentStatus::Resolved => "resolved",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "identified" => IncidentStatus::Identified,
            "monitoring" => IncidentStatus::Monitoring,
            "resolved" => IncidentStatus::Resolved,
            _ => IncidentStatus::Investigating,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Impact {
    None,
    Minor,
    Major,
    Critical,
}

impl Impact {
    pub fn as_str(&self) -> &'static str {
        match self {
            Impact::None => "none",
            Impact::Minor => "minor",
            Impact::Major => "major",
            Impact::Critical => "critical",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "minor" => Impact::Minor,
            "major" => Impact::Major,
            "critical" => Impact::Critical,
            _ => Impact::None,
        }
    }
}

/// Webhook body encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadType {
    #[default]
    Json,
    #[serde(rename = "x-www-form-urlencoded")]
    Form,
    Param,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Pending,
    Success,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Success => "success",
            DeliveryStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "pending" => DeliveryStatus::Pending,
            "success" => DeliveryStatus::Success,
            _ => DeliveryStatus::Failed,
        }
    }
}

/// Notification event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "monitor.down")]
    MonitorDown,
    #[serde(rename = "monitor.up")]
    MonitorUp,
    #[serde(rename = "incident.created")]
    IncidentCreated,
    #[serde(rename = "incident.updated")]
    IncidentUpdated,
    #[serde(rename = "incident.resolved")]
    IncidentResolved,
    #[serde(rename = "maintenance.started")]
    MaintenanceStarted,
    #[serde(rename = "maintenance.ended")]
    MaintenanceEnded,
    #[serde(rename = "test.ping")]
    TestPing,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::MonitorDown => "monitor.down",
            EventType::MonitorUp => "monitor.up",
            EventType::IncidentCreated => "incident.created",
            EventType::IncidentUpdated => "incident.updated",
            EventType::IncidentResolved => "incident.resolved",
            EventType::MaintenanceStarted => "maintenance.started",
            EventType::MaintenanceEnded => "maintenance.ended",
            EventType::TestPing => "test.ping",
        }
    }
}

/// HTTP probe configuration (the `config` column for `kind = http`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpProbeConfig {
    pub url: String,
    #[serde(default = "default_http_method")]
    pub method: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default = "default_true")]
    pub follow_redirects: bool,
    /// Accepted response status codes. Empty means any 2xx.
    #[serde(default)]
    pub expected_status: Vec<u16>,
    /// Substring the decoded response body must contain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyword: Option<String>,
}

fn default_http_method() -> String {
    "GET".to_string()
}

fn default_true() -> bool {
    true
}

/// TCP probe configuration (the `config` column for `kind = tcp`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TcpProbeConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum MonitorConfig {
    Http(HttpProbeConfig),
    Tcp(TcpProbeConfig),
}

impl MonitorConfig {
    /// Parse the `config` column for the given kind.
    pub fn from_json(kind: MonitorKind, json: &str) -> Result<Self, serde_json::Error> {
        match kind {
            MonitorKind::Http => serde_json::from_str(json).map(MonitorConfig::Http),
            MonitorKind::Tcp => serde_json::from_str(json).map(MonitorConfig::Tcp),
        }
    }

    pub fn to_json(&self) -> String {
        let json = match self {
            MonitorConfig::Http(c) => serde_json::to_string(c),
            MonitorConfig::Tcp(c) => serde_json::to_string(c),
        };
        json.unwrap_or_else(|_| "{}".to_string())
    }

    /// Human-readable probe target, used in event payloads.
    pub fn target(&self) -> String {
        match self {
            MonitorConfig::Http(c) => c.url.clone(),
            MonitorConfig::Tcp(c) => format!("{}:{}", c.host, c.port),
        }
    }
}

/// A user-registered monitoring target.
#[derive(Debug, Clone, Serialize)]
pub struct Monitor {
    pub id: i64,
    pub name: String,
    pub kind: MonitorKind,
    pub is_active: bool,
    pub interval_sec: i64,
    pub timeout_ms: u64,
    pub failures_to_down: u32,
    pub successes_to_up: u32,
    pub config: MonitorConfig,
    pub created_at: i64,
}

/// One row per monitor, upsert-only.
#[derive(Debug, Clone, Serialize)]
pub struct MonitorState {
    pub monitor_id: i64,
    pub status: MonitorStatus,
    pub last_checked_at: Option<i64>,
    pub last_latency_ms: Option<i64>,
    pub last_error: Option<String>,
    pub consecutive_failures: i64,
    pub consecutive_successes: i64,
}

impl MonitorState {
    /// The state of a monitor that has never been probed.
    pub fn initial(monitor_id: i64) -> Self {
        Self {
            monitor_id,
            status: MonitorStatus::Unknown,
            last_checked_at: None,
            last_latency_ms: None,
            last_error: None,
            consecutive_failures: 0,
            consecutive_successes: 0,
        }
    }
}

/// Append-only probe log row.
#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    pub monitor_id: i64,
    pub checked_at: i64,
    pub status: MonitorStatus,
    pub latency_ms: Option<i64>,
    pub error: Option<String>,
}

/// Closed or open downtime interval.
#[derive(Debug, Clone, Serialize)]
pub struct Outage {
    pub id: i64,
    pub monitor_id: i64,
    pub started_at: i64,
    pub ended_at: Option<i64>,
    pub initial_error: Option<String>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Incident {
    pub id: i64,
    pub title: String,
    pub status: IncidentStatus,
    pub impact: Impact,
    pub message: String,
    pub started_at: i64,
    pub resolved_at: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IncidentUpdate {
    pub id: i64,
    pub incident_id: i64,
    pub status: IncidentStatus,
    pub message: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MaintenanceWindow {
    pub id: i64,
    pub title: String,
    pub message: String,
    pub starts_at: i64,
    pub ends_at: i64,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SigningConfig {
    pub enabled: bool,
    /// Name of the environment variable holding the secret.
    pub secret_ref: String,
}

/// Webhook sink configuration (the `config` column of a channel).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub url: String,
    #[serde(default = "default_channel_method")]
    pub method: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub payload_type: PayloadType,
    #[serde(default = "default_channel_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signing: Option<SigningConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_template: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload_template: Option<serde_json::Value>,
    /// Event types this channel receives. Empty means all.
    #[serde(default)]
    pub enabled_events: Vec<String>,
}

fn default_channel_method() -> String {
    "POST".to_string()
}

fn default_channel_timeout_ms() -> u64 {
    5000
}

#[derive(Debug, Clone, Serialize)]
pub struct NotificationChannel {
    pub id: i64,
    pub name: String,
    pub config: ChannelConfig,
    pub created_at: i64,
}

/// Idempotency ledger row for one (event, channel) pair.
#[derive(Debug, Clone, Serialize)]
pub struct NotificationDelivery {
    pub id: i64,
    pub event_key: String,
    pub channel_id: i64,
    pub status: DeliveryStatus,
    pub http_status: Option<u16>,
    pub error: Option<String>,
    pub attempted_at: i64,
    pub finalized_at: Option<i64>,
}

/// Precomputed daily uptime totals.
#[derive(Debug, Clone, Serialize)]
pub struct DailyRollup {
    pub monitor_id: i64,
    pub day_start_at: i64,
    pub total_sec: i64,
    pub downtime_sec: i64,
    pub unknown_sec: i64,
    pub uptime_sec: i64,
}

/// Stored status-page body, keyed by a small namespace.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub generated_at: i64,
    pub body: String,
}

/// A state-transition (or operator) event handed to the notifier.
#[derive(Debug, Clone)]
pub struct Event {
    pub event_type: EventType,
    pub event_key: String,
    pub payload: serde_json::Value,
}
