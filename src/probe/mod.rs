//! Probe executors for uptime checks.
//!
//! Supports HTTP(S) and TCP probes. Executors never fail outside their
//! contract: every failure comes back as a typed [`ProbeOutcome`].

mod http;
mod tcp;
mod target;

pub use http::*;
pub use tcp::*;
pub use target::*;

use thiserror::Error;

use crate::db::{Monitor, MonitorConfig};

/// Target validation error, raised before a probe is attempted.
#[derive(Error, Debug)]
pub enum TargetError {
    #[error("invalid_target: {0}")]
    Invalid(String),
    #[error("dns_error: {0}")]
    Dns(String),
    #[error("disallowed_target: {0}")]
    Disallowed(String),
}

impl TargetError {
    /// Short, stable reason string recorded as the check error.
    pub fn reason(&self) -> &'static str {
        match self {
            TargetError::Invalid(_) => "invalid_target",
            TargetError::Dns(_) => "dns_error",
            TargetError::Disallowed(_) => "disallowed_target",
        }
    }
}

/// Result of one probe at a point in time.
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeOutcome {
    Up { latency_ms: u64 },
    Down { latency_ms: Option<u64>, error: String },
}

impl ProbeOutcome {
    pub fn down(error: impl Into<String>) -> Self {
        ProbeOutcome::Down {
            latency_ms: None,
            error: error.into(),
        }
    }

    pub fn is_up(&self) -> bool {
        matches!(self, ProbeOutcome::Up { .. })
    }

    pub fn latency_ms(&self) -> Option<u64> {
        match self {
            ProbeOutcome::Up { latency_ms } => Some(*latency_ms),
            ProbeOutcome::Down { latency_ms, .. } => *latency_ms,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            ProbeOutcome::Up { .. } => None,
            ProbeOutcome::Down { error, .. } => Some(error),
        }
    }
}

/// Run the probe for a monitor. The target is re-validated on every call:
/// a config that drifted to a private or reserved address since admission
/// comes back as a down outcome, not a request.
pub async fn run_probe(monitor: &Monitor, allow_private: bool) -> ProbeOutcome {
    match &monitor.config {
        MonitorConfig::Http(cfg) => {
            if let Err(e) = validate_http_target(&cfg.url, allow_private).await {
                tracing::warn!(
                    "Probe: rejecting target for monitor {}: {}",
                    monitor.id,
                    e.reason()
                );
                return ProbeOutcome::down(e.reason());
            }
            run_http_probe(cfg, monitor.timeout_ms).await
        }
        MonitorConfig::Tcp(cfg) => {
            let addr = match resolve_tcp_target(&cfg.host, cfg.port, allow_private).await {
                Ok(addr) => addr,
                Err(e) => {
                    tracing::warn!(
                        "Probe: rejecting target for monitor {}: {}",
                        monitor.id,
                        e.reason()
                    );
                    return ProbeOutcome::down(e.reason());
                }
            };
            run_tcp_probe(addr, monitor.timeout_ms).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{MonitorKind, TcpProbeConfig};

    fn tcp_monitor(host: &str, port: u16) -> Monitor {
        Monitor {
            id: 1,
            name: "t".to_string(),
            kind: MonitorKind::Tcp,
            is_active: true,
            interval_sec: 60,
            timeout_ms: 1000,
            failures_to_down: 2,
            successes_to_up: 2,
            config: MonitorConfig::Tcp(TcpProbeConfig {
                host: host.to_string(),
                port,
            }),
            created_at: 0,
        }
    }

    #[tokio::test]
    async fn test_private_target_rejected_by_policy() {
        let monitor = tcp_monitor("127.0.0.1", 80);
        let outcome = run_probe(&monitor, false).await;
        assert_eq!(outcome.error(), Some("disallowed_target"));
    }

    #[tokio::test]
    async fn test_private_target_allowed_with_allowlist() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let monitor = tcp_monitor("127.0.0.1", port);
        let outcome = run_probe(&monitor, true).await;
        assert!(outcome.is_up());
    }
}
