//! Configuration module for Uptimer.
//!
//! Loads configuration from environment variables with sensible defaults.

use std::env;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP port for the web server (default: 8080)
    pub http_port: u16,
    /// Path to the SQLite database file (default: "uptimer.db")
    pub db_path: String,
    /// Scheduler tick period in seconds; the tick lease lasts twice this.
    pub tick_interval_sec: i64,
    /// Concurrent probe cap per tick.
    pub probe_concurrency: usize,
    /// Concurrent webhook deliveries per event.
    pub notify_concurrency: usize,
    /// Cap on monitors probed in one tick.
    pub max_due_per_tick: usize,
    /// Days of check_results to keep.
    pub retention_check_results_days: i64,
    /// Permit probes against private or reserved addresses.
    pub allow_private_targets: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_port: 8080,
            db_path: "uptimer.db".to_string(),
            tick_interval_sec: 60,
            probe_concurrency: 5,
            notify_concurrency: 5,
            max_due_per_tick: 200,
            retention_check_results_days: 90,
            allow_private_targets: false,
        }
    }
}

impl Config {
    /// Load configuration from `UPTIMER_*` environment variables.
    pub fn load() -> Self {
        let mut cfg = Self::default();

        if let Some(port) = parse_var("UPTIMER_HTTP_PORT") {
            cfg.http_port = port;
        }
        if let Ok(db_path) = env::var("UPTIMER_DB_PATH") {
            cfg.db_path = db_path;
        }
        if let Some(secs) = parse_var::<i64>("UPTIMER_TICK_INTERVAL_SEC") {
            if secs > 0 {
                cfg.tick_interval_sec = secs;
            }
        }
        if let Some(n) = parse_var::<usize>("UPTIMER_PROBE_CONCURRENCY") {
            if n > 0 {
                cfg.probe_concurrency = n;
            }
        }
        if let Some(n) = parse_var::<usize>("UPTIMER_NOTIFY_CONCURRENCY") {
            if n > 0 {
                cfg.notify_concurrency = n;
            }
        }
        if let Some(n) = parse_var::<usize>("UPTIMER_MAX_DUE_PER_TICK") {
            if n > 0 {
                cfg.max_due_per_tick = n;
            }
        }
        if let Some(days) = parse_var::<i64>("UPTIMER_RETENTION_CHECK_RESULTS_DAYS") {
            if days > 0 {
                cfg.retention_check_results_days = days;
            }
        }
        if let Ok(v) = env::var("UPTIMER_ALLOW_PRIVATE_TARGETS") {
            cfg.allow_private_targets = matches!(v.as_str(), "1" | "true" | "yes");
        }

        cfg
    }
}

fn parse_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = Config::default();
        assert_eq!(cfg.http_port, 8080);
        assert_eq!(cfg.db_path, "uptimer.db");
        assert_eq!(cfg.tick_interval_sec, 60);
        assert_eq!(cfg.probe_concurrency, 5);
        assert_eq!(cfg.notify_concurrency, 5);
        assert_eq!(cfg.retention_check_results_days, 90);
        assert!(!cfg.allow_private_targets);
    }
}
