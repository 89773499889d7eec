//! Retention cleanup for old check results.

use crate::db::{DbError, Store};

/// Purge check results older than the retention window. Rows with
/// `checked_at >= now - retention_days * 86400` are never touched.
pub fn purge_expired(store: &Store, retention_days: i64, now: i64) -> Result<usize, DbError> {
    let cutoff = now - retention_days * 86400;
    let purged = store.purge_check_results_before(cutoff)?;
    if purged > 0 {
        tracing::info!("Retention: purged {} check results older than {}", purged, cutoff);
    }
    Ok(purged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{ApplyPlan, CheckResult, Monitor, MonitorConfig, MonitorKind, MonitorState,
        MonitorStatus, OutageAction, TcpProbeConfig};
    use tempfile::NamedTempFile;

    fn seed_check(store: &Store, monitor_id: i64, t: i64) {
        let plan = ApplyPlan {
            check: CheckResult {
                monitor_id,
                checked_at: t,
                status: MonitorStatus::Up,
                latency_ms: Some(5),
                error: None,
            },
            state: MonitorState::initial(monitor_id),
            outage: OutageAction::None,
        };
        store.persist_apply(&plan).unwrap();
    }

    #[test]
    fn test_purge_respects_retention_boundary() {
        let tmp = NamedTempFile::new().unwrap();
        let store = Store::new(tmp.path()).unwrap();
        let mut monitor = Monitor {
            id: 0,
            name: "m".to_string(),
            kind: MonitorKind::Tcp,
            is_active: true,
            interval_sec: 60,
            timeout_ms: 5000,
            failures_to_down: 2,
            successes_to_up: 2,
            config: MonitorConfig::Tcp(TcpProbeConfig {
                host: "example.com".to_string(),
                port: 443,
            }),
            created_at: 0,
        };
        store.add_monitor(&mut monitor).unwrap();

        let now = 100 * 86400;
        let cutoff = now - 90 * 86400;
        // One row just inside retention, one just outside, one ancient
        seed_check(&store, monitor.id, cutoff);
        seed_check(&store, monitor.id, cutoff - 1);
        seed_check(&store, monitor.id, 100);

        let purged = purge_expired(&store, 90, now).unwrap();
        assert_eq!(purged, 2);

        let remaining = store.list_check_results(monitor.id, 0, now, 100).unwrap();
        assert_eq!(remaining.len(), 1);
        assert!(remaining.iter().all(|c| c.checked_at >= cutoff));
    }
}
