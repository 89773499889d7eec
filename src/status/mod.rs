//! Public status aggregator.
//!
//! Read-side only: combines monitor state, outages, maintenance windows and
//! incidents into the status-page snapshot. Unknown time counts as
//! unavailable everywhere.

mod uptime;

pub use uptime::*;

use serde::Serialize;

use crate::db::{
    DbError, Impact, Incident, MaintenanceWindow, Monitor, MonitorState, MonitorStatus, Store,
};

pub const SNAPSHOT_KEY: &str = "status";
pub const HEARTBEAT_COUNT: usize = 60;
pub const HEARTBEAT_WINDOW_SEC: i64 = 7 * 86400;
const TOP_INCIDENTS: usize = 5;
const UPCOMING_WINDOWS: usize = 5;

pub const DAY_SEC: i64 = 86400;

/// Start of the UTC day containing `ts`.
pub fn day_start(ts: i64) -> i64 {
    use chrono::{DateTime, Utc};
    DateTime::<Utc>::from_timestamp(ts, 0)
        .map(|dt| {
            dt.date_naive()
                .and_hms_opt(0, 0, 0)
                .expect("midnight is a valid time")
                .and_utc()
                .timestamp()
        })
        .unwrap_or(ts - ts.rem_euclid(DAY_SEC))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub up: usize,
    pub down: usize,
    pub maintenance: usize,
    pub paused: usize,
    pub unknown: usize,
}

impl StatusCounts {
    pub fn total(&self) -> usize {
        self.up + self.down + self.maintenance + self.paused + self.unknown
    }

    fn bump(&mut self, status: MonitorStatus) {
        match status {
            MonitorStatus::Up => self.up += 1,
            MonitorStatus::Down => self.down += 1,
            MonitorStatus::Maintenance => self.maintenance += 1,
            MonitorStatus::Paused => self.paused += 1,
            MonitorStatus::Unknown => self.unknown += 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BannerLevel {
    Operational,
    PartialOutage,
    MajorOutage,
    Unknown,
    Maintenance,
}

#[derive(Debug, Clone, Serialize)]
pub struct BannerIncident {
    pub id: i64,
    pub title: String,
    pub impact: Impact,
}

#[derive(Debug, Clone, Serialize)]
pub struct Banner {
    pub level: BannerLevel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub incident: Option<BannerIncident>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HeartbeatPoint {
    pub checked_at: i64,
    pub status: MonitorStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MonitorStatusView {
    pub id: i64,
    pub name: String,
    pub kind: crate::db::MonitorKind,
    pub status: MonitorStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_checked_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_latency_ms: Option<i64>,
    pub heartbeats: Vec<HeartbeatPoint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uptime_30d_pct: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MaintenanceOverview {
    pub active: Vec<MaintenanceWindow>,
    pub upcoming: Vec<MaintenanceWindow>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub generated_at: i64,
    pub overall_status: MonitorStatus,
    pub banner: Banner,
    pub summary: StatusCounts,
    pub monitors: Vec<MonitorStatusView>,
    pub active_incidents: Vec<Incident>,
    pub maintenance_windows: MaintenanceOverview,
}

/// Effective status of one monitor at `now`.
///
/// Maintenance links win, then literal paused/maintenance state, then the
/// staleness rule: a state older than two intervals is unknown.
pub fn effective_status(
    state: Option<&MonitorState>,
    interval_sec: i64,
    in_maintenance: bool,
    now: i64,
) -> MonitorStatus {
    if in_maintenance {
        return MonitorStatus::Maintenance;
    }
    let Some(state) = state else {
        return MonitorStatus::Unknown;
    };
    if matches!(state.status, MonitorStatus::Paused | MonitorStatus::Maintenance) {
        return state.status;
    }
    match state.last_checked_at {
        None => MonitorStatus::Unknown,
        Some(last) if now - last > 2 * interval_sec => MonitorStatus::Unknown,
        Some(_) => state.status,
    }
}

/// Overall precedence: down > unknown > maintenance > up > paused.
pub fn overall_status(counts: &StatusCounts) -> MonitorStatus {
    if counts.down > 0 {
        MonitorStatus::Down
    } else if counts.unknown > 0 {
        MonitorStatus::Unknown
    } else if counts.maintenance > 0 {
        MonitorStatus::Maintenance
    } else if counts.up > 0 {
        MonitorStatus::Up
    } else if counts.paused > 0 {
        MonitorStatus::Paused
    } else {
        MonitorStatus::Unknown
    }
}

/// The single worst-case banner. Pure function of its inputs.
pub fn banner(
    open_incidents: &[Incident],
    counts: &StatusCounts,
    active_maintenance: bool,
) -> Banner {
    if let Some(top) = open_incidents.iter().max_by_key(|i| i.impact) {
        let level = match top.impact {
            Impact::Major | Impact::Critical => BannerLevel::MajorOutage,
            Impact::Minor => BannerLevel::PartialOutage,
            Impact::None => BannerLevel::Operational,
        };
        return Banner {
            level,
            incident: Some(BannerIncident {
                id: top.id,
                title: top.title.clone(),
                impact: top.impact,
            }),
        };
    }

    let level = if counts.down > 0 {
        let total = counts.total().max(1);
        if counts.down as f64 / total as f64 >= 0.3 {
            BannerLevel::MajorOutage
        } else {
            BannerLevel::PartialOutage
        }
    } else if counts.unknown > 0 {
        BannerLevel::Unknown
    } else if active_maintenance || counts.maintenance > 0 {
        BannerLevel::Maintenance
    } else {
        BannerLevel::Operational
    };
    Banner {
        level,
        incident: None,
    }
}

/// Uptime totals for an arbitrary range, computed live from outages and
/// check results.
pub fn monitor_uptime(
    store: &Store,
    monitor: &Monitor,
    range_start: i64,
    range_end: i64,
) -> Result<UptimeTotals, DbError> {
    let horizon = 2 * monitor.interval_sec.max(1);
    let outages = store.list_outages_overlapping(monitor.id, range_start, range_end)?;
    let checks =
        store.list_check_results(monitor.id, range_start - horizon, range_end, 500_000)?;
    Ok(compute_uptime(
        range_start,
        range_end,
        monitor.created_at,
        monitor.interval_sec,
        &outages,
        &checks,
    ))
}

/// Uptime over the last `days` whole UTC days (from rollups) plus a live
/// partial today.
pub fn monitor_uptime_overview(
    store: &Store,
    monitor: &Monitor,
    days: i64,
    now: i64,
) -> Result<UptimeTotals, DbError> {
    let today = day_start(now);
    let mut totals = UptimeTotals::empty();

    for rollup in store.list_rollups(monitor.id, today - days * DAY_SEC, today)? {
        totals.add(&UptimeTotals {
            total_sec: rollup.total_sec,
            downtime_sec: rollup.downtime_sec,
            unknown_sec: rollup.unknown_sec,
            uptime_sec: rollup.uptime_sec,
            uptime_pct: None,
        });
    }
    let partial = monitor_uptime(store, monitor, today, now)?;
    totals.add(&partial);
    Ok(totals)
}

/// Compute the status-page snapshot at `now`.
pub fn compute_snapshot(store: &Store, now: i64) -> Result<StatusSnapshot, DbError> {
    let monitors = store.list_monitors(true)?;
    let in_maintenance = store.monitor_ids_in_maintenance(now)?;

    let mut counts = StatusCounts::default();
    let mut views = Vec::with_capacity(monitors.len());
    for monitor in &monitors {
        let state = store.get_monitor_state(monitor.id)?;
        let status = effective_status(
            state.as_ref(),
            monitor.interval_sec,
            in_maintenance.contains(&monitor.id),
            now,
        );
        counts.bump(status);

        let heartbeats = store
            .recent_check_results(monitor.id, now - HEARTBEAT_WINDOW_SEC, HEARTBEAT_COUNT)?
            .into_iter()
            .map(|c| HeartbeatPoint {
                checked_at: c.checked_at,
                status: c.status,
                latency_ms: c.latency_ms,
            })
            .collect();

        let uptime_30d = monitor_uptime_overview(store, monitor, 30, now)?;

        // A stale monitor's last observation is not representative; omit it.
        let stale = status == MonitorStatus::Unknown;
        views.push(MonitorStatusView {
            id: monitor.id,
            name: monitor.name.clone(),
            kind: monitor.kind,
            status,
            last_checked_at: state.as_ref().and_then(|s| s.last_checked_at),
            last_latency_ms: if stale {
                None
            } else {
                state.as_ref().and_then(|s| s.last_latency_ms)
            },
            heartbeats,
            uptime_30d_pct: uptime_30d.uptime_pct,
        });
    }

    let active_incidents = store.list_open_incidents(TOP_INCIDENTS)?;
    let active_windows = store.list_windows_active(now)?;
    let upcoming_windows = store.list_windows_upcoming(now, UPCOMING_WINDOWS)?;
    let banner = banner(&active_incidents, &counts, !active_windows.is_empty());

    Ok(StatusSnapshot {
        generated_at: now,
        overall_status: overall_status(&counts),
        banner,
        summary: counts,
        monitors: views,
        active_incidents,
        maintenance_windows: MaintenanceOverview {
            active: active_windows,
            upcoming: upcoming_windows,
        },
    })
}

/// Average and p95 of a latency sample.
pub fn latency_stats(latencies: &[i64]) -> (Option<f64>, Option<f64>) {
    if latencies.is_empty() {
        return (None, None);
    }
    let avg = latencies.iter().sum::<i64>() as f64 / latencies.len() as f64;
    let mut sorted = latencies.to_vec();
    sorted.sort_unstable();
    let rank = ((sorted.len() as f64) * 0.95).ceil() as usize;
    let p95 = sorted[rank.clamp(1, sorted.len()) - 1] as f64;
    (Some(avg), Some(p95))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{IncidentStatus, MonitorConfig, MonitorKind, TcpProbeConfig};
    use tempfile::NamedTempFile;

    fn state(status: MonitorStatus, last_checked_at: Option<i64>) -> MonitorState {
        MonitorState {
            monitor_id: 1,
            status,
            last_checked_at,
            last_latency_ms: Some(12),
            last_error: None,
            consecutive_failures: 0,
            consecutive_successes: 0,
        }
    }

    fn incident(id: i64, impact: Impact) -> Incident {
        Incident {
            id,
            title: format!("incident {}", id),
            status: IncidentStatus::Investigating,
            impact,
            message: String::new(),
            started_at: 0,
            resolved_at: None,
        }
    }

    #[test]
    fn test_effective_status_stale_becomes_unknown() {
        let s = state(MonitorStatus::Up, Some(1000));
        // Δ=200 > 2×60
        assert_eq!(
            effective_status(Some(&s), 60, false, 1200),
            MonitorStatus::Unknown
        );
        // Δ=120 is not yet stale (strictly greater required)
        assert_eq!(effective_status(Some(&s), 60, false, 1120), MonitorStatus::Up);
    }

    #[test]
    fn test_effective_status_precedence() {
        let s = state(MonitorStatus::Down, Some(1000));
        assert_eq!(
            effective_status(Some(&s), 60, true, 1010),
            MonitorStatus::Maintenance
        );
        assert_eq!(
            effective_status(Some(&state(MonitorStatus::Paused, Some(0))), 60, false, 10_000),
            MonitorStatus::Paused
        );
        assert_eq!(effective_status(None, 60, false, 0), MonitorStatus::Unknown);
        assert_eq!(
            effective_status(Some(&state(MonitorStatus::Up, None)), 60, false, 0),
            MonitorStatus::Unknown
        );
    }

    #[test]
    fn test_overall_status_precedence() {
        let mut counts = StatusCounts::default();
        assert_eq!(overall_status(&counts), MonitorStatus::Unknown);
        counts.paused = 1;
        assert_eq!(overall_status(&counts), MonitorStatus::Paused);
        counts.up = 1;
        assert_eq!(overall_status(&counts), MonitorStatus::Up);
        counts.maintenance = 1;
        assert_eq!(overall_status(&counts), MonitorStatus::Maintenance);
        counts.unknown = 1;
        assert_eq!(overall_status(&counts), MonitorStatus::Unknown);
        counts.down = 1;
        assert_eq!(overall_status(&counts), MonitorStatus::Down);
    }

    #[test]
    fn test_banner_incident_precedence() {
        let counts = StatusCounts {
            up: 3,
            ..Default::default()
        };
        let incidents = vec![incident(1, Impact::Minor), incident(2, Impact::Critical)];
        let b = banner(&incidents, &counts, false);
        assert_eq!(b.level, BannerLevel::MajorOutage);
        assert_eq!(b.incident.unwrap().id, 2);

        let b = banner(&[incident(1, Impact::Minor)], &counts, false);
        assert_eq!(b.level, BannerLevel::PartialOutage);

        let b = banner(&[incident(1, Impact::None)], &counts, false);
        assert_eq!(b.level, BannerLevel::Operational);
        assert!(b.incident.is_some());
    }

    #[test]
    fn test_banner_down_ratio() {
        // 1 of 10 down: partial
        let counts = StatusCounts {
            up: 9,
            down: 1,
            ..Default::default()
        };
        assert_eq!(banner(&[], &counts, false).level, BannerLevel::PartialOutage);

        // 3 of 10 down: major
        let counts = StatusCounts {
            up: 7,
            down: 3,
            ..Default::default()
        };
        assert_eq!(banner(&[], &counts, false).level, BannerLevel::MajorOutage);
    }

    #[test]
    fn test_banner_fallthrough() {
        let counts = StatusCounts {
            up: 2,
            unknown: 1,
            ..Default::default()
        };
        assert_eq!(banner(&[], &counts, false).level, BannerLevel::Unknown);

        let counts = StatusCounts {
            up: 2,
            maintenance: 1,
            ..Default::default()
        };
        assert_eq!(banner(&[], &counts, false).level, BannerLevel::Maintenance);

        let counts = StatusCounts {
            up: 2,
            ..Default::default()
        };
        assert_eq!(banner(&[], &counts, true).level, BannerLevel::Maintenance);
        assert_eq!(banner(&[], &counts, false).level, BannerLevel::Operational);
    }

    #[test]
    fn test_latency_stats() {
        assert_eq!(latency_stats(&[]), (None, None));
        let (avg, p95) = latency_stats(&[10, 20, 30, 40]);
        assert_eq!(avg, Some(25.0));
        assert_eq!(p95, Some(40.0));
        let values: Vec<i64> = (1..=100).collect();
        let (_, p95) = latency_stats(&values);
        assert_eq!(p95, Some(95.0));
    }

    #[test]
    fn test_compute_snapshot_end_to_end() {
        let tmp = NamedTempFile::new().unwrap();
        let store = Store::new(tmp.path()).unwrap();

        let mut up_monitor = Monitor {
            id: 0,
            name: "api".to_string(),
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
        store.add_monitor(&mut up_monitor).unwrap();
        let mut down_monitor = up_monitor.clone();
        down_monitor.id = 0;
        down_monitor.name = "web".to_string();
        store.add_monitor(&mut down_monitor).unwrap();

        let now = 10_000;
        let mut s1 = MonitorState::initial(up_monitor.id);
        s1.status = MonitorStatus::Up;
        s1.last_checked_at = Some(now - 30);
        store.upsert_monitor_state(&s1).unwrap();
        let mut s2 = MonitorState::initial(down_monitor.id);
        s2.status = MonitorStatus::Down;
        s2.last_checked_at = Some(now - 30);
        store.upsert_monitor_state(&s2).unwrap();

        let snapshot = compute_snapshot(&store, now).unwrap();
        assert_eq!(snapshot.generated_at, now);
        assert_eq!(snapshot.summary.up, 1);
        assert_eq!(snapshot.summary.down, 1);
        assert_eq!(snapshot.overall_status, MonitorStatus::Down);
        // 1 of 2 down ⇒ ratio 0.5 ⇒ major
        assert_eq!(snapshot.banner.level, BannerLevel::MajorOutage);
        assert_eq!(snapshot.monitors.len(), 2);
    }
}
