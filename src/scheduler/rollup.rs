//! Daily uptime rollups.
//!
//! Each complete UTC day gets one row per monitor with its downtime,
//! unknown and uptime totals, so long-range overviews never rescan raw
//! check results. Rollups advance strictly through complete days and are
//! idempotent under re-runs.

use crate::db::{DailyRollup, DbError, Monitor, Store};
use crate::status::{day_start, monitor_uptime, DAY_SEC};

/// How many missed days one pass will backfill per monitor.
const MAX_BACKFILL_DAYS: i64 = 35;

/// Roll up every complete day that is still missing, for every monitor.
/// Returns the number of day rows written.
pub fn process_rollups(store: &Store, now: i64) -> Result<usize, DbError> {
    let today = day_start(now);
    let monitors = store.list_monitors(false)?;
    let mut written = 0;

    for monitor in monitors {
        match rollup_monitor(store, &monitor, today) {
            Ok(n) => written += n,
            Err(e) => {
                tracing::error!("Rollup: failed for monitor {}: {}", monitor.id, e);
            }
        }
    }
    Ok(written)
}

fn rollup_monitor(store: &Store, monitor: &Monitor, today: i64) -> Result<usize, DbError> {
    // Resume after the last rolled day, or start at the creation day.
    let first_day = match store.last_rollup_day(monitor.id)? {
        Some(last) => last + DAY_SEC,
        None => day_start(monitor.created_at),
    };
    let first_day = first_day.max(today - MAX_BACKFILL_DAYS * DAY_SEC);

    let mut written = 0;
    let mut day = first_day;
    // Only days that have fully passed
    while day + DAY_SEC <= today {
        let totals = monitor_uptime(store, monitor, day, day + DAY_SEC)?;
        store.upsert_rollup(&DailyRollup {
            monitor_id: monitor.id,
            day_start_at: day,
            total_sec: totals.total_sec,
            downtime_sec: totals.downtime_sec,
            unknown_sec: totals.unknown_sec,
            uptime_sec: totals.uptime_sec,
        })?;
        written += 1;
        day += DAY_SEC;
    }

    if written > 0 {
        tracing::debug!("Rollup: wrote {} day(s) for monitor {}", written, monitor.id);
    }
    Ok(written)
}
