//! Scheduled probe engine.
//!
//! One cooperative tick per interval: claim the global lease, select due
//! monitors, fan probes out under a concurrency cap, feed outcomes through
//! the state machine, hand transition events to the notifier, and run the
//! daily retention/rollup pass when a UTC day boundary has been crossed.

mod retention;
mod rollup;

pub use retention::*;
pub use rollup::*;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::{mpsc, Semaphore};

use crate::config::Config;
use crate::db::{DbError, Event, EventType, MaintenanceWindow, Monitor, Store};
use crate::notify::Notifier;
use crate::probe::run_probe;
use crate::state::{plan_apply, transition_event_key, Transition};

/// Name of the tick lease row.
pub const TICK_LOCK: &str = "scheduled-tick";

/// What one tick did, for logging and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub lease_acquired: bool,
    pub probed: usize,
    pub events: usize,
    pub rolled_days: usize,
}

pub struct Scheduler {
    store: Store,
    notifier: Arc<Notifier>,
    config: Config,
    holder: String,
}

impl Scheduler {
    pub fn new(store: Store, notifier: Arc<Notifier>, config: Config) -> Self {
        let holder = format!("uptimer-{}-{:08x}", std::process::id(), rand::random::<u32>());
        Self {
            store,
            notifier,
            config,
            holder,
        }
    }

    /// Spawn the periodic tick loop.
    pub fn spawn(self: Arc<Self>) {
        let period = Duration::from_secs(self.config.tick_interval_sec as u64);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                let now = unix_now();
                match self.tick(now).await {
                    Ok(report) if report.lease_acquired => {
                        tracing::info!(
                            "Scheduler: tick at {} probed {} monitor(s), {} event(s)",
                            now,
                            report.probed,
                            report.events
                        );
                    }
                    Ok(_) => {
                        tracing::debug!("Scheduler: tick at {} skipped, lease not acquired", now);
                    }
                    Err(e) => {
                        tracing::error!("Scheduler: tick at {} failed: {}", now, e);
                    }
                }
            }
        });
    }

    /// Run one tick at `now`. Claims the lease or does nothing.
    pub async fn tick(&self, now: i64) -> Result<TickReport, DbError> {
        let ttl = 2 * self.config.tick_interval_sec;
        if !self.store.try_claim_lock(TICK_LOCK, &self.holder, now, ttl)? {
            return Ok(TickReport::default());
        }

        let report = self.run_locked(now).await;

        // Best-effort: a missed release just expires with the lease.
        if let Err(e) = self.store.release_lock(TICK_LOCK, &self.holder) {
            tracing::warn!("Scheduler: lease release failed: {}", e);
        }
        report
    }

    async fn run_locked(&self, now: i64) -> Result<TickReport, DbError> {
        let due = self
            .store
            .list_due_monitors(now, self.config.max_due_per_tick)?;
        let probed = due.len();

        let semaphore = Arc::new(Semaphore::new(self.config.probe_concurrency.max(1)));
        let (tx, mut rx) = mpsc::channel::<Event>(probed.max(1));
        let mut handles = Vec::with_capacity(probed);
        for monitor in due {
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(p) => p,
                Err(_) => break,
            };
            let store = self.store.clone();
            let allow_private = self.config.allow_private_targets;
            let tx = tx.clone();
            handles.push(tokio::spawn(async move {
                let _permit = permit;
                if let Some(event) = probe_and_apply(&store, monitor, allow_private, now).await {
                    let _ = tx.send(event).await;
                }
            }));
        }
        drop(tx);

        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!("Scheduler: probe task failed: {}", e);
            }
        }

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events.extend(self.maintenance_events(now)?);

        // Fan out before tick teardown; delivery failures are already
        // finalized per channel and never bubble up here.
        self.notifier.dispatch_all(&events, now).await;

        // Daily pass: rollups advance only when a UTC day boundary has been
        // crossed since the last observed rollup, and retention rides along.
        let rolled_days = process_rollups(&self.store, now)?;
        if rolled_days > 0 {
            purge_expired(&self.store, self.config.retention_check_results_days, now)?;
        }

        Ok(TickReport {
            lease_acquired: true,
            probed,
            events: events.len(),
            rolled_days,
        })
    }

    /// Maintenance windows whose boundaries were crossed since the previous
    /// tick. The deterministic event keys make re-detection harmless.
    fn maintenance_events(&self, now: i64) -> Result<Vec<Event>, DbError> {
        let since = now - 2 * self.config.tick_interval_sec;
        let mut events = Vec::new();
        for window in self.store.list_windows_crossing(since, now)? {
            if window.starts_at > since && window.starts_at <= now {
                events.push(maintenance_event(EventType::MaintenanceStarted, &window));
            }
            if window.ends_at > since && window.ends_at <= now {
                events.push(maintenance_event(EventType::MaintenanceEnded, &window));
            }
        }
        Ok(events)
    }
}

/// Probe one monitor and apply the outcome. A storage failure here is
/// logged and skipped; the monitor simply becomes due again next tick.
async fn probe_and_apply(
    store: &Store,
    monitor: Monitor,
    allow_private: bool,
    now: i64,
) -> Option<Event> {
    let outcome = run_probe(&monitor, allow_private).await;

    let result: Result<Option<Event>, DbError> = (|| {
        let prev = store.get_monitor_state(monitor.id)?;
        let in_maintenance = store.monitor_in_maintenance(monitor.id, now)?;
        let open_outage = store.get_open_outage(monitor.id)?;
        let planned = plan_apply(
            &monitor,
            prev,
            in_maintenance,
            open_outage.is_some(),
            &outcome,
            now,
        );
        let applied = store.persist_apply(&planned.plan)?;
        if applied.deduped {
            return Ok(None);
        }
        let Some(transition) = planned.transition else {
            return Ok(None);
        };

        // An already-open outage was reused when the threshold re-tripped.
        let outage_id = applied
            .outage_id
            .or(open_outage.map(|o| o.id));
        let event_key = transition_event_key(transition, monitor.id, outage_id, now);

        let event = match transition {
            Transition::Down => Event {
                event_type: EventType::MonitorDown,
                event_key,
                payload: json!({
                    "monitor_id": monitor.id,
                    "monitor_name": monitor.name,
                    "target": monitor.config.target(),
                    "error": outcome.error(),
                    "failed_at": now,
                    "outage_id": outage_id,
                }),
            },
            Transition::Up => {
                let downtime_sec = outage_id
                    .and_then(|id| store.get_outage(id).ok().flatten())
                    .map(|o| (o.ended_at.unwrap_or(now) - o.started_at).max(0));
                Event {
                    event_type: EventType::MonitorUp,
                    event_key,
                    payload: json!({
                        "monitor_id": monitor.id,
                        "monitor_name": monitor.name,
                        "target": monitor.config.target(),
                        "latency_ms": outcome.latency_ms(),
                        "recovered_at": now,
                        "outage_id": outage_id,
                        "downtime_sec": downtime_sec,
                    }),
                }
            }
        };
        Ok(Some(event))
    })();

    match result {
        Ok(event) => event,
        Err(e) if e.is_transient() => {
            // The monitor is simply due again next tick
            tracing::warn!(
                "Scheduler: transient store error for monitor {} ({}): {}",
                monitor.id,
                monitor.name,
                e
            );
            None
        }
        Err(e) => {
            tracing::error!(
                "Scheduler: apply failed for monitor {} ({}): {}",
                monitor.id,
                monitor.name,
                e
            );
            None
        }
    }
}

fn maintenance_event(event_type: EventType, window: &MaintenanceWindow) -> Event {
    let boundary = match event_type {
        EventType::MaintenanceStarted => window.starts_at,
        _ => window.ends_at,
    };
    Event {
        event_type,
        event_key: format!("{}:{}:{}", event_type.as_str(), window.id, boundary),
        payload: json!({
            "window_id": window.id,
            "title": window.title,
            "message": window.message,
            "starts_at": window.starts_at,
            "ends_at": window.ends_at,
        }),
    }
}

pub fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
