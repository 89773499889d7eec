//! Monitor state machine.
//!
//! Converts one probe outcome into the rows to persist: the check result,
//! the next `monitor_state`, and the outage mutation. Thresholding
//! (`failures_to_down` / `successes_to_up`) keeps a flapping target from
//! bouncing between up and down on single bad probes.

use crate::db::{ApplyPlan, CheckResult, Monitor, MonitorState, MonitorStatus, OutageAction};
use crate::probe::ProbeOutcome;

/// State-machine transition crossing the up/down threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Down,
    Up,
}

/// Result of planning one probe apply.
#[derive(Debug, Clone)]
pub struct Planned {
    pub plan: ApplyPlan,
    pub transition: Option<Transition>,
}

/// Plan the apply of `(outcome, now)` to one monitor.
///
/// Pure: callers supply the current persisted state and whether an outage is
/// open, and persist the returned plan atomically via the store.
pub fn plan_apply(
    monitor: &Monitor,
    prev: Option<MonitorState>,
    in_maintenance: bool,
    has_open_outage: bool,
    outcome: &ProbeOutcome,
    now: i64,
) -> Planned {
    let state = prev.unwrap_or_else(|| MonitorState::initial(monitor.id));

    // Inactive monitors record the probe but keep their state and outage.
    if !monitor.is_active {
        return Planned {
            plan: ApplyPlan {
                check: check_row(monitor.id, MonitorStatus::Paused, outcome, now),
                state,
                outage: OutageAction::None,
            },
            transition: None,
        };
    }

    // Maintenance is operator-enforced quiescence: counters and the outage
    // are frozen and no transition is emitted.
    if in_maintenance {
        let mut next = state;
        next.status = MonitorStatus::Maintenance;
        next.last_checked_at = Some(now);
        next.last_latency_ms = outcome.latency_ms().map(|l| l as i64);
        return Planned {
            plan: ApplyPlan {
                check: check_row(monitor.id, MonitorStatus::Maintenance, outcome, now),
                state: next,
                outage: OutageAction::None,
            },
            transition: None,
        };
    }

    let mut next = state;
    next.last_checked_at = Some(now);
    next.last_latency_ms = outcome.latency_ms().map(|l| l as i64);

    match outcome {
        ProbeOutcome::Up { .. } => {
            next.consecutive_successes += 1;
            next.consecutive_failures = 0;
            next.last_error = None;

            let recovered = next.status != MonitorStatus::Up
                && next.consecutive_successes >= monitor.successes_to_up as i64;
            if recovered {
                next.status = MonitorStatus::Up;
                let outage = if has_open_outage {
                    OutageAction::Close { ended_at: now }
                } else {
                    OutageAction::None
                };
                return Planned {
                    plan: ApplyPlan {
                        check: check_row(monitor.id, MonitorStatus::Up, outcome, now),
                        state: next,
                        outage,
                    },
                    transition: Some(Transition::Up),
                };
            }

            Planned {
                plan: ApplyPlan {
                    check: check_row(monitor.id, MonitorStatus::Up, outcome, now),
                    state: next,
                    outage: OutageAction::None,
                },
                transition: None,
            }
        }
        ProbeOutcome::Down { error, .. } => {
            next.consecutive_failures += 1;
            next.consecutive_successes = 0;
            next.last_error = Some(error.clone());

            let already_down = next.status == MonitorStatus::Down;
            let tripped = !already_down
                && next.consecutive_failures >= monitor.failures_to_down as i64;

            let (outage, transition) = if tripped {
                next.status = MonitorStatus::Down;
                let action = if has_open_outage {
                    // An outage can survive a maintenance pass; reuse it.
                    OutageAction::RecordError {
                        error: Some(error.clone()),
                    }
                } else {
                    OutageAction::Open {
                        started_at: now,
                        error: Some(error.clone()),
                    }
                };
                (action, Some(Transition::Down))
            } else if already_down {
                (
                    OutageAction::RecordError {
                        error: Some(error.clone()),
                    },
                    None,
                )
            } else {
                (OutageAction::None, None)
            };

            Planned {
                plan: ApplyPlan {
                    check: check_row(monitor.id, MonitorStatus::Down, outcome, now),
                    state: next,
                    outage,
                },
                transition,
            }
        }
    }
}

/// Event dedup key for a transition: ties retries of the same transition to
/// the same delivery rows. Falls back to the transition timestamp when no
/// outage is involved (recovery from unknown without downtime).
pub fn transition_event_key(
    transition: Transition,
    monitor_id: i64,
    outage_id: Option<i64>,
    now: i64,
) -> String {
    let event = match transition {
        Transition::Down => "monitor.down",
        Transition::Up => "monitor.up",
    };
    match outage_id {
        Some(id) => format!("{}:{}:{}", event, monitor_id, id),
        None => format!("{}:{}:{}", event, monitor_id, now),
    }
}

fn check_row(monitor_id: i64, status: MonitorStatus, outcome: &ProbeOutcome, now: i64) -> CheckResult {
    CheckResult {
        monitor_id,
        checked_at: now,
        status,
        latency_ms: outcome.latency_ms().map(|l| l as i64),
        error: outcome.error().map(|e| e.to_string()),
    }
}
