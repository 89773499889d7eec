//! SQLite store: all persistent state behind typed, parameterized queries.

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::{params, Connection, OptionalExtension, Result as SqlResult};
use thiserror::Error;

use super::models::*;

/// Database error types.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("migration error: {0}")]
    Migration(String),
    #[error("bad stored config: {0}")]
    BadConfig(String),
    #[error("not found")]
    NotFound,
}

impl DbError {
    /// Whether a retry could plausibly succeed (lock contention, busy db).
    pub fn is_transient(&self) -> bool {
        match self {
            DbError::Sqlite(rusqlite::Error::SqliteFailure(e, _)) => matches!(
                e.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}

/// Row mutation applied to the open outage during one probe apply.
#[derive(Debug, Clone, PartialEq)]
pub enum OutageAction {
    None,
    Open { started_at: i64, error: Option<String> },
    Close { ended_at: i64 },
    RecordError { error: Option<String> },
}

/// Everything one probe apply persists atomically.
#[derive(Debug, Clone)]
pub struct ApplyPlan {
    pub check: CheckResult,
    pub state: MonitorState,
    pub outage: OutageAction,
}

/// Result of persisting an [`ApplyPlan`].
#[derive(Debug, Clone, Copy)]
pub struct AppliedCheck {
    /// Outage opened or closed by this apply, if any.
    pub outage_id: Option<i64>,
    /// The (monitor_id, checked_at) pair was already recorded; nothing changed.
    pub deduped: bool,
}

/// Thread-safe database store.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init()?;
        Ok(store)
    }

    fn init(&self) -> Result<(), DbError> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(include_str!("../../migrations/000001_init.up.sql"))
            .map_err(|e| DbError::Migration(format!("init migration failed: {}", e)))?;
        Ok(())
    }

    // --- Monitors ---

    pub fn add_monitor(&self, monitor: &mut Monitor) -> Result<i64, DbError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO monitors (name, kind, is_active, interval_sec, timeout_ms, failures_to_down, successes_to_up, config, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                monitor.name,
                monitor.kind.as_str(),
                monitor.is_active,
                monitor.interval_sec,
                monitor.timeout_ms as i64,
                monitor.failures_to_down as i64,
                monitor.successes_to_up as i64,
                monitor.config.to_json(),
                monitor.created_at,
            ],
        )?;
        let id = conn.last_insert_rowid();
        monitor.id = id;
        Ok(id)
    }

    pub fn update_monitor(&self, monitor: &Monitor) -> Result<(), DbError> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "UPDATE monitors SET name=?1, kind=?2, is_active=?3, interval_sec=?4, timeout_ms=?5,
             failures_to_down=?6, successes_to_up=?7, config=?8 WHERE id=?9",
            params![
                monitor.name,
                monitor.kind.as_str(),
                monitor.is_active,
                monitor.interval_sec,
                monitor.timeout_ms as i64,
                monitor.failures_to_down as i64,
                monitor.successes_to_up as i64,
                monitor.config.to_json(),
                monitor.id,
            ],
        )?;
        if n == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    /// Monitors are never deleted by the core, only marked inactive.
    pub fn set_monitor_active(&self, id: i64, active: bool) -> Result<(), DbError> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "UPDATE monitors SET is_active=?1 WHERE id=?2",
            params![active, id],
        )?;
        if n == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    pub fn get_monitor(&self, id: i64) -> Result<Monitor, DbError> {
        let conn = self.conn.lock().unwrap();
        let raw = conn
            .query_row(
                &format!("{} WHERE id = ?1", MONITOR_SELECT),
                params![id],
                monitor_raw_from_row,
            )
            .optional()?
            .ok_or(DbError::NotFound)?;
        raw_to_monitor(raw).ok_or_else(|| DbError::BadConfig(format!("monitor {}", id)))
    }

    pub fn list_monitors(&self, active_only: bool) -> Result<Vec<Monitor>, DbError> {
        let conn = self.conn.lock().unwrap();
        let sql = if active_only {
            format!("{} WHERE is_active = 1 ORDER BY id", MONITOR_SELECT)
        } else {
            format!("{} ORDER BY id", MONITOR_SELECT)
        };
        let mut stmt = conn.prepare(&sql)?;
        let raws = stmt
            .query_map([], monitor_raw_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(raws.into_iter().filter_map(raw_to_monitor).collect())
    }

    /// Active monitors whose interval has elapsed since their last check.
    pub fn list_due_monitors(&self, now: i64, limit: usize) -> Result<Vec<Monitor>, DbError> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "{} LEFT JOIN monitor_state s ON s.monitor_id = m.id
             WHERE m.is_active = 1
               AND (s.last_checked_at IS NULL OR ?1 - s.last_checked_at >= m.interval_sec)
             ORDER BY s.last_checked_at ASC LIMIT ?2",
            MONITOR_SELECT
        );
        let mut stmt = conn.prepare(&sql)?;
        let raws = stmt
            .query_map(params![now, limit as i64], monitor_raw_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(raws.into_iter().filter_map(raw_to_monitor).collect())
    }

    // --- Monitor state ---

    pub fn get_monitor_state(&self, monitor_id: i64) -> Result<Option<MonitorState>, DbError> {
        let conn = self.conn.lock().unwrap();
        let state = conn
            .query_row(
                "SELECT monitor_id, status, last_checked_at, last_latency_ms, last_error,
                        consecutive_failures, consecutive_successes
                 FROM monitor_state WHERE monitor_id = ?1",
                params![monitor_id],
                state_from_row,
            )
            .optional()?;
        Ok(state)
    }

    pub fn upsert_monitor_state(&self, state: &MonitorState) -> Result<(), DbError> {
        let conn = self.conn.lock().unwrap();
        upsert_state_stmt(&conn, state)?;
        Ok(())
    }

    // --- Check results ---

    pub fn list_check_results(
        &self,
        monitor_id: i64,
        start: i64,
        end: i64,
        limit: usize,
    ) -> Result<Vec<CheckResult>, DbError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT monitor_id, checked_at, status, latency_ms, error FROM check_results
             WHERE monitor_id = ?1 AND checked_at >= ?2 AND checked_at < ?3
             ORDER BY checked_at ASC LIMIT ?4",
        )?;
        let results = stmt
            .query_map(params![monitor_id, start, end, limit as i64], check_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(results)
    }

    /// Most recent check results since a cutoff, chronological.
    pub fn recent_check_results(
        &self,
        monitor_id: i64,
        since: i64,
        limit: usize,
    ) -> Result<Vec<CheckResult>, DbError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT monitor_id, checked_at, status, latency_ms, error FROM check_results
             WHERE monitor_id = ?1 AND checked_at >= ?2
             ORDER BY checked_at DESC LIMIT ?3",
        )?;
        let mut results = stmt
            .query_map(params![monitor_id, since, limit as i64], check_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;
        results.reverse();
        Ok(results)
    }

    /// Delete check results older than the cutoff. Returns the purged row count.
    pub fn purge_check_results_before(&self, cutoff: i64) -> Result<usize, DbError> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "DELETE FROM check_results WHERE checked_at < ?1",
            params![cutoff],
        )?;
        Ok(n)
    }

    // --- Probe apply (atomic) ---

    /// Persist one probe apply: check row, outage mutation and state upsert
    /// commit together. Re-applying an already-recorded (monitor_id,
    /// checked_at) pair is a no-op.
    pub fn persist_apply(&self, plan: &ApplyPlan) -> Result<AppliedCheck, DbError> {
        let conn = self.conn.lock().unwrap();
        let tx = conn.unchecked_transaction()?;

        let inserted = tx.execute(
            "INSERT OR IGNORE INTO check_results (monitor_id, checked_at, status, latency_ms, error)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                plan.check.monitor_id,
                plan.check.checked_at,
                plan.check.status.as_str(),
                plan.check.latency_ms,
                plan.check.error,
            ],
        )?;
        if inserted == 0 {
            tx.commit()?;
            return Ok(AppliedCheck {
                outage_id: None,
                deduped: true,
            });
        }

        let outage_id = match &plan.outage {
            OutageAction::None => None,
            OutageAction::Open { started_at, error } => {
                tx.execute(
                    "INSERT INTO outages (monitor_id, started_at, initial_error, last_error)
                     VALUES (?1, ?2, ?3, ?3)",
                    params![plan.check.monitor_id, started_at, error],
                )?;
                Some(tx.last_insert_rowid())
            }
            OutageAction::Close { ended_at } => {
                let id: Option<i64> = tx
                    .query_row(
                        "SELECT id FROM outages WHERE monitor_id = ?1 AND ended_at IS NULL",
                        params![plan.check.monitor_id],
                        |row| row.get(0),
                    )
                    .optional()?;
                tx.execute(
                    "UPDATE outages SET ended_at = ?1 WHERE monitor_id = ?2 AND ended_at IS NULL",
                    params![ended_at, plan.check.monitor_id],
                )?;
                id
            }
            OutageAction::RecordError { error } => {
                tx.execute(
                    "UPDATE outages SET last_error = COALESCE(?1, last_error)
                     WHERE monitor_id = ?2 AND ended_at IS NULL",
                    params![error, plan.check.monitor_id],
                )?;
                None
            }
        };

        upsert_state_stmt(&tx, &plan.state)?;
        tx.commit()?;
        Ok(AppliedCheck {
            outage_id,
            deduped: false,
        })
    }

    // --- Outages ---

    pub fn get_outage(&self, id: i64) -> Result<Option<Outage>, DbError> {
        let conn = self.conn.lock().unwrap();
        let outage = conn
            .query_row(
                &format!("{} WHERE id = ?1", OUTAGE_SELECT),
                params![id],
                outage_from_row,
            )
            .optional()?;
        Ok(outage)
    }

    pub fn get_open_outage(&self, monitor_id: i64) -> Result<Option<Outage>, DbError> {
        let conn = self.conn.lock().unwrap();
        let outage = conn
            .query_row(
                &format!("{} WHERE monitor_id = ?1 AND ended_at IS NULL", OUTAGE_SELECT),
                params![monitor_id],
                outage_from_row,
            )
            .optional()?;
        Ok(outage)
    }

    /// Outages intersecting [start, end). Open outages count as unbounded.
    pub fn list_outages_overlapping(
        &self,
        monitor_id: i64,
        start: i64,
        end: i64,
    ) -> Result<Vec<Outage>, DbError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "{} WHERE monitor_id = ?1 AND started_at < ?3
             AND (ended_at IS NULL OR ended_at > ?2)
             ORDER BY started_at ASC",
            OUTAGE_SELECT
        ))?;
        let outages = stmt
            .query_map(params![monitor_id, start, end], outage_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(outages)
    }

    /// Page of outages for a monitor, newest first, keyed by descending id.
    pub fn list_outages_page(
        &self,
        monitor_id: i64,
        since: i64,
        before_id: Option<i64>,
        limit: usize,
    ) -> Result<Vec<Outage>, DbError> {
        let conn = self.conn.lock().unwrap();
        let cursor = before_id.unwrap_or(i64::MAX);
        let mut stmt = conn.prepare(&format!(
            "{} WHERE monitor_id = ?1 AND id < ?2
             AND (ended_at IS NULL OR ended_at >= ?3)
             ORDER BY id DESC LIMIT ?4",
            OUTAGE_SELECT
        ))?;
        let outages = stmt
            .query_map(params![monitor_id, cursor, since, limit as i64], outage_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(outages)
    }

    // --- Incidents ---

    pub fn add_incident(&self, incident: &mut Incident) -> Result<i64, DbError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO incidents (title, status, impact, message, started_at, resolved_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                incident.title,
                incident.status.as_str(),
                incident.impact.as_str(),
                incident.message,
                incident.started_at,
                incident.resolved_at,
            ],
        )?;
        let id = conn.last_insert_rowid();
        incident.id = id;
        Ok(id)
    }

    pub fn update_incident(&self, incident: &Incident) -> Result<(), DbError> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "UPDATE incidents SET title=?1, status=?2, impact=?3, message=?4, resolved_at=?5
             WHERE id=?6",
            params![
                incident.title,
                incident.status.as_str(),
                incident.impact.as_str(),
                incident.message,
                incident.resolved_at,
                incident.id,
            ],
        )?;
        if n == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    pub fn get_incident(&self, id: i64) -> Result<Incident, DbError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            &format!("{} WHERE id = ?1", INCIDENT_SELECT),
            params![id],
            incident_from_row,
        )
        .optional()?
        .ok_or(DbError::NotFound)
    }

    pub fn list_open_incidents(&self, limit: usize) -> Result<Vec<Incident>, DbError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "{} WHERE resolved_at IS NULL ORDER BY started_at DESC LIMIT ?1",
            INCIDENT_SELECT
        ))?;
        let incidents = stmt
            .query_map(params![limit as i64], incident_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(incidents)
    }

    pub fn list_incidents_page(
        &self,
        before_id: Option<i64>,
        limit: usize,
    ) -> Result<Vec<Incident>, DbError> {
        let conn = self.conn.lock().unwrap();
        let cursor = before_id.unwrap_or(i64::MAX);
        let mut stmt = conn.prepare(&format!(
            "{} WHERE id < ?1 ORDER BY id DESC LIMIT ?2",
            INCIDENT_SELECT
        ))?;
        let incidents = stmt
            .query_map(params![cursor, limit as i64], incident_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(incidents)
    }

    pub fn add_incident_update(&self, update: &mut IncidentUpdate) -> Result<i64, DbError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO incident_updates (incident_id, status, message, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                update.incident_id,
                update.status.as_str(),
                update.message,
                update.created_at,
            ],
        )?;
        let id = conn.last_insert_rowid();
        update.id = id;
        Ok(id)
    }

    pub fn list_incident_updates(&self, incident_id: i64) -> Result<Vec<IncidentUpdate>, DbError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, incident_id, status, message, created_at FROM incident_updates
             WHERE incident_id = ?1 ORDER BY created_at ASC",
        )?;
        let updates = stmt
            .query_map(params![incident_id], |row| {
                let status: String = row.get(2)?;
                Ok(IncidentUpdate {
                    id: row.get(0)?,
                    incident_id: row.get(1)?,
                    status: IncidentStatus::parse(&status),
                    message: row.get(3)?,
                    created_at: row.get(4)?,
                })
            })?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(updates)
    }

    pub fn set_incident_monitors(&self, incident_id: i64, monitor_ids: &[i64]) -> Result<(), DbError> {
        let conn = self.conn.lock().unwrap();
        let tx = conn.unchecked_transaction()?;
        tx.execute(
            "DELETE FROM incident_monitors WHERE incident_id = ?1",
            params![incident_id],
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO incident_monitors (incident_id, monitor_id) VALUES (?1, ?2)",
            )?;
            for monitor_id in monitor_ids {
                stmt.execute(params![incident_id, monitor_id])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn monitor_ids_for_incident(&self, incident_id: i64) -> Result<Vec<i64>, DbError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT monitor_id FROM incident_monitors WHERE incident_id = ?1 ORDER BY monitor_id",
        )?;
        let ids = stmt
            .query_map(params![incident_id], |row| row.get(0))?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(ids)
    }

    // --- Maintenance windows ---

    pub fn add_maintenance_window(&self, window: &mut MaintenanceWindow) -> Result<i64, DbError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO maintenance_windows (title, message, starts_at, ends_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                window.title,
                window.message,
                window.starts_at,
                window.ends_at,
                window.created_at,
            ],
        )?;
        let id = conn.last_insert_rowid();
        window.id = id;
        Ok(id)
    }

    pub fn update_maintenance_window(&self, window: &MaintenanceWindow) -> Result<(), DbError> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "UPDATE maintenance_windows SET title=?1, message=?2, starts_at=?3, ends_at=?4
             WHERE id=?5",
            params![
                window.title,
                window.message,
                window.starts_at,
                window.ends_at,
                window.id,
            ],
        )?;
        if n == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    pub fn delete_maintenance_window(&self, id: i64) -> Result<(), DbError> {
        let conn = self.conn.lock().unwrap();
        let tx = conn.unchecked_transaction()?;
        tx.execute(
            "DELETE FROM maintenance_window_monitors WHERE window_id = ?1",
            params![id],
        )?;
        let n = tx.execute("DELETE FROM maintenance_windows WHERE id = ?1", params![id])?;
        tx.commit()?;
        if n == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    pub fn get_maintenance_window(&self, id: i64) -> Result<MaintenanceWindow, DbError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            &format!("{} WHERE id = ?1", WINDOW_SELECT),
            params![id],
            window_from_row,
        )
        .optional()?
        .ok_or(DbError::NotFound)
    }

    pub fn list_maintenance_windows_page(
        &self,
        before_id: Option<i64>,
        limit: usize,
    ) -> Result<Vec<MaintenanceWindow>, DbError> {
        let conn = self.conn.lock().unwrap();
        let cursor = before_id.unwrap_or(i64::MAX);
        let mut stmt = conn.prepare(&format!(
            "{} WHERE id < ?1 ORDER BY id DESC LIMIT ?2",
            WINDOW_SELECT
        ))?;
        let windows = stmt
            .query_map(params![cursor, limit as i64], window_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(windows)
    }

    pub fn list_windows_active(&self, now: i64) -> Result<Vec<MaintenanceWindow>, DbError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "{} WHERE starts_at <= ?1 AND ends_at > ?1 ORDER BY starts_at ASC",
            WINDOW_SELECT
        ))?;
        let windows = stmt
            .query_map(params![now], window_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(windows)
    }

    pub fn list_windows_upcoming(
        &self,
        now: i64,
        limit: usize,
    ) -> Result<Vec<MaintenanceWindow>, DbError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "{} WHERE starts_at > ?1 ORDER BY starts_at ASC LIMIT ?2",
            WINDOW_SELECT
        ))?;
        let windows = stmt
            .query_map(params![now, limit as i64], window_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(windows)
    }

    /// Windows whose start (or end) boundary falls in (since, until].
    pub fn list_windows_crossing(
        &self,
        since: i64,
        until: i64,
    ) -> Result<Vec<MaintenanceWindow>, DbError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "{} WHERE (starts_at > ?1 AND starts_at <= ?2) OR (ends_at > ?1 AND ends_at <= ?2)
             ORDER BY id",
            WINDOW_SELECT
        ))?;
        let windows = stmt
            .query_map(params![since, until], window_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(windows)
    }

    pub fn set_window_monitors(&self, window_id: i64, monitor_ids: &[i64]) -> Result<(), DbError> {
        let conn = self.conn.lock().unwrap();
        let tx = conn.unchecked_transaction()?;
        tx.execute(
            "DELETE FROM maintenance_window_monitors WHERE window_id = ?1",
            params![window_id],
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO maintenance_window_monitors (window_id, monitor_id)
                 VALUES (?1, ?2)",
            )?;
            for monitor_id in monitor_ids {
                stmt.execute(params![window_id, monitor_id])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn monitor_ids_for_window(&self, window_id: i64) -> Result<Vec<i64>, DbError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT monitor_id FROM maintenance_window_monitors WHERE window_id = ?1
             ORDER BY monitor_id",
        )?;
        let ids = stmt
            .query_map(params![window_id], |row| row.get(0))?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(ids)
    }

    pub fn monitor_in_maintenance(&self, monitor_id: i64, now: i64) -> Result<bool, DbError> {
        let conn = self.conn.lock().unwrap();
        let exists: bool = conn.query_row(
            "SELECT EXISTS(
                SELECT 1 FROM maintenance_windows w
                JOIN maintenance_window_monitors wm ON wm.window_id = w.id
                WHERE wm.monitor_id = ?1 AND w.starts_at <= ?2 AND w.ends_at > ?2)",
            params![monitor_id, now],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    pub fn monitor_ids_in_maintenance(&self, now: i64) -> Result<HashSet<i64>, DbError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT DISTINCT wm.monitor_id FROM maintenance_windows w
             JOIN maintenance_window_monitors wm ON wm.window_id = w.id
             WHERE w.starts_at <= ?1 AND w.ends_at > ?1",
        )?;
        let ids = stmt
            .query_map(params![now], |row| row.get(0))?
            .collect::<SqlResult<HashSet<_>>>()?;
        Ok(ids)
    }

    // --- Notification channels ---

    pub fn add_channel(&self, channel: &mut NotificationChannel) -> Result<i64, DbError> {
        let config = serde_json::to_string(&channel.config)
            .map_err(|e| DbError::BadConfig(e.to_string()))?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO notification_channels (name, config, created_at) VALUES (?1, ?2, ?3)",
            params![channel.name, config, channel.created_at],
        )?;
        let id = conn.last_insert_rowid();
        channel.id = id;
        Ok(id)
    }

    pub fn update_channel(&self, channel: &NotificationChannel) -> Result<(), DbError> {
        let config = serde_json::to_string(&channel.config)
            .map_err(|e| DbError::BadConfig(e.to_string()))?;
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "UPDATE notification_channels SET name=?1, config=?2 WHERE id=?3",
            params![channel.name, config, channel.id],
        )?;
        if n == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    pub fn delete_channel(&self, id: i64) -> Result<(), DbError> {
        let conn = self.conn.lock().unwrap();
        let tx = conn.unchecked_transaction()?;
        tx.execute(
            "DELETE FROM notification_deliveries WHERE channel_id = ?1",
            params![id],
        )?;
        let n = tx.execute(
            "DELETE FROM notification_channels WHERE id = ?1",
            params![id],
        )?;
        tx.commit()?;
        if n == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    pub fn get_channel(&self, id: i64) -> Result<NotificationChannel, DbError> {
        let conn = self.conn.lock().unwrap();
        let raw = conn
            .query_row(
                "SELECT id, name, config, created_at FROM notification_channels WHERE id = ?1",
                params![id],
                channel_raw_from_row,
            )
            .optional()?
            .ok_or(DbError::NotFound)?;
        raw_to_channel(raw).ok_or_else(|| DbError::BadConfig(format!("channel {}", id)))
    }

    pub fn list_channels(&self) -> Result<Vec<NotificationChannel>, DbError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, name, config, created_at FROM notification_channels ORDER BY id",
        )?;
        let raws = stmt
            .query_map([], channel_raw_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(raws.into_iter().filter_map(raw_to_channel).collect())
    }

    // --- Notification deliveries ---

    /// Claim the (event_key, channel_id) delivery slot. Returns true iff the
    /// claim was won; a false return means another delivery already exists.
    pub fn claim_delivery(
        &self,
        event_key: &str,
        channel_id: i64,
        now: i64,
    ) -> Result<bool, DbError> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "INSERT OR IGNORE INTO notification_deliveries
             (event_key, channel_id, status, attempted_at) VALUES (?1, ?2, 'pending', ?3)",
            params![event_key, channel_id, now],
        )?;
        Ok(n == 1)
    }

    pub fn finalize_delivery(
        &self,
        event_key: &str,
        channel_id: i64,
        status: DeliveryStatus,
        http_status: Option<u16>,
        error: Option<&str>,
        now: i64,
    ) -> Result<(), DbError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE notification_deliveries
             SET status=?1, http_status=?2, error=?3, finalized_at=?4
             WHERE event_key=?5 AND channel_id=?6",
            params![
                status.as_str(),
                http_status.map(|s| s as i64),
                error,
                now,
                event_key,
                channel_id,
            ],
        )?;
        Ok(())
    }

    pub fn get_delivery(
        &self,
        event_key: &str,
        channel_id: i64,
    ) -> Result<Option<NotificationDelivery>, DbError> {
        let conn = self.conn.lock().unwrap();
        let delivery = conn
            .query_row(
                "SELECT id, event_key, channel_id, status, http_status, error, attempted_at, finalized_at
                 FROM notification_deliveries WHERE event_key = ?1 AND channel_id = ?2",
                params![event_key, channel_id],
                |row| {
                    let status: String = row.get(3)?;
                    let http_status: Option<i64> = row.get(4)?;
                    Ok(NotificationDelivery {
                        id: row.get(0)?,
                        event_key: row.get(1)?,
                        channel_id: row.get(2)?,
                        status: DeliveryStatus::parse(&status),
                        http_status: http_status.map(|s| s as u16),
                        error: row.get(5)?,
                        attempted_at: row.get(6)?,
                        finalized_at: row.get(7)?,
                    })
                },
            )
            .optional()?;
        Ok(delivery)
    }

    // --- Locks ---

    /// Claim a named lock with a lease. Claimable iff the row is absent,
    /// expired, or already held by this holder. Single conditional statement.
    pub fn try_claim_lock(
        &self,
        name: &str,
        holder: &str,
        now: i64,
        ttl_sec: i64,
    ) -> Result<bool, DbError> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "INSERT INTO locks (name, holder, acquired_at, expires_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(name) DO UPDATE SET
                holder = excluded.holder,
                acquired_at = excluded.acquired_at,
                expires_at = excluded.expires_at
             WHERE locks.expires_at <= excluded.acquired_at OR locks.holder = excluded.holder",
            params![name, holder, now, now + ttl_sec],
        )?;
        Ok(n == 1)
    }

    /// Best-effort release. Only the current holder may release.
    pub fn release_lock(&self, name: &str, holder: &str) -> Result<(), DbError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM locks WHERE name = ?1 AND holder = ?2",
            params![name, holder],
        )?;
        Ok(())
    }

    // --- Daily rollups ---

    pub fn upsert_rollup(&self, rollup: &DailyRollup) -> Result<(), DbError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO monitor_daily_rollups
             (monitor_id, day_start_at, total_sec, downtime_sec, unknown_sec, uptime_sec)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(monitor_id, day_start_at) DO UPDATE SET
                total_sec=excluded.total_sec, downtime_sec=excluded.downtime_sec,
                unknown_sec=excluded.unknown_sec, uptime_sec=excluded.uptime_sec",
            params![
                rollup.monitor_id,
                rollup.day_start_at,
                rollup.total_sec,
                rollup.downtime_sec,
                rollup.unknown_sec,
                rollup.uptime_sec,
            ],
        )?;
        Ok(())
    }

    pub fn list_rollups(
        &self,
        monitor_id: i64,
        start_day: i64,
        end_day: i64,
    ) -> Result<Vec<DailyRollup>, DbError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT monitor_id, day_start_at, total_sec, downtime_sec, unknown_sec, uptime_sec
             FROM monitor_daily_rollups
             WHERE monitor_id = ?1 AND day_start_at >= ?2 AND day_start_at < ?3
             ORDER BY day_start_at ASC",
        )?;
        let rollups = stmt
            .query_map(params![monitor_id, start_day, end_day], |row| {
                Ok(DailyRollup {
                    monitor_id: row.get(0)?,
                    day_start_at: row.get(1)?,
                    total_sec: row.get(2)?,
                    downtime_sec: row.get(3)?,
                    unknown_sec: row.get(4)?,
                    uptime_sec: row.get(5)?,
                })
            })?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(rollups)
    }

    pub fn last_rollup_day(&self, monitor_id: i64) -> Result<Option<i64>, DbError> {
        let conn = self.conn.lock().unwrap();
        let day: Option<i64> = conn.query_row(
            "SELECT MAX(day_start_at) FROM monitor_daily_rollups WHERE monitor_id = ?1",
            params![monitor_id],
            |row| row.get(0),
        )?;
        Ok(day)
    }

    // --- Public snapshots ---

    pub fn get_snapshot(&self, key: &str) -> Result<Option<Snapshot>, DbError> {
        let conn = self.conn.lock().unwrap();
        let snapshot = conn
            .query_row(
                "SELECT generated_at, body FROM public_snapshots WHERE key = ?1",
                params![key],
                |row| {
                    Ok(Snapshot {
                        generated_at: row.get(0)?,
                        body: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(snapshot)
    }

    pub fn put_snapshot(&self, key: &str, generated_at: i64, body: &str) -> Result<(), DbError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO public_snapshots (key, generated_at, body) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET
                generated_at=excluded.generated_at, body=excluded.body",
            params![key, generated_at, body],
        )?;
        Ok(())
    }
}

const MONITOR_SELECT: &str = "SELECT m.id, m.name, m.kind, m.is_active, m.interval_sec, m.timeout_ms,
     m.failures_to_down, m.successes_to_up, m.config, m.created_at FROM monitors m";

const OUTAGE_SELECT: &str =
    "SELECT id, monitor_id, started_at, ended_at, initial_error, last_error FROM outages";

const INCIDENT_SELECT: &str =
    "SELECT id, title, status, impact, message, started_at, resolved_at FROM incidents";

const WINDOW_SELECT: &str =
    "SELECT id, title, message, starts_at, ends_at, created_at FROM maintenance_windows";

struct RawMonitor {
    id: i64,
    name: String,
    kind: MonitorKind,
    is_active: bool,
    interval_sec: i64,
    timeout_ms: i64,
    failures_to_down: i64,
    successes_to_up: i64,
    config: String,
    created_at: i64,
}

fn monitor_raw_from_row(row: &rusqlite::Row<'_>) -> SqlResult<RawMonitor> {
    let kind: String = row.get(2)?;
    Ok(RawMonitor {
        id: row.get(0)?,
        name: row.get(1)?,
        kind: MonitorKind::parse(&kind),
        is_active: row.get(3)?,
        interval_sec: row.get(4)?,
        timeout_ms: row.get(5)?,
        failures_to_down: row.get(6)?,
        successes_to_up: row.get(7)?,
        config: row.get(8)?,
        created_at: row.get(9)?,
    })
}

fn raw_to_monitor(raw: RawMonitor) -> Option<Monitor> {
    let config = match MonitorConfig::from_json(raw.kind, &raw.config) {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!("Store: skipping monitor {} with bad config: {}", raw.id, e);
            return None;
        }
    };
    Some(Monitor {
        id: raw.id,
        name: raw.name,
        kind: raw.kind,
        is_active: raw.is_active,
        interval_sec: raw.interval_sec,
        timeout_ms: raw.timeout_ms.max(0) as u64,
        failures_to_down: raw.failures_to_down.max(1) as u32,
        successes_to_up: raw.successes_to_up.max(1) as u32,
        config,
        created_at: raw.created_at,
    })
}

fn state_from_row(row: &rusqlite::Row<'_>) -> SqlResult<MonitorState> {
    let status: String = row.get(1)?;
    Ok(MonitorState {
        monitor_id: row.get(0)?,
        status: MonitorStatus::parse(&status),
        last_checked_at: row.get(2)?,
        last_latency_ms: row.get(3)?,
        last_error: row.get(4)?,
        consecutive_failures: row.get(5)?,
        consecutive_successes: row.get(6)?,
    })
}

fn check_from_row(row: &rusqlite::Row<'_>) -> SqlResult<CheckResult> {
    let status: String = row.get(2)?;
    Ok(CheckResult {
        monitor_id: row.get(0)?,
        checked_at: row.get(1)?,
        status: MonitorStatus::parse(&status),
        latency_ms: row.get(3)?,
        error: row.get(4)?,
    })
}

fn outage_from_row(row: &rusqlite::Row<'_>) -> SqlResult<Outage> {
    Ok(Outage {
        id: row.get(0)?,
        monitor_id: row.get(1)?,
        started_at: row.get(2)?,
        ended_at: row.get(3)?,
        initial_error: row.get(4)?,
        last_error: row.get(5)?,
    })
}

fn incident_from_row(row: &rusqlite::Row<'_>) -> SqlResult<Incident> {
    let status: String = row.get(2)?;
    let impact: String = row.get(3)?;
    Ok(Incident {
        id: row.get(0)?,
        title: row.get(1)?,
        status: IncidentStatus::parse(&status),
        impact: Impact::parse(&impact),
        message: row.get(4)?,
        started_at: row.get(5)?,
        resolved_at: row.get(6)?,
    })
}

fn window_from_row(row: &rusqlite::Row<'_>) -> SqlResult<MaintenanceWindow> {
    Ok(MaintenanceWindow {
        id: row.get(0)?,
        title: row.get(1)?,
        message: row.get(2)?,
        starts_at: row.get(3)?,
        ends_at: row.get(4)?,
        created_at: row.get(5)?,
    })
}

struct RawChannel {
    id: i64,
    name: String,
    config: String,
    created_at: i64,
}

fn channel_raw_from_row(row: &rusqlite::Row<'_>) -> SqlResult<RawChannel> {
    Ok(RawChannel {
        id: row.get(0)?,
        name: row.get(1)?,
        config: row.get(2)?,
        created_at: row.get(3)?,
    })
}

fn raw_to_channel(raw: RawChannel) -> Option<NotificationChannel> {
    let config: ChannelConfig = match serde_json::from_str(&raw.config) {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!("Store: skipping channel {} with bad config: {}", raw.id, e);
            return None;
        }
    };
    Some(NotificationChannel {
        id: raw.id,
        name: raw.name,
        config,
        created_at: raw.created_at,
    })
}

fn upsert_state_stmt(conn: &Connection, state: &MonitorState) -> SqlResult<usize> {
    conn.execute(
        "INSERT INTO monitor_state
         (monitor_id, status, last_checked_at, last_latency_ms, last_error,
          consecutive_failures, consecutive_successes)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(monitor_id) DO UPDATE SET
            status=excluded.status,
            last_checked_at=excluded.last_checked_at,
            last_latency_ms=excluded.last_latency_ms,
            last_error=excluded.last_error,
            consecutive_failures=excluded.consecutive_failures,
            consecutive_successes=excluded.consecutive_successes",
        params![
            state.monitor_id,
            state.status.as_str(),
            state.last_checked_at,
            state.last_latency_ms,
            state.last_error,
            state.consecutive_failures,
            state.consecutive_successes,
        ],
    )
}
