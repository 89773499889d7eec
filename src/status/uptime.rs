//! Uptime interval algebra.
//!
//! Downtime comes from outage rows; unknown time comes from gaps in probe
//! coverage. A check covers one horizon (2 × interval) forward, and the
//! first check additionally grants one horizon of backward grace so a
//! monitor probed on schedule has no unknown lead-in. Unknown time counts
//! as unavailable.

use crate::db::{CheckResult, MonitorStatus, Outage};

/// Half-open interval [start, end) in epoch seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    pub start: i64,
    pub end: i64,
}

impl Interval {
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> i64 {
        (self.end - self.start).max(0)
    }

    pub fn clip(&self, start: i64, end: i64) -> Option<Interval> {
        let s = self.start.max(start);
        let e = self.end.min(end);
        (s < e).then_some(Interval::new(s, e))
    }
}

/// Merge overlapping or touching intervals. Input order does not matter.
pub fn merge_intervals(mut intervals: Vec<Interval>) -> Vec<Interval> {
    intervals.retain(|iv| iv.len() > 0);
    intervals.sort_by_key(|iv| iv.start);
    let mut merged: Vec<Interval> = Vec::with_capacity(intervals.len());
    for iv in intervals {
        match merged.last_mut() {
            Some(last) if iv.start <= last.end => last.end = last.end.max(iv.end),
            _ => merged.push(iv),
        }
    }
    merged
}

pub fn total_len(intervals: &[Interval]) -> i64 {
    intervals.iter().map(Interval::len).sum()
}

/// Seconds covered by both sets. Both must be merged (sorted, disjoint).
pub fn overlap_len(a: &[Interval], b: &[Interval]) -> i64 {
    let mut total = 0;
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        let start = a[i].start.max(b[j].start);
        let end = a[i].end.min(b[j].end);
        if start < end {
            total += end - start;
        }
        if a[i].end <= b[j].end {
            i += 1;
        } else {
            j += 1;
        }
    }
    total
}

/// Complement of a merged interval set within [start, end).
pub fn gaps_within(covered: &[Interval], start: i64, end: i64) -> Vec<Interval> {
    let mut gaps = Vec::new();
    let mut cursor = start;
    for iv in covered {
        if let Some(clipped) = iv.clip(start, end) {
            if clipped.start > cursor {
                gaps.push(Interval::new(cursor, clipped.start));
            }
            cursor = cursor.max(clipped.end);
        }
    }
    if cursor < end {
        gaps.push(Interval::new(cursor, end));
    }
    gaps
}

#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct UptimeTotals {
    pub total_sec: i64,
    pub downtime_sec: i64,
    pub unknown_sec: i64,
    pub uptime_sec: i64,
    pub uptime_pct: Option<f64>,
}

impl UptimeTotals {
    pub fn empty() -> Self {
        Self {
            total_sec: 0,
            downtime_sec: 0,
            unknown_sec: 0,
            uptime_sec: 0,
            uptime_pct: None,
        }
    }

    pub fn add(&mut self, other: &UptimeTotals) {
        self.total_sec += other.total_sec;
        self.downtime_sec += other.downtime_sec;
        self.unknown_sec += other.unknown_sec;
        self.uptime_sec += other.uptime_sec;
        self.uptime_pct = if self.total_sec > 0 {
            Some(100.0 * self.uptime_sec as f64 / self.total_sec as f64)
        } else {
            None
        };
    }
}

/// Compute uptime totals for [range_start, range_end), clamped to the
/// monitor's creation time.
///
/// `checks` must be chronological; callers should fetch from one horizon
/// before the range so coverage extending into it is seen.
pub fn compute_uptime(
    range_start: i64,
    range_end: i64,
    created_at: i64,
    interval_sec: i64,
    outages: &[Outage],
    checks: &[CheckResult],
) -> UptimeTotals {
    let start = range_start.max(created_at);
    let end = range_end;
    if end <= start {
        return UptimeTotals::empty();
    }
    let total_sec = end - start;
    let horizon = 2 * interval_sec.max(1);

    let downtime = merge_intervals(
        outages
            .iter()
            .filter_map(|o| {
                Interval::new(o.started_at, o.ended_at.unwrap_or(end)).clip(start, end)
            })
            .collect(),
    );
    let downtime_sec = total_len(&downtime);

    // Forward coverage from every conclusive (up/down) check, plus backward
    // grace for the first one.
    let mut covered: Vec<Interval> = Vec::new();
    let mut explicit_unknown: Vec<Interval> = Vec::new();
    for check in checks {
        match check.status {
            MonitorStatus::Up | MonitorStatus::Down => {
                covered.push(Interval::new(check.checked_at, check.checked_at + horizon));
            }
            MonitorStatus::Unknown => {
                explicit_unknown.push(Interval::new(check.checked_at, check.checked_at + horizon));
            }
            MonitorStatus::Maintenance | MonitorStatus::Paused => {}
        }
    }
    if let Some(first) = covered.first_mut() {
        first.start = (first.start - horizon).max(start);
    }
    let covered = merge_intervals(covered);

    let mut unknown = gaps_within(&covered, start, end);
    unknown.extend(
        explicit_unknown
            .into_iter()
            .filter_map(|iv| iv.clip(start, end)),
    );
    let unknown = merge_intervals(unknown);
    let unknown_sec = total_len(&unknown) - overlap_len(&unknown, &downtime);

    let uptime_sec = total_sec - (downtime_sec + unknown_sec).min(total_sec);
    UptimeTotals {
        total_sec,
        downtime_sec,
        unknown_sec,
        uptime_sec,
        uptime_pct: Some(100.0 * uptime_sec as f64 / total_sec as f64),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn up_check(t: i64) -> CheckResult {
        CheckResult {
            monitor_id: 1,
            checked_at: t,
            status: MonitorStatus::Up,
            latency_ms: Some(10),
            error: None,
        }
    }

    fn outage(started_at: i64, ended_at: Option<i64>) -> Outage {
        Outage {
            id: 1,
            monitor_id: 1,
            started_at,
            ended_at,
            initial_error: None,
            last_error: None,
        }
    }

    #[test]
    fn test_merge_intervals() {
        let merged = merge_intervals(vec![
            Interval::new(10, 20),
            Interval::new(15, 30),
            Interval::new(30, 40),
            Interval::new(50, 60),
            Interval::new(55, 55),
        ]);
        assert_eq!(merged, vec![Interval::new(10, 40), Interval::new(50, 60)]);
    }

    #[test]
    fn test_overlap_len() {
        let a = vec![Interval::new(0, 10), Interval::new(20, 30)];
        let b = vec![Interval::new(5, 25)];
        assert_eq!(overlap_len(&a, &b), 10);
        assert_eq!(overlap_len(&b, &a), 10);
        assert_eq!(overlap_len(&a, &[]), 0);
    }

    #[test]
    fn test_gaps_within() {
        let covered = vec![Interval::new(10, 20), Interval::new(30, 40)];
        assert_eq!(
            gaps_within(&covered, 0, 50),
            vec![
                Interval::new(0, 10),
                Interval::new(20, 30),
                Interval::new(40, 50)
            ]
        );
        assert_eq!(gaps_within(&[], 0, 50), vec![Interval::new(0, 50)]);
        assert!(gaps_within(&[Interval::new(0, 50)], 0, 50).is_empty());
    }

    #[test]
    fn test_uptime_steady_probing_with_one_outage() {
        // Window [0, 3600), one outage [600, 900), probes every 60s all up.
        let checks: Vec<CheckResult> = (1..60).map(|i| up_check(i * 60)).collect();
        let outages = vec![outage(600, Some(900))];

        let totals = compute_uptime(0, 3600, 0, 60, &outages, &checks);
        assert_eq!(totals.total_sec, 3600);
        assert_eq!(totals.downtime_sec, 300);
        assert_eq!(totals.unknown_sec, 0);
        assert_eq!(totals.uptime_sec, 3300);
        let pct = totals.uptime_pct.unwrap();
        assert!((pct - 91.6666).abs() < 0.01, "pct = {}", pct);
    }

    #[test]
    fn test_uptime_no_checks_is_all_unknown() {
        let totals = compute_uptime(0, 3600, 0, 60, &[], &[]);
        assert_eq!(totals.unknown_sec, 3600);
        assert_eq!(totals.uptime_sec, 0);
        assert_eq!(totals.uptime_pct, Some(0.0));
    }

    #[test]
    fn test_uptime_probe_gap_beyond_horizon_is_unknown() {
        // Checks at 0 and 1000, horizon 120: [120, 1000) and [1120, 1200) gaps
        let checks = vec![up_check(0), up_check(1000)];
        let totals = compute_uptime(0, 1200, 0, 60, &[], &checks);
        assert_eq!(totals.unknown_sec, 880 + 80);
        assert_eq!(totals.uptime_sec, 240);
    }

    #[test]
    fn test_uptime_late_first_probe_accrues_unknown() {
        // First probe at 500, horizon 120: [0, 380) stays unknown
        let checks: Vec<CheckResult> = (0..52).map(|i| up_check(500 + i * 60)).collect();
        let totals = compute_uptime(0, 3600, 0, 60, &[], &checks);
        assert_eq!(totals.unknown_sec, 380);
        assert_eq!(totals.uptime_sec, 3220);
    }

    #[test]
    fn test_uptime_unknown_not_double_counted_with_downtime() {
        // Whole window is one open outage with no probe coverage
        let totals = compute_uptime(0, 1000, 0, 60, &[outage(0, None)], &[]);
        assert_eq!(totals.downtime_sec, 1000);
        assert_eq!(totals.unknown_sec, 0);
        assert_eq!(totals.uptime_sec, 0);
        assert_eq!(
            totals.downtime_sec + totals.unknown_sec + totals.uptime_sec,
            totals.total_sec
        );
    }

    #[test]
    fn test_uptime_clamps_to_created_at() {
        let checks: Vec<CheckResult> = (0..30).map(|i| up_check(1800 + i * 60)).collect();
        let totals = compute_uptime(0, 3600, 1800, 60, &[], &checks);
        assert_eq!(totals.total_sec, 1800);
        assert_eq!(totals.unknown_sec, 0);
        assert_eq!(totals.uptime_sec, 1800);
        assert_eq!(totals.uptime_pct, Some(100.0));
    }

    #[test]
    fn test_uptime_explicit_unknown_checks_count() {
        let mut checks = vec![up_check(0), up_check(120), up_check(240)];
        checks[1].status = MonitorStatus::Unknown;
        // Coverage from up checks: [0,120) ∪ [240,360); unknown row covers [120,240)
        let totals = compute_uptime(0, 360, 0, 60, &[], &checks);
        assert_eq!(totals.unknown_sec, 120);
        assert_eq!(totals.uptime_sec, 240);
    }

    #[test]
    fn test_empty_range() {
        let totals = compute_uptime(100, 100, 0, 60, &[], &[]);
        assert_eq!(totals, UptimeTotals::empty());
        // created_at after range end
        let totals = compute_uptime(0, 100, 500, 60, &[], &[]);
        assert_eq!(totals.total_sec, 0);
        assert!(totals.uptime_pct.is_none());
    }
}
