//! Rate-limited message fan-out
//!
//! One dispatcher primitive serves every outbound segment: targets are
//! deduplicated by identity (first occurrence wins, input order preserved),
//! deliveries pause briefly after every 12 sends, and per-target failures
//! are counted without stopping the batch.

use chrono::NaiveDate;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tracing::{info, warn};

use crate::ledger::{CellDate, LedgerSnapshot};
use crate::membership::Membership;

/// Sends between pacing pauses.
const SEND_BATCH: usize = 12;

/// Pause after each batch.
const BATCH_PAUSE: Duration = Duration::from_secs(1);

/// Campaign-scoped join credentials are valid this long.
pub const CAMPAIGN_TTL_SECS: i64 = 2 * 3600;

/// Delivery tally for one dispatch run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchTally {
    pub sent: usize,
    pub failed: usize,
    pub total: usize,
}

impl DispatchTally {
    pub fn format_notice(&self) -> String {
        format!(
            "Broadcast finished.\nSent: {}\nFailed: {}\nTotal: {}",
            self.sent, self.failed, self.total
        )
    }
}

/// Drop repeated identities, keeping the first occurrence in input order
pub fn dedupe_targets(targets: &[i64]) -> Vec<i64> {
    let mut seen = HashSet::new();
    targets
        .iter()
        .copied()
        .filter(|id| seen.insert(*id))
        .collect()
}

/// Deliver one rendered message per unique target.
pub async fn dispatch<F>(
    membership: &dyn Membership,
    targets: &[i64],
    render: F,
) -> DispatchTally
where
    F: Fn(i64) -> String,
{
    let targets = dedupe_targets(targets);
    let mut tally = DispatchTally {
        total: targets.len(),
        ..DispatchTally::default()
    };

    for (i, identity) in targets.iter().enumerate() {
        match membership.send_message(*identity, &render(*identity)).await {
            Ok(()) => tally.sent += 1,
            Err(e) => {
                tally.failed += 1;
                if e.is_transient() {
                    warn!(identity, error = %e, "Delivery failed, continuing");
                }
            }
        }
        if (i + 1) % SEND_BATCH == 0 {
            tokio::time::sleep(BATCH_PAUSE).await;
        }
    }

    info!(sent = tally.sent, failed = tally.failed, total = tally.total, "Dispatch complete");
    tally
}

/// Per-identity aggregates in first-seen row order
struct SegmentView {
    order: Vec<i64>,
    max_end: HashMap<i64, CellDate>,
    marked_present: HashSet<i64>,
}

impl SegmentView {
    fn build(snapshot: &LedgerSnapshot) -> Self {
        let mut view = Self {
            order: Vec::new(),
            max_end: HashMap::new(),
            marked_present: HashSet::new(),
        };
        for record in snapshot.records() {
            let entry = view
                .max_end
                .entry(record.identity)
                .or_insert(CellDate::Unknown);
            if record.period_end > *entry {
                *entry = record.period_end;
            }
            if record.marked_in_channel() {
                view.marked_present.insert(record.identity);
            }
            if !view.order.contains(&record.identity) {
                view.order.push(record.identity);
            }
        }
        view
    }
}

/// Every identity in the ledger, first-seen order
pub fn all_identities(snapshot: &LedgerSnapshot) -> Vec<i64> {
    SegmentView::build(snapshot).order
}

/// Identities whose authoritative period covers `today` but whose derived
/// `in_channel` never says "yes"
pub fn paid_absent(snapshot: &LedgerSnapshot, today: NaiveDate) -> Vec<i64> {
    let view = SegmentView::build(snapshot);
    view.order
        .iter()
        .copied()
        .filter(|id| {
            matches!(view.max_end[id], CellDate::Date(end) if end >= today)
                && !view.marked_present.contains(id)
        })
        .collect()
}

/// Identities whose best period end does not reach `month_start` (unknown
/// dates count as unpaid)
pub fn unpaid_before(snapshot: &LedgerSnapshot, month_start: NaiveDate) -> Vec<i64> {
    let view = SegmentView::build(snapshot);
    view.order
        .iter()
        .copied()
        .filter(|id| match view.max_end[id] {
            CellDate::Date(end) => end < month_start,
            CellDate::Unknown => true,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::FakeMembership;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn snapshot(rows: Vec<Vec<&str>>) -> LedgerSnapshot {
        let mut values = vec![vec![
            "user_id".to_string(),
            "period_end".to_string(),
            "in_channel".to_string(),
        ]];
        values.extend(
            rows.into_iter()
                .map(|r| r.into_iter().map(str::to_string).collect()),
        );
        LedgerSnapshot::from_values(values)
    }

    #[test]
    fn test_dedupe_preserves_first_seen_order() {
        assert_eq!(dedupe_targets(&[3, 1, 3, 2, 1]), vec![3, 1, 2]);
    }

    #[tokio::test]
    async fn test_dispatch_sends_once_per_identity() {
        let membership = FakeMembership::default();
        let tally = dispatch(&membership, &[5, 7, 5], |_| "hello".to_string()).await;
        assert_eq!(tally, DispatchTally { sent: 2, failed: 0, total: 2 });
        assert_eq!(membership.sent_to(), vec![5, 7]);
    }

    #[tokio::test]
    async fn test_dispatch_isolates_failures() {
        let membership = FakeMembership::default();
        membership.unreachable.lock().unwrap().insert(7);

        let tally = dispatch(&membership, &[5, 7, 9], |id| format!("hi {}", id)).await;
        assert_eq!(tally, DispatchTally { sent: 2, failed: 1, total: 3 });
        assert_eq!(membership.sent_to(), vec![5, 9]);
    }

    #[test]
    fn test_all_identities_first_seen_order() {
        let snap = snapshot(vec![
            vec!["3", "2025-01-01", ""],
            vec!["1", "2025-01-01", ""],
            vec!["3", "2025-02-01", ""],
        ]);
        assert_eq!(all_identities(&snap), vec![3, 1]);
    }

    #[test]
    fn test_paid_absent_uses_authoritative_end() {
        let today = d(2025, 3, 1);
        let snap = snapshot(vec![
            // Stale row lapsed, fresh row active, not in channel: included.
            vec!["1", "2025-01-01", "no"],
            vec!["1", "2025-04-01", "no"],
            // Active but marked present: excluded.
            vec!["2", "2025-04-01", "yes"],
            // Lapsed: excluded.
            vec!["3", "2025-02-01", "no"],
        ]);
        assert_eq!(paid_absent(&snap, today), vec![1]);
    }

    #[test]
    fn test_unpaid_before_counts_unknown_as_unpaid() {
        let month_start = d(2025, 3, 1);
        let snap = snapshot(vec![
            vec!["1", "2025-02-20", ""],
            vec!["2", "2025-03-20", ""],
            vec!["3", "", ""],
        ]);
        assert_eq!(unpaid_before(&snap, month_start), vec![1, 3]);
    }
}
