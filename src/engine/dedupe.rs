//! Duplicate-row collapse
//!
//! Repeated approvals can leave several rows for one identity. This pass
//! picks the authoritative row per identity — latest `period_end`, ties
//! broken toward the most recently appended row — and marks the rest for
//! deletion. Pure over one snapshot; the caller applies deletions in
//! coalesced descending batches so row indices never shift under it.

use std::collections::HashMap;

use crate::ledger::{CellDate, LedgerSnapshot, RowId};

/// Result of one dedupe computation over a snapshot
#[derive(Debug, Default, PartialEq, Eq)]
pub struct DedupeOutcome {
    /// Authoritative row per identity
    pub authoritative: HashMap<i64, RowId>,
    /// Every non-authoritative row, unordered
    pub rows_to_delete: Vec<RowId>,
}

impl DedupeOutcome {
    pub fn is_clean(&self) -> bool {
        self.rows_to_delete.is_empty()
    }
}

/// Group rows by identity and collapse each group to one authoritative row
pub fn dedupe(snapshot: &LedgerSnapshot) -> DedupeOutcome {
    let mut groups: HashMap<i64, Vec<(RowId, CellDate)>> = HashMap::new();
    for record in snapshot.records() {
        groups
            .entry(record.identity)
            .or_default()
            .push((record.row, record.period_end));
    }

    let mut outcome = DedupeOutcome::default();
    for (identity, rows) in groups {
        let winner = rows
            .iter()
            .max_by_key(|(row, end)| (*end, *row))
            .map(|(row, _)| *row)
            .expect("group is never empty");

        outcome.authoritative.insert(identity, winner);
        outcome
            .rows_to_delete
            .extend(rows.iter().map(|(row, _)| *row).filter(|row| *row != winner));
    }
    outcome
}

/// Coalesce row ids into minimal contiguous batches, ordered so each batch
/// can be deleted without shifting any batch still to come (highest rows
/// first). Each batch is `(from, to)` inclusive with `from <= to`.
pub fn coalesce_descending(rows: &[RowId]) -> Vec<(RowId, RowId)> {
    let mut sorted: Vec<u32> = rows.iter().map(|r| r.index()).collect();
    sorted.sort_unstable_by(|a, b| b.cmp(a));
    sorted.dedup();

    let mut batches = Vec::new();
    let mut iter = sorted.into_iter();
    let Some(first) = iter.next() else {
        return batches;
    };

    let mut high = first;
    let mut low = first;
    for row in iter {
        if row == low - 1 {
            low = row;
        } else {
            batches.push((RowId(low), RowId(high)));
            high = row;
            low = row;
        }
    }
    batches.push((RowId(low), RowId(high)));
    batches
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::LedgerStore;
    use crate::testkit::MemoryLedger;

    fn snapshot(rows: Vec<Vec<&str>>) -> LedgerSnapshot {
        let mut values = vec![vec!["user_id".to_string(), "period_end".to_string()]];
        values.extend(
            rows.into_iter()
                .map(|r| r.into_iter().map(str::to_string).collect()),
        );
        LedgerSnapshot::from_values(values)
    }

    #[test]
    fn test_latest_period_end_wins() {
        let snap = snapshot(vec![
            vec!["1", "2025-01-10"],
            vec!["1", "2025-03-20"],
            vec!["2", "2024-12-01"],
        ]);
        let outcome = dedupe(&snap);
        assert_eq!(outcome.authoritative[&1], RowId(3));
        assert_eq!(outcome.authoritative[&2], RowId(4));
        assert_eq!(outcome.rows_to_delete, vec![RowId(2)]);
    }

    #[test]
    fn test_tie_breaks_toward_later_row() {
        let snap = snapshot(vec![vec!["1", "2025-03-20"], vec!["1", "2025-03-20"]]);
        let outcome = dedupe(&snap);
        assert_eq!(outcome.authoritative[&1], RowId(3));
        assert_eq!(outcome.rows_to_delete, vec![RowId(2)]);
    }

    #[test]
    fn test_unknown_dates_lose_to_any_real_date() {
        let snap = snapshot(vec![
            vec!["1", ""],
            vec!["1", "1999-01-01"],
            vec!["1", "broken"],
        ]);
        let outcome = dedupe(&snap);
        assert_eq!(outcome.authoritative[&1], RowId(3));
        let mut deleted = outcome.rows_to_delete.clone();
        deleted.sort();
        assert_eq!(deleted, vec![RowId(2), RowId(4)]);
    }

    #[test]
    fn test_single_rows_are_untouched() {
        let snap = snapshot(vec![vec!["1", "2025-01-10"], vec!["2", "2025-02-10"]]);
        let outcome = dedupe(&snap);
        assert!(outcome.is_clean());
        assert_eq!(outcome.authoritative.len(), 2);
    }

    #[tokio::test]
    async fn test_dedupe_is_idempotent_after_apply() {
        let store = MemoryLedger::new(vec![
            vec!["user_id", "period_end"],
            vec!["1", "2025-01-10"],
            vec!["1", "2025-03-20"],
            vec!["2", "2024-12-01"],
            vec!["2", "2024-11-01"],
        ]);

        let outcome = dedupe(&store.read_all().await.unwrap());
        for (from, to) in coalesce_descending(&outcome.rows_to_delete) {
            store.delete_rows(from, to).await.unwrap();
        }

        let second = dedupe(&store.read_all().await.unwrap());
        assert!(second.is_clean());
        assert_eq!(second.authoritative.len(), 2);
    }

    #[test]
    fn test_coalesce_merges_contiguous_runs() {
        let rows = [RowId(2), RowId(3), RowId(4), RowId(7), RowId(9), RowId(10)];
        assert_eq!(
            coalesce_descending(&rows),
            vec![
                (RowId(9), RowId(10)),
                (RowId(7), RowId(7)),
                (RowId(2), RowId(4)),
            ]
        );
    }

    #[test]
    fn test_coalesce_dedupes_and_handles_empty() {
        assert!(coalesce_descending(&[]).is_empty());
        assert_eq!(
            coalesce_descending(&[RowId(5), RowId(5)]),
            vec![(RowId(5), RowId(5))]
        );
    }
}
