//! Ledger/channel reconciliation
//!
//! Three operator-triggered passes over one fresh snapshot each:
//!
//! - **audit**: cross-check every ledger identity against live membership,
//!   repair the derived `in_channel` column, and report what was found.
//! - **clean**: remove identities whose best period end is before the
//!   cutoff, and drop stale duplicate rows.
//! - **restore**: re-invite identities that are paid up but missing from
//!   the channel.
//!
//! Every pass is restart-safe: interrupt it and re-run, and it re-reads the
//! ledger rather than trusting prior in-memory state. Per-item failures are
//! logged and the pass continues.

use chrono::{Datelike, NaiveDate};
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::dedupe::{coalesce_descending, dedupe};
use crate::engine::upsert::{ensure_headers, INVITE_TTL_SECS};
use crate::ledger::{
    CellDate, CellRange, Field, HeaderMap, LedgerStore, RowId, SubscriberRecord, FIRST_DATA_ROW,
};
use crate::membership::Membership;
use crate::types::Result;

/// Pause between consecutive live-membership lookups.
const LOOKUP_PACE: Duration = Duration::from_millis(120);

/// Pause between consecutive removals.
const REMOVAL_PACE: Duration = Duration::from_millis(250);

/// How many restore candidates an audit notice lists before truncating.
const RESTORE_PREVIEW: usize = 20;

/// Identities grouped from one snapshot, keyed for deterministic iteration
fn group_records(records: Vec<SubscriberRecord>) -> BTreeMap<i64, Vec<SubscriberRecord>> {
    let mut groups: BTreeMap<i64, Vec<SubscriberRecord>> = BTreeMap::new();
    for record in records {
        groups.entry(record.identity).or_default().push(record);
    }
    groups
}

/// Best (authoritative) period end within a group
fn max_period_end(rows: &[SubscriberRecord]) -> CellDate {
    rows.iter()
        .map(|r| r.period_end)
        .max()
        .unwrap_or(CellDate::Unknown)
}

/// Cutoff for the removal pass: the first day of `today`'s month.
///
/// The deployed system's notes said "first of the month" while one code path
/// used the 19th; the documented rule wins here.
pub fn removal_cutoff(today: NaiveDate) -> NaiveDate {
    today.with_day(1).expect("day 1 is valid for every month")
}

/// Outcome of the audit pass
#[derive(Debug, Clone, Default)]
pub struct AuditReport {
    pub total_rows: usize,
    pub unique_identities: usize,
    pub unique_present: usize,
    pub unique_absent: usize,
    pub duplicate_groups: usize,
    /// Paid-but-absent identities that should be re-invited, ascending
    pub to_restore: Vec<i64>,
    /// Live channel member count, when the lookup succeeded
    pub member_count: Option<u32>,
}

impl AuditReport {
    /// Operator-facing summary
    pub fn format_notice(&self) -> String {
        let mut lines = vec!["Audit (unique identities)".to_string()];
        if let Some(count) = self.member_count {
            lines.push(format!("- channel members (live): {}", count));
        }
        lines.push(format!("- ledger rows: {}", self.total_rows));
        lines.push(format!("- unique identities: {}", self.unique_identities));
        lines.push(format!("- present in channel: {}", self.unique_present));
        lines.push(format!("- absent from channel: {}", self.unique_absent));
        lines.push(format!("- duplicate groups: {}", self.duplicate_groups));
        lines.push(format!("- paid but absent: {}", self.to_restore.len()));

        if !self.to_restore.is_empty() {
            let preview: Vec<String> = self
                .to_restore
                .iter()
                .take(RESTORE_PREVIEW)
                .map(i64::to_string)
                .collect();
            let overflow = self.to_restore.len().saturating_sub(RESTORE_PREVIEW);
            let more = if overflow > 0 {
                format!(" (+{})", overflow)
            } else {
                String::new()
            };
            lines.push(format!("to restore: {}{}", preview.join(", "), more));
        }
        lines.join("\n")
    }
}

/// Cross-check the ledger against live membership and repair `in_channel`.
pub async fn audit(
    store: &dyn LedgerStore,
    membership: &dyn Membership,
    today: NaiveDate,
) -> Result<AuditReport> {
    let member_count = match membership.member_count().await {
        Ok(count) => Some(count),
        Err(e) => {
            warn!(error = %e, "Member count lookup failed");
            None
        }
    };

    let snapshot = store.read_all().await?;
    let groups = group_records(snapshot.records());

    // Fresh lookup per identity; failures classify as absent (fail-closed).
    let mut present: HashSet<i64> = HashSet::new();
    let mut absent: HashSet<i64> = HashSet::new();
    for &identity in groups.keys() {
        let is_present = match membership.member_state(identity).await {
            Ok(state) => state.is_present(),
            Err(e) => {
                warn!(identity, error = %e, "Membership lookup failed, counting absent");
                false
            }
        };
        if is_present {
            present.insert(identity);
        } else {
            absent.insert(identity);
        }
        tokio::time::sleep(LOOKUP_PACE).await;
    }

    let to_restore: Vec<i64> = groups
        .iter()
        .filter(|(identity, rows)| {
            absent.contains(*identity)
                && matches!(max_period_end(rows), CellDate::Date(end) if end >= today)
        })
        .map(|(identity, _)| *identity)
        .collect();

    let report = AuditReport {
        total_rows: snapshot.rows.len(),
        unique_identities: groups.len(),
        unique_present: present.len(),
        unique_absent: absent.len(),
        duplicate_groups: groups.values().filter(|rows| rows.len() > 1).count(),
        to_restore,
        member_count,
    };

    if !snapshot.rows.is_empty() {
        if let Err(e) = write_in_channel_column(store, &snapshot.rows, &present).await {
            warn!(error = %e, "in_channel column update failed");
        }
    }

    info!(
        rows = report.total_rows,
        unique = report.unique_identities,
        present = report.unique_present,
        absent = report.unique_absent,
        "Audit complete"
    );
    Ok(report)
}

/// Rewrite the whole `in_channel` column in one ranged store call:
/// "yes" for rows of present identities, "no" for other subscriber rows,
/// blank for rows without a decodable identity.
async fn write_in_channel_column(
    store: &dyn LedgerStore,
    rows: &[crate::ledger::DataRow],
    present: &HashSet<i64>,
) -> Result<()> {
    // The column may be missing on old ledgers; extend the header first.
    let header = ensure_headers(store).await?;
    let map = HeaderMap::resolve(&header);
    let col = map
        .col(Field::InChannel)
        .expect("in_channel exists after ensure_headers");

    let values: Vec<Vec<String>> = rows
        .iter()
        .map(|row| {
            let cell = match SubscriberRecord::decode(row.id, &row.cells, &map) {
                Some(record) if present.contains(&record.identity) => "yes",
                Some(_) => "no",
                None => "",
            };
            vec![cell.to_string()]
        })
        .collect();

    let last_row = FIRST_DATA_ROW + rows.len() as u32 - 1;
    store
        .write_range(
            CellRange::column(col + 1, FIRST_DATA_ROW, last_row),
            values,
        )
        .await
}

/// Outcome of the removal pass
#[derive(Debug, Clone)]
pub struct CleanOutcome {
    /// Identities removed from the channel
    pub removed: Vec<i64>,
    /// Stale duplicate rows deleted
    pub deleted_rows: usize,
    pub cutoff: NaiveDate,
}

impl CleanOutcome {
    pub fn format_notice(&self) -> String {
        format!(
            "Clean finished:\n- removed from channel: {}\n- stale rows deleted: {}\nRemoval applies only when the best period end is before {}; paid identities only lose duplicates.",
            self.removed.len(),
            self.deleted_rows,
            self.cutoff.format("%Y-%m-%d"),
        )
    }
}

impl Default for CleanOutcome {
    fn default() -> Self {
        Self {
            removed: Vec::new(),
            deleted_rows: 0,
            cutoff: NaiveDate::from_ymd_opt(1970, 1, 1).expect("epoch"),
        }
    }
}

/// Remove expired identities from the channel and drop duplicate rows.
///
/// An identity is removed only when its best `period_end` is a known date
/// strictly before `cutoff`. Identities whose rows are all unknown-dated
/// are left alone. Every non-authoritative row is deleted regardless of
/// removal status; authoritative rows stay as the audit trail.
pub async fn clean(
    store: &dyn LedgerStore,
    membership: &dyn Membership,
    cutoff: NaiveDate,
) -> Result<CleanOutcome> {
    let snapshot = store.read_all().await?;
    let groups = group_records(snapshot.records());

    let mut outcome = CleanOutcome {
        cutoff,
        ..CleanOutcome::default()
    };

    let candidates: Vec<i64> = groups
        .iter()
        .filter(|(_, rows)| matches!(max_period_end(rows), CellDate::Date(end) if end < cutoff))
        .map(|(identity, _)| *identity)
        .collect();

    for identity in candidates {
        if remove_if_member(membership, identity).await {
            outcome.removed.push(identity);
        }
        tokio::time::sleep(REMOVAL_PACE).await;
    }

    // Duplicate rows go regardless of removal status.
    let duplicates = dedupe(&snapshot);
    outcome.deleted_rows = delete_rows_batched(store, &duplicates.rows_to_delete).await;

    info!(
        removed = outcome.removed.len(),
        deleted_rows = outcome.deleted_rows,
        cutoff = %cutoff,
        "Clean complete"
    );
    Ok(outcome)
}

/// Remove one identity unless it is privileged or already gone.
/// Ban-then-unban keeps the identity free to re-request access later.
async fn remove_if_member(membership: &dyn Membership, identity: i64) -> bool {
    match membership.member_state(identity).await {
        Ok(state) if state.skip_removal() => {
            info!(identity, ?state, "Removal skipped");
            return false;
        }
        Ok(_) => {}
        Err(e) => {
            // Fail-closed: an unverifiable identity counts as absent.
            warn!(identity, error = %e, "Membership lookup failed, removal skipped");
            return false;
        }
    }

    if let Err(e) = membership.remove_member(identity).await {
        warn!(identity, error = %e, "Removal failed");
        return false;
    }
    if let Err(e) = membership.restore_member(identity).await {
        warn!(identity, error = %e, "Unblock after removal failed");
    }
    info!(identity, "Removed from channel");
    true
}

/// Delete rows in coalesced batches, highest rows first. Batch failures are
/// logged; remaining batches are still issued. Returns rows deleted.
pub async fn delete_rows_batched(store: &dyn LedgerStore, rows: &[RowId]) -> usize {
    let mut deleted = 0usize;
    for (from, to) in coalesce_descending(rows) {
        match store.delete_rows(from, to).await {
            Ok(()) => deleted += (to.index() - from.index() + 1) as usize,
            Err(e) => warn!(%from, %to, error = %e, "Batch delete failed"),
        }
    }
    deleted
}

/// Outcome of the paid-but-absent restore pass
#[derive(Debug, Clone, Copy, Default)]
pub struct RestoreOutcome {
    /// Credentials delivered
    pub sent: usize,
    /// Absent identities whose subscription had lapsed
    pub skipped: usize,
}

impl RestoreOutcome {
    pub fn format_notice(&self) -> String {
        format!(
            "Restore finished: links sent to {}, skipped (lapsed): {}.",
            self.sent, self.skipped
        )
    }
}

/// Re-invite identities that are paid up but not in the channel.
pub async fn restore_paid_absent(
    store: &dyn LedgerStore,
    membership: &dyn Membership,
    today: NaiveDate,
) -> Result<RestoreOutcome> {
    let snapshot = store.read_all().await?;
    let groups = group_records(snapshot.records());

    let mut outcome = RestoreOutcome::default();
    for (identity, rows) in &groups {
        let present = match membership.member_state(*identity).await {
            Ok(state) => state.is_present(),
            Err(_) => false,
        };
        if present {
            continue;
        }

        match max_period_end(rows) {
            CellDate::Date(end) if end >= today => {
                if send_restore_link(membership, *identity).await {
                    outcome.sent += 1;
                }
            }
            _ => outcome.skipped += 1,
        }
        tokio::time::sleep(LOOKUP_PACE).await;
    }

    info!(sent = outcome.sent, skipped = outcome.skipped, "Restore complete");
    Ok(outcome)
}

async fn send_restore_link(membership: &dyn Membership, identity: i64) -> bool {
    let label = format!("restore-{}-{}", identity, Uuid::new_v4());
    let link = match membership.create_join_credential(&label, INVITE_TTL_SECS).await {
        Ok(link) => link,
        Err(e) => {
            warn!(identity, error = %e, "Restore credential creation failed");
            return false;
        }
    };
    let text = format!(
        "Your subscription is active. Join link (valid 1 hour): {}",
        link
    );
    match membership.send_message(identity, &text).await {
        Ok(()) => true,
        Err(e) => {
            warn!(identity, error = %e, "Restore delivery failed");
            false
        }
    }
}

/// Collapse duplicate rows without touching membership. Returns rows deleted.
pub async fn purge_duplicates(store: &dyn LedgerStore) -> Result<usize> {
    let snapshot = store.read_all().await?;
    let outcome = dedupe(&snapshot);
    if outcome.is_clean() {
        return Ok(0);
    }
    Ok(delete_rows_batched(store, &outcome.rows_to_delete).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::membership::MemberState;
    use crate::testkit::{FakeMembership, MemoryLedger};

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn ledger() -> MemoryLedger {
        MemoryLedger::new(vec![
            vec![
                "user_id",
                "username",
                "paid_at",
                "period_end",
                "notified",
                "status",
                "full_name",
                "phone_number",
                "in_channel",
            ],
            vec!["1", "@a", "2025-02-20", "2025-03-20", "no", "active", "", "", ""],
            vec!["1", "@a", "2024-12-10", "2025-01-10", "no", "active", "", "", ""],
            vec!["2", "@b", "2024-11-01", "2024-12-01", "no", "active", "", "", ""],
        ])
    }

    #[test]
    fn test_removal_cutoff_is_first_of_month() {
        assert_eq!(removal_cutoff(d(2025, 3, 19)), d(2025, 3, 1));
        assert_eq!(removal_cutoff(d(2025, 12, 1)), d(2025, 12, 1));
    }

    #[tokio::test]
    async fn test_audit_counts_partition_identities() {
        let store = ledger();
        let membership = FakeMembership::with_states(&[
            (1, MemberState::Member),
            (2, MemberState::Left),
        ]);

        let report = audit(&store, &membership, d(2025, 3, 1)).await.unwrap();
        assert_eq!(report.total_rows, 3);
        assert_eq!(report.unique_identities, 2);
        assert_eq!(
            report.unique_present + report.unique_absent,
            report.unique_identities
        );
        assert_eq!(report.unique_present, 1);
        assert_eq!(report.duplicate_groups, 1);
    }

    #[tokio::test]
    async fn test_audit_repairs_in_channel_column() {
        let store = ledger();
        let membership = FakeMembership::with_states(&[
            (1, MemberState::Member),
            (2, MemberState::Left),
        ]);

        audit(&store, &membership, d(2025, 3, 1)).await.unwrap();

        // in_channel is column 9: both rows of identity 1 say yes.
        assert_eq!(store.cell(2, 9), "yes");
        assert_eq!(store.cell(3, 9), "yes");
        assert_eq!(store.cell(4, 9), "no");
    }

    #[tokio::test]
    async fn test_audit_restore_candidates() {
        let today = d(2025, 3, 1);
        let store = MemoryLedger::new(vec![
            vec!["user_id", "period_end"],
            vec!["5", "2025-03-06"],
            vec!["6", "2025-02-01"],
        ]);
        let membership = FakeMembership::with_states(&[
            (5, MemberState::Left),
            (6, MemberState::Left),
        ]);

        let report = audit(&store, &membership, today).await.unwrap();
        // 5 is paid (end >= today) and absent; 6 lapsed.
        assert_eq!(report.to_restore, vec![5]);
    }

    #[tokio::test]
    async fn test_audit_lookup_failure_counts_absent() {
        let store = MemoryLedger::new(vec![
            vec!["user_id", "period_end"],
            vec!["5", "2025-03-06"],
        ]);
        let membership = FakeMembership::with_states(&[(5, MemberState::Member)]);
        membership.failing_lookups.lock().unwrap().insert(5);

        let report = audit(&store, &membership, d(2025, 3, 1)).await.unwrap();
        assert_eq!(report.unique_absent, 1);
        assert_eq!(report.unique_present, 0);
    }

    #[tokio::test]
    async fn test_clean_scenario_from_cutoff() {
        // u=1 has an active row and a stale one; u=2 lapsed entirely.
        let store = ledger();
        let membership = FakeMembership::with_states(&[
            (1, MemberState::Member),
            (2, MemberState::Member),
        ]);

        let outcome = clean(&store, &membership, d(2025, 3, 1)).await.unwrap();

        assert_eq!(outcome.removed, vec![2]);
        assert_eq!(outcome.deleted_rows, 1);
        assert_eq!(membership.removed.lock().unwrap().clone(), vec![2]);
        // Ban is always reversed so the identity can re-request access.
        assert_eq!(membership.restored.lock().unwrap().clone(), vec![2]);

        // u=1 keeps only the authoritative row; u=2 keeps its audit trail.
        let snapshot = store.read_all().await.unwrap();
        let records = snapshot.records();
        assert_eq!(records.len(), 2);
        assert!(records
            .iter()
            .any(|r| r.identity == 1 && r.period_end == CellDate::parse("2025-03-20")));
        assert!(records.iter().any(|r| r.identity == 2));
    }

    #[tokio::test]
    async fn test_clean_skips_privileged_and_absent() {
        let store = MemoryLedger::new(vec![
            vec!["user_id", "period_end"],
            vec!["3", "2024-01-01"],
            vec!["4", "2024-01-01"],
        ]);
        let membership = FakeMembership::with_states(&[
            (3, MemberState::Admin),
            (4, MemberState::Left),
        ]);

        let outcome = clean(&store, &membership, d(2025, 3, 1)).await.unwrap();
        assert!(outcome.removed.is_empty());
        assert!(membership.removed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_clean_ignores_unknown_only_groups() {
        let store = MemoryLedger::new(vec![
            vec!["user_id", "period_end"],
            vec!["9", ""],
            vec!["9", "not a date"],
        ]);
        let membership = FakeMembership::with_states(&[(9, MemberState::Member)]);

        let outcome = clean(&store, &membership, d(2025, 3, 1)).await.unwrap();
        assert!(outcome.removed.is_empty());
        // Duplicate collapse still applies.
        assert_eq!(outcome.deleted_rows, 1);
    }

    #[tokio::test]
    async fn test_restore_sends_to_paid_absent_only() {
        let store = MemoryLedger::new(vec![
            vec!["user_id", "period_end"],
            vec!["5", "2025-03-06"],
            vec!["6", "2025-02-01"],
            vec!["7", "2025-04-01"],
        ]);
        let membership = FakeMembership::with_states(&[
            (5, MemberState::Left),
            (6, MemberState::Left),
            (7, MemberState::Member),
        ]);

        let outcome = restore_paid_absent(&store, &membership, d(2025, 3, 1))
            .await
            .unwrap();
        assert_eq!(outcome.sent, 1);
        assert_eq!(outcome.skipped, 1);
        assert_eq!(membership.sent_to(), vec![5]);
    }

    #[tokio::test]
    async fn test_purge_duplicates_counts_deleted() {
        let store = ledger();
        let deleted = purge_duplicates(&store).await.unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(purge_duplicates(&store).await.unwrap(), 0);
    }

    #[test]
    fn test_audit_notice_truncates_restore_list() {
        let report = AuditReport {
            to_restore: (1..=25).collect(),
            ..AuditReport::default()
        };
        let notice = report.format_notice();
        assert!(notice.contains("(+5)"));
        assert!(notice.contains("20"));
        assert!(!notice.contains("21,"));
    }
}
