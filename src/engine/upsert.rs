//! Approval upsert
//!
//! Turns an approved payment into exactly one ledger row for the subscriber
//! and hands them a short-lived join credential. The ledger write is the
//! source of truth: credential delivery failures never roll it back.

use chrono::NaiveDate;
use std::collections::HashMap;
use tracing::{info, warn};
use uuid::Uuid;

use crate::ledger::{missing_headers, CellRange, Field, HeaderMap, LedgerStore, RowId};
use crate::membership::Membership;
use crate::policy;
use crate::types::Result;

/// Join credentials issued on approval are valid this long.
pub const INVITE_TTL_SECS: i64 = 3600;

/// Profile data captured from the subscriber's conversation, as available
#[derive(Debug, Clone, Default)]
pub struct SubscriberProfile {
    pub identity: i64,
    pub username: Option<String>,
    pub full_name: String,
}

impl SubscriberProfile {
    /// Display name as stored in the ledger ("@name", or "id<N>" fallback)
    pub fn display_name(&self) -> String {
        match self.username.as_deref().filter(|u| !u.is_empty()) {
            Some(name) => format!("@{}", name),
            None => format!("id{}", self.identity),
        }
    }
}

/// Where the upsert landed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertTarget {
    /// Overwrote the first existing row for the identity
    Updated(RowId),
    /// No existing row; appended a new one
    Appended,
}

/// Result of one approval
#[derive(Debug, Clone, Copy)]
pub struct UpsertOutcome {
    pub target: UpsertTarget,
    pub period_end: NaiveDate,
    /// Whether the join credential reached the subscriber. `false` means
    /// the record is paid but the link must be re-sent out-of-band.
    pub delivered: bool,
}

/// Make sure every wanted column exists, appending missing headers at the
/// end. Existing columns are never reordered or removed.
pub async fn ensure_headers(store: &dyn LedgerStore) -> Result<Vec<String>> {
    let mut header = store.read_header().await?;
    let missing = missing_headers(&header);
    if missing.is_empty() {
        return Ok(header);
    }

    header.extend(missing.iter().map(|h| h.to_string()));
    store
        .write_range(
            CellRange::row(RowId(1), header.len()),
            vec![header.clone()],
        )
        .await?;
    info!(added = missing.len(), "Ledger header extended");
    Ok(header)
}

/// Upsert a paid record for `profile` and deliver a 1-hour join credential.
///
/// Idempotent per (identity, day): a repeated approval overwrites the first
/// matching row in place and computes the same period end.
pub async fn approve_subscriber(
    store: &dyn LedgerStore,
    membership: &dyn Membership,
    end_day: u8,
    profile: &SubscriberProfile,
    today: NaiveDate,
) -> Result<UpsertOutcome> {
    let header = ensure_headers(store).await?;
    let map = HeaderMap::resolve(&header);
    let period_end = policy::compute_end_date(today, end_day);

    let mut values: HashMap<Field, String> = HashMap::new();
    values.insert(Field::Identity, profile.identity.to_string());
    values.insert(Field::DisplayName, profile.display_name());
    values.insert(Field::PaidAt, today.format("%Y-%m-%d").to_string());
    values.insert(Field::PeriodEnd, period_end.format("%Y-%m-%d").to_string());
    values.insert(Field::Notified, "no".to_string());
    values.insert(Field::Status, "active".to_string());
    values.insert(Field::FullName, profile.full_name.clone());
    values.insert(Field::PhoneNumber, String::new());
    let row_values = map.render_row(&header, &values);

    let matches = store.find_rows(&profile.identity.to_string()).await?;
    let target = match matches.first() {
        Some(&row) => {
            store
                .write_range(CellRange::row(row, header.len()), vec![row_values])
                .await?;
            UpsertTarget::Updated(row)
        }
        None => {
            store.append_row(row_values).await?;
            UpsertTarget::Appended
        }
    };
    info!(
        identity = profile.identity,
        period_end = %period_end,
        ?target,
        "Subscriber upserted"
    );

    let delivered = deliver_join_credential(membership, profile.identity).await;

    Ok(UpsertOutcome {
        target,
        period_end,
        delivered,
    })
}

/// Create a personal 1-hour join credential and message it to the
/// subscriber. Returns whether delivery succeeded; failures are logged and
/// left to the operator to retry.
async fn deliver_join_credential(membership: &dyn Membership, identity: i64) -> bool {
    let label = format!("approve-{}-{}", identity, Uuid::new_v4());
    let link = match membership.create_join_credential(&label, INVITE_TTL_SECS).await {
        Ok(link) => link,
        Err(e) => {
            warn!(identity, error = %e, "Join credential creation failed");
            return false;
        }
    };

    let text = format!(
        "Payment confirmed. Your join link is valid for 1 hour:\n{}",
        link
    );
    match membership.send_message(identity, &text).await {
        Ok(()) => true,
        Err(e) => {
            warn!(identity, error = %e, "Join credential delivery failed");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::LedgerStore;
    use crate::testkit::{FakeMembership, MemoryLedger};

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn profile(identity: i64) -> SubscriberProfile {
        SubscriberProfile {
            identity,
            username: Some("ada".to_string()),
            full_name: "Ada Lovelace".to_string(),
        }
    }

    #[tokio::test]
    async fn test_upsert_appends_when_absent() {
        let store = MemoryLedger::new(vec![vec![
            "user_id",
            "username",
            "paid_at",
            "period_end",
            "notified",
            "status",
            "full_name",
            "phone_number",
            "in_channel",
        ]]);
        let membership = FakeMembership::default();

        let outcome =
            approve_subscriber(&store, &membership, 20, &profile(7), d(2025, 1, 15))
                .await
                .unwrap();

        assert_eq!(outcome.target, UpsertTarget::Appended);
        assert_eq!(outcome.period_end, d(2025, 2, 20));
        assert!(outcome.delivered);

        let rows = store.rows();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1][0], "7");
        assert_eq!(rows[1][1], "@ada");
        assert_eq!(rows[1][3], "2025-02-20");
        assert_eq!(rows[1][5], "active");
    }

    #[tokio::test]
    async fn test_upsert_twice_same_day_leaves_one_row() {
        let store = MemoryLedger::new(vec![vec!["user_id", "period_end"]]);
        let membership = FakeMembership::default();

        let first = approve_subscriber(&store, &membership, 20, &profile(7), d(2025, 1, 15))
            .await
            .unwrap();
        let second = approve_subscriber(&store, &membership, 20, &profile(7), d(2025, 1, 15))
            .await
            .unwrap();

        assert_eq!(first.period_end, second.period_end);
        assert_eq!(second.target, UpsertTarget::Updated(RowId(2)));

        let snapshot = store.read_all().await.unwrap();
        let rows_for_7: Vec<_> = snapshot
            .records()
            .into_iter()
            .filter(|r| r.identity == 7)
            .collect();
        assert_eq!(rows_for_7.len(), 1);
    }

    #[tokio::test]
    async fn test_upsert_overwrites_first_match_only() {
        let store = MemoryLedger::new(vec![
            vec!["user_id", "period_end"],
            vec!["7", "2024-11-20"],
            vec!["9", "2025-06-20"],
            vec!["7", "2024-12-20"],
        ]);
        let membership = FakeMembership::default();

        let outcome = approve_subscriber(&store, &membership, 20, &profile(7), d(2025, 1, 15))
            .await
            .unwrap();
        assert_eq!(outcome.target, UpsertTarget::Updated(RowId(2)));
        assert_eq!(store.cell(2, 2), "2025-02-20");
        // The stale duplicate stays; dedupe owns its removal.
        assert_eq!(store.cell(4, 2), "2024-12-20");
    }

    #[tokio::test]
    async fn test_missing_headers_appended_at_end() {
        let store = MemoryLedger::new(vec![vec!["user_id", "статус"]]);
        let header = ensure_headers(&store).await.unwrap();
        assert_eq!(header[0], "user_id");
        assert_eq!(header[1], "статус");
        assert!(header.contains(&"period_end".to_string()));
        assert!(header.contains(&"in_channel".to_string()));
        assert_eq!(header.len(), 9);
    }

    #[tokio::test]
    async fn test_delivery_failure_keeps_ledger_write() {
        let store = MemoryLedger::new(vec![vec!["user_id", "period_end"]]);
        let membership = FakeMembership::default();
        membership.unreachable.lock().unwrap().insert(7);

        let outcome = approve_subscriber(&store, &membership, 20, &profile(7), d(2025, 1, 15))
            .await
            .unwrap();

        assert!(!outcome.delivered);
        let snapshot = store.read_all().await.unwrap();
        assert_eq!(snapshot.records().len(), 1);
    }
}
