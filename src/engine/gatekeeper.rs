//! Join-request gatekeeper
//!
//! One pending access request at a time: `Requested` resolves to `Approved`
//! or `Declined` and stays there. Every ledger row for the identity is
//! consulted — duplicate rows may carry different periods, and any active
//! one grants access. Store or membership failures decline (fail-closed).

use chrono::NaiveDate;
use tracing::{info, warn};

use crate::ledger::LedgerStore;
use crate::membership::Membership;
use crate::policy::is_eligible;

/// Lifecycle of one access request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Requested,
    Approved,
    Declined,
}

/// A pending access request for one identity
#[derive(Debug, Clone, Copy)]
pub struct JoinRequest {
    pub identity: i64,
    state: GateState,
}

impl JoinRequest {
    pub fn new(identity: i64) -> Self {
        Self {
            identity,
            state: GateState::Requested,
        }
    }

    pub fn state(&self) -> GateState {
        self.state
    }

    /// Decide this request against the ledger and notify the membership
    /// system of the verdict. Terminal; repeated calls return the settled
    /// state without re-deciding.
    pub async fn decide(
        &mut self,
        store: &dyn LedgerStore,
        membership: &dyn Membership,
        as_of: NaiveDate,
    ) -> GateState {
        if self.state != GateState::Requested {
            return self.state;
        }

        let eligible = match self.any_row_eligible(store, as_of).await {
            Ok(eligible) => eligible,
            Err(e) => {
                warn!(identity = self.identity, error = %e, "Gate lookup failed, declining");
                false
            }
        };

        if eligible {
            match membership.approve_join_request(self.identity).await {
                Ok(()) => {
                    info!(identity = self.identity, "Join request approved");
                    self.state = GateState::Approved;
                }
                Err(e) => {
                    warn!(identity = self.identity, error = %e, "Approve call failed, declining");
                    self.decline(membership).await;
                }
            }
        } else {
            info!(identity = self.identity, "Join request declined");
            self.decline(membership).await;
        }
        self.state
    }

    async fn decline(&mut self, membership: &dyn Membership) {
        if let Err(e) = membership.decline_join_request(self.identity).await {
            warn!(identity = self.identity, error = %e, "Decline call failed");
        }
        self.state = GateState::Declined;
    }

    /// Whether any ledger row for this identity is active as of `as_of`
    async fn any_row_eligible(
        &self,
        store: &dyn LedgerStore,
        as_of: NaiveDate,
    ) -> crate::types::Result<bool> {
        let snapshot = store.read_all().await?;
        Ok(snapshot
            .records()
            .iter()
            .filter(|r| r.identity == self.identity)
            .any(|r| is_eligible(r.period_end, as_of)))
    }
}
