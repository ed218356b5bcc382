//! Membership system seam
//!
//! Everything the engine needs from the live channel: membership lookups,
//! time-boxed join credentials, join-request verdicts, removal/restore, and
//! message delivery. Kept behind a trait so passes run against in-memory
//! fakes in tests.

use async_trait::async_trait;

use crate::types::Result;

/// Live membership state of one identity within the channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberState {
    Owner,
    Admin,
    Member,
    Left,
    Removed,
}

impl MemberState {
    /// Present = active member of the channel (owner and admins included)
    pub fn is_present(self) -> bool {
        matches!(self, MemberState::Owner | MemberState::Admin | MemberState::Member)
    }

    /// States the removal pass must never act on: privileged identities and
    /// identities already gone.
    pub fn skip_removal(self) -> bool {
        matches!(
            self,
            MemberState::Owner | MemberState::Admin | MemberState::Left | MemberState::Removed
        )
    }
}

/// The channel membership system, as consumed by the engine
#[async_trait]
pub trait Membership: Send + Sync {
    /// Live membership state of `identity`
    async fn member_state(&self, identity: i64) -> Result<MemberState>;

    /// Current channel member count
    async fn member_count(&self) -> Result<u32>;

    /// Create a time-boxed join-request credential. The returned link admits
    /// via request only; the gatekeeper still decides each request.
    async fn create_join_credential(&self, label: &str, ttl_seconds: i64) -> Result<String>;

    /// Admit a pending join request
    async fn approve_join_request(&self, identity: i64) -> Result<()>;

    /// Refuse a pending join request
    async fn decline_join_request(&self, identity: i64) -> Result<()>;

    /// Remove `identity` from the channel (block)
    async fn remove_member(&self, identity: i64) -> Result<()>;

    /// Reverse a block so the identity can re-request access
    async fn restore_member(&self, identity: i64) -> Result<()>;

    /// Deliver a direct message to `identity`
    async fn send_message(&self, identity: i64, text: &str) -> Result<()>;
}
