//! Core engine: upsert, dedupe, reconciliation, gatekeeping

pub mod dedupe;
pub mod gatekeeper;
pub mod reconcile;
pub mod upsert;

pub use dedupe::{coalesce_descending, dedupe, DedupeOutcome};
pub use gatekeeper::{GateState, JoinRequest};
pub use reconcile::{
    audit, clean, purge_duplicates, removal_cutoff, restore_paid_absent, AuditReport,
    CleanOutcome, RestoreOutcome,
};
pub use upsert::{approve_subscriber, ensure_headers, SubscriberProfile, UpsertOutcome, UpsertTarget};
