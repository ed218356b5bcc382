//! Turnstile - subscription gatekeeper for a members-only channel
//!
//! Turnstile keeps a tabular subscription ledger consistent with the actual
//! membership of a restricted channel, and decides who gets in.
//!
//! ## Services
//!
//! - **Gatekeeper**: approves or declines pending join requests from the
//!   ledger's eligibility windows
//! - **Upsert**: turns approved payments into exactly one ledger row plus a
//!   time-boxed join credential
//! - **Reconciliation**: audit, expired-member removal, paid-but-absent
//!   restore, duplicate-row purge
//! - **Broadcast**: rate-limited message fan-out over ledger-derived
//!   segments

pub mod broadcast;
pub mod campaign;
pub mod commands;
pub mod config;
pub mod engine;
pub mod events;
pub mod ledger;
pub mod logging;
pub mod membership;
pub mod policy;
pub mod server;
pub mod state;
pub mod types;

#[cfg(test)]
pub(crate) mod testkit;

pub use config::Args;
pub use state::AppState;
pub use types::{Result, TurnstileError};
