//! Shared application state
//!
//! One context object passed into every handler invocation. The mutable
//! pieces (policy, campaign, pending profiles) sit behind `RwLock`s with an
//! update-in-place contract: handlers take the lock, mutate, release —
//! never cache across awaits.

use chrono::{NaiveDate, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;

use crate::campaign::ReminderCampaign;
use crate::config::Args;
use crate::engine::SubscriberProfile;
use crate::ledger::LedgerStore;
use crate::membership::Membership;
use crate::policy::SubscriptionPolicy;

/// Shared application state
pub struct AppState {
    pub args: Args,
    pub store: Arc<dyn LedgerStore>,
    pub membership: Arc<dyn Membership>,
    /// Runtime-adjustable subscription policy
    pub policy: RwLock<SubscriptionPolicy>,
    /// Reminder campaign state, reset on restart
    pub campaign: RwLock<ReminderCampaign>,
    /// Profiles of subscribers awaiting approval, keyed by identity
    pub pending: RwLock<HashMap<i64, SubscriberProfile>>,
    started: Instant,
}

impl AppState {
    pub fn new(
        args: Args,
        store: Arc<dyn LedgerStore>,
        membership: Arc<dyn Membership>,
    ) -> Self {
        let mut policy = SubscriptionPolicy::default();
        // Args are validated before AppState exists; the day is in range.
        policy
            .set_period_end_day(args.period_end_day)
            .expect("validated period end day");

        Self {
            args,
            store,
            membership,
            policy: RwLock::new(policy),
            campaign: RwLock::new(ReminderCampaign::default()),
            pending: RwLock::new(HashMap::new()),
            started: Instant::now(),
        }
    }

    /// Whether `identity` is the single authorized operator
    pub fn is_operator(&self, identity: i64) -> bool {
        identity == self.args.operator_id
    }

    /// Today's date (UTC)
    pub fn today(&self) -> NaiveDate {
        Utc::now().date_naive()
    }

    /// Current unix timestamp
    pub fn now_ts(&self) -> i64 {
        Utc::now().timestamp()
    }

    /// Seconds since process start
    pub fn uptime_secs(&self) -> u64 {
        self.started.elapsed().as_secs()
    }

    /// Remember a subscriber profile seen in conversation, for later upsert
    pub async fn remember_profile(&self, profile: SubscriberProfile) {
        self.pending.write().await.insert(profile.identity, profile);
    }

    /// Profile for `identity`, falling back to an identity-only stub
    pub async fn profile_for(&self, identity: i64) -> SubscriberProfile {
        self.pending
            .read()
            .await
            .get(&identity)
            .cloned()
            .unwrap_or(SubscriberProfile {
                identity,
                ..SubscriberProfile::default()
            })
    }
}
