//! Reminder campaign state
//!
//! Operator-set cutoff date and message template, plus a lazily created
//! campaign join link shared by every recipient of one reminder run. All of
//! it is process-local: a restart clears the campaign.

use chrono::NaiveDate;
use uuid::Uuid;

use crate::broadcast::CAMPAIGN_TTL_SECS;
use crate::membership::Membership;
use crate::types::{Result, TurnstileError};

/// Template used until the operator sets one
pub const DEFAULT_TEMPLATE: &str = "Warning: channel access ends on {cutoff_date} \
({days_left} days left). Renew your subscription and re-apply: {link}";

/// Refresh the cached link this many seconds before it actually expires.
const LINK_REFRESH_MARGIN_SECS: i64 = 60;

/// Mutable campaign state, owned by the shared context object
#[derive(Debug, Clone)]
pub struct ReminderCampaign {
    cutoff_date: Option<NaiveDate>,
    template: String,
    cached_link: Option<String>,
    cached_link_expiry: i64,
}

impl Default for ReminderCampaign {
    fn default() -> Self {
        Self {
            cutoff_date: None,
            template: DEFAULT_TEMPLATE.to_string(),
            cached_link: None,
            cached_link_expiry: 0,
        }
    }
}

impl ReminderCampaign {
    pub fn cutoff_date(&self) -> Option<NaiveDate> {
        self.cutoff_date
    }

    pub fn set_cutoff_date(&mut self, date: NaiveDate) {
        self.cutoff_date = Some(date);
    }

    pub fn set_template(&mut self, template: &str) -> Result<()> {
        let trimmed = template.trim();
        if trimmed.is_empty() {
            return Err(TurnstileError::InvalidInput(
                "reminder template must not be empty".to_string(),
            ));
        }
        self.template = trimmed.to_string();
        Ok(())
    }

    /// Days until the cutoff, never negative
    pub fn days_left(cutoff: NaiveDate, today: NaiveDate) -> i64 {
        (cutoff - today).num_days().max(0)
    }

    /// Render the template for `today` with the given campaign link.
    /// Requires a cutoff date to be set.
    pub fn render(&self, today: NaiveDate, link: &str) -> Result<String> {
        let cutoff = self.cutoff_date.ok_or_else(|| {
            TurnstileError::InvalidInput("set a cutoff date first".to_string())
        })?;
        Ok(self
            .template
            .replace("{cutoff_date}", &cutoff.format("%d.%m.%Y").to_string())
            .replace("{days_left}", &Self::days_left(cutoff, today).to_string())
            .replace("{link}", link))
    }

    /// The campaign join link, created on first use and refreshed once the
    /// cached one is (nearly) expired. One link serves the whole campaign.
    pub async fn ensure_link(
        &mut self,
        membership: &dyn Membership,
        now_ts: i64,
    ) -> Result<String> {
        if let Some(ref link) = self.cached_link {
            if now_ts < self.cached_link_expiry - LINK_REFRESH_MARGIN_SECS {
                return Ok(link.clone());
            }
        }

        let label = format!("campaign-{}", Uuid::new_v4());
        let link = membership
            .create_join_credential(&label, CAMPAIGN_TTL_SECS)
            .await?;
        self.cached_link = Some(link.clone());
        self.cached_link_expiry = now_ts + CAMPAIGN_TTL_SECS;
        Ok(link)
    }
}
