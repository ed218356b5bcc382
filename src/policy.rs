//! Subscription policy and eligibility evaluation
//!
//! Pure date arithmetic — no store or network access. The policy's
//! `period_end_day` is operator-adjustable at runtime; the evaluator is the
//! single place that decides whether a recorded period still grants access.

use chrono::{Datelike, NaiveDate};

use crate::ledger::CellDate;
use crate::types::{Result, TurnstileError};

/// Day-of-month bounds for period ends. Capped at 28 so every month is valid.
pub const MIN_END_DAY: u8 = 1;
pub const MAX_END_DAY: u8 = 28;

/// Default period end day when the operator never set one.
pub const DEFAULT_END_DAY: u8 = 20;

/// Runtime-adjustable subscription policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionPolicy {
    period_end_day: u8,
}

impl Default for SubscriptionPolicy {
    fn default() -> Self {
        Self {
            period_end_day: DEFAULT_END_DAY,
        }
    }
}

impl SubscriptionPolicy {
    /// Current period end day (always within [1, 28])
    pub fn period_end_day(&self) -> u8 {
        self.period_end_day
    }

    /// Set the period end day. Rejects values outside [1, 28].
    pub fn set_period_end_day(&mut self, day: u8) -> Result<()> {
        if !(MIN_END_DAY..=MAX_END_DAY).contains(&day) {
            return Err(TurnstileError::InvalidInput(format!(
                "period end day must be within {}-{}, got {}",
                MIN_END_DAY, MAX_END_DAY, day
            )));
        }
        self.period_end_day = day;
        Ok(())
    }

    /// Period end for a payment recorded on `today`
    pub fn next_period_end(&self, today: NaiveDate) -> NaiveDate {
        compute_end_date(today, self.period_end_day)
    }
}

/// Compute the period end for a reference date: day `end_day` of the month
/// after `today`, rolling into January of the next year after December.
/// `end_day` is clamped to [1, 28] so short months never produce an invalid
/// date.
pub fn compute_end_date(today: NaiveDate, end_day: u8) -> NaiveDate {
    let end_day = end_day.clamp(MIN_END_DAY, MAX_END_DAY);

    let (year, month) = if today.month() == 12 {
        (today.year() + 1, 1)
    } else {
        (today.year(), today.month() + 1)
    };

    // Safe: day is within [1, 28], valid for every month.
    NaiveDate::from_ymd_opt(year, month, u32::from(end_day))
        .expect("day within 1-28 is valid for every month")
}

/// A subscriber is eligible iff the recorded period end is a known date on
/// or after `as_of`. Unknown dates never grant access.
pub fn is_eligible(period_end: CellDate, as_of: NaiveDate) -> bool {
    match period_end {
        CellDate::Date(end) => end >= as_of,
        CellDate::Unknown => false,
    }
}
