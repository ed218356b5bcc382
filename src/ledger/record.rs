//! Subscriber rows and cell-level date decoding
//!
//! The store hands back free-text cells; every date is normalized into a
//! [`CellDate`] at this boundary so raw text never reaches comparison logic.

use chrono::{Duration, NaiveDate};
use std::cmp::Ordering;

use crate::ledger::schema::{Field, HeaderMap};
use crate::ledger::store::RowId;

/// Serial day counts are offsets from this epoch (spreadsheet convention).
const SERIAL_EPOCH: (i32, u32, u32) = (1899, 12, 30);

/// Accepted textual date encodings, tried in order.
const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%d.%m.%Y", "%d/%m/%Y"];

/// A date cell as stored in the ledger: either a real date or unknown.
///
/// `Unknown` covers empty and unparseable cells. It compares below every
/// real date, so it never wins "most recent" selection and never grants
/// eligibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellDate {
    Date(NaiveDate),
    Unknown,
}

impl CellDate {
    /// Decode a raw cell into a date. Empty or unparseable values are
    /// `Unknown`; numeric values are treated as serial day counts.
    pub fn parse(raw: &str) -> CellDate {
        let s = raw.trim().replace('\u{00A0}', " ");
        if s.is_empty() {
            return CellDate::Unknown;
        }

        for fmt in DATE_FORMATS {
            if let Ok(date) = NaiveDate::parse_from_str(&s, fmt) {
                return CellDate::Date(date);
            }
        }

        // Serial day count (store export of a date-typed cell)
        if let Ok(serial) = s.parse::<f64>() {
            if serial.is_finite() {
                let (y, m, d) = SERIAL_EPOCH;
                if let Some(epoch) = NaiveDate::from_ymd_opt(y, m, d) {
                    return epoch
                        .checked_add_signed(Duration::days(serial as i64))
                        .map(CellDate::Date)
                        .unwrap_or(CellDate::Unknown);
                }
            }
        }

        CellDate::Unknown
    }

    /// The underlying date, if known
    pub fn known(self) -> Option<NaiveDate> {
        match self {
            CellDate::Date(d) => Some(d),
            CellDate::Unknown => None,
        }
    }

    pub fn is_known(self) -> bool {
        matches!(self, CellDate::Date(_))
    }

    /// ISO rendering for writing back to the store; unknown renders empty.
    pub fn to_cell(self) -> String {
        match self {
            CellDate::Date(d) => d.format("%Y-%m-%d").to_string(),
            CellDate::Unknown => String::new(),
        }
    }
}

impl Ord for CellDate {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (CellDate::Date(a), CellDate::Date(b)) => a.cmp(b),
            (CellDate::Date(_), CellDate::Unknown) => Ordering::Greater,
            (CellDate::Unknown, CellDate::Date(_)) => Ordering::Less,
            (CellDate::Unknown, CellDate::Unknown) => Ordering::Equal,
        }
    }
}

impl PartialOrd for CellDate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Human-friendly rendering for operator notices ("-" when unknown)
pub fn nice_date(date: Option<NaiveDate>) -> String {
    match date {
        Some(d) => d.format("%d.%m.%Y").to_string(),
        None => "-".to_string(),
    }
}

/// One ledger row decoded against the header map of its snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriberRecord {
    pub row: RowId,
    pub identity: i64,
    pub display_name: String,
    pub paid_at: CellDate,
    pub period_end: CellDate,
    pub notified: String,
    pub status: String,
    pub full_name: String,
    pub phone_number: String,
    pub in_channel: String,
}

impl SubscriberRecord {
    /// Decode a raw row. Returns `None` when the identity cell is missing
    /// or not numeric — such rows carry no subscriber and are skipped by
    /// every pass.
    pub fn decode(row: RowId, cells: &[String], map: &HeaderMap) -> Option<Self> {
        let raw_identity = map.cell(cells, Field::Identity)?.trim();
        let identity: i64 = raw_identity.parse().ok()?;

        let text = |field: Field| {
            map.cell(cells, field)
                .map(|s| s.trim().to_string())
                .unwrap_or_default()
        };

        Some(Self {
            row,
            identity,
            display_name: text(Field::DisplayName),
            paid_at: CellDate::parse(&text(Field::PaidAt)),
            period_end: CellDate::parse(&text(Field::PeriodEnd)),
            notified: text(Field::Notified),
            status: text(Field::Status),
            full_name: text(Field::FullName),
            phone_number: text(Field::PhoneNumber),
            in_channel: text(Field::InChannel),
        })
    }

    /// Whether the derived membership column says this row is in the channel
    pub fn marked_in_channel(&self) -> bool {
        self.in_channel.eq_ignore_ascii_case("yes")
    }
}
