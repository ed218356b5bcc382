//! Ledger access: store trait, spreadsheet client, schema, and row decoding

pub mod record;
pub mod schema;
pub mod sheets;
pub mod store;

pub use record::{nice_date, CellDate, SubscriberRecord};
pub use schema::{missing_headers, Field, HeaderMap};
pub use sheets::{SheetsClient, SheetsConfig};
pub use store::{CellRange, DataRow, LedgerSnapshot, LedgerStore, RowId, FIRST_DATA_ROW};
