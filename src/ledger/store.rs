//! Ledger store access trait
//!
//! The ledger is an external tabular store with no multi-row transactions:
//! each call is consistent only at the moment it executes. Callers snapshot
//! the full ledger, decide in memory, then batch-apply — and never hold a
//! [`RowId`] across a mutation, since deletions renumber subsequent rows.

use async_trait::async_trait;
use std::fmt;

use crate::ledger::record::SubscriberRecord;
use crate::ledger::schema::HeaderMap;
use crate::types::Result;

/// Row 1 holds headers; data starts here.
pub const FIRST_DATA_ROW: u32 = 2;

/// Opaque 1-based row address within one ledger snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RowId(pub u32);

impl RowId {
    pub fn index(self) -> u32 {
        self.0
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A rectangular cell range, 1-based inclusive on both axes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellRange {
    pub start_row: u32,
    pub start_col: u32,
    pub end_row: u32,
    pub end_col: u32,
}

impl CellRange {
    /// A full-width row range
    pub fn row(row: RowId, width: usize) -> Self {
        Self {
            start_row: row.0,
            start_col: 1,
            end_row: row.0,
            end_col: width.max(1) as u32,
        }
    }

    /// A single-column vertical range
    pub fn column(col: usize, from_row: u32, to_row: u32) -> Self {
        Self {
            start_row: from_row,
            start_col: col as u32,
            end_row: to_row,
            end_col: col as u32,
        }
    }
}

/// One data row of a snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataRow {
    pub id: RowId,
    pub cells: Vec<String>,
}

/// Full-ledger snapshot: the header plus every data row, read in one call
#[derive(Debug, Clone, Default)]
pub struct LedgerSnapshot {
    pub header: Vec<String>,
    pub rows: Vec<DataRow>,
}

impl LedgerSnapshot {
    /// Build from raw sheet values (first row is the header)
    pub fn from_values(mut values: Vec<Vec<String>>) -> Self {
        if values.is_empty() {
            return Self::default();
        }
        let header = values.remove(0);
        let rows = values
            .into_iter()
            .enumerate()
            .map(|(i, cells)| DataRow {
                id: RowId(FIRST_DATA_ROW + i as u32),
                cells,
            })
            .collect();
        Self { header, rows }
    }

    /// Header map resolved for this snapshot
    pub fn header_map(&self) -> HeaderMap {
        HeaderMap::resolve(&self.header)
    }

    /// Decode every row that carries a numeric identity
    pub fn records(&self) -> Vec<SubscriberRecord> {
        let map = self.header_map();
        self.rows
            .iter()
            .filter_map(|row| SubscriberRecord::decode(row.id, &row.cells, &map))
            .collect()
    }

    /// Absolute row number of the last data row (the header row when empty)
    pub fn last_row(&self) -> u32 {
        self.rows
            .last()
            .map(|r| r.id.index())
            .unwrap_or(FIRST_DATA_ROW - 1)
    }
}

/// Row-oriented tabular storage behind the reconciliation engine.
///
/// No transactions: callers must snapshot-then-decide-then-batch-apply.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Read the header row (row 1)
    async fn read_header(&self) -> Result<Vec<String>>;

    /// Snapshot the full ledger (header + data rows)
    async fn read_all(&self) -> Result<LedgerSnapshot>;

    /// Rows containing a cell whose raw stored text equals `needle` exactly
    async fn find_rows(&self, needle: &str) -> Result<Vec<RowId>>;

    /// Overwrite a rectangular range with `values` (row-major)
    async fn write_range(&self, range: CellRange, values: Vec<Vec<String>>) -> Result<()>;

    /// Append a new data row after the last non-empty row
    async fn append_row(&self, values: Vec<String>) -> Result<()>;

    /// Delete the contiguous rows `from..=to` (inclusive, `from <= to`).
    /// Rows below the range shift up afterwards.
    async fn delete_rows(&self, from: RowId, to: RowId) -> Result<()>;
}
