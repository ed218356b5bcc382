//! In-memory fakes for the store and membership seams (test builds only)

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use crate::ledger::{CellRange, LedgerSnapshot, LedgerStore, RowId};
use crate::membership::{MemberState, Membership};
use crate::types::{Result, TurnstileError};

/// In-memory tabular store. Row 1 is the header, exactly like the live one.
#[derive(Default)]
pub struct MemoryLedger {
    values: Mutex<Vec<Vec<String>>>,
}

impl MemoryLedger {
    pub fn new(values: Vec<Vec<&str>>) -> Self {
        Self {
            values: Mutex::new(
                values
                    .into_iter()
                    .map(|row| row.into_iter().map(str::to_string).collect())
                    .collect(),
            ),
        }
    }

    pub fn rows(&self) -> Vec<Vec<String>> {
        self.values.lock().unwrap().clone()
    }

    pub fn cell(&self, row: u32, col: usize) -> String {
        let values = self.values.lock().unwrap();
        values
            .get(row as usize - 1)
            .and_then(|r| r.get(col - 1))
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl LedgerStore for MemoryLedger {
    async fn read_header(&self) -> Result<Vec<String>> {
        Ok(self
            .values
            .lock()
            .unwrap()
            .first()
            .cloned()
            .unwrap_or_default())
    }

    async fn read_all(&self) -> Result<LedgerSnapshot> {
        Ok(LedgerSnapshot::from_values(self.values.lock().unwrap().clone()))
    }

    async fn find_rows(&self, needle: &str) -> Result<Vec<RowId>> {
        let values = self.values.lock().unwrap();
        Ok(values
            .iter()
            .enumerate()
            .skip(1)
            .filter(|(_, row)| row.iter().any(|c| c.trim() == needle))
            .map(|(i, _)| RowId(i as u32 + 1))
            .collect())
    }

    async fn write_range(&self, range: CellRange, rows: Vec<Vec<String>>) -> Result<()> {
        let mut values = self.values.lock().unwrap();
        for (offset, row_values) in rows.iter().enumerate() {
            let row_index = (range.start_row as usize - 1) + offset;
            while values.len() <= row_index {
                values.push(Vec::new());
            }
            let row = &mut values[row_index];
            for (col_offset, cell) in row_values.iter().enumerate() {
                let col_index = (range.start_col as usize - 1) + col_offset;
                while row.len() <= col_index {
                    row.push(String::new());
                }
                row[col_index] = cell.clone();
            }
        }
        Ok(())
    }

    async fn append_row(&self, row: Vec<String>) -> Result<()> {
        self.values.lock().unwrap().push(row);
        Ok(())
    }

    async fn delete_rows(&self, from: RowId, to: RowId) -> Result<()> {
        let mut values = self.values.lock().unwrap();
        let start = from.index() as usize - 1;
        let end = (to.index() as usize).min(values.len());
        if start < values.len() {
            values.drain(start..end);
        }
        Ok(())
    }
}

/// Scripted membership fake: per-identity states, recorded side effects.
#[derive(Default)]
pub struct FakeMembership {
    pub states: Mutex<HashMap<i64, MemberState>>,
    pub failing_lookups: Mutex<HashSet<i64>>,
    pub unreachable: Mutex<HashSet<i64>>,
    pub removed: Mutex<Vec<i64>>,
    pub restored: Mutex<Vec<i64>>,
    pub approved: Mutex<Vec<i64>>,
    pub declined: Mutex<Vec<i64>>,
    pub messages: Mutex<Vec<(i64, String)>>,
    pub credentials: Mutex<Vec<String>>,
}

impl FakeMembership {
    pub fn with_states(states: &[(i64, MemberState)]) -> Self {
        let fake = Self::default();
        *fake.states.lock().unwrap() = states.iter().copied().collect();
        fake
    }

    pub fn sent_to(&self) -> Vec<i64> {
        self.messages.lock().unwrap().iter().map(|(id, _)| *id).collect()
    }
}

#[async_trait]
impl Membership for FakeMembership {
    async fn member_state(&self, identity: i64) -> Result<MemberState> {
        if self.failing_lookups.lock().unwrap().contains(&identity) {
            return Err(TurnstileError::Membership("lookup failed".to_string()));
        }
        Ok(self
            .states
            .lock()
            .unwrap()
            .get(&identity)
            .copied()
            .unwrap_or(MemberState::Left))
    }

    async fn member_count(&self) -> Result<u32> {
        Ok(self
            .states
            .lock()
            .unwrap()
            .values()
            .filter(|s| s.is_present())
            .count() as u32)
    }

    async fn create_join_credential(&self, label: &str, _ttl_seconds: i64) -> Result<String> {
        let link = format!("https://chan.example/join/{}", label);
        self.credentials.lock().unwrap().push(label.to_string());
        Ok(link)
    }

    async fn approve_join_request(&self, identity: i64) -> Result<()> {
        self.approved.lock().unwrap().push(identity);
        Ok(())
    }

    async fn decline_join_request(&self, identity: i64) -> Result<()> {
        self.declined.lock().unwrap().push(identity);
        Ok(())
    }

    async fn remove_member(&self, identity: i64) -> Result<()> {
        self.removed.lock().unwrap().push(identity);
        self.states.lock().unwrap().insert(identity, MemberState::Removed);
        Ok(())
    }

    async fn restore_member(&self, identity: i64) -> Result<()> {
        self.restored.lock().unwrap().push(identity);
        self.states.lock().unwrap().insert(identity, MemberState::Left);
        Ok(())
    }

    async fn send_message(&self, identity: i64, text: &str) -> Result<()> {
        if self.unreachable.lock().unwrap().contains(&identity) {
            return Err(TurnstileError::Unreachable(format!("{} blocked", identity)));
        }
        self.messages.lock().unwrap().push((identity, text.to_string()));
        Ok(())
    }
}
