//! HTTP client for the spreadsheet-backed ledger
//!
//! Talks to a Sheets-style values API: ranged reads/writes in A1 notation,
//! row append, and dimension deletion via batch update. Read failures map to
//! `StoreRead`, mutations to `StoreWrite`.

use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info};

use crate::ledger::store::{CellRange, LedgerSnapshot, LedgerStore, RowId};
use crate::types::{Result, TurnstileError};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

/// Configuration for the spreadsheet ledger client
#[derive(Debug, Clone)]
pub struct SheetsConfig {
    /// API base URL, e.g. `https://sheets.googleapis.com`
    pub base_url: String,
    /// Spreadsheet identifier
    pub sheet_id: String,
    /// Worksheet (tab) title
    pub tab: String,
    /// Numeric worksheet id, required by row-deletion requests
    pub tab_gid: i64,
    /// Optional API key appended to every request
    pub api_key: Option<String>,
}

/// Spreadsheet-backed [`LedgerStore`] implementation
#[derive(Clone)]
pub struct SheetsClient {
    http: reqwest::Client,
    config: SheetsConfig,
}

#[derive(Deserialize)]
struct ValuesResponse {
    #[serde(default)]
    values: Vec<Vec<String>>,
}

impl SheetsClient {
    pub fn new(config: SheetsConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| TurnstileError::Config(format!("HTTP client build failed: {}", e)))?;
        Ok(Self { http, config })
    }

    /// Verify the spreadsheet is reachable. Called once at startup.
    pub async fn ping(&self) -> Result<()> {
        let header = self.read_header().await?;
        info!(
            sheet = %self.config.sheet_id,
            tab = %self.config.tab,
            columns = header.len(),
            "Ledger store reachable"
        );
        Ok(())
    }

    fn values_url(&self, range: &str) -> String {
        let mut url = format!(
            "{}/v4/spreadsheets/{}/values/{}",
            self.config.base_url, self.config.sheet_id, range
        );
        if let Some(ref key) = self.config.api_key {
            url.push_str(&format!("?key={}", key));
        }
        url
    }

    fn batch_update_url(&self) -> String {
        let mut url = format!(
            "{}/v4/spreadsheets/{}:batchUpdate",
            self.config.base_url, self.config.sheet_id
        );
        if let Some(ref key) = self.config.api_key {
            url.push_str(&format!("?key={}", key));
        }
        url
    }

    async fn get_values(&self, range: &str) -> Result<Vec<Vec<String>>> {
        let response = self
            .http
            .get(self.values_url(range))
            .send()
            .await
            .map_err(|e| TurnstileError::StoreRead(e.to_string()))?;

        if !response.status().is_success() {
            return Err(TurnstileError::StoreRead(format!(
                "GET {} returned {}",
                range,
                response.status()
            )));
        }

        let body: ValuesResponse = response
            .json()
            .await
            .map_err(|e| TurnstileError::StoreRead(e.to_string()))?;
        Ok(body.values)
    }
}

#[async_trait::async_trait]
impl LedgerStore for SheetsClient {
    async fn read_header(&self) -> Result<Vec<String>> {
        let range = format!("{}!1:1", self.config.tab);
        let mut values = self.get_values(&range).await?;
        let header = values.drain(..).next().unwrap_or_default();
        Ok(header)
    }

    async fn read_all(&self) -> Result<LedgerSnapshot> {
        let values = self.get_values(&self.config.tab).await?;
        let snapshot = LedgerSnapshot::from_values(values);
        debug!(rows = snapshot.rows.len(), "Ledger snapshot read");
        Ok(snapshot)
    }

    async fn find_rows(&self, needle: &str) -> Result<Vec<RowId>> {
        // The values API has no server-side search; scan a fresh snapshot
        // for exact raw-text cell matches.
        let snapshot = self.read_all().await?;
        Ok(snapshot
            .rows
            .iter()
            .filter(|row| row.cells.iter().any(|c| c.trim() == needle))
            .map(|row| row.id)
            .collect())
    }

    async fn write_range(&self, range: CellRange, values: Vec<Vec<String>>) -> Result<()> {
        let a1 = format!(
            "{}!{}{}:{}{}",
            self.config.tab,
            col_to_a1(range.start_col),
            range.start_row,
            col_to_a1(range.end_col),
            range.end_row
        );
        let mut url = self.values_url(&a1);
        url.push_str(if url.contains('?') { "&" } else { "?" });
        url.push_str("valueInputOption=USER_ENTERED");

        let response = self
            .http
            .put(url)
            .json(&json!({ "values": values }))
            .send()
            .await
            .map_err(|e| TurnstileError::StoreWrite(e.to_string()))?;

        if !response.status().is_success() {
            return Err(TurnstileError::StoreWrite(format!(
                "PUT {} returned {}",
                a1,
                response.status()
            )));
        }
        Ok(())
    }

    async fn append_row(&self, values: Vec<String>) -> Result<()> {
        let mut url = self.values_url(&format!("{}:append", self.config.tab));
        url.push_str(if url.contains('?') { "&" } else { "?" });
        url.push_str("valueInputOption=USER_ENTERED");

        let response = self
            .http
            .post(url)
            .json(&json!({ "values": [values] }))
            .send()
            .await
            .map_err(|e| TurnstileError::StoreWrite(e.to_string()))?;

        if !response.status().is_success() {
            return Err(TurnstileError::StoreWrite(format!(
                "append returned {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn delete_rows(&self, from: RowId, to: RowId) -> Result<()> {
        // deleteDimension takes a 0-based half-open index range.
        let body = json!({
            "requests": [{
                "deleteDimension": {
                    "range": {
                        "sheetId": self.config.tab_gid,
                        "dimension": "ROWS",
                        "startIndex": from.index() - 1,
                        "endIndex": to.index(),
                    }
                }
            }]
        });

        let response = self
            .http
            .post(self.batch_update_url())
            .json(&body)
            .send()
            .await
            .map_err(|e| TurnstileError::StoreWrite(e.to_string()))?;

        if !response.status().is_success() {
            return Err(TurnstileError::StoreWrite(format!(
                "delete rows {}-{} returned {}",
                from,
                to,
                response.status()
            )));
        }
        debug!(%from, %to, "Deleted ledger rows");
        Ok(())
    }
}

/// Render a 1-based column number in A1 letters (1 -> A, 27 -> AA)
fn col_to_a1(mut col: u32) -> String {
    let mut letters = Vec::new();
    while col > 0 {
        let rem = ((col - 1) % 26) as u8;
        letters.push(b'A' + rem);
        col = (col - 1) / 26;
    }
    letters.reverse();
    String::from_utf8(letters).expect("ASCII letters")
}
