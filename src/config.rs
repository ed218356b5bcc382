//! Configuration for Turnstile
//!
//! CLI arguments and environment variable handling using clap.

use clap::Parser;
use std::net::SocketAddr;
use uuid::Uuid;

/// Turnstile - subscription gatekeeper for a members-only channel
#[derive(Parser, Debug, Clone)]
#[command(name = "turnstile")]
#[command(about = "Subscription ledger reconciliation and channel access control")]
pub struct Args {
    /// Unique node identifier for this instance
    #[arg(long, env = "NODE_ID", default_value_t = Uuid::new_v4())]
    pub node_id: Uuid,

    /// Address to listen on for health probes
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    /// Bot API token for the channel membership system
    #[arg(long, env = "API_TOKEN")]
    pub api_token: String,

    /// Base URL of the channel membership API
    #[arg(long, env = "API_BASE", default_value = "https://api.telegram.org")]
    pub api_base: String,

    /// Identity of the managed channel (supergroup/channel id)
    #[arg(long, env = "CHANNEL_ID", allow_hyphen_values = true)]
    pub channel_id: i64,

    /// Identity of the single authorized operator
    #[arg(long, env = "OPERATOR_ID", allow_hyphen_values = true)]
    pub operator_id: i64,

    /// Base URL of the tabular ledger store API
    #[arg(long, env = "LEDGER_API_BASE", default_value = "https://sheets.googleapis.com")]
    pub ledger_api_base: String,

    /// Spreadsheet identifier holding the subscriber ledger
    #[arg(long, env = "LEDGER_SHEET_ID")]
    pub ledger_sheet_id: String,

    /// Worksheet (tab) title within the spreadsheet
    #[arg(long, env = "LEDGER_TAB", default_value = "Sheet1")]
    pub ledger_tab: String,

    /// Numeric worksheet id used by row-deletion batch requests
    #[arg(long, env = "LEDGER_TAB_GID", default_value = "0")]
    pub ledger_tab_gid: i64,

    /// API key for the ledger store (optional when ambient credentials exist)
    #[arg(long, env = "LEDGER_API_KEY")]
    pub ledger_api_key: Option<String>,

    /// Default day-of-month on which subscription periods end (1-28)
    #[arg(long, env = "PERIOD_END_DAY", default_value = "20")]
    pub period_end_day: u8,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Long-poll timeout for inbound channel events, in seconds
    #[arg(long, env = "POLL_TIMEOUT_SECS", default_value = "30")]
    pub poll_timeout_secs: u64,
}

impl Args {
    /// Validate configuration. Errors here are fatal at startup.
    pub fn validate(&self) -> Result<(), String> {
        if self.api_token.trim().is_empty() {
            return Err("API_TOKEN must not be empty".to_string());
        }
        if self.ledger_sheet_id.trim().is_empty() {
            return Err("LEDGER_SHEET_ID must not be empty".to_string());
        }
        if !(1..=28).contains(&self.period_end_day) {
            return Err("PERIOD_END_DAY must be within 1-28".to_string());
        }
        Ok(())
    }
}
