//! Bot-API client for the channel membership system
//!
//! Thin reqwest wrapper over the messenger's HTTP bot API. Delivery
//! failures distinguish unreachable recipients (403 — the subscriber
//! blocked the channel bot) from transient transport errors.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use crate::membership::api::{MemberState, Membership};
use crate::types::{Result, TurnstileError};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(40);

/// HTTP client for the channel's bot API
#[derive(Clone)]
pub struct ChannelClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
    channel_id: i64,
}

#[derive(Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Deserialize)]
struct ChatMember {
    status: String,
}

#[derive(Deserialize)]
struct InviteLink {
    invite_link: String,
}

/// One long-poll update from the bot API, reduced to the fields the event
/// loop consumes.
#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<InboundMessage>,
    #[serde(default)]
    pub callback_query: Option<CallbackQuery>,
    #[serde(default)]
    pub chat_join_request: Option<ChatJoinRequest>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InboundMessage {
    pub from: Option<Sender>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackQuery {
    pub from: Sender,
    #[serde(default)]
    pub data: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatJoinRequest {
    pub from: Sender,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Sender {
    pub id: i64,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
}

impl Sender {
    /// Display name assembled the way the ledger stores it
    pub fn full_name(&self) -> String {
        let mut name = self.first_name.clone().unwrap_or_default();
        if let Some(ref last) = self.last_name {
            if !name.is_empty() {
                name.push(' ');
            }
            name.push_str(last);
        }
        name
    }
}

impl ChannelClient {
    pub fn new(base_url: &str, token: &str, channel_id: i64) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| TurnstileError::Config(format!("HTTP client build failed: {}", e)))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            channel_id,
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.base_url, self.token, method)
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, body: Value) -> Result<T> {
        let response = self
            .http
            .post(self.method_url(method))
            .json(&body)
            .send()
            .await
            .map_err(|e| TurnstileError::Transient(format!("{}: {}", method, e)))?;

        let status = response.status();
        if status == StatusCode::FORBIDDEN {
            return Err(TurnstileError::Unreachable(format!(
                "{} returned 403",
                method
            )));
        }

        let parsed: ApiResponse<T> = response
            .json()
            .await
            .map_err(|e| TurnstileError::Transient(format!("{}: {}", method, e)))?;

        if !parsed.ok {
            let description = parsed.description.unwrap_or_else(|| "unknown".to_string());
            return Err(TurnstileError::Membership(format!(
                "{} failed: {}",
                method, description
            )));
        }

        parsed.result.ok_or_else(|| {
            TurnstileError::Membership(format!("{} returned no result", method))
        })
    }

    /// Long-poll for inbound updates past `offset`
    pub async fn next_updates(&self, offset: i64, timeout_secs: u64) -> Result<Vec<Update>> {
        self.call(
            "getUpdates",
            json!({
                "offset": offset,
                "timeout": timeout_secs,
                "allowed_updates": ["message", "callback_query", "chat_join_request"],
            }),
        )
        .await
    }
}

#[async_trait]
impl Membership for ChannelClient {
    async fn member_state(&self, identity: i64) -> Result<MemberState> {
        let member: ChatMember = self
            .call(
                "getChatMember",
                json!({ "chat_id": self.channel_id, "user_id": identity }),
            )
            .await?;

        let state = match member.status.as_str() {
            "creator" => MemberState::Owner,
            "administrator" => MemberState::Admin,
            "member" | "restricted" => MemberState::Member,
            "left" => MemberState::Left,
            "kicked" => MemberState::Removed,
            other => {
                return Err(TurnstileError::Membership(format!(
                    "unknown member status '{}'",
                    other
                )))
            }
        };
        debug!(identity, ?state, "Membership lookup");
        Ok(state)
    }

    async fn member_count(&self) -> Result<u32> {
        self.call(
            "getChatMemberCount",
            json!({ "chat_id": self.channel_id }),
        )
        .await
    }

    async fn create_join_credential(&self, label: &str, ttl_seconds: i64) -> Result<String> {
        let expire = chrono::Utc::now().timestamp() + ttl_seconds;
        let link: InviteLink = self
            .call(
                "createChatInviteLink",
                json!({
                    "chat_id": self.channel_id,
                    "creates_join_request": true,
                    "expire_date": expire,
                    "name": label,
                }),
            )
            .await?;
        Ok(link.invite_link)
    }

    async fn approve_join_request(&self, identity: i64) -> Result<()> {
        let _: bool = self
            .call(
                "approveChatJoinRequest",
                json!({ "chat_id": self.channel_id, "user_id": identity }),
            )
            .await?;
        Ok(())
    }

    async fn decline_join_request(&self, identity: i64) -> Result<()> {
        let _: bool = self
            .call(
                "declineChatJoinRequest",
                json!({ "chat_id": self.channel_id, "user_id": identity }),
            )
            .await?;
        Ok(())
    }

    async fn remove_member(&self, identity: i64) -> Result<()> {
        let _: bool = self
            .call(
                "banChatMember",
                json!({ "chat_id": self.channel_id, "user_id": identity }),
            )
            .await?;
        Ok(())
    }

    async fn restore_member(&self, identity: i64) -> Result<()> {
        let _: bool = self
            .call(
                "unbanChatMember",
                json!({ "chat_id": self.channel_id, "user_id": identity }),
            )
            .await?;
        Ok(())
    }

    async fn send_message(&self, identity: i64, text: &str) -> Result<()> {
        let _: Value = self
            .call(
                "sendMessage",
                json!({
                    "chat_id": identity,
                    "text": text,
                    "disable_web_page_preview": true,
                }),
            )
            .await?;
        Ok(())
    }
}
