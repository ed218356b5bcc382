//! Single-threaded event loop
//!
//! Long-polls the channel API and handles each inbound event to completion
//! before the next is dequeued, so ledger-mutating operations never overlap
//! in-process. A long pass (audit, broadcast) simply blocks the loop; the
//! mitigation is the fixed pacing inside those passes, not concurrency.

use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::commands;
use crate::engine::{JoinRequest, SubscriberProfile};
use crate::membership::channel::{ChannelClient, Update};
use crate::membership::Sender;
use crate::state::AppState;
use crate::types::Result;

/// Back-off after a failed update poll.
const POLL_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Run the dispatch loop forever
pub async fn run(state: Arc<AppState>, channel: Arc<ChannelClient>) -> Result<()> {
    info!("Event loop started");
    let mut offset: i64 = 0;

    loop {
        let updates = match channel
            .next_updates(offset, state.args.poll_timeout_secs)
            .await
        {
            Ok(updates) => updates,
            Err(e) => {
                warn!(error = %e, "Update poll failed, retrying");
                tokio::time::sleep(POLL_RETRY_DELAY).await;
                continue;
            }
        };

        for update in updates {
            offset = offset.max(update.update_id + 1);
            handle_update(&state, update).await;
        }
    }
}

/// Handle one inbound event to completion
async fn handle_update(state: &AppState, update: Update) {
    if let Some(join) = update.chat_join_request {
        let mut request = JoinRequest::new(join.from.id);
        request
            .decide(state.store.as_ref(), state.membership.as_ref(), state.today())
            .await;
        return;
    }

    if let Some(callback) = update.callback_query {
        remember_sender(state, &callback.from).await;
        if let Some(data) = callback.data.as_deref() {
            if let Some(raw) = data.strip_prefix("approve:") {
                match raw.parse::<i64>() {
                    Ok(identity) => {
                        run_command(
                            state,
                            callback.from.id,
                            commands::OperatorCommand::Approve { identity },
                        )
                        .await;
                    }
                    Err(_) => warn!(data, "Malformed approval callback"),
                }
            }
        }
        return;
    }

    if let Some(message) = update.message {
        let Some(from) = message.from else { return };
        remember_sender(state, &from).await;

        let Some(text) = message.text else { return };
        match commands::parse(&text) {
            Some(Ok(command)) => run_command(state, from.id, command).await,
            Some(Err(e)) => {
                // Known command, malformed arguments: no mutation happened.
                if state.is_operator(from.id) {
                    notify_operator(state, &e.to_string()).await;
                }
            }
            // Conversation text is owned by the UI layer, not this service.
            None => {}
        }
    }
}

/// Cache the sender's profile so a later approval can fill the ledger row
async fn remember_sender(state: &AppState, sender: &Sender) {
    if state.is_operator(sender.id) {
        return;
    }
    state
        .remember_profile(SubscriberProfile {
            identity: sender.id,
            username: sender.username.clone(),
            full_name: sender.full_name(),
        })
        .await;
}

async fn run_command(state: &AppState, issuer: i64, command: commands::OperatorCommand) {
    if let Err(e) = commands::execute(state, issuer, command).await {
        error!(error = %e, "Command failed");
        if state.is_operator(issuer) {
            notify_operator(state, &format!("Command failed: {}", e)).await;
        }
    }
}

async fn notify_operator(state: &AppState, text: &str) {
    if let Err(e) = state
        .membership
        .send_message(state.args.operator_id, text)
        .await
    {
        warn!(error = %e, "Operator notice delivery failed");
    }
}
