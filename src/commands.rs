//! Operator command surface
//!
//! Every command is privileged: invocations from anyone but the configured
//! operator are silent no-ops. Malformed arguments are rejected with an
//! `InvalidInput` before any mutation happens; the event loop relays the
//! message back to the operator.

use chrono::{Datelike, NaiveDate};
use tracing::{debug, info};

use crate::broadcast::{self, all_identities, paid_absent, unpaid_before};
use crate::engine::{self, removal_cutoff};
use crate::ledger::nice_date;
use crate::state::AppState;
use crate::types::{Result, TurnstileError};

/// Parsed operator command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperatorCommand {
    Approve { identity: i64 },
    Clean,
    Audit,
    RestorePaidAbsent,
    PurgeDups,
    Broadcast { text: String },
    BroadcastPaidAbsent { text: String },
    BroadcastLink { text: String },
    SetCutoffDate { date: NaiveDate },
    SetReminderTemplate { text: String },
    SetPeriodEndDay { day: u8 },
    RemindUnpaid,
    RemindAll,
}

/// Parse a slash command. `None` means the text is not a command this
/// service owns (and is ignored); `Some(Err)` means a known command with
/// malformed arguments.
pub fn parse(text: &str) -> Option<Result<OperatorCommand>> {
    let text = text.trim();
    let (head, rest) = match text.split_once(char::is_whitespace) {
        Some((head, rest)) => (head, rest.trim()),
        None => (text, ""),
    };
    // Commands may arrive as "/cmd@botname".
    let name = head.strip_prefix('/')?.split('@').next()?;

    let command = match name {
        "approve" => return Some(parse_identity(rest).map(|identity| OperatorCommand::Approve { identity })),
        "clean" => OperatorCommand::Clean,
        "audit" => OperatorCommand::Audit,
        "restore_paid_absent" => OperatorCommand::RestorePaidAbsent,
        "purge_dups" => OperatorCommand::PurgeDups,
        "broadcast" => return Some(parse_text(rest, "/broadcast <text>").map(|text| OperatorCommand::Broadcast { text })),
        "broadcast_paid_absent" => {
            return Some(
                parse_text(rest, "/broadcast_paid_absent <text>")
                    .map(|text| OperatorCommand::BroadcastPaidAbsent { text }),
            )
        }
        "broadcast_link" => {
            return Some(
                parse_text(rest, "/broadcast_link <text>")
                    .map(|text| OperatorCommand::BroadcastLink { text }),
            )
        }
        "set_cutoff_date" => {
            return Some(parse_date(rest).map(|date| OperatorCommand::SetCutoffDate { date }))
        }
        "set_reminder_template" => {
            return Some(
                parse_text(rest, "/set_reminder_template <text>")
                    .map(|text| OperatorCommand::SetReminderTemplate { text }),
            )
        }
        "set_period_end_day" => {
            return Some(parse_day(rest).map(|day| OperatorCommand::SetPeriodEndDay { day }))
        }
        "remind_unpaid" => OperatorCommand::RemindUnpaid,
        "remind_all" => OperatorCommand::RemindAll,
        _ => return None,
    };
    Some(Ok(command))
}

fn parse_identity(rest: &str) -> Result<i64> {
    rest.split_whitespace()
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| TurnstileError::InvalidInput("usage: /approve <identity>".to_string()))
}

fn parse_text(rest: &str, usage: &str) -> Result<String> {
    if rest.is_empty() {
        return Err(TurnstileError::InvalidInput(format!("usage: {}", usage)));
    }
    Ok(rest.to_string())
}

fn parse_date(rest: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(rest.trim(), "%Y-%m-%d").map_err(|_| {
        TurnstileError::InvalidInput("usage: /set_cutoff_date YYYY-MM-DD".to_string())
    })
}

fn parse_day(rest: &str) -> Result<u8> {
    rest.trim()
        .parse()
        .map_err(|_| TurnstileError::InvalidInput("usage: /set_period_end_day <1-28>".to_string()))
}

/// Execute one command on behalf of `issuer`.
///
/// Non-operator issuers are dropped silently. Errors bubble to the event
/// loop, which relays them to the operator.
pub async fn execute(state: &AppState, issuer: i64, command: OperatorCommand) -> Result<()> {
    if !state.is_operator(issuer) {
        debug!(issuer, ?command, "Unauthorized command ignored");
        return Ok(());
    }
    info!(?command, "Operator command");

    let store = state.store.as_ref();
    let membership = state.membership.as_ref();
    let today = state.today();

    match command {
        OperatorCommand::Approve { identity } => {
            let profile = state.profile_for(identity).await;
            let end_day = state.policy.read().await.period_end_day();
            let outcome =
                engine::approve_subscriber(store, membership, end_day, &profile, today).await?;
            let notice = if outcome.delivered {
                format!(
                    "{} approved, access until {}.",
                    profile.display_name(),
                    nice_date(Some(outcome.period_end))
                )
            } else {
                format!(
                    "{} approved (until {}), but the join link could not be delivered.",
                    profile.display_name(),
                    nice_date(Some(outcome.period_end))
                )
            };
            notify_operator(state, &notice).await;
        }

        OperatorCommand::Clean => {
            let outcome = engine::clean(store, membership, removal_cutoff(today)).await?;
            notify_operator(state, &outcome.format_notice()).await;
        }

        OperatorCommand::Audit => {
            let report = engine::audit(store, membership, today).await?;
            notify_operator(state, &report.format_notice()).await;
        }

        OperatorCommand::RestorePaidAbsent => {
            let outcome = engine::restore_paid_absent(store, membership, today).await?;
            notify_operator(state, &outcome.format_notice()).await;
        }

        OperatorCommand::PurgeDups => {
            let deleted = engine::purge_duplicates(store).await?;
            let notice = if deleted == 0 {
                "No duplicate rows found.".to_string()
            } else {
                format!("Duplicate rows deleted: {}.", deleted)
            };
            notify_operator(state, &notice).await;
        }

        OperatorCommand::Broadcast { text } => {
            let snapshot = store.read_all().await?;
            let targets = all_identities(&snapshot);
            let tally = broadcast::dispatch(membership, &targets, |_| text.clone()).await;
            notify_operator(state, &tally.format_notice()).await;
        }

        OperatorCommand::BroadcastPaidAbsent { text } => {
            let snapshot = store.read_all().await?;
            let targets = paid_absent(&snapshot, today);
            let tally = broadcast::dispatch(membership, &targets, |_| text.clone()).await;
            notify_operator(state, &tally.format_notice()).await;
        }

        OperatorCommand::BroadcastLink { text } => {
            let link = {
                let mut campaign = state.campaign.write().await;
                campaign.ensure_link(membership, state.now_ts()).await?
            };
            let snapshot = store.read_all().await?;
            let targets = all_identities(&snapshot);
            let message = format!("{}\n\nJoin link (2 hours): {}", text, link);
            let tally = broadcast::dispatch(membership, &targets, |_| message.clone()).await;
            notify_operator(state, &tally.format_notice()).await;
        }

        OperatorCommand::SetCutoffDate { date } => {
            state.campaign.write().await.set_cutoff_date(date);
            let days = crate::campaign::ReminderCampaign::days_left(date, today);
            notify_operator(
                state,
                &format!("Cutoff date set: {} ({} days left).", date, days),
            )
            .await;
        }

        OperatorCommand::SetReminderTemplate { text } => {
            state.campaign.write().await.set_template(&text)?;
            notify_operator(state, "Reminder template updated.").await;
        }

        OperatorCommand::SetPeriodEndDay { day } => {
            state.policy.write().await.set_period_end_day(day)?;
            notify_operator(
                state,
                &format!("Period end day set: {}. New approvals run until the {}th.", day, day),
            )
            .await;
        }

        OperatorCommand::RemindUnpaid => {
            let (message, link, cutoff) = prepare_reminder(state).await?;
            let snapshot = store.read_all().await?;
            let month_start = cutoff.with_day(1).expect("day 1 is always valid");
            let targets = unpaid_before(&snapshot, month_start);
            let text = format!("{}\n\nJoin link: {}", message, link);
            let tally = broadcast::dispatch(membership, &targets, |_| text.clone()).await;
            notify_operator(state, &tally.format_notice()).await;
        }

        OperatorCommand::RemindAll => {
            let (message, link, _) = prepare_reminder(state).await?;
            let snapshot = store.read_all().await?;
            let targets = all_identities(&snapshot);
            let text = format!("{}\n\nJoin link: {}", message, link);
            let tally = broadcast::dispatch(membership, &targets, |_| text.clone()).await;
            notify_operator(state, &tally.format_notice()).await;
        }
    }
    Ok(())
}

/// Render the campaign message and make sure a shared link exists.
/// Fails with `InvalidInput` when no cutoff date has been set.
async fn prepare_reminder(state: &AppState) -> Result<(String, String, NaiveDate)> {
    let mut campaign = state.campaign.write().await;
    let cutoff = campaign
        .cutoff_date()
        .ok_or_else(|| TurnstileError::InvalidInput("set a cutoff date first: /set_cutoff_date YYYY-MM-DD".to_string()))?;
    let link = campaign
        .ensure_link(state.membership.as_ref(), state.now_ts())
        .await?;
    let message = campaign.render(state.today(), &link)?;
    Ok((message, link, cutoff))
}

async fn notify_operator(state: &AppState, text: &str) {
    if let Err(e) = state
        .membership
        .send_message(state.args.operator_id, text)
        .await
    {
        tracing::warn!(error = %e, "Operator notice delivery failed");
    }
}
