//! Turnstile - subscription gatekeeper for a members-only channel

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};

use turnstile::{
    config::Args,
    engine,
    events,
    ledger::{SheetsClient, SheetsConfig},
    logging,
    membership::ChannelClient,
    server,
    state::AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    logging::init(&args.log_level);

    // Configuration errors are fatal before any handler runs.
    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    info!("======================================");
    info!("  Turnstile - channel gatekeeper");
    info!("======================================");
    info!("Node ID: {}", args.node_id);
    info!("Listen: {}", args.listen);
    info!("Channel: {}", args.channel_id);
    info!("Ledger: {} ({})", args.ledger_sheet_id, args.ledger_tab);
    info!("Period end day: {}", args.period_end_day);
    info!("======================================");

    let store = SheetsClient::new(SheetsConfig {
        base_url: args.ledger_api_base.clone(),
        sheet_id: args.ledger_sheet_id.clone(),
        tab: args.ledger_tab.clone(),
        tab_gid: args.ledger_tab_gid,
        api_key: args.ledger_api_key.clone(),
    })?;
    if let Err(e) = store.ping().await {
        error!("Ledger store unreachable: {}", e);
        std::process::exit(1);
    }

    let channel = Arc::new(ChannelClient::new(
        &args.api_base,
        &args.api_token,
        args.channel_id,
    )?);

    let state = Arc::new(AppState::new(
        args,
        Arc::new(store),
        Arc::clone(&channel) as Arc<dyn turnstile::membership::Membership>,
    ));

    // Make sure every wanted ledger column exists before the first event.
    engine::ensure_headers(state.store.as_ref()).await?;

    // Health probes run beside the dispatch loop.
    let http_state = Arc::clone(&state);
    tokio::spawn(async move {
        if let Err(e) = server::run(http_state).await {
            error!("Health server error: {:?}", e);
        }
    });

    info!("Turnstile started and listening for events");
    if let Err(e) = events::run(state, channel).await {
        error!("Event loop error: {:?}", e);
        std::process::exit(1);
    }

    Ok(())
}
