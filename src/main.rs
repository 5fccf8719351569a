//! Ledger Bot - Main Entry Point
//!
//! A Telegram bot that tracks team balances and expense claims, running
//! either as a long-polling worker or as a webhook server.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use ledger_bot::commands::UpdateHandler;
use ledger_bot::config::{RunMode, Settings};
use ledger_bot::ledger::{Ledger, ReceiptArchive};
use ledger_bot::telegram::TelegramBot;
use ledger_bot::transport::{self, Dispatcher, PollingMessage, PollingRunner};

/// Telegram bot for team expense and balance bookkeeping.
#[derive(Parser, Debug)]
#[command(name = "ledger_bot")]
#[command(about = "Track team balances and expense claims in Telegram")]
#[command(version)]
struct Args {
    /// Path to the .env file for environment variables.
    #[arg(long, default_value = ".env")]
    env_file: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Force a transport instead of deriving it from WEBHOOK_URL / RENDER.
    #[arg(short, long, value_enum)]
    mode: Option<RunMode>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args.log_level);

    // Load environment variables
    if let Err(e) = dotenvy::from_filename(&args.env_file) {
        debug!("Could not load .env file ({}): {}", args.env_file, e);
    }

    let mut settings = Settings::from_env().context("Failed to load settings from environment")?;
    if let Some(mode) = args.mode {
        settings.mode = mode;
    }
    info!(
        "Roster: {} members, admin @{}",
        settings.roster.len(),
        settings.roster.admin()
    );

    let ledger = Ledger::open(&settings).context("Failed to open the ledger")?;
    info!("Ledger backend: {}", ledger.store().kind());

    let bot = TelegramBot::new(&settings.api_url, &settings.bot_token)
        .context("Failed to create Telegram client")?;
    let me = bot.get_me().await.context("Telegram rejected the bot token")?;
    info!(
        "Authorized as @{}",
        me.username.as_deref().unwrap_or(me.first_name.as_str())
    );

    let bot = Arc::new(bot);
    let receipts = ledger
        .store()
        .supabase()
        .map(|storage| ReceiptArchive::new(Arc::clone(&bot), storage.clone()));
    let handler = UpdateHandler::new(Arc::new(ledger), receipts);
    let dispatcher = Arc::new(Dispatcher::new(handler, Arc::clone(&bot)));

    match settings.mode {
        RunMode::Polling => run_polling(dispatcher).await,
        RunMode::Webhook => run_webhook(&settings, &bot, dispatcher).await,
    }
}

/// Runs the long-polling loop until Ctrl+C.
async fn run_polling(dispatcher: Arc<Dispatcher>) -> Result<()> {
    let (tx, rx) = mpsc::channel::<PollingMessage>(1);
    let mut runner = PollingRunner::new(dispatcher);

    let handle = tokio::spawn(async move {
        runner.run(rx).await;
    });

    info!("Bot is running in polling mode. Use Ctrl+C to stop.");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;

    info!("Received Ctrl+C, shutting down...");
    let _ = tx.send(PollingMessage::Shutdown).await;
    let _ = handle.await;
    Ok(())
}

/// Registers the webhook and serves it until Ctrl+C.
async fn run_webhook(settings: &Settings, bot: &TelegramBot, dispatcher: Arc<Dispatcher>) -> Result<()> {
    match &settings.webhook_url {
        Some(url) => {
            bot.set_webhook(url, settings.webhook_secret.as_deref())
                .await
                .context("Failed to register webhook")?;
            info!("Webhook registered at {}", url);
        }
        None => warn!("WEBHOOK_URL not set; expecting the webhook to be registered externally"),
    }

    let shutdown = async {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down...");
        }
    };

    transport::serve(
        &settings.listen_host,
        settings.listen_port,
        dispatcher,
        settings.webhook_secret.clone(),
        shutdown,
    )
        .await
        .context("Webhook server failed")
}

/// Initializes the logging subsystem.
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
