//! Class Bot - Main Entry Point
//!
//! A Telegram bot that keeps a class chat's homework, schedule and duty
//! roster, and archives the chat for admins.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use class_bot::commands::CommandHandler;
use class_bot::config::{BotSettings, TelegramConfig};
use class_bot::scheduler::{DutyJanitor, JanitorMessage};
use class_bot::storage::Database;
use class_bot::telegram::TelegramBot;

/// Telegram bot for school class chats.
#[derive(Parser, Debug)]
#[command(name = "class_bot")]
#[command(about = "Homework, schedule and duty roster bot for class chats")]
#[command(version)]
struct Args {
    /// Path to the .env file for environment variables.
    #[arg(long, default_value = ".env")]
    env_file: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Path to the SQLite database (overrides `DATABASE_PATH`).
    #[arg(short, long)]
    database: Option<PathBuf>,
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

    // Load configurations
    let tg_config = TelegramConfig::from_env()
        .context("Failed to load Telegram configuration from environment")?;

    let mut bot_settings = BotSettings::from_env_with_defaults();
    if let Some(path) = args.database {
        bot_settings.database_path = path;
    }

    if bot_settings.admin_ids.is_empty() {
        warn!("ADMIN_IDS is empty: admin commands are unavailable in private chats");
    }

    let db = Arc::new(
        Database::open(&bot_settings.database_path).with_context(|| {
            format!(
                "Failed to open database at {}",
                bot_settings.database_path.display()
            )
        })?,
    );
    info!("Using database {}", bot_settings.database_path.display());

    // Connect to Telegram
    let (bot, mut incoming) = TelegramBot::connect(&tg_config)
        .await
        .context("Failed to connect to Telegram")?;

    let bot_username = bot.username().map(str::to_owned);
    let bot = Arc::new(bot);
    let settings = Arc::new(bot_settings);

    // Create janitor channel
    let (janitor_tx, janitor_rx) = mpsc::channel::<JanitorMessage>(8);

    let janitor = DutyJanitor::new(
        Arc::clone(&db),
        Duration::from_secs(settings.duty_purge_interval_secs),
    );

    let handler = Arc::new(CommandHandler::new(
        Arc::clone(&db),
        Arc::clone(&bot),
        Arc::clone(&settings),
        bot_username,
    ));

    info!("Starting class bot...");

    // Spawn janitor task
    let janitor_handle = tokio::spawn(async move {
        janitor.run(janitor_rx).await;
    });

    info!("Bot is running. Use Ctrl+C to stop.");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down...");
                break;
            }
            message = incoming.recv() => {
                let Some(message) = message else {
                    warn!("Update stream closed, shutting down...");
                    break;
                };

                let handler = Arc::clone(&handler);
                tokio::spawn(async move {
                    handler.handle(&message).await;
                });
            }
        }
    }

    // Cleanup
    info!("Shutting down...");
    let _ = janitor_tx.send(JanitorMessage::Shutdown).await;
    let _ = janitor_handle.await;
    bot.disconnect();

    Ok(())
}

/// Initializes the logging subsystem.
fn init_logging(level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
