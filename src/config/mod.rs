//! Configuration module for the class bot.
//!
//! Handles loading of Telegram API credentials and bot settings
//! (database location, admin allowlist, maintenance interval) from the environment.

mod settings;

pub use settings::{BotSettings, ConfigError, TelegramConfig};
