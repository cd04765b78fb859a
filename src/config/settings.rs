//! Application settings and Telegram configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Telegram API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    /// Telegram API ID (obtain from <https://my.telegram.org>).
    pub api_id: i32,

    /// Telegram API hash (obtain from <https://my.telegram.org>).
    pub api_hash: String,

    /// Bot token issued by `@BotFather`.
    pub bot_token: String,

    /// Path to the session file.
    #[serde(default = "default_session_path")]
    pub session_path: PathBuf,
}

fn default_session_path() -> PathBuf {
    PathBuf::from("class_bot.session")
}

impl TelegramConfig {
    /// Creates a new Telegram configuration.
    #[must_use]
    pub fn new(api_id: i32, api_hash: String, bot_token: String) -> Self {
        Self {
            api_id,
            api_hash,
            bot_token,
            session_path: default_session_path(),
        }
    }

    /// Creates configuration from environment variables.
    ///
    /// Expects `TG_API_ID`, `TG_API_HASH` and `BOT_TOKEN` to be set.
    ///
    /// # Errors
    ///
    /// Returns an error if environment variables are missing or invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_id: i32 = std::env::var("TG_API_ID")
            .map_err(|_| ConfigError::MissingEnvVar("TG_API_ID"))?
            .parse()
            .ok()
            .filter(|id| *id > 0)
            .ok_or(ConfigError::InvalidApiId)?;

        let api_hash = std::env::var("TG_API_HASH")
            .map_err(|_| ConfigError::MissingEnvVar("TG_API_HASH"))?;

        let bot_token =
            std::env::var("BOT_TOKEN").map_err(|_| ConfigError::MissingEnvVar("BOT_TOKEN"))?;

        let session_path = std::env::var("TG_SESSION_PATH").map_or_else(|_| default_session_path(), PathBuf::from);

        Ok(Self {
            api_id,
            api_hash,
            bot_token,
            session_path,
        })
    }
}

/// Bot-specific settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotSettings {
    /// Path to the SQLite database file.
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// User ids treated as admins in private chats.
    #[serde(default)]
    pub admin_ids: Vec<i64>,

    /// Interval between stale duty purges in seconds.
    #[serde(default = "default_duty_purge_interval")]
    pub duty_purge_interval_secs: u64,
}

fn default_database_path() -> PathBuf {
    PathBuf::from("class_bot.db")
}

fn default_duty_purge_interval() -> u64 {
    24 * 60 * 60
}

impl Default for BotSettings {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            admin_ids: Vec::new(),
            duty_purge_interval_secs: default_duty_purge_interval(),
        }
    }
}

impl BotSettings {
    /// Creates bot settings from environment variables with defaults.
    #[must_use]
    pub fn from_env_with_defaults() -> Self {
        Self {
            database_path: std::env::var("DATABASE_PATH").map_or_else(|_| default_database_path(), PathBuf::from),
            admin_ids: std::env::var("ADMIN_IDS")
                .map(|s| parse_admin_ids(&s))
                .unwrap_or_default(),
            duty_purge_interval_secs: std::env::var("DUTY_PURGE_INTERVAL")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|secs| *secs > 0)
                .unwrap_or_else(default_duty_purge_interval),
        }
    }

    /// Whether `user_id` is on the private-chat admin allowlist.
    #[must_use]
    pub fn is_listed_admin(&self, user_id: i64) -> bool {
        self.admin_ids.contains(&user_id)
    }
}

/// Parses a comma-separated list of user ids, skipping invalid entries.
fn parse_admin_ids(raw: &str) -> Vec<i64> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| match s.parse() {
            Ok(id) => Some(id),
            Err(_) => {
                warn!("Ignoring invalid admin id in ADMIN_IDS: {:?}", s);
                None
            }
        })
        .collect()
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(&'static str),

    #[error("Invalid API ID format (must be a positive integer)")]
    InvalidApiId,
}
