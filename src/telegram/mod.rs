//! Telegram client wrapper module.
//!
//! Connects as a bot account, turns incoming updates into
//! [`IncomingMessage`](crate::commands::IncomingMessage)s and implements
//! [`ChatTransport`](crate::commands::ChatTransport) for replies, log
//! documents and admin lookups.

mod client;
mod rate_limiter;

pub use client::{TelegramBot, TelegramError};
pub use rate_limiter::RateLimiter;
