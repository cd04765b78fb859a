//! Class Bot Library
//!
//! A Telegram bot for school class group chats.
//!
//! This crate provides the core functionality for:
//! - Posting and fetching homework, ready homework and the schedule
//! - Tracking today's pair of students on duty
//! - Archiving chat messages and exporting them as text logs
//! - Connecting to Telegram via `MTProto` as a bot account

pub mod commands;
pub mod config;
pub mod scheduler;
pub mod storage;
pub mod telegram;
