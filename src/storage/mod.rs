//! Persistence module.
//!
//! Durable storage for the three "latest value per chat" families
//! (homework, ready homework, schedule), the daily duty pair, and the
//! append-only message archive with its user and chat identity tables.

mod database;
mod records;

pub use database::{Database, StorageError, call_blocking, today};
pub use records::{ArchivedMessage, ChatKind, ChatLogEntry, DutyPair, Family, UserLogEntry};
