//! Record types written to and read back from the database.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Format of every stored timestamp. Lexical order equals chronological order.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Format of duty dates.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// One of the "latest value per chat" record families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    /// Homework assignment.
    Homework,
    /// Ready-made homework, an independent series from [`Family::Homework`].
    ReadyHomework,
    /// Lesson schedule.
    Schedule,
}

impl Family {
    /// Every family, in table creation order.
    pub const ALL: [Self; 3] = [Self::Homework, Self::ReadyHomework, Self::Schedule];

    /// Name of the backing table.
    #[must_use]
    pub const fn table(self) -> &'static str {
        match self {
            Self::Homework => "homework",
            Self::ReadyHomework => "ready_homework",
            Self::Schedule => "schedule",
        }
    }

    /// Human-readable name used in replies.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Homework => "Homework",
            Self::ReadyHomework => "Ready homework",
            Self::Schedule => "Schedule",
        }
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table())
    }
}

/// Kind of chat a message was observed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatKind {
    Private,
    Group,
    Supergroup,
    Channel,
}

impl ChatKind {
    /// Value stored in the `chat_type` columns.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Private => "private",
            Self::Group => "group",
            Self::Supergroup => "supergroup",
            Self::Channel => "channel",
        }
    }

    #[must_use]
    pub const fn is_private(self) -> bool {
        matches!(self, Self::Private)
    }
}

impl fmt::Display for ChatKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The two members on duty for a day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DutyPair {
    pub first: String,
    pub second: String,
}

impl DutyPair {
    #[must_use]
    pub fn new(first: impl Into<String>, second: impl Into<String>) -> Self {
        Self {
            first: first.into(),
            second: second.into(),
        }
    }
}

/// Snapshot of a message plus the identity of its sender and chat.
///
/// Written once by [`Database::archive_message`](super::Database::archive_message):
/// the user and chat fields refresh the identity tables, the rest becomes an
/// immutable `messages` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivedMessage {
    pub message_id: i64,
    pub chat_id: i64,
    pub chat_kind: ChatKind,
    pub chat_title: Option<String>,
    pub chat_username: Option<String>,
    pub user_id: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone_number: Option<String>,
    pub photo_id: Option<String>,
    /// Message text, or the caption for media messages.
    pub text: String,
    pub date: DateTime<Utc>,
}

/// One line of a chat log, joined with the sender's current identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatLogEntry {
    pub date: String,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub text: String,
}

impl ChatLogEntry {
    /// `@username` when known, otherwise the full name.
    #[must_use]
    pub fn display_name(&self) -> String {
        match self.username.as_deref().filter(|u| !u.is_empty()) {
            Some(username) => format!("@{username}"),
            None => format!(
                "{} {}",
                self.first_name.as_deref().unwrap_or_default(),
                self.last_name.as_deref().unwrap_or_default()
            )
            .trim()
            .to_owned(),
        }
    }
}

/// One line of a user log, joined with the chat's current identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserLogEntry {
    pub date: String,
    pub chat_title: Option<String>,
    pub text: String,
}

impl UserLogEntry {
    /// Chat title, or a placeholder for chats without one.
    #[must_use]
    pub fn display_chat(&self) -> &str {
        self.chat_title
            .as_deref()
            .filter(|t| !t.is_empty())
            .unwrap_or("private chat")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(username: Option<&str>, first: Option<&str>, last: Option<&str>) -> ChatLogEntry {
        ChatLogEntry {
            date: "2026-01-01 10:00:00".to_owned(),
            username: username.map(str::to_owned),
            first_name: first.map(str::to_owned),
            last_name: last.map(str::to_owned),
            text: "hi".to_owned(),
        }
    }

    #[test]
    fn test_display_name_prefers_username() {
        assert_eq!(
            entry(Some("alice"), Some("Alice"), Some("Smith")).display_name(),
            "@alice"
        );
    }

    #[test]
    fn test_display_name_falls_back_to_full_name() {
        assert_eq!(
            entry(None, Some("Alice"), Some("Smith")).display_name(),
            "Alice Smith"
        );
        assert_eq!(entry(None, Some("Alice"), None).display_name(), "Alice");
        assert_eq!(entry(Some(""), None, Some("Smith")).display_name(), "Smith");
    }

    #[test]
    fn test_family_tables_are_distinct() {
        assert_eq!(Family::Homework.table(), "homework");
        assert_eq!(Family::ReadyHomework.table(), "ready_homework");
        assert_eq!(Family::Schedule.table(), "schedule");
    }

    #[test]
    fn test_user_log_display_chat() {
        let mut e = UserLogEntry {
            date: "2026-01-01 10:00:00".to_owned(),
            chat_title: Some("10A".to_owned()),
            text: "hi".to_owned(),
        };
        assert_eq!(e.display_chat(), "10A");
        e.chat_title = None;
        assert_eq!(e.display_chat(), "private chat");
    }
}
