//! Plain-text rendering of archived logs.

use std::fmt::Write as _;

use crate::storage::{ChatLogEntry, UserLogEntry};

const SEPARATOR_WIDTH: usize = 50;

/// Renders a chat log: a header followed by `[date] name: text` lines.
#[must_use]
pub fn render_chat_log(chat_id: i64, entries: &[ChatLogEntry]) -> String {
    let mut out = header(&format!("Chat log {chat_id}"));
    for entry in entries {
        let _ = writeln!(out, "[{}] {}: {}", entry.date, entry.display_name(), entry.text);
    }
    out
}

/// Renders a user log: a header followed by `[date] chat: text` lines.
#[must_use]
pub fn render_user_log(username: &str, entries: &[UserLogEntry]) -> String {
    let mut out = header(&format!("User log @{}", username.trim_start_matches('@')));
    for entry in entries {
        let _ = writeln!(out, "[{}] {}: {}", entry.date, entry.display_chat(), entry.text);
    }
    out
}

#[must_use]
pub fn chat_log_file_name(chat_id: i64) -> String {
    format!("chat_log_{chat_id}.txt")
}

#[must_use]
pub fn user_log_file_name(username: &str) -> String {
    let safe: String = username
        .trim_start_matches('@')
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    format!("user_log_{safe}.txt")
}

fn header(title: &str) -> String {
    format!("{title}\n{}\n\n", "=".repeat(SEPARATOR_WIDTH))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_chat_log() {
        let entries = vec![
            ChatLogEntry {
                date: "2026-01-01 10:00:00".to_owned(),
                username: Some("alice".to_owned()),
                first_name: Some("Alice".to_owned()),
                last_name: None,
                text: "hi".to_owned(),
            },
            ChatLogEntry {
                date: "2026-01-01 10:01:00".to_owned(),
                username: None,
                first_name: Some("Bob".to_owned()),
                last_name: Some("Stone".to_owned()),
                text: "hello".to_owned(),
            },
        ];

        let text = render_chat_log(-100, &entries);
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines[0], "Chat log -100");
        assert_eq!(lines[1], "=".repeat(50));
        assert_eq!(lines[2], "");
        assert_eq!(lines[3], "[2026-01-01 10:00:00] @alice: hi");
        assert_eq!(lines[4], "[2026-01-01 10:01:00] Bob Stone: hello");
    }

    #[test]
    fn test_render_user_log() {
        let entries = vec![UserLogEntry {
            date: "2026-01-01 10:00:00".to_owned(),
            chat_title: Some("10A".to_owned()),
            text: "hi".to_owned(),
        }];

        let text = render_user_log("@alice", &entries);
        assert!(text.starts_with("User log @alice\n"));
        assert!(text.ends_with("[2026-01-01 10:00:00] 10A: hi\n"));
    }

    #[test]
    fn test_file_names() {
        assert_eq!(chat_log_file_name(-100), "chat_log_-100.txt");
        assert_eq!(user_log_file_name("@alice"), "user_log_alice.txt");
        assert_eq!(user_log_file_name("../x"), "user_log____x.txt");
    }
}
