//! SQLite database handle and the operations the bot performs on it.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{Local, NaiveDate, Utc};
use rusqlite::{Connection, OpenFlags, OptionalExtension, params};
use thiserror::Error;
use tracing::{debug, info};

use super::records::{
    ArchivedMessage, ChatLogEntry, DATE_FORMAT, DutyPair, Family, TIMESTAMP_FORMAT, UserLogEntry,
};

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Failed to prepare database directory: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Runs a storage operation on the blocking thread pool.
pub async fn call_blocking<T, F>(db: Arc<Database>, f: F) -> Result<T, StorageError>
where
    T: Send + 'static,
    F: FnOnce(&Database) -> Result<T, StorageError> + Send + 'static,
{
    tokio::task::spawn_blocking(move || f(db.as_ref())).await?
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS homework (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    chat_id INTEGER NOT NULL,
    text TEXT,
    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS ready_homework (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    chat_id INTEGER NOT NULL,
    text TEXT,
    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS schedule (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    chat_id INTEGER NOT NULL,
    text TEXT,
    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS duty (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    chat_id INTEGER NOT NULL,
    user1_id INTEGER,
    user1_name TEXT,
    user2_id INTEGER,
    user2_name TEXT,
    date DATE
);

CREATE TABLE IF NOT EXISTS messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    message_id INTEGER,
    chat_id INTEGER,
    chat_type TEXT,
    user_id INTEGER,
    username TEXT,
    first_name TEXT,
    last_name TEXT,
    phone_number TEXT,
    photo_id TEXT,
    text TEXT,
    date TIMESTAMP,
    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS users (
    user_id INTEGER PRIMARY KEY,
    username TEXT,
    first_name TEXT,
    last_name TEXT,
    phone_number TEXT,
    photo_id TEXT,
    last_seen TIMESTAMP,
    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS chats (
    chat_id INTEGER PRIMARY KEY,
    chat_type TEXT,
    title TEXT,
    username TEXT,
    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
);

CREATE INDEX IF NOT EXISTS idx_homework_chat ON homework(chat_id, created_at);
CREATE INDEX IF NOT EXISTS idx_ready_homework_chat ON ready_homework(chat_id, created_at);
CREATE INDEX IF NOT EXISTS idx_schedule_chat ON schedule(chat_id, created_at);
CREATE INDEX IF NOT EXISTS idx_duty_chat_date ON duty(chat_id, date);
CREATE INDEX IF NOT EXISTS idx_messages_chat_date ON messages(chat_id, date);
CREATE INDEX IF NOT EXISTS idx_messages_user_date ON messages(user_id, date);
";

/// Storage for homework, ready homework, schedule, duty and the message archive.
///
/// Owns a single long-lived connection. Every operation locks it for the
/// duration of its own statements only; the guard is dropped on every return
/// path, including errors.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Opens (or creates) the database file and ensures every table exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or the schema cannot be applied.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
        conn.busy_timeout(Duration::from_secs(5))?;

        info!("Opened database at {}", path.display());
        Self::init(conn)
    }

    /// Opens an existing database file read-only, without creating anything.
    ///
    /// Used by offline readers, which must fail on a mistyped path instead of
    /// exporting from a fresh empty file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file does not exist or cannot be opened.
    pub fn open_existing(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(Duration::from_secs(5))?;

        debug!("Opened database at {} read-only", path.display());
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Opens a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns an error if the schema cannot be applied.
    pub fn open_in_memory() -> Result<Self, StorageError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StorageError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock_conn(&self) -> MutexGuard<'_, Connection> {
        match self.conn.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    // Latest-value families

    /// Appends a new value to a family's log and returns its row id.
    pub fn save_latest(&self, family: Family, chat_id: i64, text: &str) -> Result<i64, StorageError> {
        let conn = self.lock_conn();
        conn.execute(
            &format!(
                "INSERT INTO {} (chat_id, text, created_at) VALUES (?1, ?2, ?3)",
                family.table()
            ),
            params![chat_id, text, now_precise()],
        )?;
        let id = conn.last_insert_rowid();
        debug!("Saved {} #{} for chat {}", family, id, chat_id);
        Ok(id)
    }

    /// Returns the most recently saved value of a family for a chat.
    pub fn get_latest(&self, family: Family, chat_id: i64) -> Result<Option<String>, StorageError> {
        let conn = self.lock_conn();
        let text = conn
            .query_row(
                &format!(
                    "SELECT text FROM {} WHERE chat_id = ?1 \
                     ORDER BY created_at DESC, id DESC LIMIT 1",
                    family.table()
                ),
                params![chat_id],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()?;
        Ok(text.flatten())
    }

    // Duty

    /// Replaces the chat's duty pair with a new one dated today.
    pub fn set_duty(&self, chat_id: i64, first: &str, second: &str) -> Result<(), StorageError> {
        self.set_duty_on(chat_id, first, second, today())
    }

    /// Replaces the chat's duty pair with a new one dated `date`.
    pub fn set_duty_on(
        &self,
        chat_id: i64,
        first: &str,
        second: &str,
        date: NaiveDate,
    ) -> Result<(), StorageError> {
        let conn = self.lock_conn();
        let replaced = conn.execute("DELETE FROM duty WHERE chat_id = ?1", params![chat_id])?;
        conn.execute(
            "INSERT INTO duty (chat_id, user1_id, user1_name, user2_id, user2_name, date) \
             VALUES (?1, 0, ?2, 0, ?3, ?4)",
            params![chat_id, first, second, format_date(date)],
        )?;
        debug!(
            "Duty for chat {} set to {} and {} on {} ({} row(s) replaced)",
            chat_id, first, second, date, replaced
        );
        Ok(())
    }

    /// Returns today's duty pair for a chat.
    pub fn get_duty(&self, chat_id: i64) -> Result<Option<DutyPair>, StorageError> {
        self.get_duty_on(chat_id, today())
    }

    /// Returns the chat's duty pair dated exactly `date`.
    pub fn get_duty_on(&self, chat_id: i64, date: NaiveDate) -> Result<Option<DutyPair>, StorageError> {
        let conn = self.lock_conn();
        let pair = conn
            .query_row(
                "SELECT user1_name, user2_name FROM duty \
                 WHERE chat_id = ?1 AND date = ?2 ORDER BY id DESC LIMIT 1",
                params![chat_id, format_date(date)],
                |row| {
                    Ok(DutyPair {
                        first: row.get::<_, Option<String>>(0)?.unwrap_or_default(),
                        second: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                    })
                },
            )
            .optional()?;
        Ok(pair)
    }

    /// Deletes duty rows dated before today. Returns the number of rows removed.
    pub fn purge_stale_duty(&self) -> Result<usize, StorageError> {
        self.purge_duty_before(today())
    }

    /// Deletes duty rows dated strictly before `date`.
    pub fn purge_duty_before(&self, date: NaiveDate) -> Result<usize, StorageError> {
        let conn = self.lock_conn();
        let removed = conn.execute("DELETE FROM duty WHERE date < ?1", params![format_date(date)])?;
        if removed > 0 {
            info!("Purged {} stale duty row(s) before {}", removed, date);
        }
        Ok(removed)
    }

    // Archive

    /// Refreshes the sender and chat identity rows, then appends the message.
    ///
    /// The three writes are independent statements; a failure part-way leaves
    /// the earlier writes in place.
    pub fn archive_message(&self, message: &ArchivedMessage) -> Result<(), StorageError> {
        let conn = self.lock_conn();

        conn.execute(
            "INSERT OR REPLACE INTO users \
             (user_id, username, first_name, last_name, phone_number, photo_id, last_seen) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                message.user_id,
                message.username,
                message.first_name,
                message.last_name,
                message.phone_number,
                message.photo_id,
                now_precise(),
            ],
        )?;

        conn.execute(
            "INSERT OR REPLACE INTO chats (chat_id, chat_type, title, username) \
             VALUES (?1, ?2, ?3, ?4)",
            params![
                message.chat_id,
                message.chat_kind.as_str(),
                message.chat_title,
                message.chat_username,
            ],
        )?;

        conn.execute(
            "INSERT INTO messages \
             (message_id, chat_id, chat_type, user_id, username, first_name, last_name, \
              phone_number, photo_id, text, date) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                message.message_id,
                message.chat_id,
                message.chat_kind.as_str(),
                message.user_id,
                message.username,
                message.first_name,
                message.last_name,
                message.phone_number,
                message.photo_id,
                message.text,
                message.date.format(TIMESTAMP_FORMAT).to_string(),
            ],
        )?;

        debug!(
            "Archived message {} from user {} in chat {}",
            message.message_id, message.user_id, message.chat_id
        );
        Ok(())
    }

    /// Archived messages of a chat, oldest first, with each sender's current identity.
    ///
    /// Messages whose sender has no `users` row are left out.
    pub fn get_chat_log(&self, chat_id: i64) -> Result<Vec<ChatLogEntry>, StorageError> {
        let conn = self.lock_conn();
        let mut stmt = conn.prepare(
            "SELECT m.date, u.username, u.first_name, u.last_name, m.text \
             FROM messages m \
             JOIN users u ON m.user_id = u.user_id \
             WHERE m.chat_id = ?1 \
             ORDER BY m.date, m.id",
        )?;
        let entries = stmt
            .query_map(params![chat_id], |row| {
                Ok(ChatLogEntry {
                    date: row.get(0)?,
                    username: row.get(1)?,
                    first_name: row.get(2)?,
                    last_name: row.get(3)?,
                    text: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    /// Archived messages of a user across chats, oldest first, with each chat's current title.
    ///
    /// Messages whose chat has no `chats` row are left out.
    pub fn get_user_log(&self, user_id: i64) -> Result<Vec<UserLogEntry>, StorageError> {
        let conn = self.lock_conn();
        let mut stmt = conn.prepare(
            "SELECT m.date, c.title, m.text \
             FROM messages m \
             JOIN chats c ON m.chat_id = c.chat_id \
             WHERE m.user_id = ?1 \
             ORDER BY m.date, m.id",
        )?;
        let entries = stmt
            .query_map(params![user_id], |row| {
                Ok(UserLogEntry {
                    date: row.get(0)?,
                    chat_title: row.get(1)?,
                    text: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    /// Resolves a username (with or without `@`, any case) to the user id last seen with it.
    pub fn find_user_id(&self, username: &str) -> Result<Option<i64>, StorageError> {
        let username = username.trim().trim_start_matches('@');
        if username.is_empty() {
            return Ok(None);
        }

        let conn = self.lock_conn();
        let id = conn
            .query_row(
                "SELECT user_id FROM users WHERE username = ?1 COLLATE NOCASE \
                 ORDER BY last_seen DESC LIMIT 1",
                params![username],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish_non_exhaustive()
    }
}

/// Today's calendar date in the bot's local time zone.
#[must_use]
pub fn today() -> NaiveDate {
    Local::now().date_naive()
}

fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// Current UTC time with milliseconds, for `created_at`/`last_seen` columns.
fn now_precise() -> String {
    Utc::now().format("%Y-%m-%d %H:%M:%S%.3f").to_string()
}

#[cfg(test)]
mod tests {
    use chrono::{Days, TimeZone};

    use super::*;
    use crate::storage::ChatKind;

    fn db() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn message(message_id: i64, chat_id: i64, user_id: i64, text: &str, secs: i64) -> ArchivedMessage {
        ArchivedMessage {
            message_id,
            chat_id,
            chat_kind: ChatKind::Supergroup,
            chat_title: Some("10A".to_owned()),
            chat_username: None,
            user_id,
            username: Some("alice".to_owned()),
            first_name: Some("Alice".to_owned()),
            last_name: None,
            phone_number: None,
            photo_id: None,
            text: text.to_owned(),
            date: Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap(),
        }
    }

    #[test]
    fn test_get_latest_empty() {
        let db = db();
        for family in Family::ALL {
            assert_eq!(db.get_latest(family, 1).unwrap(), None);
        }
    }

    #[test]
    fn test_save_then_get_latest() {
        let db = db();
        db.save_latest(Family::Homework, 1, "Read chapter 5").unwrap();
        assert_eq!(
            db.get_latest(Family::Homework, 1).unwrap().as_deref(),
            Some("Read chapter 5")
        );
    }

    #[test]
    fn test_latest_write_wins() {
        let db = db();
        for i in 1..=5 {
            db.save_latest(Family::Schedule, 7, &format!("v{i}")).unwrap();
        }
        assert_eq!(db.get_latest(Family::Schedule, 7).unwrap().as_deref(), Some("v5"));
    }

    #[test]
    fn test_row_ids_increase() {
        let db = db();
        let a = db.save_latest(Family::Homework, 1, "a").unwrap();
        let b = db.save_latest(Family::Homework, 1, "b").unwrap();
        assert!(b > a);
    }

    #[test]
    fn test_families_and_chats_are_independent() {
        let db = db();
        db.save_latest(Family::Homework, 1, "hw").unwrap();
        db.save_latest(Family::ReadyHomework, 1, "ready").unwrap();
        db.save_latest(Family::Homework, 2, "other chat").unwrap();

        assert_eq!(db.get_latest(Family::Homework, 1).unwrap().as_deref(), Some("hw"));
        assert_eq!(
            db.get_latest(Family::ReadyHomework, 1).unwrap().as_deref(),
            Some("ready")
        );
        assert_eq!(db.get_latest(Family::Schedule, 1).unwrap(), None);
        assert_eq!(
            db.get_latest(Family::Homework, 2).unwrap().as_deref(),
            Some("other chat")
        );
    }

    #[test]
    fn test_set_and_get_duty() {
        let db = db();
        db.set_duty(1, "alice", "bob").unwrap();
        assert_eq!(db.get_duty(1).unwrap(), Some(DutyPair::new("alice", "bob")));
        assert_eq!(db.get_duty(2).unwrap(), None);
    }

    #[test]
    fn test_set_duty_replaces_previous_pair() {
        let db = db();
        db.set_duty(1, "alice", "bob").unwrap();
        db.set_duty(1, "carol", "dave").unwrap();
        assert_eq!(db.get_duty(1).unwrap(), Some(DutyPair::new("carol", "dave")));

        let rows: i64 = db
            .lock_conn()
            .query_row("SELECT COUNT(*) FROM duty WHERE chat_id = 1", [], |r| r.get(0))
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[test]
    fn test_duty_expires_with_date() {
        let db = db();
        let yesterday = today().checked_sub_days(Days::new(1)).unwrap();
        db.set_duty_on(1, "alice", "bob", yesterday).unwrap();

        assert_eq!(db.get_duty(1).unwrap(), None);
        assert_eq!(
            db.get_duty_on(1, yesterday).unwrap(),
            Some(DutyPair::new("alice", "bob"))
        );
    }

    #[test]
    fn test_purge_stale_duty() {
        let db = db();
        let yesterday = today().checked_sub_days(Days::new(1)).unwrap();
        db.set_duty_on(1, "alice", "bob", yesterday).unwrap();
        db.set_duty(2, "carol", "dave").unwrap();

        assert_eq!(db.purge_stale_duty().unwrap(), 1);
        assert_eq!(db.get_duty_on(1, yesterday).unwrap(), None);
        assert_eq!(db.get_duty(2).unwrap(), Some(DutyPair::new("carol", "dave")));
        assert_eq!(db.purge_stale_duty().unwrap(), 0);
    }

    #[test]
    fn test_archive_then_logs() {
        let db = db();
        db.archive_message(&message(10, -100, 42, "hello", 0)).unwrap();

        let chat_log = db.get_chat_log(-100).unwrap();
        assert_eq!(chat_log.len(), 1);
        assert_eq!(chat_log[0].display_name(), "@alice");
        assert_eq!(chat_log[0].text, "hello");
        assert_eq!(chat_log[0].date, "2023-11-14 22:13:20");

        let user_log = db.get_user_log(42).unwrap();
        assert_eq!(user_log.len(), 1);
        assert_eq!(user_log[0].chat_title.as_deref(), Some("10A"));
        assert_eq!(user_log[0].text, "hello");
    }

    #[test]
    fn test_logs_use_current_identity() {
        let db = db();
        db.archive_message(&message(1, -100, 42, "first", 0)).unwrap();

        let mut renamed = message(2, -100, 42, "second", 10);
        renamed.username = Some("alice_new".to_owned());
        renamed.chat_title = Some("11A".to_owned());
        db.archive_message(&renamed).unwrap();

        let chat_log = db.get_chat_log(-100).unwrap();
        assert!(chat_log.iter().all(|e| e.display_name() == "@alice_new"));

        let user_log = db.get_user_log(42).unwrap();
        assert!(user_log.iter().all(|e| e.chat_title.as_deref() == Some("11A")));
    }

    #[test]
    fn test_logs_ordered_by_date() {
        let db = db();
        db.archive_message(&message(3, -100, 42, "third", 30)).unwrap();
        db.archive_message(&message(1, -100, 42, "first", 10)).unwrap();
        db.archive_message(&message(2, -100, 42, "second", 20)).unwrap();

        let texts: Vec<_> = db.get_chat_log(-100).unwrap().into_iter().map(|e| e.text).collect();
        assert_eq!(texts, ["first", "second", "third"]);

        let texts: Vec<_> = db.get_user_log(42).unwrap().into_iter().map(|e| e.text).collect();
        assert_eq!(texts, ["first", "second", "third"]);
    }

    #[test]
    fn test_logs_skip_messages_without_identity() {
        let db = db();
        db.archive_message(&message(1, -100, 42, "known", 0)).unwrap();
        db.lock_conn()
            .execute(
                "INSERT INTO messages (message_id, chat_id, user_id, text, date) \
                 VALUES (2, -100, 99, 'orphan', '2023-11-14 22:13:21')",
                [],
            )
            .unwrap();

        let chat_log = db.get_chat_log(-100).unwrap();
        assert_eq!(chat_log.len(), 1);
        assert_eq!(chat_log[0].text, "known");
    }

    #[test]
    fn test_reads_are_idempotent() {
        let db = db();
        db.save_latest(Family::Homework, 1, "hw").unwrap();
        db.set_duty(1, "alice", "bob").unwrap();
        db.archive_message(&message(1, 1, 42, "hi", 0)).unwrap();

        assert_eq!(db.get_latest(Family::Homework, 1).unwrap(), db.get_latest(Family::Homework, 1).unwrap());
        assert_eq!(db.get_duty(1).unwrap(), db.get_duty(1).unwrap());
        assert_eq!(db.get_chat_log(1).unwrap(), db.get_chat_log(1).unwrap());
        assert_eq!(db.get_user_log(42).unwrap(), db.get_user_log(42).unwrap());
    }

    #[test]
    fn test_find_user_id() {
        let db = db();
        db.archive_message(&message(1, -100, 42, "hi", 0)).unwrap();

        assert_eq!(db.find_user_id("alice").unwrap(), Some(42));
        assert_eq!(db.find_user_id("@Alice").unwrap(), Some(42));
        assert_eq!(db.find_user_id("bob").unwrap(), None);
        assert_eq!(db.find_user_id("@").unwrap(), None);
    }

    #[test]
    fn test_open_file_database() {
        let dir = std::env::temp_dir().join(format!("class_bot_test_{}", std::process::id()));
        let path = dir.join("nested").join("test.db");

        {
            let db = Database::open(&path).unwrap();
            db.save_latest(Family::Homework, 1, "persisted").unwrap();
        }

        let db = Database::open(&path).unwrap();
        assert_eq!(
            db.get_latest(Family::Homework, 1).unwrap().as_deref(),
            Some("persisted")
        );

        drop(db);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_open_existing_missing_file() {
        let dir = std::env::temp_dir().join(format!("class_bot_missing_{}", std::process::id()));
        let path = dir.join("typo.db");

        assert!(Database::open_existing(&path).is_err());
        assert!(!path.exists());
        assert!(!dir.exists());
    }

    #[test]
    fn test_open_existing_reads_but_does_not_write() {
        let dir = std::env::temp_dir().join(format!("class_bot_readonly_{}", std::process::id()));
        let path = dir.join("test.db");

        {
            let db = Database::open(&path).unwrap();
            db.save_latest(Family::Schedule, 1, "Mon: math").unwrap();
        }

        let db = Database::open_existing(&path).unwrap();
        assert_eq!(
            db.get_latest(Family::Schedule, 1).unwrap().as_deref(),
            Some("Mon: math")
        );
        assert!(db.save_latest(Family::Schedule, 1, "Tue: art").is_err());

        drop(db);
        let _ = std::fs::remove_dir_all(dir);
    }
}
