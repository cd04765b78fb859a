//! Standalone exporter for archived chat and user logs.
//!
//! Reads the bot's SQLite database directly and prints a chat or user log as
//! plain text (the same layout the bot sends) or as JSON.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};

// Import from the main crate
use class_bot::commands::{render_chat_log, render_user_log};
use class_bot::storage::Database;

/// Archived log exporter.
#[derive(Parser, Debug)]
#[command(name = "class_bot_export")]
#[command(about = "Exports archived chat or user logs from the class bot database")]
#[command(version)]
struct Args {
    /// Path to the SQLite database.
    #[arg(short, long, default_value = "class_bot.db")]
    database: PathBuf,

    /// Export the log of this chat id.
    #[arg(short, long, conflicts_with = "user", required_unless_present = "user")]
    chat: Option<i64>,

    /// Export the log of this user, by `@username` or numeric id.
    #[arg(short, long)]
    user: Option<String>,

    /// Output format.
    #[arg(short, long, value_enum, default_value_t = Format::Text)]
    format: Format,

    /// Write to this file instead of stdout.
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Text,
    Json,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let db = match Database::open_existing(&args.database) {
        Ok(db) => db,
        Err(e) => {
            eprintln!("✗ Failed to open database {}: {e}", args.database.display());
            return ExitCode::FAILURE;
        }
    };

    let rendered = match (args.chat, args.user.as_deref()) {
        (Some(chat_id), _) => export_chat(&db, chat_id, args.format),
        (None, Some(user)) => export_user(&db, user, args.format),
        (None, None) => Err("either --chat or --user is required".to_owned()),
    };

    let rendered = match rendered {
        Ok(rendered) => rendered,
        Err(e) => {
            eprintln!("✗ {e}");
            return ExitCode::FAILURE;
        }
    };

    match args.output {
        Some(path) => match std::fs::write(&path, rendered) {
            Ok(()) => {
                println!("✓ Log written to: {}", path.display());
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("✗ Failed to write {}: {e}", path.display());
                ExitCode::FAILURE
            }
        },
        None => {
            print!("{rendered}");
            ExitCode::SUCCESS
        }
    }
}

fn export_chat(db: &Database, chat_id: i64, format: Format) -> Result<String, String> {
    let entries = db
        .get_chat_log(chat_id)
        .map_err(|e| format!("Failed to read chat log: {e}"))?;

    match format {
        Format::Text => Ok(render_chat_log(chat_id, &entries)),
        Format::Json => to_json(&entries),
    }
}

fn export_user(db: &Database, user: &str, format: Format) -> Result<String, String> {
    let username = user.trim_start_matches('@');

    let user_id = match username.parse::<i64>() {
        Ok(id) => id,
        Err(_) => db
            .find_user_id(username)
            .map_err(|e| format!("Failed to look up @{username}: {e}"))?
            .ok_or_else(|| format!("Unknown user: @{username}"))?,
    };

    let entries = db
        .get_user_log(user_id)
        .map_err(|e| format!("Failed to read user log: {e}"))?;

    match format {
        Format::Text => Ok(render_user_log(username, &entries)),
        Format::Json => to_json(&entries),
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, String> {
    serde_json::to_string_pretty(value)
        .map(|json| json + "\n")
        .map_err(|e| format!("Failed to serialize log: {e}"))
}
