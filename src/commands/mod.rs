//! Command handling module.
//!
//! Routes messages received by the bot: `/commands` are parsed and executed
//! against the database, every other message is archived.

mod export;
mod handler;
mod transport;
mod types;

pub use export::{chat_log_file_name, render_chat_log, render_user_log, user_log_file_name};
pub use handler::CommandHandler;
pub use transport::{ChatTransport, MemberRole, TransportError};
pub use types::{BotCommand, ChatInfo, CommandResult, IncomingMessage, SenderInfo};
