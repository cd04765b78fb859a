//! Command handler implementation.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use super::export::{chat_log_file_name, render_chat_log, render_user_log, user_log_file_name};
use super::transport::ChatTransport;
use super::types::{BotCommand, CommandResult, IncomingMessage};
use crate::config::BotSettings;
use crate::storage::{Database, Family, call_blocking};

const ADMIN_ONLY: &str = "❌ This command is for administrators only!";
const STORAGE_FAILURE: &str = "❌ Something went wrong, please try again later.";
const PRIVATE_CHAT_REQUIRED: &str = "❌ Message me in private first, then try again!";

/// Routes incoming messages: commands to their handlers, everything else to the archive.
pub struct CommandHandler<T> {
    /// Shared database handle.
    db: Arc<Database>,

    /// Outbound side of the chat transport.
    transport: Arc<T>,

    /// Bot settings (admin allowlist).
    settings: Arc<BotSettings>,

    /// The bot's own username, used to ignore commands addressed to other bots.
    bot_username: Option<String>,
}

impl<T: ChatTransport> CommandHandler<T> {
    /// Creates a new command handler.
    #[must_use]
    pub fn new(
        db: Arc<Database>,
        transport: Arc<T>,
        settings: Arc<BotSettings>,
        bot_username: Option<String>,
    ) -> Self {
        Self {
            db,
            transport,
            settings,
            bot_username,
        }
    }

    /// Handles one incoming message.
    ///
    /// Commands get exactly one reply. Other messages are archived; archival
    /// failures are logged and never reach the chat.
    pub async fn handle(&self, message: &IncomingMessage) {
        if !BotCommand::looks_like_command(&message.text) {
            self.archive(message).await;
            return;
        }

        if let Some(result) = self.try_handle(message).await {
            self.reply(message, &result.message).await;
        }
    }

    /// Tries to parse and execute a command from a message.
    ///
    /// Returns `None` if the message is not one of our commands.
    pub async fn try_handle(&self, message: &IncomingMessage) -> Option<CommandResult> {
        let command = BotCommand::parse(&message.text, self.bot_username.as_deref())?;

        debug!("Handling command in chat {}: {}", message.chat.id, truncate(&command.to_string(), 60));
        let result = self.execute(command, message).await;
        info!("Command result: success={}", result.success);

        Some(result)
    }

    /// Executes a parsed command.
    async fn execute(&self, command: BotCommand, message: &IncomingMessage) -> CommandResult {
        if command.requires_admin() && !self.is_admin(message).await {
            info!(
                "Rejected /{} from user {:?} in chat {}",
                command.name(),
                message.sender.as_ref().map(|s| s.id),
                message.chat.id
            );
            return CommandResult::error(ADMIN_ONLY);
        }

        let chat_id = message.chat.id;
        match command {
            BotCommand::Start => Self::handle_start(),
            BotCommand::Help => Self::handle_help(),
            BotCommand::Post(family, text) => self.handle_post(family, chat_id, text).await,
            BotCommand::Get(family) => self.handle_get(family, chat_id).await,
            BotCommand::SetDuty(users) => self.handle_set_duty(chat_id, &users).await,
            BotCommand::Duty => self.handle_duty(chat_id).await,
            BotCommand::ChatLog => self.handle_chat_log(message).await,
            BotCommand::UserLog(username) => self.handle_user_log(message, username).await,
        }
    }

    /// Checks whether the sender may run admin commands.
    ///
    /// Private chats use the configured allowlist; groups ask the transport
    /// for the sender's role. A failed lookup counts as "not admin".
    async fn is_admin(&self, message: &IncomingMessage) -> bool {
        let Some(sender) = &message.sender else {
            return false;
        };

        if message.chat.kind.is_private() {
            return self.settings.is_listed_admin(sender.id);
        }

        match self.transport.member_role(message.chat.id, sender.id).await {
            Ok(role) => role.is_admin(),
            Err(e) => {
                warn!(
                    "Failed to check permissions of user {} in chat {}: {}",
                    sender.id, message.chat.id, e
                );
                false
            }
        }
    }

    fn handle_start() -> CommandResult {
        let mut lines = vec![
            "👋 Hi! I'm this class's bot.".to_owned(),
            String::new(),
            "📚 Available commands:".to_owned(),
        ];
        for (usage, desc) in BotCommand::member_commands() {
            lines.push(format!("{usage} - {desc}"));
        }
        CommandResult::success(lines.join("\n"))
    }

    fn handle_help() -> CommandResult {
        let mut lines = vec!["📖 Bot commands".to_owned(), String::new(), "For everyone:".to_owned()];
        for (usage, desc) in BotCommand::member_commands() {
            lines.push(format!("{usage} - {desc}"));
        }

        lines.push(String::new());
        lines.push("For admins:".to_owned());
        for (usage, desc) in BotCommand::admin_commands() {
            lines.push(format!("{usage} - {desc}"));
        }

        CommandResult::success(lines.join("\n"))
    }

    async fn handle_post(&self, family: Family, chat_id: i64, text: String) -> CommandResult {
        if text.is_empty() {
            let usage = BotCommand::Post(family, String::new());
            return CommandResult::error(format!(
                "❌ Provide the {} text: /{} <text>",
                family.label().to_lowercase(),
                usage.name()
            ));
        }

        debug!("Saving {} for chat {}: \"{}\"", family, chat_id, truncate(&text, 30));
        let saved = call_blocking(Arc::clone(&self.db), move |db| {
            db.save_latest(family, chat_id, &text)
        })
        .await;

        match saved {
            Ok(_) => CommandResult::success(format!("✅ {} saved!", family.label())),
            Err(e) => {
                error!("Failed to save {} for chat {}: {}", family, chat_id, e);
                CommandResult::error(STORAGE_FAILURE)
            }
        }
    }

    async fn handle_get(&self, family: Family, chat_id: i64) -> CommandResult {
        let latest = call_blocking(Arc::clone(&self.db), move |db| db.get_latest(family, chat_id))
            .await
            .unwrap_or_else(|e| {
                error!("Failed to read {} for chat {}: {}", family, chat_id, e);
                None
            });

        let icon = family_icon(family);
        match latest {
            Some(text) => CommandResult::success(format!("{icon} {}:\n\n{text}", family.label())),
            None => CommandResult::success(format!("{icon} {} is not set.", family.label())),
        }
    }

    async fn handle_set_duty(&self, chat_id: i64, users: &[String]) -> CommandResult {
        let names: Vec<String> = users
            .iter()
            .take(2)
            .map(|u| u.trim_start_matches('@').to_owned())
            .filter(|u| !u.is_empty())
            .collect();

        let [first, second] = names.as_slice() else {
            return CommandResult::error("❌ Specify two users: /set_duty @user1 @user2");
        };

        let (first, second) = (first.clone(), second.clone());
        let reply = format!("✅ On duty today: @{first} and @{second}");
        let saved = call_blocking(Arc::clone(&self.db), move |db| {
            db.set_duty(chat_id, &first, &second)
        })
        .await;

        match saved {
            Ok(()) => CommandResult::success(reply),
            Err(e) => {
                error!("Failed to set duty for chat {}: {}", chat_id, e);
                CommandResult::error(STORAGE_FAILURE)
            }
        }
    }

    async fn handle_duty(&self, chat_id: i64) -> CommandResult {
        let duty = call_blocking(Arc::clone(&self.db), move |db| db.get_duty(chat_id))
            .await
            .unwrap_or_else(|e| {
                error!("Failed to read duty for chat {}: {}", chat_id, e);
                None
            });

        match duty {
            Some(pair) => CommandResult::success(format!(
                "👥 On duty today: @{} and @{}",
                pair.first, pair.second
            )),
            None => CommandResult::success("👥 No one is on duty today."),
        }
    }

    async fn handle_chat_log(&self, message: &IncomingMessage) -> CommandResult {
        let chat_id = message.chat.id;
        let entries = match call_blocking(Arc::clone(&self.db), move |db| db.get_chat_log(chat_id)).await {
            Ok(entries) => entries,
            Err(e) => {
                error!("Failed to read chat log of {}: {}", chat_id, e);
                return CommandResult::error(STORAGE_FAILURE);
            }
        };

        if entries.is_empty() {
            return CommandResult::success("📝 No archived messages for this chat.");
        }

        let document = render_chat_log(chat_id, &entries);
        self.deliver_log(message, &chat_log_file_name(chat_id), document, "📁 Chat log sent to your private messages.")
            .await
    }

    async fn handle_user_log(&self, message: &IncomingMessage, username: Option<String>) -> CommandResult {
        let Some(username) = username
            .map(|u| u.trim_start_matches('@').to_owned())
            .filter(|u| !u.is_empty())
        else {
            return CommandResult::error("❌ Specify a username: /get_user_log @user");
        };

        let lookup = username.clone();
        let entries = call_blocking(Arc::clone(&self.db), move |db| {
            match db.find_user_id(&lookup)? {
                Some(user_id) => db.get_user_log(user_id),
                None => Ok(Vec::new()),
            }
        })
        .await;

        let entries = match entries {
            Ok(entries) => entries,
            Err(e) => {
                error!("Failed to read user log of @{}: {}", username, e);
                return CommandResult::error(STORAGE_FAILURE);
            }
        };

        if entries.is_empty() {
            return CommandResult::success(format!("📝 No archived messages for @{username}."));
        }

        let document = render_user_log(&username, &entries);
        self.deliver_log(message, &user_log_file_name(&username), document, "📁 User log sent to your private messages.")
            .await
    }

    /// Sends a rendered log to the requester's private chat.
    async fn deliver_log(
        &self,
        message: &IncomingMessage,
        file_name: &str,
        document: String,
        done: &str,
    ) -> CommandResult {
        let Some(sender) = &message.sender else {
            return CommandResult::error(PRIVATE_CHAT_REQUIRED);
        };

        match self
            .transport
            .send_document(sender.id, file_name, document.into_bytes())
            .await
        {
            Ok(()) => {
                info!("Sent {} to user {}", file_name, sender.id);
                CommandResult::success(done)
            }
            Err(e) => {
                warn!("Failed to send {} to user {}: {}", file_name, sender.id, e);
                CommandResult::error(PRIVATE_CHAT_REQUIRED)
            }
        }
    }

    /// Archives a non-command message. Best effort.
    async fn archive(&self, message: &IncomingMessage) {
        let Some(record) = message.to_archived() else {
            debug!("Skipping message {} without sender in chat {}", message.id, message.chat.id);
            return;
        };

        let (message_id, chat_id) = (record.message_id, record.chat_id);
        if let Err(e) = call_blocking(Arc::clone(&self.db), move |db| db.archive_message(&record)).await {
            error!("Failed to archive message {} in chat {}: {}", message_id, chat_id, e);
        }
    }

    async fn reply(&self, message: &IncomingMessage, text: &str) {
        if let Err(e) = self
            .transport
            .send_text(message.chat.id, Some(message.id), text)
            .await
        {
            warn!("Failed to reply in chat {}: {}", message.chat.id, e);
        }
    }
}

impl<T> std::fmt::Debug for CommandHandler<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandHandler")
            .field("bot_username", &self.bot_username)
            .finish_non_exhaustive()
    }
}

const fn family_icon(family: Family) -> &'static str {
    match family {
        Family::Homework | Family::ReadyHomework => "📚",
        Family::Schedule => "📅",
    }
}

/// Truncates a string to a maximum length, adding "..." if truncated.
fn truncate(s: &str, max_len: usize) -> String {
    let chars: Vec<char> = s.chars().collect();
    if chars.len() <= max_len {
        s.to_owned()
    } else {
        format!("{}...", chars[..max_len].iter().collect::<String>())
    }
}
