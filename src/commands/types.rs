//! Command types and definitions.

use std::fmt;

use chrono::{DateTime, Utc};

use crate::storage::{ArchivedMessage, ChatKind, Family};

/// Chat an incoming message was posted in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatInfo {
    pub id: i64,
    pub kind: ChatKind,
    pub title: Option<String>,
    pub username: Option<String>,
}

/// Author of an incoming message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderInfo {
    pub id: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

/// A message delivered by the transport, stripped of transport-specific types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    pub id: i32,
    pub chat: ChatInfo,
    /// Absent for anonymous channel posts.
    pub sender: Option<SenderInfo>,
    /// Text, or the caption of a media message. May be empty.
    pub text: String,
    pub date: DateTime<Utc>,
}

impl IncomingMessage {
    /// Builds the archive record for this message, if it has a sender.
    #[must_use]
    pub fn to_archived(&self) -> Option<ArchivedMessage> {
        let sender = self.sender.as_ref()?;
        Some(ArchivedMessage {
            message_id: i64::from(self.id),
            chat_id: self.chat.id,
            chat_kind: self.chat.kind,
            chat_title: self.chat.title.clone(),
            chat_username: self.chat.username.clone(),
            user_id: sender.id,
            username: sender.username.clone(),
            first_name: sender.first_name.clone(),
            last_name: sender.last_name.clone(),
            phone_number: None,
            photo_id: None,
            text: self.text.clone(),
            date: self.date,
        })
    }
}

/// Available bot commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BotCommand {
    /// Greet the user and list public commands.
    Start,

    /// Show help information.
    Help,

    /// Publish a new value of a family. The text may be empty (usage error).
    Post(Family, String),

    /// Show the latest value of a family.
    Get(Family),

    /// Assign today's duty pair. Holds the raw `@user` arguments.
    SetDuty(Vec<String>),

    /// Show today's duty pair.
    Duty,

    /// Export the current chat's archive.
    ChatLog,

    /// Export a user's archive, by `@username`.
    UserLog(Option<String>),
}

impl BotCommand {
    /// Whether a message is addressed to some bot as a command.
    ///
    /// Such messages are never archived, even when the command is not ours.
    #[must_use]
    pub fn looks_like_command(text: &str) -> bool {
        text.trim_start()
            .strip_prefix('/')
            .and_then(|rest| rest.chars().next())
            .is_some_and(|c| !c.is_whitespace())
    }

    /// Parses a command from a message text.
    ///
    /// Accepts `/name` and `/name@bot_username`. Commands addressed to another
    /// bot return `None`. Returns `None` if the message is not a known command.
    #[must_use]
    pub fn parse(text: &str, bot_username: Option<&str>) -> Option<Self> {
        let text = text.trim();
        let after_slash = text.strip_prefix('/')?;

        let (token, args) = match after_slash.split_once(char::is_whitespace) {
            Some((token, args)) => (token, args),
            None => (after_slash, ""),
        };

        let (name, target) = match token.split_once('@') {
            Some((name, target)) => (name, Some(target)),
            None => (token, None),
        };

        if let (Some(target), Some(ours)) = (target, bot_username)
            && !target.eq_ignore_ascii_case(ours.trim_start_matches('@'))
        {
            return None;
        }

        let args: Vec<&str> = args.split_whitespace().collect();
        let joined = args.join(" ");

        match name.to_lowercase().as_str() {
            "start" => Some(Self::Start),
            "help" => Some(Self::Help),
            "post_hw" => Some(Self::Post(Family::Homework, joined)),
            "get_hw" => Some(Self::Get(Family::Homework)),
            "post_ready_hw" => Some(Self::Post(Family::ReadyHomework, joined)),
            "get_ready_hw" => Some(Self::Get(Family::ReadyHomework)),
            "post_schedule" => Some(Self::Post(Family::Schedule, joined)),
            "schedule" => Some(Self::Get(Family::Schedule)),
            "set_duty" => Some(Self::SetDuty(
                args.into_iter().map(str::to_owned).collect(),
            )),
            "duty" => Some(Self::Duty),
            "get_chat_log" => Some(Self::ChatLog),
            "get_user_log" => Some(Self::UserLog(
                args.first().map(|a| (*a).to_owned()),
            )),
            _ => None,
        }
    }

    /// Returns the command name as it is typed.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Help => "help",
            Self::Post(Family::Homework, _) => "post_hw",
            Self::Post(Family::ReadyHomework, _) => "post_ready_hw",
            Self::Post(Family::Schedule, _) => "post_schedule",
            Self::Get(Family::Homework) => "get_hw",
            Self::Get(Family::ReadyHomework) => "get_ready_hw",
            Self::Get(Family::Schedule) => "schedule",
            Self::SetDuty(_) => "set_duty",
            Self::Duty => "duty",
            Self::ChatLog => "get_chat_log",
            Self::UserLog(_) => "get_user_log",
        }
    }

    /// Whether only chat admins may run this command.
    #[must_use]
    pub const fn requires_admin(&self) -> bool {
        matches!(
            self,
            Self::Post(..) | Self::SetDuty(_) | Self::ChatLog | Self::UserLog(_)
        )
    }

    /// Commands available to every member: usage and description.
    #[must_use]
    pub fn member_commands() -> Vec<(&'static str, &'static str)> {
        vec![
            ("/start", "start working with the bot"),
            ("/help", "show this help"),
            ("/get_hw", "get the homework"),
            ("/get_ready_hw", "get the ready homework"),
            ("/duty", "show who is on duty today"),
            ("/schedule", "get the schedule"),
        ]
    }

    /// Commands reserved for admins: usage and description.
    #[must_use]
    pub fn admin_commands() -> Vec<(&'static str, &'static str)> {
        vec![
            ("/post_hw <text>", "set the homework"),
            ("/post_ready_hw <text>", "set the ready homework"),
            ("/set_duty @user1 @user2", "assign today's duty"),
            ("/post_schedule <text>", "set the schedule"),
            ("/get_chat_log", "export this chat's log to your private messages"),
            ("/get_user_log @user", "export a user's log to your private messages"),
        ]
    }
}

impl fmt::Display for BotCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Post(_, text) if !text.is_empty() => write!(f, "{} {text}", self.name()),
            Self::SetDuty(users) if !users.is_empty() => {
                write!(f, "{} {}", self.name(), users.join(" "))
            }
            Self::UserLog(Some(user)) => write!(f, "{} {user}", self.name()),
            _ => write!(f, "{}", self.name()),
        }
    }
}

/// Result of command execution.
#[derive(Debug, Clone)]
pub struct CommandResult {
    /// Whether the command was successful.
    pub success: bool,

    /// Response message to show the user.
    pub message: String,
}

impl CommandResult {
    /// Creates a successful result.
    #[must_use]
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    /// Creates an error result.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}
