//! Telegram bot client built on grammers.

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Arc;

use grammers_client::types::{Message, Peer};
use grammers_client::update::Update;
use grammers_client::{
    Client, InputMessage, InvocationError, SenderPool, SignInError, UpdatesConfiguration, sender,
};
use grammers_session::storages::SqliteSession;
use thiserror::Error;
use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::RateLimiter;
use crate::commands::{
    BotCommand, ChatInfo, ChatTransport, IncomingMessage, MemberRole, SenderInfo, TransportError,
};
use crate::config::TelegramConfig;
use crate::storage::ChatKind;

/// Capacity of the channel between the update pump and the dispatcher.
const INCOMING_BUFFER: usize = 256;

/// RPC errors meaning the bot cannot write to the recipient.
const UNREACHABLE_ERRORS: [&str; 6] = [
    "USER_IS_BLOCKED",
    "PEER_ID_INVALID",
    "INPUT_USER_DEACTIVATED",
    "USER_DEACTIVATED",
    "CHAT_WRITE_FORBIDDEN",
    "USER_BOT_REQUIRED",
];

/// Errors that can occur during Telegram operations.
#[derive(Debug, Error)]
pub enum TelegramError {
    #[error("Sign in failed: {0}")]
    SignInFailed(String),

    #[error("Flood wait required: {0} seconds")]
    FloodWait(u32),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("API invocation error: {0}")]
    Invocation(String),
}

impl From<InvocationError> for TelegramError {
    fn from(err: InvocationError) -> Self {
        let err_str = err.to_string();

        // Check for flood wait errors
        if (err_str.contains("FLOOD_WAIT") || err_str.contains("flood"))
            && let Some(seconds) = extract_flood_wait_seconds(&err_str) {
                return Self::FloodWait(seconds);
            }

        Self::Invocation(err_str)
    }
}

/// Extracts flood wait seconds from an error message.
fn extract_flood_wait_seconds(err_msg: &str) -> Option<u32> {
    let patterns = ["FLOOD_WAIT_", "flood wait "];

    for pattern in patterns {
        if let Some(idx) = err_msg.to_lowercase().find(&pattern.to_lowercase()) {
            let start = idx + pattern.len();
            let num_str: String = err_msg[start..]
                .chars()
                .take_while(char::is_ascii_digit)
                .collect();
            if let Ok(seconds) = num_str.parse() {
                return Some(seconds);
            }
        }
    }
    None
}

/// Whether an error message means the recipient cannot be written to.
fn is_unreachable(err_msg: &str) -> bool {
    UNREACHABLE_ERRORS.iter().any(|code| err_msg.contains(code))
}

/// Whether an update should reach the handler.
///
/// Edits are archived again as new rows, but an edited command is not run a
/// second time.
fn should_forward(edited: bool, text: &str) -> bool {
    !edited || !BotCommand::looks_like_command(text)
}

/// Peers seen in incoming updates, by Bot API dialog id.
///
/// Sending requires a peer the session has seen; the bot never initiates
/// contact with a chat or user it has not received a message from.
type PeerCache = Arc<RwLock<HashMap<i64, Peer>>>;

/// High-level Telegram bot client.
pub struct TelegramBot {
    /// The underlying grammers client.
    client: Client,

    /// Handle to the sender pool for disconnection.
    handle: sender::SenderPoolHandle,

    /// Pacing for outgoing messages.
    rate_limiter: RateLimiter,

    /// Peers observed in updates.
    peers: PeerCache,

    /// The bot's username, without `@`.
    username: Option<String>,

    /// Background task running the sender pool.
    _pool_task: JoinHandle<()>,

    /// Background task converting updates into [`IncomingMessage`]s.
    _update_task: JoinHandle<()>,
}

impl TelegramBot {
    /// Connects to Telegram, signs in with the bot token if needed and starts
    /// streaming new messages.
    ///
    /// # Errors
    ///
    /// Returns an error if connection or sign-in fails.
    pub async fn connect(
        config: &TelegramConfig,
    ) -> Result<(Self, mpsc::Receiver<IncomingMessage>), TelegramError> {
        info!("Connecting to Telegram...");

        let session = Arc::new(
            SqliteSession::open(&config.session_path)
                .await
                .map_err(|e| TelegramError::Session(e.to_string()))?,
        );

        let SenderPool {
            runner,
            updates,
            handle,
        } = SenderPool::new(Arc::clone(&session), config.api_id);

        let client = Client::new(handle.clone());

        // Spawn the sender pool runner
        let pool_task = tokio::spawn(async move {
            runner.run().await;
        });

        let is_authorized = client
            .is_authorized()
            .await
            .map_err(|e| TelegramError::Connection(e.to_string()))?;

        if !is_authorized {
            info!("Signing in with bot token...");
            client
                .bot_sign_in(&config.bot_token, &config.api_hash)
                .await
                .map_err(|e: SignInError| TelegramError::SignInFailed(e.to_string()))?;
        }

        let me = client.get_me().await?;
        let username = me.username().map(str::to_owned);
        info!("Signed in as @{}", username.as_deref().unwrap_or("<unknown>"));

        let peers: PeerCache = Arc::default();
        let (tx, rx) = mpsc::channel(INCOMING_BUFFER);

        let stream = client
            .stream_updates(
                updates,
                UpdatesConfiguration {
                    catch_up: false,
                    ..Default::default()
                },
            )
            .await;

        let update_peers = Arc::clone(&peers);
        let update_task = tokio::spawn(async move {
            let mut stream = stream;
            loop {
                let update = match stream.next().await {
                    Ok(update) => update,
                    Err(e) => {
                        error!("Update stream failed: {}", e);
                        break;
                    }
                };

                let (message, edited) = match update {
                    Update::NewMessage(message) => (message, false),
                    Update::MessageEdited(message) => (message, true),
                    _ => continue,
                };
                if message.outgoing() || !should_forward(edited, message.text()) {
                    continue;
                }

                let Some(incoming) = remember_and_convert(&update_peers, &message).await else {
                    continue;
                };
                if tx.send(incoming).await.is_err() {
                    debug!("Incoming message receiver dropped, stopping update stream");
                    break;
                }
            }
        });

        Ok((
            Self {
                client,
                handle: handle.thin,
                rate_limiter: RateLimiter::default(),
                peers,
                username,
                _pool_task: pool_task,
                _update_task: update_task,
            },
            rx,
        ))
    }

    /// The bot's username, without `@`.
    #[must_use]
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    async fn peer(&self, id: i64) -> Option<Peer> {
        self.peers.read().await.get(&id).cloned()
    }

    /// Sends a message, honouring the rate limiter and flood waits.
    async fn send(&self, chat_id: i64, message: InputMessage) -> Result<(), TransportError> {
        let Some(peer) = self.peer(chat_id).await else {
            return Err(TransportError::RecipientUnavailable(chat_id));
        };

        let waited = self.rate_limiter.wait_and_acquire(chat_id).await;
        if !waited.is_zero() {
            debug!("Waited {:?} for rate limit", waited);
        }

        match self.client.send_message(&peer, message).await {
            Ok(_) => Ok(()),
            Err(e) => {
                let err_str = e.to_string();
                if is_unreachable(&err_str) {
                    return Err(TransportError::RecipientUnavailable(chat_id));
                }
                if let TelegramError::FloodWait(seconds) = TelegramError::from(e) {
                    self.rate_limiter.handle_flood_wait(seconds).await;
                }
                Err(TransportError::Delivery(err_str))
            }
        }
    }

    /// Disconnects from Telegram.
    pub fn disconnect(&self) {
        info!("Disconnecting from Telegram...");
        self.handle.quit();
    }
}

impl ChatTransport for TelegramBot {
    async fn send_text(&self, chat_id: i64, reply_to: Option<i32>, text: &str) -> Result<(), TransportError> {
        self.send(chat_id, InputMessage::text(text).reply_to(reply_to))
            .await
    }

    async fn send_document(&self, user_id: i64, file_name: &str, contents: Vec<u8>) -> Result<(), TransportError> {
        let size = contents.len();
        let mut stream = Cursor::new(contents);
        let uploaded = self
            .client
            .upload_stream(&mut stream, size, file_name.to_owned())
            .await
            .map_err(|e| TransportError::Delivery(format!("upload failed: {e}")))?;

        self.send(user_id, InputMessage::text("").document(uploaded))
            .await
    }

    async fn member_role(&self, chat_id: i64, user_id: i64) -> Result<MemberRole, TransportError> {
        let (Some(chat), Some(user)) = (self.peer(chat_id).await, self.peer(user_id).await) else {
            return Err(TransportError::MemberLookup(format!(
                "user {user_id} or chat {chat_id} not seen yet"
            )));
        };

        let permissions = self
            .client
            .get_permissions(&chat, &user)
            .await
            .map_err(|e| TransportError::MemberLookup(e.to_string()))?;

        let role = if permissions.is_creator() {
            MemberRole::Creator
        } else if permissions.is_admin() {
            MemberRole::Administrator
        } else if permissions.is_banned() {
            MemberRole::Banned
        } else {
            MemberRole::Member
        };
        Ok(role)
    }
}

impl std::fmt::Debug for TelegramBot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramBot")
            .field("username", &self.username)
            .field("rate_limiter", &self.rate_limiter)
            .finish_non_exhaustive()
    }
}

/// Caches the message's chat and sender, then converts it for the handler.
async fn remember_and_convert(peers: &PeerCache, message: &Message) -> Option<IncomingMessage> {
    let Some(chat) = message.peer().cloned() else {
        warn!("Dropping message {} from an unknown chat", message.id());
        return None;
    };
    let sender = message.sender().cloned();

    let chat_info = chat_info(&chat);
    let sender_info = sender.as_ref().and_then(sender_info);

    {
        let mut cache = peers.write().await;
        cache.insert(chat_info.id, chat);
        if let (Some(peer), Some(info)) = (sender, sender_info.as_ref()) {
            cache.insert(info.id, peer);
        }
    }

    Some(IncomingMessage {
        id: message.id(),
        chat: chat_info,
        sender: sender_info,
        text: message.text().to_owned(),
        date: message.date(),
    })
}

fn chat_info(peer: &Peer) -> ChatInfo {
    let kind = match peer {
        Peer::User(_) => ChatKind::Private,
        Peer::Group(group) if group.is_megagroup() => ChatKind::Supergroup,
        Peer::Group(_) => ChatKind::Group,
        Peer::Channel(_) => ChatKind::Channel,
    };

    ChatInfo {
        id: peer.id().bot_api_dialog_id(),
        kind,
        title: match peer {
            Peer::User(_) => None,
            _ => peer.name().map(str::to_owned),
        },
        username: peer.username().map(str::to_owned),
    }
}

fn sender_info(peer: &Peer) -> Option<SenderInfo> {
    let Peer::User(user) = peer else {
        return None;
    };

    Some(SenderInfo {
        id: peer.id().bot_api_dialog_id(),
        username: user.username().map(str::to_owned),
        first_name: user.first_name().map(str::to_owned),
        last_name: user.last_name().map(str::to_owned),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_flood_wait() {
        assert_eq!(extract_flood_wait_seconds("FLOOD_WAIT_120"), Some(120));
        assert_eq!(extract_flood_wait_seconds("flood wait 60 seconds"), Some(60));
        assert_eq!(extract_flood_wait_seconds("some other error"), None);
    }

    #[test]
    fn test_should_forward() {
        assert!(should_forward(false, "hello"));
        assert!(should_forward(false, "/get_hw"));
        assert!(should_forward(true, "hello, fixed typo"));
        assert!(!should_forward(true, "/post_hw Read chapter 5"));
    }

    #[test]
    fn test_is_unreachable() {
        assert!(is_unreachable("rpc error 400: PEER_ID_INVALID"));
        assert!(is_unreachable("rpc error 403: USER_IS_BLOCKED caused by messages.sendMessage"));
        assert!(!is_unreachable("rpc error 420: FLOOD_WAIT_3"));
    }
}
