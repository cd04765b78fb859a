//! The outbound side of the chat transport, as seen by command handlers.

use std::future::Future;

use thiserror::Error;

/// Role of a member inside a group chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberRole {
    Creator,
    Administrator,
    Member,
    Banned,
}

impl MemberRole {
    /// Creators and administrators may run admin commands.
    #[must_use]
    pub const fn is_admin(self) -> bool {
        matches!(self, Self::Creator | Self::Administrator)
    }
}

/// Errors raised while delivering something to a chat.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The recipient cannot be reached, e.g. a user who never started a
    /// private conversation with the bot.
    #[error("Recipient {0} is unreachable")]
    RecipientUnavailable(i64),

    #[error("Delivery failed: {0}")]
    Delivery(String),

    #[error("Member lookup failed: {0}")]
    MemberLookup(String),
}

/// Operations a handler needs from the chat transport.
pub trait ChatTransport: Send + Sync {
    /// Sends a text message to a chat, optionally as a reply.
    fn send_text(
        &self,
        chat_id: i64,
        reply_to: Option<i32>,
        text: &str,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Sends a file to a user's private chat.
    fn send_document(
        &self,
        user_id: i64,
        file_name: &str,
        contents: Vec<u8>,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Looks up a user's role in a group chat.
    fn member_role(
        &self,
        chat_id: i64,
        user_id: i64,
    ) -> impl Future<Output = Result<MemberRole, TransportError>> + Send;
}
