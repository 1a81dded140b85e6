//! External collaborator interfaces — pure I/O, no business logic.
//!
//! The engine consumes two providers through these narrow traits. Concrete
//! adapters (IMAP/Graph mailboxes, Slack/Teams chat) live outside the engine
//! core; tests supply in-memory implementations.

pub mod file_mailbox;
pub mod http_chat;

pub use file_mailbox::FileMailbox;
pub use http_chat::{HttpChatConfig, HttpGroupChat};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{ChatError, MailboxError};
use crate::pipeline::types::Message;

/// Mailbox provider: the source of inbound messages and the reply channel.
#[async_trait]
pub trait MailboxProvider: Send + Sync {
    /// Fetch messages received after the watermark (or all unseen, when the
    /// watermark is `None`). Redelivery across calls is allowed; the engine
    /// deduplicates.
    async fn fetch_unseen(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Message>, MailboxError>;

    /// Mark a message as processed so subsequent polls skip it.
    async fn mark_processed(&self, message_id: &str) -> Result<(), MailboxError>;

    /// Send a reply in the message's thread.
    async fn send_reply(&self, message_id: &str, body: &str) -> Result<(), MailboxError>;
}

/// Group-chat provider used for escalation collaboration groups.
#[async_trait]
pub trait GroupChatProvider: Send + Sync {
    /// Create a group with the given members; returns the provider group id.
    async fn create_group(&self, name: &str, members: &[String]) -> Result<String, ChatError>;

    /// Post a message into an existing group.
    async fn post_message(&self, group_id: &str, body: &str) -> Result<(), ChatError>;
}
