//! Local development mailbox — reads inbound messages from a JSONL file.
//!
//! Stands in for a real IMAP/Graph adapter during development: each line of
//! the file is one serialized `Message`. Replies and processed marks are
//! tracked in memory and logged, not written back.

use std::collections::HashSet;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::channels::MailboxProvider;
use crate::error::MailboxError;
use crate::pipeline::types::Message;

/// JSONL-backed mailbox for local runs and demos.
pub struct FileMailbox {
    path: PathBuf,
    processed: Mutex<HashSet<String>>,
}

impl FileMailbox {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            processed: Mutex::new(HashSet::new()),
        }
    }
}

#[async_trait]
impl MailboxProvider for FileMailbox {
    async fn fetch_unseen(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Message>, MailboxError> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| MailboxError::FetchFailed(format!("{}: {e}", self.path.display())))?;

        let processed = self.processed.lock().await;
        let mut messages = Vec::new();
        for (line_no, line) in raw.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Message>(line) {
                Ok(message) => {
                    let past_watermark = since.is_none_or(|w| message.received_at > w);
                    if past_watermark && !processed.contains(&message.id) {
                        messages.push(message);
                    }
                }
                Err(e) => warn!(line = line_no + 1, error = %e, "Skipping malformed message line"),
            }
        }
        Ok(messages)
    }

    async fn mark_processed(&self, message_id: &str) -> Result<(), MailboxError> {
        self.processed.lock().await.insert(message_id.to_string());
        Ok(())
    }

    async fn send_reply(&self, message_id: &str, body: &str) -> Result<(), MailboxError> {
        info!(
            id = %message_id,
            reply = %body.chars().take(120).collect::<String>(),
            "Reply (file mailbox, not delivered)"
        );
        Ok(())
    }
}
