//! Error types for the triage engine.

use std::time::Duration;

/// Top-level error type for the engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Mailbox error: {0}")]
    Mailbox(#[from] MailboxError),

    #[error("Classification error: {0}")]
    Classification(#[from] ClassificationError),

    #[error("Group chat error: {0}")]
    Chat(#[from] ChatError),

    #[error("Assembly error: {0}")]
    Assembly(#[from] AssemblyError),
}

/// Configuration-related errors. Fatal at startup, never a runtime condition.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error(
        "Thresholds must be strictly descending: auto_handle ({auto}) > \
         suggest_response ({suggest}) > human_review ({review}) > 0"
    )]
    InvalidThresholds { auto: f64, suggest: f64, review: f64 },
}

/// Classification service errors.
#[derive(Debug, thiserror::Error)]
pub enum ClassificationError {
    /// Network/timeout failure — retryable.
    #[error("Classification request failed: {0}")]
    RequestFailed(String),

    /// Malformed model output — semantic, never retried.
    #[error("Invalid classification response: {0}")]
    InvalidResponse(String),

    /// Circuit breaker is open for the classification service.
    #[error("Classification service unavailable (circuit open, retry in {cooldown:?})")]
    DependencyUnavailable { cooldown: Duration },
}

impl ClassificationError {
    /// Whether the resilience layer should retry this error.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::RequestFailed(_))
    }
}

/// Mailbox provider errors.
#[derive(Debug, thiserror::Error)]
pub enum MailboxError {
    #[error("Mailbox fetch failed: {0}")]
    FetchFailed(String),

    #[error("Failed to send reply to message {message_id}: {reason}")]
    SendFailed { message_id: String, reason: String },

    #[error("Failed to mark message {message_id} processed: {reason}")]
    MarkFailed { message_id: String, reason: String },

    #[error("Mailbox unavailable (circuit open, retry in {cooldown:?})")]
    DependencyUnavailable { cooldown: Duration },
}

/// Group-chat provider errors.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("Group creation failed: {0}")]
    CreateFailed(String),

    #[error("Failed to post to group {group_id}: {reason}")]
    PostFailed { group_id: String, reason: String },

    #[error("Group chat unavailable (circuit open, retry in {cooldown:?})")]
    DependencyUnavailable { cooldown: Duration },
}

/// Team assembly errors. Group creation failure is a full action failure —
/// no partial group is left behind.
#[derive(Debug, thiserror::Error)]
pub enum AssemblyError {
    #[error("No responders available and no fallback configured")]
    NoResponders,

    #[error("Group creation failed: {0}")]
    GroupCreation(#[from] ChatError),
}

/// Outcome store errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Outcome already recorded for message {0}")]
    DuplicateOutcome(String),

    #[error("Escalation group not found: {0}")]
    GroupNotFound(String),

    #[error("Store query failed: {0}")]
    Query(String),
}

/// Per-message processing errors. These never cross the processor boundary
/// as `Err` — they are captured into the `ProcessingOutcome`.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Classification failed: {0}")]
    ClassificationFailed(#[from] ClassificationError),

    #[error("Reply send failed: {0}")]
    SendFailed(#[from] MailboxError),

    #[error("Escalation assembly failed: {0}")]
    Assembly(#[from] AssemblyError),

    #[error("Escalation group persistence failed: {0}")]
    GroupPersistence(#[from] StoreError),
}

/// Result type alias for the engine.
pub type Result<T> = std::result::Result<T, Error>;
