//! Shared types for the message processing pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Inbound message ─────────────────────────────────────────────────

/// Inbound message as delivered by the mailbox provider.
///
/// Created on ingestion, never mutated afterwards. All downstream records
/// reference it by `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Provider-assigned ID (unique, immutable).
    pub id: String,
    /// Sender address.
    pub sender: String,
    /// Subject line.
    pub subject: String,
    /// Body text.
    pub body: String,
    /// When the provider received the message.
    pub received_at: DateTime<Utc>,
    /// Conversation/thread ID, if the provider tracks threads.
    pub thread_id: Option<String>,
}

// ── Classification ──────────────────────────────────────────────────

/// Fixed category set the classification model chooses from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Question,
    Billing,
    Technical,
    Complaint,
    FeatureRequest,
    Escalation,
    Spam,
    Other,
}

impl Category {
    /// Parse a category from model output. Unrecognized values are rejected
    /// at the classification boundary, not coerced.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "question" => Some(Self::Question),
            "billing" => Some(Self::Billing),
            "technical" => Some(Self::Technical),
            "complaint" => Some(Self::Complaint),
            "feature_request" => Some(Self::FeatureRequest),
            "escalation" => Some(Self::Escalation),
            "spam" => Some(Self::Spam),
            "other" => Some(Self::Other),
            _ => None,
        }
    }

    /// Static confidence multiplier blended into the raw model score.
    /// Domain policy, not learned: categories where a wrong auto-reply is
    /// expensive get dampened so they land in lower-confidence buckets.
    pub fn confidence_multiplier(&self) -> f64 {
        match self {
            Self::Question => 1.0,
            Self::Billing => 0.9,
            Self::Technical => 0.95,
            Self::Complaint => 0.85,
            Self::FeatureRequest => 1.0,
            Self::Escalation => 0.7,
            Self::Spam => 1.05,
            Self::Other => 0.8,
        }
    }

    /// Default expertise tag consulted when assembling an escalation team.
    pub fn default_expertise(&self) -> Option<&'static str> {
        match self {
            Self::Question => Some("support"),
            Self::Billing => Some("billing"),
            Self::Technical => Some("infrastructure"),
            Self::Complaint => Some("customer-success"),
            Self::FeatureRequest => Some("product"),
            Self::Escalation => Some("on-call"),
            Self::Spam | Self::Other => None,
        }
    }

    /// Short label for logging and group names.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Question => "question",
            Self::Billing => "billing",
            Self::Technical => "technical",
            Self::Complaint => "complaint",
            Self::FeatureRequest => "feature_request",
            Self::Escalation => "escalation",
            Self::Spam => "spam",
            Self::Other => "other",
        }
    }
}

/// Ordinal urgency. Derives `Ord` so `Critical > High > Medium > Low`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    Low,
    Medium,
    High,
    Critical,
}

impl Urgency {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

/// Structured classification produced exactly once per processing attempt.
///
/// `confidence` is the category-adjusted score, already clamped to [0, 100].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Classification {
    pub category: Category,
    pub confidence: f64,
    pub reasoning: String,
    pub urgency: Urgency,
    pub suggested_action: String,
    pub required_expertise: Vec<String>,
    pub estimated_effort: String,
}

// ── Routing decision ────────────────────────────────────────────────

/// One of the four confidence-tiered actions.
///
/// Derived deterministically from (confidence, thresholds); never persisted
/// as a separate source of truth — only the resulting action and its effects
/// are recorded on the outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingDecision {
    AutoRespond,
    SuggestResponse,
    HumanReview,
    Escalate,
}

impl RoutingDecision {
    /// Short label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            Self::AutoRespond => "auto_respond",
            Self::SuggestResponse => "suggest_response",
            Self::HumanReview => "human_review",
            Self::Escalate => "escalate",
        }
    }

    /// Rank for monotonicity checks: higher rank means higher confidence.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Escalate => 0,
            Self::HumanReview => 1,
            Self::SuggestResponse => 2,
            Self::AutoRespond => 3,
        }
    }
}

// ── Processing state machine ────────────────────────────────────────

/// Per-message state machine states.
///
/// `Received → Validating → Classifying → Routing → Acting → Completed`,
/// with terminal `Failed` reachable from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingState {
    Received,
    Validating,
    Classifying,
    Routing,
    Acting,
    Completed,
    Failed,
}

impl ProcessingState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Validating => "validating",
            Self::Classifying => "classifying",
            Self::Routing => "routing",
            Self::Acting => "acting",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

// ── Processing outcome ──────────────────────────────────────────────

/// The sole durable record of what happened to a message. Append-only,
/// one-to-one with message id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingOutcome {
    pub message_id: String,
    /// Final state: `Completed` or `Failed`.
    pub state: ProcessingState,
    /// Routing decision taken, if processing got that far.
    pub decision: Option<RoutingDecision>,
    /// Human-readable description of the action taken (or attempted).
    pub action_description: String,
    /// Whether an auto-reply was actually sent.
    pub response_sent: bool,
    /// Escalation group id, present iff the decision was `Escalate` and
    /// group creation succeeded.
    pub escalation_group_id: Option<String>,
    /// Human-readable error summary when failed (or partially degraded).
    pub error: Option<String>,
    /// State at which failure occurred, when `state == Failed`.
    pub failed_at: Option<ProcessingState>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Total processing duration in milliseconds.
    pub duration_ms: u64,
}

impl ProcessingOutcome {
    pub fn is_failure(&self) -> bool {
        self.state == ProcessingState::Failed
    }
}

// ── Escalation group ────────────────────────────────────────────────

/// Lifecycle status of an escalation group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupStatus {
    Active,
    Resolved,
}

/// Ad-hoc collaboration group created for a low-confidence message.
/// Never deleted; mutated only to transition `Active → Resolved`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationGroup {
    /// Provider-assigned group id.
    pub id: String,
    /// Message that triggered the escalation.
    pub message_id: String,
    /// Generated name: category, date, short subject hash.
    pub name: String,
    /// Member addresses, size >= configured minimum (>= 2).
    pub members: Vec<String>,
    pub status: GroupStatus,
    pub resolution_notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ── Responder ───────────────────────────────────────────────────────

/// A responder known to the directory. Read-only from the engine's side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Responder {
    /// Address/handle used for group membership.
    pub address: String,
    /// Expertise tags (lowercase).
    pub expertise: Vec<String>,
}

impl Responder {
    pub fn new(address: impl Into<String>, expertise: &[&str]) -> Self {
        Self {
            address: address.into(),
            expertise: expertise.iter().map(|t| t.to_lowercase()).collect(),
        }
    }

    pub fn has_any_expertise(&self, tags: &[String]) -> bool {
        tags.iter()
            .any(|t| self.expertise.iter().any(|e| e == &t.to_lowercase()))
    }
}
