//! `OutcomeStore` trait — single async interface for outcome and
//! escalation-group persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::pipeline::types::{EscalationGroup, ProcessingOutcome, RoutingDecision};

/// Backend-agnostic store for processing outcomes and escalation groups.
///
/// Outcomes are append-only, one per message id; groups are mutated only to
/// transition to resolved.
#[async_trait]
pub trait OutcomeStore: Send + Sync {
    // ── Outcomes ────────────────────────────────────────────────────

    /// Record an outcome. Fails with `DuplicateOutcome` if one already
    /// exists for the message id.
    async fn record_outcome(&self, outcome: &ProcessingOutcome) -> Result<(), StoreError>;

    /// Look up the outcome for a message id, if any. This is the
    /// idempotency check consulted before any reprocessing.
    async fn get_outcome(&self, message_id: &str)
    -> Result<Option<ProcessingOutcome>, StoreError>;

    /// Outcomes whose processing finished within the given range.
    async fn outcomes_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ProcessingOutcome>, StoreError>;

    /// Outcomes that took a specific routing decision.
    async fn outcomes_by_decision(
        &self,
        decision: RoutingDecision,
    ) -> Result<Vec<ProcessingOutcome>, StoreError>;

    // ── Escalation groups ───────────────────────────────────────────

    /// Persist a newly created escalation group.
    async fn insert_group(&self, group: &EscalationGroup) -> Result<(), StoreError>;

    /// Look up a group by its provider id.
    async fn get_group(&self, group_id: &str) -> Result<Option<EscalationGroup>, StoreError>;

    /// Look up the group created for a message, if any.
    async fn group_for_message(
        &self,
        message_id: &str,
    ) -> Result<Option<EscalationGroup>, StoreError>;

    /// Transition a group to resolved with optional notes.
    async fn resolve_group(&self, group_id: &str, notes: Option<String>)
    -> Result<(), StoreError>;
}
