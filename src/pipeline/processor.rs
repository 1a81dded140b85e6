//! Message processor — drives one message through the full state machine.
//!
//! `Received → Validating → Classifying → Routing → Acting → Completed`,
//! with terminal `Failed` reachable from any non-terminal state. Every
//! attempt ends in exactly one persisted `ProcessingOutcome`; per-message
//! errors are captured into the outcome and never surface to the
//! coordinator as `Err` (store failures are the one exception).

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::channels::MailboxProvider;
use crate::classify::ClassificationClient;
use crate::config::ResilienceConfig;
use crate::error::{Error, MailboxError, ProcessError};
use crate::escalation::TeamAssembler;
use crate::pipeline::router::{Thresholds, route};
use crate::pipeline::types::{
    Classification, Message, ProcessingOutcome, ProcessingState, RoutingDecision,
};
use crate::resilience::{CircuitBreaker, RetryPolicy, retry_with_backoff};
use crate::store::OutcomeStore;

/// Effects of a successfully completed `Acting` phase.
struct ActionTaken {
    description: String,
    response_sent: bool,
    escalation_group_id: Option<String>,
    /// Non-fatal degradation (briefing post failure) carried into the outcome.
    error_detail: Option<String>,
}

/// Processes a single message through classify → route → act → persist.
pub struct MessageProcessor {
    classifier: Arc<ClassificationClient>,
    mailbox: Arc<dyn MailboxProvider>,
    assembler: Arc<TeamAssembler>,
    store: Arc<dyn OutcomeStore>,
    thresholds: Thresholds,
    retry: RetryPolicy,
    /// Shared with the coordinator — one breaker per mailbox dependency.
    mailbox_breaker: Arc<CircuitBreaker>,
}

impl MessageProcessor {
    pub fn new(
        classifier: Arc<ClassificationClient>,
        mailbox: Arc<dyn MailboxProvider>,
        assembler: Arc<TeamAssembler>,
        store: Arc<dyn OutcomeStore>,
        thresholds: Thresholds,
        resilience: &ResilienceConfig,
        mailbox_breaker: Arc<CircuitBreaker>,
    ) -> Self {
        Self {
            classifier,
            mailbox,
            assembler,
            store,
            thresholds,
            retry: RetryPolicy::from_config(resilience),
            mailbox_breaker,
        }
    }

    /// Process one message. Returns the persisted outcome; on redelivery of
    /// an already-processed id the existing outcome is returned untouched
    /// (no reclassification, no duplicate response).
    pub async fn process(&self, message: Message) -> Result<ProcessingOutcome, Error> {
        if let Some(existing) = self.store.get_outcome(&message.id).await? {
            debug!(
                id = %message.id,
                state = existing.state.label(),
                "Outcome already recorded, skipping redelivery"
            );
            return Ok(existing);
        }

        info!(
            id = %message.id,
            sender = %message.sender,
            "Processing inbound message"
        );

        let started_at = Utc::now();
        let start = Instant::now();
        let mut decision: Option<RoutingDecision> = None;

        let outcome = match self.run(&message, &mut decision).await {
            Ok(action) => ProcessingOutcome {
                message_id: message.id.clone(),
                state: ProcessingState::Completed,
                decision,
                action_description: action.description,
                response_sent: action.response_sent,
                escalation_group_id: action.escalation_group_id,
                error: action.error_detail,
                failed_at: None,
                started_at,
                finished_at: Utc::now(),
                duration_ms: start.elapsed().as_millis() as u64,
            },
            Err((failed_at, e)) => {
                warn!(
                    id = %message.id,
                    failed_at = failed_at.label(),
                    error = %e,
                    "Message processing failed"
                );
                ProcessingOutcome {
                    message_id: message.id.clone(),
                    state: ProcessingState::Failed,
                    decision,
                    action_description: format!("failed while {}", failed_at.label()),
                    response_sent: false,
                    escalation_group_id: None,
                    error: Some(e.to_string()),
                    failed_at: Some(failed_at),
                    started_at,
                    finished_at: Utc::now(),
                    duration_ms: start.elapsed().as_millis() as u64,
                }
            }
        };

        self.store.record_outcome(&outcome).await?;
        info!(
            id = %message.id,
            state = outcome.state.label(),
            decision = outcome.decision.map(|d| d.label()).unwrap_or("none"),
            duration_ms = outcome.duration_ms,
            "Outcome recorded"
        );
        Ok(outcome)
    }

    /// State machine body. An `Err` carries the state at which it failed.
    async fn run(
        &self,
        message: &Message,
        decision_slot: &mut Option<RoutingDecision>,
    ) -> Result<ActionTaken, (ProcessingState, ProcessError)> {
        let mut state = ProcessingState::Received;

        // Received → Validating: always, immediately.
        state = self.advance(message, state, ProcessingState::Validating);
        if message.sender.trim().is_empty() {
            return Err((
                state,
                ProcessError::InvalidMessage("empty sender".into()),
            ));
        }
        if message.body.trim().is_empty() {
            return Err((state, ProcessError::InvalidMessage("empty body".into())));
        }

        // Validating → Classifying.
        state = self.advance(message, state, ProcessingState::Classifying);
        let classification = self
            .classifier
            .classify(message)
            .await
            .map_err(|e| (state, ProcessError::ClassificationFailed(e)))?;

        // Classifying → Routing: always; decision attached to the in-flight
        // record so a later failure still reports what was decided.
        state = self.advance(message, state, ProcessingState::Routing);
        let decision = route(classification.confidence, &self.thresholds);
        *decision_slot = Some(decision);
        debug!(
            id = %message.id,
            confidence = classification.confidence,
            decision = decision.label(),
            "Routing decision"
        );

        // Routing → Acting.
        state = self.advance(message, state, ProcessingState::Acting);
        self.act(message, &classification, decision)
            .await
            .map_err(|e| (state, e))
    }

    fn advance(
        &self,
        message: &Message,
        from: ProcessingState,
        to: ProcessingState,
    ) -> ProcessingState {
        debug!(id = %message.id, from = from.label(), to = to.label(), "State transition");
        to
    }

    /// Execute the routed action's side effect.
    async fn act(
        &self,
        message: &Message,
        classification: &Classification,
        decision: RoutingDecision,
    ) -> Result<ActionTaken, ProcessError> {
        match decision {
            RoutingDecision::AutoRespond => {
                let body = &classification.suggested_action;
                self.mailbox_breaker
                    .call(
                        |cooldown| MailboxError::DependencyUnavailable { cooldown },
                        || {
                            retry_with_backoff(&self.retry, mailbox_error_transient, || {
                                self.mailbox.send_reply(&message.id, body)
                            })
                        },
                    )
                    .await?;
                info!(id = %message.id, "Auto-response sent");
                Ok(ActionTaken {
                    description: format!("auto-response sent: {body}"),
                    response_sent: true,
                    escalation_group_id: None,
                    error_detail: None,
                })
            }
            RoutingDecision::SuggestResponse => Ok(ActionTaken {
                description: format!(
                    "response suggested for approval: {}",
                    classification.suggested_action
                ),
                response_sent: false,
                escalation_group_id: None,
                error_detail: None,
            }),
            RoutingDecision::HumanReview => Ok(ActionTaken {
                description: format!(
                    "flagged for human review ({} urgency, category {})",
                    classification.urgency.label(),
                    classification.category.label()
                ),
                response_sent: false,
                escalation_group_id: None,
                error_detail: None,
            }),
            RoutingDecision::Escalate => {
                let assembly = self.assembler.assemble(message, classification).await?;
                // Persist the group before the outcome so the invariant
                // (group exists iff outcome references it) holds on crash.
                self.store
                    .insert_group(&assembly.group)
                    .await
                    .map_err(ProcessError::GroupPersistence)?;
                Ok(ActionTaken {
                    description: format!(
                        "escalated to group '{}' with {} members",
                        assembly.group.name,
                        assembly.group.members.len()
                    ),
                    response_sent: false,
                    escalation_group_id: Some(assembly.group.id.clone()),
                    // Briefing-post failure is non-fatal but recorded.
                    error_detail: assembly.briefing_error,
                })
            }
        }
    }
}

fn mailbox_error_transient(e: &MailboxError) -> bool {
    !matches!(e, MailboxError::DependencyUnavailable { .. })
}
