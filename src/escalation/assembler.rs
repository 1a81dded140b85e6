//! Team assembler — selects responders, creates the collaboration group,
//! and posts the contextual briefing.
//!
//! Group creation failure is a full action failure (no orphan group).
//! A briefing-post failure after a successful creation is non-fatal: the
//! group stands, the failure is logged and carried in the assembly result.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::channels::GroupChatProvider;
use crate::config::{EscalationConfig, ResilienceConfig};
use crate::error::{AssemblyError, ChatError};
use crate::escalation::directory::ResponderDirectory;
use crate::pipeline::types::{Classification, EscalationGroup, GroupStatus, Message};
use crate::resilience::{CircuitBreaker, RetryPolicy, retry_with_backoff};

/// Result of a successful assembly. `briefing_error` is set when the group
/// was created but the briefing post failed (partial success).
#[derive(Debug)]
pub struct AssemblyResult {
    pub group: EscalationGroup,
    pub briefing_error: Option<String>,
}

/// Assembles ad-hoc escalation teams via the group-chat provider.
pub struct TeamAssembler {
    chat: Arc<dyn GroupChatProvider>,
    directory: Arc<ResponderDirectory>,
    config: EscalationConfig,
    retry: RetryPolicy,
    breaker: CircuitBreaker,
}

impl TeamAssembler {
    pub fn new(
        chat: Arc<dyn GroupChatProvider>,
        directory: Arc<ResponderDirectory>,
        config: EscalationConfig,
        resilience: &ResilienceConfig,
    ) -> Self {
        Self {
            chat,
            directory,
            config,
            retry: RetryPolicy::from_config(resilience),
            breaker: CircuitBreaker::from_config("group-chat", resilience),
        }
    }

    /// Assemble an escalation group for a message and post its briefing.
    pub async fn assemble(
        &self,
        message: &Message,
        classification: &Classification,
    ) -> Result<AssemblyResult, AssemblyError> {
        let members = self.select_members(classification)?;
        let name = group_name(classification, &message.subject);

        let group_id = self
            .breaker
            .call(
                |cooldown| {
                    AssemblyError::GroupCreation(ChatError::DependencyUnavailable { cooldown })
                },
                || async {
                    retry_with_backoff(&self.retry, chat_error_transient, || {
                        self.chat.create_group(&name, &members)
                    })
                    .await
                    .map_err(AssemblyError::GroupCreation)
                },
            )
            .await?;

        info!(
            group_id = %group_id,
            name = %name,
            members = members.len(),
            message_id = %message.id,
            "Escalation group created"
        );

        // Exactly one briefing per successful assembly. A post failure does
        // not roll back the group.
        let briefing = build_briefing(message, classification);
        let briefing_error = match self
            .breaker
            .call(
                |cooldown| ChatError::DependencyUnavailable { cooldown },
                || {
                    retry_with_backoff(&self.retry, chat_error_transient, || {
                        self.chat.post_message(&group_id, &briefing)
                    })
                },
            )
            .await
        {
            Ok(()) => None,
            Err(e) => {
                warn!(
                    group_id = %group_id,
                    error = %e,
                    "Briefing post failed; keeping group"
                );
                Some(format!("briefing post failed: {e}"))
            }
        };

        Ok(AssemblyResult {
            group: EscalationGroup {
                id: group_id,
                message_id: message.id.clone(),
                name,
                members,
                status: GroupStatus::Active,
                resolution_notes: None,
                created_at: Utc::now(),
            },
            briefing_error,
        })
    }

    /// Select members: union of responders whose expertise intersects
    /// `required_expertise ∪ {category default}`, padded with the fallback
    /// responder and then remaining directory members up to the minimum.
    fn select_members(
        &self,
        classification: &Classification,
    ) -> Result<Vec<String>, AssemblyError> {
        let mut query = classification.required_expertise.clone();
        if let Some(tag) = classification.category.default_expertise() {
            query.push(tag.to_string());
        }

        let mut members: Vec<String> = self
            .directory
            .with_expertise(&query)
            .into_iter()
            .map(|r| r.address.clone())
            .collect();

        if members.len() < self.config.min_group_size {
            let fallback = self.config.fallback_responder.clone();
            if !members.contains(&fallback) {
                members.push(fallback);
            }
        }
        for responder in self.directory.all() {
            if members.len() >= self.config.min_group_size {
                break;
            }
            if !members.contains(&responder.address) {
                members.push(responder.address.clone());
            }
        }

        if members.len() < self.config.min_group_size {
            return Err(AssemblyError::NoResponders);
        }
        Ok(members)
    }
}

fn chat_error_transient(e: &ChatError) -> bool {
    !matches!(e, ChatError::DependencyUnavailable { .. })
}

/// Deterministic group name from category, current date, and a short
/// non-cryptographic hash of the subject line.
fn group_name(classification: &Classification, subject: &str) -> String {
    let mut hasher = DefaultHasher::new();
    subject.hash(&mut hasher);
    let short = (hasher.finish() & 0xffff) as u16;
    format!(
        "{}-{}-{:04x}",
        classification.category.label(),
        Utc::now().format("%Y%m%d"),
        short
    )
}

/// Structured briefing posted once after group creation.
fn build_briefing(message: &Message, classification: &Classification) -> String {
    let expertise = if classification.required_expertise.is_empty() {
        "none specified".to_string()
    } else {
        classification.required_expertise.join(", ")
    };
    format!(
        "Escalated message {id} from {sender}\n\
         Subject: {subject}\n\n\
         Urgency: {urgency}\n\
         Category: {category}\n\
         Confidence: {confidence:.1}\n\
         Reasoning: {reasoning}\n\
         Suggested action: {action}\n\
         Required expertise: {expertise}",
        id = message.id,
        sender = message.sender,
        subject = message.subject,
        urgency = classification.urgency.label(),
        category = classification.category.label(),
        confidence = classification.confidence,
        reasoning = classification.reasoning,
        action = classification.suggested_action,
        expertise = expertise,
    )
}
