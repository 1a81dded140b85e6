//! In-memory `OutcomeStore` backend.
//!
//! The engine core only needs queryable, append-once semantics; durable
//! backends are a collaborator concern and plug in behind the same trait.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::pipeline::types::{EscalationGroup, GroupStatus, ProcessingOutcome, RoutingDecision};
use crate::store::traits::OutcomeStore;

/// In-memory store keyed by message id / group id.
#[derive(Default)]
pub struct MemoryStore {
    outcomes: RwLock<HashMap<String, ProcessingOutcome>>,
    groups: RwLock<HashMap<String, EscalationGroup>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OutcomeStore for MemoryStore {
    async fn record_outcome(&self, outcome: &ProcessingOutcome) -> Result<(), StoreError> {
        let mut outcomes = self.outcomes.write().await;
        if outcomes.contains_key(&outcome.message_id) {
            return Err(StoreError::DuplicateOutcome(outcome.message_id.clone()));
        }
        outcomes.insert(outcome.message_id.clone(), outcome.clone());
        Ok(())
    }

    async fn get_outcome(
        &self,
        message_id: &str,
    ) -> Result<Option<ProcessingOutcome>, StoreError> {
        Ok(self.outcomes.read().await.get(message_id).cloned())
    }

    async fn outcomes_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ProcessingOutcome>, StoreError> {
        let outcomes = self.outcomes.read().await;
        let mut hits: Vec<ProcessingOutcome> = outcomes
            .values()
            .filter(|o| o.finished_at >= from && o.finished_at <= to)
            .cloned()
            .collect();
        hits.sort_by_key(|o| o.finished_at);
        Ok(hits)
    }

    async fn outcomes_by_decision(
        &self,
        decision: RoutingDecision,
    ) -> Result<Vec<ProcessingOutcome>, StoreError> {
        let outcomes = self.outcomes.read().await;
        let mut hits: Vec<ProcessingOutcome> = outcomes
            .values()
            .filter(|o| o.decision == Some(decision))
            .cloned()
            .collect();
        hits.sort_by_key(|o| o.finished_at);
        Ok(hits)
    }

    async fn insert_group(&self, group: &EscalationGroup) -> Result<(), StoreError> {
        self.groups
            .write()
            .await
            .insert(group.id.clone(), group.clone());
        Ok(())
    }

    async fn get_group(&self, group_id: &str) -> Result<Option<EscalationGroup>, StoreError> {
        Ok(self.groups.read().await.get(group_id).cloned())
    }

    async fn group_for_message(
        &self,
        message_id: &str,
    ) -> Result<Option<EscalationGroup>, StoreError> {
        Ok(self
            .groups
            .read()
            .await
            .values()
            .find(|g| g.message_id == message_id)
            .cloned())
    }

    async fn resolve_group(
        &self,
        group_id: &str,
        notes: Option<String>,
    ) -> Result<(), StoreError> {
        let mut groups = self.groups.write().await;
        let group = groups
            .get_mut(group_id)
            .ok_or_else(|| StoreError::GroupNotFound(group_id.to_string()))?;
        group.status = GroupStatus::Resolved;
        group.resolution_notes = notes;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::ProcessingState;

    fn outcome(message_id: &str, decision: RoutingDecision) -> ProcessingOutcome {
        let now = Utc::now();
        ProcessingOutcome {
            message_id: message_id.into(),
            state: ProcessingState::Completed,
            decision: Some(decision),
            action_description: "test".into(),
            response_sent: false,
            escalation_group_id: None,
            error: None,
            failed_at: None,
            started_at: now,
            finished_at: now,
            duration_ms: 1,
        }
    }

    #[tokio::test]
    async fn outcomes_are_append_once() {
        let store = MemoryStore::new();
        let o = outcome("m-1", RoutingDecision::AutoRespond);
        store.record_outcome(&o).await.unwrap();

        let dup = store.record_outcome(&o).await;
        assert!(matches!(dup, Err(StoreError::DuplicateOutcome(_))));

        let fetched = store.get_outcome("m-1").await.unwrap().unwrap();
        assert_eq!(fetched.decision, Some(RoutingDecision::AutoRespond));
    }

    #[tokio::test]
    async fn query_by_decision() {
        let store = MemoryStore::new();
        store
            .record_outcome(&outcome("m-1", RoutingDecision::Escalate))
            .await
            .unwrap();
        store
            .record_outcome(&outcome("m-2", RoutingDecision::AutoRespond))
            .await
            .unwrap();

        let escalated = store
            .outcomes_by_decision(RoutingDecision::Escalate)
            .await
            .unwrap();
        assert_eq!(escalated.len(), 1);
        assert_eq!(escalated[0].message_id, "m-1");
    }

    #[tokio::test]
    async fn query_by_date_range() {
        let store = MemoryStore::new();
        store
            .record_outcome(&outcome("m-1", RoutingDecision::HumanReview))
            .await
            .unwrap();

        let hits = store
            .outcomes_between(Utc::now() - chrono::Duration::minutes(1), Utc::now())
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);

        let none = store
            .outcomes_between(
                Utc::now() - chrono::Duration::hours(2),
                Utc::now() - chrono::Duration::hours(1),
            )
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn group_resolution() {
        let store = MemoryStore::new();
        let group = EscalationGroup {
            id: "g-1".into(),
            message_id: "m-1".into(),
            name: "escalation-20260824-abcd".into(),
            members: vec!["a@x.com".into(), "b@x.com".into()],
            status: GroupStatus::Active,
            resolution_notes: None,
            created_at: Utc::now(),
        };
        store.insert_group(&group).await.unwrap();

        store
            .resolve_group("g-1", Some("root cause found".into()))
            .await
            .unwrap();
        let resolved = store.get_group("g-1").await.unwrap().unwrap();
        assert_eq!(resolved.status, GroupStatus::Resolved);
        assert_eq!(resolved.resolution_notes.as_deref(), Some("root cause found"));

        assert!(matches!(
            store.resolve_group("missing", None).await,
            Err(StoreError::GroupNotFound(_))
        ));
    }

    #[tokio::test]
    async fn group_lookup_by_message() {
        let store = MemoryStore::new();
        let group = EscalationGroup {
            id: "g-2".into(),
            message_id: "m-9".into(),
            name: "billing-20260824-ffff".into(),
            members: vec!["a@x.com".into(), "b@x.com".into()],
            status: GroupStatus::Active,
            resolution_notes: None,
            created_at: Utc::now(),
        };
        store.insert_group(&group).await.unwrap();

        let found = store.group_for_message("m-9").await.unwrap();
        assert_eq!(found.unwrap().id, "g-2");
        assert!(store.group_for_message("m-0").await.unwrap().is_none());
    }
}
