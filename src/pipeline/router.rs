//! Confidence router — pure decision function from score to action.
//!
//! No side effects, no external calls. Boundaries are inclusive on the
//! lower bound of each bucket, so a tie resolves to the higher-confidence
//! bucket.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::pipeline::types::RoutingDecision;

/// Confidence cut points, validated to be strictly descending at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thresholds {
    /// At or above: respond automatically.
    pub auto_handle: f64,
    /// At or above (below auto_handle): draft a suggestion for approval.
    pub suggest_response: f64,
    /// At or above (below suggest_response): flag for human review.
    /// Below this: escalate.
    pub human_review: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            auto_handle: 85.0,
            suggest_response: 60.0,
            human_review: 40.0,
        }
    }
}

impl Thresholds {
    /// Invalid thresholds are a fatal startup error, not a runtime condition.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let ordered = self.auto_handle > self.suggest_response
            && self.suggest_response > self.human_review
            && self.human_review > 0.0
            && self.auto_handle <= 100.0;
        if !ordered {
            return Err(ConfigError::InvalidThresholds {
                auto: self.auto_handle,
                suggest: self.suggest_response,
                review: self.human_review,
            });
        }
        Ok(())
    }
}

/// Map an adjusted confidence score to one of the four routing decisions.
///
/// Total over all f64 inputs and monotonic: a higher score never maps to a
/// less confident bucket.
pub fn route(confidence: f64, thresholds: &Thresholds) -> RoutingDecision {
    if confidence >= thresholds.auto_handle {
        RoutingDecision::AutoRespond
    } else if confidence >= thresholds.suggest_response {
        RoutingDecision::SuggestResponse
    } else if confidence >= thresholds.human_review {
        RoutingDecision::HumanReview
    } else {
        RoutingDecision::Escalate
    }
}
