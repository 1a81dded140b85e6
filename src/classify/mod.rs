//! Classification client — converts a message into a structured
//! `Classification` via the external model service.
//!
//! The client owns prompt construction, body truncation, strict parsing of
//! the model's JSON, and the per-category confidence adjustment. Transport
//! errors are retried and circuit-broken; malformed output is a semantic
//! failure surfaced as `InvalidResponse` without retry.

pub mod service;

pub use service::{ClassifierConfig, ClassifierModel, HttpClassifierModel};

use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::ResilienceConfig;
use crate::error::ClassificationError;
use crate::pipeline::types::{Category, Classification, Message, Urgency};
use crate::resilience::{CircuitBreaker, RetryPolicy, retry_with_backoff};

/// Body text is truncated to this many characters before prompt build, to
/// respect the service's token limits. The full body is never sent.
const MAX_CLASSIFY_BODY_CHARS: usize = 2000;

/// Classification client wrapping the model transport with resilience.
pub struct ClassificationClient {
    model: Arc<dyn ClassifierModel>,
    retry: RetryPolicy,
    breaker: CircuitBreaker,
}

impl ClassificationClient {
    pub fn new(model: Arc<dyn ClassifierModel>, resilience: &ResilienceConfig) -> Self {
        Self {
            model,
            retry: RetryPolicy::from_config(resilience),
            breaker: CircuitBreaker::from_config("classifier", resilience),
        }
    }

    /// Classify a message. The transport call goes through breaker-then-retry;
    /// parsing and adjustment happen outside the breaker so semantic failures
    /// never trip it.
    pub async fn classify(
        &self,
        message: &Message,
    ) -> Result<Classification, ClassificationError> {
        let system = build_system_prompt();
        let user = build_user_prompt(message);

        let raw = self
            .breaker
            .call(
                |cooldown| ClassificationError::DependencyUnavailable { cooldown },
                || {
                    retry_with_backoff(&self.retry, ClassificationError::is_transient, || {
                        self.model.complete(&system, &user)
                    })
                },
            )
            .await?;

        let classification = parse_classification(&raw).map_err(|e| {
            warn!(
                id = %message.id,
                raw_response = %raw,
                error = %e,
                "Rejected malformed classification payload"
            );
            e
        })?;

        debug!(
            id = %message.id,
            category = classification.category.label(),
            confidence = classification.confidence,
            urgency = classification.urgency.label(),
            "Message classified"
        );
        Ok(classification)
    }
}

// ── Prompt construction ─────────────────────────────────────────────

fn build_system_prompt() -> String {
    "You are an email triage classifier for a support inbox. Classify the \
     message into exactly one category:\n\
     question, billing, technical, complaint, feature_request, escalation, spam, other\n\n\
     Respond with ONLY a JSON object:\n\
     {\"category\": \"...\", \"confidence\": 0-100, \"reasoning\": \"...\", \
     \"urgency\": \"low|medium|high|critical\", \"suggested_action\": \"...\", \
     \"required_expertise\": [\"...\"], \"estimated_effort\": \"...\"}\n\n\
     Rules:\n\
     - confidence is how certain you are of the category, 0-100\n\
     - required_expertise lists skill tags a human team would need (may be empty)\n\
     - keep reasoning to one or two sentences"
        .to_string()
}

fn build_user_prompt(message: &Message) -> String {
    let body_preview: String = message.body.chars().take(MAX_CLASSIFY_BODY_CHARS).collect();

    let mut prompt = String::with_capacity(body_preview.len() + 128);
    prompt.push_str(&format!("From: {}\n", message.sender));
    prompt.push_str(&format!("Subject: {}\n", message.subject));
    prompt.push_str(&format!("\nMessage:\n{body_preview}"));
    prompt
}

// ── Response parsing ────────────────────────────────────────────────

/// Raw model payload. Required fields are `Option` so their absence is an
/// explicit rejection, never a silent default.
#[derive(Debug, serde::Deserialize)]
struct RawClassification {
    category: Option<String>,
    confidence: Option<f64>,
    urgency: Option<String>,
    #[serde(default)]
    reasoning: String,
    #[serde(default)]
    suggested_action: String,
    #[serde(default)]
    required_expertise: Vec<String>,
    #[serde(default)]
    estimated_effort: String,
}

/// Parse and validate the model output, applying the category adjustment.
fn parse_classification(raw: &str) -> Result<Classification, ClassificationError> {
    let json_str = extract_json_object(raw);
    let parsed: RawClassification = serde_json::from_str(&json_str)
        .map_err(|e| ClassificationError::InvalidResponse(format!("JSON parse error: {e}")))?;

    let category_raw = parsed
        .category
        .ok_or_else(|| ClassificationError::InvalidResponse("missing field: category".into()))?;
    let category = Category::parse(&category_raw).ok_or_else(|| {
        ClassificationError::InvalidResponse(format!("unrecognized category: '{category_raw}'"))
    })?;

    let raw_confidence = parsed
        .confidence
        .ok_or_else(|| ClassificationError::InvalidResponse("missing field: confidence".into()))?;
    if !raw_confidence.is_finite() {
        return Err(ClassificationError::InvalidResponse(
            "confidence is not a finite number".into(),
        ));
    }

    let urgency_raw = parsed
        .urgency
        .ok_or_else(|| ClassificationError::InvalidResponse("missing field: urgency".into()))?;
    let urgency = Urgency::parse(&urgency_raw).ok_or_else(|| {
        ClassificationError::InvalidResponse(format!("unrecognized urgency: '{urgency_raw}'"))
    })?;

    Ok(Classification {
        category,
        confidence: adjust_confidence(raw_confidence, category),
        reasoning: parsed.reasoning,
        urgency,
        suggested_action: parsed.suggested_action,
        required_expertise: parsed
            .required_expertise
            .into_iter()
            .map(|t| t.to_lowercase())
            .collect(),
        estimated_effort: parsed.estimated_effort,
    })
}

/// Blend the raw model score with the static per-category multiplier,
/// clamped to [0, 100].
fn adjust_confidence(raw: f64, category: Category) -> f64 {
    (raw * category.confidence_multiplier()).clamp(0.0, 100.0)
}

/// Extract a JSON object from model output (handles markdown wrapping).
fn extract_json_object(text: &str) -> String {
    let trimmed = text.trim();

    if trimmed.starts_with('{') {
        return trimmed.to_string();
    }

    if let Some(start) = trimmed.find("```json") {
        let after = &trimmed[start + 7..];
        if let Some(end) = after.find("```") {
            return after[..end].trim().to_string();
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}'))
        && end > start
    {
        return trimmed[start..=end].to_string();
    }

    trimmed.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn sample_message(body: &str) -> Message {
        Message {
            id: "msg-1".into(),
            sender: "alice@example.com".into(),
            subject: "Server trouble".into(),
            body: body.into(),
            received_at: Utc::now(),
            thread_id: None,
        }
    }

    const VALID_RESPONSE: &str = r#"{
        "category": "technical",
        "confidence": 80.0,
        "reasoning": "Reports a server outage",
        "urgency": "high",
        "suggested_action": "Check server status",
        "required_expertise": ["Network", "linux"],
        "estimated_effort": "1-2 hours"
    }"#;

    // ── Parsing ─────────────────────────────────────────────────────

    #[test]
    fn parse_valid_payload() {
        let classification = parse_classification(VALID_RESPONSE).unwrap();
        assert_eq!(classification.category, Category::Technical);
        assert_eq!(classification.urgency, Urgency::High);
        // 80 * 0.95 (technical multiplier)
        assert!((classification.confidence - 76.0).abs() < 1e-9);
        assert_eq!(classification.required_expertise, vec!["network", "linux"]);
    }

    #[test]
    fn parse_rejects_missing_category() {
        let raw = r#"{"confidence": 50, "urgency": "low"}"#;
        let err = parse_classification(raw).unwrap_err();
        assert!(matches!(err, ClassificationError::InvalidResponse(_)));
        assert!(!err.is_transient());
    }

    #[test]
    fn parse_rejects_missing_confidence() {
        let raw = r#"{"category": "spam", "urgency": "low"}"#;
        assert!(parse_classification(raw).is_err());
    }

    #[test]
    fn parse_rejects_unknown_category() {
        let raw = r#"{"category": "urgent", "confidence": 50, "urgency": "low"}"#;
        let err = parse_classification(raw).unwrap_err();
        assert!(err.to_string().contains("unrecognized category"));
    }

    #[test]
    fn parse_rejects_unknown_urgency() {
        let raw = r#"{"category": "spam", "confidence": 50, "urgency": "severe"}"#;
        assert!(parse_classification(raw).is_err());
    }

    #[test]
    fn parse_handles_markdown_fencing() {
        let raw = format!("Here is my analysis:\n```json\n{VALID_RESPONSE}\n```");
        let classification = parse_classification(&raw).unwrap();
        assert_eq!(classification.category, Category::Technical);
    }

    #[test]
    fn parse_defaults_optional_fields() {
        let raw = r#"{"category": "other", "confidence": 30, "urgency": "low"}"#;
        let classification = parse_classification(raw).unwrap();
        assert!(classification.reasoning.is_empty());
        assert!(classification.required_expertise.is_empty());
    }

    // ── Confidence adjustment ───────────────────────────────────────

    #[test]
    fn adjustment_clamps_to_scale() {
        assert_eq!(adjust_confidence(99.0, Category::Spam), 100.0); // 99 * 1.05
        assert_eq!(adjust_confidence(-5.0, Category::Question), 0.0);
    }

    #[test]
    fn escalation_category_lowers_score() {
        let adjusted = adjust_confidence(50.0, Category::Escalation);
        assert!((adjusted - 35.0).abs() < 1e-9);
    }

    // ── Client behavior with mock models ────────────────────────────

    struct MockModel {
        response: String,
        calls: AtomicU32,
        fail_first: u32,
    }

    impl MockModel {
        fn new(response: &str) -> Self {
            Self {
                response: response.into(),
                calls: AtomicU32::new(0),
                fail_first: 0,
            }
        }

        fn flaky(response: &str, fail_first: u32) -> Self {
            Self {
                response: response.into(),
                calls: AtomicU32::new(0),
                fail_first,
            }
        }
    }

    #[async_trait]
    impl ClassifierModel for MockModel {
        fn model_name(&self) -> &str {
            "mock"
        }

        async fn complete(&self, _system: &str, _user: &str) -> Result<String, ClassificationError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                return Err(ClassificationError::RequestFailed("connection reset".into()));
            }
            Ok(self.response.clone())
        }
    }

    fn fast_resilience() -> ResilienceConfig {
        ResilienceConfig {
            max_retries: 3,
            backoff_base: std::time::Duration::from_millis(5),
            max_backoff: std::time::Duration::from_millis(20),
            breaker_failure_threshold: 5,
            breaker_cooldown: std::time::Duration::from_millis(50),
        }
    }

    #[tokio::test]
    async fn classify_truncates_body() {
        let model = Arc::new(MockModel::new(VALID_RESPONSE));
        let client = ClassificationClient::new(model, &fast_resilience());
        let message = sample_message(&"x".repeat(10_000));

        // Would only fail on prompt-size limits server-side; here we assert
        // the prompt builder itself bounds the content.
        let prompt = build_user_prompt(&message);
        assert!(prompt.len() < MAX_CLASSIFY_BODY_CHARS + 200);

        let classification = client.classify(&message).await.unwrap();
        assert_eq!(classification.category, Category::Technical);
    }

    #[tokio::test]
    async fn classify_retries_transient_failures() {
        let model = Arc::new(MockModel::flaky(VALID_RESPONSE, 2));
        let client = ClassificationClient::new(Arc::clone(&model) as _, &fast_resilience());

        let classification = client.classify(&sample_message("help")).await.unwrap();
        assert_eq!(classification.category, Category::Technical);
        assert_eq!(model.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn classify_does_not_retry_malformed_output() {
        let model = Arc::new(MockModel::new(r#"{"category": "nonsense"}"#));
        let client = ClassificationClient::new(Arc::clone(&model) as _, &fast_resilience());

        let err = client.classify(&sample_message("help")).await.unwrap_err();
        assert!(matches!(err, ClassificationError::InvalidResponse(_)));
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn breaker_opens_after_sustained_failures() {
        let mut resilience = fast_resilience();
        resilience.max_retries = 0;
        resilience.breaker_failure_threshold = 2;
        resilience.breaker_cooldown = std::time::Duration::from_secs(60);

        let model = Arc::new(MockModel::flaky(VALID_RESPONSE, u32::MAX));
        let client = ClassificationClient::new(Arc::clone(&model) as _, &resilience);
        let message = sample_message("down");

        for _ in 0..2 {
            let _ = client.classify(&message).await;
        }
        // Breaker now open: fails fast without calling the model.
        let err = client.classify(&message).await.unwrap_err();
        assert!(matches!(
            err,
            ClassificationError::DependencyUnavailable { .. }
        ));
        assert_eq!(model.calls.load(Ordering::SeqCst), 2);
    }
}
