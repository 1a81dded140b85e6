//! Classification model transport.
//!
//! The engine talks to the external LLM-style service through the
//! `ClassifierModel` trait; `HttpClassifierModel` is the production
//! implementation. Tests substitute fixed-response mocks.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::error::ClassificationError;

/// Raw completion interface to the classification service.
#[async_trait]
pub trait ClassifierModel: Send + Sync {
    /// Model identifier for logging.
    fn model_name(&self) -> &str;

    /// Submit system+user prompts, return the raw model output text.
    async fn complete(&self, system: &str, user: &str) -> Result<String, ClassificationError>;
}

/// Configuration for the HTTP classification service.
#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    pub url: String,
    pub api_key: SecretString,
    pub model: String,
}

impl ClassifierConfig {
    /// Build from `CLASSIFIER_URL` / `CLASSIFIER_API_KEY` / `CLASSIFIER_MODEL`.
    /// Returns `None` when the URL is not set (engine runs without a live
    /// classifier only in tests).
    pub fn from_env() -> Option<Self> {
        let url = std::env::var("CLASSIFIER_URL").ok()?;
        let api_key = std::env::var("CLASSIFIER_API_KEY").unwrap_or_default();
        let model =
            std::env::var("CLASSIFIER_MODEL").unwrap_or_else(|_| "triage-small".to_string());
        Some(Self {
            url,
            api_key: SecretString::from(api_key),
            model,
        })
    }
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: String,
}

/// Max tokens for a classification call — runs on every message, kept tight.
const CLASSIFY_MAX_TOKENS: u32 = 512;

/// Near-deterministic temperature for classification.
const CLASSIFY_TEMPERATURE: f32 = 0.1;

/// HTTP implementation over an OpenAI-compatible chat completion endpoint.
pub struct HttpClassifierModel {
    client: reqwest::Client,
    config: ClassifierConfig,
}

impl HttpClassifierModel {
    pub fn new(config: ClassifierConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }
}

#[async_trait]
impl ClassifierModel for HttpClassifierModel {
    fn model_name(&self) -> &str {
        &self.config.model
    }

    async fn complete(&self, system: &str, user: &str) -> Result<String, ClassificationError> {
        let request = CompletionRequest {
            model: &self.config.model,
            messages: vec![
                WireMessage {
                    role: "system",
                    content: system,
                },
                WireMessage {
                    role: "user",
                    content: user,
                },
            ],
            temperature: CLASSIFY_TEMPERATURE,
            max_tokens: CLASSIFY_MAX_TOKENS,
        };

        let response = self
            .client
            .post(&self.config.url)
            .bearer_auth(self.config.api_key.expose_secret())
            .json(&request)
            .send()
            .await
            .map_err(|e| ClassificationError::RequestFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ClassificationError::RequestFailed(format!(
                "HTTP {}",
                response.status()
            )));
        }

        let body: CompletionResponse = response
            .json()
            .await
            .map_err(|e| ClassificationError::RequestFailed(format!("body decode: {e}")))?;

        body.choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| {
                ClassificationError::InvalidResponse("completion had no choices".into())
            })
    }
}
