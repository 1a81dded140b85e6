//! HTTP group-chat adapter.
//!
//! Talks to a webhook-style chat API: `POST {base}/groups` to create a
//! group, `POST {base}/groups/{id}/messages` to post into it.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::channels::GroupChatProvider;
use crate::error::ChatError;

/// Configuration for the HTTP chat provider.
#[derive(Debug, Clone)]
pub struct HttpChatConfig {
    pub base_url: String,
    pub api_key: SecretString,
}

impl HttpChatConfig {
    /// Build from `CHAT_URL` / `CHAT_API_KEY`. Returns `None` when the URL
    /// is not set.
    pub fn from_env() -> Option<Self> {
        let base_url = std::env::var("CHAT_URL").ok()?;
        let api_key = std::env::var("CHAT_API_KEY").unwrap_or_default();
        Some(Self {
            base_url,
            api_key: SecretString::from(api_key),
        })
    }
}

#[derive(Serialize)]
struct CreateGroupRequest<'a> {
    name: &'a str,
    members: &'a [String],
}

#[derive(Deserialize)]
struct CreateGroupResponse {
    id: String,
}

#[derive(Serialize)]
struct PostMessageRequest<'a> {
    text: &'a str,
}

/// Group-chat provider over a plain HTTP API.
pub struct HttpGroupChat {
    client: reqwest::Client,
    config: HttpChatConfig,
}

impl HttpGroupChat {
    pub fn new(config: HttpChatConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }
}

#[async_trait]
impl GroupChatProvider for HttpGroupChat {
    async fn create_group(&self, name: &str, members: &[String]) -> Result<String, ChatError> {
        let url = format!("{}/groups", self.config.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .bearer_auth(self.config.api_key.expose_secret())
            .json(&CreateGroupRequest { name, members })
            .send()
            .await
            .map_err(|e| ChatError::CreateFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ChatError::CreateFailed(format!("HTTP {}", response.status())));
        }

        let body: CreateGroupResponse = response
            .json()
            .await
            .map_err(|e| ChatError::CreateFailed(format!("body decode: {e}")))?;
        Ok(body.id)
    }

    async fn post_message(&self, group_id: &str, body: &str) -> Result<(), ChatError> {
        let url = format!(
            "{}/groups/{}/messages",
            self.config.base_url.trim_end_matches('/'),
            group_id
        );
        let response = self
            .client
            .post(&url)
            .bearer_auth(self.config.api_key.expose_secret())
            .json(&PostMessageRequest { text: body })
            .send()
            .await
            .map_err(|e| ChatError::PostFailed {
                group_id: group_id.to_string(),
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(ChatError::PostFailed {
                group_id: group_id.to_string(),
                reason: format!("HTTP {}", response.status()),
            });
        }
        Ok(())
    }
}
