//! Anthropic Messages API (`POST /v1/messages`).

use async_trait::async_trait;
use serde_json::{json, Value};

use super::provider::{non_empty, send_json, Credential, SummarizeError, SummaryProvider};
use crate::config::{EndpointConfig, ProviderKind};

const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct ClaudeProvider {
    client: reqwest::Client,
    endpoint: EndpointConfig,
    max_tokens: u32,
}

impl ClaudeProvider {
    pub fn new(client: reqwest::Client, endpoint: EndpointConfig, max_tokens: u32) -> Self {
        Self {
            client,
            endpoint,
            max_tokens,
        }
    }

    fn body(&self, prompt: &str) -> Value {
        json!({
            "model": self.endpoint.model,
            "max_tokens": self.max_tokens,
            "messages": [
                { "role": "user", "content": prompt }
            ]
        })
    }
}

/// Concatenate the `text` blocks of a Messages API reply.
pub fn parse_response(json: &Value) -> Result<String, SummarizeError> {
    let blocks = json["content"]
        .as_array()
        .ok_or_else(|| SummarizeError::Parse {
            provider: ProviderKind::Claude,
            detail: "missing `content` array".into(),
        })?;

    let text: String = blocks
        .iter()
        .filter(|b| b["type"] == "text")
        .filter_map(|b| b["text"].as_str())
        .collect();
    non_empty(ProviderKind::Claude, text)
}

#[async_trait]
impl SummaryProvider for ClaudeProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Claude
    }

    async fn submit(&self, prompt: &str, credential: &Credential) -> Result<String, SummarizeError> {
        let url = format!("{}/v1/messages", self.endpoint.base_url.trim_end_matches('/'));
        let request = self
            .client
            .post(&url)
            .header("x-api-key", credential.expose())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&self.body(prompt));

        let json = send_json(ProviderKind::Claude, request).await?;
        parse_response(&json)
    }
}
