//! OpenAI-style chat-completions (`POST /v1/chat/completions`).
//!
//! Serves both OpenAI and DeepSeek; only the endpoint and the
//! [`ProviderKind`] differ.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::provider::{non_empty, send_json, Credential, SummarizeError, SummaryProvider};
use crate::config::{EndpointConfig, ProviderKind};

pub struct OpenAiCompatProvider {
    kind: ProviderKind,
    client: reqwest::Client,
    endpoint: EndpointConfig,
    max_tokens: u32,
}

impl OpenAiCompatProvider {
    pub fn new(
        kind: ProviderKind,
        client: reqwest::Client,
        endpoint: EndpointConfig,
        max_tokens: u32,
    ) -> Self {
        Self {
            kind,
            client,
            endpoint,
            max_tokens,
        }
    }

    fn body(&self, prompt: &str) -> Value {
        json!({
            "model": self.endpoint.model,
            "messages": [
                { "role": "user", "content": prompt }
            ],
            "max_tokens": self.max_tokens,
            "stream": false
        })
    }
}

/// `choices[0].message.content` of a chat-completions reply.
pub fn parse_response(kind: ProviderKind, json: &Value) -> Result<String, SummarizeError> {
    let content = json["choices"][0]["message"]["content"]
        .as_str()
        .ok_or_else(|| SummarizeError::Parse {
            provider: kind,
            detail: "missing `choices[0].message.content`".into(),
        })?;
    non_empty(kind, content.to_string())
}

#[async_trait]
impl SummaryProvider for OpenAiCompatProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn submit(&self, prompt: &str, credential: &Credential) -> Result<String, SummarizeError> {
        let url = format!(
            "{}/v1/chat/completions",
            self.endpoint.base_url.trim_end_matches('/')
        );
        let request = self
            .client
            .post(&url)
            .bearer_auth(credential.expose())
            .json(&self.body(prompt));

        let json = send_json(self.kind, request).await?;
        parse_response(self.kind, &json)
    }
}
