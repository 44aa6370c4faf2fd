//! Google Gemini (`POST /v1beta/models/{model}:generateContent`).

use async_trait::async_trait;
use serde_json::{json, Value};

use super::provider::{non_empty, send_json, Credential, SummarizeError, SummaryProvider};
use crate::config::{EndpointConfig, ProviderKind};

pub struct GeminiProvider {
    client: reqwest::Client,
    endpoint: EndpointConfig,
    max_tokens: u32,
}

impl GeminiProvider {
    pub fn new(client: reqwest::Client, endpoint: EndpointConfig, max_tokens: u32) -> Self {
        Self {
            client,
            endpoint,
            max_tokens,
        }
    }

    fn url(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.endpoint.base_url.trim_end_matches('/'),
            self.endpoint.model
        )
    }

    fn body(&self, prompt: &str) -> Value {
        json!({
            "contents": [
                { "role": "user", "parts": [ { "text": prompt } ] }
            ],
            "generationConfig": { "maxOutputTokens": self.max_tokens }
        })
    }
}

/// Text parts of the first candidate, concatenated.
pub fn parse_response(json: &Value) -> Result<String, SummarizeError> {
    let parts = json["candidates"][0]["content"]["parts"]
        .as_array()
        .ok_or_else(|| {
            let reason = json["promptFeedback"]["blockReason"]
                .as_str()
                .map(|r| format!("prompt blocked: {r}"))
                .unwrap_or_else(|| "missing `candidates[0].content.parts`".into());
            SummarizeError::Parse {
                provider: ProviderKind::Gemini,
                detail: reason,
            }
        })?;

    let text: String = parts.iter().filter_map(|p| p["text"].as_str()).collect();
    non_empty(ProviderKind::Gemini, text)
}

#[async_trait]
impl SummaryProvider for GeminiProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Gemini
    }

    async fn submit(&self, prompt: &str, credential: &Credential) -> Result<String, SummarizeError> {
        let request = self
            .client
            .post(self.url())
            .header("x-goog-api-key", credential.expose())
            .json(&self.body(prompt));

        let json = send_json(ProviderKind::Gemini, request).await?;
        parse_response(&json)
    }
}
