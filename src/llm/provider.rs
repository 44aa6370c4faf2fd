//! The uniform summarize capability and the pieces every provider shares.
//!
//! Each provider hides its own request/response shape behind
//! [`SummaryProvider::submit`].  Nothing outside `llm` knows which HTTP API
//! is on the other end.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use super::claude::ClaudeProvider;
use super::gemini::GeminiProvider;
use super::openai::OpenAiCompatProvider;
use crate::config::{ProviderKind, SummarizeConfig};

// ---------------------------------------------------------------------------
// Credential
// ---------------------------------------------------------------------------

/// API key held in memory only.  `Debug` never prints the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

// ---------------------------------------------------------------------------
// SummarizeError
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Error)]
pub enum SummarizeError {
    #[error("{provider} rejected the API key (HTTP {status}): {body}")]
    Auth {
        provider: ProviderKind,
        status: u16,
        body: String,
    },

    #[error("{provider} rate limit hit: {body}")]
    RateLimited { provider: ProviderKind, body: String },

    #[error("{provider} quota exhausted: {body}")]
    QuotaExceeded { provider: ProviderKind, body: String },

    #[error("{provider} is unavailable (HTTP {status}): {body}")]
    Unavailable {
        provider: ProviderKind,
        status: u16,
        body: String,
    },

    /// Transport failure or timeout; no HTTP status was received.
    #[error("request to {provider} failed: {detail}")]
    Network {
        provider: ProviderKind,
        detail: String,
    },

    #[error("{provider} returned HTTP {status}: {body}")]
    Http {
        provider: ProviderKind,
        status: u16,
        body: String,
    },

    #[error("failed to parse {provider} response: {detail}")]
    Parse {
        provider: ProviderKind,
        detail: String,
    },

    #[error("{0} returned an empty response")]
    EmptyResponse(ProviderKind),

    #[error("no {0} provider is registered")]
    NotRegistered(ProviderKind),

    #[error("summarization cancelled")]
    Cancelled,
}

const QUOTA_MARKERS: [&str; 4] = ["insufficient_quota", "quota", "billing", "credit balance"];

fn mentions_quota(body: &str) -> bool {
    let lower = body.to_ascii_lowercase();
    QUOTA_MARKERS.iter().any(|m| lower.contains(m))
}

/// Map a non-success HTTP status (plus body) onto the error taxonomy.
pub fn classify_status(provider: ProviderKind, status: u16, body: String) -> SummarizeError {
    match status {
        401 | 403 => SummarizeError::Auth {
            provider,
            status,
            body,
        },
        402 => SummarizeError::QuotaExceeded { provider, body },
        429 if mentions_quota(&body) => SummarizeError::QuotaExceeded { provider, body },
        429 => SummarizeError::RateLimited { provider, body },
        500..=599 => SummarizeError::Unavailable {
            provider,
            status,
            body,
        },
        _ if mentions_quota(&body) => SummarizeError::QuotaExceeded { provider, body },
        _ => SummarizeError::Http {
            provider,
            status,
            body,
        },
    }
}

pub(crate) fn network_error(provider: ProviderKind, e: reqwest::Error) -> SummarizeError {
    let detail = if e.is_timeout() {
        format!("timed out: {e}")
    } else {
        e.to_string()
    };
    SummarizeError::Network { provider, detail }
}

/// Send a prepared request and return the parsed JSON body, classifying any
/// transport or HTTP failure.
pub(crate) async fn send_json(
    provider: ProviderKind,
    request: reqwest::RequestBuilder,
) -> Result<serde_json::Value, SummarizeError> {
    let response = request
        .send()
        .await
        .map_err(|e| network_error(provider, e))?;

    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| network_error(provider, e))?;

    if !status.is_success() {
        log::warn!(
            target: "video_synthesis::summarize",
            "{provider} API error: HTTP {}",
            status.as_u16()
        );
        return Err(classify_status(provider, status.as_u16(), body));
    }

    serde_json::from_str(&body).map_err(|e| SummarizeError::Parse {
        provider,
        detail: e.to_string(),
    })
}

/// Reject blank completions.  Non-blank replies pass through untouched.
pub(crate) fn non_empty(provider: ProviderKind, text: String) -> Result<String, SummarizeError> {
    if text.trim().is_empty() {
        Err(SummarizeError::EmptyResponse(provider))
    } else {
        Ok(text)
    }
}

// ---------------------------------------------------------------------------
// SummaryProvider trait
// ---------------------------------------------------------------------------

/// One remote language-model API.
///
/// Implementors must be `Send + Sync` so they can live behind an
/// `Arc<dyn SummaryProvider>` and be called from a worker thread.
#[async_trait]
pub trait SummaryProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Send `prompt` and return the model's reply text.
    async fn submit(&self, prompt: &str, credential: &Credential) -> Result<String, SummarizeError>;
}

// ---------------------------------------------------------------------------
// ProviderRegistry
// ---------------------------------------------------------------------------

/// Provider lookup by [`ProviderKind`].
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<ProviderKind, Arc<dyn SummaryProvider>>,
}

impl ProviderRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Every built-in provider, sharing one HTTP client with the configured
    /// per-request timeout.
    pub fn from_config(config: &SummarizeConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        let mut registry = Self::empty();
        for kind in ProviderKind::ALL {
            let endpoint = config.endpoint(kind).clone();
            let provider: Arc<dyn SummaryProvider> = match kind {
                ProviderKind::Claude => Arc::new(ClaudeProvider::new(
                    client.clone(),
                    endpoint,
                    config.max_tokens,
                )),
                ProviderKind::Gemini => Arc::new(GeminiProvider::new(
                    client.clone(),
                    endpoint,
                    config.max_tokens,
                )),
                ProviderKind::OpenAi | ProviderKind::DeepSeek => Arc::new(
                    OpenAiCompatProvider::new(kind, client.clone(), endpoint, config.max_tokens),
                ),
            };
            registry.providers.insert(kind, provider);
        }
        registry
    }

    /// Register (or replace) the provider for its own kind.
    pub fn with(mut self, provider: Arc<dyn SummaryProvider>) -> Self {
        self.providers.insert(provider.kind(), provider);
        self
    }

    pub fn get(&self, kind: ProviderKind) -> Option<Arc<dyn SummaryProvider>> {
        self.providers.get(&kind).cloned()
    }

    pub fn kinds(&self) -> Vec<ProviderKind> {
        let mut kinds: Vec<_> = self.providers.keys().copied().collect();
        kinds.sort_by_key(|k| ProviderKind::ALL.iter().position(|p| p == k));
        kinds
    }
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.kinds())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// MockProvider  (test-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
pub use mock::MockProvider;


// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned HTTP response on a loopback port; returns the base
    /// URL and a handle yielding the raw request.
    pub(crate) async fn serve_once(
        status: u16,
        body: &'static str,
    ) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                request.extend_from_slice(&buf[..n]);
                if n == 0 || request_complete(&request) {
                    break;
                }
            }
            let response = format!(
                "HTTP/1.1 {status} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            String::from_utf8_lossy(&request).into_owned()
        });
        (format!("http://{addr}"), handle)
    }

    fn request_complete(raw: &[u8]) -> bool {
        let text = String::from_utf8_lossy(raw);
        let Some(split) = text.find("\r\n\r\n") else {
            return false;
        };
        let length = text[..split]
            .lines()
            .find_map(|l| {
                let (name, value) = l.split_once(':')?;
                name.eq_ignore_ascii_case("content-length")
                    .then(|| value.trim().parse::<usize>().ok())
                    .flatten()
            })
            .unwrap_or(0);
        raw.len() >= split + 4 + length
    }

    #[test]
    fn replies_are_kept_verbatim_unless_blank() {
        let reply = "  - point one\n  - point two\n".to_string();
        assert_eq!(non_empty(ProviderKind::Claude, reply.clone()).unwrap(), reply);
        assert!(matches!(
            non_empty(ProviderKind::Claude, " \n\t".into()),
            Err(SummarizeError::EmptyResponse(ProviderKind::Claude))
        ));
    }

    #[test]
    fn credential_debug_is_redacted() {
        let c = Credential::new("sk-live-secret");
        assert_eq!(format!("{c:?}"), "Credential(***)");
        assert_eq!(c.expose(), "sk-live-secret");
        assert!(Credential::new("  ").is_blank());
    }

    #[test]
    fn status_codes_map_onto_taxonomy() {
        let p = ProviderKind::OpenAi;
        assert!(matches!(classify_status(p, 401, String::new()), SummarizeError::Auth { .. }));
        assert!(matches!(classify_status(p, 403, String::new()), SummarizeError::Auth { .. }));
        assert!(matches!(
            classify_status(p, 402, String::new()),
            SummarizeError::QuotaExceeded { .. }
        ));
        assert!(matches!(
            classify_status(p, 429, "slow down".into()),
            SummarizeError::RateLimited { .. }
        ));
        assert!(matches!(
            classify_status(p, 429, r#"{"error":{"code":"insufficient_quota"}}"#.into()),
            SummarizeError::QuotaExceeded { .. }
        ));
        assert!(matches!(
            classify_status(p, 529, "overloaded".into()),
            SummarizeError::Unavailable { status: 529, .. }
        ));
        assert!(matches!(
            classify_status(p, 503, String::new()),
            SummarizeError::Unavailable { .. }
        ));
        assert!(matches!(
            classify_status(p, 400, "bad request".into()),
            SummarizeError::Http { status: 400, .. }
        ));
        assert!(matches!(
            classify_status(ProviderKind::Claude, 400, "Your credit balance is too low".into()),
            SummarizeError::QuotaExceeded { .. }
        ));
    }

    #[test]
    fn registry_from_config_has_every_provider() {
        let registry = ProviderRegistry::from_config(&SummarizeConfig::default());
        assert_eq!(registry.kinds(), ProviderKind::ALL.to_vec());
        for kind in ProviderKind::ALL {
            assert_eq!(registry.get(kind).unwrap().kind(), kind);
        }
    }

    #[test]
    fn registry_with_replaces_by_kind() {
        let registry = ProviderRegistry::from_config(&SummarizeConfig::default())
            .with(Arc::new(MockProvider::ok(ProviderKind::Gemini, "mocked")));
        assert_eq!(registry.kinds().len(), 4);
        assert!(ProviderRegistry::empty().get(ProviderKind::Claude).is_none());
    }

    #[tokio::test]
    async fn mock_provider_follows_script_then_fallback() {
        let mock = MockProvider::scripted(
            ProviderKind::Claude,
            vec![Ok("one".into()), Err(SummarizeError::Cancelled)],
            "rest",
        );
        let key = Credential::new("k");
        assert_eq!(mock.submit("a", &key).await.unwrap(), "one");
        assert!(mock.submit("b", &key).await.is_err());
        assert_eq!(mock.submit("c", &key).await.unwrap(), "rest");
        assert_eq!(mock.call_count(), 3);
    }

    #[tokio::test]
    async fn refused_connection_is_network_error() {
        // Bind then drop to get a port nobody listens on.
        let port = {
            let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap().port()
        };
        let client = reqwest::Client::new();
        let err = send_json(
            ProviderKind::DeepSeek,
            client.post(format!("http://127.0.0.1:{port}/v1/chat/completions")),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, SummarizeError::Network { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn http_status_is_classified_after_send() {
        let (base, server) = serve_once(429, r#"{"error":"rate"}"#).await;
        let client = reqwest::Client::new();
        let err = send_json(ProviderKind::OpenAi, client.post(format!("{base}/x")).body("{}"))
            .await
            .unwrap_err();
        assert!(matches!(err, SummarizeError::RateLimited { .. }), "got {err:?}");
        server.await.unwrap();
    }
}
