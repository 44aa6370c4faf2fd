//! Summarize capability.
//!
//! This module provides:
//! * [`SummaryProvider`] — async trait implemented by every provider.
//! * [`ClaudeProvider`], [`OpenAiCompatProvider`] (OpenAI, DeepSeek),
//!   [`GeminiProvider`] — one per remote API.
//! * [`ProviderRegistry`] — lookup by [`ProviderKind`](crate::config::ProviderKind).
//! * [`ChunkedSummarizer`] — the chunking/reassembly engine.
//! * [`PromptMode`] — direct / chunk / final prompt variants.
//! * [`Credential`] — in-memory API key with a redacted `Debug`.
//! * [`SummarizeError`] — error variants for provider calls.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use video_synthesis::config::{ProviderKind, SummarizeConfig};
//! use video_synthesis::llm::{ChunkedSummarizer, Credential, ProviderRegistry};
//! use video_synthesis::pipeline::CancelToken;
//!
//! #[tokio::main]
//! async fn main() {
//!     let registry = ProviderRegistry::from_config(&SummarizeConfig::default());
//!     let provider = registry.get(ProviderKind::Claude).unwrap();
//!     let engine = ChunkedSummarizer::new(provider);
//!
//!     let key = Credential::new(std::env::var("ANTHROPIC_API_KEY").unwrap());
//!     let run = engine
//!         .summarize("A long transcript...", &key, &mut |_, msg| println!("{msg}"), &CancelToken::new())
//!         .await
//!         .unwrap();
//!     println!("{}", run.text);
//! }
//! ```

pub mod chunker;
pub mod claude;
pub mod engine;
pub mod gemini;
pub mod openai;
pub mod prompt;
pub mod provider;

// ---------------------------------------------------------------------------
// Public re-exports
// ---------------------------------------------------------------------------

pub use chunker::{
    join_summaries, split_into_chunks, split_sentences, word_count, Chunk, CHUNK_SEPARATOR,
    DEFAULT_CHUNK_WORDS,
};
pub use claude::ClaudeProvider;
pub use engine::{ChunkedSummarizer, RunFailure, SummaryProgress, SummaryRun};
pub use gemini::GeminiProvider;
pub use openai::OpenAiCompatProvider;
pub use prompt::PromptMode;
pub use provider::{classify_status, Credential, ProviderRegistry, SummarizeError, SummaryProvider};

#[cfg(test)]
pub use provider::MockProvider;
