//! Chunking/reassembly engine.
//!
//! ```text
//! text ──word_count ≤ threshold──▶ submit(Direct) ─────────────────────────▶ summary
//!      └─otherwise──▶ split_into_chunks ─▶ submit(Chunk) × N (sequential)
//!                                           └─▶ join with "---" ─▶ submit(Final) ─▶ summary
//! ```
//!
//! Calls are sequential to stay under provider rate limits.  The cancel flag
//! is checked before every call: an in-flight call always completes, then the
//! run stops.  Any failure aborts the run; no partial summary is returned.

use std::fmt;
use std::sync::Arc;

use super::chunker::{join_summaries, split_into_chunks, word_count, DEFAULT_CHUNK_WORDS};
use super::prompt::PromptMode;
use super::provider::{Credential, SummarizeError, SummaryProvider};
use crate::pipeline::CancelToken;

const LOG_TARGET: &str = "video_synthesis::summarize";

/// Progress sink: `(percent, message)`.
pub type SummaryProgress<'a> = &'a mut dyn FnMut(Option<f32>, &str);

/// Result of a completed run.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryRun {
    /// The last provider reply, unmodified.
    pub text: String,
    /// Word count of the input.
    pub input_words: usize,
    /// Number of chunks; 1 when no chunking was needed.
    pub chunk_count: usize,
    /// Provider calls issued.
    pub calls: usize,
}

/// Why a run stopped early.
#[derive(Debug, Clone)]
pub struct RunFailure {
    pub error: SummarizeError,
    /// Chunk whose call failed.  `None` for the direct call and the final
    /// coherence pass.
    pub chunk_index: Option<usize>,
}

impl RunFailure {
    fn at(chunk_index: Option<usize>) -> impl FnOnce(SummarizeError) -> RunFailure {
        move |error| RunFailure { error, chunk_index }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.error, SummarizeError::Cancelled)
    }
}

impl fmt::Display for RunFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.chunk_index {
            Some(i) => write!(f, "chunk {}: {}", i + 1, self.error),
            None => write!(f, "{}", self.error),
        }
    }
}

pub struct ChunkedSummarizer {
    provider: Arc<dyn SummaryProvider>,
    chunk_words: usize,
}

impl ChunkedSummarizer {
    pub fn new(provider: Arc<dyn SummaryProvider>) -> Self {
        Self {
            provider,
            chunk_words: DEFAULT_CHUNK_WORDS,
        }
    }

    pub fn with_chunk_words(mut self, chunk_words: usize) -> Self {
        self.chunk_words = chunk_words.max(1);
        self
    }

    pub async fn summarize(
        &self,
        text: &str,
        credential: &Credential,
        progress: SummaryProgress<'_>,
        cancel: &CancelToken,
    ) -> Result<SummaryRun, RunFailure> {
        let input_words = word_count(text);
        let provider = self.provider.kind();
        log::info!(target: LOG_TARGET, "Text length: {input_words} words");

        if input_words <= self.chunk_words {
            check(cancel, None)?;
            progress(Some(50.0), "Generating summary...");
            let summary = self
                .provider
                .submit(&PromptMode::Direct.build(text), credential)
                .await
                .map_err(RunFailure::at(None))?;
            progress(Some(100.0), "Summary complete!");

            return Ok(SummaryRun {
                text: summary,
                input_words,
                chunk_count: 1,
                calls: 1,
            });
        }

        let chunks = split_into_chunks(text, self.chunk_words);
        let total = chunks.len();
        log::info!(target: LOG_TARGET, "Split into {total} chunks for {provider}");

        let mut summaries = Vec::with_capacity(total);
        for chunk in &chunks {
            check(cancel, Some(chunk.index))?;
            let percent = (chunk.index + 1) as f32 / total as f32 * 80.0;
            progress(
                Some(percent),
                &format!("Summarizing chunk {}/{total}...", chunk.index + 1),
            );

            let summary = self
                .provider
                .submit(&PromptMode::Chunk.build(&chunk.text), credential)
                .await
                .map_err(RunFailure::at(Some(chunk.index)))?;
            log::info!(
                target: LOG_TARGET,
                "Chunk {}/{total} summarized ({} words in)",
                chunk.index + 1,
                chunk.word_count
            );
            summaries.push(summary);
        }

        check(cancel, None)?;
        progress(Some(90.0), "Creating final coherent summary...");
        let combined = join_summaries(&summaries);
        let summary = self
            .provider
            .submit(&PromptMode::Final.build(&combined), credential)
            .await
            .map_err(RunFailure::at(None))?;
        progress(Some(100.0), "Summary complete!");

        Ok(SummaryRun {
            text: summary,
            input_words,
            chunk_count: total,
            calls: total + 1,
        })
    }
}

fn check(cancel: &CancelToken, chunk_index: Option<usize>) -> Result<(), RunFailure> {
    if cancel.is_cancelled() {
        Err(RunFailure {
            error: SummarizeError::Cancelled,
            chunk_index,
        })
    } else {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderKind;
    use crate::llm::provider::MockProvider;
    use crate::llm::CHUNK_SEPARATOR;

    fn long_text(words: usize) -> String {
        // 10-word sentences.
        let sentence = "alpha beta gamma delta epsilon zeta eta theta iota kappa.";
        vec![sentence; words / 10].join(" ")
    }

    fn key() -> Credential {
        Credential::new("sk-test")
    }

    #[tokio::test]
    async fn short_text_is_one_direct_call_stored_verbatim() {
        let mock = Arc::new(MockProvider::ok(ProviderKind::Claude, "  Literal reply\n"));
        let engine = ChunkedSummarizer::new(mock.clone());

        let run = engine
            .summarize("hello world", &key(), &mut |_, _| {}, &CancelToken::new())
            .await
            .unwrap();

        assert_eq!(run.text, "  Literal reply\n");
        assert_eq!(run.calls, 1);
        assert_eq!(mock.call_count(), 1);
        let prompt = &mock.prompts.lock().unwrap()[0];
        assert!(prompt.starts_with(PromptMode::Direct.instruction()));
        assert!(prompt.ends_with("hello world"));
        assert_eq!(mock.credentials.lock().unwrap()[0], "sk-test");
    }

    #[tokio::test]
    async fn nine_thousand_words_take_four_calls() {
        let mock = Arc::new(MockProvider::scripted(
            ProviderKind::OpenAi,
            vec![Ok("S0".into()), Ok("S1".into()), Ok("S2".into())],
            "FINAL",
        ));
        let engine = ChunkedSummarizer::new(mock.clone());
        let mut percents = Vec::new();

        let run = engine
            .summarize(
                &long_text(9_000),
                &key(),
                &mut |p, _| percents.push(p.unwrap_or_default()),
                &CancelToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(run.text, "FINAL");
        assert_eq!(run.chunk_count, 3);
        assert_eq!(run.calls, 4);
        assert_eq!(run.input_words, 9_000);
        assert_eq!(mock.call_count(), 4);

        let prompts = mock.prompts.lock().unwrap();
        for p in &prompts[..3] {
            assert!(p.starts_with(PromptMode::Chunk.instruction()));
        }
        let expected_tail = format!("S0{CHUNK_SEPARATOR}S1{CHUNK_SEPARATOR}S2");
        assert!(prompts[3].starts_with(PromptMode::Final.instruction()));
        assert!(prompts[3].ends_with(&expected_tail));

        assert!(percents.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(percents.last(), Some(&100.0));
        assert!(percents.contains(&90.0));
    }

    #[tokio::test]
    async fn threshold_is_inclusive() {
        let at_limit = long_text(DEFAULT_CHUNK_WORDS);
        assert_eq!(word_count(&at_limit), DEFAULT_CHUNK_WORDS);

        let mock = Arc::new(MockProvider::ok(ProviderKind::Claude, "s"));
        let run = ChunkedSummarizer::new(mock.clone())
            .summarize(&at_limit, &key(), &mut |_, _| {}, &CancelToken::new())
            .await
            .unwrap();
        assert_eq!((run.chunk_count, run.calls), (1, 1));
        assert_eq!(mock.call_count(), 1);

        let one_over = format!("{at_limit} omega.");
        let mock = Arc::new(MockProvider::ok(ProviderKind::Claude, "s"));
        let run = ChunkedSummarizer::new(mock.clone())
            .summarize(&one_over, &key(), &mut |_, _| {}, &CancelToken::new())
            .await
            .unwrap();
        assert_eq!(run.input_words, DEFAULT_CHUNK_WORDS + 1);
        assert_eq!((run.chunk_count, run.calls), (2, 3));

        let prompts = mock.prompts.lock().unwrap();
        assert!(prompts[1].starts_with(PromptMode::Chunk.instruction()));
        assert!(prompts[1].ends_with("omega."));
        assert!(prompts[2].starts_with(PromptMode::Final.instruction()));
    }

    #[tokio::test]
    async fn failing_chunk_aborts_with_its_index() {
        let mock = Arc::new(MockProvider::scripted(
            ProviderKind::Gemini,
            vec![
                Ok("S0".into()),
                Err(SummarizeError::RateLimited {
                    provider: ProviderKind::Gemini,
                    body: "slow".into(),
                }),
            ],
            "unused",
        ));
        let engine = ChunkedSummarizer::new(mock.clone());

        let failure = engine
            .summarize(&long_text(9_000), &key(), &mut |_, _| {}, &CancelToken::new())
            .await
            .unwrap_err();

        assert_eq!(failure.chunk_index, Some(1));
        assert!(matches!(failure.error, SummarizeError::RateLimited { .. }));
        assert_eq!(mock.call_count(), 2);
    }

    #[tokio::test]
    async fn final_pass_failure_has_no_chunk_index() {
        let mock = Arc::new(MockProvider::scripted(
            ProviderKind::Claude,
            vec![Ok("a".into()), Ok("b".into()), Ok("c".into()), Err(SummarizeError::EmptyResponse(ProviderKind::Claude))],
            "unused",
        ));
        let failure = ChunkedSummarizer::new(mock)
            .summarize(&long_text(9_000), &key(), &mut |_, _| {}, &CancelToken::new())
            .await
            .unwrap_err();
        assert_eq!(failure.chunk_index, None);
    }

    #[tokio::test]
    async fn cancel_stops_at_next_chunk_boundary() {
        let mock = Arc::new(MockProvider::ok(ProviderKind::Claude, "s"));
        let engine = ChunkedSummarizer::new(mock.clone());
        let token = CancelToken::new();
        let remote = token.clone();

        // Raise the flag while the first chunk is being reported.
        let failure = engine
            .summarize(
                &long_text(9_000),
                &key(),
                &mut |_, msg| {
                    if msg.starts_with("Summarizing chunk 1/") {
                        remote.cancel();
                    }
                },
                &token,
            )
            .await
            .unwrap_err();

        assert!(failure.is_cancelled());
        assert_eq!(failure.chunk_index, Some(1));
        // The in-flight first call completed; nothing after it was sent.
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test]
    async fn smaller_threshold_changes_chunking() {
        let mock = Arc::new(MockProvider::ok(ProviderKind::DeepSeek, "s"));
        let run = ChunkedSummarizer::new(mock.clone())
            .with_chunk_words(1_000)
            .summarize(&long_text(3_000), &key(), &mut |_, _| {}, &CancelToken::new())
            .await
            .unwrap();
        assert_eq!(run.chunk_count, 3);
        assert_eq!(mock.call_count(), 4);
    }
}
