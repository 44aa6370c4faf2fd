//! Word counting, sentence splitting and chunking for long inputs.
//!
//! Chunks are filled greedily with whole sentences until the next sentence
//! would push the chunk past the word threshold.  A sentence that alone
//! exceeds the threshold is cut on word boundaries; that is the only case a
//! chunk ends mid-sentence.
//!
//! A sentence ends at `.`, `!`, `?`, `…`, `。`, `！` or `？` (optionally
//! followed by closing quotes or brackets) when the next character is
//! whitespace or the end of the text.  A blank line always ends a sentence.
//!
//! Everything here is pure and deterministic: the same input always yields
//! the same chunk boundaries.

use std::ops::Range;

/// Word threshold above which input is chunked.
pub const DEFAULT_CHUNK_WORDS: usize = 4_000;

/// Placed between chunk summaries before the final coherence pass.
pub const CHUNK_SEPARATOR: &str = "\n\n---\n\n";

/// One ordered slice of the input text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub index: usize,
    pub text: String,
    pub word_count: usize,
}

/// Whitespace-delimited word count.
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

fn is_terminator(c: char) -> bool {
    matches!(c, '.' | '!' | '?' | '…' | '。' | '！' | '？')
}

fn is_closer(c: char) -> bool {
    matches!(c, '"' | '\'' | '”' | '’' | ')' | ']' | '»' | '」' | '』')
}

/// Byte ranges of the sentences in `text`, trimmed, in order.
fn sentence_spans(text: &str) -> Vec<Range<usize>> {
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let mut spans = Vec::new();
    let mut start = 0;
    let mut i = 0;

    let push = |from: usize, to: usize, spans: &mut Vec<Range<usize>>| {
        if let Some(span) = trimmed(text, from..to) {
            spans.push(span);
        }
    };

    while i < chars.len() {
        let (pos, c) = chars[i];

        if is_terminator(c) {
            let mut j = i + 1;
            while j < chars.len() && (is_terminator(chars[j].1) || is_closer(chars[j].1)) {
                j += 1;
            }
            if j == chars.len() || chars[j].1.is_whitespace() {
                let end = chars.get(j).map_or(text.len(), |&(p, _)| p);
                push(start, end, &mut spans);
                start = end;
            }
            i = j;
            continue;
        }

        if c == '\n' {
            let mut j = i + 1;
            while j < chars.len() && chars[j].1 != '\n' && chars[j].1.is_whitespace() {
                j += 1;
            }
            if j < chars.len() && chars[j].1 == '\n' {
                push(start, pos, &mut spans);
                start = chars[j].0;
                i = j + 1;
                continue;
            }
        }

        i += 1;
    }
    push(start, text.len(), &mut spans);
    spans
}

fn trimmed(text: &str, range: Range<usize>) -> Option<Range<usize>> {
    let slice = &text[range.clone()];
    let lead = slice.len() - slice.trim_start().len();
    let trail = slice.len() - slice.trim_end().len();
    (lead + trail < slice.len()).then(|| range.start + lead..range.end - trail)
}

/// The sentences of `text`, in order, without surrounding whitespace.
pub fn split_sentences(text: &str) -> Vec<&str> {
    sentence_spans(text)
        .into_iter()
        .map(|span| &text[span])
        .collect()
}

/// Byte ranges of the words inside `range`.
fn word_spans(text: &str, range: Range<usize>) -> Vec<Range<usize>> {
    let base = range.start;
    let mut spans = Vec::new();
    let mut word_start: Option<usize> = None;
    for (offset, c) in text[range.clone()].char_indices() {
        match (c.is_whitespace(), word_start) {
            (false, None) => word_start = Some(base + offset),
            (true, Some(s)) => {
                spans.push(s..base + offset);
                word_start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = word_start {
        spans.push(s..range.end);
    }
    spans
}

/// Split `text` into ordered chunks of at most `max_words` words.
///
/// Chunk text is the original slice from its first sentence to its last,
/// so paragraph breaks inside a chunk survive.  Word counts of all chunks
/// sum to [`word_count`] of the input.
pub fn split_into_chunks(text: &str, max_words: usize) -> Vec<Chunk> {
    let max_words = max_words.max(1);
    let mut ranges: Vec<(Range<usize>, usize)> = Vec::new();
    let mut current: Option<(Range<usize>, usize)> = None;

    for span in sentence_spans(text) {
        let words = word_count(&text[span.clone()]);

        if words > max_words {
            ranges.extend(current.take());
            for piece in word_spans(text, span).chunks(max_words) {
                let (first, last) = (&piece[0], &piece[piece.len() - 1]);
                ranges.push((first.start..last.end, piece.len()));
            }
            continue;
        }

        current = match current.take() {
            Some((range, count)) if count + words <= max_words => {
                Some((range.start..span.end, count + words))
            }
            Some(full) => {
                ranges.push(full);
                Some((span, words))
            }
            None => Some((span, words)),
        };
    }
    ranges.extend(current);

    ranges
        .into_iter()
        .enumerate()
        .map(|(index, (range, word_count))| Chunk {
            index,
            text: text[range].to_string(),
            word_count,
        })
        .collect()
}

/// Join chunk summaries in index order for the final pass.
pub fn join_summaries<S: AsRef<str>>(summaries: &[S]) -> String {
    summaries
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<_>>()
        .join(CHUNK_SEPARATOR)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    /// `count` sentences of `len` words each, e.g. `"w w w."`.
    fn sentences(count: usize, len: usize) -> String {
        let sentence = format!("{}word.", "word ".repeat(len - 1));
        vec![sentence; count].join(" ")
    }

    #[test]
    fn counts_words_on_any_whitespace() {
        assert_eq!(word_count(""), 0);
        assert_eq!(word_count("  one\ttwo\n\nthree "), 3);
    }

    #[test]
    fn splits_on_terminators_followed_by_space() {
        let s = split_sentences("Hello there. Version 2.5 is out! Really? Yes… ok");
        assert_eq!(s, vec!["Hello there.", "Version 2.5 is out!", "Really?", "Yes…", "ok"]);
    }

    #[test]
    fn closing_quotes_stay_with_their_sentence() {
        let s = split_sentences("He said \"stop.\" Then left.");
        assert_eq!(s, vec!["He said \"stop.\"", "Then left."]);
    }

    #[test]
    fn blank_line_ends_a_sentence() {
        let s = split_sentences("A heading\n\nBody text without a stop\n  \nNext");
        assert_eq!(s, vec!["A heading", "Body text without a stop", "Next"]);
    }

    #[test]
    fn single_newline_does_not_split() {
        assert_eq!(split_sentences("one\ntwo."), vec!["one\ntwo."]);
    }

    #[test]
    fn short_input_is_one_chunk() {
        let chunks = split_into_chunks("hello world", DEFAULT_CHUNK_WORDS);
        assert_eq!(
            chunks,
            vec![Chunk {
                index: 0,
                text: "hello world".into(),
                word_count: 2
            }]
        );
    }

    #[test]
    fn nine_thousand_words_make_three_chunks_on_sentence_breaks() {
        let text = sentences(900, 10);
        assert_eq!(word_count(&text), 9_000);

        let chunks = split_into_chunks(&text, 4_000);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks.iter().map(|c| c.word_count).sum::<usize>(), 9_000);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.index, i);
            assert!(chunk.word_count <= 4_000);
            assert!(chunk.text.ends_with('.'));
            assert_eq!(word_count(&chunk.text), chunk.word_count);
        }
    }

    #[test]
    fn boundary_is_nearest_sentence_below_threshold() {
        // 7-word sentences: 571 fit in 3997 words, the 572nd would overflow.
        let text = sentences(1_200, 7);
        let chunks = split_into_chunks(&text, 4_000);
        assert_eq!(
            chunks.iter().map(|c| c.word_count).collect::<Vec<_>>(),
            vec![3_997, 3_997, 406]
        );
    }

    #[test]
    fn chunking_is_deterministic() {
        let text = sentences(700, 13) + "\n\nTrailing paragraph without stop";
        assert_eq!(split_into_chunks(&text, 4_000), split_into_chunks(&text, 4_000));
    }

    #[test]
    fn oversized_sentence_is_cut_on_word_boundaries() {
        let text = format!("Short one. {}word.", "long ".repeat(9));
        // Second sentence has 10 words; threshold 4.
        let chunks = split_into_chunks(&text, 4);
        let counts: Vec<_> = chunks.iter().map(|c| c.word_count).collect();
        assert_eq!(counts, vec![2, 4, 4, 2]);
        assert_eq!(chunks[3].text, "long word.");
        assert_eq!(counts.iter().sum::<usize>(), word_count(&text));
    }

    #[test]
    fn paragraph_breaks_survive_inside_a_chunk() {
        let chunks = split_into_chunks("First para.\n\nSecond para.", 100);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "First para.\n\nSecond para.");
    }

    #[test]
    fn empty_input_has_no_chunks() {
        assert!(split_into_chunks("   \n\n ", 10).is_empty());
    }

    #[test]
    fn summaries_join_with_separator() {
        assert_eq!(join_summaries(&["a", "b"]), "a\n\n---\n\nb");
    }
}
