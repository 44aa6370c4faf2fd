//! Summarization prompts.
//!
//! Three variants cover the chunked flow: [`PromptMode::Direct`] for input
//! that fits in one call, [`PromptMode::Chunk`] for each slice of a long
//! input, and [`PromptMode::Final`] for the coherence pass over the joined
//! chunk summaries.  Every variant asks for a reply in the input's language.

const DIRECT_INSTRUCTION: &str = "\
Provide a comprehensive and well-structured summary of the following text. \
IMPORTANT: Your response must be in the same language as the input text.";

const CHUNK_INSTRUCTION: &str = "\
Provide a comprehensive summary of the following text. \
Keep all important details and key points. \
IMPORTANT: Your response must be in the same language as the input text.";

const FINAL_INSTRUCTION: &str = "\
The following are summaries of different sections of a longer text. \
Create a single, coherent, well-structured summary that combines these sections. \
Improve coherence and flow, but do not reduce the content further. \
IMPORTANT: Your response must be in the same language as the input summaries.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptMode {
    Direct,
    Chunk,
    Final,
}

impl PromptMode {
    pub fn instruction(self) -> &'static str {
        match self {
            PromptMode::Direct => DIRECT_INSTRUCTION,
            PromptMode::Chunk => CHUNK_INSTRUCTION,
            PromptMode::Final => FINAL_INSTRUCTION,
        }
    }

    /// Instruction, blank line, then `text` unchanged.
    pub fn build(self, text: &str) -> String {
        format!("{}\n\n{}", self.instruction(), text)
    }
}
