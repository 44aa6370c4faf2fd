//! VideoSynthesis: fetch the audio of an online video, transcribe it
//! locally with Whisper and summarize the transcript with a remote language
//! model.
//!
//! The [`pipeline`] module holds the stage machinery; [`fetch`], [`stt`] and
//! [`llm`] are the capabilities it drives.

pub mod config;
pub mod fetch;
pub mod llm;
pub mod pipeline;
pub mod process;
pub mod stt;
