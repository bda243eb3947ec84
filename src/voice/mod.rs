//! Voice processing: streaming transcription in, per-sentence
//! synthesis out

pub mod stt;
pub mod tts;

pub use stt::{SpeechToText, SttEvent, Transcript, TranscriptionSession};
pub use tts::{SynthesisBackend, TextToSpeech};
