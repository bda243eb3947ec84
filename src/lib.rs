//! Parley - real-time voice conversation gateway.
//!
//! Relays a browser voice call through streaming speech-to-text, a
//! persona-driven language model and per-sentence text-to-speech, over
//! a single WebSocket. The coordination core keeps at most one
//! generation stream per session, cancels it on barge-in with an
//! interruption snapshot, suppresses degenerate repetition, and commits
//! every turn outcome to the session's conversational state.
//!
//! Module map:
//! - [`api`]: axum router, shared state, per-connection WebSocket loop
//! - [`turn`]: turn lifecycle, sentence segmentation, repetition guard
//! - [`llm`]: streamed generation + one-shot intent classification
//! - [`voice`]: Deepgram live transcription, Sarvam/ElevenLabs synthesis
//! - [`session`]: conversation state, collected fields, session store
//! - [`context`]: bounded history + ephemeral state suffix
//! - [`extract`]: intake-field heuristics
//! - [`persona`]: counselor prompt and interruption conventions

pub mod api;
pub mod config;
pub mod context;
pub mod error;
pub mod extract;
pub mod llm;
pub mod persona;
pub mod session;
pub mod turn;
pub mod voice;

pub use config::Config;
pub use error::{Error, Result};
