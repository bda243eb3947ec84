//! Error types for the Parley gateway

use thiserror::Error;

/// Result type alias for gateway operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the gateway
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Language-model generation error
    #[error("LLM error: {0}")]
    Llm(String),

    /// Speech-to-text error
    #[error("STT error: {0}")]
    Stt(String),

    /// Text-to-speech error
    #[error("TTS error: {0}")]
    Tts(String),

    /// Degenerate repeated output from the generation backend. The
    /// display string is part of the wire contract: clients tell the
    /// loop breaker apart from backend failures by this exact message.
    #[error("response loop detected")]
    RepetitionLoop,

    /// Transport/channel error (client connection gone)
    #[error("transport error: {0}")]
    Transport(String),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Upstream WebSocket error (Deepgram live session)
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loop_breaker_message_is_stable_for_clients() {
        assert_eq!(Error::RepetitionLoop.to_string(), "response loop detected");
    }
}
