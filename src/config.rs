//! Configuration management for the Parley gateway

use std::path::PathBuf;

use crate::{Error, Result};

/// Gateway configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP/WebSocket server configuration
    pub server: ServerConfig,

    /// Language-model configuration
    pub llm: LlmConfig,

    /// Speech-to-text configuration
    pub stt: SttConfig,

    /// Text-to-speech configuration
    pub tts: TtsConfig,

    /// Conversation tunables
    pub conversation: ConversationConfig,

    /// API keys
    pub api_keys: ApiKeys,
}

/// HTTP server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port to listen on
    pub port: u16,

    /// Path to static files directory (browser front-end), served at `/`
    pub static_dir: Option<PathBuf>,
}

/// Language-model configuration
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Chat completions base URL (OpenAI-compatible)
    pub base_url: String,

    /// Model identifier for streamed turn generation
    pub model: String,

    /// Max tokens per reply (short replies suit a phone call)
    pub max_tokens: u32,

    /// Sampling temperature
    pub temperature: f32,

    /// Frequency penalty, raised to discourage degenerate repetition
    pub frequency_penalty: f32,

    /// Presence penalty
    pub presence_penalty: f32,
}

/// Speech-to-text configuration (Deepgram live)
#[derive(Debug, Clone)]
pub struct SttConfig {
    /// Deepgram model (e.g. "nova-2")
    pub model: String,

    /// Transcription language hint
    pub language: String,

    /// Inbound PCM sample rate in Hz
    pub sample_rate: u32,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            model: "nova-2".to_string(),
            language: "en".to_string(),
            sample_rate: 48_000,
        }
    }
}

/// Text-to-speech configuration
#[derive(Debug, Clone)]
pub struct TtsConfig {
    /// Provider selection: "sarvam" or "elevenlabs"
    pub provider: String,

    /// Voice/speaker identifier
    pub voice: String,

    /// Synthesis language code (Sarvam)
    pub language: String,
}

/// Conversation tunables for the turn coordination core
#[derive(Debug, Clone)]
pub struct ConversationConfig {
    /// Non-system messages retained in the rolling LLM context
    pub history_window: usize,

    /// Max chars of assistant output captured in an interruption snapshot
    pub interruption_preview_chars: usize,
}

/// API keys for external services
#[derive(Debug, Clone, Default)]
pub struct ApiKeys {
    /// `OpenAI` API key (chat completions + intent classification)
    pub openai: Option<String>,

    /// `Deepgram` API key (streaming STT)
    pub deepgram: Option<String>,

    /// `Sarvam` API key (TTS)
    pub sarvam: Option<String>,

    /// `ElevenLabs` API key (alternative TTS)
    pub elevenlabs: Option<String>,
}

impl Config {
    /// Load configuration from the environment
    ///
    /// # Errors
    ///
    /// Returns error if a numeric variable fails to parse
    pub fn from_env() -> Result<Self> {
        let port = match std::env::var("PORT") {
            Ok(v) => v
                .parse()
                .map_err(|_| Error::Config(format!("invalid PORT: {v}")))?,
            Err(_) => 8080,
        };

        let server = ServerConfig {
            port,
            static_dir: std::env::var("PARLEY_STATIC_DIR").ok().map(PathBuf::from),
        };

        let llm = LlmConfig {
            base_url: std::env::var("OPENAI_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            model: std::env::var("PARLEY_LLM_MODEL")
                .unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            max_tokens: 220,
            temperature: 0.2,
            frequency_penalty: 0.6,
            presence_penalty: 0.3,
        };

        let stt = SttConfig {
            model: std::env::var("PARLEY_STT_MODEL").unwrap_or_else(|_| "nova-2".to_string()),
            language: std::env::var("PARLEY_STT_LANGUAGE").unwrap_or_else(|_| "en".to_string()),
            sample_rate: match std::env::var("PARLEY_STT_SAMPLE_RATE") {
                Ok(v) => v
                    .parse()
                    .map_err(|_| Error::Config(format!("invalid PARLEY_STT_SAMPLE_RATE: {v}")))?,
                Err(_) => 48_000,
            },
        };

        let tts = TtsConfig {
            provider: std::env::var("PARLEY_TTS_PROVIDER")
                .unwrap_or_else(|_| "sarvam".to_string()),
            voice: std::env::var("PARLEY_TTS_VOICE").unwrap_or_else(|_| "anushka".to_string()),
            language: std::env::var("PARLEY_TTS_LANGUAGE")
                .unwrap_or_else(|_| "hi-IN".to_string()),
        };

        let conversation = ConversationConfig {
            history_window: 20,
            interruption_preview_chars: 160,
        };

        let api_keys = ApiKeys {
            openai: std::env::var("OPENAI_API_KEY").ok(),
            deepgram: std::env::var("DEEPGRAM_API_KEY").ok(),
            sarvam: std::env::var("SARVAM_API_KEY").ok(),
            elevenlabs: std::env::var("ELEVENLABS_API_KEY").ok(),
        };

        Ok(Self {
            server,
            llm,
            stt,
            tts,
            conversation,
            api_keys,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_without_env() {
        // Only checks the hard-coded tunables; env-dependent fields vary by host
        let config = Config::from_env().unwrap();
        assert_eq!(config.llm.max_tokens, 220);
        assert_eq!(config.conversation.history_window, 20);
        assert_eq!(config.conversation.interruption_preview_chars, 160);
    }
}
