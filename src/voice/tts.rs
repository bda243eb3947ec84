//! Text-to-speech: per-sentence synthesis behind a provider seam

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;

use crate::config::TtsConfig;
use crate::{Error, Result};

/// Synthesizes one sentence unit into playable audio bytes
#[async_trait]
pub trait SynthesisBackend: Send + Sync {
    /// Synthesize text to speech
    ///
    /// # Errors
    ///
    /// Returns error if synthesis fails; callers localize the failure
    /// to the segment rather than aborting the turn
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>>;
}

/// TTS provider backend
#[derive(Clone, Copy, Debug)]
enum TtsProvider {
    Sarvam,
    ElevenLabs,
}

/// Synthesizes speech from text
pub struct TextToSpeech {
    client: reqwest::Client,
    api_key: String,
    voice: String,
    language: String,
    model: String,
    provider: TtsProvider,
}

impl TextToSpeech {
    /// Create a new TTS instance using Sarvam
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new_sarvam(api_key: String, voice: String, language: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config("Sarvam API key required for TTS".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            voice,
            language,
            model: "bulbul:v2".to_string(),
            provider: TtsProvider::Sarvam,
        })
    }

    /// Create a new TTS instance using ElevenLabs
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new_elevenlabs(api_key: String, voice_id: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config(
                "ElevenLabs API key required for TTS".to_string(),
            ));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            voice: voice_id,
            language: String::new(),
            model: "eleven_multilingual_v2".to_string(),
            provider: TtsProvider::ElevenLabs,
        })
    }

    /// Pick the provider named in config and wire the matching API key
    ///
    /// # Errors
    ///
    /// Returns error on an unknown provider name or a missing key
    pub fn from_config(
        config: &TtsConfig,
        sarvam_key: &str,
        elevenlabs_key: &str,
    ) -> Result<Self> {
        match config.provider.as_str() {
            "sarvam" => Self::new_sarvam(
                sarvam_key.to_string(),
                config.voice.clone(),
                config.language.clone(),
            ),
            "elevenlabs" => Self::new_elevenlabs(elevenlabs_key.to_string(), config.voice.clone()),
            other => Err(Error::Config(format!("unknown TTS provider: {other}"))),
        }
    }

    /// Synthesize using Sarvam bulbul
    async fn synthesize_sarvam(&self, text: &str) -> Result<Vec<u8>> {
        #[derive(serde::Serialize)]
        struct SarvamRequest<'a> {
            text: &'a str,
            target_language_code: &'a str,
            speaker: &'a str,
            model: &'a str,
        }

        #[derive(serde::Deserialize)]
        struct SarvamResponse {
            audios: Vec<String>,
        }

        let request = SarvamRequest {
            text,
            target_language_code: &self.language,
            speaker: &self.voice,
            model: &self.model,
        };

        let response = self
            .client
            .post("https://api.sarvam.ai/text-to-speech")
            .header("api-subscription-key", &self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("Sarvam TTS error {status}: {body}")));
        }

        let result: SarvamResponse = response.json().await?;
        let encoded = result
            .audios
            .first()
            .ok_or_else(|| Error::Tts("Sarvam returned no audio".to_string()))?;
        BASE64
            .decode(encoded)
            .map_err(|e| Error::Tts(format!("Sarvam audio decode failed: {e}")))
    }

    /// Synthesize using ElevenLabs TTS
    async fn synthesize_elevenlabs(&self, text: &str) -> Result<Vec<u8>> {
        #[derive(serde::Serialize)]
        struct ElevenLabsRequest<'a> {
            text: &'a str,
            model_id: &'a str,
        }

        let url = format!("https://api.elevenlabs.io/v1/text-to-speech/{}", self.voice);

        let request = ElevenLabsRequest {
            text,
            model_id: &self.model,
        };

        let response = self
            .client
            .post(&url)
            .header("xi-api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("ElevenLabs TTS error {status}: {body}")));
        }

        let audio = response.bytes().await?;
        Ok(audio.to_vec())
    }
}

#[async_trait]
impl SynthesisBackend for TextToSpeech {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        match self.provider {
            TtsProvider::Sarvam => self.synthesize_sarvam(text).await,
            TtsProvider::ElevenLabs => self.synthesize_elevenlabs(text).await,
        }
    }
}
