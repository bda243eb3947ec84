//! Language-model backends: streamed turn generation and one-shot
//! intent classification over an OpenAI-compatible chat completions API.

use std::pin::Pin;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::config::LlmConfig;
use crate::session::ChatMessage;
use crate::{Error, Result};

/// Incremental text deltas from a generation call
pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// A cancellable streaming generation backend
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Open one generation call for the given bounded context. The
    /// returned stream ceases emission once `cancel` fires; the
    /// underlying transport is dropped so the remote request terminates.
    async fn generate(
        &self,
        messages: Vec<ChatMessage>,
        cancel: CancellationToken,
    ) -> Result<DeltaStream>;
}

/// One-shot boolean text classification
#[async_trait]
pub trait IntentClassifier: Send + Sync {
    /// Classify `text` under a fixed instruction prompt
    async fn classify(&self, instruction: &str, text: &str) -> Result<bool>;
}

/// Instruction prompt for wake-phrase detection
pub const WAKE_PHRASE_INSTRUCTION: &str = "You are a binary classifier. Decide whether the \
    following utterance is addressed to the assistant as a wake-up or attention phrase (for \
    example greeting the agent or calling its name). Answer with exactly one word: yes or no.";

/// Instruction prompt for end-of-call detection
pub const ENDING_INSTRUCTION: &str = "You are a binary classifier. Decide whether the following \
    utterance indicates the caller wants to end the call (goodbyes, thanks-and-hang-up phrases). \
    Answer with exactly one word: yes or no.";

/// Instruction prompt for context-clear detection
pub const CLEAR_INSTRUCTION: &str = "You are a binary classifier. Decide whether the following \
    utterance asks to start over or clear the current conversation. Answer with exactly one \
    word: yes or no.";

#[derive(serde::Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    temperature: f32,
    max_tokens: u32,
    frequency_penalty: f32,
    presence_penalty: f32,
}

#[derive(Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Deserialize, Default)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Chat completions client for OpenAI-compatible endpoints
pub struct OpenAiGeneration {
    client: reqwest::Client,
    api_key: String,
    config: LlmConfig,
}

impl OpenAiGeneration {
    /// Create a new generation client
    ///
    /// # Errors
    ///
    /// Returns error if the API key is missing
    pub fn new(api_key: String, config: LlmConfig) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config(
                "OpenAI API key required for generation".to_string(),
            ));
        }
        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            config,
        })
    }

    fn completions_url(&self) -> String {
        format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        )
    }
}

#[async_trait]
impl GenerationBackend for OpenAiGeneration {
    async fn generate(
        &self,
        messages: Vec<ChatMessage>,
        cancel: CancellationToken,
    ) -> Result<DeltaStream> {
        let request = ChatRequest {
            model: &self.config.model,
            messages: &messages,
            stream: true,
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
            frequency_penalty: self.config.frequency_penalty,
            presence_penalty: self.config.presence_penalty,
        };

        let response = self
            .client
            .post(self.completions_url())
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "chat completions error");
            return Err(Error::Llm(format!("chat completions error {status}: {body}")));
        }

        let (tx, rx) = mpsc::channel::<Result<String>>(32);

        // Pump the SSE body into the channel; dropping the response on
        // cancellation also aborts the HTTP request.
        tokio::spawn(async move {
            let mut body = response.bytes_stream();
            let mut pending = String::new();

            loop {
                let chunk = tokio::select! {
                    () = cancel.cancelled() => break,
                    chunk = body.next() => chunk,
                };

                let Some(chunk) = chunk else { break };
                let bytes = match chunk {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        let _ = tx.send(Err(Error::Llm(e.to_string()))).await;
                        break;
                    }
                };

                pending.push_str(&String::from_utf8_lossy(&bytes));

                // SSE events are newline-delimited; a chunk may end
                // mid-line, so only complete lines are consumed here
                while let Some(newline) = pending.find('\n') {
                    let line = pending[..newline].trim().to_string();
                    pending.drain(..=newline);

                    let Some(data) = line.strip_prefix("data: ") else {
                        continue;
                    };
                    if data == "[DONE]" {
                        return;
                    }
                    match serde_json::from_str::<StreamChunk>(data) {
                        Ok(parsed) => {
                            let delta = parsed
                                .choices
                                .first()
                                .and_then(|c| c.delta.content.clone())
                                .unwrap_or_default();
                            if !delta.is_empty() && tx.send(Ok(delta)).await.is_err() {
                                return;
                            }
                        }
                        Err(e) => {
                            tracing::debug!(error = %e, "skipping unparseable stream event");
                        }
                    }
                }
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

#[async_trait]
impl IntentClassifier for OpenAiGeneration {
    async fn classify(&self, instruction: &str, text: &str) -> Result<bool> {
        let messages = vec![ChatMessage::system(instruction), ChatMessage::user(text)];
        let request = ChatRequest {
            model: &self.config.model,
            messages: &messages,
            stream: false,
            temperature: 0.0,
            max_tokens: 5,
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
        };

        let response = self
            .client
            .post(self.completions_url())
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Llm(format!("classification error {status}: {body}")));
        }

        let parsed: CompletionResponse = response.json().await?;
        let answer = parsed
            .choices
            .first()
            .and_then(|c| c.message.content.as_deref())
            .unwrap_or_default()
            .to_lowercase();

        Ok(answer.contains("yes") || answer.contains("true"))
    }
}

/// Run a classification, degrading to the conservative default `false`
/// on any backend failure
pub async fn classify_or_false(
    classifier: &dyn IntentClassifier,
    instruction: &str,
    text: &str,
) -> bool {
    match classifier.classify(instruction, text).await {
        Ok(result) => result,
        Err(e) => {
            tracing::warn!(error = %e, "intent classification failed, defaulting to false");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingClassifier;

    #[async_trait]
    impl IntentClassifier for FailingClassifier {
        async fn classify(&self, _instruction: &str, _text: &str) -> Result<bool> {
            Err(Error::Llm("backend down".to_string()))
        }
    }

    #[tokio::test]
    async fn classification_failure_degrades_to_false() {
        let result = classify_or_false(&FailingClassifier, WAKE_PHRASE_INSTRUCTION, "hello").await;
        assert!(!result);
    }

    #[test]
    fn stream_chunk_parses_delta_content() {
        let data = r#"{"choices":[{"delta":{"content":"Got it."}}]}"#;
        let parsed: StreamChunk = serde_json::from_str(data).unwrap();
        assert_eq!(parsed.choices[0].delta.content.as_deref(), Some("Got it."));
    }

    #[test]
    fn stream_chunk_tolerates_empty_delta() {
        let data = r#"{"choices":[{"delta":{}}]}"#;
        let parsed: StreamChunk = serde_json::from_str(data).unwrap();
        assert!(parsed.choices[0].delta.content.is_none());
    }
}
