//! Speech-to-text: live transcription over a Deepgram streaming
//! WebSocket.
//!
//! One session per browser connection, opened lazily on the first
//! inbound audio frame. Raw PCM goes up as binary frames; interim and
//! final transcripts come back as JSON events. Closing sends
//! `CloseStream` so Deepgram flushes any buffered final before the
//! socket drops.

use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;

use crate::config::SttConfig;
use crate::{Error, Result};

/// One transcription hypothesis from the live session
#[derive(Debug, Clone)]
pub struct Transcript {
    pub text: String,
    /// Interim hypotheses are replaced by later ones; finals are stable
    pub is_final: bool,
}

/// Events surfaced from a live transcription session
#[derive(Debug, Clone)]
pub enum SttEvent {
    Transcript(Transcript),
    /// The upstream session failed; the session is over
    Error(String),
}

enum SessionCommand {
    Audio(Vec<u8>),
    Close,
}

#[derive(Deserialize)]
struct LiveEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    is_final: bool,
    #[serde(default)]
    channel: Option<LiveChannel>,
}

#[derive(Deserialize)]
struct LiveChannel {
    alternatives: Vec<LiveAlternative>,
}

#[derive(Deserialize)]
struct LiveAlternative {
    transcript: String,
}

/// Factory for live transcription sessions
pub struct SpeechToText {
    api_key: String,
    config: SttConfig,
}

impl SpeechToText {
    /// Create a new STT instance using Deepgram live
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new(api_key: String, config: SttConfig) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config("Deepgram API key required".to_string()));
        }
        Ok(Self { api_key, config })
    }

    fn listen_url(&self) -> String {
        format!(
            "wss://api.deepgram.com/v1/listen?model={}&language={}&encoding=linear16&sample_rate={}&channels=1&interim_results=true&punctuate=true",
            self.config.model, self.config.language, self.config.sample_rate,
        )
    }

    /// Open a live session, emitting transcripts on `events`
    ///
    /// # Errors
    ///
    /// Returns error if the handshake fails
    pub async fn open(&self, events: mpsc::Sender<SttEvent>) -> Result<TranscriptionSession> {
        let mut request = self
            .listen_url()
            .into_client_request()
            .map_err(|e| Error::Stt(format!("bad Deepgram URL: {e}")))?;
        request.headers_mut().insert(
            "Authorization",
            format!("Token {}", self.api_key)
                .parse()
                .map_err(|_| Error::Stt("API key is not header-safe".to_string()))?,
        );

        let (stream, _) = tokio_tungstenite::connect_async(request).await?;
        tracing::debug!(model = %self.config.model, "deepgram live session opened");
        let (mut ws_tx, mut ws_rx) = stream.split();

        let (command_tx, mut command_rx) = mpsc::channel::<SessionCommand>(64);

        // Uplink: forward PCM frames, then CloseStream on shutdown
        tokio::spawn(async move {
            while let Some(command) = command_rx.recv().await {
                match command {
                    SessionCommand::Audio(pcm) => {
                        if ws_tx.send(Message::Binary(pcm.into())).await.is_err() {
                            break;
                        }
                    }
                    SessionCommand::Close => {
                        let _ = ws_tx
                            .send(Message::Text(r#"{"type":"CloseStream"}"#.into()))
                            .await;
                        let _ = ws_tx.close().await;
                        break;
                    }
                }
            }
        });

        // Downlink: parse transcript events until the socket ends
        tokio::spawn(async move {
            while let Some(message) = ws_rx.next().await {
                let message = match message {
                    Ok(message) => message,
                    Err(e) => {
                        tracing::warn!(error = %e, "deepgram socket error");
                        let _ = events.send(SttEvent::Error(e.to_string())).await;
                        break;
                    }
                };
                let text = match message {
                    Message::Text(text) => text,
                    Message::Close(_) => break,
                    _ => continue,
                };

                let event: LiveEvent = match serde_json::from_str(&text) {
                    Ok(event) => event,
                    Err(e) => {
                        tracing::debug!(error = %e, "skipping unparseable deepgram event");
                        continue;
                    }
                };

                match event.kind.as_str() {
                    "Results" => {
                        let transcript = event
                            .channel
                            .as_ref()
                            .and_then(|c| c.alternatives.first())
                            .map(|a| a.transcript.trim())
                            .unwrap_or_default();
                        if transcript.is_empty() {
                            continue;
                        }
                        let delivered = events
                            .send(SttEvent::Transcript(Transcript {
                                text: transcript.to_string(),
                                is_final: event.is_final,
                            }))
                            .await;
                        if delivered.is_err() {
                            break;
                        }
                    }
                    "Error" => {
                        tracing::warn!(event = %text, "deepgram reported an error");
                        let _ = events.send(SttEvent::Error(text.to_string())).await;
                        break;
                    }
                    _ => {}
                }
            }
        });

        Ok(TranscriptionSession { command_tx })
    }
}

/// Handle on one live transcription session
pub struct TranscriptionSession {
    command_tx: mpsc::Sender<SessionCommand>,
}

impl TranscriptionSession {
    /// Forward one PCM frame upstream
    ///
    /// # Errors
    ///
    /// Returns error if the session has already shut down
    pub async fn send_audio(&self, pcm: Vec<u8>) -> Result<()> {
        self.command_tx
            .send(SessionCommand::Audio(pcm))
            .await
            .map_err(|_| Error::Transport("transcription session closed".to_string()))
    }

    /// Flush pending finals and shut the session down
    pub async fn close(self) {
        let _ = self.command_tx.send(SessionCommand::Close).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_key_is_rejected() {
        assert!(SpeechToText::new(String::new(), SttConfig::default()).is_err());
    }

    #[test]
    fn listen_url_carries_audio_parameters() {
        let stt = SpeechToText::new("key".to_string(), SttConfig::default()).unwrap();
        let url = stt.listen_url();
        assert!(url.contains("model=nova-2"));
        assert!(url.contains("sample_rate=48000"));
        assert!(url.contains("interim_results=true"));
    }

    #[test]
    fn results_event_parses_transcript() {
        let data = r#"{"type":"Results","is_final":true,"channel":{"alternatives":[{"transcript":"hello there"}]}}"#;
        let event: LiveEvent = serde_json::from_str(data).unwrap();
        assert_eq!(event.kind, "Results");
        assert!(event.is_final);
        assert_eq!(
            event.channel.unwrap().alternatives[0].transcript,
            "hello there"
        );
    }
}
