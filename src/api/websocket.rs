//! Per-connection WebSocket transport.
//!
//! One socket carries the whole conversation: JSON control frames
//! tagged by `type`, raw PCM microphone audio as inbound binary frames,
//! and synthesized speech as outbound binary frames. Each connection
//! owns its turn coordinator and (lazily) one live transcription
//! session.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, mpsc};

use super::AppState;
use crate::llm::{
    CLEAR_INSTRUCTION, ENDING_INSTRUCTION, GenerationBackend, WAKE_PHRASE_INSTRUCTION,
    classify_or_false,
};
use crate::session::{ChatMessage, ConversationState, SharedSession};
use crate::turn::{TurnCoordinator, TurnOutput};
use crate::voice::stt::{SttEvent, TranscriptionSession};

/// Optional query parameters for the WebSocket handshake
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Stable conversation identity; absent means an anonymous,
    /// non-persisted session
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
}

/// Incoming WebSocket message from client
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsIncoming {
    /// A final user utterance (typed, or transcribed client-side)
    UserText {
        text: String,
        /// Inject as a system-role note instead of starting a turn
        #[serde(default, rename = "isSystemMessage")]
        is_system_message: bool,
    },
    /// Reset the conversation to a fresh persona-seeded context
    NewCall,
    /// Speak a given line outside the normal turn flow
    AgentSpeak { text: String },
    /// Is this utterance a wake-up/attention phrase?
    WakePhraseIntentCheck { text: String },
    /// Does the caller want to end the call?
    EndingIntentCheck { text: String },
    /// Does the caller want to start over?
    ClearIntentCheck { text: String },
}

/// Outgoing WebSocket message to client. Error payloads go out under
/// an `error` key; the loop breaker reuses `llm_error` with its stable
/// "response loop detected" message as the discriminator.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsOutgoing {
    /// One delivered sentence unit of the assistant's reply
    LlmReply { text: String },
    /// Generation failed or the repetition breaker tripped
    LlmError { error: String },
    /// Live transcription failed
    SttError { error: String },
    /// Synthesis failed for one segment
    TtsError { error: String },
    /// Acknowledges `new_call`
    ContextReset { message: String },
    WakePhraseIntentResult { result: bool, text: String },
    EndingIntentResult { result: bool, text: String },
    ClearIntentResult { result: bool, text: String },
}

/// One outbound frame: JSON control or synthesized audio
enum Frame {
    Json(WsOutgoing),
    Audio(Vec<u8>),
}

/// Handle WebSocket upgrade request
pub async fn ws_upgrade(
    State(state): State<Arc<AppState>>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, query.session_id))
}

/// Handle one WebSocket connection for its whole lifetime
async fn handle_socket(socket: WebSocket, state: Arc<AppState>, session_id: Option<String>) {
    let (mut sender, mut receiver) = socket.split();

    let mut session: SharedSession = match &session_id {
        Some(id) => state.sessions.get_or_create(id).await,
        None => Arc::new(Mutex::new(ConversationState::new())),
    };

    tracing::info!(session_id = ?session_id, "WebSocket connected");

    let (frames_tx, mut frames_rx) = mpsc::channel::<Frame>(64);

    // Forward outbound frames to the socket
    let send_task = tokio::spawn(async move {
        while let Some(frame) = frames_rx.recv().await {
            let message = match frame {
                Frame::Json(msg) => match serde_json::to_string(&msg) {
                    Ok(text) => Message::Text(text.into()),
                    Err(_) => continue,
                },
                Frame::Audio(bytes) => Message::Binary(bytes.into()),
            };
            if sender.send(message).await.is_err() {
                break;
            }
        }
    });

    // Bridge turn events onto wire frames
    let (turn_tx, mut turn_rx) = mpsc::channel::<TurnOutput>(32);
    let frames_for_bridge = frames_tx.clone();
    let bridge_task = tokio::spawn(async move {
        while let Some(event) = turn_rx.recv().await {
            let frame = match event {
                TurnOutput::Reply { text } => Frame::Json(WsOutgoing::LlmReply { text }),
                TurnOutput::Audio { bytes } => Frame::Audio(bytes),
                TurnOutput::GenerationError { message } | TurnOutput::LoopDetected { message } => {
                    Frame::Json(WsOutgoing::LlmError { error: message })
                }
                TurnOutput::SynthesisError { message } => {
                    Frame::Json(WsOutgoing::TtsError { error: message })
                }
            };
            if frames_for_bridge.send(frame).await.is_err() {
                break;
            }
        }
    });

    let make_coordinator = |session: SharedSession| {
        state.llm.as_ref().map(|llm| {
            TurnCoordinator::new(
                Arc::clone(llm) as Arc<dyn GenerationBackend>,
                state.tts.clone(),
                session,
                turn_tx.clone(),
                state.config.conversation.history_window,
                state.config.conversation.interruption_preview_chars,
            )
        })
    };
    let mut coordinator = make_coordinator(Arc::clone(&session));

    // Live transcription is opened lazily on the first audio frame
    let (stt_tx, mut stt_rx) = mpsc::channel::<SttEvent>(32);
    let mut stt_session: Option<TranscriptionSession> = None;

    loop {
        tokio::select! {
            message = receiver.next() => {
                let Some(Ok(message)) = message else { break };
                match message {
                    Message::Text(text) => {
                        // Malformed or unknown frames are ignored
                        let Ok(incoming) = serde_json::from_str::<WsIncoming>(&text) else {
                            tracing::debug!(frame = %text, "ignoring unparseable frame");
                            continue;
                        };
                        handle_control(
                            incoming,
                            &state,
                            session_id.as_deref(),
                            &mut session,
                            &mut coordinator,
                            &make_coordinator,
                            &frames_tx,
                        )
                        .await;
                    }
                    Message::Binary(pcm) => {
                        if stt_session.is_none() {
                            stt_session = open_transcription(&state, &stt_tx, &frames_tx).await;
                            if stt_session.is_none() {
                                continue;
                            }
                        }
                        if let Some(session) = &stt_session
                            && session.send_audio(pcm.to_vec()).await.is_err()
                        {
                            tracing::warn!("transcription session dropped mid-stream");
                            stt_session = None;
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            event = stt_rx.recv() => {
                let Some(event) = event else { break };
                match event {
                    SttEvent::Transcript(transcript) => {
                        if !transcript.is_final {
                            tracing::trace!(text = %transcript.text, "interim transcript");
                            continue;
                        }
                        tracing::info!(text = %transcript.text, "final transcript");
                        submit_utterance(transcript.text, &mut coordinator, &frames_tx).await;
                    }
                    SttEvent::Error(error) => {
                        let _ = frames_tx.send(Frame::Json(WsOutgoing::SttError { error })).await;
                        stt_session = None;
                    }
                }
            }
        }
    }

    if let Some(stt) = stt_session.take() {
        stt.close().await;
    }
    if let Some(coordinator) = &mut coordinator {
        coordinator.cancel_active();
    }
    send_task.abort();
    bridge_task.abort();

    tracing::info!(session_id = ?session_id, "WebSocket disconnected");
}

/// Dispatch one parsed control frame
async fn handle_control(
    incoming: WsIncoming,
    state: &Arc<AppState>,
    session_id: Option<&str>,
    session: &mut SharedSession,
    coordinator: &mut Option<TurnCoordinator>,
    make_coordinator: &impl Fn(SharedSession) -> Option<TurnCoordinator>,
    frames: &mpsc::Sender<Frame>,
) {
    match incoming {
        WsIncoming::UserText {
            text,
            is_system_message,
        } => {
            if is_system_message {
                session.lock().await.history.push(ChatMessage::system(text));
                return;
            }
            submit_utterance(text, coordinator, frames).await;
        }
        WsIncoming::NewCall => {
            if let Some(coordinator) = coordinator.as_mut() {
                coordinator.cancel_active();
            }
            *session = match session_id {
                Some(id) => state.sessions.reset(id).await,
                None => Arc::new(Mutex::new(ConversationState::new())),
            };
            *coordinator = make_coordinator(Arc::clone(session));
            let _ = frames
                .send(Frame::Json(WsOutgoing::ContextReset {
                    message: "conversation context cleared".to_string(),
                }))
                .await;
        }
        WsIncoming::AgentSpeak { text } => {
            if let Some(coordinator) = coordinator.as_ref() {
                coordinator.speak(text).await;
            } else {
                tracing::warn!("agent_speak with no generation backend configured");
            }
        }
        WsIncoming::WakePhraseIntentCheck { text } => {
            spawn_intent_check(state, frames.clone(), WAKE_PHRASE_INSTRUCTION, text, |result, text| {
                WsOutgoing::WakePhraseIntentResult { result, text }
            });
        }
        WsIncoming::EndingIntentCheck { text } => {
            spawn_intent_check(state, frames.clone(), ENDING_INSTRUCTION, text, |result, text| {
                WsOutgoing::EndingIntentResult { result, text }
            });
        }
        WsIncoming::ClearIntentCheck { text } => {
            spawn_intent_check(state, frames.clone(), CLEAR_INSTRUCTION, text, |result, text| {
                WsOutgoing::ClearIntentResult { result, text }
            });
        }
    }
}

/// Start a turn for a final utterance, or report the missing backend
async fn submit_utterance(
    text: String,
    coordinator: &mut Option<TurnCoordinator>,
    frames: &mpsc::Sender<Frame>,
) {
    match coordinator {
        Some(coordinator) => coordinator.submit(text).await,
        None => {
            let _ = frames
                .send(Frame::Json(WsOutgoing::LlmError {
                    error: "no generation backend configured".to_string(),
                }))
                .await;
        }
    }
}

/// Classify off the message loop; any failure yields `result: false`
fn spawn_intent_check(
    state: &Arc<AppState>,
    frames: mpsc::Sender<Frame>,
    instruction: &'static str,
    text: String,
    build: impl FnOnce(bool, String) -> WsOutgoing + Send + 'static,
) {
    let llm = state.llm.clone();
    tokio::spawn(async move {
        let result = match llm {
            Some(llm) => classify_or_false(llm.as_ref(), instruction, &text).await,
            None => false,
        };
        let _ = frames.send(Frame::Json(build(result, text))).await;
    });
}

/// Open a live transcription session, surfacing failure as `stt_error`
async fn open_transcription(
    state: &Arc<AppState>,
    stt_tx: &mpsc::Sender<SttEvent>,
    frames: &mpsc::Sender<Frame>,
) -> Option<TranscriptionSession> {
    let Some(stt) = &state.stt else {
        let _ = frames
            .send(Frame::Json(WsOutgoing::SttError {
                error: "no transcription backend configured".to_string(),
            }))
            .await;
        return None;
    };
    match stt.open(stt_tx.clone()).await {
        Ok(session) => Some(session),
        Err(e) => {
            tracing::error!(error = %e, "failed to open transcription session");
            let _ = frames
                .send(Frame::Json(WsOutgoing::SttError {
                    error: e.to_string(),
                }))
                .await;
            None
        }
    }
}
