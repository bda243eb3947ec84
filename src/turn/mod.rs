//! Turn coordination: one response-generation lifecycle per session.
//!
//! A turn runs Idle → Generating → {Completed, Cancelled, Errored} →
//! Idle. The coordinator owns the currently-active turn for its
//! session, cancels it on barge-in strictly before opening a new
//! generation stream, segments the token stream into sentence units,
//! gates each unit through the repetition guard, pipelines synthesis
//! per unit, and commits the outcome to the session state under its
//! single-writer lock.

pub mod repetition;
pub mod segment;

use std::sync::{Arc, Mutex as StdMutex};

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::Error;
use crate::context::ContextBuilder;
use crate::extract;
use crate::llm::GenerationBackend;
use crate::persona;
use crate::session::{ChatMessage, SharedSession};
use crate::voice::tts::SynthesisBackend;

pub use repetition::{RepetitionGuard, Verdict};
pub use segment::SentenceSegmenter;

/// Transport-agnostic events produced by a turn. The WebSocket layer
/// maps these onto wire frames.
#[derive(Debug, Clone)]
pub enum TurnOutput {
    /// A delivered sentence unit
    Reply { text: String },
    /// Synthesized speech for the preceding sentence unit
    Audio { bytes: Vec<u8> },
    /// Generation failed; the turn is over
    GenerationError { message: String },
    /// Synthesis failed for one segment; the turn continues
    SynthesisError { message: String },
    /// The repetition breaker tripped; the turn aborted itself
    LoopDetected { message: String },
}

/// Handle on the in-flight turn for one session
struct TurnHandle {
    cancel: CancellationToken,
    /// Raw accumulated generation text, shared with the turn task so a
    /// barge-in can snapshot what was being said
    accumulated: Arc<StdMutex<String>>,
    /// The utterance that started this turn, used for best-effort
    /// interrupted-field classification
    user_text: String,
    task: JoinHandle<()>,
}

/// Drives one conversational turn per inbound final user utterance
pub struct TurnCoordinator {
    llm: Arc<dyn GenerationBackend>,
    tts: Option<Arc<dyn SynthesisBackend>>,
    context: ContextBuilder,
    session: SharedSession,
    output: mpsc::Sender<TurnOutput>,
    preview_chars: usize,
    active: Option<TurnHandle>,
}

impl TurnCoordinator {
    #[must_use]
    pub fn new(
        llm: Arc<dyn GenerationBackend>,
        tts: Option<Arc<dyn SynthesisBackend>>,
        session: SharedSession,
        output: mpsc::Sender<TurnOutput>,
        history_window: usize,
        preview_chars: usize,
    ) -> Self {
        Self {
            llm,
            tts,
            context: ContextBuilder::new(history_window),
            session,
            output,
            preview_chars,
            active: None,
        }
    }

    /// Start a new turn for a final user utterance. Any in-flight turn
    /// is cancelled first (barge-in), with its cancellation token
    /// signaled strictly before the new generation call is issued.
    pub async fn submit(&mut self, user_text: String) {
        if let Some(handle) = self.active.take()
            && !handle.task.is_finished()
        {
            self.record_barge_in(&handle).await;
            handle.cancel.cancel();
        }

        let cancel = CancellationToken::new();
        let accumulated = Arc::new(StdMutex::new(String::new()));
        let task = tokio::spawn(run_turn(TurnParams {
            llm: Arc::clone(&self.llm),
            tts: self.tts.clone(),
            context: self.context.clone(),
            session: Arc::clone(&self.session),
            output: self.output.clone(),
            cancel: cancel.clone(),
            accumulated: Arc::clone(&accumulated),
            user_text: user_text.clone(),
        }));

        self.active = Some(TurnHandle {
            cancel,
            accumulated,
            user_text,
            task,
        });
    }

    /// Cancel the in-flight turn without starting a new one (used by
    /// explicit session reset)
    pub fn cancel_active(&mut self) {
        if let Some(handle) = self.active.take()
            && !handle.task.is_finished()
        {
            handle.cancel.cancel();
        }
    }

    /// Inject assistant speech outside the normal turn flow: delivered
    /// and synthesized like a sentence unit, appended to history
    pub async fn speak(&self, text: String) {
        let _ = self
            .output
            .send(TurnOutput::Reply { text: text.clone() })
            .await;

        if let Some(tts) = &self.tts {
            match tts.synthesize(&text).await {
                Ok(bytes) => {
                    let _ = self.output.send(TurnOutput::Audio { bytes }).await;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "direct speech synthesis failed");
                    let _ = self
                        .output
                        .send(TurnOutput::SynthesisError {
                            message: e.to_string(),
                        })
                        .await;
                }
            }
        }

        let mut state = self.session.lock().await;
        state.history.push(ChatMessage::assistant(text));
    }

    /// Snapshot what the interrupted turn was doing before discarding
    /// it: a preview of the emitted text and a best-effort guess at the
    /// field being collected, written both into the interruption state
    /// and into history as a synthetic system annotation.
    async fn record_barge_in(&self, handle: &TurnHandle) {
        let preview = {
            let accumulated = handle
                .accumulated
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            let trimmed = accumulated.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(truncate_chars(trimmed, self.preview_chars))
            }
        };
        let field = extract::classify_collecting_field(&handle.user_text).map(|f| f.to_string());

        tracing::info!(
            field = ?field,
            has_preview = preview.is_some(),
            "barge-in: cancelling in-flight turn"
        );

        let mut state = self.session.lock().await;
        state
            .interruption_state
            .record(preview.clone(), field.clone());
        state.history.push(ChatMessage::system(
            persona::interruption_annotation(preview.as_deref(), field.as_deref()),
        ));
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let truncated: String = text.chars().take(max).collect();
        format!("{truncated}...")
    }
}

struct TurnParams {
    llm: Arc<dyn GenerationBackend>,
    tts: Option<Arc<dyn SynthesisBackend>>,
    context: ContextBuilder,
    session: SharedSession,
    output: mpsc::Sender<TurnOutput>,
    cancel: CancellationToken,
    accumulated: Arc<StdMutex<String>>,
    user_text: String,
}

/// How a turn ended, for the commit step
enum Ending {
    Completed,
    Cancelled,
    Errored,
}

async fn run_turn(params: TurnParams) {
    let TurnParams {
        llm,
        tts,
        context,
        session,
        output,
        cancel,
        accumulated,
        user_text,
    } = params;

    let (messages, consumed_snapshot) = {
        let state = session.lock().await;
        let messages = context.build(&state, &user_text);
        // Remember which snapshot (if any) this context carries; the
        // commit clears exactly that one, so a cancelled predecessor
        // can never wipe a successor's fresh snapshot.
        (messages, state.interruption_state.interrupted_at_ms)
    };

    let mut stream = match llm.generate(messages, cancel.clone()).await {
        Ok(stream) => stream,
        Err(e) => {
            tracing::error!(error = %e, "failed to open generation stream");
            let _ = output
                .send(TurnOutput::GenerationError {
                    message: e.to_string(),
                })
                .await;
            commit(&session, &user_text, &accumulated, &Ending::Errored, consumed_snapshot).await;
            return;
        }
    };

    let mut segmenter = SentenceSegmenter::new();
    let mut guard = RepetitionGuard::new();
    let mut ending = Ending::Completed;

    'generation: loop {
        let delta = tokio::select! {
            () = cancel.cancelled() => {
                ending = Ending::Cancelled;
                break 'generation;
            }
            delta = stream.next() => delta,
        };

        let Some(delta) = delta else {
            break 'generation;
        };
        let delta = match delta {
            Ok(delta) => delta,
            Err(e) => {
                tracing::error!(error = %e, "generation stream failed");
                let _ = output
                    .send(TurnOutput::GenerationError {
                        message: e.to_string(),
                    })
                    .await;
                ending = Ending::Errored;
                break 'generation;
            }
        };

        accumulated
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push_str(&delta);

        for unit in segmenter.consume(&delta) {
            if cancel.is_cancelled() {
                ending = Ending::Cancelled;
                break 'generation;
            }
            match guard.check(&unit) {
                Verdict::Deliver => {
                    deliver_unit(&unit, tts.as_deref(), &output, &cancel).await;
                }
                Verdict::Suppress => {}
                Verdict::Abort => {
                    tracing::warn!("repetition breaker tripped, aborting turn");
                    let _ = output
                        .send(TurnOutput::LoopDetected {
                            message: Error::RepetitionLoop.to_string(),
                        })
                        .await;
                    cancel.cancel();
                    ending = Ending::Cancelled;
                    break 'generation;
                }
            }
        }
    }

    // Only a cleanly finished stream flushes the trailing fragment
    if matches!(ending, Ending::Completed)
        && let Some(rest) = segmenter.finish()
    {
        match guard.check(&rest) {
            Verdict::Deliver => {
                deliver_unit(&rest, tts.as_deref(), &output, &cancel).await;
            }
            Verdict::Suppress => {}
            Verdict::Abort => {
                let _ = output
                    .send(TurnOutput::LoopDetected {
                        message: Error::RepetitionLoop.to_string(),
                    })
                    .await;
                ending = Ending::Cancelled;
            }
        }
    }

    commit(&session, &user_text, &accumulated, &ending, consumed_snapshot).await;
}

/// Deliver one sentence unit: text event first, then synthesized audio.
/// The token is checked before synthesis and again before sending the
/// audio; a synthesis call already in flight completes but its result
/// is discarded on cancellation. Synthesis failures are localized to
/// the segment.
async fn deliver_unit(
    unit: &str,
    tts: Option<&dyn SynthesisBackend>,
    output: &mpsc::Sender<TurnOutput>,
    cancel: &CancellationToken,
) {
    let _ = output
        .send(TurnOutput::Reply {
            text: unit.to_string(),
        })
        .await;

    let Some(tts) = tts else { return };
    if cancel.is_cancelled() {
        return;
    }

    match tts.synthesize(unit).await {
        Ok(bytes) => {
            if !cancel.is_cancelled() {
                let _ = output.send(TurnOutput::Audio { bytes }).await;
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, unit = %unit, "segment synthesis failed");
            let _ = output
                .send(TurnOutput::SynthesisError {
                    message: e.to_string(),
                })
                .await;
        }
    }
}

/// Commit the turn outcome under the session lock.
///
/// - Completed: user + full assistant text, field extraction.
/// - Cancelled: user + whatever partial text accumulated (already
///   spoken content may carry user-relevant information), extraction
///   still runs so a barged-in utterance is never lost.
/// - Errored: user only, no extraction.
///
/// The interruption snapshot this turn consumed at context-build time
/// is cleared here, once the turn is over. The timestamp match keeps a
/// superseded turn from clearing a snapshot recorded after its own
/// context was built.
async fn commit(
    session: &SharedSession,
    user_text: &str,
    accumulated: &Arc<StdMutex<String>>,
    ending: &Ending,
    consumed_snapshot: Option<i64>,
) {
    let assistant_text = accumulated
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .clone();

    let mut state = session.lock().await;
    state.history.push(ChatMessage::user(user_text));

    if !matches!(ending, Ending::Errored) {
        if !assistant_text.trim().is_empty() {
            state
                .history
                .push(ChatMessage::assistant(assistant_text.clone()));
        }
        extract::extract(user_text, &assistant_text, &mut state.collected_fields);
    }

    if consumed_snapshot.is_some()
        && state.interruption_state.interrupted_at_ms == consumed_snapshot
    {
        state.interruption_state.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_leaves_short_text_alone() {
        assert_eq!(truncate_chars("hello", 10), "hello");
    }

    #[test]
    fn truncate_appends_ellipsis() {
        assert_eq!(truncate_chars("hello world", 5), "hello...");
    }
}
