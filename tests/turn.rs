//! Turn coordination integration tests
//!
//! Exercises the full turn lifecycle against scripted generation and
//! synthesis stubs: delivery order, barge-in cancellation, repetition
//! breaking and commit rules.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use parley_gateway::llm::{DeltaStream, GenerationBackend};
use parley_gateway::session::{ChatMessage, ConversationState, Role, SharedSession};
use parley_gateway::turn::{TurnCoordinator, TurnOutput};
use parley_gateway::voice::tts::SynthesisBackend;
use parley_gateway::{Error, Result};

/// One scripted step of a stubbed generation stream
#[derive(Clone)]
enum Step {
    Delta(&'static str),
    /// Stall, waking early if cancelled
    Pause(u64),
}

/// Generation stub that plays back one script per call and records
/// whether two streams were ever live at once
struct ScriptedBackend {
    scripts: StdMutex<VecDeque<Vec<Step>>>,
    issued_tokens: StdMutex<Vec<CancellationToken>>,
    overlap: AtomicBool,
}

impl ScriptedBackend {
    fn new(scripts: Vec<Vec<Step>>) -> Arc<Self> {
        Arc::new(Self {
            scripts: StdMutex::new(scripts.into()),
            issued_tokens: StdMutex::new(Vec::new()),
            overlap: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl GenerationBackend for ScriptedBackend {
    async fn generate(
        &self,
        _messages: Vec<ChatMessage>,
        cancel: CancellationToken,
    ) -> Result<DeltaStream> {
        {
            let mut tokens = self.issued_tokens.lock().unwrap();
            if tokens.iter().any(|t| !t.is_cancelled()) {
                self.overlap.store(true, Ordering::SeqCst);
            }
            tokens.push(cancel.clone());
        }

        let script = self.scripts.lock().unwrap().pop_front().unwrap_or_default();
        let (tx, rx) = mpsc::channel::<Result<String>>(16);
        tokio::spawn(async move {
            for step in script {
                match step {
                    Step::Delta(delta) => {
                        if tx.send(Ok(delta.to_string())).await.is_err() {
                            return;
                        }
                    }
                    Step::Pause(ms) => {
                        tokio::select! {
                            () = cancel.cancelled() => return,
                            () = tokio::time::sleep(Duration::from_millis(ms)) => {}
                        }
                    }
                }
            }
        });
        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

/// Generation stub that always fails to open a stream
struct FailingBackend;

#[async_trait]
impl GenerationBackend for FailingBackend {
    async fn generate(
        &self,
        _messages: Vec<ChatMessage>,
        _cancel: CancellationToken,
    ) -> Result<DeltaStream> {
        Err(Error::Llm("backend down".to_string()))
    }
}

/// Synthesis stub that echoes text bytes, optionally failing one call
struct CountingSynth {
    calls: AtomicUsize,
    fail_on_call: Option<usize>,
}

impl CountingSynth {
    fn new(fail_on_call: Option<usize>) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            fail_on_call,
        })
    }
}

#[async_trait]
impl SynthesisBackend for CountingSynth {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_on_call == Some(call) {
            return Err(Error::Tts("synthesis exploded".to_string()));
        }
        Ok(text.as_bytes().to_vec())
    }
}

fn fresh_session() -> SharedSession {
    Arc::new(Mutex::new(ConversationState::new()))
}

fn coordinator(
    llm: Arc<dyn GenerationBackend>,
    tts: Option<Arc<dyn SynthesisBackend>>,
    session: SharedSession,
) -> (TurnCoordinator, mpsc::Receiver<TurnOutput>) {
    let (tx, rx) = mpsc::channel(64);
    (TurnCoordinator::new(llm, tts, session, tx, 20, 160), rx)
}

/// Drain events until the channel goes quiet
async fn drain(rx: &mut mpsc::Receiver<TurnOutput>, quiet_ms: u64) -> Vec<TurnOutput> {
    let mut events = Vec::new();
    loop {
        match tokio::time::timeout(Duration::from_millis(quiet_ms), rx.recv()).await {
            Ok(Some(event)) => events.push(event),
            _ => return events,
        }
    }
}

fn reply_texts(events: &[TurnOutput]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            TurnOutput::Reply { text } => Some(text.clone()),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn completed_turn_delivers_text_then_audio_per_unit() {
    let llm = ScriptedBackend::new(vec![vec![
        Step::Delta("Got it. What is "),
        Step::Delta("your phone number? "),
    ]]);
    let tts = CountingSynth::new(None);
    let session = fresh_session();
    let (mut coord, mut rx) = coordinator(llm, Some(tts), Arc::clone(&session));

    coord.submit("My name is Rahul Verma".to_string()).await;
    let events = drain(&mut rx, 300).await;

    // Each sentence unit is a text frame immediately followed by audio
    let kinds: Vec<&str> = events
        .iter()
        .map(|e| match e {
            TurnOutput::Reply { .. } => "reply",
            TurnOutput::Audio { .. } => "audio",
            _ => "other",
        })
        .collect();
    assert_eq!(kinds, vec!["reply", "audio", "reply", "audio"]);
    assert_eq!(
        reply_texts(&events),
        vec!["Got it.", "What is your phone number?"]
    );

    let state = session.lock().await;
    let user_count = state
        .history
        .iter()
        .filter(|m| m.role == Role::User)
        .count();
    assert_eq!(user_count, 1);
    let assistant = state
        .history
        .iter()
        .find(|m| m.role == Role::Assistant)
        .expect("assistant message committed");
    assert_eq!(assistant.content, "Got it. What is your phone number? ");
    // Extraction ran on the committed pair
    assert_eq!(state.collected_fields.name.as_deref(), Some("Rahul Verma"));
}

#[tokio::test]
async fn barge_in_cancels_before_next_generation_starts() {
    let llm = ScriptedBackend::new(vec![
        vec![
            Step::Delta("Please share your phone number. "),
            Step::Pause(5_000),
            Step::Delta("This never arrives. "),
        ],
        vec![Step::Delta("We offer ten programs. ")],
    ]);
    let session = fresh_session();
    let (mut coord, mut rx) = coordinator(
        llm.clone() as Arc<dyn GenerationBackend>,
        None,
        Arc::clone(&session),
    );

    coord.submit("My name is Rahul Verma".to_string()).await;
    tokio::time::sleep(Duration::from_millis(150)).await;
    coord.submit("Wait, what courses do you have?".to_string()).await;
    let events = drain(&mut rx, 300).await;

    assert!(
        !llm.overlap.load(Ordering::SeqCst),
        "two generation streams were live at once"
    );
    let replies = reply_texts(&events);
    assert!(replies.contains(&"Please share your phone number.".to_string()));
    assert!(replies.contains(&"We offer ten programs.".to_string()));
    assert!(!replies.iter().any(|r| r.contains("never arrives")));

    let state = session.lock().await;
    // The interrupted turn committed its user message exactly once,
    // with the partial assistant text
    let first_user = state
        .history
        .iter()
        .filter(|m| m.content == "My name is Rahul Verma")
        .count();
    assert_eq!(first_user, 1);
    let partials = state
        .history
        .iter()
        .filter(|m| m.role == Role::Assistant && m.content.contains("Please share"))
        .count();
    assert_eq!(partials, 1);

    // Barge-in left a synthetic annotation naming the guessed field
    let annotation = state
        .history
        .iter()
        .find(|m| m.role == Role::System && m.content.starts_with("[INTERRUPTED:"))
        .expect("interruption annotation in history");
    assert!(annotation.content.contains("name"));

    // The snapshot was consumed by the follow-up turn
    assert!(!state.interruption_state.was_interrupted);
}

#[tokio::test]
async fn repetition_breaker_aborts_after_second_strike() {
    let llm = ScriptedBackend::new(vec![vec![
        Step::Delta("What is your phone number? "),
        Step::Delta("What is your phone number? "),
        Step::Delta("What is your phone number? "),
        Step::Delta("What is your phone number? "),
    ]]);
    let session = fresh_session();
    let (mut coord, mut rx) = coordinator(llm, None, session);

    coord.submit("hello".to_string()).await;
    let events = drain(&mut rx, 300).await;

    let replies = reply_texts(&events);
    assert_eq!(replies, vec!["What is your phone number?"]);
    assert!(
        events
            .iter()
            .any(|e| matches!(e, TurnOutput::LoopDetected { message } if message == "response loop detected"))
    );
}

#[tokio::test]
async fn generation_failure_preserves_user_message_only() {
    let session = fresh_session();
    let (mut coord, mut rx) = coordinator(Arc::new(FailingBackend), None, Arc::clone(&session));

    coord.submit("hello there".to_string()).await;
    let events = drain(&mut rx, 300).await;

    assert!(
        events
            .iter()
            .any(|e| matches!(e, TurnOutput::GenerationError { .. }))
    );

    let state = session.lock().await;
    assert!(
        state
            .history
            .iter()
            .any(|m| m.role == Role::User && m.content == "hello there")
    );
    assert!(!state.history.iter().any(|m| m.role == Role::Assistant));
}

#[tokio::test]
async fn synthesis_failure_is_localized_to_one_segment() {
    let llm = ScriptedBackend::new(vec![vec![Step::Delta(
        "First we talk fees. Then we pick a course. Finally we book a visit. ",
    )]]);
    let tts = CountingSynth::new(Some(2));
    let session = fresh_session();
    let (mut coord, mut rx) = coordinator(llm, Some(tts), session);

    coord.submit("hello".to_string()).await;
    let events = drain(&mut rx, 300).await;

    assert_eq!(reply_texts(&events).len(), 3);
    let audio_count = events
        .iter()
        .filter(|e| matches!(e, TurnOutput::Audio { .. }))
        .count();
    assert_eq!(audio_count, 2);
    assert_eq!(
        events
            .iter()
            .filter(|e| matches!(e, TurnOutput::SynthesisError { .. }))
            .count(),
        1
    );
}

#[tokio::test]
async fn barge_in_before_first_delta_still_extracts_fields() {
    // First turn stalls before producing anything; the utterance that
    // started it must still feed extraction when it is committed
    let llm = ScriptedBackend::new(vec![
        vec![Step::Pause(5_000)],
        vec![Step::Delta("Sure, we have many courses. ")],
    ]);
    let session = fresh_session();
    let (mut coord, mut rx) = coordinator(llm, None, Arc::clone(&session));

    coord.submit("my name is Rahul Verma".to_string()).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    coord.submit("what courses do you have?".to_string()).await;
    drain(&mut rx, 300).await;

    let state = session.lock().await;
    assert_eq!(state.collected_fields.name.as_deref(), Some("Rahul Verma"));
    // No assistant text existed to commit for the interrupted turn
    let committed = state
        .history
        .iter()
        .filter(|m| m.content == "my name is Rahul Verma")
        .count();
    assert_eq!(committed, 1);
}

#[tokio::test]
async fn interruption_snapshot_survives_until_consuming_turn_commits() {
    let llm = ScriptedBackend::new(vec![
        vec![
            Step::Delta("Please share your phone number. "),
            Step::Pause(5_000),
        ],
        vec![Step::Pause(300), Step::Delta("We offer ten programs. ")],
    ]);
    let session = fresh_session();
    let (mut coord, mut rx) = coordinator(llm, None, Arc::clone(&session));

    coord.submit("my name is Rahul Verma".to_string()).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    coord.submit("Wait, what courses do you have?".to_string()).await;

    // The follow-up turn is mid-generation: the snapshot must still be
    // visible (the superseded turn's commit must not have wiped it)
    tokio::time::sleep(Duration::from_millis(150)).await;
    {
        let state = session.lock().await;
        assert!(state.interruption_state.was_interrupted);
        assert!(state.interruption_state.interrupted_at_ms.is_some());
    }

    drain(&mut rx, 300).await;
    let state = session.lock().await;
    assert!(!state.interruption_state.was_interrupted);
}

#[tokio::test]
async fn unterminated_tail_is_flushed_on_clean_end() {
    let llm = ScriptedBackend::new(vec![vec![
        Step::Delta("Noted. "),
        Step::Delta("Is everything correct"),
    ]]);
    let session = fresh_session();
    let (mut coord, mut rx) = coordinator(llm, None, session);

    coord.submit("my budget is 3 lakhs".to_string()).await;
    let events = drain(&mut rx, 300).await;

    assert_eq!(
        reply_texts(&events),
        vec!["Noted.", "Is everything correct"]
    );
}
