//! Per-session conversational state and the process-wide session store

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};

use crate::persona;

/// Message role in the LLM conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One role-tagged message in the rolling context
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// The seven intake fields collected over the scripted dialogue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldName {
    Name,
    Phone,
    Course,
    Education,
    IntakeYear,
    City,
    Budget,
}

impl FieldName {
    /// All fields in collection order
    pub const ALL: [Self; 7] = [
        Self::Name,
        Self::Phone,
        Self::Course,
        Self::Education,
        Self::IntakeYear,
        Self::City,
        Self::Budget,
    ];
}

impl fmt::Display for FieldName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Name => "name",
            Self::Phone => "phone",
            Self::Course => "course",
            Self::Education => "education",
            Self::IntakeYear => "intake year",
            Self::City => "city",
            Self::Budget => "budget",
        };
        f.write_str(s)
    }
}

/// Collected intake form fields. A set field is never cleared by
/// extraction; heuristics only fill `None` slots.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollectedFields {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub course: Option<String>,
    pub education: Option<String>,
    pub intake_year: Option<String>,
    pub city: Option<String>,
    pub budget: Option<String>,
}

impl CollectedFields {
    /// Read a field by name
    #[must_use]
    pub fn get(&self, field: FieldName) -> Option<&str> {
        match field {
            FieldName::Name => self.name.as_deref(),
            FieldName::Phone => self.phone.as_deref(),
            FieldName::Course => self.course.as_deref(),
            FieldName::Education => self.education.as_deref(),
            FieldName::IntakeYear => self.intake_year.as_deref(),
            FieldName::City => self.city.as_deref(),
            FieldName::Budget => self.budget.as_deref(),
        }
    }

    /// Fill a field only if it is currently unset
    pub fn fill(&mut self, field: FieldName, value: String) {
        let slot = match field {
            FieldName::Name => &mut self.name,
            FieldName::Phone => &mut self.phone,
            FieldName::Course => &mut self.course,
            FieldName::Education => &mut self.education,
            FieldName::IntakeYear => &mut self.intake_year,
            FieldName::City => &mut self.city,
            FieldName::Budget => &mut self.budget,
        };
        if slot.is_none() {
            *slot = Some(value);
        }
    }

    /// Number of fields still unset
    #[must_use]
    pub fn missing_count(&self) -> usize {
        FieldName::ALL
            .iter()
            .filter(|f| self.get(**f).is_none())
            .count()
    }
}

/// Barge-in bookkeeping. Set only when a new user utterance arrives
/// while a prior turn is still in flight; carried into the next turn's
/// context and cleared when that turn completes (success, cancel or
/// error).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InterruptionState {
    pub was_interrupted: bool,
    /// Preview of what the assistant was saying when cut off
    pub interrupted_context: Option<String>,
    /// Best-effort guess at which field was being collected
    pub interrupted_field: Option<String>,
    /// Unix millis of the barge-in
    pub interrupted_at_ms: Option<i64>,
}

impl InterruptionState {
    /// Record a barge-in snapshot
    pub fn record(&mut self, context: Option<String>, field: Option<String>) {
        self.was_interrupted = true;
        self.interrupted_context = context;
        self.interrupted_field = field;
        self.interrupted_at_ms = Some(chrono::Utc::now().timestamp_millis());
    }

    /// Reset to the non-interrupted state
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Conversational state for one session
#[derive(Debug, Clone)]
pub struct ConversationState {
    /// Role-tagged rolling history; system entries are preserved across
    /// truncation, non-system entries are trimmed to the most recent N
    pub history: Vec<ChatMessage>,

    /// Intake form progress
    pub collected_fields: CollectedFields,

    /// Barge-in bookkeeping
    pub interruption_state: InterruptionState,

    /// Rolling summaries, stored for future compaction passes
    pub profile_summary: String,
    pub convo_summary: String,
}

impl ConversationState {
    /// Fresh state seeded with the counselor persona prompt
    #[must_use]
    pub fn new() -> Self {
        Self {
            history: vec![ChatMessage::system(persona::system_prompt())],
            collected_fields: CollectedFields::default(),
            interruption_state: InterruptionState::default(),
            profile_summary: String::new(),
            convo_summary: String::new(),
        }
    }

    /// Bounded context: every system message plus the last `window`
    /// non-system messages, in original order within each group
    #[must_use]
    pub fn bounded_history(&self, window: usize) -> Vec<ChatMessage> {
        let system: Vec<ChatMessage> = self
            .history
            .iter()
            .filter(|m| m.role == Role::System)
            .cloned()
            .collect();
        let non_system: Vec<&ChatMessage> = self
            .history
            .iter()
            .filter(|m| m.role != Role::System)
            .collect();
        let skip = non_system.len().saturating_sub(window);
        system
            .into_iter()
            .chain(non_system.into_iter().skip(skip).cloned())
            .collect()
    }
}

impl Default for ConversationState {
    fn default() -> Self {
        Self::new()
    }
}

/// A session's state behind its single-writer lock
pub type SharedSession = Arc<Mutex<ConversationState>>;

/// Process-wide keyed map from session identifier to conversation state.
///
/// Constructed explicitly at startup and injected where needed, so tests
/// run against isolated stores. Entries are retained for the process
/// lifetime; there is no eviction policy yet.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<String, SharedSession>>,
}

impl SessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the state for `session_id`, creating fresh state on first
    /// contact
    pub async fn get_or_create(&self, session_id: &str) -> SharedSession {
        if let Some(existing) = self.sessions.read().await.get(session_id) {
            return Arc::clone(existing);
        }
        let mut sessions = self.sessions.write().await;
        // Double-checked: another connection may have raced us here
        Arc::clone(
            sessions
                .entry(session_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(ConversationState::new()))),
        )
    }

    /// Replace a session's state with a fresh persona-seeded context
    pub async fn reset(&self, session_id: &str) -> SharedSession {
        let fresh = Arc::new(Mutex::new(ConversationState::new()));
        self.sessions
            .write()
            .await
            .insert(session_id.to_string(), Arc::clone(&fresh));
        fresh
    }

    /// Number of live sessions
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounded_history_keeps_system_and_recent() {
        let mut state = ConversationState::new();
        for i in 0..10 {
            state.history.push(ChatMessage::user(format!("u{i}")));
            state.history.push(ChatMessage::assistant(format!("a{i}")));
        }
        let bounded = state.bounded_history(4);
        assert_eq!(bounded.len(), 5); // 1 system + 4 recent
        assert_eq!(bounded[0].role, Role::System);
        assert_eq!(bounded[1].content, "u8");
        assert_eq!(bounded[4].content, "a9");
    }

    #[test]
    fn bounded_history_preserves_interleaved_system_messages() {
        let mut state = ConversationState::new();
        state.history.push(ChatMessage::user("hello"));
        state
            .history
            .push(ChatMessage::system("[INTERRUPTED: mid-sentence]"));
        state.history.push(ChatMessage::assistant("hi"));
        let bounded = state.bounded_history(1);
        let systems = bounded.iter().filter(|m| m.role == Role::System).count();
        assert_eq!(systems, 2);
        assert_eq!(bounded.last().unwrap().content, "hi");
    }

    #[test]
    fn fields_fill_is_monotonic() {
        let mut fields = CollectedFields::default();
        fields.fill(FieldName::Name, "Rahul".to_string());
        fields.fill(FieldName::Name, "Someone Else".to_string());
        assert_eq!(fields.get(FieldName::Name), Some("Rahul"));
        assert_eq!(fields.missing_count(), 6);
    }

    #[tokio::test]
    async fn store_resumes_known_sessions() {
        let store = SessionStore::new();
        let first = store.get_or_create("abc").await;
        first.lock().await.history.push(ChatMessage::user("hello"));
        let second = store.get_or_create("abc").await;
        assert_eq!(second.lock().await.history.len(), 2);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn store_reset_discards_history() {
        let store = SessionStore::new();
        let s = store.get_or_create("abc").await;
        s.lock().await.history.push(ChatMessage::user("hello"));
        let fresh = store.reset("abc").await;
        assert_eq!(fresh.lock().await.history.len(), 1);
    }
}
