//! Repetition suppression for degenerate generation loops.
//!
//! Language models occasionally fall into emitting a near-duplicate
//! sentence over and over; undetected, that becomes a long repeated
//! audio response. Each candidate sentence unit is compared against a
//! bounded window of the most recently delivered units; near-duplicates
//! are suppressed, and two strikes in one turn trip a circuit breaker
//! that aborts the turn.

use std::collections::{HashSet, VecDeque};

/// Delivered-unit window size for comparison
const WINDOW_SIZE: usize = 3;

/// Normalized strings shorter than this are too short to compare
const MIN_COMPARE_CHARS: usize = 10;

/// Jaccard similarity above this flags a repetition
const JACCARD_THRESHOLD: f64 = 0.8;

/// Containment requires the smaller set to be at least this fraction of
/// the larger set's size, so a short phrase does not trivially match a
/// long unrelated sentence
const CONTAINMENT_MIN_RATIO: f64 = 0.7;

/// Strikes within one turn before the breaker trips
const MAX_STRIKES: u32 = 2;

/// Outcome of checking one candidate sentence unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Not a repetition: deliver and track
    Deliver,
    /// Near-duplicate of a recent delivered unit: drop silently
    Suppress,
    /// Second strike: abort the whole turn
    Abort,
}

/// Per-turn repetition detector
#[derive(Debug, Default)]
pub struct RepetitionGuard {
    window: VecDeque<String>,
    strikes: u32,
}

impl RepetitionGuard {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Check a candidate unit, updating strike count and window
    pub fn check(&mut self, candidate: &str) -> Verdict {
        let normalized = normalize(candidate);
        let repeated = self
            .window
            .iter()
            .any(|previous| is_repetition(&normalized, previous));

        if repeated {
            self.strikes += 1;
            tracing::warn!(
                strikes = self.strikes,
                unit = %candidate,
                "suppressing repeated sentence unit"
            );
            if self.strikes >= MAX_STRIKES {
                return Verdict::Abort;
            }
            return Verdict::Suppress;
        }

        self.strikes = 0;
        self.window.push_back(normalized);
        if self.window.len() > WINDOW_SIZE {
            self.window.pop_front();
        }
        Verdict::Deliver
    }
}

/// Lowercase, strip punctuation, collapse whitespace
fn normalize(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c.is_whitespace() {
                c
            } else {
                ' '
            }
        })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Compare two already-normalized strings
fn is_repetition(a: &str, b: &str) -> bool {
    if a.chars().count() < MIN_COMPARE_CHARS || b.chars().count() < MIN_COMPARE_CHARS {
        return false;
    }

    let words_a: HashSet<&str> = a.split_whitespace().collect();
    let words_b: HashSet<&str> = b.split_whitespace().collect();
    if words_a.is_empty() || words_b.is_empty() {
        return false;
    }

    let intersection = words_a.intersection(&words_b).count();
    let union = words_a.union(&words_b).count();

    #[allow(clippy::cast_precision_loss)]
    let jaccard = intersection as f64 / union as f64;
    if jaccard > JACCARD_THRESHOLD {
        return true;
    }

    let (smaller, larger) = if words_a.len() <= words_b.len() {
        (&words_a, &words_b)
    } else {
        (&words_b, &words_a)
    };

    #[allow(clippy::cast_precision_loss)]
    let size_ratio = smaller.len() as f64 / larger.len() as f64;
    smaller.is_subset(larger) && size_ratio >= CONTAINMENT_MIN_RATIO
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distinct_sentences_all_deliver() {
        let mut guard = RepetitionGuard::new();
        assert_eq!(guard.check("Got it, thank you very much."), Verdict::Deliver);
        assert_eq!(guard.check("What is your phone number?"), Verdict::Deliver);
        assert_eq!(guard.check("Which city are you from?"), Verdict::Deliver);
    }

    #[test]
    fn exact_repeat_suppresses_then_aborts() {
        let mut guard = RepetitionGuard::new();
        assert_eq!(guard.check("What is your phone number?"), Verdict::Deliver);
        assert_eq!(guard.check("What is your phone number?"), Verdict::Suppress);
        assert_eq!(guard.check("What is your phone number?"), Verdict::Abort);
    }

    #[test]
    fn near_duplicate_flags_by_jaccard() {
        let mut guard = RepetitionGuard::new();
        assert_eq!(
            guard.check("Please tell me your budget for the course."),
            Verdict::Deliver
        );
        // Same words, different punctuation and case
        assert_eq!(
            guard.check("please TELL me your budget, for the course!"),
            Verdict::Suppress
        );
    }

    #[test]
    fn short_units_are_never_flagged() {
        let mut guard = RepetitionGuard::new();
        assert_eq!(guard.check("Got it!"), Verdict::Deliver);
        assert_eq!(guard.check("Got it!"), Verdict::Deliver);
        assert_eq!(guard.check("Got it!"), Verdict::Deliver);
    }

    #[test]
    fn short_phrase_not_contained_in_long_sentence() {
        let mut guard = RepetitionGuard::new();
        assert_eq!(
            guard.check("Your budget and city details are noted down carefully today."),
            Verdict::Deliver
        );
        // All words appear above, but the size ratio guard rejects containment
        assert_eq!(guard.check("budget city noted"), Verdict::Deliver);
    }

    #[test]
    fn delivered_unit_resets_strikes() {
        let mut guard = RepetitionGuard::new();
        assert_eq!(guard.check("What is your phone number today?"), Verdict::Deliver);
        assert_eq!(guard.check("What is your phone number today?"), Verdict::Suppress);
        assert_eq!(guard.check("Which city in India are you from?"), Verdict::Deliver);
        // Strike counter was reset by the delivered unit
        assert_eq!(guard.check("Which city in India are you from?"), Verdict::Suppress);
        assert_eq!(guard.check("And what is your course budget?"), Verdict::Deliver);
    }

    #[test]
    fn window_evicts_beyond_three_delivered_units() {
        let mut guard = RepetitionGuard::new();
        assert_eq!(guard.check("May I know your full name please?"), Verdict::Deliver);
        assert_eq!(guard.check("What is your phone number today?"), Verdict::Deliver);
        assert_eq!(guard.check("Which course are you interested in?"), Verdict::Deliver);
        assert_eq!(guard.check("What is your education background so far?"), Verdict::Deliver);
        // The first unit has been evicted from the window
        assert_eq!(guard.check("May I know your full name please?"), Verdict::Deliver);
    }

    #[test]
    fn normalize_strips_punctuation_and_case() {
        assert_eq!(
            normalize("  Got it, Snehil!  What's next? "),
            "got it snehil what s next"
        );
    }
}
