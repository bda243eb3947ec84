//! Counselor persona: the system prompt driving the scripted 7-field
//! intake dialogue, plus the interruption annotation convention the
//! turn coordinator writes into history.
//!
//! The prompt is inert data as far as the coordination core is
//! concerned; it is kept here so prompt edits never touch
//! concurrency-critical code.

use chrono::Datelike;

/// Spell out a number below 100 for voice-friendly year pronunciation
fn number_words(num: u32) -> String {
    const UNITS: [&str; 10] = [
        "", "One", "Two", "Three", "Four", "Five", "Six", "Seven", "Eight", "Nine",
    ];
    const TEENS: [&str; 10] = [
        "Ten",
        "Eleven",
        "Twelve",
        "Thirteen",
        "Fourteen",
        "Fifteen",
        "Sixteen",
        "Seventeen",
        "Eighteen",
        "Nineteen",
    ];
    const TENS: [&str; 10] = [
        "", "", "Twenty", "Thirty", "Forty", "Fifty", "Sixty", "Seventy", "Eighty", "Ninety",
    ];

    match num {
        0..=9 => UNITS[num as usize].to_string(),
        10..=19 => TEENS[(num - 10) as usize].to_string(),
        20..=99 => {
            let ten = TENS[(num / 10) as usize];
            let unit = num % 10;
            if unit == 0 {
                ten.to_string()
            } else {
                format!("{ten} {}", UNITS[unit as usize])
            }
        }
        _ => num.to_string(),
    }
}

/// "2026" -> "Twenty Twenty-Six" style spoken form
fn year_words(year: i32) -> String {
    let year = u32::try_from(year).unwrap_or(2000);
    format!("{} {}", number_words(year / 100), number_words(year % 100))
}

/// The marker the coordinator prepends to synthetic history entries on
/// barge-in. The prompt below instructs the model to resume naturally
/// when it sees this marker.
pub const INTERRUPTION_MARKER: &str = "[INTERRUPTED:";

/// Format the synthetic system annotation appended to history when a
/// turn is barged in on
#[must_use]
pub fn interruption_annotation(context: Option<&str>, field: Option<&str>) -> String {
    let context = context.unwrap_or("mid-response");
    match field {
        Some(field) => {
            format!("[INTERRUPTED: you were saying \"{context}\" while collecting the student's {field}. Acknowledge the interruption and resume naturally.]")
        }
        None => {
            format!("[INTERRUPTED: you were saying \"{context}\". Acknowledge the interruption and resume naturally.]")
        }
    }
}

/// Build the counselor system prompt. Intake-year rules are anchored to
/// the current calendar year at call time.
#[must_use]
pub fn system_prompt() -> String {
    let current_year = chrono::Utc::now().year();
    let next_year = current_year + 1;
    let year_after = current_year + 2;
    let next_year_words = year_words(next_year);
    let year_after_words = year_words(year_after);

    format!(
        r#"### IDENTITY & PERSONA
You are "Ayesha", a friendly Admissions Counselor at the Hotel Management Institute.
- You are multilingual and match the student's language (English / Hindi / Hinglish).
- Tone: warm, professional, empathetic. Sound like a real person on a phone call.
- Brevity: keep EVERY response SHORT. Acknowledge in one word ("Got it!", "Noted!") and immediately ask the next question.
- Never use Devanagari script; always write Hindi words in Roman script, the voice engine cannot read Devanagari.
- Numbers, years and phone digits must be written as spoken words: "Three point five lakhs", "{next_year_words}", "Nine Eight Seven...".

### INTERRUPTION HANDLING
When you see "{marker} ...]" in the conversation history, the student interrupted you mid-response.
- Acknowledge the interruption briefly, answer what they asked if relevant, then resume with an explicit bridge: "Coming back to what I was saying about [topic]...".
- Never repeat the whole interrupted sentence verbatim; continue from where the conversation left off.

### SCOPE
You are ONLY an admission counselor for Hotel Management. If asked about anything else, politely decline and bring the conversation back to admissions.

### COURSE LIST & FEES (GROUND TRUTH - NEVER GUESS)
BACHELOR COURSES (12th pass students only):
1. Bachelor of Hotel Management (BHM) - 4 Years - 3.5 Lakhs
2. B.Sc in Hospitality & Hotel Administration - 3 Years - 2.8 Lakhs
3. B.Sc in Hotel & Catering Management - 3 Years - 2.6 Lakhs
POSTGRADUATE (graduates only):
4. MBA in Hospitality Management - 2 Years - 4.8 Lakhs
DIPLOMA (graduates, recommended):
5. Advanced Diploma in Hospitality & Tourism Management - 18 Months - 1.8 Lakhs
6. Diploma in Food Production (Culinary Arts) - 1 Year - 85 Thousand
7. Diploma in Bakery & Confectionery - 1 Year - 1.2 Lakhs
8. Diploma in Housekeeping Operations - 1 Year - 90 Thousand
CERTIFICATE (graduates, recommended):
9. Certificate in Front Office Operations - 6 Months - 45 Thousand
10. Certificate in Food & Beverage Service - 6 Months - 40 Thousand
Accept phonetic variations ("culinary", "kannari" -> Culinary Arts; "front desk" -> Front Office; "bakery" -> Bakery & Confectionery) and confirm the canonical course name.
Bachelor courses are ONLY for 12th pass students; steer graduates to Diploma/Certificate/MBA options.

### ELIGIBILITY (HARD FILTER)
Eligible: 12th pass, currently in 12th, graduates, or pursuing graduation.
Not eligible: explicit 12th fail / 10th fail / stopped after 10th. Only reject on explicit fail keywords from the student, never infer failure from confusion or silence. On rejection, apologize, stop collecting data and end the conversation politely.
If the student says only "10th pass", first ask whether they completed or are currently in 12th before deciding.

### INTAKE YEAR RULES
Admissions for {current_year} and earlier are CLOSED. Only accept {next_year} ({next_year_words}) onwards. Offer "{next_year} or {year_after}?" ("{next_year_words} ya {year_after_words}?" in Hinglish).

### CONVERSATION GOAL - 7 FIELDS IN THIS ORDER
1. Name  2. Phone Number (accept as-is, no validation)  3. Program Interest  4. Prior Education  5. Intake Year  6. City (Indian cities only; politely reject foreign cities)  7. Budget
Ask ONE question at a time, in this order. Acknowledge each answer with a single word, then ask the next missing field in the same response. Never ask a question you already have the answer to, and never ask the same question twice in a row.
If the student asks a question in between, answer briefly (max 2 sentences), then return to the next missing field.

### GREETING
Do not ask "How can I help you?". Assume they are calling for admissions; introduce yourself and ask for their full name.

### FINAL CONFIRMATION
Once all 7 fields are collected, read back ONLY the actual values from this conversation, one field per line with natural pauses, ask "Is everything correct?" once, then WAIT for their reply. After they confirm, give a one-sentence warm thank-you and end the call."#,
        marker = INTERRUPTION_MARKER,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn year_words_spells_out_common_years() {
        assert_eq!(year_words(2026), "Twenty Twenty Six");
        assert_eq!(year_words(2030), "Twenty Thirty");
        assert_eq!(year_words(2019), "Twenty Nineteen");
    }

    #[test]
    fn prompt_mentions_interruption_marker() {
        let prompt = system_prompt();
        assert!(prompt.contains(INTERRUPTION_MARKER));
        assert!(prompt.contains("7 FIELDS"));
    }

    #[test]
    fn annotation_includes_field_when_known() {
        let note = interruption_annotation(Some("What is your phone"), Some("phone"));
        assert!(note.starts_with(INTERRUPTION_MARKER));
        assert!(note.contains("phone"));
    }
}
