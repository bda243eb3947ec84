//! Best-effort heuristic extraction of intake fields from utterance text.
//!
//! Pure functions, deliberately isolated from the turn state machine so
//! they can be swapped for a more robust extractor without touching
//! concurrency-critical code. Extraction only fills unset fields; it
//! never overwrites a value already collected.

use std::sync::LazyLock;

use regex::Regex;

use crate::session::{CollectedFields, FieldName};

static NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:my name is|i am|i'm|this is|mera naam|naam)\s+([A-Za-z]+(?:\s+[A-Za-z]+)?)")
        .expect("name regex")
});

static PHONE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d[\d\s\-]{6,}\d)").expect("phone regex"));

static YEAR_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b(20\d{2})\b").expect("year regex"));

static CITY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:i am from|i'm from|from|live in|rehta hoon|city is)\s+([A-Za-z]+)")
        .expect("city regex")
});

// Confirmation echoes in the assistant's reply ("So your name is Rahul
// Verma, correct?"). Anchored on second-person phrasing so the agent's
// own self-introduction never matches.
static NAME_CONFIRM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)your name is\s+([A-Za-z]+(?:\s+[A-Za-z]+)?)").expect("name confirm regex")
});

static CITY_CONFIRM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)you(?:'re| are)\s+from\s+([A-Za-z]+)").expect("city confirm regex")
});

static BUDGET_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)((?:\d+(?:\.\d+)?|one|two|three|four|five|six|seven|eight|nine|ten|paanch|teen|char|do)\s*(?:lakhs?|lacs?|thousand|k\b|hazaar))")
        .expect("budget regex")
});

/// Phonetic/keyword variants mapped to canonical course names. Mirrors
/// the ground-truth table in the persona prompt.
const COURSE_TABLE: &[(&[&str], &str)] = &[
    (
        &["culinary", "kannari", "kalyan", "kulinary", "culnary", "food production"],
        "Diploma in Food Production (Culinary Arts)",
    ),
    (
        &["front office", "reception", "front desk"],
        "Certificate in Front Office Operations",
    ),
    (
        &["housekeeping", "house keeping", "room service"],
        "Diploma in Housekeeping Operations",
    ),
    (
        &["bakery", "baking", "confectionery"],
        "Diploma in Bakery & Confectionery",
    ),
    (
        &["food and beverage", "f&b", "f and b", "food service"],
        "Certificate in Food & Beverage Service",
    ),
    (
        &["bhm", "bachelor hotel", "hotel management degree"],
        "Bachelor of Hotel Management",
    ),
    (
        &["mba", "masters", "postgraduate"],
        "MBA in Hospitality Management",
    ),
    (
        &["hospitality", "hotel admin"],
        "B.Sc in Hospitality & Hotel Administration",
    ),
    (
        &["catering", "hotel catering"],
        "B.Sc in Hotel & Catering Management",
    ),
];

/// Update `fields` from one completed exchange. Only `None` slots are
/// filled; redundant calls are safe.
///
/// Most heuristics anchor on the user's first-person phrasing. The
/// assistant text is scanned only for its confirmation echoes (name,
/// city); its fact-stating content (course lists, fee quotes, intake
/// dates) would pollute the other fields.
pub fn extract(user_text: &str, assistant_text: &str, fields: &mut CollectedFields) {
    if fields.name.is_none()
        && let Some(name) = extract_name(user_text).or_else(|| confirmed_name(assistant_text))
    {
        fields.fill(FieldName::Name, name);
    }
    if fields.phone.is_none()
        && let Some(phone) = extract_phone(user_text)
    {
        fields.fill(FieldName::Phone, phone);
    }
    if fields.course.is_none()
        && let Some(course) = extract_course(user_text)
    {
        fields.fill(FieldName::Course, course);
    }
    if fields.education.is_none()
        && let Some(education) = extract_education(user_text)
    {
        fields.fill(FieldName::Education, education);
    }
    if fields.intake_year.is_none()
        && let Some(year) = extract_intake_year(user_text)
    {
        fields.fill(FieldName::IntakeYear, year);
    }
    if fields.city.is_none()
        && let Some(city) = extract_city(user_text).or_else(|| confirmed_city(assistant_text))
    {
        fields.fill(FieldName::City, city);
    }
    if fields.budget.is_none()
        && let Some(budget) = extract_budget(user_text)
    {
        fields.fill(FieldName::Budget, budget);
    }
}

fn extract_name(text: &str) -> Option<String> {
    let caps = NAME_RE.captures(text)?;
    let name = caps.get(1)?.as_str().trim();
    // Filter pronoun-ish captures from "I am fine" style sentences
    const NOT_NAMES: &[&str] = &[
        "fine", "good", "okay", "ok", "here", "interested", "calling", "looking", "sorry", "not",
    ];
    let first_word = name.split_whitespace().next()?.to_lowercase();
    if NOT_NAMES.contains(&first_word.as_str()) {
        return None;
    }
    Some(title_case(name))
}

fn extract_phone(text: &str) -> Option<String> {
    let caps = PHONE_RE.captures(text)?;
    let digits: String = caps
        .get(1)?
        .as_str()
        .chars()
        .filter(char::is_ascii_digit)
        .collect();
    (digits.len() >= 7).then_some(digits)
}

fn extract_course(text: &str) -> Option<String> {
    let lower = text.to_lowercase();
    for (variants, canonical) in COURSE_TABLE {
        if variants.iter().any(|v| lower.contains(v)) {
            return Some((*canonical).to_string());
        }
    }
    None
}

fn extract_education(text: &str) -> Option<String> {
    let lower = text.to_lowercase();
    if lower.contains("12th") || lower.contains("twelfth") || lower.contains("barahvi") {
        Some("12th".to_string())
    } else if lower.contains("graduat") || lower.contains("degree") || lower.contains("b.a")
        || lower.contains("b.sc") || lower.contains("b.com")
    {
        Some("Graduate".to_string())
    } else if lower.contains("10th") || lower.contains("tenth") || lower.contains("dasvi") {
        Some("10th".to_string())
    } else {
        None
    }
}

fn extract_intake_year(text: &str) -> Option<String> {
    if let Some(caps) = YEAR_RE.captures(text) {
        return Some(caps.get(1)?.as_str().to_string());
    }
    use chrono::Datelike;
    let lower = text.to_lowercase();
    let current = chrono::Utc::now().year();
    if lower.contains("next year") || lower.contains("agle saal") {
        return Some((current + 1).to_string());
    }
    if lower.contains("this year") || lower.contains("iss saal") {
        return Some(current.to_string());
    }
    None
}

// "from 12th" / "from the team" style captures are not cities
const NOT_CITIES: &[&str] = &["the", "a", "an", "india", "next", "my", "this", "our", "your"];

fn extract_city(text: &str) -> Option<String> {
    let caps = CITY_RE.captures(text)?;
    let city = caps.get(1)?.as_str();
    if NOT_CITIES.contains(&city.to_lowercase().as_str()) {
        return None;
    }
    Some(title_case(city))
}

fn confirmed_name(assistant_text: &str) -> Option<String> {
    let caps = NAME_CONFIRM_RE.captures(assistant_text)?;
    Some(title_case(caps.get(1)?.as_str().trim()))
}

fn confirmed_city(assistant_text: &str) -> Option<String> {
    let caps = CITY_CONFIRM_RE.captures(assistant_text)?;
    let city = caps.get(1)?.as_str();
    if NOT_CITIES.contains(&city.to_lowercase().as_str()) {
        return None;
    }
    Some(title_case(city))
}

fn extract_budget(text: &str) -> Option<String> {
    let caps = BUDGET_RE.captures(text)?;
    Some(caps.get(1)?.as_str().trim().to_string())
}

/// Guess which field a turn was collecting, by keyword matching against
/// the most recent user message. Best-effort only: an off-topic prior
/// message can misattribute the field.
#[must_use]
pub fn classify_collecting_field(last_user_message: &str) -> Option<FieldName> {
    let lower = last_user_message.to_lowercase();
    if lower.contains("name") || lower.contains("naam") {
        Some(FieldName::Name)
    } else if lower.contains("phone") || lower.contains("number") || lower.contains("contact") {
        Some(FieldName::Phone)
    } else if lower.contains("course") || lower.contains("program") || lower.contains("diploma") {
        Some(FieldName::Course)
    } else if lower.contains("education") || lower.contains("12th") || lower.contains("graduat") {
        Some(FieldName::Education)
    } else if lower.contains("year") || lower.contains("intake") || lower.contains("saal") {
        Some(FieldName::IntakeYear)
    } else if lower.contains("city") || lower.contains("from") || lower.contains("shehar") {
        Some(FieldName::City)
    } else if lower.contains("budget") || lower.contains("fee") || lower.contains("lakh") {
        Some(FieldName::Budget)
    } else {
        None
    }
}

fn title_case(s: &str) -> String {
    s.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            chars.next().map_or_else(String::new, |first| {
                first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase()
            })
        })
        .collect::<Vec<_>>()
        .join(" ")
}
