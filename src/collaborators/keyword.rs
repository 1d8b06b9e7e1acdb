//! Deterministic keyword collaborators.
//!
//! These work without any model behind them and are the fallback for the
//! completion-backed classifier.

use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;

use super::{Classification, CollaboratorError, IntentClassifier, SlotExtractor};
use crate::backend::Doctor;
use crate::models::{
    DATE_FORMAT, Intent, Message, Slots, Speaker, latest_patient_text, normalize_date,
    normalize_specialization, normalize_time,
};

static DATE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(\d{4}-\d{1,2}-\d{1,2}|\d{1,2}[-/.]\d{1,2}[-/.]\d{4})\b").expect("valid regex")
});

static TIME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(\d{1,2}:\d{2}\s*(?:am|pm)?|\d{1,2}\s*(?:am|pm))\b").expect("valid regex")
});

static REFERENCE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(apt-[a-z0-9]+)\b").expect("valid regex"));

static DOCTOR_TITLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:dr\.?|doctor)\s+([a-z]+)").expect("valid regex"));

/// Words that mark a message as moving an existing appointment.
const RESCHEDULE_CUES: &[&str] = &["reschedule", "move", "change", "postpone", "instead"];

fn normalize_text(text: &str) -> String {
    text.to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn contains_word(text: &str, word: &str) -> bool {
    text.split(|c: char| !c.is_alphanumeric() && c != '\'')
        .any(|token| token == word)
}

// ============================================================================
// Slot Extraction
// ============================================================================

/// Regex and directory based slot extractor.
///
/// Reads only the latest patient message; earlier values are already in the
/// slots and survive through the monotonic merge.
pub struct KeywordSlotExtractor {
    /// Full doctor names, lowercase
    doctors: Vec<String>,
    /// Specializations, snake_case
    specializations: Vec<String>,
    today: Option<NaiveDate>,
}

impl KeywordSlotExtractor {
    pub fn new(directory: &[Doctor]) -> Self {
        let mut specializations: Vec<String> = directory
            .iter()
            .map(|d| normalize_specialization(&d.specialization))
            .collect();
        specializations.sort();
        specializations.dedup();

        Self {
            doctors: directory.iter().map(|d| normalize_text(&d.name)).collect(),
            specializations,
            today: None,
        }
    }

    /// Pin "today" for relative dates.
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    fn today(&self) -> NaiveDate {
        self.today
            .unwrap_or_else(|| chrono::Local::now().date_naive())
    }

    /// Resolve a doctor by full name, or by a unique first or last name
    /// following a title ("dr smith").
    fn find_doctor(&self, text: &str) -> Option<String> {
        if let Some(name) = self.doctors.iter().find(|name| text.contains(name.as_str())) {
            return Some(name.clone());
        }

        for caps in DOCTOR_TITLE_RE.captures_iter(text) {
            let partial = caps[1].to_lowercase();
            let matches: Vec<&String> = self
                .doctors
                .iter()
                .filter(|name| name.split_whitespace().any(|part| part == partial))
                .collect();
            if let [only] = matches.as_slice() {
                return Some((*only).clone());
            }
        }
        None
    }

    fn find_specialization(&self, text: &str) -> Option<String> {
        self.specializations
            .iter()
            .find(|spec| {
                let spaced = spec.replace('_', " ");
                text.contains(&spaced) || text.contains(spec.as_str())
            })
            .cloned()
    }

    fn find_dates(&self, text: &str) -> Vec<String> {
        let mut found: Vec<(usize, String)> = DATE_RE
            .find_iter(text)
            .filter_map(|m| normalize_date(m.as_str()).map(|d| (m.start(), d)))
            .collect();

        let today = self.today();
        for (word, offset) in [("today", 0), ("tomorrow", 1)] {
            if let Some(pos) = text.find(word)
                && contains_word(text, word)
            {
                let date = today + Duration::days(offset);
                found.push((pos, date.format(DATE_FORMAT).to_string()));
            }
        }

        found.sort_by_key(|(pos, _)| *pos);
        found.into_iter().map(|(_, d)| d).collect()
    }

    fn find_times(text: &str) -> Vec<String> {
        TIME_RE
            .find_iter(text)
            .filter(|m| !is_inside_date(text, m.start(), m.end()))
            .filter_map(|m| normalize_time(m.as_str()))
            .collect()
    }
}

/// Guard against `12-10` inside `12-10-2025` being read as a time.
fn is_inside_date(text: &str, start: usize, end: usize) -> bool {
    DATE_RE
        .find_iter(text)
        .any(|d| d.start() <= start && end <= d.end())
}

/// Assign found values to the original and the "new" field.
///
/// Two values are read as original then new. A single value is the new one
/// only when the message is moving an appointment whose original value is
/// already known and differs from it; restating the original keeps it where
/// it is.
fn split_original_new(
    found: Vec<String>,
    moving: bool,
    original: Option<&str>,
) -> (Option<String>, Option<String>) {
    let mut values = found.into_iter();
    match (values.next(), values.next()) {
        (Some(first), Some(second)) => (Some(first), Some(second)),
        (Some(only), None) if moving && original.is_some_and(|o| o != only) => (None, Some(only)),
        (Some(only), None) => (Some(only), None),
        _ => (None, None),
    }
}

#[async_trait]
impl SlotExtractor for KeywordSlotExtractor {
    async fn extract(
        &self,
        messages: &[Message],
        current: &Slots,
    ) -> Result<Slots, CollaboratorError> {
        let Some(latest) = latest_patient_text(messages) else {
            return Ok(Slots::default());
        };
        let text = normalize_text(latest);
        // A details-only answer to a reschedule question carries no cue of
        // its own, so the conversation decides.
        let moving = RESCHEDULE_CUES.iter().any(|cue| text.contains(cue))
            || KeywordIntentClassifier::classify_messages(messages).intent
                == Intent::Reschedule.as_tag();

        let (date, new_date) =
            split_original_new(self.find_dates(&text), moving, current.date.as_deref());
        let (time, new_time) =
            split_original_new(Self::find_times(&text), moving, current.time.as_deref());

        Ok(Slots {
            doctor: self.find_doctor(&text),
            specialization: self.find_specialization(&text),
            date,
            time,
            new_date,
            new_time,
            appointment_reference: REFERENCE_RE
                .captures(latest)
                .map(|caps| caps[1].to_uppercase()),
        })
    }
}

// ============================================================================
// Intent Classification
// ============================================================================

/// Keyword rules, checked in order. Reschedule and cancel come first so that
/// "reschedule my appointment" is not read as a booking, and questions about
/// existing appointments come before the bare "appointment" booking cue.
const INTENT_RULES: &[(Intent, &[&str])] = &[
    (Intent::Reschedule, &["reschedule", "move my", "change my", "postpone"]),
    (Intent::Cancel, &["cancel", "call off", "remove my", "delete my"]),
    (
        Intent::GeneralInfo,
        &[
            "my appointments",
            "my bookings",
            "appointments do i have",
            "when is my appointment",
            "show my appointment",
            "list my appointment",
            "upcoming appointment",
        ],
    ),
    (
        Intent::CheckAvailability,
        &["available", "availability", "free", "open slot", "openings"],
    ),
    (
        Intent::Book,
        &["book", "schedule", "appointment", "see a doctor", "reserve"],
    ),
];

/// Rule-based intent classifier.
#[derive(Debug, Clone, Default)]
pub struct KeywordIntentClassifier;

impl KeywordIntentClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Classify one piece of text, returning the intent and the keyword that
    /// matched.
    pub fn match_text(text: &str) -> Option<(Intent, &'static str)> {
        let text = normalize_text(text);
        INTENT_RULES.iter().find_map(|(intent, cues)| {
            cues.iter()
                .find(|cue| text.contains(*cue))
                .map(|cue| (*intent, *cue))
        })
    }

    /// Classify a conversation without the async wrapper.
    pub fn classify_messages(messages: &[Message]) -> Classification {
        let mut patient_texts = messages
            .iter()
            .rev()
            .filter(|m| m.speaker == Speaker::Patient)
            .map(|m| m.text.as_str());

        let Some(latest) = patient_texts.next() else {
            return Classification::new(Intent::GeneralInfo.as_tag(), "no patient message");
        };

        if let Some((intent, cue)) = Self::match_text(latest) {
            return Classification::new(intent.as_tag(), format!("keyword '{cue}' matched"));
        }

        // A bare detail ("dr smith at 10:00") continues the previous request.
        if carries_details(latest)
            && let Some((intent, _)) = patient_texts.find_map(Self::match_text)
        {
            return Classification::new(
                intent.as_tag(),
                format!("details only; continuing earlier {} request", intent),
            );
        }

        Classification::new(Intent::GeneralInfo.as_tag(), "no keyword matched")
    }
}

fn carries_details(text: &str) -> bool {
    let lowered = normalize_text(text);
    DATE_RE.is_match(&lowered)
        || TIME_RE.is_match(&lowered)
        || REFERENCE_RE.is_match(&lowered)
        || DOCTOR_TITLE_RE.is_match(&lowered)
        || contains_word(&lowered, "today")
        || contains_word(&lowered, "tomorrow")
}

#[async_trait]
impl IntentClassifier for KeywordIntentClassifier {
    async fn classify(
        &self,
        messages: &[Message],
        _slots: &Slots,
    ) -> Result<Classification, CollaboratorError> {
        Ok(Self::classify_messages(messages))
    }
}
