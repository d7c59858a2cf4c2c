//! Deterministic, pattern-based extraction.
//!
//! Near-zero cost and precise for clearly keyworded text. It abstains
//! (returns `None`) rather than guessing when no keyword family matches;
//! ambiguous text is left for the language model.

use chrono::{Local, NaiveDateTime};
use regex::Regex;
use tracing::debug;

use crate::extract::dates;
use crate::extract::model::{CandidateEvent, EventKind, ExtractionSource};

const ASSIGNMENT_KEYWORDS: &[&str] = &[
    "assignment",
    "homework",
    "hw",
    "project",
    "essay",
    "paper",
    "due",
    "submit",
    r"hand\s+in",
];

const EXAM_KEYWORDS: &[&str] = &[
    "exam",
    "test",
    "quiz",
    "midterm",
    "final",
    "assessment",
    "evaluation",
];

const CLASS_KEYWORDS: &[&str] = &[
    "class", "lecture", "tutorial", "lab", "seminar", "workshop", "session",
];

/// Occurrence-date patterns, tried in order. The first one whose match
/// parses wins.
const DATE_PATTERNS: &[&str] = &[
    r"\b\d{1,2}[/-]\d{1,2}[/-]\d{2,4}\b",
    r"\b\d{4}[/-]\d{1,2}[/-]\d{1,2}\b",
    r"\b(?:jan|feb|mar|apr|may|jun|jul|aug|sep|sept|oct|nov|dec)[a-z]*\.?\s+\d{1,2}(?:st|nd|rd|th)?(?:,?\s+\d{4})?\b",
    r"\b\d{1,2}(?:st|nd|rd|th)?\s+(?:of\s+)?(?:jan|feb|mar|apr|may|jun|jul|aug|sep|sept|oct|nov|dec)[a-z]*(?:,?\s+\d{4})?\b",
    r"\b(?:next|this)\s+(?:mon|tues|wednes|thurs|fri|satur|sun)day\b",
    r"\b(?:mon|tues|wednes|thurs|fri|satur|sun)day\b",
    r"\btomorrow\b",
    r"\b(?:today|tonight)\b",
];

const MIN_TEXT_LENGTH: usize = 10;
const MIN_CONFIDENCE: f32 = 0.3;
const TITLE_FALLBACK_CHARS: usize = 50;
const DESCRIPTION_CHARS: usize = 200;

/// Keyword-family regex plus the kind it implies.
struct Family {
    kind: EventKind,
    regex: Regex,
}

/// Rule-based extractor with a confidence score.
pub struct PatternExtractor {
    families: Vec<Family>,
    date_patterns: Vec<Regex>,
    due_marker: Regex,
}

impl PatternExtractor {
    pub fn new() -> Self {
        let family = |kind, words: &[&str]| Family {
            kind,
            regex: Regex::new(&format!(r"(?i)\b(?:{})\b", words.join("|"))).unwrap(),
        };
        // Priority order: assignment, exam, class.
        let families = vec![
            family(EventKind::Assignment, ASSIGNMENT_KEYWORDS),
            family(EventKind::Exam, EXAM_KEYWORDS),
            family(EventKind::Class, CLASS_KEYWORDS),
        ];
        let date_patterns = DATE_PATTERNS
            .iter()
            .map(|p| Regex::new(&format!("(?i){p}")).unwrap())
            .collect();
        let due_marker = Regex::new(r"(?i)\bdue\s*(?:on|by|:)?\s*([^\n,]+)").unwrap();

        Self {
            families,
            date_patterns,
            due_marker,
        }
    }

    /// Extract relative to the local wall clock.
    pub fn extract(&self, text: &str) -> Option<CandidateEvent> {
        self.extract_at(text, Local::now().naive_local())
    }

    /// Extract with an explicit reference time.
    pub fn extract_at(&self, text: &str, now: NaiveDateTime) -> Option<CandidateEvent> {
        let text = text.trim();
        if text.chars().count() < MIN_TEXT_LENGTH {
            return None;
        }

        let family = self.families.iter().find(|f| f.regex.is_match(text))?;
        let kind = family.kind;

        let occurs_at = self.occurrence_date(text, now);
        let due_at = if kind == EventKind::Assignment {
            self.due_date(text, now).or(occurs_at)
        } else {
            None
        };

        let mut confidence = 0.5;
        if occurs_at.is_some() {
            confidence += 0.3;
        }
        if due_at.is_some() {
            confidence += 0.2;
        }
        if dates::has_time_of_day(text) {
            confidence += 0.1;
        }
        if family.regex.find_iter(text).count() > 1 {
            confidence += 0.1;
        }
        let confidence: f32 = f32::min(confidence, 1.0);

        if confidence < MIN_CONFIDENCE {
            debug!(confidence, "Pattern extraction below threshold");
            return None;
        }

        let candidate = CandidateEvent::new(
            title_for(text, kind),
            kind,
            confidence,
            text,
            ExtractionSource::Pattern,
        )
        .with_occurs_at(occurs_at)
        .with_due_at(due_at)
        .with_description(Some(text.chars().take(DESCRIPTION_CHARS).collect()));

        debug!(
            kind = %kind,
            confidence = candidate.confidence(),
            has_date = candidate.has_date(),
            "Pattern extraction produced candidate"
        );
        Some(candidate)
    }

    fn occurrence_date(&self, text: &str, now: NaiveDateTime) -> Option<NaiveDateTime> {
        for pattern in &self.date_patterns {
            if let Some(m) = pattern.find(text)
                && let Some(parsed) = dates::parse_with_time_hint(m.as_str(), text, now)
            {
                return Some(parsed);
            }
        }
        dates::parse_datetime(text, now)
    }

    fn due_date(&self, text: &str, now: NaiveDateTime) -> Option<NaiveDateTime> {
        let caps = self.due_marker.captures(text)?;
        let expr = caps.get(1)?.as_str().trim();
        dates::parse_with_time_hint(expr, text, now)
    }
}

impl Default for PatternExtractor {
    fn default() -> Self {
        Self::new()
    }
}

/// First sentence if it is a plausible title, else `"<Kind> - <prefix>"`.
fn title_for(text: &str, kind: EventKind) -> String {
    let first = text.split('.').next().unwrap_or("").trim();
    let len = first.chars().count();
    if len > 5 && len < 100 {
        return first.to_string();
    }
    let prefix: String = text.chars().take(TITLE_FALLBACK_CHARS).collect();
    format!("{} - {}", kind.title_case(), prefix)
}
