//! Cheap textual gate run before any extraction work.
//!
//! A message is worth extracting from if it mentions school vocabulary or
//! looks like it names a date. Everything else (greetings, chatter) is
//! dropped here without touching the extractors.

use regex::Regex;
use tracing::debug;

/// School-domain vocabulary, matched on word boundaries.
const SCHOOL_KEYWORDS: &[&str] = &[
    "assignment",
    "homework",
    "hw",
    "project",
    "exam",
    "test",
    "quiz",
    "class",
    "lecture",
    "due",
    "deadline",
    "submit",
    "midterm",
    "final",
    "lab",
    "tutorial",
    "seminar",
    "workshop",
    "course",
    "subject",
    "professor",
    "prof",
    "teacher",
    "instructor",
];

const DATE_PATTERNS: &[&str] = &[
    r"\b\d{1,2}[/-]\d{1,2}(?:[/-]\d{2,4})?\b",
    r"\b\d{4}[/-]\d{1,2}[/-]\d{1,2}\b",
    r"\b(?:mon|tues|wednes|thurs|fri|satur|sun)day\b",
    r"\btomorrow\b",
    r"\b(?:next|this)\s+(?:mon|tues|wednes|thurs|fri|satur|sun)day\b",
];

/// Shortest trimmed text `is_school_related` will look at.
const MIN_RELATED_LENGTH: usize = 5;

/// Keyword and date-pattern gate. Compile once, share freely.
pub struct ContentFilter {
    keywords: Regex,
    date_patterns: Vec<Regex>,
}

impl ContentFilter {
    pub fn new() -> Self {
        let keywords = Regex::new(&format!(r"(?i)\b(?:{})\b", SCHOOL_KEYWORDS.join("|"))).unwrap();
        let date_patterns = DATE_PATTERNS
            .iter()
            .map(|p| Regex::new(&format!("(?i){p}")).unwrap())
            .collect();
        Self {
            keywords,
            date_patterns,
        }
    }

    /// Whether a message merits extraction.
    pub fn should_process(&self, text: &str, min_length: usize) -> bool {
        let trimmed = text.trim();
        if trimmed.chars().count() < min_length {
            debug!(length = trimmed.len(), min_length, "Message below minimum length");
            return false;
        }
        self.matches(trimmed)
    }

    /// Keyword/date decision alone, for very short texts.
    pub fn is_school_related(&self, text: &str) -> bool {
        let trimmed = text.trim();
        if trimmed.chars().count() < MIN_RELATED_LENGTH {
            return false;
        }
        self.matches(trimmed)
    }

    fn matches(&self, text: &str) -> bool {
        if self.keywords.is_match(text) {
            return true;
        }
        self.date_patterns.iter().any(|re| re.is_match(text))
    }
}

impl Default for ContentFilter {
    fn default() -> Self {
        Self::new()
    }
}
