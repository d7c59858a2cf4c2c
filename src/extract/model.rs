//! Candidate events: the unit passed between extractors and arbitration.

use std::fmt;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Kind of school event. Closed set; unknown labels become `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Assignment,
    Exam,
    Class,
    Meeting,
    Other,
}

impl EventKind {
    /// Normalise an external label (LLM output, stored strings).
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "assignment" => Self::Assignment,
            "exam" => Self::Exam,
            "class" => Self::Class,
            "meeting" => Self::Meeting,
            _ => Self::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Assignment => "assignment",
            Self::Exam => "exam",
            Self::Class => "class",
            Self::Meeting => "meeting",
            Self::Other => "other",
        }
    }

    /// Capitalised label used in synthesized titles.
    pub fn title_case(&self) -> &'static str {
        match self {
            Self::Assignment => "Assignment",
            Self::Exam => "Exam",
            Self::Class => "Class",
            Self::Meeting => "Meeting",
            Self::Other => "Other",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which extractor produced a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionSource {
    Pattern,
    Llm,
}

impl ExtractionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pattern => "pattern",
            Self::Llm => "llm",
        }
    }
}

/// A tentative event extracted from a message, before delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateEvent {
    pub title: String,
    pub kind: EventKind,
    pub occurs_at: Option<NaiveDateTime>,
    pub due_at: Option<NaiveDateTime>,
    pub description: Option<String>,
    pub location: Option<String>,
    confidence: f32,
    pub source_text: String,
    pub source: ExtractionSource,
}

impl CandidateEvent {
    pub fn new(
        title: impl Into<String>,
        kind: EventKind,
        confidence: f32,
        source_text: impl Into<String>,
        source: ExtractionSource,
    ) -> Self {
        Self {
            title: title.into(),
            kind,
            occurs_at: None,
            due_at: None,
            description: None,
            location: None,
            confidence: clamp_confidence(confidence),
            source_text: source_text.into(),
            source,
        }
    }

    pub fn with_occurs_at(mut self, at: Option<NaiveDateTime>) -> Self {
        self.occurs_at = at;
        self
    }

    pub fn with_due_at(mut self, at: Option<NaiveDateTime>) -> Self {
        self.due_at = at;
        self
    }

    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.description = description;
        self
    }

    pub fn with_location(mut self, location: Option<String>) -> Self {
        self.location = location;
        self
    }

    /// Always within `[0.0, 1.0]`.
    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    pub fn set_confidence(&mut self, confidence: f32) {
        self.confidence = clamp_confidence(confidence);
    }

    /// The time the event should be filed under: deadline first, then occurrence.
    pub fn event_time(&self) -> Option<NaiveDateTime> {
        self.due_at.or(self.occurs_at)
    }

    pub fn has_date(&self) -> bool {
        self.event_time().is_some()
    }
}

/// Clamp to `[0, 1]`; NaN becomes 0.
pub fn clamp_confidence(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}
