//! Input validation and sanitisation for raw chat text.
//!
//! Validation rejects; sanitisation repairs. The orchestrator runs
//! `validate` first and only sanitises text that passed.

use regex::Regex;

use crate::error::SafetyError;

/// Statement-shaped SQL and markup-script patterns. Bare keywords such as
/// "update" or "select" are normal in chat and are not matched on their own.
const BLOCKED_PATTERNS: &[(&str, &str)] = &[
    ("sql select", r"(?i)\bselect\s+(?:\*|\w+(?:\s*,\s*\w+)*)\s+from\b"),
    ("sql insert", r"(?i)\binsert\s+into\b"),
    ("sql update", r"(?i)\bupdate\s+\w+\s+set\b"),
    ("sql delete", r"(?i)\bdelete\s+from\b"),
    ("sql drop", r"(?i)\bdrop\s+(?:table|database|index|view)\b"),
    ("sql alter", r"(?i)\balter\s+table\b"),
    ("sql exec", r"(?i)\bexec(?:ute)?\s*\("),
    ("sql comment", r";\s*--|/\*[\s\S]*?\*/"),
    ("sql tautology", r#"(?i)['"]\s*(?:or|and)\s+['"]?\d+['"]?\s*=\s*['"]?\d+"#),
    ("script tag", r"(?i)<\s*script\b"),
    ("javascript url", r"(?i)javascript\s*:"),
    ("inline handler", r"(?i)<[^>]*\bon[a-z]+\s*="),
];

/// Text with more control characters than this fraction is rejected.
const MAX_CONTROL_RATIO: f64 = 0.25;

pub struct InputValidator {
    max_length: usize,
    blocked: Vec<(&'static str, Regex)>,
}

impl InputValidator {
    pub fn new(max_length: usize) -> Self {
        let blocked = BLOCKED_PATTERNS
            .iter()
            .map(|(name, pattern)| (*name, Regex::new(pattern).unwrap()))
            .collect();
        Self {
            max_length,
            blocked,
        }
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }

    /// Reject empty, oversized, dangerous, or control-character-laden text.
    pub fn validate(&self, text: &str) -> Result<(), SafetyError> {
        if text.trim().is_empty() {
            return Err(SafetyError::Empty);
        }

        let length = text.chars().count();
        if length > self.max_length {
            return Err(SafetyError::TooLong {
                length,
                max: self.max_length,
            });
        }

        if let Some((name, _)) = self.blocked.iter().find(|(_, re)| re.is_match(text)) {
            return Err(SafetyError::BlockedContent {
                pattern: (*name).to_string(),
            });
        }

        let count = text
            .chars()
            .filter(|c| c.is_control() && !matches!(c, '\n' | '\r' | '\t'))
            .count();
        if count as f64 > length as f64 * MAX_CONTROL_RATIO {
            return Err(SafetyError::ControlCharacters { count, length });
        }

        Ok(())
    }

    /// Drop NUL and control characters (keeping `\n` and `\t`), cap the
    /// length, and trim.
    pub fn sanitize(&self, text: &str) -> String {
        let cleaned: String = text
            .chars()
            .filter(|c| !c.is_control() || matches!(c, '\n' | '\t'))
            .take(self.max_length)
            .collect();
        cleaned.trim().to_string()
    }
}

impl Default for InputValidator {
    fn default() -> Self {
        Self::new(crate::config::FilterConfig::default().max_message_length)
    }
}
