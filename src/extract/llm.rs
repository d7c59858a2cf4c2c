//! Language-model extraction for text the patterns cannot handle.
//!
//! Every failure mode here (no model configured, transport error, malformed
//! JSON, low confidence) degrades to `None`. Nothing is propagated.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, NaiveDateTime};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::cache::{CacheStats, TtlCache};
use crate::extract::dates;
use crate::extract::model::{CandidateEvent, EventKind, ExtractionSource};
use crate::llm::LanguageModel;

const MIN_TEXT_LENGTH: usize = 10;
const MIN_CONFIDENCE: f32 = 0.3;

/// Shape of the object the model is asked for. Every field is optional so
/// partial answers still deserialize.
#[derive(Debug, Default, Deserialize)]
struct ModelAnswer {
    title: Option<String>,
    event_type: Option<String>,
    date: Option<String>,
    due_date: Option<String>,
    description: Option<String>,
    location: Option<String>,
    confidence: Option<f32>,
}

/// Extractor backed by a remote language model, with a result cache.
pub struct LlmExtractor {
    model: Option<Arc<dyn LanguageModel>>,
    enabled: bool,
    cache: TtlCache<Option<CandidateEvent>>,
}

impl LlmExtractor {
    pub fn new(model: Option<Arc<dyn LanguageModel>>, enabled: bool, cache_ttl: Duration) -> Self {
        match (&model, enabled) {
            (Some(m), true) => info!(model = m.model_name(), "LLM extraction enabled"),
            (None, _) => warn!("No language model configured, LLM extraction disabled"),
            (Some(_), false) => info!("LLM extraction disabled by configuration"),
        }
        Self {
            model,
            enabled,
            cache: TtlCache::new(cache_ttl),
        }
    }

    /// Extractor that never calls out.
    pub fn disabled() -> Self {
        Self {
            model: None,
            enabled: false,
            cache: TtlCache::new(Duration::ZERO),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Whether a model is wired in and switched on.
    pub fn is_available(&self) -> bool {
        self.enabled && self.model.is_some()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub async fn extract(&self, text: &str) -> Option<CandidateEvent> {
        self.extract_at(text, Local::now().naive_local()).await
    }

    pub async fn extract_at(&self, text: &str, now: NaiveDateTime) -> Option<CandidateEvent> {
        if !self.enabled {
            return None;
        }
        let model = self.model.as_ref()?;

        let text = text.trim();
        if text.chars().count() < MIN_TEXT_LENGTH {
            return None;
        }

        // Relative dates resolve against `now`, so answers are per day.
        let cache_key = format!("{}|{text}", now.date());
        if let Some(cached) = self.cache.get(&cache_key) {
            debug!("LLM extraction served from cache");
            return cached;
        }

        let raw = match model.complete(&build_extraction_prompt(text)).await {
            Ok(raw) => raw,
            Err(e) => {
                // Not cached: the next attempt may reach the model.
                warn!(error = %e, "LLM extraction request failed");
                return None;
            }
        };

        let candidate = parse_model_answer(&raw, text, now);
        self.cache.insert(cache_key, candidate.clone());
        candidate
    }
}

/// Fixed instruction followed by the message.
pub fn build_extraction_prompt(text: &str) -> String {
    format!(
        r#"You extract school-related information from chat messages.

Extract the following if present:
- title: what the event, assignment or exam is about
- event_type: one of assignment, exam, class, meeting, other
- date: when it occurs (ISO 8601, YYYY-MM-DDTHH:MM:SS)
- due_date: when it is due, for assignments (ISO 8601)
- description: any additional details
- location: where it takes place

Respond with ONLY a JSON object, no markdown and no commentary:
{{
  "title": "string",
  "event_type": "assignment|exam|class|meeting|other",
  "date": "YYYY-MM-DDTHH:MM:SS or null",
  "due_date": "YYYY-MM-DDTHH:MM:SS or null",
  "description": "string or null",
  "location": "string or null",
  "confidence": 0.0
}}

Use null for anything that is unclear or absent. Only extract if the text is clearly school-related.

Message:
{text}"#
    )
}

/// Turn raw model output into a candidate, or `None` if it is unusable.
fn parse_model_answer(raw: &str, text: &str, now: NaiveDateTime) -> Option<CandidateEvent> {
    let json = extract_json_object(raw);
    let answer: ModelAnswer = match serde_json::from_str(&json) {
        Ok(answer) => answer,
        Err(e) => {
            warn!(error = %e, "Failed to parse LLM response as JSON");
            return None;
        }
    };

    let title = answer.title.as_deref().map(str::trim).unwrap_or_default();
    let confidence = answer.confidence.unwrap_or(0.0);
    if title.is_empty() || confidence.is_nan() || confidence < MIN_CONFIDENCE {
        debug!(confidence, has_title = !title.is_empty(), "LLM answer rejected");
        return None;
    }

    let kind = answer
        .event_type
        .as_deref()
        .map_or(EventKind::Other, EventKind::from_label);
    let parse = |value: &Option<String>| value.as_deref().and_then(|s| dates::parse_datetime(s, now));

    Some(
        CandidateEvent::new(title, kind, confidence, text, ExtractionSource::Llm)
            .with_occurs_at(parse(&answer.date))
            .with_due_at(parse(&answer.due_date))
            .with_description(non_blank(answer.description))
            .with_location(non_blank(answer.location)),
    )
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty() && v.trim() != "null")
}

/// Pull a JSON object out of a response that may be fenced or chatty.
pub fn extract_json_object(text: &str) -> String {
    let trimmed = text.trim();

    if trimmed.starts_with('{') {
        return trimmed.to_string();
    }

    if let Some(start) = trimmed.find("```json") {
        let after = &trimmed[start + 7..];
        if let Some(end) = after.find("```") {
            return after[..end].trim().to_string();
        }
    }

    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        if let Some(end) = after.find("```") {
            let inner = after[..end].trim();
            if inner.starts_with('{') {
                return inner.to_string();
            }
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}'))
        && end > start
    {
        return trimmed[start..=end].to_string();
    }

    trimmed.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LlmError;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedModel {
        reply: Result<String, ()>,
        calls: AtomicUsize,
    }

    impl ScriptedModel {
        fn replying(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Ok(reply.to_string()),
                calls: AtomicUsize::new(0),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                reply: Err(()),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl LanguageModel for ScriptedModel {
        fn model_name(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, _prompt: &str) -> Result<String, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.reply.clone().map_err(|_| LlmError::RequestFailed {
                provider: "scripted".into(),
                reason: "connection reset".into(),
            })
        }
    }

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 3, 12)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap()
    }

    fn extractor(model: Arc<ScriptedModel>) -> LlmExtractor {
        LlmExtractor::new(Some(model), true, Duration::from_secs(300))
    }

    // ── JSON extraction ────────────────────────────────────────────

    #[test]
    fn extract_json_handles_fences_and_chatter() {
        assert_eq!(extract_json_object("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(extract_json_object("```\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(extract_json_object("Sure! {\"a\":1} Hope that helps"), "{\"a\":1}");
        assert_eq!(extract_json_object("  {\"a\":1}  "), "{\"a\":1}");
    }

    // ── Answer parsing ─────────────────────────────────────────────

    #[test]
    fn parses_full_answer() {
        let raw = r#"```json
{"title": "Lab report", "event_type": "Assignment", "date": null,
 "due_date": "2025-03-20T23:59:00", "description": "Section B",
 "location": "Room 204", "confidence": 0.85}
```"#;
        let c = parse_model_answer(raw, "lab report thing by the 20th", now()).unwrap();
        assert_eq!(c.title, "Lab report");
        assert_eq!(c.kind, EventKind::Assignment);
        assert_eq!(c.occurs_at, None);
        assert_eq!(
            c.due_at,
            NaiveDate::from_ymd_opt(2025, 3, 20).unwrap().and_hms_opt(23, 59, 0)
        );
        assert_eq!(c.location.as_deref(), Some("Room 204"));
        assert_eq!(c.source, ExtractionSource::Llm);
    }

    #[test]
    fn unknown_type_becomes_other_and_bad_dates_become_none() {
        let raw = r#"{"title": "Club fair", "event_type": "festival", "date": "sometime soon", "confidence": 0.5}"#;
        let c = parse_model_answer(raw, "club fair sometime soon", now()).unwrap();
        assert_eq!(c.kind, EventKind::Other);
        assert_eq!(c.occurs_at, None);
    }

    #[test]
    fn rejects_missing_title_or_low_confidence() {
        assert!(parse_model_answer(r#"{"confidence": 0.9}"#, "x", now()).is_none());
        assert!(parse_model_answer(r#"{"title": "  ", "confidence": 0.9}"#, "x", now()).is_none());
        assert!(parse_model_answer(r#"{"title": "Quiz", "confidence": 0.2}"#, "x", now()).is_none());
        // Missing confidence counts as zero.
        assert!(parse_model_answer(r#"{"title": "Quiz"}"#, "x", now()).is_none());
        assert!(parse_model_answer("not json at all", "x", now()).is_none());
    }

    #[test]
    fn confidence_above_one_is_clamped() {
        let c = parse_model_answer(r#"{"title": "Quiz", "confidence": 3.0}"#, "x", now()).unwrap();
        assert_eq!(c.confidence(), 1.0);
    }

    // ── Extractor behaviour ────────────────────────────────────────

    #[tokio::test]
    async fn no_model_means_no_io() {
        let extractor = LlmExtractor::new(None, true, Duration::from_secs(300));
        assert!(!extractor.is_available());
        assert!(extractor.extract_at("Essay for English class", now()).await.is_none());
    }

    #[tokio::test]
    async fn disabled_flag_skips_the_model() {
        let model = ScriptedModel::replying(r#"{"title": "Quiz", "confidence": 0.9}"#);
        let extractor = LlmExtractor::new(Some(model.clone()), false, Duration::from_secs(300));
        assert!(extractor.extract_at("Essay for English class", now()).await.is_none());
        assert_eq!(model.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn short_text_skips_the_model() {
        let model = ScriptedModel::replying(r#"{"title": "Quiz", "confidence": 0.9}"#);
        let extractor = extractor(model.clone());
        assert!(extractor.extract_at("  quiz  ", now()).await.is_none());
        assert_eq!(model.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn transport_failure_is_none_and_not_cached() {
        let model = ScriptedModel::failing();
        let extractor = extractor(model.clone());
        assert!(extractor.extract_at("Essay for English class", now()).await.is_none());
        assert!(extractor.extract_at("Essay for English class", now()).await.is_none());
        assert_eq!(model.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn repeated_text_is_served_from_cache() {
        let model = ScriptedModel::replying(r#"{"title": "English essay", "event_type": "assignment", "confidence": 0.7}"#);
        let extractor = extractor(model.clone());

        let first = extractor.extract_at("Essay for English class", now()).await;
        let second = extractor.extract_at("Essay for English class", now()).await;

        assert_eq!(first, second);
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);
        assert_eq!(extractor.cache_stats().hits, 1);
    }

    #[tokio::test]
    async fn cached_answers_do_not_cross_midnight() {
        let model = ScriptedModel::replying(
            r#"{"title": "Quiz", "event_type": "exam", "date": "tomorrow", "confidence": 0.9}"#,
        );
        let extractor = extractor(model.clone());
        let next_day = now() + chrono::TimeDelta::days(1);

        let first = extractor.extract_at("Chemistry quiz tomorrow", now()).await.unwrap();
        let second = extractor.extract_at("Chemistry quiz tomorrow", next_day).await.unwrap();

        assert_eq!(model.calls.load(Ordering::SeqCst), 2);
        assert_eq!(first.occurs_at.map(|d| d.date()), NaiveDate::from_ymd_opt(2025, 3, 13));
        assert_eq!(second.occurs_at.map(|d| d.date()), NaiveDate::from_ymd_opt(2025, 3, 14));
    }
}
