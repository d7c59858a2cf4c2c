//! Calendar delivery target and the Google Calendar REST client.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDateTime, NaiveTime, TimeDelta};
use secrecy::SecretString;
use serde::Serialize;
use serde_json::Value;

use crate::delivery::google::{GoogleApi, items};
use crate::delivery::pipeline::{DeliveryTarget, RemoteItem};
use crate::error::DeliveryError;
use crate::extract::{CandidateEvent, EventKind};
use crate::store::DeliveryKind;

const GOOGLE_CALENDAR_BASE: &str = "https://www.googleapis.com/calendar/v3";

/// Source text is quoted into descriptions up to this many characters.
pub(crate) const SOURCE_EXCERPT_CHARS: usize = 200;

/// Minimal calendar API.
#[async_trait]
pub trait CalendarService: Send + Sync {
    /// Insert an event, returning its id.
    async fn create_event(&self, body: &CalendarEventBody) -> Result<String, DeliveryError>;

    /// Events overlapping `[time_min, time_max]`.
    async fn list_events(
        &self,
        time_min: NaiveDateTime,
        time_max: NaiveDateTime,
    ) -> Result<Vec<RemoteItem>, DeliveryError>;
}

/// Event resource as the Calendar API expects it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarEventBody {
    pub summary: String,
    pub description: String,
    pub start: EventTime,
    pub end: EventTime,
    pub color_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    pub reminders: Reminders,
}

/// Either an all-day `date` or a timed `dateTime` with its zone.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventTime {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<String>,
}

impl EventTime {
    fn all_day(at: NaiveDateTime) -> Self {
        Self {
            date: Some(at.format("%Y-%m-%d").to_string()),
            date_time: None,
            time_zone: None,
        }
    }

    fn timed(at: NaiveDateTime, timezone: &str) -> Self {
        Self {
            date: None,
            date_time: Some(at.format("%Y-%m-%dT%H:%M:%S").to_string()),
            time_zone: Some(timezone.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Reminders {
    pub use_default: bool,
    pub overrides: Vec<ReminderOverride>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReminderOverride {
    pub method: String,
    pub minutes: u32,
}

impl Default for Reminders {
    fn default() -> Self {
        Self {
            use_default: false,
            overrides: vec![
                ReminderOverride {
                    method: "email".into(),
                    minutes: 24 * 60,
                },
                ReminderOverride {
                    method: "popup".into(),
                    minutes: 60,
                },
            ],
        }
    }
}

/// Calendar colour id per event kind.
pub fn color_for(kind: EventKind) -> &'static str {
    match kind {
        EventKind::Assignment => "5",
        EventKind::Exam => "11",
        EventKind::Class => "9",
        EventKind::Meeting => "10",
        EventKind::Other => "1",
    }
}

impl CalendarEventBody {
    /// Midnight means "no time given" and becomes an all-day event.
    /// Anything else is a one-hour event in `timezone`.
    pub fn from_candidate(candidate: &CandidateEvent, at: NaiveDateTime, timezone: &str) -> Self {
        let (start, end) = if at.time() == NaiveTime::MIN {
            (
                EventTime::all_day(at),
                EventTime::all_day(at + TimeDelta::days(1)),
            )
        } else {
            (
                EventTime::timed(at, timezone),
                EventTime::timed(at + TimeDelta::hours(1), timezone),
            )
        };

        Self {
            summary: candidate.title.clone(),
            description: describe(candidate),
            start,
            end,
            color_id: color_for(candidate.kind).to_string(),
            location: candidate.location.clone(),
            reminders: Reminders::default(),
        }
    }
}

fn describe(candidate: &CandidateEvent) -> String {
    let mut parts = Vec::new();
    if let Some(description) = &candidate.description {
        parts.push(description.clone());
    }
    parts.push(format!(
        "\n\nSource: {}",
        excerpt(&candidate.source_text, SOURCE_EXCERPT_CHARS)
    ));
    parts.join("\n")
}

pub(crate) fn excerpt(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

/// Files candidates as calendar events.
pub struct CalendarTarget {
    service: Arc<dyn CalendarService>,
    timezone: String,
}

impl CalendarTarget {
    pub fn new(service: Arc<dyn CalendarService>, timezone: impl Into<String>) -> Self {
        Self {
            service,
            timezone: timezone.into(),
        }
    }
}

#[async_trait]
impl DeliveryTarget for CalendarTarget {
    fn kind(&self) -> DeliveryKind {
        DeliveryKind::Calendar
    }

    fn service_name(&self) -> &str {
        "calendar"
    }

    /// Everything on the same calendar day.
    async fn existing_titles(&self, at: NaiveDateTime) -> Result<Vec<String>, DeliveryError> {
        let day = at.date();
        let time_min = day.and_time(NaiveTime::MIN);
        let time_max = day.and_hms_opt(23, 59, 59).unwrap_or(time_min);
        let events = self.service.list_events(time_min, time_max).await?;
        Ok(events.into_iter().map(|e| e.title).collect())
    }

    async fn create(
        &self,
        candidate: &CandidateEvent,
        at: NaiveDateTime,
    ) -> Result<String, DeliveryError> {
        let body = CalendarEventBody::from_candidate(candidate, at, &self.timezone);
        self.service.create_event(&body).await
    }
}

// ── Google Calendar client ──────────────────────────────────────────

/// `events.insert` / `events.list` against one calendar.
pub struct GoogleCalendarClient {
    api: GoogleApi,
    calendar_id: String,
}

impl GoogleCalendarClient {
    pub fn new(token: SecretString, calendar_id: impl Into<String>, timeout: Duration) -> Self {
        Self::with_base_url(GOOGLE_CALENDAR_BASE, token, calendar_id, timeout)
    }

    /// Point the client somewhere other than googleapis.com.
    pub fn with_base_url(
        base_url: impl Into<String>,
        token: SecretString,
        calendar_id: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            api: GoogleApi::new("calendar", base_url, token, timeout),
            calendar_id: calendar_id.into(),
        }
    }
}

#[async_trait]
impl CalendarService for GoogleCalendarClient {
    async fn create_event(&self, body: &CalendarEventBody) -> Result<String, DeliveryError> {
        let url = self.api.url(&["calendars", self.calendar_id.as_str(), "events"])?;
        let created = self.api.post(url, body).await?;
        self.api.created_id(&created)
    }

    async fn list_events(
        &self,
        time_min: NaiveDateTime,
        time_max: NaiveDateTime,
    ) -> Result<Vec<RemoteItem>, DeliveryError> {
        let url = self.api.url(&["calendars", self.calendar_id.as_str(), "events"])?;
        let query = [
            ("timeMin", time_min.format("%Y-%m-%dT%H:%M:%SZ").to_string()),
            ("timeMax", time_max.format("%Y-%m-%dT%H:%M:%SZ").to_string()),
            ("maxResults", "10".to_string()),
            ("singleEvents", "true".to_string()),
            ("orderBy", "startTime".to_string()),
        ];
        let listed = self.api.get(url, &query).await?;
        tracing::debug!(service = self.api.service(), count = items(&listed).len(), "Listed events");
        Ok(items(&listed)
            .iter()
            .filter_map(|item| {
                let id = item.get("id").and_then(Value::as_str)?;
                let title = item.get("summary").and_then(Value::as_str).unwrap_or("");
                Some(RemoteItem::new(id, title))
            })
            .collect())
    }
}
