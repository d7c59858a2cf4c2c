//! End-to-end message handling against in-memory storage and fake
//! Google services.

mod common;

use std::sync::Arc;

use chrono::{Datelike, Timelike, Weekday};

use class_scribe::delivery::{CircuitState, DeliveryOutcome};
use class_scribe::extract::{EventKind, ExtractionSource};
use class_scribe::llm::LanguageModel;
use class_scribe::pipeline::{HandleOutcome, IncomingMessage, ProcessedEvent};
use class_scribe::store::{Database, MessageKey};

use common::{CountingModel, FakeCalendar, harness};

fn processed(outcome: HandleOutcome) -> ProcessedEvent {
    match outcome {
        HandleOutcome::Processed(event) => event,
        other => panic!("expected a processed message, got {}", other.label()),
    }
}

// ── Scenarios ───────────────────────────────────────────────────────

#[tokio::test]
async fn assignment_creates_event_and_task() {
    let h = harness(FakeCalendar::default(), None).await;
    let msg = IncomingMessage::new(1, 100, Some(7), "Math assignment due next Monday");

    let event = processed(h.orchestrator.handle(&msg).await.unwrap());

    assert_eq!(event.candidate.kind, EventKind::Assignment);
    let occurs = event.candidate.occurs_at.expect("date");
    assert_eq!(occurs.weekday(), Weekday::Mon);
    assert_eq!(event.calendar_event_id(), Some("evt-1"));
    assert_eq!(event.task_id(), Some("task-1"));

    let confirmation = event.confirmation.expect("confirmation").to_string();
    assert!(confirmation.contains("Type: Assignment"));
    assert!(confirmation.contains("Calendar event created"));
    assert!(confirmation.contains("Task created"));

    // Midnight means an all-day event.
    let created = h.calendar.created();
    assert_eq!(created.len(), 1);
    assert!(created[0].start.date.is_some());
    assert!(created[0].start.date_time.is_none());
    assert_eq!(h.tasks.creates(), 1);

    let record = h.db.get_processed(msg.key()).await.unwrap().unwrap();
    assert!(record.extraction_success);
    assert_eq!(record.event_id.as_deref(), Some("evt-1"));
    assert_eq!(record.task_id.as_deref(), Some("task-1"));
    assert_eq!(h.db.deliveries_for(msg.key()).await.unwrap().len(), 2);
}

#[tokio::test]
async fn assignment_due_time_is_kept() {
    let h = harness(FakeCalendar::default(), None).await;
    let msg = IncomingMessage::new(9, 100, Some(7), "Math assignment due next Monday at 11:59 PM");

    let event = processed(h.orchestrator.handle(&msg).await.unwrap());

    assert_eq!(event.candidate.kind, EventKind::Assignment);
    assert!(event.candidate.confidence() >= 0.3);
    let due = event.candidate.due_at.expect("due date");
    assert_eq!(due.weekday(), Weekday::Mon);
    assert_eq!((due.hour(), due.minute()), (23, 59));

    let tasks = h.tasks.created();
    assert_eq!(tasks.len(), 1);
    assert!(tasks[0].due.ends_with("T23:59:00.000Z"));
}

#[tokio::test]
async fn greeting_is_filtered_without_delivery() {
    let h = harness(FakeCalendar::default(), None).await;
    let msg = IncomingMessage::new(2, 100, Some(7), "Hello, how are you?");

    let outcome = h.orchestrator.handle(&msg).await.unwrap();

    assert!(matches!(outcome, HandleOutcome::Filtered));
    assert!(outcome.confirmation().is_none());
    assert_eq!(h.calendar.creates(), 0);
    assert_eq!(h.tasks.creates(), 0);

    let record = h.db.get_processed(msg.key()).await.unwrap().unwrap();
    assert!(!record.extraction_success);
}

#[tokio::test]
async fn exam_gets_timed_event_and_no_task() {
    let h = harness(FakeCalendar::default(), None).await;
    let msg = IncomingMessage::new(3, 100, Some(7), "History exam on Friday at 2pm");

    let event = processed(h.orchestrator.handle(&msg).await.unwrap());

    assert_eq!(event.candidate.kind, EventKind::Exam);
    let occurs = event.candidate.occurs_at.expect("date");
    assert_eq!(occurs.weekday(), Weekday::Fri);
    assert_eq!(occurs.hour(), 14);
    assert!(event.task.is_none());
    assert_eq!(h.tasks.creates(), 0);

    let created = h.calendar.created();
    assert_eq!(created.len(), 1);
    assert!(created[0].start.date_time.is_some());
    assert_eq!(created[0].start.time_zone.as_deref(), Some("UTC"));

    let confirmation = event.confirmation.expect("confirmation").to_string();
    assert!(!confirmation.contains("Task created"));
}

#[tokio::test]
async fn injection_attempt_is_rejected_and_not_recorded() {
    let h = harness(FakeCalendar::default(), None).await;
    let msg = IncomingMessage::new(4, 100, Some(7), "homework'; DROP TABLE users; --");

    let outcome = h.orchestrator.handle(&msg).await.unwrap();

    assert!(matches!(outcome, HandleOutcome::Invalid { .. }));
    assert!(h.db.get_processed(msg.key()).await.unwrap().is_none());
}

#[tokio::test]
async fn same_title_on_same_day_is_a_duplicate() {
    let h = harness(FakeCalendar::default(), None).await;
    let first = IncomingMessage::new(5, 100, Some(7), "History exam on Friday at 2pm");
    let second = IncomingMessage::new(6, 101, Some(8), "History exam on Friday at 2pm");

    processed(h.orchestrator.handle(&first).await.unwrap());
    let event = processed(h.orchestrator.handle(&second).await.unwrap());

    assert_eq!(event.calendar, Some(DeliveryOutcome::Duplicate));
    assert_eq!(h.calendar.creates(), 1);
}

// ── Idempotency ─────────────────────────────────────────────────────

#[tokio::test]
async fn redelivered_message_creates_one_artifact() {
    let h = harness(FakeCalendar::default(), None).await;
    let msg = IncomingMessage::new(10, 200, Some(1), "Chemistry quiz tomorrow at 9am");

    processed(h.orchestrator.handle(&msg).await.unwrap());
    let again = h.orchestrator.handle(&msg).await.unwrap();

    assert!(matches!(again, HandleOutcome::AlreadyProcessed));
    assert_eq!(h.calendar.creates(), 1);
}

#[tokio::test]
async fn concurrent_duplicates_are_processed_once() {
    let h = harness(FakeCalendar::default(), None).await;
    let msg = IncomingMessage::new(11, 200, Some(1), "Chemistry quiz tomorrow at 9am");

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let orchestrator = Arc::clone(&h.orchestrator);
            let msg = msg.clone();
            tokio::spawn(async move { orchestrator.handle(&msg).await.unwrap() })
        })
        .collect();

    let mut processed_count = 0;
    for handle in handles {
        match handle.await.unwrap() {
            HandleOutcome::Processed(_) => processed_count += 1,
            HandleOutcome::AlreadyProcessed => {}
            other => panic!("unexpected outcome {}", other.label()),
        }
    }

    assert_eq!(processed_count, 1);
    assert_eq!(h.calendar.creates(), 1);
    assert_eq!(h.orchestrator.status().in_flight, 0);
}

// ── Circuit breaker ─────────────────────────────────────────────────

#[tokio::test]
async fn breaker_opens_after_repeated_failures() {
    let h = harness(FakeCalendar::failing(), None).await;

    for i in 0..5 {
        let msg = IncomingMessage::new(i, 300 + i, Some(i), "Physics exam on Friday at 10am");
        let event = processed(h.orchestrator.handle(&msg).await.unwrap());
        assert!(event.calendar.as_ref().unwrap().is_failed());
        assert!(event.confirmation.is_none());
    }
    // Three attempts per delivery.
    assert_eq!(h.calendar.creates(), 15);
    assert_eq!(h.orchestrator.status().calendar.state, CircuitState::Open);

    let sixth = IncomingMessage::new(5, 305, Some(5), "Physics exam on Friday at 10am");
    let event = processed(h.orchestrator.handle(&sixth).await.unwrap());
    assert!(event.calendar.as_ref().unwrap().is_failed());
    assert_eq!(h.calendar.creates(), 15, "open circuit must not call the service");

    let letters = h.orchestrator.dead_letters(None, 10).await.unwrap();
    assert_eq!(letters.len(), 6);
    let latest = &letters[0];
    assert_eq!(latest.key, sixth.key());
    assert_eq!(latest.metadata["operation"], "create_calendar_event");
    assert_eq!(latest.metadata["attempts"], 0);
    assert!(latest.error.contains("open"));
}

#[tokio::test]
async fn failed_delivery_still_marks_message_processed() {
    let h = harness(FakeCalendar::failing(), None).await;
    let msg = IncomingMessage::new(1, 400, Some(1), "Biology lab on Friday at 1pm");

    processed(h.orchestrator.handle(&msg).await.unwrap());

    let record = h.db.get_processed(msg.key()).await.unwrap().unwrap();
    assert!(record.extraction_success);
    assert!(record.event_id.is_none());
    assert_eq!(h.db.count_dead_letters().await.unwrap(), 1);
    assert!(matches!(
        h.orchestrator.handle(&msg).await.unwrap(),
        HandleOutcome::AlreadyProcessed
    ));
}

// ── Rate limiting ───────────────────────────────────────────────────

#[tokio::test]
async fn eleventh_message_in_a_minute_is_rejected() {
    let h = harness(FakeCalendar::default(), None).await;

    for i in 0..10 {
        let msg = IncomingMessage::new(i, 500, Some(1), "see you all later friends");
        let outcome = h.orchestrator.handle(&msg).await.unwrap();
        assert!(!matches!(outcome, HandleOutcome::RateLimited { .. }), "message {i}");
    }

    let eleventh = IncomingMessage::new(10, 500, Some(1), "see you all later friends");
    let outcome = h.orchestrator.handle(&eleventh).await.unwrap();
    assert!(matches!(outcome, HandleOutcome::RateLimited { .. }));
    assert!(h.db.get_processed(eleventh.key()).await.unwrap().is_none());

    let other_user = IncomingMessage::new(11, 500, Some(2), "see you all later friends");
    let outcome = h.orchestrator.handle(&other_user).await.unwrap();
    assert!(!matches!(outcome, HandleOutcome::RateLimited { .. }));
}

// ── Arbitration ─────────────────────────────────────────────────────

const QUIZ_ANSWER: &str =
    r#"{"title": "Chemistry quiz", "event_type": "exam", "date": null, "confidence": 0.9}"#;

#[tokio::test]
async fn confident_pattern_result_skips_the_model() {
    let model = CountingModel::replying(QUIZ_ANSWER);
    let h = harness(FakeCalendar::default(), Some(model.clone() as Arc<dyn LanguageModel>)).await;
    let msg = IncomingMessage::new(1, 600, Some(1), "Math assignment due next Monday");

    let event = processed(h.orchestrator.handle(&msg).await.unwrap());

    assert_eq!(event.candidate.source, ExtractionSource::Pattern);
    assert_eq!(model.calls(), 0);
}

#[tokio::test]
async fn weak_pattern_result_defers_to_the_model() {
    let model = CountingModel::replying(QUIZ_ANSWER);
    let h = harness(FakeCalendar::default(), Some(model.clone() as Arc<dyn LanguageModel>)).await;
    let msg = IncomingMessage::new(2, 600, Some(1), "We should talk about the quiz soon");

    let event = processed(h.orchestrator.handle(&msg).await.unwrap());

    assert_eq!(model.calls(), 1);
    assert_eq!(event.candidate.source, ExtractionSource::Llm);
    assert_eq!(event.candidate.title, "Chemistry quiz");
    // No date, so nothing to file.
    assert!(event.calendar.is_none());
    assert_eq!(h.calendar.creates(), 0);
}

#[tokio::test]
async fn without_a_model_the_pattern_result_stands() {
    let h = harness(FakeCalendar::default(), None).await;
    let msg = IncomingMessage::new(3, 600, Some(1), "We should talk about the quiz soon");

    let event = processed(h.orchestrator.handle(&msg).await.unwrap());

    assert_eq!(event.candidate.source, ExtractionSource::Pattern);
    assert_eq!(event.candidate.kind, EventKind::Exam);
}

// ── Queries ─────────────────────────────────────────────────────────

#[tokio::test]
async fn statistics_and_recent_messages() {
    let h = harness(FakeCalendar::default(), None).await;
    let texts = [
        "Math assignment due next Monday",
        "Hello, how are you?",
        "History exam on Friday at 2pm",
    ];
    for (i, text) in texts.iter().enumerate() {
        let msg = IncomingMessage::new(i as i64, 700, Some(1), *text);
        h.orchestrator.handle(&msg).await.unwrap();
    }

    let stats = h.orchestrator.statistics().await.unwrap();
    assert_eq!(stats.total_messages, 3);
    assert_eq!(stats.successful_extractions, 2);
    assert_eq!(stats.total_deliveries, 3);
    assert_eq!(stats.deliveries_by_kind.get("calendar"), Some(&2));

    let recent = h.orchestrator.recent_messages(Some(700), 2).await.unwrap();
    assert_eq!(recent.len(), 2);

    let health = h.orchestrator.health().await;
    assert!(health.is_serving());
}

#[tokio::test]
async fn dead_letters_can_be_cleared_per_message() {
    let h = harness(FakeCalendar::failing(), None).await;
    let msg = IncomingMessage::new(1, 800, Some(1), "Art class on Friday at 3pm");
    processed(h.orchestrator.handle(&msg).await.unwrap());

    assert_eq!(h.orchestrator.clear_dead_letter(MessageKey::new(1, 800)).await.unwrap(), 1);
    assert!(h.orchestrator.dead_letters(None, 10).await.unwrap().is_empty());
}
