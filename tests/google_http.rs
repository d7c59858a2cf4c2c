//! Google REST clients against a local Axum stand-in.
//!
//! Each test spins up a server on a random port that records what it
//! received and answers like the real API.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::get;
use axum::{Json, Router};
use chrono::NaiveDate;
use secrecy::SecretString;
use serde_json::{Value, json};
use tokio::net::TcpListener;

use class_scribe::delivery::{
    CalendarEventBody, CalendarService, GoogleCalendarClient, GoogleTasksClient, TaskBody,
    TaskService,
};
use class_scribe::error::DeliveryError;
use class_scribe::extract::{CandidateEvent, EventKind, ExtractionSource};

const TOKEN: &str = "test-token";

#[derive(Default)]
struct Seen {
    auth: Mutex<Vec<String>>,
    paths: Mutex<Vec<String>>,
    bodies: Mutex<Vec<Value>>,
    queries: Mutex<Vec<HashMap<String, String>>>,
}

type Shared = Arc<Seen>;

fn note(seen: &Seen, headers: &HeaderMap, path: String) {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    seen.auth.lock().unwrap().push(auth);
    seen.paths.lock().unwrap().push(path);
}

async fn insert_event(
    State(seen): State<Shared>,
    Path(calendar): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    note(&seen, &headers, calendar.clone());
    seen.bodies.lock().unwrap().push(body);
    match calendar.as_str() {
        "broken" => (StatusCode::SERVICE_UNAVAILABLE, Json(json!({"error": "backend down"}))),
        "strict" => (StatusCode::BAD_REQUEST, Json(json!({"error": "bad summary"}))),
        "noid" => (StatusCode::OK, Json(json!({"status": "confirmed"}))),
        _ => (StatusCode::OK, Json(json!({"id": "evt-42"}))),
    }
}

async fn list_events(
    State(seen): State<Shared>,
    Path(calendar): Path<String>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Json<Value> {
    note(&seen, &headers, calendar);
    seen.queries.lock().unwrap().push(query);
    Json(json!({
        "items": [
            {"id": "a", "summary": "History exam"},
            {"id": "b"}
        ]
    }))
}

async fn insert_task(
    State(seen): State<Shared>,
    Path(list): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Json<Value> {
    note(&seen, &headers, list);
    seen.bodies.lock().unwrap().push(body);
    Json(json!({"id": "task-9"}))
}

async fn list_tasks(
    State(seen): State<Shared>,
    Path(list): Path<String>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Json<Value> {
    note(&seen, &headers, list);
    seen.queries.lock().unwrap().push(query);
    Json(json!({
        "items": [
            {"id": "t1", "title": "Essay draft", "due": "2025-03-17T00:00:00.000Z"},
            {"id": "t2", "title": "Reading"}
        ]
    }))
}

/// Start the stand-in on a random port, return (base url, recorder).
async fn start_server() -> (String, Shared) {
    let seen: Shared = Arc::default();
    let app = Router::new()
        .route("/calendars/{calendar}/events", get(list_events).post(insert_event))
        .route("/lists/{list}/tasks", get(list_tasks).post(insert_task))
        .with_state(seen.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://127.0.0.1:{port}"), seen)
}

fn calendar(base: &str, id: &str) -> GoogleCalendarClient {
    GoogleCalendarClient::with_base_url(
        base,
        SecretString::from(TOKEN),
        id,
        Duration::from_secs(5),
    )
}

fn tasks(base: &str) -> GoogleTasksClient {
    GoogleTasksClient::with_base_url(
        base,
        SecretString::from(TOKEN),
        "@default",
        Duration::from_secs(5),
    )
}

fn exam() -> CandidateEvent {
    CandidateEvent::new(
        "History exam",
        EventKind::Exam,
        0.9,
        "History exam on Friday at 2pm in room 4",
        ExtractionSource::Pattern,
    )
    .with_location(Some("Room 4".into()))
}

fn friday_at_two() -> chrono::NaiveDateTime {
    NaiveDate::from_ymd_opt(2025, 3, 14)
        .unwrap()
        .and_hms_opt(14, 0, 0)
        .unwrap()
}

// ── Calendar ────────────────────────────────────────────────────────

#[tokio::test]
async fn insert_event_sends_bearer_token_and_body() {
    let (base, seen) = start_server().await;
    let body = CalendarEventBody::from_candidate(&exam(), friday_at_two(), "Europe/London");

    let id = calendar(&base, "primary").create_event(&body).await.unwrap();

    assert_eq!(id, "evt-42");
    assert_eq!(seen.auth.lock().unwrap()[0], format!("Bearer {TOKEN}"));
    let sent = seen.bodies.lock().unwrap()[0].clone();
    assert_eq!(sent["summary"], "History exam");
    assert_eq!(sent["start"]["dateTime"], "2025-03-14T14:00:00");
    assert_eq!(sent["start"]["timeZone"], "Europe/London");
    assert_eq!(sent["location"], "Room 4");
    assert_eq!(sent["reminders"]["useDefault"], false);
}

#[tokio::test]
async fn calendar_id_is_path_encoded() {
    let (base, seen) = start_server().await;
    let body = CalendarEventBody::from_candidate(&exam(), friday_at_two(), "UTC");

    calendar(&base, "class schedule").create_event(&body).await.unwrap();

    assert_eq!(seen.paths.lock().unwrap()[0], "class schedule");
}

#[tokio::test]
async fn list_events_sends_window_and_reads_items() {
    let (base, seen) = start_server().await;
    let day = NaiveDate::from_ymd_opt(2025, 3, 14).unwrap();

    let items = calendar(&base, "primary")
        .list_events(
            day.and_hms_opt(0, 0, 0).unwrap(),
            day.and_hms_opt(23, 59, 59).unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(items.len(), 2);
    assert_eq!(items[0].title, "History exam");
    assert_eq!(items[1].title, "");

    let query = seen.queries.lock().unwrap()[0].clone();
    assert_eq!(query["timeMin"], "2025-03-14T00:00:00Z");
    assert_eq!(query["timeMax"], "2025-03-14T23:59:59Z");
    assert_eq!(query["singleEvents"], "true");
    assert_eq!(query["orderBy"], "startTime");
}

#[tokio::test]
async fn server_error_is_transient() {
    let (base, _seen) = start_server().await;
    let body = CalendarEventBody::from_candidate(&exam(), friday_at_two(), "UTC");

    let err = calendar(&base, "broken").create_event(&body).await.unwrap_err();

    match &err {
        DeliveryError::Http { status, body, .. } => {
            assert_eq!(*status, 503);
            assert!(body.contains("backend down"));
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert!(err.is_transient());
}

#[tokio::test]
async fn bad_request_is_not_transient() {
    let (base, _seen) = start_server().await;
    let body = CalendarEventBody::from_candidate(&exam(), friday_at_two(), "UTC");

    let err = calendar(&base, "strict").create_event(&body).await.unwrap_err();

    assert!(matches!(err, DeliveryError::Http { status: 400, .. }));
    assert!(!err.is_transient());
}

#[tokio::test]
async fn response_without_id_is_malformed() {
    let (base, _seen) = start_server().await;
    let body = CalendarEventBody::from_candidate(&exam(), friday_at_two(), "UTC");

    let err = calendar(&base, "noid").create_event(&body).await.unwrap_err();

    assert!(matches!(err, DeliveryError::MalformedResponse { .. }));
}

#[tokio::test]
async fn unreachable_server_is_a_connection_error() {
    // Bind then drop to get a port nobody listens on.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let body = CalendarEventBody::from_candidate(&exam(), friday_at_two(), "UTC");
    let err = calendar(&format!("http://127.0.0.1:{port}"), "primary")
        .create_event(&body)
        .await
        .unwrap_err();

    assert!(matches!(err, DeliveryError::Connection { .. }));
    assert!(err.is_transient());
}

// ── Tasks ───────────────────────────────────────────────────────────

#[tokio::test]
async fn insert_task_posts_to_default_list() {
    let (base, seen) = start_server().await;
    let assignment = CandidateEvent::new(
        "Essay draft",
        EventKind::Assignment,
        0.9,
        "Essay draft due Monday",
        ExtractionSource::Pattern,
    );
    let due = NaiveDate::from_ymd_opt(2025, 3, 17)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap();

    let id = tasks(&base)
        .create_task(&TaskBody::from_candidate(&assignment, due))
        .await
        .unwrap();

    assert_eq!(id, "task-9");
    assert_eq!(seen.paths.lock().unwrap()[0], "@default");
    let sent = seen.bodies.lock().unwrap()[0].clone();
    assert_eq!(sent["title"], "Essay draft");
    assert_eq!(sent["due"], "2025-03-17T00:00:00.000Z");
    assert_eq!(sent["status"], "needsAction");
}

#[tokio::test]
async fn open_tasks_carry_due_dates() {
    let (base, seen) = start_server().await;

    let items = tasks(&base).list_open_tasks().await.unwrap();

    assert_eq!(items.len(), 2);
    assert_eq!(items[0].due, NaiveDate::from_ymd_opt(2025, 3, 17));
    assert_eq!(items[1].due, None);
    assert_eq!(seen.queries.lock().unwrap()[0]["showCompleted"], "false");
}
