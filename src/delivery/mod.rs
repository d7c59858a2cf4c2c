//! Downstream delivery: calendar and task targets behind a circuit
//! breaker, bounded retry, and a dead-letter sink.

pub mod breaker;
pub mod calendar;
mod google;
pub mod pipeline;
pub mod retry;
pub mod tasks;

pub use breaker::{BreakerSnapshot, CircuitBreaker, CircuitState};
pub use calendar::{CalendarEventBody, CalendarService, CalendarTarget, GoogleCalendarClient};
pub use pipeline::{DeliveryOutcome, DeliveryPipeline, DeliveryTarget, RemoteItem, UnconfiguredTarget};
pub use retry::RetryPolicy;
pub use tasks::{GoogleTasksClient, TaskBody, TaskService, TaskTarget};
