//! Class Scribe: turns school chat messages into calendar events and tasks.

pub mod cache;
pub mod channels;
pub mod clock;
pub mod config;
pub mod delivery;
pub mod error;
pub mod extract;
pub mod health;
pub mod llm;
pub mod metrics;
pub mod pipeline;
pub mod ratelimit;
pub mod safety;
pub mod store;
