//! Uppe monitoring engine.
//!
//! Schedules probes for a fleet of monitors, turns results into durable state,
//! statistics and events, and reacts to transitions with tickets, incidents and
//! deduplicated notifications.

pub mod clock;
pub mod config;
pub mod crypto;
pub mod database;
pub mod error;
pub mod models;
pub mod monitoring;
pub mod notifications;
pub mod orchestrator;
pub mod pool;

pub use error::{CheckNowError, IncidentError};
pub use orchestrator::{Engine, EngineBuilder};
