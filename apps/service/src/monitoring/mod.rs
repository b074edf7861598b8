/// Monitoring module - probing and probe admission
///
/// This module is responsible for:
/// - Executing HTTP/keyword/TCP/DNS checks
/// - Classifying probe failures
/// - Admission control (per-monitor exclusivity and the concurrency ceiling)
pub mod checker;
pub mod executor;
pub mod scheduler;

pub use executor::{MonitoringExecutor, Prober};
pub use scheduler::{ConcurrencyController, Housekeeping, ProbeSlot, Rejection};
