use thiserror::Error;
use uuid::Uuid;

/// Reasons a manual check is refused or fails
#[derive(Debug, Error)]
pub enum CheckNowError {
    #[error("monitor {0} not found")]
    NotFound(Uuid),

    #[error("monitor type '{0}' is passive and cannot be checked on demand")]
    Passive(String),

    #[error("monitor is paused")]
    Paused,

    #[error("monitoring is disabled")]
    Disabled,

    #[error("a check for this monitor is already running")]
    Busy,

    #[error("check did not finish within {0} seconds")]
    DeadlineExceeded(u64),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Failures reported by an incident desk
#[derive(Debug, Error)]
pub enum IncidentError {
    /// Someone else changed the incident first
    #[error("incident was modified concurrently")]
    Conflict,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
