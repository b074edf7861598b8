use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of an entry in the monitor event log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Up,
    Down,
    MaintenanceStart,
    MaintenanceEnd,
    TlsExpiring,
    TaskCreated,
    TlsIncidentOpen,
    TlsIncidentClose,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Up => "up",
            EventKind::Down => "down",
            EventKind::MaintenanceStart => "maintenance_start",
            EventKind::MaintenanceEnd => "maintenance_end",
            EventKind::TlsExpiring => "tls_expiring",
            EventKind::TaskCreated => "task_created",
            EventKind::TlsIncidentOpen => "tls_incident_open",
            EventKind::TlsIncidentClose => "tls_incident_close",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Some(match raw {
            "up" => EventKind::Up,
            "down" => EventKind::Down,
            "maintenance_start" => EventKind::MaintenanceStart,
            "maintenance_end" => EventKind::MaintenanceEnd,
            "tls_expiring" => EventKind::TlsExpiring,
            "task_created" => EventKind::TaskCreated,
            "tls_incident_open" => EventKind::TlsIncidentOpen,
            "tls_incident_close" => EventKind::TlsIncidentClose,
            _ => return None,
        })
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append-only audit entry for a monitor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorEvent {
    pub id: Option<i64>,
    pub monitor_id: Uuid,
    pub kind: EventKind,
    pub message: String,
    /// Identifier of a related ticket or incident
    pub reference: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl MonitorEvent {
    pub fn new(monitor_id: Uuid, kind: EventKind, message: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self { id: None, monitor_id, kind, message: message.into(), reference: None, created_at: at }
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }
}
