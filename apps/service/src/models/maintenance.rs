use chrono::{DateTime, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// When a maintenance window is open
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MaintenanceSchedule {
    /// A single window `[starts_at, ends_at)`
    Once { starts_at: DateTime<Utc>, ends_at: DateTime<Utc> },
    /// Windows of `duration_seconds` starting at `anchor` and every `every_seconds` after it
    Interval { anchor: DateTime<Utc>, every_seconds: u64, duration_seconds: u64 },
    /// Windows starting at each cron occurrence (seconds-first cron syntax)
    Cron {
        expression: String,
        duration_seconds: u64,
        #[serde(default)]
        timezone: Option<String>,
    },
    /// Windows starting at `start` local time on the listed weekdays
    Weekly {
        days: Vec<Weekday>,
        start: NaiveTime,
        duration_seconds: u64,
        #[serde(default)]
        timezone: Option<String>,
    },
}

/// A declared suppression window
///
/// Scope is resolved in order: explicit ids, then the single monitor, then tags. A
/// window without any scope covers every monitor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorMaintenance {
    pub id: Uuid,
    pub name: String,
    pub monitor_id: Option<Uuid>,
    pub monitor_ids: Vec<Uuid>,
    pub tags: Vec<String>,
    pub schedule: MaintenanceSchedule,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}

impl MonitorMaintenance {
    pub fn new(name: impl Into<String>, schedule: MaintenanceSchedule) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            monitor_id: None,
            monitor_ids: Vec::new(),
            tags: Vec::new(),
            schedule,
            enabled: true,
            created_at: Utc::now(),
        }
    }

    pub fn for_monitor(mut self, monitor_id: Uuid) -> Self {
        self.monitor_id = Some(monitor_id);
        self
    }

    pub fn for_monitors(mut self, ids: impl IntoIterator<Item = Uuid>) -> Self {
        self.monitor_ids = ids.into_iter().collect();
        self
    }

    pub fn for_tags<S: Into<String>>(mut self, tags: impl IntoIterator<Item = S>) -> Self {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn is_global(&self) -> bool {
        self.monitor_ids.is_empty() && self.monitor_id.is_none() && self.tags.is_empty()
    }
}
