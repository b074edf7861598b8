use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Outcome of the probe alone, ignoring pause and maintenance overlays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RawStatus {
    Up,
    Down,
}

impl RawStatus {
    pub fn from_ok(ok: bool) -> Self {
        if ok { RawStatus::Up } else { RawStatus::Down }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RawStatus::Up => "up",
            RawStatus::Down => "down",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "up" => Some(RawStatus::Up),
            "down" => Some(RawStatus::Down),
            _ => None,
        }
    }
}

/// Displayed status of a monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Up,
    Down,
    Paused,
    Maintenance,
}

impl Status {
    /// Layer the paused and maintenance overlays over the raw status
    ///
    /// Paused wins over maintenance, and both win over the probe outcome.
    pub fn derive(raw: RawStatus, paused: bool, maintenance: bool) -> Self {
        if paused {
            Status::Paused
        } else if maintenance {
            Status::Maintenance
        } else {
            match raw {
                RawStatus::Up => Status::Up,
                RawStatus::Down => Status::Down,
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Up => "up",
            Status::Down => "down",
            Status::Paused => "paused",
            Status::Maintenance => "maintenance",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "up" => Some(Status::Up),
            "down" => Some(Status::Down),
            "paused" => Some(Status::Paused),
            "maintenance" => Some(Status::Maintenance),
            _ => None,
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current state of one monitor, rewritten after every check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorState {
    pub monitor_id: Uuid,
    pub status: Status,
    pub raw_status: RawStatus,
    pub maintenance: bool,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub last_up_at: Option<DateTime<Utc>>,
    pub last_down_at: Option<DateTime<Utc>>,
    pub last_latency_ms: Option<u64>,
    pub last_status_code: Option<u16>,
    pub last_error: Option<String>,
    pub uptime_24h: f64,
    pub uptime_30d: f64,
    pub avg_latency_24h_ms: f64,
    pub tls_days_left: Option<i64>,
    pub tls_not_after: Option<DateTime<Utc>>,
}

impl MonitorState {
    /// Blank state for a monitor that has never been checked
    pub fn new(monitor_id: Uuid) -> Self {
        Self {
            monitor_id,
            status: Status::Up,
            raw_status: RawStatus::Up,
            maintenance: false,
            last_checked_at: None,
            last_up_at: None,
            last_down_at: None,
            last_latency_ms: None,
            last_status_code: None,
            last_error: None,
            uptime_24h: 0.0,
            uptime_30d: 0.0,
            avg_latency_24h_ms: 0.0,
            tls_days_left: None,
            tls_not_after: None,
        }
    }

    /// Re-derive the displayed status from the stored raw status
    pub fn rederive(&mut self, paused: bool) {
        self.status = Status::derive(self.raw_status, paused, self.maintenance);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlays_win_over_raw_status() {
        assert_eq!(Status::derive(RawStatus::Down, true, false), Status::Paused);
        assert_eq!(Status::derive(RawStatus::Up, true, true), Status::Paused);
        assert_eq!(Status::derive(RawStatus::Down, false, true), Status::Maintenance);
        assert_eq!(Status::derive(RawStatus::Down, false, false), Status::Down);
        assert_eq!(Status::derive(RawStatus::Up, false, false), Status::Up);
    }
}
