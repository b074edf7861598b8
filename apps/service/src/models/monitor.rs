use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Interval used when a monitor has none configured
pub const DEFAULT_INTERVAL_SECONDS: u64 = 60;

/// Upper bound on a probe interval (one year)
pub const MAX_INTERVAL_SECONDS: u64 = 365 * 24 * 60 * 60;

/// Kind of probe a monitor performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorKind {
    Http,
    Keyword,
    Tcp,
    Dns,
    Tls,
    Grpc,
    /// Heartbeat monitors are fed by the monitored service itself and never probed
    Push,
}

impl MonitorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MonitorKind::Http => "http",
            MonitorKind::Keyword => "keyword",
            MonitorKind::Tcp => "tcp",
            MonitorKind::Dns => "dns",
            MonitorKind::Tls => "tls",
            MonitorKind::Grpc => "grpc",
            MonitorKind::Push => "push",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "http" => Some(MonitorKind::Http),
            "keyword" => Some(MonitorKind::Keyword),
            "tcp" => Some(MonitorKind::Tcp),
            "dns" => Some(MonitorKind::Dns),
            "tls" => Some(MonitorKind::Tls),
            "grpc" => Some(MonitorKind::Grpc),
            "push" => Some(MonitorKind::Push),
            _ => None,
        }
    }

    /// Passive kinds cannot be checked on demand
    pub fn is_passive(&self) -> bool {
        matches!(self, MonitorKind::Push)
    }
}

impl std::fmt::Display for MonitorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inclusive range of accepted HTTP status codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRange {
    pub min: u16,
    pub max: u16,
}

impl StatusRange {
    pub fn contains(&self, code: u16) -> bool {
        code >= self.min && code <= self.max
    }
}

/// Per-monitor automation switches
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutomationToggles {
    /// Open a ticket when the monitor goes down
    pub ticket_on_down: bool,
    /// Open an incident when the certificate nears expiry
    pub tls_incident: bool,
    /// Send a notification when the certificate nears expiry
    pub notify_tls: bool,
}

/// Monitor model - a probe definition owned by the persistence gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Monitor {
    pub id: Uuid,
    pub name: String,
    pub kind: MonitorKind,
    pub target: String,
    /// Seconds between checks, 0 means the default
    pub interval_seconds: u64,
    /// Seconds per attempt, 0 means the global default
    pub timeout_seconds: u64,
    pub retries: u32,
    pub retry_interval_seconds: u64,
    pub accepted_status: Vec<StatusRange>,
    /// Substring required in the response body of keyword monitors
    pub keyword: Option<String>,
    pub tags: Vec<String>,
    pub active: bool,
    pub paused: bool,
    pub sla_target: Option<f64>,
    pub owner_id: Option<String>,
    pub automation: AutomationToggles,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Monitor {
    /// Create a new active monitor with default scheduling
    pub fn new(name: impl Into<String>, kind: MonitorKind, target: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            kind,
            target: target.into(),
            interval_seconds: DEFAULT_INTERVAL_SECONDS,
            timeout_seconds: 0,
            retries: 0,
            retry_interval_seconds: 0,
            accepted_status: Vec::new(),
            keyword: None,
            tags: Vec::new(),
            active: true,
            paused: false,
            sla_target: None,
            owner_id: None,
            automation: AutomationToggles::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Check interval, falling back to `default_seconds` and then to 60 seconds
    pub fn interval(&self, default_seconds: u64) -> Duration {
        let secs = match (self.interval_seconds, default_seconds) {
            (0, 0) => DEFAULT_INTERVAL_SECONDS,
            (0, default) => default,
            (own, _) => own,
        };
        Duration::seconds(secs.min(MAX_INTERVAL_SECONDS) as i64)
    }

    /// Effective per-attempt timeout in seconds
    pub fn timeout_seconds_or(&self, default_seconds: u64) -> u64 {
        if self.timeout_seconds == 0 { default_seconds.max(1) } else { self.timeout_seconds }
    }

    /// Whether an HTTP status code counts as success (200-399 when unset)
    pub fn accepts_status(&self, code: u16) -> bool {
        if self.accepted_status.is_empty() {
            (200..400).contains(&code)
        } else {
            self.accepted_status.iter().any(|range| range.contains(code))
        }
    }

    /// Whether probes of this monitor can carry certificate metadata
    pub fn supports_tls(&self) -> bool {
        let target = self.target.trim().to_ascii_lowercase();
        match self.kind {
            MonitorKind::Tls => true,
            MonitorKind::Http | MonitorKind::Keyword => target.starts_with("https://"),
            MonitorKind::Grpc => target.starts_with("grpcs://"),
            _ => false,
        }
    }
}

/// Whether a monitor should be probed at `now`
///
/// Due when active, not paused, and never checked or last checked at least one
/// interval ago.
pub fn is_due(
    monitor: &Monitor,
    last_checked_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    default_interval_seconds: u64,
) -> bool {
    if !monitor.active || monitor.paused || monitor.kind.is_passive() {
        return false;
    }
    match last_checked_at {
        None => true,
        Some(last) => now - last >= monitor.interval(default_interval_seconds),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn due_after_interval_elapsed() {
        let now = Utc::now();
        let monitor = Monitor::new("api", MonitorKind::Http, "https://example.com");

        assert!(is_due(&monitor, Some(now - Duration::seconds(61)), now, 60));
        assert!(!is_due(&monitor, Some(now - Duration::seconds(30)), now, 60));

        assert!(is_due(&monitor, None, now, 60));
    }

    #[test]
    fn paused_and_inactive_are_never_due() {
        let now = Utc::now();
        let mut monitor = Monitor::new("api", MonitorKind::Http, "https://example.com");
        monitor.paused = true;
        assert!(!is_due(&monitor, None, now, 60));

        monitor.paused = false;
        monitor.active = false;
        assert!(!is_due(&monitor, None, now, 60));
    }

    #[test]
    fn zero_interval_falls_back_to_default() {
        let mut monitor = Monitor::new("db", MonitorKind::Tcp, "db.example.com:5432");
        monitor.interval_seconds = 0;
        assert_eq!(monitor.interval(0), Duration::seconds(60));
        assert_eq!(monitor.interval(300), Duration::seconds(300));
        monitor.interval_seconds = 15;
        assert_eq!(monitor.interval(300), Duration::seconds(15));
        monitor.interval_seconds = u64::MAX;
        assert_eq!(monitor.interval(300), Duration::seconds(MAX_INTERVAL_SECONDS as i64));
    }

    #[test]
    fn status_acceptance() {
        let mut monitor = Monitor::new("api", MonitorKind::Http, "https://example.com");
        assert!(monitor.accepts_status(204));
        assert!(monitor.accepts_status(302));
        assert!(!monitor.accepts_status(404));

        monitor.accepted_status = vec![StatusRange { min: 200, max: 200 }, StatusRange { min: 401, max: 401 }];
        assert!(monitor.accepts_status(401));
        assert!(!monitor.accepts_status(204));
    }

    #[test]
    fn tls_eligibility() {
        assert!(Monitor::new("a", MonitorKind::Http, "https://example.com").supports_tls());
        assert!(!Monitor::new("b", MonitorKind::Http, "http://example.com").supports_tls());
        assert!(Monitor::new("c", MonitorKind::Grpc, "grpcs://example.com:443").supports_tls());
        assert!(!Monitor::new("d", MonitorKind::Tcp, "example.com:443").supports_tls());
        assert!(Monitor::new("e", MonitorKind::Tls, "example.com:443").supports_tls());
    }
}
