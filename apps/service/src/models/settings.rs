use serde::{Deserialize, Serialize};

/// Process-wide engine tunables, stored as a singleton
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorSettings {
    /// Global switch for probing
    pub enabled: bool,
    pub max_concurrent_checks: usize,
    pub default_timeout_seconds: u64,
    pub default_interval_seconds: u64,
    /// Days of metric history kept, 0 keeps everything
    pub retention_days: u32,
    /// Minimum age of a certificate snapshot before it is replaced
    pub tls_refresh_hours: u32,
    /// Days-left at or below which a certificate counts as expiring
    pub tls_expiry_threshold_days: i64,
    pub notify_suppress_minutes: u32,
    pub notify_maintenance: bool,
    pub auto_ticket_enabled: bool,
    pub auto_tls_incident_enabled: bool,
    /// Days-left edge shared by TLS incidents and TLS notifications
    pub tls_incident_threshold_days: i64,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_concurrent_checks: 10,
            default_timeout_seconds: 10,
            default_interval_seconds: 60,
            retention_days: 30,
            tls_refresh_hours: 24,
            tls_expiry_threshold_days: 14,
            notify_suppress_minutes: 10,
            notify_maintenance: true,
            auto_ticket_enabled: true,
            auto_tls_incident_enabled: true,
            tls_incident_threshold_days: 7,
        }
    }
}

impl MonitorSettings {
    /// Concurrency ceiling, never below one
    pub fn concurrency_limit(&self) -> usize {
        self.max_concurrent_checks.max(1)
    }
}
