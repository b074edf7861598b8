use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Classification of a failed probe attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeErrorKind {
    Timeout,
    Connection,
    Dns,
    TlsHandshake,
    UnexpectedStatus,
    KeywordMissing,
    Other,
}

/// Certificate details observed during a handshake
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TlsMetadata {
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub subject: String,
    pub issuer: String,
    pub sans: Vec<String>,
    pub fingerprint_sha256: String,
}

/// Result of one probe attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub ok: bool,
    pub latency_ms: u64,
    pub status_code: Option<u16>,
    pub error: Option<String>,
    pub error_kind: Option<ProbeErrorKind>,
    pub tls: Option<TlsMetadata>,
    pub checked_at: DateTime<Utc>,
}

impl CheckResult {
    /// Mark the check as successful with latency
    pub fn success(checked_at: DateTime<Utc>, latency_ms: u64, status_code: Option<u16>) -> Self {
        Self {
            ok: true,
            latency_ms,
            status_code,
            error: None,
            error_kind: None,
            tls: None,
            checked_at,
        }
    }

    /// Mark the check as failed with a classified error
    pub fn failure(checked_at: DateTime<Utc>, kind: ProbeErrorKind, error: impl Into<String>) -> Self {
        Self {
            ok: false,
            latency_ms: 0,
            status_code: None,
            error: Some(error.into()),
            error_kind: Some(kind),
            tls: None,
            checked_at,
        }
    }

    pub fn with_status_code(mut self, code: u16) -> Self {
        self.status_code = Some(code);
        self
    }

    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    pub fn with_tls(mut self, tls: TlsMetadata) -> Self {
        self.tls = Some(tls);
        self
    }

    pub fn is_tls_failure(&self) -> bool {
        self.error_kind == Some(ProbeErrorKind::TlsHandshake)
    }
}

/// Stored sample of one probe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorMetric {
    pub id: Option<i64>,
    pub monitor_id: Uuid,
    pub checked_at: DateTime<Utc>,
    pub ok: bool,
    pub latency_ms: u64,
    pub status_code: Option<u16>,
    pub error: Option<String>,
}

impl MonitorMetric {
    pub fn from_result(monitor_id: Uuid, result: &CheckResult) -> Self {
        Self {
            id: None,
            monitor_id,
            checked_at: result.checked_at,
            ok: result.ok,
            latency_ms: result.latency_ms,
            status_code: result.status_code,
            error: result.error.clone(),
        }
    }
}

/// Aggregate over a window of samples
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MetricSummary {
    pub total: u64,
    pub successful: u64,
    /// Mean latency of successful samples only
    pub avg_latency_ms: f64,
}

impl MetricSummary {
    /// Build a summary from raw samples
    pub fn from_samples<'a>(samples: impl IntoIterator<Item = &'a MonitorMetric>) -> Self {
        let mut total = 0u64;
        let mut successful = 0u64;
        let mut latency_sum = 0u64;
        for sample in samples {
            total += 1;
            if sample.ok {
                successful += 1;
                latency_sum += sample.latency_ms;
            }
        }
        let avg_latency_ms =
            if successful == 0 { 0.0 } else { latency_sum as f64 / successful as f64 };
        Self { total, successful, avg_latency_ms }
    }

    /// Percentage of successful samples, 0 when the window is empty
    pub fn uptime_percent(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.successful as f64 * 100.0 / self.total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(ok: bool, latency_ms: u64) -> MonitorMetric {
        MonitorMetric {
            id: None,
            monitor_id: Uuid::nil(),
            checked_at: Utc::now(),
            ok,
            latency_ms,
            status_code: None,
            error: None,
        }
    }

    #[test]
    fn empty_window_reports_zero_uptime() {
        let samples: Vec<MonitorMetric> = Vec::new();
        let summary = MetricSummary::from_samples(&samples);
        assert_eq!(summary.uptime_percent(), 0.0);
        assert!(!summary.uptime_percent().is_nan());
        assert_eq!(summary.avg_latency_ms, 0.0);
    }

    #[test]
    fn latency_average_ignores_failures() {
        let samples = vec![sample(true, 100), sample(false, 5000), sample(true, 300), sample(true, 200)];
        let summary = MetricSummary::from_samples(&samples);
        assert_eq!(summary.total, 4);
        assert_eq!(summary.successful, 3);
        assert_eq!(summary.uptime_percent(), 75.0);
        assert_eq!(summary.avg_latency_ms, 200.0);
    }
}
