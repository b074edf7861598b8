use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use super::checker::{Checker, DnsChecker, HttpChecker, TcpChecker};
use crate::clock::Clock;
use crate::models::{CheckResult, Monitor, MonitorKind, MonitorSettings, ProbeErrorKind};

/// Performs one probe attempt for a monitor
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, monitor: &Monitor, settings: &MonitorSettings) -> CheckResult;
}

/// Monitoring executor - executes individual monitoring checks
pub struct MonitoringExecutor {
    http_checker: Arc<HttpChecker>,
    tcp_checker: Arc<TcpChecker>,
    dns_checker: Arc<DnsChecker>,
    clock: Arc<dyn Clock>,
}

impl MonitoringExecutor {
    /// Create a new monitoring executor
    pub fn new(clock: Arc<dyn Clock>) -> Result<Self> {
        Ok(Self {
            http_checker: Arc::new(HttpChecker::new()?),
            tcp_checker: Arc::new(TcpChecker),
            dns_checker: Arc::new(DnsChecker),
            clock,
        })
    }
}

#[async_trait]
impl Prober for MonitoringExecutor {
    async fn probe(&self, monitor: &Monitor, settings: &MonitorSettings) -> CheckResult {
        let checker: &dyn Checker = match monitor.kind {
            MonitorKind::Http | MonitorKind::Keyword => self.http_checker.as_ref(),
            MonitorKind::Tcp | MonitorKind::Tls | MonitorKind::Grpc => self.tcp_checker.as_ref(),
            MonitorKind::Dns => self.dns_checker.as_ref(),
            MonitorKind::Push => {
                return CheckResult::failure(
                    self.clock.now(),
                    ProbeErrorKind::Other,
                    "push monitors are not actively probed",
                );
            }
        };

        let limit = Duration::from_secs(monitor.timeout_seconds_or(settings.default_timeout_seconds));
        let outcome = checker.check(monitor, limit).await;
        let checked_at = self.clock.now();

        match outcome {
            Ok(attempt) => CheckResult::success(checked_at, attempt.latency_ms, attempt.status_code),
            Err(failure) => {
                let mut result = CheckResult::failure(checked_at, failure.kind, failure.message)
                    .with_latency(failure.latency_ms);
                result.status_code = failure.status_code;
                result
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;

    #[tokio::test]
    async fn push_monitors_are_not_probed() {
        let executor = MonitoringExecutor::new(Arc::new(SystemClock)).unwrap();
        let monitor = Monitor::new("heartbeat", MonitorKind::Push, "");

        let result = executor.probe(&monitor, &MonitorSettings::default()).await;
        assert!(!result.ok);
        assert_eq!(result.error_kind, Some(ProbeErrorKind::Other));
    }

    #[tokio::test]
    async fn tcp_probe_reports_latency() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let executor = MonitoringExecutor::new(Arc::new(SystemClock)).unwrap();
        let monitor = Monitor::new("db", MonitorKind::Tcp, listener.local_addr().unwrap().to_string());

        let result = executor.probe(&monitor, &MonitorSettings::default()).await;
        assert!(result.ok);
        assert!(result.error.is_none());
    }
}
