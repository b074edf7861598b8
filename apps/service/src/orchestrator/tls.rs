//! Certificate snapshot tracking.

use anyhow::Result;
use chrono::Duration;
use tracing::debug;

use crate::database::Database;
use crate::models::{CheckResult, Monitor, MonitorSettings, MonitorTls};

/// Whether a days-left value moved from above `threshold` to at or below it
///
/// A missing previous value counts as infinitely far from expiry.
pub fn crossed_into(previous: Option<i64>, current: Option<i64>, threshold: i64) -> bool {
    match current {
        Some(days) => days <= threshold && previous.is_none_or(|prev| prev > threshold),
        None => false,
    }
}

/// Whether a days-left value moved from at or below `threshold` back above it
pub fn crossed_out(previous: Option<i64>, current: Option<i64>, threshold: i64) -> bool {
    previous.is_some_and(|prev| prev <= threshold) && current.is_some_and(|days| days > threshold)
}

/// Update the stored snapshot from a probe result and return the current one
pub async fn track(
    database: &dyn Database,
    monitor: &Monitor,
    result: &CheckResult,
    settings: &MonitorSettings,
) -> Result<Option<MonitorTls>> {
    if !monitor.supports_tls() {
        return Ok(None);
    }
    let prior = database.get_tls(monitor.id).await?;

    if let Some(meta) = &result.tls {
        let refresh_after = Duration::hours(settings.tls_refresh_hours as i64);
        if let Some(prior) = prior {
            if result.checked_at - prior.checked_at < refresh_after {
                debug!(monitor = %monitor.id, "Reusing recent certificate snapshot");
                return Ok(Some(prior));
            }
        }
        let snapshot = MonitorTls::from_metadata(monitor.id, meta, result.checked_at);
        database.save_tls(&snapshot).await?;
        return Ok(Some(snapshot));
    }

    if result.is_tls_failure() {
        return match prior {
            Some(mut snapshot) => {
                snapshot.last_error = result.error.clone();
                snapshot.checked_at = result.checked_at;
                database.save_tls(&snapshot).await?;
                Ok(Some(snapshot))
            }
            None => Ok(None),
        };
    }

    Ok(prior)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::MemoryDatabase;
    use crate::models::{MonitorKind, ProbeErrorKind, TlsMetadata};
    use chrono::{DateTime, Utc};

    fn metadata(not_after: DateTime<Utc>, subject: &str) -> TlsMetadata {
        TlsMetadata {
            not_before: not_after - Duration::days(90),
            not_after,
            subject: subject.to_string(),
            issuer: "Test CA".to_string(),
            sans: vec!["example.com".to_string()],
            fingerprint_sha256: "ab:cd".to_string(),
        }
    }

    #[test]
    fn crossings() {
        assert!(crossed_into(None, Some(5), 7));
        assert!(crossed_into(Some(8), Some(7), 7));
        assert!(!crossed_into(Some(7), Some(6), 7));
        assert!(!crossed_into(Some(20), None, 7));
        assert!(crossed_out(Some(7), Some(8), 7));
        assert!(!crossed_out(None, Some(30), 7));
        assert!(!crossed_out(Some(8), Some(9), 7));
    }

    #[tokio::test]
    async fn snapshot_reused_inside_refresh_window() {
        let database = MemoryDatabase::new();
        let monitor = Monitor::new("site", MonitorKind::Http, "https://example.com");
        let settings = MonitorSettings::default();
        let now = Utc::now();
        let expiry = now + Duration::days(30);

        let first = CheckResult::success(now, 10, Some(200)).with_tls(metadata(expiry, "first"));
        track(&database, &monitor, &first, &settings).await.unwrap();

        let later = now + Duration::hours(2);
        let second = CheckResult::success(later, 10, Some(200)).with_tls(metadata(expiry, "second"));
        let snapshot = track(&database, &monitor, &second, &settings).await.unwrap().unwrap();
        assert_eq!(snapshot.subject, "first");

        let much_later = now + Duration::hours(25);
        let third = CheckResult::success(much_later, 10, Some(200)).with_tls(metadata(expiry, "third"));
        let snapshot = track(&database, &monitor, &third, &settings).await.unwrap().unwrap();
        assert_eq!(snapshot.subject, "third");
        assert_eq!(database.get_tls(monitor.id).await.unwrap().unwrap().subject, "third");
    }

    #[tokio::test]
    async fn handshake_failure_annotates_existing_snapshot_only() {
        let database = MemoryDatabase::new();
        let monitor = Monitor::new("site", MonitorKind::Http, "https://example.com");
        let settings = MonitorSettings::default();
        let now = Utc::now();

        let failed = CheckResult::failure(now, ProbeErrorKind::TlsHandshake, "certificate expired");
        assert!(track(&database, &monitor, &failed, &settings).await.unwrap().is_none());
        assert!(database.get_tls(monitor.id).await.unwrap().is_none());

        let ok = CheckResult::success(now, 10, Some(200)).with_tls(metadata(now + Duration::days(3), "cn"));
        track(&database, &monitor, &ok, &settings).await.unwrap();

        let later = now + Duration::minutes(5);
        let failed = CheckResult::failure(later, ProbeErrorKind::TlsHandshake, "certificate expired");
        let snapshot = track(&database, &monitor, &failed, &settings).await.unwrap().unwrap();
        assert_eq!(snapshot.last_error.as_deref(), Some("certificate expired"));
        assert_eq!(snapshot.checked_at, later);
        assert_eq!(snapshot.subject, "cn");
    }

    #[tokio::test]
    async fn plain_http_is_not_tracked() {
        let database = MemoryDatabase::new();
        let monitor = Monitor::new("site", MonitorKind::Http, "http://example.com");
        let now = Utc::now();
        let result = CheckResult::success(now, 10, Some(200)).with_tls(metadata(now, "cn"));

        assert!(track(&database, &monitor, &result, &MonitorSettings::default()).await.unwrap().is_none());
    }
}
