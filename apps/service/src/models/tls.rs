use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::metric::TlsMetadata;

/// Latest known certificate snapshot of a monitor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorTls {
    pub monitor_id: Uuid,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub subject: String,
    pub issuer: String,
    pub sans: Vec<String>,
    pub fingerprint_sha256: String,
    pub last_error: Option<String>,
    pub checked_at: DateTime<Utc>,
}

impl MonitorTls {
    pub fn from_metadata(monitor_id: Uuid, meta: &TlsMetadata, checked_at: DateTime<Utc>) -> Self {
        Self {
            monitor_id,
            not_before: meta.not_before,
            not_after: meta.not_after,
            subject: meta.subject.clone(),
            issuer: meta.issuer.clone(),
            sans: meta.sans.clone(),
            fingerprint_sha256: meta.fingerprint_sha256.clone(),
            last_error: None,
            checked_at,
        }
    }

    /// Whole days until expiry, truncated toward zero
    pub fn days_left(&self, now: DateTime<Utc>) -> i64 {
        days_until(self.not_after, now)
    }
}

/// Whole days between `now` and `not_after` computed from whole hours
///
/// 23 hours left is 0 days, an expired certificate yields a negative count.
pub fn days_until(not_after: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (not_after - now).num_hours() / 24
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn days_left_truncates() {
        let now = Utc::now();
        assert_eq!(days_until(now + Duration::hours(23), now), 0);
        assert_eq!(days_until(now + Duration::hours(47), now), 1);
        assert_eq!(days_until(now + Duration::hours(48), now), 2);
        assert_eq!(days_until(now - Duration::hours(23), now), 0);
        assert_eq!(days_until(now - Duration::hours(49), now), -2);
    }
}
