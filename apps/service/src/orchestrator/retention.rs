//! Retention of metric history.
//!
//! Samples older than `retention_days` are pruned at most once per hour. Events
//! are never pruned here.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info};

use crate::database::Database;
use crate::models::MonitorSettings;

/// Minimum spacing between two cleanup passes
pub const CLEANUP_EVERY: Duration = Duration::hours(1);

/// Retention policy for metric samples
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Days to keep samples, 0 keeps everything
    pub metric_days: u32,
}

impl RetentionPolicy {
    pub fn from_settings(settings: &MonitorSettings) -> Self {
        Self { metric_days: settings.retention_days }
    }

    /// Oldest instant still kept
    pub fn cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        (self.metric_days > 0).then(|| now - Duration::days(self.metric_days as i64))
    }
}

/// Cleanup manager for expired samples
pub struct RetentionCleanup {
    database: Arc<dyn Database>,
}

impl RetentionCleanup {
    pub fn new(database: Arc<dyn Database>) -> Self {
        Self { database }
    }

    /// Delete samples older than the policy allows, returns the number removed
    pub async fn cleanup_expired_metrics(&self, policy: RetentionPolicy, now: DateTime<Utc>) -> Result<u64> {
        let Some(cutoff) = policy.cutoff(now) else {
            debug!("Metric retention disabled");
            return Ok(0);
        };

        let removed = self.database.delete_metrics_before(cutoff).await?;
        if removed > 0 {
            info!("Retention cleanup completed: {} metric samples deleted", removed);
        } else {
            debug!("Retention cleanup found nothing to delete");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::MemoryDatabase;
    use crate::models::{CheckResult, MonitorMetric};
    use uuid::Uuid;

    #[test]
    fn zero_days_keeps_everything() {
        let policy = RetentionPolicy { metric_days: 0 };
        assert!(policy.cutoff(Utc::now()).is_none());
    }

    #[test]
    fn cutoff_from_settings() {
        let now = Utc::now();
        let policy = RetentionPolicy::from_settings(&MonitorSettings::default());
        assert_eq!(policy.metric_days, 30);
        assert_eq!(policy.cutoff(now), Some(now - Duration::days(30)));
    }

    #[tokio::test]
    async fn old_samples_are_removed() {
        let database = Arc::new(MemoryDatabase::new());
        let monitor_id = Uuid::new_v4();
        let now = Utc::now();
        for age in [1, 10, 40, 90] {
            let result = CheckResult::success(now - Duration::days(age), 12, Some(200));
            database.append_metric(&MonitorMetric::from_result(monitor_id, &result)).await.unwrap();
        }

        let cleanup = RetentionCleanup::new(database.clone());
        let removed = cleanup.cleanup_expired_metrics(RetentionPolicy { metric_days: 30 }, now).await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(database.metric_count(monitor_id).await, 2);
    }
}
