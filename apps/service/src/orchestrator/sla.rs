use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Periodic SLA aggregation, invoked once per scheduler tick
///
/// Implementations throttle themselves and must be idempotent for a period
/// that was already evaluated.
#[async_trait]
pub trait SlaEvaluator: Send + Sync {
    async fn evaluate(&self, now: DateTime<Utc>) -> Result<()>;
}
