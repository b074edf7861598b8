//! In-memory persistence gateway, used by tests and ephemeral runs.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::repository::Database;
use crate::models::monitor::is_due;
use crate::models::{
    MetricSummary, Monitor, MonitorChannelLink, MonitorEvent, MonitorMaintenance, MonitorMetric,
    MonitorNotificationState, MonitorSettings, MonitorState, MonitorTls, NotificationChannel,
    NotificationDelivery,
};

#[derive(Default)]
struct Tables {
    monitors: Vec<Monitor>,
    states: HashMap<Uuid, MonitorState>,
    metrics: Vec<MonitorMetric>,
    events: Vec<MonitorEvent>,
    tls: HashMap<Uuid, MonitorTls>,
    maintenance: Vec<MonitorMaintenance>,
    settings: Option<MonitorSettings>,
    channels: Vec<NotificationChannel>,
    links: Vec<MonitorChannelLink>,
    notification_states: HashMap<Uuid, MonitorNotificationState>,
    deliveries: Vec<NotificationDelivery>,
    next_row_id: i64,
}

impl Tables {
    fn row_id(&mut self) -> i64 {
        self.next_row_id += 1;
        self.next_row_id
    }
}

/// Lock-protected maps keeping insertion order where the gateway promises it
#[derive(Default)]
pub struct MemoryDatabase {
    tables: RwLock<Tables>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// All stored events, oldest first
    pub async fn all_events(&self) -> Vec<MonitorEvent> {
        self.tables.read().await.events.clone()
    }

    pub async fn metric_count(&self, monitor_id: Uuid) -> usize {
        self.tables.read().await.metrics.iter().filter(|m| m.monitor_id == monitor_id).count()
    }
}

fn upsert_by<T, K: PartialEq>(rows: &mut Vec<T>, row: T, key: impl Fn(&T) -> K) {
    let wanted = key(&row);
    match rows.iter_mut().find(|existing| key(existing) == wanted) {
        Some(existing) => *existing = row,
        None => rows.push(row),
    }
}

#[async_trait]
impl Database for MemoryDatabase {
    async fn list_monitors(&self) -> Result<Vec<Monitor>> {
        Ok(self.tables.read().await.monitors.clone())
    }

    async fn get_monitor(&self, id: Uuid) -> Result<Option<Monitor>> {
        Ok(self.tables.read().await.monitors.iter().find(|m| m.id == id).cloned())
    }

    async fn save_monitor(&self, monitor: &Monitor) -> Result<()> {
        upsert_by(&mut self.tables.write().await.monitors, monitor.clone(), |m| m.id);
        Ok(())
    }

    async fn delete_monitor(&self, id: Uuid) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables.monitors.retain(|m| m.id != id);
        tables.states.remove(&id);
        tables.tls.remove(&id);
        tables.notification_states.remove(&id);
        tables.links.retain(|l| l.monitor_id != id);
        Ok(())
    }

    async fn set_monitor_paused(&self, id: Uuid, paused: bool) -> Result<bool> {
        let mut tables = self.tables.write().await;
        match tables.monitors.iter_mut().find(|m| m.id == id) {
            Some(monitor) => {
                monitor.paused = paused;
                monitor.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn due_monitors(&self, now: DateTime<Utc>, default_interval_seconds: u64) -> Result<Vec<Monitor>> {
        let tables = self.tables.read().await;
        Ok(tables
            .monitors
            .iter()
            .filter(|m| {
                let last = tables.states.get(&m.id).and_then(|s| s.last_checked_at);
                is_due(m, last, now, default_interval_seconds)
            })
            .cloned()
            .collect())
    }

    async fn get_state(&self, monitor_id: Uuid) -> Result<Option<MonitorState>> {
        Ok(self.tables.read().await.states.get(&monitor_id).cloned())
    }

    async fn save_state(&self, state: &MonitorState) -> Result<()> {
        self.tables.write().await.states.insert(state.monitor_id, state.clone());
        Ok(())
    }

    async fn append_metric(&self, metric: &MonitorMetric) -> Result<i64> {
        let mut tables = self.tables.write().await;
        let id = tables.row_id();
        tables.metrics.push(MonitorMetric { id: Some(id), ..metric.clone() });
        Ok(id)
    }

    async fn metric_summary(&self, monitor_id: Uuid, since: DateTime<Utc>) -> Result<MetricSummary> {
        let tables = self.tables.read().await;
        Ok(MetricSummary::from_samples(
            tables.metrics.iter().filter(|m| m.monitor_id == monitor_id && m.checked_at >= since),
        ))
    }

    async fn delete_metrics_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut tables = self.tables.write().await;
        let before = tables.metrics.len();
        tables.metrics.retain(|m| m.checked_at >= cutoff);
        Ok((before - tables.metrics.len()) as u64)
    }

    async fn append_event(&self, event: &MonitorEvent) -> Result<i64> {
        let mut tables = self.tables.write().await;
        let id = tables.row_id();
        tables.events.push(MonitorEvent { id: Some(id), ..event.clone() });
        Ok(id)
    }

    async fn events_since(&self, monitor_id: Uuid, since: DateTime<Utc>) -> Result<Vec<MonitorEvent>> {
        let tables = self.tables.read().await;
        Ok(tables
            .events
            .iter()
            .filter(|e| e.monitor_id == monitor_id && e.created_at >= since)
            .cloned()
            .collect())
    }

    async fn get_tls(&self, monitor_id: Uuid) -> Result<Option<MonitorTls>> {
        Ok(self.tables.read().await.tls.get(&monitor_id).cloned())
    }

    async fn save_tls(&self, tls: &MonitorTls) -> Result<()> {
        self.tables.write().await.tls.insert(tls.monitor_id, tls.clone());
        Ok(())
    }

    async fn list_maintenance(&self) -> Result<Vec<MonitorMaintenance>> {
        Ok(self.tables.read().await.maintenance.clone())
    }

    async fn save_maintenance(&self, window: &MonitorMaintenance) -> Result<()> {
        upsert_by(&mut self.tables.write().await.maintenance, window.clone(), |w| w.id);
        Ok(())
    }

    async fn delete_maintenance(&self, id: Uuid) -> Result<()> {
        self.tables.write().await.maintenance.retain(|w| w.id != id);
        Ok(())
    }

    async fn get_settings(&self) -> Result<MonitorSettings> {
        Ok(self.tables.read().await.settings.clone().unwrap_or_default())
    }

    async fn save_settings(&self, settings: &MonitorSettings) -> Result<()> {
        self.tables.write().await.settings = Some(settings.clone());
        Ok(())
    }

    async fn list_channels(&self) -> Result<Vec<NotificationChannel>> {
        Ok(self.tables.read().await.channels.clone())
    }

    async fn get_channel(&self, id: Uuid) -> Result<Option<NotificationChannel>> {
        Ok(self.tables.read().await.channels.iter().find(|c| c.id == id).cloned())
    }

    async fn save_channel(&self, channel: &NotificationChannel) -> Result<()> {
        upsert_by(&mut self.tables.write().await.channels, channel.clone(), |c| c.id);
        Ok(())
    }

    async fn delete_channel(&self, id: Uuid) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables.channels.retain(|c| c.id != id);
        tables.links.retain(|l| l.channel_id != id);
        Ok(())
    }

    async fn channel_links(&self, monitor_id: Uuid) -> Result<Vec<MonitorChannelLink>> {
        let tables = self.tables.read().await;
        Ok(tables.links.iter().filter(|l| l.monitor_id == monitor_id).cloned().collect())
    }

    async fn save_channel_link(&self, link: &MonitorChannelLink) -> Result<()> {
        upsert_by(&mut self.tables.write().await.links, link.clone(), |l| (l.monitor_id, l.channel_id));
        Ok(())
    }

    async fn get_notification_state(&self, monitor_id: Uuid) -> Result<Option<MonitorNotificationState>> {
        Ok(self.tables.read().await.notification_states.get(&monitor_id).cloned())
    }

    async fn save_notification_state(&self, state: &MonitorNotificationState) -> Result<()> {
        self.tables.write().await.notification_states.insert(state.monitor_id, state.clone());
        Ok(())
    }

    async fn append_delivery(&self, delivery: &NotificationDelivery) -> Result<i64> {
        let mut tables = self.tables.write().await;
        let id = tables.row_id();
        tables.deliveries.push(NotificationDelivery { id: Some(id), ..delivery.clone() });
        Ok(id)
    }

    async fn deliveries(&self, monitor_id: Uuid) -> Result<Vec<NotificationDelivery>> {
        let tables = self.tables.read().await;
        Ok(tables.deliveries.iter().filter(|d| d.monitor_id == monitor_id).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MonitorKind;

    #[tokio::test]
    async fn save_monitor_overwrites_by_id() -> Result<()> {
        let database = MemoryDatabase::new();
        let mut monitor = Monitor::new("api", MonitorKind::Http, "https://example.com");
        database.save_monitor(&monitor).await?;
        monitor.name = "api v2".to_string();
        database.save_monitor(&monitor).await?;

        let monitors = database.list_monitors().await?;
        assert_eq!(monitors.len(), 1);
        assert_eq!(monitors[0].name, "api v2");
        Ok(())
    }

    #[tokio::test]
    async fn delete_monitor_drops_dependent_rows() -> Result<()> {
        let database = MemoryDatabase::new();
        let monitor = Monitor::new("api", MonitorKind::Http, "https://example.com");
        database.save_monitor(&monitor).await?;
        database.save_state(&MonitorState::new(monitor.id)).await?;

        database.delete_monitor(monitor.id).await?;
        assert!(database.get_monitor(monitor.id).await?.is_none());
        assert!(database.get_state(monitor.id).await?.is_none());
        Ok(())
    }
}
