use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Row, params};
use serde::{Serialize, de::DeserializeOwned};
use std::collections::HashMap;
use std::path::Path;
use uuid::Uuid;

use crate::models::monitor::is_due;
use crate::models::{
    ChannelKind, DeliveryOutcome, EventKind, MetricSummary, Monitor, MonitorChannelLink,
    MonitorEvent, MonitorKind, MonitorMaintenance, MonitorMetric, MonitorNotificationState,
    MonitorSettings, MonitorState, MonitorTls, NotificationChannel, NotificationDelivery,
    NotificationKind, RawStatus, Status,
};
use crate::orchestrator::maintenance;
use crate::pool::{LibsqlManager, LibsqlPool};

/// Database trait for abstracting the persistence gateway
#[async_trait]
pub trait Database: Send + Sync {
    /// Get all monitors
    async fn list_monitors(&self) -> Result<Vec<Monitor>>;

    /// Get a monitor by id
    async fn get_monitor(&self, id: Uuid) -> Result<Option<Monitor>>;

    /// Insert or update a monitor
    async fn save_monitor(&self, monitor: &Monitor) -> Result<()>;

    /// Delete a monitor by id
    async fn delete_monitor(&self, id: Uuid) -> Result<()>;

    /// Flip the paused flag, returns false when the monitor does not exist
    async fn set_monitor_paused(&self, id: Uuid, paused: bool) -> Result<bool>;

    /// Monitors that are active, not paused and whose last check is at least one interval old
    async fn due_monitors(&self, now: DateTime<Utc>, default_interval_seconds: u64) -> Result<Vec<Monitor>>;

    async fn get_state(&self, monitor_id: Uuid) -> Result<Option<MonitorState>>;

    /// Overwrite the state row of a monitor
    async fn save_state(&self, state: &MonitorState) -> Result<()>;

    async fn append_metric(&self, metric: &MonitorMetric) -> Result<i64>;

    /// Count, success count and average successful latency since `since`
    async fn metric_summary(&self, monitor_id: Uuid, since: DateTime<Utc>) -> Result<MetricSummary>;

    /// Delete samples older than `cutoff`, returns the number removed
    async fn delete_metrics_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;

    async fn append_event(&self, event: &MonitorEvent) -> Result<i64>;

    /// Events of a monitor since `since`, oldest first
    async fn events_since(&self, monitor_id: Uuid, since: DateTime<Utc>) -> Result<Vec<MonitorEvent>>;

    async fn get_tls(&self, monitor_id: Uuid) -> Result<Option<MonitorTls>>;

    async fn save_tls(&self, tls: &MonitorTls) -> Result<()>;

    async fn list_maintenance(&self) -> Result<Vec<MonitorMaintenance>>;

    async fn save_maintenance(&self, window: &MonitorMaintenance) -> Result<()>;

    async fn delete_maintenance(&self, id: Uuid) -> Result<()>;

    /// Windows that put the monitor into maintenance at `at`
    async fn active_maintenance(
        &self,
        monitor_id: Uuid,
        tags: &[String],
        at: DateTime<Utc>,
    ) -> Result<Vec<MonitorMaintenance>> {
        Ok(self
            .list_maintenance()
            .await?
            .into_iter()
            .filter(|w| maintenance::is_active(w, monitor_id, tags, at))
            .collect())
    }

    /// Stored settings, defaults when none were saved
    async fn get_settings(&self) -> Result<MonitorSettings>;

    async fn save_settings(&self, settings: &MonitorSettings) -> Result<()>;

    async fn list_channels(&self) -> Result<Vec<NotificationChannel>>;

    async fn get_channel(&self, id: Uuid) -> Result<Option<NotificationChannel>>;

    async fn save_channel(&self, channel: &NotificationChannel) -> Result<()>;

    async fn delete_channel(&self, id: Uuid) -> Result<()>;

    /// Active channels flagged as default
    async fn default_channels(&self) -> Result<Vec<NotificationChannel>> {
        Ok(self.list_channels().await?.into_iter().filter(|c| c.is_default && c.active).collect())
    }

    async fn channel_links(&self, monitor_id: Uuid) -> Result<Vec<MonitorChannelLink>>;

    async fn save_channel_link(&self, link: &MonitorChannelLink) -> Result<()>;

    async fn get_notification_state(&self, monitor_id: Uuid) -> Result<Option<MonitorNotificationState>>;

    async fn save_notification_state(&self, state: &MonitorNotificationState) -> Result<()>;

    async fn append_delivery(&self, delivery: &NotificationDelivery) -> Result<i64>;

    /// Delivery log of a monitor, oldest first
    async fn deliveries(&self, monitor_id: Uuid) -> Result<Vec<NotificationDelivery>>;
}

fn millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn opt_millis(at: Option<DateTime<Utc>>) -> Option<i64> {
    at.map(millis)
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn opt_from_millis(ms: Option<i64>) -> Option<DateTime<Utc>> {
    ms.map(from_millis)
}

fn to_json<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

fn from_json<T: DeserializeOwned>(raw: &str) -> Result<T> {
    Ok(serde_json::from_str(raw)?)
}

fn parse_uuid(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).with_context(|| format!("invalid uuid in database: {raw}"))
}

const MONITOR_COLUMNS: &str = "id, name, kind, target, interval_seconds, timeout_seconds, retries, retry_interval_seconds, accepted_status, keyword, tags, active, paused, sla_target, owner_id, automation, created_at, updated_at";

fn monitor_from_row(row: &Row) -> Result<Monitor> {
    let kind: String = row.get(2)?;
    Ok(Monitor {
        id: parse_uuid(&row.get::<String>(0)?)?,
        name: row.get(1)?,
        kind: MonitorKind::parse(&kind).ok_or_else(|| anyhow!("unknown monitor kind: {kind}"))?,
        target: row.get(3)?,
        interval_seconds: row.get::<i64>(4)? as u64,
        timeout_seconds: row.get::<i64>(5)? as u64,
        retries: row.get::<i64>(6)? as u32,
        retry_interval_seconds: row.get::<i64>(7)? as u64,
        accepted_status: from_json(&row.get::<String>(8)?)?,
        keyword: row.get(9)?,
        tags: from_json(&row.get::<String>(10)?)?,
        active: row.get::<i64>(11)? != 0,
        paused: row.get::<i64>(12)? != 0,
        sla_target: row.get(13)?,
        owner_id: row.get(14)?,
        automation: from_json(&row.get::<String>(15)?)?,
        created_at: from_millis(row.get(16)?),
        updated_at: from_millis(row.get(17)?),
    })
}

const STATE_COLUMNS: &str = "monitor_id, status, raw_status, maintenance, last_checked_at, last_up_at, last_down_at, last_latency_ms, last_status_code, last_error, uptime_24h, uptime_30d, avg_latency_24h_ms, tls_days_left, tls_not_after";

fn state_from_row(row: &Row) -> Result<MonitorState> {
    let status: String = row.get(1)?;
    let raw_status: String = row.get(2)?;
    Ok(MonitorState {
        monitor_id: parse_uuid(&row.get::<String>(0)?)?,
        status: Status::parse(&status).ok_or_else(|| anyhow!("unknown status: {status}"))?,
        raw_status: RawStatus::parse(&raw_status)
            .ok_or_else(|| anyhow!("unknown raw status: {raw_status}"))?,
        maintenance: row.get::<i64>(3)? != 0,
        last_checked_at: opt_from_millis(row.get(4)?),
        last_up_at: opt_from_millis(row.get(5)?),
        last_down_at: opt_from_millis(row.get(6)?),
        last_latency_ms: row.get::<Option<i64>>(7)?.map(|v| v as u64),
        last_status_code: row.get::<Option<i64>>(8)?.map(|v| v as u16),
        last_error: row.get(9)?,
        uptime_24h: row.get(10)?,
        uptime_30d: row.get(11)?,
        avg_latency_24h_ms: row.get(12)?,
        tls_days_left: row.get(13)?,
        tls_not_after: opt_from_millis(row.get(14)?),
    })
}

fn event_from_row(row: &Row) -> Result<MonitorEvent> {
    let kind: String = row.get(2)?;
    Ok(MonitorEvent {
        id: Some(row.get(0)?),
        monitor_id: parse_uuid(&row.get::<String>(1)?)?,
        kind: EventKind::parse(&kind).ok_or_else(|| anyhow!("unknown event kind: {kind}"))?,
        message: row.get(3)?,
        reference: row.get(4)?,
        created_at: from_millis(row.get(5)?),
    })
}

fn tls_from_row(row: &Row) -> Result<MonitorTls> {
    Ok(MonitorTls {
        monitor_id: parse_uuid(&row.get::<String>(0)?)?,
        not_before: from_millis(row.get(1)?),
        not_after: from_millis(row.get(2)?),
        subject: row.get(3)?,
        issuer: row.get(4)?,
        sans: from_json(&row.get::<String>(5)?)?,
        fingerprint_sha256: row.get(6)?,
        last_error: row.get(7)?,
        checked_at: from_millis(row.get(8)?),
    })
}

fn maintenance_from_row(row: &Row) -> Result<MonitorMaintenance> {
    Ok(MonitorMaintenance {
        id: parse_uuid(&row.get::<String>(0)?)?,
        name: row.get(1)?,
        monitor_id: row.get::<Option<String>>(2)?.map(|raw| parse_uuid(&raw)).transpose()?,
        monitor_ids: from_json(&row.get::<String>(3)?)?,
        tags: from_json(&row.get::<String>(4)?)?,
        schedule: from_json(&row.get::<String>(5)?)?,
        enabled: row.get::<i64>(6)? != 0,
        created_at: from_millis(row.get(7)?),
    })
}

const CHANNEL_COLUMNS: &str =
    "id, name, kind, destination, credential, template, quiet_hours, is_default, active, created_at";

fn channel_from_row(row: &Row) -> Result<NotificationChannel> {
    let kind: String = row.get(2)?;
    Ok(NotificationChannel {
        id: parse_uuid(&row.get::<String>(0)?)?,
        name: row.get(1)?,
        kind: ChannelKind::parse(&kind).ok_or_else(|| anyhow!("unknown channel kind: {kind}"))?,
        destination: row.get(3)?,
        credential: row.get(4)?,
        template: row.get(5)?,
        quiet_hours: row.get::<Option<String>>(6)?.map(|raw| from_json(&raw)).transpose()?,
        is_default: row.get::<i64>(7)? != 0,
        active: row.get::<i64>(8)? != 0,
        created_at: from_millis(row.get(9)?),
    })
}

fn notification_state_from_row(row: &Row) -> Result<MonitorNotificationState> {
    Ok(MonitorNotificationState {
        monitor_id: parse_uuid(&row.get::<String>(0)?)?,
        last_notified_at: opt_from_millis(row.get(1)?),
        last_down_notified_at: opt_from_millis(row.get(2)?),
        last_up_notified_at: opt_from_millis(row.get(3)?),
        last_tls_notified_at: opt_from_millis(row.get(4)?),
        last_maintenance_notified_at: opt_from_millis(row.get(5)?),
        down_started_at: opt_from_millis(row.get(6)?),
        down_sequence: row.get::<i64>(7)? as u64,
    })
}

fn delivery_from_row(row: &Row) -> Result<NotificationDelivery> {
    let kind: String = row.get(3)?;
    let outcome: String = row.get(4)?;
    Ok(NotificationDelivery {
        id: Some(row.get(0)?),
        monitor_id: parse_uuid(&row.get::<String>(1)?)?,
        channel_id: parse_uuid(&row.get::<String>(2)?)?,
        kind: NotificationKind::parse(&kind).ok_or_else(|| anyhow!("unknown notification kind: {kind}"))?,
        outcome: DeliveryOutcome::parse(&outcome)
            .ok_or_else(|| anyhow!("unknown delivery outcome: {outcome}"))?,
        preview: row.get(5)?,
        error: row.get(6)?,
        created_at: from_millis(row.get(7)?),
    })
}

/// LibSQL database implementation
pub struct DatabaseImpl {
    pool: LibsqlPool,
}

impl DatabaseImpl {
    /// Create a new database instance from a pool
    pub fn new_from_pool(pool: LibsqlPool) -> Self {
        Self { pool }
    }

    /// Open (or create) a local database file and bring its schema up to date
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_string_lossy().to_string();
        let database = libsql::Builder::new_local(&path).build().await?;
        let pool = LibsqlPool::builder(LibsqlManager::new(database))
            .config(deadpool::managed::PoolConfig::new(4))
            .build()?;

        let conn = pool.get().await?;
        super::initialize_database(&conn).await?;
        drop(conn);

        Ok(Self::new_from_pool(pool))
    }

    /// Get a connection from the pool
    async fn get_conn(&self) -> Result<deadpool::managed::Object<LibsqlManager>> {
        Ok(self.pool.get().await?)
    }

    async fn last_checked(&self) -> Result<HashMap<Uuid, DateTime<Utc>>> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query("SELECT monitor_id, last_checked_at FROM monitor_state WHERE last_checked_at IS NOT NULL", ())
            .await?;
        let mut checked = HashMap::new();
        while let Some(row) = rows.next().await? {
            checked.insert(parse_uuid(&row.get::<String>(0)?)?, from_millis(row.get(1)?));
        }
        Ok(checked)
    }
}

#[async_trait]
impl Database for DatabaseImpl {
    async fn list_monitors(&self) -> Result<Vec<Monitor>> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(&format!("SELECT {MONITOR_COLUMNS} FROM monitors ORDER BY created_at"), ())
            .await?;
        let mut monitors = Vec::new();
        while let Some(row) = rows.next().await? {
            monitors.push(monitor_from_row(&row)?);
        }
        Ok(monitors)
    }

    async fn get_monitor(&self, id: Uuid) -> Result<Option<Monitor>> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(&format!("SELECT {MONITOR_COLUMNS} FROM monitors WHERE id = ?"), params![id.to_string()])
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(monitor_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn save_monitor(&self, monitor: &Monitor) -> Result<()> {
        let conn = self.get_conn().await?;
        conn.execute(
            "INSERT INTO monitors (id, name, kind, target, interval_seconds, timeout_seconds, retries, retry_interval_seconds, accepted_status, keyword, tags, active, paused, sla_target, owner_id, automation, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name, kind = excluded.kind, target = excluded.target,
                interval_seconds = excluded.interval_seconds, timeout_seconds = excluded.timeout_seconds,
                retries = excluded.retries, retry_interval_seconds = excluded.retry_interval_seconds,
                accepted_status = excluded.accepted_status, keyword = excluded.keyword, tags = excluded.tags,
                active = excluded.active, paused = excluded.paused, sla_target = excluded.sla_target,
                owner_id = excluded.owner_id, automation = excluded.automation, updated_at = excluded.updated_at",
            params![
                monitor.id.to_string(),
                monitor.name.clone(),
                monitor.kind.as_str(),
                monitor.target.clone(),
                monitor.interval_seconds as i64,
                monitor.timeout_seconds as i64,
                monitor.retries as i64,
                monitor.retry_interval_seconds as i64,
                to_json(&monitor.accepted_status)?,
                monitor.keyword.clone(),
                to_json(&monitor.tags)?,
                monitor.active as i64,
                monitor.paused as i64,
                monitor.sla_target,
                monitor.owner_id.clone(),
                to_json(&monitor.automation)?,
                millis(monitor.created_at),
                millis(monitor.updated_at)
            ],
        )
        .await?;
        Ok(())
    }

    async fn delete_monitor(&self, id: Uuid) -> Result<()> {
        let conn = self.get_conn().await?;
        let id = id.to_string();
        conn.execute("DELETE FROM monitors WHERE id = ?", params![id.clone()]).await?;
        conn.execute("DELETE FROM monitor_state WHERE monitor_id = ?", params![id.clone()]).await?;
        conn.execute("DELETE FROM monitor_tls WHERE monitor_id = ?", params![id.clone()]).await?;
        conn.execute("DELETE FROM monitor_notification_state WHERE monitor_id = ?", params![id.clone()])
            .await?;
        conn.execute("DELETE FROM monitor_notification_channels WHERE monitor_id = ?", params![id])
            .await?;
        Ok(())
    }

    async fn set_monitor_paused(&self, id: Uuid, paused: bool) -> Result<bool> {
        let conn = self.get_conn().await?;
        let changed = conn
            .execute(
                "UPDATE monitors SET paused = ?, updated_at = ? WHERE id = ?",
                params![paused as i64, millis(Utc::now()), id.to_string()],
            )
            .await?;
        Ok(changed > 0)
    }

    async fn due_monitors(&self, now: DateTime<Utc>, default_interval_seconds: u64) -> Result<Vec<Monitor>> {
        let checked = self.last_checked().await?;
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                &format!("SELECT {MONITOR_COLUMNS} FROM monitors WHERE active = 1 AND paused = 0 ORDER BY created_at"),
                (),
            )
            .await?;
        let mut due = Vec::new();
        while let Some(row) = rows.next().await? {
            let monitor = monitor_from_row(&row)?;
            if is_due(&monitor, checked.get(&monitor.id).copied(), now, default_interval_seconds) {
                due.push(monitor);
            }
        }
        Ok(due)
    }

    async fn get_state(&self, monitor_id: Uuid) -> Result<Option<MonitorState>> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                &format!("SELECT {STATE_COLUMNS} FROM monitor_state WHERE monitor_id = ?"),
                params![monitor_id.to_string()],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(state_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn save_state(&self, state: &MonitorState) -> Result<()> {
        let conn = self.get_conn().await?;
        conn.execute(
            &format!(
                "INSERT OR REPLACE INTO monitor_state ({STATE_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
            ),
            params![
                state.monitor_id.to_string(),
                state.status.as_str(),
                state.raw_status.as_str(),
                state.maintenance as i64,
                opt_millis(state.last_checked_at),
                opt_millis(state.last_up_at),
                opt_millis(state.last_down_at),
                state.last_latency_ms.map(|v| v as i64),
                state.last_status_code.map(|v| v as i64),
                state.last_error.clone(),
                state.uptime_24h,
                state.uptime_30d,
                state.avg_latency_24h_ms,
                state.tls_days_left,
                opt_millis(state.tls_not_after)
            ],
        )
        .await?;
        Ok(())
    }

    async fn append_metric(&self, metric: &MonitorMetric) -> Result<i64> {
        let conn = self.get_conn().await?;
        conn.execute(
            "INSERT INTO monitor_metrics (monitor_id, checked_at, ok, latency_ms, status_code, error) VALUES (?, ?, ?, ?, ?, ?)",
            params![
                metric.monitor_id.to_string(),
                millis(metric.checked_at),
                metric.ok as i64,
                metric.latency_ms as i64,
                metric.status_code.map(|v| v as i64),
                metric.error.clone()
            ],
        )
        .await?;
        Ok(conn.last_insert_rowid())
    }

    async fn metric_summary(&self, monitor_id: Uuid, since: DateTime<Utc>) -> Result<MetricSummary> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                "SELECT COUNT(*), COALESCE(SUM(ok), 0), AVG(CASE WHEN ok = 1 THEN latency_ms END)
                 FROM monitor_metrics WHERE monitor_id = ? AND checked_at >= ?",
                params![monitor_id.to_string(), millis(since)],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(MetricSummary {
                total: row.get::<i64>(0)? as u64,
                successful: row.get::<i64>(1)? as u64,
                avg_latency_ms: row.get::<Option<f64>>(2)?.unwrap_or(0.0),
            }),
            None => Ok(MetricSummary::default()),
        }
    }

    async fn delete_metrics_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let conn = self.get_conn().await?;
        let deleted = conn
            .execute("DELETE FROM monitor_metrics WHERE checked_at < ?", params![millis(cutoff)])
            .await?;
        Ok(deleted)
    }

    async fn append_event(&self, event: &MonitorEvent) -> Result<i64> {
        let conn = self.get_conn().await?;
        conn.execute(
            "INSERT INTO monitor_events (monitor_id, kind, message, reference, created_at) VALUES (?, ?, ?, ?, ?)",
            params![
                event.monitor_id.to_string(),
                event.kind.as_str(),
                event.message.clone(),
                event.reference.clone(),
                millis(event.created_at)
            ],
        )
        .await?;
        Ok(conn.last_insert_rowid())
    }

    async fn events_since(&self, monitor_id: Uuid, since: DateTime<Utc>) -> Result<Vec<MonitorEvent>> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                "SELECT id, monitor_id, kind, message, reference, created_at FROM monitor_events
                 WHERE monitor_id = ? AND created_at >= ? ORDER BY created_at, id",
                params![monitor_id.to_string(), millis(since)],
            )
            .await?;
        let mut events = Vec::new();
        while let Some(row) = rows.next().await? {
            events.push(event_from_row(&row)?);
        }
        Ok(events)
    }

    async fn get_tls(&self, monitor_id: Uuid) -> Result<Option<MonitorTls>> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                "SELECT monitor_id, not_before, not_after, subject, issuer, sans, fingerprint_sha256, last_error, checked_at
                 FROM monitor_tls WHERE monitor_id = ?",
                params![monitor_id.to_string()],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(tls_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn save_tls(&self, tls: &MonitorTls) -> Result<()> {
        let conn = self.get_conn().await?;
        conn.execute(
            "INSERT OR REPLACE INTO monitor_tls (monitor_id, not_before, not_after, subject, issuer, sans, fingerprint_sha256, last_error, checked_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                tls.monitor_id.to_string(),
                millis(tls.not_before),
                millis(tls.not_after),
                tls.subject.clone(),
                tls.issuer.clone(),
                to_json(&tls.sans)?,
                tls.fingerprint_sha256.clone(),
                tls.last_error.clone(),
                millis(tls.checked_at)
            ],
        )
        .await?;
        Ok(())
    }

    async fn list_maintenance(&self) -> Result<Vec<MonitorMaintenance>> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                "SELECT id, name, monitor_id, monitor_ids, tags, schedule, enabled, created_at
                 FROM monitor_maintenance ORDER BY created_at",
                (),
            )
            .await?;
        let mut windows = Vec::new();
        while let Some(row) = rows.next().await? {
            windows.push(maintenance_from_row(&row)?);
        }
        Ok(windows)
    }

    async fn save_maintenance(&self, window: &MonitorMaintenance) -> Result<()> {
        let conn = self.get_conn().await?;
        conn.execute(
            "INSERT OR REPLACE INTO monitor_maintenance (id, name, monitor_id, monitor_ids, tags, schedule, enabled, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                window.id.to_string(),
                window.name.clone(),
                window.monitor_id.map(|id| id.to_string()),
                to_json(&window.monitor_ids)?,
                to_json(&window.tags)?,
                to_json(&window.schedule)?,
                window.enabled as i64,
                millis(window.created_at)
            ],
        )
        .await?;
        Ok(())
    }

    async fn delete_maintenance(&self, id: Uuid) -> Result<()> {
        let conn = self.get_conn().await?;
        conn.execute("DELETE FROM monitor_maintenance WHERE id = ?", params![id.to_string()]).await?;
        Ok(())
    }

    async fn get_settings(&self) -> Result<MonitorSettings> {
        let conn = self.get_conn().await?;
        let mut rows = conn.query("SELECT data FROM monitor_settings WHERE id = 1", ()).await?;
        match rows.next().await? {
            Some(row) => from_json(&row.get::<String>(0)?),
            None => Ok(MonitorSettings::default()),
        }
    }

    async fn save_settings(&self, settings: &MonitorSettings) -> Result<()> {
        let conn = self.get_conn().await?;
        conn.execute(
            "INSERT OR REPLACE INTO monitor_settings (id, data, updated_at) VALUES (1, ?, ?)",
            params![to_json(settings)?, millis(Utc::now())],
        )
        .await?;
        Ok(())
    }

    async fn list_channels(&self) -> Result<Vec<NotificationChannel>> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(&format!("SELECT {CHANNEL_COLUMNS} FROM notification_channels ORDER BY created_at"), ())
            .await?;
        let mut channels = Vec::new();
        while let Some(row) = rows.next().await? {
            channels.push(channel_from_row(&row)?);
        }
        Ok(channels)
    }

    async fn get_channel(&self, id: Uuid) -> Result<Option<NotificationChannel>> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                &format!("SELECT {CHANNEL_COLUMNS} FROM notification_channels WHERE id = ?"),
                params![id.to_string()],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(channel_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn save_channel(&self, channel: &NotificationChannel) -> Result<()> {
        let conn = self.get_conn().await?;
        let quiet_hours = match &channel.quiet_hours {
            Some(hours) => Some(to_json(hours)?),
            None => None,
        };
        conn.execute(
            &format!("INSERT OR REPLACE INTO notification_channels ({CHANNEL_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"),
            params![
                channel.id.to_string(),
                channel.name.clone(),
                channel.kind.as_str(),
                channel.destination.clone(),
                channel.credential.clone(),
                channel.template.clone(),
                quiet_hours,
                channel.is_default as i64,
                channel.active as i64,
                millis(channel.created_at)
            ],
        )
        .await?;
        Ok(())
    }

    async fn delete_channel(&self, id: Uuid) -> Result<()> {
        let conn = self.get_conn().await?;
        conn.execute("DELETE FROM notification_channels WHERE id = ?", params![id.to_string()]).await?;
        conn.execute("DELETE FROM monitor_notification_channels WHERE channel_id = ?", params![id.to_string()])
            .await?;
        Ok(())
    }

    async fn default_channels(&self) -> Result<Vec<NotificationChannel>> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {CHANNEL_COLUMNS} FROM notification_channels WHERE is_default = 1 AND active = 1 ORDER BY created_at"
                ),
                (),
            )
            .await?;
        let mut channels = Vec::new();
        while let Some(row) = rows.next().await? {
            channels.push(channel_from_row(&row)?);
        }
        Ok(channels)
    }

    async fn channel_links(&self, monitor_id: Uuid) -> Result<Vec<MonitorChannelLink>> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                "SELECT monitor_id, channel_id, enabled FROM monitor_notification_channels WHERE monitor_id = ?",
                params![monitor_id.to_string()],
            )
            .await?;
        let mut links = Vec::new();
        while let Some(row) = rows.next().await? {
            links.push(MonitorChannelLink {
                monitor_id: parse_uuid(&row.get::<String>(0)?)?,
                channel_id: parse_uuid(&row.get::<String>(1)?)?,
                enabled: row.get::<i64>(2)? != 0,
            });
        }
        Ok(links)
    }

    async fn save_channel_link(&self, link: &MonitorChannelLink) -> Result<()> {
        let conn = self.get_conn().await?;
        conn.execute(
            "INSERT OR REPLACE INTO monitor_notification_channels (monitor_id, channel_id, enabled) VALUES (?, ?, ?)",
            params![link.monitor_id.to_string(), link.channel_id.to_string(), link.enabled as i64],
        )
        .await?;
        Ok(())
    }

    async fn get_notification_state(&self, monitor_id: Uuid) -> Result<Option<MonitorNotificationState>> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                "SELECT monitor_id, last_notified_at, last_down_notified_at, last_up_notified_at, last_tls_notified_at,
                        last_maintenance_notified_at, down_started_at, down_sequence
                 FROM monitor_notification_state WHERE monitor_id = ?",
                params![monitor_id.to_string()],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(notification_state_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn save_notification_state(&self, state: &MonitorNotificationState) -> Result<()> {
        let conn = self.get_conn().await?;
        conn.execute(
            "INSERT OR REPLACE INTO monitor_notification_state (monitor_id, last_notified_at, last_down_notified_at,
                last_up_notified_at, last_tls_notified_at, last_maintenance_notified_at, down_started_at, down_sequence)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                state.monitor_id.to_string(),
                opt_millis(state.last_notified_at),
                opt_millis(state.last_down_notified_at),
                opt_millis(state.last_up_notified_at),
                opt_millis(state.last_tls_notified_at),
                opt_millis(state.last_maintenance_notified_at),
                opt_millis(state.down_started_at),
                state.down_sequence as i64
            ],
        )
        .await?;
        Ok(())
    }

    async fn append_delivery(&self, delivery: &NotificationDelivery) -> Result<i64> {
        let conn = self.get_conn().await?;
        conn.execute(
            "INSERT INTO notification_deliveries (monitor_id, channel_id, kind, outcome, preview, error, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![
                delivery.monitor_id.to_string(),
                delivery.channel_id.to_string(),
                delivery.kind.as_str(),
                delivery.outcome.as_str(),
                delivery.preview.clone(),
                delivery.error.clone(),
                millis(delivery.created_at)
            ],
        )
        .await?;
        Ok(conn.last_insert_rowid())
    }

    async fn deliveries(&self, monitor_id: Uuid) -> Result<Vec<NotificationDelivery>> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                "SELECT id, monitor_id, channel_id, kind, outcome, preview, error, created_at
                 FROM notification_deliveries WHERE monitor_id = ? ORDER BY created_at, id",
                params![monitor_id.to_string()],
            )
            .await?;
        let mut deliveries = Vec::new();
        while let Some(row) = rows.next().await? {
            deliveries.push(delivery_from_row(&row)?);
        }
        Ok(deliveries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MaintenanceSchedule, MonitorKind};
    use chrono::Duration;
    use tempfile::tempdir;

    async fn open_temp() -> Result<(DatabaseImpl, tempfile::TempDir)> {
        let dir = tempdir()?;
        let database = DatabaseImpl::open(dir.path().join("engine.db")).await?;
        Ok((database, dir))
    }

    #[tokio::test]
    async fn monitor_roundtrip_and_due_list() -> Result<()> {
        let (database, _dir) = open_temp().await?;
        let now = Utc::now();

        let mut monitor = Monitor::new("api", MonitorKind::Http, "https://example.com/health");
        monitor.tags = vec!["edge".to_string()];
        monitor.automation.ticket_on_down = true;
        database.save_monitor(&monitor).await?;

        let loaded = database.get_monitor(monitor.id).await?.expect("monitor stored");
        assert_eq!(loaded.tags, monitor.tags);
        assert!(loaded.automation.ticket_on_down);
        assert_eq!(loaded.kind, MonitorKind::Http);

        assert_eq!(database.due_monitors(now, 60).await?.len(), 1);

        let mut state = MonitorState::new(monitor.id);
        state.last_checked_at = Some(now - Duration::seconds(30));
        database.save_state(&state).await?;
        assert!(database.due_monitors(now, 60).await?.is_empty());

        state.last_checked_at = Some(now - Duration::seconds(61));
        database.save_state(&state).await?;
        assert_eq!(database.due_monitors(now, 60).await?.len(), 1);

        assert!(database.set_monitor_paused(monitor.id, true).await?);
        assert!(database.due_monitors(now, 60).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn metric_summary_and_retention() -> Result<()> {
        let (database, _dir) = open_temp().await?;
        let id = Uuid::new_v4();
        let now = Utc::now();

        for (age_hours, ok, latency) in [(1, true, 100), (2, false, 0), (3, true, 300), (48, true, 50)] {
            database
                .append_metric(&MonitorMetric {
                    id: None,
                    monitor_id: id,
                    checked_at: now - Duration::hours(age_hours),
                    ok,
                    latency_ms: latency,
                    status_code: None,
                    error: None,
                })
                .await?;
        }

        let day = database.metric_summary(id, now - Duration::hours(24)).await?;
        assert_eq!(day.total, 3);
        assert_eq!(day.successful, 2);
        assert_eq!(day.avg_latency_ms, 200.0);

        let empty = database.metric_summary(Uuid::new_v4(), now - Duration::hours(24)).await?;
        assert_eq!(empty.total, 0);
        assert_eq!(empty.uptime_percent(), 0.0);

        assert_eq!(database.delete_metrics_before(now - Duration::hours(24)).await?, 1);
        Ok(())
    }

    #[tokio::test]
    async fn settings_default_until_saved() -> Result<()> {
        let (database, _dir) = open_temp().await?;
        assert_eq!(database.get_settings().await?, MonitorSettings::default());

        let settings = MonitorSettings { max_concurrent_checks: 3, ..MonitorSettings::default() };
        database.save_settings(&settings).await?;
        assert_eq!(database.get_settings().await?.max_concurrent_checks, 3);
        Ok(())
    }

    #[tokio::test]
    async fn active_maintenance_uses_scope_and_schedule() -> Result<()> {
        let (database, _dir) = open_temp().await?;
        let now = Utc::now();
        let monitor = Uuid::new_v4();

        let window = MonitorMaintenance::new(
            "db upgrade",
            MaintenanceSchedule::Once { starts_at: now - Duration::minutes(5), ends_at: now + Duration::minutes(5) },
        )
        .for_tags(["db"]);
        database.save_maintenance(&window).await?;

        let tags = vec!["db".to_string()];
        assert_eq!(database.active_maintenance(monitor, &tags, now).await?.len(), 1);
        assert!(database.active_maintenance(monitor, &[], now).await?.is_empty());
        assert!(database.active_maintenance(monitor, &tags, now + Duration::minutes(10)).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn default_channels_exclude_inactive() -> Result<()> {
        let (database, _dir) = open_temp().await?;
        let mut primary = NotificationChannel::new("ops", ChannelKind::Telegram, "-100", "sealed");
        primary.is_default = true;
        let mut retired = NotificationChannel::new("old", ChannelKind::Telegram, "-200", "sealed");
        retired.is_default = true;
        retired.active = false;
        database.save_channel(&primary).await?;
        database.save_channel(&retired).await?;

        let defaults = database.default_channels().await?;
        assert_eq!(defaults.len(), 1);
        assert_eq!(defaults[0].id, primary.id);
        Ok(())
    }
}
