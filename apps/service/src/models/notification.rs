use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Delivery transport of a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Telegram,
    Slack,
    Webhook,
    Email,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Telegram => "telegram",
            ChannelKind::Slack => "slack",
            ChannelKind::Webhook => "webhook",
            ChannelKind::Email => "email",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "telegram" => Some(ChannelKind::Telegram),
            "slack" => Some(ChannelKind::Slack),
            "webhook" => Some(ChannelKind::Webhook),
            "email" => Some(ChannelKind::Email),
            _ => None,
        }
    }
}

/// Local time-of-day range during which a channel stays silent
///
/// `start == end` means always quiet, `start > end` wraps past midnight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuietHours {
    pub start: NaiveTime,
    pub end: NaiveTime,
    /// IANA timezone name, UTC when empty
    pub timezone: String,
}

/// A configured delivery target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationChannel {
    pub id: Uuid,
    pub name: String,
    pub kind: ChannelKind,
    /// Chat id, address or URL depending on the kind
    pub destination: String,
    /// Sealed credential, opened with the secret box right before delivery
    pub credential: String,
    /// Message template with a `{message}` placeholder
    pub template: Option<String>,
    pub quiet_hours: Option<QuietHours>,
    pub is_default: bool,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl NotificationChannel {
    pub fn new(
        name: impl Into<String>,
        kind: ChannelKind,
        destination: impl Into<String>,
        credential: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            kind,
            destination: destination.into(),
            credential: credential.into(),
            template: None,
            quiet_hours: None,
            is_default: false,
            active: true,
            created_at: Utc::now(),
        }
    }
}

/// Monitor-specific channel subscription
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorChannelLink {
    pub monitor_id: Uuid,
    pub channel_id: Uuid,
    pub enabled: bool,
}

/// Category of an alert, each with its own dedup timestamp
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Down,
    Up,
    Tls,
    Maintenance,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Down => "down",
            NotificationKind::Up => "up",
            NotificationKind::Tls => "tls",
            NotificationKind::Maintenance => "maintenance",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "down" => Some(NotificationKind::Down),
            "up" => Some(NotificationKind::Up),
            "tls" => Some(NotificationKind::Tls),
            "maintenance" => Some(NotificationKind::Maintenance),
            _ => None,
        }
    }
}

/// Per-monitor dedup bookkeeping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorNotificationState {
    pub monitor_id: Uuid,
    pub last_notified_at: Option<DateTime<Utc>>,
    pub last_down_notified_at: Option<DateTime<Utc>>,
    pub last_up_notified_at: Option<DateTime<Utc>>,
    pub last_tls_notified_at: Option<DateTime<Utc>>,
    pub last_maintenance_notified_at: Option<DateTime<Utc>>,
    /// Start of the current outage cycle
    pub down_started_at: Option<DateTime<Utc>>,
    /// Number of outage cycles seen
    pub down_sequence: u64,
}

impl MonitorNotificationState {
    pub fn new(monitor_id: Uuid) -> Self {
        Self {
            monitor_id,
            last_notified_at: None,
            last_down_notified_at: None,
            last_up_notified_at: None,
            last_tls_notified_at: None,
            last_maintenance_notified_at: None,
            down_started_at: None,
            down_sequence: 0,
        }
    }

    pub fn last_sent(&self, kind: NotificationKind) -> Option<DateTime<Utc>> {
        match kind {
            NotificationKind::Down => self.last_down_notified_at,
            NotificationKind::Up => self.last_up_notified_at,
            NotificationKind::Tls => self.last_tls_notified_at,
            NotificationKind::Maintenance => self.last_maintenance_notified_at,
        }
    }

    pub fn mark_sent(&mut self, kind: NotificationKind, at: DateTime<Utc>) {
        self.last_notified_at = Some(at);
        let slot = match kind {
            NotificationKind::Down => &mut self.last_down_notified_at,
            NotificationKind::Up => &mut self.last_up_notified_at,
            NotificationKind::Tls => &mut self.last_tls_notified_at,
            NotificationKind::Maintenance => &mut self.last_maintenance_notified_at,
        };
        *slot = Some(at);
    }
}

/// Outcome of one delivery attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryOutcome {
    Sent,
    Failed,
    Suppressed,
}

impl DeliveryOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryOutcome::Sent => "sent",
            DeliveryOutcome::Failed => "failed",
            DeliveryOutcome::Suppressed => "suppressed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "sent" => Some(DeliveryOutcome::Sent),
            "failed" => Some(DeliveryOutcome::Failed),
            "suppressed" => Some(DeliveryOutcome::Suppressed),
            _ => None,
        }
    }
}

/// Delivery log entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationDelivery {
    pub id: Option<i64>,
    pub monitor_id: Uuid,
    pub channel_id: Uuid,
    pub kind: NotificationKind,
    pub outcome: DeliveryOutcome,
    pub preview: String,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}
