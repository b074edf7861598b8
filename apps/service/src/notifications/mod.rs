//! Alert delivery with deduplication, suppression windows and quiet hours.

pub mod quiet_hours;
pub mod telegram;

pub use telegram::TelegramSender;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::crypto::SecretBox;
use crate::database::Database;
use crate::models::{
    ChannelKind, DeliveryOutcome, MonitorNotificationState, NotificationChannel, NotificationDelivery,
    NotificationKind,
};
use crate::orchestrator::state::TransitionContext;

/// Longest delivery preview kept in the log
pub const PREVIEW_CHARS: usize = 240;

/// Outbound message transport
#[async_trait]
pub trait MessageSender: Send + Sync {
    fn supports(&self, kind: ChannelKind) -> bool;

    /// Deliver `text` to the channel destination using the opened credential
    async fn send(&self, channel: &NotificationChannel, credential: &str, text: &str) -> Result<()>;
}

/// Categories in evaluation order
const RULES: [NotificationKind; 4] =
    [NotificationKind::Maintenance, NotificationKind::Down, NotificationKind::Up, NotificationKind::Tls];

/// Whether `at` is unset or older than the suppression window
fn outside_window(at: Option<DateTime<Utc>>, now: DateTime<Utc>, window: Duration) -> bool {
    at.is_none_or(|at| now - at >= window)
}

/// No down notice was sent for the outage in progress
pub fn outage_unannounced(state: &MonitorNotificationState) -> bool {
    match (state.last_down_notified_at, state.last_up_notified_at) {
        (None, _) => true,
        (Some(down), Some(up)) => up > down,
        (Some(_), None) => false,
    }
}

/// The outage that just ended was announced
pub fn recovery_announceable(state: &MonitorNotificationState) -> bool {
    match (state.last_down_notified_at, state.last_up_notified_at) {
        (Some(down), Some(up)) => down > up,
        (Some(_), None) => true,
        (None, _) => false,
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

fn render(channel: &NotificationChannel, message: &str) -> String {
    match &channel.template {
        Some(template) if !template.trim().is_empty() => template.replace("{message}", message),
        _ => message.to_string(),
    }
}

/// Message for `kind` when the transition calls for one
fn compose(kind: NotificationKind, ctx: &TransitionContext<'_>, state: &MonitorNotificationState) -> Option<String> {
    let monitor = ctx.monitor;
    match kind {
        NotificationKind::Maintenance if ctx.maintenance_toggled() && ctx.settings.notify_maintenance => {
            let verb = if ctx.next.maintenance { "entered" } else { "left" };
            Some(format!("[MAINTENANCE] {} {} maintenance", monitor.name, verb))
        }
        NotificationKind::Down if ctx.went_down() && outage_unannounced(state) => {
            let detail = ctx
                .next
                .last_error
                .clone()
                .or_else(|| ctx.next.last_status_code.map(|c| format!("HTTP {}", c)))
                .unwrap_or_else(|| "check failed".to_string());
            Some(format!("[DOWN] {} ({}) is down: {}", monitor.name, monitor.target, detail))
        }
        NotificationKind::Up if ctx.recovered() && recovery_announceable(state) => {
            let outage = state
                .down_started_at
                .map(|started| format!(" after {} min", (ctx.now - started).num_minutes()))
                .unwrap_or_default();
            Some(format!("[UP] {} ({}) recovered{}", monitor.name, monitor.target, outage))
        }
        NotificationKind::Tls if ctx.tls_incident_crossed() && monitor.automation.notify_tls => {
            let days = ctx.next.tls_days_left.unwrap_or_default();
            Some(format!("[TLS] Certificate for {} ({}) expires in {} days", monitor.name, monitor.target, days))
        }
        _ => None,
    }
}

/// Notification dispatcher
pub struct Notifier {
    database: Arc<dyn Database>,
    sender: Option<Arc<dyn MessageSender>>,
    secrets: Option<Arc<dyn SecretBox>>,
}

impl Notifier {
    pub fn new(
        database: Arc<dyn Database>,
        sender: Option<Arc<dyn MessageSender>>,
        secrets: Option<Arc<dyn SecretBox>>,
    ) -> Self {
        Self { database, sender, secrets }
    }

    /// Evaluate every category for one transition and deliver what is due
    pub async fn dispatch(&self, ctx: &TransitionContext<'_>) {
        let (Some(sender), Some(secrets)) = (&self.sender, &self.secrets) else {
            return;
        };
        let monitor = ctx.monitor;
        if monitor.paused {
            return;
        }
        let toggled = ctx.maintenance_toggled();
        if ctx.next.maintenance && !toggled {
            return;
        }

        let mut state = match self.database.get_notification_state(monitor.id).await {
            Ok(state) => state.unwrap_or_else(|| MonitorNotificationState::new(monitor.id)),
            Err(e) => {
                warn!(monitor = %monitor.id, "Failed to load notification state: {}", e);
                return;
            }
        };
        let before = state.clone();

        if ctx.went_down() {
            state.down_started_at = Some(ctx.now);
            state.down_sequence += 1;
        }

        let window = Duration::minutes(ctx.settings.notify_suppress_minutes as i64);
        let mut channels: Option<Vec<NotificationChannel>> = None;

        for kind in RULES {
            if ctx.next.maintenance && kind != NotificationKind::Maintenance {
                continue;
            }
            let Some(message) = compose(kind, ctx, &state) else {
                continue;
            };
            if !outside_window(state.last_notified_at, ctx.now, window)
                || !outside_window(state.last_sent(kind), ctx.now, window)
            {
                debug!(monitor = %monitor.id, kind = kind.as_str(), "Notification inside suppression window");
                continue;
            }

            if channels.is_none() {
                channels = Some(self.resolve_channels(ctx).await);
            }
            let targets = channels.as_deref().unwrap_or_default();
            if self.deliver(sender.as_ref(), secrets.as_ref(), ctx, kind, &message, targets).await {
                state.mark_sent(kind, ctx.now);
            }
        }

        if ctx.recovered() {
            state.down_started_at = None;
        }

        if state != before {
            if let Err(e) = self.database.save_notification_state(&state).await {
                warn!(monitor = %monitor.id, "Failed to save notification state: {}", e);
            }
        }
    }

    /// Linked channels when any are enabled, otherwise the active defaults
    async fn resolve_channels(&self, ctx: &TransitionContext<'_>) -> Vec<NotificationChannel> {
        let monitor_id = ctx.monitor.id;
        let links = match self.database.channel_links(monitor_id).await {
            Ok(links) => links,
            Err(e) => {
                warn!(monitor = %monitor_id, "Failed to load channel links: {}", e);
                Vec::new()
            }
        };

        let mut linked = Vec::new();
        for link in links.iter().filter(|l| l.enabled) {
            match self.database.get_channel(link.channel_id).await {
                Ok(Some(channel)) if channel.active => linked.push(channel),
                Ok(_) => {}
                Err(e) => warn!(monitor = %monitor_id, channel = %link.channel_id, "Failed to load channel: {}", e),
            }
        }
        if links.iter().any(|l| l.enabled) {
            return linked;
        }

        self.database.default_channels().await.unwrap_or_else(|e| {
            warn!(monitor = %monitor_id, "Failed to load default channels: {}", e);
            Vec::new()
        })
    }

    /// Deliver to every eligible channel, true when at least one accepted
    async fn deliver(
        &self,
        sender: &dyn MessageSender,
        secrets: &dyn SecretBox,
        ctx: &TransitionContext<'_>,
        kind: NotificationKind,
        message: &str,
        channels: &[NotificationChannel],
    ) -> bool {
        let mut delivered = false;

        for channel in channels.iter().filter(|c| c.active && sender.supports(c.kind)) {
            let text = render(channel, message);
            let mut record = NotificationDelivery {
                id: None,
                monitor_id: ctx.monitor.id,
                channel_id: channel.id,
                kind,
                outcome: DeliveryOutcome::Sent,
                preview: truncate(&text, PREVIEW_CHARS),
                error: None,
                created_at: ctx.now,
            };

            if channel.quiet_hours.as_ref().is_some_and(|q| quiet_hours::is_quiet(q, ctx.now)) {
                debug!(channel = %channel.name, "Quiet hours, withholding notification");
                record.outcome = DeliveryOutcome::Suppressed;
                self.log_delivery(&record).await;
                continue;
            }

            let outcome = match secrets.open(&channel.credential) {
                Ok(credential) => {
                    let credential = String::from_utf8_lossy(&credential);
                    sender.send(channel, &credential, &text).await
                }
                Err(e) => Err(anyhow::Error::new(e).context("failed to open channel credential")),
            };

            match outcome {
                Ok(()) => {
                    delivered = true;
                    info!(
                        target: "uppe::audit",
                        monitor = %ctx.monitor.id,
                        channel = %channel.name,
                        kind = kind.as_str(),
                        "Notification sent"
                    );
                }
                Err(e) => {
                    warn!(monitor = %ctx.monitor.id, channel = %channel.name, "Notification failed: {:#}", e);
                    record.outcome = DeliveryOutcome::Failed;
                    record.error = Some(format!("{:#}", e));
                }
            }
            self.log_delivery(&record).await;
        }

        delivered
    }

    async fn log_delivery(&self, record: &NotificationDelivery) {
        if let Err(e) = self.database.append_delivery(record).await {
            warn!(monitor = %record.monitor_id, "Failed to log notification delivery: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn state(down: Option<i64>, up: Option<i64>) -> MonitorNotificationState {
        let base = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let mut state = MonitorNotificationState::new(Uuid::new_v4());
        state.last_down_notified_at = down.map(|m| base + Duration::minutes(m));
        state.last_up_notified_at = up.map(|m| base + Duration::minutes(m));
        state
    }

    #[test]
    fn outage_announcement_pairing() {
        assert!(outage_unannounced(&state(None, None)));
        assert!(!outage_unannounced(&state(Some(0), None)));
        assert!(outage_unannounced(&state(Some(0), Some(5))));
        assert!(!outage_unannounced(&state(Some(10), Some(5))));

        assert!(!recovery_announceable(&state(None, None)));
        assert!(!recovery_announceable(&state(None, Some(5))));
        assert!(recovery_announceable(&state(Some(0), None)));
        assert!(recovery_announceable(&state(Some(10), Some(5))));
        assert!(!recovery_announceable(&state(Some(0), Some(5))));
    }

    #[test]
    fn suppression_window() {
        let now = Utc::now();
        let window = Duration::minutes(10);
        assert!(outside_window(None, now, window));
        assert!(!outside_window(Some(now - Duration::minutes(3)), now, window));
        assert!(outside_window(Some(now - Duration::minutes(10)), now, window));
    }

    #[test]
    fn preview_is_truncated_by_characters() {
        let long = "é".repeat(300);
        assert_eq!(truncate(&long, PREVIEW_CHARS).chars().count(), PREVIEW_CHARS);
        assert_eq!(truncate("short", PREVIEW_CHARS), "short");
    }

    #[test]
    fn template_substitution() {
        let mut channel = NotificationChannel::new("ops", ChannelKind::Telegram, "42", "sealed");
        assert_eq!(render(&channel, "hello"), "hello");
        channel.template = Some("Alert: {message}".to_string());
        assert_eq!(render(&channel, "hello"), "Alert: hello");
    }
}
