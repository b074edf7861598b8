//! Turns probe results into persisted state, statistics and events.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::automation::Automation;
use super::maintenance;
use super::tls;
use crate::clock::Clock;
use crate::database::Database;
use crate::models::{
    CheckResult, EventKind, Monitor, MonitorEvent, MonitorMetric, MonitorSettings, MonitorState,
    MonitorTls, RawStatus, Status,
};
use crate::notifications::Notifier;

/// Everything automation and notification passes see about one transition
#[derive(Debug, Clone, Copy)]
pub struct TransitionContext<'a> {
    pub monitor: &'a Monitor,
    pub previous: Option<&'a MonitorState>,
    /// The state about to be saved
    pub next: &'a MonitorState,
    pub raw_status: RawStatus,
    pub settings: &'a MonitorSettings,
    pub tls: Option<&'a MonitorTls>,
    pub now: DateTime<Utc>,
}

impl TransitionContext<'_> {
    pub fn previous_raw(&self) -> Option<RawStatus> {
        self.previous.map(|p| p.raw_status)
    }

    /// Raw status moved from anything but down to down
    pub fn went_down(&self) -> bool {
        self.raw_status == RawStatus::Down && self.previous_raw() != Some(RawStatus::Down)
    }

    /// Raw status moved from down to up
    pub fn recovered(&self) -> bool {
        self.raw_status == RawStatus::Up && self.previous_raw() == Some(RawStatus::Down)
    }

    pub fn maintenance_toggled(&self) -> bool {
        self.previous.is_some_and(|p| p.maintenance) != self.next.maintenance
    }

    pub fn previous_tls_days(&self) -> Option<i64> {
        self.previous.and_then(|p| p.tls_days_left)
    }

    /// Days-left crossed into the incident threshold on this probe.
    /// TLS incidents and TLS notifications share this edge.
    pub fn tls_incident_crossed(&self) -> bool {
        let threshold = self.settings.tls_incident_threshold_days;
        threshold > 0
            && self.tls.is_some()
            && tls::crossed_into(self.previous_tls_days(), self.next.tls_days_left, threshold)
    }
}

/// Status event for a probe, at most one per call
pub fn status_event(monitor: &Monitor, previous: Option<&MonitorState>, next: &MonitorState, at: DateTime<Utc>) -> Option<MonitorEvent> {
    let kind = match previous {
        None if next.raw_status == RawStatus::Down => EventKind::Down,
        None => return None,
        Some(prev) if prev.raw_status != next.raw_status => match next.raw_status {
            RawStatus::Up => EventKind::Up,
            RawStatus::Down => EventKind::Down,
        },
        Some(prev)
            if next.raw_status == RawStatus::Down
                && (prev.last_status_code != next.last_status_code || prev.last_error != next.last_error) =>
        {
            EventKind::Down
        }
        Some(_) => return None,
    };

    let message = match kind {
        EventKind::Up => format!("{} is up", monitor.name),
        _ => {
            let detail = next
                .last_error
                .clone()
                .or_else(|| next.last_status_code.map(|code| format!("HTTP {}", code)))
                .unwrap_or_else(|| "no detail".to_string());
            format!("{} is down: {}", monitor.name, detail)
        }
    };
    Some(MonitorEvent::new(monitor.id, kind, message, at))
}

/// Maintenance start or end event when the flag toggled
pub fn maintenance_event(monitor: &Monitor, previous: Option<&MonitorState>, next: &MonitorState, at: DateTime<Utc>) -> Option<MonitorEvent> {
    if previous.is_some_and(|p| p.maintenance) == next.maintenance {
        return None;
    }
    let (kind, message) = if next.maintenance {
        (EventKind::MaintenanceStart, format!("{} entered maintenance", monitor.name))
    } else {
        (EventKind::MaintenanceEnd, format!("{} left maintenance", monitor.name))
    };
    Some(MonitorEvent::new(monitor.id, kind, message, at))
}

/// State & statistics engine
pub struct StateEngine {
    database: Arc<dyn Database>,
    clock: Arc<dyn Clock>,
    automation: Arc<Automation>,
    notifier: Arc<Notifier>,
}

impl StateEngine {
    pub fn new(
        database: Arc<dyn Database>,
        clock: Arc<dyn Clock>,
        automation: Arc<Automation>,
        notifier: Arc<Notifier>,
    ) -> Self {
        Self { database, clock, automation, notifier }
    }

    /// Record one completed probe and return the state that was saved
    pub async fn process(&self, monitor: &Monitor, result: &CheckResult, settings: &MonitorSettings) -> Result<MonitorState> {
        let now = self.clock.now();

        if let Err(e) = self.database.append_metric(&MonitorMetric::from_result(monitor.id, result)).await {
            warn!(monitor = %monitor.id, "Failed to store metric: {}", e);
        }

        let previous = self.database.get_state(monitor.id).await?;

        let snapshot = match tls::track(self.database.as_ref(), monitor, result, settings).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(monitor = %monitor.id, "Failed to update TLS snapshot: {}", e);
                None
            }
        };

        let raw_status = RawStatus::from_ok(result.ok);
        let in_maintenance = match maintenance::in_maintenance(self.database.as_ref(), monitor, now).await {
            Ok(active) => active,
            Err(e) => {
                warn!(monitor = %monitor.id, "Failed to evaluate maintenance windows: {}", e);
                previous.as_ref().is_some_and(|p| p.maintenance)
            }
        };

        let mut next = previous.clone().unwrap_or_else(|| MonitorState::new(monitor.id));
        next.raw_status = raw_status;
        next.maintenance = in_maintenance;
        next.status = Status::derive(raw_status, monitor.paused, in_maintenance);
        next.last_checked_at = Some(result.checked_at);
        match raw_status {
            RawStatus::Up => next.last_up_at = Some(result.checked_at),
            RawStatus::Down => next.last_down_at = Some(result.checked_at),
        }
        next.last_latency_ms = Some(result.latency_ms);
        next.last_status_code = result.status_code;
        next.last_error = result.error.clone();
        next.tls_days_left = snapshot.as_ref().map(|s| s.days_left(now));
        next.tls_not_after = snapshot.as_ref().map(|s| s.not_after);

        self.refresh_statistics(monitor, &mut next, now).await;

        let status_event = status_event(monitor, previous.as_ref(), &next, now);
        let maintenance_event = maintenance_event(monitor, previous.as_ref(), &next, now);
        let previous_days = previous.as_ref().and_then(|p| p.tls_days_left);
        let expiring = tls::crossed_into(previous_days, next.tls_days_left, settings.tls_expiry_threshold_days);
        let tls_event = expiring.then(|| {
            let days = next.tls_days_left.unwrap_or_default();
            MonitorEvent::new(
                monitor.id,
                EventKind::TlsExpiring,
                format!("Certificate for {} expires in {} days", monitor.name, days),
                now,
            )
        });

        for event in [status_event, maintenance_event, tls_event].into_iter().flatten() {
            debug!(monitor = %monitor.id, kind = %event.kind, "Recording event");
            if let Err(e) = self.database.append_event(&event).await {
                warn!(monitor = %monitor.id, "Failed to record {} event: {}", event.kind, e);
            }
        }

        let ctx = TransitionContext {
            monitor,
            previous: previous.as_ref(),
            next: &next,
            raw_status,
            settings,
            tls: snapshot.as_ref(),
            now,
        };
        self.automation.run(&ctx).await;
        self.notifier.dispatch(&ctx).await;

        self.database.save_state(&next).await?;
        if previous.as_ref().map(|p| p.status) != Some(next.status) {
            info!(monitor = %monitor.id, status = %next.status, "Monitor status changed");
        }
        Ok(next)
    }

    async fn refresh_statistics(&self, monitor: &Monitor, next: &mut MonitorState, now: DateTime<Utc>) {
        match self.database.metric_summary(monitor.id, now - Duration::hours(24)).await {
            Ok(day) => {
                next.uptime_24h = day.uptime_percent();
                next.avg_latency_24h_ms = day.avg_latency_ms;
            }
            Err(e) => warn!(monitor = %monitor.id, "Failed to compute 24h statistics: {}", e),
        }
        match self.database.metric_summary(monitor.id, now - Duration::days(30)).await {
            Ok(month) => next.uptime_30d = month.uptime_percent(),
            Err(e) => warn!(monitor = %monitor.id, "Failed to compute 30d statistics: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MonitorKind;

    fn state(raw: RawStatus, code: Option<u16>, error: Option<&str>) -> MonitorState {
        let mut state = MonitorState::new(uuid::Uuid::new_v4());
        state.raw_status = raw;
        state.last_status_code = code;
        state.last_error = error.map(str::to_string);
        state
    }

    #[test]
    fn first_down_is_logged() {
        let monitor = Monitor::new("api", MonitorKind::Http, "https://example.com");
        let now = Utc::now();
        let next = state(RawStatus::Down, Some(500), None);
        let event = status_event(&monitor, None, &next, now).unwrap();
        assert_eq!(event.kind, EventKind::Down);

        let next = state(RawStatus::Up, Some(200), None);
        assert!(status_event(&monitor, None, &next, now).is_none());
    }

    #[test]
    fn stable_outage_only_logs_changed_detail() {
        let monitor = Monitor::new("api", MonitorKind::Http, "https://example.com");
        let now = Utc::now();
        let prev = state(RawStatus::Down, Some(500), Some("boom"));

        let same = state(RawStatus::Down, Some(500), Some("boom"));
        assert!(status_event(&monitor, Some(&prev), &same, now).is_none());

        let changed = state(RawStatus::Down, Some(503), Some("boom"));
        assert_eq!(status_event(&monitor, Some(&prev), &changed, now).unwrap().kind, EventKind::Down);

        let up = state(RawStatus::Up, Some(200), None);
        assert_eq!(status_event(&monitor, Some(&prev), &up, now).unwrap().kind, EventKind::Up);
    }

    #[test]
    fn maintenance_toggle_events() {
        let monitor = Monitor::new("api", MonitorKind::Http, "https://example.com");
        let now = Utc::now();
        let prev = state(RawStatus::Up, None, None);
        let mut next = prev.clone();
        assert!(maintenance_event(&monitor, Some(&prev), &next, now).is_none());

        next.maintenance = true;
        assert_eq!(maintenance_event(&monitor, Some(&prev), &next, now).unwrap().kind, EventKind::MaintenanceStart);
        assert_eq!(maintenance_event(&monitor, Some(&next), &prev, now).unwrap().kind, EventKind::MaintenanceEnd);
    }
}
