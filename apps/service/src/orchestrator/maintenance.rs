//! Maintenance window evaluation and periodic status reconciliation.

use std::str::FromStr;

use anyhow::Result;
use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clock::resolve_timezone;
use crate::database::Database;
use crate::models::{MaintenanceSchedule, Monitor, MonitorMaintenance, MonitorSettings};
use crate::monitoring::ConcurrencyController;
use crate::notifications::Notifier;

use super::state::{TransitionContext, maintenance_event};

/// Minimum spacing between two reconciliation passes
pub const RECONCILE_EVERY: Duration = Duration::minutes(1);

/// Longest window or recurrence period honoured, in seconds
const MAX_WINDOW_SECONDS: u64 = 366 * 24 * 60 * 60;

fn bounded_seconds(seconds: u64) -> i64 {
    seconds.min(MAX_WINDOW_SECONDS) as i64
}

/// Whether window `window` is scoped to a monitor with `monitor_id` and `tags`
pub fn applies_to(window: &MonitorMaintenance, monitor_id: Uuid, tags: &[String]) -> bool {
    if !window.monitor_ids.is_empty() {
        return window.monitor_ids.contains(&monitor_id);
    }
    if let Some(single) = window.monitor_id {
        return single == monitor_id;
    }
    if !window.tags.is_empty() {
        return window.tags.iter().any(|tag| tags.iter().any(|t| t.eq_ignore_ascii_case(tag)));
    }
    // No scope at all: the window covers every monitor.
    window.is_global()
}

/// Whether the schedule covers the instant `at`
pub fn is_open_at(schedule: &MaintenanceSchedule, at: DateTime<Utc>) -> bool {
    match schedule {
        MaintenanceSchedule::Once { starts_at, ends_at } => *starts_at <= at && at < *ends_at,
        MaintenanceSchedule::Interval { anchor, every_seconds, duration_seconds } => {
            if at < *anchor || *duration_seconds == 0 {
                return false;
            }
            let elapsed = (at - *anchor).num_seconds();
            let offset = if *every_seconds == 0 { elapsed } else { elapsed % bounded_seconds(*every_seconds) };
            offset < bounded_seconds(*duration_seconds)
        }
        MaintenanceSchedule::Cron { expression, duration_seconds, timezone } => {
            if *duration_seconds == 0 {
                return false;
            }
            let schedule = match cron::Schedule::from_str(expression) {
                Ok(schedule) => schedule,
                Err(e) => {
                    warn!(expression = %expression, "Invalid maintenance cron expression: {}", e);
                    return false;
                }
            };
            let tz = resolve_timezone(timezone.as_deref());
            let local = at.with_timezone(&tz);
            let search_from = local - Duration::seconds(bounded_seconds(*duration_seconds));
            // The first occurrence after the search start opened a window that is still
            // running if it is not in the future.
            schedule.after(&search_from).next().is_some_and(|start| start <= local)
        }
        MaintenanceSchedule::Weekly { days, start, duration_seconds, timezone } => {
            if *duration_seconds == 0 || days.is_empty() {
                return false;
            }
            let tz = resolve_timezone(timezone.as_deref());
            let local = at.with_timezone(&tz);
            let duration = Duration::seconds(bounded_seconds(*duration_seconds));
            let lookback_days = duration.num_days() + 1;
            (0..=lookback_days).any(|back| {
                let date = local.date_naive() - Duration::days(back);
                if !days.contains(&date.weekday()) {
                    return false;
                }
                match tz.from_local_datetime(&date.and_time(*start)).earliest() {
                    Some(opens) => opens <= local && local < opens + duration,
                    None => false,
                }
            })
        }
    }
}

/// Whether `window` puts the monitor into maintenance at `at`
pub fn is_active(window: &MonitorMaintenance, monitor_id: Uuid, tags: &[String], at: DateTime<Utc>) -> bool {
    window.enabled && applies_to(window, monitor_id, tags) && is_open_at(&window.schedule, at)
}

/// Whether any active window currently covers the monitor
pub async fn in_maintenance(database: &dyn Database, monitor: &Monitor, at: DateTime<Utc>) -> Result<bool> {
    Ok(!database.active_maintenance(monitor.id, &monitor.tags, at).await?.is_empty())
}

/// Re-evaluate maintenance for every monitor, independent of probing
///
/// Monitors with a probe in flight are skipped; that probe applies the overlay itself.
/// Returns the number of monitors whose maintenance flag changed.
pub async fn reconcile(
    database: &dyn Database,
    controller: &ConcurrencyController,
    notifier: &Notifier,
    settings: &MonitorSettings,
    now: DateTime<Utc>,
) -> Result<usize> {
    let windows = database.list_maintenance().await?;
    let monitors = database.list_monitors().await?;
    let mut changed = 0;

    for monitor in monitors {
        let Some(_slot) = controller.try_reserve(monitor.id) else {
            debug!(monitor = %monitor.id, "Probe in flight, skipping maintenance reconcile");
            continue;
        };
        let previous = match database.get_state(monitor.id).await {
            Ok(Some(state)) => state,
            Ok(None) => continue,
            Err(e) => {
                warn!(monitor = %monitor.id, "Failed to load state for maintenance reconcile: {}", e);
                continue;
            }
        };

        let active = windows.iter().any(|w| is_active(w, monitor.id, &monitor.tags, now));
        if active == previous.maintenance {
            continue;
        }

        let mut next = previous.clone();
        next.maintenance = active;
        next.rederive(monitor.paused);

        if let Some(event) = maintenance_event(&monitor, Some(&previous), &next, now) {
            if let Err(e) = database.append_event(&event).await {
                warn!(monitor = %monitor.id, "Failed to record maintenance event: {}", e);
            }
        }

        let ctx = TransitionContext {
            monitor: &monitor,
            previous: Some(&previous),
            next: &next,
            raw_status: next.raw_status,
            settings,
            tls: None,
            now,
        };
        notifier.dispatch(&ctx).await;

        if let Err(e) = database.save_state(&next).await {
            warn!(monitor = %monitor.id, "Failed to save reconciled state: {}", e);
            continue;
        }
        info!(monitor = %monitor.id, maintenance = active, "Maintenance status reconciled");
        changed += 1;
    }

    debug!(changed, "Maintenance reconcile finished");
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveTime, Weekday};

    fn at(raw: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(raw).unwrap().with_timezone(&Utc)
    }

    fn once(start: &str, end: &str) -> MaintenanceSchedule {
        MaintenanceSchedule::Once { starts_at: at(start), ends_at: at(end) }
    }

    #[test]
    fn scope_resolution_order() {
        let monitor = Uuid::new_v4();
        let other = Uuid::new_v4();
        let tags = vec!["edge".to_string()];
        let schedule = once("2026-01-01T00:00:00Z", "2026-01-02T00:00:00Z");

        // Explicit ids win over the single monitor and tags.
        let window = MonitorMaintenance::new("ids", schedule.clone())
            .for_monitors([other])
            .for_monitor(monitor)
            .for_tags(["edge"]);
        assert!(!applies_to(&window, monitor, &tags));

        let window = MonitorMaintenance::new("single", schedule.clone()).for_monitor(monitor);
        assert!(applies_to(&window, monitor, &[]));
        assert!(!applies_to(&window, other, &[]));

        let window = MonitorMaintenance::new("tags", schedule.clone()).for_tags(["EDGE", "db"]);
        assert!(applies_to(&window, monitor, &tags));
        assert!(!applies_to(&window, monitor, &["core".to_string()]));
    }

    #[test]
    fn unscoped_window_covers_every_monitor() {
        let window = MonitorMaintenance::new("global", once("2026-01-01T00:00:00Z", "2026-01-02T00:00:00Z"));
        assert!(window.is_global());
        assert!(applies_to(&window, Uuid::new_v4(), &[]));
        assert!(applies_to(&window, Uuid::new_v4(), &["anything".to_string()]));
    }

    #[test]
    fn once_window_is_half_open() {
        let schedule = once("2026-01-01T10:00:00Z", "2026-01-01T11:00:00Z");
        assert!(!is_open_at(&schedule, at("2026-01-01T09:59:59Z")));
        assert!(is_open_at(&schedule, at("2026-01-01T10:00:00Z")));
        assert!(is_open_at(&schedule, at("2026-01-01T10:59:59Z")));
        assert!(!is_open_at(&schedule, at("2026-01-01T11:00:00Z")));
    }

    #[test]
    fn interval_window_repeats() {
        let schedule = MaintenanceSchedule::Interval {
            anchor: at("2026-01-01T00:00:00Z"),
            every_seconds: 86_400,
            duration_seconds: 3_600,
        };
        assert!(is_open_at(&schedule, at("2026-01-05T00:30:00Z")));
        assert!(!is_open_at(&schedule, at("2026-01-05T01:30:00Z")));
        assert!(!is_open_at(&schedule, at("2025-12-31T00:30:00Z")));
    }

    #[test]
    fn cron_window_opens_at_occurrences() {
        // Every day at 02:00 UTC for 30 minutes.
        let schedule = MaintenanceSchedule::Cron {
            expression: "0 0 2 * * *".to_string(),
            duration_seconds: 1_800,
            timezone: None,
        };
        assert!(is_open_at(&schedule, at("2026-03-10T02:00:00Z")));
        assert!(is_open_at(&schedule, at("2026-03-10T02:29:59Z")));
        assert!(!is_open_at(&schedule, at("2026-03-10T02:30:00Z")));
        assert!(!is_open_at(&schedule, at("2026-03-10T01:59:59Z")));
    }

    #[test]
    fn cron_window_respects_timezone() {
        // 02:00 in Berlin is 01:00 UTC in winter.
        let schedule = MaintenanceSchedule::Cron {
            expression: "0 0 2 * * *".to_string(),
            duration_seconds: 600,
            timezone: Some("Europe/Berlin".to_string()),
        };
        assert!(is_open_at(&schedule, at("2026-01-15T01:05:00Z")));
        assert!(!is_open_at(&schedule, at("2026-01-15T02:05:00Z")));
    }

    #[test]
    fn invalid_cron_never_opens() {
        let schedule = MaintenanceSchedule::Cron {
            expression: "whenever".to_string(),
            duration_seconds: 600,
            timezone: None,
        };
        assert!(!is_open_at(&schedule, Utc::now()));
    }

    #[test]
    fn weekly_window_wraps_past_midnight() {
        // Saturdays 23:00 UTC for three hours. 2026-01-03 is a Saturday.
        let schedule = MaintenanceSchedule::Weekly {
            days: vec![Weekday::Sat],
            start: NaiveTime::from_hms_opt(23, 0, 0).unwrap(),
            duration_seconds: 3 * 3_600,
            timezone: None,
        };
        assert!(is_open_at(&schedule, at("2026-01-03T23:30:00Z")));
        assert!(is_open_at(&schedule, at("2026-01-04T01:59:00Z")));
        assert!(!is_open_at(&schedule, at("2026-01-04T02:00:00Z")));
        assert!(!is_open_at(&schedule, at("2026-01-10T22:59:00Z")));
    }

    #[test]
    fn oversized_durations_are_clamped() {
        let now = at("2026-01-05T12:00:00Z");
        let interval = MaintenanceSchedule::Interval {
            anchor: at("2026-01-01T00:00:00Z"),
            every_seconds: u64::MAX,
            duration_seconds: u64::MAX,
        };
        assert!(is_open_at(&interval, now));

        let cron = MaintenanceSchedule::Cron {
            expression: "0 0 2 * * *".to_string(),
            duration_seconds: u64::MAX,
            timezone: None,
        };
        assert!(is_open_at(&cron, now));

        let weekly = MaintenanceSchedule::Weekly {
            days: vec![Weekday::Sat],
            start: NaiveTime::from_hms_opt(23, 0, 0).unwrap(),
            duration_seconds: u64::MAX,
            timezone: None,
        };
        assert!(is_open_at(&weekly, now));
    }

    #[test]
    fn disabled_window_is_never_active() {
        let monitor = Uuid::new_v4();
        let mut window = MonitorMaintenance::new("off", once("2026-01-01T00:00:00Z", "2027-01-01T00:00:00Z"));
        assert!(is_active(&window, monitor, &[], at("2026-06-01T00:00:00Z")));
        window.enabled = false;
        assert!(!is_active(&window, monitor, &[], at("2026-06-01T00:00:00Z")));
    }
}
