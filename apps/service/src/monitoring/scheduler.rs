//! Admission control for probes.
//!
//! All shared scheduling state (the settings cache, the in-flight set, the
//! concurrency gate and housekeeping timestamps) lives behind one mutex that is
//! never held across an await point.

use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

use crate::models::MonitorSettings;

/// How long cached settings stay fresh
pub const SETTINGS_MAX_AGE: Duration = Duration::seconds(10);

/// Background chores throttled by the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Housekeeping {
    Maintenance,
    Retention,
}

/// Why a probe was not admitted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// The monitor already has a probe running
    InFlight,
    /// The global concurrency ceiling is reached
    Saturated,
}

#[derive(Debug)]
struct ControlState {
    settings: Option<MonitorSettings>,
    fetched_at: Option<DateTime<Utc>>,
    invalidated: bool,
    in_flight: HashSet<Uuid>,
    limit: usize,
    running: usize,
    last_run: HashMap<Housekeeping, DateTime<Utc>>,
}

/// Per-monitor exclusivity plus a counting admission gate
#[derive(Debug, Clone)]
pub struct ConcurrencyController {
    state: Arc<Mutex<ControlState>>,
}

impl Default for ConcurrencyController {
    fn default() -> Self {
        Self::new(MonitorSettings::default().concurrency_limit())
    }
}

impl ConcurrencyController {
    pub fn new(limit: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(ControlState {
                settings: None,
                fetched_at: None,
                invalidated: false,
                in_flight: HashSet::new(),
                limit: limit.max(1),
                running: 0,
                last_run: HashMap::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ControlState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Cached settings when younger than `SETTINGS_MAX_AGE` and not invalidated
    pub fn cached_settings(&self, now: DateTime<Utc>) -> Option<MonitorSettings> {
        let state = self.lock();
        match (&state.settings, state.fetched_at) {
            (Some(settings), Some(at)) if !state.invalidated && now - at <= SETTINGS_MAX_AGE => {
                Some(settings.clone())
            }
            _ => None,
        }
    }

    /// Store freshly loaded settings and resize the gate
    ///
    /// Returns the new ceiling when it changed.
    pub fn store_settings(&self, settings: &MonitorSettings, now: DateTime<Utc>) -> Option<usize> {
        let mut state = self.lock();
        state.settings = Some(settings.clone());
        state.fetched_at = Some(now);
        state.invalidated = false;

        let limit = settings.concurrency_limit();
        if limit != state.limit {
            state.limit = limit;
            return Some(limit);
        }
        None
    }

    /// Force a settings reload on next use
    pub fn invalidate(&self) {
        self.lock().invalidated = true;
    }

    /// Admit a scheduled probe, holding both the monitor guard and a gate slot
    pub fn try_admit(&self, monitor_id: Uuid) -> Result<ProbeSlot, Rejection> {
        let mut state = self.lock();
        if !state.in_flight.insert(monitor_id) {
            return Err(Rejection::InFlight);
        }
        if state.running >= state.limit {
            state.in_flight.remove(&monitor_id);
            return Err(Rejection::Saturated);
        }
        state.running += 1;
        Ok(ProbeSlot { controller: self.clone(), monitor_id, counted: true })
    }

    /// Take only the monitor guard, bypassing the gate
    pub fn try_reserve(&self, monitor_id: Uuid) -> Option<ProbeSlot> {
        let mut state = self.lock();
        if !state.in_flight.insert(monitor_id) {
            return None;
        }
        Some(ProbeSlot { controller: self.clone(), monitor_id, counted: false })
    }

    pub fn is_in_flight(&self, monitor_id: Uuid) -> bool {
        self.lock().in_flight.contains(&monitor_id)
    }

    /// Number of gate slots in use
    pub fn running(&self) -> usize {
        self.lock().running
    }

    pub fn limit(&self) -> usize {
        self.lock().limit
    }

    /// Claim a housekeeping run if `every` has passed since the last claim
    pub fn claim(&self, task: Housekeeping, now: DateTime<Utc>, every: Duration) -> bool {
        let mut state = self.lock();
        match state.last_run.get(&task) {
            Some(last) if now - *last < every => false,
            _ => {
                state.last_run.insert(task, now);
                true
            }
        }
    }

    fn release(&self, monitor_id: Uuid, counted: bool) {
        let mut state = self.lock();
        state.in_flight.remove(&monitor_id);
        if counted {
            state.running = state.running.saturating_sub(1);
        }
    }
}

/// Admission held for the duration of a probe, released on drop
#[derive(Debug)]
pub struct ProbeSlot {
    controller: ConcurrencyController,
    monitor_id: Uuid,
    counted: bool,
}

impl Drop for ProbeSlot {
    fn drop(&mut self) {
        self.controller.release(self.monitor_id, self.counted);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_monitor_is_never_admitted_twice() {
        let controller = ConcurrencyController::new(4);
        let id = Uuid::new_v4();

        let slot = controller.try_admit(id).unwrap();
        assert_eq!(controller.try_admit(id).unwrap_err(), Rejection::InFlight);
        assert!(controller.try_reserve(id).is_none());

        drop(slot);
        assert!(!controller.is_in_flight(id));
        assert!(controller.try_admit(id).is_ok());
    }

    #[test]
    fn saturated_gate_releases_the_monitor_guard() {
        let controller = ConcurrencyController::new(1);
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        let _slot = controller.try_admit(first).unwrap();
        assert_eq!(controller.try_admit(second).unwrap_err(), Rejection::Saturated);
        assert!(!controller.is_in_flight(second));
        assert_eq!(controller.running(), 1);
    }

    #[test]
    fn reservations_do_not_use_the_gate() {
        let controller = ConcurrencyController::new(1);
        let _busy = controller.try_admit(Uuid::new_v4()).unwrap();

        let manual = controller.try_reserve(Uuid::new_v4()).unwrap();
        assert_eq!(controller.running(), 1);
        drop(manual);
        assert_eq!(controller.running(), 1);
    }

    #[test]
    fn settings_cache_expires_and_resizes() {
        let controller = ConcurrencyController::new(10);
        let now = Utc::now();
        let settings = MonitorSettings { max_concurrent_checks: 0, ..Default::default() };

        assert!(controller.cached_settings(now).is_none());
        assert_eq!(controller.store_settings(&settings, now), Some(1));
        assert_eq!(controller.store_settings(&settings, now), None);
        assert!(controller.cached_settings(now + Duration::seconds(5)).is_some());
        assert!(controller.cached_settings(now + Duration::seconds(11)).is_none());

        controller.invalidate();
        assert!(controller.cached_settings(now).is_none());
    }

    #[test]
    fn housekeeping_is_throttled() {
        let controller = ConcurrencyController::default();
        let now = Utc::now();

        assert!(controller.claim(Housekeeping::Maintenance, now, Duration::minutes(1)));
        assert!(!controller.claim(Housekeeping::Maintenance, now + Duration::seconds(30), Duration::minutes(1)));
        assert!(controller.claim(Housekeeping::Retention, now, Duration::hours(1)));
        assert!(controller.claim(Housekeeping::Maintenance, now + Duration::seconds(60), Duration::minutes(1)));
    }
}
