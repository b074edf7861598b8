/// Orchestrator module - the monitoring engine
///
/// The engine is the core coordinator that:
/// - Ticks once per second, probing due monitors within the concurrency ceiling
/// - Turns probe results into state, statistics and events
/// - Runs automation rules and notifications on transitions
/// - Reconciles maintenance windows, prunes old metrics and drives SLA evaluation
pub mod automation;
pub mod maintenance;
pub mod retention;
pub mod sla;
pub mod state;
pub mod tls;


pub use automation::{
    Automation, AutomationRule, Board, BoardColumn, IncidentDesk, NewIncident, NewTicket, Severity,
    TicketBoard, TicketOnDown, TicketPriority, TlsIncident,
};
pub use retention::{RetentionCleanup, RetentionPolicy};
pub use sla::SlaEvaluator;
pub use state::{StateEngine, TransitionContext};

use anyhow::Result;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{MissedTickBehavior, interval, timeout};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::crypto::SecretBox;
use crate::database::Database;
use crate::error::CheckNowError;
use crate::models::{CheckResult, Monitor, MonitorSettings, MonitorState, ProbeErrorKind};
use crate::monitoring::{ConcurrencyController, Housekeeping, Prober, Rejection};
use crate::notifications::{MessageSender, Notifier};

/// Scheduler tick period
pub const TICK_PERIOD: Duration = Duration::from_secs(1);

/// Upper bound on the probe timeout of a manual check
pub const MANUAL_TIMEOUT_CAP_SECONDS: u64 = 20;

/// Grace added on top of the manual probe timeout
pub const MANUAL_GRACE_SECONDS: u64 = 2;

/// Hard deadline of a manual check: `min(timeout, 20) + 2` seconds
pub fn manual_deadline(monitor: &Monitor, settings: &MonitorSettings) -> Duration {
    let probe_timeout = monitor.timeout_seconds_or(settings.default_timeout_seconds).min(MANUAL_TIMEOUT_CAP_SECONDS);
    Duration::from_secs(probe_timeout + MANUAL_GRACE_SECONDS)
}

/// Hard limit for one periodic probe attempt: the configured timeout plus grace
pub fn attempt_limit(monitor: &Monitor, settings: &MonitorSettings) -> Duration {
    let probe_timeout = monitor.timeout_seconds_or(settings.default_timeout_seconds);
    Duration::from_secs(probe_timeout.saturating_add(MANUAL_GRACE_SECONDS))
}

struct Inner {
    database: Arc<dyn Database>,
    prober: Arc<dyn Prober>,
    clock: Arc<dyn Clock>,
    controller: ConcurrencyController,
    state_engine: StateEngine,
    notifier: Arc<Notifier>,
    retention: RetentionCleanup,
    sla: Option<Arc<dyn SlaEvaluator>>,
    tracker: TaskTracker,
}

struct RunState {
    token: CancellationToken,
    running: bool,
}

/// Builder for [`Engine`]
pub struct EngineBuilder {
    database: Arc<dyn Database>,
    prober: Arc<dyn Prober>,
    clock: Arc<dyn Clock>,
    tickets: Option<Arc<dyn TicketBoard>>,
    incidents: Option<Arc<dyn IncidentDesk>>,
    sender: Option<Arc<dyn MessageSender>>,
    secrets: Option<Arc<dyn SecretBox>>,
    sla: Option<Arc<dyn SlaEvaluator>>,
    rules: Vec<Arc<dyn AutomationRule>>,
    tick_period: Duration,
}

impl EngineBuilder {
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Enable ticket creation on down transitions
    pub fn tickets(mut self, tickets: Arc<dyn TicketBoard>) -> Self {
        self.tickets = Some(tickets);
        self
    }

    /// Enable incidents for expiring certificates
    pub fn incidents(mut self, incidents: Arc<dyn IncidentDesk>) -> Self {
        self.incidents = Some(incidents);
        self
    }

    pub fn sender(mut self, sender: Arc<dyn MessageSender>) -> Self {
        self.sender = Some(sender);
        self
    }

    pub fn secrets(mut self, secrets: Arc<dyn SecretBox>) -> Self {
        self.secrets = Some(secrets);
        self
    }

    pub fn sla(mut self, sla: Arc<dyn SlaEvaluator>) -> Self {
        self.sla = Some(sla);
        self
    }

    /// Append an automation rule, run after the built-in ones
    pub fn rule(mut self, rule: Arc<dyn AutomationRule>) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn tick_period(mut self, period: Duration) -> Self {
        self.tick_period = period;
        self
    }

    pub fn build(self) -> Engine {
        let mut rules: Vec<Arc<dyn AutomationRule>> = Vec::new();
        if let Some(tickets) = self.tickets {
            rules.push(Arc::new(TicketOnDown::new(self.database.clone(), tickets)));
        }
        if let Some(incidents) = self.incidents {
            rules.push(Arc::new(TlsIncident::new(self.database.clone(), incidents)));
        }
        rules.extend(self.rules);

        let automation = Arc::new(Automation::new(rules));
        let notifier = Arc::new(Notifier::new(self.database.clone(), self.sender, self.secrets));
        let state_engine =
            StateEngine::new(self.database.clone(), self.clock.clone(), automation, notifier.clone());

        Engine {
            inner: Arc::new(Inner {
                retention: RetentionCleanup::new(self.database.clone()),
                database: self.database,
                prober: self.prober,
                clock: self.clock,
                controller: ConcurrencyController::default(),
                state_engine,
                notifier,
                sla: self.sla,
                tracker: TaskTracker::new(),
            }),
            run: Mutex::new(RunState { token: CancellationToken::new(), running: false }),
            tick_period: self.tick_period,
        }
    }
}

/// The monitoring engine
pub struct Engine {
    inner: Arc<Inner>,
    run: Mutex<RunState>,
    tick_period: Duration,
}

impl Engine {
    pub fn builder(database: Arc<dyn Database>, prober: Arc<dyn Prober>) -> EngineBuilder {
        EngineBuilder {
            database,
            prober,
            clock: Arc::new(SystemClock),
            tickets: None,
            incidents: None,
            sender: None,
            secrets: None,
            sla: None,
            rules: Vec::new(),
            tick_period: TICK_PERIOD,
        }
    }

    fn run_state(&self) -> std::sync::MutexGuard<'_, RunState> {
        self.run.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start the tick loop, returns false when already running
    pub fn start(&self) -> bool {
        let mut run = self.run_state();
        if run.running {
            return false;
        }
        if run.token.is_cancelled() {
            run.token = CancellationToken::new();
        }
        run.running = true;

        let inner = Arc::clone(&self.inner);
        let token = run.token.clone();
        let period = self.tick_period;
        self.inner.tracker.spawn(async move {
            let mut timer = interval(period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = timer.tick() => inner.tick(&token).await,
                }
            }
            debug!("Scheduler loop stopped");
        });

        info!(period_ms = period.as_millis() as u64, "Monitoring engine started");
        true
    }

    /// Stop the tick loop and wait for in-flight work up to `deadline`
    ///
    /// Returns true when everything drained in time.
    pub async fn stop(&self, deadline: Duration) -> bool {
        {
            let mut run = self.run_state();
            if !run.running {
                return true;
            }
            run.running = false;
            run.token.cancel();
        }

        let drained = self.drain(deadline).await;
        if drained {
            info!("Monitoring engine stopped");
        } else {
            warn!(deadline_ms = deadline.as_millis() as u64, "Monitoring engine stopped before work drained");
        }
        drained
    }

    pub fn is_running(&self) -> bool {
        self.run_state().running
    }

    /// Wait for every spawned task to finish, up to `deadline`
    pub async fn drain(&self, deadline: Duration) -> bool {
        let tracker = &self.inner.tracker;
        tracker.close();
        let drained = timeout(deadline, tracker.wait()).await.is_ok();
        tracker.reopen();
        drained
    }

    /// Run one scheduler tick
    pub async fn tick(&self) {
        let token = self.run_state().token.clone();
        self.inner.tick(&token).await;
    }

    /// Manually probe a monitor once, outside the schedule
    pub async fn check_now(&self, monitor_id: Uuid) -> Result<MonitorState, CheckNowError> {
        let inner = &self.inner;
        let monitor = inner.database.get_monitor(monitor_id).await?.ok_or(CheckNowError::NotFound(monitor_id))?;
        let settings = inner.settings(true).await?;

        if monitor.kind.is_passive() {
            return Err(CheckNowError::Passive(monitor.kind.to_string()));
        }
        if monitor.paused {
            return Err(CheckNowError::Paused);
        }
        if !settings.enabled {
            return Err(CheckNowError::Disabled);
        }
        let _slot = inner.controller.try_reserve(monitor_id).ok_or(CheckNowError::Busy)?;

        let mut single = monitor.clone();
        single.retries = 0;
        single.timeout_seconds =
            monitor.timeout_seconds_or(settings.default_timeout_seconds).min(MANUAL_TIMEOUT_CAP_SECONDS);
        let deadline = manual_deadline(&monitor, &settings);

        info!(monitor = %monitor_id, deadline_s = deadline.as_secs(), "Running manual check");
        match timeout(deadline, inner.run_check(&single, &settings)).await {
            Ok(outcome) => Ok(outcome?),
            Err(_) => Err(CheckNowError::DeadlineExceeded(deadline.as_secs())),
        }
    }

    /// Pause or resume a monitor, returns false when it does not exist
    pub async fn set_paused(&self, monitor_id: Uuid, paused: bool) -> Result<bool> {
        let database = &self.inner.database;
        if !database.set_monitor_paused(monitor_id, paused).await? {
            return Ok(false);
        }
        if let Some(mut state) = database.get_state(monitor_id).await? {
            state.rederive(paused);
            database.save_state(&state).await?;
        }
        info!(target: "uppe::audit", monitor = %monitor_id, paused, "Monitor pause flag changed");
        Ok(true)
    }

    /// Force a settings reload on the next tick
    pub fn invalidate_settings(&self) {
        self.inner.controller.invalidate();
    }

    /// Current settings, from cache when fresh
    pub async fn settings(&self) -> Result<MonitorSettings> {
        self.inner.settings(false).await
    }

    pub fn controller(&self) -> &ConcurrencyController {
        &self.inner.controller
    }

    pub fn database(&self) -> &Arc<dyn Database> {
        &self.inner.database
    }
}

impl Inner {
    async fn settings(&self, force: bool) -> Result<MonitorSettings> {
        let now = self.clock.now();
        if !force {
            if let Some(settings) = self.controller.cached_settings(now) {
                return Ok(settings);
            }
        }
        let settings = self.database.get_settings().await?;
        if let Some(limit) = self.controller.store_settings(&settings, now) {
            info!(limit, "Concurrency ceiling resized");
        }
        Ok(settings)
    }

    async fn tick(self: &Arc<Self>, token: &CancellationToken) {
        let settings = match self.settings(false).await {
            Ok(settings) => settings,
            Err(e) => {
                error!("Failed to load monitor settings: {}", e);
                return;
            }
        };
        if !settings.enabled {
            debug!("Monitoring disabled, skipping tick");
            return;
        }

        let now = self.clock.now();
        self.dispatch_due(&settings, now, token).await;
        self.housekeeping(&settings, now).await;
    }

    async fn dispatch_due(self: &Arc<Self>, settings: &MonitorSettings, now: chrono::DateTime<chrono::Utc>, token: &CancellationToken) {
        let due = match self.database.due_monitors(now, settings.default_interval_seconds).await {
            Ok(due) => due,
            Err(e) => {
                warn!("Failed to load due monitors: {}", e);
                return;
            }
        };

        for monitor in due {
            let slot = match self.controller.try_admit(monitor.id) {
                Ok(slot) => slot,
                Err(Rejection::InFlight) => {
                    debug!(monitor = %monitor.id, "Probe still running, skipping");
                    continue;
                }
                Err(Rejection::Saturated) => {
                    debug!(monitor = %monitor.id, "Concurrency ceiling reached, skipping");
                    continue;
                }
            };

            let inner = Arc::clone(self);
            let settings = settings.clone();
            let token = token.clone();
            self.tracker.spawn(async move {
                let _slot = slot;
                tokio::select! {
                    _ = token.cancelled() => debug!(monitor = %monitor.id, "Probe cancelled"),
                    outcome = inner.run_check(&monitor, &settings) => {
                        if let Err(e) = outcome {
                            warn!(monitor = %monitor.id, "Failed to record check: {}", e);
                        }
                    }
                }
            });
        }
    }

    async fn housekeeping(&self, settings: &MonitorSettings, now: chrono::DateTime<chrono::Utc>) {
        if self.controller.claim(Housekeeping::Maintenance, now, maintenance::RECONCILE_EVERY) {
            if let Err(e) = maintenance::reconcile(self.database.as_ref(), &self.controller, &self.notifier, settings, now).await {
                warn!("Maintenance reconcile failed: {}", e);
            }
        }
        if self.controller.claim(Housekeeping::Retention, now, retention::CLEANUP_EVERY) {
            let policy = RetentionPolicy::from_settings(settings);
            if let Err(e) = self.retention.cleanup_expired_metrics(policy, now).await {
                warn!("Retention cleanup failed: {}", e);
            }
        }
        if let Some(sla) = &self.sla {
            if let Err(e) = sla.evaluate(now).await {
                warn!("SLA evaluation failed: {}", e);
            }
        }
    }

    /// Probe with the monitor's retry policy and record the outcome
    async fn run_check(&self, monitor: &Monitor, settings: &MonitorSettings) -> Result<MonitorState> {
        let result = self.probe_with_retries(monitor, settings).await;
        self.state_engine.process(monitor, &result, settings).await
    }

    async fn probe_with_retries(&self, monitor: &Monitor, settings: &MonitorSettings) -> CheckResult {
        let attempts = monitor.retries.saturating_add(1);
        let limit = attempt_limit(monitor, settings);
        let mut attempt = 1;
        loop {
            let result = match timeout(limit, self.prober.probe(monitor, settings)).await {
                Ok(result) => result,
                Err(_) => CheckResult::failure(self.clock.now(), ProbeErrorKind::Timeout, "probe timed out"),
            };
            if result.ok || attempt >= attempts {
                return result;
            }
            debug!(monitor = %monitor.id, attempt, error = ?result.error, "Probe failed, retrying");
            attempt += 1;
            if monitor.retry_interval_seconds > 0 {
                tokio::time::sleep(Duration::from_secs(monitor.retry_interval_seconds)).await;
            }
        }
    }
}
