//! Automated remediation on state transitions.
//!
//! Rules run once per probe, after the next state is computed and before it is
//! saved. Every rule is best effort: a failing rule is logged and the remaining
//! rules still run.

use anyhow::Result;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::state::TransitionContext;
use super::tls::crossed_out;
use crate::database::Database;
use crate::error::IncidentError;
use crate::models::{EventKind, MonitorEvent};

/// Actor recorded on tickets when a monitor has no owner
pub const SYSTEM_ACTOR: &str = "system";

/// Source tag of incidents opened for expiring certificates
pub const TLS_INCIDENT_SOURCE: &str = "monitor_tls";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardColumn {
    pub id: String,
    pub name: String,
    pub active: bool,
    /// Done-like column, tickets here count as closed
    pub terminal: bool,
}

/// A ticket board with its columns in display order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Board {
    pub id: String,
    pub name: String,
    pub columns: Vec<BoardColumn>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicketPriority {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTicket {
    pub board_id: String,
    pub column_id: String,
    pub title: String,
    pub description: String,
    pub priority: TicketPriority,
    pub creator_id: String,
}

/// Task board system that receives tickets
#[async_trait]
pub trait TicketBoard: Send + Sync {
    /// Boards in their stored order
    async fn list_boards(&self) -> Result<Vec<Board>>;

    /// Create a ticket and return its id
    async fn create_ticket(&self, ticket: NewTicket) -> Result<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Severity of a certificate expiring in `days_left` days
    pub fn for_days_left(days_left: i64) -> Self {
        match days_left {
            d if d <= 3 => Severity::Critical,
            d if d <= 7 => Severity::High,
            _ => Severity::Medium,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewIncident {
    pub source: String,
    pub reference: String,
    pub title: String,
    pub description: String,
    pub severity: Severity,
}

/// Incident management system
#[async_trait]
pub trait IncidentDesk: Send + Sync {
    /// Id of the open incident raised by `source` for `reference`, if any
    async fn find_open(&self, source: &str, reference: &str) -> Result<Option<String>>;

    /// Open an incident and return its id
    async fn create(&self, incident: NewIncident) -> Result<String>;

    async fn close(&self, incident_id: &str, resolution: &str) -> Result<(), IncidentError>;

    async fn add_timeline(&self, incident_id: &str, message: &str) -> Result<()>;
}

/// One automated reaction to a transition
#[async_trait]
pub trait AutomationRule: Send + Sync {
    fn name(&self) -> &'static str;

    async fn apply(&self, ctx: &TransitionContext<'_>) -> Result<()>;
}

/// Ordered list of automation rules
#[derive(Default)]
pub struct Automation {
    rules: Vec<Arc<dyn AutomationRule>>,
}

impl Automation {
    pub fn new(rules: Vec<Arc<dyn AutomationRule>>) -> Self {
        Self { rules }
    }

    /// Run every rule in order, logging failures
    pub async fn run(&self, ctx: &TransitionContext<'_>) {
        for rule in &self.rules {
            if let Err(e) = rule.apply(ctx).await {
                warn!(monitor = %ctx.monitor.id, rule = rule.name(), "Automation rule failed: {}", e);
            }
        }
    }
}

/// Pick the board and column a new ticket goes to
///
/// Prefers the first board with an active non-terminal column, then the first
/// board with any active column.
pub fn pick_destination(boards: &[Board]) -> Option<(&Board, &BoardColumn)> {
    let open_column = boards.iter().find_map(|board| {
        board.columns.iter().find(|c| c.active && !c.terminal).map(|column| (board, column))
    });
    open_column.or_else(|| {
        boards.iter().find_map(|board| board.columns.iter().find(|c| c.active).map(|column| (board, column)))
    })
}

/// Opens a ticket when a monitor goes down
pub struct TicketOnDown {
    database: Arc<dyn Database>,
    tickets: Arc<dyn TicketBoard>,
}

impl TicketOnDown {
    pub fn new(database: Arc<dyn Database>, tickets: Arc<dyn TicketBoard>) -> Self {
        Self { database, tickets }
    }

    fn describe(ctx: &TransitionContext<'_>) -> String {
        let monitor = ctx.monitor;
        let mut lines = vec![
            format!("Monitor: {}", monitor.name),
            format!("Type: {}", monitor.kind),
            format!("Target: {}", monitor.target),
        ];
        if let Some(error) = &ctx.next.last_error {
            lines.push(format!("Error: {}", error));
        }
        if let Some(code) = ctx.next.last_status_code {
            lines.push(format!("HTTP status: {}", code));
        }
        lines.join("\n")
    }
}

#[async_trait]
impl AutomationRule for TicketOnDown {
    fn name(&self) -> &'static str {
        "ticket_on_down"
    }

    async fn apply(&self, ctx: &TransitionContext<'_>) -> Result<()> {
        let monitor = ctx.monitor;
        if !ctx.settings.auto_ticket_enabled
            || !monitor.automation.ticket_on_down
            || monitor.paused
            || ctx.next.maintenance
            || !ctx.went_down()
        {
            return Ok(());
        }

        let boards = self.tickets.list_boards().await?;
        let Some((board, column)) = pick_destination(&boards) else {
            debug!(monitor = %monitor.id, "No board with an active column, skipping ticket");
            return Ok(());
        };

        let ticket = NewTicket {
            board_id: board.id.clone(),
            column_id: column.id.clone(),
            title: format!("{} is down", monitor.name),
            description: Self::describe(ctx),
            priority: TicketPriority::High,
            creator_id: monitor.owner_id.clone().unwrap_or_else(|| SYSTEM_ACTOR.to_string()),
        };
        let ticket_id = self.tickets.create_ticket(ticket).await?;

        info!(
            target: "uppe::audit",
            monitor = %monitor.id,
            ticket = %ticket_id,
            board = %board.name,
            "Ticket created for down monitor"
        );

        let event = MonitorEvent::new(
            monitor.id,
            EventKind::TaskCreated,
            format!("Ticket created on board {}", board.name),
            ctx.now,
        )
        .with_reference(ticket_id);
        self.database.append_event(&event).await?;
        Ok(())
    }
}

/// Opens and closes incidents for expiring certificates
pub struct TlsIncident {
    database: Arc<dyn Database>,
    incidents: Arc<dyn IncidentDesk>,
}

impl TlsIncident {
    pub fn new(database: Arc<dyn Database>, incidents: Arc<dyn IncidentDesk>) -> Self {
        Self { database, incidents }
    }

    async fn open(&self, ctx: &TransitionContext<'_>, reference: &str, days_left: i64) -> Result<()> {
        let monitor = ctx.monitor;
        if let Some(existing) = self.incidents.find_open(TLS_INCIDENT_SOURCE, reference).await? {
            debug!(monitor = %monitor.id, incident = %existing, "TLS incident already open");
            return Ok(());
        }

        let severity = Severity::for_days_left(days_left);
        let incident = NewIncident {
            source: TLS_INCIDENT_SOURCE.to_string(),
            reference: reference.to_string(),
            title: format!("TLS certificate for {} expires in {} days", monitor.name, days_left),
            description: format!(
                "The certificate served by {} expires in {} days.",
                monitor.target, days_left
            ),
            severity,
        };
        let incident_id = self.incidents.create(incident).await?;
        self.incidents
            .add_timeline(&incident_id, &format!("Opened automatically with {} days left", days_left))
            .await?;

        info!(
            target: "uppe::audit",
            monitor = %monitor.id,
            incident = %incident_id,
            severity = %severity,
            "TLS incident opened"
        );

        let event = MonitorEvent::new(
            monitor.id,
            EventKind::TlsIncidentOpen,
            format!("TLS incident opened ({} severity)", severity),
            ctx.now,
        )
        .with_reference(incident_id);
        self.database.append_event(&event).await?;
        Ok(())
    }

    async fn close(&self, ctx: &TransitionContext<'_>, reference: &str, days_left: i64) -> Result<()> {
        let monitor = ctx.monitor;
        let Some(incident_id) = self.incidents.find_open(TLS_INCIDENT_SOURCE, reference).await? else {
            return Ok(());
        };

        match self.incidents.close(&incident_id, "Certificate renewed").await {
            Ok(()) => {}
            Err(IncidentError::Conflict) => {
                debug!(monitor = %monitor.id, incident = %incident_id, "TLS incident closed concurrently");
                return Ok(());
            }
            Err(IncidentError::Other(e)) => return Err(e),
        }
        self.incidents
            .add_timeline(&incident_id, &format!("Closed automatically, certificate now valid for {} days", days_left))
            .await?;

        info!(target: "uppe::audit", monitor = %monitor.id, incident = %incident_id, "TLS incident closed");

        let event = MonitorEvent::new(monitor.id, EventKind::TlsIncidentClose, "TLS incident closed", ctx.now)
            .with_reference(incident_id);
        self.database.append_event(&event).await?;
        Ok(())
    }
}

#[async_trait]
impl AutomationRule for TlsIncident {
    fn name(&self) -> &'static str {
        "tls_incident"
    }

    async fn apply(&self, ctx: &TransitionContext<'_>) -> Result<()> {
        let threshold = ctx.settings.tls_incident_threshold_days;
        if !ctx.settings.auto_tls_incident_enabled
            || !ctx.monitor.automation.tls_incident
            || threshold <= 0
            || ctx.tls.is_none()
        {
            return Ok(());
        }

        let previous = ctx.previous_tls_days();
        let current = ctx.next.tls_days_left;
        let reference = ctx.monitor.id.to_string();

        match current {
            Some(days) if ctx.tls_incident_crossed() => self.open(ctx, &reference, days).await,
            Some(days) if crossed_out(previous, current, threshold) => self.close(ctx, &reference, days).await,
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column(id: &str, active: bool, terminal: bool) -> BoardColumn {
        BoardColumn { id: id.to_string(), name: id.to_string(), active, terminal }
    }

    fn board(id: &str, columns: Vec<BoardColumn>) -> Board {
        Board { id: id.to_string(), name: id.to_string(), columns }
    }

    #[test]
    fn destination_prefers_open_column() {
        let boards = vec![
            board("archive", vec![column("done", true, true)]),
            board("ops", vec![column("closed", false, false), column("todo", true, false)]),
        ];
        let (b, c) = pick_destination(&boards).unwrap();
        assert_eq!(b.id, "ops");
        assert_eq!(c.id, "todo");
    }

    #[test]
    fn destination_falls_back_to_any_active_column() {
        let boards = vec![
            board("empty", vec![column("x", false, false)]),
            board("archive", vec![column("done", true, true)]),
        ];
        let (b, c) = pick_destination(&boards).unwrap();
        assert_eq!(b.id, "archive");
        assert_eq!(c.id, "done");

        assert!(pick_destination(&[board("empty", vec![column("x", false, false)])]).is_none());
        assert!(pick_destination(&[]).is_none());
    }

    #[test]
    fn severity_escalates() {
        assert_eq!(Severity::for_days_left(0), Severity::Critical);
        assert_eq!(Severity::for_days_left(3), Severity::Critical);
        assert_eq!(Severity::for_days_left(4), Severity::High);
        assert_eq!(Severity::for_days_left(7), Severity::High);
        assert_eq!(Severity::for_days_left(8), Severity::Medium);
    }
}
