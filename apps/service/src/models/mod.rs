//! Domain records shared by the engine and the persistence gateway.

pub mod event;
pub mod maintenance;
pub mod metric;
pub mod monitor;
pub mod notification;
pub mod settings;
pub mod state;
pub mod tls;

pub use event::{EventKind, MonitorEvent};
pub use maintenance::{MaintenanceSchedule, MonitorMaintenance};
pub use metric::{CheckResult, MetricSummary, MonitorMetric, ProbeErrorKind, TlsMetadata};
pub use monitor::{AutomationToggles, Monitor, MonitorKind, StatusRange};
pub use notification::{
    ChannelKind, DeliveryOutcome, MonitorChannelLink, MonitorNotificationState,
    NotificationChannel, NotificationDelivery, NotificationKind, QuietHours,
};
pub use settings::MonitorSettings;
pub use state::{MonitorState, RawStatus, Status};
pub use tls::MonitorTls;
