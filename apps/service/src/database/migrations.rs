use anyhow::Result;
use libsql::Connection;

/// Schema version - increment when making schema changes
const SCHEMA_VERSION: i32 = 3;

/// Run database migrations
///
/// This is the single source of truth for the engine schema.
pub async fn run_migrations(conn: &Connection) -> Result<()> {
    // Create schema_migrations table first (tracks applied migrations)
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL,
            description TEXT
        )",
        (),
    )
    .await?;

    let current_version = get_current_version(conn).await?;

    if current_version >= SCHEMA_VERSION {
        tracing::info!("Database schema is up to date (version {})", current_version);
        return Ok(());
    }

    tracing::info!("Running migrations from version {} to {}", current_version, SCHEMA_VERSION);

    if current_version < 1 {
        run_migration_v1(conn).await?;
        record_migration(conn, 1, "Monitors, state, metrics, events and TLS snapshots").await?;
    }

    if current_version < 2 {
        run_migration_v2(conn).await?;
        record_migration(conn, 2, "Maintenance windows and engine settings").await?;
    }

    if current_version < 3 {
        run_migration_v3(conn).await?;
        record_migration(conn, 3, "Notification channels, dedup state and delivery log").await?;
    }

    tracing::info!("Database migrations completed successfully (now at version {})", SCHEMA_VERSION);
    Ok(())
}

/// Get current schema version from database
async fn get_current_version(conn: &Connection) -> Result<i32> {
    let mut rows = conn.query("SELECT MAX(version) FROM schema_migrations", ()).await?;

    if let Some(row) = rows.next().await? {
        let version: Option<i32> = row.get(0)?;
        Ok(version.unwrap_or(0))
    } else {
        Ok(0)
    }
}

/// Record that a migration was applied
async fn record_migration(conn: &Connection, version: i32, description: &str) -> Result<()> {
    let now = chrono::Utc::now().timestamp_millis();

    conn.execute(
        "INSERT INTO schema_migrations (version, applied_at, description) VALUES (?, ?, ?)",
        libsql::params![version, now, description],
    )
    .await?;

    tracing::info!("Applied migration v{}: {}", version, description);
    Ok(())
}

/// Migration v1: monitors and everything written per probe
async fn run_migration_v1(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS monitors (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            kind TEXT NOT NULL,
            target TEXT NOT NULL,
            interval_seconds INTEGER NOT NULL DEFAULT 60,
            timeout_seconds INTEGER NOT NULL DEFAULT 0,
            retries INTEGER NOT NULL DEFAULT 0,
            retry_interval_seconds INTEGER NOT NULL DEFAULT 0,
            accepted_status TEXT NOT NULL DEFAULT '[]',
            keyword TEXT,
            tags TEXT NOT NULL DEFAULT '[]',
            active INTEGER NOT NULL DEFAULT 1,
            paused INTEGER NOT NULL DEFAULT 0,
            sla_target REAL,
            owner_id TEXT,
            automation TEXT NOT NULL DEFAULT '{}',
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )",
        (),
    )
    .await?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS monitor_state (
            monitor_id TEXT PRIMARY KEY,
            status TEXT NOT NULL,
            raw_status TEXT NOT NULL,
            maintenance INTEGER NOT NULL DEFAULT 0,
            last_checked_at INTEGER,
            last_up_at INTEGER,
            last_down_at INTEGER,
            last_latency_ms INTEGER,
            last_status_code INTEGER,
            last_error TEXT,
            uptime_24h REAL NOT NULL DEFAULT 0,
            uptime_30d REAL NOT NULL DEFAULT 0,
            avg_latency_24h_ms REAL NOT NULL DEFAULT 0,
            tls_days_left INTEGER,
            tls_not_after INTEGER
        )",
        (),
    )
    .await?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS monitor_metrics (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            monitor_id TEXT NOT NULL,
            checked_at INTEGER NOT NULL,
            ok INTEGER NOT NULL,
            latency_ms INTEGER NOT NULL,
            status_code INTEGER,
            error TEXT
        )",
        (),
    )
    .await?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS monitor_events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            monitor_id TEXT NOT NULL,
            kind TEXT NOT NULL,
            message TEXT NOT NULL,
            reference TEXT,
            created_at INTEGER NOT NULL
        )",
        (),
    )
    .await?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS monitor_tls (
            monitor_id TEXT PRIMARY KEY,
            not_before INTEGER NOT NULL,
            not_after INTEGER NOT NULL,
            subject TEXT NOT NULL,
            issuer TEXT NOT NULL,
            sans TEXT NOT NULL DEFAULT '[]',
            fingerprint_sha256 TEXT NOT NULL,
            last_error TEXT,
            checked_at INTEGER NOT NULL
        )",
        (),
    )
    .await?;

    conn.execute("CREATE INDEX IF NOT EXISTS idx_monitors_active ON monitors(active, paused)", ()).await?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_monitor_metrics_monitor_checked ON monitor_metrics(monitor_id, checked_at DESC)",
        (),
    )
    .await?;
    conn.execute("CREATE INDEX IF NOT EXISTS idx_monitor_metrics_checked ON monitor_metrics(checked_at)", ()).await?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_monitor_events_monitor_created ON monitor_events(monitor_id, created_at)",
        (),
    )
    .await?;

    Ok(())
}

/// Migration v2: maintenance windows and the settings singleton
async fn run_migration_v2(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS monitor_maintenance (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            monitor_id TEXT,
            monitor_ids TEXT NOT NULL DEFAULT '[]',
            tags TEXT NOT NULL DEFAULT '[]',
            schedule TEXT NOT NULL,
            enabled INTEGER NOT NULL DEFAULT 1,
            created_at INTEGER NOT NULL
        )",
        (),
    )
    .await?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS monitor_settings (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            data TEXT NOT NULL,
            updated_at INTEGER NOT NULL
        )",
        (),
    )
    .await?;

    Ok(())
}

/// Migration v3: notification channels and dedup bookkeeping
async fn run_migration_v3(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS notification_channels (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            kind TEXT NOT NULL,
            destination TEXT NOT NULL,
            credential TEXT NOT NULL,
            template TEXT,
            quiet_hours TEXT,
            is_default INTEGER NOT NULL DEFAULT 0,
            active INTEGER NOT NULL DEFAULT 1,
            created_at INTEGER NOT NULL
        )",
        (),
    )
    .await?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS monitor_notification_channels (
            monitor_id TEXT NOT NULL,
            channel_id TEXT NOT NULL,
            enabled INTEGER NOT NULL DEFAULT 1,
            PRIMARY KEY (monitor_id, channel_id)
        )",
        (),
    )
    .await?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS monitor_notification_state (
            monitor_id TEXT PRIMARY KEY,
            last_notified_at INTEGER,
            last_down_notified_at INTEGER,
            last_up_notified_at INTEGER,
            last_tls_notified_at INTEGER,
            last_maintenance_notified_at INTEGER,
            down_started_at INTEGER,
            down_sequence INTEGER NOT NULL DEFAULT 0
        )",
        (),
    )
    .await?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS notification_deliveries (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            monitor_id TEXT NOT NULL,
            channel_id TEXT NOT NULL,
            kind TEXT NOT NULL,
            outcome TEXT NOT NULL,
            preview TEXT NOT NULL,
            error TEXT,
            created_at INTEGER NOT NULL
        )",
        (),
    )
    .await?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_notification_deliveries_monitor ON notification_deliveries(monitor_id, created_at)",
        (),
    )
    .await?;

    Ok(())
}
