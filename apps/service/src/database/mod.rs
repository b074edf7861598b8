//! Persistence gateway
//!
//! The engine talks to storage only through the [`Database`] trait. Two backends
//! ship: LibSQL (SQLite) behind a connection pool, and an in-memory store for tests
//! and ephemeral runs.

pub mod memory;
pub mod migrations;
pub mod repository;

pub use memory::MemoryDatabase;
pub use repository::{Database, DatabaseImpl};

use anyhow::Result;

/// Initialize database with schema
pub async fn initialize_database(conn: &libsql::Connection) -> Result<()> {
    migrations::run_migrations(conn).await
}
