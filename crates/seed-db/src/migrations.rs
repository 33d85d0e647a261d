//! # Database Migrations
//!
//! Embedded SQL migrations for the bookkeeping tables.
//!
//! ## What Gets Created
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Bookkeeping Schema                                 │
//! │                                                                         │
//! │  seed_tables                       seed_records                        │
//! │  ┌──────────────────────┐          ┌──────────────────────┐            │
//! │  │ id                   │◄─────────│ seed_table_id        │            │
//! │  │ name (UNIQUE)        │          │ record_id            │            │
//! │  │ digest               │          │ digest               │            │
//! │  │ schema_digest        │          │ UNIQUE(table, rec)   │            │
//! │  │ cache_disabled       │          └──────────────────────┘            │
//! │  └──────────────────────┘                                              │
//! │                                                                         │
//! │  Target tables are NOT created here; they belong to the host.          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Adding New Migrations
//!
//! 1. Create a new file in `migrations/sqlite/` with the next sequence number
//! 2. Name format: `NNN_description.sql`
//! 3. **NEVER** modify existing migrations - always add new ones

use sqlx::SqlitePool;
use tracing::info;

use crate::error::DbResult;

/// Embedded migrations from the `migrations/sqlite` directory.
static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations/sqlite");

/// Runs all pending database migrations.
///
/// Idempotent; each migration runs in its own transaction, in filename order.
pub async fn run_migrations(pool: &SqlitePool) -> DbResult<()> {
    info!("Checking for pending migrations");

    MIGRATOR.run(pool).await?;

    info!("All migrations applied successfully");
    Ok(())
}

/// Returns information about migrations.
///
/// ## Returns
/// Tuple of (total_migrations, applied_migrations)
///
/// ## Errors
/// Fails on a pool that never ran [`run_migrations`], since the
/// `_sqlx_migrations` table does not exist yet.
pub async fn migration_status(pool: &SqlitePool) -> DbResult<(usize, usize)> {
    let total = MIGRATOR.migrations.len();

    let applied: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM _sqlx_migrations")
        .fetch_one(pool)
        .await?;

    Ok((total, applied as usize))
}
