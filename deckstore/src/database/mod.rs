//! Database module
//!
//! SQLite backing for the structured key/value backend:
//! - Schema and migrations
//! - Repository layer for key/value rows

pub mod repository;
pub mod schema;

pub use repository::Repository;
pub use schema::initialize_database;

use crate::error::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Build connection options shared by migration and application connections.
fn connect_options(db_path: &Path) -> std::result::Result<SqliteConnectOptions, sqlx::Error> {
    SqliteConnectOptions::from_str(&format!("sqlite://{}?mode=rwc", db_path.display())).map(
        |opts| {
            opts.create_if_missing(true)
                .busy_timeout(Duration::from_secs(5))
                .journal_mode(SqliteJournalMode::Wal)
        },
    )
}

/// Create and initialize a database connection pool.
///
/// Migrations run on a dedicated single-connection pool that is closed
/// before the application pool is opened, so pooled connections always see
/// the final schema.
pub async fn create_pool(db_path: &Path) -> Result<SqlitePool> {
    tracing::info!("Creating database connection pool at: {:?}", db_path);

    if let Some(parent) = db_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let migration_pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(connect_options(db_path)?)
        .await?;

    initialize_database(&migration_pool).await?;
    migration_pool.close().await;

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(connect_options(db_path)?)
        .await?;

    tracing::info!("Database pool created successfully");

    Ok(pool)
}
