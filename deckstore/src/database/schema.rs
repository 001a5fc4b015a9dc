//! Database schema and migrations
//!
//! Versioned schema for the key/value store. Each migration runs once, in a
//! transaction, and is recorded in the `migrations` table.

use crate::error::Result;
use sqlx::{sqlite::SqlitePool, Row};

/// Initialize database with schema
pub async fn initialize_database(pool: &SqlitePool) -> Result<()> {
    tracing::info!("Initializing database schema");

    sqlx::query("PRAGMA journal_mode = WAL")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS migrations (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    let current_version: i32 = sqlx::query("SELECT COALESCE(MAX(version), 0) FROM migrations")
        .fetch_one(pool)
        .await?
        .get(0);

    tracing::info!("Current database version: {}", current_version);

    apply_migrations(pool, current_version).await?;

    tracing::info!("Database initialization complete");
    Ok(())
}

async fn apply_migrations(pool: &SqlitePool, current_version: i32) -> Result<()> {
    for (version, sql) in get_migrations() {
        if version > current_version {
            tracing::info!("Applying migration version {}", version);

            let mut tx = pool.begin().await?;

            for statement in sql.split(';').filter(|s| !s.trim().is_empty()) {
                sqlx::query(statement).execute(&mut *tx).await?;
            }

            sqlx::query("INSERT INTO migrations (version) VALUES (?)")
                .bind(version)
                .execute(&mut *tx)
                .await?;

            tx.commit().await?;

            tracing::info!("Migration version {} applied successfully", version);
        }
    }

    Ok(())
}

fn get_migrations() -> Vec<(i32, &'static str)> {
    vec![(
        1,
        r#"
        CREATE TABLE IF NOT EXISTS state_store (
            key TEXT PRIMARY KEY NOT NULL,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_state_store_updated_at ON state_store(updated_at)
        "#,
    )]
}
