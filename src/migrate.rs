use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply_schema(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create the schema. Idempotent — safe to run on every startup.
pub async fn apply_schema(pool: &SqlitePool) -> Result<()> {
    // Snapshot store, one row per workspace; re-import replaces the row.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS snapshots (
            workspace_id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            domain TEXT NOT NULL,
            extracted_at INTEGER NOT NULL,
            body TEXT NOT NULL,
            dedup_hash TEXT NOT NULL,
            imported_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Terminal task records, persisted for durability across restarts.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tasks (
            id TEXT PRIMARY KEY,
            workspace_id TEXT NOT NULL,
            state TEXT NOT NULL,
            progress INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            started_at INTEGER,
            finished_at INTEGER,
            result_json TEXT,
            error TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_tasks_workspace_id ON tasks(workspace_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_tasks_finished_at ON tasks(finished_at DESC)")
        .execute(pool)
        .await?;

    Ok(())
}
