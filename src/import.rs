//! Snapshot import.
//!
//! Reads a workspace export (JSON), validates it, and upserts it into the
//! snapshot store keyed by workspace id. A re-import with identical content
//! is detected via a dedup hash and skipped; changed content replaces the
//! stored snapshot wholesale — snapshots are superseded, never mutated.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{bail, Context, Result};
use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::db;
use crate::models::Snapshot;

pub async fn run_import(config: &Config, path: &Path) -> Result<()> {
    let body = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read snapshot file: {}", path.display()))?;
    let snapshot: Snapshot = serde_json::from_str(&body)
        .with_context(|| format!("Failed to parse snapshot file: {}", path.display()))?;

    validate_snapshot(&snapshot)?;

    let pool = db::connect(config).await?;
    let outcome = upsert_snapshot(&pool, &snapshot, &body).await?;
    pool.close().await;

    println!("import {}", snapshot.workspace_id);
    println!("  name: {}", snapshot.name);
    println!("  domain: {}", snapshot.domain);
    println!("  users: {}", snapshot.users.len());
    println!("  channels: {}", snapshot.channels.len());
    let message_count: usize = snapshot.channels.iter().map(|c| c.messages.len()).sum();
    println!("  messages: {}", message_count);
    println!("  canvases: {}", snapshot.canvases.len());
    match outcome {
        ImportOutcome::Inserted => println!("  stored: new snapshot"),
        ImportOutcome::Replaced => println!("  stored: replaced previous snapshot"),
        ImportOutcome::Unchanged => println!("  stored: unchanged, skipped"),
    }
    println!("ok");
    Ok(())
}

#[derive(Debug, PartialEq, Eq)]
pub enum ImportOutcome {
    Inserted,
    Replaced,
    Unchanged,
}

/// Structural validation of an export before it is accepted.
pub fn validate_snapshot(snapshot: &Snapshot) -> Result<()> {
    if snapshot.workspace_id.trim().is_empty() {
        bail!("snapshot has an empty workspace_id");
    }
    if snapshot.domain.trim().is_empty() {
        bail!("snapshot has an empty domain");
    }

    let mut user_ids = HashSet::new();
    for user in &snapshot.users {
        if !user_ids.insert(user.id.as_str()) {
            bail!("duplicate user id in snapshot: {}", user.id);
        }
    }

    let mut channel_ids = HashSet::new();
    for channel in &snapshot.channels {
        if !channel_ids.insert(channel.id.as_str()) {
            bail!("duplicate channel id in snapshot: {}", channel.id);
        }
    }

    let mut canvas_ids = HashSet::new();
    for canvas in &snapshot.canvases {
        if !canvas_ids.insert(canvas.id.as_str()) {
            bail!("duplicate canvas id in snapshot: {}", canvas.id);
        }
    }

    // Author/creator references that do not resolve are allowed: they
    // render as "unknown user" at processing time.
    Ok(())
}

async fn upsert_snapshot(
    pool: &SqlitePool,
    snapshot: &Snapshot,
    body: &str,
) -> Result<ImportOutcome> {
    let mut hasher = Sha256::new();
    hasher.update(snapshot.workspace_id.as_bytes());
    hasher.update(body.as_bytes());
    let dedup_hash = format!("{:x}", hasher.finalize());

    let existing: Option<String> =
        sqlx::query("SELECT dedup_hash FROM snapshots WHERE workspace_id = ?")
            .bind(&snapshot.workspace_id)
            .fetch_optional(pool)
            .await?
            .map(|row| row.get("dedup_hash"));

    match existing.as_deref() {
        Some(hash) if hash == dedup_hash => return Ok(ImportOutcome::Unchanged),
        _ => {}
    }

    let now = chrono::Utc::now().timestamp();
    sqlx::query(
        r#"
        INSERT INTO snapshots (workspace_id, name, domain, extracted_at, body, dedup_hash, imported_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(workspace_id) DO UPDATE SET
            name = excluded.name,
            domain = excluded.domain,
            extracted_at = excluded.extracted_at,
            body = excluded.body,
            dedup_hash = excluded.dedup_hash,
            imported_at = excluded.imported_at
        "#,
    )
    .bind(&snapshot.workspace_id)
    .bind(&snapshot.name)
    .bind(&snapshot.domain)
    .bind(snapshot.extracted_at.timestamp())
    .bind(body)
    .bind(&dedup_hash)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(match existing {
        Some(_) => ImportOutcome::Replaced,
        None => ImportOutcome::Inserted,
    })
}
