use anyhow::Result;

use crate::config::Config;
use crate::db;
use crate::store::SnapshotStore;

/// List imported snapshots with their shapes.
pub async fn list_workspaces(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    crate::migrate::apply_schema(&pool).await?;
    let store = SnapshotStore::load(&pool).await?;
    pool.close().await;

    let infos = store.list();
    if infos.is_empty() {
        println!("No workspaces imported. Run `wsd import <snapshot.json>` first.");
        return Ok(());
    }

    println!(
        "{:<14} {:<20} {:<16} {:>8} {:>8} {:>6}  EXTRACTED",
        "WORKSPACE", "NAME", "DOMAIN", "CHANNELS", "CANVASES", "USERS"
    );
    for info in infos {
        println!(
            "{:<14} {:<20} {:<16} {:>8} {:>8} {:>6}  {}",
            info.workspace_id,
            info.name,
            info.domain,
            info.channels,
            info.canvases,
            info.users,
            info.extracted_at
        );
    }

    Ok(())
}
