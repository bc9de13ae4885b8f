//! Snapshot data files (pretty JSON)

use crate::error::Result;
use crate::model::TopologySnapshot;
use std::path::Path;
use tracing::info;

/// Write `snapshot` to `path`, creating parent directories
pub async fn save_snapshot(path: &Path, snapshot: &TopologySnapshot) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let content = serde_json::to_string_pretty(snapshot)?;
    tokio::fs::write(path, content).await?;
    info!("Snapshot {} written to {}", snapshot.scan_id, path.display());
    Ok(())
}

/// Load a snapshot; lookup maps are rebuilt from the stored lists
pub async fn load_snapshot(path: &Path) -> Result<TopologySnapshot> {
    let content = tokio::fs::read_to_string(path).await?;
    let snapshot: TopologySnapshot = serde_json::from_str(&content)?;
    info!(
        "Loaded snapshot {} ({} controllers) from {}",
        snapshot.scan_id,
        snapshot.controllers().len(),
        path.display()
    );
    Ok(snapshot)
}
