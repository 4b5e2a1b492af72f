//! Snapshot persistence using JSON file storage

use crate::device::{Device, Outlet};
use crate::error::StoreError;
use crate::kill_switch::{AuditEntry, KillSwitchEntry};
use crate::scene::{Scene, SceneRule};
use crate::sensor::{Reading, Sensor};
use crate::session::AutomationSession;
use crate::zone::Zone;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tokio::fs;

/// Every table of the store, as written to disk
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Tables {
    #[serde(default)]
    pub zones: BTreeMap<i64, Zone>,
    #[serde(default)]
    pub devices: BTreeMap<i64, Device>,
    #[serde(default)]
    pub outlets: BTreeMap<i64, Outlet>,
    #[serde(default)]
    pub sensors: BTreeMap<i64, Sensor>,
    #[serde(default)]
    pub readings: Vec<Reading>,
    #[serde(default)]
    pub scenes: BTreeMap<i64, Scene>,
    #[serde(default)]
    pub rules: BTreeMap<i64, SceneRule>,
    #[serde(default)]
    pub sessions: BTreeMap<i64, AutomationSession>,
    #[serde(default)]
    pub kill_switch: Vec<KillSwitchEntry>,
    #[serde(default)]
    pub audit: Vec<AuditEntry>,
}

/// Load tables from a JSON file; `None` when the file does not exist yet
pub async fn load_tables(path: &Path) -> Result<Option<Tables>, StoreError> {
    match fs::read_to_string(path).await {
        Ok(contents) => {
            let tables: Tables = serde_json::from_str(&contents)?;
            tracing::info!(
                "Loaded {} zones, {} outlets, {} scenes from {:?}",
                tables.zones.len(),
                tables.outlets.len(),
                tables.scenes.len(),
                path
            );
            Ok(Some(tables))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No store file found at {:?}, starting fresh", path);
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

/// Write a snapshot of `tables` to `path`.
///
/// The compact document lands in a sibling `.tmp` file first and replaces
/// `path` only once fully written, so readers never see a torn snapshot.
/// A failed save leaves the previous snapshot in place.
pub async fn save_tables(path: &Path, tables: &Tables) -> Result<(), StoreError> {
    let encoded = serde_json::to_vec(tables)?;
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).await?;
    }

    let staging = path.with_extension("json.tmp");
    if let Err(e) = fs::write(&staging, &encoded).await {
        let _ = fs::remove_file(&staging).await;
        return Err(e.into());
    }
    fs::rename(&staging, path).await?;

    tracing::trace!("Wrote {} byte snapshot to {:?}", encoded.len(), path);
    Ok(())
}
