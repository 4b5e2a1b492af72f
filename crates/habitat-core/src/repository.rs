//! Repository port consumed by the scene engine

use crate::device::{Device, Outlet};
use crate::error::StoreError;
use crate::kill_switch::{AuditEntry, KillSwitchEntry};
use crate::scene::{Scene, SceneRule};
use crate::sensor::{Metric, Reading, Sensor};
use crate::session::AutomationSession;
use crate::zone::{Zone, ZoneMode};
use crate::{DeviceId, OutletId, SceneId, SessionId, ZoneId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Read/write access to habitat records.
///
/// Every write is atomic on its own; callers that need several writes to
/// appear together serialize them per zone.
#[async_trait]
pub trait Repository: Send + Sync {
    // Zones

    async fn get_zone(&self, id: ZoneId) -> Result<Option<Zone>, StoreError>;

    async fn list_zones(&self) -> Result<Vec<Zone>, StoreError>;

    async fn set_zone_mode(&self, id: ZoneId, mode: ZoneMode) -> Result<Zone, StoreError>;

    // Devices and outlets

    async fn get_device(&self, id: DeviceId) -> Result<Option<Device>, StoreError>;

    async fn get_outlet(&self, id: OutletId) -> Result<Option<Outlet>, StoreError>;

    /// Outlets of every device installed in the zone
    async fn list_zone_outlets(&self, zone_id: ZoneId) -> Result<Vec<Outlet>, StoreError>;

    /// Record a state confirmed by the device provider
    async fn set_outlet_state(&self, id: OutletId, state: bool) -> Result<Outlet, StoreError>;

    /// Set (`Some`) or clear (`None`) a manual override
    async fn set_manual_override(
        &self,
        id: OutletId,
        until: Option<DateTime<Utc>>,
    ) -> Result<Outlet, StoreError>;

    // Sensors

    async fn list_zone_sensors(&self, zone_id: ZoneId) -> Result<Vec<Sensor>, StoreError>;

    /// Return the zone's first sensor, creating a gateway sensor if it has none
    async fn ensure_zone_sensor(&self, zone_id: ZoneId) -> Result<Sensor, StoreError>;

    /// Most recent reading of `metric` across all sensors of the zone
    async fn latest_reading(
        &self,
        zone_id: ZoneId,
        metric: Metric,
    ) -> Result<Option<Reading>, StoreError>;

    /// Store a reading; the id is assigned by the store
    async fn insert_reading(&self, reading: Reading) -> Result<Reading, StoreError>;

    // Scenes

    async fn get_scene(&self, id: SceneId) -> Result<Option<Scene>, StoreError>;

    async fn list_zone_scenes(&self, zone_id: ZoneId) -> Result<Vec<Scene>, StoreError>;

    async fn list_active_scenes(&self) -> Result<Vec<Scene>, StoreError>;

    /// Flag a scene active and every other scene of its zone inactive
    async fn activate_scene(&self, id: SceneId) -> Result<Scene, StoreError>;

    /// Rules of a scene in insertion order
    async fn list_rules(&self, scene_id: SceneId) -> Result<Vec<SceneRule>, StoreError>;

    // Sessions

    async fn get_session(&self, id: SessionId) -> Result<Option<AutomationSession>, StoreError>;

    async fn running_session(
        &self,
        zone_id: ZoneId,
    ) -> Result<Option<AutomationSession>, StoreError>;

    async fn list_running_sessions(&self) -> Result<Vec<AutomationSession>, StoreError>;

    /// Sessions of a zone, newest first
    async fn list_zone_sessions(
        &self,
        zone_id: ZoneId,
        limit: usize,
    ) -> Result<Vec<AutomationSession>, StoreError>;

    /// Store a new session; the id is assigned by the store
    async fn insert_session(
        &self,
        session: AutomationSession,
    ) -> Result<AutomationSession, StoreError>;

    async fn update_session(
        &self,
        session: AutomationSession,
    ) -> Result<AutomationSession, StoreError>;

    // Kill switch and audit

    async fn latest_kill_switch(&self) -> Result<Option<KillSwitchEntry>, StoreError>;

    /// Append a kill-switch row; the id is assigned by the store
    async fn append_kill_switch(
        &self,
        entry: KillSwitchEntry,
    ) -> Result<KillSwitchEntry, StoreError>;

    async fn append_audit(
        &self,
        action: &str,
        details: serde_json::Value,
    ) -> Result<AuditEntry, StoreError>;
}
