//! Error types for the scene engine

use habitat_core::StoreError;
use thiserror::Error;
use tuya_cloud::ControlError;

/// Errors that can occur in the scene engine
#[derive(Error, Debug)]
pub enum EngineError {
    /// Zone not found
    #[error("Zone not found: {0}")]
    ZoneNotFound(i64),

    /// Scene not found
    #[error("Scene not found: {0}")]
    SceneNotFound(i64),

    /// Outlet not found
    #[error("Outlet not found: {0}")]
    OutletNotFound(i64),

    /// Device not found
    #[error("Device not found: {0}")]
    DeviceNotFound(i64),

    /// Scene belongs to another zone
    #[error("Scene {scene_id} does not belong to zone {zone_id}")]
    SceneZoneMismatch { scene_id: i64, zone_id: i64 },

    /// Session duration must be positive
    #[error("Invalid session duration: {0} minutes")]
    InvalidDuration(u32),

    /// Countdown outside the supported range
    #[error("Invalid countdown: {0}")]
    InvalidCountdown(String),

    /// No running session for the zone
    #[error("No running automation session for zone {0}")]
    NoRunningSession(i64),

    /// Operation blocked by the kill switch
    #[error("Kill switch is active")]
    KillSwitchActive,

    /// Kill switch activation requested twice
    #[error("Kill switch is already active")]
    KillSwitchAlreadyActive,

    /// Kill switch deactivation requested while inactive
    #[error("Kill switch is not active")]
    KillSwitchNotActive,

    /// Outlet is disabled
    #[error("Outlet is disabled: {0}")]
    OutletDisabled(i64),

    /// Device command failed
    #[error("Device control failed: {0}")]
    DeviceControl(#[from] ControlError),

    /// Persistence failure
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl EngineError {
    /// Whether the error refers to a missing record
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            EngineError::ZoneNotFound(_)
                | EngineError::SceneNotFound(_)
                | EngineError::OutletNotFound(_)
                | EngineError::DeviceNotFound(_)
                | EngineError::NoRunningSession(_)
                | EngineError::Store(StoreError::NotFound { .. })
        )
    }
}
