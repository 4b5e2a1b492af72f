//! Events broadcast by the engine

use chrono::{DateTime, Utc};
use habitat_core::{OutletId, SceneId, SessionId, ZoneId};
use serde::Serialize;

/// Events emitted by the scene engine
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// An outlet command was confirmed by the device provider
    OutletStateChanged {
        zone_id: ZoneId,
        outlet_id: OutletId,
        state: bool,
        /// "automation" or "manual"
        source: &'static str,
    },
    /// A session began
    SessionStarted {
        zone_id: ZoneId,
        scene_id: SceneId,
        session_id: SessionId,
        duration_minutes: u32,
    },
    /// A session was stopped or superseded
    SessionStopped {
        zone_id: ZoneId,
        session_id: SessionId,
    },
    /// A session ran for its full duration
    SessionCompleted {
        zone_id: ZoneId,
        session_id: SessionId,
    },
    /// A session could not continue
    SessionFailed {
        zone_id: ZoneId,
        session_id: SessionId,
        error: String,
    },
    /// The kill switch changed state
    KillSwitchChanged {
        active: bool,
        reason: Option<String>,
    },
    /// A scene was evaluated against its zone's readings
    SceneEvaluated {
        zone_id: ZoneId,
        scene_id: SceneId,
        matched_rules: usize,
        commands: usize,
        success: bool,
        evaluated_at: DateTime<Utc>,
    },
}
