//! Append-only kill-switch and audit logs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One kill-switch transition. Rows are never mutated; the newest row is
/// the current state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KillSwitchEntry {
    pub id: i64,
    pub is_active: bool,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub activated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub deactivated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// An audit record of an operator or engine action
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: i64,
    /// e.g. "kill_switch_activated", "session_started"
    pub action: String,
    #[serde(default)]
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}
