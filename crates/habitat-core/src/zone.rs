//! Habitat zones

use crate::ZoneId;
use serde::{Deserialize, Serialize};

/// Whether a zone is driven by an automation session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ZoneMode {
    #[default]
    Manual,
    Automatic,
}

/// A physical habitat (greenhouse, terrarium) under independent automation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Zone {
    pub id: ZoneId,
    /// Stable short name (e.g. "serra")
    pub slug: String,
    pub name: String,
    #[serde(default)]
    pub mode: ZoneMode,
    /// Inactive zones are never evaluated
    pub active: bool,
    #[serde(default)]
    pub settings: serde_json::Value,
}
