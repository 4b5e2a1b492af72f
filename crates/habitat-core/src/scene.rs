//! Scenes and their rules

use crate::{RuleId, SceneId, ZoneId};
use serde::{Deserialize, Serialize};

/// A named automation configuration for a zone
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scene {
    pub id: SceneId,
    pub zone_id: ZoneId,
    pub name: String,
    pub slug: String,
    /// Free-form targets and habitat metadata
    #[serde(default)]
    pub settings: serde_json::Value,
    #[serde(default)]
    pub is_active: bool,
}

/// A threshold rule owned by a [`Scene`].
///
/// Condition and action are kept in their wire shape, e.g.
/// `{"condition": "temperature", "operator": "<=", "value": 18}` and
/// `{"on": {"5": true}, "off": {}}`. The engine validates them when it
/// evaluates the rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneRule {
    pub id: RuleId,
    pub scene_id: SceneId,
    pub name: String,
    pub condition: serde_json::Value,
    pub action: serde_json::Value,
    /// Higher values are applied later and win conflicts
    #[serde(default)]
    pub priority: i32,
}
