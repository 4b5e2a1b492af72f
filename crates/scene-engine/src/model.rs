//! Data models for the scene engine

use chrono::{DateTime, Utc};
use habitat_core::{
    AutomationSession, KillSwitchEntry, Metric, OutletId, RuleId, SceneId, SessionId, ZoneId,
    ZoneMode,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Comparison operators accepted in rule conditions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "==")]
    Eq,
}

impl Operator {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Operator::Le => "<=",
            Operator::Ge => ">=",
            Operator::Lt => "<",
            Operator::Gt => ">",
            Operator::Eq => "==",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated rule condition.
///
/// Wire shape: `{"condition": "temperature", "operator": "<=", "value": 18}`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    #[serde(rename = "condition")]
    pub metric: Metric,
    pub operator: Operator,
    #[serde(rename = "value")]
    pub threshold: f64,
}

impl Condition {
    /// Validate a stored condition payload
    pub fn parse(raw: &serde_json::Value) -> Result<Self, String> {
        serde_json::from_value(raw.clone()).map_err(|e| format!("invalid condition {raw}: {e}"))
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.metric, self.operator, self.threshold)
    }
}

/// A validated rule action.
///
/// Wire shape: `{"on": {"5": true}, "off": {"3": true}}`. Entries whose
/// value is `false` are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleAction {
    #[serde(default)]
    pub on: BTreeMap<OutletId, bool>,
    #[serde(default)]
    pub off: BTreeMap<OutletId, bool>,
}

impl RuleAction {
    /// Validate a stored action payload
    pub fn parse(raw: &serde_json::Value) -> Result<Self, String> {
        serde_json::from_value(raw.clone()).map_err(|e| format!("invalid action {raw}: {e}"))
    }

    /// Outlets this action turns on
    pub fn turn_on(&self) -> impl Iterator<Item = OutletId> + '_ {
        self.on.iter().filter(|(_, v)| **v).map(|(&id, _)| id)
    }

    /// Outlets this action turns off
    pub fn turn_off(&self) -> impl Iterator<Item = OutletId> + '_ {
        self.off.iter().filter(|(_, v)| **v).map(|(&id, _)| id)
    }
}

/// One metric value with its timestamp
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub value: f64,
    pub observed_at: DateTime<Utc>,
}

/// Latest readings of a zone, one per metric
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SensorSnapshot(BTreeMap<Metric, Observation>);

impl SensorSnapshot {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert, handy in tests
    #[must_use]
    pub fn with(mut self, metric: Metric, value: f64, observed_at: DateTime<Utc>) -> Self {
        self.insert(metric, value, observed_at);
        self
    }

    pub fn insert(&mut self, metric: Metric, value: f64, observed_at: DateTime<Utc>) {
        self.0.insert(metric, Observation { value, observed_at });
    }

    #[must_use]
    pub fn get(&self, metric: Metric) -> Option<&Observation> {
        self.0.get(&metric)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Result of checking one condition against a snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOutcome {
    Matched,
    NotMatched,
    /// No reading for the metric
    MissingMetric,
    /// Latest reading is older than the freshness window
    StaleReading,
    /// Threshold of exactly zero disables the rule
    ZeroThreshold,
    /// Condition payload could not be validated
    InvalidCondition,
}

impl ConditionOutcome {
    #[must_use]
    pub fn is_match(self) -> bool {
        self == ConditionOutcome::Matched
    }
}

/// How one rule fared during resolution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleTrace {
    pub rule_id: RuleId,
    pub rule_name: String,
    pub priority: i32,
    pub outcome: ConditionOutcome,
    /// Outlet states this rule contributed
    #[serde(default)]
    pub applied: BTreeMap<OutletId, bool>,
    /// Configuration error, if any
    #[serde(default)]
    pub error: Option<String>,
}

/// Why an outlet was not switched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    UnknownOutlet,
    OutletDisabled,
    ManualOverrideActive,
    AlreadyInDesiredState,
    CommandFailed,
}

impl SkipReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            SkipReason::UnknownOutlet => "unknown_outlet",
            SkipReason::OutletDisabled => "outlet_disabled",
            SkipReason::ManualOverrideActive => "manual_override_active",
            SkipReason::AlreadyInDesiredState => "already_in_desired_state",
            SkipReason::CommandFailed => "command_failed",
        }
    }
}

/// Result of reconciling one outlet
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutletOutcome {
    pub outlet_id: OutletId,
    #[serde(default)]
    pub outlet_name: Option<String>,
    pub desired: bool,
    /// A command was issued and confirmed
    pub switched: bool,
    #[serde(default)]
    pub reason: Option<SkipReason>,
    #[serde(default)]
    pub error: Option<String>,
}

impl OutletOutcome {
    pub(crate) fn skipped(
        outlet_id: OutletId,
        outlet_name: Option<String>,
        desired: bool,
        reason: SkipReason,
    ) -> Self {
        Self {
            outlet_id,
            outlet_name,
            desired,
            switched: false,
            reason: Some(reason),
            error: None,
        }
    }

    #[must_use]
    pub fn failed(&self) -> bool {
        self.error.is_some()
    }
}

/// Result of reconciling a desired-state map
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApplyResult {
    pub executed: Vec<OutletOutcome>,
    /// False iff a command or a state write failed
    pub success: bool,
}

impl ApplyResult {
    /// Number of commands confirmed by the provider
    #[must_use]
    pub fn commands_issued(&self) -> usize {
        self.executed.iter().filter(|o| o.switched).count()
    }

    #[must_use]
    pub fn outcome(&self, outlet_id: OutletId) -> Option<&OutletOutcome> {
        self.executed.iter().find(|o| o.outlet_id == outlet_id)
    }
}

/// Everything that happened while evaluating one scene
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub zone_id: ZoneId,
    pub scene_id: SceneId,
    #[serde(default)]
    pub session_id: Option<SessionId>,
    pub evaluated_at: DateTime<Utc>,
    pub snapshot: SensorSnapshot,
    pub rules: Vec<RuleTrace>,
    pub desired: BTreeMap<OutletId, bool>,
    #[serde(default)]
    pub warnings: Vec<String>,
    pub apply: ApplyResult,
}

impl EvaluationReport {
    #[must_use]
    pub fn matched_rules(&self) -> usize {
        self.rules.iter().filter(|r| r.outcome.is_match()).count()
    }
}

/// A failure isolated to one zone or session during a tick
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickFailure {
    /// e.g. "session 4", "zone 2"
    pub scope: String,
    pub error: String,
}

/// Summary of one scheduler pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickReport {
    pub started_at: DateTime<Utc>,
    pub skipped_kill_switch: bool,
    pub expired: Vec<SessionId>,
    pub evaluations: Vec<EvaluationReport>,
    pub failures: Vec<TickFailure>,
}

impl TickReport {
    pub(crate) fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            skipped_kill_switch: false,
            expired: Vec::new(),
            evaluations: Vec::new(),
            failures: Vec::new(),
        }
    }

    /// Device commands confirmed during the tick
    #[must_use]
    pub fn commands_issued(&self) -> usize {
        self.evaluations
            .iter()
            .map(|e| e.apply.commands_issued())
            .sum()
    }
}

/// A session with its remaining time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionView {
    #[serde(flatten)]
    pub session: AutomationSession,
    /// Zero for sessions that are no longer running
    pub remaining_seconds: i64,
}

impl SessionView {
    #[must_use]
    pub fn new(session: AutomationSession, now: DateTime<Utc>) -> Self {
        let remaining_seconds = if session.is_running() {
            session.remaining(now).num_seconds()
        } else {
            0
        };
        Self {
            session,
            remaining_seconds,
        }
    }
}

/// Automation state of a zone
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomationStatus {
    pub zone_id: ZoneId,
    pub mode: ZoneMode,
    pub session: Option<SessionView>,
}

/// Current kill-switch state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KillSwitchStatus {
    pub active: bool,
    pub latest: Option<KillSwitchEntry>,
}

/// A sensor measurement pushed by a gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestReading {
    pub zone_id: ZoneId,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub humidity: Option<f64>,
    #[serde(default)]
    pub observed_at: Option<DateTime<Utc>>,
}

impl IngestReading {
    /// Metric values present in the payload
    #[must_use]
    pub fn values(&self) -> Vec<(Metric, f64)> {
        [
            (Metric::Temperature, self.temperature),
            (Metric::Humidity, self.humidity),
        ]
        .into_iter()
        .filter_map(|(metric, value)| value.map(|v| (metric, v)))
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_condition_wire_shape() {
        let condition =
            Condition::parse(&json!({"condition": "temperature", "operator": "<=", "value": 18}))
                .unwrap();
        assert_eq!(condition.metric, Metric::Temperature);
        assert_eq!(condition.operator, Operator::Le);
        assert_eq!(condition.threshold, 18.0);
        assert_eq!(condition.to_string(), "temperature <= 18");
    }

    #[test]
    fn test_condition_rejects_unknown_operator() {
        let err = Condition::parse(&json!({"condition": "humidity", "operator": "!=", "value": 60}))
            .unwrap_err();
        assert!(err.contains("invalid condition"));
        assert!(Condition::parse(&json!({"condition": "pressure", "operator": "<", "value": 1}))
            .is_err());
        assert!(Condition::parse(&json!({"condition": "humidity", "operator": "<"})).is_err());
    }

    #[test]
    fn test_action_ignores_false_entries() {
        let action = RuleAction::parse(&json!({"on": {"5": true, "6": false}, "off": {"3": true}}))
            .unwrap();
        assert_eq!(action.turn_on().collect::<Vec<_>>(), vec![5]);
        assert_eq!(action.turn_off().collect::<Vec<_>>(), vec![3]);

        let empty = RuleAction::parse(&json!({})).unwrap();
        assert_eq!(empty, RuleAction::default());
        assert!(RuleAction::parse(&json!({"on": {"five": true}})).is_err());
    }

    #[test]
    fn test_snapshot_serializes_by_metric_name() {
        let at = Utc::now();
        let snapshot = SensorSnapshot::new().with(Metric::Humidity, 55.0, at);
        let value = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(value["humidity"]["value"], json!(55.0));
        assert!(value.get("temperature").is_none());
    }

    #[test]
    fn test_ingest_values() {
        let reading: IngestReading =
            serde_json::from_value(json!({"zone_id": 1, "temperature": 21.5})).unwrap();
        assert_eq!(reading.values(), vec![(Metric::Temperature, 21.5)]);
        assert!(reading.observed_at.is_none());
    }
}
