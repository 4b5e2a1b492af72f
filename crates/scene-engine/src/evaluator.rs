//! Condition evaluator for scene rules

use crate::config::EngineConfig;
use crate::model::{Condition, ConditionOutcome, Operator, SensorSnapshot};
use chrono::{DateTime, Utc};

/// Evaluator for threshold conditions
#[derive(Debug, Clone)]
pub struct ConditionEvaluator {
    freshness: chrono::Duration,
    hysteresis: f64,
}

impl ConditionEvaluator {
    /// Create a new condition evaluator
    #[must_use]
    pub fn new(freshness: chrono::Duration, hysteresis: f64) -> Self {
        Self {
            freshness,
            hysteresis: hysteresis.abs(),
        }
    }

    /// Create an evaluator from engine configuration
    #[must_use]
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.freshness(), config.hysteresis)
    }

    /// Evaluate a condition; any outcome other than a match is `false`
    #[must_use]
    pub fn evaluate(
        &self,
        condition: &Condition,
        snapshot: &SensorSnapshot,
        now: DateTime<Utc>,
    ) -> bool {
        self.check(condition, snapshot, now).is_match()
    }

    /// Evaluate a stored condition payload, treating validation failures
    /// as configuration errors
    pub fn check_raw(
        &self,
        raw: &serde_json::Value,
        snapshot: &SensorSnapshot,
        now: DateTime<Utc>,
    ) -> (ConditionOutcome, Option<String>) {
        match Condition::parse(raw) {
            Ok(condition) => (self.check(&condition, snapshot, now), None),
            Err(e) => {
                tracing::warn!("Configuration error: {}", e);
                (ConditionOutcome::InvalidCondition, Some(e))
            }
        }
    }

    /// Evaluate a condition and report why it did or did not match
    #[must_use]
    pub fn check(
        &self,
        condition: &Condition,
        snapshot: &SensorSnapshot,
        now: DateTime<Utc>,
    ) -> ConditionOutcome {
        if condition.threshold == 0.0 {
            return ConditionOutcome::ZeroThreshold;
        }

        let Some(observation) = snapshot.get(condition.metric) else {
            tracing::debug!("No sensor data available for {}", condition.metric);
            return ConditionOutcome::MissingMetric;
        };

        if now - observation.observed_at > self.freshness {
            tracing::debug!(
                "Ignoring stale {} reading from {}",
                condition.metric,
                observation.observed_at
            );
            return ConditionOutcome::StaleReading;
        }

        if self.compare(condition.operator, observation.value, condition.threshold) {
            ConditionOutcome::Matched
        } else {
            ConditionOutcome::NotMatched
        }
    }

    fn compare(&self, operator: Operator, value: f64, threshold: f64) -> bool {
        let margin = self.hysteresis;
        match operator {
            Operator::Le => value <= threshold + margin,
            Operator::Ge => value >= threshold - margin,
            Operator::Lt => value < threshold,
            Operator::Gt => value > threshold,
            Operator::Eq => (value - threshold).abs() <= margin,
        }
    }
}

impl Default for ConditionEvaluator {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}
