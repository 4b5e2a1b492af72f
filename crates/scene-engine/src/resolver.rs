//! Priority-ordered resolution of rule actions into a desired outlet state

use crate::evaluator::ConditionEvaluator;
use crate::model::{RuleAction, RuleTrace, SensorSnapshot};
use chrono::{DateTime, Utc};
use habitat_core::{OutletId, SceneRule};
use std::collections::BTreeMap;

/// Desired state computed from one scene's rules
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    /// Sparse map; outlets no matching rule mentions are left alone
    pub desired: BTreeMap<OutletId, bool>,
    pub traces: Vec<RuleTrace>,
    pub warnings: Vec<String>,
}

/// Resolve a scene's rules against a snapshot.
///
/// Rules run in ascending priority (ties keep their given order), so a
/// higher-priority rule overwrites whatever lower ones wanted for the same
/// outlet. Within a rule `on` is applied before `off`.
#[must_use]
pub fn resolve(
    evaluator: &ConditionEvaluator,
    rules: &[SceneRule],
    snapshot: &SensorSnapshot,
    now: DateTime<Utc>,
) -> Resolution {
    let mut ordered: Vec<&SceneRule> = rules.iter().collect();
    ordered.sort_by_key(|rule| rule.priority);

    let mut resolution = Resolution::default();

    for rule in ordered {
        let (outcome, condition_error) = evaluator.check_raw(&rule.condition, snapshot, now);
        let mut trace = RuleTrace {
            rule_id: rule.id,
            rule_name: rule.name.clone(),
            priority: rule.priority,
            outcome,
            applied: BTreeMap::new(),
            error: condition_error,
        };

        if !outcome.is_match() {
            resolution.traces.push(trace);
            continue;
        }

        let action = match RuleAction::parse(&rule.action) {
            Ok(action) => action,
            Err(e) => {
                tracing::warn!("Configuration error in rule {}: {}", rule.id, e);
                trace.error = Some(e);
                resolution.traces.push(trace);
                continue;
            }
        };

        for outlet_id in action.turn_on() {
            if action.off.get(&outlet_id).copied().unwrap_or(false) {
                let warning = format!(
                    "rule {} ('{}') turns outlet {} both on and off; off wins",
                    rule.id, rule.name, outlet_id
                );
                tracing::warn!("{}", warning);
                resolution.warnings.push(warning);
            }
            trace.applied.insert(outlet_id, true);
        }
        for outlet_id in action.turn_off() {
            trace.applied.insert(outlet_id, false);
        }

        tracing::debug!(
            "Rule '{}' (priority {}) matched: {:?}",
            rule.name,
            rule.priority,
            trace.applied
        );
        resolution
            .desired
            .extend(trace.applied.iter().map(|(&id, &state)| (id, state)));
        resolution.traces.push(trace);
    }

    resolution
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ConditionOutcome;
    use habitat_core::Metric;
    use serde_json::{json, Value};

    fn rule(id: i64, priority: i32, condition: Value, action: Value) -> SceneRule {
        SceneRule {
            id,
            scene_id: 1,
            name: format!("rule {id}"),
            condition,
            action,
            priority,
        }
    }

    fn heating_rules() -> Vec<SceneRule> {
        vec![
            rule(
                1,
                1,
                json!({"condition": "temperature", "operator": "<=", "value": 18}),
                json!({"on": {"5": true}}),
            ),
            rule(
                2,
                2,
                json!({"condition": "temperature", "operator": ">=", "value": 18}),
                json!({"off": {"5": true}}),
            ),
        ]
    }

    #[test]
    fn test_threshold_pair_flips_outlet() {
        let evaluator = ConditionEvaluator::default();
        let now = Utc::now();

        let warm = SensorSnapshot::new().with(Metric::Temperature, 18.2, now);
        let resolution = resolve(&evaluator, &heating_rules(), &warm, now);
        assert_eq!(resolution.desired.get(&5), Some(&false));

        let cold = SensorSnapshot::new().with(Metric::Temperature, 17.5, now);
        let resolution = resolve(&evaluator, &heating_rules(), &cold, now);
        assert_eq!(resolution.desired.get(&5), Some(&true));
    }

    #[test]
    fn test_higher_priority_wins_regardless_of_order() {
        let evaluator = ConditionEvaluator::default();
        let now = Utc::now();
        // Exactly 18 matches both rules
        let snapshot = SensorSnapshot::new().with(Metric::Temperature, 18.0, now);

        let mut rules = heating_rules();
        let forward = resolve(&evaluator, &rules, &snapshot, now);
        rules.reverse();
        let reversed = resolve(&evaluator, &rules, &snapshot, now);

        assert_eq!(forward.desired.get(&5), Some(&false));
        assert_eq!(reversed.desired, forward.desired);
        assert_eq!(reversed.traces[0].priority, 1);
    }

    #[test]
    fn test_equal_priority_keeps_given_order() {
        let evaluator = ConditionEvaluator::default();
        let now = Utc::now();
        let snapshot = SensorSnapshot::new().with(Metric::Humidity, 50.0, now);
        let cond = json!({"condition": "humidity", "operator": "<", "value": 70});

        let rules = vec![
            rule(3, 0, cond.clone(), json!({"on": {"9": true}})),
            rule(4, 0, cond, json!({"off": {"9": true}})),
        ];
        let resolution = resolve(&evaluator, &rules, &snapshot, now);
        assert_eq!(resolution.desired.get(&9), Some(&false));
    }

    #[test]
    fn test_result_is_sparse() {
        let evaluator = ConditionEvaluator::default();
        let now = Utc::now();
        let snapshot = SensorSnapshot::new().with(Metric::Temperature, 25.0, now);

        let rules = vec![
            rule(
                1,
                1,
                json!({"condition": "temperature", "operator": ">", "value": 24}),
                json!({"on": {"3": true, "4": false}}),
            ),
            rule(
                2,
                1,
                json!({"condition": "temperature", "operator": "<", "value": 10}),
                json!({"on": {"6": true}}),
            ),
        ];
        let resolution = resolve(&evaluator, &rules, &snapshot, now);
        assert_eq!(resolution.desired, BTreeMap::from([(3, true)]));
        assert_eq!(resolution.traces[1].outcome, ConditionOutcome::NotMatched);
    }

    #[test]
    fn test_outlet_in_both_sets_resolves_off_with_warning() {
        let evaluator = ConditionEvaluator::default();
        let now = Utc::now();
        let snapshot = SensorSnapshot::new().with(Metric::Temperature, 25.0, now);

        let rules = vec![rule(
            1,
            1,
            json!({"condition": "temperature", "operator": ">", "value": 20}),
            json!({"on": {"2": true}, "off": {"2": true}}),
        )];
        let resolution = resolve(&evaluator, &rules, &snapshot, now);
        assert_eq!(resolution.desired.get(&2), Some(&false));
        assert_eq!(resolution.warnings.len(), 1);
    }

    #[test]
    fn test_malformed_rules_contribute_nothing() {
        let evaluator = ConditionEvaluator::default();
        let now = Utc::now();
        let snapshot = SensorSnapshot::new().with(Metric::Temperature, 25.0, now);

        let rules = vec![
            rule(
                1,
                1,
                json!({"condition": "temperature", "operator": "~", "value": 20}),
                json!({"on": {"1": true}}),
            ),
            rule(
                2,
                1,
                json!({"condition": "temperature", "operator": ">", "value": 20}),
                json!({"on": "all"}),
            ),
        ];
        let resolution = resolve(&evaluator, &rules, &snapshot, now);
        assert!(resolution.desired.is_empty());
        assert!(resolution.traces.iter().all(|t| t.error.is_some()));
    }
}
