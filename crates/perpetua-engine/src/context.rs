//! Per-iteration evaluation snapshot.
//!
//! Conditions and formulas read progression state through capability traits
//! ([`ConditionSource`], [`EntityLookup`]). Rather than letting managers
//! borrow each other mid-mutation, the coordinator copies the condition-
//! relevant state into a plain-data [`EvalSnapshot`] at the start of every
//! fixed-point iteration. All evaluations within the iteration then observe
//! one consistent point in time.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use perpetua_core::condition::ConditionSource;
use perpetua_core::formula::EntityLookup;

/// Host capability for `script` conditions. Returning `None` for an unknown
/// script evaluates as `false`.
pub trait ScriptEvaluator: Send + Sync {
    fn evaluate(&self, script_id: &str) -> Option<bool>;
}

/// A consistent, plain-data view of progression state for one iteration.
#[derive(Default)]
pub struct EvalSnapshot {
    pub step: u64,
    /// Simulation time in seconds at the start of the tick.
    pub time_seconds: f64,
    /// This tick's delta in seconds.
    pub delta_seconds: f64,
    pub resource_amounts: HashMap<String, f64>,
    pub resource_names: HashMap<String, String>,
    pub generator_levels: HashMap<String, u32>,
    pub generator_names: HashMap<String, String>,
    pub upgrade_purchases: HashMap<String, u32>,
    pub upgrade_names: HashMap<String, String>,
    pub prestige_unlocked: BTreeSet<String>,
    pub prestige_counts: HashMap<String, u32>,
    pub granted_automations: BTreeSet<String>,
    pub flags: HashMap<String, bool>,
    pub metric_values: HashMap<String, f64>,
    pub scripts: Option<Arc<dyn ScriptEvaluator>>,
}

impl EvalSnapshot {
    /// Metric value for the `customMetric` achievement track.
    pub fn metric_value(&self, id: &str) -> Option<f64> {
        self.metric_values.get(id).copied()
    }
}

impl ConditionSource for EvalSnapshot {
    fn resource_amount(&self, id: &str) -> Option<f64> {
        self.resource_amounts.get(id).copied()
    }

    fn generator_level(&self, id: &str) -> Option<u32> {
        self.generator_levels.get(id).copied()
    }

    fn upgrade_purchases(&self, id: &str) -> Option<u32> {
        self.upgrade_purchases.get(id).copied()
    }

    fn prestige_unlocked(&self, id: &str) -> bool {
        self.prestige_unlocked.contains(id)
    }

    fn prestige_count(&self, id: &str) -> u32 {
        self.prestige_counts.get(id).copied().unwrap_or(0)
    }

    fn flag_value(&self, id: &str) -> bool {
        self.flags.get(id).copied().unwrap_or(false)
    }

    fn script_value(&self, id: &str) -> Option<bool> {
        self.scripts.as_ref().and_then(|s| s.evaluate(id))
    }

    fn resource_display_name(&self, id: &str) -> Option<String> {
        self.resource_names.get(id).cloned()
    }

    fn generator_display_name(&self, id: &str) -> Option<String> {
        self.generator_names.get(id).cloned()
    }

    fn upgrade_display_name(&self, id: &str) -> Option<String> {
        self.upgrade_names.get(id).cloned()
    }
}

impl EntityLookup for EvalSnapshot {
    fn resource(&self, id: &str) -> Option<f64> {
        self.resource_amounts.get(id).copied()
    }

    fn generator(&self, id: &str) -> Option<f64> {
        self.generator_levels.get(id).map(|&l| l as f64)
    }

    fn upgrade(&self, id: &str) -> Option<f64> {
        self.upgrade_purchases.get(id).map(|&p| p as f64)
    }

    fn automation(&self, id: &str) -> Option<f64> {
        Some(if self.granted_automations.contains(id) {
            1.0
        } else {
            0.0
        })
    }

    fn prestige_layer(&self, id: &str) -> Option<f64> {
        self.prestige_counts.get(id).map(|&c| c as f64)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use perpetua_core::condition::{Comparator, Condition, ConditionEvaluator};

    struct AlwaysYes;

    impl ScriptEvaluator for AlwaysYes {
        fn evaluate(&self, script_id: &str) -> Option<bool> {
            (script_id == "yes").then_some(true)
        }
    }

    #[test]
    fn snapshot_backs_condition_evaluation() {
        let mut snapshot = EvalSnapshot::default();
        snapshot.resource_amounts.insert("energy".to_owned(), 150.0);
        snapshot.scripts = Some(Arc::new(AlwaysYes));

        let evaluator = ConditionEvaluator::default();
        let cond = Condition::ResourceThreshold {
            resource_id: "energy".to_owned(),
            comparator: Comparator::Gte,
            amount: 100.0,
        };
        assert!(evaluator.evaluate(&cond, &snapshot).unwrap());

        assert!(evaluator
            .evaluate(
                &Condition::Script {
                    script_id: "yes".to_owned()
                },
                &snapshot
            )
            .unwrap());
        assert!(!evaluator
            .evaluate(
                &Condition::Script {
                    script_id: "no".to_owned()
                },
                &snapshot
            )
            .unwrap());
    }

    #[test]
    fn snapshot_backs_formula_lookup() {
        let mut snapshot = EvalSnapshot::default();
        snapshot.generator_levels.insert("mill".to_owned(), 4);
        assert_eq!(EntityLookup::generator(&snapshot, "mill"), Some(4.0));
        assert_eq!(EntityLookup::resource(&snapshot, "missing"), None);
        assert_eq!(EntityLookup::automation(&snapshot, "auto"), Some(0.0));
    }
}
