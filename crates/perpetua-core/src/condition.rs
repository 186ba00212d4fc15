//! Boolean condition variants, their evaluator, and unlock hints.
//!
//! Conditions gate unlocks, visibility, achievement eligibility, prestige
//! availability, and transform triggers. They are evaluated against a
//! [`ConditionSource`] capability owned by the progression coordinator, and
//! can be rendered into short human-readable hints via
//! [`ConditionEvaluator::describe`] (e.g. `"Reach Energy ≥ 100"`).
//!
//! [`ConditionEvaluator::resolve_references`] computes the set of resources a
//! condition ultimately depends on. The edge rules matter for cycle
//! detection: `anyOf` branches can each be satisfied independently, so they
//! contribute no dependency edges, and `not` subtrees never block an unlock.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Default bound on condition nesting depth.
pub const DEFAULT_MAX_CONDITION_DEPTH: usize = 32;

/// Epsilon for `eq`/`neq` comparator semantics (mirrors the dirty-tolerance
/// floor of the resource store).
pub const COMPARATOR_EPSILON: f64 = 1e-9;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors produced by condition evaluation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConditionError {
    /// Condition nesting deeper than the configured bound.
    #[error("condition nesting exceeds the maximum depth of {max}")]
    DepthExceeded { max: usize },
}

// ---------------------------------------------------------------------------
// Comparator
// ---------------------------------------------------------------------------

/// Numeric comparator used by threshold conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Comparator {
    Gte,
    Gt,
    Lte,
    Lt,
    Eq,
    Neq,
}

impl Comparator {
    /// Apply the comparator. `eq`/`neq` use [`COMPARATOR_EPSILON`].
    pub fn compare(self, lhs: f64, rhs: f64) -> bool {
        match self {
            Self::Gte => lhs >= rhs,
            Self::Gt => lhs > rhs,
            Self::Lte => lhs <= rhs,
            Self::Lt => lhs < rhs,
            Self::Eq => (lhs - rhs).abs() <= COMPARATOR_EPSILON,
            Self::Neq => (lhs - rhs).abs() > COMPARATOR_EPSILON,
        }
    }

    /// Display symbol for unlock hints.
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Gte => "≥",
            Self::Gt => ">",
            Self::Lte => "≤",
            Self::Lt => "<",
            Self::Eq => "=",
            Self::Neq => "≠",
        }
    }
}

// ---------------------------------------------------------------------------
// Condition
// ---------------------------------------------------------------------------

/// A boolean condition over progression state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase", deny_unknown_fields)]
pub enum Condition {
    /// Always true.
    Always,
    /// Always false.
    Never,
    /// Compare a resource amount against a threshold.
    #[serde(rename_all = "camelCase")]
    ResourceThreshold {
        resource_id: String,
        comparator: Comparator,
        amount: f64,
    },
    /// Compare a generator's level against a threshold.
    GeneratorLevel {
        id: String,
        comparator: Comparator,
        level: f64,
    },
    /// An upgrade has been purchased at least `required_purchases` times.
    #[serde(rename_all = "camelCase")]
    UpgradeOwned {
        id: String,
        #[serde(default = "default_required_purchases")]
        required_purchases: u32,
    },
    /// A prestige layer is unlocked.
    PrestigeUnlocked { id: String },
    /// A prestige layer has been performed at least `amount` times.
    PrestigeCountThreshold { id: String, amount: f64 },
    /// A prestige layer has been performed at least once.
    PrestigeCompleted { id: String },
    /// A boolean flag is set.
    #[serde(rename_all = "camelCase")]
    Flag { flag_id: String },
    /// Delegated to the host's script evaluator capability.
    #[serde(rename_all = "camelCase")]
    Script { script_id: String },
    /// All sub-conditions hold. Empty list is vacuously true.
    AllOf { conditions: Vec<Condition> },
    /// At least one sub-condition holds. Empty list is false.
    AnyOf { conditions: Vec<Condition> },
    /// The sub-condition does not hold.
    Not { condition: Box<Condition> },
}

fn default_required_purchases() -> u32 {
    1
}

// ---------------------------------------------------------------------------
// ConditionSource
// ---------------------------------------------------------------------------

/// Capability through which conditions read progression state.
///
/// `None` lookups are treated as zero/absent rather than errors: the
/// validator guarantees reference integrity for pack-declared conditions, and
/// hydration-era conditions over not-yet-known entities should fail closed.
pub trait ConditionSource {
    fn resource_amount(&self, id: &str) -> Option<f64>;
    fn generator_level(&self, id: &str) -> Option<u32>;
    fn upgrade_purchases(&self, id: &str) -> Option<u32>;
    fn prestige_unlocked(&self, id: &str) -> bool;
    fn prestige_count(&self, id: &str) -> u32;
    fn flag_value(&self, id: &str) -> bool;
    /// Host script hook; `None` when no evaluator is installed or the script
    /// is unknown, which evaluates as `false`.
    fn script_value(&self, id: &str) -> Option<bool>;
    /// Display name for hints; falls back to the raw id.
    fn resource_display_name(&self, id: &str) -> Option<String> {
        let _ = id;
        None
    }
    /// Display name for hints; falls back to the raw id.
    fn generator_display_name(&self, id: &str) -> Option<String> {
        let _ = id;
        None
    }
    /// Display name for hints; falls back to the raw id.
    fn upgrade_display_name(&self, id: &str) -> Option<String> {
        let _ = id;
        None
    }
}

// ---------------------------------------------------------------------------
// ReferenceResolver
// ---------------------------------------------------------------------------

/// Capability for resolving indirect condition references to resources.
///
/// Built by the validator/coordinator from pack structure: generator levels
/// depend on the resources the generator produces, owned upgrades depend on
/// the resources their effects unlock, and flags depend on the resources
/// reachable from whichever upgrade or achievement grants the flag.
pub trait ReferenceResolver {
    fn produced_resources(&self, generator_id: &str) -> Vec<String>;
    fn unlocked_resources_of_upgrade(&self, upgrade_id: &str) -> Vec<String>;
    fn resources_for_flag(&self, flag_id: &str) -> Vec<String>;
}

// ---------------------------------------------------------------------------
// ConditionEvaluator
// ---------------------------------------------------------------------------

/// Evaluates conditions with a configurable depth bound.
#[derive(Debug, Clone, Copy)]
pub struct ConditionEvaluator {
    max_depth: usize,
}

impl Default for ConditionEvaluator {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONDITION_DEPTH)
    }
}

impl ConditionEvaluator {
    /// Evaluator with the given maximum nesting depth.
    pub fn new(max_depth: usize) -> Self {
        assert!(max_depth > 0, "max_depth must be at least 1");
        Self { max_depth }
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Evaluate a condition against the given source.
    pub fn evaluate(
        &self,
        condition: &Condition,
        source: &dyn ConditionSource,
    ) -> Result<bool, ConditionError> {
        self.evaluate_at(condition, source, 0)
    }

    fn evaluate_at(
        &self,
        condition: &Condition,
        source: &dyn ConditionSource,
        depth: usize,
    ) -> Result<bool, ConditionError> {
        if depth >= self.max_depth {
            return Err(ConditionError::DepthExceeded {
                max: self.max_depth,
            });
        }
        let next = depth + 1;

        Ok(match condition {
            Condition::Always => true,
            Condition::Never => false,
            Condition::ResourceThreshold {
                resource_id,
                comparator,
                amount,
            } => comparator.compare(source.resource_amount(resource_id).unwrap_or(0.0), *amount),
            Condition::GeneratorLevel {
                id,
                comparator,
                level,
            } => comparator.compare(source.generator_level(id).unwrap_or(0) as f64, *level),
            Condition::UpgradeOwned {
                id,
                required_purchases,
            } => source.upgrade_purchases(id).unwrap_or(0) >= *required_purchases,
            Condition::PrestigeUnlocked { id } => source.prestige_unlocked(id),
            Condition::PrestigeCountThreshold { id, amount } => {
                source.prestige_count(id) as f64 >= *amount
            }
            Condition::PrestigeCompleted { id } => source.prestige_count(id) > 0,
            Condition::Flag { flag_id } => source.flag_value(flag_id),
            Condition::Script { script_id } => source.script_value(script_id).unwrap_or(false),
            Condition::AllOf { conditions } => {
                for c in conditions {
                    if !self.evaluate_at(c, source, next)? {
                        return Ok(false);
                    }
                }
                true
            }
            Condition::AnyOf { conditions } => {
                for c in conditions {
                    if self.evaluate_at(c, source, next)? {
                        return Ok(true);
                    }
                }
                false
            }
            Condition::Not { condition } => !self.evaluate_at(condition, source, next)?,
        })
    }

    /// Render a short human-readable unlock hint.
    pub fn describe(&self, condition: &Condition, source: &dyn ConditionSource) -> String {
        match condition {
            Condition::Always => "Always available".to_owned(),
            Condition::Never => "Never available".to_owned(),
            Condition::ResourceThreshold {
                resource_id,
                comparator,
                amount,
            } => {
                let name = source
                    .resource_display_name(resource_id)
                    .unwrap_or_else(|| resource_id.clone());
                format!(
                    "Reach {name} {} {}",
                    comparator.symbol(),
                    format_amount(*amount)
                )
            }
            Condition::GeneratorLevel {
                id,
                comparator,
                level,
            } => {
                let name = source
                    .generator_display_name(id)
                    .unwrap_or_else(|| id.clone());
                format!(
                    "Reach {name} level {} {}",
                    comparator.symbol(),
                    format_amount(*level)
                )
            }
            Condition::UpgradeOwned {
                id,
                required_purchases,
            } => {
                let name = source.upgrade_display_name(id).unwrap_or_else(|| id.clone());
                if *required_purchases > 1 {
                    format!("Purchase {name} ×{required_purchases}")
                } else {
                    format!("Purchase {name}")
                }
            }
            Condition::PrestigeUnlocked { id } => format!("Unlock prestige {id}"),
            Condition::PrestigeCountThreshold { id, amount } => {
                format!("Prestige {id} ≥ {} times", format_amount(*amount))
            }
            Condition::PrestigeCompleted { id } => format!("Complete prestige {id}"),
            Condition::Flag { flag_id } => format!("Requires {flag_id}"),
            Condition::Script { script_id } => format!("Requires {script_id}"),
            Condition::AllOf { conditions } => {
                if conditions.is_empty() {
                    "Always available".to_owned()
                } else {
                    join_described(self, conditions, source, " and ")
                }
            }
            Condition::AnyOf { conditions } => {
                if conditions.is_empty() {
                    "Never available".to_owned()
                } else {
                    join_described(self, conditions, source, " or ")
                }
            }
            Condition::Not { condition } => format!("Not: {}", self.describe(condition, source)),
        }
    }

    /// Compute the set of resource ids this condition depends on.
    ///
    /// Edge rules: `anyOf` branches add nothing (any branch can satisfy the
    /// condition independently); `not` subtrees add nothing (they cannot
    /// block an unlock by requiring a resource); everything else follows the
    /// resolver's indirection edges.
    pub fn resolve_references(
        &self,
        condition: &Condition,
        resolver: &dyn ReferenceResolver,
    ) -> BTreeSet<String> {
        let mut refs = BTreeSet::new();
        self.collect_references(condition, resolver, &mut refs);
        refs
    }

    fn collect_references(
        &self,
        condition: &Condition,
        resolver: &dyn ReferenceResolver,
        out: &mut BTreeSet<String>,
    ) {
        match condition {
            Condition::ResourceThreshold { resource_id, .. } => {
                out.insert(resource_id.clone());
            }
            Condition::GeneratorLevel { id, .. } => {
                out.extend(resolver.produced_resources(id));
            }
            Condition::UpgradeOwned { id, .. } => {
                out.extend(resolver.unlocked_resources_of_upgrade(id));
            }
            Condition::Flag { flag_id } => {
                out.extend(resolver.resources_for_flag(flag_id));
            }
            Condition::AllOf { conditions } => {
                for c in conditions {
                    self.collect_references(c, resolver, out);
                }
            }
            // Alternative branches and negations are not dependencies.
            Condition::AnyOf { .. } | Condition::Not { .. } => {}
            Condition::Always
            | Condition::Never
            | Condition::PrestigeUnlocked { .. }
            | Condition::PrestigeCountThreshold { .. }
            | Condition::PrestigeCompleted { .. }
            | Condition::Script { .. } => {}
        }
    }
}

fn join_described(
    evaluator: &ConditionEvaluator,
    conditions: &[Condition],
    source: &dyn ConditionSource,
    separator: &str,
) -> String {
    conditions
        .iter()
        .map(|c| evaluator.describe(c, source))
        .collect::<Vec<_>>()
        .join(separator)
}

/// Trim trailing zeros from hint amounts: `100.0 -> "100"`, `2.5 -> "2.5"`.
fn format_amount(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
