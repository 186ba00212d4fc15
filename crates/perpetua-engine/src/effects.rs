//! Coalesced upgrade-effect bundle.
//!
//! Every tick the upgrade manager folds all purchased upgrades' effects into
//! one [`EvaluatedUpgradeEffects`] value. Multipliers compose by product, so
//! the fold is order-independent; additive bonuses accumulate separately and
//! are applied to base rates *before* the multiplier product. Unlock sets
//! only ever grow within a step, which keeps the coordinator's fixed-point
//! iteration monotone.

use std::collections::{BTreeMap, BTreeSet};

/// The evaluated, coalesced effects of all purchased upgrades.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvaluatedUpgradeEffects {
    pub unlocked_resources: BTreeSet<String>,
    pub unlocked_generators: BTreeSet<String>,
    pub granted_automations: BTreeSet<String>,
    pub flags_set: BTreeMap<String, bool>,
    pub generator_rate_multipliers: BTreeMap<String, f64>,
    pub generator_rate_bonuses: BTreeMap<String, f64>,
    pub generator_cost_multipliers: BTreeMap<String, f64>,
    pub generator_consumption_multipliers: BTreeMap<String, f64>,
    pub generator_resource_consumption_multipliers: BTreeMap<(String, String), f64>,
    pub resource_rate_multipliers: BTreeMap<String, f64>,
    pub resource_rate_bonuses: BTreeMap<String, f64>,
    pub resource_capacity_overrides: BTreeMap<String, f64>,
    pub dirty_tolerance_overrides: BTreeMap<String, f64>,
}

impl EvaluatedUpgradeEffects {
    pub fn generator_rate_multiplier(&self, id: &str) -> f64 {
        self.generator_rate_multipliers.get(id).copied().unwrap_or(1.0)
    }

    pub fn generator_rate_bonus(&self, id: &str) -> f64 {
        self.generator_rate_bonuses.get(id).copied().unwrap_or(0.0)
    }

    pub fn generator_cost_multiplier(&self, id: &str) -> f64 {
        self.generator_cost_multipliers.get(id).copied().unwrap_or(1.0)
    }

    pub fn generator_consumption_multiplier(&self, id: &str) -> f64 {
        self.generator_consumption_multipliers
            .get(id)
            .copied()
            .unwrap_or(1.0)
    }

    pub fn generator_resource_consumption_multiplier(
        &self,
        generator_id: &str,
        resource_id: &str,
    ) -> f64 {
        self.generator_resource_consumption_multipliers
            .get(&(generator_id.to_owned(), resource_id.to_owned()))
            .copied()
            .unwrap_or(1.0)
    }

    pub fn resource_rate_multiplier(&self, id: &str) -> f64 {
        self.resource_rate_multipliers.get(id).copied().unwrap_or(1.0)
    }

    pub fn resource_rate_bonus(&self, id: &str) -> f64 {
        self.resource_rate_bonuses.get(id).copied().unwrap_or(0.0)
    }

    /// Fold a multiplier into a map entry (product composition).
    pub(crate) fn fold_multiplier(map: &mut BTreeMap<String, f64>, id: &str, value: f64) {
        *map.entry(id.to_owned()).or_insert(1.0) *= value;
    }

    /// Fold an additive bonus into a map entry.
    pub(crate) fn fold_bonus(map: &mut BTreeMap<String, f64>, id: &str, value: f64) {
        *map.entry(id.to_owned()).or_insert(0.0) += value;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_identity() {
        let effects = EvaluatedUpgradeEffects::default();
        assert_eq!(effects.generator_rate_multiplier("any"), 1.0);
        assert_eq!(effects.generator_rate_bonus("any"), 0.0);
        assert_eq!(effects.resource_rate_multiplier("any"), 1.0);
        assert_eq!(
            effects.generator_resource_consumption_multiplier("g", "r"),
            1.0
        );
    }

    #[test]
    fn multipliers_compose_by_product() {
        let mut map = BTreeMap::new();
        EvaluatedUpgradeEffects::fold_multiplier(&mut map, "mill", 2.0);
        EvaluatedUpgradeEffects::fold_multiplier(&mut map, "mill", 3.0);
        assert_eq!(map["mill"], 6.0);
    }

    #[test]
    fn bonuses_compose_by_sum() {
        let mut map = BTreeMap::new();
        EvaluatedUpgradeEffects::fold_bonus(&mut map, "mill", 1.5);
        EvaluatedUpgradeEffects::fold_bonus(&mut map, "mill", 2.0);
        assert_eq!(map["mill"], 3.5);
    }
}
