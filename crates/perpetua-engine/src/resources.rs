//! Resource-side per-tick management.
//!
//! The [`ResourceManager`] owns no amounts -- those live in the store's
//! columns. It carries the per-resource condition metadata from the pack and
//! drives the store's unlock/visibility/capacity/tolerance capability
//! methods each tick. Unlocks are monotone: once a condition passes, the
//! bit stays set for the rest of the run.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use perpetua_core::condition::{Condition, ConditionEvaluator};
use perpetua_core::store::{ResourceSpec, ResourceStore};
use perpetua_content::normalize::NormalizedContentPack;

use crate::context::EvalSnapshot;
use crate::coordinator::TickFault;

struct ResourceRuntime {
    /// Index into the store's columns.
    index: usize,
    unlock_condition: Option<Condition>,
    visibility_condition: Option<Condition>,
}

/// Drives per-resource unlock/visibility and effect application.
pub struct ResourceManager {
    runtimes: Vec<ResourceRuntime>,
    evaluator: ConditionEvaluator,
}

impl ResourceManager {
    /// Build the store specs for a pack's resources, in pack (sorted) order.
    pub fn specs_from_pack(pack: &NormalizedContentPack) -> Vec<ResourceSpec> {
        pack.resources
            .iter()
            .map(|resource| ResourceSpec {
                id: resource.id.clone(),
                start_amount: resource.start_amount,
                capacity: resource.capacity,
                unlocked: resource.unlocked,
                visible: resource.visible,
                dirty_tolerance: resource.dirty_tolerance,
            })
            .collect()
    }

    pub fn new(pack: &Arc<NormalizedContentPack>, evaluator: ConditionEvaluator) -> Self {
        let runtimes = pack
            .resources
            .iter()
            .enumerate()
            .map(|(index, resource)| ResourceRuntime {
                index,
                unlock_condition: resource.unlock_condition.clone(),
                visibility_condition: resource.visibility_condition.clone(),
            })
            .collect();
        Self {
            runtimes,
            evaluator,
        }
    }

    /// Unlock the resources named by upgrade effects or rewards.
    pub fn apply_unlocked_resources(&self, store: &mut ResourceStore, ids: &BTreeSet<String>) {
        for id in ids {
            if let Some(i) = store.index_of(id) {
                if !store.is_unlocked(i) {
                    store.unlock(i);
                    store.grant_visibility(i);
                }
            }
        }
    }

    /// Apply capacity overrides from upgrade effects.
    pub fn apply_capacity_overrides(
        &self,
        store: &mut ResourceStore,
        overrides: &BTreeMap<String, f64>,
    ) {
        for (id, &capacity) in overrides {
            if let Some(i) = store.index_of(id) {
                if capacity.is_finite() && capacity >= 0.0 && store.capacity(i) != capacity {
                    store.set_capacity(i, capacity);
                }
            }
        }
    }

    /// Apply dirty-tolerance overrides from upgrade effects.
    pub fn apply_dirty_tolerance_overrides(
        &self,
        store: &mut ResourceStore,
        overrides: &BTreeMap<String, f64>,
    ) {
        for (id, &tolerance) in overrides {
            if let Some(i) = store.index_of(id) {
                if tolerance.is_finite() && store.dirty_tolerance(i) != tolerance {
                    store.set_dirty_tolerance_override(i, tolerance);
                }
            }
        }
    }

    /// Evaluate unlock/visibility conditions against the snapshot and set
    /// the store bits for resources whose conditions now pass.
    pub fn update_unlock_visibility(
        &self,
        store: &mut ResourceStore,
        snapshot: &EvalSnapshot,
        faults: &mut Vec<TickFault>,
    ) {
        for runtime in &self.runtimes {
            let i = runtime.index;
            if !store.is_unlocked(i) {
                if let Some(condition) = &runtime.unlock_condition {
                    match self.evaluator.evaluate(condition, snapshot) {
                        Ok(true) => {
                            store.unlock(i);
                            store.grant_visibility(i);
                        }
                        Ok(false) => {}
                        Err(error) => faults.push(TickFault::new("resources", error.to_string())),
                    }
                }
            }
            if !store.is_visible(i) {
                if let Some(condition) = &runtime.visibility_condition {
                    match self.evaluator.evaluate(condition, snapshot) {
                        Ok(true) => store.grant_visibility(i),
                        Ok(false) => {}
                        Err(error) => faults.push(TickFault::new("resources", error.to_string())),
                    }
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use perpetua_content::validator::Validator;

    fn normalized() -> Arc<NormalizedContentPack> {
        let raw = serde_json::json!({
            "id": "demo",
            "name": {"default": "Demo"},
            "version": "1.0.0",
            "engine": ">=1.0.0",
            "resources": [
                {"id": "energy", "name": {"default": "Energy"}},
                {"id": "crystal", "name": {"default": "Crystal"}, "unlocked": false, "visible": false,
                 "unlockCondition": {"kind": "resourceThreshold", "resourceId": "energy",
                                     "comparator": "gte", "amount": 100}}
            ]
        });
        Validator::with_defaults()
            .parse(&raw)
            .pack()
            .expect("pack validates")
            .clone()
    }

    fn setup() -> (ResourceStore, ResourceManager) {
        let pack = normalized();
        let specs = ResourceManager::specs_from_pack(&pack);
        let store = ResourceStore::with_defaults(&specs).unwrap();
        let manager = ResourceManager::new(&pack, ConditionEvaluator::default());
        (store, manager)
    }

    #[test]
    fn locked_resource_unlocks_when_condition_passes() {
        let (mut store, manager) = setup();
        let crystal = store.index_of("crystal").unwrap();
        assert!(!store.is_unlocked(crystal));

        let mut snapshot = EvalSnapshot::default();
        snapshot.resource_amounts.insert("energy".to_owned(), 50.0);
        let mut faults = Vec::new();
        manager.update_unlock_visibility(&mut store, &snapshot, &mut faults);
        assert!(!store.is_unlocked(crystal));

        snapshot.resource_amounts.insert("energy".to_owned(), 150.0);
        manager.update_unlock_visibility(&mut store, &snapshot, &mut faults);
        assert!(store.is_unlocked(crystal));
        assert!(store.is_visible(crystal));
        assert!(faults.is_empty());
    }

    #[test]
    fn effect_driven_unlock_and_overrides() {
        let (mut store, manager) = setup();
        let crystal = store.index_of("crystal").unwrap();

        let mut ids = BTreeSet::new();
        ids.insert("crystal".to_owned());
        manager.apply_unlocked_resources(&mut store, &ids);
        assert!(store.is_unlocked(crystal));

        let mut capacities = BTreeMap::new();
        capacities.insert("crystal".to_owned(), 500.0);
        manager.apply_capacity_overrides(&mut store, &capacities);
        assert_eq!(store.capacity(crystal), 500.0);

        let mut tolerances = BTreeMap::new();
        tolerances.insert("crystal".to_owned(), 1e-3);
        manager.apply_dirty_tolerance_overrides(&mut store, &tolerances);
        assert_eq!(store.dirty_tolerance(crystal), 1e-3);
    }
}
