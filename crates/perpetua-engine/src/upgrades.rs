//! Upgrade state and the evaluated effect bundle.
//!
//! The manager tracks purchase counts and unlock/visibility, and folds all
//! purchased upgrades into one [`EvaluatedUpgradeEffects`] per step. The
//! bundle is cached by `(step, revision)`: a revision bump (purchase or
//! external grant) within the coordinator's fixed-point loop invalidates the
//! cache so chained unlocks are observed in the same step.

use std::collections::HashMap;
use std::sync::Arc;

use perpetua_core::condition::ConditionEvaluator;
use perpetua_core::formula::{FormulaContext, FormulaVariables};
use perpetua_core::store::ResourceStore;
use perpetua_content::normalize::NormalizedContentPack;
use perpetua_content::pack::{EffectOperation, UpgradeEffect};

use crate::context::EvalSnapshot;
use crate::coordinator::TickFault;
use crate::effects::EvaluatedUpgradeEffects;
use crate::generators::PurchaseError;

/// Mutable per-upgrade state.
#[derive(Debug, Clone)]
pub struct UpgradeState {
    pub purchases: u32,
    pub is_unlocked: bool,
    pub is_visible: bool,
    pub unlock_hint: Option<String>,
}

/// Owns upgrade runtime state and effect evaluation.
pub struct UpgradeManager {
    pack: Arc<NormalizedContentPack>,
    states: Vec<UpgradeState>,
    evaluator: ConditionEvaluator,
    /// Bumped on every purchase or external grant.
    revision: u64,
    cached: Option<(u64, u64, Arc<EvaluatedUpgradeEffects>)>,
}

impl UpgradeManager {
    pub fn new(pack: Arc<NormalizedContentPack>, evaluator: ConditionEvaluator) -> Self {
        let states = pack
            .upgrades
            .iter()
            .map(|upgrade| UpgradeState {
                purchases: 0,
                is_unlocked: upgrade.unlock_condition.is_none(),
                is_visible: upgrade.visibility_condition.is_none(),
                unlock_hint: None,
            })
            .collect();
        Self {
            pack,
            states,
            evaluator,
            revision: 0,
            cached: None,
        }
    }

    fn index_of(&self, id: &str) -> Option<usize> {
        self.pack.lookup.upgrades.get(id).copied()
    }

    pub fn state(&self, id: &str) -> Option<&UpgradeState> {
        self.index_of(id).map(|i| &self.states[i])
    }

    pub fn purchases_of(&self, id: &str) -> u32 {
        self.state(id).map(|s| s.purchases).unwrap_or(0)
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Flag value from purchased upgrades' `grantFlag` effects, if any
    /// purchased upgrade sets the flag.
    pub fn flag_value(&self, flag_id: &str) -> Option<bool> {
        let mut value = None;
        for (i, upgrade) in self.pack.upgrades.iter().enumerate() {
            if self.states[i].purchases == 0 {
                continue;
            }
            for effect in &upgrade.effects {
                if let UpgradeEffect::GrantFlag { flag_id: f, value: v } = effect {
                    if f == flag_id {
                        value = Some(*v);
                    }
                }
            }
        }
        value
    }

    /// Grant one purchase from outside the economy (achievement rewards).
    pub fn grant_external(&mut self, id: &str) -> bool {
        let Some(i) = self.index_of(id) else {
            return false;
        };
        let max = self.max_purchases_of(i);
        if self.states[i].purchases >= max {
            return false;
        }
        self.states[i].purchases += 1;
        self.states[i].is_unlocked = true;
        self.states[i].is_visible = true;
        self.revision += 1;
        true
    }

    /// Clear purchases except the retained ids (prestige).
    pub fn reset_except(&mut self, retained: &[&str]) {
        for (i, upgrade) in self.pack.upgrades.iter().enumerate() {
            if !retained.contains(&upgrade.id.as_str()) {
                self.states[i].purchases = 0;
            }
        }
        self.revision += 1;
    }

    fn max_purchases_of(&self, i: usize) -> u32 {
        let upgrade = &self.pack.upgrades[i];
        match &upgrade.repeatable {
            Some(policy) => policy.max_purchases.unwrap_or(u32::MAX),
            None => 1,
        }
    }

    /// Purchase an upgrade, spending its cost through the store.
    pub fn purchase(
        &mut self,
        id: &str,
        snapshot: &EvalSnapshot,
        store: &mut ResourceStore,
    ) -> Result<(), PurchaseError> {
        let i = self
            .index_of(id)
            .ok_or_else(|| PurchaseError::UnknownUpgrade { id: id.to_owned() })?;
        let upgrade = &self.pack.upgrades[i];

        if !self.states[i].is_unlocked || !self.states[i].is_visible {
            return Err(PurchaseError::Locked { id: id.to_owned() });
        }
        if self.states[i].purchases >= self.max_purchases_of(i) {
            return Err(PurchaseError::MaxedOut { id: id.to_owned() });
        }
        for prerequisite in &upgrade.prerequisites {
            match self.evaluator.evaluate(prerequisite, snapshot) {
                Ok(true) => {}
                Ok(false) => {
                    return Err(PurchaseError::PrerequisitesUnmet { id: id.to_owned() })
                }
                Err(error) => {
                    return Err(PurchaseError::CostEvaluation {
                        id: id.to_owned(),
                        details: error.to_string(),
                    })
                }
            }
        }

        // Cost at the current purchase index, scaled by the repeat curve.
        let index = self.states[i].purchases;
        let ctx = FormulaContext::at_level(index as f64);
        let repeat_scale = match &upgrade.repeatable {
            Some(policy) => policy.cost_curve.evaluate(&ctx).map_err(|error| {
                PurchaseError::CostEvaluation {
                    id: id.to_owned(),
                    details: error.to_string(),
                }
            })?,
            None => 1.0,
        };

        let mut costs: Vec<(usize, f64)> = Vec::with_capacity(upgrade.cost.len());
        for entry in &upgrade.cost {
            let amount = entry.amount.evaluate(&ctx).map_err(|error| {
                PurchaseError::CostEvaluation {
                    id: id.to_owned(),
                    details: error.to_string(),
                }
            })? * repeat_scale;
            if !amount.is_finite() || amount < 0.0 {
                return Err(PurchaseError::CostEvaluation {
                    id: id.to_owned(),
                    details: "cost is non-finite or negative".to_owned(),
                });
            }
            let store_index = store
                .index_of(&entry.resource_id)
                .ok_or_else(|| PurchaseError::CostEvaluation {
                    id: id.to_owned(),
                    details: format!("unknown cost resource '{}'", entry.resource_id),
                })?;
            if store.amount(store_index) + 1e-9 < amount {
                return Err(PurchaseError::Unaffordable { id: id.to_owned() });
            }
            costs.push((store_index, amount));
        }
        for (store_index, amount) in costs {
            store.spend_amount(store_index, amount);
        }

        self.states[i].purchases += 1;
        self.revision += 1;
        tracing::debug!(upgrade = id, purchases = self.states[i].purchases, "upgrade purchased");
        Ok(())
    }

    /// Per-tick unlock/visibility update with hints.
    pub fn update_for_step(
        &mut self,
        _step: u64,
        snapshot: &EvalSnapshot,
        faults: &mut Vec<TickFault>,
    ) {
        for (i, upgrade) in self.pack.upgrades.iter().enumerate() {
            let state = &mut self.states[i];
            if !state.is_unlocked {
                if let Some(condition) = &upgrade.unlock_condition {
                    match self.evaluator.evaluate(condition, snapshot) {
                        Ok(true) => {
                            state.is_unlocked = true;
                            state.is_visible = true;
                            state.unlock_hint = None;
                        }
                        Ok(false) => {
                            state.unlock_hint =
                                Some(self.evaluator.describe(condition, snapshot));
                        }
                        Err(error) => faults.push(TickFault::new("upgrades", error.to_string())),
                    }
                }
            }
            if !state.is_visible {
                if let Some(condition) = &upgrade.visibility_condition {
                    match self.evaluator.evaluate(condition, snapshot) {
                        Ok(true) => state.is_visible = true,
                        Ok(false) => {}
                        Err(error) => faults.push(TickFault::new("upgrades", error.to_string())),
                    }
                }
            }
        }
    }

    /// The coalesced effects of all purchased upgrades, cached per
    /// `(step, revision)`.
    pub fn get_upgrade_effects(
        &mut self,
        step: u64,
        snapshot: &EvalSnapshot,
        faults: &mut Vec<TickFault>,
    ) -> Arc<EvaluatedUpgradeEffects> {
        if let Some((cached_step, cached_revision, effects)) = &self.cached {
            if *cached_step == step && *cached_revision == self.revision {
                return Arc::clone(effects);
            }
        }

        let mut effects = EvaluatedUpgradeEffects::default();
        for (i, upgrade) in self.pack.upgrades.iter().enumerate() {
            let purchases = self.states[i].purchases;
            if purchases == 0 {
                continue;
            }
            let variables = FormulaVariables {
                level: purchases as f64,
                time: snapshot.time_seconds,
                delta_time: snapshot.delta_seconds,
            };
            let ctx = FormulaContext::new(variables, snapshot);

            for effect in &upgrade.effects {
                match effect {
                    UpgradeEffect::ModifyResourceRate {
                        resource_id,
                        operation,
                        amount,
                    } => match amount.evaluate(&ctx) {
                        Ok(value) => match operation {
                            EffectOperation::Multiply => EvaluatedUpgradeEffects::fold_multiplier(
                                &mut effects.resource_rate_multipliers,
                                resource_id,
                                value,
                            ),
                            EffectOperation::Add => EvaluatedUpgradeEffects::fold_bonus(
                                &mut effects.resource_rate_bonuses,
                                resource_id,
                                value,
                            ),
                        },
                        Err(error) => faults.push(TickFault::new("upgrades", error.to_string())),
                    },
                    UpgradeEffect::ModifyGeneratorRate {
                        generator_id,
                        operation,
                        amount,
                    } => match amount.evaluate(&ctx) {
                        Ok(value) => match operation {
                            EffectOperation::Multiply => EvaluatedUpgradeEffects::fold_multiplier(
                                &mut effects.generator_rate_multipliers,
                                generator_id,
                                value,
                            ),
                            EffectOperation::Add => EvaluatedUpgradeEffects::fold_bonus(
                                &mut effects.generator_rate_bonuses,
                                generator_id,
                                value,
                            ),
                        },
                        Err(error) => faults.push(TickFault::new("upgrades", error.to_string())),
                    },
                    UpgradeEffect::ModifyGeneratorCost {
                        generator_id,
                        amount,
                    } => match amount.evaluate(&ctx) {
                        Ok(value) => EvaluatedUpgradeEffects::fold_multiplier(
                            &mut effects.generator_cost_multipliers,
                            generator_id,
                            value,
                        ),
                        Err(error) => faults.push(TickFault::new("upgrades", error.to_string())),
                    },
                    UpgradeEffect::ModifyGeneratorConsumption {
                        generator_id,
                        amount,
                    } => match amount.evaluate(&ctx) {
                        Ok(value) => EvaluatedUpgradeEffects::fold_multiplier(
                            &mut effects.generator_consumption_multipliers,
                            generator_id,
                            value,
                        ),
                        Err(error) => faults.push(TickFault::new("upgrades", error.to_string())),
                    },
                    UpgradeEffect::ModifyGeneratorResourceConsumption {
                        generator_id,
                        resource_id,
                        amount,
                    } => match amount.evaluate(&ctx) {
                        Ok(value) => {
                            *effects
                                .generator_resource_consumption_multipliers
                                .entry((generator_id.clone(), resource_id.clone()))
                                .or_insert(1.0) *= value;
                        }
                        Err(error) => faults.push(TickFault::new("upgrades", error.to_string())),
                    },
                    UpgradeEffect::ModifyResourceCapacity {
                        resource_id,
                        amount,
                    } => match amount.evaluate(&ctx) {
                        Ok(value) => {
                            effects
                                .resource_capacity_overrides
                                .insert(resource_id.clone(), value);
                        }
                        Err(error) => faults.push(TickFault::new("upgrades", error.to_string())),
                    },
                    UpgradeEffect::UnlockResource { resource_id } => {
                        effects.unlocked_resources.insert(resource_id.clone());
                    }
                    UpgradeEffect::UnlockGenerator { generator_id } => {
                        effects.unlocked_generators.insert(generator_id.clone());
                    }
                    UpgradeEffect::UnlockAutomation { automation_id } => {
                        effects.granted_automations.insert(automation_id.clone());
                    }
                    UpgradeEffect::GrantFlag { flag_id, value } => {
                        effects.flags_set.insert(flag_id.clone(), *value);
                    }
                    UpgradeEffect::SetDirtyTolerance { resource_id, value } => {
                        effects
                            .dirty_tolerance_overrides
                            .insert(resource_id.clone(), *value);
                    }
                }
            }
        }

        let effects = Arc::new(effects);
        self.cached = Some((step, self.revision, Arc::clone(&effects)));
        effects
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
