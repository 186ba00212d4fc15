//! Prestige layers: reset-for-reward progression.
//!
//! A prestige reset zeroes the layer's target resources, resets generators
//! and upgrades (honoring the retention policy), and grants
//! `baseReward * multiplierCurve(prestigeCount)` of the reward resource. A
//! companion counter resource named `{layer}-prestige-count` is incremented
//! when the pack defines one.

use std::collections::HashMap;
use std::sync::Arc;

use perpetua_core::condition::ConditionEvaluator;
use perpetua_core::formula::FormulaContext;
use perpetua_core::store::ResourceStore;
use perpetua_content::normalize::NormalizedContentPack;
use perpetua_content::pack::RetentionKind;

use crate::context::EvalSnapshot;
use crate::coordinator::TickFault;

/// Mutable per-layer state.
#[derive(Debug, Clone, Default)]
pub struct PrestigeState {
    pub is_unlocked: bool,
    pub prestige_count: u32,
    pub last_reset_step: Option<u64>,
}

/// What a reset changed, for the coordinator to apply.
#[derive(Debug, Clone, PartialEq)]
pub struct PrestigeOutcome {
    pub layer_id: String,
    pub reward_resource: String,
    pub reward_amount: f64,
    pub new_count: u32,
    /// Automation unlocked by this layer, if any.
    pub granted_automation: Option<String>,
}

/// Prestige failures surfaced to the host.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PrestigeError {
    #[error("unknown prestige layer '{id}'")]
    UnknownLayer { id: String },
    #[error("prestige layer '{id}' is locked")]
    Locked { id: String },
    #[error("reward evaluation failed for '{id}': {details}")]
    RewardEvaluation { id: String, details: String },
}

/// Owns prestige layer state.
pub struct PrestigeManager {
    pack: Arc<NormalizedContentPack>,
    states: Vec<PrestigeState>,
    evaluator: ConditionEvaluator,
}

impl PrestigeManager {
    pub fn new(pack: Arc<NormalizedContentPack>, evaluator: ConditionEvaluator) -> Self {
        let states = pack
            .prestige_layers
            .iter()
            .map(|_| PrestigeState::default())
            .collect();
        Self {
            pack,
            states,
            evaluator,
        }
    }

    fn index_of(&self, id: &str) -> Option<usize> {
        self.pack.lookup.prestige_layers.get(id).copied()
    }

    pub fn state(&self, id: &str) -> Option<&PrestigeState> {
        self.index_of(id).map(|i| &self.states[i])
    }

    pub fn prestige_count(&self, id: &str) -> u32 {
        self.state(id).map(|s| s.prestige_count).unwrap_or(0)
    }

    pub fn is_unlocked(&self, id: &str) -> bool {
        self.state(id).map(|s| s.is_unlocked).unwrap_or(false)
    }

    /// Unlocked/count views for snapshot building.
    pub fn counts(&self) -> HashMap<String, u32> {
        self.pack
            .prestige_layers
            .iter()
            .zip(&self.states)
            .map(|(layer, state)| (layer.id.clone(), state.prestige_count))
            .collect()
    }

    pub fn unlocked_ids(&self) -> Vec<String> {
        self.pack
            .prestige_layers
            .iter()
            .zip(&self.states)
            .filter(|(_, state)| state.is_unlocked)
            .map(|(layer, _)| layer.id.clone())
            .collect()
    }

    /// Per-tick unlock evaluation (monotone).
    pub fn update_for_step(&mut self, snapshot: &EvalSnapshot, faults: &mut Vec<TickFault>) {
        for (i, layer) in self.pack.prestige_layers.iter().enumerate() {
            if self.states[i].is_unlocked {
                continue;
            }
            match self.evaluator.evaluate(&layer.unlock_condition, snapshot) {
                Ok(true) => self.states[i].is_unlocked = true,
                Ok(false) => {}
                Err(error) => faults.push(TickFault::new("prestige", error.to_string())),
            }
        }
    }

    /// Perform a prestige reset.
    ///
    /// Zeroes the reset targets (capped retention amounts survive), resets
    /// all generators to their initial level, clears upgrade purchases
    /// except retained ids, grants the reward, and increments the counter
    /// resource `{layer}-prestige-count` when present.
    pub fn perform_prestige(
        &mut self,
        id: &str,
        step: u64,
        store: &mut ResourceStore,
        generators: &mut crate::generators::GeneratorManager,
        upgrades: &mut crate::upgrades::UpgradeManager,
    ) -> Result<PrestigeOutcome, PrestigeError> {
        let layer_index = self
            .index_of(id)
            .ok_or_else(|| PrestigeError::UnknownLayer { id: id.to_owned() })?;
        if !self.states[layer_index].is_unlocked {
            return Err(PrestigeError::Locked { id: id.to_owned() });
        }
        let layer = &self.pack.prestige_layers[layer_index];
        let count = self.states[layer_index].prestige_count;

        // Reward first: the multiplier curve sees the pre-reset count.
        let multiplier = match &layer.reward.multiplier_curve {
            Some(curve) => curve
                .evaluate(&FormulaContext::at_level(count as f64))
                .map_err(|error| PrestigeError::RewardEvaluation {
                    id: id.to_owned(),
                    details: error.to_string(),
                })?,
            None => 1.0,
        };
        let reward_amount = layer.reward.base_reward * multiplier;
        if !reward_amount.is_finite() || reward_amount < 0.0 {
            return Err(PrestigeError::RewardEvaluation {
                id: id.to_owned(),
                details: format!("reward {reward_amount} is negative or non-finite"),
            });
        }

        // Zero reset targets, honoring retention caps.
        for target in &layer.reset_targets {
            let Some(i) = store.index_of(target) else {
                continue;
            };
            let retained = layer
                .retention
                .iter()
                .find(|r| r.kind == RetentionKind::Resource && &r.id == target)
                .map(|r| r.amount.unwrap_or(f64::INFINITY))
                .unwrap_or(0.0);
            let kept = store.amount(i).min(retained);
            store.set_amount(i, kept);
        }

        // Generators reset to their initial levels.
        generators.reset_all_to_initial();

        // Upgrades reset except retained ids.
        let retained_upgrades: Vec<&str> = layer
            .retention
            .iter()
            .filter(|r| r.kind == RetentionKind::Upgrade)
            .map(|r| r.id.as_str())
            .collect();
        upgrades.reset_except(&retained_upgrades);

        // Grant the reward.
        if let Some(i) = store.index_of(&layer.reward.resource_id) {
            store.add_amount(i, reward_amount);
        }

        // Companion counter resource.
        let counter_id = format!("{id}-prestige-count");
        if let Some(i) = store.index_of(&counter_id) {
            store.add_amount(i, 1.0);
        }

        self.states[layer_index].prestige_count = count + 1;
        self.states[layer_index].last_reset_step = Some(step);

        tracing::info!(layer = id, count = count + 1, reward = reward_amount, "prestige reset");
        Ok(PrestigeOutcome {
            layer_id: id.to_owned(),
            reward_resource: layer.reward.resource_id.clone(),
            reward_amount,
            new_count: count + 1,
            granted_automation: layer.automation.clone(),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
