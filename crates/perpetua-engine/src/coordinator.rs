//! Progression coordinator: per-tick orchestration over all managers.
//!
//! [`ProgressionCoordinator::update_for_step`] runs the tick pipeline:
//!
//! 1. Iterate to a fixed point: rebuild derived achievement rewards, fold
//!    upgrade effects, apply unlocks/overrides, update every manager, and
//!    evaluate achievements. Completions can unlock further content, so the
//!    loop repeats until a pass completes nothing -- bounded by
//!    `achievement count + 1` iterations, which guarantees termination even
//!    if every pass completes something.
//! 2. Apply generator flows, automations, and transforms.
//! 3. Drive the store lifecycle: `finalize_tick` -> `publish` ->
//!    `reset_per_tick_accumulators`.
//!
//! Within a step, upgrade effects are monotone: resources and generators
//! only ever become unlocked by additional iterations, never re-locked.
//! Manager faults (formula failures, depth overflows) are reported through
//! the `on_error` callback and the [`TickReport`] without halting the tick;
//! only store lifecycle violations abort.

use std::collections::BTreeSet;
use std::sync::Arc;

use perpetua_core::condition::ConditionEvaluator;
use perpetua_core::store::{
    PublishView, ResourceStore, SnapshotGuardMode, StoreError,
};
use perpetua_core::serialize::{ReconcileReport, SerializedResourceState};
use perpetua_core::telemetry::{NullTelemetry, Telemetry};
use perpetua_content::normalize::NormalizedContentPack;
use perpetua_content::pack::{AchievementReward, AutomationTargetKind, UpgradeEffect};

use crate::achievements::{AchievementTracker, RewardOutbox};
use crate::context::{EvalSnapshot, ScriptEvaluator};
use crate::generators::{GeneratorManager, PurchaseError, PurchaseQuote};
use crate::metrics::MetricManager;
use crate::prestige::{PrestigeError, PrestigeManager, PrestigeOutcome};
use crate::resources::ResourceManager;
use crate::transforms::TransformScheduler;
use crate::upgrades::UpgradeManager;

// ---------------------------------------------------------------------------
// Config, errors, reports
// ---------------------------------------------------------------------------

/// Engine runtime configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Condition nesting bound (default 32).
    pub max_condition_depth: usize,
    /// Publish-time invariant sweep toggle.
    pub snapshot_guards: SnapshotGuardMode,
    /// Seed for the transform/mission RNG.
    pub transform_seed: u64,
    /// The running engine's version; must satisfy the pack's `engine` range.
    pub runtime_version: semver::Version,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_condition_depth: perpetua_core::condition::DEFAULT_MAX_CONDITION_DEPTH,
            snapshot_guards: SnapshotGuardMode::Auto,
            transform_seed: 0,
            runtime_version: semver::Version::new(1, 0, 0),
        }
    }
}

/// Fatal engine errors (store lifecycle and construction failures).
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The pack declares an engine range the running version does not satisfy.
    #[error("pack requires engine {required}, runtime is {runtime}")]
    UnsupportedEngineVersion { required: String, runtime: String },
}

/// A non-fatal manager failure within a tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickFault {
    pub domain: &'static str,
    pub message: String,
}

impl TickFault {
    pub fn new(domain: &'static str, message: impl Into<String>) -> Self {
        Self {
            domain,
            message: message.into(),
        }
    }
}

/// What one `update_for_step` did.
#[derive(Debug, Clone)]
pub struct TickReport {
    pub step: u64,
    /// Fixed-point iterations executed (at least 1).
    pub iterations: u32,
    pub completed_achievements: Vec<String>,
    /// Runtime events fired this step.
    pub events: Vec<String>,
    /// Resources reported by this step's publish.
    pub dirty_count: usize,
    pub faults: Vec<TickFault>,
}

// ---------------------------------------------------------------------------
// Automation runtime
// ---------------------------------------------------------------------------

struct AutomationRuntime {
    unlocked: bool,
    next_run_seconds: f64,
}

// ---------------------------------------------------------------------------
// ProgressionCoordinator
// ---------------------------------------------------------------------------

/// Owns the store and all managers; drives the per-tick contract.
pub struct ProgressionCoordinator {
    pack: Arc<NormalizedContentPack>,
    store: ResourceStore,
    resources: ResourceManager,
    generators: GeneratorManager,
    upgrades: UpgradeManager,
    achievements: AchievementTracker,
    prestige: PrestigeManager,
    metrics: MetricManager,
    transforms: TransformScheduler,
    automation_runtimes: Vec<AutomationRuntime>,
    evaluator: ConditionEvaluator,
    scripts: Option<Arc<dyn ScriptEvaluator>>,
    telemetry: Arc<dyn Telemetry>,
    /// Flag ids any pack entity can grant, precomputed for snapshots.
    flag_ids: BTreeSet<String>,
    /// Automations granted by effects, rewards, or prestige.
    granted_automations: BTreeSet<String>,
    time_seconds: f64,
    last_updated_step: u64,
    on_error: Option<Box<dyn Fn(&TickFault) + Send + Sync>>,
}

impl ProgressionCoordinator {
    /// Build a coordinator (and its store) from a validated pack.
    pub fn new(
        pack: Arc<NormalizedContentPack>,
        config: EngineConfig,
        telemetry: Arc<dyn Telemetry>,
    ) -> Result<Self, EngineError> {
        if !pack.engine.matches(&config.runtime_version) {
            return Err(EngineError::UnsupportedEngineVersion {
                required: pack.engine.to_string(),
                runtime: config.runtime_version.to_string(),
            });
        }

        let evaluator = ConditionEvaluator::new(config.max_condition_depth);
        let specs = ResourceManager::specs_from_pack(&pack);
        let store = ResourceStore::new(&specs, Arc::clone(&telemetry), config.snapshot_guards)?;

        let mut flag_ids = BTreeSet::new();
        for upgrade in &pack.upgrades {
            for effect in &upgrade.effects {
                if let UpgradeEffect::GrantFlag { flag_id, .. } = effect {
                    flag_ids.insert(flag_id.clone());
                }
            }
        }
        for achievement in &pack.achievements {
            if let Some(AchievementReward::GrantFlag { flag_id, .. }) = &achievement.reward {
                flag_ids.insert(flag_id.clone());
            }
        }

        let automation_runtimes = pack
            .automations
            .iter()
            .map(|automation| AutomationRuntime {
                unlocked: automation.enabled_by_default,
                next_run_seconds: 0.0,
            })
            .collect();

        Ok(Self {
            resources: ResourceManager::new(&pack, evaluator),
            generators: GeneratorManager::new(Arc::clone(&pack), evaluator),
            upgrades: UpgradeManager::new(Arc::clone(&pack), evaluator),
            achievements: AchievementTracker::new(Arc::clone(&pack), evaluator),
            prestige: PrestigeManager::new(Arc::clone(&pack), evaluator),
            metrics: MetricManager::new(Arc::clone(&pack)),
            transforms: TransformScheduler::new(Arc::clone(&pack), evaluator, config.transform_seed),
            automation_runtimes,
            pack,
            store,
            evaluator,
            scripts: None,
            telemetry,
            flag_ids,
            granted_automations: BTreeSet::new(),
            time_seconds: 0.0,
            last_updated_step: 0,
            on_error: None,
        })
    }

    /// Coordinator with default config and a null telemetry sink.
    pub fn with_defaults(pack: Arc<NormalizedContentPack>) -> Result<Self, EngineError> {
        Self::new(pack, EngineConfig::default(), Arc::new(NullTelemetry))
    }

    /// Install the host's script evaluator capability.
    pub fn set_script_evaluator(&mut self, scripts: Arc<dyn ScriptEvaluator>) {
        self.scripts = Some(scripts);
    }

    /// Install a callback invoked for every non-fatal tick fault.
    pub fn set_on_error(&mut self, callback: Box<dyn Fn(&TickFault) + Send + Sync>) {
        self.on_error = Some(callback);
    }

    // -- accessors ----------------------------------------------------------

    pub fn pack(&self) -> &Arc<NormalizedContentPack> {
        &self.pack
    }

    pub fn store(&self) -> &ResourceStore {
        &self.store
    }

    pub fn generators(&self) -> &GeneratorManager {
        &self.generators
    }

    pub fn upgrades(&self) -> &UpgradeManager {
        &self.upgrades
    }

    pub fn achievements(&self) -> &AchievementTracker {
        &self.achievements
    }

    pub fn prestige(&self) -> &PrestigeManager {
        &self.prestige
    }

    pub fn transforms(&self) -> &TransformScheduler {
        &self.transforms
    }

    pub fn time_seconds(&self) -> f64 {
        self.time_seconds
    }

    pub fn last_updated_step(&self) -> u64 {
        self.last_updated_step
    }

    /// The most recent publish snapshot.
    pub fn publish_view(&self) -> PublishView<'_> {
        self.store.publish_view()
    }

    pub fn resource_amount(&self, id: &str) -> Option<f64> {
        self.store.index_of(id).map(|i| self.store.amount(i))
    }

    // -- tick ----------------------------------------------------------------

    /// Run one simulation step. `delta_ms` is the fixed timestep in
    /// milliseconds supplied by the host scheduler.
    pub fn update_for_step(&mut self, step: u64, delta_ms: f64) -> Result<TickReport, EngineError> {
        let delta_seconds = delta_ms / 1000.0;
        self.time_seconds += delta_seconds;

        let mut faults: Vec<TickFault> = Vec::new();
        let mut events: Vec<String> = Vec::new();
        let mut completed_achievements: Vec<String> = Vec::new();

        // Phase 1: fixed-point iteration. Bounded so reward chains cannot
        // loop forever.
        let max_iterations = self.achievements.achievement_count() as u32 + 1;
        let mut iterations = 0;
        for _ in 0..max_iterations.max(1) {
            iterations += 1;
            self.achievements.rebuild_derived_rewards();
            self.rebuild_granted_automations();

            let snapshot = self.build_snapshot(step, delta_seconds);
            let effects = self
                .upgrades
                .get_upgrade_effects(step, &snapshot, &mut faults);

            self.resources
                .apply_unlocked_resources(&mut self.store, &effects.unlocked_resources);
            self.generators
                .apply_unlocked_generators(&effects.unlocked_generators, step);
            self.resources
                .apply_capacity_overrides(&mut self.store, &effects.resource_capacity_overrides);
            self.resources.apply_dirty_tolerance_overrides(
                &mut self.store,
                &effects.dirty_tolerance_overrides,
            );
            for automation in &effects.granted_automations {
                self.granted_automations.insert(automation.clone());
            }

            self.resources
                .update_unlock_visibility(&mut self.store, &snapshot, &mut faults);
            self.generators
                .update_for_step(step, &snapshot, &effects, &mut faults);
            self.upgrades.update_for_step(step, &snapshot, &mut faults);
            self.prestige.update_for_step(&snapshot, &mut faults);

            let mut outbox = RewardOutbox::default();
            let completed =
                self.achievements
                    .update_for_step(step, &snapshot, &mut outbox, &mut faults);

            // Apply queued rewards.
            for (resource_id, amount) in outbox.resource_grants {
                if let Some(i) = self.store.index_of(&resource_id) {
                    if amount.is_finite() && amount > 0.0 {
                        self.store.add_amount(i, amount);
                    }
                }
            }
            for upgrade_id in outbox.upgrade_grants {
                self.upgrades.grant_external(&upgrade_id);
            }
            for automation_id in outbox.automation_unlocks {
                self.granted_automations.insert(automation_id);
            }
            // Flag grants are derived from completion history; nothing to
            // apply eagerly.
            for event in outbox.events {
                self.metrics.record_event(&event);
                events.push(event);
            }

            if completed.is_empty() {
                break;
            }
            completed_achievements.extend(completed.into_iter().map(|c| c.id));
        }

        // Phase 2: economy flows.
        self.generators.apply_flows(&mut self.store);
        self.run_automations(step, &mut faults);
        {
            let snapshot = self.build_snapshot(step, delta_seconds);
            self.transforms.update_for_step(
                self.time_seconds,
                &snapshot,
                &mut self.store,
                &mut faults,
            );
        }

        // Phase 3: store lifecycle.
        self.store.finalize_tick(delta_ms)?;
        self.metrics.observe_tick_deltas(&self.store);
        let dirty_count = self.store.publish()?.dirty_count();
        self.store.reset_per_tick_accumulators()?;

        self.last_updated_step = step;

        for fault in &faults {
            self.telemetry.record_warning(
                "ProgressionTickFault",
                serde_json::json!({ "domain": fault.domain, "message": fault.message }),
            );
            if let Some(callback) = &self.on_error {
                callback(fault);
            }
        }

        Ok(TickReport {
            step,
            iterations,
            completed_achievements,
            events,
            dirty_count,
            faults,
        })
    }

    // -- host actions ---------------------------------------------------------

    /// Quote a bulk generator purchase at the current state.
    pub fn get_purchase_quote(&mut self, id: &str, count: u32) -> Result<PurchaseQuote, PurchaseError> {
        let step = self.last_updated_step;
        let snapshot = self.build_snapshot(step, 0.0);
        let mut faults = Vec::new();
        let effects = self.upgrades.get_upgrade_effects(step, &snapshot, &mut faults);
        self.generators
            .get_purchase_quote(id, count, &effects, &self.store)
    }

    /// Purchase generator levels, spending through the store.
    pub fn purchase_generator(&mut self, id: &str, count: u32) -> Result<u32, PurchaseError> {
        let step = self.last_updated_step;
        let snapshot = self.build_snapshot(step, 0.0);
        let mut faults = Vec::new();
        let effects = self.upgrades.get_upgrade_effects(step, &snapshot, &mut faults);
        self.generators
            .apply_purchase(id, count, &effects, &mut self.store, step)
    }

    /// Purchase an upgrade.
    pub fn purchase_upgrade(&mut self, id: &str) -> Result<(), PurchaseError> {
        let snapshot = self.build_snapshot(self.last_updated_step, 0.0);
        self.upgrades.purchase(id, &snapshot, &mut self.store)
    }

    /// Perform a prestige reset on an unlocked layer.
    pub fn perform_prestige(&mut self, id: &str) -> Result<PrestigeOutcome, PrestigeError> {
        let step = self.last_updated_step;
        let outcome = self.prestige.perform_prestige(
            id,
            step,
            &mut self.store,
            &mut self.generators,
            &mut self.upgrades,
        )?;
        if let Some(automation) = &outcome.granted_automation {
            self.granted_automations.insert(automation.clone());
        }
        Ok(outcome)
    }

    /// Queue a manual transform trigger for the next step.
    pub fn trigger_transform(&mut self, id: &str) -> bool {
        self.transforms.request_manual(id)
    }

    /// Toggle a generator's production.
    pub fn set_generator_enabled(&mut self, id: &str, enabled: bool) -> bool {
        self.generators.set_enabled(id, enabled)
    }

    // -- persistence ------------------------------------------------------------

    /// Export the serialized resource state for saving.
    pub fn export_save(&self) -> SerializedResourceState {
        self.store.export_for_save()
    }

    /// Reconcile and hydrate a saved state against this pack's definitions.
    pub fn hydrate_save(
        &mut self,
        state: &SerializedResourceState,
    ) -> Result<ReconcileReport, StoreError> {
        let report = self.store.reconcile_save_against_definitions(state)?;
        self.store.hydrate_from_save(state, &report);
        self.achievements.rebuild_derived_rewards();
        Ok(report)
    }

    // -- internals ----------------------------------------------------------------

    fn rebuild_granted_automations(&mut self) {
        for automation in &self.achievements.derived().automations {
            self.granted_automations.insert(automation.clone());
        }
    }

    /// Copy the condition-relevant state into a plain snapshot.
    fn build_snapshot(&self, step: u64, delta_seconds: f64) -> EvalSnapshot {
        let mut snapshot = EvalSnapshot {
            step,
            time_seconds: self.time_seconds,
            delta_seconds,
            scripts: self.scripts.clone(),
            ..EvalSnapshot::default()
        };

        for (i, id) in self.store.ids().iter().enumerate() {
            snapshot.resource_amounts.insert(id.clone(), self.store.amount(i));
        }
        for resource in &self.pack.resources {
            snapshot
                .resource_names
                .insert(resource.id.clone(), resource.name.default.clone());
        }
        for generator in &self.pack.generators {
            snapshot
                .generator_levels
                .insert(generator.id.clone(), self.generators.level_of(&generator.id));
            snapshot
                .generator_names
                .insert(generator.id.clone(), generator.name.default.clone());
        }
        for upgrade in &self.pack.upgrades {
            snapshot
                .upgrade_purchases
                .insert(upgrade.id.clone(), self.upgrades.purchases_of(&upgrade.id));
            snapshot
                .upgrade_names
                .insert(upgrade.id.clone(), upgrade.name.default.clone());
        }
        snapshot.prestige_unlocked = self.prestige.unlocked_ids().into_iter().collect();
        snapshot.prestige_counts = self.prestige.counts();
        snapshot.granted_automations = self.granted_automations.clone();

        // Flags: achievement-derived values win over upgrade-granted ones.
        for flag_id in &self.flag_ids {
            let value = self
                .achievements
                .get_flag_value(flag_id)
                .or_else(|| self.upgrades.flag_value(flag_id))
                .unwrap_or(false);
            snapshot.flags.insert(flag_id.clone(), value);
        }
        snapshot.metric_values = self.metrics.values(&self.generators);

        snapshot
    }

    /// Run unlocked automations whose interval elapsed.
    fn run_automations(&mut self, step: u64, faults: &mut Vec<TickFault>) {
        if self.pack.automations.is_empty() {
            return;
        }
        let snapshot = self.build_snapshot(step, 0.0);
        let effects = self
            .upgrades
            .get_upgrade_effects(step, &snapshot, faults);

        for (i, automation) in self.pack.automations.iter().enumerate() {
            let runtime = &mut self.automation_runtimes[i];

            if !runtime.unlocked {
                let granted = self.granted_automations.contains(&automation.id);
                let condition_met = match &automation.unlock_condition {
                    Some(condition) => match self.evaluator.evaluate(condition, &snapshot) {
                        Ok(passes) => passes,
                        Err(error) => {
                            faults.push(TickFault::new("automations", error.to_string()));
                            false
                        }
                    },
                    None => false,
                };
                if granted || condition_met {
                    runtime.unlocked = true;
                    runtime.next_run_seconds = self.time_seconds;
                } else {
                    continue;
                }
            }

            if self.time_seconds < runtime.next_run_seconds {
                continue;
            }
            let interval = automation.interval_seconds.unwrap_or(1.0);
            runtime.next_run_seconds = self.time_seconds + interval;

            match automation.target.kind {
                AutomationTargetKind::GeneratorPurchase => {
                    // Automated purchases are best-effort; an unaffordable
                    // step just waits for the next interval.
                    let _ = self.generators.apply_purchase(
                        &automation.target.id,
                        1,
                        &effects,
                        &mut self.store,
                        step,
                    );
                }
                AutomationTargetKind::TransformTrigger => {
                    self.transforms.request_manual(&automation.target.id);
                }
            }
        }
    }
}

impl std::fmt::Debug for ProgressionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressionCoordinator")
            .field("pack", &self.pack.id)
            .field("step", &self.last_updated_step)
            .field("time_seconds", &self.time_seconds)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use perpetua_content::validator::Validator;

    fn coordinator_from(raw: serde_json::Value) -> ProgressionCoordinator {
        let outcome = Validator::with_defaults().parse(&raw);
        let pack = outcome.pack().expect("pack validates").clone();
        ProgressionCoordinator::with_defaults(pack).unwrap()
    }

    fn basic_pack() -> serde_json::Value {
        serde_json::json!({
            "id": "demo",
            "name": {"default": "Demo"},
            "version": "1.0.0",
            "engine": ">=1.0.0",
            "resources": [
                {"id": "e", "name": {"default": "Energy"}, "startAmount": 100.0}
            ],
            "generators": [
                {"id": "mill", "name": {"default": "Mill"},
                 "produces": [{"resourceId": "e", "rate": {"kind": "linear", "base": 0, "slope": 1}}],
                 "purchase": {"currencyId": "e", "costMultiplier": 10,
                              "costCurve": {"kind": "exponential", "base": 1, "growth": 1.5}}}
            ]
        })
    }

    // -- 1. Basic tick ---------------------------------------------------------

    #[test]
    fn tick_produces_and_publishes() {
        let mut coordinator = coordinator_from(basic_pack());
        coordinator.purchase_generator("mill", 2).unwrap();
        // Cost: 10*(1 + 1.5) = 25; 100 - 25 = 75.
        assert_eq!(coordinator.resource_amount("e"), Some(75.0));

        let report = coordinator.update_for_step(1, 1000.0).unwrap();
        // 2 levels at slope 1 -> 2/s for one second.
        assert_eq!(coordinator.resource_amount("e"), Some(77.0));
        assert_eq!(report.dirty_count, 1);
        assert!(report.faults.is_empty());
        assert_eq!(report.iterations, 1);
    }

    #[test]
    fn quiet_ticks_settle_to_zero_dirty() {
        let mut coordinator = coordinator_from(basic_pack());
        for step in 1..=4 {
            coordinator.update_for_step(step, 1000.0).unwrap();
        }
        let report = coordinator.update_for_step(5, 1000.0).unwrap();
        assert_eq!(report.dirty_count, 0);
    }

    // -- 2. Fixed-point iteration bound ------------------------------------------

    #[test]
    fn reward_chains_resolve_within_one_step() {
        // Achievement A grants an upgrade; the upgrade unlocks a resource;
        // achievement B tracks a flag granted by achievement C, which needs
        // the chain. All of it must resolve inside one update_for_step.
        let raw = serde_json::json!({
            "id": "chain",
            "name": {"default": "Chain"},
            "version": "1.0.0",
            "engine": ">=1.0.0",
            "resources": [
                {"id": "e", "name": {"default": "Energy"}, "startAmount": 500.0},
                {"id": "gem", "name": {"default": "Gem"}, "unlocked": false, "visible": false}
            ],
            "upgrades": [
                {"id": "opener", "name": {"default": "Opener"},
                 "cost": [{"resourceId": "e", "amount": {"kind": "constant", "value": 1}}],
                 "effects": [{"kind": "unlockResource", "resourceId": "gem"}],
                 "unlockCondition": {"kind": "never"}}
            ],
            "achievements": [
                {"id": "step-one", "name": {"default": "One"},
                 "track": {"kind": "resource", "resourceId": "e"},
                 "progress": {"mode": "oneShot", "target": {"kind": "constant", "value": 100}},
                 "reward": {"kind": "grantUpgrade", "upgradeId": "opener"}},
                {"id": "step-two", "name": {"default": "Two"},
                 "track": {"kind": "upgradeOwned", "upgradeId": "opener"},
                 "progress": {"mode": "oneShot", "target": {"kind": "constant", "value": 1}},
                 "reward": {"kind": "grantResource", "resourceId": "gem",
                            "amount": {"kind": "constant", "value": 5}}}
            ]
        });
        let mut coordinator = coordinator_from(raw);

        let report = coordinator.update_for_step(1, 16.0).unwrap();
        // Chain: step-one -> opener granted -> step-two -> gem +5.
        assert!(report
            .completed_achievements
            .contains(&"step-one".to_owned()));
        assert!(report
            .completed_achievements
            .contains(&"step-two".to_owned()));
        assert!(report.iterations >= 2);
        assert!(report.iterations <= 3); // achievement_count + 1

        assert_eq!(coordinator.upgrades().purchases_of("opener"), 1);
        assert_eq!(coordinator.resource_amount("gem"), Some(5.0));
        let gem = coordinator.store().index_of("gem").unwrap();
        assert!(coordinator.store().is_unlocked(gem));
    }

    #[test]
    fn iteration_count_is_bounded_by_achievements() {
        let mut coordinator = coordinator_from(basic_pack());
        // No achievements: exactly one iteration.
        let report = coordinator.update_for_step(1, 16.0).unwrap();
        assert_eq!(report.iterations, 1);
    }

    // -- 3. Unlock conditions drive the store -------------------------------------

    #[test]
    fn threshold_unlock_happens_mid_run() {
        let raw = serde_json::json!({
            "id": "demo",
            "name": {"default": "Demo"},
            "version": "1.0.0",
            "engine": ">=1.0.0",
            "resources": [
                {"id": "e", "name": {"default": "Energy"}, "startAmount": 0.0},
                {"id": "crystal", "name": {"default": "Crystal"}, "unlocked": false, "visible": false,
                 "unlockCondition": {"kind": "resourceThreshold", "resourceId": "e",
                                     "comparator": "gte", "amount": 5}}
            ],
            "generators": [
                {"id": "mill", "name": {"default": "Mill"}, "initialLevel": 1,
                 "produces": [{"resourceId": "e", "rate": {"kind": "constant", "value": 2}}],
                 "purchase": {"currencyId": "e", "costCurve": {"kind": "constant", "value": 10}}}
            ]
        });
        let mut coordinator = coordinator_from(raw);
        let crystal = coordinator.store().index_of("crystal").unwrap();

        coordinator.update_for_step(1, 1000.0).unwrap(); // e = 2
        coordinator.update_for_step(2, 1000.0).unwrap(); // e = 4
        assert!(!coordinator.store().is_unlocked(crystal));

        coordinator.update_for_step(3, 1000.0).unwrap(); // e = 6
        coordinator.update_for_step(4, 1000.0).unwrap(); // condition seen
        assert!(coordinator.store().is_unlocked(crystal));
    }

    // -- 4. Determinism --------------------------------------------------------------

    #[test]
    fn identical_runs_produce_identical_state() {
        let run = || {
            let mut coordinator = coordinator_from(basic_pack());
            coordinator.purchase_generator("mill", 3).unwrap();
            for step in 1..=100 {
                coordinator.update_for_step(step, 16.0).unwrap();
            }
            coordinator.resource_amount("e").unwrap()
        };
        assert_eq!(run().to_bits(), run().to_bits());
    }

    // -- 5. Faults are reported, not fatal ----------------------------------------------

    #[test]
    fn on_error_callback_sees_faults() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc as StdArc;

        // A deeply nested condition overflows the depth bound at runtime.
        let mut nested = serde_json::json!({"kind": "always"});
        for _ in 0..40 {
            nested = serde_json::json!({"kind": "not", "condition": nested});
        }
        let raw = serde_json::json!({
            "id": "demo",
            "name": {"default": "Demo"},
            "version": "1.0.0",
            "engine": ">=1.0.0",
            "resources": [
                {"id": "e", "name": {"default": "Energy"}},
                {"id": "deep", "name": {"default": "Deep"}, "unlocked": false,
                 "unlockCondition": nested}
            ]
        });
        let mut coordinator = coordinator_from(raw);

        let seen = StdArc::new(AtomicUsize::new(0));
        let seen_in_callback = StdArc::clone(&seen);
        coordinator.set_on_error(Box::new(move |_fault| {
            seen_in_callback.fetch_add(1, Ordering::SeqCst);
        }));

        let report = coordinator.update_for_step(1, 16.0).unwrap();
        assert!(!report.faults.is_empty());
        assert!(seen.load(Ordering::SeqCst) > 0);
    }

    // -- 6. Save round-trip through the coordinator ---------------------------------------

    #[test]
    fn export_and_hydrate_roundtrip() {
        let mut coordinator = coordinator_from(basic_pack());
        coordinator.purchase_generator("mill", 1).unwrap();
        coordinator.update_for_step(1, 1000.0).unwrap();
        let saved = coordinator.export_save();

        let mut restored = coordinator_from(basic_pack());
        let report = restored.hydrate_save(&saved).unwrap();
        assert!(report.digests_match);
        assert_eq!(
            restored.resource_amount("e"),
            coordinator.resource_amount("e")
        );
    }

    // -- 7. Engine version gating -----------------------------------------------------------

    #[test]
    fn pack_requiring_newer_engine_is_rejected() {
        let mut raw = basic_pack();
        raw["engine"] = serde_json::json!(">=2.0.0");
        let outcome = Validator::with_defaults().parse(&raw);
        let pack = outcome.pack().expect("pack validates").clone();

        let result = ProgressionCoordinator::with_defaults(pack);
        assert!(matches!(
            result,
            Err(EngineError::UnsupportedEngineVersion { .. })
        ));
    }

    // -- 8. Automations purchase on their interval ------------------------------------------

    #[test]
    fn automation_buys_generator_levels() {
        let raw = serde_json::json!({
            "id": "demo",
            "name": {"default": "Demo"},
            "version": "1.0.0",
            "engine": ">=1.0.0",
            "resources": [
                {"id": "e", "name": {"default": "Energy"}, "startAmount": 1000.0}
            ],
            "generators": [
                {"id": "mill", "name": {"default": "Mill"},
                 "produces": [{"resourceId": "e", "rate": {"kind": "constant", "value": 0}}],
                 "purchase": {"currencyId": "e", "costCurve": {"kind": "constant", "value": 10}}}
            ],
            "automations": [
                {"id": "auto-mill", "name": {"default": "Auto Mill"},
                 "target": {"kind": "generatorPurchase", "id": "mill"},
                 "intervalSeconds": 2.0,
                 "enabledByDefault": true}
            ]
        });
        let mut coordinator = coordinator_from(raw);

        // 1s ticks: purchases land every 2 seconds.
        for step in 1..=6 {
            coordinator.update_for_step(step, 1000.0).unwrap();
        }
        let owned = coordinator.generators().level_of("mill");
        assert!(owned >= 2, "expected automated purchases, got {owned}");
        assert!(coordinator.resource_amount("e").unwrap() < 1000.0);
    }
}
