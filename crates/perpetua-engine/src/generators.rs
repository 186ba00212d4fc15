//! Generator state, rate views, and the purchase evaluator.
//!
//! Generator rate formulas are evaluated at `level = owned`; the result is
//! the generator's total per-second stream for that resource, so a generator
//! at level 0 contributes nothing. Upgrade-effect multipliers compose on top
//! (additive bonuses first, then the multiplier product, per the effects
//! contract).
//!
//! Purchase quotes sum the cost of `count` sequential purchase indices
//! starting at the current level; `maxLevel` and `maxBulk` clamp the quoted
//! count rather than failing the quote.

use std::collections::BTreeSet;
use std::sync::Arc;

use perpetua_core::condition::ConditionEvaluator;
use perpetua_core::formula::{FormulaContext, FormulaVariables};
use perpetua_core::store::ResourceStore;
use perpetua_content::normalize::NormalizedContentPack;
use perpetua_content::pack::CostEntry;

use crate::context::EvalSnapshot;
use crate::coordinator::TickFault;
use crate::effects::EvaluatedUpgradeEffects;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Purchase failures surfaced to the host.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PurchaseError {
    #[error("unknown generator '{id}'")]
    UnknownGenerator { id: String },
    #[error("unknown upgrade '{id}'")]
    UnknownUpgrade { id: String },
    #[error("'{id}' is locked")]
    Locked { id: String },
    #[error("purchase count must be positive")]
    InvalidCount,
    #[error("'{id}' is already at its maximum")]
    MaxedOut { id: String },
    #[error("cannot afford '{id}'")]
    Unaffordable { id: String },
    #[error("cost evaluation failed for '{id}': {details}")]
    CostEvaluation { id: String, details: String },
    #[error("prerequisites for '{id}' are not met")]
    PrerequisitesUnmet { id: String },
}

// ---------------------------------------------------------------------------
// State & views
// ---------------------------------------------------------------------------

/// Mutable per-generator state.
#[derive(Debug, Clone)]
pub struct GeneratorState {
    pub owned: u32,
    pub enabled: bool,
    pub is_unlocked: bool,
    pub is_visible: bool,
    /// Human-readable unlock hint while locked.
    pub unlock_hint: Option<String>,
    pub next_purchase_ready_at_step: u64,
}

/// An effective per-second stream after upgrade effects.
#[derive(Debug, Clone, PartialEq)]
pub struct RateView {
    pub resource_id: String,
    pub per_second: f64,
}

/// One resource line of a purchase quote.
#[derive(Debug, Clone, PartialEq)]
pub struct CostQuote {
    pub resource_id: String,
    pub amount: f64,
}

/// A bulk purchase quote.
#[derive(Debug, Clone, PartialEq)]
pub struct PurchaseQuote {
    pub generator_id: String,
    pub requested: u32,
    /// Count actually quoted after `maxLevel`/`maxBulk` clamping.
    pub quoted: u32,
    pub costs: Vec<CostQuote>,
    pub affordable: bool,
}

// ---------------------------------------------------------------------------
// GeneratorManager
// ---------------------------------------------------------------------------

/// Owns generator runtime state and the purchase evaluator.
pub struct GeneratorManager {
    pack: Arc<NormalizedContentPack>,
    states: Vec<GeneratorState>,
    produces_views: Vec<Vec<RateView>>,
    consumes_views: Vec<Vec<RateView>>,
    evaluator: ConditionEvaluator,
}

impl GeneratorManager {
    pub fn new(pack: Arc<NormalizedContentPack>, evaluator: ConditionEvaluator) -> Self {
        let states = pack
            .generators
            .iter()
            .map(|generator| GeneratorState {
                owned: generator.initial_level,
                enabled: true,
                is_unlocked: generator.base_unlock.is_none(),
                is_visible: generator.visibility_condition.is_none(),
                unlock_hint: None,
                next_purchase_ready_at_step: 0,
            })
            .collect();
        let produces_views = pack.generators.iter().map(|_| Vec::new()).collect();
        let consumes_views = pack.generators.iter().map(|_| Vec::new()).collect();
        Self {
            pack,
            states,
            produces_views,
            consumes_views,
            evaluator,
        }
    }

    fn index_of(&self, id: &str) -> Option<usize> {
        self.pack.lookup.generators.get(id).copied()
    }

    pub fn state(&self, id: &str) -> Option<&GeneratorState> {
        self.index_of(id).map(|i| &self.states[i])
    }

    pub fn level_of(&self, id: &str) -> u32 {
        self.state(id).map(|s| s.owned).unwrap_or(0)
    }

    /// Sum of owned levels across all generators.
    pub fn total_levels(&self) -> u32 {
        self.states.iter().map(|s| s.owned).sum()
    }

    /// Enable or disable a generator's production (host toggle).
    pub fn set_enabled(&mut self, id: &str, enabled: bool) -> bool {
        match self.index_of(id) {
            Some(i) => {
                self.states[i].enabled = enabled;
                true
            }
            None => false,
        }
    }

    /// Reset every generator to its initial level (prestige).
    pub fn reset_all_to_initial(&mut self) {
        for (i, generator) in self.pack.generators.iter().enumerate() {
            self.states[i].owned = generator.initial_level;
        }
    }

    /// Unlock generators named by upgrade effects or rewards.
    pub fn apply_unlocked_generators(&mut self, ids: &BTreeSet<String>, step: u64) {
        for id in ids {
            if let Some(i) = self.index_of(id) {
                let state = &mut self.states[i];
                if !state.is_unlocked {
                    state.is_unlocked = true;
                    state.is_visible = true;
                    state.unlock_hint = None;
                    state.next_purchase_ready_at_step = step;
                }
            }
        }
    }

    /// Per-tick update: unlock/visibility conditions, hints for locked
    /// generators, and effective rate views under the current effects.
    pub fn update_for_step(
        &mut self,
        _step: u64,
        snapshot: &EvalSnapshot,
        effects: &EvaluatedUpgradeEffects,
        faults: &mut Vec<TickFault>,
    ) {
        for (i, generator) in self.pack.generators.iter().enumerate() {
            let state = &mut self.states[i];

            if !state.is_unlocked {
                if let Some(condition) = &generator.base_unlock {
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
                        Err(error) => {
                            faults.push(TickFault::new("generators", error.to_string()));
                        }
                    }
                }
            }
            if !state.is_visible {
                if let Some(condition) = &generator.visibility_condition {
                    match self.evaluator.evaluate(condition, snapshot) {
                        Ok(true) => state.is_visible = true,
                        Ok(false) => {}
                        Err(error) => {
                            faults.push(TickFault::new("generators", error.to_string()));
                        }
                    }
                }
            }

            // Rate views.
            let owned = state.owned;
            let active = state.is_unlocked && state.enabled && owned > 0;
            let variables = FormulaVariables {
                level: owned as f64,
                time: snapshot.time_seconds,
                delta_time: snapshot.delta_seconds,
            };
            let ctx = FormulaContext::new(variables, snapshot);

            self.produces_views[i].clear();
            for flow in &generator.produces {
                let base = if active {
                    match flow.rate.evaluate(&ctx) {
                        Ok(rate) => rate,
                        Err(error) => {
                            faults.push(TickFault::new("generators", error.to_string()));
                            0.0
                        }
                    }
                } else {
                    0.0
                };
                let boosted = (base
                    + effects.generator_rate_bonus(&generator.id)
                    + effects.resource_rate_bonus(&flow.resource_id))
                    * effects.generator_rate_multiplier(&generator.id)
                    * effects.resource_rate_multiplier(&flow.resource_id);
                self.produces_views[i].push(RateView {
                    resource_id: flow.resource_id.clone(),
                    per_second: if active { boosted.max(0.0) } else { 0.0 },
                });
            }

            self.consumes_views[i].clear();
            for flow in &generator.consumes {
                let base = if active {
                    match flow.rate.evaluate(&ctx) {
                        Ok(rate) => rate,
                        Err(error) => {
                            faults.push(TickFault::new("generators", error.to_string()));
                            0.0
                        }
                    }
                } else {
                    0.0
                };
                let scaled = base
                    * effects.generator_consumption_multiplier(&generator.id)
                    * effects.generator_resource_consumption_multiplier(
                        &generator.id,
                        &flow.resource_id,
                    );
                self.consumes_views[i].push(RateView {
                    resource_id: flow.resource_id.clone(),
                    per_second: if active { scaled.max(0.0) } else { 0.0 },
                });
            }
        }
    }

    /// Current effective production streams of a generator.
    pub fn produces_view(&self, id: &str) -> &[RateView] {
        self.index_of(id)
            .map(|i| self.produces_views[i].as_slice())
            .unwrap_or(&[])
    }

    /// Current effective consumption streams of a generator.
    pub fn consumes_view(&self, id: &str) -> &[RateView] {
        self.index_of(id)
            .map(|i| self.consumes_views[i].as_slice())
            .unwrap_or(&[])
    }

    /// Push all effective streams into the store's rate accumulators.
    pub fn apply_flows(&self, store: &mut ResourceStore) {
        for (produces, consumes) in self.produces_views.iter().zip(&self.consumes_views) {
            for view in produces {
                if view.per_second > 0.0 {
                    if let Some(i) = store.index_of(&view.resource_id) {
                        store.apply_income(i, view.per_second);
                    }
                }
            }
            for view in consumes {
                if view.per_second > 0.0 {
                    if let Some(i) = store.index_of(&view.resource_id) {
                        store.apply_expense(i, view.per_second);
                    }
                }
            }
        }
    }

    // -- purchase evaluator --------------------------------------------------

    /// Cost of the purchase at `purchase_index`, after effects.
    ///
    /// Returns `None` when any cost step is non-finite or negative.
    pub fn compute_generator_costs(
        &self,
        id: &str,
        purchase_index: u32,
        effects: &EvaluatedUpgradeEffects,
    ) -> Option<Vec<CostQuote>> {
        let i = self.index_of(id)?;
        let generator = &self.pack.generators[i];
        let multiplier = effects.generator_cost_multiplier(id);

        let mut costs = Vec::new();
        for entry in generator.purchase.entries() {
            let amount = cost_of_entry(&entry, purchase_index)? * multiplier;
            if !amount.is_finite() || amount < 0.0 {
                return None;
            }
            costs.push(CostQuote {
                resource_id: entry.resource_id.clone(),
                amount,
            });
        }
        Some(costs)
    }

    /// Quote a bulk purchase of `count` levels at the current owned level.
    pub fn get_purchase_quote(
        &self,
        id: &str,
        count: u32,
        effects: &EvaluatedUpgradeEffects,
        store: &ResourceStore,
    ) -> Result<PurchaseQuote, PurchaseError> {
        let i = self
            .index_of(id)
            .ok_or_else(|| PurchaseError::UnknownGenerator { id: id.to_owned() })?;
        if count == 0 {
            return Err(PurchaseError::InvalidCount);
        }
        let generator = &self.pack.generators[i];
        let state = &self.states[i];
        if !state.is_unlocked || !state.is_visible {
            return Err(PurchaseError::Locked { id: id.to_owned() });
        }

        let mut quoted = count;
        if let Some(max_level) = generator.max_level {
            let headroom = max_level.saturating_sub(state.owned);
            if headroom == 0 {
                return Err(PurchaseError::MaxedOut { id: id.to_owned() });
            }
            quoted = quoted.min(headroom);
        }
        if let Some(max_bulk) = generator.max_bulk {
            quoted = quoted.min(max_bulk.max(1));
        }

        // Sum costs over the sequential purchase indices.
        let mut totals: Vec<CostQuote> = Vec::new();
        for offset in 0..quoted {
            let step_costs = self
                .compute_generator_costs(id, state.owned + offset, effects)
                .ok_or_else(|| PurchaseError::CostEvaluation {
                    id: id.to_owned(),
                    details: "cost curve produced a non-finite or negative step".to_owned(),
                })?;
            for cost in step_costs {
                match totals.iter_mut().find(|t| t.resource_id == cost.resource_id) {
                    Some(total) => total.amount += cost.amount,
                    None => totals.push(cost),
                }
            }
        }

        let affordable = totals.iter().all(|cost| {
            store
                .index_of(&cost.resource_id)
                .is_some_and(|i| store.amount(i) + 1e-9 >= cost.amount)
        });

        Ok(PurchaseQuote {
            generator_id: id.to_owned(),
            requested: count,
            quoted,
            costs: totals,
            affordable,
        })
    }

    /// Execute a quoted purchase, spending through the store. Returns the
    /// number of levels bought.
    pub fn apply_purchase(
        &mut self,
        id: &str,
        count: u32,
        effects: &EvaluatedUpgradeEffects,
        store: &mut ResourceStore,
        step: u64,
    ) -> Result<u32, PurchaseError> {
        let quote = self.get_purchase_quote(id, count, effects, store)?;
        if !quote.affordable {
            return Err(PurchaseError::Unaffordable { id: id.to_owned() });
        }

        for cost in &quote.costs {
            let i = store
                .index_of(&cost.resource_id)
                .expect("quote only contains known resources");
            if !store.spend_amount(i, cost.amount) {
                // The quote was affordable moments ago; a failed spend here
                // means a concurrent mutation within the tick.
                return Err(PurchaseError::Unaffordable { id: id.to_owned() });
            }
        }

        let i = self.index_of(id).expect("quote validated the id");
        self.states[i].owned += quote.quoted;
        self.states[i].next_purchase_ready_at_step = step + 1;
        tracing::debug!(generator = id, count = quote.quoted, "generator purchased");
        Ok(quote.quoted)
    }
}

fn cost_of_entry(entry: &CostEntry, purchase_index: u32) -> Option<f64> {
    let value = entry
        .cost_curve
        .evaluate(&FormulaContext::at_level(purchase_index as f64))
        .ok()?;
    Some(entry.cost_multiplier * value)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use perpetua_content::validator::Validator;
    use perpetua_core::store::ResourceSpec;

    fn normalized() -> Arc<NormalizedContentPack> {
        let raw = serde_json::json!({
            "id": "demo",
            "name": {"default": "Demo"},
            "version": "1.0.0",
            "engine": ">=1.0.0",
            "resources": [
                {"id": "e", "name": {"default": "Energy"}, "startAmount": 1000.0}
            ],
            "generators": [
                {"id": "g", "name": {"default": "Gen"},
                 "produces": [{"resourceId": "e", "rate": {"kind": "linear", "base": 0, "slope": 1}}],
                 "purchase": {"currencyId": "e", "costMultiplier": 10,
                              "costCurve": {"kind": "exponential", "base": 1, "growth": 2}}},
                {"id": "capped", "name": {"default": "Capped"}, "maxLevel": 3,
                 "produces": [{"resourceId": "e", "rate": {"kind": "constant", "value": 1}}],
                 "purchase": {"currencyId": "e", "costCurve": {"kind": "constant", "value": 1}}}
            ]
        });
        Validator::with_defaults()
            .parse(&raw)
            .pack()
            .expect("pack validates")
            .clone()
    }

    fn setup() -> (GeneratorManager, ResourceStore) {
        let pack = normalized();
        let manager = GeneratorManager::new(pack, ConditionEvaluator::default());
        let store =
            ResourceStore::with_defaults(&[ResourceSpec::new("e", 1000.0)]).unwrap();
        (manager, store)
    }

    // -- 1. Cost quote scenario ----------------------------------------------

    #[test]
    fn bulk_quote_sums_sequential_indices() {
        let (manager, store) = setup();
        let effects = EvaluatedUpgradeEffects::default();

        // costMultiplier 10 with 2^index curve: 10*(1 + 2 + 4) = 70.
        let quote = manager.get_purchase_quote("g", 3, &effects, &store).unwrap();
        assert_eq!(quote.quoted, 3);
        assert_eq!(quote.costs.len(), 1);
        assert_eq!(quote.costs[0].resource_id, "e");
        assert_eq!(quote.costs[0].amount, 70.0);
        assert!(quote.affordable);
    }

    #[test]
    fn quote_respects_cost_multiplier_effect() {
        let (manager, store) = setup();
        let mut effects = EvaluatedUpgradeEffects::default();
        effects
            .generator_cost_multipliers
            .insert("g".to_owned(), 0.5);

        let quote = manager.get_purchase_quote("g", 3, &effects, &store).unwrap();
        assert_eq!(quote.costs[0].amount, 35.0);
    }

    // -- 2. Clamping ------------------------------------------------------------

    #[test]
    fn quote_clamps_to_max_level() {
        let (manager, store) = setup();
        let effects = EvaluatedUpgradeEffects::default();
        let quote = manager
            .get_purchase_quote("capped", 10, &effects, &store)
            .unwrap();
        assert_eq!(quote.requested, 10);
        assert_eq!(quote.quoted, 3);
    }

    #[test]
    fn maxed_generator_rejects_quotes() {
        let (mut manager, mut store) = setup();
        let effects = EvaluatedUpgradeEffects::default();
        manager
            .apply_purchase("capped", 3, &effects, &mut store, 1)
            .unwrap();
        assert_eq!(
            manager.get_purchase_quote("capped", 1, &effects, &store),
            Err(PurchaseError::MaxedOut {
                id: "capped".to_owned()
            })
        );
    }

    // -- 3. Purchases spend and level up ------------------------------------------

    #[test]
    fn purchase_spends_and_levels() {
        let (mut manager, mut store) = setup();
        let effects = EvaluatedUpgradeEffects::default();

        let bought = manager
            .apply_purchase("g", 3, &effects, &mut store, 5)
            .unwrap();
        assert_eq!(bought, 3);
        assert_eq!(manager.level_of("g"), 3);
        assert_eq!(store.amount(0), 930.0);
        assert_eq!(manager.state("g").unwrap().next_purchase_ready_at_step, 6);
    }

    #[test]
    fn unaffordable_purchase_is_rejected_without_spending() {
        let (mut manager, mut store) = setup();
        let effects = EvaluatedUpgradeEffects::default();
        store.spend_amount(0, 995.0);

        let result = manager.apply_purchase("g", 3, &effects, &mut store, 1);
        assert_eq!(
            result,
            Err(PurchaseError::Unaffordable { id: "g".to_owned() })
        );
        assert_eq!(manager.level_of("g"), 0);
        assert_eq!(store.amount(0), 5.0);
    }

    #[test]
    fn zero_count_is_invalid() {
        let (manager, store) = setup();
        let effects = EvaluatedUpgradeEffects::default();
        assert_eq!(
            manager.get_purchase_quote("g", 0, &effects, &store),
            Err(PurchaseError::InvalidCount)
        );
    }

    // -- 4. Rate views ---------------------------------------------------------------

    #[test]
    fn rate_views_scale_with_level_and_effects() {
        let (mut manager, mut store) = setup();
        let mut effects = EvaluatedUpgradeEffects::default();
        manager
            .apply_purchase("g", 4, &effects, &mut store, 1)
            .unwrap();

        let mut snapshot = EvalSnapshot::default();
        snapshot.resource_amounts.insert("e".to_owned(), 1000.0);
        let mut faults = Vec::new();

        manager.update_for_step(1, &snapshot, &effects, &mut faults);
        // linear(base 0, slope 1) at level 4 -> 4/s.
        assert_eq!(manager.produces_view("g")[0].per_second, 4.0);

        effects
            .generator_rate_multipliers
            .insert("g".to_owned(), 2.0);
        effects.resource_rate_bonuses.insert("e".to_owned(), 1.0);
        manager.update_for_step(2, &snapshot, &effects, &mut faults);
        // (4 + 1) * 2 = 10/s; bonuses apply before the multiplier product.
        assert_eq!(manager.produces_view("g")[0].per_second, 10.0);
        assert!(faults.is_empty());
    }

    #[test]
    fn level_zero_generator_produces_nothing() {
        let (mut manager, _store) = setup();
        let effects = EvaluatedUpgradeEffects::default();
        let snapshot = EvalSnapshot::default();
        let mut faults = Vec::new();

        manager.update_for_step(1, &snapshot, &effects, &mut faults);
        assert_eq!(manager.produces_view("g")[0].per_second, 0.0);
    }

    #[test]
    fn apply_flows_accumulates_income() {
        let (mut manager, mut store) = setup();
        let effects = EvaluatedUpgradeEffects::default();
        manager
            .apply_purchase("g", 2, &effects, &mut store, 1)
            .unwrap();

        let snapshot = EvalSnapshot::default();
        let mut faults = Vec::new();
        manager.update_for_step(1, &snapshot, &effects, &mut faults);
        manager.apply_flows(&mut store);
        assert_eq!(store.income_per_second(0), 2.0);
    }
}
