//! Transform runtime: resource-to-resource conversions.
//!
//! The validator guarantees transform graphs are loss-bounded; this module
//! executes them. Behavior by mode:
//!
//! - `instant`: when the trigger passes and inputs are affordable, inputs
//!   are spent and outputs granted in the same tick.
//! - `continuous`: while the trigger holds, inputs/outputs flow as
//!   per-second rates through the store's accumulators.
//! - `batch`: inputs are spent up front; outputs apply after `duration`.
//! - `mission`: like batch, but completion resolves a weighted outcome
//!   through the injected seeded RNG. Cancelling a mission mid-flight
//!   forfeits the inputs and re-arms the trigger after the cooldown.
//!
//! All amounts are formulas evaluated at `level = completion count`. The RNG
//! is a seeded `Pcg64` supplied at construction; the scheduler never draws
//! ambient entropy.

use std::sync::Arc;

use rand::Rng;
use rand_pcg::Pcg64;

use perpetua_core::condition::ConditionEvaluator;
use perpetua_core::formula::{FormulaContext, FormulaVariables};
use perpetua_core::store::ResourceStore;
use perpetua_content::normalize::NormalizedContentPack;
use perpetua_content::pack::{MissionOutcome, TransformMode, TransformTrigger};

use crate::context::EvalSnapshot;
use crate::coordinator::TickFault;

/// A batch or mission in flight.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveRun {
    pub started_at_seconds: f64,
    pub completes_at_seconds: f64,
}

/// Mutable per-transform state.
#[derive(Debug, Clone, Default)]
pub struct TransformState {
    pub completions: u32,
    pub active: Option<ActiveRun>,
    pub cooldown_until_seconds: f64,
    last_interval_fire_seconds: Option<f64>,
    manual_requested: bool,
}

/// Owns transform runtime state and the outcome RNG.
pub struct TransformScheduler {
    pack: Arc<NormalizedContentPack>,
    states: Vec<TransformState>,
    evaluator: ConditionEvaluator,
    rng: Pcg64,
}

impl TransformScheduler {
    /// `seed` drives mission outcome selection; same seed, same outcomes.
    pub fn new(pack: Arc<NormalizedContentPack>, evaluator: ConditionEvaluator, seed: u64) -> Self {
        let states = pack.transforms.iter().map(|_| TransformState::default()).collect();
        Self {
            pack,
            states,
            evaluator,
            rng: Pcg64::new(seed as u128, 0xa02b_dbf7_bb3c_0a7a_c28f_a16a_63b7_8a21),
        }
    }

    fn index_of(&self, id: &str) -> Option<usize> {
        self.pack.lookup.transforms.get(id).copied()
    }

    pub fn state(&self, id: &str) -> Option<&TransformState> {
        self.index_of(id).map(|i| &self.states[i])
    }

    /// Queue a manual trigger; consumed by the next update.
    pub fn request_manual(&mut self, id: &str) -> bool {
        match self.index_of(id) {
            Some(i) => {
                self.states[i].manual_requested = true;
                true
            }
            None => false,
        }
    }

    /// Cancel an in-flight batch or mission. Inputs are forfeited and the
    /// cooldown still applies from the cancellation time.
    pub fn cancel(&mut self, id: &str, time_seconds: f64) -> bool {
        let Some(i) = self.index_of(id) else {
            return false;
        };
        if self.states[i].active.take().is_none() {
            return false;
        }
        let cooldown = self.pack.transforms[i].cooldown.unwrap_or(0.0);
        self.states[i].cooldown_until_seconds = time_seconds + cooldown;
        tracing::debug!(transform = id, "mission cancelled mid-flight");
        true
    }

    /// Advance all transforms to `time_seconds`.
    pub fn update_for_step(
        &mut self,
        time_seconds: f64,
        snapshot: &EvalSnapshot,
        store: &mut ResourceStore,
        faults: &mut Vec<TickFault>,
    ) {
        for i in 0..self.pack.transforms.len() {
            self.complete_if_due(i, time_seconds, store, faults);
            self.try_fire(i, time_seconds, snapshot, store, faults);
        }
    }

    fn complete_if_due(
        &mut self,
        i: usize,
        time_seconds: f64,
        store: &mut ResourceStore,
        faults: &mut Vec<TickFault>,
    ) {
        let Some(run) = &self.states[i].active else {
            return;
        };
        if time_seconds < run.completes_at_seconds {
            return;
        }
        self.states[i].active = None;

        let transform = &self.pack.transforms[i];
        let level = self.states[i].completions as f64;
        match transform.mode {
            TransformMode::Batch => {
                for flow in &transform.outputs {
                    match evaluate_amount(&flow.amount, level) {
                        Ok(amount) => grant(store, &flow.resource_id, amount),
                        Err(message) => faults.push(TickFault::new("transforms", message)),
                    }
                }
            }
            TransformMode::Mission => {
                if let Some(outcome) = pick_outcome(&mut self.rng, &transform.outcomes) {
                    tracing::debug!(
                        transform = transform.id,
                        outcome = outcome.id,
                        "mission resolved"
                    );
                    for flow in &outcome.outputs {
                        match evaluate_amount(&flow.amount, level) {
                            Ok(amount) => grant(store, &flow.resource_id, amount),
                            Err(message) => faults.push(TickFault::new("transforms", message)),
                        }
                    }
                }
            }
            _ => {}
        }

        self.states[i].completions += 1;
        let cooldown = transform.cooldown.unwrap_or(0.0);
        self.states[i].cooldown_until_seconds = time_seconds + cooldown;
    }

    fn trigger_passes(
        &mut self,
        i: usize,
        time_seconds: f64,
        snapshot: &EvalSnapshot,
        faults: &mut Vec<TickFault>,
    ) -> bool {
        let transform = &self.pack.transforms[i];
        match &transform.trigger {
            TransformTrigger::Manual => std::mem::take(&mut self.states[i].manual_requested),
            TransformTrigger::Auto { condition } => {
                match self.evaluator.evaluate(condition, snapshot) {
                    Ok(passes) => passes,
                    Err(error) => {
                        faults.push(TickFault::new("transforms", error.to_string()));
                        false
                    }
                }
            }
            TransformTrigger::Interval { seconds } => {
                match self.states[i].last_interval_fire_seconds {
                    Some(last) => time_seconds - last >= *seconds,
                    None => time_seconds >= *seconds,
                }
            }
        }
    }

    fn try_fire(
        &mut self,
        i: usize,
        time_seconds: f64,
        snapshot: &EvalSnapshot,
        store: &mut ResourceStore,
        faults: &mut Vec<TickFault>,
    ) {
        if self.states[i].active.is_some() {
            return;
        }
        if time_seconds < self.states[i].cooldown_until_seconds {
            return;
        }
        let mode = self.pack.transforms[i].mode;

        // Continuous transforms flow while the trigger holds; they have no
        // discrete firing.
        if mode == TransformMode::Continuous {
            if self.trigger_passes(i, time_seconds, snapshot, faults) {
                self.apply_continuous_flows(i, store, faults);
            }
            return;
        }

        if !self.trigger_passes(i, time_seconds, snapshot, faults) {
            return;
        }
        if !self.spend_inputs(i, store, faults) {
            return;
        }
        if let TransformTrigger::Interval { .. } = self.pack.transforms[i].trigger {
            self.states[i].last_interval_fire_seconds = Some(time_seconds);
        }

        let transform = &self.pack.transforms[i];
        match mode {
            TransformMode::Instant => {
                let level = self.states[i].completions as f64;
                for flow in &transform.outputs {
                    match evaluate_amount(&flow.amount, level) {
                        Ok(amount) => grant(store, &flow.resource_id, amount),
                        Err(message) => faults.push(TickFault::new("transforms", message)),
                    }
                }
                self.states[i].completions += 1;
                let cooldown = transform.cooldown.unwrap_or(0.0);
                self.states[i].cooldown_until_seconds = time_seconds + cooldown;
            }
            TransformMode::Batch | TransformMode::Mission => {
                let duration = transform
                    .duration
                    .expect("validator requires a duration for batch/mission");
                self.states[i].active = Some(ActiveRun {
                    started_at_seconds: time_seconds,
                    completes_at_seconds: time_seconds + duration,
                });
            }
            TransformMode::Continuous => unreachable!("handled above"),
        }
    }

    fn apply_continuous_flows(
        &mut self,
        i: usize,
        store: &mut ResourceStore,
        faults: &mut Vec<TickFault>,
    ) {
        let transform = &self.pack.transforms[i];
        let level = self.states[i].completions as f64;
        for flow in &transform.inputs {
            match evaluate_amount(&flow.amount, level) {
                Ok(amount) => {
                    if let Some(idx) = store.index_of(&flow.resource_id) {
                        store.apply_expense(idx, amount.max(0.0));
                    }
                }
                Err(message) => faults.push(TickFault::new("transforms", message)),
            }
        }
        for flow in &transform.outputs {
            match evaluate_amount(&flow.amount, level) {
                Ok(amount) => {
                    if let Some(idx) = store.index_of(&flow.resource_id) {
                        store.apply_income(idx, amount.max(0.0));
                    }
                }
                Err(message) => faults.push(TickFault::new("transforms", message)),
            }
        }
    }

    /// Check and spend all inputs; false when anything is unaffordable.
    fn spend_inputs(
        &mut self,
        i: usize,
        store: &mut ResourceStore,
        faults: &mut Vec<TickFault>,
    ) -> bool {
        let transform = &self.pack.transforms[i];
        let level = self.states[i].completions as f64;

        let mut planned: Vec<(usize, f64)> = Vec::with_capacity(transform.inputs.len());
        for flow in &transform.inputs {
            let amount = match evaluate_amount(&flow.amount, level) {
                Ok(amount) => amount,
                Err(message) => {
                    faults.push(TickFault::new("transforms", message));
                    return false;
                }
            };
            let Some(idx) = store.index_of(&flow.resource_id) else {
                return false;
            };
            if store.amount(idx) + 1e-9 < amount {
                return false;
            }
            planned.push((idx, amount));
        }
        for (idx, amount) in planned {
            store.spend_amount(idx, amount);
        }
        true
    }
}

fn evaluate_amount(
    formula: &perpetua_core::formula::NumericFormula,
    level: f64,
) -> Result<f64, String> {
    formula
        .evaluate(&FormulaContext::new(
            FormulaVariables::at_level(level),
            &perpetua_core::formula::NoEntities,
        ))
        .map_err(|e| e.to_string())
}

fn grant(store: &mut ResourceStore, resource_id: &str, amount: f64) {
    if amount > 0.0 {
        if let Some(idx) = store.index_of(resource_id) {
            store.add_amount(idx, amount);
        }
    }
}

/// Weighted outcome selection over the seeded RNG.
fn pick_outcome<'a>(rng: &mut Pcg64, outcomes: &'a [MissionOutcome]) -> Option<&'a MissionOutcome> {
    let total: f64 = outcomes.iter().map(|o| o.weight).sum();
    if total <= 0.0 {
        return outcomes.first();
    }
    let mut roll = rng.gen::<f64>() * total;
    for outcome in outcomes {
        roll -= outcome.weight;
        if roll <= 0.0 {
            return Some(outcome);
        }
    }
    outcomes.last()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
