//! Columnar resource state engine with double-buffered publish snapshots.
//!
//! The [`ResourceStore`] keeps every per-resource scalar in a parallel column
//! (struct-of-arrays): amounts, capacities, rate accumulators, tick deltas,
//! dirty tolerances, and a packed flags byte. Mutations go through capability
//! methods that keep an O(1) dirty index current, so publishing a snapshot is
//! O(changed) rather than O(resources).
//!
//! # Lifecycle
//!
//! Each tick follows a strict order, enforced by a guard state machine:
//!
//! 1. Mutators run (`add_amount`, `apply_income`, ...).
//! 2. [`ResourceStore::finalize_tick`] integrates rates into amounts.
//! 3. [`ResourceStore::publish`] flips the double buffer and exposes a
//!    change-minimal snapshot.
//! 4. [`ResourceStore::reset_per_tick_accumulators`] re-zeros the per-tick
//!    accumulators, exactly once.
//!
//! Calling these out of order fails with [`StoreError::ResetOutOfOrder`].
//! [`ResourceStore::force_clear_dirty_state`] is the disaster-recovery hatch
//! that returns the machine to `Idle` from any state.
//!
//! # Dirty tracking
//!
//! Equality between a live value and its published counterpart is
//! epsilon-tolerant: `|a - b| <= max(1e-9, min(0.5, 1e-9 * max(|a|, |b|)))`,
//! with a per-resource tolerance override enforced as a floor when present.
//! When the relative term saturates against the `0.5` ceiling the store emits
//! a `ResourceDirtyToleranceSaturated` telemetry warning (once per resource).
//!
//! The dirty set is a scratch array of indices plus an inverse-position array
//! (sentinels `UNSET = -1`, `VISITED = -2`), giving O(1) insert and remove.

use std::collections::HashMap;
use std::sync::Arc;

use crate::telemetry::{names, NullTelemetry, Telemetry};

/// Flags bit 0: the resource is visible in UIs.
pub const FLAG_VISIBLE: u8 = 1 << 0;
/// Flags bit 1: the resource is unlocked.
pub const FLAG_UNLOCKED: u8 = 1 << 1;
/// Flags bit 2: the resource changed this tick (cleared by publish).
pub const FLAG_DIRTY: u8 = 1 << 2;

/// Absolute comparison epsilon and the floor of the tolerance range.
pub const ABS_EPSILON: f64 = 1e-9;
/// Ceiling of the relative tolerance term and of per-resource overrides.
pub const TOLERANCE_CEILING: f64 = 5e-1;

/// Dirty-position sentinel: the index is not in the scratch set.
const UNSET: i32 = -1;
/// Dirty-position sentinel: the index was already processed this publish.
const VISITED: i32 = -2;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors produced by the resource store.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    /// A lifecycle operation ran out of order.
    #[error("resource lifecycle violation: {operation} called in state {state:?}")]
    ResetOutOfOrder {
        operation: &'static str,
        state: PublishGuardState,
    },

    /// Two resource definitions share an id.
    #[error("duplicate resource id '{id}' in definitions")]
    DuplicateId { id: String },

    /// A serialized state failed structural validation.
    #[error("invalid serialized resource state: {details}")]
    InvalidSaveData { details: String },

    /// The stored definition digest's hash does not match a recomputation.
    #[error("definition digest hash mismatch: stored {stored}, computed {computed}")]
    DigestHashMismatch { stored: String, computed: String },

    /// The save references resource ids absent from the live definitions.
    #[error("serialized state references removed resources: {removed_ids:?}")]
    HydrationMismatch { removed_ids: Vec<String> },
}

// ---------------------------------------------------------------------------
// Guard state machine
// ---------------------------------------------------------------------------

/// Publish-order guard states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishGuardState {
    /// Between ticks; mutators may run.
    Idle,
    /// `finalize_tick` ran; awaiting a publish snapshot.
    Finalized,
    /// A snapshot was published; awaiting `reset_per_tick_accumulators`.
    Published,
}

/// Snapshot guard toggle. `Auto` enables the defensive publish-time
/// invariant sweep outside release builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SnapshotGuardMode {
    #[default]
    Auto,
    ForceOn,
    ForceOff,
}

impl SnapshotGuardMode {
    fn enabled(self) -> bool {
        match self {
            Self::Auto => cfg!(debug_assertions),
            Self::ForceOn => true,
            Self::ForceOff => false,
        }
    }
}

// ---------------------------------------------------------------------------
// ResourceSpec
// ---------------------------------------------------------------------------

/// Sanitized per-resource definition consumed by [`ResourceStore::new`].
///
/// `capacity: None` means unbounded (stored as `+∞`). `dirty_tolerance`
/// (when present) is clamped into `[1e-9, 0.5]` and acts as a floor on the
/// comparison epsilon for this resource.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceSpec {
    pub id: String,
    pub start_amount: f64,
    pub capacity: Option<f64>,
    pub unlocked: bool,
    pub visible: bool,
    pub dirty_tolerance: Option<f64>,
}

impl ResourceSpec {
    /// A minimal spec: unbounded capacity, unlocked, visible.
    pub fn new(id: impl Into<String>, start_amount: f64) -> Self {
        Self {
            id: id.into(),
            start_amount,
            capacity: None,
            unlocked: true,
            visible: true,
            dirty_tolerance: None,
        }
    }

    pub fn with_capacity(mut self, capacity: f64) -> Self {
        self.capacity = Some(capacity);
        self
    }

    pub fn with_dirty_tolerance(mut self, tolerance: f64) -> Self {
        self.dirty_tolerance = Some(tolerance);
        self
    }

    pub fn locked(mut self) -> Self {
        self.unlocked = false;
        self.visible = false;
        self
    }
}

// ---------------------------------------------------------------------------
// Publish columns
// ---------------------------------------------------------------------------

/// One of the two publish buffers.
#[derive(Debug, Clone)]
struct PublishColumns {
    amounts: Vec<f64>,
    capacities: Vec<f64>,
    income_per_second: Vec<f64>,
    expense_per_second: Vec<f64>,
    net_per_second: Vec<f64>,
    tick_delta: Vec<f64>,
    dirty_tolerance: Vec<f64>,
    flags: Vec<u8>,
    dirty_indices: Vec<u32>,
}

impl PublishColumns {
    fn from_live(store: &LiveColumns) -> Self {
        Self {
            amounts: store.amounts.clone(),
            capacities: store.capacities.clone(),
            income_per_second: store.income_per_second.clone(),
            expense_per_second: store.expense_per_second.clone(),
            net_per_second: store.net_per_second.clone(),
            tick_delta: store.tick_delta.clone(),
            dirty_tolerance: store.dirty_tolerance.clone(),
            flags: store.flags.clone(),
            dirty_indices: Vec::with_capacity(store.amounts.len()),
        }
    }

    fn copy_index_from_live(&mut self, store: &LiveColumns, i: usize) {
        self.amounts[i] = store.amounts[i];
        self.capacities[i] = store.capacities[i];
        self.income_per_second[i] = store.income_per_second[i];
        self.expense_per_second[i] = store.expense_per_second[i];
        self.net_per_second[i] = store.net_per_second[i];
        self.tick_delta[i] = store.tick_delta[i];
        self.dirty_tolerance[i] = store.dirty_tolerance[i];
        self.flags[i] = store.flags[i];
    }
}

/// The live (writer-owned) columns, split out so publish buffers can copy
/// from them without borrow gymnastics.
#[derive(Debug)]
struct LiveColumns {
    amounts: Vec<f64>,
    capacities: Vec<f64>,
    income_per_second: Vec<f64>,
    expense_per_second: Vec<f64>,
    net_per_second: Vec<f64>,
    tick_delta: Vec<f64>,
    dirty_tolerance: Vec<f64>,
    flags: Vec<u8>,
}

// ---------------------------------------------------------------------------
// Snapshots
// ---------------------------------------------------------------------------

/// A read-only view of the most recently published buffer.
///
/// Consumers must only treat the indices in `dirty_indices` as changed;
/// other columns may lag by one publish for untouched resources.
#[derive(Debug, Clone, Copy)]
pub struct PublishView<'a> {
    pub ids: &'a [String],
    pub amounts: &'a [f64],
    pub capacities: &'a [f64],
    pub income_per_second: &'a [f64],
    pub expense_per_second: &'a [f64],
    pub net_per_second: &'a [f64],
    pub tick_delta: &'a [f64],
    pub dirty_tolerance: &'a [f64],
    pub flags: &'a [u8],
    pub dirty_indices: &'a [u32],
}

impl PublishView<'_> {
    /// Number of changed resources in this publish.
    pub fn dirty_count(&self) -> usize {
        self.dirty_indices.len()
    }
}

/// A deep copy of the live columns, for recorders and debugging. Never
/// aliases the store's buffers.
#[derive(Debug, Clone)]
pub struct RecorderSnapshot {
    pub ids: Vec<String>,
    pub amounts: Vec<f64>,
    pub capacities: Vec<f64>,
    pub income_per_second: Vec<f64>,
    pub expense_per_second: Vec<f64>,
    pub net_per_second: Vec<f64>,
    pub tick_delta: Vec<f64>,
    pub dirty_tolerance: Vec<f64>,
    pub flags: Vec<u8>,
}

// ---------------------------------------------------------------------------
// ResourceStore
// ---------------------------------------------------------------------------

/// The columnar resource state engine.
pub struct ResourceStore {
    ids: Vec<String>,
    index_by_id: HashMap<String, usize>,
    live: LiveColumns,
    /// Whether the resource carries an operator tolerance override.
    tolerance_overridden: Vec<bool>,
    /// Saturation warning already emitted for this resource.
    saturation_reported: Vec<bool>,
    publish: [PublishColumns; 2],
    active_publish: usize,
    dirty_scratch: Vec<u32>,
    dirty_len: usize,
    dirty_positions: Vec<i32>,
    guard: PublishGuardState,
    guard_checks: bool,
    telemetry: Arc<dyn Telemetry>,
}

impl ResourceStore {
    /// Build a store from sanitized definitions.
    ///
    /// Start amounts are clamped to `[0, capacity]`, missing capacities
    /// become `+∞`, and tolerances are clamped into `[1e-9, 0.5]`.
    ///
    /// # Errors
    ///
    /// [`StoreError::DuplicateId`] when two definitions share an id.
    pub fn new(
        specs: &[ResourceSpec],
        telemetry: Arc<dyn Telemetry>,
        guard_mode: SnapshotGuardMode,
    ) -> Result<Self, StoreError> {
        let n = specs.len();
        let mut ids = Vec::with_capacity(n);
        let mut index_by_id = HashMap::with_capacity(n);
        let mut live = LiveColumns {
            amounts: Vec::with_capacity(n),
            capacities: Vec::with_capacity(n),
            income_per_second: vec![0.0; n],
            expense_per_second: vec![0.0; n],
            net_per_second: vec![0.0; n],
            tick_delta: vec![0.0; n],
            dirty_tolerance: Vec::with_capacity(n),
            flags: Vec::with_capacity(n),
        };
        let mut tolerance_overridden = Vec::with_capacity(n);

        for (i, spec) in specs.iter().enumerate() {
            assert!(!spec.id.is_empty(), "resource id must be non-empty");
            if index_by_id.insert(spec.id.clone(), i).is_some() {
                return Err(StoreError::DuplicateId {
                    id: spec.id.clone(),
                });
            }
            ids.push(spec.id.clone());

            let capacity = spec.capacity.unwrap_or(f64::INFINITY);
            assert!(
                capacity >= 0.0 && !capacity.is_nan(),
                "capacity for '{}' must be non-negative",
                spec.id
            );
            let amount = spec.start_amount.clamp(0.0, capacity);
            live.amounts.push(amount);
            live.capacities.push(capacity);
            live.dirty_tolerance.push(
                spec.dirty_tolerance
                    .unwrap_or(ABS_EPSILON)
                    .clamp(ABS_EPSILON, TOLERANCE_CEILING),
            );
            tolerance_overridden.push(spec.dirty_tolerance.is_some());

            let mut flags = 0u8;
            if spec.visible {
                flags |= FLAG_VISIBLE;
            }
            if spec.unlocked {
                flags |= FLAG_UNLOCKED;
            }
            live.flags.push(flags);
        }

        let publish_a = PublishColumns::from_live(&live);
        let publish_b = publish_a.clone();

        Ok(Self {
            ids,
            index_by_id,
            live,
            tolerance_overridden,
            saturation_reported: vec![false; n],
            publish: [publish_a, publish_b],
            active_publish: 0,
            dirty_scratch: vec![0; n],
            dirty_len: 0,
            dirty_positions: vec![UNSET; n],
            guard: PublishGuardState::Idle,
            guard_checks: guard_mode.enabled(),
            telemetry,
        })
    }

    /// Build a store with a [`NullTelemetry`] and automatic guard mode.
    pub fn with_defaults(specs: &[ResourceSpec]) -> Result<Self, StoreError> {
        Self::new(specs, Arc::new(NullTelemetry), SnapshotGuardMode::Auto)
    }

    // -- accessors ----------------------------------------------------------

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Ordered resource ids (frozen at creation).
    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    /// Index of a resource id, if known.
    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.index_by_id.get(id).copied()
    }

    pub fn amount(&self, i: usize) -> f64 {
        self.live.amounts[i]
    }

    pub fn capacity(&self, i: usize) -> f64 {
        self.live.capacities[i]
    }

    pub fn income_per_second(&self, i: usize) -> f64 {
        self.live.income_per_second[i]
    }

    pub fn expense_per_second(&self, i: usize) -> f64 {
        self.live.expense_per_second[i]
    }

    pub fn net_per_second(&self, i: usize) -> f64 {
        self.live.net_per_second[i]
    }

    pub fn tick_delta(&self, i: usize) -> f64 {
        self.live.tick_delta[i]
    }

    pub fn dirty_tolerance(&self, i: usize) -> f64 {
        self.live.dirty_tolerance[i]
    }

    pub fn flags_of(&self, i: usize) -> u8 {
        self.live.flags[i]
    }

    pub fn is_unlocked(&self, i: usize) -> bool {
        self.live.flags[i] & FLAG_UNLOCKED != 0
    }

    pub fn is_visible(&self, i: usize) -> bool {
        self.live.flags[i] & FLAG_VISIBLE != 0
    }

    pub fn guard_state(&self) -> PublishGuardState {
        self.guard
    }

    /// Number of resources currently in the live dirty scratch set.
    pub fn live_dirty_count(&self) -> usize {
        self.dirty_len
    }

    // -- mutators -----------------------------------------------------------

    /// Write a new amount, folding the realized delta into `tick_delta`.
    fn write_amount(&mut self, i: usize, next: f64) {
        let old = self.live.amounts[i];
        self.live.tick_delta[i] += next - old;
        self.live.amounts[i] = next;
        self.reconcile_dirty_state(i);
    }

    /// Set a resource's capacity, re-clamping its amount.
    pub fn set_capacity(&mut self, i: usize, capacity: f64) {
        assert!(
            capacity >= 0.0 && !capacity.is_nan(),
            "capacity must be non-negative"
        );
        self.live.capacities[i] = capacity;
        let next = self.live.amounts[i].clamp(0.0, capacity);
        self.write_amount(i, next);
    }

    /// Add (or with a negative delta, remove) an amount, clamped to
    /// `[0, capacity]`.
    pub fn add_amount(&mut self, i: usize, delta: f64) {
        assert!(delta.is_finite(), "amount delta must be finite");
        let next = (self.live.amounts[i] + delta).clamp(0.0, self.live.capacities[i]);
        self.write_amount(i, next);
    }

    /// Overwrite a resource amount (hydration, prestige resets), clamped to
    /// `[0, capacity]`.
    pub fn set_amount(&mut self, i: usize, amount: f64) {
        assert!(amount.is_finite(), "amount must be finite");
        let next = amount.clamp(0.0, self.live.capacities[i]);
        self.write_amount(i, next);
    }

    /// Spend `cost` from a resource if affordable. Returns whether the spend
    /// happened.
    pub fn spend_amount(&mut self, i: usize, cost: f64) -> bool {
        assert!(cost.is_finite() && cost >= 0.0, "cost must be finite and >= 0");
        if self.live.amounts[i] + ABS_EPSILON < cost {
            return false;
        }
        let next = (self.live.amounts[i] - cost).max(0.0);
        self.write_amount(i, next);
        true
    }

    /// Accumulate production for this tick, in units per second.
    pub fn apply_income(&mut self, i: usize, per_second: f64) {
        assert!(
            per_second.is_finite() && per_second >= 0.0,
            "income must be finite and >= 0"
        );
        self.live.income_per_second[i] += per_second;
        self.reconcile_dirty_state(i);
    }

    /// Accumulate consumption for this tick, in units per second.
    pub fn apply_expense(&mut self, i: usize, per_second: f64) {
        assert!(
            per_second.is_finite() && per_second >= 0.0,
            "expense must be finite and >= 0"
        );
        self.live.expense_per_second[i] += per_second;
        self.reconcile_dirty_state(i);
    }

    /// Set the visible bit. Visibility never reverts within a run.
    pub fn grant_visibility(&mut self, i: usize) {
        self.live.flags[i] |= FLAG_VISIBLE;
        self.reconcile_dirty_state(i);
    }

    /// Set the unlocked bit. Unlocks never revert within a run.
    pub fn unlock(&mut self, i: usize) {
        self.live.flags[i] |= FLAG_UNLOCKED;
        self.reconcile_dirty_state(i);
    }

    /// Install a per-resource tolerance override (clamped to `[1e-9, 0.5]`),
    /// enforced as a floor on the comparison epsilon.
    pub fn set_dirty_tolerance_override(&mut self, i: usize, tolerance: f64) {
        assert!(tolerance.is_finite(), "tolerance must be finite");
        self.live.dirty_tolerance[i] = tolerance.clamp(ABS_EPSILON, TOLERANCE_CEILING);
        self.tolerance_overridden[i] = true;
        self.reconcile_dirty_state(i);
    }

    // -- lifecycle ----------------------------------------------------------

    /// Integrate this tick's rates into amounts.
    ///
    /// For each resource: `proposed = (income - expense) * Δs`, the amount is
    /// clamped into `[0, capacity]`, the clamped delta accumulates into
    /// `tick_delta`, and `net_per_second` is recomputed.
    pub fn finalize_tick(&mut self, delta_ms: f64) -> Result<(), StoreError> {
        assert!(
            delta_ms.is_finite() && delta_ms >= 0.0,
            "delta_ms must be finite and >= 0"
        );
        if self.guard != PublishGuardState::Idle {
            return Err(StoreError::ResetOutOfOrder {
                operation: "finalize_tick",
                state: self.guard,
            });
        }

        let delta_s = delta_ms / 1000.0;
        for i in 0..self.ids.len() {
            let income = self.live.income_per_second[i];
            let expense = self.live.expense_per_second[i];
            let net = income - expense;
            let changed_rates = self.live.net_per_second[i] != net;
            self.live.net_per_second[i] = net;

            let proposed = net * delta_s;
            if proposed != 0.0 {
                let amount = self.live.amounts[i];
                let next = (amount + proposed).clamp(0.0, self.live.capacities[i]);
                self.live.tick_delta[i] += next - amount;
                self.live.amounts[i] = next;
                self.reconcile_dirty_state(i);
            } else if changed_rates {
                self.reconcile_dirty_state(i);
            }
        }

        self.guard = PublishGuardState::Finalized;
        Ok(())
    }

    /// Publish a change-minimal snapshot by flipping the double buffer.
    ///
    /// Every index in the union of the prior publish's dirty set and the live
    /// scratch set is re-synced into the new buffer; only indices whose live
    /// values still differ from the prior publish are reported in
    /// `dirty_indices` (transient changes that reverted are dropped).
    pub fn publish(&mut self) -> Result<PublishView<'_>, StoreError> {
        if self.guard != PublishGuardState::Finalized {
            return Err(StoreError::ResetOutOfOrder {
                operation: "publish",
                state: self.guard,
            });
        }

        let prior = self.active_publish;
        let next = 1 - prior;

        let mut candidates: Vec<u32> =
            Vec::with_capacity(self.publish[prior].dirty_indices.len() + self.dirty_len);
        candidates.extend_from_slice(&self.publish[prior].dirty_indices);
        candidates.extend_from_slice(&self.dirty_scratch[..self.dirty_len]);

        // The next buffer was published two ticks ago; start its dirty list
        // fresh.
        let mut pushed: Vec<u32> = Vec::with_capacity(candidates.len());

        for &raw in &candidates {
            let i = raw as usize;
            if self.dirty_positions[i] == VISITED {
                continue;
            }
            let differs = !self.live_matches_publish(i, prior);

            // Clear the transient dirty bit before copying so snapshots never
            // carry it.
            self.live.flags[i] &= !FLAG_DIRTY;

            // Re-sync the flipped buffer whether or not the index is
            // reported; it lags by two publishes otherwise.
            let (live, publish) = (&self.live, &mut self.publish);
            publish[next].copy_index_from_live(live, i);

            if differs {
                pushed.push(raw);
                // The superseded buffer's tick delta is spent.
                self.publish[prior].tick_delta[i] = 0.0;
            }
            self.dirty_positions[i] = VISITED;
        }

        for &raw in &candidates {
            self.dirty_positions[raw as usize] = UNSET;
        }
        self.dirty_len = 0;
        self.publish[next].dirty_indices = pushed;
        self.active_publish = next;
        self.guard = PublishGuardState::Published;

        if self.guard_checks {
            self.verify_publish_invariants();
        }

        Ok(self.publish_view())
    }

    /// The most recently published snapshot.
    pub fn publish_view(&self) -> PublishView<'_> {
        let buffer = &self.publish[self.active_publish];
        PublishView {
            ids: &self.ids,
            amounts: &buffer.amounts,
            capacities: &buffer.capacities,
            income_per_second: &buffer.income_per_second,
            expense_per_second: &buffer.expense_per_second,
            net_per_second: &buffer.net_per_second,
            tick_delta: &buffer.tick_delta,
            dirty_tolerance: &buffer.dirty_tolerance,
            flags: &buffer.flags,
            dirty_indices: &buffer.dirty_indices,
        }
    }

    /// Deep copy of the live columns (recorder-mode snapshot).
    pub fn recorder_snapshot(&self) -> RecorderSnapshot {
        RecorderSnapshot {
            ids: self.ids.clone(),
            amounts: self.live.amounts.clone(),
            capacities: self.live.capacities.clone(),
            income_per_second: self.live.income_per_second.clone(),
            expense_per_second: self.live.expense_per_second.clone(),
            net_per_second: self.live.net_per_second.clone(),
            tick_delta: self.live.tick_delta.clone(),
            dirty_tolerance: self.live.dirty_tolerance.clone(),
            flags: self.live.flags.clone(),
        }
    }

    /// Re-zero the per-tick accumulators. Must follow a successful publish.
    pub fn reset_per_tick_accumulators(&mut self) -> Result<(), StoreError> {
        if self.guard != PublishGuardState::Published {
            return Err(StoreError::ResetOutOfOrder {
                operation: "reset_per_tick_accumulators",
                state: self.guard,
            });
        }

        for i in 0..self.ids.len() {
            self.live.income_per_second[i] = 0.0;
            self.live.expense_per_second[i] = 0.0;
            self.live.tick_delta[i] = 0.0;
        }

        self.guard = PublishGuardState::Idle;
        Ok(())
    }

    /// Disaster recovery: clear all dirty state and return to `Idle`.
    ///
    /// Emits `ResourceForceClearDirtyState` telemetry with the prior guard
    /// state.
    pub fn force_clear_dirty_state(&mut self) {
        let prior = self.guard;
        self.clear_dirty_scratch();
        for flags in self.publish.iter_mut().flat_map(|p| p.flags.iter_mut()) {
            *flags &= !FLAG_DIRTY;
        }
        for p in self.publish.iter_mut() {
            p.dirty_indices.clear();
        }
        for i in 0..self.ids.len() {
            self.live.income_per_second[i] = 0.0;
            self.live.expense_per_second[i] = 0.0;
            self.live.tick_delta[i] = 0.0;
        }
        self.guard = PublishGuardState::Idle;
        self.telemetry.record_warning(
            names::RESOURCE_FORCE_CLEAR_DIRTY_STATE,
            serde_json::json!({ "priorState": format!("{prior:?}") }),
        );
    }

    /// Clear the live dirty scratch set (positions and flags bits).
    pub fn clear_dirty_scratch(&mut self) {
        for k in 0..self.dirty_len {
            let i = self.dirty_scratch[k] as usize;
            self.dirty_positions[i] = UNSET;
            self.live.flags[i] &= !FLAG_DIRTY;
        }
        self.dirty_len = 0;
    }

    // -- internal: dirty tracking -------------------------------------------

    /// Compare a live value against a published one using the store's
    /// epsilon policy for this resource.
    fn values_equal(&mut self, i: usize, a: f64, b: f64) -> bool {
        let magnitude = a.abs().max(b.abs());
        let relative = ABS_EPSILON * magnitude;
        if relative > TOLERANCE_CEILING && !self.saturation_reported[i] {
            self.saturation_reported[i] = true;
            self.telemetry.record_warning(
                names::RESOURCE_DIRTY_TOLERANCE_SATURATED,
                serde_json::json!({
                    "resourceId": self.ids[i],
                    "magnitude": magnitude,
                }),
            );
        }
        let mut epsilon = ABS_EPSILON.max(relative.min(TOLERANCE_CEILING));
        if self.tolerance_overridden[i] {
            // The operator's tolerance is a floor, not a cap.
            epsilon = epsilon.max(self.live.dirty_tolerance[i]);
        }
        (a - b).abs() <= epsilon
    }

    /// Field-wise equality between live state and a publish buffer at `i`.
    fn live_matches_publish(&mut self, i: usize, publish_idx: usize) -> bool {
        // Flags compare with the transient dirty bit masked out.
        let live_flags = self.live.flags[i] & !FLAG_DIRTY;
        let pub_flags = self.publish[publish_idx].flags[i] & !FLAG_DIRTY;
        if live_flags != pub_flags {
            return false;
        }
        if self.live.capacities[i] != self.publish[publish_idx].capacities[i] {
            return false;
        }
        if self.live.dirty_tolerance[i] != self.publish[publish_idx].dirty_tolerance[i] {
            return false;
        }
        // tick_delta is deliberately not compared: it is re-zeroed at every
        // reset, and a settled resource must not be re-reported just because
        // its delta returned to zero. The delta column is still copied on
        // every publish of the index.
        let pairs = [
            (self.live.amounts[i], self.publish[publish_idx].amounts[i]),
            (
                self.live.income_per_second[i],
                self.publish[publish_idx].income_per_second[i],
            ),
            (
                self.live.expense_per_second[i],
                self.publish[publish_idx].expense_per_second[i],
            ),
            (
                self.live.net_per_second[i],
                self.publish[publish_idx].net_per_second[i],
            ),
        ];
        pairs.into_iter().all(|(a, b)| self.values_equal(i, a, b))
    }

    /// Called after every mutation: update the dirty scratch membership for
    /// index `i` against the active publish buffer.
    fn reconcile_dirty_state(&mut self, i: usize) {
        if self.live_matches_publish(i, self.active_publish) {
            self.unmark_dirty(i);
        } else {
            self.mark_dirty(i);
        }
    }

    fn mark_dirty(&mut self, i: usize) {
        if self.dirty_positions[i] >= 0 {
            return;
        }
        self.dirty_positions[i] = self.dirty_len as i32;
        self.dirty_scratch[self.dirty_len] = i as u32;
        self.dirty_len += 1;
        self.live.flags[i] |= FLAG_DIRTY;
    }

    fn unmark_dirty(&mut self, i: usize) {
        let pos = self.dirty_positions[i];
        if pos < 0 {
            return;
        }
        let pos = pos as usize;
        // Swap-remove from the scratch array, fixing the moved entry's
        // inverse position.
        let last = self.dirty_len - 1;
        if pos != last {
            let moved = self.dirty_scratch[last];
            self.dirty_scratch[pos] = moved;
            self.dirty_positions[moved as usize] = pos as i32;
        }
        self.dirty_len = last;
        self.dirty_positions[i] = UNSET;
        self.live.flags[i] &= !FLAG_DIRTY;
    }

    /// Defensive invariant sweep run at publish time when snapshot guards
    /// are enabled.
    fn verify_publish_invariants(&self) {
        let n = self.ids.len();
        let buffer = &self.publish[self.active_publish];
        let mut seen = vec![false; n];
        for &raw in &buffer.dirty_indices {
            let i = raw as usize;
            assert!(i < n, "published dirty index {i} out of bounds");
            assert!(!seen[i], "published dirty index {i} duplicated");
            seen[i] = true;
            assert!(
                buffer.flags[i] & FLAG_DIRTY == 0,
                "published flags must not carry the dirty bit"
            );
        }
        assert_eq!(self.dirty_len, 0, "live scratch must be empty after publish");
    }

    // -- internal: hydration hooks (used by serialize.rs) --------------------

    pub(crate) fn telemetry(&self) -> &Arc<dyn Telemetry> {
        &self.telemetry
    }

    /// Overwrite live state from hydrated values and rebase both publish
    /// buffers on the result, clearing all dirty state.
    pub(crate) fn rebase_after_hydration(&mut self) {
        self.clear_dirty_scratch();
        let rebased = PublishColumns::from_live(&self.live);
        self.publish = [rebased.clone(), rebased];
        self.active_publish = 0;
        self.guard = PublishGuardState::Idle;
    }

    pub(crate) fn set_flags_raw(&mut self, i: usize, flags: u8) {
        self.live.flags[i] = flags & !FLAG_DIRTY;
    }

    pub(crate) fn set_capacity_raw(&mut self, i: usize, capacity: f64) {
        self.live.capacities[i] = capacity;
    }

    pub(crate) fn set_amount_raw(&mut self, i: usize, amount: f64) {
        self.live.amounts[i] = amount.clamp(0.0, self.live.capacities[i]);
    }
}

impl std::fmt::Debug for ResourceStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceStore")
            .field("resources", &self.ids.len())
            .field("guard", &self.guard)
            .field("live_dirty", &self.dirty_len)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
