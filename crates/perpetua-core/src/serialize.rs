//! Save wire shape and hydration reconciliation for the resource store.
//!
//! [`SerializedResourceState`] is the JSON-compatible shape stored inside
//! host snapshots. On the wire, infinite capacities are `null`; in memory
//! they are `+∞`. Hydration follows a validate-everything-first discipline:
//! no store state is touched until the serialized payload has passed
//! structural validation, digest verification, and id reconciliation.
//!
//! Reconciliation is additions-only: live resources absent from the save are
//! fine (they keep their initial values), but saved resources absent from the
//! live definitions are fatal and require a migration.

use serde::{Deserialize, Serialize};

use crate::digest::{compute_stable_digest, ResourceDefinitionDigest};
use crate::store::{ResourceStore, StoreError, FLAG_DIRTY};
use crate::telemetry::{names, Telemetry};

// ---------------------------------------------------------------------------
// SerializedResourceState
// ---------------------------------------------------------------------------

/// The serialized resource state, as stored by the persistence host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedResourceState {
    /// Ordered resource ids at save time.
    pub ids: Vec<String>,
    /// Amounts, parallel to `ids`.
    pub amounts: Vec<f64>,
    /// Capacities, parallel to `ids`; `null` encodes an infinite capacity.
    pub capacities: Vec<Option<f64>>,
    /// Unlocked flags, parallel to `ids` (derivable from `flags`; kept on
    /// the wire for host-side display without bit twiddling).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unlocked: Option<Vec<bool>>,
    /// Visible flags, parallel to `ids`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visible: Option<Vec<bool>>,
    /// Packed flag bytes, parallel to `ids`. The transient dirty bit is
    /// masked out at export; the byte is otherwise opaque to consumers.
    pub flags: Vec<u8>,
    /// Digest of the definitions this state was saved against.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub definition_digest: Option<ResourceDefinitionDigest>,
    /// Opaque automation runtime state; passed through untouched by
    /// reconciliation and migrations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub automation_state: Option<Vec<serde_json::Value>>,
}

// ---------------------------------------------------------------------------
// Reconciliation report
// ---------------------------------------------------------------------------

/// Pure id diff between a save and the live definitions.
#[derive(Debug, Clone, PartialEq)]
pub struct IdDiff {
    /// `remap[saved_index] = live_index`, `None` for removed ids.
    pub remap: Vec<Option<usize>>,
    /// Live ids absent from the save (initialize to defaults).
    pub added_ids: Vec<String>,
    /// Saved ids absent from the live definitions (fatal without migration).
    pub removed_ids: Vec<String>,
    /// Whether the saved digest hash equals the live definitions' digest.
    pub digests_match: bool,
}

/// Outcome of a successful reconciliation.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileReport {
    /// `remap[saved_index] = live_index` (every entry is `Some` on success).
    pub remap: Vec<Option<usize>>,
    pub added_ids: Vec<String>,
    pub removed_ids: Vec<String>,
    pub digests_match: bool,
}

/// Compute the id diff between saved and live id sequences.
pub fn diff_save_ids(
    saved: &SerializedResourceState,
    live_ids: &[String],
) -> IdDiff {
    let live_index: std::collections::HashMap<&str, usize> = live_ids
        .iter()
        .enumerate()
        .map(|(i, id)| (id.as_str(), i))
        .collect();

    let mut remap = Vec::with_capacity(saved.ids.len());
    let mut removed_ids = Vec::new();
    for id in &saved.ids {
        match live_index.get(id.as_str()) {
            Some(&i) => remap.push(Some(i)),
            None => {
                remap.push(None);
                removed_ids.push(id.clone());
            }
        }
    }

    let saved_set: std::collections::HashSet<&str> =
        saved.ids.iter().map(String::as_str).collect();
    let added_ids: Vec<String> = live_ids
        .iter()
        .filter(|id| !saved_set.contains(id.as_str()))
        .cloned()
        .collect();

    let live_hash = compute_stable_digest(live_ids);
    let digests_match = saved
        .definition_digest
        .as_ref()
        .is_some_and(|d| d.hash == live_hash);

    IdDiff {
        remap,
        added_ids,
        removed_ids,
        digests_match,
    }
}

/// Structural validation of a serialized state.
///
/// Checks array lengths, id non-emptiness and uniqueness, amount finiteness,
/// capacity sign, and the self-consistency of the definition digest.
pub fn validate_serialized(state: &SerializedResourceState) -> Result<(), StoreError> {
    let n = state.ids.len();
    let length_ok = |len: usize| len == n;

    if !length_ok(state.amounts.len())
        || !length_ok(state.capacities.len())
        || !length_ok(state.flags.len())
        || state.unlocked.as_ref().is_some_and(|v| !length_ok(v.len()))
        || state.visible.as_ref().is_some_and(|v| !length_ok(v.len()))
    {
        return Err(StoreError::InvalidSaveData {
            details: format!(
                "column length mismatch: {} ids, {} amounts, {} capacities, {} flags",
                n,
                state.amounts.len(),
                state.capacities.len(),
                state.flags.len()
            ),
        });
    }

    let mut seen = std::collections::HashSet::with_capacity(n);
    for id in &state.ids {
        if id.is_empty() {
            return Err(StoreError::InvalidSaveData {
                details: "empty resource id".to_owned(),
            });
        }
        if !seen.insert(id.as_str()) {
            return Err(StoreError::InvalidSaveData {
                details: format!("duplicate resource id '{id}'"),
            });
        }
    }

    for (id, amount) in state.ids.iter().zip(&state.amounts) {
        if !amount.is_finite() {
            return Err(StoreError::InvalidSaveData {
                details: format!("non-finite amount for '{id}'"),
            });
        }
    }
    for (id, capacity) in state.ids.iter().zip(&state.capacities) {
        if let Some(c) = capacity {
            if c.is_nan() || *c < 0.0 {
                return Err(StoreError::InvalidSaveData {
                    details: format!("negative or NaN capacity for '{id}'"),
                });
            }
        }
    }

    if let Some(digest) = &state.definition_digest {
        if digest.version != state.ids.len() || digest.ids != state.ids {
            return Err(StoreError::InvalidSaveData {
                details: format!(
                    "definition digest inconsistent: version {} over {} ids",
                    digest.version,
                    state.ids.len()
                ),
            });
        }
        let computed = compute_stable_digest(&state.ids);
        if digest.hash != computed {
            return Err(StoreError::DigestHashMismatch {
                stored: digest.hash.clone(),
                computed,
            });
        }
    }

    Ok(())
}

/// Reconcile a serialized state against live definition ids.
///
/// Validates the payload, diffs the id sets, and applies the additions-only
/// rule: removed ids are fatal, added ids are reported through progress
/// telemetry and keep their initial values.
pub fn reconcile_save_against_ids(
    state: &SerializedResourceState,
    live_ids: &[String],
    telemetry: &dyn Telemetry,
) -> Result<ReconcileReport, StoreError> {
    if let Err(err) = validate_serialized(state) {
        let name = match &err {
            StoreError::InvalidSaveData { details }
                if details.starts_with("column length mismatch") =>
            {
                names::RESOURCE_SAVE_LENGTH_MISMATCH
            }
            _ => names::RESOURCE_HYDRATION_INVALID_DATA,
        };
        telemetry.record_error(name, serde_json::json!({ "error": err.to_string() }));
        return Err(err);
    }

    let diff = diff_save_ids(state, live_ids);
    if !diff.removed_ids.is_empty() {
        telemetry.record_error(
            names::RESOURCE_HYDRATION_MISMATCH,
            serde_json::json!({ "removedIds": diff.removed_ids }),
        );
        return Err(StoreError::HydrationMismatch {
            removed_ids: diff.removed_ids,
        });
    }

    if !diff.added_ids.is_empty() {
        telemetry.record_progress(
            names::RESOURCE_HYDRATION_ADDED_IDS,
            serde_json::json!({ "addedIds": diff.added_ids }),
        );
    }

    Ok(ReconcileReport {
        remap: diff.remap,
        added_ids: diff.added_ids,
        removed_ids: Vec::new(),
        digests_match: diff.digests_match,
    })
}

// ---------------------------------------------------------------------------
// Store save/hydrate impl
// ---------------------------------------------------------------------------

impl ResourceStore {
    /// Export the live state as the save wire shape.
    ///
    /// The transient dirty bit is masked out of `flags` so saves are stable
    /// regardless of mid-tick state.
    pub fn export_for_save(&self) -> SerializedResourceState {
        let n = self.len();
        let mut amounts = Vec::with_capacity(n);
        let mut capacities = Vec::with_capacity(n);
        let mut unlocked = Vec::with_capacity(n);
        let mut visible = Vec::with_capacity(n);
        let mut flags = Vec::with_capacity(n);

        for i in 0..n {
            amounts.push(self.amount(i));
            let capacity = self.capacity(i);
            capacities.push(capacity.is_finite().then_some(capacity));
            unlocked.push(self.is_unlocked(i));
            visible.push(self.is_visible(i));
            flags.push(self.flags_of(i) & !FLAG_DIRTY);
        }

        SerializedResourceState {
            ids: self.ids().to_vec(),
            amounts,
            capacities,
            unlocked: Some(unlocked),
            visible: Some(visible),
            flags,
            definition_digest: Some(ResourceDefinitionDigest::from_ids(self.ids())),
            automation_state: None,
        }
    }

    /// Reconcile a serialized state against this store's definitions.
    pub fn reconcile_save_against_definitions(
        &self,
        state: &SerializedResourceState,
    ) -> Result<ReconcileReport, StoreError> {
        reconcile_save_against_ids(state, self.ids(), self.telemetry().as_ref())
    }

    /// Apply a reconciled save to the live columns.
    ///
    /// Saved resources overwrite their live slots (amounts clamped against
    /// the hydrated capacity); added live slots keep their initial values.
    /// Both publish buffers are rebased on the hydrated state and all dirty
    /// state is cleared, so the first post-hydration publish reports only
    /// genuine post-hydration changes.
    pub fn hydrate_from_save(
        &mut self,
        state: &SerializedResourceState,
        report: &ReconcileReport,
    ) {
        assert_eq!(
            report.remap.len(),
            state.ids.len(),
            "reconcile report does not match the serialized state"
        );

        for (saved_idx, live_idx) in report.remap.iter().enumerate() {
            let Some(i) = *live_idx else { continue };
            let capacity = state.capacities[saved_idx].unwrap_or(f64::INFINITY);
            self.set_capacity_raw(i, capacity);
            self.set_amount_raw(i, state.amounts[saved_idx]);
            self.set_flags_raw(i, state.flags[saved_idx]);
        }
        self.rebase_after_hydration();

        tracing::debug!(
            resources = state.ids.len(),
            added = report.added_ids.len(),
            "hydrated resource state from save"
        );
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ResourceSpec, SnapshotGuardMode, FLAG_UNLOCKED, FLAG_VISIBLE};
    use crate::telemetry::{MemoryTelemetry, NullTelemetry};
    use std::sync::Arc;

    fn store_of(specs: &[ResourceSpec]) -> ResourceStore {
        ResourceStore::with_defaults(specs).unwrap()
    }

    fn saved(ids: &[&str], amounts: &[f64]) -> SerializedResourceState {
        let ids: Vec<String> = ids.iter().map(|s| s.to_string()).collect();
        SerializedResourceState {
            definition_digest: Some(ResourceDefinitionDigest::from_ids(&ids)),
            amounts: amounts.to_vec(),
            capacities: vec![None; ids.len()],
            unlocked: None,
            visible: None,
            flags: vec![FLAG_VISIBLE | FLAG_UNLOCKED; ids.len()],
            automation_state: None,
            ids,
        }
    }

    // -- 1. Export shape ------------------------------------------------------

    #[test]
    fn export_masks_dirty_bit_and_encodes_infinity() {
        let mut store = store_of(&[
            ResourceSpec::new("wood", 5.0),
            ResourceSpec::new("stone", 3.0).with_capacity(10.0),
        ]);
        store.add_amount(0, 1.0); // marks dirty

        let state = store.export_for_save();
        assert_eq!(state.ids, vec!["wood", "stone"]);
        assert_eq!(state.amounts, vec![6.0, 3.0]);
        assert_eq!(state.capacities, vec![None, Some(10.0)]);
        assert!(state.flags.iter().all(|f| f & FLAG_DIRTY == 0));

        let digest = state.definition_digest.unwrap();
        assert!(digest.is_self_consistent());
        assert_eq!(digest.version, 2);
    }

    #[test]
    fn export_serde_roundtrip_preserves_null_capacity() {
        let store = store_of(&[ResourceSpec::new("wood", 1.0)]);
        let state = store.export_for_save();
        let json = serde_json::to_string(&state).unwrap();
        assert!(json.contains("\"capacities\":[null]"));

        let back: SerializedResourceState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
    }

    // -- 2. Validation ---------------------------------------------------------

    #[test]
    fn validation_rejects_length_mismatch() {
        let mut state = saved(&["wood"], &[1.0]);
        state.amounts.clear();
        assert!(matches!(
            validate_serialized(&state),
            Err(StoreError::InvalidSaveData { .. })
        ));
    }

    #[test]
    fn validation_rejects_duplicates_and_empty_ids() {
        let state = saved(&["wood", "wood"], &[1.0, 2.0]);
        assert!(matches!(
            validate_serialized(&state),
            Err(StoreError::InvalidSaveData { .. })
        ));

        let state = saved(&[""], &[1.0]);
        assert!(matches!(
            validate_serialized(&state),
            Err(StoreError::InvalidSaveData { .. })
        ));
    }

    #[test]
    fn validation_rejects_non_finite_amounts() {
        let mut state = saved(&["wood"], &[1.0]);
        state.amounts[0] = f64::NAN;
        assert!(matches!(
            validate_serialized(&state),
            Err(StoreError::InvalidSaveData { .. })
        ));
    }

    #[test]
    fn validation_rejects_tampered_digest_hash() {
        let mut state = saved(&["wood"], &[1.0]);
        state.definition_digest.as_mut().unwrap().hash = "fnv1a-deadbeef".to_owned();
        assert!(matches!(
            validate_serialized(&state),
            Err(StoreError::DigestHashMismatch { .. })
        ));
    }

    #[test]
    fn validation_accepts_digestless_state() {
        let mut state = saved(&["wood"], &[1.0]);
        state.definition_digest = None;
        assert!(validate_serialized(&state).is_ok());
    }

    // -- 3. Diff ----------------------------------------------------------------

    #[test]
    fn diff_detects_added_and_removed() {
        let state = saved(&["wood", "coal"], &[1.0, 2.0]);
        let live = vec!["wood".to_owned(), "stone".to_owned()];
        let diff = diff_save_ids(&state, &live);

        assert_eq!(diff.remap, vec![Some(0), None]);
        assert_eq!(diff.added_ids, vec!["stone"]);
        assert_eq!(diff.removed_ids, vec!["coal"]);
        assert!(!diff.digests_match);
    }

    #[test]
    fn diff_matching_digests() {
        let state = saved(&["wood", "stone"], &[1.0, 2.0]);
        let live = vec!["wood".to_owned(), "stone".to_owned()];
        let diff = diff_save_ids(&state, &live);
        assert!(diff.digests_match);
        assert!(diff.added_ids.is_empty());
        assert!(diff.removed_ids.is_empty());
    }

    // -- 4. Additions-only reconciliation (property 9) ----------------------------

    #[test]
    fn additions_only_save_reconciles() {
        let store = store_of(&[
            ResourceSpec::new("wood", 0.0),
            ResourceSpec::new("stone", 0.0),
        ]);
        let state = saved(&["wood"], &[12.0]);

        let report = store.reconcile_save_against_definitions(&state).unwrap();
        assert_eq!(report.remap, vec![Some(0)]);
        assert_eq!(report.added_ids, vec!["stone"]);
        assert!(report.removed_ids.is_empty());
        assert!(!report.digests_match);
    }

    #[test]
    fn removed_ids_are_fatal() {
        let telemetry = Arc::new(MemoryTelemetry::new());
        let store = ResourceStore::new(
            &[ResourceSpec::new("wood", 0.0)],
            telemetry.clone(),
            SnapshotGuardMode::ForceOff,
        )
        .unwrap();
        let state = saved(&["wood", "lumber"], &[1.0, 2.0]);

        let err = store
            .reconcile_save_against_definitions(&state)
            .unwrap_err();
        assert_eq!(
            err,
            StoreError::HydrationMismatch {
                removed_ids: vec!["lumber".to_owned()]
            }
        );
        assert!(telemetry.has(crate::telemetry::names::RESOURCE_HYDRATION_MISMATCH));
    }

    // -- 5. Hydration ---------------------------------------------------------------

    #[test]
    fn hydration_applies_saved_values_and_keeps_added_defaults() {
        let mut store = store_of(&[
            ResourceSpec::new("wood", 0.0),
            ResourceSpec::new("stone", 7.0),
        ]);
        let mut state = saved(&["wood"], &[42.0]);
        state.capacities[0] = Some(50.0);

        let report = store.reconcile_save_against_definitions(&state).unwrap();
        store.hydrate_from_save(&state, &report);

        assert_eq!(store.amount(0), 42.0);
        assert_eq!(store.capacity(0), 50.0);
        // Added resource keeps its initial value.
        assert_eq!(store.amount(1), 7.0);

        // Hydration leaves no dirty residue: a quiet cycle publishes nothing.
        store.finalize_tick(16.0).unwrap();
        let view = store.publish().unwrap();
        assert_eq!(view.dirty_count(), 0);
    }

    #[test]
    fn hydration_clamps_amount_to_saved_capacity() {
        let mut store = store_of(&[ResourceSpec::new("wood", 0.0)]);
        let mut state = saved(&["wood"], &[100.0]);
        state.capacities[0] = Some(30.0);

        let report = store.reconcile_save_against_definitions(&state).unwrap();
        store.hydrate_from_save(&state, &report);
        assert_eq!(store.amount(0), 30.0);
    }

    #[test]
    fn hydration_restores_flags_without_dirty_bit() {
        let mut store = store_of(&[ResourceSpec::new("wood", 0.0)]);
        let mut state = saved(&["wood"], &[1.0]);
        state.flags[0] = FLAG_VISIBLE | FLAG_UNLOCKED | FLAG_DIRTY;

        let report = store.reconcile_save_against_definitions(&state).unwrap();
        store.hydrate_from_save(&state, &report);

        assert!(store.is_visible(0));
        assert!(store.is_unlocked(0));
        assert_eq!(store.flags_of(0) & FLAG_DIRTY, 0);
    }

    // -- 6. Round trip ----------------------------------------------------------------

    #[test]
    fn export_then_hydrate_roundtrip() {
        let mut source = store_of(&[
            ResourceSpec::new("wood", 10.0),
            ResourceSpec::new("stone", 20.0).with_capacity(100.0),
        ]);
        source.add_amount(0, 5.0);
        let state = source.export_for_save();

        let mut target = store_of(&[
            ResourceSpec::new("wood", 0.0),
            ResourceSpec::new("stone", 0.0).with_capacity(100.0),
        ]);
        let report = target.reconcile_save_against_definitions(&state).unwrap();
        assert!(report.digests_match);
        target.hydrate_from_save(&state, &report);

        assert_eq!(target.amount(0), 15.0);
        assert_eq!(target.amount(1), 20.0);
    }

    // -- 7. Free-function reconciliation (used by migration revalidate) ------------------

    #[test]
    fn reconcile_free_function_matches_store_method() {
        let state = saved(&["a"], &[5.0]);
        let live = vec!["a".to_owned(), "b".to_owned()];
        let report = reconcile_save_against_ids(&state, &live, &NullTelemetry).unwrap();
        assert_eq!(report.added_ids, vec!["b"]);
        assert_eq!(report.remap, vec![Some(0)]);
    }
}
