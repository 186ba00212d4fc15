//! Stored snapshots, compatibility rules, and the restore pipeline.
//!
//! A [`StoredSnapshot`] is the host-persisted wrapper around the serialized
//! resource state. Compatibility against the current definitions is
//! additions-only: new resources are fine (they initialize to defaults),
//! removed resources require a migration. A snapshot flagged
//! `pendingMigration` takes the migration path even when digests match -- the
//! zero-step path still strips and revalidates, which is what catches
//! corrupted states.
//!
//! The pipeline never hands a state to the worker bridge unless it passed
//! revalidation, and it persists migrated snapshots immediately so the next
//! load takes the fast path.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use perpetua_core::digest::{compute_stable_digest, ResourceDefinitionDigest};
use perpetua_core::serialize::{diff_save_ids, reconcile_save_against_ids, SerializedResourceState};
use perpetua_core::telemetry::{names, Telemetry};

use crate::migration::MigrationRegistry;
use crate::persist::{PersistenceAdapter, WorkerBridge};

// ---------------------------------------------------------------------------
// Wire shapes
// ---------------------------------------------------------------------------

/// Host-level snapshot flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SnapshotFlags {
    /// Force the migration path on the next restore even if digests match.
    #[serde(default)]
    pub pending_migration: bool,
}

/// A persisted save slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredSnapshot {
    pub schema_version: u32,
    pub slot_id: String,
    /// Wall-clock capture time in milliseconds since the epoch.
    pub captured_at_ms: u64,
    /// The simulation step at capture.
    pub worker_step: u64,
    /// Monotonic session time at capture, in milliseconds.
    pub monotonic_ms: u64,
    pub state: SerializedResourceState,
    pub runtime_version: String,
    /// Content digest hash of the pack the snapshot was saved under.
    pub content_digest: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flags: Option<SnapshotFlags>,
}

impl StoredSnapshot {
    /// The digest hash keying this snapshot in the migration graph: the
    /// state's own definition digest when present, else the pack digest.
    pub fn migration_source_hash(&self) -> &str {
        self.state
            .definition_digest
            .as_ref()
            .map(|d| d.hash.as_str())
            .unwrap_or(&self.content_digest)
    }

    fn pending_migration(&self) -> bool {
        self.flags.map(|f| f.pending_migration).unwrap_or(false)
    }
}

// ---------------------------------------------------------------------------
// Compatibility
// ---------------------------------------------------------------------------

/// Compatibility of a snapshot against the current definitions.
#[derive(Debug, Clone, PartialEq)]
pub enum Compatibility {
    /// Restorable without migration; `added_ids` initialize to defaults.
    Compatible { added_ids: Vec<String> },
    /// A migration path is required before restore.
    RequiresMigration { removed_ids: Vec<String> },
}

/// Apply the additions-only compatibility rules.
pub fn evaluate_compatibility(snapshot: &StoredSnapshot, live_ids: &[String]) -> Compatibility {
    let diff = diff_save_ids(&snapshot.state, live_ids);
    if snapshot.pending_migration() || !diff.removed_ids.is_empty() {
        Compatibility::RequiresMigration {
            removed_ids: diff.removed_ids,
        }
    } else {
        Compatibility::Compatible {
            added_ids: diff.added_ids,
        }
    }
}

// ---------------------------------------------------------------------------
// Restore pipeline
// ---------------------------------------------------------------------------

/// Result of a restore attempt.
#[derive(Debug, Clone)]
pub struct RestoreOutcome {
    pub success: bool,
    /// `"valid"`, `"invalid"`, or `"skipped"`.
    pub validation_status: &'static str,
    /// Stable failure code when `success` is false.
    pub code: Option<String>,
    /// The state handed to the bridge on success.
    pub state: Option<SerializedResourceState>,
    pub elapsed_ms: u64,
}

impl RestoreOutcome {
    fn skipped() -> Self {
        Self {
            success: false,
            validation_status: "skipped",
            code: None,
            state: None,
            elapsed_ms: 0,
        }
    }

    fn failed(code: impl Into<String>, elapsed_ms: u64) -> Self {
        Self {
            success: false,
            validation_status: "invalid",
            code: Some(code.into()),
            state: None,
            elapsed_ms,
        }
    }
}

/// Owns the capabilities needed to restore a save slot.
pub struct RestorePipeline {
    pub adapter: Arc<dyn PersistenceAdapter>,
    pub bridge: Arc<dyn WorkerBridge>,
    pub telemetry: Arc<dyn Telemetry>,
    pub migrations: MigrationRegistry,
}

impl RestorePipeline {
    pub fn new(
        adapter: Arc<dyn PersistenceAdapter>,
        bridge: Arc<dyn WorkerBridge>,
        telemetry: Arc<dyn Telemetry>,
        migrations: MigrationRegistry,
    ) -> Self {
        Self {
            adapter,
            bridge,
            telemetry,
            migrations,
        }
    }

    /// Load, reconcile/migrate, and hand the slot's state to the bridge.
    ///
    /// The bridge is only invoked with a state that passed revalidation; on
    /// any failure the stored snapshot is left untouched.
    pub fn restore_slot(&self, slot_id: &str, live_ids: &[String]) -> RestoreOutcome {
        let snapshot = match self.adapter.load(slot_id) {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => {
                self.telemetry.record_event(
                    names::PERSISTENCE_RESTORE_SKIPPED,
                    serde_json::json!({ "slotId": slot_id, "reason": "no snapshot" }),
                );
                return RestoreOutcome::skipped();
            }
            Err(error) => {
                self.telemetry.record_error(
                    names::PERSISTENCE_RESTORE_FAILED,
                    serde_json::json!({ "slotId": slot_id, "error": error.to_string() }),
                );
                return RestoreOutcome::failed("RESTORE_LOAD_FAILED", 0);
            }
        };

        let elapsed_ms = self.adapter.compute_offline_elapsed_ms(&snapshot);
        let current_hash = compute_stable_digest(live_ids);

        let state = match evaluate_compatibility(&snapshot, live_ids) {
            Compatibility::Compatible { added_ids } => {
                if !added_ids.is_empty() {
                    tracing::debug!(
                        slot = slot_id,
                        added = added_ids.len(),
                        "restoring with new resources at defaults"
                    );
                }
                match reconcile_save_against_ids(
                    &snapshot.state,
                    live_ids,
                    self.telemetry.as_ref(),
                ) {
                    Ok(_) => snapshot.state.clone(),
                    Err(error) => {
                        self.telemetry.record_error(
                            names::PERSISTENCE_RESTORE_FAILED,
                            serde_json::json!({ "slotId": slot_id, "error": error.to_string() }),
                        );
                        return RestoreOutcome::failed("RESTORE_VALIDATION_FAILED", elapsed_ms);
                    }
                }
            }
            Compatibility::RequiresMigration { .. } => {
                let from_hash = snapshot.migration_source_hash();
                let Some(path) = self.migrations.find_migration_path(from_hash, &current_hash)
                else {
                    self.telemetry.record_error(
                        names::PERSISTENCE_RESTORE_FAILED,
                        serde_json::json!({
                            "slotId": slot_id,
                            "code": "MIGRATION_PATH_NOT_FOUND",
                            "from": from_hash,
                            "to": current_hash,
                        }),
                    );
                    return RestoreOutcome::failed("MIGRATION_PATH_NOT_FOUND", elapsed_ms);
                };

                match self.migrations.apply_migrations(
                    snapshot.state.clone(),
                    &path,
                    live_ids,
                    &current_hash,
                    self.telemetry.as_ref(),
                ) {
                    Ok(mut migrated) => {
                        migrated.definition_digest =
                            Some(ResourceDefinitionDigest::from_ids(&migrated.ids));
                        self.persist_migrated(&snapshot, &migrated, &current_hash);
                        migrated
                    }
                    Err(error) => {
                        self.telemetry.record_error(
                            names::PERSISTENCE_RESTORE_FAILED,
                            serde_json::json!({ "slotId": slot_id, "code": error.code() }),
                        );
                        return RestoreOutcome::failed(error.code(), elapsed_ms);
                    }
                }
            }
        };

        match self.bridge.restore_session(state.clone(), elapsed_ms) {
            Ok(()) => {
                self.telemetry.record_event(
                    names::PERSISTENCE_RESTORE_SUCCEEDED,
                    serde_json::json!({ "slotId": slot_id, "elapsedMs": elapsed_ms }),
                );
                RestoreOutcome {
                    success: true,
                    validation_status: "valid",
                    code: None,
                    state: Some(state),
                    elapsed_ms,
                }
            }
            Err(error) => {
                self.telemetry.record_error(
                    names::PERSISTENCE_RESTORE_FAILED,
                    serde_json::json!({ "slotId": slot_id, "error": error.to_string() }),
                );
                RestoreOutcome::failed("RESTORE_BRIDGE_FAILED", elapsed_ms)
            }
        }
    }

    /// Persist the migrated snapshot so the next load takes the fast path.
    /// Persistence failures are telemetry-only.
    fn persist_migrated(
        &self,
        original: &StoredSnapshot,
        migrated: &SerializedResourceState,
        current_hash: &str,
    ) {
        let mut updated = original.clone();
        updated.state = migrated.clone();
        updated.content_digest = current_hash.to_owned();
        updated.flags = Some(SnapshotFlags {
            pending_migration: false,
        });
        if let Err(error) = self.adapter.save(&updated) {
            self.telemetry.record_warning(
                "PersistenceMigrationPersistFailed",
                serde_json::json!({ "slotId": original.slot_id, "error": error.to_string() }),
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn state(ids: &[&str], amounts: &[f64]) -> SerializedResourceState {
        let ids: Vec<String> = ids.iter().map(|s| s.to_string()).collect();
        SerializedResourceState {
            definition_digest: Some(ResourceDefinitionDigest::from_ids(&ids)),
            amounts: amounts.to_vec(),
            capacities: vec![None; ids.len()],
            unlocked: None,
            visible: None,
            flags: vec![3; ids.len()],
            automation_state: None,
            ids,
        }
    }

    fn snapshot(ids: &[&str], amounts: &[f64]) -> StoredSnapshot {
        StoredSnapshot {
            schema_version: 1,
            slot_id: "slot-1".to_owned(),
            captured_at_ms: 1_000,
            worker_step: 42,
            monotonic_ms: 672,
            state: state(ids, amounts),
            runtime_version: "1.0.0".to_owned(),
            content_digest: compute_stable_digest(
                &ids.iter().map(|s| s.to_string()).collect::<Vec<_>>(),
            ),
            flags: None,
        }
    }

    fn owned(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    // -- 1. Compatibility rules (spec property 9) -------------------------------

    #[test]
    fn additions_only_is_compatible() {
        let snapshot = snapshot(&["wood"], &[5.0]);
        let compatibility = evaluate_compatibility(&snapshot, &owned(&["wood", "stone"]));
        assert_eq!(
            compatibility,
            Compatibility::Compatible {
                added_ids: vec!["stone".to_owned()]
            }
        );
    }

    #[test]
    fn removals_require_migration() {
        let snapshot = snapshot(&["wood", "coal"], &[5.0, 2.0]);
        let compatibility = evaluate_compatibility(&snapshot, &owned(&["wood"]));
        assert_eq!(
            compatibility,
            Compatibility::RequiresMigration {
                removed_ids: vec!["coal".to_owned()]
            }
        );
    }

    #[test]
    fn pending_migration_flag_forces_the_migration_path() {
        let mut snapshot = snapshot(&["wood"], &[5.0]);
        snapshot.flags = Some(SnapshotFlags {
            pending_migration: true,
        });
        let compatibility = evaluate_compatibility(&snapshot, &owned(&["wood"]));
        assert_eq!(
            compatibility,
            Compatibility::RequiresMigration {
                removed_ids: vec![]
            }
        );
    }

    // -- 2. Serde wire shape -------------------------------------------------------

    #[test]
    fn stored_snapshot_serde_roundtrip() {
        let snapshot = snapshot(&["wood"], &[5.0]);
        let json = serde_json::to_string(&snapshot).unwrap();
        let back: StoredSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, snapshot);
    }
}
