//! Digest-keyed save migration runtime.
//!
//! Migrations are registered as `(from digest hash, to digest hash,
//! transform)` edges. Restoring an incompatible save searches the digest
//! graph breadth-first for a path from the stored digest to the current one
//! (ties broken by registration order), threads the state through each
//! transform sequentially, strips the stale stored digest, and *revalidates*
//! the result against the current definitions. Revalidation is
//! authoritative: a defensive digest-hash equality check only emits
//! telemetry on mismatch.

use std::collections::{HashMap, HashSet, VecDeque};

use perpetua_core::digest::compute_stable_digest;
use perpetua_core::serialize::{reconcile_save_against_ids, SerializedResourceState};
use perpetua_core::store::StoreError;
use perpetua_core::telemetry::{names, Telemetry};

/// A state transform between two content digests.
pub struct Migration {
    pub id: String,
    pub from_hash: String,
    pub to_hash: String,
    transform: Box<dyn Fn(SerializedResourceState) -> SerializedResourceState + Send + Sync>,
}

/// Migration failures, with stable codes for the host UI.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MigrationError {
    #[error("no migration path from {from} to {to}")]
    PathNotFound { from: String, to: String },
    #[error("migrated state failed revalidation: {source}")]
    ValidationFailed {
        #[source]
        source: StoreError,
    },
    #[error("migrated state still references removed resources: {removed_ids:?}")]
    Incomplete { removed_ids: Vec<String> },
    #[error("migration runtime error: {message}")]
    Runtime { message: String },
}

impl MigrationError {
    /// Stable error code exposed to the host.
    pub fn code(&self) -> &'static str {
        match self {
            Self::PathNotFound { .. } => "MIGRATION_PATH_NOT_FOUND",
            Self::ValidationFailed { .. } => "MIGRATION_VALIDATION_FAILED",
            Self::Incomplete { .. } => "MIGRATION_INCOMPLETE",
            Self::Runtime { .. } => "MIGRATION_ERROR",
        }
    }
}

/// Registry of migration edges. Registration order is significant: it is the
/// BFS tie-breaker.
#[derive(Default)]
pub struct MigrationRegistry {
    migrations: Vec<Migration>,
}

impl MigrationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a migration edge.
    pub fn register(
        &mut self,
        id: impl Into<String>,
        from_hash: impl Into<String>,
        to_hash: impl Into<String>,
        transform: impl Fn(SerializedResourceState) -> SerializedResourceState
            + Send
            + Sync
            + 'static,
    ) {
        self.migrations.push(Migration {
            id: id.into(),
            from_hash: from_hash.into(),
            to_hash: to_hash.into(),
            transform: Box::new(transform),
        });
    }

    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }

    /// Breadth-first path search over the digest graph.
    ///
    /// Returns the migration indices to apply in order; the zero-step path
    /// (`from == to`) is `Some(vec![])`.
    pub fn find_migration_path(&self, from_hash: &str, to_hash: &str) -> Option<Vec<usize>> {
        if from_hash == to_hash {
            return Some(Vec::new());
        }

        // predecessor[hash] = (previous hash, migration index)
        let mut predecessor: HashMap<&str, (&str, usize)> = HashMap::new();
        let mut visited: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = VecDeque::new();
        visited.insert(from_hash);
        queue.push_back(from_hash);

        while let Some(current) = queue.pop_front() {
            // Registration order doubles as the neighbor expansion order,
            // which makes it the tie-breaker among equal-length paths.
            for (index, migration) in self.migrations.iter().enumerate() {
                if migration.from_hash != current {
                    continue;
                }
                let next = migration.to_hash.as_str();
                if !visited.insert(next) {
                    continue;
                }
                predecessor.insert(next, (current, index));
                if next == to_hash {
                    // Walk back to assemble the path.
                    let mut path = Vec::new();
                    let mut cursor = next;
                    while cursor != from_hash {
                        let (previous, index) = predecessor[cursor];
                        path.push(index);
                        cursor = previous;
                    }
                    path.reverse();
                    return Some(path);
                }
                queue.push_back(next);
            }
        }

        None
    }

    /// Apply a found path sequentially, then strip the stale digest and
    /// revalidate against the current definitions.
    ///
    /// `target_hash` feeds a defensive equality check that only emits
    /// `PersistenceMigrationDigestMismatch` telemetry; revalidation is the
    /// authoritative gate.
    pub fn apply_migrations(
        &self,
        state: SerializedResourceState,
        path: &[usize],
        live_ids: &[String],
        target_hash: &str,
        telemetry: &dyn Telemetry,
    ) -> Result<SerializedResourceState, MigrationError> {
        telemetry.record_event(
            names::PERSISTENCE_MIGRATION_STARTED,
            serde_json::json!({
                "steps": path.len(),
                "migrations": path
                    .iter()
                    .map(|&i| self.migrations[i].id.clone())
                    .collect::<Vec<_>>(),
            }),
        );

        let mut migrated = state;
        for &index in path {
            let migration = &self.migrations[index];
            migrated = (migration.transform)(migrated);
            tracing::debug!(migration = migration.id, "migration step applied");
        }

        // The stored digest described the pre-migration shape; it must not
        // survive into the migrated state.
        migrated.definition_digest = None;

        let computed = compute_stable_digest(&migrated.ids);
        if computed != target_hash {
            telemetry.record_warning(
                names::PERSISTENCE_MIGRATION_DIGEST_MISMATCH,
                serde_json::json!({ "computed": computed, "expected": target_hash }),
            );
        }

        match reconcile_save_against_ids(&migrated, live_ids, telemetry) {
            Ok(_) => {
                telemetry.record_event(
                    names::PERSISTENCE_MIGRATION_APPLIED,
                    serde_json::json!({ "steps": path.len() }),
                );
                Ok(migrated)
            }
            Err(StoreError::HydrationMismatch { removed_ids }) => {
                telemetry.record_error(
                    names::PERSISTENCE_MIGRATION_FAILED,
                    serde_json::json!({ "code": "MIGRATION_INCOMPLETE" }),
                );
                Err(MigrationError::Incomplete { removed_ids })
            }
            Err(source) => {
                telemetry.record_error(
                    names::PERSISTENCE_MIGRATION_FAILED,
                    serde_json::json!({ "code": "MIGRATION_VALIDATION_FAILED" }),
                );
                Err(MigrationError::ValidationFailed { source })
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
