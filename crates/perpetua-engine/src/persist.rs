//! Persistence and worker-bridge capability traits.
//!
//! The engine never touches storage directly: the host supplies a
//! [`PersistenceAdapter`] (opaque slot -> snapshot blobs) and a
//! [`WorkerBridge`] that receives the restored state. [`MemoryAdapter`] and
//! [`RecordingBridge`] are in-memory implementations for tests and benches.

use std::collections::HashMap;
use std::sync::Mutex;

use perpetua_core::serialize::SerializedResourceState;

use crate::save::StoredSnapshot;

/// Failures crossing the persistence boundary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("persistence failure: {message}")]
pub struct PersistenceError {
    pub message: String,
}

impl PersistenceError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Host storage capability.
pub trait PersistenceAdapter: Send + Sync {
    fn load(&self, slot_id: &str) -> Result<Option<StoredSnapshot>, PersistenceError>;
    fn save(&self, snapshot: &StoredSnapshot) -> Result<(), PersistenceError>;
    fn delete_slot(&self, slot_id: &str) -> Result<(), PersistenceError>;
    /// Offline elapsed time for the snapshot, already clamped to the host's
    /// cap.
    fn compute_offline_elapsed_ms(&self, snapshot: &StoredSnapshot) -> u64;
}

/// Host session handoff capability.
pub trait WorkerBridge: Send + Sync {
    fn restore_session(
        &self,
        state: SerializedResourceState,
        elapsed_ms: u64,
    ) -> Result<(), PersistenceError>;
}

// ---------------------------------------------------------------------------
// In-memory implementations
// ---------------------------------------------------------------------------

/// Slot map in memory, with a fixed offline-elapsed answer.
#[derive(Debug, Default)]
pub struct MemoryAdapter {
    slots: Mutex<HashMap<String, StoredSnapshot>>,
    pub offline_elapsed_ms: u64,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(snapshot: StoredSnapshot) -> Self {
        let adapter = Self::new();
        adapter
            .slots
            .lock()
            .expect("adapter lock poisoned")
            .insert(snapshot.slot_id.clone(), snapshot);
        adapter
    }

    /// Number of stored slots.
    pub fn slot_count(&self) -> usize {
        self.slots.lock().expect("adapter lock poisoned").len()
    }

    /// Read back a stored snapshot (test inspection).
    pub fn peek(&self, slot_id: &str) -> Option<StoredSnapshot> {
        self.slots
            .lock()
            .expect("adapter lock poisoned")
            .get(slot_id)
            .cloned()
    }
}

impl PersistenceAdapter for MemoryAdapter {
    fn load(&self, slot_id: &str) -> Result<Option<StoredSnapshot>, PersistenceError> {
        Ok(self
            .slots
            .lock()
            .expect("adapter lock poisoned")
            .get(slot_id)
            .cloned())
    }

    fn save(&self, snapshot: &StoredSnapshot) -> Result<(), PersistenceError> {
        self.slots
            .lock()
            .expect("adapter lock poisoned")
            .insert(snapshot.slot_id.clone(), snapshot.clone());
        Ok(())
    }

    fn delete_slot(&self, slot_id: &str) -> Result<(), PersistenceError> {
        self.slots
            .lock()
            .expect("adapter lock poisoned")
            .remove(slot_id);
        Ok(())
    }

    fn compute_offline_elapsed_ms(&self, _snapshot: &StoredSnapshot) -> u64 {
        self.offline_elapsed_ms
    }
}

/// Records every `restore_session` call for test assertions.
#[derive(Debug, Default)]
pub struct RecordingBridge {
    sessions: Mutex<Vec<(SerializedResourceState, u64)>>,
}

impl RecordingBridge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().expect("bridge lock poisoned").len()
    }

    pub fn last_session(&self) -> Option<(SerializedResourceState, u64)> {
        self.sessions
            .lock()
            .expect("bridge lock poisoned")
            .last()
            .cloned()
    }
}

impl WorkerBridge for RecordingBridge {
    fn restore_session(
        &self,
        state: SerializedResourceState,
        elapsed_ms: u64,
    ) -> Result<(), PersistenceError> {
        self.sessions
            .lock()
            .expect("bridge lock poisoned")
            .push((state, elapsed_ms));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
