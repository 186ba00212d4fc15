//! Telemetry capability through which the core reports to the host.
//!
//! The core never logs to an ambient sink of its own choosing: every event,
//! warning, and error goes through an injected [`Telemetry`] object. Each
//! emission is mirrored into `tracing` so local runs get structured logs even
//! with a [`NullTelemetry`] installed.

use std::sync::Mutex;

use serde_json::Value;

// ---------------------------------------------------------------------------
// Event names
// ---------------------------------------------------------------------------

/// Core-emitted telemetry event names.
pub mod names {
    pub const RESOURCE_DIRTY_TOLERANCE_SATURATED: &str = "ResourceDirtyToleranceSaturated";
    pub const RESOURCE_FORCE_CLEAR_DIRTY_STATE: &str = "ResourceForceClearDirtyState";
    pub const RESOURCE_SAVE_LENGTH_MISMATCH: &str = "ResourceSaveLengthMismatch";
    pub const RESOURCE_HYDRATION_MISMATCH: &str = "ResourceHydrationMismatch";
    pub const RESOURCE_HYDRATION_INVALID_DATA: &str = "ResourceHydrationInvalidData";
    pub const RESOURCE_HYDRATION_ADDED_IDS: &str = "ResourceHydrationAddedIds";
    pub const PERSISTENCE_MIGRATION_STARTED: &str = "PersistenceMigrationStarted";
    pub const PERSISTENCE_MIGRATION_APPLIED: &str = "PersistenceMigrationApplied";
    pub const PERSISTENCE_MIGRATION_FAILED: &str = "PersistenceMigrationFailed";
    pub const PERSISTENCE_MIGRATION_DIGEST_MISMATCH: &str = "PersistenceMigrationDigestMismatch";
    pub const PERSISTENCE_RESTORE_SUCCEEDED: &str = "PersistenceRestoreSucceeded";
    pub const PERSISTENCE_RESTORE_FAILED: &str = "PersistenceRestoreFailed";
    pub const PERSISTENCE_RESTORE_SKIPPED: &str = "PersistenceRestoreSkipped";
}

// ---------------------------------------------------------------------------
// Telemetry trait
// ---------------------------------------------------------------------------

/// Host-provided telemetry sink.
///
/// Implementations must be cheap and non-blocking; the core calls these from
/// inside the tick.
pub trait Telemetry: Send + Sync {
    /// Record an informational event.
    fn record_event(&self, name: &str, data: Value);
    /// Record a soft issue that did not interrupt the operation.
    fn record_warning(&self, name: &str, data: Value);
    /// Record a failure.
    fn record_error(&self, name: &str, data: Value);
    /// Record a progress/diagnostic data point.
    fn record_progress(&self, name: &str, data: Value);
}

// ---------------------------------------------------------------------------
// NullTelemetry
// ---------------------------------------------------------------------------

/// Telemetry sink that only mirrors into `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTelemetry;

impl Telemetry for NullTelemetry {
    fn record_event(&self, name: &str, data: Value) {
        tracing::debug!(telemetry = name, %data, "telemetry event");
    }

    fn record_warning(&self, name: &str, data: Value) {
        tracing::warn!(telemetry = name, %data, "telemetry warning");
    }

    fn record_error(&self, name: &str, data: Value) {
        tracing::error!(telemetry = name, %data, "telemetry error");
    }

    fn record_progress(&self, name: &str, data: Value) {
        tracing::trace!(telemetry = name, %data, "telemetry progress");
    }
}

// ---------------------------------------------------------------------------
// MemoryTelemetry
// ---------------------------------------------------------------------------

/// Severity class of a recorded entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelemetryKind {
    Event,
    Warning,
    Error,
    Progress,
}

/// A recorded telemetry entry.
#[derive(Debug, Clone)]
pub struct TelemetryEntry {
    pub kind: TelemetryKind,
    pub name: String,
    pub data: Value,
}

/// In-memory telemetry sink for tests and benches.
#[derive(Debug, Default)]
pub struct MemoryTelemetry {
    entries: Mutex<Vec<TelemetryEntry>>,
}

impl MemoryTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    /// All recorded entries, in emission order.
    pub fn entries(&self) -> Vec<TelemetryEntry> {
        self.entries.lock().expect("telemetry lock poisoned").clone()
    }

    /// Count of entries with the given name.
    pub fn count_of(&self, name: &str) -> usize {
        self.entries
            .lock()
            .expect("telemetry lock poisoned")
            .iter()
            .filter(|e| e.name == name)
            .count()
    }

    /// Whether any entry with the given name was recorded.
    pub fn has(&self, name: &str) -> bool {
        self.count_of(name) > 0
    }

    fn push(&self, kind: TelemetryKind, name: &str, data: Value) {
        self.entries
            .lock()
            .expect("telemetry lock poisoned")
            .push(TelemetryEntry {
                kind,
                name: name.to_owned(),
                data,
            });
    }
}

impl Telemetry for MemoryTelemetry {
    fn record_event(&self, name: &str, data: Value) {
        self.push(TelemetryKind::Event, name, data);
    }

    fn record_warning(&self, name: &str, data: Value) {
        tracing::warn!(telemetry = name, "telemetry warning");
        self.push(TelemetryKind::Warning, name, data);
    }

    fn record_error(&self, name: &str, data: Value) {
        tracing::error!(telemetry = name, "telemetry error");
        self.push(TelemetryKind::Error, name, data);
    }

    fn record_progress(&self, name: &str, data: Value) {
        self.push(TelemetryKind::Progress, name, data);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
