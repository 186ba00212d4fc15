//! Perpetua Core -- deterministic simulation primitives for the idle-game engine.
//!
//! This crate provides the leaf building blocks the rest of the workspace is
//! assembled from:
//!
//! - [`formula`]: numeric formula variants (constant, linear, polynomial,
//!   exponential, expression trees) evaluated against a context of variables
//!   and entity lookups.
//! - [`condition`]: boolean condition variants with comparator semantics,
//!   human-readable unlock hints, and reference resolution.
//! - [`store`]: the columnar (struct-of-arrays) resource state engine with
//!   double-buffered publish snapshots and epsilon-tolerant dirty tracking.
//! - [`serialize`]: the save wire shape plus hydration reconciliation.
//! - [`digest`]: the stable FNV-1a content digest used for save
//!   compatibility and migration keying.
//! - [`telemetry`]: the capability trait through which the core reports
//!   events to the host.
//!
//! # Determinism
//!
//! Nothing in this crate reads ambient state: no clocks, no environment, no
//! randomness. All ordering is by resource index or entity id, so the same
//! inputs always produce the same outputs across runs and platforms.

#![deny(unsafe_code)]

pub mod condition;
pub mod digest;
pub mod formula;
pub mod serialize;
pub mod store;
pub mod telemetry;

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::condition::{
        Comparator, Condition, ConditionError, ConditionEvaluator, ConditionSource,
        ReferenceResolver,
    };
    pub use crate::digest::{compute_stable_digest, ResourceDefinitionDigest};
    pub use crate::formula::{
        EntityKind, EntityLookup, ExpressionNode, FormulaContext, FormulaError, FormulaVariables,
        NumericFormula, NoEntities,
    };
    pub use crate::serialize::{
        diff_save_ids, reconcile_save_against_ids, validate_serialized, IdDiff, ReconcileReport,
        SerializedResourceState,
    };
    pub use crate::store::{
        PublishGuardState, PublishView, RecorderSnapshot, ResourceSpec, ResourceStore,
        SnapshotGuardMode, StoreError, FLAG_DIRTY, FLAG_UNLOCKED, FLAG_VISIBLE,
    };
    pub use crate::telemetry::{MemoryTelemetry, NullTelemetry, Telemetry};
}
