//! Perpetua Content -- content-pack model, validation, and normalization.
//!
//! A content pack is the declarative bundle that defines an idle game:
//! resources, generators, upgrades, achievements, prestige layers,
//! transforms, automations, metrics, and runtime events. This crate turns a
//! raw JSON pack into a frozen, reference-checked, cycle-free
//! [`NormalizedContentPack`](normalize::NormalizedContentPack) the engine
//! can trust blindly.
//!
//! # Modules
//!
//! - [`pack`]: the raw entity grammar (strict serde types).
//! - [`validator`]: the staged validation pipeline and its options.
//! - [`issues`]: the aggregated issue model with stable codes.
//! - [`graph`]: unlock-graph and transform-graph cycle analysis.
//! - [`balance`]: sampled rate/cost/prestige balance probes.
//! - [`normalize`]: sort/dedupe/freeze plus lookup maps and the digest.
//! - [`cache`]: fingerprint-keyed validation cache.

#![deny(unsafe_code)]

pub mod balance;
pub mod cache;
pub mod graph;
pub mod issues;
pub mod normalize;
pub mod pack;
pub mod validator;

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::balance::BalanceOptions;
    pub use crate::cache::{fingerprint, ValidationCache};
    pub use crate::issues::{codes, Severity, ValidationIssue};
    pub use crate::normalize::{NormalizedContentPack, PackLookup};
    pub use crate::pack::*;
    pub use crate::validator::{Allowlist, ValidationOutcome, Validator, ValidatorOptions};
}
