//! Validation issue model.
//!
//! All refinement stages aggregate [`ValidationIssue`]s instead of failing
//! fast, so a pack author sees every problem in one pass. Codes are stable
//! dotted strings suitable for tooling; `path` is a JSON-pointer-ish
//! location into the pack.

use serde::{Deserialize, Serialize};

/// Stable issue codes.
pub mod codes {
    pub const STRUCTURE_INVALID: &str = "structure.invalid";
    pub const ID_INVALID: &str = "id.invalid";
    pub const ID_DUPLICATE: &str = "id.duplicate";
    pub const REFERENCE_MISSING: &str = "reference.missing";
    pub const ENGINE_RANGE_INVALID: &str = "engine.range.invalid";
    pub const FEATURE_GATE_VIOLATION: &str = "feature.gate.violation";
    pub const EVENT_NAMESPACE_COLLISION: &str = "event.namespace.collision";
    pub const PATH_UNSAFE: &str = "path.unsafe";
    pub const ALLOWLIST_FLAG: &str = "allowlist.flag";
    pub const ALLOWLIST_SCRIPT: &str = "allowlist.script";
    pub const CYCLE_UNLOCK: &str = "cycle.unlock";
    pub const TRANSFORM_CYCLE_PROFITABLE: &str = "transform.cycle.profitable";
    pub const TRANSFORM_CYCLE_UNEVALUABLE: &str = "transform.cycle.unevaluable";
    pub const TRANSFORM_DURATION_MISSING: &str = "transform.duration.missing";
    pub const TRANSFORM_MISSION_INCOMPLETE: &str = "transform.mission.incomplete";
    pub const LOCALIZATION_MISSING: &str = "localization.missing";
    pub const BALANCE_RATE_NEGATIVE: &str = "balance.rate.negative";
    pub const BALANCE_RATE_NON_FINITE: &str = "balance.rate.nonFinite";
    pub const BALANCE_RATE_EVALUATION_FAILED: &str = "balance.rate.evaluationFailed";
    pub const BALANCE_COST_NON_MONOTONIC: &str = "balance.cost.nonMonotonic";
    pub const BALANCE_COST_EXCEEDS_GROWTH_CAP: &str = "balance.cost.exceedsGrowthCap";
    pub const BALANCE_PRESTIGE_NEGATIVE: &str = "balance.prestige.negative";
    pub const BALANCE_PRESTIGE_NON_FINITE: &str = "balance.prestige.nonFinite";
    pub const BALANCE_UNLOCK_ORDERING: &str = "balance.unlock.ordering";
}

/// Issue severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Severity {
    Error,
    Warning,
}

/// A single validation finding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationIssue {
    /// Stable dotted code (see [`codes`]).
    pub code: String,
    pub message: String,
    /// Location within the pack, e.g. `generators[3].produces[0].rate`.
    pub path: String,
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl ValidationIssue {
    pub fn error(code: &str, path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.to_owned(),
            message: message.into(),
            path: path.into(),
            severity: Severity::Error,
            suggestion: None,
        }
    }

    pub fn warning(code: &str, path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.to_owned(),
            message: message.into(),
            path: path.into(),
            severity: Severity::Warning,
            suggestion: None,
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    /// Demote an error to a warning (the `warnOnly` balance switch).
    pub fn demoted(mut self) -> Self {
        self.severity = Severity::Warning;
        self
    }
}
