//! Raw content-pack data model.
//!
//! These types mirror the JSON entity grammar of a content pack exactly as
//! authored. Objects are strict: unknown fields fail deserialization. The
//! types here are *unvalidated* -- reference integrity, cycle freedom, and
//! balance are established by the [`validator`](crate::validator), which
//! produces a frozen [`NormalizedContentPack`](crate::normalize::NormalizedContentPack).

use std::collections::BTreeMap;

use perpetua_core::condition::Condition;
use perpetua_core::formula::NumericFormula;
use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

fn default_one_u32() -> u32 {
    1
}

fn default_one_f64() -> f64 {
    1.0
}

// ---------------------------------------------------------------------------
// LocalizedText
// ---------------------------------------------------------------------------

/// Localizable display text.
///
/// `default` must be non-empty; `variants` maps BCP-47 locale tags to
/// translations. Packs declaring `supportedLocales` should cover each locale
/// in every text; gaps are validation warnings, not errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LocalizedText {
    pub default: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub variants: BTreeMap<String, String>,
}

impl LocalizedText {
    /// Plain text with no variants.
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            default: text.into(),
            variants: BTreeMap::new(),
        }
    }

    /// Resolve for a locale, falling back to the default text.
    pub fn resolve(&self, locale: &str) -> &str {
        self.variants
            .get(locale)
            .map(String::as_str)
            .unwrap_or(&self.default)
    }
}

// ---------------------------------------------------------------------------
// ContentPack
// ---------------------------------------------------------------------------

/// A complete, unvalidated content pack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ContentPack {
    pub id: String,
    pub name: LocalizedText,
    /// The pack's own version string (free-form).
    pub version: String,
    /// Semver range over engine versions this pack supports.
    pub engine: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub supported_locales: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<Resource>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub generators: Vec<Generator>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub upgrades: Vec<Upgrade>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub achievements: Vec<Achievement>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub prestige_layers: Vec<PrestigeLayer>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transforms: Vec<Transform>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub automations: Vec<Automation>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub metrics: Vec<MetricDefinition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub runtime_events: Vec<RuntimeEventDefinition>,
}

// ---------------------------------------------------------------------------
// Resource
// ---------------------------------------------------------------------------

/// Resource category, for grouping in UIs and balance reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResourceCategory {
    Primary,
    Prestige,
    Automation,
    Currency,
    #[default]
    Misc,
}

/// A resource definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Resource {
    pub id: String,
    pub name: LocalizedText,
    #[serde(default)]
    pub category: ResourceCategory,
    /// Progression tier, 1-based.
    #[serde(default = "default_one_u32")]
    pub tier: u32,
    #[serde(default)]
    pub start_amount: f64,
    /// Absent means unbounded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity: Option<f64>,
    #[serde(default = "default_true")]
    pub unlocked: bool,
    #[serde(default = "default_true")]
    pub visible: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unlock_condition: Option<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visibility_condition: Option<Condition>,
    /// Display ordering among resources of the same tier.
    #[serde(default)]
    pub order: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dirty_tolerance: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Relative asset path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

// ---------------------------------------------------------------------------
// Generator
// ---------------------------------------------------------------------------

/// A single produced or consumed resource stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ResourceFlow {
    pub resource_id: String,
    /// Per-second rate per owned level, evaluated at `level = owned`.
    pub rate: NumericFormula,
}

/// One entry of a multi-currency purchase plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CostEntry {
    pub resource_id: String,
    #[serde(default = "default_one_f64")]
    pub cost_multiplier: f64,
    pub cost_curve: NumericFormula,
}

/// How a generator is purchased: a single currency with a cost curve, or a
/// list of per-resource cost entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PurchasePlan {
    #[serde(rename_all = "camelCase")]
    Single {
        currency_id: String,
        #[serde(default = "default_one_f64")]
        cost_multiplier: f64,
        cost_curve: NumericFormula,
    },
    Multi { costs: Vec<CostEntry> },
}

impl PurchasePlan {
    /// The cost entries of this plan, normalized to the multi-currency shape.
    pub fn entries(&self) -> Vec<CostEntry> {
        match self {
            Self::Single {
                currency_id,
                cost_multiplier,
                cost_curve,
            } => vec![CostEntry {
                resource_id: currency_id.clone(),
                cost_multiplier: *cost_multiplier,
                cost_curve: cost_curve.clone(),
            }],
            Self::Multi { costs } => costs.clone(),
        }
    }
}

/// A generator definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Generator {
    pub id: String,
    pub name: LocalizedText,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub produces: Vec<ResourceFlow>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub consumes: Vec<ResourceFlow>,
    pub purchase: PurchasePlan,
    #[serde(default)]
    pub initial_level: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_level: Option<u32>,
    /// Cap on bulk-purchase quote sizes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_bulk: Option<u32>,
    /// Absent means unlocked from the start.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_unlock: Option<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visibility_condition: Option<Condition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

// ---------------------------------------------------------------------------
// Upgrade
// ---------------------------------------------------------------------------

/// How a numeric effect composes with others targeting the same value.
/// Additive bonuses apply before the multiplier product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EffectOperation {
    #[default]
    Multiply,
    Add,
}

/// A single upgrade effect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase", deny_unknown_fields)]
pub enum UpgradeEffect {
    /// Scale (or add to) the net production rate of a resource.
    #[serde(rename_all = "camelCase")]
    ModifyResourceRate {
        resource_id: String,
        #[serde(default)]
        operation: EffectOperation,
        amount: NumericFormula,
    },
    /// Scale (or add to) a generator's production rates.
    #[serde(rename_all = "camelCase")]
    ModifyGeneratorRate {
        generator_id: String,
        #[serde(default)]
        operation: EffectOperation,
        amount: NumericFormula,
    },
    /// Scale a generator's purchase costs.
    #[serde(rename_all = "camelCase")]
    ModifyGeneratorCost {
        generator_id: String,
        amount: NumericFormula,
    },
    /// Scale a generator's consumption rates.
    #[serde(rename_all = "camelCase")]
    ModifyGeneratorConsumption {
        generator_id: String,
        amount: NumericFormula,
    },
    /// Scale a generator's consumption of one specific resource.
    #[serde(rename_all = "camelCase")]
    ModifyGeneratorResourceConsumption {
        generator_id: String,
        resource_id: String,
        amount: NumericFormula,
    },
    /// Override a resource's capacity.
    #[serde(rename_all = "camelCase")]
    ModifyResourceCapacity {
        resource_id: String,
        amount: NumericFormula,
    },
    #[serde(rename_all = "camelCase")]
    UnlockResource { resource_id: String },
    #[serde(rename_all = "camelCase")]
    UnlockGenerator { generator_id: String },
    #[serde(rename_all = "camelCase")]
    UnlockAutomation { automation_id: String },
    #[serde(rename_all = "camelCase")]
    GrantFlag { flag_id: String, value: bool },
    /// Override a resource's publish dirty tolerance.
    #[serde(rename_all = "camelCase")]
    SetDirtyTolerance { resource_id: String, value: f64 },
}

/// What an upgrade nominally applies to (display metadata; the effects list
/// is authoritative).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TargetRef {
    pub kind: TargetKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TargetKind {
    Resource,
    Generator,
    Automation,
    Global,
}

/// One resource cost of an upgrade purchase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct UpgradeCost {
    pub resource_id: String,
    /// Evaluated at `level = purchase index` for repeatable upgrades.
    pub amount: NumericFormula,
}

/// Repeat-purchase policy for an upgrade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RepeatablePolicy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_purchases: Option<u32>,
    /// Extra cost multiplier curve over the purchase index.
    pub cost_curve: NumericFormula,
}

/// An upgrade definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Upgrade {
    pub id: String,
    pub name: LocalizedText,
    #[serde(default)]
    pub category: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub targets: Vec<TargetRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cost: Vec<UpgradeCost>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub effects: Vec<UpgradeEffect>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub prerequisites: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeatable: Option<RepeatablePolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unlock_condition: Option<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visibility_condition: Option<Condition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

// ---------------------------------------------------------------------------
// Achievement
// ---------------------------------------------------------------------------

/// What state an achievement measures its progress against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase", deny_unknown_fields)]
pub enum AchievementTrack {
    #[serde(rename_all = "camelCase")]
    Resource { resource_id: String },
    #[serde(rename_all = "camelCase")]
    GeneratorLevel { generator_id: String },
    /// Total owned levels; across all generators when `generator_id` is
    /// absent.
    #[serde(rename_all = "camelCase")]
    GeneratorCount {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        generator_id: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    UpgradeOwned { upgrade_id: String },
    #[serde(rename_all = "camelCase")]
    Flag { flag_id: String },
    #[serde(rename_all = "camelCase")]
    Script { script_id: String },
    #[serde(rename_all = "camelCase")]
    CustomMetric { metric_id: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProgressMode {
    OneShot,
    Repeatable,
}

/// Repeatable-completion policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RepeatableProgress {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_repeats: Option<u32>,
    /// Steps until the achievement can complete again (minimum 1).
    #[serde(default)]
    pub reset_window: u64,
    /// Reward scale factor over the completion index.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reward_scaling: Option<NumericFormula>,
}

/// Achievement progress policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AchievementProgress {
    pub mode: ProgressMode,
    /// Completion target, evaluated at `level = completion count`.
    pub target: NumericFormula,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeatable: Option<RepeatableProgress>,
}

/// An achievement reward.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase", deny_unknown_fields)]
pub enum AchievementReward {
    #[serde(rename_all = "camelCase")]
    GrantResource {
        resource_id: String,
        amount: NumericFormula,
    },
    #[serde(rename_all = "camelCase")]
    GrantUpgrade { upgrade_id: String },
    #[serde(rename_all = "camelCase")]
    UnlockAutomation { automation_id: String },
    #[serde(rename_all = "camelCase")]
    GrantFlag { flag_id: String, value: bool },
    #[serde(rename_all = "camelCase")]
    EmitEvent { event_id: String },
}

/// An achievement definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Achievement {
    pub id: String,
    pub name: LocalizedText,
    #[serde(default)]
    pub category: String,
    #[serde(default = "default_one_u32")]
    pub tier: u32,
    pub track: AchievementTrack,
    pub progress: AchievementProgress,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unlock_condition: Option<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visibility_condition: Option<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reward: Option<AchievementReward>,
    /// Runtime events fired on every completion, reward or not.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub on_unlock_events: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

// ---------------------------------------------------------------------------
// PrestigeLayer
// ---------------------------------------------------------------------------

/// The reward granted on each prestige reset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PrestigeReward {
    pub resource_id: String,
    pub base_reward: f64,
    /// Scales the base reward by the prestige count; absent means 1.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multiplier_curve: Option<NumericFormula>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RetentionKind {
    Resource,
    Upgrade,
}

/// What survives a prestige reset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RetentionEntry {
    pub kind: RetentionKind,
    pub id: String,
    /// For resources: the retained amount cap; absent keeps everything.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
}

/// A prestige layer definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PrestigeLayer {
    pub id: String,
    pub name: LocalizedText,
    /// Resources zeroed by the reset.
    pub reset_targets: Vec<String>,
    pub unlock_condition: Condition,
    pub reward: PrestigeReward,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub retention: Vec<RetentionEntry>,
    /// Automation unlocked by the first reset of this layer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub automation: Option<String>,
}

// ---------------------------------------------------------------------------
// Transform
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TransformMode {
    Instant,
    Continuous,
    Batch,
    Mission,
}

/// What starts a transform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase", deny_unknown_fields)]
pub enum TransformTrigger {
    /// Fired only by an explicit host/automation request.
    Manual,
    /// Fires whenever the condition holds (and cooldown permits).
    Auto { condition: Condition },
    /// Fires on a fixed wall-time interval.
    Interval { seconds: f64 },
}

/// One input or output stream of a transform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TransformFlow {
    pub resource_id: String,
    /// Evaluated at `level = completion count`.
    pub amount: NumericFormula,
}

/// An entity a mission requires to launch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct EntityRequirement {
    pub kind: String,
    pub id: String,
    #[serde(default = "default_one_u32")]
    pub count: u32,
}

/// A weighted mission outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct MissionOutcome {
    pub id: String,
    pub weight: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<TransformFlow>,
}

/// A stage of a multi-stage mission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct MissionStage {
    pub id: String,
    /// Stage duration in seconds.
    pub duration: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outcomes: Vec<MissionOutcome>,
}

/// A transform definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Transform {
    pub id: String,
    pub name: LocalizedText,
    pub mode: TransformMode,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<TransformFlow>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<TransformFlow>,
    /// Seconds; required for `batch` and `mission` modes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    /// Seconds between firings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown: Option<f64>,
    pub trigger: TransformTrigger,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stages: Vec<MissionStage>,
    /// Required for `mission` mode.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entity_requirements: Vec<EntityRequirement>,
    /// Required for `mission` mode.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outcomes: Vec<MissionOutcome>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

// ---------------------------------------------------------------------------
// Automation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AutomationTargetKind {
    GeneratorPurchase,
    TransformTrigger,
}

/// What an automation drives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AutomationTarget {
    pub kind: AutomationTargetKind,
    pub id: String,
}

/// An automation definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Automation {
    pub id: String,
    pub name: LocalizedText,
    pub target: AutomationTarget,
    /// Seconds between automated actions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_seconds: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unlock_condition: Option<Condition>,
    #[serde(default)]
    pub enabled_by_default: bool,
}

// ---------------------------------------------------------------------------
// Metrics & runtime events
// ---------------------------------------------------------------------------

/// Where a metric's value comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase", deny_unknown_fields)]
pub enum MetricSource {
    /// Incremented each time the named runtime event fires; counts every
    /// event when `event_id` is absent.
    #[serde(rename_all = "camelCase")]
    RuntimeCounter {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        event_id: Option<String>,
    },
    /// Lifetime positive delta of a resource.
    #[serde(rename_all = "camelCase")]
    ResourceLifetimeTotal { resource_id: String },
    /// Sum of all generator levels.
    GeneratorLevelTotal,
}

/// A metric definition feeding the `customMetric` achievement track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct MetricDefinition {
    pub id: String,
    pub name: LocalizedText,
    pub source: MetricSource,
}

/// A pack-declared runtime event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RuntimeEventDefinition {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<LocalizedText>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
