//! Content-pack validation pipeline.
//!
//! [`Validator::parse`] consumes a raw JSON value and produces a
//! [`ValidationOutcome`]: either a frozen
//! [`NormalizedContentPack`](crate::normalize::NormalizedContentPack) plus
//! warnings, or the aggregated error list. The pipeline runs in stages:
//!
//! 1. **Structural refinement** -- strict deserialization, id/tag grammar,
//!    numeric ranges, per-mode transform invariants.
//! 2. **Collection refinement** -- duplicate ids, reference existence,
//!    engine range + feature gates, runtime-event namespace collisions, safe
//!    relative asset paths, flag/script allowlists.
//! 3. **Semantic refinement** -- unlock-graph cycles, transform-graph cycles
//!    with profitability analysis, localization coverage, balance probes.
//! 4. **Normalization** -- sort, dedupe, freeze, compute the digest.
//!
//! Stages never fail fast; every issue is aggregated so a pack author sees
//! the full picture in one run. An optional [`ValidationCache`] short-cuts
//! repeat validations of byte-identical packs.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use perpetua_core::condition::{Condition, ReferenceResolver};

use crate::balance::{run_balance_probes, BalanceOptions};
use crate::cache::{fingerprint, CachedValidation, ValidationCache};
use crate::graph::{analyze_transform_cycles, detect_unlock_cycles, TransformCycleKind};
use crate::issues::{codes, Severity, ValidationIssue};
use crate::normalize::{normalize_pack, NormalizedContentPack};
use crate::pack::{
    AchievementReward, AchievementTrack, AutomationTargetKind, ContentPack, LocalizedText,
    MetricSource, RetentionKind, TransformMode, TransformTrigger, UpgradeEffect,
};

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Flags and scripts the host promises to provide at runtime.
#[derive(Debug, Clone, Default)]
pub struct Allowlist {
    pub flags: BTreeSet<String>,
    pub scripts: BTreeSet<String>,
}

/// Validator configuration.
#[derive(Debug, Default)]
pub struct ValidatorOptions {
    /// Optional fingerprint cache for repeat validations.
    pub cache: Option<ValidationCache>,
    pub balance: BalanceOptions,
    /// Module name -> engine range the pack must target to use the module
    /// (e.g. `"transforms" -> ">=1.4.0"`).
    pub feature_gates: BTreeMap<String, semver::VersionReq>,
    /// Host-provided runtime event names; pack events must not collide.
    pub runtime_events_catalog: Vec<String>,
    pub allowlist: Allowlist,
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// Result of validating a raw pack.
#[derive(Debug, Clone)]
pub enum ValidationOutcome {
    Validated {
        pack: Arc<NormalizedContentPack>,
        warnings: Vec<ValidationIssue>,
    },
    Invalid {
        errors: Vec<ValidationIssue>,
        warnings: Vec<ValidationIssue>,
    },
}

impl ValidationOutcome {
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Validated { .. })
    }

    /// The normalized pack, when validation succeeded.
    pub fn pack(&self) -> Option<&Arc<NormalizedContentPack>> {
        match self {
            Self::Validated { pack, .. } => Some(pack),
            Self::Invalid { .. } => None,
        }
    }

    pub fn errors(&self) -> &[ValidationIssue] {
        match self {
            Self::Validated { .. } => &[],
            Self::Invalid { errors, .. } => errors,
        }
    }

    pub fn warnings(&self) -> &[ValidationIssue] {
        match self {
            Self::Validated { warnings, .. } | Self::Invalid { warnings, .. } => warnings,
        }
    }
}

// ---------------------------------------------------------------------------
// Validator
// ---------------------------------------------------------------------------

/// The content-pack validator.
pub struct Validator {
    options: ValidatorOptions,
}

impl Validator {
    pub fn new(options: ValidatorOptions) -> Self {
        Self { options }
    }

    pub fn with_defaults() -> Self {
        Self::new(ValidatorOptions::default())
    }

    /// Cache statistics, when a cache is installed.
    pub fn cache(&self) -> Option<&ValidationCache> {
        self.options.cache.as_ref()
    }

    /// Validate a raw pack value.
    pub fn parse(&mut self, raw: &serde_json::Value) -> ValidationOutcome {
        let key = self.options.cache.as_ref().map(|_| fingerprint(raw));
        if let (Some(cache), Some(key)) = (self.options.cache.as_mut(), key.as_ref()) {
            if let Some(hit) = cache.get(key) {
                tracing::debug!(fingerprint = %key, "validation cache hit");
                return match hit.pack {
                    Some(pack) => ValidationOutcome::Validated {
                        pack,
                        warnings: hit.warnings,
                    },
                    None => ValidationOutcome::Invalid {
                        errors: hit.errors,
                        warnings: hit.warnings,
                    },
                };
            }
        }

        let outcome = self.run_pipeline(raw);

        if let (Some(cache), Some(key)) = (self.options.cache.as_mut(), key) {
            let entry = match &outcome {
                ValidationOutcome::Validated { pack, warnings } => CachedValidation {
                    pack: Some(Arc::clone(pack)),
                    errors: vec![],
                    warnings: warnings.clone(),
                },
                ValidationOutcome::Invalid { errors, warnings } => CachedValidation {
                    pack: None,
                    errors: errors.clone(),
                    warnings: warnings.clone(),
                },
            };
            cache.insert(key, entry);
        }

        outcome
    }

    fn run_pipeline(&self, raw: &serde_json::Value) -> ValidationOutcome {
        // Stage 1a: strict deserialization. Failures here are terminal; the
        // later stages need a typed pack to inspect.
        let pack: ContentPack = match serde_json::from_value(raw.clone()) {
            Ok(pack) => pack,
            Err(error) => {
                return ValidationOutcome::Invalid {
                    errors: vec![ValidationIssue::error(
                        codes::STRUCTURE_INVALID,
                        "",
                        format!("pack failed structural validation: {error}"),
                    )],
                    warnings: vec![],
                };
            }
        };

        let mut issues: Vec<ValidationIssue> = Vec::new();

        // Stage 1b: grammar and ranges.
        refine_ids(&pack, &mut issues);
        refine_ranges(&pack, &mut issues);

        // Stage 2: collection refinements.
        let engine = refine_engine(&pack, &self.options.feature_gates, &mut issues);
        refine_references(&pack, &self.options.runtime_events_catalog, &mut issues);
        refine_event_namespace(&pack, &self.options.runtime_events_catalog, &mut issues);
        refine_asset_paths(&pack, &mut issues);
        refine_allowlists(&pack, &self.options.allowlist, &mut issues);

        // Stage 3: semantics.
        for cycle in detect_unlock_cycles(&pack) {
            issues.push(ValidationIssue::error(
                codes::CYCLE_UNLOCK,
                "",
                format!("unlock conditions form a cycle: {}", cycle.join(" -> ")),
            ));
        }
        for issue in analyze_transform_cycles(&pack.transforms) {
            let path = format!("transforms[{}]", issue.cycle.join(" -> "));
            match issue.kind {
                TransformCycleKind::Profitable { ratio } => {
                    issues.push(ValidationIssue::error(
                        codes::TRANSFORM_CYCLE_PROFITABLE,
                        path,
                        format!(
                            "transform cycle multiplies resources by {ratio:.6} per pass"
                        ),
                    ));
                }
                TransformCycleKind::Unevaluable => {
                    issues.push(
                        ValidationIssue::error(
                            codes::TRANSFORM_CYCLE_UNEVALUABLE,
                            path,
                            "transform cycle cannot be statically bounded",
                        )
                        .with_suggestion(
                            "cycles must use single constant-amount inputs and outputs",
                        ),
                    );
                }
            }
        }
        refine_localization(&pack, &mut issues);

        let resolver = PackReferenceResolver { pack: &pack };
        issues.extend(run_balance_probes(&pack, &self.options.balance, &resolver));

        // Partition and decide.
        let (errors, warnings): (Vec<_>, Vec<_>) = issues
            .into_iter()
            .partition(|issue| issue.severity == Severity::Error);

        if errors.is_empty() {
            let engine = engine.expect("engine parses when no errors were recorded");
            ValidationOutcome::Validated {
                pack: normalize_pack(pack, engine),
                warnings,
            }
        } else {
            tracing::debug!(errors = errors.len(), "pack validation failed");
            ValidationOutcome::Invalid { errors, warnings }
        }
    }
}

// ---------------------------------------------------------------------------
// Reference resolver over the raw pack
// ---------------------------------------------------------------------------

/// Resolves indirect condition references against pack structure.
pub struct PackReferenceResolver<'a> {
    pub pack: &'a ContentPack,
}

impl ReferenceResolver for PackReferenceResolver<'_> {
    fn produced_resources(&self, generator_id: &str) -> Vec<String> {
        self.pack
            .generators
            .iter()
            .find(|g| g.id == generator_id)
            .map(|g| g.produces.iter().map(|f| f.resource_id.clone()).collect())
            .unwrap_or_default()
    }

    fn unlocked_resources_of_upgrade(&self, upgrade_id: &str) -> Vec<String> {
        self.pack
            .upgrades
            .iter()
            .find(|u| u.id == upgrade_id)
            .map(|u| {
                u.effects
                    .iter()
                    .filter_map(|e| match e {
                        UpgradeEffect::UnlockResource { resource_id } => {
                            Some(resource_id.clone())
                        }
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    fn resources_for_flag(&self, flag_id: &str) -> Vec<String> {
        let mut resources = BTreeSet::new();
        for upgrade in &self.pack.upgrades {
            let grants = upgrade.effects.iter().any(|e| {
                matches!(e, UpgradeEffect::GrantFlag { flag_id: f, .. } if f == flag_id)
            });
            if grants {
                for effect in &upgrade.effects {
                    if let UpgradeEffect::UnlockResource { resource_id } = effect {
                        resources.insert(resource_id.clone());
                    }
                }
            }
        }
        resources.into_iter().collect()
    }
}

// ---------------------------------------------------------------------------
// Stage 1: grammar and ranges
// ---------------------------------------------------------------------------

/// Id/tag grammar: lowercase alphanumeric start, then `[a-z0-9-_]`.
fn is_valid_id(id: &str) -> bool {
    let mut chars = id.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() || c.is_ascii_digit() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
}

fn check_collection_ids<'a>(
    collection: &str,
    ids: impl Iterator<Item = &'a str>,
    issues: &mut Vec<ValidationIssue>,
) {
    let mut seen: HashSet<&str> = HashSet::new();
    for (index, id) in ids.enumerate() {
        let path = format!("{collection}[{index}].id");
        if !is_valid_id(id) {
            issues.push(
                ValidationIssue::error(
                    codes::ID_INVALID,
                    path.clone(),
                    format!("invalid id '{id}'"),
                )
                .with_suggestion("ids are lowercase alphanumeric with '-' or '_'"),
            );
        }
        if !seen.insert(id) {
            issues.push(ValidationIssue::error(
                codes::ID_DUPLICATE,
                path,
                format!("duplicate id '{id}' in {collection}"),
            ));
        }
    }
}

fn refine_ids(pack: &ContentPack, issues: &mut Vec<ValidationIssue>) {
    check_collection_ids("resources", pack.resources.iter().map(|r| r.id.as_str()), issues);
    check_collection_ids(
        "generators",
        pack.generators.iter().map(|g| g.id.as_str()),
        issues,
    );
    check_collection_ids("upgrades", pack.upgrades.iter().map(|u| u.id.as_str()), issues);
    check_collection_ids(
        "achievements",
        pack.achievements.iter().map(|a| a.id.as_str()),
        issues,
    );
    check_collection_ids(
        "prestigeLayers",
        pack.prestige_layers.iter().map(|p| p.id.as_str()),
        issues,
    );
    check_collection_ids(
        "transforms",
        pack.transforms.iter().map(|t| t.id.as_str()),
        issues,
    );
    check_collection_ids(
        "automations",
        pack.automations.iter().map(|a| a.id.as_str()),
        issues,
    );
    check_collection_ids("metrics", pack.metrics.iter().map(|m| m.id.as_str()), issues);
    check_collection_ids(
        "runtimeEvents",
        pack.runtime_events.iter().map(|e| e.id.as_str()),
        issues,
    );

    // Tags share the id grammar.
    let tag_sets = pack
        .resources
        .iter()
        .enumerate()
        .map(|(i, r)| (format!("resources[{i}]"), &r.tags))
        .chain(
            pack.generators
                .iter()
                .enumerate()
                .map(|(i, g)| (format!("generators[{i}]"), &g.tags)),
        )
        .chain(
            pack.upgrades
                .iter()
                .enumerate()
                .map(|(i, u)| (format!("upgrades[{i}]"), &u.tags)),
        );
    for (path, tags) in tag_sets {
        for tag in tags {
            if !is_valid_id(tag) {
                issues.push(ValidationIssue::error(
                    codes::ID_INVALID,
                    format!("{path}.tags"),
                    format!("invalid tag '{tag}'"),
                ));
            }
        }
    }
}

fn refine_ranges(pack: &ContentPack, issues: &mut Vec<ValidationIssue>) {
    for (i, resource) in pack.resources.iter().enumerate() {
        let path = format!("resources[{i}]");
        if resource.tier < 1 {
            issues.push(ValidationIssue::error(
                codes::STRUCTURE_INVALID,
                format!("{path}.tier"),
                "tier must be at least 1",
            ));
        }
        if !(resource.start_amount.is_finite() && resource.start_amount >= 0.0) {
            issues.push(ValidationIssue::error(
                codes::STRUCTURE_INVALID,
                format!("{path}.startAmount"),
                "start amount must be finite and non-negative",
            ));
        }
        if let Some(capacity) = resource.capacity {
            if !(capacity.is_finite() && capacity >= 0.0) {
                issues.push(ValidationIssue::error(
                    codes::STRUCTURE_INVALID,
                    format!("{path}.capacity"),
                    "capacity must be finite and non-negative",
                ));
            }
        }
        if let Some(tolerance) = resource.dirty_tolerance {
            if !(tolerance > 0.0 && tolerance <= 0.5) {
                issues.push(ValidationIssue::error(
                    codes::STRUCTURE_INVALID,
                    format!("{path}.dirtyTolerance"),
                    "dirty tolerance must be in (0, 0.5]",
                ));
            }
        }
    }

    for (i, generator) in pack.generators.iter().enumerate() {
        let path = format!("generators[{i}]");
        if let Some(max_level) = generator.max_level {
            if generator.initial_level > max_level {
                issues.push(ValidationIssue::error(
                    codes::STRUCTURE_INVALID,
                    format!("{path}.initialLevel"),
                    "initial level exceeds max level",
                ));
            }
        }
        for (ci, entry) in generator.purchase.entries().iter().enumerate() {
            if !(entry.cost_multiplier.is_finite() && entry.cost_multiplier >= 0.0) {
                issues.push(ValidationIssue::error(
                    codes::STRUCTURE_INVALID,
                    format!("{path}.purchase.costs[{ci}].costMultiplier"),
                    "cost multiplier must be finite and non-negative",
                ));
            }
        }
    }

    for (i, transform) in pack.transforms.iter().enumerate() {
        let path = format!("transforms[{i}]");
        let needs_duration = matches!(
            transform.mode,
            TransformMode::Batch | TransformMode::Mission
        );
        match transform.duration {
            None if needs_duration => {
                issues.push(ValidationIssue::error(
                    codes::TRANSFORM_DURATION_MISSING,
                    format!("{path}.duration"),
                    format!("{:?} transforms require a duration", transform.mode),
                ));
            }
            Some(duration) if !(duration.is_finite() && duration > 0.0) => {
                issues.push(ValidationIssue::error(
                    codes::STRUCTURE_INVALID,
                    format!("{path}.duration"),
                    "duration must be finite and positive",
                ));
            }
            _ => {}
        }
        if let Some(cooldown) = transform.cooldown {
            if !(cooldown.is_finite() && cooldown >= 0.0) {
                issues.push(ValidationIssue::error(
                    codes::STRUCTURE_INVALID,
                    format!("{path}.cooldown"),
                    "cooldown must be finite and non-negative",
                ));
            }
        }
        if transform.mode == TransformMode::Mission
            && (transform.entity_requirements.is_empty() || transform.outcomes.is_empty())
        {
            issues.push(ValidationIssue::error(
                codes::TRANSFORM_MISSION_INCOMPLETE,
                path.clone(),
                "mission transforms require entityRequirements and outcomes",
            ));
        }
        for (oi, outcome) in transform.outcomes.iter().enumerate() {
            if !(outcome.weight.is_finite() && outcome.weight > 0.0) {
                issues.push(ValidationIssue::error(
                    codes::STRUCTURE_INVALID,
                    format!("{path}.outcomes[{oi}].weight"),
                    "outcome weight must be finite and positive",
                ));
            }
        }
        if let TransformTrigger::Interval { seconds } = &transform.trigger {
            if !(seconds.is_finite() && *seconds > 0.0) {
                issues.push(ValidationIssue::error(
                    codes::STRUCTURE_INVALID,
                    format!("{path}.trigger.seconds"),
                    "interval must be finite and positive",
                ));
            }
        }
    }

    for (i, automation) in pack.automations.iter().enumerate() {
        if let Some(seconds) = automation.interval_seconds {
            if !(seconds.is_finite() && seconds > 0.0) {
                issues.push(ValidationIssue::error(
                    codes::STRUCTURE_INVALID,
                    format!("automations[{i}].intervalSeconds"),
                    "interval must be finite and positive",
                ));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Stage 2: engine range and feature gates
// ---------------------------------------------------------------------------

/// Lowest engine version the pack's range admits, approximated from its
/// lower-bound comparators.
fn minimum_declared_version(req: &semver::VersionReq) -> Option<semver::Version> {
    use semver::Op;
    req.comparators
        .iter()
        .filter_map(|c| match c.op {
            Op::Exact | Op::Greater | Op::GreaterEq | Op::Caret | Op::Tilde | Op::Wildcard => {
                Some(semver::Version::new(
                    c.major,
                    c.minor.unwrap_or(0),
                    c.patch.unwrap_or(0),
                ))
            }
            _ => None,
        })
        .max()
}

fn refine_engine(
    pack: &ContentPack,
    feature_gates: &BTreeMap<String, semver::VersionReq>,
    issues: &mut Vec<ValidationIssue>,
) -> Option<semver::VersionReq> {
    let engine = match semver::VersionReq::parse(&pack.engine) {
        Ok(req) => req,
        Err(error) => {
            issues.push(ValidationIssue::error(
                codes::ENGINE_RANGE_INVALID,
                "engine",
                format!("engine range '{}' does not parse: {error}", pack.engine),
            ));
            return None;
        }
    };

    let modules_in_use: Vec<&str> = [
        (!pack.transforms.is_empty()).then_some("transforms"),
        (!pack.automations.is_empty()).then_some("automations"),
        (!pack.prestige_layers.is_empty()).then_some("prestige"),
        (!pack.achievements.is_empty()).then_some("achievements"),
        (!pack.metrics.is_empty()).then_some("metrics"),
    ]
    .into_iter()
    .flatten()
    .collect();

    let declared_minimum = minimum_declared_version(&engine);
    for module in modules_in_use {
        let Some(gate) = feature_gates.get(module) else {
            continue;
        };
        let covered = declared_minimum
            .as_ref()
            .is_some_and(|minimum| gate.matches(minimum));
        if !covered {
            issues.push(
                ValidationIssue::error(
                    codes::FEATURE_GATE_VIOLATION,
                    format!("{module}"),
                    format!(
                        "module '{module}' requires engine {gate}, but the pack declares '{}'",
                        pack.engine
                    ),
                )
                .with_suggestion(format!("declare an engine range within {gate}")),
            );
        }
    }

    Some(engine)
}

// ---------------------------------------------------------------------------
// Stage 2: reference existence
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RefKind {
    Resource,
    Generator,
    Upgrade,
    Automation,
    Transform,
    PrestigeLayer,
    Metric,
    Event,
}

fn collect_condition_refs(condition: &Condition, out: &mut Vec<(RefKind, String)>) {
    match condition {
        Condition::ResourceThreshold { resource_id, .. } => {
            out.push((RefKind::Resource, resource_id.clone()));
        }
        Condition::GeneratorLevel { id, .. } => out.push((RefKind::Generator, id.clone())),
        Condition::UpgradeOwned { id, .. } => out.push((RefKind::Upgrade, id.clone())),
        Condition::PrestigeUnlocked { id }
        | Condition::PrestigeCountThreshold { id, .. }
        | Condition::PrestigeCompleted { id } => {
            out.push((RefKind::PrestigeLayer, id.clone()));
        }
        Condition::AllOf { conditions } | Condition::AnyOf { conditions } => {
            for c in conditions {
                collect_condition_refs(c, out);
            }
        }
        Condition::Not { condition } => collect_condition_refs(condition, out),
        Condition::Always
        | Condition::Never
        | Condition::Flag { .. }
        | Condition::Script { .. } => {}
    }
}

fn refine_references(
    pack: &ContentPack,
    events_catalog: &[String],
    issues: &mut Vec<ValidationIssue>,
) {
    let resources: HashSet<&str> = pack.resources.iter().map(|r| r.id.as_str()).collect();
    let generators: HashSet<&str> = pack.generators.iter().map(|g| g.id.as_str()).collect();
    let upgrades: HashSet<&str> = pack.upgrades.iter().map(|u| u.id.as_str()).collect();
    let automations: HashSet<&str> = pack.automations.iter().map(|a| a.id.as_str()).collect();
    let transforms: HashSet<&str> = pack.transforms.iter().map(|t| t.id.as_str()).collect();
    let layers: HashSet<&str> = pack.prestige_layers.iter().map(|p| p.id.as_str()).collect();
    let metrics: HashSet<&str> = pack.metrics.iter().map(|m| m.id.as_str()).collect();
    let events: HashSet<&str> = pack
        .runtime_events
        .iter()
        .map(|e| e.id.as_str())
        .chain(events_catalog.iter().map(String::as_str))
        .collect();

    let mut refs: Vec<(RefKind, String, String)> = Vec::new();
    let mut push_condition =
        |refs: &mut Vec<(RefKind, String, String)>, cond: Option<&Condition>, path: String| {
            let Some(cond) = cond else { return };
            let mut collected = Vec::new();
            collect_condition_refs(cond, &mut collected);
            for (kind, id) in collected {
                refs.push((kind, id, path.clone()));
            }
        };

    for (i, resource) in pack.resources.iter().enumerate() {
        push_condition(
            &mut refs,
            resource.unlock_condition.as_ref(),
            format!("resources[{i}].unlockCondition"),
        );
        push_condition(
            &mut refs,
            resource.visibility_condition.as_ref(),
            format!("resources[{i}].visibilityCondition"),
        );
    }

    for (i, generator) in pack.generators.iter().enumerate() {
        let path = format!("generators[{i}]");
        for (fi, flow) in generator.produces.iter().enumerate() {
            refs.push((
                RefKind::Resource,
                flow.resource_id.clone(),
                format!("{path}.produces[{fi}]"),
            ));
        }
        for (fi, flow) in generator.consumes.iter().enumerate() {
            refs.push((
                RefKind::Resource,
                flow.resource_id.clone(),
                format!("{path}.consumes[{fi}]"),
            ));
        }
        for (ci, entry) in generator.purchase.entries().iter().enumerate() {
            refs.push((
                RefKind::Resource,
                entry.resource_id.clone(),
                format!("{path}.purchase.costs[{ci}]"),
            ));
        }
        push_condition(
            &mut refs,
            generator.base_unlock.as_ref(),
            format!("{path}.baseUnlock"),
        );
        push_condition(
            &mut refs,
            generator.visibility_condition.as_ref(),
            format!("{path}.visibilityCondition"),
        );
    }

    for (i, upgrade) in pack.upgrades.iter().enumerate() {
        let path = format!("upgrades[{i}]");
        for (ci, cost) in upgrade.cost.iter().enumerate() {
            refs.push((
                RefKind::Resource,
                cost.resource_id.clone(),
                format!("{path}.cost[{ci}]"),
            ));
        }
        for (ei, effect) in upgrade.effects.iter().enumerate() {
            let effect_path = format!("{path}.effects[{ei}]");
            match effect {
                UpgradeEffect::ModifyResourceRate { resource_id, .. }
                | UpgradeEffect::ModifyResourceCapacity { resource_id, .. }
                | UpgradeEffect::UnlockResource { resource_id }
                | UpgradeEffect::SetDirtyTolerance { resource_id, .. } => {
                    refs.push((RefKind::Resource, resource_id.clone(), effect_path));
                }
                UpgradeEffect::ModifyGeneratorRate { generator_id, .. }
                | UpgradeEffect::ModifyGeneratorCost { generator_id, .. }
                | UpgradeEffect::ModifyGeneratorConsumption { generator_id, .. }
                | UpgradeEffect::UnlockGenerator { generator_id } => {
                    refs.push((RefKind::Generator, generator_id.clone(), effect_path));
                }
                UpgradeEffect::ModifyGeneratorResourceConsumption {
                    generator_id,
                    resource_id,
                    ..
                } => {
                    refs.push((
                        RefKind::Generator,
                        generator_id.clone(),
                        effect_path.clone(),
                    ));
                    refs.push((RefKind::Resource, resource_id.clone(), effect_path));
                }
                UpgradeEffect::UnlockAutomation { automation_id } => {
                    refs.push((RefKind::Automation, automation_id.clone(), effect_path));
                }
                UpgradeEffect::GrantFlag { .. } => {}
            }
        }
        for (pi, prerequisite) in upgrade.prerequisites.iter().enumerate() {
            push_condition(
                &mut refs,
                Some(prerequisite),
                format!("{path}.prerequisites[{pi}]"),
            );
        }
        push_condition(
            &mut refs,
            upgrade.unlock_condition.as_ref(),
            format!("{path}.unlockCondition"),
        );
        push_condition(
            &mut refs,
            upgrade.visibility_condition.as_ref(),
            format!("{path}.visibilityCondition"),
        );
    }

    for (i, achievement) in pack.achievements.iter().enumerate() {
        let path = format!("achievements[{i}]");
        match &achievement.track {
            AchievementTrack::Resource { resource_id } => {
                refs.push((RefKind::Resource, resource_id.clone(), format!("{path}.track")));
            }
            AchievementTrack::GeneratorLevel { generator_id } => {
                refs.push((
                    RefKind::Generator,
                    generator_id.clone(),
                    format!("{path}.track"),
                ));
            }
            AchievementTrack::GeneratorCount { generator_id } => {
                if let Some(generator_id) = generator_id {
                    refs.push((
                        RefKind::Generator,
                        generator_id.clone(),
                        format!("{path}.track"),
                    ));
                }
            }
            AchievementTrack::UpgradeOwned { upgrade_id } => {
                refs.push((RefKind::Upgrade, upgrade_id.clone(), format!("{path}.track")));
            }
            AchievementTrack::CustomMetric { metric_id } => {
                refs.push((RefKind::Metric, metric_id.clone(), format!("{path}.track")));
            }
            AchievementTrack::Flag { .. } | AchievementTrack::Script { .. } => {}
        }
        if let Some(reward) = &achievement.reward {
            let reward_path = format!("{path}.reward");
            match reward {
                AchievementReward::GrantResource { resource_id, .. } => {
                    refs.push((RefKind::Resource, resource_id.clone(), reward_path));
                }
                AchievementReward::GrantUpgrade { upgrade_id } => {
                    refs.push((RefKind::Upgrade, upgrade_id.clone(), reward_path));
                }
                AchievementReward::UnlockAutomation { automation_id } => {
                    refs.push((RefKind::Automation, automation_id.clone(), reward_path));
                }
                AchievementReward::EmitEvent { event_id } => {
                    refs.push((RefKind::Event, event_id.clone(), reward_path));
                }
                AchievementReward::GrantFlag { .. } => {}
            }
        }
        for (ei, event) in achievement.on_unlock_events.iter().enumerate() {
            refs.push((
                RefKind::Event,
                event.clone(),
                format!("{path}.onUnlockEvents[{ei}]"),
            ));
        }
        push_condition(
            &mut refs,
            achievement.unlock_condition.as_ref(),
            format!("{path}.unlockCondition"),
        );
        push_condition(
            &mut refs,
            achievement.visibility_condition.as_ref(),
            format!("{path}.visibilityCondition"),
        );
    }

    for (i, layer) in pack.prestige_layers.iter().enumerate() {
        let path = format!("prestigeLayers[{i}]");
        for (ti, target) in layer.reset_targets.iter().enumerate() {
            refs.push((
                RefKind::Resource,
                target.clone(),
                format!("{path}.resetTargets[{ti}]"),
            ));
        }
        refs.push((
            RefKind::Resource,
            layer.reward.resource_id.clone(),
            format!("{path}.reward"),
        ));
        for (ri, retention) in layer.retention.iter().enumerate() {
            let kind = match retention.kind {
                RetentionKind::Resource => RefKind::Resource,
                RetentionKind::Upgrade => RefKind::Upgrade,
            };
            refs.push((kind, retention.id.clone(), format!("{path}.retention[{ri}]")));
        }
        if let Some(automation) = &layer.automation {
            refs.push((
                RefKind::Automation,
                automation.clone(),
                format!("{path}.automation"),
            ));
        }
        push_condition(
            &mut refs,
            Some(&layer.unlock_condition),
            format!("{path}.unlockCondition"),
        );
    }

    for (i, transform) in pack.transforms.iter().enumerate() {
        let path = format!("transforms[{i}]");
        for (fi, flow) in transform.inputs.iter().enumerate() {
            refs.push((
                RefKind::Resource,
                flow.resource_id.clone(),
                format!("{path}.inputs[{fi}]"),
            ));
        }
        for (fi, flow) in transform.outputs.iter().enumerate() {
            refs.push((
                RefKind::Resource,
                flow.resource_id.clone(),
                format!("{path}.outputs[{fi}]"),
            ));
        }
        for (oi, outcome) in transform.outcomes.iter().enumerate() {
            for (fi, flow) in outcome.outputs.iter().enumerate() {
                refs.push((
                    RefKind::Resource,
                    flow.resource_id.clone(),
                    format!("{path}.outcomes[{oi}].outputs[{fi}]"),
                ));
            }
        }
        if let TransformTrigger::Auto { condition } = &transform.trigger {
            push_condition(&mut refs, Some(condition), format!("{path}.trigger"));
        }
    }

    for (i, automation) in pack.automations.iter().enumerate() {
        let path = format!("automations[{i}].target");
        let kind = match automation.target.kind {
            AutomationTargetKind::GeneratorPurchase => RefKind::Generator,
            AutomationTargetKind::TransformTrigger => RefKind::Transform,
        };
        refs.push((kind, automation.target.id.clone(), path));
        push_condition(
            &mut refs,
            automation.unlock_condition.as_ref(),
            format!("automations[{i}].unlockCondition"),
        );
    }

    for (i, metric) in pack.metrics.iter().enumerate() {
        match &metric.source {
            MetricSource::ResourceLifetimeTotal { resource_id } => {
                refs.push((
                    RefKind::Resource,
                    resource_id.clone(),
                    format!("metrics[{i}].source"),
                ));
            }
            MetricSource::RuntimeCounter {
                event_id: Some(event_id),
            } => {
                refs.push((RefKind::Event, event_id.clone(), format!("metrics[{i}].source")));
            }
            _ => {}
        }
    }

    for (kind, id, path) in refs {
        let (known, label) = match kind {
            RefKind::Resource => (resources.contains(id.as_str()), "resource"),
            RefKind::Generator => (generators.contains(id.as_str()), "generator"),
            RefKind::Upgrade => (upgrades.contains(id.as_str()), "upgrade"),
            RefKind::Automation => (automations.contains(id.as_str()), "automation"),
            RefKind::Transform => (transforms.contains(id.as_str()), "transform"),
            RefKind::PrestigeLayer => (layers.contains(id.as_str()), "prestige layer"),
            RefKind::Metric => (metrics.contains(id.as_str()), "metric"),
            RefKind::Event => (events.contains(id.as_str()), "runtime event"),
        };
        if !known {
            issues.push(ValidationIssue::error(
                codes::REFERENCE_MISSING,
                path,
                format!("unknown {label} '{id}'"),
            ));
        }
    }
}

// ---------------------------------------------------------------------------
// Stage 2: events, paths, allowlists
// ---------------------------------------------------------------------------

fn refine_event_namespace(
    pack: &ContentPack,
    catalog: &[String],
    issues: &mut Vec<ValidationIssue>,
) {
    let catalog: HashSet<&str> = catalog.iter().map(String::as_str).collect();
    for (i, event) in pack.runtime_events.iter().enumerate() {
        if catalog.contains(event.id.as_str()) {
            issues.push(ValidationIssue::error(
                codes::EVENT_NAMESPACE_COLLISION,
                format!("runtimeEvents[{i}]"),
                format!("event '{}' collides with a host catalog event", event.id),
            ));
        }
    }
}

/// Asset paths must stay inside the pack: relative, forward slashes, no
/// parent traversal, no drive prefixes.
fn is_safe_relative_path(path: &str) -> bool {
    !path.is_empty()
        && !path.starts_with('/')
        && !path.contains('\\')
        && !path.contains(':')
        && !path.split('/').any(|segment| segment == ".." || segment.is_empty())
}

fn refine_asset_paths(pack: &ContentPack, issues: &mut Vec<ValidationIssue>) {
    let icons = pack
        .resources
        .iter()
        .enumerate()
        .filter_map(|(i, r)| r.icon.as_deref().map(|p| (format!("resources[{i}].icon"), p)))
        .chain(
            pack.generators.iter().enumerate().filter_map(|(i, g)| {
                g.icon.as_deref().map(|p| (format!("generators[{i}].icon"), p))
            }),
        )
        .chain(
            pack.upgrades.iter().enumerate().filter_map(|(i, u)| {
                u.icon.as_deref().map(|p| (format!("upgrades[{i}].icon"), p))
            }),
        )
        .chain(pack.achievements.iter().enumerate().filter_map(|(i, a)| {
            a.icon
                .as_deref()
                .map(|p| (format!("achievements[{i}].icon"), p))
        }));

    for (path, icon) in icons {
        if !is_safe_relative_path(icon) {
            issues.push(ValidationIssue::error(
                codes::PATH_UNSAFE,
                path,
                format!("asset path '{icon}' escapes the pack root"),
            ));
        }
    }
}

fn collect_condition_flags_scripts(
    condition: &Condition,
    flags: &mut BTreeSet<String>,
    scripts: &mut BTreeSet<String>,
) {
    match condition {
        Condition::Flag { flag_id } => {
            flags.insert(flag_id.clone());
        }
        Condition::Script { script_id } => {
            scripts.insert(script_id.clone());
        }
        Condition::AllOf { conditions } | Condition::AnyOf { conditions } => {
            for c in conditions {
                collect_condition_flags_scripts(c, flags, scripts);
            }
        }
        Condition::Not { condition } => {
            collect_condition_flags_scripts(condition, flags, scripts);
        }
        _ => {}
    }
}

fn refine_allowlists(
    pack: &ContentPack,
    allowlist: &Allowlist,
    issues: &mut Vec<ValidationIssue>,
) {
    let mut referenced_flags = BTreeSet::new();
    let mut referenced_scripts = BTreeSet::new();

    let all_conditions = pack
        .resources
        .iter()
        .flat_map(|r| [&r.unlock_condition, &r.visibility_condition])
        .chain(
            pack.generators
                .iter()
                .flat_map(|g| [&g.base_unlock, &g.visibility_condition]),
        )
        .chain(
            pack.upgrades
                .iter()
                .flat_map(|u| [&u.unlock_condition, &u.visibility_condition]),
        )
        .chain(
            pack.achievements
                .iter()
                .flat_map(|a| [&a.unlock_condition, &a.visibility_condition]),
        )
        .chain(pack.automations.iter().map(|a| &a.unlock_condition))
        .flatten();

    for condition in all_conditions {
        collect_condition_flags_scripts(condition, &mut referenced_flags, &mut referenced_scripts);
    }
    for upgrade in &pack.upgrades {
        for prerequisite in &upgrade.prerequisites {
            collect_condition_flags_scripts(
                prerequisite,
                &mut referenced_flags,
                &mut referenced_scripts,
            );
        }
    }
    for layer in &pack.prestige_layers {
        collect_condition_flags_scripts(
            &layer.unlock_condition,
            &mut referenced_flags,
            &mut referenced_scripts,
        );
    }
    for transform in &pack.transforms {
        if let TransformTrigger::Auto { condition } = &transform.trigger {
            collect_condition_flags_scripts(
                condition,
                &mut referenced_flags,
                &mut referenced_scripts,
            );
        }
    }
    for achievement in &pack.achievements {
        match &achievement.track {
            AchievementTrack::Flag { flag_id } => {
                referenced_flags.insert(flag_id.clone());
            }
            AchievementTrack::Script { script_id } => {
                referenced_scripts.insert(script_id.clone());
            }
            _ => {}
        }
    }

    // A flag is satisfiable if something in the pack can grant it or the
    // host allowlists it.
    let mut grantable: BTreeSet<&str> = allowlist.flags.iter().map(String::as_str).collect();
    for upgrade in &pack.upgrades {
        for effect in &upgrade.effects {
            if let UpgradeEffect::GrantFlag { flag_id, .. } = effect {
                grantable.insert(flag_id.as_str());
            }
        }
    }
    for achievement in &pack.achievements {
        if let Some(AchievementReward::GrantFlag { flag_id, .. }) = &achievement.reward {
            grantable.insert(flag_id.as_str());
        }
    }

    for flag in referenced_flags {
        if !grantable.contains(flag.as_str()) {
            issues.push(
                ValidationIssue::error(
                    codes::ALLOWLIST_FLAG,
                    "",
                    format!("flag '{flag}' is referenced but nothing can grant it"),
                )
                .with_suggestion("grant it via an upgrade/achievement or allowlist it"),
            );
        }
    }
    for script in referenced_scripts {
        if !allowlist.scripts.contains(&script) {
            issues.push(ValidationIssue::error(
                codes::ALLOWLIST_SCRIPT,
                "",
                format!("script '{script}' is not in the host allowlist"),
            ));
        }
    }
}

// ---------------------------------------------------------------------------
// Stage 3: localization
// ---------------------------------------------------------------------------

fn refine_localization(pack: &ContentPack, issues: &mut Vec<ValidationIssue>) {
    if pack.supported_locales.is_empty() {
        return;
    }

    let check = |path: String, text: &LocalizedText, issues: &mut Vec<ValidationIssue>| {
        if text.default.is_empty() {
            issues.push(ValidationIssue::error(
                codes::STRUCTURE_INVALID,
                path.clone(),
                "default text must be non-empty",
            ));
        }
        let missing: Vec<&str> = pack
            .supported_locales
            .iter()
            .filter(|locale| !text.variants.contains_key(*locale))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            issues.push(ValidationIssue::warning(
                codes::LOCALIZATION_MISSING,
                path,
                format!("missing locale variants: {}", missing.join(", ")),
            ));
        }
    };

    check("name".to_owned(), &pack.name, issues);
    for (i, r) in pack.resources.iter().enumerate() {
        check(format!("resources[{i}].name"), &r.name, issues);
    }
    for (i, g) in pack.generators.iter().enumerate() {
        check(format!("generators[{i}].name"), &g.name, issues);
    }
    for (i, u) in pack.upgrades.iter().enumerate() {
        check(format!("upgrades[{i}].name"), &u.name, issues);
    }
    for (i, a) in pack.achievements.iter().enumerate() {
        check(format!("achievements[{i}].name"), &a.name, issues);
    }
    for (i, p) in pack.prestige_layers.iter().enumerate() {
        check(format!("prestigeLayers[{i}].name"), &p.name, issues);
    }
    for (i, t) in pack.transforms.iter().enumerate() {
        check(format!("transforms[{i}].name"), &t.name, issues);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
