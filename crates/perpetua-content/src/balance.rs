//! Sampled balance probes over generators, upgrades, and prestige layers.
//!
//! Balance probes evaluate the pack's formulas at a range of purchase
//! indices and reject curves that would break the economy at runtime:
//! negative or non-finite rates, cost curves that decrease, and cost steps
//! that explode past the configured growth cap. Probes run only when the
//! validator's balance option is enabled; `warn_only` demotes their errors
//! to warnings.

use perpetua_core::condition::{Condition, ConditionEvaluator, ReferenceResolver};
use perpetua_core::formula::{FormulaContext, FormulaError, NumericFormula};

use crate::issues::{codes, ValidationIssue};
use crate::pack::ContentPack;

/// Tolerance for the cost monotonicity check.
const MONOTONIC_EPSILON: f64 = 1e-9;

/// Balance probe configuration.
#[derive(Debug, Clone)]
pub struct BalanceOptions {
    pub enabled: bool,
    /// Purchase indices sampled per curve, capped at 10 000.
    pub sample_size: usize,
    /// Maximum allowed ratio between consecutive cost steps.
    pub max_growth: f64,
    /// Demote balance errors to warnings.
    pub warn_only: bool,
}

impl Default for BalanceOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            sample_size: 100,
            max_growth: 20.0,
            warn_only: false,
        }
    }
}

impl BalanceOptions {
    /// Sample size clamped to the supported range.
    pub fn effective_sample_size(&self) -> usize {
        self.sample_size.clamp(1, 10_000)
    }

    /// Growth cap clamped to at least 1.
    pub fn effective_max_growth(&self) -> f64 {
        self.max_growth.max(1.0)
    }
}

/// Run all balance probes over a structurally valid pack.
pub fn run_balance_probes(
    pack: &ContentPack,
    options: &BalanceOptions,
    resolver: &dyn ReferenceResolver,
) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    if !options.enabled {
        return issues;
    }

    probe_generator_rates(pack, options, &mut issues);
    probe_generator_costs(pack, options, &mut issues);
    probe_upgrade_costs(pack, options, &mut issues);
    probe_prestige_rewards(pack, options, &mut issues);
    probe_unlock_ordering(pack, resolver, &mut issues);

    if options.warn_only {
        issues = issues
            .into_iter()
            .map(|issue| {
                if issue.code.starts_with("balance.") {
                    issue.demoted()
                } else {
                    issue
                }
            })
            .collect();
    }

    issues
}

// ---------------------------------------------------------------------------
// Rate probes
// ---------------------------------------------------------------------------

fn sample_bound(options: &BalanceOptions, max_level: Option<u32>) -> usize {
    let samples = options.effective_sample_size();
    match max_level {
        Some(max) => samples.min(max as usize + 1),
        None => samples,
    }
}

fn classify_rate_failure(path: &str, error: &FormulaError) -> ValidationIssue {
    match error {
        FormulaError::NonFinite { .. } => ValidationIssue::error(
            codes::BALANCE_RATE_NON_FINITE,
            path,
            format!("rate evaluates to a non-finite value: {error}"),
        ),
        _ => ValidationIssue::error(
            codes::BALANCE_RATE_EVALUATION_FAILED,
            path,
            format!("rate evaluation failed: {error}"),
        ),
    }
}

fn probe_generator_rates(
    pack: &ContentPack,
    options: &BalanceOptions,
    issues: &mut Vec<ValidationIssue>,
) {
    for (gi, generator) in pack.generators.iter().enumerate() {
        let samples = sample_bound(options, generator.max_level);
        let flows = generator
            .produces
            .iter()
            .enumerate()
            .map(|(fi, flow)| (format!("generators[{gi}].produces[{fi}].rate"), flow))
            .chain(
                generator
                    .consumes
                    .iter()
                    .enumerate()
                    .map(|(fi, flow)| (format!("generators[{gi}].consumes[{fi}].rate"), flow)),
            );

        for (path, flow) in flows {
            for level in 0..samples {
                match flow.rate.evaluate(&FormulaContext::at_level(level as f64)) {
                    Ok(rate) if rate < 0.0 => {
                        issues.push(ValidationIssue::error(
                            codes::BALANCE_RATE_NEGATIVE,
                            &path,
                            format!("rate is negative ({rate}) at level {level}"),
                        ));
                        break;
                    }
                    Ok(_) => {}
                    Err(error) => {
                        issues.push(classify_rate_failure(&path, &error));
                        break;
                    }
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Cost probes
// ---------------------------------------------------------------------------

/// Check a sampled cost sequence for monotonicity and growth-cap violations.
fn probe_cost_sequence(
    path: &str,
    curve: &NumericFormula,
    multiplier: f64,
    samples: usize,
    max_growth: f64,
    issues: &mut Vec<ValidationIssue>,
) {
    let mut previous: Option<f64> = None;
    for index in 0..samples {
        let cost = match curve.evaluate(&FormulaContext::at_level(index as f64)) {
            Ok(value) => multiplier * value,
            Err(error) => {
                issues.push(classify_rate_failure(path, &error));
                return;
            }
        };
        if !cost.is_finite() {
            issues.push(ValidationIssue::error(
                codes::BALANCE_RATE_NON_FINITE,
                path,
                format!("cost is non-finite at purchase index {index}"),
            ));
            return;
        }

        if let Some(prev) = previous {
            if cost < prev - MONOTONIC_EPSILON {
                issues.push(
                    ValidationIssue::error(
                        codes::BALANCE_COST_NON_MONOTONIC,
                        path,
                        format!(
                            "cost decreases from {prev} to {cost} at purchase index {index}"
                        ),
                    )
                    .with_suggestion("cost curves must be non-decreasing"),
                );
                return;
            }
            // Relative slack so a curve sitting exactly on the cap does not
            // trip on float rounding.
            if prev > 0.0 && cost > prev * max_growth * (1.0 + 1e-9) {
                issues.push(ValidationIssue::error(
                    codes::BALANCE_COST_EXCEEDS_GROWTH_CAP,
                    path,
                    format!(
                        "cost step {prev} -> {cost} at index {index} exceeds {max_growth}x growth"
                    ),
                ));
                return;
            }
        }
        previous = Some(cost);
    }
}

fn probe_generator_costs(
    pack: &ContentPack,
    options: &BalanceOptions,
    issues: &mut Vec<ValidationIssue>,
) {
    let max_growth = options.effective_max_growth();
    for (gi, generator) in pack.generators.iter().enumerate() {
        let samples = sample_bound(options, generator.max_level);
        for (ci, entry) in generator.purchase.entries().iter().enumerate() {
            let path = format!("generators[{gi}].purchase.costs[{ci}]");
            probe_cost_sequence(
                &path,
                &entry.cost_curve,
                entry.cost_multiplier,
                samples,
                max_growth,
                issues,
            );
        }
    }
}

fn probe_upgrade_costs(
    pack: &ContentPack,
    options: &BalanceOptions,
    issues: &mut Vec<ValidationIssue>,
) {
    let max_growth = options.effective_max_growth();
    for (ui, upgrade) in pack.upgrades.iter().enumerate() {
        let Some(repeatable) = &upgrade.repeatable else {
            continue;
        };
        let samples = sample_bound(options, repeatable.max_purchases);
        let path = format!("upgrades[{ui}].repeatable.costCurve");
        probe_cost_sequence(&path, &repeatable.cost_curve, 1.0, samples, max_growth, issues);
    }
}

// ---------------------------------------------------------------------------
// Prestige probes
// ---------------------------------------------------------------------------

fn probe_prestige_rewards(
    pack: &ContentPack,
    options: &BalanceOptions,
    issues: &mut Vec<ValidationIssue>,
) {
    for (pi, layer) in pack.prestige_layers.iter().enumerate() {
        let path = format!("prestigeLayers[{pi}].reward");
        if layer.reward.base_reward < 0.0 {
            issues.push(ValidationIssue::error(
                codes::BALANCE_PRESTIGE_NEGATIVE,
                &path,
                format!("base reward {} is negative", layer.reward.base_reward),
            ));
            continue;
        }

        let Some(curve) = &layer.reward.multiplier_curve else {
            continue;
        };
        for count in 0..options.effective_sample_size() {
            match curve.evaluate(&FormulaContext::at_level(count as f64)) {
                Ok(multiplier) if multiplier < 0.0 => {
                    issues.push(ValidationIssue::error(
                        codes::BALANCE_PRESTIGE_NEGATIVE,
                        &path,
                        format!("reward multiplier is negative at prestige count {count}"),
                    ));
                    break;
                }
                Ok(_) => {}
                Err(error) => {
                    issues.push(ValidationIssue::error(
                        codes::BALANCE_PRESTIGE_NON_FINITE,
                        &path,
                        format!("reward multiplier failed at prestige count {count}: {error}"),
                    ));
                    break;
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Unlock ordering
// ---------------------------------------------------------------------------

/// Warn when an entity's economy depends on a locked resource its own unlock
/// condition never references: the player can reach the entity while its
/// inputs are still locked.
fn probe_unlock_ordering(
    pack: &ContentPack,
    resolver: &dyn ReferenceResolver,
    issues: &mut Vec<ValidationIssue>,
) {
    let locked: std::collections::HashSet<&str> = pack
        .resources
        .iter()
        .filter(|r| !r.unlocked || r.unlock_condition.is_some())
        .map(|r| r.id.as_str())
        .collect();
    if locked.is_empty() {
        return;
    }

    let evaluator = ConditionEvaluator::default();
    let references_of = |condition: Option<&Condition>| -> std::collections::BTreeSet<String> {
        condition
            .map(|c| evaluator.resolve_references(c, resolver))
            .unwrap_or_default()
    };

    for (gi, generator) in pack.generators.iter().enumerate() {
        let own_refs = references_of(generator.base_unlock.as_ref());
        let mut dependencies: Vec<String> = generator
            .consumes
            .iter()
            .map(|f| f.resource_id.clone())
            .collect();
        dependencies.extend(
            generator
                .purchase
                .entries()
                .into_iter()
                .map(|e| e.resource_id),
        );

        for dependency in &dependencies {
            if locked.contains(dependency.as_str()) && !own_refs.contains(dependency) {
                issues.push(ValidationIssue::warning(
                    codes::BALANCE_UNLOCK_ORDERING,
                    format!("generators[{gi}]"),
                    format!(
                        "generator '{}' depends on locked resource '{dependency}' \
                         but its unlock condition never references it",
                        generator.id
                    ),
                ));
            }
        }
    }

    for (ui, upgrade) in pack.upgrades.iter().enumerate() {
        let own_refs = references_of(upgrade.unlock_condition.as_ref());
        for cost in &upgrade.cost {
            let dependency = cost.resource_id.as_str();
            if locked.contains(dependency) && !own_refs.contains(dependency) {
                issues.push(ValidationIssue::warning(
                    codes::BALANCE_UNLOCK_ORDERING,
                    format!("upgrades[{ui}]"),
                    format!(
                        "upgrade '{}' costs locked resource '{dependency}' \
                         but its unlock condition never references it",
                        upgrade.id
                    ),
                ));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pack::{
        Generator, LocalizedText, PurchasePlan, Resource, ResourceCategory, ResourceFlow,
    };
    use perpetua_core::condition::Comparator;
    use perpetua_core::formula::NumericFormula;

    struct NoResolver;

    impl ReferenceResolver for NoResolver {
        fn produced_resources(&self, _generator_id: &str) -> Vec<String> {
            vec![]
        }
        fn unlocked_resources_of_upgrade(&self, _upgrade_id: &str) -> Vec<String> {
            vec![]
        }
        fn resources_for_flag(&self, _flag_id: &str) -> Vec<String> {
            vec![]
        }
    }

    fn empty_pack() -> ContentPack {
        ContentPack {
            id: "test".to_owned(),
            name: LocalizedText::plain("Test"),
            version: "1.0.0".to_owned(),
            engine: ">=1.0.0".to_owned(),
            supported_locales: vec![],
            resources: vec![],
            generators: vec![],
            upgrades: vec![],
            achievements: vec![],
            prestige_layers: vec![],
            transforms: vec![],
            automations: vec![],
            metrics: vec![],
            runtime_events: vec![],
        }
    }

    fn generator(id: &str, rate: NumericFormula, cost_curve: NumericFormula) -> Generator {
        Generator {
            id: id.to_owned(),
            name: LocalizedText::plain(id),
            produces: vec![ResourceFlow {
                resource_id: "energy".to_owned(),
                rate,
            }],
            consumes: vec![],
            purchase: PurchasePlan::Single {
                currency_id: "energy".to_owned(),
                cost_multiplier: 1.0,
                cost_curve,
            },
            initial_level: 0,
            max_level: None,
            max_bulk: None,
            base_unlock: None,
            visibility_condition: None,
            tags: vec![],
            icon: None,
        }
    }

    fn probe(pack: &ContentPack, options: &BalanceOptions) -> Vec<ValidationIssue> {
        run_balance_probes(pack, options, &NoResolver)
    }

    fn codes_of(issues: &[ValidationIssue]) -> Vec<&str> {
        issues.iter().map(|i| i.code.as_str()).collect()
    }

    // -- 1. Healthy curves pass ----------------------------------------------

    #[test]
    fn healthy_pack_produces_no_issues() {
        let mut pack = empty_pack();
        pack.generators.push(generator(
            "mill",
            NumericFormula::Linear {
                base: 1.0,
                slope: 0.5,
            },
            NumericFormula::Exponential {
                base: 10.0,
                growth: 1.15,
                offset: 0.0,
            },
        ));
        assert!(probe(&pack, &BalanceOptions::default()).is_empty());
    }

    // -- 2. Negative rate ------------------------------------------------------

    #[test]
    fn negative_rate_is_flagged() {
        let mut pack = empty_pack();
        pack.generators.push(generator(
            "mill",
            NumericFormula::Linear {
                base: 1.0,
                slope: -1.0,
            },
            NumericFormula::constant(1.0),
        ));
        let issues = probe(&pack, &BalanceOptions::default());
        assert!(codes_of(&issues).contains(&codes::BALANCE_RATE_NEGATIVE));
    }

    // -- 3. Non-finite rate -----------------------------------------------------

    #[test]
    fn non_finite_rate_is_flagged() {
        let mut pack = empty_pack();
        pack.generators.push(generator(
            "mill",
            NumericFormula::Exponential {
                base: f64::MAX,
                growth: f64::MAX,
                offset: 0.0,
            },
            NumericFormula::constant(1.0),
        ));
        let issues = probe(&pack, &BalanceOptions::default());
        assert!(codes_of(&issues).contains(&codes::BALANCE_RATE_NON_FINITE));
    }

    // -- 4. Non-monotonic cost ----------------------------------------------------

    #[test]
    fn decreasing_cost_is_flagged() {
        let mut pack = empty_pack();
        pack.generators.push(generator(
            "mill",
            NumericFormula::constant(1.0),
            NumericFormula::Linear {
                base: 100.0,
                slope: -2.0,
            },
        ));
        let issues = probe(&pack, &BalanceOptions::default());
        assert!(codes_of(&issues).contains(&codes::BALANCE_COST_NON_MONOTONIC));
    }

    // -- 5. Growth cap ------------------------------------------------------------

    #[test]
    fn explosive_cost_growth_is_flagged() {
        let mut pack = empty_pack();
        pack.generators.push(generator(
            "mill",
            NumericFormula::constant(1.0),
            NumericFormula::Exponential {
                base: 1.0,
                growth: 50.0,
                offset: 0.0,
            },
        ));
        let issues = probe(&pack, &BalanceOptions::default());
        assert!(codes_of(&issues).contains(&codes::BALANCE_COST_EXCEEDS_GROWTH_CAP));
    }

    #[test]
    fn growth_exactly_at_cap_is_allowed() {
        let mut pack = empty_pack();
        pack.generators.push(generator(
            "mill",
            NumericFormula::constant(1.0),
            NumericFormula::Exponential {
                base: 1.0,
                growth: 20.0,
                offset: 0.0,
            },
        ));
        let issues = probe(&pack, &BalanceOptions::default());
        assert!(!codes_of(&issues).contains(&codes::BALANCE_COST_EXCEEDS_GROWTH_CAP));
    }

    // -- 6. Sample bound respects max level -----------------------------------------

    #[test]
    fn sampling_respects_max_level() {
        let mut pack = empty_pack();
        // Rate goes negative after level 10, but max_level caps sampling at 5.
        let mut gen = generator(
            "mill",
            NumericFormula::Linear {
                base: 10.0,
                slope: -1.0,
            },
            NumericFormula::constant(1.0),
        );
        gen.max_level = Some(5);
        pack.generators.push(gen);
        assert!(probe(&pack, &BalanceOptions::default()).is_empty());
    }

    // -- 7. warn_only demotes ----------------------------------------------------------

    #[test]
    fn warn_only_demotes_balance_errors() {
        let mut pack = empty_pack();
        pack.generators.push(generator(
            "mill",
            NumericFormula::Linear {
                base: 1.0,
                slope: -1.0,
            },
            NumericFormula::constant(1.0),
        ));
        let options = BalanceOptions {
            warn_only: true,
            ..BalanceOptions::default()
        };
        let issues = probe(&pack, &options);
        assert!(!issues.is_empty());
        assert!(issues
            .iter()
            .all(|i| i.severity == crate::issues::Severity::Warning));
    }

    // -- 8. Unlock ordering warning ------------------------------------------------------

    #[test]
    fn locked_dependency_without_reference_warns() {
        let mut pack = empty_pack();
        pack.resources.push(Resource {
            id: "crystal".to_owned(),
            name: LocalizedText::plain("Crystal"),
            category: ResourceCategory::Primary,
            tier: 2,
            start_amount: 0.0,
            capacity: None,
            unlocked: false,
            visible: false,
            unlock_condition: Some(Condition::ResourceThreshold {
                resource_id: "energy".to_owned(),
                comparator: Comparator::Gte,
                amount: 1000.0,
            }),
            visibility_condition: None,
            order: 0,
            dirty_tolerance: None,
            tags: vec![],
            icon: None,
        });

        // Generator consumes the locked crystal; its unlock condition never
        // mentions it.
        let mut gen = generator(
            "refinery",
            NumericFormula::constant(1.0),
            NumericFormula::constant(10.0),
        );
        gen.consumes.push(ResourceFlow {
            resource_id: "crystal".to_owned(),
            rate: NumericFormula::constant(1.0),
        });
        pack.generators.push(gen);

        let issues = probe(&pack, &BalanceOptions::default());
        let ordering: Vec<_> = issues
            .iter()
            .filter(|i| i.code == codes::BALANCE_UNLOCK_ORDERING)
            .collect();
        assert_eq!(ordering.len(), 1);
        assert_eq!(ordering[0].severity, crate::issues::Severity::Warning);
    }

    #[test]
    fn referencing_the_locked_dependency_suppresses_the_warning() {
        let mut pack = empty_pack();
        pack.resources.push(Resource {
            id: "crystal".to_owned(),
            name: LocalizedText::plain("Crystal"),
            category: ResourceCategory::Primary,
            tier: 2,
            start_amount: 0.0,
            capacity: None,
            unlocked: false,
            visible: false,
            unlock_condition: None,
            visibility_condition: None,
            order: 0,
            dirty_tolerance: None,
            tags: vec![],
            icon: None,
        });

        let mut gen = generator(
            "refinery",
            NumericFormula::constant(1.0),
            NumericFormula::constant(10.0),
        );
        gen.consumes.push(ResourceFlow {
            resource_id: "crystal".to_owned(),
            rate: NumericFormula::constant(1.0),
        });
        gen.base_unlock = Some(Condition::ResourceThreshold {
            resource_id: "crystal".to_owned(),
            comparator: Comparator::Gte,
            amount: 1.0,
        });
        pack.generators.push(gen);

        let issues = probe(&pack, &BalanceOptions::default());
        assert!(!codes_of(&issues).contains(&codes::BALANCE_UNLOCK_ORDERING));
    }
}
