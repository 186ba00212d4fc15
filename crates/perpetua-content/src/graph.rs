//! Unlock-graph and transform-graph cycle analysis.
//!
//! Both graphs are adjacency lists keyed by entity id and walked with an
//! iterative DFS carrying `visiting`/`visited` marks, so deep packs cannot
//! overflow the call stack. Cycle paths are reported in full for diagnostics.
//!
//! # Unlock graph
//!
//! Nodes are resources, generators, and upgrades; each entity gets an edge to
//! every entity its unlock condition depends on, excluding branches that can
//! be satisfied independently: `anyOf` adds no edges, `not` subtrees add no
//! edges, and a resource threshold on the entity itself is not an edge (a
//! resource may unlock itself through production). Flag conditions edge to
//! the upgrades that can grant the flag.
//!
//! # Transform graph
//!
//! Nodes are transforms; `A -> B` iff `A` produces a resource `B` consumes.
//! A cycle is *simple* when every transform on it has exactly one input and
//! one output, both with constant amounts, and a positive input amount. For
//! simple cycles the conversion ratio (product of `output / input` over the
//! cycle) decides profitability: a ratio above `1 + PROFIT_EPSILON` is a
//! resource printer and is rejected; net-loss and neutral cycles are allowed.
//! Non-simple cycles cannot be bounded statically and are rejected outright.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use perpetua_core::condition::Condition;

use crate::pack::{ContentPack, Transform, UpgradeEffect};

/// Tolerance above a ratio of exactly 1 before a cycle counts as profitable.
pub const PROFIT_EPSILON: f64 = 1e-8;

// ---------------------------------------------------------------------------
// Generic cycle search
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, PartialEq)]
enum Mark {
    Unvisited,
    Visiting,
    Visited,
}

/// Find cycles in an adjacency list via iterative DFS.
///
/// Each distinct cycle is reported once (normalized to start at its smallest
/// node). Not guaranteed to enumerate every elementary cycle of a dense
/// graph, but finds at least one cycle per strongly connected component with
/// one, which is what validation needs.
fn find_cycles(adjacency: &BTreeMap<String, Vec<String>>) -> Vec<Vec<String>> {
    let mut marks: HashMap<&str, Mark> = adjacency
        .keys()
        .map(|k| (k.as_str(), Mark::Unvisited))
        .collect();
    let mut cycles: Vec<Vec<String>> = Vec::new();
    let mut seen: HashSet<Vec<String>> = HashSet::new();

    for start in adjacency.keys() {
        if marks[start.as_str()] != Mark::Unvisited {
            continue;
        }

        // Stack of (node, next neighbor index); `path` mirrors the stack.
        let mut stack: Vec<(&str, usize)> = vec![(start.as_str(), 0)];
        let mut path: Vec<&str> = vec![start.as_str()];
        marks.insert(start.as_str(), Mark::Visiting);

        while let Some((node, index)) = stack.last_mut() {
            let node = *node;
            let neighbors = &adjacency[node];
            if *index < neighbors.len() {
                let next = neighbors[*index].as_str();
                *index += 1;
                match marks.get(next).copied() {
                    Some(Mark::Unvisited) => {
                        marks.insert(next, Mark::Visiting);
                        stack.push((next, 0));
                        path.push(next);
                    }
                    Some(Mark::Visiting) => {
                        // Back edge: the cycle is the path suffix from `next`.
                        let pos = path
                            .iter()
                            .position(|n| *n == next)
                            .expect("visiting node must be on the path");
                        let cycle = normalize_cycle(&path[pos..]);
                        if seen.insert(cycle.clone()) {
                            cycles.push(cycle);
                        }
                    }
                    _ => {}
                }
            } else {
                marks.insert(node, Mark::Visited);
                stack.pop();
                path.pop();
            }
        }
    }

    cycles
}

/// Rotate a cycle so it starts at its lexicographically smallest node, for
/// stable reporting and deduplication.
fn normalize_cycle(nodes: &[&str]) -> Vec<String> {
    let smallest = nodes
        .iter()
        .enumerate()
        .min_by_key(|(_, n)| **n)
        .map(|(i, _)| i)
        .unwrap_or(0);
    nodes[smallest..]
        .iter()
        .chain(nodes[..smallest].iter())
        .map(|n| (*n).to_owned())
        .collect()
}

// ---------------------------------------------------------------------------
// Unlock graph
// ---------------------------------------------------------------------------

/// Node key for a resource in the unlock graph.
pub fn resource_node(id: &str) -> String {
    format!("resource:{id}")
}

/// Node key for a generator in the unlock graph.
pub fn generator_node(id: &str) -> String {
    format!("generator:{id}")
}

/// Node key for an upgrade in the unlock graph.
pub fn upgrade_node(id: &str) -> String {
    format!("upgrade:{id}")
}

/// Collect the unlock-graph edges implied by a condition.
///
/// `self_key` suppresses the self-referencing resource threshold edge.
fn collect_condition_edges(
    condition: &Condition,
    self_key: &str,
    flag_granting_upgrades: &HashMap<&str, Vec<String>>,
    out: &mut BTreeSet<String>,
) {
    match condition {
        Condition::ResourceThreshold { resource_id, .. } => {
            let key = resource_node(resource_id);
            if key != self_key {
                out.insert(key);
            }
        }
        Condition::GeneratorLevel { id, .. } => {
            out.insert(generator_node(id));
        }
        Condition::UpgradeOwned { id, .. } => {
            out.insert(upgrade_node(id));
        }
        Condition::Flag { flag_id } => {
            if let Some(granters) = flag_granting_upgrades.get(flag_id.as_str()) {
                out.extend(granters.iter().cloned());
            }
        }
        Condition::AllOf { conditions } => {
            for c in conditions {
                collect_condition_edges(c, self_key, flag_granting_upgrades, out);
            }
        }
        // Independent alternatives and negations are not dependencies.
        Condition::AnyOf { .. } | Condition::Not { .. } => {}
        Condition::Always
        | Condition::Never
        | Condition::PrestigeUnlocked { .. }
        | Condition::PrestigeCountThreshold { .. }
        | Condition::PrestigeCompleted { .. }
        | Condition::Script { .. } => {}
    }
}

/// Detect cycles among the unlock conditions of resources, generators, and
/// upgrades. Returns each cycle as a path of node keys.
pub fn detect_unlock_cycles(pack: &ContentPack) -> Vec<Vec<String>> {
    // Flag id -> upgrade node keys that can grant it.
    let mut flag_granting_upgrades: HashMap<&str, Vec<String>> = HashMap::new();
    for upgrade in &pack.upgrades {
        for effect in &upgrade.effects {
            if let UpgradeEffect::GrantFlag { flag_id, .. } = effect {
                flag_granting_upgrades
                    .entry(flag_id.as_str())
                    .or_default()
                    .push(upgrade_node(&upgrade.id));
            }
        }
    }

    let mut adjacency: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut add_node = |adjacency: &mut BTreeMap<String, Vec<String>>,
                        key: String,
                        condition: Option<&Condition>| {
        let mut edges = BTreeSet::new();
        if let Some(condition) = condition {
            collect_condition_edges(condition, &key, &flag_granting_upgrades, &mut edges);
        }
        adjacency.insert(key, edges.into_iter().collect());
    };

    for resource in &pack.resources {
        add_node(
            &mut adjacency,
            resource_node(&resource.id),
            resource.unlock_condition.as_ref(),
        );
    }
    for generator in &pack.generators {
        add_node(
            &mut adjacency,
            generator_node(&generator.id),
            generator.base_unlock.as_ref(),
        );
    }
    for upgrade in &pack.upgrades {
        add_node(
            &mut adjacency,
            upgrade_node(&upgrade.id),
            upgrade.unlock_condition.as_ref(),
        );
    }

    // Drop edges to entities that do not exist; reference integrity is a
    // separate refinement.
    let known: HashSet<String> = adjacency.keys().cloned().collect();
    for edges in adjacency.values_mut() {
        edges.retain(|e| known.contains(e));
    }

    find_cycles(&adjacency)
}

// ---------------------------------------------------------------------------
// Transform graph
// ---------------------------------------------------------------------------

/// Why a transform cycle was rejected.
#[derive(Debug, Clone, PartialEq)]
pub enum TransformCycleKind {
    /// All conversions on the cycle are simple and their ratio product
    /// exceeds `1 + PROFIT_EPSILON`.
    Profitable { ratio: f64 },
    /// The cycle contains a non-simple conversion (formula-driven amounts,
    /// multiple inputs/outputs, or a non-positive input).
    Unevaluable,
}

/// A rejected transform cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformCycleIssue {
    /// Transform ids on the cycle, normalized to start at the smallest.
    pub cycle: Vec<String>,
    pub kind: TransformCycleKind,
}

/// Whether a transform is a simple one-in one-out constant conversion, and
/// if so its `output / input` ratio.
fn simple_conversion_ratio(transform: &Transform) -> Option<f64> {
    if transform.inputs.len() != 1 || transform.outputs.len() != 1 {
        return None;
    }
    let input = transform.inputs[0].amount.as_constant()?;
    let output = transform.outputs[0].amount.as_constant()?;
    if input <= 0.0 {
        return None;
    }
    Some(output / input)
}

/// Analyze the transform graph for profitable or unevaluable cycles.
/// Disjoint cycles are analyzed independently.
pub fn analyze_transform_cycles(transforms: &[Transform]) -> Vec<TransformCycleIssue> {
    // Resource -> transforms consuming it.
    let mut consumers: HashMap<&str, Vec<&str>> = HashMap::new();
    for transform in transforms {
        for input in &transform.inputs {
            consumers
                .entry(input.resource_id.as_str())
                .or_default()
                .push(transform.id.as_str());
        }
    }

    let mut adjacency: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for transform in transforms {
        let mut edges = BTreeSet::new();
        for output in &transform.outputs {
            if let Some(downstream) = consumers.get(output.resource_id.as_str()) {
                for &consumer in downstream {
                    if consumer != transform.id {
                        edges.insert(consumer.to_owned());
                    }
                }
            }
        }
        adjacency.insert(transform.id.clone(), edges.into_iter().collect());
    }

    let by_id: HashMap<&str, &Transform> =
        transforms.iter().map(|t| (t.id.as_str(), t)).collect();

    let mut issues = Vec::new();
    for cycle in find_cycles(&adjacency) {
        let mut ratio = 1.0;
        let mut simple = true;
        for id in &cycle {
            match by_id.get(id.as_str()).and_then(|t| simple_conversion_ratio(t)) {
                Some(r) => ratio *= r,
                None => {
                    simple = false;
                    break;
                }
            }
        }

        if !simple {
            issues.push(TransformCycleIssue {
                cycle,
                kind: TransformCycleKind::Unevaluable,
            });
        } else if ratio > 1.0 + PROFIT_EPSILON {
            issues.push(TransformCycleIssue {
                cycle,
                kind: TransformCycleKind::Profitable { ratio },
            });
        }
    }

    issues
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
