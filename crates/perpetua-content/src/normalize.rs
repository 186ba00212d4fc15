//! Pack normalization: the validator's frozen output shape.
//!
//! Normalization sorts every collection by id (plain byte order, which is
//! locale-insensitive and stable across platforms), deduplicates tags and
//! locales, precomputes id -> index lookup maps, parses the engine range,
//! and computes the resource definition digest. The result is immutable by
//! ownership: consumers receive it behind an `Arc` and there are no mutating
//! methods.

use std::collections::BTreeMap;
use std::sync::Arc;

use perpetua_core::digest::ResourceDefinitionDigest;

use crate::pack::{
    Achievement, Automation, ContentPack, Generator, MetricDefinition, PrestigeLayer, Resource,
    RuntimeEventDefinition, Transform, Upgrade,
};

/// Id -> index lookup maps into the normalized collections.
#[derive(Debug, Clone, Default)]
pub struct PackLookup {
    pub resources: BTreeMap<String, usize>,
    pub generators: BTreeMap<String, usize>,
    pub upgrades: BTreeMap<String, usize>,
    pub achievements: BTreeMap<String, usize>,
    pub prestige_layers: BTreeMap<String, usize>,
    pub transforms: BTreeMap<String, usize>,
    pub automations: BTreeMap<String, usize>,
    pub metrics: BTreeMap<String, usize>,
}

/// A validated, normalized, frozen content pack.
#[derive(Debug, Clone)]
pub struct NormalizedContentPack {
    pub id: String,
    pub version: String,
    /// Parsed engine compatibility range.
    pub engine: semver::VersionReq,
    pub supported_locales: Vec<String>,
    pub resources: Vec<Resource>,
    pub generators: Vec<Generator>,
    pub upgrades: Vec<Upgrade>,
    pub achievements: Vec<Achievement>,
    pub prestige_layers: Vec<PrestigeLayer>,
    pub transforms: Vec<Transform>,
    pub automations: Vec<Automation>,
    pub metrics: Vec<MetricDefinition>,
    pub runtime_events: Vec<RuntimeEventDefinition>,
    pub lookup: PackLookup,
    /// Digest over the ordered resource ids.
    pub digest: ResourceDefinitionDigest,
}

impl NormalizedContentPack {
    pub fn resource(&self, id: &str) -> Option<&Resource> {
        self.lookup.resources.get(id).map(|&i| &self.resources[i])
    }

    pub fn generator(&self, id: &str) -> Option<&Generator> {
        self.lookup.generators.get(id).map(|&i| &self.generators[i])
    }

    pub fn upgrade(&self, id: &str) -> Option<&Upgrade> {
        self.lookup.upgrades.get(id).map(|&i| &self.upgrades[i])
    }

    pub fn achievement(&self, id: &str) -> Option<&Achievement> {
        self.lookup
            .achievements
            .get(id)
            .map(|&i| &self.achievements[i])
    }

    pub fn prestige_layer(&self, id: &str) -> Option<&PrestigeLayer> {
        self.lookup
            .prestige_layers
            .get(id)
            .map(|&i| &self.prestige_layers[i])
    }

    pub fn transform(&self, id: &str) -> Option<&Transform> {
        self.lookup.transforms.get(id).map(|&i| &self.transforms[i])
    }

    pub fn automation(&self, id: &str) -> Option<&Automation> {
        self.lookup
            .automations
            .get(id)
            .map(|&i| &self.automations[i])
    }

    pub fn metric(&self, id: &str) -> Option<&MetricDefinition> {
        self.lookup.metrics.get(id).map(|&i| &self.metrics[i])
    }

    /// Ordered resource ids, as hashed into the digest.
    pub fn resource_ids(&self) -> Vec<String> {
        self.resources.iter().map(|r| r.id.clone()).collect()
    }
}

fn dedupe_sorted(values: &mut Vec<String>) {
    values.sort_unstable();
    values.dedup();
}

fn index_by_id<T>(items: &[T], id_of: impl Fn(&T) -> &str) -> BTreeMap<String, usize> {
    items
        .iter()
        .enumerate()
        .map(|(i, item)| (id_of(item).to_owned(), i))
        .collect()
}

/// Normalize a validated pack. The engine range must already be known to
/// parse (the validator checks it before this runs).
pub fn normalize_pack(mut pack: ContentPack, engine: semver::VersionReq) -> Arc<NormalizedContentPack> {
    pack.resources.sort_unstable_by(|a, b| a.id.cmp(&b.id));
    pack.generators.sort_unstable_by(|a, b| a.id.cmp(&b.id));
    pack.upgrades.sort_unstable_by(|a, b| a.id.cmp(&b.id));
    pack.achievements.sort_unstable_by(|a, b| a.id.cmp(&b.id));
    pack.prestige_layers.sort_unstable_by(|a, b| a.id.cmp(&b.id));
    pack.transforms.sort_unstable_by(|a, b| a.id.cmp(&b.id));
    pack.automations.sort_unstable_by(|a, b| a.id.cmp(&b.id));
    pack.metrics.sort_unstable_by(|a, b| a.id.cmp(&b.id));
    pack.runtime_events.sort_unstable_by(|a, b| a.id.cmp(&b.id));

    dedupe_sorted(&mut pack.supported_locales);
    for resource in &mut pack.resources {
        dedupe_sorted(&mut resource.tags);
    }
    for generator in &mut pack.generators {
        dedupe_sorted(&mut generator.tags);
    }
    for upgrade in &mut pack.upgrades {
        dedupe_sorted(&mut upgrade.tags);
    }
    for achievement in &mut pack.achievements {
        dedupe_sorted(&mut achievement.tags);
    }
    for transform in &mut pack.transforms {
        dedupe_sorted(&mut transform.tags);
    }

    let lookup = PackLookup {
        resources: index_by_id(&pack.resources, |r: &Resource| &r.id),
        generators: index_by_id(&pack.generators, |g: &Generator| &g.id),
        upgrades: index_by_id(&pack.upgrades, |u: &Upgrade| &u.id),
        achievements: index_by_id(&pack.achievements, |a: &Achievement| &a.id),
        prestige_layers: index_by_id(&pack.prestige_layers, |p: &PrestigeLayer| &p.id),
        transforms: index_by_id(&pack.transforms, |t: &Transform| &t.id),
        automations: index_by_id(&pack.automations, |a: &Automation| &a.id),
        metrics: index_by_id(&pack.metrics, |m: &MetricDefinition| &m.id),
    };

    let ids: Vec<&str> = pack.resources.iter().map(|r| r.id.as_str()).collect();
    let digest = ResourceDefinitionDigest::from_ids(&ids);

    Arc::new(NormalizedContentPack {
        id: pack.id,
        version: pack.version,
        engine,
        supported_locales: pack.supported_locales,
        resources: pack.resources,
        generators: pack.generators,
        upgrades: pack.upgrades,
        achievements: pack.achievements,
        prestige_layers: pack.prestige_layers,
        transforms: pack.transforms,
        automations: pack.automations,
        metrics: pack.metrics,
        runtime_events: pack.runtime_events,
        lookup,
        digest,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pack::{LocalizedText, ResourceCategory};

    fn resource(id: &str, tags: Vec<&str>) -> Resource {
        Resource {
            id: id.to_owned(),
            name: LocalizedText::plain(id),
            category: ResourceCategory::Misc,
            tier: 1,
            start_amount: 0.0,
            capacity: None,
            unlocked: true,
            visible: true,
            unlock_condition: None,
            visibility_condition: None,
            order: 0,
            dirty_tolerance: None,
            tags: tags.into_iter().map(str::to_owned).collect(),
            icon: None,
        }
    }

    fn pack(resources: Vec<Resource>) -> ContentPack {
        ContentPack {
            id: "test".to_owned(),
            name: LocalizedText::plain("Test"),
            version: "1.0.0".to_owned(),
            engine: ">=1.0.0".to_owned(),
            supported_locales: vec!["de".to_owned(), "fr".to_owned(), "de".to_owned()],
            resources,
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

    fn req() -> semver::VersionReq {
        semver::VersionReq::parse(">=1.0.0").unwrap()
    }

    #[test]
    fn collections_are_sorted_by_id() {
        let normalized = normalize_pack(
            pack(vec![
                resource("zinc", vec![]),
                resource("amber", vec![]),
                resource("iron", vec![]),
            ]),
            req(),
        );
        let ids: Vec<&str> = normalized.resources.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["amber", "iron", "zinc"]);

        assert_eq!(normalized.lookup.resources["iron"], 1);
        assert_eq!(normalized.resource("zinc").unwrap().id, "zinc");
        assert!(normalized.resource("unknown").is_none());
    }

    #[test]
    fn tags_and_locales_are_deduplicated() {
        let normalized = normalize_pack(
            pack(vec![resource("wood", vec!["raw", "core", "raw"])]),
            req(),
        );
        assert_eq!(normalized.resources[0].tags, vec!["core", "raw"]);
        assert_eq!(normalized.supported_locales, vec!["de", "fr"]);
    }

    #[test]
    fn digest_covers_sorted_resource_ids() {
        let a = normalize_pack(
            pack(vec![resource("b", vec![]), resource("a", vec![])]),
            req(),
        );
        let b = normalize_pack(
            pack(vec![resource("a", vec![]), resource("b", vec![])]),
            req(),
        );
        // Same id set in any authoring order digests identically because
        // normalization sorts first.
        assert_eq!(a.digest, b.digest);
        assert_eq!(a.digest.version, 2);
        assert!(a.digest.hash.starts_with("fnv1a-"));
    }
}
