//! Runtime-sourced counters and pack-derived metric aggregates.
//!
//! Metrics feed the `customMetric` achievement track. Three sources exist:
//! runtime event counters (incremented as events fire), lifetime positive
//! resource deltas (observed from tick deltas after finalization), and the
//! total generator level sum (computed on demand).

use std::collections::HashMap;
use std::sync::Arc;

use perpetua_core::store::ResourceStore;
use perpetua_content::normalize::NormalizedContentPack;
use perpetua_content::pack::MetricSource;

use crate::generators::GeneratorManager;

/// Owns metric counters.
pub struct MetricManager {
    pack: Arc<NormalizedContentPack>,
    /// Event counters by metric id.
    counters: HashMap<String, f64>,
    /// Lifetime positive deltas by resource id.
    lifetime_totals: HashMap<String, f64>,
}

impl MetricManager {
    pub fn new(pack: Arc<NormalizedContentPack>) -> Self {
        Self {
            pack,
            counters: HashMap::new(),
            lifetime_totals: HashMap::new(),
        }
    }

    /// Count a fired runtime event into matching counter metrics.
    pub fn record_event(&mut self, event_id: &str) {
        for metric in &self.pack.metrics {
            if let MetricSource::RuntimeCounter { event_id: filter } = &metric.source {
                let matches = filter.as_deref().map(|f| f == event_id).unwrap_or(true);
                if matches {
                    *self.counters.entry(metric.id.clone()).or_insert(0.0) += 1.0;
                }
            }
        }
    }

    /// Accumulate lifetime totals from this tick's positive deltas. Call
    /// after `finalize_tick`, before the accumulators reset.
    pub fn observe_tick_deltas(&mut self, store: &ResourceStore) {
        for (i, id) in store.ids().iter().enumerate() {
            let delta = store.tick_delta(i);
            if delta > 0.0 {
                *self.lifetime_totals.entry(id.clone()).or_insert(0.0) += delta;
            }
        }
    }

    /// Current value of a metric, `None` for unknown ids.
    pub fn value_of(&self, metric_id: &str, generators: &GeneratorManager) -> Option<f64> {
        let metric = self.pack.metric(metric_id)?;
        Some(match &metric.source {
            MetricSource::RuntimeCounter { .. } => {
                self.counters.get(metric_id).copied().unwrap_or(0.0)
            }
            MetricSource::ResourceLifetimeTotal { resource_id } => self
                .lifetime_totals
                .get(resource_id)
                .copied()
                .unwrap_or(0.0),
            MetricSource::GeneratorLevelTotal => generators.total_levels() as f64,
        })
    }

    /// All metric values, for snapshot building.
    pub fn values(&self, generators: &GeneratorManager) -> HashMap<String, f64> {
        self.pack
            .metrics
            .iter()
            .filter_map(|m| self.value_of(&m.id, generators).map(|v| (m.id.clone(), v)))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use perpetua_content::validator::Validator;
    use perpetua_core::condition::ConditionEvaluator;
    use perpetua_core::store::ResourceSpec;

    fn normalized() -> Arc<NormalizedContentPack> {
        let raw = serde_json::json!({
            "id": "demo",
            "name": {"default": "Demo"},
            "version": "1.0.0",
            "engine": ">=1.0.0",
            "resources": [{"id": "e", "name": {"default": "Energy"}}],
            "runtimeEvents": [{"id": "boom"}, {"id": "zap"}],
            "metrics": [
                {"id": "booms", "name": {"default": "Booms"},
                 "source": {"kind": "runtimeCounter", "eventId": "boom"}},
                {"id": "all-events", "name": {"default": "All"},
                 "source": {"kind": "runtimeCounter"}},
                {"id": "lifetime-energy", "name": {"default": "Lifetime Energy"},
                 "source": {"kind": "resourceLifetimeTotal", "resourceId": "e"}},
                {"id": "total-levels", "name": {"default": "Levels"},
                 "source": {"kind": "generatorLevelTotal"}}
            ]
        });
        Validator::with_defaults()
            .parse(&raw)
            .pack()
            .expect("pack validates")
            .clone()
    }

    #[test]
    fn counters_respect_event_filters() {
        let pack = normalized();
        let generators = GeneratorManager::new(Arc::clone(&pack), ConditionEvaluator::default());
        let mut metrics = MetricManager::new(pack);

        metrics.record_event("boom");
        metrics.record_event("zap");
        metrics.record_event("boom");

        assert_eq!(metrics.value_of("booms", &generators), Some(2.0));
        assert_eq!(metrics.value_of("all-events", &generators), Some(3.0));
        assert_eq!(metrics.value_of("unknown", &generators), None);
    }

    #[test]
    fn lifetime_totals_count_only_gains() {
        let pack = normalized();
        let generators = GeneratorManager::new(Arc::clone(&pack), ConditionEvaluator::default());
        let mut metrics = MetricManager::new(pack);
        let mut store = ResourceStore::with_defaults(&[ResourceSpec::new("e", 0.0)]).unwrap();

        // Gain of 10.
        store.apply_income(0, 10.0);
        store.finalize_tick(1000.0).unwrap();
        metrics.observe_tick_deltas(&store);
        store.publish().unwrap();
        store.reset_per_tick_accumulators().unwrap();

        // Loss of 4 is not counted.
        store.apply_expense(0, 4.0);
        store.finalize_tick(1000.0).unwrap();
        metrics.observe_tick_deltas(&store);

        assert_eq!(metrics.value_of("lifetime-energy", &generators), Some(10.0));
    }
}
