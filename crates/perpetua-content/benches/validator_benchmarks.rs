//! Validator benchmarks over deterministic synthetic packs.
//!
//! Measures end-to-end validation latency at several pack sizes, the cost of
//! the individual semantic stages, and the cache hit path. Synthetic packs
//! are generated from a seeded PCG so runs are reproducible.
//!
//! Run with: `cargo bench --bench validator_benchmarks`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::Rng;
use rand_pcg::Pcg64;

use perpetua_content::cache::ValidationCache;
use perpetua_content::validator::{Validator, ValidatorOptions};

// ---------------------------------------------------------------------------
// Synthetic pack generation
// ---------------------------------------------------------------------------

/// Build a synthetic pack with `resource_count` resources, a generator per
/// resource, and an unlock chain threaded through every other resource.
fn synthetic_pack(resource_count: usize, seed: u64) -> serde_json::Value {
    let mut rng = Pcg64::new(seed as u128, 0xa02b_dbf7_bb3c_0a7a_c28f_a16a_63b7_8a21);

    let mut resources = Vec::with_capacity(resource_count);
    for i in 0..resource_count {
        let mut resource = serde_json::json!({
            "id": format!("resource-{i:04}"),
            "name": {"default": format!("Resource {i}")},
            "startAmount": rng.gen_range(0.0..100.0),
        });
        // Every other resource unlocks off its predecessor, forming a long
        // (acyclic) chain through the unlock graph.
        if i > 0 && i % 2 == 0 {
            resource["unlocked"] = serde_json::json!(false);
            resource["unlockCondition"] = serde_json::json!({
                "kind": "resourceThreshold",
                "resourceId": format!("resource-{:04}", i - 1),
                "comparator": "gte",
                "amount": rng.gen_range(10.0..1000.0),
            });
        }
        resources.push(resource);
    }

    let generators: Vec<serde_json::Value> = (0..resource_count)
        .map(|i| {
            serde_json::json!({
                "id": format!("generator-{i:04}"),
                "name": {"default": format!("Generator {i}")},
                "produces": [{
                    "resourceId": format!("resource-{i:04}"),
                    "rate": {"kind": "linear", "base": rng.gen_range(0.1..5.0), "slope": 0.25},
                }],
                "purchase": {
                    "currencyId": format!("resource-{i:04}"),
                    "costMultiplier": rng.gen_range(1.0..20.0),
                    "costCurve": {"kind": "exponential", "base": 1.0, "growth": 1.15},
                },
            })
        })
        .collect();

    serde_json::json!({
        "id": "synthetic",
        "name": {"default": "Synthetic"},
        "version": "1.0.0",
        "engine": ">=1.0.0",
        "resources": resources,
        "generators": generators,
    })
}

// ---------------------------------------------------------------------------
// Benchmark 1: validation latency by pack size
// ---------------------------------------------------------------------------

fn bench_validation_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("validate_synthetic_pack");

    for &count in &[10usize, 50, 200, 500] {
        let raw = synthetic_pack(count, 42);
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, _| {
            let mut validator = Validator::with_defaults();
            b.iter(|| {
                let outcome = validator.parse(&raw);
                assert!(outcome.is_valid());
                black_box(outcome.pack().map(|p| p.resources.len()));
            });
        });
    }

    group.finish();
}

// ---------------------------------------------------------------------------
// Benchmark 2: cache hit path and hit ratio
// ---------------------------------------------------------------------------

fn bench_cache_hit_path(c: &mut Criterion) {
    let raw = synthetic_pack(200, 42);

    c.bench_function("validate_200_cached", |b| {
        let mut validator = Validator::new(ValidatorOptions {
            cache: Some(ValidationCache::new()),
            ..ValidatorOptions::default()
        });
        // Warm the cache; every measured iteration is a hit.
        validator.parse(&raw);

        b.iter(|| {
            let outcome = validator.parse(&raw);
            black_box(outcome.is_valid());
        });

        let cache = validator.cache().unwrap();
        assert!(cache.hit_ratio() > 0.9, "expected a hot cache");
    });
}

// ---------------------------------------------------------------------------
// Benchmark 3: validation without balance probes
// ---------------------------------------------------------------------------

fn bench_without_balance(c: &mut Criterion) {
    let raw = synthetic_pack(200, 42);

    c.bench_function("validate_200_no_balance", |b| {
        let mut validator = Validator::new(ValidatorOptions {
            balance: perpetua_content::balance::BalanceOptions {
                enabled: false,
                ..Default::default()
            },
            ..ValidatorOptions::default()
        });
        b.iter(|| {
            let outcome = validator.parse(&raw);
            black_box(outcome.is_valid());
        });
    });
}

criterion_group!(
    benches,
    bench_validation_latency,
    bench_cache_hit_path,
    bench_without_balance,
);
criterion_main!(benches);
