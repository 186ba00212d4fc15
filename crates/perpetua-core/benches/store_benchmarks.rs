//! Resource store benchmarks.
//!
//! The publish path is the hot loop of the whole engine: it must stay
//! O(changed), not O(resources). These benches hold the modified fraction at
//! 10% while scaling the resource count, so a publish that accidentally
//! walks every column shows up as superlinear growth.
//!
//! Run with: `cargo bench --bench store_benchmarks`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use perpetua_core::store::{ResourceSpec, ResourceStore};

fn build_store(resource_count: usize) -> ResourceStore {
    let specs: Vec<ResourceSpec> = (0..resource_count)
        .map(|i| ResourceSpec::new(format!("resource-{i:04}"), 100.0))
        .collect();
    ResourceStore::with_defaults(&specs).unwrap()
}

// ---------------------------------------------------------------------------
// Benchmark 1: full tick cycle, 10% modified
// ---------------------------------------------------------------------------

fn bench_tick_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("tick_cycle_10pct_modified");

    for &count in &[100usize, 500, 1000, 4000] {
        let modify = count / 10;
        let mut store = build_store(count);
        let mut offset = 0usize;

        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, _| {
            b.iter(|| {
                // Touch a rotating 10% slice so the dirty set stays realistic.
                for k in 0..modify {
                    let i = (offset + k) % count;
                    store.add_amount(i, 1.0);
                }
                offset = (offset + modify) % count;

                store.finalize_tick(16.0).unwrap();
                let dirty = store.publish().unwrap().dirty_count();
                store.reset_per_tick_accumulators().unwrap();
                black_box(dirty);
            });
        });
    }

    group.finish();
}

// ---------------------------------------------------------------------------
// Benchmark 2: mutation-only baseline
// ---------------------------------------------------------------------------

fn bench_mutation_baseline(c: &mut Criterion) {
    let count = 1000;
    let modify = count / 10;
    let mut store = build_store(count);

    c.bench_function("mutations_1k_10pct_no_publish", |b| {
        b.iter(|| {
            for i in 0..modify {
                store.add_amount(i, 1.0);
            }
            black_box(store.live_dirty_count());
        });
    });
}

// ---------------------------------------------------------------------------
// Benchmark 3: save export
// ---------------------------------------------------------------------------

fn bench_save_export(c: &mut Criterion) {
    let store = build_store(1000);

    c.bench_function("export_for_save_1k", |b| {
        b.iter(|| {
            let state = store.export_for_save();
            black_box(state.ids.len());
        });
    });
}

criterion_group!(
    benches,
    bench_tick_cycle,
    bench_mutation_baseline,
    bench_save_export,
);
criterion_main!(benches);
