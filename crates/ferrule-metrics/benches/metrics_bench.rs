// Criterion benchmarks for ferrule-metrics
//
// Run benchmarks with:
//   cargo bench -p ferrule-metrics

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ferrule_metrics::{CallOutcome, LatencyHistogram, MetricsRegistry};

fn bench_record_call(c: &mut Criterion) {
    let mut group = c.benchmark_group("record_call");

    let registry = MetricsRegistry::provider();
    group.bench_function("single_method", |b| {
        b.iter(|| registry.record_method_call(black_box("echo"), black_box(120), CallOutcome::Success));
    });

    let methods = ["a", "b", "c", "d", "e"];
    group.bench_function("five_methods", |b| {
        b.iter(|| {
            for method in &methods {
                registry.record_method_call(black_box(method), black_box(120), CallOutcome::Success);
            }
        });
    });

    group.finish();
}

fn bench_histogram(c: &mut Criterion) {
    let mut group = c.benchmark_group("histogram");

    let histogram = LatencyHistogram::new();
    group.bench_function("record", |b| {
        let mut sample = 1u64;
        b.iter(|| {
            sample = sample.wrapping_mul(31).wrapping_add(7) % 1_000_000;
            histogram.record(black_box(sample));
        });
    });

    group.bench_function("summary", |b| b.iter(|| black_box(histogram.summary())));

    group.finish();
}

fn bench_snapshot(c: &mut Criterion) {
    let mut group = c.benchmark_group("snapshot");

    for method_count in [10usize, 100].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(method_count), method_count, |b, &count| {
            let registry = MetricsRegistry::consumer();
            for i in 0..count {
                registry.record_method_call(&format!("method_{}", i), 100, CallOutcome::Success);
                registry.record_provider_request(&format!("10.0.0.{}:18090", i % 8));
            }
            b.iter(|| black_box(registry.snapshot()));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_record_call, bench_histogram, bench_snapshot);
criterion_main!(benches);
