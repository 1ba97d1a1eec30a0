//! Flattening benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use replicadb_bench::user_record;
use replicadb_core::flatten::{FlattenMode, ResolvedSchema};
use replicadb_testkit::{posts_schema, users_schema};

/// Benchmark record flattening as arrays grow.
fn bench_flatten_record(c: &mut Criterion) {
    let mut group = c.benchmark_group("flatten_record");
    let schema = ResolvedSchema::resolve(vec![users_schema()], &FlattenMode::Auto).unwrap();
    let users = schema.collection("users").unwrap();

    for tags in [0, 8, 64, 512].iter() {
        group.throughput(Throughput::Elements(*tags as u64));
        group.bench_with_input(BenchmarkId::from_parameter(tags), tags, |b, &tags| {
            let record = user_record(1, tags, 4);
            b.iter(|| {
                let rows = users.flatten(black_box(&record));
                black_box(rows);
            });
        });
    }

    group.finish();
}

/// Benchmark record flattening with nothing promoted.
fn bench_flatten_record_none(c: &mut Criterion) {
    let schema = ResolvedSchema::resolve(vec![users_schema()], &FlattenMode::None).unwrap();
    let users = schema.collection("users").unwrap();
    let record = user_record(1, 64, 4);

    c.bench_function("flatten_record_none", |b| {
        b.iter(|| black_box(users.flatten(black_box(&record))));
    });
}

/// Benchmark schema resolution.
fn bench_resolve_schema(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolve_schema");

    for (name, mode) in [("none", FlattenMode::None), ("auto", FlattenMode::Auto)] {
        group.bench_function(name, |b| {
            b.iter(|| {
                let schema =
                    ResolvedSchema::resolve(vec![users_schema(), posts_schema()], black_box(&mode))
                        .unwrap();
                black_box(schema);
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_flatten_record,
    bench_flatten_record_none,
    bench_resolve_schema
);
criterion_main!(benches);
