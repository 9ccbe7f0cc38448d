//! Performance benchmarks for ordering, paging and subscription fan-out

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;

use livedoc::cache::Shape;
use livedoc::normalize::{normalize, SortSpec};
use livedoc::pager::Pager;
use livedoc::query::QueryDescriptor;
use livedoc::{key, Document, MemoryBackend, SubscriptionCache};

fn documents(n: usize) -> Vec<Document> {
    (0..n)
        .map(|i| {
            let doc = Document::new(format!("doc{}", i)).with_field("uid", "bench");
            // Every seventh record has no timestamp
            if i % 7 == 0 {
                doc
            } else {
                doc.with_field("timestampCreate", ((i * 7919) % 100_000) as i64)
            }
        })
        .collect()
}

fn bench_normalize(c: &mut Criterion) {
    let mut group = c.benchmark_group("normalize");
    let spec = SortSpec::default();

    for size in [10usize, 100, 1_000, 10_000] {
        let docs = documents(size);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &docs, |b, docs| {
            b.iter(|| normalize(black_box(docs.clone()), &spec))
        });
    }

    group.finish();
}

fn bench_page_fetch(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let backend = MemoryBackend::new();
    backend.put_many("items", documents(5_000));
    let pager = Pager::default();
    let base = QueryDescriptor::collection("items");

    c.bench_function("page_fetch_first", |b| {
        b.iter(|| {
            runtime
                .block_on(pager.fetch(&backend, base.clone(), Some(20), None))
                .unwrap()
        })
    });
}

fn bench_subscribe(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let _guard = runtime.enter();
    let backend = MemoryBackend::new();
    backend.put_many("items", documents(200));
    let cache = SubscriptionCache::new(Arc::new(backend));
    let query = QueryDescriptor::collection("items").where_eq("uid", "bench");

    let mut group = c.benchmark_group("subscribe");

    group.bench_function("open_and_release", |b| {
        b.iter(|| {
            let mut handle = cache.subscribe(
                key!["items", "owner", "bench"],
                query.clone(),
                Shape::Sorted(SortSpec::default()),
            );
            runtime.block_on(handle.ready())
        })
    });

    // A held consumer keeps the feed open; joins only replay
    let mut held = cache.subscribe(
        key!["items", "owner", "bench"],
        query.clone(),
        Shape::Sorted(SortSpec::default()),
    );
    runtime.block_on(held.ready());

    group.bench_function("join_existing", |b| {
        b.iter(|| {
            let handle = cache.subscribe(
                key!["items", "owner", "bench"],
                query.clone(),
                Shape::Sorted(SortSpec::default()),
            );
            black_box(handle.state())
        })
    });

    group.finish();
}

criterion_group!(benches, bench_normalize, bench_page_fetch, bench_subscribe);

criterion_main!(benches);
