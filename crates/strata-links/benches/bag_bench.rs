//! Link bag benchmarks.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use strata_common::types::Key;
use strata_links::{LinkBag, LinkSet};

fn sample_keys(n: usize) -> Vec<Key> {
    (0..n).map(|i| Key::from(format!("key-{i:06}"))).collect()
}

fn bag_build_benchmark(c: &mut Criterion) {
    let keys = sample_keys(1000);
    c.bench_function("bag_from_keys_1000", |b| {
        b.iter(|| black_box(LinkBag::from_keys(keys.clone()).len()))
    });
}

fn bag_has_benchmark(c: &mut Criterion) {
    let keys = sample_keys(1000);
    let bag = LinkBag::from_keys(keys.clone());
    c.bench_function("bag_has_1000", |b| {
        b.iter(|| {
            for key in &keys {
                black_box(bag.has(key));
            }
        })
    });
}

fn bag_add_benchmark(c: &mut Criterion) {
    let bag = LinkBag::from_keys(sample_keys(1000));
    let fresh = Key::from("zzz-not-present");
    c.bench_function("bag_add_into_1000", |b| {
        b.iter(|| black_box(bag.add(&fresh).len()))
    });
}

fn linkset_read_keys_benchmark(c: &mut Criterion) {
    let mut set = LinkSet::from_baseline(LinkBag::from_keys(sample_keys(1000)));
    for key in sample_keys(100) {
        set.remove(&key);
    }
    for i in 2000..2100 {
        set.add(&Key::from(format!("key-{i:06}")));
    }
    c.bench_function("linkset_read_keys_1000", |b| {
        b.iter(|| black_box(set.read_keys().len()))
    });
}

criterion_group!(
    benches,
    bag_build_benchmark,
    bag_has_benchmark,
    bag_add_benchmark,
    linkset_read_keys_benchmark
);
criterion_main!(benches);
