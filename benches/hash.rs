use criterion::{criterion_group, criterion_main, Bencher, BenchmarkId, Criterion, Throughput};
use itertools::Itertools;
use once_cell::sync::Lazy;
use rand::Rng;

use robin_hash::{RobinHoodTable, TableConfig};

const LOAD_FACTORS: [f64; 3] = [0.3, 0.5, 0.8];
const HINTS: [u64; 3] = [512, 4096, 10_024];
const TOTAL_KEYS: u64 = 10_000;
const TOTAL_OPERATIONS: u64 = 1_000;

static RANDOM_KEYS: Lazy<Vec<u64>> = Lazy::new(|| {
    let mut rng = rand::thread_rng();
    (0..TOTAL_OPERATIONS)
        .map(|_| rng.gen_range(0, TOTAL_KEYS))
        .collect()
});

fn fx(bytes: &[u8]) -> u64 {
    fxhash::hash64(bytes)
}

fn filled_table(hint: u64, load: f64) -> RobinHoodTable<u64> {
    let mut table = RobinHoodTable::new(TableConfig::new(hint, load));
    for i in 0..TOTAL_KEYS {
        table.insert(fx, &i.to_le_bytes(), i).unwrap();
    }
    table
}

fn hash(c: &mut Criterion) {
    let mut group = c.benchmark_group("hash");
    group.throughput(Throughput::Elements(TOTAL_OPERATIONS));

    for input in LOAD_FACTORS.iter().cartesian_product(HINTS.iter()) {
        let (&load, &hint) = input;
        let description = format!("load: {}, hint: {}", load, hint);

        group.bench_with_input(
            BenchmarkId::new("random get", description.clone()),
            &(load, hint),
            |b, &(load, hint)| random_get(b, hint, load),
        );
        group.bench_with_input(
            BenchmarkId::new("random insert", description.clone()),
            &(load, hint),
            |b, &(load, hint)| random_insert(b, hint, load),
        );
        group.bench_with_input(
            BenchmarkId::new("random upsert rmw", description.clone()),
            &(load, hint),
            |b, &(load, hint)| random_upsert_rmw(b, hint, load),
        );
    }
    group.finish()
}

fn random_get(b: &mut Bencher, hint: u64, load: f64) {
    let table = filled_table(hint, load);
    b.iter(|| {
        for key in RANDOM_KEYS.iter() {
            assert!(table.get(fx, &key.to_le_bytes()).is_some());
        }
    });
}

fn random_insert(b: &mut Bencher, hint: u64, load: f64) {
    b.iter(|| {
        let mut table: RobinHoodTable<u64> = RobinHoodTable::new(TableConfig::new(hint, load));
        for key in RANDOM_KEYS.iter() {
            table.insert(fx, &key.to_le_bytes(), *key).unwrap();
        }
    });
}

fn random_upsert_rmw(b: &mut Bencher, hint: u64, load: f64) {
    let mut table = filled_table(hint, load);
    b.iter(|| {
        for key in RANDOM_KEYS.iter() {
            let (mut slot, _) = table.upsert(fx, &key.to_le_bytes()).unwrap();
            *slot += 1;
        }
    });
}

criterion_group!(benches, hash);
criterion_main!(benches);
