use criterion::{Criterion, criterion_group, criterion_main};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use semsearch::embeddings::{ChunkingConfig, chunk_with_config};
use semsearch::index::{IndexConfig, IndexEntry, VectorIndex};
use std::hint::black_box;
use tokio_util::sync::CancellationToken;

const DIMENSION: usize = 384;
const VECTORS: usize = 20_000;

fn random_vector(rng: &mut StdRng) -> Vec<f32> {
    (0..DIMENSION)
        .map(|_| rng.random_range(-1.0_f32..1.0))
        .collect()
}

fn build_index() -> VectorIndex {
    let config = IndexConfig {
        cluster_count: 128,
        probe_count: 8,
        ..IndexConfig::default()
    };
    let index = VectorIndex::new(DIMENSION, config).expect("valid index config");

    let mut rng = StdRng::seed_from_u64(7);
    let entries = (0..VECTORS)
        .map(|id| IndexEntry::new(id as i64 + 1, random_vector(&mut rng)))
        .collect();
    index.insert(entries).expect("insert");
    index
        .rebuild(&CancellationToken::new())
        .expect("rebuild");
    index
}

pub fn criterion_benchmark(c: &mut Criterion) {
    let index = build_index();
    let mut rng = StdRng::seed_from_u64(11);
    let query = random_vector(&mut rng);

    c.bench_function("search probes=8", |b| {
        b.iter(|| index.search(black_box(&query), black_box(10), 8))
    });
    c.bench_function("search probes=32", |b| {
        b.iter(|| index.search(black_box(&query), black_box(10), 32))
    });

    let text = "Semantic search splits documents into overlapping windows. ".repeat(2_000);
    let config = ChunkingConfig::default();
    c.bench_function("chunking", |b| {
        b.iter(|| chunk_with_config(black_box(&text), black_box(&config)))
    });
}

criterion_group! {
    name = benches;
    config = Criterion::default().sample_size(20);
    targets = criterion_benchmark
}
criterion_main!(benches);
