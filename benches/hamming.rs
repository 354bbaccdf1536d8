use std::hint::black_box;

use catalog_imsearch::hamming::{hamming_bytes, hamming_naive, hamming_u64};
use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use rand::prelude::*;

fn bench_hamming(c: &mut Criterion) {
    let mut group = c.benchmark_group("Hamming");
    let mut rng = rand::rng();
    // 32 个关键点 * 32 字节
    let mut src = vec![0u8; 1024];
    let mut dst = vec![0u8; 8 << 20];
    rng.fill_bytes(&mut src);
    rng.fill_bytes(&mut dst);

    group.throughput(Throughput::Bytes(dst.len() as u64));
    group.bench_function("keypoints_naive", |b| {
        b.iter(|| {
            dst.chunks_exact(black_box(1024)).map(|chunk| hamming_naive(&src, chunk)).sum::<u32>()
        });
    });
    group.bench_function("keypoints_bytes", |b| {
        b.iter(|| dst.chunks_exact(1024).map(|chunk| hamming_bytes(&src, chunk)).sum::<u32>());
    });
    group.finish();
}

fn bench_hamming_hash(c: &mut Criterion) {
    let mut group = c.benchmark_group("Hamming Hash");
    let mut rng = rand::rng();
    let query = rng.random::<u64>();
    let hashes = (0..1 << 20).map(|_| rng.random::<u64>()).collect::<Vec<_>>();

    group.throughput(Throughput::Elements(hashes.len() as u64));
    group.bench_function("u64", |b| {
        b.iter(|| hashes.iter().map(|&h| hamming_u64(query, h)).sum::<u32>());
    });
    group.finish();
}

criterion_group!(benches, bench_hamming, bench_hamming_hash);
criterion_main!(benches);
