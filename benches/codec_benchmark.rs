//! Codec benchmarks: FFT transform throughput and hashing

use branchfs::store::codec;
use branchfs::store::serializer;
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn byte_stream(len: usize) -> Vec<i64> {
    (0..len).map(|i| ((i * 31 + 7) % 256) as i64).collect()
}

fn bench_encrypt(c: &mut Criterion) {
    let small = byte_stream(512);
    let large = byte_stream(64 * 1024);

    c.bench_function("encrypt 512B", |b| {
        b.iter(|| codec::encrypt(black_box(&small)))
    });
    c.bench_function("encrypt 64KB", |b| {
        b.iter(|| codec::encrypt(black_box(&large)))
    });
}

fn bench_round_trip(c: &mut Criterion) {
    let payload = byte_stream(16 * 1024);
    c.bench_function("encrypt+decrypt 16KB", |b| {
        b.iter(|| {
            let blocks = codec::encrypt(black_box(&payload));
            codec::decrypt(black_box(&blocks)).unwrap()
        })
    });
}

fn bench_hash(c: &mut Criterion) {
    let stream = byte_stream(64 * 1024);
    c.bench_function("hash 64KB", |b| b.iter(|| codec::hash_ints(black_box(&stream))));
}

fn bench_serializer(c: &mut Criterion) {
    let table: Vec<Vec<String>> = (0..200)
        .map(|row| {
            (0..6)
                .map(|cell| format!("row{} cell{} payload", row, cell))
                .collect()
        })
        .collect();

    c.bench_function("serialize 200x6 table", |b| {
        b.iter(|| serializer::serialize(black_box(&table)))
    });
    let stream = serializer::serialize(&table);
    c.bench_function("deserialize 200x6 table", |b| {
        b.iter(|| serializer::deserialize(black_box(&stream)).unwrap())
    });
}

criterion_group!(
    benches,
    bench_encrypt,
    bench_round_trip,
    bench_hash,
    bench_serializer
);
criterion_main!(benches);
