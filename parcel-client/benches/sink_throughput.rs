//! Throughput of the write sink with different part sizes and write granularities

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use parcel_client::WriteSink;
use parcel_core::test_utils::RecordingStore;
use parcel_core::*;
use parcel_engine::{LocalStore, StorageEngine};
use std::sync::Arc;

const OBJECT_SIZE: usize = 4 * 1024 * 1024;
const PART_SIZES: &[usize] = &[64 * 1024, 256 * 1024, 1024 * 1024];
const WRITE_SIZES: &[usize] = &[512, 8 * 1024, 64 * 1024];

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap()
}

async fn upload(store: Arc<dyn ObjectStore>, key: &str, part_size: usize, write_size: usize, data: &[u8]) {
    let location = ObjectLocation::parse("bench-bucket", key).unwrap();
    let mut sink = WriteSink::new(store, location, SinkConfig::with_part_size(part_size)).unwrap();
    for chunk in data.chunks(write_size) {
        sink.write(chunk).await.unwrap();
    }
    black_box(sink.finalize().await.unwrap());
}

/// Buffering and slicing cost with an in-memory store
fn bench_sink_buffering(c: &mut Criterion) {
    let rt = runtime();
    let data = vec![42u8; OBJECT_SIZE];
    let mut group = c.benchmark_group("sink_buffering");
    group.throughput(Throughput::Bytes(OBJECT_SIZE as u64));

    for &write_size in WRITE_SIZES {
        group.bench_with_input(
            BenchmarkId::new("write_size", write_size),
            &write_size,
            |b, &write_size| {
                b.iter(|| {
                    let store = Arc::new(RecordingStore::new());
                    rt.block_on(upload(store, "object", 256 * 1024, write_size, &data));
                });
            },
        );
    }
    group.finish();
}

/// End to end into the fjall engine
fn bench_sink_to_engine(c: &mut Criterion) {
    let rt = runtime();
    let (engine, _temp) = StorageEngine::temp().unwrap();
    let store: Arc<dyn ObjectStore> = Arc::new(LocalStore::new(engine));
    let data: Vec<u8> = (0..OBJECT_SIZE).map(|i| (i % 251) as u8).collect();
    let mut group = c.benchmark_group("sink_to_engine");
    group.throughput(Throughput::Bytes(OBJECT_SIZE as u64));
    group.sample_size(10);

    for &part_size in PART_SIZES {
        group.bench_with_input(
            BenchmarkId::new("part_size", part_size),
            &part_size,
            |b, &part_size| {
                let mut counter = 0;
                b.iter(|| {
                    let key = format!("object-{}", counter);
                    counter += 1;
                    rt.block_on(upload(store.clone(), &key, part_size, 64 * 1024, &data));
                });
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_sink_buffering, bench_sink_to_engine);
criterion_main!(benches);
