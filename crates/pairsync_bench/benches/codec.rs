//! Wire codec benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use pairsync_bench::address_objects;
use pairsync_core::{SyncRequest, Timestamp};
use pairsync_protocol::{Envelope, PeerRequest};
use uuid::Uuid;

fn apply_envelope(count: usize) -> Envelope<PeerRequest> {
    let request = SyncRequest::apply(Timestamp::MIN, Timestamp::MAX, address_objects(count));
    Envelope::new(
        Uuid::new_v4(),
        PeerRequest::ApplyChanges {
            session_id: Uuid::new_v4(),
            request,
        },
    )
}

/// Benchmark encoding apply requests.
fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode_apply");

    for count in [10, 100, 1000].iter() {
        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            let envelope = apply_envelope(count);
            b.iter(|| black_box(envelope.encode().unwrap()));
        });
    }
    group.finish();
}

/// Benchmark decoding apply requests.
fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_apply");

    for count in [10, 100, 1000].iter() {
        let bytes = apply_envelope(*count).encode().unwrap();
        group.throughput(Throughput::Bytes(bytes.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &bytes, |b, bytes| {
            b.iter(|| black_box(Envelope::<PeerRequest>::decode(bytes).unwrap()));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_encode, bench_decode);
criterion_main!(benches);
