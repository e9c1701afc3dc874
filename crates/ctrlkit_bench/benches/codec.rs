//! Watch frame codec benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ctrlkit_api::codec::{decode_event, encode_event};
use ctrlkit_api::{CronTab, WatchEvent};
use ctrlkit_testkit::fixtures::{crontab_at, spec};

fn sample_event() -> WatchEvent<CronTab> {
    let mut obj = crontab_at("tenant-a", "nightly-report", 4242);
    obj.spec = spec("30 2 * * 1-5", 3);
    WatchEvent::Modified(obj)
}

/// Benchmark encoding a single event.
fn bench_encode(c: &mut Criterion) {
    let event = sample_event();
    c.bench_function("encode_event", |b| {
        b.iter(|| {
            let frame = encode_event(black_box(&event)).unwrap();
            black_box(frame);
        });
    });
}

/// Benchmark decoding a single event.
fn bench_decode(c: &mut Criterion) {
    let frame = encode_event(&sample_event()).unwrap();
    c.bench_function("decode_event", |b| {
        b.iter(|| {
            let event: WatchEvent<CronTab> = decode_event(black_box(&frame)).unwrap();
            black_box(event);
        });
    });
}

/// Benchmark decoding events whose image field grows.
fn bench_decode_size(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_size");

    for size in [16, 256, 4096].iter() {
        let mut obj = crontab_at("tenant-a", "large", 1);
        obj.spec.image = "x".repeat(*size);
        let frame = encode_event(&WatchEvent::Added(obj)).unwrap();

        group.throughput(Throughput::Bytes(frame.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &frame, |b, frame| {
            b.iter(|| {
                let event: WatchEvent<CronTab> = decode_event(black_box(frame)).unwrap();
                black_box(event);
            });
        });
    }
    group.finish();
}

/// Benchmark rejecting malformed frames.
fn bench_decode_malformed(c: &mut Criterion) {
    let mut frame = encode_event(&sample_event()).unwrap();
    frame.truncate(frame.len() / 2);
    c.bench_function("decode_malformed", |b| {
        b.iter(|| {
            let result: Result<WatchEvent<CronTab>, _> = decode_event(black_box(&frame));
            black_box(result.is_err());
        });
    });
}

criterion_group!(
    benches,
    bench_encode,
    bench_decode,
    bench_decode_size,
    bench_decode_malformed,
);

criterion_main!(benches);
