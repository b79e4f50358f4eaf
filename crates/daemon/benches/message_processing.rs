//! Performance benchmarks for the relay hot paths.
//!
//! These benchmarks measure:
//! - Channel publish fan-out to many readers
//! - Reader queue push/pop
//! - Session creation and deletion

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use daemon::session::multiplexer::ReaderHandle;
use daemon::session::{Channel, ChannelSettings, Delivery, SessionRegistry};
use protocol::StreamKind;
use tokio::runtime::Runtime;

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

/// Benchmark publishing one line to N attached readers, draining every queue.
fn bench_publish_fan_out(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("publish_fan_out");
    let line = "2024-01-01T00:00:00Z INFO task progress: step 42 of 100 complete".to_string();

    for readers in [1usize, 10, 100] {
        let channel = Channel::new(StreamKind::Stdout, ChannelSettings::default());
        let (writer, mut subscriptions) = rt.block_on(async {
            let mut subs = Vec::with_capacity(readers);
            for _ in 0..readers {
                subs.push(channel.attach_reader().await.unwrap());
            }
            (channel.attach_writer().await.unwrap(), subs)
        });

        group.throughput(Throughput::Elements(readers as u64));
        group.bench_with_input(BenchmarkId::from_parameter(readers), &readers, |b, _| {
            b.iter(|| {
                rt.block_on(async {
                    let delivered = channel.publish(writer.id(), black_box(line.clone())).await;
                    black_box(delivered.unwrap());
                });
                for sub in subscriptions.iter_mut() {
                    black_box(sub.try_recv());
                }
            });
        });
    }

    group.finish();
}

/// Benchmark a single reader queue.
fn bench_reader_queue(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("reader_queue");

    for size in [64usize, 4096] {
        let payload = "x".repeat(size);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("push_pop", size), &payload, |b, payload| {
            let (mut handle, mut sub) = ReaderHandle::new(1024);
            b.iter(|| {
                handle.try_deliver(Delivery::Data(payload.clone()));
                rt.block_on(async { black_box(sub.recv().await) })
            });
        });
    }

    group.finish();
}

/// Benchmark session create + delete.
fn bench_session_lifecycle(c: &mut Criterion) {
    let rt = runtime();
    let registry = Arc::new(SessionRegistry::default());

    c.bench_function("session_create_delete", |b| {
        let mut n = 0u64;
        b.iter(|| {
            n += 1;
            let id = format!("bench-{n}");
            rt.block_on(async {
                registry.create(&id).unwrap();
                registry.delete(&id).await.unwrap();
            });
        });
    });
}

criterion_group!(
    benches,
    bench_publish_fan_out,
    bench_reader_queue,
    bench_session_lifecycle
);
criterion_main!(benches);
