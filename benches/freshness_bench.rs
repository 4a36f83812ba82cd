use criterion::{criterion_group, criterion_main, Criterion};
use std::{
    hint::black_box,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
};

use motor_bench::telemetry::FreshnessBuffer;

fn freshness_bench(c: &mut Criterion) {
    let buffer = FreshnessBuffer::new();
    c.bench_function("freshness_publish_take", |b| {
        let mut seq: u64 = 0;
        b.iter(|| {
            seq += 1;
            buffer.publish(seq);
            black_box(buffer.try_take());
        })
    });

    // Producer thread hammering the slot while the consumer pulls.
    let shared = Arc::new(FreshnessBuffer::new());
    let running = Arc::new(AtomicBool::new(true));
    let producer = {
        let shared = shared.clone();
        let running = running.clone();
        thread::spawn(move || {
            let mut seq: u64 = 0;
            while running.load(Ordering::Relaxed) {
                seq += 1;
                shared.publish(seq);
            }
        })
    };

    c.bench_function("freshness_take_under_contention", |b| {
        b.iter(|| black_box(shared.try_take()))
    });

    running.store(false, Ordering::Relaxed);
    producer.join().unwrap();
}

criterion_group!(benches, freshness_bench);
criterion_main!(benches);
