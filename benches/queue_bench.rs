// benches/queue_bench.rs

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use std::sync::{Arc, Barrier};
use std::thread;

use sluice::{
    AlignedBuffer, COUNTER_LENGTH, CounterPosition, ManyToOneLinkedQueue, Position,
    ReadablePosition,
};

// Single-threaded benchmarks
fn bench_single_threaded(c: &mut Criterion) {
    let mut group = c.benchmark_group("Queue-SingleThreaded");

    group.bench_function("offer_poll", |b| {
        let mut queue = ManyToOneLinkedQueue::new();
        let mut i: u64 = 0;

        b.iter(|| {
            i = i.wrapping_add(1);
            queue.offer(black_box(i));
            queue.poll()
        });
    });

    group.bench_function("offer_batch_then_drain", |b| {
        let mut queue = ManyToOneLinkedQueue::new();

        b.iter(|| {
            for i in 0..1000u64 {
                queue.offer(i);
            }
            while let Some(value) = queue.poll() {
                black_box(value);
            }
        });
    });

    group.finish();
}

// Producers race on the tail while the bench thread drains
fn bench_multi_producer(c: &mut Criterion) {
    let mut group = c.benchmark_group("Queue-MultiProducer");

    for producer_count in [1usize, 2, 4, 8].iter() {
        group.bench_with_input(
            BenchmarkId::new("transfer", producer_count),
            producer_count,
            |b, &num_producers| {
                let items_per_producer = 10_000usize;

                b.iter(|| {
                    let mut queue = ManyToOneLinkedQueue::new();
                    let barrier = Arc::new(Barrier::new(num_producers));

                    let handles: Vec<_> = (0..num_producers)
                        .map(|_| {
                            let producer = queue.producer();
                            let barrier = Arc::clone(&barrier);
                            thread::spawn(move || {
                                barrier.wait();
                                for i in 0..items_per_producer {
                                    producer.offer(i);
                                }
                            })
                        })
                        .collect();

                    let mut received = 0;
                    while received < num_producers * items_per_producer {
                        match queue.poll() {
                            Some(value) => {
                                black_box(value);
                                received += 1;
                            }
                            None => std::hint::spin_loop(),
                        }
                    }

                    for handle in handles {
                        handle.join().unwrap();
                    }
                });
            },
        );
    }

    group.finish();
}

fn bench_position(c: &mut Criterion) {
    let mut group = c.benchmark_group("Position");
    let region = Arc::new(AlignedBuffer::new(4 * COUNTER_LENGTH).unwrap());
    let position = CounterPosition::new(region, 1).unwrap();

    group.bench_function("set_release", |b| {
        let mut i = 0i64;
        b.iter(|| {
            i += 1;
            position.set_release(black_box(i));
        });
    });

    group.bench_function("get_acquire", |b| b.iter(|| black_box(position.get_acquire())));

    group.bench_function("get_volatile", |b| b.iter(|| black_box(position.get_volatile())));

    group.bench_function("propose_max_release", |b| {
        let mut i = position.get();
        b.iter(|| {
            i += 1;
            position.propose_max_release(black_box(i))
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_single_threaded,
    bench_multi_producer,
    bench_position
);
criterion_main!(benches);
