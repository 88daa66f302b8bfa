//! Slot allocator benchmarks

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use fragstore_rs::SlotAllocator;

fn bench_allocate(c: &mut Criterion) {
    c.bench_function("allocate_4096_slots", |b| {
        b.iter(|| {
            let mut alloc = SlotAllocator::new(64, 1);
            for _ in 0..4096 {
                black_box(alloc.allocate().unwrap());
            }
        })
    });
}

fn bench_allocate_release_churn(c: &mut Criterion) {
    c.bench_function("allocate_release_churn", |b| {
        b.iter(|| {
            let mut alloc = SlotAllocator::new(32, 2);
            let mut held = Vec::new();
            for _ in 0..1024 {
                held.push(alloc.allocate().unwrap());
            }
            // Free every other slot, then refill the gaps
            for addr in held.iter().step_by(2) {
                alloc.release(addr).unwrap();
            }
            for _ in 0..512 {
                black_box(alloc.allocate().unwrap());
            }
        })
    });
}

fn bench_replay(c: &mut Criterion) {
    let mut seed = SlotAllocator::new(64, 1);
    let addresses: Vec<_> = (0..4096).map(|_| seed.allocate().unwrap()).collect();

    c.bench_function("reserve_replay_4096", |b| {
        b.iter(|| {
            let mut alloc = SlotAllocator::new(64, 1);
            for addr in &addresses {
                alloc.reserve(black_box(addr)).unwrap();
            }
        })
    });
}

criterion_group!(benches, bench_allocate, bench_allocate_release_churn, bench_replay);
criterion_main!(benches);
