//! # Object Pool Benchmark
//!
//! Borrow/release throughput of typed pools versus `Box`.
//!
//! Run with: `cargo bench --package tessera_memory --bench pool_benchmark`

#![allow(missing_docs)]

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use tessera_memory::{AllocatorContext, Pool};

const ARENA_CAPACITY: usize = 16 * 1024 * 1024;
const BATCH: usize = 10_000;

/// Typical short-lived gameplay object.
#[derive(Clone, Copy, Default)]
struct Particle {
    position: [f32; 3],
    velocity: [f32; 3],
    life: f32,
}

impl Particle {
    fn step(&mut self) {
        for axis in 0..3 {
            self.position[axis] += self.velocity[axis];
        }
        self.life -= 0.016;
    }
}

/// Benchmark: borrow, touch, release a single particle.
fn bench_borrow_release(c: &mut Criterion) {
    let context = AllocatorContext::with_capacity(ARENA_CAPACITY);
    let pool: Pool<Particle> = Pool::with_reserved(&context, 1);

    c.bench_function("pool_borrow_release", |b| {
        b.iter(|| {
            let mut handle = pool.borrow();
            handle.with_mut(Particle::step).ok();
            black_box(handle.release()).ok();
        });
    });
}

/// Baseline: the same lifecycle through `Box`.
fn bench_box_baseline(c: &mut Criterion) {
    c.bench_function("box_new_drop", |b| {
        b.iter(|| {
            let mut particle = Box::new(Particle::default());
            particle.step();
            black_box(particle)
        });
    });
}

/// Benchmark: a burst of live particles released together.
fn bench_burst(c: &mut Criterion) {
    let context = AllocatorContext::with_capacity(ARENA_CAPACITY);
    let pool: Pool<Particle> = Pool::with_reserved(&context, BATCH);
    let mut handles = Vec::with_capacity(BATCH);

    c.bench_function("pool_burst_10k", |b| {
        b.iter(|| {
            handles.extend((0..BATCH).map(|_| pool.borrow()));
            for handle in &mut handles {
                handle.with_mut(Particle::step).ok();
                handle.release().ok();
            }
            handles.clear();
        });
    });
}

criterion_group!(benches, bench_borrow_release, bench_box_baseline, bench_burst);

criterion_main!(benches);
