//! Flush benchmarks
//!
//! Measures batch commit cost as the number of effects grows, and lazy
//! recomputation through a chain of derivations.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use trellis_core::reactive::{Cell, Derivation, Effect, Runtime};

fn bench_batched_writes(c: &mut Criterion) {
    let mut group = c.benchmark_group("batched_writes");

    for effects in [1usize, 16, 256] {
        group.throughput(Throughput::Elements(effects as u64));
        group.bench_with_input(BenchmarkId::from_parameter(effects), &effects, |b, &effects| {
            let rt = Runtime::new();
            let cell = Cell::new(&rt, 0u64);
            for _ in 0..effects {
                let reader = cell.clone();
                Effect::new(&rt, &[&cell], move || {
                    black_box(reader.read());
                    None
                });
            }
            rt.flush().ok();

            b.iter(|| {
                for _ in 0..8 {
                    cell.update(|v| v + 1).ok();
                }
                black_box(rt.flush().ok());
            });
        });
    }

    group.finish();
}

fn bench_derivation_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("derivation_chain");

    for depth in [4usize, 32, 128] {
        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, &depth| {
            let rt = Runtime::new();
            let base = Cell::new(&rt, 1u64);

            let b0 = base.clone();
            let mut tail = Derivation::new(&rt, &[&base], move || b0.read());
            for _ in 0..depth {
                let prev = tail.clone();
                tail = Derivation::try_new(&rt, &[&tail], move || Ok(prev.get()? + 1));
            }

            b.iter(|| {
                base.update(|v| v + 1).ok();
                rt.flush().ok();
                black_box(tail.get().ok());
            });
        });
    }

    group.finish();
}

criterion_group!(flush_benches, bench_batched_writes, bench_derivation_chain);
criterion_main!(flush_benches);
