//! Criterion benchmarks for the Lanetrade kernel.
//!
//! Three benchmark groups:
//! - `ring_step`: one tick on ring worlds of increasing size
//! - `route_planning`: route-choice explain payloads across a large ring
//! - `persistence`: binary snapshots and JSON save strings

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use lanetrade_core::id::NodeId;
use lanetrade_core::kernel::Kernel;
use lanetrade_core::test_utils::*;

// ===========================================================================
// World builders
// ===========================================================================

/// Ring world warmed up until logistics jobs are in flight.
fn warmed_ring(stations: usize, fleets: usize) -> Kernel {
    let mut kernel = ring_kernel(stations, fleets);
    for _ in 0..20 {
        let _ = kernel.step();
    }
    kernel
}

// ===========================================================================
// Benchmarks
// ===========================================================================

fn bench_ring_step(c: &mut Criterion) {
    let mut group = c.benchmark_group("ring_step");
    group.sample_size(30);

    for (stations, fleets) in [(30, 10), (120, 40), (480, 160)] {
        let mut kernel = warmed_ring(stations, fleets);
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{stations}_stations_{fleets}_fleets")),
            &(stations, fleets),
            |b, _| {
                b.iter(|| {
                    let _ = kernel.step();
                });
            },
        );
    }

    group.finish();
}

fn bench_route_planning(c: &mut Criterion) {
    let mut group = c.benchmark_group("route_planning");
    group.sample_size(50);

    let kernel = ring_kernel(480, 0);
    let origin = NodeId::from("stn_000");
    let destination = NodeId::from("stn_240");

    group.bench_function("plan_choice_480_ring", |b| {
        b.iter(|| {
            let _ = kernel.plan_choice(&origin, &destination, fixed(1.0));
        });
    });

    group.finish();
}

fn bench_persistence(c: &mut Criterion) {
    let mut group = c.benchmark_group("persistence");
    group.sample_size(30);

    let kernel = warmed_ring(120, 40);

    group.bench_function("snapshot_120_stations", |b| {
        b.iter(|| {
            kernel.serialize().unwrap();
        });
    });

    group.bench_function("save_string_120_stations", |b| {
        b.iter(|| {
            kernel.save_to_string().unwrap();
        });
    });

    let text = kernel.save_to_string().unwrap();
    group.bench_function("load_string_120_stations", |b| {
        b.iter(|| {
            Kernel::from_save_string(&text).unwrap();
        });
    });

    group.bench_function("signature_120_stations", |b| {
        b.iter(|| kernel.signature_hash());
    });

    group.finish();
}

criterion_group!(benches, bench_ring_step, bench_route_planning, bench_persistence);
criterion_main!(benches);
