//! Benchmarks for the forward pass and the step Jacobians.
//!
//! Run with: cargo bench -p sim-diff-tests

#![allow(missing_docs, clippy::unwrap_used, clippy::expect_used)]

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use nalgebra::DVector;
use sim_diff::{DifferentiableWorld, LossGradient, forward_pass, forward_pass_idempotent};
use sim_diff_tests::{box_on_ground, double_pendulum, sliding_ball};
use sim_world::World;

fn scenes() -> Vec<(&'static str, World)> {
    vec![
        ("sliding_ball", sliding_ball().unwrap()),
        ("box_on_ground", box_on_ground().unwrap()),
        ("double_pendulum", double_pendulum().unwrap()),
    ]
}

fn bench_forward_pass(c: &mut Criterion) {
    let mut group = c.benchmark_group("forward_pass");
    for (name, world) in scenes() {
        group.bench_with_input(BenchmarkId::new("scene", name), &world, |b, world| {
            let mut world = world.clone();
            b.iter(|| black_box(forward_pass_idempotent(&mut world).unwrap()));
        });
    }
    group.finish();
}

fn bench_jacobians(c: &mut Criterion) {
    let mut group = c.benchmark_group("jacobians");
    for (name, mut world) in scenes() {
        let snapshot = forward_pass(&mut world).unwrap();
        group.bench_function(BenchmarkId::new("vel_vel", name), |b| {
            b.iter(|| black_box(snapshot.vel_vel_jacobian(&mut world)));
        });
        group.bench_function(BenchmarkId::new("pos_vel", name), |b| {
            b.iter(|| black_box(snapshot.pos_vel_jacobian(&mut world)));
        });
        group.bench_function(BenchmarkId::new("finite_difference_vel_vel", name), |b| {
            b.iter(|| black_box(snapshot.finite_difference_vel_vel_jacobian(&mut world).unwrap()));
        });
    }
    group.finish();
}

fn bench_backprop(c: &mut Criterion) {
    let mut group = c.benchmark_group("backprop");
    for (name, mut world) in scenes() {
        let snapshot = forward_pass(&mut world).unwrap();
        let n = world.num_dofs();
        let next = LossGradient::from_state(DVector::from_element(n, 1.0), DVector::from_element(n, 1.0));
        group.bench_function(BenchmarkId::new("scene", name), |b| {
            b.iter(|| black_box(snapshot.backprop(&mut world, &next)));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_forward_pass, bench_jacobians, bench_backprop);
criterion_main!(benches);
