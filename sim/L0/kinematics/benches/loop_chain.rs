//! Benchmarks for topology building and loop-closure solves.
//!
//! Run with: cargo bench -p sim-kinematics

#![allow(missing_docs, clippy::unwrap_used, clippy::expect_used, clippy::cast_precision_loss)]

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use sim_kinematics::{Body, BodyId, Grip, Joint, JointId, JointKind, Model, SolverConfig, transform};

fn hinge(model: &mut Model, a: BodyId, b: BodyId, x: f64, y: f64) -> JointId {
    let joint = model.add_joint(Joint::new("hinge", JointKind::Revolute));
    let at = transform::translation(-x, -y, 0.0);
    model
        .add_grip(Grip::new("hinge", a, b).with_offsets(at, at).with_joint(joint))
        .unwrap();
    joint
}

/// Stacked parallelograms, one loop per level, each driven at its lower
/// left hinge.
fn ladder(levels: usize) -> (Model, Vec<JointId>) {
    let mut model = Model::new("ladder");
    let mut below = model.add_body(Body::new("ground"));
    let mut drives = Vec::with_capacity(levels);

    for k in 0..levels {
        let y = k as f64;
        let left = model.add_body(Body::new("left"));
        let right = model.add_body(Body::new("right"));
        let bar = model.add_body(Body::new("bar"));

        let drive = hinge(&mut model, below, left, 0.0, y);
        let _ = hinge(&mut model, left, bar, 0.0, y + 1.0);
        let _ = hinge(&mut model, below, right, 2.0, y);
        let _ = hinge(&mut model, right, bar, 2.0, y + 1.0);

        model.set_joint_fixed(drive, 0, true).unwrap();
        drives.push(drive);
        below = bar;
    }
    (model, drives)
}

fn bench_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("build_topologies");

    for levels in [4, 16, 64, 256] {
        let (model, _) = ladder(levels);
        group.throughput(Throughput::Elements(levels as u64));
        group.bench_with_input(BenchmarkId::from_parameter(levels), &model, |b, model| {
            b.iter(|| {
                let mut model = model.clone();
                black_box(model.build_topologies().unwrap())
            });
        });
    }

    group.finish();
}

fn bench_solve_pos(c: &mut Criterion) {
    let mut group = c.benchmark_group("solve_pos");
    let config = SolverConfig::default();

    for levels in [4, 16, 64, 256] {
        let (mut model, drives) = ladder(levels);
        let topology = model.build_topologies().unwrap().remove(0);
        for (k, &drive) in drives.iter().enumerate() {
            model.set_joint_value(drive, 0, 0.3 * (k as f64).sin()).unwrap();
        }

        group.throughput(Throughput::Elements(levels as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(levels),
            &(model, topology),
            |b, (model, topology)| {
                b.iter(|| {
                    let mut model = model.clone();
                    let mut topology = topology.clone();
                    black_box(topology.solve_pos(&mut model, &config).unwrap())
                });
            },
        );
    }

    group.finish();
}

fn bench_rate_solves(c: &mut Criterion) {
    let mut group = c.benchmark_group("rate_solves");

    for levels in [4, 16, 64, 256] {
        let (mut model, drives) = ladder(levels);
        let mut topology = model.build_topologies().unwrap().remove(0);
        for &drive in &drives {
            model.set_joint_value(drive, 0, 0.2).unwrap();
            let _ = model.update_joint(drive, |j| j.set_speed(0, 1.0)).unwrap();
        }
        let _ = topology.solve_pos(&mut model, &SolverConfig::default()).unwrap();

        group.throughput(Throughput::Elements(levels as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(levels),
            &(model, topology),
            |b, (model, topology)| {
                b.iter(|| {
                    let mut model = model.clone();
                    let mut topology = topology.clone();
                    let speed = topology.solve_speed(&mut model).unwrap();
                    let accel = topology.solve_accel(&mut model).unwrap();
                    black_box((speed, accel))
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_build, bench_solve_pos, bench_rate_solves);
criterion_main!(benches);
