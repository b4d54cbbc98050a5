//! Locomotion Benchmarks
//!
//! IK solve and per-frame controller update costs

use std::hint::black_box;
use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use glam::Vec3;
use strider_animation::procedural::{self, GaitParams};
use strider_animation::{biped_skeleton, walk_cycle_clip};
use strider_core::Transform;
use strider_locomotion::{
    AnimationType, ChainEnds, IKRig, IKRigController, IkProblem, IkSettings, InverseKinematics,
    LocomotionConfig, RigData,
};
use strider_physics::FlatTerrain;

fn rig_data() -> RigData {
    RigData::new(
        procedural::HIPS,
        ChainEnds::new(procedural::HIPS, procedural::LEFT_FOOT),
        ChainEnds::new(procedural::HIPS, procedural::RIGHT_FOOT),
    )
}

fn bench_ik_solve(c: &mut Criterion) {
    let skeleton = Arc::new(biped_skeleton().unwrap());
    let rig = IKRig::new(Arc::clone(&skeleton), &rig_data()).unwrap();
    let bind = skeleton.bind_model_positions();

    let mut group = c.benchmark_group("ik_solve");
    for iterations in [25, 100, 400].iter() {
        let ik = InverseKinematics::new(IkSettings {
            max_iterations: *iterations,
            ..IkSettings::default()
        });
        let mut problem = IkProblem::from_bind_pose(&skeleton);
        for index in [IKRig::LEFT_LEG, IKRig::RIGHT_LEG] {
            let chain = rig.chain(index).unwrap();
            let target = bind[chain.end_effector()] + Vec3::new(0.0, 0.2, 0.15);
            problem.add_goal(chain, rig.nodes(), target);
        }

        group.bench_with_input(BenchmarkId::from_parameter(iterations), iterations, |b, _| {
            b.iter(|| black_box(ik.solve(&problem, &[])));
        });
    }
    group.finish();
}

fn bench_controller_update(c: &mut Criterion) {
    let skeleton = Arc::new(biped_skeleton().unwrap());
    let clip = walk_cycle_clip(Arc::clone(&skeleton), &GaitParams::default()).unwrap();
    let ground = FlatTerrain::new(0.0);

    let mut group = c.benchmark_group("controller_update");
    for ik_enabled in [false, true] {
        let settings = LocomotionConfig {
            ik_enabled,
            ..LocomotionConfig::default()
        };
        group.bench_function(BenchmarkId::new("walk_cycle", if ik_enabled { "ik" } else { "baked" }), |b| {
            b.iter_batched(
                || {
                    let mut controller =
                        IKRigController::new(Arc::clone(&skeleton), &rig_data(), settings).unwrap();
                    let index = controller.add_animation(&clip, AnimationType::Walking).unwrap();
                    (controller, index, Transform::IDENTITY)
                },
                |(mut controller, index, mut transform)| {
                    for _ in 0..30 {
                        controller
                            .update(1.0 / 30.0, index, &mut transform, &ground)
                            .unwrap();
                    }
                    transform
                },
                criterion::BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

criterion_group!(benches, bench_ik_solve, bench_controller_update);
criterion_main!(benches);
