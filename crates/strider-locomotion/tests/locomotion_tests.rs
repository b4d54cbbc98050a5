//! End-to-end controller runs over procedural clips

use std::f32::consts::FRAC_PI_2;
use std::sync::Arc;

use glam::Vec3;
use strider_animation::procedural::{self, GaitParams};
use strider_animation::{biped_skeleton, idle_clip, walk_cycle_clip};
use strider_core::Transform;
use strider_locomotion::{
    AnimationType, ChainEnds, EETrajectory, IKRig, IKRigController, LocomotionConfig, RigData,
};
use strider_physics::{FlatTerrain, RigidBody, TerrainQuery};

const DT: f32 = 1.0 / 30.0;

fn biped_controller(clip_type: AnimationType) -> (IKRigController, usize) {
    let skeleton = Arc::new(biped_skeleton().unwrap());
    let rig_data = RigData::new(
        procedural::HIPS,
        ChainEnds::new(procedural::HIPS, procedural::LEFT_FOOT),
        ChainEnds::new(procedural::HIPS, procedural::RIGHT_FOOT),
    );
    let mut controller =
        IKRigController::new(Arc::clone(&skeleton), &rig_data, LocomotionConfig::default()).unwrap();
    let clip = match clip_type {
        AnimationType::Walking => walk_cycle_clip(skeleton, &GaitParams::default()).unwrap(),
        AnimationType::Idle => idle_clip(skeleton, &GaitParams::default()).unwrap(),
    };
    let index = controller.add_animation(&clip, clip_type).unwrap();
    (controller, index)
}

/// Run until the left leg receives its first swing target
fn first_left_swing(
    controller: &mut IKRigController,
    index: usize,
    terrain: &dyn TerrainQuery,
) -> EETrajectory {
    let mut transform = Transform::IDENTITY;
    for _ in 0..90 {
        controller.update(DT, index, &mut transform, terrain).unwrap();
        let config = controller.config(index).unwrap();
        if let Some(target) = &config.ee_trajectories[IKRig::LEFT_LEG].target
            && target.is_dynamic()
        {
            return target.clone();
        }
    }
    panic!("left leg never swung");
}

#[test]
fn test_flat_walk_swing_covers_one_stride() {
    let (mut controller, index) = biped_controller(AnimationType::Walking);
    let ground = FlatTerrain::new(0.0);
    let swing = first_left_swing(&mut controller, index, &ground);

    let curve = &swing.curve;
    let start = curve.eval(curve.start_t());
    let end = curve.end();
    assert!((end - start - Vec3::Y).length() < 0.01, "stride {}", end - start);
    assert!(end.z.abs() < 0.01);

    let t = curve.end_t();
    assert!(curve.eval(t).distance(curve.eval(t - 1e-3)) < 0.05);
}

#[test]
fn test_heading_rotates_strides() {
    let (mut controller, index) = biped_controller(AnimationType::Walking);
    controller.set_heading(FRAC_PI_2);
    let ground = FlatTerrain::new(0.0);
    let swing = first_left_swing(&mut controller, index, &ground);

    let stride = swing.curve.end() - swing.curve.start();
    assert!((stride - Vec3::NEG_X).length() < 0.01, "stride {stride}");
}

#[test]
fn test_swing_lands_on_raised_ground() {
    let (mut controller, index) = biped_controller(AnimationType::Walking);
    // a low platform starting just ahead of the planted left foot
    let platform = |xy: glam::Vec2| Some(if xy.y > 0.6 { 0.1 } else { 0.0 });
    let swing = first_left_swing(&mut controller, index, &platform);
    assert!((swing.curve.end().z - 0.1).abs() < 0.01);
}

#[test]
fn test_regenerated_targets_continue_previous_ones() {
    let (mut controller, index) = biped_controller(AnimationType::Walking);
    let ground = FlatTerrain::new(0.0);
    let mut transform = Transform::IDENTITY;
    let mut blends = 0;

    // two and a half cycles, checking every blend after the first cycle
    for _ in 0..75 {
        let previous: Vec<Option<EETrajectory>> = controller
            .config(index)
            .unwrap()
            .ee_trajectories
            .iter()
            .map(|data| data.target.clone())
            .collect();
        controller.update(DT, index, &mut transform, &ground).unwrap();

        let config = controller.config(index).unwrap();
        if config.reproduction_count == 0 {
            continue;
        }
        let t_blend = config.timestamps()[config.next_frame] + config.reproduction_offset();
        for (data, previous) in config.ee_trajectories.iter().zip(&previous) {
            let (Some(previous), Some(target)) = (previous, &data.target) else {
                continue;
            };
            if target.alt_curve.is_none() {
                continue;
            }
            assert_eq!(previous.sub_trajectory_id, target.sub_trajectory_id);
            let before = previous.curve.eval_clamped(t_blend);
            let after = target.curve.eval_clamped(t_blend);
            assert!(before.distance(after) < 0.01, "target jumped from {before} to {after} at {t_blend}");
            blends += 1;
        }
    }
    assert!(blends > 0);
}

#[test]
fn test_root_follows_hip_target() {
    let (mut controller, index) = biped_controller(AnimationType::Walking);
    let ground = FlatTerrain::new(0.0);
    let mut transform = Transform::IDENTITY;
    for _ in 0..60 {
        controller.update(DT, index, &mut transform, &ground).unwrap();
    }

    assert!((transform.position.y - 2.0).abs() < 0.3, "hip at {}", transform.position);
    assert!((transform.position.z - 0.8).abs() < 0.1);

    let mut body = RigidBody::default();
    controller.apply_root_motion(index, &mut body).unwrap();
    assert!(body.linear_velocity().y > 0.5);
}

#[test]
fn test_idle_keeps_feet_planted() {
    let (mut controller, index) = biped_controller(AnimationType::Idle);
    let ground = FlatTerrain::new(0.0);
    let mut transform = Transform::IDENTITY;
    let mut planted = None;

    for _ in 0..60 {
        controller.update(DT, index, &mut transform, &ground).unwrap();
        let transforms = controller.world_transforms(index, &transform).unwrap();
        let foot = controller.rig().chain(IKRig::LEFT_LEG).unwrap().end_effector();
        let position = transforms[foot].w_axis.truncate();
        let first = *planted.get_or_insert(position);
        assert!(position.distance(first) < 0.02, "foot drifted to {position}");
    }
}
