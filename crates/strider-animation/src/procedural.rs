//! Procedural biped content
//!
//! A minimal Z-up biped (forward is +Y) with a walk cycle built from planar
//! two-bone leg solves. Used by the CLI driver and the locomotion tests in place
//! of motion-capture assets.

use std::f32::consts::PI;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use strider_core::math::{Quat, Vec3};

use crate::{AnimationClip, AnimationError, AnimationResult, AnimationTrack, Joint, Skeleton};

pub const ROOT: &str = "root";
pub const HIPS: &str = "hips";
pub const SPINE: &str = "spine";
pub const LEFT_UPPER_LEG: &str = "left_upper_leg";
pub const LEFT_LOWER_LEG: &str = "left_lower_leg";
pub const LEFT_FOOT: &str = "left_foot";
pub const LEFT_TOE: &str = "left_toe";
pub const RIGHT_UPPER_LEG: &str = "right_upper_leg";
pub const RIGHT_LOWER_LEG: &str = "right_lower_leg";
pub const RIGHT_FOOT: &str = "right_foot";
pub const RIGHT_TOE: &str = "right_toe";

/// Bind height of the hips joint
pub const BIND_HIP_HEIGHT: f32 = 0.9;
/// Thigh and shin length
pub const SEGMENT_LENGTH: f32 = 0.42;

const HIP_WIDTH: f32 = 0.1;
const HIP_DROP: f32 = 0.05;
const TOE_LENGTH: f32 = 0.12;

/// Gait cycle parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GaitParams {
    /// Forward distance covered by each foot per cycle
    pub stride: f32,
    /// Cycle duration in seconds
    pub duration: f32,
    /// Sampled frames per second
    pub frame_rate: f32,
    /// Hip height at double support
    pub hip_height: f32,
    /// Peak foot lift during swing
    pub step_height: f32,
    /// Vertical hip oscillation amplitude
    pub hip_bob: f32,
}

impl Default for GaitParams {
    fn default() -> Self {
        Self {
            stride: 1.0,
            duration: 1.0,
            frame_rate: 30.0,
            hip_height: 0.8,
            step_height: 0.08,
            hip_bob: 0.015,
        }
    }
}

/// Build the procedural biped skeleton
pub fn biped_skeleton() -> AnimationResult<Skeleton> {
    let down = Vec3::new(0.0, 0.0, -SEGMENT_LENGTH);
    let toe = Vec3::new(0.0, TOE_LENGTH, 0.0);
    Skeleton::new(
        "biped",
        vec![
            Joint::new(ROOT, None, Vec3::ZERO),
            Joint::new(HIPS, Some(0), Vec3::new(0.0, 0.0, BIND_HIP_HEIGHT)),
            Joint::new(SPINE, Some(1), Vec3::new(0.0, 0.0, 0.25)),
            Joint::new(LEFT_UPPER_LEG, Some(1), Vec3::new(-HIP_WIDTH, 0.0, -HIP_DROP)),
            Joint::new(LEFT_LOWER_LEG, Some(3), down),
            Joint::new(LEFT_FOOT, Some(4), down),
            Joint::new(LEFT_TOE, Some(5), toe),
            Joint::new(RIGHT_UPPER_LEG, Some(1), Vec3::new(HIP_WIDTH, 0.0, -HIP_DROP)),
            Joint::new(RIGHT_LOWER_LEG, Some(7), down),
            Joint::new(RIGHT_FOOT, Some(8), down),
            Joint::new(RIGHT_TOE, Some(9), toe),
        ],
    )
}

/// Walk cycle: the left foot is planted for the first half of the cycle while
/// the right foot swings, then the roles swap. The hips advance by one stride.
pub fn walk_cycle_clip(skeleton: Arc<Skeleton>, params: &GaitParams) -> AnimationResult<AnimationClip> {
    validate(params)?;
    let stride = params.stride;
    let lift = params.step_height;

    cycle_clip("walk", skeleton, params, |u| {
        let hip = Vec3::new(
            0.0,
            stride * u,
            params.hip_height + params.hip_bob * 0.5 * (1.0 - (4.0 * PI * u).cos()),
        );
        let left = if u <= 0.5 {
            Vec3::new(-HIP_WIDTH, stride * 0.25, 0.0)
        } else {
            let s = (u - 0.5) * 2.0;
            Vec3::new(-HIP_WIDTH, stride * (0.25 + s), lift * (PI * s).sin())
        };
        let right = if u <= 0.5 {
            let s = u * 2.0;
            Vec3::new(HIP_WIDTH, stride * (s - 0.25), lift * (PI * s).sin())
        } else {
            Vec3::new(HIP_WIDTH, stride * 0.75, 0.0)
        };
        (hip, left, right)
    })
}

/// Idle cycle: both feet planted under a slowly breathing pelvis
pub fn idle_clip(skeleton: Arc<Skeleton>, params: &GaitParams) -> AnimationResult<AnimationClip> {
    validate(params)?;
    cycle_clip("idle", skeleton, params, |u| {
        let hip = Vec3::new(0.0, 0.0, params.hip_height + 0.005 * (2.0 * PI * u).sin());
        (
            hip,
            Vec3::new(-HIP_WIDTH, 0.0, 0.0),
            Vec3::new(HIP_WIDTH, 0.0, 0.0),
        )
    })
}

fn validate(params: &GaitParams) -> AnimationResult<()> {
    if params.duration <= 0.0 || params.frame_rate <= 0.0 {
        return Err(AnimationError::InvalidGait(
            "duration and frame rate must be positive".to_string(),
        ));
    }
    let reach = 2.0 * SEGMENT_LENGTH;
    let thigh_height = params.hip_height + params.hip_bob - HIP_DROP;
    if thigh_height >= reach || params.hip_height <= params.step_height {
        return Err(AnimationError::InvalidGait(format!(
            "hip height {} does not fit a leg of length {}",
            params.hip_height, reach
        )));
    }
    Ok(())
}

/// Sample a cycle given the world hip and ankle positions at phase `u` in [0, 1]
fn cycle_clip(
    name: &str,
    skeleton: Arc<Skeleton>,
    params: &GaitParams,
    pose_at: impl Fn(f32) -> (Vec3, Vec3, Vec3),
) -> AnimationResult<AnimationClip> {
    let frames = (params.duration * params.frame_rate).round().max(2.0) as usize;
    let mut tracks: Vec<AnimationTrack> = skeleton
        .joints()
        .iter()
        .map(|joint| AnimationTrack::constant(joint.local_position, joint.local_rotation, joint.local_scale))
        .collect();

    let index = |name: &str| {
        skeleton
            .joint_index(name)
            .ok_or_else(|| AnimationError::InvalidGait(format!("skeleton has no joint '{name}'")))
    };
    let hips = index(HIPS)?;
    let legs = [
        (index(LEFT_UPPER_LEG)?, index(LEFT_LOWER_LEG)?, index(LEFT_FOOT)?),
        (index(RIGHT_UPPER_LEG)?, index(RIGHT_LOWER_LEG)?, index(RIGHT_FOOT)?),
    ];
    let thigh_offsets = [legs[0].0, legs[1].0].map(|joint| skeleton.joints()[joint].local_position);

    tracks[hips].positions.clear();
    tracks[hips].rotations.clear();
    for &(upper, lower, foot) in &legs {
        tracks[upper].rotations.clear();
        tracks[lower].rotations.clear();
        tracks[foot].rotations.clear();
    }

    for frame in 0..=frames {
        let u = frame as f32 / frames as f32;
        let time = u * params.duration;
        let (hip, left, right) = pose_at(u);

        tracks[hips].positions.push((time, hip));
        tracks[hips].rotations.push((time, Quat::IDENTITY));

        for (side, ankle) in [left, right].into_iter().enumerate() {
            let (upper, lower, foot) = legs[side];
            let (thigh, knee) = planar_leg_angles(hip + thigh_offsets[side], ankle);
            tracks[upper].rotations.push((time, Quat::from_rotation_x(thigh)));
            tracks[lower].rotations.push((time, Quat::from_rotation_x(knee)));
            tracks[foot].rotations.push((time, Quat::from_rotation_x(-(thigh + knee))));
        }
    }

    AnimationClip::new(name, skeleton, tracks, true)
}

/// Thigh and knee angles about +X placing the ankle at `ankle` from `thigh_top`
fn planar_leg_angles(thigh_top: Vec3, ankle: Vec3) -> (f32, f32) {
    let dy = ankle.y - thigh_top.y;
    let dz = ankle.z - thigh_top.z;
    let reach = 2.0 * SEGMENT_LENGTH;
    let distance = (dy * dy + dz * dz).sqrt().min(reach * 0.999);
    let swing = dy.atan2(-dz);
    let bend = (distance / reach).acos();
    (swing + bend, -2.0 * bend)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ankle_positions(clip: &AnimationClip, time: f32) -> (Vec3, Vec3) {
        let skeleton = clip.skeleton();
        let mut transforms = Vec::with_capacity(skeleton.len());
        for (index, joint) in skeleton.joints().iter().enumerate() {
            let local = glam::Mat4::from_scale_rotation_translation(
                clip.sample_scale(index, time),
                clip.sample_rotation(index, time),
                clip.sample_position(index, time),
            );
            let model = match joint.parent {
                Some(parent) => transforms[parent] * local,
                None => local,
            };
            transforms.push(model);
        }
        let left = skeleton.joint_index(LEFT_FOOT).unwrap();
        let right = skeleton.joint_index(RIGHT_FOOT).unwrap();
        (
            transforms[left].transform_point3(Vec3::ZERO),
            transforms[right].transform_point3(Vec3::ZERO),
        )
    }

    #[test]
    fn test_biped_skeleton() {
        let skeleton = biped_skeleton().unwrap();
        assert_eq!(skeleton.len(), 11);
        assert!(skeleton.is_ancestor(skeleton.joint_index(HIPS).unwrap(), skeleton.joint_index(RIGHT_TOE).unwrap()));
    }

    #[test]
    fn test_walk_cycle_plants_left_foot() {
        let skeleton = Arc::new(biped_skeleton().unwrap());
        let clip = walk_cycle_clip(skeleton, &GaitParams::default()).unwrap();
        assert_eq!(clip.frame_count(), 31);
        assert!((clip.duration - 1.0).abs() < 1e-6);

        let (left_start, _) = ankle_positions(&clip, 0.0);
        let (left_mid, right_mid) = ankle_positions(&clip, 0.4);
        assert!((left_start - left_mid).length() < 1e-4);
        assert!((left_start - Vec3::new(-0.1, 0.25, 0.0)).length() < 1e-3);
        assert!(right_mid.z > 0.0);

        let (left_end, _) = ankle_positions(&clip, 1.0);
        assert!((left_end.y - left_start.y - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_invalid_gait() {
        let skeleton = Arc::new(biped_skeleton().unwrap());
        let params = GaitParams {
            hip_height: 1.5,
            ..GaitParams::default()
        };
        assert!(matches!(
            walk_cycle_clip(skeleton, &params),
            Err(AnimationError::InvalidGait(_))
        ));
    }
}
