//! Trajectory data
//!
//! Per-attachment storage for end-effector and hip trajectories: the
//! original clip-space motion split into sub-trajectories, the current
//! world-space targets and the history of positions the character actually
//! reached.

use glam::{Quat, Vec3};

use crate::curve::{Lic1, Lic3};
use crate::CurveResult;

/// Whether an end effector moves during a sub-trajectory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrajectoryType {
    /// Planted on the ground
    Static,
    /// Swinging toward the next plant
    Dynamic,
}

/// A curve segment of end-effector motion
#[derive(Debug, Clone, PartialEq)]
pub struct EETrajectory {
    pub curve: Lic3,
    pub kind: TrajectoryType,
    /// Identity of the originating sub-trajectory; `None` for fixed trajectories
    pub sub_trajectory_id: Option<usize>,
    /// Time at which the hip peaks during this segment
    pub hip_max_altitude_time: f32,
    /// The generated curve before it was blended into the previous target
    pub alt_curve: Option<Lic3>,
}

impl EETrajectory {
    pub fn new(curve: Lic3, kind: TrajectoryType, sub_trajectory_id: Option<usize>, hip_max_altitude_time: f32) -> Self {
        Self {
            curve,
            kind,
            sub_trajectory_id,
            hip_max_altitude_time,
            alt_curve: None,
        }
    }

    /// Planted trajectory not tied to any sub-trajectory
    pub fn fixed(curve: Lic3) -> Self {
        let start = curve.start_t();
        Self::new(curve, TrajectoryType::Static, None, start)
    }

    pub fn is_dynamic(&self) -> bool {
        self.kind == TrajectoryType::Dynamic
    }

    /// Curve as generated, ignoring any blend with the previous target
    pub fn unblended_curve(&self) -> &Lic3 {
        self.alt_curve.as_ref().unwrap_or(&self.curve)
    }
}

/// Sub-trajectory a target was generated from, and the offset that maps its
/// animation times onto reproduction time
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TargetSource {
    pub sub_trajectory: usize,
    pub time_offset: f32,
}

/// End-effector trajectory state of one chain within one attachment
#[derive(Debug, Clone)]
pub struct EEGlobalTrajectoryData {
    /// Floor-normalised model-space positions over one cycle
    pub original: Lic3,
    /// Displacement accumulated per cycle
    pub cycle_offset: Vec3,
    /// Alternating static and dynamic segments covering the cycle in order
    pub sub_trajectories: Vec<EETrajectory>,
    /// Support flag per frame
    pub support_frames: Vec<bool>,
    /// Ground clearance of the end effector, per frame time
    pub support_heights: Lic1,
    /// Current world-space target
    pub target: Option<EETrajectory>,
    pub target_source: Option<TargetSource>,
    /// World-space positions reached, keyed by reproduction time
    pub saved_positions: Option<Lic3>,
}

impl EEGlobalTrajectoryData {
    /// Index of the sub-trajectory covering both animation times
    pub fn sub_trajectory_index(&self, anim_time: f32, next_anim_time: f32) -> Option<usize> {
        self.sub_trajectories
            .iter()
            .position(|sub| sub.curve.in_open_right_t_range(anim_time) && sub.curve.in_t_range(next_anim_time))
    }

    pub fn sub_trajectory_by_id(&self, id: usize) -> Option<&EETrajectory> {
        self.sub_trajectories
            .iter()
            .find(|sub| sub.sub_trajectory_id == Some(id))
    }

    /// Original motion sampled over an animation-time range that may extend
    /// past the clip cycle
    pub fn sample_extended_sub_trajectory(&self, min_t: f32, max_t: f32) -> CurveResult<Lic3> {
        self.original.sample_cyclic(min_t, max_t, self.cycle_offset)
    }

    /// Original position at any animation time
    pub fn original_position(&self, anim_time: f32) -> Vec3 {
        self.original.eval_cyclic(anim_time, self.cycle_offset)
    }

    /// Ground clearance at any animation time
    pub fn support_height(&self, anim_time: f32) -> f32 {
        self.support_heights.eval_cyclic(anim_time, 0.0)
    }

    /// Saved world position at a reproduction time inside the saved range
    pub fn saved_position(&self, rep_time: f32) -> Option<Vec3> {
        self.saved_positions
            .as_ref()
            .filter(|curve| curve.in_t_range(rep_time))
            .map(|curve| curve.eval(rep_time))
    }
}

/// World-space hip target curves
#[derive(Debug, Clone, PartialEq)]
pub struct HipTarget {
    pub translations: Lic3,
    pub angles: Lic1,
    pub axes: Lic3,
}

impl HipTarget {
    pub fn translation(&self, rep_time: f32) -> Vec3 {
        self.translations.eval_clamped(rep_time)
    }

    pub fn rotation(&self, rep_time: f32) -> Quat {
        rotation_from_axis_angle(self.axes.eval_clamped(rep_time), self.angles.eval_clamped(rep_time))
    }

    /// Blend into `next` at `t`
    pub fn transition(&self, next: &HipTarget, t: f32) -> CurveResult<HipTarget> {
        Ok(HipTarget {
            translations: Lic3::transition(&self.translations, &next.translations, t)?,
            angles: Lic1::transition(&self.angles, &next.angles, t)?,
            axes: Lic3::transition(&self.axes, &next.axes, t)?,
        })
    }
}

fn rotation_from_axis_angle(axis: Vec3, angle: f32) -> Quat {
    Quat::from_axis_angle(axis.try_normalize().unwrap_or(Vec3::X), angle)
}

/// Hip trajectory state within one attachment
#[derive(Debug, Clone)]
pub struct HipGlobalTrajectoryData {
    /// Floor-normalised model-space hip translations over one cycle
    pub original_translations: Lic3,
    pub cycle_offset: Vec3,
    /// Hip rotation as a continuous angle and axis pair
    pub original_angles: Lic1,
    pub original_axes: Lic3,
    pub target: Option<HipTarget>,
    /// World-space hip positions reached, keyed by reproduction time
    pub saved_positions: Option<Lic3>,
}

impl HipGlobalTrajectoryData {
    /// Original translations, angles and axes over an animation-time range
    /// that may extend past the clip cycle
    pub fn sample_original(&self, min_t: f32, max_t: f32) -> CurveResult<HipTarget> {
        Ok(HipTarget {
            translations: self
                .original_translations
                .sample_cyclic(min_t, max_t, self.cycle_offset)?,
            angles: self.original_angles.sample_cyclic(min_t, max_t, 0.0)?,
            axes: self.original_axes.sample_cyclic(min_t, max_t, Vec3::ZERO)?,
        })
    }

    pub fn original_translation(&self, anim_time: f32) -> Vec3 {
        self.original_translations.eval_cyclic(anim_time, self.cycle_offset)
    }

    pub fn original_rotation(&self, anim_time: f32) -> Quat {
        rotation_from_axis_angle(
            self.original_axes.eval_cyclic(anim_time, Vec3::ZERO),
            self.original_angles.eval_cyclic(anim_time, 0.0),
        )
    }

    pub fn target_translation(&self, rep_time: f32) -> Option<Vec3> {
        self.target.as_ref().map(|target| target.translation(rep_time))
    }

    pub fn target_rotation(&self, rep_time: f32) -> Option<Quat> {
        self.target.as_ref().map(|target| target.rotation(rep_time))
    }

    pub fn saved_position(&self, rep_time: f32) -> Option<Vec3> {
        self.saved_positions
            .as_ref()
            .filter(|curve| curve.in_t_range(rep_time))
            .map(|curve| curve.eval(rep_time))
    }
}

/// Split rotations into continuous angle and axis sequences. Axis flips are
/// folded into the angle sign; identity rotations reuse the previous axis.
pub fn angle_axis_sequence(rotations: &[Quat]) -> (Vec<f32>, Vec<Vec3>) {
    let mut angles = Vec::with_capacity(rotations.len());
    let mut axes = Vec::with_capacity(rotations.len());
    let mut previous_axis = Vec3::X;
    for rotation in rotations {
        let rotation = rotation.normalize();
        let rotation = if rotation.w < 0.0 { -rotation } else { rotation };
        let (mut axis, mut angle) = rotation.to_axis_angle();
        if angle.abs() < 1e-6 {
            axis = previous_axis;
            angle = 0.0;
        } else if axis.dot(previous_axis) < 0.0 {
            axis = -axis;
            angle = -angle;
        }
        angles.push(angle);
        axes.push(axis);
        previous_axis = axis;
    }
    (angles, axes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn walk_data() -> EEGlobalTrajectoryData {
        let original = Lic3::new(
            vec![Vec3::ZERO, Vec3::ZERO, Vec3::new(0.0, 1.0, 0.0)],
            vec![0.0, 0.5, 1.0],
        )
        .unwrap();
        let planted = EETrajectory::new(original.sample(0.0, 0.5).unwrap(), TrajectoryType::Static, Some(0), 0.25);
        let swing = EETrajectory::new(original.sample(0.5, 1.0).unwrap(), TrajectoryType::Dynamic, Some(1), 0.75);
        EEGlobalTrajectoryData {
            cycle_offset: original.displacement(),
            original,
            sub_trajectories: vec![planted, swing],
            support_frames: vec![true, true, false],
            support_heights: Lic1::new(vec![0.0, 0.0, 0.0], vec![0.0, 0.5, 1.0]).unwrap(),
            target: None,
            target_source: None,
            saved_positions: None,
        }
    }

    #[test]
    fn test_sub_trajectory_lookup() {
        let data = walk_data();
        assert_eq!(data.sub_trajectory_index(0.1, 0.2), Some(0));
        assert_eq!(data.sub_trajectory_index(0.5, 0.6), Some(1));
        assert_eq!(data.sub_trajectory_index(0.4, 0.6), None);
        assert_eq!(data.sub_trajectory_by_id(1).unwrap().kind, TrajectoryType::Dynamic);
    }

    #[test]
    fn test_unblended_curve_prefers_alt_curve() {
        let data = walk_data();
        let mut swing = data.sub_trajectories[1].clone();
        assert_eq!(swing.unblended_curve(), &swing.curve);

        let generated = swing.curve.clone();
        swing.curve = Lic3::constant(Vec3::ZERO, 0.5, 1.0).unwrap();
        swing.alt_curve = Some(generated.clone());
        assert_eq!(swing.unblended_curve(), &generated);
    }

    #[test]
    fn test_extended_sub_trajectory_accumulates_cycle_offset() {
        let data = walk_data();
        let extended = data.sample_extended_sub_trajectory(0.5, 1.5).unwrap();
        assert!((extended.end() - Vec3::new(0.0, 1.0, 0.0)).length() < 1e-5);
        assert!((data.original_position(1.75) - Vec3::new(0.0, 1.5, 0.0)).length() < 1e-5);
    }

    #[test]
    fn test_saved_position_respects_range() {
        let mut data = walk_data();
        data.saved_positions = Some(Lic3::constant(Vec3::ONE, 2.0, 3.0).unwrap());
        assert_eq!(data.saved_position(2.5), Some(Vec3::ONE));
        assert_eq!(data.saved_position(3.5), None);
    }

    #[test]
    fn test_angle_axis_sequence_is_continuous() {
        let rotations = [
            Quat::IDENTITY,
            Quat::from_rotation_x(0.2),
            Quat::from_rotation_x(-0.2),
        ];
        let (angles, axes) = angle_axis_sequence(&rotations);
        assert_eq!(angles[0], 0.0);
        assert!((angles[1] - 0.2).abs() < 1e-5);
        assert!((angles[2] + 0.2).abs() < 1e-5);
        assert!(axes.iter().all(|axis| (*axis - Vec3::X).length() < 1e-5));
    }

    #[test]
    fn test_hip_target_rotation() {
        let target = HipTarget {
            translations: Lic3::constant(Vec3::Z, 0.0, 1.0).unwrap(),
            angles: Lic1::new(vec![0.0, 0.4], vec![0.0, 1.0]).unwrap(),
            axes: Lic3::constant(Vec3::X * 2.0, 0.0, 1.0).unwrap(),
        };
        let rotation = target.rotation(0.5);
        assert!(rotation.angle_between(Quat::from_rotation_x(0.2)) < 1e-4);
        assert_eq!(target.translation(5.0), Vec3::Z);
    }
}
