//! Per-attachment state
//!
//! An [`IKRigConfig`] is created for every clip attached to a rig. It owns the
//! decompressed base rotations, the IK-corrected dynamic rotations, playback
//! timing and the trajectory data generated for that clip.

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

use crate::kinematics::RotationSource;
use crate::trajectory::{EEGlobalTrajectoryData, HipGlobalTrajectoryData};
use crate::{FrameIndex, JointIndex, RigError, RigResult};

/// Kind of motion a clip carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnimationType {
    /// Feet stay planted for the whole clip
    Idle,
    #[default]
    Walking,
}

/// Playback and trajectory state of one clip attached to a rig
#[derive(Debug, Clone)]
pub struct IKRigConfig {
    pub name: String,
    pub animation_type: AnimationType,
    timestamps: Vec<f32>,
    /// `[frame][joint]` rotations of the clip, hip ancestors folded into the hip
    base_rotations: Vec<Vec<Quat>>,
    /// `[frame][joint]` rotations after IK correction
    dynamic_rotations: Vec<Vec<Quat>>,
    /// Constant local translations; the hip translation is zeroed
    positions: Vec<Vec3>,
    scales: Vec<Vec3>,

    pub current_frame: FrameIndex,
    pub next_frame: FrameIndex,
    /// Seconds played since the attachment was first used
    pub reproduction_time: f32,
    /// Completed cycles
    pub reproduction_count: u32,
    pub on_new_frame: bool,
    pub active: bool,
    pub motion_initialized: bool,
    pub transitioning: bool,
    started: bool,

    pub ee_trajectories: Vec<EEGlobalTrajectoryData>,
    pub hip_trajectory: HipGlobalTrajectoryData,
    /// The two frames most recently written by IK
    pub last_updated_frames: [Option<FrameIndex>; 2],
    /// Warm start for the next IK solve
    pub ik_angles: Vec<f32>,
}

impl IKRigConfig {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: impl Into<String>,
        animation_type: AnimationType,
        timestamps: Vec<f32>,
        base_rotations: Vec<Vec<Quat>>,
        positions: Vec<Vec3>,
        scales: Vec<Vec3>,
        ee_trajectories: Vec<EEGlobalTrajectoryData>,
        hip_trajectory: HipGlobalTrajectoryData,
    ) -> RigResult<Self> {
        let name = name.into();
        let degenerate = timestamps.len() < 2
            || base_rotations.len() != timestamps.len()
            || timestamps[timestamps.len() - 1] <= timestamps[0];
        if degenerate {
            return Err(RigError::DegenerateClip(name));
        }

        Ok(Self {
            name,
            animation_type,
            dynamic_rotations: base_rotations.clone(),
            timestamps,
            base_rotations,
            positions,
            scales,
            current_frame: 0,
            next_frame: 1,
            reproduction_time: 0.0,
            reproduction_count: 0,
            on_new_frame: false,
            active: false,
            motion_initialized: false,
            transitioning: false,
            started: false,
            ee_trajectories,
            hip_trajectory,
            last_updated_frames: [None; 2],
            ik_angles: Vec::new(),
        })
    }

    pub fn timestamps(&self) -> &[f32] {
        &self.timestamps
    }

    pub fn frame_count(&self) -> usize {
        self.timestamps.len()
    }

    pub fn last_frame(&self) -> FrameIndex {
        self.timestamps.len() - 1
    }

    pub fn start_time(&self) -> f32 {
        self.timestamps[0]
    }

    /// Cycle length
    pub fn duration(&self) -> f32 {
        self.timestamps[self.last_frame()] - self.timestamps[0]
    }

    pub fn joint_positions(&self) -> &[Vec3] {
        &self.positions
    }

    pub fn joint_scales(&self) -> &[Vec3] {
        &self.scales
    }

    pub fn base_rotations(&self, frame: FrameIndex) -> &[Quat] {
        &self.base_rotations[frame.min(self.last_frame())]
    }

    pub fn dynamic_rotations(&self, frame: FrameIndex) -> &[Quat] {
        &self.dynamic_rotations[frame.min(self.last_frame())]
    }

    pub fn rotations(&self, frame: FrameIndex, source: RotationSource) -> &[Quat] {
        match source {
            RotationSource::Baked => self.base_rotations(frame),
            RotationSource::Dynamic => self.dynamic_rotations(frame),
        }
    }

    pub fn set_dynamic_rotation(&mut self, frame: FrameIndex, joint: JointIndex, rotation: Quat) {
        if let Some(slot) = self
            .dynamic_rotations
            .get_mut(frame)
            .and_then(|frame| frame.get_mut(joint))
        {
            *slot = rotation;
        }
    }

    /// Discard IK corrections
    pub fn reset_dynamic_rotations(&mut self) {
        self.dynamic_rotations.clone_from(&self.base_rotations);
        self.last_updated_frames = [None; 2];
        self.ik_angles.clear();
    }

    /// Wrap an arbitrary time into `[start, start + duration)`
    pub fn adjust_animation_time(&self, time: f32) -> f32 {
        self.start_time() + (time - self.start_time()).rem_euclid(self.duration())
    }

    /// Animation time at a reproduction time
    pub fn animation_time(&self, reproduction_time: f32) -> f32 {
        self.start_time() + reproduction_time.rem_euclid(self.duration())
    }

    pub fn current_animation_time(&self) -> f32 {
        self.animation_time(self.reproduction_time)
    }

    /// Offset mapping animation times of the current cycle onto reproduction time
    pub fn reproduction_offset(&self) -> f32 {
        self.reproduction_count as f32 * self.duration() - self.start_time()
    }

    /// Reproduction time of `frame` in the current cycle shifted by `cycle_offset` cycles
    pub fn frame_reproduction_time(&self, frame: FrameIndex, cycle_offset: i32) -> f32 {
        let cycles = self.reproduction_count as f32 + cycle_offset as f32;
        cycles * self.duration() + self.timestamps[frame.min(self.last_frame())] - self.start_time()
    }

    /// Frame whose interval contains an animation time, in `[0, n - 2]`
    pub fn frame_at(&self, animation_time: f32) -> FrameIndex {
        let index = self.timestamps.partition_point(|t| *t <= animation_time);
        index.saturating_sub(1).min(self.frame_count() - 2)
    }

    /// Interpolation factor between the current and next frame
    pub fn frame_fraction(&self) -> f32 {
        let t0 = self.timestamps[self.current_frame];
        let t1 = self.timestamps[self.next_frame];
        ((self.current_animation_time() - t0) / (t1 - t0)).clamp(0.0, 1.0)
    }

    /// Advance playback by `dt` seconds and report whether a new frame began
    pub fn advance(&mut self, dt: f32) -> bool {
        let previous_frame = self.current_frame;
        let previous_count = self.reproduction_count;

        self.reproduction_time += dt.max(0.0);
        self.reproduction_count = (self.reproduction_time / self.duration()).floor() as u32;
        self.current_frame = self.frame_at(self.current_animation_time());
        self.next_frame = self.current_frame + 1;

        self.on_new_frame =
            !self.started || previous_frame != self.current_frame || previous_count != self.reproduction_count;
        self.started = true;
        self.on_new_frame
    }

    /// Remember that IK wrote `frame`
    pub fn record_updated_frame(&mut self, frame: FrameIndex) {
        self.last_updated_frames = [Some(frame), self.last_updated_frames[0]];
    }

    pub fn was_recently_updated(&self, frame: FrameIndex) -> bool {
        self.last_updated_frames.contains(&Some(frame))
    }

    /// Pose between the current and next frame
    pub fn interpolated_rotations(&self, source: RotationSource) -> Vec<Quat> {
        let fraction = self.frame_fraction();
        self.rotations(self.current_frame, source)
            .iter()
            .zip(self.rotations(self.next_frame, source))
            .map(|(a, b)| a.slerp(*b, fraction))
            .collect()
    }
}
