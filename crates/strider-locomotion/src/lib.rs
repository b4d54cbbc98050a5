//! # Strider Locomotion
//!
//! Procedural locomotion core: adapts a baked walk or idle cycle to terrain
//! and heading at runtime and produces corrected joint rotations every frame.
//!
//! ## Features
//! - Linearly interpolated parametric curves ([`curve::Lic`])
//! - Generic gradient descent over pluggable cost terms
//! - Forward kinematics and angle-constrained inverse kinematics
//! - Rig and chain construction from named joints
//! - Support/swing classification and terrain-adapted target trajectories
//! - Per-frame controller writing the root transform and corrected poses

pub mod config;
pub mod controller;
pub mod curve;
pub mod environment;
pub mod generator;
pub mod gradient_descent;
pub mod kinematics;
pub mod rig;
pub mod trajectory;

pub use config::{AnimationType, IKRigConfig};
pub use controller::IKRigController;
pub use curve::{CurvePoint, Lic, Lic1, Lic3};
pub use environment::EnvironmentData;
pub use generator::TrajectoryGenerator;
pub use gradient_descent::{CostTerm, DescentReport, DescentSettings, DescentStepHook, GradientDescent};
pub use kinematics::{ForwardKinematics, IkProblem, IkSolution, InverseKinematics, RotationSource};
pub use rig::{ChainEnds, IKChain, IKNode, IKRig, JointData, RigData};
pub use trajectory::{EEGlobalTrajectoryData, EETrajectory, HipGlobalTrajectoryData, TrajectoryType};

use serde::{Deserialize, Serialize};
use strider_animation::AnimationError;
use thiserror::Error;

/// Joint index into a skeleton
pub type JointIndex = usize;
/// Chain index into a rig
pub type ChainIndex = usize;
/// Attached animation index
pub type AnimationIndex = usize;
/// Frame index into a decompressed clip
pub type FrameIndex = usize;

/// Curve construction and editing errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CurveError {
    #[error("Curve needs at least two points, got {0}")]
    NotEnoughPoints(usize),

    #[error("Curve has {points} points but {times} time values")]
    LengthMismatch { points: usize, times: usize },

    #[error("Curve time values not ascending by epsilon at index {index}: {previous} -> {current}")]
    UnorderedTimes { index: usize, previous: f32, current: f32 },

    #[error("Curve epsilon must be positive, got {0}")]
    InvalidEpsilon(f32),

    #[error("Degenerate sample range [{start}, {end}]")]
    DegenerateRange { start: f32, end: f32 },

    #[error("Invalid point displacement: {0}")]
    InvalidDisplacement(String),

    #[error("Time values could not be separated after correction")]
    CollapsedTValues,

    #[error("Curve has zero length")]
    ZeroLength,

    #[error("Point index {index} out of range ({len} points)")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("Time offset {0} is smaller than the curve epsilon")]
    InvalidOffset(f32),
}

/// Result type for curve operations
pub type CurveResult<T> = Result<T, CurveError>;

/// Rig configuration errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RigError {
    #[error("Chain '{0}' has an empty joint name")]
    EmptyJointName(String),

    #[error("Chain '{chain}' uses '{joint}' as both base and end effector")]
    IdenticalJoints { chain: String, joint: String },

    #[error("Unknown joint: {0}")]
    UnknownJoint(String),

    #[error("'{base}' is not an ancestor of '{end_effector}'")]
    NotAncestor { base: String, end_effector: String },

    #[error("Clip '{0}' uses a different skeleton")]
    SkeletonMismatch(String),

    #[error("Clip '{clip}' has no {channel} samples for joint '{joint}'")]
    MissingTrack { clip: String, joint: String, channel: &'static str },

    #[error("Clip '{clip}' animates the translation of joint '{joint}'")]
    AnimatedTranslation { clip: String, joint: String },

    #[error("Clip '{clip}' animates the scale of joint '{joint}'")]
    AnimatedScale { clip: String, joint: String },

    #[error("Joint '{0}' above the hip is not at identity")]
    NonIdentityAboveHip(String),

    #[error("Chain '{chain}' rotates about {axis} instead of the X axis")]
    LegRotationAxis { chain: String, axis: glam::Vec3 },

    #[error("Clip '{0}' needs at least two frames and a positive duration")]
    DegenerateClip(String),
}

/// Result type for rig operations
pub type RigResult<T> = Result<T, RigError>;

/// Top-level locomotion errors
#[derive(Error, Debug)]
pub enum LocomotionError {
    #[error("Curve error: {0}")]
    Curve(#[from] CurveError),

    #[error("Rig error: {0}")]
    Rig(#[from] RigError),

    #[error("Animation error: {0}")]
    Animation(#[from] AnimationError),

    #[error("Unknown animation index {0}")]
    UnknownAnimation(usize),
}

/// Result type for locomotion operations
pub type LocomotionResult<T> = Result<T, LocomotionError>;

/// Inverse kinematics settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IkSettings {
    /// Descent rate before normalisation by squared chain length
    pub rate: f32,
    pub max_iterations: usize,
    pub target_delta: f32,
    /// Grow the rate after improving steps and halve it after failed ones
    pub adaptive: bool,
}

impl Default for IkSettings {
    fn default() -> Self {
        Self {
            rate: 0.5,
            max_iterations: 100,
            target_delta: 1e-6,
            adaptive: true,
        }
    }
}

/// Trajectory generation settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrajectorySettings {
    /// Hip smoothing descent rate
    pub smoothing_rate: f32,
    pub smoothing_iterations: usize,
    pub smoothing_target_delta: f32,
    /// Per-frame support threshold as a fraction of rig height
    pub support_distance_factor: f32,
    /// Samples per stride when marching over terrain
    pub stride_steps: usize,
    /// Samples when searching for a stride starting point
    pub starting_point_steps: usize,
    /// Largest terrain height change accepted inside a stride, relative to rig height
    pub max_step_height_ratio: f32,
    /// Minimum hip clearance over the lowest foot target, relative to rig height
    pub hip_min_height_ratio: f32,
    /// Hip height search increment, relative to rig height
    pub hip_height_step_ratio: f32,
    pub hip_height_max_steps: usize,
    /// Minimum hip travel between recorded frames, relative to rig height
    pub hip_record_distance_ratio: f32,
    /// History kept in the saved-position curves, in clip durations
    pub saved_history_durations: f32,
    /// Cut strides short before steps higher than the limit
    pub stride_validation: bool,
    /// Shorten strides where the terrain query fails
    pub stride_correction: bool,
}

impl Default for TrajectorySettings {
    fn default() -> Self {
        Self {
            smoothing_rate: 1e-5,
            smoothing_iterations: 600,
            smoothing_target_delta: 1e-6,
            support_distance_factor: 0.015,
            stride_steps: 8,
            starting_point_steps: 8,
            max_step_height_ratio: 0.15,
            hip_min_height_ratio: 0.25,
            hip_height_step_ratio: 0.002,
            hip_height_max_steps: 1000,
            hip_record_distance_ratio: 1e-4,
            saved_history_durations: 2.0,
            stride_validation: true,
            stride_correction: true,
        }
    }
}

/// Locomotion configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocomotionConfig {
    pub ik: IkSettings,
    pub trajectory: TrajectorySettings,
    /// Minimum time separation between curve samples
    pub curve_epsilon: f32,
    /// Solve IK on new frames; when off the baked rotations play back unchanged
    pub ik_enabled: bool,
}

impl Default for LocomotionConfig {
    fn default() -> Self {
        Self {
            ik: IkSettings::default(),
            trajectory: TrajectorySettings::default(),
            curve_epsilon: curve::DEFAULT_EPSILON,
            ik_enabled: true,
        }
    }
}
