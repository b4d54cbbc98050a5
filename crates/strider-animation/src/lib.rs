//! # Strider Animation
//!
//! Skeleton and animation clip data consumed by the locomotion core.
//!
//! ## Features
//! - Topologically sorted skeletons with name lookup
//! - Per-joint keyframe tracks with independent timestamps
//! - Rotation decompression to a uniform frame grid
//! - Procedural biped walk and idle cycles

pub mod clip;
pub mod procedural;
pub mod skeleton;

pub use clip::{AnimationClip, AnimationTrack};
pub use procedural::{GaitParams, biped_skeleton, idle_clip, walk_cycle_clip};
pub use skeleton::{Joint, Skeleton};

use thiserror::Error;

/// Animation errors
#[derive(Error, Debug)]
pub enum AnimationError {
    #[error("Skeleton has no joints")]
    EmptySkeleton,

    #[error("Joint {0} has an empty name")]
    EmptyJointName(usize),

    #[error("Duplicate joint name: {0}")]
    DuplicateJointName(String),

    #[error("Joint {joint} has invalid parent {parent}")]
    InvalidParent { joint: usize, parent: usize },

    #[error("Clip has {tracks} tracks but skeleton has {joints} joints")]
    TrackCountMismatch { tracks: usize, joints: usize },

    #[error("Keyframe times are not strictly increasing for joint {0}")]
    UnorderedKeys(String),

    #[error("Clip has no rotation samples")]
    EmptyClip,

    #[error("Frame {frame} out of range ({count} frames)")]
    FrameOutOfRange { frame: usize, count: usize },

    #[error("Joint index {0} out of range")]
    JointOutOfRange(usize),

    #[error("Clip is not decompressed")]
    NotDecompressed,

    #[error("Invalid gait parameters: {0}")]
    InvalidGait(String),
}

/// Result type for animation operations
pub type AnimationResult<T> = Result<T, AnimationError>;
