//! Animation clips
//!
//! A clip holds one track per skeleton joint. Position, rotation and scale keys
//! are timestamped independently; [`AnimationClip::decompressed`] resamples the
//! rotations so every joint shares the same frame grid.

use std::sync::Arc;

use strider_core::math::{Quat, Vec3};

use crate::{AnimationError, AnimationResult, Skeleton};

/// Time tolerance used when merging rotation timestamps
const TIME_TOLERANCE: f32 = 1e-6;

/// Keyframe track for a single joint
#[derive(Debug, Clone, Default)]
pub struct AnimationTrack {
    pub positions: Vec<(f32, Vec3)>,
    pub rotations: Vec<(f32, Quat)>,
    pub scales: Vec<(f32, Vec3)>,
}

impl AnimationTrack {
    /// Track holding a single key for each channel
    pub fn constant(position: Vec3, rotation: Quat, scale: Vec3) -> Self {
        Self {
            positions: vec![(0.0, position)],
            rotations: vec![(0.0, rotation)],
            scales: vec![(0.0, scale)],
        }
    }
}

/// Animation clip bound to a skeleton
#[derive(Debug, Clone)]
pub struct AnimationClip {
    pub name: String,
    pub duration: f32,
    pub looping: bool,
    skeleton: Arc<Skeleton>,
    tracks: Vec<AnimationTrack>,
}

impl AnimationClip {
    /// Create a clip, validating track count and key ordering
    pub fn new(
        name: impl Into<String>,
        skeleton: Arc<Skeleton>,
        tracks: Vec<AnimationTrack>,
        looping: bool,
    ) -> AnimationResult<Self> {
        if tracks.len() != skeleton.len() {
            return Err(AnimationError::TrackCountMismatch {
                tracks: tracks.len(),
                joints: skeleton.len(),
            });
        }

        let mut duration: f32 = 0.0;
        for (index, track) in tracks.iter().enumerate() {
            let ordered = strictly_increasing(&track.positions)
                && strictly_increasing(&track.rotations)
                && strictly_increasing(&track.scales);
            if !ordered {
                let name = skeleton
                    .joint(index)
                    .map(|joint| joint.name.clone())
                    .unwrap_or_default();
                return Err(AnimationError::UnorderedKeys(name));
            }
            for last in [
                track.positions.last().map(|k| k.0),
                track.rotations.last().map(|k| k.0),
                track.scales.last().map(|k| k.0),
            ]
            .into_iter()
            .flatten()
            {
                duration = duration.max(last);
            }
        }

        Ok(Self {
            name: name.into(),
            duration,
            looping,
            skeleton,
            tracks,
        })
    }

    pub fn skeleton(&self) -> &Arc<Skeleton> {
        &self.skeleton
    }

    pub fn tracks(&self) -> &[AnimationTrack] {
        &self.tracks
    }

    pub fn track(&self, joint: usize) -> Option<&AnimationTrack> {
        self.tracks.get(joint)
    }

    /// Sample a joint's local translation, falling back to the bind pose
    pub fn sample_position(&self, joint: usize, time: f32) -> Vec3 {
        self.tracks
            .get(joint)
            .and_then(|track| sample_keys(&track.positions, time, Vec3::lerp))
            .or_else(|| self.skeleton.joint(joint).map(|j| j.local_position))
            .unwrap_or(Vec3::ZERO)
    }

    /// Sample a joint's local rotation, falling back to the bind pose
    pub fn sample_rotation(&self, joint: usize, time: f32) -> Quat {
        self.tracks
            .get(joint)
            .and_then(|track| sample_keys(&track.rotations, time, Quat::slerp))
            .or_else(|| self.skeleton.joint(joint).map(|j| j.local_rotation))
            .unwrap_or(Quat::IDENTITY)
    }

    /// Sample a joint's local scale, falling back to the bind pose
    pub fn sample_scale(&self, joint: usize, time: f32) -> Vec3 {
        self.tracks
            .get(joint)
            .and_then(|track| sample_keys(&track.scales, time, Vec3::lerp))
            .or_else(|| self.skeleton.joint(joint).map(|j| j.local_scale))
            .unwrap_or(Vec3::ONE)
    }

    /// Every joint has the same rotation timestamps
    pub fn is_decompressed(&self) -> bool {
        let Some(first) = self.tracks.first() else {
            return false;
        };
        if first.rotations.is_empty() {
            return false;
        }
        self.tracks.iter().all(|track| {
            track.rotations.len() == first.rotations.len()
                && track
                    .rotations
                    .iter()
                    .zip(&first.rotations)
                    .all(|(a, b)| (a.0 - b.0).abs() <= TIME_TOLERANCE)
        })
    }

    /// Copy of this clip with rotations resampled onto the union of all
    /// rotation timestamps. The source clip is left untouched.
    pub fn decompressed(&self) -> AnimationResult<Self> {
        let mut timestamps: Vec<f32> = self
            .tracks
            .iter()
            .flat_map(|track| track.rotations.iter().map(|key| key.0))
            .collect();
        if timestamps.is_empty() {
            return Err(AnimationError::EmptyClip);
        }
        timestamps.sort_by(f32::total_cmp);
        timestamps.dedup_by(|a, b| (*a - *b).abs() <= TIME_TOLERANCE);

        let tracks = (0..self.tracks.len())
            .map(|joint| {
                let track = &self.tracks[joint];
                AnimationTrack {
                    positions: track.positions.clone(),
                    rotations: timestamps
                        .iter()
                        .map(|&t| (t, self.sample_rotation(joint, t)))
                        .collect(),
                    scales: track.scales.clone(),
                }
            })
            .collect();

        log::debug!(
            "Decompressed clip '{}' to {} rotation frames",
            self.name,
            timestamps.len()
        );

        Ok(Self {
            name: self.name.clone(),
            duration: self.duration,
            looping: self.looping,
            skeleton: Arc::clone(&self.skeleton),
            tracks,
        })
    }

    /// Rotation frame timestamps of a decompressed clip
    pub fn frame_timestamps(&self) -> Vec<f32> {
        self.tracks
            .first()
            .map(|track| track.rotations.iter().map(|key| key.0).collect())
            .unwrap_or_default()
    }

    /// Number of rotation frames of a decompressed clip
    pub fn frame_count(&self) -> usize {
        self.tracks.first().map_or(0, |track| track.rotations.len())
    }

    /// Overwrite the rotation key of `joint` at `frame`
    pub fn set_rotation(&mut self, frame: usize, joint: usize, rotation: Quat) -> AnimationResult<()> {
        let track = self
            .tracks
            .get_mut(joint)
            .ok_or(AnimationError::JointOutOfRange(joint))?;
        let count = track.rotations.len();
        let key = track
            .rotations
            .get_mut(frame)
            .ok_or(AnimationError::FrameOutOfRange { frame, count })?;
        key.1 = rotation;
        Ok(())
    }
}

fn strictly_increasing<T>(keys: &[(f32, T)]) -> bool {
    keys.windows(2).all(|pair| pair[1].0 > pair[0].0)
}

/// Sample a key list, clamping outside its range
fn sample_keys<T: Copy>(keys: &[(f32, T)], time: f32, interpolate: impl Fn(T, T, f32) -> T) -> Option<T> {
    let first = keys.first()?;
    let last = keys.last()?;
    if time <= first.0 {
        return Some(first.1);
    }
    if time >= last.0 {
        return Some(last.1);
    }

    let next = keys.partition_point(|key| key.0 <= time);
    let (t0, a) = keys[next - 1];
    let (t1, b) = keys[next];
    Some(interpolate(a, b, (time - t0) / (t1 - t0)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Joint;

    fn skeleton() -> Arc<Skeleton> {
        Arc::new(
            Skeleton::new(
                "pair",
                vec![
                    Joint::new("a", None, Vec3::ZERO),
                    Joint::new("b", Some(0), Vec3::Y),
                ],
            )
            .unwrap(),
        )
    }

    fn clip() -> AnimationClip {
        let a = AnimationTrack {
            positions: vec![(0.0, Vec3::ZERO)],
            rotations: vec![(0.0, Quat::IDENTITY), (1.0, Quat::from_rotation_x(1.0))],
            scales: vec![(0.0, Vec3::ONE)],
        };
        let b = AnimationTrack {
            positions: vec![(0.0, Vec3::Y)],
            rotations: vec![(0.0, Quat::IDENTITY), (0.5, Quat::from_rotation_z(0.5)), (1.0, Quat::IDENTITY)],
            scales: vec![(0.0, Vec3::ONE)],
        };
        AnimationClip::new("test", skeleton(), vec![a, b], true).unwrap()
    }

    #[test]
    fn test_clip_duration_and_sampling() {
        let clip = clip();
        assert_eq!(clip.duration, 1.0);
        let half = clip.sample_rotation(0, 0.5);
        assert!(half.angle_between(Quat::from_rotation_x(0.5)) < 1e-4);
        assert_eq!(clip.sample_position(1, 3.0), Vec3::Y);
    }

    #[test]
    fn test_decompress_aligns_timestamps() {
        let clip = clip();
        assert!(!clip.is_decompressed());
        let decompressed = clip.decompressed().unwrap();
        assert!(decompressed.is_decompressed());
        assert_eq!(decompressed.frame_timestamps(), vec![0.0, 0.5, 1.0]);
        // Source clip stays as it was
        assert_eq!(clip.track(0).unwrap().rotations.len(), 2);
    }

    #[test]
    fn test_set_rotation_bounds() {
        let mut clip = clip().decompressed().unwrap();
        let q = Quat::from_rotation_y(0.3);
        clip.set_rotation(1, 1, q).unwrap();
        assert_eq!(clip.track(1).unwrap().rotations[1].1, q);
        assert!(matches!(
            clip.set_rotation(5, 1, q),
            Err(AnimationError::FrameOutOfRange { frame: 5, count: 3 })
        ));
    }

    #[test]
    fn test_unordered_keys_rejected() {
        let mut tracks = clip().tracks().to_vec();
        tracks[1].rotations.swap(0, 1);
        assert!(matches!(
            AnimationClip::new("bad", skeleton(), tracks, true),
            Err(AnimationError::UnorderedKeys(name)) if name == "b"
        ));
    }
}
