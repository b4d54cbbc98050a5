//! Skeleton hierarchy
//!
//! Joints are stored parent-first so every parent index is smaller than the
//! index of its children. A skeleton never changes after construction and is
//! shared between clips through an `Arc`.

use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use strider_core::math::{Mat4, Quat, Vec3};

use crate::{AnimationError, AnimationResult};

/// Joint in a skeleton
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Joint {
    pub name: String,
    pub parent: Option<usize>,
    pub local_position: Vec3,
    pub local_rotation: Quat,
    pub local_scale: Vec3,
}

impl Joint {
    /// Joint with an identity bind rotation and unit scale
    pub fn new(name: impl Into<String>, parent: Option<usize>, local_position: Vec3) -> Self {
        Self {
            name: name.into(),
            parent,
            local_position,
            local_rotation: Quat::IDENTITY,
            local_scale: Vec3::ONE,
        }
    }

    /// Bind-pose local matrix
    pub fn local_matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.local_scale, self.local_rotation, self.local_position)
    }
}

/// Skeleton definition
#[derive(Debug, Clone)]
pub struct Skeleton {
    name: String,
    joints: Vec<Joint>,
    lookup: AHashMap<String, usize>,
}

impl Skeleton {
    /// Build a skeleton, validating names and parent ordering
    pub fn new(name: impl Into<String>, joints: Vec<Joint>) -> AnimationResult<Self> {
        if joints.is_empty() {
            return Err(AnimationError::EmptySkeleton);
        }

        let mut lookup = AHashMap::with_capacity(joints.len());
        for (index, joint) in joints.iter().enumerate() {
            if joint.name.is_empty() {
                return Err(AnimationError::EmptyJointName(index));
            }
            if let Some(parent) = joint.parent {
                if parent >= index {
                    return Err(AnimationError::InvalidParent { joint: index, parent });
                }
            }
            if lookup.insert(joint.name.clone(), index).is_some() {
                return Err(AnimationError::DuplicateJointName(joint.name.clone()));
            }
        }

        Ok(Self {
            name: name.into(),
            joints,
            lookup,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn joints(&self) -> &[Joint] {
        &self.joints
    }

    pub fn joint(&self, index: usize) -> Option<&Joint> {
        self.joints.get(index)
    }

    pub fn len(&self) -> usize {
        self.joints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joints.is_empty()
    }

    /// Find a joint index by name
    pub fn joint_index(&self, name: &str) -> Option<usize> {
        self.lookup.get(name).copied()
    }

    /// Parent index of a joint (None for roots and out-of-range indices)
    pub fn parent(&self, index: usize) -> Option<usize> {
        self.joints.get(index).and_then(|joint| joint.parent)
    }

    /// Parent indices of every joint
    pub fn parents(&self) -> Vec<Option<usize>> {
        self.joints.iter().map(|joint| joint.parent).collect()
    }

    /// Whether `ancestor` lies on the parent path of `joint` (a joint is not its own ancestor)
    pub fn is_ancestor(&self, ancestor: usize, joint: usize) -> bool {
        let mut current = self.parent(joint);
        while let Some(index) = current {
            if index == ancestor {
                return true;
            }
            current = self.parent(index);
        }
        false
    }

    /// Bind-pose model-space transforms
    pub fn bind_model_transforms(&self) -> Vec<Mat4> {
        let mut transforms: Vec<Mat4> = Vec::with_capacity(self.joints.len());
        for joint in &self.joints {
            let local = joint.local_matrix();
            let model = match joint.parent {
                Some(parent) => transforms[parent] * local,
                None => local,
            };
            transforms.push(model);
        }
        transforms
    }

    /// Bind-pose model-space joint positions
    pub fn bind_model_positions(&self) -> Vec<Vec3> {
        self.bind_model_transforms()
            .iter()
            .map(|m| m.transform_point3(Vec3::ZERO))
            .collect()
    }

    /// Same joint names and hierarchy as `other`
    pub fn same_structure(&self, other: &Skeleton) -> bool {
        self.joints.len() == other.joints.len()
            && self
                .joints
                .iter()
                .zip(&other.joints)
                .all(|(a, b)| a.name == b.name && a.parent == b.parent)
    }
}
