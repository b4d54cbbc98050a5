//! Rig and chain model
//!
//! An [`IKRig`] turns a skeleton and a handful of named joints ([`RigData`])
//! into the kinematic chains the solver works on. Nodes reference their
//! parents by index into the rig's node array.

use std::f32::consts::PI;
use std::sync::Arc;

use ahash::AHashMap;
use glam::Vec3;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use strider_animation::Skeleton;

use crate::{ChainIndex, JointIndex, RigError, RigResult};

/// Base and end-effector joint names of a chain
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainEnds {
    pub base: String,
    pub end_effector: String,
}

impl ChainEnds {
    pub fn new(base: impl Into<String>, end_effector: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            end_effector: end_effector.into(),
        }
    }
}

/// Per-joint solver metadata
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JointData {
    /// Symmetric motion range in radians
    pub motion_range: f32,
    /// Relative step size of this joint in the solver
    pub weight: f32,
    pub enabled: bool,
    /// Local rotation axis solved for
    pub axis: Vec3,
}

impl Default for JointData {
    fn default() -> Self {
        Self {
            motion_range: PI,
            weight: 1.0,
            enabled: true,
            axis: Vec3::X,
        }
    }
}

/// Named joints describing a biped rig
#[derive(Debug, Clone, Default)]
pub struct RigData {
    pub hip: String,
    pub left_leg: ChainEnds,
    pub right_leg: ChainEnds,
    pub left_foot: Option<ChainEnds>,
    pub right_foot: Option<ChainEnds>,
    pub joint_data: AHashMap<String, JointData>,
}

impl RigData {
    pub fn new(hip: impl Into<String>, left_leg: ChainEnds, right_leg: ChainEnds) -> Self {
        Self {
            hip: hip.into(),
            left_leg,
            right_leg,
            ..Self::default()
        }
    }

    pub fn with_feet(mut self, left_foot: ChainEnds, right_foot: ChainEnds) -> Self {
        self.left_foot = Some(left_foot);
        self.right_foot = Some(right_foot);
        self
    }

    pub fn with_joint_data(mut self, joint: impl Into<String>, data: JointData) -> Self {
        self.joint_data.insert(joint.into(), data);
        self
    }
}

/// Static per-joint rig metadata
#[derive(Debug, Clone, PartialEq)]
pub struct IKNode {
    pub name: String,
    pub index: JointIndex,
    pub parent: Option<JointIndex>,
    pub motion_range: f32,
    pub weight: f32,
    pub axis: Vec3,
    pub enabled: bool,
}

/// Joints from (excluding) a base joint down to an end effector
#[derive(Debug, Clone, PartialEq)]
pub struct IKChain {
    pub name: String,
    pub joints: SmallVec<[JointIndex; 8]>,
    pub opposite: Option<ChainIndex>,
    /// Model-space target of the end effector for the frame being solved
    pub current_ee_target: Vec3,
}

impl IKChain {
    pub fn end_effector(&self) -> JointIndex {
        self.joints[self.joints.len() - 1]
    }

    pub fn len(&self) -> usize {
        self.joints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joints.is_empty()
    }
}

/// Build one node per skeleton joint
pub fn build_nodes(skeleton: &Skeleton, joint_data: &AHashMap<String, JointData>) -> Vec<IKNode> {
    skeleton
        .joints()
        .iter()
        .enumerate()
        .map(|(index, joint)| {
            let data = joint_data.get(&joint.name).copied().unwrap_or_default();
            IKNode {
                name: joint.name.clone(),
                index,
                parent: joint.parent,
                motion_range: data.motion_range,
                weight: data.weight,
                axis: data.axis.try_normalize().unwrap_or(Vec3::X),
                enabled: data.enabled,
            }
        })
        .collect()
}

/// Walk up from the end effector to the base, front-inserting every joint
/// except the base
pub fn build_ik_chain(skeleton: &Skeleton, name: &str, base: &str, end_effector: &str) -> RigResult<IKChain> {
    let result = resolve_chain(skeleton, name, base, end_effector);
    if let Err(err) = &result {
        log::error!("Failed to build IK chain '{name}': {err}");
    }
    result
}

fn resolve_chain(skeleton: &Skeleton, name: &str, base: &str, end_effector: &str) -> RigResult<IKChain> {
    if base.is_empty() || end_effector.is_empty() {
        return Err(RigError::EmptyJointName(name.to_string()));
    }
    if base == end_effector {
        return Err(RigError::IdenticalJoints {
            chain: name.to_string(),
            joint: base.to_string(),
        });
    }
    let base_index = skeleton
        .joint_index(base)
        .ok_or_else(|| RigError::UnknownJoint(base.to_string()))?;
    let ee_index = skeleton
        .joint_index(end_effector)
        .ok_or_else(|| RigError::UnknownJoint(end_effector.to_string()))?;

    let mut joints: SmallVec<[JointIndex; 8]> = SmallVec::new();
    let mut current = Some(ee_index);
    while let Some(index) = current {
        if index == base_index {
            return Ok(IKChain {
                name: name.to_string(),
                joints,
                opposite: None,
                current_ee_target: Vec3::ZERO,
            });
        }
        joints.insert(0, index);
        current = skeleton.parent(index);
    }

    Err(RigError::NotAncestor {
        base: base.to_string(),
        end_effector: end_effector.to_string(),
    })
}

/// One-joint chain anchoring the pelvis
pub fn build_hip_ik_chain(skeleton: &Skeleton, hip: &str) -> RigResult<IKChain> {
    if hip.is_empty() {
        return Err(RigError::EmptyJointName("hip".to_string()));
    }
    let index = skeleton
        .joint_index(hip)
        .ok_or_else(|| RigError::UnknownJoint(hip.to_string()))?;
    Ok(IKChain {
        name: "hip".to_string(),
        joints: SmallVec::from_slice(&[index]),
        opposite: None,
        current_ee_target: Vec3::ZERO,
    })
}

/// Bind-pose length from the chain base through every chain joint
fn chain_bind_length(skeleton: &Skeleton, chain: &IKChain) -> f32 {
    let positions = skeleton.bind_model_positions();
    let mut previous = skeleton
        .parent(chain.joints[0])
        .map_or(positions[chain.joints[0]], |parent| positions[parent]);
    let mut length = 0.0;
    for &joint in &chain.joints {
        length += positions[joint].distance(previous);
        previous = positions[joint];
    }
    length
}

/// Kinematic description of one character
#[derive(Debug, Clone)]
pub struct IKRig {
    skeleton: Arc<Skeleton>,
    nodes: Vec<IKNode>,
    chains: Vec<IKChain>,
    hip_chain: IKChain,
    rig_height: f32,
    /// Uniform scale of the character
    pub rig_scale: f32,
    /// Heading about the up axis in radians (0 faces +Y)
    pub heading: f32,
    /// Heading change per second
    pub angular_speed: f32,
}

impl IKRig {
    /// Left and right leg chains are always indices 0 and 1
    pub const LEFT_LEG: ChainIndex = 0;
    pub const RIGHT_LEG: ChainIndex = 1;

    pub fn new(skeleton: Arc<Skeleton>, rig_data: &RigData) -> RigResult<Self> {
        let nodes = build_nodes(&skeleton, &rig_data.joint_data);

        let mut left = build_ik_chain(
            &skeleton,
            "left_leg",
            &rig_data.left_leg.base,
            &rig_data.left_leg.end_effector,
        )?;
        let mut right = build_ik_chain(
            &skeleton,
            "right_leg",
            &rig_data.right_leg.base,
            &rig_data.right_leg.end_effector,
        )?;
        left.opposite = Some(Self::RIGHT_LEG);
        right.opposite = Some(Self::LEFT_LEG);
        let rig_height = 2.0 * chain_bind_length(&skeleton, &left);
        let mut chains = vec![left, right];

        let feet = [("left_foot", &rig_data.left_foot), ("right_foot", &rig_data.right_foot)];
        let mut foot_indices = Vec::with_capacity(2);
        for (name, ends) in feet {
            if let Some(ends) = ends {
                chains.push(build_ik_chain(&skeleton, name, &ends.base, &ends.end_effector)?);
                foot_indices.push(chains.len() - 1);
            }
        }
        if let [left_foot, right_foot] = foot_indices[..] {
            chains[left_foot].opposite = Some(right_foot);
            chains[right_foot].opposite = Some(left_foot);
        }

        let hip_chain = build_hip_ik_chain(&skeleton, &rig_data.hip).inspect_err(|err| {
            log::error!("Failed to build hip chain: {err}");
        })?;

        log::debug!(
            "Built rig for '{}' with {} chains, height {:.3}",
            skeleton.name(),
            chains.len(),
            rig_height
        );

        Ok(Self {
            skeleton,
            nodes,
            chains,
            hip_chain,
            rig_height,
            rig_scale: 1.0,
            heading: 0.0,
            angular_speed: 0.0,
        })
    }

    pub fn skeleton(&self) -> &Arc<Skeleton> {
        &self.skeleton
    }

    pub fn nodes(&self) -> &[IKNode] {
        &self.nodes
    }

    pub fn node(&self, joint: JointIndex) -> Option<&IKNode> {
        self.nodes.get(joint)
    }

    /// Parent node of a node, resolved by index
    pub fn parent_node(&self, joint: JointIndex) -> Option<&IKNode> {
        self.nodes.get(joint)?.parent.and_then(|parent| self.nodes.get(parent))
    }

    pub fn chains(&self) -> &[IKChain] {
        &self.chains
    }

    pub fn chain(&self, index: ChainIndex) -> Option<&IKChain> {
        self.chains.get(index)
    }

    pub(crate) fn chains_mut(&mut self) -> &mut [IKChain] {
        &mut self.chains
    }

    pub fn hip_chain(&self) -> &IKChain {
        &self.hip_chain
    }

    pub fn hip_joint(&self) -> JointIndex {
        self.hip_chain.joints[0]
    }

    /// Twice the bind-pose length of the left leg
    pub fn rig_height(&self) -> f32 {
        self.rig_height
    }

    /// Build an extra chain on this rig's skeleton
    pub fn build_ik_chain(&self, name: &str, base: &str, end_effector: &str) -> RigResult<IKChain> {
        build_ik_chain(&self.skeleton, name, base, end_effector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strider_animation::procedural::{self, biped_skeleton};

    fn biped_rig_data() -> RigData {
        RigData::new(
            procedural::HIPS,
            ChainEnds::new(procedural::HIPS, procedural::LEFT_FOOT),
            ChainEnds::new(procedural::HIPS, procedural::RIGHT_FOOT),
        )
        .with_feet(
            ChainEnds::new(procedural::LEFT_LOWER_LEG, procedural::LEFT_TOE),
            ChainEnds::new(procedural::RIGHT_LOWER_LEG, procedural::RIGHT_TOE),
        )
    }

    #[test]
    fn test_build_ik_chain_order_and_count() {
        let skeleton = biped_skeleton().unwrap();
        let chain = build_ik_chain(&skeleton, "leg", procedural::HIPS, procedural::LEFT_TOE).unwrap();
        let expected: Vec<usize> = [
            procedural::LEFT_UPPER_LEG,
            procedural::LEFT_LOWER_LEG,
            procedural::LEFT_FOOT,
            procedural::LEFT_TOE,
        ]
        .iter()
        .map(|name| skeleton.joint_index(name).unwrap())
        .collect();
        assert_eq!(chain.joints.as_slice(), expected.as_slice());
        assert_eq!(chain.end_effector(), skeleton.joint_index(procedural::LEFT_TOE).unwrap());

        let short = build_ik_chain(&skeleton, "shin", procedural::LEFT_LOWER_LEG, procedural::LEFT_FOOT).unwrap();
        assert_eq!(short.len(), 1);
    }

    #[test]
    fn test_build_ik_chain_rejects_bad_input() {
        let skeleton = biped_skeleton().unwrap();
        assert!(matches!(
            build_ik_chain(&skeleton, "x", "", procedural::LEFT_FOOT),
            Err(RigError::EmptyJointName(_))
        ));
        assert!(matches!(
            build_ik_chain(&skeleton, "x", procedural::LEFT_FOOT, procedural::LEFT_FOOT),
            Err(RigError::IdenticalJoints { .. })
        ));
        assert!(matches!(
            build_ik_chain(&skeleton, "x", procedural::RIGHT_UPPER_LEG, procedural::LEFT_FOOT),
            Err(RigError::NotAncestor { .. })
        ));
        assert!(matches!(
            build_ik_chain(&skeleton, "x", "tail", procedural::LEFT_FOOT),
            Err(RigError::UnknownJoint(_))
        ));
    }

    #[test]
    fn test_rig_construction() {
        let skeleton = Arc::new(biped_skeleton().unwrap());
        let rig = IKRig::new(Arc::clone(&skeleton), &biped_rig_data()).unwrap();
        assert_eq!(rig.chains().len(), 4);
        assert_eq!(rig.chain(IKRig::LEFT_LEG).unwrap().opposite, Some(IKRig::RIGHT_LEG));
        assert_eq!(rig.chain(2).unwrap().opposite, Some(3));
        assert_eq!(rig.hip_joint(), skeleton.joint_index(procedural::HIPS).unwrap());
        assert_eq!(rig.hip_chain().len(), 1);

        let thigh_offset = Vec3::new(0.1, 0.0, 0.05).length();
        let expected = 2.0 * (thigh_offset + 2.0 * procedural::SEGMENT_LENGTH);
        assert!((rig.rig_height() - expected).abs() < 1e-5);

        let knee = skeleton.joint_index(procedural::LEFT_LOWER_LEG).unwrap();
        assert_eq!(rig.parent_node(knee).unwrap().name, procedural::LEFT_UPPER_LEG);
    }

    #[test]
    fn test_joint_data_applied_to_nodes() {
        let skeleton = biped_skeleton().unwrap();
        let data = JointData {
            motion_range: 0.5,
            weight: 2.0,
            ..JointData::default()
        };
        let rig_data = biped_rig_data().with_joint_data(procedural::LEFT_LOWER_LEG, data);
        let nodes = build_nodes(&skeleton, &rig_data.joint_data);
        let knee = skeleton.joint_index(procedural::LEFT_LOWER_LEG).unwrap();
        assert_eq!(nodes[knee].motion_range, 0.5);
        assert_eq!(nodes[knee].weight, 2.0);
        assert_eq!(nodes[0].motion_range, PI);
    }
}
