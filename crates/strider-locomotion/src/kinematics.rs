//! Forward and inverse kinematics
//!
//! FK composes local joint transforms into model space. IK finds one angle per
//! chain joint about that joint's configured local axis so that end effectors
//! reach their targets, using [`GradientDescent`] with an analytic gradient.

use glam::{Mat4, Quat, Vec3};
use smallvec::SmallVec;
use strider_animation::Skeleton;

use crate::config::IKRigConfig;
use crate::gradient_descent::{CostTerm, DescentReport, DescentSettings, DescentStepHook, GradientDescent};
use crate::rig::{IKChain, IKNode};
use crate::{FrameIndex, IkSettings, JointIndex};

/// Which rotation set of an attachment to read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationSource {
    /// Rotations as baked in the clip
    Baked,
    /// Rotations after IK correction
    Dynamic,
}

/// Forward kinematics over skeleton hierarchies
pub struct ForwardKinematics;

impl ForwardKinematics {
    pub fn local_transform(position: Vec3, rotation: Quat, scale: Vec3) -> Mat4 {
        Mat4::from_scale_rotation_translation(scale, rotation, position)
    }

    /// Model-space transforms of a parent-before-child joint list
    pub fn compute_model_transforms(
        parents: &[Option<JointIndex>],
        positions: &[Vec3],
        rotations: &[Quat],
        scales: &[Vec3],
    ) -> Vec<Mat4> {
        let mut model: Vec<Mat4> = Vec::with_capacity(parents.len());
        for (joint, parent) in parents.iter().enumerate() {
            let local = Self::local_transform(positions[joint], rotations[joint], scales[joint]);
            let transform = match parent {
                Some(parent) => model[*parent] * local,
                None => local,
            };
            model.push(transform);
        }
        model
    }

    /// Joint-space transforms of one frame of an attachment
    pub fn local_transforms(
        skeleton: &Skeleton,
        config: &IKRigConfig,
        frame: FrameIndex,
        source: RotationSource,
    ) -> Vec<Mat4> {
        let rotations = config.rotations(frame, source);
        (0..skeleton.len())
            .map(|joint| {
                Self::local_transform(
                    config.joint_positions()[joint],
                    rotations[joint],
                    config.joint_scales()[joint],
                )
            })
            .collect()
    }

    /// Model-space transforms of one frame of an attachment
    pub fn model_transforms(
        skeleton: &Skeleton,
        config: &IKRigConfig,
        frame: FrameIndex,
        source: RotationSource,
    ) -> Vec<Mat4> {
        Self::compute_model_transforms(
            &skeleton.parents(),
            config.joint_positions(),
            config.rotations(frame, source),
            config.joint_scales(),
        )
    }

    pub fn model_positions(
        skeleton: &Skeleton,
        config: &IKRigConfig,
        frame: FrameIndex,
        source: RotationSource,
    ) -> Vec<Vec3> {
        Self::model_transforms(skeleton, config, frame, source)
            .iter()
            .map(|m| m.w_axis.truncate())
            .collect()
    }

    /// Model-space transform of a single joint, walking only its ancestors
    pub fn joint_model_transform(
        skeleton: &Skeleton,
        config: &IKRigConfig,
        frame: FrameIndex,
        joint: JointIndex,
        source: RotationSource,
    ) -> Mat4 {
        let rotations = config.rotations(frame, source);
        let mut transform = Mat4::IDENTITY;
        let mut current = Some(joint);
        while let Some(index) = current {
            let local = Self::local_transform(
                config.joint_positions()[index],
                rotations[index],
                config.joint_scales()[index],
            );
            transform = local * transform;
            current = skeleton.parent(index);
        }
        transform
    }

    /// Model transforms expressed in a custom space, such as world space
    pub fn custom_space_transforms(
        skeleton: &Skeleton,
        config: &IKRigConfig,
        frame: FrameIndex,
        source: RotationSource,
        space: Mat4,
    ) -> Vec<Mat4> {
        Self::model_transforms(skeleton, config, frame, source)
            .into_iter()
            .map(|m| space * m)
            .collect()
    }

    /// Model transforms of the pose between the current and next frame
    pub fn interpolated_model_transforms(
        skeleton: &Skeleton,
        config: &IKRigConfig,
        source: RotationSource,
    ) -> Vec<Mat4> {
        Self::compute_model_transforms(
            &skeleton.parents(),
            config.joint_positions(),
            &config.interpolated_rotations(source),
            config.joint_scales(),
        )
    }
}

/// A joint angle solved for
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IkUnknown {
    pub joint: JointIndex,
    pub axis: Vec3,
    pub weight: f32,
    pub motion_range: f32,
}

/// An end effector and the target it should reach
#[derive(Debug, Clone, PartialEq)]
pub struct IkGoal {
    pub end_effector: JointIndex,
    pub target: Vec3,
    /// Indices into the problem's unknowns that move this end effector
    pub unknowns: SmallVec<[usize; 8]>,
}

/// Pose, unknowns and goals of one IK solve
#[derive(Debug, Clone)]
pub struct IkProblem {
    parents: Vec<Option<JointIndex>>,
    positions: Vec<Vec3>,
    rotations: Vec<Quat>,
    scales: Vec<Vec3>,
    unknowns: Vec<IkUnknown>,
    goals: Vec<IkGoal>,
}

impl IkProblem {
    /// Problem around a pose; the given rotations are the zero-angle pose
    pub fn new(skeleton: &Skeleton, positions: Vec<Vec3>, rotations: Vec<Quat>, scales: Vec<Vec3>) -> Self {
        Self {
            parents: skeleton.parents(),
            positions,
            rotations,
            scales,
            unknowns: Vec::new(),
            goals: Vec::new(),
        }
    }

    pub fn from_bind_pose(skeleton: &Skeleton) -> Self {
        let joints = skeleton.joints();
        Self::new(
            skeleton,
            joints.iter().map(|j| j.local_position).collect(),
            joints.iter().map(|j| j.local_rotation).collect(),
            joints.iter().map(|j| j.local_scale).collect(),
        )
    }

    /// Add a goal for a chain's end effector. Joints shared with earlier goals
    /// reuse the same unknown; disabled nodes stay fixed.
    pub fn add_goal(&mut self, chain: &IKChain, nodes: &[IKNode], target: Vec3) {
        let mut goal_unknowns = SmallVec::new();
        for &joint in &chain.joints {
            let Some(node) = nodes.get(joint) else {
                continue;
            };
            if !node.enabled {
                continue;
            }
            let index = match self.unknowns.iter().position(|u| u.joint == joint) {
                Some(index) => index,
                None => {
                    self.unknowns.push(IkUnknown {
                        joint,
                        axis: node.axis,
                        weight: node.weight,
                        motion_range: node.motion_range,
                    });
                    self.unknowns.len() - 1
                }
            };
            goal_unknowns.push(index);
        }
        self.goals.push(IkGoal {
            end_effector: chain.end_effector(),
            target,
            unknowns: goal_unknowns,
        });
    }

    pub fn unknowns(&self) -> &[IkUnknown] {
        &self.unknowns
    }

    pub fn goals(&self) -> &[IkGoal] {
        &self.goals
    }

    /// Local rotations with the solved angles applied
    pub fn posed_rotations(&self, angles: &[f32]) -> Vec<Quat> {
        let mut rotations = self.rotations.clone();
        for (unknown, angle) in self.unknowns.iter().zip(angles) {
            rotations[unknown.joint] = self.rotations[unknown.joint] * Quat::from_axis_angle(unknown.axis, *angle);
        }
        rotations
    }

    pub fn model_transforms(&self, angles: &[f32]) -> Vec<Mat4> {
        ForwardKinematics::compute_model_transforms(
            &self.parents,
            &self.positions,
            &self.posed_rotations(angles),
            &self.scales,
        )
    }

    /// Longest goal chain at the zero-angle pose, measured joint to joint
    pub fn chain_length(&self) -> f32 {
        let model = self.model_transforms(&[]);
        self.goals
            .iter()
            .map(|goal| {
                let mut length = 0.0;
                let mut previous = model[goal.end_effector].w_axis.truncate();
                for &index in goal.unknowns.iter().rev() {
                    let origin = model[self.unknowns[index].joint].w_axis.truncate();
                    length += origin.distance(previous);
                    previous = origin;
                }
                length
            })
            .fold(0.0, f32::max)
    }
}

/// Sum of squared distances between end effectors and their targets
struct EndEffectorDistance;

impl CostTerm<IkProblem> for EndEffectorDistance {
    fn value(&self, args: &[f32], problem: &IkProblem) -> f32 {
        let model = problem.model_transforms(args);
        problem
            .goals
            .iter()
            .map(|goal| model[goal.end_effector].w_axis.truncate().distance_squared(goal.target))
            .sum()
    }

    fn partial_derivative(&self, args: &[f32], index: usize, problem: &IkProblem) -> f32 {
        let model = problem.model_transforms(args);
        problem
            .goals
            .iter()
            .filter(|goal| goal.unknowns.contains(&index))
            .map(|goal| goal_partial(&model, goal, &problem.unknowns[index]))
            .sum()
    }

    fn accumulate_gradient(&self, args: &[f32], problem: &IkProblem, gradient: &mut [f32]) {
        let model = problem.model_transforms(args);
        for goal in &problem.goals {
            for &index in &goal.unknowns {
                gradient[index] += goal_partial(&model, goal, &problem.unknowns[index]);
            }
        }
    }
}

/// Derivative of one goal's squared distance with respect to one joint angle
fn goal_partial(model: &[Mat4], goal: &IkGoal, unknown: &IkUnknown) -> f32 {
    let ee = model[goal.end_effector].w_axis.truncate();
    let transform = &model[unknown.joint];
    let origin = transform.w_axis.truncate();
    let Some(axis) = transform.transform_vector3(unknown.axis).try_normalize() else {
        return 0.0;
    };
    let tangent = axis.cross(ee - origin);
    2.0 * (ee - goal.target).dot(tangent) * unknown.weight
}

/// Clamp every angle to its joint's motion range
struct MotionRangeLimit;

impl DescentStepHook<IkProblem> for MotionRangeLimit {
    fn after_step(&self, args: &mut [f32], _previous: &[f32], problem: &IkProblem) {
        for (angle, unknown) in args.iter_mut().zip(&problem.unknowns) {
            *angle = angle.clamp(-unknown.motion_range, unknown.motion_range);
        }
    }
}

/// Result of an IK solve
#[derive(Debug, Clone)]
pub struct IkSolution {
    /// Final local rotation of every solved joint
    pub rotations: Vec<(JointIndex, Quat)>,
    pub angles: Vec<f32>,
    /// Remaining sum of squared end-effector distances
    pub residual: f32,
    pub report: DescentReport,
}

/// Angle-constrained IK solver
pub struct InverseKinematics {
    settings: IkSettings,
    solver: GradientDescent<IkProblem>,
}

impl InverseKinematics {
    pub fn new(settings: IkSettings) -> Self {
        let mut solver = GradientDescent::new(DescentSettings::default()).with_term(EndEffectorDistance);
        solver.set_step_hook(MotionRangeLimit);
        Self { settings, solver }
    }

    pub fn settings(&self) -> &IkSettings {
        &self.settings
    }

    pub fn set_settings(&mut self, settings: IkSettings) {
        self.settings = settings;
    }

    /// Solve starting from `initial` angles; a warm start of the wrong size
    /// falls back to zero angles
    pub fn solve(&self, problem: &IkProblem, initial: &[f32]) -> IkSolution {
        let mut angles = if initial.len() == problem.unknowns.len() {
            initial.to_vec()
        } else {
            vec![0.0; problem.unknowns.len()]
        };

        let length = problem.chain_length();
        let settings = DescentSettings {
            rate: self.settings.rate / (length * length).max(1e-6),
            max_iterations: self.settings.max_iterations,
            target_delta: self.settings.target_delta,
            adaptive: self.settings.adaptive,
        };
        let report = if angles.is_empty() {
            DescentReport {
                iterations: 0,
                cost: self.solver.cost(&angles, problem),
                converged: true,
            }
        } else {
            self.solver.compute_with(&mut angles, problem, &settings)
        };

        let posed = problem.posed_rotations(&angles);
        let rotations = problem
            .unknowns
            .iter()
            .map(|unknown| (unknown.joint, posed[unknown.joint]))
            .collect();

        log::trace!(
            "IK solved {} unknowns in {} iterations, residual {:.6}",
            angles.len(),
            report.iterations,
            report.cost
        );

        IkSolution {
            rotations,
            residual: report.cost,
            angles,
            report,
        }
    }
}
