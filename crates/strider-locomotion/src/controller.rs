//! Rig controller
//!
//! [`IKRigController`] owns a rig, its attached clips, the trajectory
//! generator and the IK solver. Each [`IKRigController::update`] advances the
//! active clip, regenerates targets on new frames, solves IK for the next
//! frame and moves the character's root transform along the hip target.

use std::sync::Arc;

use glam::{Mat4, Quat, Vec3};
use strider_animation::{AnimationClip, AnimationError, Skeleton};
use strider_core::Transform;
use strider_physics::{RigidBody, TerrainQuery};

use crate::config::{AnimationType, IKRigConfig};
use crate::curve::Lic3;
use crate::environment::EnvironmentData;
use crate::generator::{MotionState, TrajectoryGenerator};
use crate::kinematics::{ForwardKinematics, IkProblem, InverseKinematics, RotationSource};
use crate::rig::{IKRig, RigData};
use crate::{AnimationIndex, CurveResult, JointIndex, LocomotionConfig, LocomotionError, LocomotionResult, RigError, RigResult};

/// Largest translation or scale change still treated as constant
const CONSTANT_TOLERANCE: f32 = 1e-4;
/// Rotations smaller than this are ignored by the leg axis check
const MIN_AXIS_ANGLE: f32 = 1e-3;

/// Drives one character
pub struct IKRigController {
    rig: IKRig,
    configs: Vec<IKRigConfig>,
    generator: TrajectoryGenerator,
    ik: InverseKinematics,
    settings: LocomotionConfig,
    active: Option<AnimationIndex>,
}

impl IKRigController {
    pub fn new(skeleton: Arc<Skeleton>, rig_data: &RigData, settings: LocomotionConfig) -> LocomotionResult<Self> {
        let rig = IKRig::new(skeleton, rig_data)?;
        Ok(Self {
            rig,
            configs: Vec::new(),
            generator: TrajectoryGenerator::new(settings.trajectory, settings.curve_epsilon),
            ik: InverseKinematics::new(settings.ik),
            settings,
            active: None,
        })
    }

    pub fn rig(&self) -> &IKRig {
        &self.rig
    }

    pub fn settings(&self) -> &LocomotionConfig {
        &self.settings
    }

    pub fn configs(&self) -> &[IKRigConfig] {
        &self.configs
    }

    pub fn config(&self, animation: AnimationIndex) -> LocomotionResult<&IKRigConfig> {
        self.configs
            .get(animation)
            .ok_or(LocomotionError::UnknownAnimation(animation))
    }

    pub fn active_animation(&self) -> Option<AnimationIndex> {
        self.active
    }

    pub fn animation_index(&self, name: &str) -> Option<AnimationIndex> {
        self.configs.iter().position(|config| config.name == name)
    }

    pub fn heading(&self) -> f32 {
        self.rig.heading
    }

    pub fn set_heading(&mut self, heading: f32) {
        self.rig.heading = heading;
    }

    /// Heading change per second, applied on every update
    pub fn set_angular_speed(&mut self, angular_speed: f32) {
        self.rig.angular_speed = angular_speed;
    }

    pub fn set_rig_scale(&mut self, scale: f32) {
        self.rig.rig_scale = scale;
    }

    pub fn ik_enabled(&self) -> bool {
        self.settings.ik_enabled
    }

    /// Toggle IK; disabling it restores the baked rotations
    pub fn enable_ik(&mut self, enabled: bool) {
        self.settings.ik_enabled = enabled;
        if !enabled {
            for config in &mut self.configs {
                config.reset_dynamic_rotations();
            }
        }
        log::info!("IK {}", if enabled { "enabled" } else { "disabled" });
    }

    /// Attach a clip. A clip with an already attached name is not added again.
    pub fn add_animation(&mut self, clip: &AnimationClip, animation_type: AnimationType) -> LocomotionResult<AnimationIndex> {
        if let Some(index) = self.animation_index(&clip.name) {
            log::warn!("Animation '{}' is already attached", clip.name);
            return Ok(index);
        }
        let skeleton = self.rig.skeleton();
        if !Arc::ptr_eq(clip.skeleton(), skeleton) && !clip.skeleton().same_structure(skeleton) {
            log::error!("Animation '{}' does not match skeleton '{}'", clip.name, skeleton.name());
            return Err(RigError::SkeletonMismatch(clip.name.clone()).into());
        }

        let decompressed = clip.decompressed()?;
        let config = self.build_config(&decompressed, animation_type).inspect_err(|err| {
            log::error!("Failed to attach animation '{}': {err}", clip.name);
        })?;

        log::info!(
            "Attached animation '{}' ({:?}, {} frames, {:.3}s)",
            config.name,
            config.animation_type,
            config.frame_count(),
            config.duration()
        );
        self.configs.push(config);
        Ok(self.configs.len() - 1)
    }

    pub fn remove_animation(&mut self, animation: AnimationIndex) -> LocomotionResult<IKRigConfig> {
        if animation >= self.configs.len() {
            return Err(LocomotionError::UnknownAnimation(animation));
        }
        self.active = match self.active {
            Some(active) if active == animation => None,
            Some(active) if active > animation => Some(active - 1),
            other => other,
        };
        Ok(self.configs.remove(animation))
    }

    fn build_config(&self, clip: &AnimationClip, animation_type: AnimationType) -> LocomotionResult<IKRigConfig> {
        self.validate_clip(clip)?;

        let skeleton = self.rig.skeleton();
        let hip = self.rig.hip_joint();
        let timestamps = clip.frame_timestamps();
        let n = timestamps.len();
        if n < 2 || timestamps[n - 1] - timestamps[0] <= self.settings.curve_epsilon {
            return Err(RigError::DegenerateClip(clip.name.clone()).into());
        }

        let parents = skeleton.parents();
        let mut base_rotations: Vec<Vec<Quat>> = (0..n)
            .map(|frame| clip.tracks().iter().map(|track| track.rotations[frame].1).collect())
            .collect();
        let mut positions: Vec<Vec3> = (0..skeleton.len())
            .map(|joint| clip.sample_position(joint, timestamps[0]))
            .collect();
        let scales: Vec<Vec3> = (0..skeleton.len())
            .map(|joint| clip.sample_scale(joint, timestamps[0]))
            .collect();

        self.check_leg_rotation_axes(&parents, &base_rotations)?;

        let frame_positions: Vec<Vec<Vec3>> = timestamps
            .iter()
            .zip(&base_rotations)
            .map(|(&time, rotations)| {
                let mut local = positions.clone();
                local[hip] = clip.sample_position(hip, time);
                ForwardKinematics::compute_model_transforms(&parents, &local, rotations, &scales)
                    .iter()
                    .map(|m| m.w_axis.truncate())
                    .collect()
            })
            .collect();

        let chains = self.rig.chains();
        let floor = chains
            .iter()
            .flat_map(|chain| frame_positions.iter().map(|frame| frame[chain.end_effector()].z))
            .fold(f32::INFINITY, f32::min);
        let floor = Vec3::new(0.0, 0.0, floor);

        let ee_positions: Vec<Vec<Vec3>> = chains
            .iter()
            .map(|chain| frame_positions.iter().map(|frame| frame[chain.end_effector()] - floor).collect())
            .collect();
        let hip_translations: Vec<Vec3> = frame_positions.iter().map(|frame| frame[hip] - floor).collect();
        let hip_heights: Vec<f32> = hip_translations.iter().map(|p| p.z).collect();

        // classification runs in unscaled model space
        let threshold = self.generator.support_threshold(self.rig.rig_height(), 1.0);
        let mut support: Vec<Vec<bool>> = ee_positions
            .iter()
            .map(|positions| TrajectoryGenerator::classify_support_frames(positions, threshold))
            .collect();
        if animation_type == AnimationType::Walking {
            TrajectoryGenerator::apply_opposite_support(chains, &mut support);
        }

        let ee_trajectories = ee_positions
            .iter()
            .zip(support)
            .map(|(positions, support)| {
                self.generator
                    .build_ee_trajectory_data(&timestamps, positions, support, &hip_heights)
            })
            .collect::<CurveResult<Vec<_>>>()?;

        // fold hip ancestors into the hip and let the root transform carry its translation
        for rotations in &mut base_rotations {
            let mut folded = Quat::IDENTITY;
            let mut current = parents[hip];
            while let Some(joint) = current {
                folded = rotations[joint] * folded;
                rotations[joint] = Quat::IDENTITY;
                current = parents[joint];
            }
            rotations[hip] = folded * rotations[hip];
        }
        positions[hip] = Vec3::ZERO;

        let hip_rotations: Vec<Quat> = base_rotations.iter().map(|rotations| rotations[hip]).collect();
        let min_distance = self.settings.trajectory.hip_record_distance_ratio * self.rig.rig_height();
        let hip_trajectory =
            self.generator
                .build_hip_trajectory_data(&timestamps, &hip_translations, &hip_rotations, min_distance)?;

        Ok(IKRigConfig::new(
            clip.name.clone(),
            animation_type,
            timestamps,
            base_rotations,
            positions,
            scales,
            ee_trajectories,
            hip_trajectory,
        )?)
    }

    /// Only the hip may translate, no joint may scale, and joints above the
    /// hip must sit at the origin with a constant rotation
    fn validate_clip(&self, clip: &AnimationClip) -> RigResult<()> {
        let skeleton = self.rig.skeleton();
        let hip = self.rig.hip_joint();

        for (joint, track) in clip.tracks().iter().enumerate() {
            let joint_name = || skeleton.joints()[joint].name.clone();
            if track.rotations.is_empty() {
                return Err(RigError::MissingTrack {
                    clip: clip.name.clone(),
                    joint: joint_name(),
                    channel: "rotation",
                });
            }
            if joint == hip {
                if track.positions.is_empty() {
                    return Err(RigError::MissingTrack {
                        clip: clip.name.clone(),
                        joint: joint_name(),
                        channel: "position",
                    });
                }
                continue;
            }
            if !is_constant(&track.positions) {
                return Err(RigError::AnimatedTranslation {
                    clip: clip.name.clone(),
                    joint: joint_name(),
                });
            }
            if !is_constant(&track.scales) {
                return Err(RigError::AnimatedScale {
                    clip: clip.name.clone(),
                    joint: joint_name(),
                });
            }
        }

        let mut current = skeleton.parent(hip);
        while let Some(joint) = current {
            let track = &clip.tracks()[joint];
            let translated = clip.sample_position(joint, 0.0).length() > CONSTANT_TOLERANCE;
            let rotating = track
                .rotations
                .windows(2)
                .any(|pair| pair[0].1.angle_between(pair[1].1) > CONSTANT_TOLERANCE);
            if translated || rotating {
                return Err(RigError::NonIdentityAboveHip(skeleton.joints()[joint].name.clone()));
            }
            current = skeleton.parent(joint);
        }
        Ok(())
    }

    /// Leg joints must bend about the X axis of their parent
    fn check_leg_rotation_axes(&self, parents: &[Option<JointIndex>], frames: &[Vec<Quat>]) -> RigResult<()> {
        for chain in self.rig.chains().iter().take(2) {
            let mut sum = Vec3::ZERO;
            let mut count = 0;
            for rotations in frames {
                for &joint in &chain.joints[..chain.len().saturating_sub(1)] {
                    let rotation = rotations[joint];
                    let rotation = if rotation.w < 0.0 { -rotation } else { rotation };
                    let (axis, angle) = rotation.to_axis_angle();
                    if angle.abs() < MIN_AXIS_ANGLE {
                        continue;
                    }
                    let parent_rotation = parents[joint].map_or(Quat::IDENTITY, |parent| {
                        model_rotation(parents, rotations, parent)
                    });
                    sum += (parent_rotation * axis).abs();
                    count += 1;
                }
            }
            if count == 0 {
                continue;
            }
            let mean = sum / count as f32;
            if !(mean.x > 0.8 && mean.y < 0.3 && mean.z < 0.3) {
                log::error!("Chain '{}' bends about {mean}", chain.name);
                return Err(RigError::LegRotationAxis {
                    chain: chain.name.clone(),
                    axis: mean,
                });
            }
        }
        Ok(())
    }

    /// Advance `animation` by `dt` seconds over `terrain` and move `transform`
    /// (the character's hip in world space) along the hip target
    pub fn update(
        &mut self,
        dt: f32,
        animation: AnimationIndex,
        transform: &mut Transform,
        terrain: &dyn TerrainQuery,
    ) -> LocomotionResult<()> {
        if animation >= self.configs.len() {
            return Err(LocomotionError::UnknownAnimation(animation));
        }
        self.activate(animation);
        let env = EnvironmentData::new(terrain);

        let rig = &mut self.rig;
        let config = &mut self.configs[animation];

        if !config.motion_initialized {
            let hip_height =
                config.hip_trajectory.original_translation(config.current_animation_time()).z * rig.rig_scale;
            if let Some(ground) = env.terrain_height(transform.position.truncate()) {
                transform.position.z = ground + hip_height;
            }
            transform.rotation = Quat::from_rotation_z(rig.heading);
            transform.scale = Vec3::splat(rig.rig_scale);
        }

        if config.advance(dt) {
            Self::update_trajectories(rig, &self.generator, &self.settings, config, transform, &env);
            if self.settings.ik_enabled {
                Self::solve_next_frame(rig, &self.ik, config, dt);
            }
        }

        rig.heading += rig.angular_speed * dt;
        if let Some(position) = config.hip_trajectory.target_translation(config.reproduction_time) {
            transform.position = position;
        }
        transform.rotation = Quat::from_rotation_z(rig.heading);
        transform.scale = Vec3::splat(rig.rig_scale);
        Ok(())
    }

    fn activate(&mut self, animation: AnimationIndex) {
        if self.active == Some(animation) {
            return;
        }
        if let Some(previous) = self.active {
            self.configs[previous].active = false;
            log::debug!(
                "Switching from '{}' to '{}'",
                self.configs[previous].name,
                self.configs[animation].name
            );
        }
        let config = &mut self.configs[animation];
        config.active = true;
        config.transitioning = self.active.is_some();
        config.motion_initialized = false;
        for data in &mut config.ee_trajectories {
            data.target = None;
            data.target_source = None;
            data.saved_positions = None;
        }
        config.hip_trajectory.target = None;
        config.hip_trajectory.saved_positions = None;
        self.active = Some(animation);
    }

    fn update_trajectories(
        rig: &IKRig,
        generator: &TrajectoryGenerator,
        settings: &LocomotionConfig,
        config: &mut IKRigConfig,
        transform: &Transform,
        env: &EnvironmentData,
    ) {
        let rep_now = config.frame_reproduction_time(config.current_frame, 0);
        let duration = config.duration();
        let history = settings.trajectory.saved_history_durations * duration;

        let model = transform.model_matrix();
        let positions =
            ForwardKinematics::model_positions(rig.skeleton(), config, config.current_frame, RotationSource::Dynamic);
        for (index, chain) in rig.chains().iter().enumerate() {
            let world = model.transform_point3(positions[chain.end_effector()]);
            let saved = &mut config.ee_trajectories[index].saved_positions;
            if let Err(err) = record_position(saved, rep_now, world, duration, history, settings.curve_epsilon) {
                log::warn!("Chain '{}' position not recorded: {err}", chain.name);
            }
        }
        if let Err(err) = record_position(
            &mut config.hip_trajectory.saved_positions,
            rep_now,
            transform.position,
            duration,
            history,
            settings.curve_epsilon,
        ) {
            log::warn!("Hip position not recorded: {err}");
        }

        let state = MotionState {
            heading: rig.heading,
            rig_scale: rig.rig_scale,
            rig_height: rig.rig_height(),
            hip_position: transform.position,
        };
        generator.generate_trajectories(rig, config, &state, env);

        if !config.motion_initialized {
            for data in &mut config.ee_trajectories {
                if let (Some(saved), Some(target)) = (&data.saved_positions, &data.target) {
                    let joined = Lic3::join(saved, &target.curve);
                    backfill(&mut data.saved_positions, joined);
                }
            }
            let hip = &mut config.hip_trajectory;
            if let (Some(saved), Some(target)) = (&hip.saved_positions, &hip.target) {
                let joined = Lic3::join(saved, &target.translations);
                backfill(&mut hip.saved_positions, joined);
            }
            config.motion_initialized = true;
        }
        config.transitioning = false;
    }

    /// Solve IK for the next frame against the model-space targets and write
    /// the result into the dynamic rotations
    fn solve_next_frame(rig: &mut IKRig, ik: &InverseKinematics, config: &mut IKRigConfig, dt: f32) {
        let Some(hip_target) = config.hip_trajectory.target.as_ref() else {
            return;
        };
        let current = config.current_frame;
        let next = config.next_frame;
        let rep_next = config.frame_reproduction_time(next, 0);
        let hip_rotation = hip_target.rotation(rep_next);
        let root = Mat4::from_scale_rotation_translation(
            Vec3::splat(rig.rig_scale),
            Quat::from_rotation_z(rig.heading + rig.angular_speed * dt),
            hip_target.translation(rep_next),
        );
        let to_model = root.inverse();

        let targets: Vec<Option<Vec3>> = config
            .ee_trajectories
            .iter()
            .map(|data| {
                data.target
                    .as_ref()
                    .map(|target| to_model.transform_point3(target.curve.eval_clamped(rep_next)))
            })
            .collect();
        for (chain, target) in rig.chains_mut().iter_mut().zip(&targets) {
            if let Some(target) = target {
                chain.current_ee_target = *target;
            }
        }

        let hip = rig.hip_joint();
        let mut rotations = config.base_rotations(next).to_vec();
        rotations[hip] = hip_rotation;
        let mut problem = IkProblem::new(
            rig.skeleton(),
            config.joint_positions().to_vec(),
            rotations,
            config.joint_scales().to_vec(),
        );
        for (chain, target) in rig.chains().iter().zip(&targets) {
            if target.is_some() {
                problem.add_goal(chain, rig.nodes(), chain.current_ee_target);
            }
        }

        let solution = ik.solve(&problem, &config.ik_angles);
        let last = config.last_frame();
        let write_current = !config.was_recently_updated(current);
        for &(joint, rotation) in std::iter::once(&(hip, hip_rotation)).chain(&solution.rotations) {
            config.set_dynamic_rotation(next, joint, rotation);
            if next == last {
                config.set_dynamic_rotation(0, joint, rotation);
            }
            if write_current {
                config.set_dynamic_rotation(current, joint, rotation);
            }
        }
        config.record_updated_frame(next);
        config.ik_angles = solution.angles;
    }

    /// Velocity of the hip target at the active reproduction time
    pub fn root_motion_velocity(&self, animation: AnimationIndex) -> LocomotionResult<Vec3> {
        let config = self.config(animation)?;
        Ok(config
            .hip_trajectory
            .target
            .as_ref()
            .map_or(Vec3::ZERO, |target| target.translations.velocity(config.reproduction_time)))
    }

    /// Drive a rigid body with the root motion of an animation
    pub fn apply_root_motion(&self, animation: AnimationIndex, body: &mut RigidBody) -> LocomotionResult<()> {
        body.set_linear_velocity(self.root_motion_velocity(animation)?);
        Ok(())
    }

    /// Local rotations of the pose between the current and next frame
    pub fn current_pose(&self, animation: AnimationIndex) -> LocomotionResult<Vec<Quat>> {
        Ok(self.config(animation)?.interpolated_rotations(RotationSource::Dynamic))
    }

    /// World-space transforms of the current pose
    pub fn world_transforms(&self, animation: AnimationIndex, transform: &Transform) -> LocomotionResult<Vec<Mat4>> {
        let config = self.config(animation)?;
        let model = transform.model_matrix();
        Ok(
            ForwardKinematics::interpolated_model_transforms(self.rig.skeleton(), config, RotationSource::Dynamic)
                .into_iter()
                .map(|m| model * m)
                .collect(),
        )
    }

    /// Copy the corrected rotations into a decompressed clip with the same frames
    pub fn write_corrected_rotations(&self, animation: AnimationIndex, clip: &mut AnimationClip) -> LocomotionResult<()> {
        let config = self.config(animation)?;
        if !clip.is_decompressed() {
            return Err(AnimationError::NotDecompressed.into());
        }
        for frame in 0..config.frame_count() {
            for (joint, rotation) in config.dynamic_rotations(frame).iter().enumerate() {
                clip.set_rotation(frame, joint, *rotation)?;
            }
        }
        Ok(())
    }
}

fn is_constant(keys: &[(f32, Vec3)]) -> bool {
    keys.windows(2)
        .all(|pair| pair[0].1.abs_diff_eq(pair[1].1, CONSTANT_TOLERANCE))
}

fn model_rotation(parents: &[Option<JointIndex>], rotations: &[Quat], joint: JointIndex) -> Quat {
    let mut rotation = rotations[joint];
    let mut current = parents[joint];
    while let Some(parent) = current {
        rotation = rotations[parent] * rotation;
        current = parents[parent];
    }
    rotation
}

/// Record a reached position, starting a one-cycle constant history if none exists
fn record_position(
    saved: &mut Option<Lic3>,
    time: f32,
    position: Vec3,
    duration: f32,
    history: f32,
    epsilon: f32,
) -> CurveResult<()> {
    match saved {
        Some(curve) => {
            curve.insert_point(time, position);
            curve.trim_before(time - history);
        }
        None => {
            *saved = Some(Lic3::with_epsilon(
                vec![position, position],
                vec![time - duration, time],
                epsilon,
            )?);
        }
    }
    Ok(())
}

fn backfill(saved: &mut Option<Lic3>, joined: CurveResult<Lic3>) {
    match joined {
        Ok(curve) => *saved = Some(curve),
        Err(err) => log::warn!("Keeping recorded positions without the initial target: {err}"),
    }
}
