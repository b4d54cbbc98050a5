//! Trajectory generation
//!
//! Two halves live here. At attach time the baked end-effector motion is
//! classified into support and swing frames and split into sub-trajectories.
//! At runtime, on every new frame, each chain gets a world-space target
//! adapted to terrain, heading and rig scale, and the hip gets a target that
//! keeps the legs at their original extension.

use glam::{Quat, Vec2, Vec3};
use strider_core::math::{horizontal_distance, lerp};

use crate::config::{AnimationType, IKRigConfig};
use crate::curve::{Lic1, Lic3};
use crate::environment::EnvironmentData;
use crate::gradient_descent::{CostTerm, DescentSettings, DescentStepHook, GradientDescent};
use crate::rig::{IKChain, IKRig};
use crate::trajectory::{
    angle_axis_sequence, EEGlobalTrajectoryData, EETrajectory, HipGlobalTrajectoryData, HipTarget, TargetSource,
    TrajectoryType,
};
use crate::{ChainIndex, CurveResult, TrajectorySettings};

/// Character state the generator adapts to
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionState {
    /// Heading about the up axis in radians
    pub heading: f32,
    pub rig_scale: f32,
    /// Unscaled rig height
    pub rig_height: f32,
    /// Current world position of the hip
    pub hip_position: Vec3,
}

/// Stride march parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StrideQuery {
    pub start: Vec3,
    /// Horizontal unit direction
    pub direction: Vec3,
    /// Target distance from `start`
    pub distance: f32,
    /// Ground clearance at the start and end of the stride
    pub start_clearance: f32,
    pub end_clearance: f32,
    /// Largest accepted ground height change between samples
    pub max_step_height: f32,
}

/// Frame timing of the attachment being updated
#[derive(Debug, Clone, Copy)]
struct FrameTiming {
    anim_now: f32,
    anim_next: f32,
    rep_now: f32,
    rep_next: f32,
    /// Reproduction time minus animation time in the current cycle
    offset: f32,
    duration: f32,
}

impl FrameTiming {
    fn of(config: &IKRigConfig) -> Self {
        let offset = config.reproduction_offset();
        let anim_now = config.timestamps()[config.current_frame];
        let anim_next = config.timestamps()[config.next_frame];
        Self {
            anim_now,
            anim_next,
            rep_now: anim_now + offset,
            rep_next: anim_next + offset,
            offset,
            duration: config.duration(),
        }
    }
}

/// A maximal run of equally flagged frame intervals. Interval `k` joins frame
/// `k - 1` to frame `k`; indices are unwrapped so runs may cross the cycle end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SupportRun {
    first: isize,
    last: isize,
    support: bool,
}

fn support_runs(support: &[bool]) -> Vec<SupportRun> {
    let m = support.len() as isize - 1;
    let flag = |k: isize| support[((k - 1).rem_euclid(m) + 1) as usize];

    if (1..=m).all(|k| flag(k) == flag(1)) {
        return vec![SupportRun {
            first: 1,
            last: m,
            support: flag(1),
        }];
    }

    let mut first = 1;
    while flag(first - 1) == flag(1) {
        first -= 1;
    }
    let mut runs = Vec::new();
    loop {
        let support = flag(first);
        let mut last = first;
        while flag(last + 1) == support {
            last += 1;
        }
        runs.push(SupportRun { first, last, support });
        if last >= m {
            break;
        }
        first = last + 1;
    }
    runs
}

/// Ground clearance per frame: the end-effector height on support frames,
/// interpolated around the cycle across swing frames
fn support_heights(support: &[bool], positions: &[Vec3]) -> Vec<f32> {
    let n = positions.len();
    let m = n - 1;
    let mut heights = vec![0.0; n];
    if !support[..m].contains(&true) {
        return heights;
    }

    for i in 0..m {
        if support[i] {
            heights[i] = positions[i].z;
            continue;
        }
        let mut back = 1;
        while !support[(i + m - back) % m] {
            back += 1;
        }
        let mut ahead = 1;
        while !support[(i + ahead) % m] {
            ahead += 1;
        }
        let before = positions[(i + m - back) % m].z;
        let after = positions[(i + ahead) % m].z;
        heights[i] = lerp(before, after, back as f32 / (back + ahead) as f32);
    }
    heights[m] = heights[0];
    heights
}

/// Hip height smoothing data: only interior, non-apex points move
struct HipHeights {
    times: Vec<f32>,
    heights: Vec<f32>,
    /// Vertical velocity of each segment of the unadjusted trajectory
    base_velocities: Vec<f32>,
    free: Vec<usize>,
    floors: Vec<f32>,
}

impl HipHeights {
    fn segment_velocity(&self, args: &[f32], segment: usize) -> f32 {
        let height = |index: usize| match self.free.binary_search(&index) {
            Ok(slot) => args[slot],
            Err(_) => self.heights[index],
        };
        (height(segment) - height(segment - 1)) / (self.times[segment] - self.times[segment - 1])
    }
}

/// Match segment velocities to the unadjusted trajectory
struct VelocityMatch;

impl CostTerm<HipHeights> for VelocityMatch {
    fn value(&self, args: &[f32], data: &HipHeights) -> f32 {
        (1..data.times.len())
            .map(|segment| {
                let error = data.segment_velocity(args, segment) - data.base_velocities[segment];
                error * error
            })
            .sum()
    }

    fn partial_derivative(&self, args: &[f32], index: usize, data: &HipHeights) -> f32 {
        let point = data.free[index];
        let incoming = data.segment_velocity(args, point) - data.base_velocities[point];
        let outgoing = data.segment_velocity(args, point + 1) - data.base_velocities[point + 1];
        2.0 * incoming / (data.times[point] - data.times[point - 1])
            - 2.0 * outgoing / (data.times[point + 1] - data.times[point])
    }
}

/// Keep the hip above its floor
struct HeightFloor;

impl DescentStepHook<HipHeights> for HeightFloor {
    fn after_step(&self, args: &mut [f32], _previous: &[f32], data: &HipHeights) {
        for (height, floor) in args.iter_mut().zip(&data.floors) {
            *height = height.max(*floor);
        }
    }
}

/// Builds trajectory data at attach time and targets at runtime
pub struct TrajectoryGenerator {
    settings: TrajectorySettings,
    epsilon: f32,
    smoother: GradientDescent<HipHeights>,
}

impl TrajectoryGenerator {
    pub fn new(settings: TrajectorySettings, epsilon: f32) -> Self {
        let descent = DescentSettings {
            rate: settings.smoothing_rate,
            max_iterations: settings.smoothing_iterations,
            target_delta: settings.smoothing_target_delta,
            adaptive: false,
        };
        let mut smoother = GradientDescent::new(descent).with_term(VelocityMatch);
        smoother.set_step_hook(HeightFloor);
        Self {
            settings,
            epsilon,
            smoother,
        }
    }

    pub fn settings(&self) -> &TrajectorySettings {
        &self.settings
    }

    pub fn epsilon(&self) -> f32 {
        self.epsilon
    }

    /// Largest per-frame displacement that still counts as support
    pub fn support_threshold(&self, rig_height: f32, rig_scale: f32) -> f32 {
        rig_height * rig_scale * self.settings.support_distance_factor
    }

    /// Flag frames whose end effector barely moved since the previous frame.
    /// The last frame follows frame `n - 2` when that is support, frame 0
    /// mirrors the last frame and isolated swing frames become support.
    pub fn classify_support_frames(positions: &[Vec3], threshold: f32) -> Vec<bool> {
        let n = positions.len();
        if n < 2 {
            return vec![true; n];
        }
        let mut support = vec![false; n];
        for i in 1..n {
            support[i] = positions[i].distance(positions[i - 1]) <= threshold;
        }
        if n >= 3 && support[n - 2] {
            support[n - 1] = true;
        }
        support[0] = support[n - 1];
        for i in 1..n - 1 {
            if !support[i] && support[i - 1] && support[i + 1] {
                support[i] = true;
            }
        }
        support
    }

    /// Chains with an opposite take the negated flags of the lower-indexed chain
    pub fn apply_opposite_support(chains: &[IKChain], support: &mut [Vec<bool>]) {
        for (index, chain) in chains.iter().enumerate() {
            let Some(opposite) = chain.opposite else {
                continue;
            };
            if opposite > index && opposite < support.len() {
                support[opposite] = support[index].iter().map(|flag| !flag).collect();
            }
        }
    }

    /// Split one chain's cycle into static and dynamic sub-trajectories.
    /// `positions` are floor-normalised model-space end-effector positions and
    /// `hip_heights` the hip height at every frame.
    pub fn build_ee_trajectory_data(
        &self,
        timestamps: &[f32],
        positions: &[Vec3],
        support: Vec<bool>,
        hip_heights: &[f32],
    ) -> CurveResult<EEGlobalTrajectoryData> {
        let original = Lic3::with_epsilon(positions.to_vec(), timestamps.to_vec(), self.epsilon)?;
        let n = timestamps.len();
        let m = n - 1;
        let duration = timestamps[m] - timestamps[0];
        let cycle_offset = positions[m] - positions[0];
        let support_heights =
            Lic1::with_epsilon(support_heights(&support, positions), timestamps.to_vec(), self.epsilon)?;

        let wrap = |k: isize| k.rem_euclid(m as isize) as usize;
        let frame_time = |k: isize| timestamps[wrap(k)] + k.div_euclid(m as isize) as f32 * duration;

        let runs = support_runs(&support);
        let mut sub_trajectories = Vec::with_capacity(runs.len());
        for (i, run) in runs.iter().enumerate() {
            let id = if i > 0 && i == runs.len() - 1 && run.first == runs[0].first + m as isize {
                0
            } else {
                i
            };
            let start = frame_time(run.first - 1);
            let end = frame_time(run.last);
            let curve = original.sample_cyclic(start, end, cycle_offset)?;
            let apex = (run.first - 1..=run.last)
                .max_by(|a, b| hip_heights[wrap(*a)].total_cmp(&hip_heights[wrap(*b)]))
                .map_or(start, frame_time);
            let kind = if run.support {
                TrajectoryType::Static
            } else {
                TrajectoryType::Dynamic
            };
            sub_trajectories.push(EETrajectory::new(curve, kind, Some(id), apex));
        }

        log::debug!(
            "Built {} sub-trajectories over {} frames",
            sub_trajectories.len(),
            n
        );

        Ok(EEGlobalTrajectoryData {
            original,
            cycle_offset,
            sub_trajectories,
            support_frames: support,
            support_heights,
            target: None,
            target_source: None,
            saved_positions: None,
        })
    }

    /// Hip translations and rotations over one cycle. Frames where the hip
    /// moved less than `min_distance` since the last recorded one are skipped.
    pub fn build_hip_trajectory_data(
        &self,
        timestamps: &[f32],
        translations: &[Vec3],
        rotations: &[Quat],
        min_distance: f32,
    ) -> CurveResult<HipGlobalTrajectoryData> {
        let n = timestamps.len();
        let mut recorded = vec![0];
        for i in 1..n.saturating_sub(1) {
            let last = recorded[recorded.len() - 1];
            if translations[i].distance(translations[last]) >= min_distance {
                recorded.push(i);
            }
        }
        recorded.push(n - 1);

        let (angles, axes) = angle_axis_sequence(rotations);
        let times: Vec<f32> = recorded.iter().map(|&i| timestamps[i]).collect();
        let pick = |values: &[Vec3]| recorded.iter().map(|&i| values[i]).collect::<Vec<_>>();

        Ok(HipGlobalTrajectoryData {
            original_translations: Lic3::with_epsilon(pick(translations), times.clone(), self.epsilon)?,
            cycle_offset: translations[n - 1] - translations[0],
            original_angles: Lic1::with_epsilon(
                recorded.iter().map(|&i| angles[i]).collect(),
                times.clone(),
                self.epsilon,
            )?,
            original_axes: Lic3::with_epsilon(pick(&axes), times, self.epsilon)?,
            target: None,
            saved_positions: None,
        })
    }

    /// Generate targets for every chain, then for the hip. Curve failures
    /// are logged and degrade to simpler targets instead of aborting the frame.
    pub fn generate_trajectories(
        &self,
        rig: &IKRig,
        config: &mut IKRigConfig,
        state: &MotionState,
        env: &EnvironmentData,
    ) {
        for chain in 0..rig.chains().len().min(config.ee_trajectories.len()) {
            self.generate_ee_trajectory(config, chain, state, env);
        }
        self.generate_hip_trajectory(rig, config, state, env);
    }

    /// Generate and blend the target of one chain for the frame starting now
    pub fn generate_ee_trajectory(
        &self,
        config: &mut IKRigConfig,
        chain: ChainIndex,
        state: &MotionState,
        env: &EnvironmentData,
    ) {
        let timing = FrameTiming::of(config);

        let generated = if config.animation_type == AnimationType::Idle {
            None
        } else {
            match self.dynamic_ee_target(config, chain, &timing, state, env) {
                Ok(generated) => generated,
                Err(err) => {
                    log::warn!("Falling back to a fixed trajectory for chain {chain}: {err}");
                    None
                }
            }
        };

        let (target, source) = match generated {
            Some((target, source)) => (target, Some(source)),
            None => {
                let data = &config.ee_trajectories[chain];
                let current = data.saved_position(timing.rep_now).unwrap_or(state.hip_position);
                let clearance = data.support_height(timing.anim_now) * state.rig_scale;
                match self.generate_fixed_trajectory(current, timing.rep_now, timing.duration, clearance, env) {
                    Ok(fixed) => (fixed, None),
                    Err(err) => {
                        log::warn!("Keeping the previous target of chain {chain}: {err}");
                        return;
                    }
                }
            }
        };

        let data = &mut config.ee_trajectories[chain];
        let blended = match &data.target {
            Some(previous)
                if target.sub_trajectory_id.is_some()
                    && previous.sub_trajectory_id == target.sub_trajectory_id
                    && previous.curve.in_t_range(timing.rep_next) =>
            {
                match Lic3::transition(&previous.curve, &target.curve, timing.rep_next) {
                    Ok(curve) => EETrajectory {
                        curve,
                        alt_curve: Some(target.curve),
                        ..target
                    },
                    Err(err) => {
                        log::warn!("Replacing the target of chain {chain} without blending: {err}");
                        target
                    }
                }
            }
            _ => target,
        };
        data.target = Some(blended);
        data.target_source = source;
    }

    /// Target built from the sub-trajectory covering the current frame, or
    /// `None` when a fixed trajectory should be used instead
    fn dynamic_ee_target(
        &self,
        config: &IKRigConfig,
        chain: ChainIndex,
        timing: &FrameTiming,
        state: &MotionState,
        env: &EnvironmentData,
    ) -> CurveResult<Option<(EETrajectory, TargetSource)>> {
        let data = &config.ee_trajectories[chain];
        let Some(index) = data.sub_trajectory_index(timing.anim_now, timing.anim_next) else {
            return Ok(None);
        };
        let sub = &data.sub_trajectories[index];
        let (anim_start, anim_end) = sub.curve.t_range();
        let rep_start = anim_start + timing.offset;
        let rep_end = anim_end + timing.offset;
        let start_clearance = data.support_height(anim_start) * state.rig_scale;
        let end_clearance = data.support_height(anim_end) * state.rig_scale;

        let initial = match data.saved_position(rep_start) {
            Some(position) => position,
            None => self.calc_stride_starting_point(config, chain, anim_start, state, env),
        };
        let source = TargetSource {
            sub_trajectory: index,
            time_offset: timing.offset,
        };
        let apex = sub.hip_max_altitude_time + timing.offset;

        let target = match sub.kind {
            TrajectoryType::Static => {
                let planted = env.project(initial, start_clearance);
                let curve = Lic3::constant_with_epsilon(planted, rep_start, rep_end, self.epsilon)?;
                EETrajectory::new(curve, TrajectoryType::Static, sub.sub_trajectory_id, apex)
            }
            TrajectoryType::Dynamic => {
                let displacement = sub.curve.displacement().with_z(0.0);
                let distance = displacement.length() * state.rig_scale;
                let Some(direction) = displacement.try_normalize() else {
                    return Ok(None);
                };
                if distance < self.epsilon {
                    return Ok(None);
                }

                let stride = self.calc_stride_data(
                    &StrideQuery {
                        start: initial,
                        direction: Quat::from_rotation_z(state.heading) * direction,
                        distance,
                        start_clearance,
                        end_clearance,
                        max_step_height: self.settings.max_step_height_ratio * state.rig_height * state.rig_scale,
                    },
                    env,
                );
                if stride.len() < 2 {
                    log::debug!("No valid stride for chain {chain}, holding position");
                    return Ok(None);
                }

                let mut curve = sub.curve.clone();
                curve.offset_t_values(timing.offset);
                curve.fit_ends(initial, stride[stride.len() - 1])?;
                EETrajectory::new(curve, TrajectoryType::Dynamic, sub.sub_trajectory_id, apex)
            }
        };
        Ok(Some((target, source)))
    }

    /// Planted trajectory at `position` projected onto the terrain
    pub fn generate_fixed_trajectory(
        &self,
        position: Vec3,
        start: f32,
        duration: f32,
        clearance: f32,
        env: &EnvironmentData,
    ) -> CurveResult<EETrajectory> {
        let planted = env.project(position, clearance);
        let curve = Lic3::constant_with_epsilon(planted, start, start + duration.max(self.epsilon), self.epsilon)?;
        Ok(EETrajectory::fixed(curve))
    }

    /// March along the terrain from the stride start and return the sampled
    /// points up to the one whose distance from the start best matches the
    /// requested distance. Sampling stops early at missing terrain (with
    /// stride correction) or at steps above the height limit (with stride
    /// validation), which shortens the stride.
    pub fn calc_stride_data(&self, query: &StrideQuery, env: &EnvironmentData) -> Vec<Vec3> {
        let steps = self.settings.stride_steps.max(1);
        let step = query.distance / steps as f32;
        let start_xy = query.start.truncate();
        let direction = query.direction.truncate();
        let mut previous_ground =
            env.terrain_height_or(start_xy, query.start.z - query.start_clearance);

        let mut points = vec![query.start];
        let mut best = 0;
        let mut best_diff = query.distance;
        for i in 1..=steps * 2 {
            let xy = start_xy + direction * (step * i as f32);
            let ground = match env.terrain_height(xy) {
                Some(height) => height,
                None if self.settings.stride_correction => break,
                None => previous_ground,
            };
            if self.settings.stride_validation && (ground - previous_ground).abs() > query.max_step_height {
                log::trace!("Stride cut at step {i}: height change {:.3}", ground - previous_ground);
                break;
            }
            previous_ground = ground;

            let progress = (i as f32 / steps as f32).min(1.0);
            let point = xy.extend(ground + lerp(query.start_clearance, query.end_clearance, progress));
            let diff = (point.distance(query.start) - query.distance).abs();
            points.push(point);
            if diff < best_diff {
                best = i;
                best_diff = diff;
            }
        }
        points.truncate(best + 1);
        points
    }

    /// Start of a stride with no recorded history: the original offset from
    /// the hip to the stride start, rotated by heading and walked along the
    /// terrain from the current hip position
    pub fn calc_stride_starting_point(
        &self,
        config: &IKRigConfig,
        chain: ChainIndex,
        anim_start: f32,
        state: &MotionState,
        env: &EnvironmentData,
    ) -> Vec3 {
        let data = &config.ee_trajectories[chain];
        let hip = &config.hip_trajectory;
        let anim_now = config.timestamps()[config.current_frame];
        let original_hip = hip.original_translation(anim_now);
        let offset = Quat::from_rotation_z(state.heading)
            * ((data.original_position(anim_start) - original_hip) * state.rig_scale);
        let clearance = data.support_height(anim_start) * state.rig_scale;

        let reference_xy = state.hip_position.truncate();
        let fallback_ground = state.hip_position.z - original_hip.z * state.rig_scale;
        let reference = reference_xy.extend(env.terrain_height_or(reference_xy, fallback_ground));

        let horizontal = offset.truncate();
        let distance = horizontal.length();
        let Some(direction) = horizontal.try_normalize() else {
            return reference.with_z(reference.z + clearance);
        };

        let steps = self.settings.starting_point_steps.max(1);
        let mut best = (reference_xy + horizontal).extend(reference.z);
        let mut best_diff = f32::INFINITY;
        for i in 0..=steps * 2 {
            let xy: Vec2 = reference_xy + direction * (distance * i as f32 / steps as f32);
            let Some(ground) = env.terrain_height(xy) else {
                continue;
            };
            let point = xy.extend(ground);
            let diff = (point.distance(reference) - distance).abs();
            if diff < best_diff {
                best = point;
                best_diff = diff;
            }
        }
        best.with_z(best.z + clearance)
    }

    /// Generate and blend the hip target for the frame starting now
    pub fn generate_hip_trajectory(
        &self,
        rig: &IKRig,
        config: &mut IKRigConfig,
        state: &MotionState,
        env: &EnvironmentData,
    ) {
        let timing = FrameTiming::of(config);
        let base = match config.animation_type {
            AnimationType::Idle => None,
            AnimationType::Walking => Self::hip_base_chain(rig, config),
        };

        let dynamic = base.and_then(|(chain, opposite, source)| {
            self.dynamic_hip_target(config, chain, opposite, source, state)
                .inspect_err(|err| log::warn!("Falling back to a fixed hip trajectory: {err}"))
                .ok()
        });
        let target = match dynamic {
            Some(target) => target,
            None => match self.fixed_hip_target(rig, config, &timing, state, env) {
                Ok(target) => target,
                Err(err) => {
                    log::warn!("Keeping the previous hip target: {err}");
                    return;
                }
            },
        };

        let hip = &mut config.hip_trajectory;
        let mut blended = match &hip.target {
            Some(previous) if previous.translations.in_t_range(timing.rep_next) => {
                previous.transition(&target, timing.rep_next).unwrap_or_else(|err| {
                    log::warn!("Replacing the hip target without blending: {err}");
                    target
                })
            }
            _ => target,
        };
        blended.translations.trim_before(timing.rep_now);
        blended.angles.trim_before(timing.rep_now);
        blended.axes.trim_before(timing.rep_now);
        hip.target = Some(blended);
    }

    /// Chain with an opposite whose dynamic target ends last
    fn hip_base_chain(rig: &IKRig, config: &IKRigConfig) -> Option<(ChainIndex, ChainIndex, TargetSource)> {
        rig.chains()
            .iter()
            .enumerate()
            .filter_map(|(index, chain)| {
                let opposite = chain.opposite?;
                let data = config.ee_trajectories.get(index)?;
                let target = data.target.as_ref().filter(|target| target.is_dynamic())?;
                let source = data.target_source?;
                Some((index, opposite, source, target.curve.end_t()))
            })
            .max_by(|a, b| a.3.total_cmp(&b.3))
            .map(|(index, opposite, source, _)| (index, opposite, source))
    }

    fn dynamic_hip_target(
        &self,
        config: &IKRigConfig,
        chain: ChainIndex,
        opposite: ChainIndex,
        source: TargetSource,
        state: &MotionState,
    ) -> CurveResult<HipTarget> {
        let ee = &config.ee_trajectories;
        let hip = &config.hip_trajectory;
        let sub = &ee[chain].sub_trajectories[source.sub_trajectory];
        let (anim_start, anim_end) = sub.curve.t_range();
        let rep_start = anim_start + source.time_offset;
        let rep_end = anim_end + source.time_offset;
        let scale = state.rig_scale;

        let mut target = hip.sample_original(anim_start, anim_end)?;
        target.translations.offset_t_values(source.time_offset);
        target.angles.offset_t_values(source.time_offset);
        target.axes.offset_t_values(source.time_offset);

        let mut apex = sub.hip_max_altitude_time + source.time_offset;
        if let (Some(base_target), Some(opposite_target)) = (&ee[chain].target, &ee[opposite].target) {
            let original_gap = horizontal_distance(
                ee[chain].original_position(sub.hip_max_altitude_time),
                ee[opposite].original_position(sub.hip_max_altitude_time),
            ) * scale;
            let retimed = Self::retimed_apex(original_gap, base_target, opposite_target, rep_start, rep_end, apex);

            let apex_index = target.translations.closest_point_index(apex);
            let last = target.translations.len() - 1;
            let apex_t = target.translations.times()[apex_index];
            let movable = apex_index > 0
                && apex_index < last
                && (retimed - apex_t).abs() > self.epsilon
                && retimed > rep_start + self.epsilon
                && retimed < rep_end - self.epsilon;
            if movable {
                log::trace!("Hip apex moved from {apex_t:.4} to {retimed:.4}");
                target.translations.displace_point_t(apex_index, 0, last, retimed, true, 1.0)?;
                target.angles.displace_point_t(apex_index, 0, last, retimed, true, 1.0)?;
                target.axes.displace_point_t(apex_index, 0, last, retimed, false, 1.0)?;
                apex = retimed;
            }
        }

        let translations = &mut target.translations;
        translations.scale(scale);
        let origin = translations.start();
        translations.translate(-origin);
        translations.rotate(Quat::from_rotation_z(state.heading));
        translations.translate(hip.saved_position(rep_start).unwrap_or(state.hip_position));

        let unadjusted = translations.clone();
        for index in 1..translations.len() {
            let t = translations.times()[index];
            let height = self.calc_hip_adjusted_height(config, (chain, opposite), t, t - source.time_offset, state);
            let point = translations.points()[index].with_z(height);
            translations.set_point(index, point)?;
        }

        let apex_index = translations.closest_point_index(apex);
        self.smooth_hip_heights(config, (chain, opposite), translations, &unadjusted, apex_index, state)?;
        Ok(target)
    }

    /// Time inside `(rep_start, rep_end)` where the horizontal gap between
    /// the two targets best matches the original gap at the hip apex
    fn retimed_apex(
        original_gap: f32,
        base: &EETrajectory,
        opposite: &EETrajectory,
        rep_start: f32,
        rep_end: f32,
        apex: f32,
    ) -> f32 {
        let total = rep_end - rep_start;
        let mut best = apex;
        let mut best_score = f32::INFINITY;
        let (base, opposite) = (base.unblended_curve(), opposite.unblended_curve());
        for &t in base.times() {
            if t <= rep_start || t >= rep_end {
                continue;
            }
            let gap = horizontal_distance(base.eval_clamped(t), opposite.eval_clamped(t));
            let diff = (original_gap - gap).abs();
            let time_diff = (t - apex).abs();
            let penalty = diff * time_diff / total;
            let multiplier = if time_diff > 0.0 {
                (total / time_diff).clamp(0.0, 5.0)
            } else {
                5.0
            };
            let score = diff + penalty * multiplier;
            if score < best_score {
                best = t;
                best_score = score;
            }
        }
        best
    }

    /// Lowest hip height, searched upward from the lower end-effector target,
    /// at which either leg reaches its original hip-to-end-effector height
    fn calc_hip_adjusted_height(
        &self,
        config: &IKRigConfig,
        (a, b): (ChainIndex, ChainIndex),
        rep_time: f32,
        anim_time: f32,
        state: &MotionState,
    ) -> f32 {
        let ee = &config.ee_trajectories;
        let scale = state.rig_scale;
        let original_hip = config.hip_trajectory.original_translation(anim_time).z * scale;
        let reach = |chain: ChainIndex| original_hip - ee[chain].original_position(anim_time).z * scale;
        let target_height = |chain: ChainIndex| {
            ee[chain]
                .target
                .as_ref()
                .map_or(state.hip_position.z - reach(chain), |target| target.curve.eval_clamped(rep_time).z)
        };

        let (reach_a, reach_b) = (reach(a), reach(b));
        let (z_a, z_b) = (target_height(a), target_height(b));
        let step = state.rig_height * scale * self.settings.hip_height_step_ratio;
        let mut height = z_a.min(z_b);
        for _ in 0..self.settings.hip_height_max_steps {
            if height - z_a < reach_a && height - z_b < reach_b {
                height += step;
            } else {
                break;
            }
        }
        height
    }

    /// Gradient-descent smoothing of hip heights toward the vertical velocity
    /// profile of the unadjusted trajectory. The first, last and apex points
    /// stay fixed; heights stay above the lower foot target plus clearance.
    fn smooth_hip_heights(
        &self,
        config: &IKRigConfig,
        (a, b): (ChainIndex, ChainIndex),
        translations: &mut Lic3,
        unadjusted: &Lic3,
        apex_index: usize,
        state: &MotionState,
    ) -> CurveResult<()> {
        let len = translations.len();
        let free: Vec<usize> = (1..len.saturating_sub(1)).filter(|&i| i != apex_index).collect();
        if free.is_empty() {
            return Ok(());
        }

        let times = translations.times().to_vec();
        let heights: Vec<f32> = translations.points().iter().map(|p| p.z).collect();
        let mut base_velocities = vec![0.0; len];
        for (segment, velocity) in base_velocities.iter_mut().enumerate().skip(1) {
            *velocity = unadjusted.point_velocity(segment, false).z;
        }

        let clearance = self.settings.hip_min_height_ratio * state.rig_height * state.rig_scale;
        let ee_height = |chain: ChainIndex, t: f32| {
            config.ee_trajectories[chain]
                .target
                .as_ref()
                .map_or(f32::NEG_INFINITY, |target| target.curve.eval_clamped(t).z)
        };
        let floors = free
            .iter()
            .map(|&i| ee_height(a, times[i]).min(ee_height(b, times[i])) + clearance)
            .collect();

        let mut args: Vec<f32> = free.iter().map(|&i| heights[i]).collect();
        let data = HipHeights {
            times,
            heights,
            base_velocities,
            free,
            floors,
        };
        let report = self.smoother.compute(&mut args, &data);
        log::trace!("Hip smoothing cost {:.6} after {} iterations", report.cost, report.iterations);

        for (&index, &height) in data.free.iter().zip(&args) {
            let point = translations.points()[index].with_z(height);
            translations.set_point(index, point)?;
        }
        Ok(())
    }

    /// Hip held at the current position, at the height the current foot
    /// targets call for, for one cycle
    fn fixed_hip_target(
        &self,
        rig: &IKRig,
        config: &IKRigConfig,
        timing: &FrameTiming,
        state: &MotionState,
        env: &EnvironmentData,
    ) -> CurveResult<HipTarget> {
        let legs = rig
            .chain(IKRig::LEFT_LEG)
            .and_then(|chain| chain.opposite.map(|opposite| (IKRig::LEFT_LEG, opposite)));
        let height = match legs {
            Some(pair) if config.ee_trajectories.len() > pair.0.max(pair.1) => {
                self.calc_hip_adjusted_height(config, pair, timing.rep_now, timing.anim_now, state)
            }
            _ => {
                let hip_height = config.hip_trajectory.original_translation(timing.anim_now).z * state.rig_scale;
                env.terrain_height(state.hip_position.truncate())
                    .map_or(state.hip_position.z, |ground| ground + hip_height)
            }
        };

        let hip = &config.hip_trajectory;
        let end = timing.rep_now + timing.duration;
        Ok(HipTarget {
            translations: Lic3::constant_with_epsilon(
                state.hip_position.with_z(height),
                timing.rep_now,
                end,
                self.epsilon,
            )?,
            angles: Lic1::constant_with_epsilon(
                hip.original_angles.eval_cyclic(timing.anim_now, 0.0),
                timing.rep_now,
                end,
                self.epsilon,
            )?,
            axes: Lic3::constant_with_epsilon(
                hip.original_axes.eval_cyclic(timing.anim_now, Vec3::ZERO),
                timing.rep_now,
                end,
                self.epsilon,
            )?,
        })
    }
}
