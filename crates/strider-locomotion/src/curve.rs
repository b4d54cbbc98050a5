//! Linearly interpolated parametric curves
//!
//! A [`Lic`] is an ordered list of `(time, point)` samples whose times ascend by
//! at least the curve epsilon. Points are `f32` (angles) or `Vec3` (positions).
//! Everything here is pure except the explicit mutators (`set_point`,
//! `insert_point`, `scale`, `translate`, `rotate`, `offset_t_values`,
//! `displace_point_t`, the `fit_*` family).

use std::fmt::Debug;
use std::ops::{Add, Mul, Sub};

use glam::{Quat, Vec3};

use crate::{CurveError, CurveResult};

/// Default minimum separation between sample times
pub const DEFAULT_EPSILON: f32 = 1e-4;

/// Retry budget when separating collapsed time values
const MAX_T_CORRECTIONS: usize = 3;

/// Relative slack accepted on the epsilon gap to absorb float rounding
const GAP_TOLERANCE: f32 = 1e-3;

/// Value type a curve can interpolate
pub trait CurvePoint:
    Copy + Debug + PartialEq + Add<Output = Self> + Sub<Output = Self> + Mul<f32, Output = Self>
{
    const ZERO: Self;

    fn distance(self, other: Self) -> f32;

    fn lerp_to(self, other: Self, t: f32) -> Self {
        self + (other - self) * t
    }
}

impl CurvePoint for f32 {
    const ZERO: Self = 0.0;

    fn distance(self, other: Self) -> f32 {
        (self - other).abs()
    }
}

impl CurvePoint for Vec3 {
    const ZERO: Self = Vec3::ZERO;

    fn distance(self, other: Self) -> f32 {
        Vec3::distance(self, other)
    }
}

/// Linearly interpolated curve
#[derive(Debug, Clone, PartialEq)]
pub struct Lic<P: CurvePoint> {
    points: Vec<P>,
    times: Vec<f32>,
    epsilon: f32,
}

/// Scalar curve
pub type Lic1 = Lic<f32>;
/// Position curve
pub type Lic3 = Lic<Vec3>;

impl<P: CurvePoint> Lic<P> {
    /// Build a curve with the default epsilon
    pub fn new(points: Vec<P>, times: Vec<f32>) -> CurveResult<Self> {
        Self::with_epsilon(points, times, DEFAULT_EPSILON)
    }

    /// Build a curve with a custom epsilon
    pub fn with_epsilon(points: Vec<P>, times: Vec<f32>, epsilon: f32) -> CurveResult<Self> {
        if !(epsilon > 0.0) {
            return Err(CurveError::InvalidEpsilon(epsilon));
        }
        if points.len() != times.len() {
            return Err(CurveError::LengthMismatch {
                points: points.len(),
                times: times.len(),
            });
        }
        if points.len() < 2 {
            return Err(CurveError::NotEnoughPoints(points.len()));
        }
        if let Some(index) = first_collapsed(&times, epsilon) {
            return Err(CurveError::UnorderedTimes {
                index,
                previous: times[index - 1],
                current: times[index],
            });
        }
        Ok(Self { points, times, epsilon })
    }

    /// Two-point curve holding `point` over `[start, end]`
    pub fn constant(point: P, start: f32, end: f32) -> CurveResult<Self> {
        Self::new(vec![point, point], vec![start, end])
    }

    /// Same as [`Lic::constant`] with an explicit epsilon
    pub fn constant_with_epsilon(point: P, start: f32, end: f32, epsilon: f32) -> CurveResult<Self> {
        Self::with_epsilon(vec![point, point], vec![start, end], epsilon)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Always false: a curve holds at least two points
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[P] {
        &self.points
    }

    pub fn times(&self) -> &[f32] {
        &self.times
    }

    pub fn epsilon(&self) -> f32 {
        self.epsilon
    }

    pub fn point(&self, index: usize) -> Option<P> {
        self.points.get(index).copied()
    }

    pub fn time(&self, index: usize) -> Option<f32> {
        self.times.get(index).copied()
    }

    pub fn start(&self) -> P {
        self.points[0]
    }

    pub fn end(&self) -> P {
        self.points[self.points.len() - 1]
    }

    pub fn start_t(&self) -> f32 {
        self.times[0]
    }

    pub fn end_t(&self) -> f32 {
        self.times[self.times.len() - 1]
    }

    pub fn t_range(&self) -> (f32, f32) {
        (self.start_t(), self.end_t())
    }

    pub fn duration(&self) -> f32 {
        self.end_t() - self.start_t()
    }

    /// `t` lies in `[start, end]`
    pub fn in_t_range(&self, t: f32) -> bool {
        t >= self.start_t() && t <= self.end_t()
    }

    /// `t` lies in `[start, end)`
    pub fn in_open_right_t_range(&self, t: f32) -> bool {
        t >= self.start_t() && t < self.end_t()
    }

    /// Evaluate the curve; `t` must be inside the time range
    pub fn eval(&self, t: f32) -> P {
        assert!(
            self.in_t_range(t),
            "curve evaluated at {t} outside [{}, {}]",
            self.start_t(),
            self.end_t()
        );
        self.eval_clamped(t)
    }

    /// Evaluate the curve, clamping `t` to the time range
    pub fn eval_clamped(&self, t: f32) -> P {
        if t <= self.start_t() {
            return self.start();
        }
        if t >= self.end_t() {
            return self.end();
        }
        match self.times.binary_search_by(|x| x.total_cmp(&t)) {
            Ok(index) => self.points[index],
            Err(index) => {
                let (t0, t1) = (self.times[index - 1], self.times[index]);
                self.points[index - 1].lerp_to(self.points[index], (t - t0) / (t1 - t0))
            }
        }
    }

    /// Evaluate a cyclic curve beyond its range. Each period shifts the
    /// result by `cycle_offset` (root motion accumulated per cycle).
    pub fn eval_cyclic(&self, t: f32, cycle_offset: P) -> P {
        let period = self.duration();
        let cycle = ((t - self.start_t()) / period).floor();
        let local = t - cycle * period;
        self.eval_clamped(local) + cycle_offset * cycle
    }

    fn segment_velocity(&self, index: usize) -> P {
        let dt = self.times[index] - self.times[index - 1];
        (self.points[index] - self.points[index - 1]) * (1.0 / dt)
    }

    /// Left-hand velocity: zero at the first sample, the previous segment at exact samples
    pub fn velocity(&self, t: f32) -> P {
        if t <= self.start_t() {
            return P::ZERO;
        }
        let t = t.min(self.end_t());
        let index = self.times.partition_point(|x| *x < t);
        self.segment_velocity(index)
    }

    /// Right-hand velocity: zero at the last sample, the next segment at exact samples
    pub fn right_velocity(&self, t: f32) -> P {
        if t >= self.end_t() {
            return P::ZERO;
        }
        let t = t.max(self.start_t());
        let index = self.times.partition_point(|x| *x <= t);
        self.segment_velocity(index)
    }

    /// Velocity of the segment to the left (or right) of a sample
    pub fn point_velocity(&self, index: usize, right: bool) -> P {
        if right {
            if index + 1 >= self.len() {
                P::ZERO
            } else {
                self.segment_velocity(index + 1)
            }
        } else if index == 0 || index >= self.len() {
            P::ZERO
        } else {
            self.segment_velocity(index)
        }
    }

    /// Sub-curve over `[min_t, max_t]` (clamped to the curve range) with
    /// evaluated endpoints
    pub fn sample(&self, min_t: f32, max_t: f32) -> CurveResult<Self> {
        let min = min_t.max(self.start_t());
        let max = max_t.min(self.end_t());
        if max - min < self.epsilon {
            return Err(CurveError::DegenerateRange { start: min_t, end: max_t });
        }

        let mut points = vec![self.eval_clamped(min)];
        let mut times = vec![min];
        for (&t, &p) in self.times.iter().zip(&self.points) {
            if t >= min + self.epsilon && t <= max - self.epsilon {
                points.push(p);
                times.push(t);
            }
        }
        points.push(self.eval_clamped(max));
        times.push(max);

        Self::with_epsilon(points, times, self.epsilon)
    }

    /// Sample a cyclic curve over a range that may leave its base period
    pub fn sample_cyclic(&self, min_t: f32, max_t: f32, cycle_offset: P) -> CurveResult<Self> {
        let period = self.duration();
        let first = ((min_t - self.start_t()) / period).floor() as i32;
        let last = ((max_t - self.start_t()) / period).floor() as i32;
        if first == 0 && last == 0 {
            return self.sample(min_t, max_t);
        }

        let mut points = Vec::with_capacity(self.len() * (last - first + 1).max(1) as usize);
        let mut times = Vec::with_capacity(points.capacity());
        for cycle in first..=last {
            let shift = cycle as f32;
            for (index, (&t, &p)) in self.times.iter().zip(&self.points).enumerate() {
                if cycle > first && index == 0 {
                    continue;
                }
                times.push(t + shift * period);
                points.push(p + cycle_offset * shift);
            }
        }
        Self::with_epsilon(points, times, self.epsilon)?.sample(min_t, max_t)
    }

    /// Concatenate two curves; points of `c2` closer than epsilon to (or
    /// before) the end of `c1` are dropped
    pub fn join(c1: &Self, c2: &Self) -> CurveResult<Self> {
        let limit = c1.end_t() + c1.epsilon;
        let mut points = c1.points.clone();
        let mut times = c1.times.clone();
        for (&t, &p) in c2.times.iter().zip(&c2.points) {
            if t >= limit {
                points.push(p);
                times.push(t);
            }
        }
        Self::with_epsilon(points, times, c1.epsilon)
    }

    /// Curve following `c1` before `t` and `c2` from `t` on
    pub fn transition(c1: &Self, c2: &Self, t: f32) -> CurveResult<Self> {
        let eps = c1.epsilon.max(c2.epsilon);
        let mut points = Vec::with_capacity(c1.len() + c2.len() + 2);
        let mut times = Vec::with_capacity(c1.len() + c2.len() + 2);

        let before = t - eps;
        if before >= c1.start_t() {
            for (&ti, &pi) in c1.times.iter().zip(&c1.points) {
                if ti <= before - eps {
                    points.push(pi);
                    times.push(ti);
                }
            }
            points.push(c1.eval_clamped(before));
            times.push(before);
        }

        points.push(c2.eval_clamped(t));
        times.push(t);
        for (&ti, &pi) in c2.times.iter().zip(&c2.points) {
            if ti >= t + eps {
                points.push(pi);
                times.push(ti);
            }
        }

        if points.len() == 1 {
            points.push(points[0]);
            times.push(t + eps);
        }
        Self::with_epsilon(points, times, eps)
    }

    /// Move the time of sample `point` to `new_t`, rescaling the timing of the
    /// samples between `low` and `high` proportionally. With `scale_points`
    /// the positions of those samples are pulled toward the bounds by the same
    /// factor times `ratio`.
    pub fn displace_point_t(
        &mut self,
        point: usize,
        low: usize,
        high: usize,
        new_t: f32,
        scale_points: bool,
        ratio: f32,
    ) -> CurveResult<()> {
        if !(low <= point && point <= high && high < self.len() && low < high) {
            return Err(CurveError::InvalidDisplacement(format!(
                "point {point} not within [{low}, {high}] of a {}-point curve",
                self.len()
            )));
        }
        let t_low = self.times[low];
        let t_high = self.times[high];
        let old_t = self.times[point];
        if !(new_t > t_low && new_t < t_high) {
            return Err(CurveError::InvalidDisplacement(format!(
                "time {new_t} outside ({t_low}, {t_high})"
            )));
        }

        if point > low {
            let factor = (new_t - t_low) / (old_t - t_low);
            let anchor = self.points[low];
            for i in low + 1..=point {
                self.times[i] = t_low + (self.times[i] - t_low) * factor;
                if scale_points {
                    self.points[i] = anchor.lerp_to(self.points[i], factor * ratio);
                }
            }
        }

        if point < high {
            let factor = (new_t - t_high) / (old_t - t_high);
            let anchor = self.points[high];
            for i in point..high {
                if i > point || point == low {
                    self.times[i] = t_high + (self.times[i] - t_high) * factor;
                    if scale_points {
                        self.points[i] = anchor.lerp_to(self.points[i], factor * ratio);
                    }
                }
            }
        }

        self.correct_t_values(MAX_T_CORRECTIONS)
    }

    /// Separate samples closer than epsilon by moving them to the mean of
    /// their neighbours, in time and in position
    pub fn correct_t_values(&mut self, max_corrections: usize) -> CurveResult<()> {
        let n = self.times.len();
        for _ in 0..=max_corrections {
            let Some(_) = first_collapsed(&self.times, self.epsilon) else {
                return Ok(());
            };
            for i in 1..n {
                if gap_too_small(self.times[i] - self.times[i - 1], self.epsilon) {
                    if i + 1 < n {
                        self.average_with_neighbours(i);
                    } else if i >= 2 {
                        self.average_with_neighbours(i - 1);
                    }
                }
            }
        }
        match first_collapsed(&self.times, self.epsilon) {
            None => Ok(()),
            Some(_) => Err(CurveError::CollapsedTValues),
        }
    }

    /// Append `c2` after `c1` separated by `offset` seconds. The gap is bridged
    /// along the mean of the end velocity of `c1` and the start velocity of `c2`.
    pub fn connect(c1: &Self, c2: &Self, offset: f32) -> CurveResult<Self> {
        if offset < c1.epsilon {
            return Err(CurveError::InvalidOffset(offset));
        }
        let velocity = (c1.point_velocity(c1.len() - 1, false) + c2.point_velocity(0, true)) * 0.5;
        let start_t = c1.end_t() + offset;
        let start_p = c1.end() + velocity * offset;

        let mut tail = c2.clone();
        tail.translate(start_p - c2.start());
        tail.offset_t_values(start_t - c2.start_t());
        Self::join(c1, &tail)
    }

    /// Copy of this curve extended by one sample `offset` seconds after the
    /// end, continuing along the velocity of the last segment
    pub fn connect_point(&self, offset: f32) -> CurveResult<Self> {
        if offset < self.epsilon {
            return Err(CurveError::InvalidOffset(offset));
        }
        let velocity = self.point_velocity(self.len() - 1, false);
        let mut points = self.points.clone();
        let mut times = self.times.clone();
        points.push(self.end() + velocity * offset);
        times.push(self.end_t() + offset);
        Self::with_epsilon(points, times, self.epsilon)
    }

    fn average_with_neighbours(&mut self, i: usize) {
        self.times[i] = (self.times[i - 1] + self.times[i + 1]) * 0.5;
        self.points[i] = self.points[i - 1].lerp_to(self.points[i + 1], 0.5);
    }

    /// Insert a sample, replacing an existing one closer than epsilon
    pub fn insert_point(&mut self, t: f32, point: P) {
        let index = self.times.partition_point(|x| *x < t);
        if index < self.len() && self.times[index] - t < self.epsilon {
            self.points[index] = point;
        } else if index > 0 && t - self.times[index - 1] < self.epsilon {
            self.points[index - 1] = point;
        } else {
            self.points.insert(index, point);
            self.times.insert(index, t);
        }
    }

    /// Overwrite the point of an existing sample
    pub fn set_point(&mut self, index: usize, point: P) -> CurveResult<()> {
        let len = self.len();
        let slot = self
            .points
            .get_mut(index)
            .ok_or(CurveError::IndexOutOfRange { index, len })?;
        *slot = point;
        Ok(())
    }

    /// Drop samples wholly before `t`, keeping the one bracketing it and at
    /// least two points
    pub fn trim_before(&mut self, t: f32) {
        let removable = self.times.partition_point(|x| *x <= t).saturating_sub(1);
        let removable = removable.min(self.len() - 2);
        if removable > 0 {
            self.points.drain(..removable);
            self.times.drain(..removable);
        }
    }

    pub fn scale(&mut self, factor: f32) {
        for point in &mut self.points {
            *point = *point * factor;
        }
    }

    pub fn translate(&mut self, offset: P) {
        for point in &mut self.points {
            *point = *point + offset;
        }
    }

    pub fn offset_t_values(&mut self, offset: f32) {
        for t in &mut self.times {
            *t += offset;
        }
    }

    /// Index of the sample nearest in time to `t`
    pub fn closest_point_index(&self, t: f32) -> usize {
        let mut best = 0;
        let mut best_diff = f32::INFINITY;
        for (index, &ti) in self.times.iter().enumerate() {
            let diff = (ti - t).abs();
            if diff < best_diff {
                best = index;
                best_diff = diff;
            }
        }
        best
    }

    /// Index of the sample at `t` (within epsilon)
    pub fn point_index(&self, t: f32) -> Option<usize> {
        let index = self.closest_point_index(t);
        ((self.times[index] - t).abs() < self.epsilon).then_some(index)
    }
}

impl Lic<Vec3> {
    /// Rotate every point about the origin
    pub fn rotate(&mut self, rotation: Quat) {
        for point in &mut self.points {
            *point = rotation * *point;
        }
    }

    /// Start-to-end displacement
    pub fn displacement(&self) -> Vec3 {
        self.end() - self.start()
    }

    /// Move the curve so it starts at `new_start` and its start-to-end
    /// direction matches `direction`
    pub fn fit_start_and_dir(&mut self, new_start: Vec3, direction: Vec3) -> CurveResult<()> {
        let old = self.displacement();
        let (Some(old_dir), Some(new_dir)) = (old.try_normalize(), direction.try_normalize()) else {
            return Err(CurveError::ZeroLength);
        };
        let origin = self.start();
        self.translate(-origin);
        self.rotate(Quat::from_rotation_arc(old_dir, new_dir));
        self.translate(new_start);
        Ok(())
    }

    /// Rotate, scale and move the curve so it runs from `new_start` to `new_end`
    pub fn fit_ends(&mut self, new_start: Vec3, new_end: Vec3) -> CurveResult<()> {
        let old = self.displacement();
        let old_len = old.length();
        if old_len < self.epsilon {
            return Err(CurveError::ZeroLength);
        }
        let new = new_end - new_start;
        let new_len = new.length();

        let origin = self.start();
        self.translate(-origin);
        if new_len >= self.epsilon {
            self.rotate(Quat::from_rotation_arc(old / old_len, new / new_len));
        }
        self.scale(new_len / old_len);
        self.translate(new_start);
        Ok(())
    }
}

fn gap_too_small(gap: f32, epsilon: f32) -> bool {
    gap < epsilon * (1.0 - GAP_TOLERANCE)
}

fn first_collapsed(times: &[f32], epsilon: f32) -> Option<usize> {
    (1..times.len()).find(|&i| gap_too_small(times[i] - times[i - 1], epsilon) || times[i].is_nan())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp() -> Lic3 {
        Lic::new(
            vec![
                Vec3::ZERO,
                Vec3::new(0.0, 1.0, 0.0),
                Vec3::new(0.0, 1.0, 2.0),
                Vec3::new(1.0, 1.0, 2.0),
            ],
            vec![0.0, 1.0, 2.0, 3.0],
        )
        .unwrap()
    }

    #[test]
    fn test_construction_errors() {
        assert_eq!(
            Lic::<f32>::new(vec![1.0], vec![0.0]),
            Err(CurveError::NotEnoughPoints(1))
        );
        assert!(matches!(
            Lic::<f32>::new(vec![1.0, 2.0], vec![0.0]),
            Err(CurveError::LengthMismatch { points: 2, times: 1 })
        ));
        assert!(matches!(
            Lic::<f32>::new(vec![1.0, 2.0, 3.0], vec![0.0, 1.0, 1.00001]),
            Err(CurveError::UnorderedTimes { index: 2, .. })
        ));
        assert!(matches!(
            Lic::<f32>::with_epsilon(vec![1.0, 2.0], vec![0.0, 1.0], 0.0),
            Err(CurveError::InvalidEpsilon(_))
        ));
    }

    #[test]
    fn test_eval_endpoints_exact() {
        let curve = Lic::new(
            vec![Vec3::new(0.1, 0.2, 0.3), Vec3::new(1.7, -2.3, 0.9), Vec3::new(3.3, 0.7, -1.1)],
            vec![0.3, 0.7, 1.9],
        )
        .unwrap();
        assert_eq!(curve.eval(0.3), Vec3::new(0.1, 0.2, 0.3));
        assert_eq!(curve.eval(1.9), Vec3::new(3.3, 0.7, -1.1));
        assert_eq!(curve.eval(0.7), Vec3::new(1.7, -2.3, 0.9));
        assert!(curve.in_t_range(0.3));
        assert!(curve.in_t_range(1.9));
        assert!(!curve.in_t_range(0.29));
        assert!(!curve.in_t_range(1.91));
        assert!(!curve.in_open_right_t_range(1.9));
    }

    #[test]
    #[should_panic]
    fn test_eval_outside_range_panics() {
        ramp().eval(3.5);
    }

    #[test]
    fn test_eval_interpolates() {
        let curve = ramp();
        assert!((curve.eval(1.5) - Vec3::new(0.0, 1.0, 1.0)).length() < 1e-6);
        assert_eq!(curve.eval_clamped(-1.0), Vec3::ZERO);
        assert_eq!(curve.eval_clamped(10.0), Vec3::new(1.0, 1.0, 2.0));
    }

    #[test]
    fn test_velocities() {
        let curve = ramp();
        assert_eq!(curve.velocity(0.0), Vec3::ZERO);
        // Left-hand at an exact sample uses the previous segment
        assert_eq!(curve.velocity(1.0), Vec3::new(0.0, 1.0, 0.0));
        assert_eq!(curve.right_velocity(1.0), Vec3::new(0.0, 0.0, 2.0));
        assert_eq!(curve.right_velocity(3.0), Vec3::ZERO);
        assert_eq!(curve.point_velocity(0, false), Vec3::ZERO);
        assert_eq!(curve.point_velocity(3, true), Vec3::ZERO);
        assert_eq!(curve.point_velocity(2, true), Vec3::new(1.0, 0.0, 0.0));
    }

    #[test]
    fn test_sample_inserts_endpoints() {
        let curve = ramp();
        let sub = curve.sample(0.5, 2.5).unwrap();
        assert_eq!(sub.t_range(), (0.5, 2.5));
        assert_eq!(sub.len(), 4);
        assert!((sub.start() - Vec3::new(0.0, 0.5, 0.0)).length() < 1e-6);
        assert!((sub.end() - Vec3::new(0.5, 1.0, 2.0)).length() < 1e-6);

        let aligned = curve.sample(1.0, 2.0).unwrap();
        assert_eq!(aligned.len(), 2);
        assert!(curve.sample(1.0, 1.00001).is_err());
    }

    #[test]
    fn test_join_ranges_and_counts() {
        let c1 = Lic::new(vec![0.0f32, 1.0, 2.0], vec![0.0, 1.0, 2.0]).unwrap();
        let c2 = Lic::new(vec![5.0f32, 6.0, 7.0], vec![2.0, 3.0, 4.0]).unwrap();
        let joined = Lic::join(&c1, &c2).unwrap();
        assert_eq!(joined.t_range(), (0.0, 4.0));
        // c2's first point sits at c1's last time and is dropped
        assert_eq!(joined.len(), c1.len() + c2.len() - 1);

        let c3 = Lic::new(vec![5.0f32, 6.0], vec![2.5, 3.0]).unwrap();
        let joined = Lic::join(&c1, &c3).unwrap();
        assert_eq!(joined.len(), c1.len() + c3.len());
    }

    #[test]
    fn test_transition_follows_both_curves() {
        let c1 = Lic::new(
            vec![Vec3::ZERO, Vec3::new(1.0, 0.0, 0.0), Vec3::new(2.0, 0.0, 0.0)],
            vec![0.0, 1.0, 2.0],
        )
        .unwrap();
        let c2 = Lic::new(
            vec![Vec3::new(0.0, 5.0, 0.0), Vec3::new(0.0, 6.0, 1.0), Vec3::new(0.0, 8.0, 1.0)],
            vec![0.5, 1.5, 3.0],
        )
        .unwrap();
        let pivot = 1.2;
        let blended = Lic::transition(&c1, &c2, pivot).unwrap();

        for &t in &[0.0, 0.4, 0.9, 1.0, 1.19] {
            assert!((blended.eval(t) - c1.eval(t)).length() < 1e-5, "before pivot at {t}");
        }
        for &t in &[1.2, 1.3, 1.5, 2.2, 3.0] {
            assert!((blended.eval(t) - c2.eval(t)).length() < 1e-5, "after pivot at {t}");
        }
        assert_eq!(blended.end_t(), 3.0);
    }

    #[test]
    fn test_transition_before_first_curve() {
        let c1 = Lic::constant(1.0f32, 5.0, 6.0).unwrap();
        let c2 = Lic::new(vec![0.0f32, 2.0], vec![0.0, 2.0]).unwrap();
        let blended = Lic::transition(&c1, &c2, 1.0).unwrap();
        assert_eq!(blended.t_range(), (1.0, 2.0));
        assert!((blended.eval(1.5) - 1.5).abs() < 1e-6);
    }

    #[test]
    fn test_displace_point_t_retimes_apex() {
        let mut curve = Lic::new(
            vec![0.0f32, 1.0, 2.0, 1.0, 0.0],
            vec![0.0, 1.0, 2.0, 3.0, 4.0],
        )
        .unwrap();
        curve.displace_point_t(2, 0, 4, 3.0, false, 1.0).unwrap();
        assert_eq!(curve.time(2), Some(3.0));
        assert!((curve.time(1).unwrap() - 1.5).abs() < 1e-6);
        assert!((curve.time(3).unwrap() - 3.5).abs() < 1e-6);
        assert_eq!(curve.t_range(), (0.0, 4.0));
        assert_eq!(curve.point(2), Some(2.0));
    }

    #[test]
    fn test_displace_point_t_scales_points() {
        let mut curve = Lic::new(vec![0.0f32, 2.0, 0.0], vec![0.0, 1.0, 2.0]).unwrap();
        curve.displace_point_t(1, 0, 2, 0.5, true, 1.0).unwrap();
        assert_eq!(curve.time(1), Some(0.5));
        // Pulled toward the low anchor by the retime factor
        assert!((curve.point(1).unwrap() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_displace_point_t_rejects_out_of_bounds() {
        let mut curve = ramp();
        assert!(curve.displace_point_t(1, 0, 3, 3.0, false, 1.0).is_err());
        assert!(curve.displace_point_t(4, 0, 3, 1.0, false, 1.0).is_err());
    }

    #[test]
    fn test_correct_t_values_merges_near_duplicates() {
        let mut curve = Lic::new(vec![0.0f32, 1.0, 2.0, 3.0], vec![0.0, 1.0, 2.0, 3.0]).unwrap();
        curve.times[2] = 1.00001;
        curve.points[2] = 7.0;
        curve.correct_t_values(3).unwrap();
        assert!((curve.time(2).unwrap() - 2.0).abs() < 1e-6);
        assert!((curve.point(2).unwrap() - 2.0).abs() < 1e-6);
        assert!(first_collapsed(curve.times(), curve.epsilon()).is_none());

        let mut pair = Lic::new(vec![0.0f32, 1.0], vec![0.0, 1.0]).unwrap();
        pair.times[1] = 0.00001;
        assert_eq!(pair.correct_t_values(3), Err(CurveError::CollapsedTValues));
    }

    #[test]
    fn test_connect_matches_velocity() {
        let c1 = Lic::new(vec![Vec3::ZERO, Vec3::X], vec![0.0, 1.0]).unwrap();
        let c2 = Lic::new(vec![Vec3::new(9.0, 9.0, 9.0), Vec3::new(10.0, 9.0, 9.0)], vec![0.0, 1.0]).unwrap();
        let connected = Lic::connect(&c1, &c2, 0.5).unwrap();
        assert_eq!(connected.len(), 4);
        assert_eq!(connected.end_t(), 2.5);
        assert!((connected.eval(1.5) - Vec3::new(1.5, 0.0, 0.0)).length() < 1e-6);
        assert!((connected.end() - Vec3::new(2.5, 0.0, 0.0)).length() < 1e-6);
        assert!(Lic::connect(&c1, &c2, 0.0).is_err());
    }

    #[test]
    fn test_connect_point_continues_end_velocity() {
        let curve = Lic::new(vec![Vec3::ZERO, Vec3::X], vec![0.0, 1.0]).unwrap();
        let extended = curve.connect_point(1.0).unwrap();
        assert_eq!(extended.len(), 3);
        assert_eq!(extended.end_t(), 2.0);
        assert!((extended.end() - Vec3::new(2.0, 0.0, 0.0)).length() < 1e-6);
        assert!((extended.velocity(1.5) - Vec3::X).length() < 1e-6);
        assert!(curve.connect_point(0.0).is_err());
    }

    #[test]
    fn test_fit_ends() {
        let mut curve = Lic::new(
            vec![Vec3::ZERO, Vec3::new(0.0, 0.5, 0.2), Vec3::new(0.0, 1.0, 0.0)],
            vec![0.0, 0.5, 1.0],
        )
        .unwrap();
        let start = Vec3::new(3.0, 3.0, 1.0);
        let end = Vec3::new(1.0, 3.0, 1.0);
        curve.fit_ends(start, end).unwrap();
        assert!((curve.start() - start).length() < 1e-5);
        assert!((curve.end() - end).length() < 1e-5);
        // Lift stays vertical under a heading change
        assert!((curve.eval(0.5) - Vec3::new(2.0, 3.0, 1.4)).length() < 1e-5);

        let mut flat = Lic::constant(Vec3::ONE, 0.0, 1.0).unwrap();
        assert_eq!(flat.fit_ends(Vec3::ZERO, Vec3::X), Err(CurveError::ZeroLength));
    }

    #[test]
    fn test_fit_start_and_dir() {
        let mut curve = Lic::new(vec![Vec3::ZERO, Vec3::new(0.0, 2.0, 0.0)], vec![0.0, 1.0]).unwrap();
        curve.fit_start_and_dir(Vec3::ONE, Vec3::X).unwrap();
        assert!((curve.end() - Vec3::new(3.0, 1.0, 1.0)).length() < 1e-5);
    }

    #[test]
    fn test_sample_cyclic_wraps_with_offset() {
        let cycle = Lic::new(vec![0.0f32, 0.5, 1.0], vec![0.0, 0.5, 1.0]).unwrap();
        let wrapped = cycle.sample_cyclic(0.75, 1.5, 1.0).unwrap();
        assert_eq!(wrapped.t_range(), (0.75, 1.5));
        assert!((wrapped.eval(1.0) - 1.0).abs() < 1e-6);
        assert!((wrapped.eval(1.25) - 1.25).abs() < 1e-6);
        assert!((cycle.eval_cyclic(-0.25, 1.0) + 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_insert_and_trim() {
        let mut curve = Lic::new(vec![0.0f32, 1.0], vec![0.0, 1.0]).unwrap();
        curve.insert_point(2.0, 2.0);
        curve.insert_point(0.5, 7.0);
        curve.insert_point(2.00001, 3.0);
        assert_eq!(curve.times(), &[0.0, 0.5, 1.0, 2.0]);
        assert_eq!(curve.point(3), Some(3.0));

        curve.trim_before(1.5);
        assert_eq!(curve.times(), &[1.0, 2.0]);
        curve.trim_before(10.0);
        assert_eq!(curve.len(), 2);
    }

    #[test]
    fn test_point_lookup() {
        let curve = ramp();
        assert_eq!(curve.closest_point_index(1.4), 1);
        assert_eq!(curve.point_index(2.0), Some(2));
        assert_eq!(curve.point_index(2.1), None);
    }
}
