//! Math utilities
//!
//! Re-exports from glam and the handful of geometric helpers the locomotion
//! crates share.

pub use glam::{Mat3, Mat4, Quat, Vec2, Vec3, Vec4};

/// Axis-aligned bounding box
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Aabb {
    /// Minimum corner
    pub min: Vec3,
    /// Maximum corner
    pub max: Vec3,
}

impl Aabb {
    /// Create an empty AABB
    pub const EMPTY: Self = Self {
        min: Vec3::splat(f32::INFINITY),
        max: Vec3::splat(f32::NEG_INFINITY),
    };

    /// Create an AABB from min and max corners
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Check if the AABB is empty
    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    /// Expand the AABB to include a point
    pub fn expand_to_include(&mut self, point: Vec3) {
        self.min = self.min.min(point);
        self.max = self.max.max(point);
    }

    /// Merge with another AABB
    pub fn merge(&self, other: &Aabb) -> Aabb {
        Aabb {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }
}

impl Default for Aabb {
    fn default() -> Self {
        Self::EMPTY
    }
}

/// Ray for raycasting
#[derive(Debug, Clone, Copy)]
pub struct Ray {
    /// Ray origin
    pub origin: Vec3,
    /// Ray direction (normalized)
    pub direction: Vec3,
}

impl Ray {
    /// Ray pointing straight down from `origin`
    pub fn down(origin: Vec3) -> Self {
        Self {
            origin,
            direction: -Vec3::Z,
        }
    }

    /// Get a point along the ray at distance t
    pub fn at(&self, t: f32) -> Vec3 {
        self.origin + self.direction * t
    }

    /// Intersect with an AABB, returns (t_min, t_max) if hit
    pub fn intersect_aabb(&self, aabb: &Aabb) -> Option<(f32, f32)> {
        let mut t_enter = f32::NEG_INFINITY;
        let mut t_exit = f32::INFINITY;

        for axis in 0..3 {
            let origin = self.origin[axis];
            let direction = self.direction[axis];
            if direction.abs() < f32::EPSILON {
                // Parallel to this slab: must already be inside it
                if origin < aabb.min[axis] || origin > aabb.max[axis] {
                    return None;
                }
                continue;
            }
            let inv = 1.0 / direction;
            let t1 = (aabb.min[axis] - origin) * inv;
            let t2 = (aabb.max[axis] - origin) * inv;
            t_enter = t_enter.max(t1.min(t2));
            t_exit = t_exit.min(t1.max(t2));
        }

        if t_enter <= t_exit && t_exit >= 0.0 {
            Some((t_enter.max(0.0), t_exit))
        } else {
            None
        }
    }

    /// Intersect with a triangle (Möller–Trumbore), returns the hit distance
    pub fn intersect_triangle(&self, a: Vec3, b: Vec3, c: Vec3) -> Option<f32> {
        let edge1 = b - a;
        let edge2 = c - a;
        let p = self.direction.cross(edge2);
        let det = edge1.dot(p);
        if det.abs() < 1e-8 {
            return None;
        }

        let inv_det = 1.0 / det;
        let s = self.origin - a;
        let u = s.dot(p) * inv_det;
        if !(0.0..=1.0).contains(&u) {
            return None;
        }

        let q = s.cross(edge1);
        let v = self.direction.dot(q) * inv_det;
        if v < 0.0 || u + v > 1.0 {
            return None;
        }

        let t = edge2.dot(q) * inv_det;
        (t >= 0.0).then_some(t)
    }
}

/// Linear interpolation
pub fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

/// Distance between two positions measured in the horizontal plane
pub fn horizontal_distance(a: Vec3, b: Vec3) -> f32 {
    a.truncate().distance(b.truncate())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aabb_grows_from_empty() {
        let mut aabb = Aabb::default();
        assert!(aabb.is_empty());
        aabb.expand_to_include(Vec3::new(1.0, -1.0, 0.0));
        aabb.expand_to_include(Vec3::new(-1.0, 2.0, 0.5));
        assert!(!aabb.is_empty());
        assert_eq!(aabb, Aabb::new(Vec3::new(-1.0, -1.0, 0.0), Vec3::new(1.0, 2.0, 0.5)));

        let merged = aabb.merge(&Aabb::new(Vec3::ZERO, Vec3::splat(3.0)));
        assert_eq!(merged.min, Vec3::new(-1.0, -1.0, 0.0));
        assert_eq!(merged.max, Vec3::splat(3.0));
        assert!(Aabb::new(Vec3::ONE, Vec3::ZERO).is_empty());
    }

    #[test]
    fn test_ray_down_hits_box_top() {
        let aabb = Aabb::new(Vec3::new(-1.0, -1.0, 0.0), Vec3::new(1.0, 1.0, 0.5));
        let ray = Ray::down(Vec3::new(0.0, 0.0, 10.0));
        let (enter, _) = ray.intersect_aabb(&aabb).unwrap();
        assert!((ray.at(enter).z - 0.5).abs() < 1e-5);

        let miss = Ray::down(Vec3::new(3.0, 0.0, 10.0));
        assert!(miss.intersect_aabb(&aabb).is_none());
    }

    #[test]
    fn test_ray_triangle() {
        let ray = Ray::down(Vec3::new(0.25, 0.25, 5.0));
        let t = ray
            .intersect_triangle(Vec3::ZERO, Vec3::X, Vec3::Y)
            .unwrap();
        assert!((t - 5.0).abs() < 1e-5);

        let outside = Ray::down(Vec3::new(2.0, 2.0, 5.0));
        assert!(outside.intersect_triangle(Vec3::ZERO, Vec3::X, Vec3::Y).is_none());
    }

    #[test]
    fn test_lerp_helpers() {
        assert_eq!(lerp(0.0, 10.0, 0.5), 5.0);
        assert!((horizontal_distance(Vec3::new(0.0, 0.0, 4.0), Vec3::new(3.0, 4.0, 0.0)) - 5.0).abs() < 1e-6);
    }
}
