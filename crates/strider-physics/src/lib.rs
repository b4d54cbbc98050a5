//! # Strider Physics
//!
//! The slice of physics the locomotion core talks to.
//!
//! ## Features
//! - Terrain height queries backed by downward ray tests
//! - Static collision geometry (boxes and triangles)
//! - Rigid-body velocity state for root motion

use glam::{Vec2, Vec3};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use strider_core::math::{Aabb, Ray};
use thiserror::Error;

/// Physics errors
#[derive(Error, Debug)]
pub enum PhysicsError {
    #[error("Degenerate triangle collider: {0:?}")]
    DegenerateTriangle([Vec3; 3]),

    #[error("Inverted box collider: min {min} max {max}")]
    InvertedBox { min: Vec3, max: Vec3 },
}

/// Result type for physics operations
pub type PhysicsResult<T> = Result<T, PhysicsError>;

/// Height of the ground under a horizontal position.
///
/// `None` means there is no valid support under the query point.
pub trait TerrainQuery {
    fn terrain_height(&self, xy: Vec2) -> Option<f32>;
}

impl<F> TerrainQuery for F
where
    F: Fn(Vec2) -> Option<f32>,
{
    fn terrain_height(&self, xy: Vec2) -> Option<f32> {
        self(xy)
    }
}

/// Infinite horizontal ground plane
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FlatTerrain {
    pub height: f32,
}

impl FlatTerrain {
    pub fn new(height: f32) -> Self {
        Self { height }
    }
}

impl TerrainQuery for FlatTerrain {
    fn terrain_height(&self, _xy: Vec2) -> Option<f32> {
        Some(self.height)
    }
}

/// Static collider shapes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StaticCollider {
    Box(Aabb),
    Triangle([Vec3; 3]),
}

impl StaticCollider {
    fn bounds(&self) -> Aabb {
        match self {
            StaticCollider::Box(aabb) => *aabb,
            StaticCollider::Triangle(points) => {
                let mut aabb = Aabb::EMPTY;
                for point in points {
                    aabb.expand_to_include(*point);
                }
                aabb
            }
        }
    }

    fn raycast(&self, ray: &Ray) -> Option<f32> {
        match self {
            StaticCollider::Box(aabb) => ray.intersect_aabb(aabb).map(|(enter, _)| enter),
            StaticCollider::Triangle([a, b, c]) => ray.intersect_triangle(*a, *b, *c),
        }
    }
}

/// Raycast hit result
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RaycastHit {
    pub point: Vec3,
    pub distance: f32,
    pub collider_index: usize,
}

/// Collection of static collision geometry
#[derive(Debug, Clone, Default)]
pub struct StaticGeometry {
    colliders: Vec<StaticCollider>,
    bounds: Aabb,
}

impl StaticGeometry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an axis-aligned box
    pub fn add_box(&mut self, aabb: Aabb) -> PhysicsResult<usize> {
        if aabb.is_empty() {
            return Err(PhysicsError::InvertedBox {
                min: aabb.min,
                max: aabb.max,
            });
        }
        Ok(self.push(StaticCollider::Box(aabb)))
    }

    /// Add a triangle
    pub fn add_triangle(&mut self, a: Vec3, b: Vec3, c: Vec3) -> PhysicsResult<usize> {
        if (b - a).cross(c - a).length_squared() < 1e-12 {
            return Err(PhysicsError::DegenerateTriangle([a, b, c]));
        }
        Ok(self.push(StaticCollider::Triangle([a, b, c])))
    }

    /// Add a quad as two triangles
    pub fn add_quad(&mut self, corners: [Vec3; 4]) -> PhysicsResult<SmallVec<[usize; 2]>> {
        let [a, b, c, d] = corners;
        let mut indices = SmallVec::new();
        indices.push(self.add_triangle(a, b, c)?);
        indices.push(self.add_triangle(a, c, d)?);
        Ok(indices)
    }

    fn push(&mut self, collider: StaticCollider) -> usize {
        self.bounds = self.bounds.merge(&collider.bounds());
        self.colliders.push(collider);
        self.colliders.len() - 1
    }

    pub fn colliders(&self) -> &[StaticCollider] {
        &self.colliders
    }

    pub fn bounds(&self) -> Aabb {
        self.bounds
    }

    /// Closest hit along a ray within `max_distance`
    pub fn raycast(&self, ray: &Ray, max_distance: f32) -> Option<RaycastHit> {
        self.colliders
            .iter()
            .enumerate()
            .filter_map(|(index, collider)| collider.raycast(ray).map(|t| (index, t)))
            .filter(|&(_, t)| t <= max_distance)
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(collider_index, distance)| RaycastHit {
                point: ray.at(distance),
                distance,
                collider_index,
            })
    }
}

impl TerrainQuery for StaticGeometry {
    fn terrain_height(&self, xy: Vec2) -> Option<f32> {
        if self.colliders.is_empty() {
            return None;
        }
        let top = self.bounds.max.z + 1.0;
        let ray = Ray::down(Vec3::new(xy.x, xy.y, top));
        self.raycast(&ray, top - self.bounds.min.z + 1.0)
            .map(|hit| hit.point.z)
    }
}

/// Rigid-body velocity state
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RigidBody {
    pub mass: f32,
    pub linear_velocity: Vec3,
    pub angular_velocity: Vec3,
}

impl RigidBody {
    pub fn linear_velocity(&self) -> Vec3 {
        self.linear_velocity
    }

    pub fn set_linear_velocity(&mut self, velocity: Vec3) {
        self.linear_velocity = velocity;
    }
}

impl Default for RigidBody {
    fn default() -> Self {
        Self {
            mass: 1.0,
            linear_velocity: Vec3::ZERO,
            angular_velocity: Vec3::ZERO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flat_terrain() {
        let terrain = FlatTerrain::new(0.5);
        assert_eq!(terrain.terrain_height(Vec2::new(10.0, -3.0)), Some(0.5));
    }

    #[test]
    fn test_closure_terrain() {
        let ramp = |xy: Vec2| (xy.y >= 0.0).then_some(xy.y * 0.5);
        assert_eq!(ramp.terrain_height(Vec2::new(0.0, 2.0)), Some(1.0));
        assert_eq!(ramp.terrain_height(Vec2::new(0.0, -1.0)), None);
    }

    #[test]
    fn test_static_geometry_picks_highest_surface() {
        let mut geometry = StaticGeometry::new();
        geometry
            .add_quad([
                Vec3::new(-5.0, -5.0, 0.0),
                Vec3::new(5.0, -5.0, 0.0),
                Vec3::new(5.0, 5.0, 0.0),
                Vec3::new(-5.0, 5.0, 0.0),
            ])
            .unwrap();
        geometry
            .add_box(Aabb::new(Vec3::new(-1.0, 1.0, -0.5), Vec3::new(1.0, 2.0, 0.2)))
            .unwrap();

        let ground = geometry.terrain_height(Vec2::new(0.0, -2.0)).unwrap();
        assert!(ground.abs() < 1e-5);
        let step = geometry.terrain_height(Vec2::new(0.0, 1.5)).unwrap();
        assert!((step - 0.2).abs() < 1e-5);
        assert_eq!(geometry.terrain_height(Vec2::new(20.0, 0.0)), None);
    }

    #[test]
    fn test_degenerate_colliders_rejected() {
        let mut geometry = StaticGeometry::new();
        assert!(geometry.add_triangle(Vec3::ZERO, Vec3::X, Vec3::X * 2.0).is_err());
        assert!(geometry.add_box(Aabb::new(Vec3::ONE, Vec3::ZERO)).is_err());
    }

    #[test]
    fn test_rigid_body_velocity() {
        let mut body = RigidBody::default();
        body.set_linear_velocity(Vec3::Y);
        assert_eq!(body.linear_velocity(), Vec3::Y);
    }
}
