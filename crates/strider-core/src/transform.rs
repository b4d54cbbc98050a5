//! Root transform component
//!
//! The locomotion controller owns the character root placement: it writes the
//! hip-driven translation and heading rotation here once per frame.

use glam::{Mat4, Quat, Vec3};
use serde::{Deserialize, Serialize};

/// Transform component for a character root
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    /// World position
    pub position: Vec3,
    /// World rotation
    pub rotation: Quat,
    /// Uniform or per-axis scale
    pub scale: Vec3,
}

impl Transform {
    /// Identity transform
    pub const IDENTITY: Self = Self {
        position: Vec3::ZERO,
        rotation: Quat::IDENTITY,
        scale: Vec3::ONE,
    };

    /// Create a new transform with the given position
    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
        }
    }

    /// Create a new transform from all components
    pub fn new(position: Vec3, rotation: Quat, scale: Vec3) -> Self {
        Self {
            position,
            rotation,
            scale,
        }
    }

    /// Model matrix (translation * rotation * scale)
    pub fn model_matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.position)
    }

    /// Set the world translation
    pub fn set_translation(&mut self, position: Vec3) {
        self.position = position;
    }

    /// Set the world rotation
    pub fn set_rotation(&mut self, rotation: Quat) {
        self.rotation = rotation;
    }

    /// Forward direction (+Y in local space)
    pub fn forward(&self) -> Vec3 {
        self.rotation * Vec3::Y
    }

    /// Transform a model-space point into world space
    pub fn transform_point(&self, point: Vec3) -> Vec3 {
        self.position + self.rotation * (point * self.scale)
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_matrix_matches_transform_point() {
        let transform = Transform::new(
            Vec3::new(1.0, 2.0, 3.0),
            Quat::from_rotation_z(std::f32::consts::FRAC_PI_2),
            Vec3::splat(2.0),
        );
        let p = Vec3::new(0.5, -1.0, 0.25);
        let a = transform.model_matrix().transform_point3(p);
        let b = transform.transform_point(p);
        assert!((a - b).length() < 1e-5);
    }

    #[test]
    fn test_forward_follows_heading() {
        let mut transform = Transform::default();
        assert!((transform.forward() - Vec3::Y).length() < 1e-6);
        transform.set_rotation(Quat::from_rotation_z(std::f32::consts::FRAC_PI_2));
        assert!((transform.forward() - Vec3::new(-1.0, 0.0, 0.0)).length() < 1e-5);
    }
}
