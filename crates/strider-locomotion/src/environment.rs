//! Terrain access for trajectory generation

use glam::{Vec2, Vec3};
use strider_physics::TerrainQuery;

/// Borrowed view of the world the character walks on
#[derive(Clone, Copy)]
pub struct EnvironmentData<'a> {
    terrain: &'a dyn TerrainQuery,
}

impl<'a> EnvironmentData<'a> {
    pub fn new(terrain: &'a dyn TerrainQuery) -> Self {
        Self { terrain }
    }

    /// Ground height under `xy`, `None` where there is no valid support
    pub fn terrain_height(&self, xy: Vec2) -> Option<f32> {
        let height = self.terrain.terrain_height(xy);
        if height.is_none() {
            log::trace!("No terrain under ({:.3}, {:.3})", xy.x, xy.y);
        }
        height
    }

    pub fn terrain_height_or(&self, xy: Vec2, fallback: f32) -> f32 {
        self.terrain_height(xy).unwrap_or(fallback)
    }

    /// `point` moved vertically to `clearance` above the ground, or left
    /// untouched where there is no ground
    pub fn project(&self, point: Vec3, clearance: f32) -> Vec3 {
        match self.terrain_height(point.truncate()) {
            Some(height) => point.with_z(height + clearance),
            None => point,
        }
    }
}

impl std::fmt::Debug for EnvironmentData<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvironmentData").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strider_physics::FlatTerrain;

    #[test]
    fn test_project_onto_terrain() {
        let ground = FlatTerrain::new(0.5);
        let env = EnvironmentData::new(&ground);
        let p = env.project(Vec3::new(1.0, 2.0, 7.0), 0.1);
        assert!((p - Vec3::new(1.0, 2.0, 0.6)).length() < 1e-6);
    }

    #[test]
    fn test_missing_terrain_keeps_point() {
        let hole = |xy: Vec2| (xy.x < 0.0).then_some(0.0);
        let env = EnvironmentData::new(&hole);
        assert_eq!(env.project(Vec3::new(1.0, 0.0, 3.0), 0.1), Vec3::new(1.0, 0.0, 3.0));
        assert_eq!(env.terrain_height_or(Vec2::new(1.0, 0.0), -1.0), -1.0);
        assert_eq!(env.terrain_height(Vec2::new(-1.0, 0.0)), Some(0.0));
    }
}
