//! # Strider Core
//!
//! Foundational types shared by the Strider locomotion crates.
//!
//! - **Math**: glam re-exports, bounding boxes, rays and scalar helpers
//! - **Transform**: the character root transform written once per frame
//!
//! All crates use a Z-up convention with +Y as the character's forward axis.

pub mod math;
pub mod transform;

pub use math::{Aabb, Ray};
pub use transform::Transform;

/// World up axis
pub const UP: glam::Vec3 = glam::Vec3::Z;

/// Default character forward axis
pub const FORWARD: glam::Vec3 = glam::Vec3::Y;
