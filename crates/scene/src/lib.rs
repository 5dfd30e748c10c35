//! Scene-side math consumed by the renderer.
//!
//! This crate provides:
//! - Camera with view, projection and frustum extraction
//! - Object transforms
//! - Bounding boxes, planes and frustum tests

pub mod bounds;
pub mod camera;
pub mod transform;

pub use bounds::{Aabb, Frustum, Plane};
pub use camera::{Camera, Projection};
pub use transform::Transform;
