//! Core data structures for lodcrate
//!
//! This crate provides the types every lodcrate engine works on: the scene
//! graph, the geometry store, materials with their shading networks,
//! selection sets, mapping images, the processing log, progress and
//! cancellation, triangle ray casting and closest triangle queries.

pub mod error;
pub mod geometry;
pub mod log;
pub mod mapping;
pub mod material;
pub mod nearest;
pub mod point;
pub mod progress;
pub mod raycast;
pub mod scene;
pub mod selection;
pub mod shading;
pub mod traits;
pub mod transform;

pub use error::*;
pub use geometry::*;
pub use log::*;
pub use mapping::*;
pub use material::*;
pub use nearest::*;
pub use point::*;
pub use progress::*;
pub use raycast::*;
pub use scene::*;
pub use selection::*;
pub use shading::*;
pub use traits::*;
pub use transform::*;

/// Re-export commonly used types from nalgebra
pub use nalgebra::{Matrix3, Matrix4, Point3, UnitQuaternion, Vector3};
