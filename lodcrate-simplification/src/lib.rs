//! Mesh reduction and the stages around it
//!
//! This crate provides the edge collapse reducer and the scene level
//! simplification built on it:
//! - Quadric error edge collapse with attribute, symmetry and visibility awareness
//! - Vertex welding and T-junction removal
//! - Normal and tangent recalculation
//! - Bone reduction and per-vertex bone limits
//! - Camera based visibility and occlusion culling
//! - Modular seam analysis and consistent seam reduction
//! - Geometry aggregation

pub mod aggregation;
pub mod bones;
pub mod edge_collapse;
pub mod half_edge;
pub mod normals;
pub mod quadric_error;
pub mod reduction;
pub mod repair;
pub mod seams;
pub mod settings;
pub mod spatial;
pub mod symmetry;
pub mod visibility;

pub use aggregation::*;
pub use bones::*;
pub use edge_collapse::*;
pub use normals::*;
pub use quadric_error::*;
pub use reduction::*;
pub use repair::*;
pub use seams::*;
pub use settings::*;
pub use visibility::*;

use lodcrate_core::{GeometryData, ProcessContext, Result};

/// Reduce a single geometry without scene context
pub trait MeshSimplifier {
    fn simplify(&self, geometry: &GeometryData, ctx: &ProcessContext) -> Result<GeometryData>;
}

impl MeshSimplifier for EdgeCollapseReducer {
    fn simplify(&self, geometry: &GeometryData, ctx: &ProcessContext) -> Result<GeometryData> {
        Ok(self.reduce(geometry, &ReductionConstraints::default(), ctx)?.geometry)
    }
}
