//! Voxel remeshing for lodcrate
//!
//! Builds a new surface for a set of meshes independent of their original
//! triangulation: the input is turned into a signed distance grid (with
//! optional hole filling), polygonized with marching cubes and decimated to
//! the on-screen size target.

pub mod distance_field;
pub mod grid;
pub mod marching_cubes;
pub mod remesher;
pub mod settings;

pub use distance_field::*;
pub use grid::*;
pub use marching_cubes::*;
pub use remesher::*;
pub use settings::*;
