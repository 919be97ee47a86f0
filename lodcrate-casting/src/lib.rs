//! Material casting for lodcrate
//!
//! This crate turns processed geometry back into textured geometry:
//! - Chart based texture coordinate generation and atlas packing
//! - Mapping images linking output texels to the source surface
//! - Material casters for color, normal, opacity, displacement, ambient
//!   occlusion, vertex color, raw geometry data and native callbacks
//! - Attribute tessellation with displacement values
//! - Impostor geometry (flipbook, billboard cloud, single view)

pub mod casters;
pub mod charts;
pub mod fill;
pub mod impostor;
pub mod mapping;
pub mod settings;
pub mod tessellation;

pub use casters::*;
pub use charts::{generate_tex_coords, pack_rectangles, Packing};
pub use fill::fill_image;
pub use impostor::*;
pub use mapping::*;
pub use settings::*;
pub use tessellation::*;
