//! # lodcrate
//!
//! Level of detail generation for 3D scenes in Rust: mesh reduction,
//! remeshing, aggregation, impostors and material casting.
//!
//! This is the umbrella crate that provides convenient access to all lodcrate functionality.
//! You can use this crate to get everything in one place, or use individual crates for
//! more granular control over dependencies.
//!
//! ## Features
//!
//! - **Core**: Scene graph, geometry store, materials, shading networks, mapping images
//! - **I/O**: OBJ and glTF/GLB import and export, textures, scene snapshots
//! - **Simplification**: Edge collapse reduction, repair, normals, aggregation, visibility
//! - **Remeshing**: Watertight voxel remeshing
//! - **Casting**: Texture coordinates, mapping images, material casters, impostors
//! - **Pipeline**: Processors plus casters, run in this process or a worker process
//!
//! ## Quick Start
//!
//! ```no_run
//! use lodcrate::prelude::*;
//!
//! let mut scene = load_scene("building.glb").unwrap();
//!
//! let mut pipeline = ReductionPipeline::default();
//! pipeline.settings.mapping_image = MappingImageSettings::with_texture_size(1024, 1024);
//! pipeline.add_material_caster(ColorCaster::new(channels::DIFFUSE), 0);
//!
//! let output = pipeline.run_scene(&mut scene, RunMode::RunInThisProcess).unwrap();
//! assert!(!output.has_errors());
//! save_scene(&scene, "building_lod1.glb").unwrap();
//! ```
//!
//! ## Feature Flags
//!
//! - `default`: Enables io, simplification, casting and pipeline
//! - `io`: File format support
//! - `simplification`: Reduction, aggregation and repair
//! - `remeshing`: Voxel remeshing
//! - `casting`: Mapping images, casters and impostors
//! - `pipeline`: Pipelines and run modes (pulls in everything above)
//! - `all`: Enables all features

// Re-export core functionality
pub use lodcrate_core::*;

// Re-export sub-crates
#[cfg(feature = "io")]
pub use lodcrate_io as io;

#[cfg(feature = "simplification")]
pub use lodcrate_simplification as simplification;

#[cfg(feature = "remeshing")]
pub use lodcrate_remeshing as remeshing;

#[cfg(feature = "casting")]
pub use lodcrate_casting as casting;

#[cfg(feature = "pipeline")]
pub use lodcrate_pipeline as pipeline;

/// Convenient imports for common use cases
pub mod prelude {
    pub use lodcrate_core::*;

    #[cfg(feature = "io")]
    pub use lodcrate_io::{load_scene, save_scene};

    #[cfg(feature = "simplification")]
    pub use lodcrate_simplification::{
        AggregationSettings, ReductionSettings, ReductionTargets, SimplificationSettings, VisibilitySettings,
    };

    #[cfg(feature = "remeshing")]
    pub use lodcrate_remeshing::RemeshingSettings;

    #[cfg(feature = "casting")]
    pub use lodcrate_casting::{
        AmbientOcclusionCaster, BillboardCloudSettings, Caster, ColorCaster, DisplacementCaster, FlipbookSettings,
        MappingImageSettings, NormalCaster, OpacityCaster, VertexColorCaster,
    };

    #[cfg(feature = "pipeline")]
    pub use lodcrate_pipeline::{
        AggregationPipeline, BillboardCloudPipeline, BillboardCloudVegetationPipeline, FlipbookPipeline, Pipeline,
        PipelineOutput, PipelineSettings, ReductionPipeline, RemeshingPipeline, RunMode,
    };
}
