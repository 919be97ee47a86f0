//! LOD pipelines for lodcrate
//!
//! A pipeline runs one processor (reduction, remeshing, aggregation or an
//! impostor) over a scene, then casts the source materials onto the
//! processed geometry and swaps the scene's materials for the cast ones.
//!
//! ```no_run
//! use lodcrate_casting::{ColorCaster, MappingImageSettings};
//! use lodcrate_core::channels;
//! use lodcrate_pipeline::{Pipeline, ReductionPipeline, RunMode};
//! use std::path::Path;
//!
//! let mut pipeline = ReductionPipeline::default();
//! pipeline.settings.mapping_image = MappingImageSettings::with_texture_size(512, 512);
//! pipeline.add_material_caster(ColorCaster::new(channels::DIFFUSE), 0);
//! let output = pipeline
//!     .run_scene_from_file(Path::new("in.obj"), Path::new("out/lod1.obj"), RunMode::RunInThisProcess)
//!     .unwrap();
//! assert!(!output.has_errors());
//! ```
//!
//! Runs can happen in a `lodcrate batch` worker process with
//! [`RunMode::RunInNewProcess`]; the rayon pool used in this process is
//! sized by `LODCRATE_THREADS`.

pub mod casting;
pub mod error;
pub mod pipelines;
pub mod processors;
pub mod run;
pub mod settings;
pub mod threads;

pub use casting::{cast_materials, compact_materials, replace_materials, OutputTexture, PipelineOutput};
pub use error::PipelineError;
pub use pipelines::*;
pub use processors::{
    AggregationProcessor, ImpostorProcessor, MappedMeshes, Processor, ReductionProcessor, RemeshingProcessor,
};
pub use run::{find_worker, run_batch, run_pipeline, RunMode, PROGRESS_PREFIX, WORKER_ENV};
pub use settings::*;
pub use threads::{init_thread_pool, ThreadPoolConfig, THREADS_ENV};
