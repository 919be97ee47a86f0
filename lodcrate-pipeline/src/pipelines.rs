//! Pipelines: a processor plus material casters, ready to run on a scene or
//! a scene file

use crate::casting::PipelineOutput;
use crate::run::{run_pipeline, RunMode};
use crate::settings::{
    AggregationPipelineSettings, CasterEntry, ImpostorPipelineSettings, PipelineSettings, ReductionPipelineSettings,
    RemeshingPipelineSettings,
};
use lodcrate_casting::{BillboardCloudSettings, Caster, FlipbookSettings};
use lodcrate_core::{ProcessContext, ProgressObserver, Result, Scene};
use lodcrate_io::{load_scene, save_scene};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Progress, cancellation and output location shared by every pipeline
#[derive(Debug, Clone, Default)]
pub struct PipelineOptions {
    pub context: ProcessContext,
    /// Directory cast textures are written to
    pub output_dir: Option<PathBuf>,
}

pub trait Pipeline {
    /// The settings this pipeline runs, as one serializable value
    fn pipeline_settings(&self) -> PipelineSettings;

    fn casters_mut(&mut self) -> &mut Vec<CasterEntry>;

    fn options(&self) -> &PipelineOptions;

    fn options_mut(&mut self) -> &mut PipelineOptions;

    /// Cast `caster` into output material `output_index`
    fn add_material_caster(&mut self, caster: impl Into<Caster>, output_index: usize)
    where
        Self: Sized,
    {
        self.casters_mut().push(CasterEntry {
            caster: caster.into(),
            output_index,
        });
    }

    fn with_observer(mut self, observer: Arc<dyn ProgressObserver>) -> Self
    where
        Self: Sized,
    {
        let context = std::mem::take(&mut self.options_mut().context);
        self.options_mut().context = context.with_observer(observer);
        self
    }

    fn with_context(mut self, context: ProcessContext) -> Self
    where
        Self: Sized,
    {
        self.options_mut().context = context;
        self
    }

    fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self
    where
        Self: Sized,
    {
        self.options_mut().output_dir = Some(dir.into());
        self
    }

    /// Process `scene` in place
    fn run_scene(&self, scene: &mut Scene, mode: RunMode) -> Result<PipelineOutput> {
        let options = self.options();
        run_pipeline(
            &self.pipeline_settings(),
            scene,
            options.output_dir.as_deref(),
            &options.context,
            mode,
        )
    }

    /// Load `input`, process it and save the result to `output`. Cast
    /// textures go next to `output` unless an output directory is set.
    fn run_scene_from_file(&self, input: &Path, output: &Path, mode: RunMode) -> Result<PipelineOutput> {
        let mut scene = load_scene(input)?;
        let options = self.options();
        let output_dir = match &options.output_dir {
            Some(dir) => dir.clone(),
            None => output.parent().map(Path::to_path_buf).unwrap_or_default(),
        };
        let result = run_pipeline(
            &self.pipeline_settings(),
            &mut scene,
            Some(&output_dir),
            &options.context,
            mode,
        )?;
        save_scene(&scene, output)?;
        tracing::info!("saved {} to {}", input.display(), output.display());
        Ok(result)
    }
}

macro_rules! pipeline {
    ($(#[$meta:meta])* $name:ident, $settings:ty, $variant:ident, $default:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone)]
        pub struct $name {
            pub settings: $settings,
            options: PipelineOptions,
        }

        impl $name {
            pub fn new(settings: $settings) -> Self {
                Self {
                    settings,
                    options: PipelineOptions::default(),
                }
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new($default)
            }
        }

        impl Pipeline for $name {
            fn pipeline_settings(&self) -> PipelineSettings {
                PipelineSettings::$variant(self.settings.clone())
            }

            fn casters_mut(&mut self) -> &mut Vec<CasterEntry> {
                &mut self.settings.casters
            }

            fn options(&self) -> &PipelineOptions {
                &self.options
            }

            fn options_mut(&mut self) -> &mut PipelineOptions {
                &mut self.options
            }
        }
    };
}

pipeline!(
    /// Edge collapse reduction
    ReductionPipeline,
    ReductionPipelineSettings,
    Reduction,
    ReductionPipelineSettings::default()
);
pipeline!(
    /// Voxel remeshing into one new mesh
    RemeshingPipeline,
    RemeshingPipelineSettings,
    Remeshing,
    RemeshingPipelineSettings::default()
);
pipeline!(
    /// Merging geometries into one
    AggregationPipeline,
    AggregationPipelineSettings,
    Aggregation,
    AggregationPipelineSettings::default()
);
pipeline!(
    /// Outer shell billboard cloud impostor
    BillboardCloudPipeline,
    ImpostorPipelineSettings,
    BillboardCloud,
    ImpostorPipelineSettings::default()
);
pipeline!(
    /// Foliage billboard cloud; trunks are kept as reduced geometry
    BillboardCloudVegetationPipeline,
    ImpostorPipelineSettings,
    BillboardCloudVegetation,
    ImpostorPipelineSettings::vegetation()
);
pipeline!(
    /// Single quad with a texture atlas of views around the up axis
    FlipbookPipeline,
    ImpostorPipelineSettings,
    Flipbook,
    ImpostorPipelineSettings::flipbook(FlipbookSettings::default())
);

impl BillboardCloudPipeline {
    pub fn with_billboard_cloud(settings: BillboardCloudSettings) -> Self {
        Self::new(ImpostorPipelineSettings::billboard_cloud(settings))
    }
}

impl FlipbookPipeline {
    pub fn with_flipbook(settings: FlipbookSettings) -> Self {
        Self::new(ImpostorPipelineSettings::flipbook(settings))
    }
}

/// Pipeline for any settings value, e.g. one read from a settings file
#[derive(Debug, Clone)]
pub struct SettingsPipeline {
    pub settings: PipelineSettings,
    options: PipelineOptions,
}

impl SettingsPipeline {
    pub fn new(settings: PipelineSettings) -> Self {
        Self {
            settings,
            options: PipelineOptions::default(),
        }
    }
}

impl Pipeline for SettingsPipeline {
    fn pipeline_settings(&self) -> PipelineSettings {
        self.settings.clone()
    }

    fn casters_mut(&mut self) -> &mut Vec<CasterEntry> {
        self.settings.casters_mut()
    }

    fn options(&self) -> &PipelineOptions {
        &self.options
    }

    fn options_mut(&mut self) -> &mut PipelineOptions {
        &mut self.options
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lodcrate_casting::ColorCaster;
    use lodcrate_core::channels;

    #[test]
    fn test_add_material_caster() {
        let mut pipeline = ReductionPipeline::default();
        pipeline.add_material_caster(ColorCaster::new(channels::DIFFUSE), 0);
        pipeline.add_material_caster(ColorCaster::new(channels::SPECULAR), 1);
        let settings = pipeline.pipeline_settings();
        assert_eq!(settings.casters().len(), 2);
        assert_eq!(settings.casters()[1].output_index, 1);
        assert_eq!(settings.name(), "Reduction");
    }

    #[test]
    fn test_settings_pipeline_keeps_kind() {
        let settings = FlipbookPipeline::with_flipbook(FlipbookSettings::default()).pipeline_settings();
        let pipeline = SettingsPipeline::new(settings.clone()).with_output_dir("textures");
        assert_eq!(pipeline.pipeline_settings(), settings);
        assert_eq!(pipeline.options().output_dir.as_deref(), Some(Path::new("textures")));
    }
}
