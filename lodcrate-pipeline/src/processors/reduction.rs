use super::{merged_world_geometry, MappedMeshes, Processor};
use crate::settings::ReductionPipelineSettings;
use lodcrate_casting::MappingImageSettings;
use lodcrate_core::{Error, MappingImage, NodeId, ProcessContext, ProcessingLog, Result, Scene};
use lodcrate_simplification::{processed_meshes, reduce_scene};

/// Edge collapse reduction of the selected meshes, followed by an optional
/// mapping step against the unreduced surface
#[derive(Debug, Clone, Default)]
pub struct ReductionProcessor {
    pub settings: ReductionPipelineSettings,
    mapping_images: Vec<MappingImage>,
    mapped: Option<MappedMeshes>,
}

impl ReductionProcessor {
    pub fn new(settings: ReductionPipelineSettings) -> Self {
        Self {
            settings,
            ..Self::default()
        }
    }
}

impl Processor for ReductionProcessor {
    fn run(&mut self, scene: &mut Scene, ctx: &ProcessContext) -> Result<ProcessingLog> {
        self.mapping_images.clear();
        self.mapped = None;
        let simplification = &self.settings.simplification;
        let mapping = &self.settings.mapping_image;

        let mut log = ProcessingLog::new();
        if mapping.generate_mapping_image {
            for check in [mapping.validate(), self.settings.attribute_tessellation.validate()] {
                if let Err(e) = check {
                    log.error(e.to_string());
                }
            }
            if log.has_errors() {
                return Ok(log);
            }
        }

        // The source surface has to be captured before the meshes change
        let (source, nodes) = if mapping.generate_mapping_image {
            let meshes = match processed_meshes(
                scene,
                simplification.reduction.process_selection_set_name.as_deref(),
                &simplification.visibility,
            ) {
                Ok(meshes) => meshes,
                Err(Error::InvalidSettings(message)) => {
                    log.error(message);
                    return Ok(log);
                }
                Err(e) => return Err(e),
            };
            let nodes: Vec<NodeId> = meshes.iter().map(|m| m.id).collect();
            (Some(merged_world_geometry(scene, &meshes)), nodes)
        } else {
            (None, Vec::new())
        };

        let reduce_to = if source.is_some() { 70.0 } else { 100.0 };
        log.merge(reduce_scene(scene, simplification, &ctx.sub_range(0.0, reduce_to))?);
        if log.has_errors() {
            return Ok(log);
        }

        if let Some(source) = source {
            let (mapped, images) = MappedMeshes::map(
                scene,
                &nodes,
                &source,
                mapping,
                &self.settings.attribute_tessellation,
                &mut log,
                &ctx.sub_range(reduce_to, 100.0),
            )?;
            tracing::info!("built {} mapping images for {} meshes", images.len(), nodes.len());
            self.mapping_images = images;
            self.mapped = Some(mapped);
        }
        ctx.report(100.0);
        Ok(log)
    }

    fn mapping_images(&self) -> &[MappingImage] {
        &self.mapping_images
    }

    fn mapped_meshes(&self) -> Option<&MappedMeshes> {
        self.mapped.as_ref()
    }

    fn output_nodes(&self) -> Vec<NodeId> {
        self.mapped.as_ref().map(|m| m.nodes().collect()).unwrap_or_default()
    }

    fn mapping_image_settings(&self) -> &MappingImageSettings {
        &self.settings.mapping_image
    }
}
