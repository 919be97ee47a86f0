use super::{MappedMeshes, Processor};
use crate::casting::{output_material_name, replace_materials};
use crate::settings::RemeshingPipelineSettings;
use lodcrate_casting::{assign_tessellation, sample_displacement, MappingImageSettings};
use lodcrate_core::{Material, MappingImage, NodeId, ProcessContext, ProcessingLog, Result, Scene};
use lodcrate_remeshing::Remesher;

/// Voxel remeshing of the selected meshes into one new mesh, optionally
/// mapped against the original surface
#[derive(Debug, Clone, Default)]
pub struct RemeshingProcessor {
    pub settings: RemeshingPipelineSettings,
    mapping_images: Vec<MappingImage>,
    mapped: Option<MappedMeshes>,
    node: Option<NodeId>,
}

impl RemeshingProcessor {
    pub fn new(settings: RemeshingPipelineSettings) -> Self {
        Self {
            settings,
            ..Self::default()
        }
    }

    /// Mesh node created by the last run
    pub fn remeshed_node(&self) -> Option<NodeId> {
        self.node
    }
}

impl Processor for RemeshingProcessor {
    fn run(&mut self, scene: &mut Scene, ctx: &ProcessContext) -> Result<ProcessingLog> {
        self.mapping_images.clear();
        self.mapped = None;
        self.node = None;
        let mapping = &self.settings.mapping_image;
        let tessellation = &self.settings.attribute_tessellation;

        let mut log = ProcessingLog::new();
        for check in [mapping.validate(), tessellation.validate()] {
            if let Err(e) = check {
                log.error(e.to_string());
            }
        }
        if self.settings.remeshing.populate_attribute_tessellation_displacement
            && !tessellation.enable_attribute_tessellation
        {
            log.error("populating tessellated displacement requires attribute tessellation to be enabled");
        }
        if log.has_errors() {
            return Ok(log);
        }

        let remesh_to = if mapping.generate_mapping_image { 75.0 } else { 90.0 };
        let outcome = Remesher::new(self.settings.remeshing.clone()).run(scene, &ctx.sub_range(0.0, remesh_to))?;
        log.merge(outcome.log);
        let Some(node) = outcome.node else {
            return Ok(log);
        };
        self.node = Some(node);
        if log.has_errors() {
            return Ok(log);
        }

        if mapping.generate_mapping_image {
            let (mapped, images) = MappedMeshes::map(
                scene,
                &[node],
                &outcome.source,
                mapping,
                tessellation,
                &mut log,
                &ctx.sub_range(remesh_to, 90.0),
            )?;
            // Until something is cast the remeshed node gets empty materials
            let materials = (0..images.len()).map(|i| Material::new(&output_material_name(i))).collect();
            let outputs = mapped.triangle_outputs(node).map(<[usize]>::to_vec).unwrap_or_default();
            replace_materials(scene, &[(node, outputs)], materials, Vec::new());
            self.mapping_images = images;
            self.mapped = Some(mapped);
        } else if tessellation.enable_attribute_tessellation {
            if let Some(geometry) = scene.geometry_mut(node) {
                assign_tessellation(geometry, tessellation)?;
            }
        }

        if self.settings.remeshing.populate_attribute_tessellation_displacement {
            if let Some(geometry) = scene.geometry_mut(node) {
                // The remeshed node sits at the root, so it shares the
                // world space of the source
                let values = sample_displacement(&outcome.source, geometry, &ctx.sub_range(90.0, 100.0))?;
                geometry.tessellated = Some(values);
            }
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
        match (&self.mapped, self.node) {
            (Some(_), Some(node)) => vec![node],
            _ => Vec::new(),
        }
    }

    fn mapping_image_settings(&self) -> &MappingImageSettings {
        &self.settings.mapping_image
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::cube;
    use super::*;
    use lodcrate_casting::AttributeTessellationSettings;
    use lodcrate_core::Point3f;
    use lodcrate_remeshing::RemeshingSettings;

    fn settings() -> RemeshingPipelineSettings {
        RemeshingPipelineSettings {
            remeshing: RemeshingSettings {
                max_grid_resolution: 24,
                ..RemeshingSettings::with_on_screen_size(60)
            },
            ..RemeshingPipelineSettings::default()
        }
    }

    #[test]
    fn test_remesh_replaces_meshes() {
        let mut scene = Scene::new();
        let old = scene.add_mesh("box", cube(Point3f::new(0.0, 0.0, 0.0), Point3f::new(1.0, 1.0, 1.0)));
        let mut processor = RemeshingProcessor::new(settings());
        let log = processor.run(&mut scene, &ProcessContext::new()).unwrap();
        assert!(!log.has_errors(), "{:?}", log.errors());
        let node = processor.remeshed_node().unwrap();
        assert_ne!(node, old);
        assert!(scene.node(old).is_none());
        assert!(scene.geometry(node).unwrap().triangle_count() > 0);
        assert!(processor.mapping_images().is_empty());
    }

    #[test]
    fn test_remesh_with_mapping_and_displacement() {
        let mut scene = Scene::new();
        scene.add_mesh("box", cube(Point3f::new(0.0, 0.0, 0.0), Point3f::new(1.0, 1.0, 1.0)));
        let mut settings = settings();
        settings.mapping_image = MappingImageSettings::with_texture_size(64, 64);
        settings.remeshing.populate_attribute_tessellation_displacement = true;
        settings.attribute_tessellation = AttributeTessellationSettings {
            enable_attribute_tessellation: true,
            max_tessellation_level: 2,
            ..AttributeTessellationSettings::default()
        };
        let mut processor = RemeshingProcessor::new(settings);
        let log = processor.run(&mut scene, &ProcessContext::new()).unwrap();
        assert!(!log.has_errors(), "{:?}", log.errors());

        let node = processor.remeshed_node().unwrap();
        let geometry = scene.geometry(node).unwrap();
        let tessellated = geometry.tessellated.as_ref().unwrap();
        assert_eq!(tessellated.levels.len(), geometry.triangle_count());
        // The remeshed surface stays within a couple of cells of the box
        assert!(tessellated.displacement.iter().all(|d| d.abs() < 0.3));
        assert_eq!(processor.mapping_image(0).unwrap().source.triangle_count(), 12);
        assert_eq!(processor.output_nodes(), vec![node]);
        assert_eq!(scene.materials.len(), 1);
        assert_eq!(scene.materials.get(0).unwrap().name, "LODMaterial0");
    }

    #[test]
    fn test_displacement_without_tessellation_is_logged() {
        let mut scene = Scene::new();
        scene.add_mesh("box", cube(Point3f::new(0.0, 0.0, 0.0), Point3f::new(1.0, 1.0, 1.0)));
        let mut settings = settings();
        settings.remeshing.populate_attribute_tessellation_displacement = true;
        let mut processor = RemeshingProcessor::new(settings);
        let log = processor.run(&mut scene, &ProcessContext::new()).unwrap();
        assert!(log.has_errors());
        assert_eq!(scene.triangle_count(), 12);
    }
}
