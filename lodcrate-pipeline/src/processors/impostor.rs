use super::{merged_world_geometry, MappedMeshes, Processor};
use crate::settings::{ImpostorPipelineSettings, ImpostorType};
use lodcrate_casting::{billboard_cloud, flipbook, single_view, Impostor, MappingImageSettings};
use lodcrate_core::{Error, MappingImage, NodeId, ProcessContext, ProcessingLog, Result, Scene};
use lodcrate_simplification::detach_mesh;

/// Name of the mesh node holding impostor geometry
pub const IMPOSTOR_NODE_NAME: &str = "Impostor";

/// Replaces the selected meshes with an impostor (billboard cloud, flipbook
/// or single view quad) and maps it against them
#[derive(Debug, Clone, Default)]
pub struct ImpostorProcessor {
    pub settings: ImpostorPipelineSettings,
    mapping_images: Vec<MappingImage>,
    node: Option<NodeId>,
}

impl ImpostorProcessor {
    pub fn new(settings: ImpostorPipelineSettings) -> Self {
        Self {
            settings,
            ..Self::default()
        }
    }

    /// Mesh node created by the last run
    pub fn impostor_node(&self) -> Option<NodeId> {
        self.node
    }

    fn build(&self, source: &lodcrate_core::GeometryData, ctx: &ProcessContext) -> Result<Impostor> {
        let mapping = &self.settings.mapping_image;
        match &self.settings.impostor {
            ImpostorType::BillboardCloud(settings) => billboard_cloud(source, settings, mapping, ctx),
            ImpostorType::Flipbook(settings) => flipbook(source, settings, mapping),
            ImpostorType::FromSingleView(settings) => single_view(source, settings, mapping),
        }
    }
}

impl Processor for ImpostorProcessor {
    fn run(&mut self, scene: &mut Scene, ctx: &ProcessContext) -> Result<ProcessingLog> {
        self.mapping_images.clear();
        self.node = None;
        let mut log = ProcessingLog::new();
        if let Err(e) = self.settings.mapping_image.validate() {
            log.error(e.to_string());
            return Ok(log);
        }

        let meshes = match scene.selected_mesh_nodes(self.settings.process_selection_set_name.as_deref()) {
            Ok(meshes) => meshes,
            Err(Error::InvalidSettings(message)) => {
                log.error(message);
                return Ok(log);
            }
            Err(e) => return Err(e),
        };
        if meshes.is_empty() {
            log.warning("impostor generation found no meshes to process");
            return Ok(log);
        }
        let source = merged_world_geometry(scene, &meshes);

        let impostor = match self.build(&source, &ctx.sub_range(0.0, 50.0)) {
            Ok(impostor) => impostor,
            Err(Error::InvalidSettings(message)) => {
                log.error(message);
                return Ok(log);
            }
            Err(e) => return Err(e),
        };
        ctx.step(50.0)?;

        if self.settings.mapping_image.generate_mapping_image {
            let image = impostor.build_mapping_image(&source, &self.settings.mapping_image, &ctx.sub_range(50.0, 100.0))?;
            tracing::info!(
                "impostor mapping image covers {} of {} texels",
                image.occupied_texels(),
                image.width() as usize * image.height() as usize
            );
            self.mapping_images.push(image);
        }

        for mesh in &meshes {
            detach_mesh(scene, mesh.id)?;
        }
        let mut geometry = impostor.geometry;
        geometry.add_material_ids().iter_mut().for_each(|id| *id = 0);
        tracing::info!(
            "replaced {} meshes ({} triangles) with a {} triangle impostor",
            meshes.len(),
            source.triangle_count(),
            geometry.triangle_count()
        );
        self.node = Some(scene.add_mesh(IMPOSTOR_NODE_NAME, geometry));
        ctx.report(100.0);
        Ok(log)
    }

    fn mapping_images(&self) -> &[MappingImage] {
        &self.mapping_images
    }

    /// Impostors are mapped over their own layout, which differs from the
    /// final geometry for flipbooks; cast geometry data is not written back
    fn mapped_meshes(&self) -> Option<&MappedMeshes> {
        None
    }

    fn output_nodes(&self) -> Vec<NodeId> {
        self.node.into_iter().collect()
    }

    fn mapping_image_settings(&self) -> &MappingImageSettings {
        &self.settings.mapping_image
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::cube;
    use super::*;
    use lodcrate_casting::FlipbookSettings;
    use lodcrate_core::Point3f;

    fn scene() -> Scene {
        let mut scene = Scene::new();
        scene.add_mesh("box", cube(Point3f::new(0.0, 0.0, 0.0), Point3f::new(1.0, 2.0, 1.0)));
        scene
    }

    #[test]
    fn test_billboard_cloud_replaces_source() {
        let mut scene = scene();
        let mut settings = ImpostorPipelineSettings::default();
        settings.mapping_image = MappingImageSettings::with_texture_size(128, 128);
        let mut processor = ImpostorProcessor::new(settings);
        let log = processor.run(&mut scene, &ProcessContext::new()).unwrap();
        assert!(!log.has_errors(), "{:?}", log.errors());
        let node = processor.impostor_node().unwrap();
        assert_eq!(scene.mesh_nodes().len(), 1);
        assert_eq!(scene.node(node).unwrap().name, IMPOSTOR_NODE_NAME);
        assert!(processor.mapping_image(0).unwrap().occupied_texels() > 0);
        assert_eq!(processor.output_nodes(), vec![node]);
    }

    #[test]
    fn test_flipbook_keeps_one_quad() {
        let mut scene = scene();
        let mut settings = ImpostorPipelineSettings::flipbook(FlipbookSettings::default());
        settings.mapping_image = MappingImageSettings::with_texture_size(96, 96);
        let mut processor = ImpostorProcessor::new(settings);
        processor.run(&mut scene, &ProcessContext::new()).unwrap();
        assert_eq!(scene.triangle_count(), 2);
        let image = processor.mapping_image(0).unwrap();
        assert_eq!(image.destination.triangle_count(), 18);
    }

    #[test]
    fn test_invalid_impostor_settings_are_logged() {
        let mut scene = scene();
        let settings = ImpostorPipelineSettings::flipbook(FlipbookSettings {
            number_of_views: 0,
            ..FlipbookSettings::default()
        });
        let mut processor = ImpostorProcessor::new(settings);
        let log = processor.run(&mut scene, &ProcessContext::new()).unwrap();
        assert!(log.has_errors());
        assert_eq!(scene.triangle_count(), 12);
    }

    #[test]
    fn test_unknown_selection_set_is_logged() {
        let mut scene = scene();
        let mut processor = ImpostorProcessor::new(ImpostorPipelineSettings {
            process_selection_set_name: Some("missing".to_string()),
            ..ImpostorPipelineSettings::default()
        });
        let log = processor.run(&mut scene, &ProcessContext::new()).unwrap();
        assert!(log.has_errors());
    }
}
