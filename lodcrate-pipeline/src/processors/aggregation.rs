use super::{merged_world_geometry, MappedMeshes, Processor};
use crate::settings::AggregationPipelineSettings;
use lodcrate_casting::{AttributeTessellationSettings, MappingImageSettings};
use lodcrate_core::{Error, MappingImage, NodeId, ProcessContext, ProcessingLog, Result, Scene};
use lodcrate_simplification::{aggregate_scene, processed_meshes, AGGREGATED_NODE_NAME};
use std::collections::HashSet;

/// Merges the selected meshes into one, optionally culling what no camera
/// sees, then maps the result for casting
#[derive(Debug, Clone, Default)]
pub struct AggregationProcessor {
    pub settings: AggregationPipelineSettings,
    mapping_images: Vec<MappingImage>,
    mapped: Option<MappedMeshes>,
}

impl AggregationProcessor {
    pub fn new(settings: AggregationPipelineSettings) -> Self {
        Self {
            settings,
            ..Self::default()
        }
    }
}

impl Processor for AggregationProcessor {
    fn run(&mut self, scene: &mut Scene, ctx: &ProcessContext) -> Result<ProcessingLog> {
        self.mapping_images.clear();
        self.mapped = None;
        let mapping = &self.settings.mapping_image;
        let aggregation = &self.settings.aggregation;

        let mut log = ProcessingLog::new();
        if let Err(e) = mapping.validate() {
            log.error(e.to_string());
            return Ok(log);
        }

        let selected = match processed_meshes(
            scene,
            aggregation.process_selection_set_name.as_deref(),
            &self.settings.visibility,
        ) {
            Ok(meshes) => meshes,
            Err(Error::InvalidSettings(message)) => {
                log.error(message);
                return Ok(log);
            }
            Err(e) => return Err(e),
        };
        let source = mapping
            .generate_mapping_image
            .then(|| merged_world_geometry(scene, &selected));
        let before: HashSet<NodeId> = scene.mesh_nodes().iter().map(|m| m.id).collect();

        let aggregate_to = if source.is_some() { 60.0 } else { 100.0 };
        log.merge(aggregate_scene(
            scene,
            aggregation,
            &self.settings.visibility,
            &ctx.sub_range(0.0, aggregate_to),
        )?);
        if log.has_errors() {
            return Ok(log);
        }

        if let Some(source) = source {
            let nodes: Vec<NodeId> = if aggregation.merge_geometries {
                scene
                    .mesh_nodes()
                    .iter()
                    .map(|m| m.id)
                    .filter(|id| !before.contains(id))
                    .filter(|id| scene.node(*id).is_some_and(|n| n.name == AGGREGATED_NODE_NAME))
                    .collect()
            } else {
                selected.iter().map(|m| m.id).collect()
            };
            let (mapped, images) = MappedMeshes::map(
                scene,
                &nodes,
                &source,
                mapping,
                &AttributeTessellationSettings::default(),
                &mut log,
                &ctx.sub_range(aggregate_to, 100.0),
            )?;
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

#[cfg(test)]
mod tests {
    use super::super::test_support::{cube, grid};
    use super::*;
    use lodcrate_core::{Point3f, SceneNode, Transform3D, Vector3f};

    fn two_mesh_scene() -> Scene {
        let mut scene = Scene::new();
        scene.add_mesh("grid", grid(4));
        let root = scene.root_id();
        scene
            .add_node(
                root,
                SceneNode::mesh("box", cube(Point3f::new(0.0, 0.0, 0.0), Point3f::new(1.0, 1.0, 1.0)))
                    .with_transform(Transform3D::translation(Vector3f::new(5.0, 0.0, 0.0))),
            )
            .unwrap();
        scene
    }

    #[test]
    fn test_merge_into_one_node() {
        let mut scene = two_mesh_scene();
        let mut processor = AggregationProcessor::new(AggregationPipelineSettings::default());
        let log = processor.run(&mut scene, &ProcessContext::new()).unwrap();
        assert!(!log.has_errors());
        let meshes = scene.mesh_nodes();
        assert_eq!(meshes.len(), 1);
        assert_eq!(scene.triangle_count(), 18 + 12);
        assert!(processor.mapping_images().is_empty());
    }

    #[test]
    fn test_merge_and_map() {
        let mut scene = two_mesh_scene();
        let mut processor = AggregationProcessor::new(AggregationPipelineSettings {
            mapping_image: MappingImageSettings::with_texture_size(64, 64),
            ..AggregationPipelineSettings::default()
        });
        let log = processor.run(&mut scene, &ProcessContext::new()).unwrap();
        assert!(!log.has_errors(), "{:?}", log.errors());
        let nodes = processor.output_nodes();
        assert_eq!(nodes.len(), 1);
        let image = processor.mapping_image(0).unwrap();
        assert_eq!(image.source.triangle_count(), 30);
        assert_eq!(image.destination.triangle_count(), 30);
        assert!(image.occupied_texels() > 0);
    }
}
