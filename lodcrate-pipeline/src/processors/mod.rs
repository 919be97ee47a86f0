//! Processors: the geometry stage of a pipeline
//!
//! A processor changes the scene geometry (reduction, remeshing,
//! aggregation or impostor generation) and, when configured, prepares the
//! processed meshes for casting by building mapping images.

mod aggregation;
mod impostor;
mod reduction;
mod remeshing;

pub use aggregation::AggregationProcessor;
pub use impostor::ImpostorProcessor;
pub use reduction::ReductionProcessor;
pub use remeshing::RemeshingProcessor;

use lodcrate_casting::{
    assign_tessellation, build_mapping_images, AttributeTessellationSettings, CastOutput, MappingImageSettings,
};
use lodcrate_core::{
    GeometryData, MappingImage, MeshInstance, NodeId, ProcessContext, ProcessingLog, Result, Scene,
    TessellatedAttributes, Transformable,
};
use lodcrate_simplification::world_geometry;
use std::ops::Range;

pub trait Processor {
    /// Process the scene in place. Settings problems are recorded in the
    /// returned log, failures and cancellation are returned as `Err`.
    fn run(&mut self, scene: &mut Scene, ctx: &ProcessContext) -> Result<ProcessingLog>;

    /// Mapping image of an output material from the last run
    fn mapping_image(&self, output_index: usize) -> Option<&MappingImage> {
        self.mapping_images().get(output_index)
    }

    fn mapping_images(&self) -> &[MappingImage];

    /// Meshes the mapping images were built for, when cast geometry data
    /// (vertex colors, tessellated values) can be written back to them
    fn mapped_meshes(&self) -> Option<&MappedMeshes>;

    /// Mesh nodes that carry the output material ids after the last run
    fn output_nodes(&self) -> Vec<NodeId>;

    /// Output material of every triangle of an output node
    fn triangle_outputs(&self, scene: &Scene, node: NodeId) -> Vec<usize> {
        match self.mapped_meshes().and_then(|m| m.triangle_outputs(node)) {
            Some(outputs) => outputs.to_vec(),
            None => vec![0; scene.geometry(node).map_or(0, GeometryData::triangle_count)],
        }
    }

    fn mapping_image_settings(&self) -> &MappingImageSettings;
}

#[derive(Debug, Clone)]
struct MappedPart {
    node: NodeId,
    triangles: Range<usize>,
    mirrored: bool,
}

/// Processed meshes mapped as one destination, with the triangle range each
/// mesh occupies in it
#[derive(Debug, Clone, Default)]
pub struct MappedMeshes {
    parts: Vec<MappedPart>,
    /// Output material of each triangle of the combined destination
    outputs: Vec<usize>,
}

impl MappedMeshes {
    /// Generate texture coordinates, tangents, tessellation and mapping
    /// images for the given mesh nodes, mapped against the world-space
    /// `source`. The prepared geometry is written back to the nodes.
    pub fn map(
        scene: &mut Scene,
        nodes: &[NodeId],
        source: &GeometryData,
        mapping: &MappingImageSettings,
        tessellation: &AttributeTessellationSettings,
        log: &mut ProcessingLog,
        ctx: &ProcessContext,
    ) -> Result<(Self, Vec<MappingImage>)> {
        let mut combined = GeometryData::new();
        let mut parts = Vec::with_capacity(nodes.len());
        let mut transforms = Vec::with_capacity(nodes.len());
        for &node in nodes {
            let Some(world) = scene.world_transform(node) else {
                continue;
            };
            let Some(geometry) = world_geometry(scene, &MeshInstance { id: node, world }) else {
                continue;
            };
            let start = combined.triangle_count();
            combined.append(&geometry);
            parts.push(MappedPart {
                node,
                triangles: start..combined.triangle_count(),
                mirrored: world.is_mirroring(),
            });
            transforms.push(world);
        }

        if tessellation.enable_attribute_tessellation {
            assign_tessellation(&mut combined, tessellation)?;
        }
        let outputs = (0..combined.triangle_count())
            .map(|t| mapping.output_for_material(combined.material_id(t)))
            .collect();
        let images = build_mapping_images(source, &mut combined, mapping, None, ctx)?;

        for (part, world) in parts.iter().zip(transforms) {
            let Some(inverse) = world.inverse() else {
                log.warning(format!(
                    "mesh {} has a singular transform; its texture coordinates were not updated",
                    part.node
                ));
                continue;
            };
            let triangles: Vec<usize> = part.triangles.clone().collect();
            let mut local = combined.extract_triangles(&triangles);
            local.transform(&inverse);
            if part.mirrored {
                local.flip_winding();
            }
            local.tessellated = match (&combined.tessellated, part.mirrored) {
                (Some(values), false) => Some(slice_tessellated(values, part.triangles.clone())),
                _ => None,
            };
            if let Some(target) = scene.geometry_mut(part.node) {
                *target = local;
            }
        }
        Ok((Self { parts, outputs }, images))
    }

    pub fn nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.parts.iter().map(|p| p.node)
    }

    pub fn triangle_count(&self) -> usize {
        self.parts.last().map_or(0, |p| p.triangles.end)
    }

    /// Output material of each triangle of a mapped node
    pub fn triangle_outputs(&self, node: NodeId) -> Option<&[usize]> {
        let part = self.parts.iter().find(|p| p.node == node)?;
        self.outputs.get(part.triangles.clone())
    }

    /// Write vertex colors and tessellated values a caster produced for the
    /// combined destination back to the individual meshes
    pub fn apply_cast_output(&self, scene: &mut Scene, output: &CastOutput, log: &mut ProcessingLog) {
        let corners = self.triangle_count() * 3;
        if let Some(colors) = &output.vertex_colors {
            if colors.values.len() != corners {
                log.warning(format!(
                    "cast color set '{}' has {} values for {} corners and was dropped",
                    colors.name,
                    colors.values.len(),
                    corners
                ));
            } else {
                for part in &self.parts {
                    let Some(geometry) = scene.geometry_mut(part.node) else {
                        continue;
                    };
                    let mut values = colors.values[part.triangles.start * 3..part.triangles.end * 3].to_vec();
                    if part.mirrored {
                        for corner in values.chunks_exact_mut(3) {
                            corner.swap(1, 2);
                        }
                    }
                    let set = geometry.add_colors(&colors.name);
                    geometry.colors[set].values = values;
                }
            }
        }
        if let Some(values) = &output.tessellated_displacement {
            if values.levels.len() != self.triangle_count() {
                log.warning("cast tessellated values do not match the processed meshes and were dropped");
                return;
            }
            for part in &self.parts {
                if part.mirrored {
                    log.warning(format!("tessellated values of mirrored mesh {} were dropped", part.node));
                    continue;
                }
                if let Some(geometry) = scene.geometry_mut(part.node) {
                    geometry.tessellated = Some(slice_tessellated(values, part.triangles.clone()));
                }
            }
        }
    }
}

/// Tessellated values of a run of triangles
fn slice_tessellated(values: &TessellatedAttributes, triangles: Range<usize>) -> TessellatedAttributes {
    let from = values.offsets[triangles.start] as usize;
    let to = values.offsets[triangles.end] as usize;
    let mut slice = TessellatedAttributes::from_levels(values.levels[triangles].to_vec());
    slice.displacement = values.displacement[from..to].to_vec();
    slice
}

/// Merged world-space geometry of mesh instances
pub(crate) fn merged_world_geometry(scene: &Scene, meshes: &[MeshInstance]) -> GeometryData {
    let mut merged = GeometryData::new();
    for mesh in meshes {
        if let Some(world) = world_geometry(scene, mesh) {
            merged.append(&world);
        }
    }
    merged
}

#[cfg(test)]
pub(crate) mod test_support {
    use lodcrate_core::{GeometryData, Point3f};

    /// Wavy height field grid with `size` x `size` vertices
    pub fn grid(size: u32) -> GeometryData {
        let mut coords = Vec::new();
        for y in 0..size {
            for x in 0..size {
                let (fx, fy) = (x as f32, y as f32);
                coords.push(Point3f::new(fx, fy, 0.3 * (fx * 0.7).sin() * (fy * 0.5).cos()));
            }
        }
        let mut ids = Vec::new();
        for y in 0..size - 1 {
            for x in 0..size - 1 {
                let a = y * size + x;
                ids.push([a, a + 1, a + size]);
                ids.push([a + 1, a + size + 1, a + size]);
            }
        }
        GeometryData::from_triangles(coords, ids)
    }

    /// Closed axis aligned box with outward winding
    pub fn cube(min: Point3f, max: Point3f) -> GeometryData {
        let p = |x: bool, y: bool, z: bool| {
            Point3f::new(
                if x { max.x } else { min.x },
                if y { max.y } else { min.y },
                if z { max.z } else { min.z },
            )
        };
        let coords = vec![
            p(false, false, false),
            p(true, false, false),
            p(true, true, false),
            p(false, true, false),
            p(false, false, true),
            p(true, false, true),
            p(true, true, true),
            p(false, true, true),
        ];
        let ids = vec![
            [0, 2, 1],
            [0, 3, 2],
            [4, 5, 6],
            [4, 6, 7],
            [0, 1, 5],
            [0, 5, 4],
            [2, 3, 7],
            [2, 7, 6],
            [1, 2, 6],
            [1, 6, 5],
            [0, 4, 7],
            [0, 7, 3],
        ];
        GeometryData::from_triangles(coords, ids)
    }
}
