//! Scene remeshing
//!
//! The selected meshes are merged in world space, rasterized into a signed
//! distance grid, polygonized with marching cubes and decimated back down
//! to roughly the resolution the on-screen size asks for. The result
//! replaces the selected meshes with one new mesh node under the root.

use crate::distance_field::{apply_sign, outside_region, unsigned_distance_field};
use crate::grid::VoxelGrid;
use crate::marching_cubes::extract_isosurface;
use crate::settings::{RemeshingSettings, SurfaceTransferMode};
use lodcrate_core::{
    Bounded, BoneWeights, Error, GeometryData, NodeId, ProcessContext, ProcessingLog, Result, Scene, TriangleIndex,
};
use lodcrate_simplification::{
    apply_normal_settings, detach_mesh, limit_bones_per_vertex, process_bones, world_geometry, EdgeCollapseReducer,
    NormalCalculationSettings, ReductionConstraints, ReductionSettings, ReductionTargets,
};

/// Name of the mesh node holding the remeshed geometry
pub const REMESHED_NODE_NAME: &str = "RemeshedGeometry";

/// Distance field samples are exact within this many cells of the surface
const EXACT_BAND_CELLS: f32 = 4.5;
/// Decimation stops at this fraction of a cell of deviation
const DECIMATION_DEVIATION: f32 = 0.25;
/// Empty cells around the input so the outside region surrounds it
const GRID_PADDING: usize = 2;

/// What a remeshing run produced
#[derive(Debug, Clone)]
pub struct RemeshOutcome {
    pub log: ProcessingLog,
    /// The new mesh node, if anything was remeshed
    pub node: Option<NodeId>,
    /// Merged world-space input, kept for mapping and displacement
    pub source: GeometryData,
    pub cell_size: f32,
}

impl RemeshOutcome {
    fn empty(log: ProcessingLog) -> Self {
        Self {
            log,
            node: None,
            source: GeometryData::new(),
            cell_size: 0.0,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Remesher {
    pub settings: RemeshingSettings,
}

impl Remesher {
    pub fn new(settings: RemeshingSettings) -> Self {
        Self { settings }
    }

    /// Remesh world-space geometry. Returns the new surface and the cell
    /// size used.
    pub fn remesh_geometry(&self, source: &GeometryData, ctx: &ProcessContext) -> Result<(GeometryData, f32)> {
        self.settings.validate()?;
        let bounds = source.bounding_box();
        if source.is_empty() || bounds.is_empty() {
            return Err(Error::InvalidData("nothing to remesh".to_string()));
        }
        let extent = bounds.extent();
        let longest = extent.x.max(extent.y).max(extent.z);
        let cell_size = self.settings.cell_size(bounds.diagonal(), longest);
        let mut grid = VoxelGrid::covering(&bounds, cell_size, GRID_PADDING, 0.0)?;
        tracing::info!(
            "remeshing {} triangles on a {:?} grid, cell size {:.4}",
            source.triangle_count(),
            grid.dimensions,
            cell_size
        );

        unsigned_distance_field(source, &mut grid, EXACT_BAND_CELLS, &ctx.sub_range(0.0, 40.0))?;
        let outside = outside_region(&grid, self.settings.hole_filling.fill_cells());
        apply_sign(&mut grid, &outside);
        ctx.step(45.0)?;

        let surface = extract_isosurface(&grid, 0.0, &ctx.sub_range(45.0, 60.0))?;
        if surface.is_empty() {
            return Err(Error::Algorithm(
                "remeshing produced no surface; the input may be too thin for the grid".to_string(),
            ));
        }
        ctx.step(60.0)?;

        let reducer = EdgeCollapseReducer::new(ReductionSettings::with_targets(ReductionTargets {
            use_triangle_ratio: false,
            use_max_deviation: true,
            max_deviation: DECIMATION_DEVIATION * cell_size,
            ..ReductionTargets::default()
        }));
        let marched = surface.triangle_count();
        let mut reduced = reducer
            .reduce(&surface, &ReductionConstraints::default(), &ctx.sub_range(60.0, 95.0))?
            .geometry;
        tracing::debug!("decimated {} -> {} triangles", marched, reduced.triangle_count());

        apply_normal_settings(
            &mut reduced,
            &NormalCalculationSettings {
                replace_normals: true,
                ..NormalCalculationSettings::default()
            },
        );
        ctx.report(100.0);
        Ok((reduced, cell_size))
    }

    /// Remesh the selected meshes of a scene in place
    pub fn run(&self, scene: &mut Scene, ctx: &ProcessContext) -> Result<RemeshOutcome> {
        let mut log = ProcessingLog::new();
        if let Err(e) = self.settings.validate() {
            log.error(e.to_string());
            return Ok(RemeshOutcome::empty(log));
        }
        let meshes = match scene.selected_mesh_nodes(self.settings.process_selection_set_name.as_deref()) {
            Ok(meshes) => meshes,
            Err(Error::InvalidSettings(message)) => {
                log.error(message);
                return Ok(RemeshOutcome::empty(log));
            }
            Err(e) => return Err(e),
        };
        if meshes.is_empty() {
            log.warning("remeshing found no meshes to process");
            return Ok(RemeshOutcome::empty(log));
        }

        let mut source = GeometryData::new();
        for mesh in &meshes {
            if let Some(world) = world_geometry(scene, mesh) {
                source.append(&world);
            }
        }
        let (mut remeshed, cell_size) = self.remesh_geometry(&source, &ctx.sub_range(0.0, 90.0))?;

        if source.bone_weights.is_some() {
            transfer_bone_weights(&source, &mut remeshed, self.settings.surface_transfer_mode);
        }

        for mesh in &meshes {
            detach_mesh(scene, mesh.id)?;
        }
        let node = scene.add_mesh(REMESHED_NODE_NAME, remeshed);
        process_bones(scene, &self.settings.bones, &mut log)?;
        ctx.report(100.0);

        Ok(RemeshOutcome {
            log,
            node: Some(node),
            source,
            cell_size,
        })
    }
}

/// Give every vertex of `target` the skinning of the closest point on
/// `source`
pub fn transfer_bone_weights(source: &GeometryData, target: &mut GeometryData, mode: SurfaceTransferMode) {
    let Some(source_bones) = source.bone_weights.as_ref() else {
        return;
    };
    let index = TriangleIndex::new(source);
    let slots = source_bones.bones_per_vertex;
    let mut bones = BoneWeights::new(target.vertex_count(), slots);
    for (v, p) in target.coords.iter().enumerate() {
        let Some(hit) = index.closest(p) else {
            continue;
        };
        let ids = source.vertex_ids[hit.triangle];
        let mut blended: Vec<(i32, f32)> = Vec::new();
        let mut add = |vertex: u32, scale: f32| {
            for (bone, w) in source_bones.influences(vertex as usize) {
                match blended.iter_mut().find(|(id, _)| *id == bone) {
                    Some((_, acc)) => *acc += w * scale,
                    None => blended.push((bone, w * scale)),
                }
            }
        };
        match mode {
            SurfaceTransferMode::Accurate => {
                for (k, &vertex) in ids.iter().enumerate() {
                    add(vertex, hit.barycentric[k]);
                }
            }
            SurfaceTransferMode::Fast => {
                let nearest = (0..3)
                    .max_by(|&a, &b| hit.barycentric[a].total_cmp(&hit.barycentric[b]))
                    .unwrap_or(0);
                add(ids[nearest], 1.0);
            }
        }
        bones.set_influences(v, &blended);
        bones.normalize_vertex(v);
    }
    target.bone_weights = Some(bones);
    limit_bones_per_vertex(target, slots);
}

#[cfg(test)]
mod tests {
    use super::*;
    use lodcrate_core::{Point3f, SceneNode};

    pub(crate) fn cube(half: f32) -> GeometryData {
        let h = half;
        let coords = vec![
            Point3f::new(-h, -h, -h),
            Point3f::new(h, -h, -h),
            Point3f::new(h, h, -h),
            Point3f::new(-h, h, -h),
            Point3f::new(-h, -h, h),
            Point3f::new(h, -h, h),
            Point3f::new(h, h, h),
            Point3f::new(-h, h, h),
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

    #[test]
    fn test_remesh_cube_is_closed() {
        let remesher = Remesher::new(RemeshingSettings::with_on_screen_size(60));
        let (mesh, cell) = remesher.remesh_geometry(&cube(1.0), &ProcessContext::new()).unwrap();
        assert!(cell > 0.0);
        assert!(mesh.normals.is_some());
        for (_, triangles) in mesh.edge_triangles() {
            assert_eq!(triangles.len(), 2);
        }
        let bounds = mesh.bounding_box();
        for a in 0..3 {
            assert!((bounds.max[a] - 1.0).abs() < cell);
            assert!((bounds.min[a] + 1.0).abs() < cell);
        }
    }

    #[test]
    fn test_run_replaces_selected_meshes() {
        let mut scene = Scene::new();
        let root = scene.root_id();
        let a = scene.add_mesh("a", cube(1.0));
        let keep = scene.add_node(root, SceneNode::mesh("keep", cube(0.5))).unwrap();
        scene.add_selection_set("Remesh", [a]);

        let remesher = Remesher::new(RemeshingSettings {
            process_selection_set_name: Some("Remesh".to_string()),
            ..RemeshingSettings::with_on_screen_size(40)
        });
        let outcome = remesher.run(&mut scene, &ProcessContext::new()).unwrap();
        assert!(!outcome.log.has_errors());
        assert!(scene.node(a).is_none());
        assert_eq!(scene.geometry(keep).unwrap().triangle_count(), 12);
        let node = outcome.node.unwrap();
        assert_eq!(scene.node(node).unwrap().name, REMESHED_NODE_NAME);
        assert_eq!(outcome.source.triangle_count(), 12);
    }

    #[test]
    fn test_invalid_settings_are_logged() {
        let mut scene = Scene::new();
        scene.add_mesh("a", cube(1.0));
        let remesher = Remesher::new(RemeshingSettings::with_on_screen_size(1));
        let outcome = remesher.run(&mut scene, &ProcessContext::new()).unwrap();
        assert!(outcome.log.has_errors());
        assert!(outcome.node.is_none());
        assert_eq!(scene.mesh_nodes().len(), 1);
    }

    #[test]
    fn test_bone_transfer() {
        let mut source = cube(1.0);
        let bones = source.add_bone_weights(2);
        for v in 0..8 {
            // Bone 0 on the bottom half, bone 1 on the top half
            let bone = if v < 4 { 0 } else { 1 };
            bones.set_influences(v, &[(bone, 1.0)]);
        }
        let mut target = GeometryData::from_triangles(
            vec![
                Point3f::new(0.0, 0.0, -1.1),
                Point3f::new(0.0, 0.0, 1.1),
                Point3f::new(1.1, 0.0, 0.0),
            ],
            vec![[0, 1, 2]],
        );
        transfer_bone_weights(&source, &mut target, SurfaceTransferMode::Accurate);
        let bones = target.bone_weights.as_ref().unwrap();
        assert_eq!(bones.influences(0), vec![(0, 1.0)]);
        assert_eq!(bones.influences(1), vec![(1, 1.0)]);
        let side = bones.influences(2);
        assert_eq!(side.len(), 2);
        assert!(side.iter().all(|(_, w)| (*w - 0.5).abs() < 1e-4));

        transfer_bone_weights(&source, &mut target, SurfaceTransferMode::Fast);
        assert_eq!(target.bone_weights.as_ref().unwrap().influences(2).len(), 1);
    }
}
