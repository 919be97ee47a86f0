//! Geometry aggregation
//!
//! Meshes of a selection (or the whole scene) are moved into world space
//! and merged into one mesh node under the root. Triangles no camera can
//! see may be culled on the way.

use crate::visibility::{compute_scene_visibility, visible_triangles, VisibilitySettings};
use lodcrate_core::{
    Error, GeometryData, MeshInstance, NodeId, NodeKind, ProcessContext, ProcessingLog, Result, Scene,
    Transformable,
};
use serde::{Deserialize, Serialize};

/// Name of the mesh node holding merged geometry
pub const AGGREGATED_NODE_NAME: &str = "AggregatedGeometry";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationSettings {
    pub merge_geometries: bool,
    pub process_selection_set_name: Option<String>,
}

impl Default for AggregationSettings {
    fn default() -> Self {
        Self {
            merge_geometries: true,
            process_selection_set_name: None,
        }
    }
}

/// Geometry of a mesh instance in world space. Mirroring transforms flip
/// the winding so faces keep pointing outward.
pub fn world_geometry(scene: &Scene, mesh: &MeshInstance) -> Option<GeometryData> {
    let mut geometry = scene.geometry(mesh.id)?.clone();
    geometry.transform(&mesh.world);
    if mesh.world.is_mirroring() {
        geometry.flip_winding();
    }
    Some(geometry)
}

/// Selected mesh instances minus the visibility-only nodes
pub fn processed_meshes(
    scene: &Scene,
    selection_set: Option<&str>,
    visibility: &VisibilitySettings,
) -> Result<Vec<MeshInstance>> {
    let excluded = visibility.excluded_nodes(scene);
    Ok(scene
        .selected_mesh_nodes(selection_set)?
        .into_iter()
        .filter(|m| !excluded.contains(&m.id))
        .collect())
}

/// Remove a mesh from the scene. A mesh node that still has children is
/// turned into a plain transform node instead.
pub fn detach_mesh(scene: &mut Scene, id: NodeId) -> Result<()> {
    let Some(node) = scene.node_mut(id) else {
        return Ok(());
    };
    if node.children.is_empty() {
        scene.remove_node(id)?;
    } else {
        node.kind = NodeKind::Transform;
    }
    Ok(())
}

/// Merge (and optionally cull) the selected meshes. Settings problems are
/// recorded in the returned log.
pub fn aggregate_scene(
    scene: &mut Scene,
    settings: &AggregationSettings,
    visibility: &VisibilitySettings,
    ctx: &ProcessContext,
) -> Result<ProcessingLog> {
    let mut log = ProcessingLog::new();
    let meshes = match processed_meshes(scene, settings.process_selection_set_name.as_deref(), visibility) {
        Ok(meshes) => meshes,
        Err(Error::InvalidSettings(message)) => {
            log.error(message);
            return Ok(log);
        }
        Err(e) => return Err(e),
    };
    if meshes.is_empty() {
        log.warning("aggregation found no meshes to process");
        return Ok(log);
    }

    let mut world: Vec<GeometryData> = meshes.iter().filter_map(|m| world_geometry(scene, m)).collect();
    ctx.step(10.0)?;

    if visibility.cull_occluded_geometry {
        let targets: Vec<&GeometryData> = world.iter().collect();
        match compute_scene_visibility(scene, &targets, visibility, &ctx.sub_range(10.0, 70.0)) {
            Ok(values) => {
                let mut culled = 0;
                for (geometry, values) in world.iter_mut().zip(&values) {
                    let keep = visible_triangles(geometry, values, visibility.fill_non_visible_area_threshold);
                    culled += geometry.triangle_count() - keep.len();
                    *geometry = geometry.extract_triangles(&keep);
                }
                tracing::info!("culled {} occluded triangles", culled);
            }
            Err(Error::InvalidSettings(message)) => log.error(message),
            Err(e) => return Err(e),
        }
    }
    ctx.step(70.0)?;

    if settings.merge_geometries {
        let mut merged = GeometryData::new();
        for geometry in &world {
            merged.append(geometry);
        }
        for mesh in &meshes {
            detach_mesh(scene, mesh.id)?;
        }
        let triangles = merged.triangle_count();
        scene.add_mesh(AGGREGATED_NODE_NAME, merged);
        tracing::info!("merged {} meshes into {} triangles", meshes.len(), triangles);
    } else {
        // Culling only: bring the culled world geometry back to node space
        for (mesh, geometry) in meshes.iter().zip(world) {
            let Some(inverse) = mesh.world.inverse() else {
                log.warning(format!("mesh {} has a singular transform and was left unchanged", mesh.id));
                continue;
            };
            let mut local = geometry;
            local.transform(&inverse);
            if mesh.world.is_mirroring() {
                local.flip_winding();
            }
            if let Some(target) = scene.geometry_mut(mesh.id) {
                *target = local;
            }
        }
    }
    ctx.report(100.0);
    Ok(log)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lodcrate_core::{Point3f, SceneNode, Transform3D, Vector3f};

    fn triangle() -> GeometryData {
        GeometryData::from_triangles(
            vec![
                Point3f::new(0.0, 0.0, 0.0),
                Point3f::new(1.0, 0.0, 0.0),
                Point3f::new(0.0, 1.0, 0.0),
            ],
            vec![[0, 1, 2]],
        )
    }

    #[test]
    fn test_merge_into_world_space() {
        let mut scene = Scene::new();
        let root = scene.root_id();
        scene.add_mesh("a", triangle());
        let moved = SceneNode::mesh("b", triangle())
            .with_transform(Transform3D::translation(Vector3f::new(5.0, 0.0, 0.0)));
        scene.add_node(root, moved).unwrap();

        let log = aggregate_scene(
            &mut scene,
            &AggregationSettings::default(),
            &VisibilitySettings::default(),
            &ProcessContext::new(),
        )
        .unwrap();
        assert!(!log.has_errors());
        let meshes = scene.mesh_nodes();
        assert_eq!(meshes.len(), 1);
        let merged = scene.geometry(meshes[0].id).unwrap();
        assert_eq!(merged.triangle_count(), 2);
        assert!(merged.coords.iter().any(|p| p.x == 6.0));
    }

    #[test]
    fn test_selection_scope() {
        let mut scene = Scene::new();
        let a = scene.add_mesh("a", triangle());
        let b = scene.add_mesh("b", triangle());
        scene.add_selection_set("Target", [a]);
        let settings = AggregationSettings {
            process_selection_set_name: Some("Target".to_string()),
            ..AggregationSettings::default()
        };
        aggregate_scene(&mut scene, &settings, &VisibilitySettings::default(), &ProcessContext::new()).unwrap();
        assert!(scene.node(a).is_none());
        assert_eq!(scene.geometry(b).unwrap().triangle_count(), 1);
        assert_eq!(scene.mesh_nodes().len(), 2);
    }

    #[test]
    fn test_missing_selection_set_is_logged() {
        let mut scene = Scene::new();
        scene.add_mesh("a", triangle());
        let settings = AggregationSettings {
            process_selection_set_name: Some("Missing".to_string()),
            ..AggregationSettings::default()
        };
        let log = aggregate_scene(&mut scene, &settings, &VisibilitySettings::default(), &ProcessContext::new()).unwrap();
        assert!(log.has_errors());
        assert_eq!(scene.mesh_nodes().len(), 1);
    }
}
