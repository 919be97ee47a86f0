//! Scene reduction
//!
//! Runs the simplification stages over the selected meshes of a scene:
//! repair, visibility, modular seams, edge collapse reduction, normal
//! recalculation and finally bone processing.

use crate::aggregation::{processed_meshes, world_geometry};
use crate::bones::{process_bones, BoneSettings};
use crate::edge_collapse::{EdgeCollapseReducer, ReductionConstraints};
use crate::normals::{apply_normal_settings, NormalCalculationSettings};
use crate::repair::{repair_geometry, RepairSettings};
use crate::seams::{reduce_modular_seams, ModularSeamSettings};
use crate::settings::ReductionSettings;
use crate::visibility::{compute_scene_visibility, visible_triangles, VisibilitySettings};
use lodcrate_core::{Aabb, Bounded, Error, GeometryData, ProcessContext, ProcessingLog, Result, Scene};
use serde::{Deserialize, Serialize};

/// Everything the reduction stage of a pipeline is configured with
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimplificationSettings {
    pub reduction: ReductionSettings,
    pub repair: RepairSettings,
    pub normal_calculation: NormalCalculationSettings,
    pub bones: BoneSettings,
    pub visibility: VisibilitySettings,
    pub modular_seams: ModularSeamSettings,
}

impl SimplificationSettings {
    pub fn from_reduction(reduction: ReductionSettings) -> Self {
        Self {
            reduction,
            ..Self::default()
        }
    }
}

/// Reduce the selected meshes of a scene in place. Invalid settings are
/// recorded as errors in the returned log; cancellation and internal
/// failures are returned as `Err`.
pub fn reduce_scene(scene: &mut Scene, settings: &SimplificationSettings, ctx: &ProcessContext) -> Result<ProcessingLog> {
    let mut log = ProcessingLog::new();
    for check in [settings.reduction.validate(), settings.modular_seams.validate()] {
        if let Err(e) = check {
            log.error(e.to_string());
        }
    }
    if log.has_errors() {
        return Ok(log);
    }

    let meshes = match processed_meshes(
        scene,
        settings.reduction.process_selection_set_name.as_deref(),
        &settings.visibility,
    ) {
        Ok(meshes) => meshes,
        Err(Error::InvalidSettings(message)) => {
            log.error(message);
            return Ok(log);
        }
        Err(e) => return Err(e),
    };
    let input_triangles: usize = meshes
        .iter()
        .filter_map(|m| scene.geometry(m.id))
        .map(|g| g.triangle_count())
        .sum();
    tracing::info!("reducing {} meshes ({} triangles)", meshes.len(), input_triangles);

    // Repair first so visibility sees the final triangle layout
    if settings.repair.is_enabled() && settings.repair.check(&mut log) {
        for mesh in &meshes {
            if let Some(geometry) = scene.geometry_mut(mesh.id) {
                repair_geometry(geometry, &settings.repair, &mut log);
            }
        }
    }
    ctx.step(5.0)?;

    let world: Vec<GeometryData> = meshes.iter().filter_map(|m| world_geometry(scene, m)).collect();
    let mut scene_bounds = Aabb::empty();
    for geometry in &world {
        scene_bounds.merge(&geometry.bounding_box());
    }

    let mut visibility: Option<Vec<Vec<f32>>> = None;
    if settings.visibility.is_enabled() && !world.is_empty() {
        let targets: Vec<&GeometryData> = world.iter().collect();
        match compute_scene_visibility(scene, &targets, &settings.visibility, &ctx.sub_range(5.0, 25.0)) {
            Ok(values) => visibility = Some(values),
            Err(Error::InvalidSettings(message)) => log.error(message),
            Err(e) => return Err(e),
        }
    }
    ctx.step(25.0)?;

    let reducer = EdgeCollapseReducer::new(settings.reduction.clone());
    let count = meshes.len().max(1) as f32;
    for (i, mesh) in meshes.iter().enumerate() {
        let mesh_ctx = ctx.sub_range(25.0 + 70.0 * i as f32 / count, 25.0 + 70.0 * (i + 1) as f32 / count);
        let Some(mut geometry) = scene.geometry(mesh.id).cloned() else {
            continue;
        };
        let mut triangle_visibility = visibility.as_ref().and_then(|v| v.get(i).cloned());

        if let (true, Some(values)) = (settings.visibility.cull_occluded_geometry, triangle_visibility.as_ref()) {
            let keep = visible_triangles(&geometry, values, settings.visibility.fill_non_visible_area_threshold);
            if keep.len() < geometry.triangle_count() {
                tracing::debug!("culled {} occluded triangles", geometry.triangle_count() - keep.len());
                triangle_visibility = Some(keep.iter().map(|&t| values[t]).collect());
                geometry = geometry.extract_triangles(&keep);
            }
        }

        let locked = if settings.modular_seams.is_enabled() {
            let before = geometry.triangle_count();
            let locked = reduce_modular_seams(&mut geometry, &settings.modular_seams)?;
            if geometry.triangle_count() != before {
                // Seam collapses renumber triangles; visibility no longer lines up
                triangle_visibility = None;
            }
            locked
        } else {
            Vec::new()
        };

        let constraints = ReductionConstraints {
            locked_vertices: locked,
            triangle_visibility: triangle_visibility
                .filter(|_| settings.visibility.use_visibility_weights_in_reducer),
            visibility_power: settings.visibility.visibility_weights_power,
            world_scale: mesh.world.max_scale(),
            world_diameter: scene_bounds.diagonal(),
        };
        let outcome = reducer.reduce(&geometry, &constraints, &mesh_ctx)?;
        let mut reduced = outcome.geometry;
        apply_normal_settings(&mut reduced, &settings.normal_calculation);
        if let Some(target) = scene.geometry_mut(mesh.id) {
            *target = reduced;
        }
    }

    process_bones(scene, &settings.bones, &mut log)?;
    ctx.report(100.0);

    let output_triangles: usize = meshes
        .iter()
        .filter_map(|m| scene.geometry(m.id))
        .map(|g| g.triangle_count())
        .sum();
    tracing::info!("reduction finished: {} -> {} triangles", input_triangles, output_triangles);
    Ok(log)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::ReductionTargets;
    use lodcrate_core::Point3f;

    fn grid(size: u32) -> GeometryData {
        let mut coords = Vec::new();
        for y in 0..size {
            for x in 0..size {
                let (fx, fy) = (x as f32, y as f32);
                coords.push(Point3f::new(fx, fy, (fx * 0.7).sin() * (fy * 0.5).cos()));
            }
        }
        let mut ids = Vec::new();
        for y in 0..size - 1 {
            for x in 0..size - 1 {
                let a = y * size + x;
                ids.push([a, a + size, a + 1]);
                ids.push([a + 1, a + size, a + size + 1]);
            }
        }
        GeometryData::from_triangles(coords, ids)
    }

    #[test]
    fn test_reduce_whole_scene() {
        let mut scene = Scene::new();
        let id = scene.add_mesh("grid", grid(10));
        let settings = SimplificationSettings::from_reduction(ReductionSettings::with_targets(
            ReductionTargets::triangle_ratio(0.5),
        ));
        let log = reduce_scene(&mut scene, &settings, &ProcessContext::new()).unwrap();
        assert!(!log.has_errors());
        assert!(scene.geometry(id).unwrap().triangle_count() <= 81);
    }

    #[test]
    fn test_t_junction_without_welding_logs_error() {
        let mut scene = Scene::new();
        scene.add_mesh("grid", grid(4));
        let settings = SimplificationSettings {
            repair: RepairSettings {
                use_t_junction_remover: true,
                ..RepairSettings::default()
            },
            ..SimplificationSettings::default()
        };
        let log = reduce_scene(&mut scene, &settings, &ProcessContext::new()).unwrap();
        assert!(log.has_errors());
        assert!(log.errors()[0].contains("T-junction removal requires welding"));
    }

    #[test]
    fn test_cancelled_run() {
        let mut scene = Scene::new();
        scene.add_mesh("grid", grid(6));
        let ctx = ProcessContext::new();
        ctx.token().cancel();
        let result = reduce_scene(&mut scene, &SimplificationSettings::default(), &ctx);
        assert!(matches!(result, Err(Error::Cancelled)));
    }
}
