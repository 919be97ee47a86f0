//! Visibility from camera viewpoints
//!
//! Every triangle is sampled at a few interior points; a sample is visible
//! from a viewpoint when it lies inside the camera's view cone, faces the
//! camera (with backface culling) and the segment to the camera is not
//! blocked by any processed or occluder triangle. A triangle's visibility
//! is the largest fraction of visible samples over all viewpoints.

use lodcrate_core::{
    Aabb, CameraNode, CameraType, Error, GeometryData, NodeId, ProcessContext, Ray, Result, Scene,
    Transformable, TriangleBvh, Vector3f, Point3f,
};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};

/// Barycentric positions of the samples taken on every triangle
const SAMPLE_POINTS: [[f32; 3]; 4] = [
    [1.0 / 3.0, 1.0 / 3.0, 1.0 / 3.0],
    [0.6, 0.2, 0.2],
    [0.2, 0.6, 0.2],
    [0.2, 0.2, 0.6],
];
/// Fraction of a camera ray left out at the sample end
const RAY_END_EPSILON: f32 = 1e-4;
/// Density of the default camera used when no camera set is given
const DEFAULT_SPHERE_FIDELITY: u32 = 4;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisibilitySettings {
    pub use_visibility_weights_in_reducer: bool,
    pub visibility_weights_power: f32,
    /// Cameras of this set, and the vertices of its meshes, are viewpoints.
    /// Without a set the scene is viewed from a sphere around it.
    pub camera_selection_set_name: Option<String>,
    /// Meshes of this set block visibility but are never processed
    pub occluder_selection_set_name: Option<String>,
    pub cull_occluded_geometry: bool,
    pub use_backface_culling: bool,
    /// Invisible regions smaller than this fraction of the surface area are
    /// kept when culling
    pub fill_non_visible_area_threshold: f32,
}

impl Default for VisibilitySettings {
    fn default() -> Self {
        Self {
            use_visibility_weights_in_reducer: false,
            visibility_weights_power: 1.0,
            camera_selection_set_name: None,
            occluder_selection_set_name: None,
            cull_occluded_geometry: false,
            use_backface_culling: true,
            fill_non_visible_area_threshold: 0.0,
        }
    }
}

impl VisibilitySettings {
    pub fn is_enabled(&self) -> bool {
        self.use_visibility_weights_in_reducer || self.cull_occluded_geometry
    }

    /// Nodes that only feed visibility and are left out of processing
    pub fn excluded_nodes(&self, scene: &Scene) -> HashSet<NodeId> {
        let mut excluded = HashSet::new();
        for name in [&self.camera_selection_set_name, &self.occluder_selection_set_name]
            .into_iter()
            .flatten()
        {
            if let Some(nodes) = scene.selection_set_nodes(name) {
                excluded.extend(nodes);
            }
        }
        excluded
    }
}

/// A place visibility is sampled from
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Viewpoint {
    /// Sees samples within `cos_half_angle` of its direction
    Perspective {
        position: Point3f,
        direction: Vector3f,
        cos_half_angle: f32,
    },
    /// Parallel rays along `direction`
    Orthographic { direction: Vector3f },
    /// Sees in every direction
    Omni { position: Point3f },
}

impl Viewpoint {
    /// Cameras of a camera node in world space. The view cone covers the
    /// square image diagonal.
    pub fn from_camera(camera: &CameraNode, world: &lodcrate_core::Transform3D, scene_bounds: &Aabb) -> Vec<Self> {
        let half_angle = (camera.field_of_view * 0.5 * std::f32::consts::SQRT_2).min(std::f32::consts::PI);
        camera
            .world_viewpoints(world, scene_bounds)
            .into_iter()
            .map(|vp| match camera.camera_type {
                CameraType::Perspective => Viewpoint::Perspective {
                    position: vp.position,
                    direction: vp.direction,
                    cos_half_angle: half_angle.cos(),
                },
                CameraType::Orthographic => Viewpoint::Orthographic {
                    direction: vp.direction,
                },
            })
            .collect()
    }

    /// Ray from the viewpoint reaching `sample` at `t = 1`, or `None` when
    /// the sample is outside the view or facing away
    fn ray_to(&self, sample: &Point3f, normal: &Vector3f, far: f32, backface_culling: bool) -> Option<Ray> {
        let (origin, toward) = match *self {
            Viewpoint::Perspective {
                position,
                direction,
                cos_half_angle,
            } => {
                let toward = sample - position;
                let len = toward.norm();
                if len <= f32::EPSILON || direction.dot(&toward) < cos_half_angle * len * direction.norm() {
                    return None;
                }
                (position, toward)
            }
            Viewpoint::Orthographic { direction } => {
                let d = direction.try_normalize(f32::EPSILON)?;
                (sample - d * far, d * far)
            }
            Viewpoint::Omni { position } => {
                let toward = sample - position;
                if toward.norm() <= f32::EPSILON {
                    return None;
                }
                (position, toward)
            }
        };
        if backface_culling && normal.dot(&toward) >= 0.0 {
            return None;
        }
        Some(Ray::new(origin, toward))
    }
}

/// Geometry visibility is computed for, plus extra blocking triangles
pub struct VisibilityCalculator {
    viewpoints: Vec<Viewpoint>,
    bvh: TriangleBvh,
    far: f32,
    backface_culling: bool,
}

impl VisibilityCalculator {
    /// `targets` and `occluders` are in world space
    pub fn new(viewpoints: Vec<Viewpoint>, targets: &[&GeometryData], occluders: &[GeometryData], backface_culling: bool) -> Self {
        let mut triangles = Vec::new();
        let mut bounds = Aabb::empty();
        for geometry in targets.iter().copied().chain(occluders.iter()) {
            for t in 0..geometry.triangle_count() {
                let tri = geometry.triangle_positions(t);
                tri.iter().for_each(|p| bounds.extend(p));
                triangles.push(tri);
            }
        }
        Self {
            viewpoints,
            bvh: TriangleBvh::from_triangles(triangles).with_backface_culling(false),
            far: bounds.diagonal().max(1.0) * 4.0,
            backface_culling,
        }
    }

    pub fn viewpoint_count(&self) -> usize {
        self.viewpoints.len()
    }

    /// Visibility in `[0, 1]` of every triangle of a world space geometry
    pub fn triangle_visibility(&self, geometry: &GeometryData) -> Vec<f32> {
        (0..geometry.triangle_count())
            .into_par_iter()
            .map(|t| {
                let normal = geometry.triangle_normal(t);
                let [a, b, c] = geometry.triangle_positions(t);
                let samples: Vec<Point3f> = SAMPLE_POINTS
                    .iter()
                    .map(|w| Point3f::from(a.coords * w[0] + b.coords * w[1] + c.coords * w[2]))
                    .collect();
                let mut best = 0.0f32;
                for viewpoint in &self.viewpoints {
                    let visible = samples
                        .iter()
                        .filter(|s| {
                            viewpoint
                                .ray_to(s, &normal, self.far, self.backface_culling)
                                .is_some_and(|ray| !self.bvh.occluded(&ray, 1.0 - RAY_END_EPSILON))
                        })
                        .count();
                    best = best.max(visible as f32 / samples.len() as f32);
                    if best >= 1.0 {
                        break;
                    }
                }
                best
            })
            .collect()
    }
}

/// Viewpoints of a scene: cameras and mesh vertices of the camera set, or
/// a sphere of cameras around `bounds` when no set is named
pub fn scene_viewpoints(scene: &Scene, settings: &VisibilitySettings, bounds: &Aabb) -> Result<Vec<Viewpoint>> {
    let Some(name) = settings.camera_selection_set_name.as_deref() else {
        let camera = CameraNode::sphere_path(DEFAULT_SPHERE_FIDELITY, 0.0, 0.0, 360.0);
        return Ok(Viewpoint::from_camera(&camera, &lodcrate_core::Transform3D::identity(), bounds));
    };
    let mut viewpoints = Vec::new();
    for (camera, world) in scene.cameras_in_selection(name)? {
        viewpoints.extend(Viewpoint::from_camera(&camera, &world, bounds));
    }
    let selected = scene
        .selection_set_nodes(name)
        .ok_or_else(|| Error::InvalidSettings(format!("selection set '{}' does not exist", name)))?;
    for mesh in scene.mesh_nodes().into_iter().filter(|m| selected.contains(&m.id)) {
        if let Some(geometry) = scene.geometry(mesh.id) {
            viewpoints.extend(geometry.coords.iter().map(|p| Viewpoint::Omni {
                position: mesh.world.transform_point(p),
            }));
        }
    }
    if viewpoints.is_empty() {
        return Err(Error::InvalidSettings(format!(
            "camera selection set '{}' holds no cameras or meshes",
            name
        )));
    }
    Ok(viewpoints)
}

/// World space copies of the meshes of the occluder set
pub fn scene_occluders(scene: &Scene, settings: &VisibilitySettings) -> Result<Vec<GeometryData>> {
    let Some(name) = settings.occluder_selection_set_name.as_deref() else {
        return Ok(Vec::new());
    };
    Ok(scene
        .selected_mesh_nodes(Some(name))?
        .into_iter()
        .filter_map(|m| {
            let mut geometry = scene.geometry(m.id)?.clone();
            geometry.transform(&m.world);
            Some(geometry)
        })
        .collect())
}

/// Visibility of every triangle of the given world space geometries, seen
/// from the scene's viewpoints
pub fn compute_scene_visibility(
    scene: &Scene,
    targets: &[&GeometryData],
    settings: &VisibilitySettings,
    ctx: &ProcessContext,
) -> Result<Vec<Vec<f32>>> {
    let mut bounds = Aabb::empty();
    for geometry in targets {
        geometry.coords.iter().for_each(|p| bounds.extend(p));
    }
    let occluders = scene_occluders(scene, settings)?;
    let viewpoints = scene_viewpoints(scene, settings, &bounds)?;
    let calculator = VisibilityCalculator::new(viewpoints, targets, &occluders, settings.use_backface_culling);
    tracing::debug!(
        "visibility from {} viewpoints over {} geometries ({} occluders)",
        calculator.viewpoint_count(),
        targets.len(),
        occluders.len()
    );

    let mut result = Vec::with_capacity(targets.len());
    for (i, geometry) in targets.iter().enumerate() {
        ctx.step(100.0 * i as f32 / targets.len().max(1) as f32)?;
        result.push(calculator.triangle_visibility(geometry));
    }
    Ok(result)
}

/// Triangles to keep when culling: visible ones, plus invisible regions
/// whose area is below `fill_threshold` of the total surface area
pub fn visible_triangles(geometry: &GeometryData, visibility: &[f32], fill_threshold: f32) -> Vec<usize> {
    let total_area = geometry.surface_area();
    let mut keep: Vec<bool> = visibility.iter().map(|v| *v > 0.0).collect();
    if fill_threshold > 0.0 {
        let edges = geometry.edge_triangles();
        let mut adjacency = vec![Vec::new(); geometry.triangle_count()];
        for tris in edges.values() {
            for &a in tris {
                for &b in tris {
                    if a != b {
                        adjacency[a].push(b);
                    }
                }
            }
        }
        let mut seen = vec![false; geometry.triangle_count()];
        for start in 0..geometry.triangle_count() {
            if keep[start] || seen[start] {
                continue;
            }
            let mut region = vec![start];
            let mut queue = VecDeque::from([start]);
            seen[start] = true;
            while let Some(t) = queue.pop_front() {
                for &n in &adjacency[t] {
                    if !keep[n] && !seen[n] {
                        seen[n] = true;
                        region.push(n);
                        queue.push_back(n);
                    }
                }
            }
            let area: f32 = region.iter().map(|&t| geometry.triangle_area(t)).sum();
            if area < fill_threshold * total_area {
                for t in region {
                    keep[t] = true;
                }
            }
        }
    }
    (0..geometry.triangle_count()).filter(|&t| keep[t]).collect()
}
