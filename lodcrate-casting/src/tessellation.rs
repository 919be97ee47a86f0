//! Attribute tessellation
//!
//! Every triangle gets a subdivision level `l`; its attribute values live on
//! the vertices of a regular `2^l` subdivision. Values are stored row by row:
//! row `i` runs from barycentric weight `i / n` toward corner 2, and within a
//! row the weight toward corner 1 grows from `0` to `(n - i) / n`.

use lodcrate_core::{
    interpolate_point, Bounded, Error, GeometryData, ProcessContext, Result, Scene, TessellatedAttributes,
    TriangleIndex, Vector3f,
};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttributeTessellationDensityMode {
    /// Value area relative to the total surface area
    #[default]
    RelativeArea,
    /// About one value per pixel at the given on-screen size
    OnScreenSize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttributeTessellationSettings {
    pub enable_attribute_tessellation: bool,
    pub density_mode: AttributeTessellationDensityMode,
    /// Largest share of the total surface one value may cover
    pub max_area_of_tessellated_value: f32,
    pub on_screen_size: u32,
    /// Raise levels so that neighbouring triangles differ by at most one
    pub only_allow_one_level_of_difference: bool,
    pub min_tessellation_level: u8,
    pub max_tessellation_level: u8,
    pub max_total_values_count: usize,
}

impl Default for AttributeTessellationSettings {
    fn default() -> Self {
        Self {
            enable_attribute_tessellation: false,
            density_mode: AttributeTessellationDensityMode::RelativeArea,
            max_area_of_tessellated_value: 0.0001,
            on_screen_size: 1000,
            only_allow_one_level_of_difference: true,
            min_tessellation_level: 0,
            max_tessellation_level: 5,
            max_total_values_count: 1_000_000,
        }
    }
}

impl AttributeTessellationSettings {
    pub fn validate(&self) -> Result<()> {
        if self.min_tessellation_level > self.max_tessellation_level {
            return Err(Error::InvalidSettings(format!(
                "minimum tessellation level {} is above the maximum {}",
                self.min_tessellation_level, self.max_tessellation_level
            )));
        }
        if self.max_tessellation_level > 10 {
            return Err(Error::InvalidSettings(format!(
                "tessellation level {} is above the supported 10",
                self.max_tessellation_level
            )));
        }
        match self.density_mode {
            AttributeTessellationDensityMode::RelativeArea if self.max_area_of_tessellated_value <= 0.0 => Err(
                Error::InvalidSettings("max area of a tessellated value must be positive".to_string()),
            ),
            AttributeTessellationDensityMode::OnScreenSize if self.on_screen_size == 0 => {
                Err(Error::InvalidSettings("tessellation on-screen size must be positive".to_string()))
            }
            _ => Ok(()),
        }
    }
}

/// Barycentric weights of the values of a triangle at `level`, in storage
/// order
pub fn tessellation_barycentrics(level: u8) -> Vec<[f32; 3]> {
    let n = 1usize << level;
    let mut points = Vec::with_capacity(lodcrate_core::tessellated_value_count(level));
    for i in 0..=n {
        for j in 0..=(n - i) {
            let w1 = j as f32 / n as f32;
            let w2 = i as f32 / n as f32;
            points.push([1.0 - w1 - w2, w1, w2]);
        }
    }
    points
}

/// Storage index of sub-vertex `(i, j)` in a triangle subdivided `n` times
fn value_index(n: usize, i: usize, j: usize) -> usize {
    i * (n + 1) - i * i.saturating_sub(1) / 2 + j
}

fn levels_for_area(area: f32, unit: f32) -> u8 {
    if area <= unit || unit <= 0.0 {
        return 0;
    }
    ((area / unit).log(4.0) - 1e-4).ceil().clamp(0.0, u8::MAX as f32) as u8
}

/// Subdivision level of every triangle
pub fn tessellation_levels(geometry: &GeometryData, settings: &AttributeTessellationSettings) -> Vec<u8> {
    let (min, max) = (settings.min_tessellation_level, settings.max_tessellation_level);
    let mut levels: Vec<u8> = match settings.density_mode {
        AttributeTessellationDensityMode::RelativeArea => {
            let total = geometry.surface_area().max(f32::MIN_POSITIVE);
            (0..geometry.triangle_count())
                .map(|t| levels_for_area(geometry.triangle_area(t) / total, settings.max_area_of_tessellated_value))
                .collect()
        }
        AttributeTessellationDensityMode::OnScreenSize => {
            let diameter = geometry.bounding_box().diagonal().max(f32::MIN_POSITIVE);
            let pixels_per_unit = settings.on_screen_size as f32 / diameter;
            (0..geometry.triangle_count())
                .map(|t| levels_for_area(geometry.triangle_area(t) * pixels_per_unit * pixels_per_unit, 1.0))
                .collect()
        }
    };
    for level in &mut levels {
        *level = (*level).clamp(min, max);
    }

    if settings.only_allow_one_level_of_difference {
        let edges = geometry.edge_triangles();
        loop {
            let mut changed = false;
            for triangles in edges.values() {
                let highest = triangles.iter().map(|&t| levels[t]).max().unwrap_or(0);
                for &t in triangles {
                    if levels[t] + 1 < highest {
                        levels[t] = highest - 1;
                        changed = true;
                    }
                }
            }
            if !changed {
                break;
            }
        }
    }

    // Lower the finest triangles until the budget holds
    let total = |levels: &[u8]| levels.iter().map(|&l| lodcrate_core::tessellated_value_count(l)).sum::<usize>();
    while total(&levels) > settings.max_total_values_count {
        let finest = levels.iter().copied().max().unwrap_or(0);
        if finest <= min {
            tracing::warn!(
                "tessellation needs {} values at the minimum level, above the budget of {}",
                total(&levels),
                settings.max_total_values_count
            );
            break;
        }
        for level in levels.iter_mut().filter(|l| **l == finest) {
            *level -= 1;
        }
    }
    levels
}

/// Assign tessellation levels to a geometry, replacing any earlier values
pub fn assign_tessellation(geometry: &mut GeometryData, settings: &AttributeTessellationSettings) -> Result<()> {
    settings.validate()?;
    let levels = tessellation_levels(geometry, settings);
    let attributes = TessellatedAttributes::from_levels(levels);
    tracing::debug!(
        "tessellated {} triangles into {} values",
        geometry.triangle_count(),
        attributes.total_values()
    );
    geometry.tessellated = Some(attributes);
    Ok(())
}

/// Signed distance from each tessellated value of `destination` to the
/// `source` surface, measured along the destination normal
pub fn sample_displacement(
    source: &GeometryData,
    destination: &GeometryData,
    ctx: &ProcessContext,
) -> Result<TessellatedAttributes> {
    let mut attributes = destination
        .tessellated
        .clone()
        .ok_or_else(|| Error::InvalidData("geometry has no tessellated attributes".to_string()))?;
    if attributes.levels.len() != destination.triangle_count() {
        return Err(Error::InvalidData(format!(
            "tessellated attributes cover {} triangles, geometry has {}",
            attributes.levels.len(),
            destination.triangle_count()
        )));
    }
    let index = TriangleIndex::new(source);
    let values: Vec<Vec<f32>> = (0..destination.triangle_count())
        .into_par_iter()
        .map(|t| {
            if ctx.token().is_cancelled() {
                return Err(Error::Cancelled);
            }
            let corners = destination.triangle_positions(t);
            Ok(tessellation_barycentrics(attributes.levels[t])
                .into_iter()
                .map(|bary| {
                    let p = interpolate_point(corners, bary);
                    let normal = surface_normal(destination, t, bary);
                    index.closest(&p).map_or(0.0, |hit| (hit.point - p).dot(&normal))
                })
                .collect())
        })
        .collect::<Result<_>>()?;
    for (t, triangle_values) in values.into_iter().enumerate() {
        attributes.triangle_values_mut(t).copy_from_slice(&triangle_values);
    }
    Ok(attributes)
}

fn surface_normal(geometry: &GeometryData, t: usize, bary: [f32; 3]) -> Vector3f {
    geometry
        .interpolate_corners(t, bary)
        .normal
        .and_then(|n| n.try_normalize(1e-12))
        .unwrap_or_else(|| geometry.triangle_normal(t))
}

/// Explicitly subdivided copy of a tessellated geometry, displaced along the
/// normal. Triangles do not share vertices.
pub fn tessellated_geometry(geometry: &GeometryData) -> Result<GeometryData> {
    let attributes = geometry
        .tessellated
        .as_ref()
        .ok_or_else(|| Error::InvalidData("geometry has no tessellated attributes".to_string()))?;
    let mut out = geometry.empty_like();
    out.tessellated = None;
    for t in 0..geometry.triangle_count() {
        let level = attributes.levels[t];
        let n = 1usize << level;
        let displacement = attributes.triangle_values(t);
        let corners = geometry.triangle_positions(t);
        let first = out.coords.len() as u32;
        let barycentrics = tessellation_barycentrics(level);
        let values: Vec<_> = barycentrics
            .iter()
            .map(|&bary| geometry.interpolate_corners(t, bary))
            .collect();
        for (k, &bary) in barycentrics.iter().enumerate() {
            let normal = surface_normal(geometry, t, bary);
            out.coords.push(interpolate_point(corners, bary) + normal * displacement[k]);
        }
        let material = geometry.material_id(t);
        let id = |i: usize, j: usize| value_index(n, i, j);
        for i in 0..n {
            for j in 0..(n - i) {
                let up = [id(i, j), id(i, j + 1), id(i + 1, j)];
                out.push_triangle(up.map(|v| first + v as u32), up.map(|v| &values[v]), material);
                if j + 1 < n - i {
                    let down = [id(i, j + 1), id(i + 1, j + 1), id(i + 1, j)];
                    out.push_triangle(down.map(|v| first + v as u32), down.map(|v| &values[v]), material);
                }
            }
        }
    }
    Ok(out)
}

/// Copy of a scene where every mesh with tessellated attributes is replaced
/// by its explicitly subdivided, displaced geometry
pub fn new_tessellated_scene(scene: &Scene) -> Result<Scene> {
    let mut out = scene.clone();
    for mesh in scene.mesh_nodes() {
        let Some(geometry) = scene.geometry(mesh.id) else {
            continue;
        };
        if geometry.tessellated.is_none() {
            continue;
        }
        let subdivided = tessellated_geometry(geometry)?;
        if let Some(target) = out.geometry_mut(mesh.id) {
            *target = subdivided;
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use lodcrate_core::{tessellated_value_count, Point3f};

    fn quad(z: f32) -> GeometryData {
        GeometryData::from_triangles(
            vec![
                Point3f::new(0.0, 0.0, z),
                Point3f::new(1.0, 0.0, z),
                Point3f::new(1.0, 1.0, z),
                Point3f::new(0.0, 1.0, z),
            ],
            vec![[0, 1, 2], [0, 2, 3]],
        )
    }

    #[test]
    fn test_barycentric_order() {
        let points = tessellation_barycentrics(1);
        assert_eq!(points.len(), tessellated_value_count(1));
        assert_eq!(points[0], [1.0, 0.0, 0.0]);
        assert_eq!(points[2], [0.0, 1.0, 0.0]);
        assert_eq!(points[5], [0.0, 0.0, 1.0]);
        assert_eq!(value_index(2, 1, 1), 4);
        assert_eq!(value_index(2, 2, 0), 5);
    }

    #[test]
    fn test_relative_area_levels() {
        let settings = AttributeTessellationSettings {
            max_area_of_tessellated_value: 0.5 / 16.0,
            ..AttributeTessellationSettings::default()
        };
        // Each triangle is half the area: 0.5 / (0.5 / 16) = 16 = 4^2
        assert_eq!(tessellation_levels(&quad(0.0), &settings), vec![2, 2]);

        let capped = AttributeTessellationSettings {
            max_tessellation_level: 1,
            ..settings
        };
        assert_eq!(tessellation_levels(&quad(0.0), &capped), vec![1, 1]);
    }

    #[test]
    fn test_neighbour_levels_differ_by_one() {
        let mut geometry = quad(0.0);
        // Shrink the second triangle so it wants a much lower level
        geometry.coords[3] = Point3f::new(0.0, 0.01, 0.0);
        let settings = AttributeTessellationSettings {
            max_area_of_tessellated_value: 0.001,
            ..AttributeTessellationSettings::default()
        };
        let levels = tessellation_levels(&geometry, &settings);
        assert!(levels[0] >= 3);
        assert_eq!(levels[1] + 1, levels[0]);
    }

    #[test]
    fn test_total_value_budget() {
        let settings = AttributeTessellationSettings {
            max_area_of_tessellated_value: 1e-6,
            max_total_values_count: 100,
            ..AttributeTessellationSettings::default()
        };
        let levels = tessellation_levels(&quad(0.0), &settings);
        let total: usize = levels.iter().map(|&l| tessellated_value_count(l)).sum();
        assert!(total <= 100);
    }

    #[test]
    fn test_displacement_and_subdivision() {
        let source = quad(0.25);
        let mut destination = quad(0.0);
        assign_tessellation(
            &mut destination,
            &AttributeTessellationSettings {
                max_area_of_tessellated_value: 0.2,
                ..AttributeTessellationSettings::default()
            },
        )
        .unwrap();
        let displacement = sample_displacement(&source, &destination, &ProcessContext::new()).unwrap();
        for d in &displacement.displacement {
            assert_relative_eq!(*d, 0.25, epsilon = 1e-5);
        }
        destination.tessellated = Some(displacement);

        let subdivided = tessellated_geometry(&destination).unwrap();
        assert_eq!(subdivided.triangle_count(), 2 * 4);
        assert_eq!(subdivided.vertex_count(), 2 * 6);
        for p in &subdivided.coords {
            assert_relative_eq!(p.z, 0.25, epsilon = 1e-5);
        }
        assert_relative_eq!(subdivided.surface_area(), 1.0, epsilon = 1e-4);
        for t in 0..subdivided.triangle_count() {
            assert!(subdivided.triangle_normal(t).z > 0.99);
        }
    }

    #[test]
    fn test_missing_attributes_are_an_error() {
        let geometry = quad(0.0);
        assert!(tessellated_geometry(&geometry).is_err());
        assert!(sample_displacement(&geometry, &geometry, &ProcessContext::new()).is_err());
    }

    #[test]
    fn test_tessellated_scene_replaces_meshes() {
        let mut scene = Scene::new();
        let mut geometry = quad(0.0);
        assign_tessellation(&mut geometry, &AttributeTessellationSettings::default()).unwrap();
        let node = scene.add_mesh("quad", geometry);
        scene.add_mesh("plain", quad(1.0));
        let tessellated = new_tessellated_scene(&scene).unwrap();
        let replaced = tessellated.geometry(node).unwrap();
        assert!(replaced.tessellated.is_none());
        assert!(replaced.triangle_count() > 2);
        assert_eq!(tessellated.triangle_count(), replaced.triangle_count() + 2);
    }
}
