//! Corner normal and tangent calculation
//!
//! Corners around a vertex are grouped into smoothing fans: two triangles
//! sharing an edge at the vertex belong to the same fan when the angle
//! between their face normals is at most the hard edge angle. Each fan gets
//! one normal, the weighted sum of its face normals.

use lodcrate_core::{GeometryData, Point2f, Vector3f};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalCalculationSettings {
    pub replace_normals: bool,
    pub replace_tangents: bool,
    /// Recalculate only zero length or non-finite normals
    pub repair_invalid_normals: bool,
    /// Degrees
    pub hard_edge_angle: f32,
    pub scale_by_area: bool,
    pub scale_by_angle: bool,
    /// Fans whose triangles are coplanar get the exact face normal
    pub snap_normals_to_flat_surfaces: bool,
    pub reorthogonalize_tangent_space: bool,
}

impl Default for NormalCalculationSettings {
    fn default() -> Self {
        Self {
            replace_normals: false,
            replace_tangents: false,
            repair_invalid_normals: false,
            hard_edge_angle: 80.0,
            scale_by_area: true,
            scale_by_angle: true,
            snap_normals_to_flat_surfaces: false,
            reorthogonalize_tangent_space: false,
        }
    }
}

impl NormalCalculationSettings {
    pub fn is_enabled(&self) -> bool {
        self.replace_normals
            || self.replace_tangents
            || self.repair_invalid_normals
            || self.snap_normals_to_flat_surfaces
            || self.reorthogonalize_tangent_space
    }
}

const FLAT_COS: f32 = 0.9999;

/// Apply the normal and tangent settings to a geometry
pub fn apply_normal_settings(geometry: &mut GeometryData, settings: &NormalCalculationSettings) {
    if geometry.is_empty() || !settings.is_enabled() {
        return;
    }
    let fans = SmoothingFans::new(geometry, settings.hard_edge_angle);

    let need_fresh = settings.replace_normals
        || geometry.normals.is_none()
        || settings.repair_invalid_normals
        || settings.snap_normals_to_flat_surfaces;
    if need_fresh {
        let fresh = fans.normals(geometry, settings.scale_by_area, settings.scale_by_angle);
        if settings.replace_normals || geometry.normals.is_none() {
            geometry.normals = Some(fresh);
        } else if let Some(normals) = geometry.normals.as_mut() {
            let mut repaired = 0;
            for (n, f) in normals.iter_mut().zip(&fresh) {
                if settings.repair_invalid_normals && !is_valid_normal(n) {
                    *n = *f;
                    repaired += 1;
                }
            }
            if repaired > 0 {
                tracing::debug!("repaired {} invalid normals", repaired);
            }
        }
    }

    if settings.snap_normals_to_flat_surfaces {
        fans.snap_flat(geometry);
    }

    if settings.replace_tangents || (settings.reorthogonalize_tangent_space && geometry.tangents.is_none()) {
        if !geometry.tex_coords.is_empty() {
            compute_tangents(geometry, &fans, 0);
        }
    } else if settings.reorthogonalize_tangent_space {
        reorthogonalize(geometry);
    }
}

fn is_valid_normal(n: &Vector3f) -> bool {
    n.iter().all(|x| x.is_finite()) && n.norm_squared() > 1e-12
}

/// Corner grouping into smoothing fans
pub struct SmoothingFans {
    /// Fan id of every corner
    pub corner_fan: Vec<usize>,
    pub fan_count: usize,
}

impl SmoothingFans {
    pub fn new(geometry: &GeometryData, hard_edge_angle: f32) -> Self {
        let nv = geometry.vertex_count();
        let mut vertex_faces = vec![Vec::new(); nv];
        for (t, ids) in geometry.vertex_ids.iter().enumerate() {
            for &v in ids {
                vertex_faces[v as usize].push(t);
            }
        }
        let face_normals: Vec<Vector3f> = (0..geometry.triangle_count())
            .map(|t| geometry.triangle_normal(t))
            .collect();
        let min_cos = hard_edge_angle.clamp(0.0, 180.0).to_radians().cos();

        let corner_of = |t: usize, v: usize| -> usize {
            let ids = geometry.vertex_ids[t];
            t * 3 + (0..3).find(|&k| ids[k] as usize == v).unwrap_or(0)
        };

        let mut corner_fan = vec![usize::MAX; geometry.corner_count()];
        let mut fan_count = 0;
        for (v, faces) in vertex_faces.iter().enumerate() {
            for &start in faces {
                if corner_fan[corner_of(start, v)] != usize::MAX {
                    continue;
                }
                let fan = fan_count;
                fan_count += 1;
                corner_fan[corner_of(start, v)] = fan;
                let mut queue = VecDeque::from([start]);
                while let Some(f) = queue.pop_front() {
                    let fv = geometry.vertex_ids[f];
                    for &g in faces {
                        if corner_fan[corner_of(g, v)] != usize::MAX {
                            continue;
                        }
                        let gv = geometry.vertex_ids[g];
                        let shares_edge = fv
                            .iter()
                            .any(|&u| u as usize != v && gv.contains(&u));
                        let soft = face_normals[f].dot(&face_normals[g]) >= min_cos;
                        if shares_edge && soft {
                            corner_fan[corner_of(g, v)] = fan;
                            queue.push_back(g);
                        }
                    }
                }
            }
        }
        Self { corner_fan, fan_count }
    }

    /// One normal per corner
    pub fn normals(&self, geometry: &GeometryData, scale_by_area: bool, scale_by_angle: bool) -> Vec<Vector3f> {
        let mut sums = vec![Vector3f::zeros(); self.fan_count];
        for t in 0..geometry.triangle_count() {
            let face_normal = geometry.triangle_normal(t);
            let area = if scale_by_area { geometry.triangle_area(t) } else { 1.0 };
            let positions = geometry.triangle_positions(t);
            for k in 0..3 {
                let angle = if scale_by_angle {
                    let e0 = positions[(k + 1) % 3] - positions[k];
                    let e1 = positions[(k + 2) % 3] - positions[k];
                    e0.angle(&e1)
                } else {
                    1.0
                };
                let weight = if angle.is_finite() { area * angle } else { 0.0 };
                sums[self.corner_fan[t * 3 + k]] += face_normal * weight;
            }
        }
        (0..geometry.corner_count())
            .map(|c| {
                let n = sums[self.corner_fan[c]];
                let len = n.norm();
                if len > f32::EPSILON {
                    n / len
                } else {
                    geometry.triangle_normal(c / 3)
                }
            })
            .collect()
    }

    /// Replace the normals of coplanar fans with their exact face normal
    fn snap_flat(&self, geometry: &mut GeometryData) {
        let mut reference: Vec<Option<Vector3f>> = vec![None; self.fan_count];
        let mut flat = vec![true; self.fan_count];
        for t in 0..geometry.triangle_count() {
            let n = geometry.triangle_normal(t);
            for c in t * 3..t * 3 + 3 {
                let fan = self.corner_fan[c];
                match reference[fan] {
                    None => reference[fan] = Some(n),
                    Some(r) if r.dot(&n) < FLAT_COS => flat[fan] = false,
                    Some(_) => {}
                }
            }
        }
        let Some(normals) = geometry.normals.as_mut() else {
            return;
        };
        for (c, n) in normals.iter_mut().enumerate() {
            let fan = self.corner_fan[c];
            if let (true, Some(r)) = (flat[fan], reference[fan]) {
                if r.norm_squared() > 0.0 {
                    *n = r;
                }
            }
        }
    }
}

/// Tangents and bitangents from the gradients of a texture coordinate
/// level, accumulated per smoothing fan and orthogonalized against the
/// corner normals
pub fn compute_tangents(geometry: &mut GeometryData, fans: &SmoothingFans, level: usize) {
    let Some(uvs) = geometry.tex_coords.get(level).map(|l| l.values.clone()) else {
        return;
    };
    let normals = match &geometry.normals {
        Some(n) => n.clone(),
        None => fans.normals(geometry, true, true),
    };

    let mut tangent_sums = vec![Vector3f::zeros(); fans.fan_count];
    let mut bitangent_sums = vec![Vector3f::zeros(); fans.fan_count];
    for t in 0..geometry.triangle_count() {
        let Some((tangent, bitangent)) = triangle_tangent(geometry, t, &uvs) else {
            continue;
        };
        for c in t * 3..t * 3 + 3 {
            tangent_sums[fans.corner_fan[c]] += tangent;
            bitangent_sums[fans.corner_fan[c]] += bitangent;
        }
    }

    let mut tangents = Vec::with_capacity(geometry.corner_count());
    let mut bitangents = Vec::with_capacity(geometry.corner_count());
    for c in 0..geometry.corner_count() {
        let n = normals[c];
        let fan = fans.corner_fan[c];
        let (t, b) = orthogonalize(&n, &tangent_sums[fan], &bitangent_sums[fan]);
        tangents.push(t);
        bitangents.push(b);
    }
    geometry.tangents = Some(tangents);
    geometry.bitangents = Some(bitangents);
}

fn triangle_tangent(geometry: &GeometryData, t: usize, uvs: &[Point2f]) -> Option<(Vector3f, Vector3f)> {
    let [p0, p1, p2] = geometry.triangle_positions(t);
    let (w0, w1, w2) = (uvs[t * 3], uvs[t * 3 + 1], uvs[t * 3 + 2]);
    let (e1, e2) = (p1 - p0, p2 - p0);
    let (d1, d2) = (w1 - w0, w2 - w0);
    let det = d1.x * d2.y - d2.x * d1.y;
    if det.abs() <= f32::EPSILON {
        return None;
    }
    let r = 1.0 / det;
    let tangent = (e1 * d2.y - e2 * d1.y) * r;
    let bitangent = (e2 * d1.x - e1 * d2.x) * r;
    Some((tangent, bitangent))
}

/// Gram-Schmidt: tangent perpendicular to the normal, bitangent the cross
/// product with the handedness of the input bitangent
fn orthogonalize(n: &Vector3f, tangent: &Vector3f, bitangent: &Vector3f) -> (Vector3f, Vector3f) {
    let mut t = tangent - n * n.dot(tangent);
    if t.norm_squared() <= 1e-12 {
        // Any direction perpendicular to the normal
        let axis = if n.x.abs() < 0.9 { Vector3f::x() } else { Vector3f::y() };
        t = axis - n * n.dot(&axis);
    }
    let t = t.try_normalize(1e-12).unwrap_or_else(Vector3f::x);
    let b = n.cross(&t);
    let b = if b.dot(bitangent) < 0.0 { -b } else { b };
    (t, b)
}

fn reorthogonalize(geometry: &mut GeometryData) {
    let (Some(normals), Some(tangents)) = (geometry.normals.as_ref(), geometry.tangents.as_mut()) else {
        return;
    };
    let bitangents = geometry
        .bitangents
        .get_or_insert_with(|| vec![Vector3f::zeros(); normals.len()]);
    for c in 0..normals.len() {
        let (t, b) = orthogonalize(&normals[c], &tangents[c], &bitangents[c]);
        tangents[c] = t;
        bitangents[c] = b;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use lodcrate_core::Point3f;

    /// Unit cube with eight shared vertices
    fn make_cube() -> GeometryData {
        let coords = vec![
            Point3f::new(0.0, 0.0, 0.0),
            Point3f::new(1.0, 0.0, 0.0),
            Point3f::new(1.0, 1.0, 0.0),
            Point3f::new(0.0, 1.0, 0.0),
            Point3f::new(0.0, 0.0, 1.0),
            Point3f::new(1.0, 0.0, 1.0),
            Point3f::new(1.0, 1.0, 1.0),
            Point3f::new(0.0, 1.0, 1.0),
        ];
        let ids = vec![
            [0, 2, 1], [0, 3, 2], // bottom
            [4, 5, 6], [4, 6, 7], // top
            [0, 1, 5], [0, 5, 4], // front
            [2, 3, 7], [2, 7, 6], // back
            [0, 4, 7], [0, 7, 3], // left
            [1, 2, 6], [1, 6, 5], // right
        ];
        GeometryData::from_triangles(coords, ids)
    }

    #[test]
    fn test_hard_edges_split_fans() {
        let mut cube = make_cube();
        let settings = NormalCalculationSettings {
            replace_normals: true,
            hard_edge_angle: 60.0,
            ..NormalCalculationSettings::default()
        };
        apply_normal_settings(&mut cube, &settings);
        let normals = cube.normals.as_ref().unwrap();
        for t in 0..cube.triangle_count() {
            let face = cube.triangle_normal(t);
            for c in t * 3..t * 3 + 3 {
                assert_relative_eq!(normals[c], face, epsilon = 1e-5);
            }
        }
    }

    #[test]
    fn test_soft_edges_average() {
        let mut cube = make_cube();
        let settings = NormalCalculationSettings {
            replace_normals: true,
            hard_edge_angle: 100.0,
            scale_by_area: false,
            scale_by_angle: false,
            ..NormalCalculationSettings::default()
        };
        apply_normal_settings(&mut cube, &settings);
        let normals = cube.normals.as_ref().unwrap();
        // Corner at vertex 6 points away from the cube center
        let c = (0..cube.corner_count()).find(|&c| cube.corner_vertex(c) == 6).unwrap();
        let expected = Vector3f::new(1.0, 1.0, 1.0).normalize();
        assert!(normals[c].dot(&expected) > 0.95);
    }

    #[test]
    fn test_repair_invalid_normals_only() {
        let mut cube = make_cube();
        cube.add_normals();
        let normals = cube.normals.as_mut().unwrap();
        for n in normals.iter_mut() {
            *n = Vector3f::new(0.0, 0.0, 1.0);
        }
        normals[0] = Vector3f::new(f32::NAN, 0.0, 0.0);
        let settings = NormalCalculationSettings {
            repair_invalid_normals: true,
            ..NormalCalculationSettings::default()
        };
        apply_normal_settings(&mut cube, &settings);
        let normals = cube.normals.as_ref().unwrap();
        assert!(is_valid_normal(&normals[0]));
        assert_eq!(normals[1], Vector3f::new(0.0, 0.0, 1.0));
    }

    #[test]
    fn test_tangents_follow_uv_gradient() {
        let mut quad = GeometryData::from_triangles(
            vec![
                Point3f::new(0.0, 0.0, 0.0),
                Point3f::new(1.0, 0.0, 0.0),
                Point3f::new(1.0, 1.0, 0.0),
                Point3f::new(0.0, 1.0, 0.0),
            ],
            vec![[0, 1, 2], [0, 2, 3]],
        );
        let level = quad.add_tex_coords("uv");
        for c in 0..quad.corner_count() {
            let p = quad.coords[quad.corner_vertex(c)];
            quad.tex_coords[level].values[c] = Point2f::new(p.x, p.y);
        }
        let settings = NormalCalculationSettings {
            replace_normals: true,
            replace_tangents: true,
            ..NormalCalculationSettings::default()
        };
        apply_normal_settings(&mut quad, &settings);
        for t in quad.tangents.as_ref().unwrap() {
            assert_relative_eq!(*t, Vector3f::x(), epsilon = 1e-5);
        }
        for b in quad.bitangents.as_ref().unwrap() {
            assert_relative_eq!(*b, Vector3f::y(), epsilon = 1e-5);
        }
    }
}
