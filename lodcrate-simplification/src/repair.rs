//! Geometry repair: vertex welding and T-junction removal

use crate::spatial::PointIndex;
use lodcrate_core::{CornerValue, GeometryData, Point3f, ProcessingLog};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Passes of T-junction splitting; each pass splits one edge per triangle
const MAX_T_JUNCTION_PASSES: usize = 8;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepairSettings {
    pub use_welding: bool,
    /// Vertices closer than this are merged
    pub weld_dist: f32,
    pub weld_only_border_vertices: bool,
    /// Only merge vertices whose triangles share a material
    pub weld_only_within_material: bool,
    pub use_t_junction_remover: bool,
    /// A border vertex closer than this to another border edge splits it
    pub t_junction_dist: f32,
    /// Welding runs this many times with the distance growing up to
    /// `weld_dist`
    pub progressive_passes: u32,
}

impl Default for RepairSettings {
    fn default() -> Self {
        Self {
            use_welding: false,
            weld_dist: 0.0,
            weld_only_border_vertices: false,
            weld_only_within_material: false,
            use_t_junction_remover: false,
            t_junction_dist: 0.0,
            progressive_passes: 1,
        }
    }
}

impl RepairSettings {
    pub fn welding(weld_dist: f32) -> Self {
        Self {
            use_welding: true,
            weld_dist,
            ..Self::default()
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.use_welding || self.use_t_junction_remover
    }

    /// Record invalid combinations in `log`. Returns false when repair
    /// cannot run.
    pub fn check(&self, log: &mut ProcessingLog) -> bool {
        let mut ok = true;
        if self.use_t_junction_remover && !self.use_welding {
            log.error("T-junction removal requires welding to be enabled");
            ok = false;
        }
        if self.use_welding && (self.weld_dist < 0.0 || !self.weld_dist.is_finite()) {
            log.error(format!("weld distance must be non-negative, got {}", self.weld_dist));
            ok = false;
        }
        if self.use_t_junction_remover && (self.t_junction_dist < 0.0 || !self.t_junction_dist.is_finite()) {
            log.error(format!("T-junction distance must be non-negative, got {}", self.t_junction_dist));
            ok = false;
        }
        ok
    }
}

/// What a repair pass changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RepairStats {
    pub welded_vertices: usize,
    pub split_triangles: usize,
    pub removed_triangles: usize,
}

/// Run the enabled repair steps on `geometry`. Invalid settings are logged
/// and leave the geometry untouched.
pub fn repair_geometry(geometry: &mut GeometryData, settings: &RepairSettings, log: &mut ProcessingLog) -> RepairStats {
    let mut stats = RepairStats::default();
    if !settings.is_enabled() || !settings.check(log) {
        return stats;
    }

    let passes = settings.progressive_passes.max(1);
    for pass in 1..=passes {
        let dist = settings.weld_dist * pass as f32 / passes as f32;
        let (welded, removed) = weld_vertices(geometry, dist, settings);
        stats.welded_vertices += welded;
        stats.removed_triangles += removed;
    }

    if settings.use_t_junction_remover {
        stats.split_triangles = remove_t_junctions(geometry, settings.t_junction_dist);
        // New splits can meet vertices that are now within welding range
        if stats.split_triangles > 0 {
            let (welded, removed) = weld_vertices(geometry, settings.weld_dist, settings);
            stats.welded_vertices += welded;
            stats.removed_triangles += removed;
        }
    }

    tracing::debug!(
        "repair welded {} vertices, split {} triangles, removed {} degenerate triangles",
        stats.welded_vertices,
        stats.split_triangles,
        stats.removed_triangles
    );
    stats
}

/// Vertices on an open border edge
pub fn border_vertices(geometry: &GeometryData) -> Vec<bool> {
    let mut border = vec![false; geometry.vertex_count()];
    for ((a, b), tris) in geometry.edge_triangles() {
        if tris.len() == 1 {
            border[a as usize] = true;
            border[b as usize] = true;
        }
    }
    border
}

fn vertex_materials(geometry: &GeometryData) -> Vec<BTreeSet<i32>> {
    let mut materials = vec![BTreeSet::new(); geometry.vertex_count()];
    for (t, ids) in geometry.vertex_ids.iter().enumerate() {
        for &v in ids {
            materials[v as usize].insert(geometry.material_id(t));
        }
    }
    materials
}

/// Merge vertices within `dist` of each other. Every cluster collapses to
/// its first vertex at the cluster's mean position; triangles that lose a
/// corner are removed. Returns the merged vertex and removed triangle
/// counts.
pub fn weld_vertices(geometry: &mut GeometryData, dist: f32, settings: &RepairSettings) -> (usize, usize) {
    let nv = geometry.vertex_count();
    if nv == 0 || dist < 0.0 {
        return (0, 0);
    }

    let candidates: Vec<bool> = if settings.weld_only_border_vertices {
        border_vertices(geometry)
    } else {
        vec![true; nv]
    };
    let materials = settings.weld_only_within_material.then(|| vertex_materials(geometry));
    let index = PointIndex::new(
        geometry
            .coords
            .iter()
            .copied()
            .enumerate()
            .filter(|(v, _)| candidates[*v]),
    );

    let mut representative: Vec<usize> = (0..nv).collect();
    let mut clustered = vec![false; nv];
    let mut welded = 0;
    for v in 0..nv {
        if !candidates[v] || clustered[v] {
            continue;
        }
        clustered[v] = true;
        let mut members = vec![v];
        let mut hits = index.within(&geometry.coords[v], dist);
        hits.sort_unstable();
        for u in hits {
            if clustered[u] {
                continue;
            }
            if let Some(materials) = &materials {
                if materials[u].is_disjoint(&materials[v]) {
                    continue;
                }
            }
            clustered[u] = true;
            representative[u] = v;
            members.push(u);
        }
        if members.len() > 1 {
            let sum = members
                .iter()
                .fold(nalgebra::Vector3::zeros(), |acc, &m| acc + geometry.coords[m].coords);
            geometry.coords[v] = Point3f::from(sum / members.len() as f32);
            welded += members.len() - 1;
        }
    }
    if welded == 0 {
        return (0, 0);
    }

    for ids in &mut geometry.vertex_ids {
        for id in ids.iter_mut() {
            *id = representative[*id as usize] as u32;
        }
    }
    let keep: Vec<usize> = (0..geometry.triangle_count())
        .filter(|&t| {
            let [a, b, c] = geometry.vertex_ids[t];
            a != b && b != c && a != c
        })
        .collect();
    let removed = geometry.triangle_count() - keep.len();
    if removed > 0 {
        *geometry = geometry.extract_triangles(&keep);
    }
    geometry.remove_unused_vertices();
    (welded, removed)
}

/// Split triangles whose open border edge passes within `dist` of another
/// border vertex, so the vertex becomes part of the edge. Returns the
/// number of triangles added.
pub fn remove_t_junctions(geometry: &mut GeometryData, dist: f32) -> usize {
    let mut added = 0;
    for _ in 0..MAX_T_JUNCTION_PASSES {
        let splits = find_t_junctions(geometry, dist);
        if splits.is_empty() {
            break;
        }
        added += apply_splits(geometry, &splits);
    }
    added
}

/// Per triangle: the corner index starting the split edge and the vertices
/// to insert ordered along the edge
type EdgeSplits = HashMap<usize, (usize, Vec<(f32, u32)>)>;

fn find_t_junctions(geometry: &GeometryData, dist: f32) -> EdgeSplits {
    let border = border_vertices(geometry);
    let index = PointIndex::new(
        geometry
            .coords
            .iter()
            .copied()
            .enumerate()
            .filter(|(v, _)| border[*v]),
    );

    let mut splits = EdgeSplits::new();
    for ((a, b), tris) in geometry.edge_triangles() {
        let &[t] = tris.as_slice() else {
            continue;
        };
        if splits.contains_key(&t) {
            continue;
        }
        let (pa, pb) = (geometry.coords[a as usize], geometry.coords[b as usize]);
        let edge = pb - pa;
        let len2 = edge.norm_squared();
        if len2 <= f32::EPSILON {
            continue;
        }
        let mid = Point3f::from((pa.coords + pb.coords) * 0.5);
        let mut on_edge: Vec<(f32, u32)> = index
            .within(&mid, edge.norm() * 0.5 + dist)
            .into_iter()
            .filter(|&v| v != a as usize && v != b as usize)
            .filter_map(|v| {
                let p = geometry.coords[v];
                let s = (p - pa).dot(&edge) / len2;
                let closest = pa + edge * s;
                let margin = dist / len2.sqrt();
                (s > margin && s < 1.0 - margin && (p - closest).norm() <= dist).then_some((s, v as u32))
            })
            .collect();
        if on_edge.is_empty() {
            continue;
        }
        on_edge.sort_by(|x, y| x.0.total_cmp(&y.0));
        let ids = geometry.vertex_ids[t];
        let Some(k) = (0..3).find(|&k| {
            let (x, y) = (ids[k], ids[(k + 1) % 3]);
            (x, y) == (a, b) || (x, y) == (b, a)
        }) else {
            continue;
        };
        // Order along the triangle's winding of the edge
        if ids[k] != a {
            on_edge = on_edge.into_iter().rev().map(|(s, v)| (1.0 - s, v)).collect();
        }
        splits.insert(t, (k, on_edge));
    }
    splits
}

fn apply_splits(geometry: &mut GeometryData, splits: &EdgeSplits) -> usize {
    let mut out = geometry.empty_like();
    out.coords = geometry.coords.clone();
    out.bone_weights = geometry.bone_weights.clone();
    let mut added = 0;

    for t in 0..geometry.triangle_count() {
        let ids = geometry.vertex_ids[t];
        let material = geometry.material_id(t);
        let corners: Vec<CornerValue> = (0..3).map(|k| geometry.corner_value(t * 3 + k)).collect();
        let Some((k, inserted)) = splits.get(&t) else {
            out.push_triangle(ids, [&corners[0], &corners[1], &corners[2]], material);
            continue;
        };

        // Fan from the opposite corner over the split edge
        let (start, end, apex) = (*k, (k + 1) % 3, (k + 2) % 3);
        let bary = |s: f32| {
            let mut b = [0.0f32; 3];
            b[start] = 1.0 - s;
            b[end] = s;
            b
        };
        let mut chain: Vec<(u32, CornerValue)> = vec![(ids[start], corners[start].clone())];
        for &(s, v) in inserted {
            chain.push((v, geometry.interpolate_corners(t, bary(s))));
        }
        chain.push((ids[end], corners[end].clone()));
        for pair in chain.windows(2) {
            let (v0, c0) = &pair[0];
            let (v1, c1) = &pair[1];
            let mut tri = [0u32; 3];
            let mut values = [c0, c0, c0];
            tri[start] = *v0;
            values[start] = c0;
            tri[end] = *v1;
            values[end] = c1;
            tri[apex] = ids[apex];
            values[apex] = &corners[apex];
            out.push_triangle(tri, values, material);
        }
        added += inserted.len();
    }
    *geometry = out;
    added
}
