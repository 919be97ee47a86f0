//! Edge collapse reduction
//!
//! Iterative edge collapse over a corner based [`HalfEdgeMesh`] with quadric
//! error metrics for edge prioritization. Besides the geometric quadric each
//! vertex carries a penalty quadric built from border and attribute seam
//! edges, so seams resist being moved. Corner attributes of the surviving
//! corners are re-interpolated from the triangle of the old neighbourhood
//! closest to the new position, restricted to triangles that shared the
//! corner's attribute values.

use crate::half_edge::HalfEdgeMesh;
use crate::quadric_error::Quadric;
use crate::settings::{ReductionHeuristics, ReductionSettings};
use crate::symmetry::SymmetryPlane;
use lodcrate_core::{
    closest_point_on_triangle, Bounded, CornerValue, Error, GeometryData, Point3f, ProcessContext,
    Result,
};
use priority_queue::PriorityQueue;
use std::cmp::Ordering;

/// Weight of the perpendicular planes holding open borders in place
const BORDER_WEIGHT: f64 = 10.0;
/// Fast heuristics rebuild the whole queue after this many collapses
const REBUILD_INTERVAL: usize = 100;
/// Queue pops between progress reports and cancellation checks
const CHECK_INTERVAL: usize = 256;
const MIN_VISIBILITY_WEIGHT: f32 = 0.01;
const UV_EPSILON: f32 = 1e-5;
const NORMAL_COS_EPSILON: f32 = 0.9999;
const COLOR_EPSILON: f32 = 1e-4;

/// Per-run inputs of the reducer besides its settings
#[derive(Debug, Clone)]
pub struct ReductionConstraints {
    /// Vertices that must neither move nor be removed; empty for none
    pub locked_vertices: Vec<bool>,
    /// Visibility in `[0, 1]` per triangle
    pub triangle_visibility: Option<Vec<f32>>,
    pub visibility_power: f32,
    /// Scale from node space to world space, for deviation targets
    pub world_scale: f32,
    /// World space diameter for on-screen size targets; the geometry's own
    /// bounds are used when zero
    pub world_diameter: f32,
}

impl Default for ReductionConstraints {
    fn default() -> Self {
        Self {
            locked_vertices: Vec::new(),
            triangle_visibility: None,
            visibility_power: 1.0,
            world_scale: 1.0,
            world_diameter: 0.0,
        }
    }
}

impl ReductionConstraints {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Result of reducing one geometry
#[derive(Debug, Clone)]
pub struct ReductionOutcome {
    pub geometry: GeometryData,
    pub collapses: usize,
    /// Largest deviation estimate of an applied collapse, in world units
    pub max_deviation: f32,
}

// ============================================================
// Edge Cost for Priority Queue
// ============================================================

#[derive(Debug, Clone, Copy)]
struct EdgeCost {
    keep: usize,
    remove: usize,
    position: Point3f,
    cost: f64,
    /// Geometric deviation estimate in node space
    deviation: f64,
}

impl PartialEq for EdgeCost {
    fn eq(&self, other: &Self) -> bool {
        self.cost.total_cmp(&other.cost) == Ordering::Equal
    }
}
impl Eq for EdgeCost {}

impl PartialOrd for EdgeCost {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for EdgeCost {
    fn cmp(&self, other: &Self) -> Ordering {
        // Min-heap: smallest cost first
        other.cost.total_cmp(&self.cost)
    }
}

type EdgeKey = (usize, usize);

#[inline]
fn edge_key(a: usize, b: usize) -> EdgeKey {
    (a.min(b), a.max(b))
}

enum MirrorCheck {
    /// No mirrored collapse is needed
    Unpaired,
    Paired(EdgeCost),
    /// The mirrored collapse is impossible, so the collapse is skipped
    Blocked,
}

// ============================================================
// Reduction State
// ============================================================

struct ReductionState<'a> {
    settings: &'a ReductionSettings,
    hem: HalfEdgeMesh,
    /// Corner channels, material ids and bone weights of the input, updated
    /// in place
    work: GeometryData,
    geometric: Vec<Quadric>,
    penalty: Vec<Quadric>,
    locked: Vec<bool>,
    vertex_visibility: Option<Vec<f32>>,
    visibility_power: f32,
    symmetry: Option<SymmetryPlane>,
    mirror: Vec<Option<usize>>,
    on_plane: Vec<bool>,
    has_corner_channels: bool,
    min_flip_cos: f32,
}

impl<'a> ReductionState<'a> {
    fn new(settings: &'a ReductionSettings, geometry: &GeometryData, constraints: &ReductionConstraints) -> Result<Self> {
        let nv = geometry.vertex_count();
        let locked = match constraints.locked_vertices.len() {
            0 => vec![false; nv],
            n if n == nv => constraints.locked_vertices.clone(),
            n => {
                return Err(Error::InvalidData(format!(
                    "{} locked vertex flags for a geometry with {} vertices",
                    n, nv
                )))
            }
        };

        let vertex_visibility = match &constraints.triangle_visibility {
            None => None,
            Some(values) if values.len() != geometry.triangle_count() => {
                return Err(Error::InvalidData(format!(
                    "{} visibility values for a geometry with {} triangles",
                    values.len(),
                    geometry.triangle_count()
                )))
            }
            Some(values) => {
                let mut per_vertex = vec![0.0f32; nv];
                for (ids, &vis) in geometry.vertex_ids.iter().zip(values) {
                    for &v in ids {
                        per_vertex[v as usize] = per_vertex[v as usize].max(vis);
                    }
                }
                Some(per_vertex)
            }
        };

        let symmetry = SymmetryPlane::from_settings(settings, &geometry.coords);
        let (mirror, on_plane) = match &symmetry {
            Some(plane) => (
                plane.mirror_map(&geometry.coords),
                geometry.coords.iter().map(|p| plane.contains(p)).collect(),
            ),
            None => (vec![None; nv], vec![false; nv]),
        };

        let mut state = Self {
            settings,
            hem: HalfEdgeMesh::from_geometry(geometry),
            work: geometry.clone(),
            geometric: vec![Quadric::zero(); nv],
            penalty: vec![Quadric::zero(); nv],
            locked,
            vertex_visibility,
            visibility_power: constraints.visibility_power,
            symmetry,
            mirror,
            on_plane,
            has_corner_channels: geometry.normals.is_some()
                || geometry.tangents.is_some()
                || !geometry.tex_coords.is_empty()
                || !geometry.colors.is_empty(),
            min_flip_cos: settings.max_normal_flip_angle.clamp(0.0, 180.0).to_radians().cos(),
        };
        state.initialize_quadrics();
        Ok(state)
    }

    fn initialize_quadrics(&mut self) {
        let geometry = &self.work;
        for t in 0..geometry.triangle_count() {
            let [a, b, c] = geometry.triangle_positions(t);
            if let Some(q) = Quadric::from_triangle(&a, &b, &c, 1.0) {
                for &v in &geometry.vertex_ids[t] {
                    self.geometric[v as usize] += q;
                }
            }
        }

        let border_weight = BORDER_WEIGHT * self.settings.group_importance as f64;
        for ((a, b), tris) in geometry.edge_triangles() {
            let (a, b) = (a as usize, b as usize);
            let (pa, pb) = (geometry.coords[a], geometry.coords[b]);
            match tris.as_slice() {
                [t] => {
                    let normal = geometry.triangle_normal(*t);
                    if let Some(q) = Quadric::edge_constraint(&pa, &pb, &normal, 1.0) {
                        self.geometric[a] += q;
                        self.geometric[b] += q;
                        let extra = Quadric(q.0 * border_weight);
                        self.penalty[a] += extra;
                        self.penalty[b] += extra;
                    }
                    if self.settings.lock_geometric_border {
                        self.locked[a] = true;
                        self.locked[b] = true;
                    }
                }
                [f, g] => {
                    let weight = self.seam_weight(a, b, *f, *g);
                    if weight > 0.0 {
                        for t in [*f, *g] {
                            let normal = geometry.triangle_normal(t);
                            if let Some(q) = Quadric::edge_constraint(&pa, &pb, &normal, weight * 0.5) {
                                self.penalty[a] += q;
                                self.penalty[b] += q;
                            }
                        }
                    }
                }
                _ => {
                    // Non-manifold edge
                    self.locked[a] = true;
                    self.locked[b] = true;
                }
            }
        }
    }

    fn corner(&self, f: usize, v: usize) -> usize {
        self.hem.corner_of(f, v).unwrap_or(f * 3)
    }

    /// Importance weighted discontinuity of the edge `a - b` between faces
    /// `f` and `g`
    fn seam_weight(&self, a: usize, b: usize, f: usize, g: usize) -> f64 {
        let s = self.settings;
        let pairs = [
            (self.corner(f, a), self.corner(g, a)),
            (self.corner(f, b), self.corner(g, b)),
        ];
        let mut weight = 0.0;
        if self.work.material_id(f) != self.work.material_id(g) {
            weight += s.material_importance;
        }
        if pairs.iter().any(|&(x, y)| self.uv_differs(x, y)) {
            weight += s.texture_importance;
        }
        if pairs.iter().any(|&(x, y)| self.normal_differs(x, y)) {
            weight += s.shading_importance;
        }
        if pairs.iter().any(|&(x, y)| self.color_differs(x, y)) {
            weight += s.vertex_color_importance;
        }
        weight as f64
    }

    fn uv_differs(&self, c0: usize, c1: usize) -> bool {
        self.work
            .tex_coords
            .iter()
            .any(|l| (l.values[c0] - l.values[c1]).norm() > UV_EPSILON)
    }

    fn normal_differs(&self, c0: usize, c1: usize) -> bool {
        self.work
            .normals
            .as_ref()
            .is_some_and(|n| n[c0].dot(&n[c1]) < NORMAL_COS_EPSILON * n[c0].norm() * n[c1].norm())
    }

    fn color_differs(&self, c0: usize, c1: usize) -> bool {
        self.work.colors.iter().any(|s| {
            let (x, y) = (s.values[c0].to_array(), s.values[c1].to_array());
            x.iter().zip(&y).any(|(a, b)| (a - b).abs() > COLOR_EPSILON)
        })
    }

    fn same_wedge(&self, c0: usize, c1: usize) -> bool {
        !self.uv_differs(c0, c1) && !self.normal_differs(c0, c1) && !self.color_differs(c0, c1)
    }

    /// Importance weighted squared change of a corner's attributes
    fn corner_change(&self, old: &CornerValue, new: &CornerValue) -> f64 {
        let s = self.settings;
        let mut change = 0.0f32;
        for (a, b) in old.tex_coords.iter().zip(&new.tex_coords) {
            change += s.texture_importance * (a - b).norm_squared();
        }
        if let (Some(a), Some(b)) = (old.normal, new.normal) {
            change += s.shading_importance * (a - b).norm_squared();
        }
        for (a, b) in old.colors.iter().zip(&new.colors) {
            let (a, b) = (a.to_array(), b.to_array());
            change += s.vertex_color_importance * a.iter().zip(&b).map(|(x, y)| (x - y) * (x - y)).sum::<f32>();
        }
        change as f64
    }

    fn bone_distance(&self, a: usize, b: usize) -> f64 {
        let Some(bones) = &self.work.bone_weights else {
            return 0.0;
        };
        let (wa, wb) = (bones.influences(a), bones.influences(b));
        let weight_of = |list: &[(i32, f32)], bone: i32| {
            list.iter().find(|(id, _)| *id == bone).map_or(0.0, |(_, w)| *w)
        };
        let mut distance = 0.0f32;
        for &(bone, w) in &wa {
            distance += (w - weight_of(&wb, bone)).abs();
        }
        for &(bone, w) in &wb {
            if !wa.iter().any(|(id, _)| *id == bone) {
                distance += w;
            }
        }
        distance as f64
    }

    /// Faces around either endpoint, each once
    fn neighborhood(&self, keep: usize, remove: usize) -> Vec<usize> {
        let mut faces = self.hem.vertex_faces(keep).to_vec();
        faces.extend(
            self.hem
                .vertex_faces(remove)
                .iter()
                .filter(|&&f| !self.hem.face_vertices(f).contains(&keep)),
        );
        faces
    }

    /// New values of the corners that survive the collapse at the two
    /// endpoints
    fn reinterpolate(&self, keep: usize, remove: usize, p: &Point3f) -> Vec<(usize, CornerValue)> {
        let faces = self.neighborhood(keep, remove);
        let mut updates = Vec::new();
        for &f in &faces {
            let vs = self.hem.face_vertices(f);
            if vs.contains(&keep) && vs.contains(&remove) {
                continue;
            }
            let Some(c) = self.hem.corner_of(f, keep).or_else(|| self.hem.corner_of(f, remove)) else {
                continue;
            };
            let old_vertex = self.hem.source(c);
            let material = self.work.material_id(f);

            let mut best: Option<(f32, usize, [f32; 3])> = None;
            for &g in &faces {
                if self.work.material_id(g) != material {
                    continue;
                }
                let Some(cg) = self.hem.corner_of(g, old_vertex) else {
                    continue;
                };
                if g != f && !self.same_wedge(c, cg) {
                    continue;
                }
                let tri = self.hem.face_vertices(g).map(|v| self.hem.positions[v]);
                let (closest, bary) = closest_point_on_triangle(p, &tri);
                let d = (closest - p).norm_squared();
                if best.map_or(true, |(bd, _, _)| d < bd) {
                    best = Some((d, g, bary));
                }
            }
            if let Some((_, g, bary)) = best {
                updates.push((c, self.work.interpolate_corners(g, bary)));
            }
        }
        updates
    }

    /// No surviving face degenerates or turns past the flip angle
    fn flip_ok(&self, keep: usize, remove: usize, p: &Point3f) -> bool {
        for f in self.neighborhood(keep, remove) {
            let vs = self.hem.face_vertices(f);
            if vs.contains(&keep) && vs.contains(&remove) {
                continue;
            }
            let before = self.hem.face_cross(f);
            let after = self.hem.face_cross_moved(f, [keep, remove], p);
            let (lb, la) = (before.norm(), after.norm());
            if lb <= f32::EPSILON {
                continue;
            }
            if la <= lb * 1e-6 || before.dot(&after) < self.min_flip_cos * lb * la {
                return false;
            }
        }
        true
    }

    fn cost(&self, keep: usize, remove: usize, p: &Point3f) -> (f64, f64) {
        let geometric = (self.geometric[keep] + self.geometric[remove]).error(p);
        let penalty = (self.penalty[keep] + self.penalty[remove]).error(p);
        let mut cost = self.settings.geometry_importance as f64 * geometric + penalty;

        let edge_len2 = (self.hem.positions[keep] - self.hem.positions[remove]).norm_squared() as f64;
        if self.has_corner_channels {
            for (c, value) in self.reinterpolate(keep, remove, p) {
                cost += self.corner_change(&self.work.corner_value(c), &value) * edge_len2;
            }
        }
        if self.work.bone_weights.is_some() {
            cost += self.settings.skinning_importance as f64 * self.bone_distance(keep, remove) * edge_len2;
        }
        if let Some(visibility) = &self.vertex_visibility {
            let v = visibility[keep].max(visibility[remove]).max(MIN_VISIBILITY_WEIGHT);
            cost *= v.powf(self.visibility_power) as f64;
        }
        (cost, geometric.sqrt())
    }

    /// Cheapest valid way to collapse the edge `a - b`
    fn evaluate(&self, a: usize, b: usize) -> Option<EdgeCost> {
        if !self.hem.is_vertex_alive(a) || !self.hem.is_vertex_alive(b) {
            return None;
        }
        let (pa, pb) = (self.hem.positions[a], self.hem.positions[b]);
        let options: Vec<(usize, usize, Point3f)> = match (self.locked[a], self.locked[b]) {
            (true, true) => return None,
            (true, false) => vec![(a, b, pa)],
            (false, true) => vec![(b, a, pb)],
            (false, false) => {
                let mut positions = vec![pa, pb, Point3f::from((pa.coords + pb.coords) * 0.5)];
                let q = Quadric(
                    (self.geometric[a] + self.geometric[b]).0 * self.settings.geometry_importance as f64
                        + (self.penalty[a] + self.penalty[b]).0,
                );
                if let Some(p) = q.minimizer() {
                    positions.push(p);
                }
                if let Some(plane) = &self.symmetry {
                    if self.on_plane[a] || self.on_plane[b] || self.mirror[a] == Some(b) {
                        for p in &mut positions {
                            *p = plane.project(p);
                        }
                    }
                }
                positions.into_iter().map(|p| (a, b, p)).collect()
            }
        };

        options
            .into_iter()
            .filter(|(keep, remove, p)| self.flip_ok(*keep, *remove, p))
            .map(|(keep, remove, position)| {
                let (cost, deviation) = self.cost(keep, remove, &position);
                EdgeCost {
                    keep,
                    remove,
                    position,
                    cost,
                    deviation,
                }
            })
            .min_by(|x, y| x.cost.total_cmp(&y.cost))
    }

    fn can_collapse(&self, keep: usize, remove: usize) -> bool {
        let shared = self.hem.edge_faces(keep, remove).len();
        shared > 0
            && self.hem.active_face_count() > shared
            && !self.locked[remove]
            && self.hem.check_link_condition(keep, remove)
            && !self.hem.collapse_creates_duplicate(keep, remove)
    }

    fn mirrored(&self, entry: &EdgeCost) -> MirrorCheck {
        let Some(plane) = &self.symmetry else {
            return MirrorCheck::Unpaired;
        };
        let (Some(mk), Some(mr)) = (self.mirror[entry.keep], self.mirror[entry.remove]) else {
            return MirrorCheck::Unpaired;
        };
        if edge_key(mk, mr) == edge_key(entry.keep, entry.remove) {
            return MirrorCheck::Unpaired;
        }
        if mk == mr || !self.hem.is_vertex_alive(mk) || !self.hem.is_vertex_alive(mr) {
            return MirrorCheck::Blocked;
        }
        let position = plane.reflect(&entry.position);
        if (self.locked[mk] && (self.hem.positions[mk] - position).norm() > plane.tolerance)
            || !self.can_collapse(mk, mr)
            || !self.flip_ok(mk, mr, &position)
        {
            return MirrorCheck::Blocked;
        }
        let (cost, deviation) = self.cost(mk, mr, &position);
        MirrorCheck::Paired(EdgeCost {
            keep: mk,
            remove: mr,
            position,
            cost,
            deviation,
        })
    }

    fn apply(&mut self, entry: &EdgeCost) {
        let (keep, remove, p) = (entry.keep, entry.remove, entry.position);
        let updates = if self.has_corner_channels {
            self.reinterpolate(keep, remove, &p)
        } else {
            Vec::new()
        };

        if let Some(bones) = self.work.bone_weights.as_mut() {
            let da = (p - self.hem.positions[keep]).norm();
            let db = (p - self.hem.positions[remove]).norm();
            let t = if da + db > f32::EPSILON { da / (da + db) } else { 0.5 };
            let mut merged: Vec<(i32, f32)> = Vec::new();
            for (bone, w) in bones
                .influences(keep)
                .into_iter()
                .map(|(b, w)| (b, w * (1.0 - t)))
                .chain(bones.influences(remove).into_iter().map(|(b, w)| (b, w * t)))
            {
                match merged.iter_mut().find(|(id, _)| *id == bone) {
                    Some((_, acc)) => *acc += w,
                    None => merged.push((bone, w)),
                }
            }
            bones.set_influences(keep, &merged);
            bones.normalize_vertex(keep);
        }

        self.hem.collapse_edge(keep, remove, p);
        for (c, value) in updates {
            self.work.set_corner_value(c, &value);
        }

        let (gr, pr) = (self.geometric[remove], self.penalty[remove]);
        self.geometric[keep] += gr;
        self.penalty[keep] += pr;
        if let Some(visibility) = self.vertex_visibility.as_mut() {
            visibility[keep] = visibility[keep].max(visibility[remove]);
        }
        if self.on_plane[remove] {
            self.on_plane[keep] = true;
            self.mirror[keep] = Some(keep);
        }
    }

    fn build_queue(&self) -> PriorityQueue<EdgeKey, EdgeCost> {
        let mut queue = PriorityQueue::new();
        for (_, vs) in self.hem.alive_faces() {
            for k in 0..3 {
                let key = edge_key(vs[k], vs[(k + 1) % 3]);
                if queue.get(&key).is_some() {
                    continue;
                }
                if let Some(cost) = self.evaluate(key.0, key.1) {
                    queue.push(key, cost);
                }
            }
        }
        queue
    }

    fn into_geometry(self) -> GeometryData {
        let mut out = self.work.empty_like();
        let mut remap = vec![u32::MAX; self.hem.vertex_count()];
        let mut kept_vertices = Vec::new();
        for (f, vs) in self.hem.alive_faces() {
            let ids = vs.map(|v| {
                if remap[v] == u32::MAX {
                    remap[v] = out.coords.len() as u32;
                    out.coords.push(self.hem.positions[v]);
                    kept_vertices.push(v);
                }
                remap[v]
            });
            let corners = [
                self.work.corner_value(f * 3),
                self.work.corner_value(f * 3 + 1),
                self.work.corner_value(f * 3 + 2),
            ];
            out.push_triangle(ids, [&corners[0], &corners[1], &corners[2]], self.work.material_id(f));
        }
        if let (Some(dst), Some(src)) = (out.bone_weights.as_mut(), self.work.bone_weights.as_ref()) {
            *dst = lodcrate_core::BoneWeights::new(kept_vertices.len(), src.bones_per_vertex);
            for (new, &old) in kept_vertices.iter().enumerate() {
                dst.set_influences(new, &src.influences(old));
            }
        }
        out
    }
}

// ============================================================
// Edge Collapse Reducer
// ============================================================

/// Edge collapse reducer using a half-edge mesh and quadric error metrics.
///
/// The reducer removes vertices until the enabled targets of its
/// [`ReductionSettings`] are reached. It never adds triangles.
#[derive(Debug, Clone, Default)]
pub struct EdgeCollapseReducer {
    pub settings: ReductionSettings,
}

impl EdgeCollapseReducer {
    pub fn new(settings: ReductionSettings) -> Self {
        Self { settings }
    }

    /// Reduce to a triangle ratio with otherwise default settings
    pub fn with_triangle_ratio(ratio: f32) -> Self {
        Self::new(ReductionSettings::with_targets(crate::ReductionTargets::triangle_ratio(ratio)))
    }

    pub fn reduce(
        &self,
        geometry: &GeometryData,
        constraints: &ReductionConstraints,
        ctx: &ProcessContext,
    ) -> Result<ReductionOutcome> {
        self.settings.validate()?;
        geometry.validate()?;
        let unchanged = || ReductionOutcome {
            geometry: geometry.clone(),
            collapses: 0,
            max_deviation: 0.0,
        };
        if geometry.is_empty() || !self.settings.targets.any_enabled() {
            return Ok(unchanged());
        }

        let input = geometry.triangle_count();
        let targets = &self.settings.targets;
        let scale = if constraints.world_scale > 0.0 { constraints.world_scale } else { 1.0 };
        let diameter = if constraints.world_diameter > 0.0 {
            constraints.world_diameter
        } else {
            geometry.bounding_box().diagonal() * scale
        };
        let triangle_budget = targets.triangle_budget(input);
        let deviation_budget = targets.deviation_budget(diameter).map(|d| (d / scale) as f64);
        if triangle_budget.is_some_and(|b| b >= input) && deviation_budget.is_none() {
            return Ok(unchanged());
        }

        let mut state = ReductionState::new(&self.settings, geometry, constraints)?;
        let mut queue = state.build_queue();
        let span = triangle_budget.map_or(input, |b| input.saturating_sub(b)).max(1);
        let mut collapses = 0usize;
        let mut since_rebuild = 0usize;
        let mut max_deviation = 0.0f64;
        let mut pops = 0usize;

        loop {
            pops += 1;
            if pops % CHECK_INTERVAL == 0 {
                let removed = input - state.hem.active_face_count();
                ctx.step(100.0 * removed as f32 / span as f32)?;
            }

            let Some((_, top)) = queue.peek() else {
                break;
            };
            let mut reached = Vec::with_capacity(2);
            if let Some(budget) = triangle_budget {
                reached.push(state.hem.active_face_count() <= budget);
            }
            if let Some(budget) = deviation_budget {
                reached.push(top.deviation > budget);
            }
            if targets.stop_condition.is_satisfied(&reached) {
                break;
            }

            let Some((key, entry)) = queue.pop() else {
                break;
            };
            if !state.hem.is_vertex_alive(entry.keep)
                || !state.hem.is_vertex_alive(entry.remove)
                || state.hem.edge_faces(entry.keep, entry.remove).is_empty()
            {
                continue;
            }

            let current = match self.settings.reduction_heuristics {
                ReductionHeuristics::Consistent => {
                    let Some(fresh) = state.evaluate(key.0, key.1) else {
                        continue;
                    };
                    if fresh.cost > entry.cost * (1.0 + 1e-9) + 1e-15 {
                        queue.push(key, fresh);
                        continue;
                    }
                    fresh
                }
                ReductionHeuristics::Fast => {
                    let stale = state.locked[entry.remove]
                        || (state.locked[entry.keep] && state.hem.positions[entry.keep] != entry.position)
                        || !state.flip_ok(entry.keep, entry.remove, &entry.position);
                    if stale {
                        if let Some(fresh) = state.evaluate(key.0, key.1) {
                            queue.push(key, fresh);
                        }
                        continue;
                    }
                    entry
                }
            };

            if !state.can_collapse(current.keep, current.remove) {
                continue;
            }
            let mirrored = match state.mirrored(&current) {
                MirrorCheck::Blocked => continue,
                MirrorCheck::Unpaired => None,
                MirrorCheck::Paired(m) => Some(m),
            };

            state.apply(&current);
            collapses += 1;
            since_rebuild += 1;
            max_deviation = max_deviation.max(current.deviation);
            let mut touched = vec![current.keep];

            if let Some(m) = mirrored {
                if state.can_collapse(m.keep, m.remove) && state.flip_ok(m.keep, m.remove, &m.position) {
                    state.apply(&m);
                    collapses += 1;
                    since_rebuild += 1;
                    max_deviation = max_deviation.max(m.deviation);
                    touched.push(m.keep);
                }
            }

            match self.settings.reduction_heuristics {
                ReductionHeuristics::Consistent => {
                    for &v in &touched {
                        for n in state.hem.neighbors(v) {
                            let key = edge_key(v, n);
                            match state.evaluate(key.0, key.1) {
                                Some(cost) => {
                                    queue.push(key, cost);
                                }
                                None => {
                                    queue.remove(&key);
                                }
                            }
                        }
                    }
                }
                ReductionHeuristics::Fast => {
                    if since_rebuild >= REBUILD_INTERVAL {
                        queue = state.build_queue();
                        since_rebuild = 0;
                    } else {
                        for &v in &touched {
                            for n in state.hem.neighbors(v) {
                                let key = edge_key(v, n);
                                if queue.get(&key).is_none() {
                                    if let Some(cost) = state.evaluate(key.0, key.1) {
                                        queue.push(key, cost);
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }

        ctx.report(100.0);
        let output = state.into_geometry();
        tracing::debug!(
            "reduced {} -> {} triangles ({} collapses, max deviation {:.6})",
            input,
            output.triangle_count(),
            collapses,
            max_deviation * scale as f64
        );
        Ok(ReductionOutcome {
            geometry: output,
            collapses,
            max_deviation: (max_deviation * scale as f64) as f32,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{ReductionTargets, StopCondition, SymmetryAxis};
    use approx::assert_relative_eq;
    use lodcrate_core::{Point2f, Transform3D, Transformable, Vector3f};

    fn make_plane_grid(size: u32) -> GeometryData {
        let mut coords = Vec::new();
        for y in 0..size {
            for x in 0..size {
                coords.push(Point3f::new(x as f32, y as f32, 0.0));
            }
        }
        let mut ids = Vec::new();
        for y in 0..size - 1 {
            for x in 0..size - 1 {
                let tl = y * size + x;
                let tr = tl + 1;
                let bl = (y + 1) * size + x;
                let br = bl + 1;
                ids.push([tl, bl, tr]);
                ids.push([tr, bl, br]);
            }
        }
        GeometryData::from_triangles(coords, ids)
    }

    fn make_curved_surface(size: u32) -> GeometryData {
        let mut geom = make_plane_grid(size);
        for p in &mut geom.coords {
            let fx = p.x / (size - 1) as f32 * std::f32::consts::PI;
            let fy = p.y / (size - 1) as f32 * std::f32::consts::PI;
            p.z = fx.sin() * fy.sin() * 2.0;
        }
        geom
    }

    fn make_tetrahedron() -> GeometryData {
        GeometryData::from_triangles(
            vec![
                Point3f::new(0.0, 0.0, 0.0),
                Point3f::new(1.0, 0.0, 0.0),
                Point3f::new(0.5, 1.0, 0.0),
                Point3f::new(0.5, 0.5, 1.0),
            ],
            vec![[0, 2, 1], [0, 1, 3], [0, 3, 2], [1, 2, 3]],
        )
    }

    fn reduce(geom: &GeometryData, settings: ReductionSettings) -> ReductionOutcome {
        EdgeCollapseReducer::new(settings)
            .reduce(geom, &ReductionConstraints::new(), &ProcessContext::new())
            .unwrap()
    }

    #[test]
    fn test_invalid_ratio() {
        let reducer = EdgeCollapseReducer::with_triangle_ratio(1.1);
        let result = reducer.reduce(&make_plane_grid(3), &ReductionConstraints::new(), &ProcessContext::new());
        assert!(matches!(result, Err(Error::InvalidSettings(_))));
    }

    #[test]
    fn test_full_ratio_keeps_geometry() {
        let geom = make_plane_grid(5);
        let out = reduce(&geom, ReductionSettings::with_targets(ReductionTargets::triangle_ratio(1.0)));
        assert_eq!(out.geometry, geom);
        assert_eq!(out.collapses, 0);
    }

    #[test]
    fn test_tetrahedron_is_not_collapsed_into_duplicates() {
        let geom = make_tetrahedron();
        let out = reduce(&geom, ReductionSettings::with_targets(ReductionTargets::triangle_ratio(0.1)));
        assert_eq!(out.geometry.triangle_count(), 4);
    }

    #[test]
    fn test_planar_grid_reaches_ratio() {
        let geom = make_plane_grid(11);
        let out = reduce(&geom, ReductionSettings::with_targets(ReductionTargets::triangle_ratio(0.5)));
        assert!(out.geometry.triangle_count() <= 100);
        assert!(out.geometry.triangle_count() > 0);
        assert!(out.geometry.validate().is_ok());
        // Flat input stays flat
        assert!(out.geometry.coords.iter().all(|p| p.z.abs() < 1e-4));
        assert_relative_eq!(out.geometry.surface_area(), 100.0, epsilon = 1e-2);
    }

    #[test]
    fn test_triangle_count_never_increases() {
        let geom = make_curved_surface(9);
        for ratio in [0.05, 0.3, 0.5, 0.9, 1.0] {
            let out = reduce(&geom, ReductionSettings::with_targets(ReductionTargets::triangle_ratio(ratio)));
            assert!(out.geometry.triangle_count() <= geom.triangle_count(), "ratio {}", ratio);
        }
    }

    #[test]
    fn test_triangle_count_target() {
        let geom = make_curved_surface(9);
        let out = reduce(&geom, ReductionSettings::with_targets(ReductionTargets::triangle_count(40)));
        assert!(out.geometry.triangle_count() <= 40);
    }

    #[test]
    fn test_deviation_target_on_flat_grid() {
        // Collapses on a flat grid cost nothing, so a zero deviation target
        // with `All` keeps reducing well below the ratio
        let geom = make_plane_grid(9);
        let targets = ReductionTargets {
            use_max_deviation: true,
            max_deviation: 1e-4,
            triangle_ratio: 0.9,
            stop_condition: StopCondition::All,
            ..ReductionTargets::default()
        };
        let out = reduce(&geom, ReductionSettings::with_targets(targets));
        assert!(out.geometry.triangle_count() < 64);
        assert!(out.max_deviation <= 1e-4);

        let any = ReductionTargets {
            stop_condition: StopCondition::Any,
            ..ReductionTargets::triangle_ratio(0.9)
        };
        let out = reduce(&geom, ReductionSettings::with_targets(any));
        assert!(out.geometry.triangle_count() >= 115);
    }

    #[test]
    fn test_locked_border() {
        let geom = make_plane_grid(6);
        let settings = ReductionSettings {
            lock_geometric_border: true,
            ..ReductionSettings::with_targets(ReductionTargets::triangle_ratio(0.2))
        };
        let out = reduce(&geom, settings);
        for p in geom.coords.iter().filter(|p| p.x == 0.0 || p.y == 0.0 || p.x == 5.0 || p.y == 5.0) {
            assert!(out.geometry.coords.iter().any(|q| (q - p).norm() < 1e-6), "lost border vertex {:?}", p);
        }
    }

    #[test]
    fn test_locked_vertices_survive() {
        let geom = make_curved_surface(7);
        let mut locked = vec![false; geom.vertex_count()];
        locked[24] = true;
        let constraints = ReductionConstraints {
            locked_vertices: locked,
            ..ReductionConstraints::new()
        };
        let out = EdgeCollapseReducer::with_triangle_ratio(0.1)
            .reduce(&geom, &constraints, &ProcessContext::new())
            .unwrap();
        assert!(out.geometry.coords.contains(&geom.coords[24]));
    }

    #[test]
    fn test_uv_and_material_channels_stay_consistent() {
        let mut geom = make_curved_surface(8);
        let level = geom.add_tex_coords("TexCoords0");
        for t in 0..geom.triangle_count() {
            for k in 0..3 {
                let p = geom.coords[geom.vertex_ids[t][k] as usize];
                geom.tex_coords[level].values[t * 3 + k] = Point2f::new(p.x / 7.0, p.y / 7.0);
            }
        }
        let ids = geom.add_material_ids();
        for (t, id) in ids.iter_mut().enumerate() {
            *id = (t % 2) as i32;
        }
        let out = reduce(&geom, ReductionSettings::with_targets(ReductionTargets::triangle_ratio(0.4)));
        assert!(out.geometry.validate().is_ok());
        assert!(out.geometry.triangle_count() < geom.triangle_count());
        for uv in &out.geometry.tex_coords[0].values {
            assert!((-1e-3..=1.001).contains(&uv.x) && (-1e-3..=1.001).contains(&uv.y));
        }
    }

    #[test]
    fn test_consistent_heuristics() {
        let geom = make_curved_surface(9);
        let settings = ReductionSettings {
            reduction_heuristics: ReductionHeuristics::Consistent,
            ..ReductionSettings::with_targets(ReductionTargets::triangle_ratio(0.3))
        };
        let out = reduce(&geom, settings);
        assert!(out.geometry.triangle_count() <= (geom.triangle_count() as f32 * 0.3).ceil() as usize);
    }

    #[test]
    fn test_visibility_prefers_hidden_side() {
        let geom = make_plane_grid(9);
        let visibility: Vec<f32> = (0..geom.triangle_count())
            .map(|t| if geom.triangle_centroid(t).x < 4.0 { 1.0 } else { 0.0 })
            .collect();
        let mut curved = geom.clone();
        for p in &mut curved.coords {
            p.z = (p.x * 1.3).sin() * 0.5 + (p.y * 0.7).cos() * 0.5;
        }
        let constraints = ReductionConstraints {
            triangle_visibility: Some(visibility),
            ..ReductionConstraints::new()
        };
        let out = EdgeCollapseReducer::with_triangle_ratio(0.5)
            .reduce(&curved, &constraints, &ProcessContext::new())
            .unwrap();
        let left = out.geometry.coords.iter().filter(|p| p.x < 4.0).count();
        let right = out.geometry.coords.iter().filter(|p| p.x > 4.0).count();
        assert!(left > right, "visible side kept {} vertices, hidden side {}", left, right);
    }

    #[test]
    fn test_symmetry_is_kept() {
        let mut geom = make_curved_surface(9);
        // Center the grid on x = 0 so it mirrors onto itself
        geom.transform(&Transform3D::translation(Vector3f::new(-4.0, 0.0, 0.0)));
        let settings = ReductionSettings {
            keep_symmetry: true,
            symmetry_axis: SymmetryAxis::X,
            symmetry_offset: 0.0,
            ..ReductionSettings::with_targets(ReductionTargets::triangle_ratio(0.5))
        };
        let out = reduce(&geom, settings);
        assert!(out.geometry.triangle_count() < geom.triangle_count());
        for p in &out.geometry.coords {
            let mirrored = Point3f::new(-p.x, p.y, p.z);
            assert!(
                out.geometry.coords.iter().any(|q| (q - mirrored).norm() < 1e-3),
                "vertex {:?} has no mirror image",
                p
            );
        }
    }

    #[test]
    fn test_cancellation() {
        let geom = make_curved_surface(40);
        let ctx = ProcessContext::new();
        ctx.token().cancel();
        let result = EdgeCollapseReducer::with_triangle_ratio(0.1).reduce(&geom, &ReductionConstraints::new(), &ctx);
        assert!(matches!(result, Err(Error::Cancelled)));
    }

    #[test]
    fn test_bone_weights_follow_vertices() {
        let mut geom = make_curved_surface(6);
        let coords = geom.coords.clone();
        let bones = geom.add_bone_weights(2);
        for (v, p) in coords.iter().enumerate() {
            let w = p.x / 5.0;
            bones.set_influences(v, &[(0, 1.0 - w), (1, w)]);
            bones.normalize_vertex(v);
        }
        let out = reduce(&geom, ReductionSettings::with_targets(ReductionTargets::triangle_ratio(0.3)));
        let bones = out.geometry.bone_weights.as_ref().unwrap();
        assert_eq!(bones.vertex_count(), out.geometry.vertex_count());
        for v in 0..bones.vertex_count() {
            let sum: f32 = bones.influences(v).iter().map(|(_, w)| w).sum();
            assert_relative_eq!(sum, 1.0, epsilon = 1e-4);
        }
    }
}
