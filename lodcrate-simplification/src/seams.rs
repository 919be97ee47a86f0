//! Modular seams
//!
//! Pieces of a modular kit share open borders. The analyzer finds those
//! shared borders across a set of geometries; the seam settings then reduce
//! every seam the same way on every piece and lock the surviving seam
//! vertices, so reduced pieces still fit together.
//!
//! Positions are compared on a grid of `tolerance` sized cells. In
//! translation independent mode every connected border is compared
//! relative to the minimum corner of its own bounds, so a seam matches
//! wherever the piece is placed.

use crate::settings::StopCondition;
use lodcrate_core::{Aabb, Error, GeometryData, Point3f, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::path::Path;

type Key = [i64; 3];

fn quantize(p: &Point3f, tolerance: f32) -> Key {
    let cell = tolerance.max(f32::EPSILON) as f64;
    [
        (p.x as f64 / cell).round() as i64,
        (p.y as f64 / cell).round() as i64,
        (p.z as f64 / cell).round() as i64,
    ]
}

/// One shared border
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModularSeam {
    /// Relative to the border's minimum corner in translation independent
    /// seams
    pub vertices: Vec<Point3f>,
    pub edges: Vec<[u32; 2]>,
    /// Geometries the seam was found on
    pub geometry_names: Vec<String>,
}

impl ModularSeam {
    fn adjacency(&self) -> Vec<BTreeSet<usize>> {
        let mut adjacency = vec![BTreeSet::new(); self.vertices.len()];
        for &[a, b] in &self.edges {
            adjacency[a as usize].insert(b as usize);
            adjacency[b as usize].insert(a as usize);
        }
        adjacency
    }

    /// Order in which seam vertices are removed, as `(removed, merged into)`
    /// pairs. Endpoints and junctions are never removed. Every piece
    /// replays the same sequence.
    pub fn collapse_sequence(&self, settings: &ModularSeamSettings) -> Vec<(usize, usize)> {
        let mut adjacency = self.adjacency();
        let total = self.vertices.len();
        let budget = (total as f32 * settings.reduction_ratio.clamp(0.0, 1.0)).ceil() as usize;
        let removable: Vec<bool> = adjacency.iter().map(|n| n.len() == 2).collect();
        let mut alive = vec![true; total];
        let mut alive_count = total;
        let mut sequence = Vec::new();

        let cost = |v: usize, adjacency: &[BTreeSet<usize>]| -> Option<(f32, usize, usize)> {
            let mut it = adjacency[v].iter().copied();
            let (a, b) = (it.next()?, it.next()?);
            // Never close a loop into a single edge
            if adjacency[a].contains(&b) {
                return None;
            }
            let (p, pa, pb) = (self.vertices[v], self.vertices[a], self.vertices[b]);
            let d = point_segment_distance(&p, &pa, &pb);
            let into = if (p - pa).norm() <= (p - pb).norm() { a } else { b };
            Some((d, into, if into == a { b } else { a }))
        };

        loop {
            let next = (0..total)
                .filter(|&v| alive[v] && removable[v])
                .filter_map(|v| cost(v, &adjacency).map(|c| (v, c)))
                .min_by(|x, y| x.1 .0.total_cmp(&y.1 .0).then(x.0.cmp(&y.0)));

            let mut reached = vec![alive_count <= budget];
            if settings.max_deviation > 0.0 {
                reached.push(next.map_or(true, |(_, (d, _, _))| d > settings.max_deviation));
            }
            if settings.stop_condition.is_satisfied(&reached) {
                break;
            }
            let Some((v, (_, into, other))) = next else {
                break;
            };
            adjacency[into].remove(&v);
            adjacency[other].remove(&v);
            adjacency[into].insert(other);
            adjacency[other].insert(into);
            adjacency[v].clear();
            alive[v] = false;
            alive_count -= 1;
            sequence.push((v, into));
        }
        sequence
    }
}

fn point_segment_distance(p: &Point3f, a: &Point3f, b: &Point3f) -> f32 {
    let ab = b - a;
    let len2 = ab.norm_squared();
    if len2 <= f32::EPSILON {
        return (p - a).norm();
    }
    let t = ((p - a).dot(&ab) / len2).clamp(0.0, 1.0);
    (p - (a + ab * t)).norm()
}

/// Result of a seam analysis
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModularSeams {
    pub seams: Vec<ModularSeam>,
    pub translation_independent: bool,
    pub tolerance: f32,
}

impl ModularSeams {
    pub fn len(&self) -> usize {
        self.seams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seams.is_empty()
    }

    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self).map_err(|e| Error::Serialization(e.to_string()))?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text).map_err(|e| Error::Serialization(e.to_string()))
    }
}

/// Open border of a geometry with positions merged on the tolerance grid
struct BorderGraph {
    keys: Vec<Key>,
    positions: Vec<Point3f>,
    edges: Vec<(usize, usize)>,
    /// Geometry vertices at every border vertex
    geometry_vertices: Vec<Vec<usize>>,
}

impl BorderGraph {
    fn new(geometry: &GeometryData, tolerance: f32) -> Self {
        let mut graph = BorderGraph {
            keys: Vec::new(),
            positions: Vec::new(),
            edges: Vec::new(),
            geometry_vertices: Vec::new(),
        };
        let mut lookup: HashMap<Key, usize> = HashMap::new();
        let mut node_of = |v: usize, graph: &mut BorderGraph| -> usize {
            let p = geometry.coords[v];
            let key = quantize(&p, tolerance);
            let node = *lookup.entry(key).or_insert_with(|| {
                graph.keys.push(key);
                graph.positions.push(p);
                graph.geometry_vertices.push(Vec::new());
                graph.keys.len() - 1
            });
            if !graph.geometry_vertices[node].contains(&v) {
                graph.geometry_vertices[node].push(v);
            }
            node
        };

        // Border edges by position, so unwelded duplicates do not count as
        // open borders
        let mut by_position: BTreeMap<(Key, Key), Vec<(usize, usize)>> = BTreeMap::new();
        for ids in &geometry.vertex_ids {
            for k in 0..3 {
                let (a, b) = (ids[k] as usize, ids[(k + 1) % 3] as usize);
                let (ka, kb) = (quantize(&geometry.coords[a], tolerance), quantize(&geometry.coords[b], tolerance));
                if ka == kb {
                    continue;
                }
                let key = if ka < kb { (ka, kb) } else { (kb, ka) };
                by_position.entry(key).or_default().push((a, b));
            }
        }
        let mut seen = BTreeSet::new();
        for uses in by_position.values() {
            if uses.len() != 1 {
                continue;
            }
            let (a, b) = uses[0];
            let (na, nb) = (node_of(a, &mut graph), node_of(b, &mut graph));
            if seen.insert((na.min(nb), na.max(nb))) {
                graph.edges.push((na, nb));
            }
        }
        graph
    }

    /// Connected components as lists of edge indices
    fn components(&self) -> Vec<Vec<usize>> {
        let mut incident = vec![Vec::new(); self.keys.len()];
        for (e, &(a, b)) in self.edges.iter().enumerate() {
            incident[a].push(e);
            incident[b].push(e);
        }
        let mut seen = vec![false; self.edges.len()];
        let mut components = Vec::new();
        for start in 0..self.edges.len() {
            if seen[start] {
                continue;
            }
            seen[start] = true;
            let mut component = vec![start];
            let mut queue = VecDeque::from([start]);
            while let Some(e) = queue.pop_front() {
                let (a, b) = self.edges[e];
                for &n in incident[a].iter().chain(&incident[b]) {
                    if !seen[n] {
                        seen[n] = true;
                        component.push(n);
                        queue.push_back(n);
                    }
                }
            }
            components.push(component);
        }
        components
    }

    fn component_origin(&self, component: &[usize]) -> Point3f {
        let points: Vec<Point3f> = component
            .iter()
            .flat_map(|&e| [self.positions[self.edges[e].0], self.positions[self.edges[e].1]])
            .collect();
        Aabb::from_points(&points).min
    }

    /// Edge keys of a component relative to `origin`, sorted
    fn component_signature(&self, component: &[usize], origin: &Point3f, tolerance: f32) -> Vec<(Key, Key)> {
        let mut signature: Vec<(Key, Key)> = component
            .iter()
            .map(|&e| {
                let (a, b) = self.edges[e];
                let ka = quantize(&Point3f::from(self.positions[a] - origin), tolerance);
                let kb = quantize(&Point3f::from(self.positions[b] - origin), tolerance);
                if ka < kb {
                    (ka, kb)
                } else {
                    (kb, ka)
                }
            })
            .collect();
        signature.sort_unstable();
        signature.dedup();
        signature
    }
}

/// Finds borders shared between geometries
pub struct ModularSeamAnalyzer {
    tolerance: f32,
    is_translation_independent: bool,
    /// Absolute: edge key to names. Translation independent: signature to
    /// names and the relative edge positions.
    edges: BTreeMap<(Key, Key), (Vec<String>, [Point3f; 2])>,
    signatures: BTreeMap<Vec<(Key, Key)>, (Vec<String>, Vec<[Point3f; 2]>)>,
}

impl ModularSeamAnalyzer {
    pub fn new(tolerance: f32, is_translation_independent: bool) -> Self {
        Self {
            tolerance,
            is_translation_independent,
            edges: BTreeMap::new(),
            signatures: BTreeMap::new(),
        }
    }

    pub fn add_geometry(&mut self, name: &str, geometry: &GeometryData) {
        let graph = BorderGraph::new(geometry, self.tolerance);
        if self.is_translation_independent {
            for component in graph.components() {
                let origin = graph.component_origin(&component);
                let signature = graph.component_signature(&component, &origin, self.tolerance);
                let entry = self.signatures.entry(signature).or_insert_with(|| {
                    let edges = component
                        .iter()
                        .map(|&e| {
                            let (a, b) = graph.edges[e];
                            [
                                Point3f::from(graph.positions[a] - origin),
                                Point3f::from(graph.positions[b] - origin),
                            ]
                        })
                        .collect();
                    (Vec::new(), edges)
                });
                entry.0.push(name.to_string());
            }
        } else {
            for &(a, b) in &graph.edges {
                let (ka, kb) = (graph.keys[a], graph.keys[b]);
                let key = if ka < kb { (ka, kb) } else { (kb, ka) };
                let entry = self
                    .edges
                    .entry(key)
                    .or_insert_with(|| (Vec::new(), [graph.positions[a], graph.positions[b]]));
                if !entry.0.iter().any(|n| n == name) {
                    entry.0.push(name.to_string());
                }
            }
        }
    }

    pub fn analyze(&self) -> ModularSeams {
        let mut seams = Vec::new();
        if self.is_translation_independent {
            for (names, edges) in self.signatures.values() {
                if names.len() >= 2 {
                    seams.push(self.build_seam(edges.iter(), names.clone()));
                }
            }
        } else {
            // Group shared edges by the set of geometries sharing them, then
            // split each group into connected polylines
            let mut groups: BTreeMap<Vec<String>, Vec<[Point3f; 2]>> = BTreeMap::new();
            for (names, edge) in self.edges.values() {
                if names.len() >= 2 {
                    let mut names = names.clone();
                    names.sort();
                    groups.entry(names).or_default().push(*edge);
                }
            }
            for (names, edges) in groups {
                let merged = self.build_seam(edges.iter(), names.clone());
                for part in split_components(&merged) {
                    seams.push(part);
                }
            }
        }
        tracing::debug!("found {} modular seams", seams.len());
        ModularSeams {
            seams,
            translation_independent: self.is_translation_independent,
            tolerance: self.tolerance,
        }
    }

    fn build_seam<'a>(&self, edges: impl Iterator<Item = &'a [Point3f; 2]>, geometry_names: Vec<String>) -> ModularSeam {
        let mut lookup: HashMap<Key, u32> = HashMap::new();
        let mut vertices = Vec::new();
        let mut seam_edges = Vec::new();
        for [a, b] in edges {
            let mut index = |p: &Point3f| {
                *lookup.entry(quantize(p, self.tolerance)).or_insert_with(|| {
                    vertices.push(*p);
                    (vertices.len() - 1) as u32
                })
            };
            let (ia, ib) = (index(a), index(b));
            seam_edges.push([ia, ib]);
        }
        ModularSeam {
            vertices,
            edges: seam_edges,
            geometry_names,
        }
    }
}

fn split_components(seam: &ModularSeam) -> Vec<ModularSeam> {
    let adjacency = seam.adjacency();
    let mut component_of = vec![usize::MAX; seam.vertices.len()];
    let mut count = 0;
    for start in 0..seam.vertices.len() {
        if component_of[start] != usize::MAX {
            continue;
        }
        component_of[start] = count;
        let mut queue = VecDeque::from([start]);
        while let Some(v) = queue.pop_front() {
            for &n in &adjacency[v] {
                if component_of[n] == usize::MAX {
                    component_of[n] = count;
                    queue.push_back(n);
                }
            }
        }
        count += 1;
    }
    (0..count)
        .map(|c| {
            let mut remap = vec![u32::MAX; seam.vertices.len()];
            let mut vertices = Vec::new();
            for v in (0..seam.vertices.len()).filter(|&v| component_of[v] == c) {
                remap[v] = vertices.len() as u32;
                vertices.push(seam.vertices[v]);
            }
            let edges = seam
                .edges
                .iter()
                .filter(|[a, _]| component_of[*a as usize] == c)
                .map(|[a, b]| [remap[*a as usize], remap[*b as usize]])
                .collect();
            ModularSeam {
                vertices,
                edges,
                geometry_names: seam.geometry_names.clone(),
            }
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModularSeamSettings {
    pub modular_seams: Option<ModularSeams>,
    /// Fraction of the seam vertices to keep
    pub reduction_ratio: f32,
    /// Largest distance a removed seam vertex may have from the reduced
    /// seam; zero disables the deviation target
    pub max_deviation: f32,
    pub stop_condition: StopCondition,
}

impl Default for ModularSeamSettings {
    fn default() -> Self {
        Self {
            modular_seams: None,
            reduction_ratio: 1.0,
            max_deviation: 0.0,
            stop_condition: StopCondition::All,
        }
    }
}

impl ModularSeamSettings {
    pub fn is_enabled(&self) -> bool {
        self.modular_seams.as_ref().is_some_and(|s| !s.is_empty())
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.reduction_ratio) {
            return Err(Error::InvalidSettings(format!(
                "seam reduction ratio must be in [0, 1], got {}",
                self.reduction_ratio
            )));
        }
        if self.max_deviation < 0.0 {
            return Err(Error::InvalidSettings("seam max deviation must be non-negative".to_string()));
        }
        Ok(())
    }
}

/// Match the seams against the border of a geometry. Returns, per matched
/// seam, the geometry vertices at every seam vertex.
fn match_seams(graph: &BorderGraph, seams: &ModularSeams) -> Vec<(usize, Vec<Vec<usize>>)> {
    let tolerance = seams.tolerance;
    let mut matches = Vec::new();
    if seams.translation_independent {
        for component in graph.components() {
            let origin = graph.component_origin(&component);
            let signature = graph.component_signature(&component, &origin, tolerance);
            let mut nodes: HashMap<Key, usize> = HashMap::new();
            for &e in &component {
                let (a, b) = graph.edges[e];
                for n in [a, b] {
                    nodes.insert(quantize(&Point3f::from(graph.positions[n] - origin), tolerance), n);
                }
            }
            for (s, seam) in seams.seams.iter().enumerate() {
                let seam_signature = seam_signature(seam, tolerance);
                if seam_signature != signature {
                    continue;
                }
                let vertices = seam
                    .vertices
                    .iter()
                    .map(|p| {
                        nodes
                            .get(&quantize(p, tolerance))
                            .map(|&n| graph.geometry_vertices[n].clone())
                            .unwrap_or_default()
                    })
                    .collect();
                matches.push((s, vertices));
            }
        }
    } else {
        let nodes: HashMap<Key, usize> = graph.keys.iter().enumerate().map(|(i, k)| (*k, i)).collect();
        for (s, seam) in seams.seams.iter().enumerate() {
            let vertices: Vec<Vec<usize>> = seam
                .vertices
                .iter()
                .map(|p| {
                    nodes
                        .get(&quantize(p, tolerance))
                        .map(|&n| graph.geometry_vertices[n].clone())
                        .unwrap_or_default()
                })
                .collect();
            if vertices.iter().all(|v| !v.is_empty()) {
                matches.push((s, vertices));
            }
        }
    }
    matches
}

fn seam_signature(seam: &ModularSeam, tolerance: f32) -> Vec<(Key, Key)> {
    let mut signature: Vec<(Key, Key)> = seam
        .edges
        .iter()
        .map(|[a, b]| {
            let ka = quantize(&seam.vertices[*a as usize], tolerance);
            let kb = quantize(&seam.vertices[*b as usize], tolerance);
            if ka < kb {
                (ka, kb)
            } else {
                (kb, ka)
            }
        })
        .collect();
    signature.sort_unstable();
    signature.dedup();
    signature
}

/// Reduce the seams found on `geometry` and return lock flags for the
/// surviving seam vertices of the reduced geometry. Geometry without a
/// matching seam is left unchanged with nothing locked.
pub fn reduce_modular_seams(geometry: &mut GeometryData, settings: &ModularSeamSettings) -> Result<Vec<bool>> {
    settings.validate()?;
    let Some(seams) = settings.modular_seams.as_ref().filter(|s| !s.is_empty()) else {
        return Ok(vec![false; geometry.vertex_count()]);
    };
    let graph = BorderGraph::new(geometry, seams.tolerance);
    let matches = match_seams(&graph, seams);
    if matches.is_empty() {
        return Ok(vec![false; geometry.vertex_count()]);
    }

    let nv = geometry.vertex_count();
    let mut merge_into: Vec<usize> = (0..nv).collect();
    let mut locked = vec![false; nv];
    for (s, seam_vertices) in &matches {
        let seam = &seams.seams[*s];
        let sequence = seam.collapse_sequence(settings);
        let mut removed = vec![false; seam.vertices.len()];
        for &(v, into) in &sequence {
            removed[v] = true;
            let Some(&target) = seam_vertices[into].first() else {
                continue;
            };
            for &gv in &seam_vertices[v] {
                // Prefer the copy of the target connected to this vertex
                let target = seam_vertices[into]
                    .iter()
                    .copied()
                    .find(|&t| shares_triangle(geometry, gv, t))
                    .unwrap_or(target);
                merge_into[gv] = target;
            }
        }
        for (v, gvs) in seam_vertices.iter().enumerate() {
            if !removed[v] {
                for &gv in gvs {
                    locked[gv] = true;
                }
            }
        }
    }

    let resolve = |mut v: usize| {
        for _ in 0..nv {
            if merge_into[v] == v {
                break;
            }
            v = merge_into[v];
        }
        v
    };
    let mut changed = false;
    for ids in &mut geometry.vertex_ids {
        for id in ids.iter_mut() {
            let target = resolve(*id as usize) as u32;
            changed |= target != *id;
            *id = target;
        }
    }
    if !changed {
        return Ok(locked);
    }

    let keep: Vec<usize> = (0..geometry.triangle_count())
        .filter(|&t| {
            let [a, b, c] = geometry.vertex_ids[t];
            a != b && b != c && a != c
        })
        .collect();
    // Compaction renumbers vertices; carry the lock flags by position
    let locked_positions: BTreeSet<Key> = (0..nv)
        .filter(|&v| locked[v])
        .map(|v| quantize(&geometry.coords[v], seams.tolerance))
        .collect();
    *geometry = geometry.extract_triangles(&keep);
    tracing::debug!(
        "modular seams: {} seams matched, {} vertices locked",
        matches.len(),
        locked_positions.len()
    );
    Ok(geometry
        .coords
        .iter()
        .map(|p| locked_positions.contains(&quantize(p, seams.tolerance)))
        .collect())
}

fn shares_triangle(geometry: &GeometryData, a: usize, b: usize) -> bool {
    geometry
        .vertex_ids
        .iter()
        .any(|ids| ids.contains(&(a as u32)) && ids.contains(&(b as u32)))
}
