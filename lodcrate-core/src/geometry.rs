//! Geometry store: indexed triangle data with multi-channel attributes
//!
//! Positions and bone weights are stored per vertex. Vertex ids and material
//! ids are stored per triangle. Normals, tangents, texture coordinates and
//! vertex colors are stored per corner (`triangle * 3 + k`), which lets a
//! shared vertex carry different attribute values on each triangle.

use crate::error::{Error, Result};
use crate::point::*;
use crate::traits::{Aabb, Bounded, Transformable};
use crate::transform::Transform3D;
use serde::{Deserialize, Serialize};

/// A named per-corner texture coordinate channel
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TexCoordLevel {
    pub name: String,
    pub values: Vec<Point2f>,
}

/// A named per-corner vertex color channel
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColorSet {
    pub name: String,
    pub values: Vec<Color>,
}

/// Per-vertex skinning influences with a fixed number of slots per vertex.
/// Unused slots have bone id `-1` and weight `0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoneWeights {
    pub bones_per_vertex: usize,
    pub bone_ids: Vec<i32>,
    pub weights: Vec<f32>,
}

impl BoneWeights {
    pub fn new(vertex_count: usize, bones_per_vertex: usize) -> Self {
        Self {
            bones_per_vertex,
            bone_ids: vec![-1; vertex_count * bones_per_vertex],
            weights: vec![0.0; vertex_count * bones_per_vertex],
        }
    }

    pub fn vertex_count(&self) -> usize {
        if self.bones_per_vertex == 0 {
            0
        } else {
            self.bone_ids.len() / self.bones_per_vertex
        }
    }

    /// Influences of one vertex, unused slots included
    pub fn vertex(&self, v: usize) -> (&[i32], &[f32]) {
        let range = v * self.bones_per_vertex..(v + 1) * self.bones_per_vertex;
        (&self.bone_ids[range.clone()], &self.weights[range])
    }

    /// Used influences of one vertex as `(bone, weight)` pairs
    pub fn influences(&self, v: usize) -> Vec<(i32, f32)> {
        let (ids, weights) = self.vertex(v);
        ids.iter()
            .zip(weights)
            .filter(|(id, _)| **id >= 0)
            .map(|(id, w)| (*id, *w))
            .collect()
    }

    /// Replace the influences of a vertex. Extra influences beyond the slot
    /// count are dropped, lightest first.
    pub fn set_influences(&mut self, v: usize, influences: &[(i32, f32)]) {
        let mut sorted: Vec<(i32, f32)> = influences.iter().copied().filter(|(id, _)| *id >= 0).collect();
        sorted.sort_by(|a, b| b.1.total_cmp(&a.1));
        let base = v * self.bones_per_vertex;
        for slot in 0..self.bones_per_vertex {
            let (id, w) = sorted.get(slot).copied().unwrap_or((-1, 0.0));
            self.bone_ids[base + slot] = id;
            self.weights[base + slot] = w;
        }
    }

    /// Scale the weights of a vertex to sum to one
    pub fn normalize_vertex(&mut self, v: usize) {
        let range = v * self.bones_per_vertex..(v + 1) * self.bones_per_vertex;
        let sum: f32 = self.weights[range.clone()].iter().sum();
        if sum > 0.0 {
            for w in &mut self.weights[range] {
                *w /= sum;
            }
        }
    }

    fn push_vertex(&mut self, influences: &[(i32, f32)]) {
        let v = self.vertex_count();
        self.bone_ids.extend(std::iter::repeat(-1).take(self.bones_per_vertex));
        self.weights.extend(std::iter::repeat(0.0).take(self.bones_per_vertex));
        self.set_influences(v, influences);
    }
}

/// Number of values stored for one triangle tessellated at `level`
pub fn tessellated_value_count(level: u8) -> usize {
    let n = (1usize << level) + 1;
    n * (n + 1) / 2
}

/// Attribute values stored on a regular subdivision of every triangle
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TessellatedAttributes {
    /// Subdivision level per triangle
    pub levels: Vec<u8>,
    /// Start of each triangle's values; `triangle_count + 1` entries
    pub offsets: Vec<u32>,
    /// Scalar displacement along the interpolated normal
    pub displacement: Vec<f32>,
}

impl TessellatedAttributes {
    /// Allocate zeroed values for the given per-triangle levels
    pub fn from_levels(levels: Vec<u8>) -> Self {
        let mut offsets = Vec::with_capacity(levels.len() + 1);
        let mut total = 0u32;
        offsets.push(0);
        for &level in &levels {
            total += tessellated_value_count(level) as u32;
            offsets.push(total);
        }
        Self {
            levels,
            offsets,
            displacement: vec![0.0; total as usize],
        }
    }

    pub fn total_values(&self) -> usize {
        self.displacement.len()
    }

    pub fn triangle_values(&self, t: usize) -> &[f32] {
        &self.displacement[self.offsets[t] as usize..self.offsets[t + 1] as usize]
    }

    pub fn triangle_values_mut(&mut self, t: usize) -> &mut [f32] {
        let range = self.offsets[t] as usize..self.offsets[t + 1] as usize;
        &mut self.displacement[range]
    }
}

/// All per-corner attribute values of one corner
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CornerValue {
    pub normal: Option<Vector3f>,
    pub tangent: Option<Vector3f>,
    pub bitangent: Option<Vector3f>,
    pub tex_coords: Vec<Point2f>,
    pub colors: Vec<Color>,
}

/// Indexed triangle geometry with per-vertex, per-corner and per-triangle
/// channels
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeometryData {
    pub coords: Vec<Point3f>,
    pub vertex_ids: Vec<[u32; 3]>,
    pub normals: Option<Vec<Vector3f>>,
    pub tangents: Option<Vec<Vector3f>>,
    pub bitangents: Option<Vec<Vector3f>>,
    pub tex_coords: Vec<TexCoordLevel>,
    pub colors: Vec<ColorSet>,
    pub material_ids: Option<Vec<i32>>,
    pub bone_weights: Option<BoneWeights>,
    pub tessellated: Option<TessellatedAttributes>,
}

impl GeometryData {
    /// Create a new empty geometry
    pub fn new() -> Self {
        Self::default()
    }

    /// Geometry with zeroed coordinates and vertex ids
    pub fn with_counts(vertex_count: usize, triangle_count: usize) -> Self {
        Self {
            coords: vec![Point3f::origin(); vertex_count],
            vertex_ids: vec![[0; 3]; triangle_count],
            ..Self::default()
        }
    }

    /// Geometry from positions and triangles, without other channels
    pub fn from_triangles(coords: Vec<Point3f>, vertex_ids: Vec<[u32; 3]>) -> Self {
        Self {
            coords,
            vertex_ids,
            ..Self::default()
        }
    }

    pub fn vertex_count(&self) -> usize {
        self.coords.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.vertex_ids.len()
    }

    pub fn corner_count(&self) -> usize {
        self.vertex_ids.len() * 3
    }

    pub fn is_empty(&self) -> bool {
        self.coords.is_empty() || self.vertex_ids.is_empty()
    }

    /// Vertex referenced by a corner
    #[inline]
    pub fn corner_vertex(&self, corner: usize) -> usize {
        self.vertex_ids[corner / 3][corner % 3] as usize
    }

    /// Check channel sizes and index ranges
    pub fn validate(&self) -> Result<()> {
        let corners = self.corner_count();
        let check = |name: &str, len: usize, expected: usize| -> Result<()> {
            if len != expected {
                return Err(Error::InvalidData(format!(
                    "channel '{}' has {} entries, expected {}",
                    name, len, expected
                )));
            }
            Ok(())
        };
        if let Some(normals) = &self.normals {
            check("normals", normals.len(), corners)?;
        }
        if let Some(tangents) = &self.tangents {
            check("tangents", tangents.len(), corners)?;
        }
        if let Some(bitangents) = &self.bitangents {
            check("bitangents", bitangents.len(), corners)?;
        }
        for level in &self.tex_coords {
            check(&level.name, level.values.len(), corners)?;
        }
        for set in &self.colors {
            check(&set.name, set.values.len(), corners)?;
        }
        if let Some(ids) = &self.material_ids {
            check("material_ids", ids.len(), self.triangle_count())?;
        }
        if let Some(bones) = &self.bone_weights {
            check(
                "bone_ids",
                bones.bone_ids.len(),
                self.vertex_count() * bones.bones_per_vertex,
            )?;
            check(
                "bone_weights",
                bones.weights.len(),
                self.vertex_count() * bones.bones_per_vertex,
            )?;
        }
        if let Some(tess) = &self.tessellated {
            check("tessellation_levels", tess.levels.len(), self.triangle_count())?;
        }
        let vertex_count = self.vertex_count() as u32;
        if let Some((t, ids)) = self
            .vertex_ids
            .iter()
            .enumerate()
            .find(|(_, ids)| ids.iter().any(|&v| v >= vertex_count))
        {
            return Err(Error::InvalidData(format!(
                "triangle {} references vertex {:?} but geometry has {} vertices",
                t, ids, vertex_count
            )));
        }
        Ok(())
    }

    /// Add a zero-filled texture coordinate level and return its index
    pub fn add_tex_coords(&mut self, name: &str) -> usize {
        if let Some(level) = self.tex_coords_by_name(name) {
            return level;
        }
        self.tex_coords.push(TexCoordLevel {
            name: name.to_string(),
            values: vec![Point2f::origin(); self.corner_count()],
        });
        self.tex_coords.len() - 1
    }

    pub fn tex_coords(&self, level: usize) -> Option<&TexCoordLevel> {
        self.tex_coords.get(level)
    }

    pub fn tex_coords_by_name(&self, name: &str) -> Option<usize> {
        self.tex_coords.iter().position(|l| l.name == name)
    }

    /// Add a vertex color set filled with white and return its index
    pub fn add_colors(&mut self, name: &str) -> usize {
        if let Some(set) = self.colors_by_name(name) {
            return set;
        }
        self.colors.push(ColorSet {
            name: name.to_string(),
            values: vec![Color::WHITE; self.corner_count()],
        });
        self.colors.len() - 1
    }

    pub fn colors_by_name(&self, name: &str) -> Option<usize> {
        self.colors.iter().position(|s| s.name == name)
    }

    pub fn add_material_ids(&mut self) -> &mut Vec<i32> {
        let count = self.triangle_count();
        self.material_ids.get_or_insert_with(|| vec![0; count])
    }

    pub fn add_normals(&mut self) -> &mut Vec<Vector3f> {
        let count = self.corner_count();
        self.normals.get_or_insert_with(|| vec![Vector3f::zeros(); count])
    }

    pub fn add_tangents(&mut self) {
        let count = self.corner_count();
        self.tangents.get_or_insert_with(|| vec![Vector3f::zeros(); count]);
        self.bitangents.get_or_insert_with(|| vec![Vector3f::zeros(); count]);
    }

    pub fn add_bone_weights(&mut self, bones_per_vertex: usize) -> &mut BoneWeights {
        let count = self.vertex_count();
        self.bone_weights
            .get_or_insert_with(|| BoneWeights::new(count, bones_per_vertex))
    }

    /// Material id of a triangle, 0 when the channel is missing
    pub fn material_id(&self, t: usize) -> i32 {
        self.material_ids.as_ref().map(|ids| ids[t]).unwrap_or(0)
    }

    pub fn triangle_positions(&self, t: usize) -> [Point3f; 3] {
        let [a, b, c] = self.vertex_ids[t];
        [
            self.coords[a as usize],
            self.coords[b as usize],
            self.coords[c as usize],
        ]
    }

    pub fn triangle_area(&self, t: usize) -> f32 {
        let [a, b, c] = self.triangle_positions(t);
        (b - a).cross(&(c - a)).norm() * 0.5
    }

    /// Unit face normal, zero for degenerate triangles
    pub fn triangle_normal(&self, t: usize) -> Vector3f {
        let [a, b, c] = self.triangle_positions(t);
        let n = (b - a).cross(&(c - a));
        let len = n.norm();
        if len > f32::EPSILON {
            n / len
        } else {
            Vector3f::zeros()
        }
    }

    pub fn triangle_centroid(&self, t: usize) -> Point3f {
        let [a, b, c] = self.triangle_positions(t);
        Point3f::from((a.coords + b.coords + c.coords) / 3.0)
    }

    pub fn surface_area(&self) -> f32 {
        (0..self.triangle_count()).map(|t| self.triangle_area(t)).sum()
    }

    /// Per-corner attribute values of a corner
    pub fn corner_value(&self, corner: usize) -> CornerValue {
        CornerValue {
            normal: self.normals.as_ref().map(|n| n[corner]),
            tangent: self.tangents.as_ref().map(|n| n[corner]),
            bitangent: self.bitangents.as_ref().map(|n| n[corner]),
            tex_coords: self.tex_coords.iter().map(|l| l.values[corner]).collect(),
            colors: self.colors.iter().map(|s| s.values[corner]).collect(),
        }
    }

    /// Barycentric blend of the corner values of a triangle
    pub fn interpolate_corners(&self, t: usize, bary: [f32; 3]) -> CornerValue {
        let c = [t * 3, t * 3 + 1, t * 3 + 2];
        let vector = |channel: &Option<Vec<Vector3f>>| {
            channel.as_ref().map(|v| {
                let n = interpolate_vector([v[c[0]], v[c[1]], v[c[2]]], bary);
                let len = n.norm();
                if len > f32::EPSILON {
                    n / len
                } else {
                    v[c[0]]
                }
            })
        };
        CornerValue {
            normal: vector(&self.normals),
            tangent: vector(&self.tangents),
            bitangent: vector(&self.bitangents),
            tex_coords: self
                .tex_coords
                .iter()
                .map(|l| interpolate_uv([l.values[c[0]], l.values[c[1]], l.values[c[2]]], bary))
                .collect(),
            colors: self
                .colors
                .iter()
                .map(|s| Color::weighted([s.values[c[0]], s.values[c[1]], s.values[c[2]]], bary))
                .collect(),
        }
    }

    /// Write all per-corner channels of one corner. Channels missing from
    /// `value` are left untouched.
    pub fn set_corner_value(&mut self, corner: usize, value: &CornerValue) {
        if let (Some(n), Some(v)) = (self.normals.as_mut(), value.normal) {
            n[corner] = v;
        }
        if let (Some(n), Some(v)) = (self.tangents.as_mut(), value.tangent) {
            n[corner] = v;
        }
        if let (Some(n), Some(v)) = (self.bitangents.as_mut(), value.bitangent) {
            n[corner] = v;
        }
        for (level, uv) in self.tex_coords.iter_mut().zip(&value.tex_coords) {
            level.values[corner] = *uv;
        }
        for (set, color) in self.colors.iter_mut().zip(&value.colors) {
            set.values[corner] = *color;
        }
    }

    /// Push a new triangle with the given corner values
    pub fn push_triangle(&mut self, ids: [u32; 3], corners: [&CornerValue; 3], material_id: i32) {
        self.vertex_ids.push(ids);
        for value in corners {
            if let Some(n) = self.normals.as_mut() {
                n.push(value.normal.unwrap_or_else(Vector3f::zeros));
            }
            if let Some(n) = self.tangents.as_mut() {
                n.push(value.tangent.unwrap_or_else(Vector3f::zeros));
            }
            if let Some(n) = self.bitangents.as_mut() {
                n.push(value.bitangent.unwrap_or_else(Vector3f::zeros));
            }
            for (i, level) in self.tex_coords.iter_mut().enumerate() {
                level
                    .values
                    .push(value.tex_coords.get(i).copied().unwrap_or_else(Point2f::origin));
            }
            for (i, set) in self.colors.iter_mut().enumerate() {
                set.values.push(value.colors.get(i).copied().unwrap_or(Color::WHITE));
            }
        }
        if let Some(ids) = self.material_ids.as_mut() {
            ids.push(material_id);
        }
        if let Some(tess) = self.tessellated.as_mut() {
            let count = tessellated_value_count(0);
            tess.levels.push(0);
            let last = tess.offsets.last().copied().unwrap_or(0);
            tess.offsets.push(last + count as u32);
            tess.displacement.extend(std::iter::repeat(0.0).take(count));
        }
    }

    /// Empty geometry with the same channel layout (names, presence)
    pub fn empty_like(&self) -> Self {
        Self {
            coords: Vec::new(),
            vertex_ids: Vec::new(),
            normals: self.normals.as_ref().map(|_| Vec::new()),
            tangents: self.tangents.as_ref().map(|_| Vec::new()),
            bitangents: self.bitangents.as_ref().map(|_| Vec::new()),
            tex_coords: self
                .tex_coords
                .iter()
                .map(|l| TexCoordLevel {
                    name: l.name.clone(),
                    values: Vec::new(),
                })
                .collect(),
            colors: self
                .colors
                .iter()
                .map(|s| ColorSet {
                    name: s.name.clone(),
                    values: Vec::new(),
                })
                .collect(),
            material_ids: self.material_ids.as_ref().map(|_| Vec::new()),
            bone_weights: self
                .bone_weights
                .as_ref()
                .map(|b| BoneWeights::new(0, b.bones_per_vertex)),
            tessellated: None,
        }
    }

    /// Append another geometry. Channels are matched by index for texture
    /// coordinates and by name for colors; channels missing on one side are
    /// zero (or white) filled.
    pub fn append(&mut self, other: &GeometryData) {
        let vertex_offset = self.vertex_count() as u32;
        let old_corners = self.corner_count();
        let old_triangles = self.triangle_count();
        let new_corners = other.corner_count();

        self.coords.extend_from_slice(&other.coords);
        self.vertex_ids.extend(
            other
                .vertex_ids
                .iter()
                .map(|ids| ids.map(|v| v + vertex_offset)),
        );

        append_vector_channel(&mut self.normals, &other.normals, old_corners, new_corners);
        append_vector_channel(&mut self.tangents, &other.tangents, old_corners, new_corners);
        append_vector_channel(&mut self.bitangents, &other.bitangents, old_corners, new_corners);

        for (i, level) in other.tex_coords.iter().enumerate() {
            if i >= self.tex_coords.len() {
                self.tex_coords.push(TexCoordLevel {
                    name: level.name.clone(),
                    values: vec![Point2f::origin(); old_corners],
                });
            }
            self.tex_coords[i].values.extend_from_slice(&level.values);
        }
        for level in self.tex_coords.iter_mut().skip(other.tex_coords.len()) {
            level.values.resize(old_corners + new_corners, Point2f::origin());
        }

        for set in &mut self.colors {
            match other.colors.iter().find(|s| s.name == set.name) {
                Some(src) => set.values.extend_from_slice(&src.values),
                None => set.values.resize(old_corners + new_corners, Color::WHITE),
            }
        }
        for src in &other.colors {
            if !self.colors.iter().any(|s| s.name == src.name) {
                let mut values = vec![Color::WHITE; old_corners];
                values.extend_from_slice(&src.values);
                self.colors.push(ColorSet {
                    name: src.name.clone(),
                    values,
                });
            }
        }

        match (&mut self.material_ids, &other.material_ids) {
            (Some(ids), Some(src)) => ids.extend_from_slice(src),
            (Some(ids), None) => ids.resize(old_triangles + other.triangle_count(), 0),
            (None, Some(src)) => {
                let mut ids = vec![0; old_triangles];
                ids.extend_from_slice(src);
                self.material_ids = Some(ids);
            }
            (None, None) => {}
        }

        let old_vertices = vertex_offset as usize;
        match (&mut self.bone_weights, &other.bone_weights) {
            (Some(bones), Some(src)) => {
                for v in 0..other.vertex_count() {
                    bones.push_vertex(&src.influences(v));
                }
            }
            (Some(bones), None) => {
                for _ in 0..other.vertex_count() {
                    bones.push_vertex(&[]);
                }
            }
            (None, Some(src)) => {
                let mut bones = BoneWeights::new(old_vertices, src.bones_per_vertex);
                for v in 0..other.vertex_count() {
                    bones.push_vertex(&src.influences(v));
                }
                self.bone_weights = Some(bones);
            }
            (None, None) => {}
        }

        // Tessellation values do not survive merging
        self.tessellated = None;
    }

    /// New geometry holding only the listed triangles, with unused vertices
    /// removed
    pub fn extract_triangles(&self, triangles: &[usize]) -> GeometryData {
        let mut out = self.empty_like();
        let mut remap = vec![u32::MAX; self.vertex_count()];
        for &t in triangles {
            let mut ids = [0u32; 3];
            for k in 0..3 {
                let v = self.vertex_ids[t][k] as usize;
                if remap[v] == u32::MAX {
                    remap[v] = out.coords.len() as u32;
                    out.coords.push(self.coords[v]);
                    if let (Some(dst), Some(src)) = (out.bone_weights.as_mut(), self.bone_weights.as_ref()) {
                        dst.push_vertex(&src.influences(v));
                    }
                }
                ids[k] = remap[v];
            }
            let corners = [
                self.corner_value(t * 3),
                self.corner_value(t * 3 + 1),
                self.corner_value(t * 3 + 2),
            ];
            out.push_triangle(ids, [&corners[0], &corners[1], &corners[2]], self.material_id(t));
        }
        out
    }

    /// Drop vertices that no triangle references. Returns how many were removed.
    pub fn remove_unused_vertices(&mut self) -> usize {
        let mut used = vec![false; self.vertex_count()];
        for ids in &self.vertex_ids {
            for &v in ids {
                used[v as usize] = true;
            }
        }
        let mut remap = vec![u32::MAX; used.len()];
        let mut next = 0u32;
        for (v, &is_used) in used.iter().enumerate() {
            if is_used {
                remap[v] = next;
                next += 1;
            }
        }
        let removed = used.len() - next as usize;
        if removed == 0 {
            return 0;
        }
        self.coords = self
            .coords
            .iter()
            .zip(&used)
            .filter(|(_, u)| **u)
            .map(|(p, _)| *p)
            .collect();
        if let Some(bones) = self.bone_weights.as_mut() {
            let mut compacted = BoneWeights::new(0, bones.bones_per_vertex);
            for (v, &is_used) in used.iter().enumerate() {
                if is_used {
                    compacted.push_vertex(&bones.influences(v));
                }
            }
            *bones = compacted;
        }
        for ids in &mut self.vertex_ids {
            *ids = ids.map(|v| remap[v as usize]);
        }
        removed
    }

    /// Reverse the winding of every triangle, keeping corner attributes with
    /// their vertex
    pub fn flip_winding(&mut self) {
        for (t, ids) in self.vertex_ids.iter_mut().enumerate() {
            ids.swap(1, 2);
            let (a, b) = (t * 3 + 1, t * 3 + 2);
            if let Some(n) = self.normals.as_mut() {
                n.swap(a, b);
            }
            if let Some(n) = self.tangents.as_mut() {
                n.swap(a, b);
            }
            if let Some(n) = self.bitangents.as_mut() {
                n.swap(a, b);
            }
            for level in &mut self.tex_coords {
                level.values.swap(a, b);
            }
            for set in &mut self.colors {
                set.values.swap(a, b);
            }
        }
    }

    /// Unique undirected edges with the triangles using them
    pub fn edge_triangles(&self) -> std::collections::HashMap<(u32, u32), Vec<usize>> {
        let mut edges: std::collections::HashMap<(u32, u32), Vec<usize>> =
            std::collections::HashMap::with_capacity(self.corner_count());
        for (t, ids) in self.vertex_ids.iter().enumerate() {
            for k in 0..3 {
                let a = ids[k];
                let b = ids[(k + 1) % 3];
                edges.entry((a.min(b), a.max(b))).or_default().push(t);
            }
        }
        edges
    }
}

fn append_vector_channel(
    dst: &mut Option<Vec<Vector3f>>,
    src: &Option<Vec<Vector3f>>,
    old_len: usize,
    new_len: usize,
) {
    match (dst.as_mut(), src) {
        (Some(d), Some(s)) => d.extend_from_slice(s),
        (Some(d), None) => d.resize(old_len + new_len, Vector3f::zeros()),
        (None, Some(s)) => {
            let mut d = vec![Vector3f::zeros(); old_len];
            d.extend_from_slice(s);
            *dst = Some(d);
        }
        (None, None) => {}
    }
}

impl Bounded for GeometryData {
    fn bounding_box(&self) -> Aabb {
        Aabb::from_points(&self.coords)
    }
}

impl Transformable for GeometryData {
    fn transform(&mut self, transform: &Transform3D) {
        for p in &mut self.coords {
            *p = transform.transform_point(p);
        }
        for channel in [&mut self.normals, &mut self.tangents, &mut self.bitangents] {
            if let Some(values) = channel.as_mut() {
                for n in values.iter_mut() {
                    *n = transform.transform_normal(n);
                }
            }
        }
        if transform.is_mirroring() {
            self.flip_winding();
        }
    }
}
