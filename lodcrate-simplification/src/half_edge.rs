//! Corner based half-edge mesh
//!
//! Every triangle corner is one half-edge: half-edge `h` starts at the
//! vertex of corner `h` and ends at the vertex of the next corner of the
//! same triangle, so `next`, `prev` and `face` are index arithmetic. Twins
//! are found through per-vertex face lists, which stay valid while edges
//! collapse. Corner indices match the corner channels of the
//! [`GeometryData`] the mesh was built from.

use lodcrate_core::{GeometryData, Point3f, Vector3f};

#[derive(Debug, Clone)]
pub struct HalfEdgeMesh {
    pub positions: Vec<Point3f>,
    /// Vertex at the start of each half-edge
    corners: Vec<usize>,
    face_alive: Vec<bool>,
    vertex_faces: Vec<Vec<usize>>,
    vertex_removed: Vec<bool>,
    active_face_count: usize,
}

impl HalfEdgeMesh {
    pub fn from_geometry(geometry: &GeometryData) -> Self {
        let nv = geometry.vertex_count();
        let nf = geometry.triangle_count();
        let mut corners = Vec::with_capacity(nf * 3);
        let mut vertex_faces = vec![Vec::new(); nv];
        for (f, ids) in geometry.vertex_ids.iter().enumerate() {
            for &v in ids {
                corners.push(v as usize);
                let faces = &mut vertex_faces[v as usize];
                if faces.last() != Some(&f) {
                    faces.push(f);
                }
            }
        }
        Self {
            positions: geometry.coords.clone(),
            corners,
            face_alive: vec![true; nf],
            vertex_faces,
            vertex_removed: vec![false; nv],
            active_face_count: nf,
        }
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn face_count(&self) -> usize {
        self.face_alive.len()
    }

    pub fn active_face_count(&self) -> usize {
        self.active_face_count
    }

    pub fn is_face_alive(&self, f: usize) -> bool {
        self.face_alive[f]
    }

    pub fn is_vertex_alive(&self, v: usize) -> bool {
        !self.vertex_removed[v] && !self.vertex_faces[v].is_empty()
    }

    #[inline]
    pub fn next(h: usize) -> usize {
        h - h % 3 + (h + 1) % 3
    }

    #[inline]
    pub fn prev(h: usize) -> usize {
        h - h % 3 + (h + 2) % 3
    }

    #[inline]
    pub fn face(h: usize) -> usize {
        h / 3
    }

    #[inline]
    pub fn source(&self, h: usize) -> usize {
        self.corners[h]
    }

    #[inline]
    pub fn target(&self, h: usize) -> usize {
        self.corners[Self::next(h)]
    }

    pub fn face_vertices(&self, f: usize) -> [usize; 3] {
        [self.corners[f * 3], self.corners[f * 3 + 1], self.corners[f * 3 + 2]]
    }

    /// Alive faces around a vertex
    pub fn vertex_faces(&self, v: usize) -> &[usize] {
        &self.vertex_faces[v]
    }

    /// Corner of face `f` at vertex `v`
    pub fn corner_of(&self, f: usize, v: usize) -> Option<usize> {
        (f * 3..f * 3 + 3).find(|&c| self.corners[c] == v)
    }

    pub fn outgoing_half_edges(&self, v: usize) -> Vec<usize> {
        self.vertex_faces[v]
            .iter()
            .filter_map(|&f| self.corner_of(f, v))
            .collect()
    }

    pub fn find_half_edge(&self, from: usize, to: usize) -> Option<usize> {
        self.outgoing_half_edges(from)
            .into_iter()
            .find(|&h| self.target(h) == to)
    }

    /// Alive faces using the edge `a - b` in either direction
    pub fn edge_faces(&self, a: usize, b: usize) -> Vec<usize> {
        self.vertex_faces[a]
            .iter()
            .copied()
            .filter(|&f| self.face_vertices(f).contains(&b))
            .collect()
    }

    /// The opposite half-edge, if the edge is shared by exactly two faces
    pub fn twin(&self, h: usize) -> Option<usize> {
        let (a, b) = (self.source(h), self.target(h));
        if self.edge_faces(a, b).len() != 2 {
            return None;
        }
        self.find_half_edge(b, a)
    }

    pub fn is_boundary_edge(&self, a: usize, b: usize) -> bool {
        self.edge_faces(a, b).len() == 1
    }

    /// A vertex with an edge that is not shared by exactly two faces
    pub fn is_boundary_vertex(&self, v: usize) -> bool {
        self.neighbors(v)
            .into_iter()
            .any(|n| self.edge_faces(v, n).len() != 2)
    }

    /// Sorted neighbouring vertices
    pub fn neighbors(&self, v: usize) -> Vec<usize> {
        let mut result: Vec<usize> = self.vertex_faces[v]
            .iter()
            .flat_map(|&f| self.face_vertices(f))
            .filter(|&n| n != v)
            .collect();
        result.sort_unstable();
        result.dedup();
        result
    }

    /// Link condition: the common neighbours of the two endpoints are
    /// exactly the apices of the faces on the edge, and an interior edge
    /// does not join two border vertices.
    pub fn check_link_condition(&self, v1: usize, v2: usize) -> bool {
        let faces = self.edge_faces(v1, v2);
        if faces.is_empty() || faces.len() > 2 {
            return false;
        }
        let n1 = self.neighbors(v1);
        let n2 = self.neighbors(v2);
        let common = n1.iter().filter(|n| n2.binary_search(n).is_ok()).count();
        if common != faces.len() {
            return false;
        }
        if faces.len() == 2 && self.is_boundary_vertex(v1) && self.is_boundary_vertex(v2) {
            return false;
        }
        true
    }

    /// Would collapsing `remove` into `keep` create two faces over the same
    /// three vertices
    pub fn collapse_creates_duplicate(&self, keep: usize, remove: usize) -> bool {
        let key = |mut vs: [usize; 3]| {
            vs.sort_unstable();
            vs
        };
        let kept: Vec<[usize; 3]> = self.vertex_faces[keep]
            .iter()
            .filter(|&&f| !self.face_vertices(f).contains(&remove))
            .map(|&f| key(self.face_vertices(f)))
            .collect();
        self.vertex_faces[remove].iter().any(|&f| {
            let vs = self.face_vertices(f);
            !vs.contains(&keep)
                && kept.contains(&key(vs.map(|v| if v == remove { keep } else { v })))
        })
    }

    /// Unnormalized face normal for the given positions of the face's
    /// vertices
    pub fn face_cross(&self, f: usize) -> Vector3f {
        let [a, b, c] = self.face_vertices(f);
        let (pa, pb, pc) = (self.positions[a], self.positions[b], self.positions[c]);
        (pb - pa).cross(&(pc - pa))
    }

    /// Face normal after moving vertices `moved` to `p`
    pub fn face_cross_moved(&self, f: usize, moved: [usize; 2], p: &Point3f) -> Vector3f {
        let pos = |v: usize| if moved.contains(&v) { *p } else { self.positions[v] };
        let [a, b, c] = self.face_vertices(f);
        (pos(b) - pos(a)).cross(&(pos(c) - pos(a)))
    }

    /// Collapse `remove` into `keep` and move `keep` to `position`. Returns
    /// the faces that were on the edge and are now removed.
    pub fn collapse_edge(&mut self, keep: usize, remove: usize, position: Point3f) -> Vec<usize> {
        let shared = self.edge_faces(keep, remove);
        for &f in &shared {
            self.face_alive[f] = false;
            self.active_face_count -= 1;
            for v in self.face_vertices(f) {
                self.vertex_faces[v].retain(|&g| g != f);
            }
        }

        let moved = std::mem::take(&mut self.vertex_faces[remove]);
        for f in moved {
            for c in f * 3..f * 3 + 3 {
                if self.corners[c] == remove {
                    self.corners[c] = keep;
                }
            }
            self.vertex_faces[keep].push(f);
        }
        self.vertex_removed[remove] = true;
        self.positions[keep] = position;
        shared
    }

    /// Alive faces with their vertices
    pub fn alive_faces(&self) -> impl Iterator<Item = (usize, [usize; 3])> + '_ {
        (0..self.face_count())
            .filter(|&f| self.face_alive[f])
            .map(|f| (f, self.face_vertices(f)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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

    #[test]
    fn test_halfedge_construction() {
        let hem = HalfEdgeMesh::from_geometry(&make_tetrahedron());
        assert_eq!(hem.face_count(), 4);
        assert_eq!(hem.active_face_count(), 4);
        for h in 0..12 {
            let twin = hem.twin(h).expect("closed mesh has twins everywhere");
            assert_eq!(hem.source(twin), hem.target(h));
            assert_eq!(hem.target(twin), hem.source(h));
        }
        for v in 0..4 {
            assert_eq!(hem.neighbors(v).len(), 3);
            assert!(!hem.is_boundary_vertex(v));
        }
    }

    #[test]
    fn test_boundary() {
        let hem = HalfEdgeMesh::from_geometry(&make_plane_grid(3));
        assert!(hem.is_boundary_vertex(0));
        assert!(!hem.is_boundary_vertex(4));
        assert!(hem.is_boundary_edge(0, 1));
        assert!(!hem.is_boundary_edge(1, 3));
    }

    #[test]
    fn test_link_condition() {
        let hem = HalfEdgeMesh::from_geometry(&make_plane_grid(4));
        // Interior vertex to interior vertex
        assert!(hem.check_link_condition(5, 6));
        // Interior edge between two border vertices pinches the border
        assert!(!hem.check_link_condition(1, 4));
        // Along the border
        assert!(hem.check_link_condition(0, 1));
    }

    #[test]
    fn test_collapse_interior_edge() {
        let mut hem = HalfEdgeMesh::from_geometry(&make_plane_grid(4));
        let before = hem.active_face_count();
        let removed = hem.collapse_edge(5, 6, Point3f::new(1.5, 1.0, 0.0));
        assert_eq!(removed.len(), 2);
        assert_eq!(hem.active_face_count(), before - 2);
        assert!(!hem.is_vertex_alive(6));
        assert!(hem.alive_faces().all(|(_, vs)| !vs.contains(&6)));
        assert!(!hem.is_boundary_vertex(5));
    }

    #[test]
    fn test_tetrahedron_collapse_would_duplicate() {
        let hem = HalfEdgeMesh::from_geometry(&make_tetrahedron());
        assert!(hem.check_link_condition(0, 1));
        assert!(hem.collapse_creates_duplicate(0, 1));
    }
}
