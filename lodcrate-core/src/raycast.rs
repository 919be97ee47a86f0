//! Ray casting against triangle geometry
//!
//! [`TriangleBvh`] is a bounding volume hierarchy built by median split over
//! triangle centroids. Nodes are stored depth first: the left child of an
//! interior node directly follows it, the right child index is stored.

use crate::geometry::GeometryData;
use crate::point::*;
use crate::traits::Aabb;

const LEAF_SIZE: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ray {
    pub origin: Point3f,
    /// Need not be normalized; hit distances are in units of its length
    pub direction: Vector3f,
}

impl Ray {
    pub fn new(origin: Point3f, direction: Vector3f) -> Self {
        Self { origin, direction }
    }

    /// Ray from `from` toward `to`, reaching `to` at `t = 1`
    pub fn between(from: Point3f, to: Point3f) -> Self {
        Self::new(from, to - from)
    }

    pub fn at(&self, t: f32) -> Point3f {
        self.origin + self.direction * t
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayHit {
    pub triangle: usize,
    pub t: f32,
    pub barycentric: [f32; 3],
}

#[derive(Debug, Clone)]
struct BvhNode {
    bounds: Aabb,
    first: u32,
    count: u32,
    right: u32,
}

impl BvhNode {
    fn is_leaf(&self) -> bool {
        self.count > 0
    }
}

/// Bounding volume hierarchy over the triangles of one geometry
#[derive(Debug, Clone)]
pub struct TriangleBvh {
    nodes: Vec<BvhNode>,
    order: Vec<u32>,
    triangles: Vec<[Point3f; 3]>,
    cull_backfaces: bool,
}

impl TriangleBvh {
    pub fn new(geometry: &GeometryData) -> Self {
        let triangles = (0..geometry.triangle_count())
            .map(|t| geometry.triangle_positions(t))
            .collect();
        Self::from_triangles(triangles)
    }

    pub fn from_triangles(triangles: Vec<[Point3f; 3]>) -> Self {
        let mut bvh = Self {
            nodes: Vec::new(),
            order: (0..triangles.len() as u32).collect(),
            triangles,
            cull_backfaces: false,
        };
        if !bvh.triangles.is_empty() {
            let centroids: Vec<Point3f> = bvh
                .triangles
                .iter()
                .map(|[a, b, c]| Point3f::from((a.coords + b.coords + c.coords) / 3.0))
                .collect();
            let len = bvh.order.len();
            bvh.build(0, len, &centroids);
        }
        bvh
    }

    /// Ignore hits on triangles facing away from the ray
    pub fn with_backface_culling(mut self, cull: bool) -> Self {
        self.cull_backfaces = cull;
        self
    }

    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }

    pub fn bounds(&self) -> Aabb {
        self.nodes.first().map(|n| n.bounds).unwrap_or_default()
    }

    fn build(&mut self, start: usize, end: usize, centroids: &[Point3f]) -> usize {
        let mut bounds = Aabb::empty();
        let mut centroid_bounds = Aabb::empty();
        for &t in &self.order[start..end] {
            for p in &self.triangles[t as usize] {
                bounds.extend(p);
            }
            centroid_bounds.extend(&centroids[t as usize]);
        }

        let index = self.nodes.len();
        self.nodes.push(BvhNode {
            bounds,
            first: start as u32,
            count: (end - start) as u32,
            right: 0,
        });
        if end - start <= LEAF_SIZE {
            return index;
        }

        let axis = centroid_bounds.longest_axis();
        let mid = (start + end) / 2;
        self.order[start..end].select_nth_unstable_by(mid - start, |a, b| {
            centroids[*a as usize][axis].total_cmp(&centroids[*b as usize][axis])
        });

        self.build(start, mid, centroids);
        let right = self.build(mid, end, centroids);
        let node = &mut self.nodes[index];
        node.count = 0;
        node.right = right as u32;
        index
    }

    /// Closest hit with `t` in `(0, t_max)`
    pub fn intersect(&self, ray: &Ray, t_max: f32) -> Option<RayHit> {
        let mut best: Option<RayHit> = None;
        self.traverse(ray, t_max, |t, limit| {
            if let Some(hit) = self.intersect_triangle(ray, t, *limit) {
                *limit = hit.t;
                best = Some(hit);
            }
            false
        });
        best
    }

    /// True if anything is hit with `t` in `(0, t_max)`
    pub fn occluded(&self, ray: &Ray, t_max: f32) -> bool {
        let mut hit = false;
        self.traverse(ray, t_max, |t, limit| {
            hit = self.intersect_triangle(ray, t, *limit).is_some();
            hit
        });
        hit
    }

    /// Up to `max_hits` hits sorted front to back
    pub fn closest_hits(&self, ray: &Ray, t_max: f32, max_hits: usize) -> Vec<RayHit> {
        let mut hits = Vec::new();
        self.traverse(ray, t_max, |t, limit| {
            if let Some(hit) = self.intersect_triangle(ray, t, *limit) {
                hits.push(hit);
            }
            false
        });
        hits.sort_by(|a, b| a.t.total_cmp(&b.t));
        hits.truncate(max_hits);
        hits
    }

    /// Walk the leaves whose boxes the ray enters before the current limit.
    /// `visit` may shrink the limit and returns true to stop.
    fn traverse(&self, ray: &Ray, t_max: f32, mut visit: impl FnMut(usize, &mut f32) -> bool) {
        if self.nodes.is_empty() {
            return;
        }
        let mut limit = t_max;
        let inv_dir = Vector3f::new(1.0 / ray.direction.x, 1.0 / ray.direction.y, 1.0 / ray.direction.z);
        let mut stack = vec![0usize];
        while let Some(index) = stack.pop() {
            let node = &self.nodes[index];
            if !slab_test(&node.bounds, ray, &inv_dir, limit) {
                continue;
            }
            if node.is_leaf() {
                let range = node.first as usize..(node.first + node.count) as usize;
                for &t in &self.order[range] {
                    if visit(t as usize, &mut limit) {
                        return;
                    }
                }
            } else {
                stack.push(node.right as usize);
                stack.push(index + 1);
            }
        }
    }

    fn intersect_triangle(&self, ray: &Ray, triangle: usize, t_max: f32) -> Option<RayHit> {
        let [a, b, c] = self.triangles[triangle];
        let e1 = b - a;
        let e2 = c - a;
        let p = ray.direction.cross(&e2);
        let det = e1.dot(&p);
        if self.cull_backfaces && det <= 0.0 {
            return None;
        }
        if det.abs() < 1e-12 {
            return None;
        }
        let inv_det = 1.0 / det;
        let s = ray.origin - a;
        let u = s.dot(&p) * inv_det;
        if !(0.0..=1.0).contains(&u) {
            return None;
        }
        let q = s.cross(&e1);
        let v = ray.direction.dot(&q) * inv_det;
        if v < 0.0 || u + v > 1.0 {
            return None;
        }
        let t = e2.dot(&q) * inv_det;
        if t <= 1e-6 || t >= t_max {
            return None;
        }
        Some(RayHit {
            triangle,
            t,
            barycentric: [1.0 - u - v, u, v],
        })
    }
}

fn slab_test(bounds: &Aabb, ray: &Ray, inv_dir: &Vector3f, t_max: f32) -> bool {
    let mut t0 = 0.0f32;
    let mut t1 = t_max;
    for i in 0..3 {
        let mut near = (bounds.min[i] - ray.origin[i]) * inv_dir[i];
        let mut far = (bounds.max[i] - ray.origin[i]) * inv_dir[i];
        if near > far {
            std::mem::swap(&mut near, &mut far);
        }
        // NaN from 0 * inf keeps the current interval
        t0 = if near > t0 { near } else { t0 };
        t1 = if far < t1 { far } else { t1 };
        if t0 > t1 * (1.0 + 4.0 * f32::EPSILON) {
            return false;
        }
    }
    true
}

/// Closest point on a triangle to `p` and its barycentric coordinates
pub fn closest_point_on_triangle(p: &Point3f, tri: &[Point3f; 3]) -> (Point3f, [f32; 3]) {
    let [a, b, c] = *tri;
    let ab = b - a;
    let ac = c - a;
    let ap = p - a;
    let d1 = ab.dot(&ap);
    let d2 = ac.dot(&ap);
    if d1 <= 0.0 && d2 <= 0.0 {
        return (a, [1.0, 0.0, 0.0]);
    }

    let bp = p - b;
    let d3 = ab.dot(&bp);
    let d4 = ac.dot(&bp);
    if d3 >= 0.0 && d4 <= d3 {
        return (b, [0.0, 1.0, 0.0]);
    }

    let vc = d1 * d4 - d3 * d2;
    if vc <= 0.0 && d1 >= 0.0 && d3 <= 0.0 {
        let v = d1 / (d1 - d3);
        return (a + ab * v, [1.0 - v, v, 0.0]);
    }

    let cp = p - c;
    let d5 = ab.dot(&cp);
    let d6 = ac.dot(&cp);
    if d6 >= 0.0 && d5 <= d6 {
        return (c, [0.0, 0.0, 1.0]);
    }

    let vb = d5 * d2 - d1 * d6;
    if vb <= 0.0 && d2 >= 0.0 && d6 <= 0.0 {
        let w = d2 / (d2 - d6);
        return (a + ac * w, [1.0 - w, 0.0, w]);
    }

    let va = d3 * d6 - d5 * d4;
    if va <= 0.0 && (d4 - d3) >= 0.0 && (d5 - d6) >= 0.0 {
        let w = (d4 - d3) / ((d4 - d3) + (d5 - d6));
        return (b + (c - b) * w, [0.0, 1.0 - w, w]);
    }

    let denom = 1.0 / (va + vb + vc);
    if !denom.is_finite() {
        // Degenerate triangle
        return (a, [1.0, 0.0, 0.0]);
    }
    let v = vb * denom;
    let w = vc * denom;
    (a + ab * v + ac * w, [1.0 - v - w, v, w])
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn grid(n: usize, z: f32) -> Vec<[Point3f; 3]> {
        let mut tris = Vec::new();
        for i in 0..n {
            for j in 0..n {
                let (x, y) = (i as f32, j as f32);
                tris.push([
                    Point3f::new(x, y, z),
                    Point3f::new(x + 1.0, y, z),
                    Point3f::new(x + 1.0, y + 1.0, z),
                ]);
                tris.push([
                    Point3f::new(x, y, z),
                    Point3f::new(x + 1.0, y + 1.0, z),
                    Point3f::new(x, y + 1.0, z),
                ]);
            }
        }
        tris
    }

    #[test]
    fn test_intersect_matches_brute_force() {
        let mut tris = grid(8, 0.0);
        tris.extend(grid(8, 2.0));
        let bvh = TriangleBvh::from_triangles(tris);
        let ray = Ray::new(Point3f::new(3.3, 4.6, 5.0), Vector3f::new(0.0, 0.0, -1.0));
        let hit = bvh.intersect(&ray, f32::MAX).unwrap();
        assert_relative_eq!(hit.t, 3.0, epsilon = 1e-5);
        assert!(hit.triangle >= 128);

        let hits = bvh.closest_hits(&ray, f32::MAX, 4);
        assert_eq!(hits.len(), 2);
        assert_relative_eq!(hits[1].t, 5.0, epsilon = 1e-5);
        assert!(bvh.occluded(&ray, 10.0));
        assert!(!bvh.occluded(&ray, 2.0));
    }

    #[test]
    fn test_backface_culling() {
        let bvh = TriangleBvh::from_triangles(grid(2, 0.0)).with_backface_culling(true);
        let down = Ray::new(Point3f::new(0.5, 0.4, 1.0), Vector3f::new(0.0, 0.0, -1.0));
        let up = Ray::new(Point3f::new(0.5, 0.4, -1.0), Vector3f::new(0.0, 0.0, 1.0));
        assert!(bvh.intersect(&down, f32::MAX).is_some());
        assert!(bvh.intersect(&up, f32::MAX).is_none());
    }

    #[test]
    fn test_closest_point_regions() {
        let tri = [
            Point3f::new(0.0, 0.0, 0.0),
            Point3f::new(1.0, 0.0, 0.0),
            Point3f::new(0.0, 1.0, 0.0),
        ];
        let (p, bary) = closest_point_on_triangle(&Point3f::new(0.25, 0.25, 1.0), &tri);
        assert_relative_eq!(p, Point3f::new(0.25, 0.25, 0.0), epsilon = 1e-6);
        assert_relative_eq!(bary[0], 0.5, epsilon = 1e-6);

        let (p, bary) = closest_point_on_triangle(&Point3f::new(-1.0, -1.0, 0.0), &tri);
        assert_eq!(p, tri[0]);
        assert_eq!(bary, [1.0, 0.0, 0.0]);

        let (p, _) = closest_point_on_triangle(&Point3f::new(1.0, 1.0, 0.0), &tri);
        assert_relative_eq!(p, Point3f::new(0.5, 0.5, 0.0), epsilon = 1e-6);
    }
}
