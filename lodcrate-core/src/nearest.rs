//! Closest triangle queries backed by an R*-tree

use crate::geometry::GeometryData;
use crate::point::*;
use crate::raycast::closest_point_on_triangle;
use rstar::{PointDistance, RTree, RTreeObject, AABB};

/// A triangle stored in the tree with its index in the source geometry
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndexedTriangle {
    pub corners: [Point3f; 3],
    pub index: usize,
}

impl RTreeObject for IndexedTriangle {
    type Envelope = AABB<[f32; 3]>;

    fn envelope(&self) -> Self::Envelope {
        let [a, b, c] = self.corners;
        AABB::from_corners(
            [a.x.min(b.x).min(c.x), a.y.min(b.y).min(c.y), a.z.min(b.z).min(c.z)],
            [a.x.max(b.x).max(c.x), a.y.max(b.y).max(c.y), a.z.max(b.z).max(c.z)],
        )
    }
}

impl PointDistance for IndexedTriangle {
    fn distance_2(&self, point: &[f32; 3]) -> f32 {
        let p = Point3f::from(*point);
        let (closest, _) = closest_point_on_triangle(&p, &self.corners);
        (closest - p).norm_squared()
    }
}

/// Result of a closest triangle query
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClosestTriangle {
    pub triangle: usize,
    pub point: Point3f,
    pub barycentric: [f32; 3],
    pub distance: f32,
}

/// Spatial index answering "which triangle is closest to this point"
pub struct TriangleIndex {
    tree: RTree<IndexedTriangle>,
}

impl TriangleIndex {
    pub fn new(geometry: &GeometryData) -> Self {
        let triangles = (0..geometry.triangle_count())
            .map(|t| IndexedTriangle {
                corners: geometry.triangle_positions(t),
                index: t,
            })
            .collect();
        Self {
            tree: RTree::bulk_load(triangles),
        }
    }

    pub fn len(&self) -> usize {
        self.tree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }

    pub fn closest(&self, p: &Point3f) -> Option<ClosestTriangle> {
        let found = self.tree.nearest_neighbor(&[p.x, p.y, p.z])?;
        let (point, barycentric) = closest_point_on_triangle(p, &found.corners);
        Some(ClosestTriangle {
            triangle: found.index,
            point,
            barycentric,
            distance: (point - p).norm(),
        })
    }

    /// Unsigned distance to the surface, infinite for an empty index
    pub fn distance(&self, p: &Point3f) -> f32 {
        self.closest(p).map_or(f32::INFINITY, |c| c.distance)
    }

    /// Whether any triangle comes within `radius` of `p`
    pub fn any_within(&self, p: &Point3f, radius: f32) -> bool {
        self.tree
            .locate_within_distance([p.x, p.y, p.z], radius * radius)
            .next()
            .is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn two_triangles() -> GeometryData {
        GeometryData::from_triangles(
            vec![
                Point3f::new(0.0, 0.0, 0.0),
                Point3f::new(1.0, 0.0, 0.0),
                Point3f::new(0.0, 1.0, 0.0),
                Point3f::new(5.0, 0.0, 0.0),
                Point3f::new(6.0, 0.0, 0.0),
                Point3f::new(5.0, 1.0, 0.0),
            ],
            vec![[0, 1, 2], [3, 4, 5]],
        )
    }

    #[test]
    fn test_closest_triangle() {
        let index = TriangleIndex::new(&two_triangles());
        assert_eq!(index.len(), 2);

        let hit = index.closest(&Point3f::new(0.25, 0.25, 2.0)).unwrap();
        assert_eq!(hit.triangle, 0);
        assert_relative_eq!(hit.distance, 2.0, epsilon = 1e-6);
        assert_relative_eq!(hit.barycentric[1], 0.25, epsilon = 1e-6);

        let hit = index.closest(&Point3f::new(7.0, 0.0, 0.0)).unwrap();
        assert_eq!(hit.triangle, 1);
        assert_relative_eq!(hit.point.x, 6.0, epsilon = 1e-6);
    }

    #[test]
    fn test_within_and_empty() {
        let index = TriangleIndex::new(&two_triangles());
        assert!(index.any_within(&Point3f::new(0.2, 0.2, 0.5), 0.6));
        assert!(!index.any_within(&Point3f::new(3.0, 3.0, 3.0), 0.5));

        let empty = TriangleIndex::new(&GeometryData::new());
        assert!(empty.is_empty());
        assert!(empty.distance(&Point3f::origin()).is_infinite());
    }
}
