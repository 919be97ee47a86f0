//! Point lookups backed by an R*-tree

use lodcrate_core::Point3f;
use rstar::RTree;

/// A vertex position with its index
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndexedPoint {
    pub point: Point3f,
    pub index: usize,
}

impl rstar::Point for IndexedPoint {
    type Scalar = f32;
    const DIMENSIONS: usize = 3;

    fn generate(mut generator: impl FnMut(usize) -> Self::Scalar) -> Self {
        Self {
            point: Point3f::new(generator(0), generator(1), generator(2)),
            index: usize::MAX,
        }
    }

    fn nth(&self, index: usize) -> Self::Scalar {
        self.point[index]
    }

    fn nth_mut(&mut self, index: usize) -> &mut Self::Scalar {
        &mut self.point[index]
    }
}

/// Spatial index over a set of points
pub struct PointIndex {
    tree: RTree<IndexedPoint>,
}

impl PointIndex {
    pub fn new(points: impl IntoIterator<Item = (usize, Point3f)>) -> Self {
        let points: Vec<IndexedPoint> = points
            .into_iter()
            .map(|(index, point)| IndexedPoint { point, index })
            .collect();
        Self {
            tree: RTree::bulk_load(points),
        }
    }

    pub fn len(&self) -> usize {
        self.tree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }

    /// Indices of the points within `radius` of `p` (inclusive)
    pub fn within(&self, p: &Point3f, radius: f32) -> Vec<usize> {
        let query = IndexedPoint {
            point: *p,
            index: usize::MAX,
        };
        self.tree
            .locate_within_distance(query, radius * radius)
            .map(|ip| ip.index)
            .collect()
    }

    /// Closest point within `radius`, ignoring `exclude`
    pub fn nearest_within(&self, p: &Point3f, radius: f32, exclude: Option<usize>) -> Option<usize> {
        let query = IndexedPoint {
            point: *p,
            index: usize::MAX,
        };
        self.tree
            .nearest_neighbor_iter(&query)
            .take_while(|ip| (ip.point - p).norm() <= radius)
            .find(|ip| Some(ip.index) != exclude)
            .map(|ip| ip.index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_within_and_nearest() {
        let index = PointIndex::new(vec![
            (0, Point3f::new(0.0, 0.0, 0.0)),
            (1, Point3f::new(0.0, 0.0, 0.0)),
            (2, Point3f::new(1.0, 0.0, 0.0)),
        ]);
        assert_eq!(index.len(), 3);
        let mut hits = index.within(&Point3f::origin(), 0.0);
        hits.sort_unstable();
        assert_eq!(hits, vec![0, 1]);
        let mut hits = index.within(&Point3f::origin(), 1.5);
        hits.sort_unstable();
        assert_eq!(hits, vec![0, 1, 2]);

        assert_eq!(index.nearest_within(&Point3f::new(0.9, 0.0, 0.0), 0.2, None), Some(2));
        assert_eq!(index.nearest_within(&Point3f::new(0.9, 0.0, 0.0), 0.2, Some(2)), None);
    }
}
