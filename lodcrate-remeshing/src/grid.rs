//! Regular voxel grid of scalar samples

use lodcrate_core::{Aabb, Error, Point3f, Result};

/// Scalar samples on the corners of a regular grid. Values are stored x
/// fastest, then y, then z.
#[derive(Debug, Clone, PartialEq)]
pub struct VoxelGrid {
    pub values: Vec<f32>,
    pub dimensions: [usize; 3],
    pub cell_size: f32,
    pub origin: Point3f,
}

impl VoxelGrid {
    pub fn new(dimensions: [usize; 3], cell_size: f32, origin: Point3f, fill: f32) -> Self {
        Self {
            values: vec![fill; dimensions[0] * dimensions[1] * dimensions[2]],
            dimensions,
            cell_size,
            origin,
        }
    }

    /// Grid covering `bounds` plus `padding` cells on every side
    pub fn covering(bounds: &Aabb, cell_size: f32, padding: usize, fill: f32) -> Result<Self> {
        if bounds.is_empty() {
            return Err(Error::InvalidData("cannot build a grid around empty bounds".to_string()));
        }
        if !(cell_size > 0.0 && cell_size.is_finite()) {
            return Err(Error::InvalidSettings(format!("invalid cell size {}", cell_size)));
        }
        let extent = bounds.extent();
        let margin = padding as f32 * cell_size;
        let dimensions = [0, 1, 2].map(|a| (extent[a] / cell_size).ceil() as usize + 1 + 2 * padding);
        let origin = Point3f::new(bounds.min.x - margin, bounds.min.y - margin, bounds.min.z - margin);
        Ok(Self::new(dimensions, cell_size, origin, fill))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[inline]
    pub fn index(&self, x: usize, y: usize, z: usize) -> usize {
        x + self.dimensions[0] * (y + self.dimensions[1] * z)
    }

    #[inline]
    pub fn coords(&self, index: usize) -> [usize; 3] {
        let [nx, ny, _] = self.dimensions;
        [index % nx, (index / nx) % ny, index / (nx * ny)]
    }

    pub fn get(&self, x: usize, y: usize, z: usize) -> Option<f32> {
        (x < self.dimensions[0] && y < self.dimensions[1] && z < self.dimensions[2])
            .then(|| self.values[self.index(x, y, z)])
    }

    pub fn set(&mut self, x: usize, y: usize, z: usize, value: f32) -> Result<()> {
        if x < self.dimensions[0] && y < self.dimensions[1] && z < self.dimensions[2] {
            let i = self.index(x, y, z);
            self.values[i] = value;
            Ok(())
        } else {
            Err(Error::InvalidData(format!(
                "grid coordinates ({}, {}, {}) out of bounds for dimensions {:?}",
                x, y, z, self.dimensions
            )))
        }
    }

    pub fn grid_to_world(&self, x: usize, y: usize, z: usize) -> Point3f {
        Point3f::new(
            self.origin.x + x as f32 * self.cell_size,
            self.origin.y + y as f32 * self.cell_size,
            self.origin.z + z as f32 * self.cell_size,
        )
    }

    /// Inclusive range of grid coordinates whose samples lie within the box
    pub fn cell_range(&self, bounds: &Aabb) -> Option<([usize; 3], [usize; 3])> {
        let mut lo = [0usize; 3];
        let mut hi = [0usize; 3];
        for a in 0..3 {
            let min = ((bounds.min[a] - self.origin[a]) / self.cell_size).ceil().max(0.0);
            let max = ((bounds.max[a] - self.origin[a]) / self.cell_size).floor();
            if max < 0.0 || min > max {
                return None;
            }
            lo[a] = min as usize;
            hi[a] = (max as usize).min(self.dimensions[a] - 1);
            if lo[a] > hi[a] {
                return None;
            }
        }
        Some((lo, hi))
    }

    /// Indices of the face neighbours of a sample
    pub fn neighbours(&self, index: usize) -> impl Iterator<Item = usize> + '_ {
        let [x, y, z] = self.coords(index);
        let [nx, ny, nz] = self.dimensions;
        let candidates = [
            (x > 0).then(|| index - 1),
            (x + 1 < nx).then(|| index + 1),
            (y > 0).then(|| index - nx),
            (y + 1 < ny).then(|| index + nx),
            (z > 0).then(|| index - nx * ny),
            (z + 1 < nz).then(|| index + nx * ny),
        ];
        candidates.into_iter().flatten()
    }

    /// Whether a sample lies on the outer faces of the grid
    pub fn is_boundary(&self, index: usize) -> bool {
        let c = self.coords(index);
        (0..3).any(|a| c[a] == 0 || c[a] + 1 == self.dimensions[a])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_indexing_round_trip() {
        let grid = VoxelGrid::new([3, 4, 5], 1.0, Point3f::origin(), 0.0);
        assert_eq!(grid.len(), 60);
        let i = grid.index(2, 1, 3);
        assert_eq!(grid.coords(i), [2, 1, 3]);
        assert_eq!(grid.neighbours(i).count(), 5);
        assert!(grid.is_boundary(i));
        assert!(!grid.is_boundary(grid.index(1, 1, 1)));
    }

    #[test]
    fn test_covering_adds_padding() {
        let bounds = Aabb::new(Point3f::new(0.0, 0.0, 0.0), Point3f::new(1.0, 2.0, 0.5));
        let grid = VoxelGrid::covering(&bounds, 0.5, 1, 0.0).unwrap();
        assert_eq!(grid.dimensions, [5, 7, 4]);
        assert_eq!(grid.origin, Point3f::new(-0.5, -0.5, -0.5));
        let far = grid.grid_to_world(4, 6, 3);
        assert!(far.x >= 1.0 && far.y >= 2.0 && far.z >= 0.5);

        assert!(VoxelGrid::covering(&Aabb::empty(), 0.5, 1, 0.0).is_err());
        assert!(VoxelGrid::covering(&bounds, 0.0, 1, 0.0).is_err());
    }

    #[test]
    fn test_set_out_of_bounds() {
        let mut grid = VoxelGrid::new([2, 2, 2], 1.0, Point3f::origin(), 0.0);
        assert!(grid.set(1, 1, 1, 3.0).is_ok());
        assert_eq!(grid.get(1, 1, 1), Some(3.0));
        assert!(grid.set(2, 0, 0, 1.0).is_err());
        assert_eq!(grid.get(2, 0, 0), None);
    }

    #[test]
    fn test_cell_range() {
        let grid = VoxelGrid::new([10, 10, 10], 1.0, Point3f::origin(), 0.0);
        let bounds = Aabb::new(Point3f::new(1.5, 2.0, -3.0), Point3f::new(3.2, 2.5, 0.4));
        assert_eq!(grid.cell_range(&bounds), Some(([2, 2, 0], [3, 2, 0])));
        let outside = Aabb::new(Point3f::new(20.0, 0.0, 0.0), Point3f::new(21.0, 1.0, 1.0));
        assert_eq!(grid.cell_range(&outside), None);
    }
}
