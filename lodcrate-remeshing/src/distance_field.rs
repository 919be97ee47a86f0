//! Distance fields over triangle geometry
//!
//! The unsigned distance is only evaluated exactly in a narrow band around
//! the surface; samples further away hold the band limit. The sign comes
//! from a flood fill of the outside region starting at the grid boundary.

use crate::grid::VoxelGrid;
use lodcrate_core::{Aabb, GeometryData, ProcessContext, Result, TriangleIndex};
use rayon::prelude::*;
use std::collections::VecDeque;

/// Samples closer to the surface than this many cells block the flood fill.
/// Any face neighbour step that crosses the surface has one endpoint within
/// half a cell of it.
pub const BLOCKING_BAND: f32 = 0.5;

/// Unsigned distance from every sample to the geometry, exact up to
/// `band_cells` cells away and clamped beyond
pub fn unsigned_distance_field(
    geometry: &GeometryData,
    grid: &mut VoxelGrid,
    band_cells: f32,
    ctx: &ProcessContext,
) -> Result<()> {
    let limit = band_cells * grid.cell_size;
    grid.values.iter_mut().for_each(|v| *v = limit);

    // Only samples near some triangle need an exact query
    let mut candidate = vec![false; grid.len()];
    for t in 0..geometry.triangle_count() {
        let corners = geometry.triangle_positions(t);
        let bounds = Aabb::from_points(corners.iter()).expanded(limit);
        let Some((lo, hi)) = grid.cell_range(&bounds) else {
            continue;
        };
        for z in lo[2]..=hi[2] {
            for y in lo[1]..=hi[1] {
                let row = grid.index(lo[0], y, z);
                candidate[row..=row + (hi[0] - lo[0])].iter_mut().for_each(|c| *c = true);
            }
        }
    }
    ctx.step(10.0)?;

    let index = TriangleIndex::new(geometry);
    let slice = grid.dimensions[0] * grid.dimensions[1];
    let slices = grid.dimensions[2].max(1);
    let origin = grid.origin;
    let cell = grid.cell_size;
    let [nx, ny, _] = grid.dimensions;
    grid.values
        .par_chunks_mut(slice)
        .enumerate()
        .for_each(|(z, values)| {
            if ctx.token().is_cancelled() {
                return;
            }
            for (i, value) in values.iter_mut().enumerate() {
                if !candidate[z * slice + i] {
                    continue;
                }
                let p = lodcrate_core::Point3f::new(
                    origin.x + (i % nx) as f32 * cell,
                    origin.y + ((i / nx) % ny) as f32 * cell,
                    origin.z + z as f32 * cell,
                );
                *value = index.distance(&p).min(limit);
            }
        });
    ctx.checkpoint()?;
    tracing::debug!(
        "distance field {:?}, {} exact samples over {} slices",
        grid.dimensions,
        candidate.iter().filter(|c| **c).count(),
        slices
    );
    ctx.report(100.0);
    Ok(())
}

/// Samples reachable from the grid boundary without passing closer than
/// `BLOCKING_BAND + fill_cells` cells to the surface. The reached region is
/// then grown back by `fill_cells` steps so the outside hugs the surface
/// again everywhere except across openings narrower than the widened band.
pub fn outside_region(grid: &VoxelGrid, fill_cells: u32) -> Vec<bool> {
    let band = BLOCKING_BAND * grid.cell_size;
    let blocking = band + fill_cells as f32 * grid.cell_size;
    let mut outside = vec![false; grid.len()];
    let mut queue = VecDeque::new();
    for i in 0..grid.len() {
        if grid.is_boundary(i) && grid.values[i] > blocking {
            outside[i] = true;
            queue.push_back(i);
        }
    }
    while let Some(i) = queue.pop_front() {
        for n in grid.neighbours(i) {
            if !outside[n] && grid.values[n] > blocking {
                outside[n] = true;
                queue.push_back(n);
            }
        }
    }

    // Grow back over the widened band, one ring per step
    let mut frontier: Vec<usize> = (0..grid.len()).filter(|&i| outside[i]).collect();
    for _ in 0..fill_cells {
        let mut next = Vec::new();
        for &i in &frontier {
            for n in grid.neighbours(i) {
                if !outside[n] && grid.values[n] > band {
                    outside[n] = true;
                    next.push(n);
                }
            }
        }
        if next.is_empty() {
            break;
        }
        frontier = next;
    }
    outside
}

/// Turn an unsigned field into a signed one: negative everywhere outside
/// the flood filled region
pub fn apply_sign(grid: &mut VoxelGrid, outside: &[bool]) {
    let epsilon = grid.cell_size * 1e-4;
    grid.values
        .par_iter_mut()
        .zip(outside.par_iter())
        .for_each(|(value, &out)| {
            let magnitude = value.max(epsilon);
            *value = if out { magnitude } else { -magnitude };
        });
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use lodcrate_core::Point3f;

    /// A hollow box of blocking samples with a one cell opening in the +x
    /// wall
    fn walled_grid() -> VoxelGrid {
        let mut grid = VoxelGrid::new([11, 11, 11], 1.0, Point3f::origin(), 10.0);
        for z in 2..=8 {
            for y in 2..=8 {
                for x in 2..=8 {
                    let wall = [x, y, z].iter().any(|&c| c == 2 || c == 8);
                    if wall && !(x == 8 && y == 5 && z == 5) {
                        grid.set(x, y, z, 0.0).unwrap();
                    }
                }
            }
        }
        grid
    }

    #[test]
    fn test_flood_fill_leaks_through_opening() {
        let grid = walled_grid();
        let outside = outside_region(&grid, 0);
        assert!(outside[grid.index(0, 0, 0)]);
        assert!(outside[grid.index(5, 5, 5)]);
    }

    #[test]
    fn test_hole_filling_closes_opening() {
        let mut grid = walled_grid();
        // Samples next to the wall are one cell from the surface
        for i in 0..grid.len() {
            if grid.values[i] > 0.0 && grid.neighbours(i).any(|n| grid.values[n] == 0.0) {
                grid.values[i] = 1.0;
            }
        }
        let outside = outside_region(&grid, 1);
        assert!(outside[grid.index(0, 0, 0)]);
        assert!(!outside[grid.index(5, 5, 5)]);
        // Grown back to the wall everywhere else
        assert!(outside[grid.index(1, 5, 5)]);
    }

    #[test]
    fn test_unsigned_distance_to_plane() {
        let geometry = GeometryData::from_triangles(
            vec![
                Point3f::new(-1.0, -1.0, 0.0),
                Point3f::new(5.0, -1.0, 0.0),
                Point3f::new(5.0, 5.0, 0.0),
                Point3f::new(-1.0, 5.0, 0.0),
            ],
            vec![[0, 1, 2], [0, 2, 3]],
        );
        let mut grid = VoxelGrid::new([4, 4, 6], 0.5, Point3f::new(0.0, 0.0, -1.0), 0.0);
        unsigned_distance_field(&geometry, &mut grid, 1.5, &ProcessContext::new()).unwrap();
        assert_relative_eq!(grid.get(1, 1, 2).unwrap(), 0.0, epsilon = 1e-6);
        assert_relative_eq!(grid.get(1, 1, 3).unwrap(), 0.5, epsilon = 1e-6);
        assert_relative_eq!(grid.get(1, 1, 5).unwrap(), 0.75, epsilon = 1e-6);
    }

    #[test]
    fn test_sign() {
        let mut grid = VoxelGrid::new([2, 1, 1], 1.0, Point3f::origin(), 0.0);
        grid.values = vec![2.0, 0.0];
        apply_sign(&mut grid, &[true, false]);
        assert_eq!(grid.values[0], 2.0);
        assert!(grid.values[1] < 0.0);
    }
}
