//! Mirror symmetry planes for symmetric reduction

use crate::settings::{ReductionSettings, SymmetryAxis};
use crate::spatial::PointIndex;
use lodcrate_core::{Aabb, Point3f};

/// Axis aligned mirror plane `p[axis] == offset`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SymmetryPlane {
    pub axis: SymmetryAxis,
    pub offset: f32,
    /// Absolute distance under which two positions are mirror images
    pub tolerance: f32,
}

impl SymmetryPlane {
    pub fn reflect(&self, p: &Point3f) -> Point3f {
        let mut r = *p;
        let i = self.axis.index();
        r[i] = 2.0 * self.offset - p[i];
        r
    }

    pub fn project(&self, p: &Point3f) -> Point3f {
        let mut r = *p;
        r[self.axis.index()] = self.offset;
        r
    }

    pub fn contains(&self, p: &Point3f) -> bool {
        (p[self.axis.index()] - self.offset).abs() <= self.tolerance
    }

    /// Mirror vertex of every vertex; a vertex on the plane is its own mirror
    pub fn mirror_map(&self, coords: &[Point3f]) -> Vec<Option<usize>> {
        let index = PointIndex::new(coords.iter().copied().enumerate());
        coords
            .iter()
            .enumerate()
            .map(|(v, p)| {
                if self.contains(p) {
                    Some(v)
                } else {
                    index.nearest_within(&self.reflect(p), self.tolerance, None)
                }
            })
            .collect()
    }

    /// Plane from the settings: the configured axis and offset, or the axis
    /// through the bounds center with the most mirrored vertices when
    /// automatic detection is on. The detection tolerance is relative to the
    /// bounding box diagonal.
    pub fn from_settings(settings: &ReductionSettings, coords: &[Point3f]) -> Option<Self> {
        if !settings.keep_symmetry || coords.is_empty() {
            return None;
        }
        let bounds = Aabb::from_points(coords);
        let tolerance = (settings.symmetry_detection_tolerance * bounds.diagonal()).max(f32::EPSILON);
        if !settings.use_automatic_symmetry_detection {
            return Some(Self {
                axis: settings.symmetry_axis,
                offset: settings.symmetry_offset,
                tolerance,
            });
        }
        Self::detect(coords, tolerance)
    }

    /// Axis aligned plane through the bounds center with the most mirrored
    /// vertices; `None` when fewer than half of the vertices are mirrored
    pub fn detect(coords: &[Point3f], tolerance: f32) -> Option<Self> {
        let center = Aabb::from_points(coords).center();
        let (plane, mirrored) = SymmetryAxis::ALL
            .iter()
            .map(|&axis| {
                let plane = Self {
                    axis,
                    offset: center[axis.index()],
                    tolerance,
                };
                let mirrored = plane.mirror_map(coords).iter().filter(|m| m.is_some()).count();
                (plane, mirrored)
            })
            .max_by_key(|(_, mirrored)| *mirrored)?;
        if mirrored * 2 < coords.len() {
            tracing::debug!("no symmetry plane found ({} of {} vertices mirrored)", mirrored, coords.len());
            return None;
        }
        tracing::debug!(
            "detected symmetry plane {:?} = {} ({} of {} vertices mirrored)",
            plane.axis,
            plane.offset,
            mirrored,
            coords.len()
        );
        Some(plane)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mirrored_points() -> Vec<Point3f> {
        vec![
            Point3f::new(-1.0, 0.0, 0.0),
            Point3f::new(1.0, 0.0, 0.0),
            Point3f::new(-2.0, 1.0, 0.3),
            Point3f::new(2.0, 1.0, 0.3),
            Point3f::new(0.0, 2.0, 0.7),
        ]
    }

    #[test]
    fn test_mirror_map() {
        let plane = SymmetryPlane {
            axis: SymmetryAxis::X,
            offset: 0.0,
            tolerance: 1e-4,
        };
        let map = plane.mirror_map(&mirrored_points());
        assert_eq!(map, vec![Some(1), Some(0), Some(3), Some(2), Some(4)]);
        assert_eq!(plane.project(&Point3f::new(3.0, 1.0, 1.0)), Point3f::new(0.0, 1.0, 1.0));
    }

    #[test]
    fn test_detect_axis() {
        let plane = SymmetryPlane::detect(&mirrored_points(), 1e-4).unwrap();
        assert_eq!(plane.axis, SymmetryAxis::X);
        assert_eq!(plane.offset, 0.0);
    }
}
