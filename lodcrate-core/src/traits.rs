//! Core traits and bounding volumes

use crate::point::*;
use crate::transform::Transform3D;
use serde::{Deserialize, Serialize};

/// Axis aligned bounding box
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    pub min: Point3f,
    pub max: Point3f,
}

impl Aabb {
    /// An inverted box that any point extends
    pub fn empty() -> Self {
        Self {
            min: Point3f::new(f32::MAX, f32::MAX, f32::MAX),
            max: Point3f::new(f32::MIN, f32::MIN, f32::MIN),
        }
    }

    pub fn new(min: Point3f, max: Point3f) -> Self {
        Self { min, max }
    }

    pub fn from_points<'a>(points: impl IntoIterator<Item = &'a Point3f>) -> Self {
        let mut aabb = Self::empty();
        for p in points {
            aabb.extend(p);
        }
        aabb
    }

    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    pub fn extend(&mut self, p: &Point3f) {
        self.min = self.min.inf(p);
        self.max = self.max.sup(p);
    }

    pub fn merge(&mut self, other: &Aabb) {
        if other.is_empty() {
            return;
        }
        self.extend(&other.min);
        self.extend(&other.max);
    }

    pub fn center(&self) -> Point3f {
        if self.is_empty() {
            return Point3f::origin();
        }
        nalgebra::center(&self.min, &self.max)
    }

    pub fn extent(&self) -> Vector3f {
        if self.is_empty() {
            return Vector3f::zeros();
        }
        self.max - self.min
    }

    pub fn diagonal(&self) -> f32 {
        self.extent().norm()
    }

    /// Radius of the bounding sphere around the box center
    pub fn radius(&self) -> f32 {
        self.diagonal() * 0.5
    }

    pub fn contains(&self, p: &Point3f) -> bool {
        (0..3).all(|i| p[i] >= self.min[i] && p[i] <= self.max[i])
    }

    /// Box grown by `margin` on every side
    pub fn expanded(&self, margin: f32) -> Self {
        let m = Vector3f::repeat(margin);
        Self::new(self.min - m, self.max + m)
    }

    /// Bounds of the eight transformed corners
    pub fn transformed(&self, transform: &Transform3D) -> Self {
        if self.is_empty() {
            return *self;
        }
        let mut out = Self::empty();
        for i in 0..8 {
            let corner = Point3f::new(
                if i & 1 == 0 { self.min.x } else { self.max.x },
                if i & 2 == 0 { self.min.y } else { self.max.y },
                if i & 4 == 0 { self.min.z } else { self.max.z },
            );
            out.extend(&transform.transform_point(&corner));
        }
        out
    }

    /// Index of the longest axis
    pub fn longest_axis(&self) -> usize {
        let e = self.extent();
        if e.x >= e.y && e.x >= e.z {
            0
        } else if e.y >= e.z {
            1
        } else {
            2
        }
    }
}

impl Default for Aabb {
    fn default() -> Self {
        Self::empty()
    }
}

/// Objects with spatial extent
pub trait Bounded {
    /// Get the bounding box of the object
    fn bounding_box(&self) -> Aabb;

    /// Get the center point of the object
    fn center(&self) -> Point3f {
        self.bounding_box().center()
    }

    /// Radius of the bounding sphere
    fn radius(&self) -> f32 {
        self.bounding_box().radius()
    }
}

/// Trait for objects that can be transformed
pub trait Transformable {
    /// Apply a transformation to the object
    fn transform(&mut self, transform: &Transform3D);
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_aabb_extend_and_radius() {
        let aabb = Aabb::from_points(&[Point3f::new(-1.0, -1.0, -1.0), Point3f::new(1.0, 1.0, 1.0)]);
        assert!(!aabb.is_empty());
        assert_relative_eq!(aabb.radius(), 3.0f32.sqrt());
        assert_eq!(aabb.center(), Point3f::origin());
        assert!(aabb.contains(&Point3f::new(0.5, 0.0, -0.5)));
    }

    #[test]
    fn test_empty_aabb() {
        let aabb = Aabb::empty();
        assert!(aabb.is_empty());
        assert_eq!(aabb.extent(), Vector3f::zeros());
        let mut merged = Aabb::empty();
        merged.merge(&aabb);
        assert!(merged.is_empty());
    }

    #[test]
    fn test_longest_axis() {
        let aabb = Aabb::new(Point3f::origin(), Point3f::new(1.0, 5.0, 2.0));
        assert_eq!(aabb.longest_axis(), 1);
    }
}
