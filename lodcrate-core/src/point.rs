//! Point, vector and color types

use bytemuck::{Pod, Zeroable};
use nalgebra::{Point2, Point3, Vector2, Vector3};
use serde::{Deserialize, Serialize};

/// A 3D point with floating point coordinates
pub type Point3f = Point3<f32>;

/// A 3D point with double precision coordinates
pub type Point3d = Point3<f64>;

/// A 3D vector with floating point components
pub type Vector3f = Vector3<f32>;

/// A 3D vector with double precision components
pub type Vector3d = Vector3<f64>;

/// A texture coordinate
pub type Point2f = Point2<f32>;

/// A 2D vector with floating point components
pub type Vector2f = Vector2<f32>;

/// Linear RGBA color with components in [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[repr(C)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

unsafe impl Pod for Color {}
unsafe impl Zeroable for Color {}

impl Color {
    pub const BLACK: Color = Color::new(0.0, 0.0, 0.0, 1.0);
    pub const WHITE: Color = Color::new(1.0, 1.0, 1.0, 1.0);
    pub const TRANSPARENT: Color = Color::new(0.0, 0.0, 0.0, 0.0);

    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    /// Same value in all four components
    pub const fn splat(v: f32) -> Self {
        Self::new(v, v, v, v)
    }

    pub fn from_array(values: [f32; 4]) -> Self {
        Self::new(values[0], values[1], values[2], values[3])
    }

    pub fn to_array(self) -> [f32; 4] {
        [self.r, self.g, self.b, self.a]
    }

    pub fn component(&self, index: usize) -> f32 {
        match index {
            0 => self.r,
            1 => self.g,
            2 => self.b,
            _ => self.a,
        }
    }

    pub fn map(self, f: impl Fn(f32) -> f32) -> Self {
        Self::new(f(self.r), f(self.g), f(self.b), f(self.a))
    }

    pub fn zip(self, other: Self, f: impl Fn(f32, f32) -> f32) -> Self {
        Self::new(
            f(self.r, other.r),
            f(self.g, other.g),
            f(self.b, other.b),
            f(self.a, other.a),
        )
    }

    pub fn lerp(self, other: Self, t: f32) -> Self {
        self.zip(other, |a, b| a + (b - a) * t)
    }

    /// Weighted sum used for barycentric interpolation
    pub fn weighted(values: [Color; 3], weights: [f32; 3]) -> Self {
        let mut out = Color::TRANSPARENT;
        for (c, w) in values.iter().zip(weights) {
            out = out.zip(*c, |a, b| a + b * w);
        }
        out
    }

    pub fn clamped(self) -> Self {
        self.map(|v| v.clamp(0.0, 1.0))
    }
}

impl Default for Color {
    fn default() -> Self {
        Self::WHITE
    }
}

impl From<[f32; 4]> for Color {
    fn from(values: [f32; 4]) -> Self {
        Self::from_array(values)
    }
}

impl From<[f32; 3]> for Color {
    fn from(values: [f32; 3]) -> Self {
        Self::new(values[0], values[1], values[2], 1.0)
    }
}

/// Interpolate a vector attribute with barycentric weights
pub fn interpolate_vector(values: [Vector3f; 3], weights: [f32; 3]) -> Vector3f {
    values[0] * weights[0] + values[1] * weights[1] + values[2] * weights[2]
}

/// Interpolate a texture coordinate with barycentric weights
pub fn interpolate_uv(values: [Point2f; 3], weights: [f32; 3]) -> Point2f {
    Point2f::from(
        values[0].coords * weights[0] + values[1].coords * weights[1] + values[2].coords * weights[2],
    )
}

/// Interpolate a position with barycentric weights
pub fn interpolate_point(values: [Point3f; 3], weights: [f32; 3]) -> Point3f {
    Point3f::from(
        values[0].coords * weights[0] + values[1].coords * weights[1] + values[2].coords * weights[2],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_color_weighted() {
        let c = Color::weighted(
            [
                Color::new(1.0, 0.0, 0.0, 1.0),
                Color::new(0.0, 1.0, 0.0, 1.0),
                Color::new(0.0, 0.0, 1.0, 1.0),
            ],
            [0.5, 0.25, 0.25],
        );
        assert_relative_eq!(c.r, 0.5);
        assert_relative_eq!(c.g, 0.25);
        assert_relative_eq!(c.b, 0.25);
        assert_relative_eq!(c.a, 1.0);
    }

    #[test]
    fn test_interpolate_point_at_vertex() {
        let p = interpolate_point(
            [
                Point3f::new(0.0, 0.0, 0.0),
                Point3f::new(1.0, 0.0, 0.0),
                Point3f::new(0.0, 1.0, 0.0),
            ],
            [0.0, 1.0, 0.0],
        );
        assert_relative_eq!(p.x, 1.0);
        assert_relative_eq!(p.y, 0.0);
    }
}
