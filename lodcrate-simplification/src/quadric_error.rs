//! Quadric error metric
//!
//! A quadric stores the sum of squared distances to a set of planes as a
//! symmetric 4x4 matrix, so `vᵀ Q v` is the error of placing a vertex at `v`.

use lodcrate_core::{Point3f, Vector3f};
use nalgebra::{Matrix3, Matrix4, Vector3, Vector4};
use std::ops::{Add, AddAssign};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quadric(pub Matrix4<f64>);

impl Default for Quadric {
    fn default() -> Self {
        Self::zero()
    }
}

impl Quadric {
    pub fn zero() -> Self {
        Quadric(Matrix4::zeros())
    }

    /// Quadric of the plane `n·x + d = 0` scaled by `weight`
    pub fn from_plane(normal: Vector3<f64>, d: f64, weight: f64) -> Self {
        let p = Vector4::new(normal.x, normal.y, normal.z, d);
        Quadric(p * p.transpose() * weight)
    }

    /// Quadric of the supporting plane of a triangle, `None` when degenerate
    pub fn from_triangle(a: &Point3f, b: &Point3f, c: &Point3f, weight: f64) -> Option<Self> {
        let n = to_f64(&(b - a)).cross(&to_f64(&(c - a)));
        let len = n.norm();
        if len <= f64::EPSILON || !len.is_finite() {
            return None;
        }
        let n = n / len;
        let d = -n.dot(&to_f64(&a.coords));
        Some(Self::from_plane(n, d, weight))
    }

    /// Plane containing the edge `a -> b` and perpendicular to the face
    /// normal. Added on border and seam edges so that sliding along the edge
    /// is free but moving off it costs.
    pub fn edge_constraint(a: &Point3f, b: &Point3f, face_normal: &Vector3f, weight: f64) -> Option<Self> {
        let edge = to_f64(&(b - a));
        let n = edge.cross(&to_f64(face_normal));
        let len = n.norm();
        if len <= f64::EPSILON || !len.is_finite() {
            return None;
        }
        let n = n / len;
        let d = -n.dot(&to_f64(&a.coords));
        Some(Self::from_plane(n, d, weight))
    }

    /// Error of placing a vertex at `p`, never negative
    pub fn error(&self, p: &Point3f) -> f64 {
        let v = Vector4::new(p.x as f64, p.y as f64, p.z as f64, 1.0);
        (v.transpose() * self.0 * v)[0].max(0.0)
    }

    /// Position minimizing the error, if the system is well conditioned
    pub fn minimizer(&self) -> Option<Point3f> {
        let a: Matrix3<f64> = self.0.fixed_view::<3, 3>(0, 0).into_owned();
        let b = self.0.fixed_view::<3, 1>(0, 3).into_owned();
        let scale = a.norm();
        if scale <= f64::EPSILON || a.determinant().abs() <= 1e-9 * scale * scale * scale {
            return None;
        }
        let p = -a.try_inverse()? * b;
        if !p.iter().all(|x| x.is_finite()) {
            return None;
        }
        Some(Point3f::new(p.x as f32, p.y as f32, p.z as f32))
    }
}

impl Add for Quadric {
    type Output = Quadric;

    fn add(self, rhs: Quadric) -> Quadric {
        Quadric(self.0 + rhs.0)
    }
}

impl AddAssign for Quadric {
    fn add_assign(&mut self, rhs: Quadric) {
        self.0 += rhs.0;
    }
}

#[inline]
fn to_f64(v: &Vector3f) -> Vector3<f64> {
    Vector3::new(v.x as f64, v.y as f64, v.z as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_plane_error() {
        let q = Quadric::from_triangle(
            &Point3f::new(0.0, 0.0, 0.0),
            &Point3f::new(1.0, 0.0, 0.0),
            &Point3f::new(0.0, 1.0, 0.0),
            1.0,
        )
        .unwrap();
        assert_relative_eq!(q.error(&Point3f::new(5.0, -3.0, 0.0)), 0.0);
        assert_relative_eq!(q.error(&Point3f::new(0.0, 0.0, 2.0)), 4.0, epsilon = 1e-9);
    }

    #[test]
    fn test_degenerate_triangle() {
        let p = Point3f::new(1.0, 1.0, 1.0);
        assert!(Quadric::from_triangle(&p, &p, &p, 1.0).is_none());
    }

    #[test]
    fn test_minimizer_of_corner() {
        // Three orthogonal planes meet in one point
        let mut q = Quadric::zero();
        q += Quadric::from_plane(Vector3::new(1.0, 0.0, 0.0), -1.0, 1.0);
        q += Quadric::from_plane(Vector3::new(0.0, 1.0, 0.0), -2.0, 1.0);
        q += Quadric::from_plane(Vector3::new(0.0, 0.0, 1.0), -3.0, 1.0);
        let p = q.minimizer().unwrap();
        assert_relative_eq!(p, Point3f::new(1.0, 2.0, 3.0), epsilon = 1e-5);

        // A single plane has no unique minimizer
        let flat = Quadric::from_plane(Vector3::new(0.0, 0.0, 1.0), 0.0, 1.0);
        assert!(flat.minimizer().is_none());
    }

    #[test]
    fn test_edge_constraint() {
        let q = Quadric::edge_constraint(
            &Point3f::new(0.0, 0.0, 0.0),
            &Point3f::new(1.0, 0.0, 0.0),
            &Vector3f::new(0.0, 0.0, 1.0),
            1.0,
        )
        .unwrap();
        assert_relative_eq!(q.error(&Point3f::new(0.5, 0.0, 0.0)), 0.0);
        assert_relative_eq!(q.error(&Point3f::new(0.5, 1.0, 0.0)), 1.0, epsilon = 1e-9);
    }
}
