use super::{check_source, view_frame, Impostor, QuadMesh};
use crate::mapping::Projection;
use crate::settings::MappingImageSettings;
use lodcrate_core::{Bounded, Error, GeometryData, Point2f, Point3f, Result, Vector3f};
use serde::{Deserialize, Serialize};

/// One quad showing the source from a single direction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FromSingleViewSettings {
    pub view_direction: Vector3f,
    pub up_vector: Vector3f,
    /// Fit the quad to the projected silhouette instead of the bounding
    /// sphere
    pub use_tight_fitting: bool,
    /// Depth of the tight quad between the nearest (0) and farthest (1)
    /// source point
    pub tight_fitting_depth_offset: f32,
    /// Share of the texture left empty on each side
    pub tex_coord_padding: f32,
}

impl Default for FromSingleViewSettings {
    fn default() -> Self {
        Self {
            view_direction: -Vector3f::z(),
            up_vector: Vector3f::y(),
            use_tight_fitting: false,
            tight_fitting_depth_offset: 0.0,
            tex_coord_padding: 0.0,
        }
    }
}

/// Quad extents in view space: right and up ranges, depth range
struct ViewExtents {
    right: (f32, f32),
    up: (f32, f32),
    depth: (f32, f32),
}

impl FromSingleViewSettings {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.tight_fitting_depth_offset) {
            return Err(Error::InvalidSettings(format!(
                "tight fitting depth offset must be in [0, 1], got {}",
                self.tight_fitting_depth_offset
            )));
        }
        if !(0.0..0.5).contains(&self.tex_coord_padding) {
            return Err(Error::InvalidSettings(format!(
                "texture coordinate padding must be in [0, 0.5), got {}",
                self.tex_coord_padding
            )));
        }
        Ok(())
    }

    fn extents(&self, geometry: &GeometryData) -> Result<(ViewExtents, [Vector3f; 3])> {
        let (d, right, up) = view_frame(&self.view_direction, &self.up_vector)?;
        let extents = if self.use_tight_fitting {
            let range = |axis: &Vector3f| {
                geometry.coords.iter().fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), p| {
                    let v = axis.dot(&p.coords);
                    (lo.min(v), hi.max(v))
                })
            };
            ViewExtents {
                right: range(&right),
                up: range(&up),
                depth: range(&d),
            }
        } else {
            let bounds = geometry.bounding_box();
            let c = bounds.center().coords;
            let r = bounds.radius();
            let around = |axis: &Vector3f| (axis.dot(&c) - r, axis.dot(&c) + r);
            ViewExtents {
                right: around(&right),
                up: around(&up),
                depth: around(&d),
            }
        };
        Ok((extents, [d, right, up]))
    }

    /// Width over height of the quad for a source geometry
    pub fn aspect_ratio(&self, geometry: &GeometryData) -> Result<f32> {
        let (extents, _) = self.extents(geometry)?;
        let width = extents.right.1 - extents.right.0;
        let height = extents.up.1 - extents.up.0;
        if height <= 0.0 {
            return Err(Error::InvalidData("source has no height in this view".to_string()));
        }
        Ok(width / height)
    }
}

/// Single view impostor: one quad facing against the view direction, mapped
/// by projection along it
pub fn single_view(
    source: &GeometryData,
    settings: &FromSingleViewSettings,
    mapping: &MappingImageSettings,
) -> Result<Impostor> {
    settings.validate()?;
    check_source(source)?;
    let (extents, [d, right, up]) = settings.extents(source)?;

    let (near, far) = extents.depth;
    let plane = if settings.use_tight_fitting {
        near + (far - near) * settings.tight_fitting_depth_offset
    } else {
        0.5 * (near + far)
    };
    let at = |a: f32, b: f32| Point3f::from(right * a + up * b + d * plane);
    let ((r0, r1), (u0, u1)) = (extents.right, extents.up);
    let corners = [at(r0, u0), at(r1, u0), at(r1, u1), at(r0, u1)];

    let (lo, hi) = (settings.tex_coord_padding, 1.0 - settings.tex_coord_padding);
    let uvs = [
        Point2f::new(lo, lo),
        Point2f::new(hi, lo),
        Point2f::new(hi, hi),
        Point2f::new(lo, hi),
    ];
    let mut mesh = QuadMesh::default();
    mesh.push_quad(corners, uvs);
    let geometry = mesh.into_geometry(&mapping.tex_coord_name);

    // Rays start in front of the nearest point and reach past the farthest
    let depth = (plane - near).max(far - plane) * 1.01 + 1e-6;
    Ok(Impostor::new(
        geometry.clone(),
        geometry,
        Projection {
            directions: vec![Some(d); 2],
            depth,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::super::test_support::box_geometry;
    use super::*;
    use approx::assert_relative_eq;
    use lodcrate_core::ProcessContext;

    fn slab() -> GeometryData {
        box_geometry(Point3f::new(0.0, 0.0, 0.0), Point3f::new(2.0, 1.0, 0.5))
    }

    #[test]
    fn test_aspect_ratio() {
        let tight = FromSingleViewSettings {
            use_tight_fitting: true,
            ..FromSingleViewSettings::default()
        };
        assert_relative_eq!(tight.aspect_ratio(&slab()).unwrap(), 2.0, epsilon = 1e-5);
        assert_relative_eq!(FromSingleViewSettings::default().aspect_ratio(&slab()).unwrap(), 1.0);
    }

    #[test]
    fn test_tight_quad_placement() {
        let settings = FromSingleViewSettings {
            use_tight_fitting: true,
            tight_fitting_depth_offset: 0.0,
            tex_coord_padding: 0.1,
            ..FromSingleViewSettings::default()
        };
        let mapping = MappingImageSettings::with_texture_size(64, 32);
        let impostor = single_view(&slab(), &settings, &mapping).unwrap();
        let geometry = &impostor.geometry;
        assert_eq!(geometry.triangle_count(), 2);
        // Looking along -z the nearest points are at z = 0.5
        for p in &geometry.coords {
            assert_relative_eq!(p.z, 0.5, epsilon = 1e-5);
        }
        assert_relative_eq!(geometry.triangle_normal(0), Vector3f::z(), epsilon = 1e-5);
        assert_relative_eq!(geometry.tex_coords[0].values[0].x, 0.1);

        let image = impostor
            .build_mapping_image(&slab(), &mapping, &ProcessContext::new())
            .unwrap();
        assert!(image.is_covered(32, 16));
        // Padding stays empty
        assert!(!image.is_covered(1, 16));
    }

    #[test]
    fn test_invalid_settings() {
        let settings = FromSingleViewSettings {
            tex_coord_padding: 0.5,
            ..FromSingleViewSettings::default()
        };
        let mapping = MappingImageSettings::with_texture_size(64, 64);
        assert!(single_view(&slab(), &settings, &mapping).is_err());
    }
}
