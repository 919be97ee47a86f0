//! Impostor geometry
//!
//! An impostor replaces a source geometry with a few textured quads. Each
//! generator returns the proxy geometry, the geometry its mapping image is
//! built over and the projection linking that geometry to the source.

mod billboard_cloud;
mod flipbook;
mod single_view;

pub use billboard_cloud::{billboard_cloud, BillboardCloudSettings, BillboardMode, FoliageSettings};
pub use flipbook::{flipbook, FlipbookSettings};
pub use single_view::{single_view, FromSingleViewSettings};

use crate::mapping::{MappingImageBuilder, Projection};
use crate::settings::{MappingImageOutputMaterialSettings, MappingImageSettings};
use lodcrate_core::{
    Bounded, Error, GeometryData, MappingImage, Point2f, Point3f, ProcessContext, Result, Vector3f,
};
use lodcrate_simplification::{compute_tangents, SmoothingFans};

#[derive(Debug, Clone, PartialEq)]
pub struct Impostor {
    /// Proxy geometry, texture coordinates at level 0
    pub geometry: GeometryData,
    /// Geometry the mapping image is built over. Same as `geometry` except
    /// for flipbooks, which map every view but keep one quad.
    pub mapping_geometry: GeometryData,
    pub projection: Projection,
}

impl Impostor {
    fn new(mut geometry: GeometryData, mut mapping_geometry: GeometryData, projection: Projection) -> Self {
        for g in [&mut geometry, &mut mapping_geometry] {
            let fans = SmoothingFans::new(g, 80.0);
            compute_tangents(g, &fans, 0);
        }
        Self {
            geometry,
            mapping_geometry,
            projection,
        }
    }

    /// Mapping image of the first output material over all impostor
    /// triangles, with up to `maximum_layers` hits per subsample
    pub fn build_mapping_image(
        &self,
        source: &GeometryData,
        settings: &MappingImageSettings,
        ctx: &ProcessContext,
    ) -> Result<MappingImage> {
        settings.validate()?;
        let output = output_material(settings);
        let triangles: Vec<usize> = (0..self.mapping_geometry.triangle_count()).collect();
        MappingImageBuilder::new(source)
            .with_projection(self.projection.clone(), settings.maximum_layers)
            .build(&self.mapping_geometry, 0, &output, &triangles, ctx)
    }
}

pub(crate) fn output_material(settings: &MappingImageSettings) -> MappingImageOutputMaterialSettings {
    settings.output_material(0).cloned().unwrap_or_default()
}

pub(crate) fn check_source(source: &GeometryData) -> Result<()> {
    if source.triangle_count() == 0 {
        return Err(Error::InvalidData("impostor source has no triangles".to_string()));
    }
    let diagonal = source.bounding_box().diagonal();
    if !diagonal.is_finite() || diagonal <= 0.0 {
        return Err(Error::InvalidData("impostor source has no extent".to_string()));
    }
    Ok(())
}

/// Right and up axes of a view looking along `direction`, with `up` as the
/// preferred up axis
pub(crate) fn view_frame(direction: &Vector3f, up: &Vector3f) -> Result<(Vector3f, Vector3f, Vector3f)> {
    let d = direction
        .try_normalize(1e-12)
        .ok_or_else(|| Error::InvalidSettings("view direction is zero".to_string()))?;
    let up = (up - d * up.dot(&d))
        .try_normalize(1e-6)
        .or_else(|| {
            let fallback = if d.y.abs() < 0.9 { Vector3f::y() } else { Vector3f::z() };
            (fallback - d * fallback.dot(&d)).try_normalize(1e-6)
        })
        .ok_or_else(|| Error::InvalidSettings("up vector is parallel to the view direction".to_string()))?;
    let right = d.cross(&up);
    Ok((d, right, up))
}

/// Builder for quad based impostor geometry with one texture coordinate
/// level and flat normals
#[derive(Debug, Default)]
pub(crate) struct QuadMesh {
    coords: Vec<Point3f>,
    ids: Vec<[u32; 3]>,
    normals: Vec<Vector3f>,
    uvs: Vec<Point2f>,
}

impl QuadMesh {
    /// Add a quad with corners counter-clockwise seen from the front
    pub fn push_quad(&mut self, corners: [Point3f; 4], uvs: [Point2f; 4]) {
        let normal = (corners[1] - corners[0])
            .cross(&(corners[2] - corners[0]))
            .try_normalize(1e-20)
            .unwrap_or_else(Vector3f::z);
        let first = self.coords.len() as u32;
        self.coords.extend_from_slice(&corners);
        for tri in [[0, 1, 2], [0, 2, 3]] {
            self.ids.push(tri.map(|k| first + k));
            for k in tri {
                self.normals.push(normal);
                self.uvs.push(uvs[k as usize]);
            }
        }
    }

    /// Add triangles with their own texture coordinates
    pub fn push_triangles(&mut self, geometry: &GeometryData, uvs: &[Point2f]) {
        let first = self.coords.len() as u32;
        self.coords.extend_from_slice(&geometry.coords);
        for t in 0..geometry.triangle_count() {
            self.ids.push(geometry.vertex_ids[t].map(|v| first + v));
            let normal = geometry.triangle_normal(t);
            for k in 0..3 {
                let corner = t * 3 + k;
                self.normals.push(
                    geometry
                        .normals
                        .as_ref()
                        .and_then(|n| n.get(corner).copied())
                        .unwrap_or(normal),
                );
                self.uvs.push(uvs[corner]);
            }
        }
    }

    pub fn triangle_count(&self) -> usize {
        self.ids.len()
    }

    pub fn into_geometry(self, tex_coord_name: &str) -> GeometryData {
        let mut geometry = GeometryData::from_triangles(self.coords, self.ids);
        geometry.normals = Some(self.normals);
        let level = geometry.add_tex_coords(tex_coord_name);
        geometry.tex_coords[level].values = self.uvs;
        geometry
    }
}

/// Texture coordinates of a rectangle placed at `offset` texels with the
/// given texel size. The first corner is the lower left.
pub(crate) fn rect_uvs(offset: [f32; 2], size: [f32; 2], output: &MappingImageOutputMaterialSettings) -> [Point2f; 4] {
    let (w, h) = (output.texture_width as f32, output.texture_height as f32);
    let (x0, x1) = (offset[0] / w, (offset[0] + size[0]) / w);
    let (y0, y1) = (1.0 - (offset[1] + size[1]) / h, 1.0 - offset[1] / h);
    [
        Point2f::new(x0, y0),
        Point2f::new(x1, y0),
        Point2f::new(x1, y1),
        Point2f::new(x0, y1),
    ]
}

#[cfg(test)]
pub(crate) mod test_support {
    use lodcrate_core::{GeometryData, Point3f};

    /// Axis aligned box from `min` to `max`, faces pointing outward
    pub fn box_geometry(min: Point3f, max: Point3f) -> GeometryData {
        let c = |x: bool, y: bool, z: bool| {
            Point3f::new(
                if x { max.x } else { min.x },
                if y { max.y } else { min.y },
                if z { max.z } else { min.z },
            )
        };
        let coords = vec![
            c(false, false, false),
            c(true, false, false),
            c(true, true, false),
            c(false, true, false),
            c(false, false, true),
            c(true, false, true),
            c(true, true, true),
            c(false, true, true),
        ];
        let ids = vec![
            [0, 2, 1],
            [0, 3, 2],
            [4, 5, 6],
            [4, 6, 7],
            [0, 1, 5],
            [0, 5, 4],
            [2, 3, 7],
            [2, 7, 6],
            [1, 2, 6],
            [1, 6, 5],
            [0, 4, 7],
            [0, 7, 3],
        ];
        GeometryData::from_triangles(coords, ids)
    }
}
