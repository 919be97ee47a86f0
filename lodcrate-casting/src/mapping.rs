//! Mapping image generation
//!
//! Destination triangles are rasterized in texture space with `level × level`
//! subsamples per texel. Every covered subsample is placed on the
//! destination surface and linked to the source, either to the closest
//! source triangle or, for projected triangles, to the source triangles hit
//! by a ray along the projection direction (one layer per hit).

use crate::charts::generate_tex_coords;
use crate::settings::{MappingImageOutputMaterialSettings, MappingImageSettings};
use lodcrate_core::{
    interpolate_point, interpolate_vector, Error, GeometryData, MappingImage, MappingSample, Point2f, ProcessContext,
    Ray, Result, TriangleBvh, TriangleIndex, Vector3f,
};
use lodcrate_simplification::{compute_tangents, NormalCalculationSettings, SmoothingFans};
use rayon::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Per destination triangle projection used by impostors
#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    /// Direction rays travel into the source for each destination triangle;
    /// `None` maps the triangle to the closest source surface instead
    pub directions: Vec<Option<Vector3f>>,
    /// Rays start this far in front of the destination and travel twice as far
    pub depth: f32,
}

/// Builds mapping images from a source geometry onto destination geometries
pub struct MappingImageBuilder<'a> {
    source: &'a GeometryData,
    index: TriangleIndex,
    bvh: Option<TriangleBvh>,
    projection: Option<Projection>,
    max_layers: u32,
}

/// One covered subsample before it is linked to the source
#[derive(Debug, Clone, Copy)]
struct Coverage {
    triangle: u32,
    barycentric: [f32; 3],
}

impl<'a> MappingImageBuilder<'a> {
    pub fn new(source: &'a GeometryData) -> Self {
        Self {
            source,
            index: TriangleIndex::new(source),
            bvh: None,
            projection: None,
            max_layers: 1,
        }
    }

    /// Map projected triangles by ray casting, recording up to `max_layers`
    /// hits per subsample
    pub fn with_projection(mut self, projection: Projection, max_layers: u32) -> Self {
        self.bvh = Some(TriangleBvh::new(self.source));
        self.projection = Some(projection);
        self.max_layers = max_layers.max(1);
        self
    }

    /// Build the mapping image of the listed destination triangles
    pub fn build(
        &self,
        destination: &GeometryData,
        tex_coord_level: usize,
        output: &MappingImageOutputMaterialSettings,
        triangles: &[usize],
        ctx: &ProcessContext,
    ) -> Result<MappingImage> {
        output.validate()?;
        let uvs = destination
            .tex_coords(tex_coord_level)
            .map(|l| &l.values)
            .ok_or_else(|| Error::InvalidData(format!("destination has no texture coordinate level {}", tex_coord_level)))?;
        let (width, height) = (output.texture_width, output.texture_height);
        let level = output.multisampling_level;

        // Texel space corners and the rows each triangle touches
        let mut rows: Vec<Vec<(u32, [Point2f; 3])>> = vec![Vec::new(); height as usize];
        for &t in triangles {
            let corners = [0, 1, 2].map(|k| {
                let uv = uvs[t * 3 + k];
                Point2f::new(uv.x * width as f32, (1.0 - uv.y) * height as f32)
            });
            let min_y = corners.iter().map(|p| p.y).fold(f32::INFINITY, f32::min);
            let max_y = corners.iter().map(|p| p.y).fold(f32::NEG_INFINITY, f32::max);
            if !(min_y.is_finite() && max_y.is_finite()) {
                continue;
            }
            let first = min_y.floor().max(0.0) as usize;
            let last = (max_y.ceil().max(0.0) as usize).min(height as usize);
            for row in rows.iter_mut().take(last).skip(first) {
                row.push((t as u32, corners));
            }
        }
        ctx.checkpoint()?;

        let done = AtomicUsize::new(0);
        let texel_rows: Vec<Vec<Vec<MappingSample>>> = rows
            .par_iter()
            .enumerate()
            .map(|(y, candidates)| {
                if ctx.token().is_cancelled() {
                    return Err(Error::Cancelled);
                }
                let coverage = rasterize_row(y as u32, candidates, width, level);
                let row = coverage
                    .chunks(level as usize * level as usize)
                    .map(|texel| self.link_texel(destination, texel))
                    .collect();
                let finished = done.fetch_add(1, Ordering::Relaxed) + 1;
                if finished % 64 == 0 {
                    ctx.report(100.0 * finished as f32 / height as f32);
                }
                Ok(row)
            })
            .collect::<Result<_>>()?;
        ctx.checkpoint()?;

        let texels: Vec<Vec<MappingSample>> = texel_rows.into_iter().flatten().collect();
        let image = MappingImage::from_texels(
            width,
            height,
            level,
            self.max_layers,
            texels,
            self.source.clone(),
            destination.clone(),
            tex_coord_level,
        )?;
        tracing::debug!(
            "mapping image {}x{}: {} of {} texels covered",
            width,
            height,
            image.occupied_texels(),
            width as usize * height as usize
        );
        ctx.report(100.0);
        Ok(image)
    }

    /// Link the covered subsamples of one texel to the source surface
    fn link_texel(&self, destination: &GeometryData, texel: &[Option<Coverage>]) -> Vec<MappingSample> {
        let mut samples = Vec::new();
        for (subsample, cover) in texel.iter().enumerate() {
            let Some(cover) = cover else {
                continue;
            };
            let t = cover.triangle as usize;
            let position = interpolate_point(destination.triangle_positions(t), cover.barycentric);
            let normal = match &destination.normals {
                Some(n) => interpolate_vector([n[t * 3], n[t * 3 + 1], n[t * 3 + 2]], cover.barycentric)
                    .try_normalize(f32::EPSILON)
                    .unwrap_or_else(|| destination.triangle_normal(t)),
                None => destination.triangle_normal(t),
            };
            let base = MappingSample {
                subsample: subsample as u16,
                layer: 0,
                source_triangle: 0,
                source_barycentric: [1.0, 0.0, 0.0],
                material_id: 0,
                destination_triangle: cover.triangle,
                destination_barycentric: cover.barycentric,
                distance: 0.0,
            };

            let direction = self
                .projection
                .as_ref()
                .and_then(|p| {
                    let d = p.directions.get(t).copied().flatten()?;
                    Some((d.try_normalize(f32::EPSILON)?, p.depth))
                });
            match (direction, &self.bvh) {
                (Some((direction, depth)), Some(bvh)) => {
                    let ray = Ray::new(position - direction * depth, direction);
                    let hits = bvh.closest_hits(&ray, 2.0 * depth, self.max_layers as usize);
                    for (layer, hit) in hits.iter().enumerate() {
                        samples.push(MappingSample {
                            layer: layer as u8,
                            source_triangle: hit.triangle as u32,
                            source_barycentric: hit.barycentric,
                            material_id: self.source.material_id(hit.triangle),
                            distance: hit.t - depth,
                            ..base
                        });
                    }
                }
                _ => {
                    if let Some(hit) = self.index.closest(&position) {
                        samples.push(MappingSample {
                            source_triangle: hit.triangle as u32,
                            source_barycentric: hit.barycentric,
                            material_id: self.source.material_id(hit.triangle),
                            distance: (hit.point - position).dot(&normal),
                            ..base
                        });
                    }
                }
            }
        }
        samples
    }
}

fn barycentric_2d(p: Point2f, [a, b, c]: &[Point2f; 3]) -> Option<[f32; 3]> {
    let area = (b - a).perp(&(c - a));
    if area.abs() < 1e-12 {
        return None;
    }
    let w1 = (p - a).perp(&(c - a)) / area;
    let w2 = (b - a).perp(&(p - a)) / area;
    Some([1.0 - w1 - w2, w1, w2])
}

/// Coverage of every subsample of one texel row. The first triangle that
/// covers a subsample keeps it.
fn rasterize_row(y: u32, candidates: &[(u32, [Point2f; 3])], width: u32, level: u32) -> Vec<Option<Coverage>> {
    let per_texel = (level * level) as usize;
    let mut coverage = vec![None; width as usize * per_texel];
    let step = 1.0 / level as f32;
    for (triangle, corners) in candidates {
        let min_x = corners.iter().map(|p| p.x).fold(f32::INFINITY, f32::min);
        let max_x = corners.iter().map(|p| p.x).fold(f32::NEG_INFINITY, f32::max);
        let first = min_x.floor().max(0.0) as u32;
        let last = (max_x.ceil().max(0.0) as u32).min(width);
        for x in first..last {
            for j in 0..level {
                for i in 0..level {
                    let slot = x as usize * per_texel + (j * level + i) as usize;
                    if coverage[slot].is_some() {
                        continue;
                    }
                    let p = Point2f::new(
                        x as f32 + (i as f32 + 0.5) * step,
                        y as f32 + (j as f32 + 0.5) * step,
                    );
                    let Some(w) = barycentric_2d(p, corners) else {
                        continue;
                    };
                    if w.iter().all(|&v| v >= -1e-5) {
                        coverage[slot] = Some(Coverage {
                            triangle: *triangle,
                            barycentric: w,
                        });
                    }
                }
            }
        }
    }
    coverage
}

/// Output material index of every destination triangle
pub fn output_groups(destination: &GeometryData, settings: &MappingImageSettings) -> Vec<Vec<usize>> {
    let mut groups = vec![Vec::new(); settings.output_material_count()];
    for t in 0..destination.triangle_count() {
        groups[settings.output_for_material(destination.material_id(t))].push(t);
    }
    groups
}

/// Prepare a processed geometry for casting as configured (texture
/// coordinates, material ids, tangents) and build one mapping image per
/// output material. Returns no images when mapping image generation is off.
pub fn build_mapping_images(
    source: &GeometryData,
    destination: &mut GeometryData,
    settings: &MappingImageSettings,
    projection: Option<Projection>,
    ctx: &ProcessContext,
) -> Result<Vec<MappingImage>> {
    settings.validate()?;
    let groups = output_groups(destination, settings);
    let level = if settings.generate_tex_coords {
        generate_tex_coords(destination, settings)?
    } else {
        destination.tex_coords_by_name(&settings.tex_coord_name).ok_or_else(|| {
            Error::InvalidSettings(format!(
                "texture coordinate level '{}' does not exist and is not generated",
                settings.tex_coord_name
            ))
        })?
    };
    ctx.step(10.0)?;

    if settings.apply_new_material_ids {
        let ids = destination.add_material_ids();
        for (output, triangles) in groups.iter().enumerate() {
            for &t in triangles {
                ids[t] = output as i32;
            }
        }
    }
    if settings.generate_tangents {
        let fans = SmoothingFans::new(destination, NormalCalculationSettings::default().hard_edge_angle);
        compute_tangents(destination, &fans, level);
    }
    if !settings.generate_mapping_image {
        return Ok(Vec::new());
    }

    let builder = match projection {
        Some(projection) => MappingImageBuilder::new(source).with_projection(projection, settings.maximum_layers),
        None => MappingImageBuilder::new(source),
    };
    let count = groups.len() as f32;
    let mut images = Vec::with_capacity(groups.len());
    for (output, triangles) in groups.iter().enumerate() {
        let output_settings = settings.output_material(output).cloned().unwrap_or_default();
        let from = 10.0 + 90.0 * output as f32 / count;
        let to = 10.0 + 90.0 * (output + 1) as f32 / count;
        images.push(builder.build(destination, level, &output_settings, triangles, &ctx.sub_range(from, to))?);
    }
    Ok(images)
}
