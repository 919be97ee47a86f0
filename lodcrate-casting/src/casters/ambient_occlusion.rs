use super::{cast_texels, finish_image, tangent_frame, CastInput, CastOutput, MaterialCaster, SurfacePoint};
use crate::settings::CasterSettings;
use lodcrate_core::{channels, Bounded, Color, MappingSample, ProcessContext, Ray, Result, TriangleBvh, Vector3f};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::f32::consts::PI;

/// Casts ambient occlusion of the source surface by cosine weighted
/// hemisphere ray casting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AmbientOcclusionCaster {
    #[serde(flatten)]
    pub settings: CasterSettings,
    pub rays_per_pixel: u32,
    /// Distance beyond which geometry does not occlude; 0 uses a fifth of
    /// the source diagonal
    pub occlusion_falloff: f32,
    pub occlusion_multiplier: f32,
    /// Every hit occludes fully instead of fading with distance
    pub use_simple_occlusion_mode: bool,
}

impl Default for AmbientOcclusionCaster {
    fn default() -> Self {
        Self {
            settings: CasterSettings::for_channel(channels::AMBIENT_OCCLUSION),
            rays_per_pixel: 64,
            occlusion_falloff: 0.0,
            occlusion_multiplier: 1.0,
            use_simple_occlusion_mode: false,
        }
    }
}

impl AmbientOcclusionCaster {
    fn occlusion(
        &self,
        input: &CastInput<'_>,
        bvh: &TriangleBvh,
        falloff: f32,
        offset: f32,
        samples: &[&MappingSample],
        rng: &mut StdRng,
    ) -> f32 {
        let rays = self.rays_per_pixel.max(1);
        let mut occluded = 0.0;
        for r in 0..rays {
            let sample = samples[r as usize % samples.len()];
            let point = SurfacePoint::from_sample(input, sample);
            let normal = point.normal().try_normalize(1e-12).unwrap_or_else(Vector3f::z);
            let (tangent, bitangent) = tangent_frame(&normal);

            let (u1, u2): (f32, f32) = (rng.gen(), rng.gen());
            let phi = 2.0 * PI * u1;
            let sin_theta = u2.sqrt();
            let cos_theta = (1.0 - u2).sqrt();
            let direction =
                tangent * (phi.cos() * sin_theta) + bitangent * (phi.sin() * sin_theta) + normal * cos_theta;

            let origin = point.position() + normal * offset;
            if let Some(hit) = bvh.intersect(&Ray::new(origin, direction), falloff) {
                occluded += if self.use_simple_occlusion_mode {
                    1.0
                } else {
                    1.0 - hit.t / falloff
                };
            }
        }
        occluded / rays as f32
    }
}

impl MaterialCaster for AmbientOcclusionCaster {
    fn caster_settings(&self) -> &CasterSettings {
        &self.settings
    }

    fn cast(&self, input: &CastInput<'_>, ctx: &ProcessContext) -> Result<CastOutput> {
        let source = &input.mapping.source;
        let bvh = TriangleBvh::new(source);
        let diagonal = source.bounding_box().diagonal();
        let falloff = if self.occlusion_falloff > 0.0 {
            self.occlusion_falloff
        } else {
            (diagonal * 0.2).max(1e-6)
        };
        let offset = (diagonal * 1e-4).max(1e-6);
        let width = input.mapping.width() as u64;

        let (image, covered) = cast_texels(input.mapping, Color::WHITE, ctx, |samples| {
            let layer0: Vec<&MappingSample> = samples.iter().filter(|s| s.layer == 0).collect();
            let Some(first) = layer0.first() else {
                return Ok(None);
            };
            // Same rays for a texel on every run
            let seed = first.destination_triangle as u64 * width * width + first.subsample as u64;
            let seed = seed ^ (first.source_barycentric[1].to_bits() as u64) << 32;
            let mut rng = StdRng::seed_from_u64(seed);
            let occlusion = self.occlusion(input, &bvh, falloff, offset, &layer0, &mut rng);
            let value = (1.0 - self.occlusion_multiplier * occlusion).clamp(0.0, 1.0);
            Ok(Some(Color::new(value, value, value, 1.0)))
        })?;
        finish_image(image, covered, &self.settings, input)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use lodcrate_core::{GeometryData, MaterialTable, Point3f, TextureTable};

    #[test]
    fn test_open_plane_is_unoccluded() {
        let quad = textured_quad(0.0);
        let mapping = mapping(&quad, &quad, 4);
        let (materials, textures) = (MaterialTable::new(), TextureTable::new());
        let input = CastInput {
            mapping: &mapping,
            materials: &materials,
            textures: &textures,
            output_dir: None,
        };
        let caster = AmbientOcclusionCaster {
            rays_per_pixel: 16,
            ..AmbientOcclusionCaster::default()
        };
        let image = caster.cast(&input, &ProcessContext::new()).unwrap().image.unwrap();
        assert!(image.pixels.iter().all(|p| (p.r - 1.0).abs() < 1e-6));
    }

    #[test]
    fn test_covered_plane_is_occluded() {
        // Floor quad with a large facing-down lid just above it
        let mut source = textured_quad(0.0);
        let lid = GeometryData::from_triangles(
            vec![
                Point3f::new(-5.0, -5.0, 0.05),
                Point3f::new(5.0, 5.0, 0.05),
                Point3f::new(5.0, -5.0, 0.05),
                Point3f::new(-5.0, 5.0, 0.05),
            ],
            vec![[0, 1, 2], [0, 3, 1]],
        );
        source.append(&lid);
        let floor = textured_quad(0.0);
        let mapping = mapping(&source, &floor, 4);
        let (materials, textures) = (MaterialTable::new(), TextureTable::new());
        let input = CastInput {
            mapping: &mapping,
            materials: &materials,
            textures: &textures,
            output_dir: None,
        };
        let caster = AmbientOcclusionCaster {
            rays_per_pixel: 32,
            occlusion_falloff: 10.0,
            use_simple_occlusion_mode: true,
            ..AmbientOcclusionCaster::default()
        };
        let image = caster.cast(&input, &ProcessContext::new()).unwrap().image.unwrap();
        assert!(image.get(1, 1).r < 0.05);
    }
}
