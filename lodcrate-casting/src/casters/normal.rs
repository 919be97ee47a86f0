use super::{cast_texels, finish_image, tangent_frame, CastInput, CastOutput, MaterialCaster, SurfacePoint};
use crate::settings::CasterSettings;
use lodcrate_core::{channels, Color, MappingSample, ProcessContext, Result, Vector3f};
use serde::{Deserialize, Serialize};

/// Casts surface normals, in tangent space of the processed geometry or in
/// object space
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalCaster {
    #[serde(flatten)]
    pub settings: CasterSettings,
    pub generate_tangent_space_normals: bool,
    /// Store -y in the green channel
    pub flip_green: bool,
}

impl Default for NormalCaster {
    fn default() -> Self {
        Self {
            settings: CasterSettings::for_channel(channels::NORMALS),
            generate_tangent_space_normals: true,
            flip_green: false,
        }
    }
}

impl NormalCaster {
    /// Source normal at a sample, perturbed by the source normal map when the
    /// material has one
    fn source_normal(&self, input: &CastInput<'_>, sample: &MappingSample) -> Result<Vector3f> {
        let point = SurfacePoint::from_sample(input, sample);
        let normal = point.normal().try_normalize(1e-12).unwrap_or_else(Vector3f::z);
        let (Some(tangent), Some(bitangent)) = (point.attributes.tangent, point.attributes.bitangent) else {
            return Ok(normal);
        };
        match point.evaluate_channel(&self.settings.material_channel)? {
            Some(encoded) => {
                let local = Vector3f::new(encoded.r * 2.0 - 1.0, encoded.g * 2.0 - 1.0, encoded.b * 2.0 - 1.0);
                let world = tangent * local.x + bitangent * local.y + normal * local.z;
                Ok(world.try_normalize(1e-12).unwrap_or(normal))
            }
            None => Ok(normal),
        }
    }

    /// Express a normal in the destination frame at a sample
    fn to_output_space(&self, input: &CastInput<'_>, sample: &MappingSample, normal: Vector3f) -> Vector3f {
        if !self.generate_tangent_space_normals {
            return normal;
        }
        let destination = &input.mapping.destination;
        let t = sample.destination_triangle as usize;
        let corner = destination.interpolate_corners(t, sample.destination_barycentric);
        let n = corner
            .normal
            .and_then(|n| n.try_normalize(1e-12))
            .unwrap_or_else(|| destination.triangle_normal(t));
        let (tangent, bitangent) = match (corner.tangent, corner.bitangent) {
            (Some(t), Some(b)) => (t, b),
            _ => tangent_frame(&n),
        };
        Vector3f::new(normal.dot(&tangent), normal.dot(&bitangent), normal.dot(&n))
    }
}

impl MaterialCaster for NormalCaster {
    fn caster_settings(&self) -> &CasterSettings {
        &self.settings
    }

    fn cast(&self, input: &CastInput<'_>, ctx: &ProcessContext) -> Result<CastOutput> {
        let background = if self.generate_tangent_space_normals {
            Color::new(0.5, 0.5, 1.0, 1.0)
        } else {
            Color::new(0.5, 0.5, 0.5, 1.0)
        };
        let (image, covered) = cast_texels(input.mapping, background, ctx, |samples| {
            let mut sum = Vector3f::zeros();
            for sample in samples.iter().filter(|s| s.layer == 0) {
                let normal = self.source_normal(input, sample)?;
                sum += self.to_output_space(input, sample, normal);
            }
            let Some(mut n) = sum.try_normalize(1e-12) else {
                return Ok(None);
            };
            if self.flip_green {
                n.y = -n.y;
            }
            Ok(Some(Color::new(n.x * 0.5 + 0.5, n.y * 0.5 + 0.5, n.z * 0.5 + 0.5, 1.0)))
        })?;
        finish_image(image, covered, &self.settings, input)
    }
}
