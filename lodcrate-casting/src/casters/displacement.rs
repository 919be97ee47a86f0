use super::{cast_texels, finish_image, CastInput, CastOutput, MaterialCaster};
use crate::settings::{CasterSettings, FillMode};
use crate::tessellation::sample_displacement;
use lodcrate_core::{channels, Color, ProcessContext, Result};
use serde::{Deserialize, Serialize};

/// Casts the signed distance from the processed surface to the source
/// surface along the processed normal. Image values are
/// `0.5 + 0.5 * d / max_displacement`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplacementCaster {
    #[serde(flatten)]
    pub settings: CasterSettings,
    /// Distance mapped to the ends of the value range; 0 uses the largest
    /// distance found
    pub max_displacement: f32,
    pub output_to_image: bool,
    /// Also store the distances in the tessellated attributes of the
    /// processed geometry
    pub output_to_tessellated_attributes: bool,
}

impl Default for DisplacementCaster {
    fn default() -> Self {
        Self {
            settings: CasterSettings {
                fill_mode: FillMode::Interpolate,
                ..CasterSettings::for_channel(channels::DISPLACEMENT)
            },
            max_displacement: 0.0,
            output_to_image: true,
            output_to_tessellated_attributes: false,
        }
    }
}

impl DisplacementCaster {
    fn scale(&self, input: &CastInput<'_>) -> f32 {
        if self.max_displacement > 0.0 {
            return self.max_displacement;
        }
        let mapping = input.mapping;
        let mut largest = 0.0f32;
        for y in 0..mapping.height() {
            for x in 0..mapping.width() {
                for sample in mapping.layer_samples(x, y, 0) {
                    largest = largest.max(sample.distance.abs());
                }
            }
        }
        largest.max(1e-6)
    }
}

impl MaterialCaster for DisplacementCaster {
    fn caster_settings(&self) -> &CasterSettings {
        &self.settings
    }

    fn cast(&self, input: &CastInput<'_>, ctx: &ProcessContext) -> Result<CastOutput> {
        let mut output = if self.output_to_image {
            let scale = self.scale(input);
            let (image, covered) = cast_texels(input.mapping, Color::new(0.5, 0.5, 0.5, 1.0), ctx, |samples| {
                let layer0 = samples.iter().filter(|s| s.layer == 0);
                let (sum, count) = layer0.fold((0.0f32, 0usize), |(sum, count), s| (sum + s.distance, count + 1));
                if count == 0 {
                    return Ok(None);
                }
                let value = (0.5 + 0.5 * (sum / count as f32) / scale).clamp(0.0, 1.0);
                Ok(Some(Color::new(value, value, value, 1.0)))
            })?;
            tracing::debug!("displacement normalized by {}", scale);
            finish_image(image, covered, &self.settings, input)?
        } else {
            CastOutput {
                channel: self.settings.material_channel.clone(),
                ..CastOutput::default()
            }
        };
        if self.output_to_tessellated_attributes {
            let mapping = input.mapping;
            output.tessellated_displacement = Some(sample_displacement(&mapping.source, &mapping.destination, ctx)?);
        }
        Ok(output)
    }
}
