use super::{cast_texels, finish_image, CastInput, CastOutput, MaterialCaster, SurfacePoint};
use crate::settings::{CasterSettings, ColorComponent};
use lodcrate_core::{channels, Color, MappingSample, ProcessContext, Result};
use serde::{Deserialize, Serialize};

/// Casts opacity as a gray image. With layered mapping images the layers of
/// each subsample combine as `1 - Π(1 - a)` and uncovered subsamples count
/// as fully transparent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpacityCaster {
    #[serde(flatten)]
    pub settings: CasterSettings,
}

impl Default for OpacityCaster {
    fn default() -> Self {
        Self {
            settings: CasterSettings {
                opacity_channel_component: ColorComponent::Alpha,
                ..CasterSettings::for_channel(channels::OPACITY)
            },
        }
    }
}

impl OpacityCaster {
    fn opacity(&self, input: &CastInput<'_>, sample: &MappingSample) -> Result<f32> {
        let point = SurfacePoint::from_sample(input, sample);
        Ok(point
            .evaluate_channel(&self.settings.material_channel)?
            .map_or(1.0, |c| c.component(self.settings.opacity_channel_component.index()))
            .clamp(0.0, 1.0))
    }
}

impl MaterialCaster for OpacityCaster {
    fn caster_settings(&self) -> &CasterSettings {
        &self.settings
    }

    fn cast(&self, input: &CastInput<'_>, ctx: &ProcessContext) -> Result<CastOutput> {
        let layered = input.mapping.max_layers() > 1;
        let subsamples = input.mapping.subsamples_per_texel().max(1) as f32;
        let (image, covered) = cast_texels(input.mapping, Color::new(0.0, 0.0, 0.0, 1.0), ctx, |samples| {
            let mut total = 0.0;
            let mut count = 0.0f32;
            let mut start = 0;
            while start < samples.len() {
                let subsample = samples[start].subsample;
                let end = start + samples[start..].iter().take_while(|s| s.subsample == subsample).count();
                let mut transmitted = 1.0;
                for sample in &samples[start..end] {
                    if !layered && sample.layer > 0 {
                        continue;
                    }
                    transmitted *= 1.0 - self.opacity(input, sample)?;
                }
                total += 1.0 - transmitted;
                count += 1.0;
                start = end;
            }
            if count == 0.0 {
                return Ok(None);
            }
            let value = if layered { total / subsamples } else { total / count };
            Ok(Some(Color::new(value, value, value, 1.0)))
        })?;
        finish_image(image, covered, &self.settings, input)
    }
}
