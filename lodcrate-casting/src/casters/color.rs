use super::{cast_texels, finish_image, CastInput, CastOutput, CustomNodeHandler, MaterialCaster, SurfacePoint};
use crate::settings::CasterSettings;
use lodcrate_core::{Color, MappingSample, ProcessContext, Result};
use serde::{Deserialize, Serialize};

/// Casts a color channel such as diffuse or specular
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColorCaster {
    #[serde(flatten)]
    pub settings: CasterSettings,
    /// Write the opacity channel into the alpha of the output
    pub bake_opacity_in_alpha: bool,
    #[serde(skip)]
    pub custom_nodes: Option<CustomNodeHandler>,
}

impl ColorCaster {
    pub fn new(channel: &str) -> Self {
        Self {
            settings: CasterSettings::for_channel(channel),
            ..Self::default()
        }
    }

    pub fn with_custom_nodes(mut self, handler: CustomNodeHandler) -> Self {
        self.custom_nodes = Some(handler);
        self
    }

    fn shade_sample(&self, input: &CastInput<'_>, sample: &MappingSample) -> Result<(Color, f32)> {
        let point = SurfacePoint::from_sample(input, sample).with_custom_nodes(self.custom_nodes.as_ref());
        let color = point
            .evaluate_channel(&self.settings.material_channel)?
            .unwrap_or(Color::WHITE);
        let opacity = point
            .evaluate_channel(&self.settings.opacity_channel)?
            .map_or(1.0, |c| c.component(self.settings.opacity_channel_component.index()));
        Ok((color, opacity.clamp(0.0, 1.0)))
    }

    /// Single layer: mean color over the covered subsamples
    fn shade_flat(&self, input: &CastInput<'_>, samples: &[MappingSample]) -> Result<Option<Color>> {
        let mut sum = Color::TRANSPARENT;
        let mut opacity = 0.0;
        let mut count = 0.0f32;
        for sample in samples.iter().filter(|s| s.layer == 0) {
            let (color, a) = self.shade_sample(input, sample)?;
            sum = sum.zip(color, |x, y| x + y);
            opacity += a;
            count += 1.0;
        }
        if count == 0.0 {
            return Ok(None);
        }
        let mut color = sum.map(|v| v / count);
        color.a = if self.bake_opacity_in_alpha { opacity / count } else { 1.0 };
        Ok(Some(color))
    }

    /// Layered: composite each subsample front to back, then average over
    /// all subsamples of the texel so that partial coverage fades out
    fn shade_layered(&self, input: &CastInput<'_>, samples: &[MappingSample]) -> Result<Option<Color>> {
        let subsamples = input.mapping.subsamples_per_texel() as usize;
        let mut premultiplied = [0.0f32; 3];
        let mut alpha_sum = 0.0;
        let mut start = 0;
        while start < samples.len() {
            let subsample = samples[start].subsample;
            let end = start + samples[start..].iter().take_while(|s| s.subsample == subsample).count();
            let mut layers: Vec<&MappingSample> = samples[start..end].iter().collect();
            layers.sort_by_key(|s| s.layer);

            let mut acc = [0.0f32; 3];
            let mut acc_alpha = 0.0f32;
            for sample in layers {
                let (color, opacity) = self.shade_sample(input, sample)?;
                let weight = (1.0 - acc_alpha) * opacity;
                acc[0] += weight * color.r;
                acc[1] += weight * color.g;
                acc[2] += weight * color.b;
                acc_alpha += weight;
                if acc_alpha > 0.999 {
                    break;
                }
            }
            for k in 0..3 {
                premultiplied[k] += acc[k];
            }
            alpha_sum += acc_alpha;
            start = end;
        }
        if alpha_sum <= 0.0 {
            return Ok(None);
        }
        let alpha = alpha_sum / subsamples.max(1) as f32;
        Ok(Some(Color::new(
            premultiplied[0] / alpha_sum,
            premultiplied[1] / alpha_sum,
            premultiplied[2] / alpha_sum,
            if self.bake_opacity_in_alpha { alpha } else { 1.0 },
        )))
    }
}

impl MaterialCaster for ColorCaster {
    fn caster_settings(&self) -> &CasterSettings {
        &self.settings
    }

    fn cast(&self, input: &CastInput<'_>, ctx: &ProcessContext) -> Result<CastOutput> {
        let layered = input.mapping.max_layers() > 1;
        let background = if self.bake_opacity_in_alpha { Color::TRANSPARENT } else { Color::BLACK };
        let (image, covered) = cast_texels(input.mapping, background, ctx, |samples| {
            if layered {
                self.shade_layered(input, samples)
            } else {
                self.shade_flat(input, samples)
            }
        })?;
        finish_image(image, covered, &self.settings, input)
    }
}
