use super::{cast_texels, finish_image, mean_over_samples, CastInput, CastOutput, MaterialCaster, SurfacePoint};
use crate::settings::CasterSettings;
use lodcrate_core::{Color, ProcessContext, Result};
use std::fmt;
use std::sync::Arc;

/// Native callback evaluated at every source point a texel maps to
#[derive(Clone)]
pub struct ComputeFn(pub Arc<dyn Fn(&SurfacePoint<'_>) -> Result<Color> + Send + Sync>);

impl fmt::Debug for ComputeFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ComputeFn")
    }
}

impl PartialEq for ComputeFn {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// Casts a channel computed by a native callback. Cannot be written to a
/// settings file, so it only runs in the calling process.
#[derive(Debug, Clone, PartialEq)]
pub struct ComputeCaster {
    pub settings: CasterSettings,
    pub evaluator: ComputeFn,
}

impl ComputeCaster {
    pub fn new(
        channel: &str,
        evaluator: impl Fn(&SurfacePoint<'_>) -> Result<Color> + Send + Sync + 'static,
    ) -> Self {
        Self {
            settings: CasterSettings::for_channel(channel),
            evaluator: ComputeFn(Arc::new(evaluator)),
        }
    }
}

impl MaterialCaster for ComputeCaster {
    fn caster_settings(&self) -> &CasterSettings {
        &self.settings
    }

    fn cast(&self, input: &CastInput<'_>, ctx: &ProcessContext) -> Result<CastOutput> {
        let (image, covered) = cast_texels(input.mapping, Color::TRANSPARENT, ctx, |samples| {
            mean_over_samples(samples, |sample| (self.evaluator.0)(&SurfacePoint::from_sample(input, sample)))
        })?;
        finish_image(image, covered, &self.settings, input)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use approx::assert_relative_eq;
    use lodcrate_core::{Error, MaterialTable, TextureTable};

    #[test]
    fn test_callback_sees_source_points() {
        let quad = textured_quad(0.0);
        let mapping = mapping(&quad, &quad, 4);
        let (materials, textures) = (MaterialTable::new(), TextureTable::new());
        let input = CastInput {
            mapping: &mapping,
            materials: &materials,
            textures: &textures,
            output_dir: None,
        };
        let caster = ComputeCaster::new("Height", |point| {
            let p = point.position();
            Ok(Color::new(p.x, p.y, 0.0, 1.0))
        });
        let output = caster.cast(&input, &ProcessContext::new()).unwrap();
        assert_eq!(output.channel, "Height");
        let c = output.image.unwrap().get(3, 0);
        assert_relative_eq!(c.r, 0.875, epsilon = 1e-4);
        assert_relative_eq!(c.g, 0.875, epsilon = 1e-4);
    }

    #[test]
    fn test_callback_errors_propagate() {
        let quad = textured_quad(0.0);
        let mapping = mapping(&quad, &quad, 2);
        let (materials, textures) = (MaterialTable::new(), TextureTable::new());
        let input = CastInput {
            mapping: &mapping,
            materials: &materials,
            textures: &textures,
            output_dir: None,
        };
        let caster = ComputeCaster::new("Broken", |_| Err(Error::Algorithm("no value".to_string())));
        assert!(caster.cast(&input, &ProcessContext::new()).is_err());
    }
}
