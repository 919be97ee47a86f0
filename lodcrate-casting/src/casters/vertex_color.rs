use super::{CastInput, CastOutput, MaterialCaster, SurfacePoint};
use crate::settings::CasterSettings;
use lodcrate_core::{ColorSet, Color, Error, ProcessContext, Result, TriangleIndex};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Casts a material channel into a vertex color set of the processed
/// geometry instead of an image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VertexColorCaster {
    #[serde(flatten)]
    pub settings: CasterSettings,
    /// Name of the color set written on the processed geometry
    pub output_color_name: String,
}

impl Default for VertexColorCaster {
    fn default() -> Self {
        Self {
            settings: CasterSettings::default(),
            output_color_name: "CastColors".to_string(),
        }
    }
}

/// Corners sample slightly inside their triangle so that corners of a shared
/// vertex pick up the material on their own side
const INSET: f32 = 0.01;

impl MaterialCaster for VertexColorCaster {
    fn caster_settings(&self) -> &CasterSettings {
        &self.settings
    }

    fn cast(&self, input: &CastInput<'_>, ctx: &ProcessContext) -> Result<CastOutput> {
        if self.output_color_name.is_empty() {
            return Err(Error::InvalidSettings("vertex color caster needs an output color name".to_string()));
        }
        let source = &input.mapping.source;
        let destination = &input.mapping.destination;
        let index = TriangleIndex::new(source);

        let values: Vec<Color> = (0..destination.corner_count())
            .into_par_iter()
            .map(|corner| {
                if corner % 4096 == 0 && ctx.token().is_cancelled() {
                    return Err(Error::Cancelled);
                }
                let t = corner / 3;
                let p = destination.coords[destination.corner_vertex(corner)];
                let p = p + (destination.triangle_centroid(t) - p) * INSET;
                let Some(hit) = index.closest(&p) else {
                    return Ok(Color::WHITE);
                };
                let point = SurfacePoint::new(source, hit.triangle, hit.barycentric, input.materials, input.textures);
                Ok(point.evaluate_channel(&self.settings.material_channel)?.unwrap_or(Color::WHITE))
            })
            .collect::<Result<_>>()?;
        ctx.checkpoint()?;

        Ok(CastOutput {
            channel: self.settings.material_channel.clone(),
            vertex_colors: Some(ColorSet {
                name: self.output_color_name.clone(),
                values,
            }),
            ..CastOutput::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use lodcrate_core::{channels, Material, MaterialTable, TextureTable};

    #[test]
    fn test_colors_follow_source_materials() {
        // Lower triangle red, upper triangle blue
        let mut source = textured_quad(0.0);
        *source.add_material_ids() = vec![0, 1];
        let mut materials = MaterialTable::new();
        materials.add(Material::with_color("red", channels::DIFFUSE, Color::new(1.0, 0.0, 0.0, 1.0)));
        materials.add(Material::with_color("blue", channels::DIFFUSE, Color::new(0.0, 0.0, 1.0, 1.0)));
        let textures = TextureTable::new();

        let destination = textured_quad(0.0);
        let mapping = mapping(&source, &destination, 4);
        let input = CastInput {
            mapping: &mapping,
            materials: &materials,
            textures: &textures,
            output_dir: None,
        };
        let output = VertexColorCaster::default().cast(&input, &ProcessContext::new()).unwrap();
        assert!(output.image.is_none());
        let colors = output.vertex_colors.unwrap();
        assert_eq!(colors.name, "CastColors");
        assert_eq!(colors.values.len(), 6);
        assert!(colors.values[..3].iter().all(|c| c.r == 1.0));
        assert!(colors.values[3..].iter().all(|c| c.b == 1.0));
    }
}
