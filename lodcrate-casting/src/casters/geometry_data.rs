use super::{cast_texels, finish_image, mean_over_samples, CastInput, CastOutput, MaterialCaster, SurfacePoint};
use crate::settings::{CasterSettings, FillMode};
use lodcrate_core::{Aabb, Bounded, Color, Error, Point2f, ProcessContext, Result, Vector3f};
use serde::{Deserialize, Serialize};

/// Source geometry field written by a [`GeometryDataCaster`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum GeometryDataFieldType {
    /// Positions normalized to the source bounding box
    #[default]
    Coords,
    Normals,
    Tangents,
    Bitangents,
    /// Material id divided by 255, taken from the first sample of a texel
    MaterialIds,
    /// Texture coordinate level `field_index`
    TexCoords,
    /// Vertex color set `field_index`
    VertexColors,
}

/// Casts a raw field of the source geometry into an image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeometryDataCaster {
    #[serde(flatten)]
    pub settings: CasterSettings,
    pub field_type: GeometryDataFieldType,
    pub field_index: usize,
}

impl Default for GeometryDataCaster {
    fn default() -> Self {
        Self {
            settings: CasterSettings {
                fill_mode: FillMode::NoFill,
                dilation: 0,
                ..CasterSettings::for_channel("GeometryData")
            },
            field_type: GeometryDataFieldType::Coords,
            field_index: 0,
        }
    }
}

impl GeometryDataCaster {
    pub fn new(field_type: GeometryDataFieldType, field_index: usize) -> Self {
        Self {
            field_type,
            field_index,
            ..Self::default()
        }
    }

    fn value(&self, point: &SurfacePoint<'_>, bounds: &Aabb) -> Color {
        let encode = |v: Vector3f| Color::new(v.x * 0.5 + 0.5, v.y * 0.5 + 0.5, v.z * 0.5 + 0.5, 1.0);
        match self.field_type {
            GeometryDataFieldType::Coords => {
                let p = point.position();
                let extent = bounds.extent().map(|e| e.max(1e-12));
                let n = (p - bounds.min).component_div(&extent);
                Color::new(n.x, n.y, n.z, 1.0)
            }
            GeometryDataFieldType::Normals => encode(point.normal()),
            GeometryDataFieldType::Tangents => encode(point.attributes.tangent.unwrap_or_else(Vector3f::zeros)),
            GeometryDataFieldType::Bitangents => encode(point.attributes.bitangent.unwrap_or_else(Vector3f::zeros)),
            GeometryDataFieldType::MaterialIds => {
                let id = point.material_id.max(0) as f32 / 255.0;
                Color::new(id, id, id, 1.0)
            }
            GeometryDataFieldType::TexCoords => {
                let uv = point.tex_coord(self.field_index).unwrap_or_else(Point2f::origin);
                Color::new(uv.x, uv.y, 0.0, 1.0)
            }
            GeometryDataFieldType::VertexColors => {
                point.attributes.colors.get(self.field_index).copied().unwrap_or(Color::WHITE)
            }
        }
    }
}

impl MaterialCaster for GeometryDataCaster {
    fn caster_settings(&self) -> &CasterSettings {
        &self.settings
    }

    fn cast(&self, input: &CastInput<'_>, ctx: &ProcessContext) -> Result<CastOutput> {
        let source = &input.mapping.source;
        match self.field_type {
            GeometryDataFieldType::TexCoords if source.tex_coords(self.field_index).is_none() => {
                return Err(Error::InvalidSettings(format!(
                    "source has no texture coordinate level {}",
                    self.field_index
                )));
            }
            GeometryDataFieldType::VertexColors if source.colors.get(self.field_index).is_none() => {
                return Err(Error::InvalidSettings(format!("source has no color set {}", self.field_index)));
            }
            _ => {}
        }
        let bounds = source.bounding_box();
        let (image, covered) = cast_texels(input.mapping, Color::TRANSPARENT, ctx, |samples| {
            if self.field_type == GeometryDataFieldType::MaterialIds {
                return Ok(samples
                    .iter()
                    .find(|s| s.layer == 0)
                    .map(|s| self.value(&SurfacePoint::from_sample(input, s), &bounds)));
            }
            mean_over_samples(samples, |s| Ok(self.value(&SurfacePoint::from_sample(input, s), &bounds)))
        })?;
        finish_image(image, covered, &self.settings, input)
    }
}
