//! Material casters
//!
//! A caster reads the source side of a mapping image (source geometry,
//! materials and textures) and writes one output channel: usually a texture
//! image, for some casters vertex colors or tessellated attributes of the
//! processed geometry.

mod ambient_occlusion;
mod color;
mod compute;
mod displacement;
mod geometry_data;
mod normal;
mod opacity;
mod vertex_color;

pub use ambient_occlusion::AmbientOcclusionCaster;
pub use color::ColorCaster;
pub use compute::{ComputeCaster, ComputeFn};
pub use displacement::DisplacementCaster;
pub use geometry_data::{GeometryDataCaster, GeometryDataFieldType};
pub use normal::NormalCaster;
pub use opacity::OpacityCaster;
pub use vertex_color::VertexColorCaster;

use crate::fill::fill_image;
use crate::settings::CasterSettings;
use lodcrate_core::{
    Color, ColorSet, CornerValue, Error, GeometryData, MappingImage, MappingSample, MaterialTable, Point2f, Point3f,
    ProcessContext, Result, ShadingContext, TessellatedAttributes, TextureImage, TextureTable, Vector3f,
};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// What a caster reads from
#[derive(Clone, Copy)]
pub struct CastInput<'a> {
    pub mapping: &'a MappingImage,
    pub materials: &'a MaterialTable,
    pub textures: &'a TextureTable,
    /// Directory relative output paths resolve against
    pub output_dir: Option<&'a Path>,
}

/// What a caster produced
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CastOutput {
    pub channel: String,
    pub image: Option<TextureImage>,
    /// File the image was written to
    pub path: Option<PathBuf>,
    /// Per-corner colors for the processed geometry
    pub vertex_colors: Option<ColorSet>,
    /// Tessellated values for the processed geometry
    pub tessellated_displacement: Option<TessellatedAttributes>,
}

pub trait MaterialCaster {
    fn caster_settings(&self) -> &CasterSettings;
    fn cast(&self, input: &CastInput<'_>, ctx: &ProcessContext) -> Result<CastOutput>;
}

/// Evaluator for custom shading nodes
#[derive(Clone)]
pub struct CustomNodeHandler(pub Arc<dyn Fn(&str, &[Color]) -> Option<Color> + Send + Sync>);

impl CustomNodeHandler {
    pub fn new(f: impl Fn(&str, &[Color]) -> Option<Color> + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }
}

impl fmt::Debug for CustomNodeHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CustomNodeHandler")
    }
}

impl PartialEq for CustomNodeHandler {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// A point on the source surface with everything a shading network can
/// read there
pub struct SurfacePoint<'a> {
    pub geometry: &'a GeometryData,
    pub triangle: usize,
    pub barycentric: [f32; 3],
    pub material_id: i32,
    pub attributes: CornerValue,
    materials: &'a MaterialTable,
    textures: &'a TextureTable,
    custom: Option<&'a CustomNodeHandler>,
}

impl<'a> SurfacePoint<'a> {
    pub fn new(
        geometry: &'a GeometryData,
        triangle: usize,
        barycentric: [f32; 3],
        materials: &'a MaterialTable,
        textures: &'a TextureTable,
    ) -> Self {
        Self {
            geometry,
            triangle,
            barycentric,
            material_id: geometry.material_id(triangle),
            attributes: geometry.interpolate_corners(triangle, barycentric),
            materials,
            textures,
            custom: None,
        }
    }

    /// Source point of a mapping sample
    pub fn from_sample(input: &CastInput<'a>, sample: &MappingSample) -> Self {
        Self::new(
            &input.mapping.source,
            sample.source_triangle as usize,
            sample.source_barycentric,
            input.materials,
            input.textures,
        )
    }

    pub fn with_custom_nodes(mut self, handler: Option<&'a CustomNodeHandler>) -> Self {
        self.custom = handler;
        self
    }

    pub fn position(&self) -> Point3f {
        lodcrate_core::interpolate_point(self.geometry.triangle_positions(self.triangle), self.barycentric)
    }

    /// Interpolated normal, or the face normal without a normal channel
    pub fn normal(&self) -> Vector3f {
        self.attributes
            .normal
            .unwrap_or_else(|| self.geometry.triangle_normal(self.triangle))
    }

    pub fn tex_coord(&self, level: usize) -> Option<Point2f> {
        self.attributes.tex_coords.get(level).copied()
    }

    /// Evaluate a material channel here; `None` when the material has no
    /// network for it
    pub fn evaluate_channel(&self, channel: &str) -> Result<Option<Color>> {
        let network = usize::try_from(self.material_id)
            .ok()
            .and_then(|id| self.materials.get(id))
            .and_then(|m| m.shading_network(channel));
        match network {
            Some(network) => network.evaluate(self).map(Some),
            None => Ok(None),
        }
    }
}

impl ShadingContext for SurfacePoint<'_> {
    fn sample_texture(&self, texture_name: &str, tex_coord_level: usize, tex_coord_name: Option<&str>) -> Option<Color> {
        let level = match tex_coord_name {
            Some(name) => self.geometry.tex_coords_by_name(name)?,
            None => tex_coord_level,
        };
        let uv = self.tex_coord(level)?;
        let image = self.textures.find_by_name(texture_name)?.image.as_ref()?;
        Some(image.sample(uv))
    }

    fn vertex_color(&self, color_set: usize) -> Option<Color> {
        self.attributes.colors.get(color_set).copied()
    }

    fn custom_node(&self, name: &str, inputs: &[Color]) -> Option<Color> {
        self.custom.and_then(|handler| (handler.0)(name, inputs))
    }
}

/// Evaluate `shade` for every texel with samples, rows in parallel.
/// Texels `shade` returns `None` for stay uncovered.
pub(crate) fn cast_texels<F>(
    mapping: &MappingImage,
    background: Color,
    ctx: &ProcessContext,
    shade: F,
) -> Result<(TextureImage, Vec<bool>)>
where
    F: Fn(&[MappingSample]) -> Result<Option<Color>> + Sync,
{
    let (width, height) = (mapping.width(), mapping.height());
    let rows: Vec<Vec<Option<Color>>> = (0..height)
        .into_par_iter()
        .map(|y| {
            if ctx.token().is_cancelled() {
                return Err(Error::Cancelled);
            }
            (0..width)
                .map(|x| {
                    let samples = mapping.texel_samples(x, y);
                    if samples.is_empty() {
                        Ok(None)
                    } else {
                        shade(samples)
                    }
                })
                .collect::<Result<Vec<_>>>()
        })
        .collect::<Result<_>>()?;
    ctx.checkpoint()?;

    let mut image = TextureImage::new(width, height, background);
    let mut covered = vec![false; image.pixels.len()];
    for (i, value) in rows.into_iter().flatten().enumerate() {
        if let Some(c) = value {
            image.pixels[i] = c;
            covered[i] = true;
        }
    }
    Ok((image, covered))
}

/// Mean of `value` over the layer 0 samples of a texel
pub(crate) fn mean_over_samples(
    samples: &[MappingSample],
    mut value: impl FnMut(&MappingSample) -> Result<Color>,
) -> Result<Option<Color>> {
    let mut sum = Color::TRANSPARENT;
    let mut count = 0.0f32;
    for sample in samples.iter().filter(|s| s.layer == 0) {
        sum = sum.zip(value(sample)?, |a, b| a + b);
        count += 1.0;
    }
    Ok((count > 0.0).then(|| sum.map(|v| v / count)))
}

/// Dilate, fill and write a cast image
pub(crate) fn finish_image(
    mut image: TextureImage,
    mut covered: Vec<bool>,
    settings: &CasterSettings,
    input: &CastInput<'_>,
) -> Result<CastOutput> {
    fill_image(&mut image, &mut covered, settings.dilation, settings.fill_mode);
    let path = settings.resolve_output_path(input.output_dir);
    if let Some(path) = &path {
        lodcrate_io::save_texture_image(&image, path, settings.output_pixel_format)?;
    }
    Ok(CastOutput {
        channel: settings.material_channel.clone(),
        image: Some(image),
        path,
        ..CastOutput::default()
    })
}

/// Orthonormal tangent frame around a normal
pub(crate) fn tangent_frame(normal: &Vector3f) -> (Vector3f, Vector3f) {
    let helper = if normal.x.abs() < 0.9 { Vector3f::x() } else { Vector3f::y() };
    let tangent = normal.cross(&helper).normalize();
    let bitangent = normal.cross(&tangent);
    (tangent, bitangent)
}

/// Every caster kind, serializable except for native compute callbacks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Caster {
    Color(ColorCaster),
    Normal(NormalCaster),
    Opacity(OpacityCaster),
    Displacement(DisplacementCaster),
    AmbientOcclusion(AmbientOcclusionCaster),
    VertexColor(VertexColorCaster),
    GeometryData(GeometryDataCaster),
    #[serde(skip)]
    Compute(ComputeCaster),
}

impl Caster {
    fn inner(&self) -> &dyn MaterialCaster {
        match self {
            Caster::Color(c) => c,
            Caster::Normal(c) => c,
            Caster::Opacity(c) => c,
            Caster::Displacement(c) => c,
            Caster::AmbientOcclusion(c) => c,
            Caster::VertexColor(c) => c,
            Caster::GeometryData(c) => c,
            Caster::Compute(c) => c,
        }
    }

    /// Whether the caster can be written to a settings file
    pub fn is_serializable(&self) -> bool {
        !matches!(self, Caster::Compute(_)) && !matches!(self, Caster::Color(c) if c.custom_nodes.is_some())
    }

    pub fn channel(&self) -> &str {
        &self.caster_settings().material_channel
    }
}

impl MaterialCaster for Caster {
    fn caster_settings(&self) -> &CasterSettings {
        self.inner().caster_settings()
    }

    fn cast(&self, input: &CastInput<'_>, ctx: &ProcessContext) -> Result<CastOutput> {
        self.caster_settings().validate()?;
        let _span = tracing::debug_span!("cast", channel = %self.channel()).entered();
        self.inner().cast(input, ctx)
    }
}

macro_rules! caster_from {
    ($($variant:ident($ty:ty)),* $(,)?) => {
        $(impl From<$ty> for Caster {
            fn from(caster: $ty) -> Self {
                Caster::$variant(caster)
            }
        })*
    };
}

caster_from!(
    Color(ColorCaster),
    Normal(NormalCaster),
    Opacity(OpacityCaster),
    Displacement(DisplacementCaster),
    AmbientOcclusion(AmbientOcclusionCaster),
    VertexColor(VertexColorCaster),
    GeometryData(GeometryDataCaster),
    Compute(ComputeCaster),
);

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::settings::MappingImageOutputMaterialSettings;
    use crate::MappingImageBuilder;
    use lodcrate_core::Material;

    /// Unit quad in the xy plane with texture coordinates covering [0, 1]²
    pub fn textured_quad(z: f32) -> GeometryData {
        let mut quad = GeometryData::from_triangles(
            vec![
                Point3f::new(0.0, 0.0, z),
                Point3f::new(1.0, 0.0, z),
                Point3f::new(1.0, 1.0, z),
                Point3f::new(0.0, 1.0, z),
            ],
            vec![[0, 1, 2], [0, 2, 3]],
        );
        let level = quad.add_tex_coords("uv");
        quad.tex_coords[level].values = vec![
            Point2f::new(0.0, 0.0),
            Point2f::new(1.0, 0.0),
            Point2f::new(1.0, 1.0),
            Point2f::new(0.0, 0.0),
            Point2f::new(1.0, 1.0),
            Point2f::new(0.0, 1.0),
        ];
        quad
    }

    pub fn mapping(source: &GeometryData, destination: &GeometryData, size: u32) -> MappingImage {
        let output = MappingImageOutputMaterialSettings {
            gutter_space: 0,
            multisampling_level: 1,
            ..MappingImageOutputMaterialSettings::with_size(size, size)
        };
        MappingImageBuilder::new(source)
            .build(destination, 0, &output, &[0, 1], &ProcessContext::new())
            .unwrap()
    }

    pub fn red_material() -> MaterialTable {
        let mut materials = MaterialTable::new();
        materials.add(Material::with_color("red", lodcrate_core::channels::DIFFUSE, Color::new(1.0, 0.0, 0.0, 1.0)));
        materials
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use lodcrate_core::{Material, ShadingNetwork, ShadingNode, Texture};

    #[test]
    fn test_surface_point_samples_textures() {
        let quad = textured_quad(0.0);
        let mut textures = TextureTable::new();
        let mut image = TextureImage::new(2, 1, Color::BLACK);
        image.set(1, 0, Color::WHITE);
        textures.add(Texture::from_image("checker", image));
        let mut materials = MaterialTable::new();
        let mut material = Material::new("m");
        material.set_shading_network("Diffuse", ShadingNetwork::texture("checker", 0));
        materials.add(material);

        // u = 0.75 is the center of the white texel
        let point = SurfacePoint::new(&quad, 0, [0.25, 0.75, 0.0], &materials, &textures);
        let color = point.evaluate_channel("Diffuse").unwrap().unwrap();
        assert!(color.r > 0.99);
        assert!(point.evaluate_channel("Specular").unwrap().is_none());

        // u = 1 sits halfway between the white texel and the wrapped black one
        let edge = SurfacePoint::new(&quad, 0, [0.0, 0.95, 0.05], &materials, &textures);
        let color = edge.evaluate_channel("Diffuse").unwrap().unwrap();
        assert!((color.r - 0.5).abs() < 1e-4);
    }

    #[test]
    fn test_custom_nodes_need_a_handler() {
        let quad = textured_quad(0.0);
        let mut network = ShadingNetwork::new();
        let input = network.add(ShadingNode::Color(Color::splat(0.25))).unwrap();
        let custom = network
            .add(ShadingNode::Custom {
                name: "double".to_string(),
                inputs: vec![input],
            })
            .unwrap();
        network.set_output(custom).unwrap();
        let mut material = Material::new("m");
        material.set_shading_network("Diffuse", network);
        let mut materials = MaterialTable::new();
        materials.add(material);
        let textures = TextureTable::new();

        let point = SurfacePoint::new(&quad, 0, [1.0, 0.0, 0.0], &materials, &textures);
        assert!(matches!(point.evaluate_channel("Diffuse"), Err(Error::Algorithm(_))));

        let handler = CustomNodeHandler::new(|name, inputs| (name == "double").then(|| inputs[0].map(|v| v * 2.0)));
        let point = point.with_custom_nodes(Some(&handler));
        assert_eq!(point.evaluate_channel("Diffuse").unwrap(), Some(Color::splat(0.5)));
    }

    #[test]
    fn test_caster_serialization() {
        let casters = vec![
            Caster::from(ColorCaster::default()),
            Caster::from(NormalCaster::default()),
            Caster::from(AmbientOcclusionCaster::default()),
        ];
        let json = serde_json::to_string(&casters).unwrap();
        let back: Vec<Caster> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, casters);

        let compute = Caster::from(ComputeCaster::new("Diffuse", |_| Ok(Color::WHITE)));
        assert!(!compute.is_serializable());
        assert!(serde_json::to_string(&compute).is_err());
    }
}
