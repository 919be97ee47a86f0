//! Mapping image and caster settings

use lodcrate_core::{channels, Error, Result};
use lodcrate_io::PixelFormat;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// How texture space is divided between charts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChartAggregatorMode {
    /// New planar charts, sized by their surface area
    #[default]
    SurfaceArea,
    /// Keep the charts of the existing texture coordinates and their relative
    /// sizes; falls back to `SurfaceArea` when there are none
    TexCoordProportions,
}

/// Size and sampling of one output material's textures
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MappingImageOutputMaterialSettings {
    pub texture_width: u32,
    pub texture_height: u32,
    /// Subsamples per texel along each axis
    pub multisampling_level: u32,
    /// Empty texels kept between charts
    pub gutter_space: u32,
}

impl Default for MappingImageOutputMaterialSettings {
    fn default() -> Self {
        Self {
            texture_width: 1024,
            texture_height: 1024,
            multisampling_level: 2,
            gutter_space: 4,
        }
    }
}

impl MappingImageOutputMaterialSettings {
    pub fn with_size(texture_width: u32, texture_height: u32) -> Self {
        Self {
            texture_width,
            texture_height,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.texture_width == 0 || self.texture_height == 0 {
            return Err(Error::InvalidSettings(format!(
                "output texture size {}x{} is empty",
                self.texture_width, self.texture_height
            )));
        }
        if !(1..=8).contains(&self.multisampling_level) {
            return Err(Error::InvalidSettings(format!(
                "multisampling level must be in 1..=8, got {}",
                self.multisampling_level
            )));
        }
        let smallest = self.texture_width.min(self.texture_height);
        if self.gutter_space * 4 >= smallest {
            return Err(Error::InvalidSettings(format!(
                "gutter space {} leaves no room in a {}x{} texture",
                self.gutter_space, self.texture_width, self.texture_height
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MappingImageSettings {
    pub generate_mapping_image: bool,
    pub generate_tex_coords: bool,
    pub generate_tangents: bool,
    /// Give every processed triangle the id of its output material
    pub apply_new_material_ids: bool,
    /// Overlapping hits recorded per subsample (impostors)
    pub maximum_layers: u32,
    /// Name of the generated texture coordinate level
    pub tex_coord_name: String,
    pub output_materials: Vec<MappingImageOutputMaterialSettings>,
    /// Output material of each source material id. Ids past the end go to
    /// output 0.
    pub source_material_outputs: Vec<usize>,
    pub chart_aggregator_mode: ChartAggregatorMode,
}

impl Default for MappingImageSettings {
    fn default() -> Self {
        Self {
            generate_mapping_image: false,
            generate_tex_coords: true,
            generate_tangents: true,
            apply_new_material_ids: true,
            maximum_layers: 1,
            tex_coord_name: "MaterialLOD".to_string(),
            output_materials: vec![MappingImageOutputMaterialSettings::default()],
            source_material_outputs: Vec::new(),
            chart_aggregator_mode: ChartAggregatorMode::SurfaceArea,
        }
    }
}

impl MappingImageSettings {
    /// Settings that produce a mapping image with one output material of the
    /// given size
    pub fn with_texture_size(width: u32, height: u32) -> Self {
        Self {
            generate_mapping_image: true,
            output_materials: vec![MappingImageOutputMaterialSettings::with_size(width, height)],
            ..Self::default()
        }
    }

    pub fn output_material_count(&self) -> usize {
        self.output_materials.len().max(1)
    }

    pub fn output_material(&self, index: usize) -> Option<&MappingImageOutputMaterialSettings> {
        self.output_materials.get(index)
    }

    /// Output material a triangle with the given source material id goes to
    pub fn output_for_material(&self, material_id: i32) -> usize {
        usize::try_from(material_id)
            .ok()
            .and_then(|id| self.source_material_outputs.get(id))
            .copied()
            .filter(|&o| o < self.output_material_count())
            .unwrap_or(0)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.generate_mapping_image {
            return Ok(());
        }
        if self.output_materials.is_empty() {
            return Err(Error::InvalidSettings(
                "a mapping image needs at least one output material".to_string(),
            ));
        }
        for output in &self.output_materials {
            output.validate()?;
        }
        if self.maximum_layers == 0 || self.maximum_layers > 64 {
            return Err(Error::InvalidSettings(format!(
                "maximum layers must be in 1..=64, got {}",
                self.maximum_layers
            )));
        }
        if !self.generate_tex_coords && self.tex_coord_name.is_empty() {
            return Err(Error::InvalidSettings(
                "existing texture coordinates must be named when they are not generated".to_string(),
            ));
        }
        Ok(())
    }
}

/// How texels no surface covers are filled after casting
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FillMode {
    /// Average of covered neighbours, grown outward ring by ring
    #[default]
    Interpolate,
    /// Copy of the closest covered texel
    NearestNeighbor,
    /// Leave uncovered texels at the background value
    NoFill,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColorComponent {
    Red,
    Green,
    Blue,
    #[default]
    Alpha,
}

impl ColorComponent {
    pub fn index(self) -> usize {
        match self {
            ColorComponent::Red => 0,
            ColorComponent::Green => 1,
            ColorComponent::Blue => 2,
            ColorComponent::Alpha => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageFileFormat {
    #[default]
    Png,
    Jpeg,
}

impl ImageFileFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ImageFileFormat::Png => "png",
            ImageFileFormat::Jpeg => "jpg",
        }
    }
}

/// Settings every caster shares
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CasterSettings {
    /// Material channel read from the source and written to the output
    pub material_channel: String,
    pub output_image_file_format: ImageFileFormat,
    pub output_pixel_format: PixelFormat,
    /// Rings of texels grown around covered texels before filling
    pub dilation: u32,
    pub fill_mode: FillMode,
    pub opacity_channel: String,
    pub opacity_channel_component: ColorComponent,
    /// Where the image is written. Relative paths resolve against the
    /// output directory of the run; a missing extension is added.
    pub output_file_path: Option<PathBuf>,
}

impl Default for CasterSettings {
    fn default() -> Self {
        Self {
            material_channel: channels::DIFFUSE.to_string(),
            output_image_file_format: ImageFileFormat::Png,
            output_pixel_format: PixelFormat::R8G8B8A8,
            dilation: 10,
            fill_mode: FillMode::Interpolate,
            opacity_channel: channels::OPACITY.to_string(),
            opacity_channel_component: ColorComponent::Alpha,
            output_file_path: None,
        }
    }
}

impl CasterSettings {
    pub fn for_channel(channel: &str) -> Self {
        Self {
            material_channel: channel.to_string(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.material_channel.is_empty() {
            return Err(Error::InvalidSettings("caster material channel is empty".to_string()));
        }
        Ok(())
    }

    /// Image path for this caster, or `None` when the run has no output
    /// directory and no explicit path was given
    pub fn resolve_output_path(&self, output_dir: Option<&Path>) -> Option<PathBuf> {
        let path = match (&self.output_file_path, output_dir) {
            (Some(p), _) if p.is_absolute() => p.clone(),
            (Some(p), Some(dir)) => dir.join(p),
            (Some(p), None) => p.clone(),
            (None, Some(dir)) => dir.join(&self.material_channel),
            (None, None) => return None,
        };
        if path.extension().is_some() {
            Some(path)
        } else {
            Some(path.with_extension(self.output_image_file_format.extension()))
        }
    }
}
