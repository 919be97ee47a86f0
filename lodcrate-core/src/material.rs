//! Materials, textures and their tables

use crate::point::{Color, Point2f};
use crate::shading::ShadingNetwork;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Standard material channel names
pub mod channels {
    pub const DIFFUSE: &str = "Diffuse";
    pub const SPECULAR: &str = "Specular";
    pub const NORMALS: &str = "Normals";
    pub const OPACITY: &str = "Opacity";
    pub const DISPLACEMENT: &str = "Displacement";
    pub const AMBIENT_OCCLUSION: &str = "AmbientOcclusion";
    pub const EMISSIVE: &str = "Emissive";
}

/// How a material is composited
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlendMode {
    #[default]
    Opaque,
    Blend,
    Mask,
}

/// Whether the opacity channel stores opacity or transparency
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpacityType {
    #[default]
    Opacity,
    Transparency,
}

/// A material: named channels, each described by a shading network
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Material {
    pub name: String,
    pub channels: BTreeMap<String, ShadingNetwork>,
    pub blend_mode: BlendMode,
    pub opacity_type: OpacityType,
}

impl Material {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    /// Material with a single constant colored channel
    pub fn with_color(name: &str, channel: &str, color: Color) -> Self {
        let mut material = Self::new(name);
        material.set_shading_network(channel, ShadingNetwork::constant(color));
        material
    }

    /// Add an empty channel; no-op when the channel exists
    pub fn add_channel(&mut self, channel: &str) {
        self.channels.entry(channel.to_string()).or_default();
    }

    pub fn has_channel(&self, channel: &str) -> bool {
        self.channels.contains_key(channel)
    }

    pub fn set_shading_network(&mut self, channel: &str, network: ShadingNetwork) {
        self.channels.insert(channel.to_string(), network);
    }

    /// Network of a channel, `None` for missing or empty channels
    pub fn shading_network(&self, channel: &str) -> Option<&ShadingNetwork> {
        self.channels.get(channel).filter(|n| n.output().is_some())
    }

    pub fn is_transparent(&self) -> bool {
        self.blend_mode != BlendMode::Opaque
    }
}

/// Ordered list of materials; geometry material ids index into it
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MaterialTable {
    materials: Vec<Material>,
}

impl MaterialTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a material and return its id
    pub fn add(&mut self, material: Material) -> usize {
        self.materials.push(material);
        self.materials.len() - 1
    }

    pub fn get(&self, id: usize) -> Option<&Material> {
        self.materials.get(id)
    }

    pub fn get_mut(&mut self, id: usize) -> Option<&mut Material> {
        self.materials.get_mut(id)
    }

    pub fn find_by_name(&self, name: &str) -> Option<usize> {
        self.materials.iter().position(|m| m.name == name)
    }

    pub fn len(&self) -> usize {
        self.materials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.materials.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Material> {
        self.materials.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Material> {
        self.materials.iter_mut()
    }

    pub fn clear(&mut self) {
        self.materials.clear();
    }

    /// Append all materials of `other`, returning the id offset applied to them
    pub fn extend_from(&mut self, other: &MaterialTable) -> usize {
        let offset = self.materials.len();
        self.materials.extend(other.materials.iter().cloned());
        offset
    }
}

/// Texel storage for a texture, linear RGBA, row 0 at the top
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextureImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<Color>,
}

impl TextureImage {
    pub fn new(width: u32, height: u32, fill: Color) -> Self {
        Self {
            width,
            height,
            pixels: vec![fill; width as usize * height as usize],
        }
    }

    #[inline]
    pub fn get(&self, x: u32, y: u32) -> Color {
        self.pixels[y as usize * self.width as usize + x as usize]
    }

    #[inline]
    pub fn set(&mut self, x: u32, y: u32, color: Color) {
        let idx = y as usize * self.width as usize + x as usize;
        self.pixels[idx] = color;
    }

    /// Texture coordinate of a texel center. V points up, rows go down.
    pub fn texel_center_uv(x: u32, y: u32, width: u32, height: u32) -> Point2f {
        Point2f::new(
            (x as f32 + 0.5) / width as f32,
            1.0 - (y as f32 + 0.5) / height as f32,
        )
    }

    /// Bilinear sample with repeat wrapping
    pub fn sample(&self, uv: Point2f) -> Color {
        if self.width == 0 || self.height == 0 {
            return Color::BLACK;
        }
        let fx = uv.x * self.width as f32 - 0.5;
        let fy = (1.0 - uv.y) * self.height as f32 - 0.5;
        let x0 = fx.floor();
        let y0 = fy.floor();
        let tx = fx - x0;
        let ty = fy - y0;
        let wrap = |v: i64, n: u32| v.rem_euclid(n as i64) as u32;
        let (x0, y0) = (x0 as i64, y0 as i64);
        let c00 = self.get(wrap(x0, self.width), wrap(y0, self.height));
        let c10 = self.get(wrap(x0 + 1, self.width), wrap(y0, self.height));
        let c01 = self.get(wrap(x0, self.width), wrap(y0 + 1, self.height));
        let c11 = self.get(wrap(x0 + 1, self.width), wrap(y0 + 1, self.height));
        c00.lerp(c10, tx).lerp(c01.lerp(c11, tx), ty)
    }
}

/// A named texture, optionally with its decoded image
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Texture {
    pub name: String,
    pub file_path: Option<PathBuf>,
    pub image: Option<TextureImage>,
}

impl Texture {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    pub fn from_file(name: &str, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.to_string(),
            file_path: Some(path.into()),
            image: None,
        }
    }

    pub fn from_image(name: &str, image: TextureImage) -> Self {
        Self {
            name: name.to_string(),
            file_path: None,
            image: Some(image),
        }
    }
}

/// Textures referenced by name from texture shading nodes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TextureTable {
    textures: Vec<Texture>,
}

impl TextureTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, texture: Texture) -> usize {
        self.textures.push(texture);
        self.textures.len() - 1
    }

    pub fn get(&self, id: usize) -> Option<&Texture> {
        self.textures.get(id)
    }

    pub fn find_by_name(&self, name: &str) -> Option<&Texture> {
        self.textures.iter().find(|t| t.name == name)
    }

    pub fn len(&self) -> usize {
        self.textures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.textures.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Texture> {
        self.textures.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Texture> {
        self.textures.iter_mut()
    }

    pub fn clear(&mut self) {
        self.textures.clear();
    }

    /// Append textures whose name is not present yet
    pub fn merge(&mut self, other: &TextureTable) {
        for texture in &other.textures {
            if self.find_by_name(&texture.name).is_none() {
                self.textures.push(texture.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_material_channels() {
        let mut material = Material::with_color("Red", channels::DIFFUSE, Color::new(1.0, 0.0, 0.0, 1.0));
        material.add_channel(channels::SPECULAR);
        assert!(material.has_channel(channels::SPECULAR));
        assert!(material.shading_network(channels::SPECULAR).is_none());
        assert!(material.shading_network(channels::DIFFUSE).is_some());

        let mut table = MaterialTable::new();
        assert_eq!(table.add(material), 0);
        assert_eq!(table.find_by_name("Red"), Some(0));
    }

    #[test]
    fn test_texture_sample_center_and_wrap() {
        let mut image = TextureImage::new(2, 2, Color::BLACK);
        image.set(0, 0, Color::WHITE);
        let uv = TextureImage::texel_center_uv(0, 0, 2, 2);
        assert_relative_eq!(uv.x, 0.25);
        assert_relative_eq!(uv.y, 0.75);
        assert_eq!(image.sample(uv), Color::WHITE);

        // Halfway between the white texel and its wrapped neighbour
        let c = image.sample(Point2f::new(0.0, 0.75));
        assert_relative_eq!(c.r, 0.5);
    }

    #[test]
    fn test_texture_table_merge() {
        let mut a = TextureTable::new();
        a.add(Texture::new("Diffuse"));
        let mut b = TextureTable::new();
        b.add(Texture::new("Diffuse"));
        b.add(Texture::from_file("Normals", "normals.png"));
        a.merge(&b);
        assert_eq!(a.len(), 2);
        assert!(a.find_by_name("Normals").is_some());
    }
}
