//! Mapping images
//!
//! A mapping image links every texel of an output texture back to the
//! surface it covers: for each multisampled subsample it stores which source
//! triangle (and where on it) the destination surface maps to. Impostors can
//! record several layered hits per subsample, sorted front to back.
//!
//! Samples are stored texel after texel in one array with an offset table,
//! so texel `(x, y)` owns `samples[offsets[i]..offsets[i + 1]]` with
//! `i = y * width + x`.

use crate::error::{Error, Result};
use crate::geometry::GeometryData;
use serde::{Deserialize, Serialize};

/// One mapped subsample of a texel
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MappingSample {
    /// Subsample index inside the texel, `0..level²`
    pub subsample: u16,
    /// Layer index, 0 is the closest hit
    pub layer: u8,
    pub source_triangle: u32,
    pub source_barycentric: [f32; 3],
    pub material_id: i32,
    pub destination_triangle: u32,
    pub destination_barycentric: [f32; 3],
    /// Signed distance from the destination to the source surface along the
    /// destination normal
    pub distance: f32,
}

/// Per-texel mapping from output texture space to source geometry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingImage {
    width: u32,
    height: u32,
    multisampling_level: u32,
    max_layers: u32,
    offsets: Vec<u32>,
    samples: Vec<MappingSample>,
    /// Combined source geometry in world space
    pub source: GeometryData,
    /// Processed geometry carrying the generated texture coordinates
    pub destination: GeometryData,
    /// Texture coordinate level of `destination` the image was built for
    pub tex_coord_level: usize,
}

impl MappingImage {
    /// Assemble a mapping image from per-texel sample lists given in row
    /// major order
    pub fn from_texels(
        width: u32,
        height: u32,
        multisampling_level: u32,
        max_layers: u32,
        texels: Vec<Vec<MappingSample>>,
        source: GeometryData,
        destination: GeometryData,
        tex_coord_level: usize,
    ) -> Result<Self> {
        let expected = width as usize * height as usize;
        if texels.len() != expected {
            return Err(Error::InvalidData(format!(
                "mapping image {}x{} needs {} texels, got {}",
                width,
                height,
                expected,
                texels.len()
            )));
        }
        if multisampling_level == 0 || max_layers == 0 {
            return Err(Error::InvalidSettings(
                "multisampling level and layer count must be at least 1".to_string(),
            ));
        }
        let mut offsets = Vec::with_capacity(expected + 1);
        let mut samples = Vec::with_capacity(texels.iter().map(|t| t.len()).sum());
        offsets.push(0u32);
        for texel in texels {
            samples.extend(texel);
            offsets.push(samples.len() as u32);
        }
        Ok(Self {
            width,
            height,
            multisampling_level,
            max_layers,
            offsets,
            samples,
            source,
            destination,
            tex_coord_level,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn multisampling_level(&self) -> u32 {
        self.multisampling_level
    }

    pub fn subsamples_per_texel(&self) -> u32 {
        self.multisampling_level * self.multisampling_level
    }

    pub fn max_layers(&self) -> u32 {
        self.max_layers
    }

    /// All samples (every subsample and layer) of a texel
    pub fn texel_samples(&self, x: u32, y: u32) -> &[MappingSample] {
        let i = y as usize * self.width as usize + x as usize;
        &self.samples[self.offsets[i] as usize..self.offsets[i + 1] as usize]
    }

    /// Samples of a texel restricted to one layer
    pub fn layer_samples(&self, x: u32, y: u32, layer: u8) -> impl Iterator<Item = &MappingSample> {
        self.texel_samples(x, y).iter().filter(move |s| s.layer == layer)
    }

    /// Fraction of the subsamples of a texel that hit the surface
    pub fn coverage(&self, x: u32, y: u32) -> f32 {
        let covered = self
            .texel_samples(x, y)
            .iter()
            .filter(|s| s.layer == 0)
            .count();
        covered as f32 / self.subsamples_per_texel() as f32
    }

    pub fn is_covered(&self, x: u32, y: u32) -> bool {
        !self.texel_samples(x, y).is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Number of texels with at least one sample
    pub fn occupied_texels(&self) -> usize {
        self.offsets.windows(2).filter(|w| w[1] > w[0]).count()
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(subsample: u16, layer: u8) -> MappingSample {
        MappingSample {
            subsample,
            layer,
            source_triangle: 0,
            source_barycentric: [1.0, 0.0, 0.0],
            material_id: 0,
            destination_triangle: 0,
            destination_barycentric: [1.0, 0.0, 0.0],
            distance: 0.0,
        }
    }

    #[test]
    fn test_offsets_and_coverage() {
        let texels = vec![
            vec![sample(0, 0), sample(1, 0), sample(1, 1)],
            vec![],
            vec![sample(3, 0)],
            vec![],
        ];
        let image =
            MappingImage::from_texels(2, 2, 2, 2, texels, GeometryData::new(), GeometryData::new(), 0).unwrap();
        assert_eq!(image.texel_samples(0, 0).len(), 3);
        assert!(image.texel_samples(1, 0).is_empty());
        assert_eq!(image.coverage(0, 0), 0.5);
        assert_eq!(image.coverage(0, 1), 0.25);
        assert_eq!(image.layer_samples(0, 0, 1).count(), 1);
        assert_eq!(image.occupied_texels(), 2);
        assert!(!image.is_empty());
    }

    #[test]
    fn test_rejects_wrong_texel_count() {
        let result =
            MappingImage::from_texels(2, 2, 1, 1, vec![vec![]], GeometryData::new(), GeometryData::new(), 0);
        assert!(matches!(result, Err(Error::InvalidData(_))));
    }
}
