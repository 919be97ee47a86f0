//! Texture image loading and saving

use crate::error::IoError;
use image::{DynamicImage, ImageBuffer, ImageFormat, Luma, Rgb, Rgba};
use lodcrate_core::{Color, Result, Scene, TextureImage};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::path::Path;

/// Pixel layout of written texture files
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    R8,
    R8G8B8,
    #[default]
    R8G8B8A8,
    R16G16B16,
}

impl PixelFormat {
    pub fn channel_count(self) -> usize {
        match self {
            PixelFormat::R8 => 1,
            PixelFormat::R8G8B8 | PixelFormat::R16G16B16 => 3,
            PixelFormat::R8G8B8A8 => 4,
        }
    }
}

/// Decode an image file into linear float texels
pub fn load_texture_image(path: &Path) -> Result<TextureImage> {
    if !path.exists() {
        return Err(IoError::FileNotFound {
            path: path.display().to_string(),
        }
        .into());
    }
    let image = image::open(path).map_err(IoError::from)?;
    Ok(from_dynamic_image(&image))
}

/// Decode an encoded image held in memory (embedded glTF images)
pub fn decode_texture_image(bytes: &[u8]) -> Result<TextureImage> {
    let image = image::load_from_memory(bytes).map_err(IoError::from)?;
    Ok(from_dynamic_image(&image))
}

fn from_dynamic_image(image: &DynamicImage) -> TextureImage {
    let rgba = image.to_rgba32f();
    let (width, height) = rgba.dimensions();
    let pixels = rgba
        .pixels()
        .map(|p| Color::new(p[0], p[1], p[2], p[3]))
        .collect();
    TextureImage {
        width,
        height,
        pixels,
    }
}

fn quantize8(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

fn quantize16(v: f32) -> u16 {
    (v.clamp(0.0, 1.0) * 65535.0).round() as u16
}

/// Convert texels into an `image` buffer of the requested layout
pub fn to_dynamic_image(texture: &TextureImage, format: PixelFormat) -> Result<DynamicImage> {
    let (w, h) = (texture.width, texture.height);
    let px = &texture.pixels;
    let invalid = || IoError::write(format!("texel buffer does not match {}x{}", w, h));
    let image = match format {
        PixelFormat::R8 => DynamicImage::ImageLuma8(
            ImageBuffer::<Luma<u8>, _>::from_raw(w, h, px.iter().map(|c| quantize8(c.r)).collect())
                .ok_or_else(invalid)?,
        ),
        PixelFormat::R8G8B8 => DynamicImage::ImageRgb8(
            ImageBuffer::<Rgb<u8>, _>::from_raw(
                w,
                h,
                px.iter()
                    .flat_map(|c| [quantize8(c.r), quantize8(c.g), quantize8(c.b)])
                    .collect(),
            )
            .ok_or_else(invalid)?,
        ),
        PixelFormat::R8G8B8A8 => DynamicImage::ImageRgba8(
            ImageBuffer::<Rgba<u8>, _>::from_raw(
                w,
                h,
                px.iter().flat_map(|c| c.to_array().map(quantize8)).collect(),
            )
            .ok_or_else(invalid)?,
        ),
        PixelFormat::R16G16B16 => DynamicImage::ImageRgb16(
            ImageBuffer::<Rgb<u16>, _>::from_raw(
                w,
                h,
                px.iter()
                    .flat_map(|c| [quantize16(c.r), quantize16(c.g), quantize16(c.b)])
                    .collect(),
            )
            .ok_or_else(invalid)?,
        ),
    };
    Ok(image)
}

/// Write texels to an image file; the container comes from the extension
pub fn save_texture_image(texture: &TextureImage, path: &Path, format: PixelFormat) -> Result<()> {
    let image_format = ImageFormat::from_path(path).map_err(|_| IoError::InvalidFormat {
        format: format!("cannot pick an image format for {}", path.display()),
    })?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let image = to_dynamic_image(texture, format)?;
    let image = if image_format == ImageFormat::Jpeg {
        DynamicImage::ImageRgb8(image.to_rgb8())
    } else {
        image
    };
    image
        .save_with_format(path, image_format)
        .map_err(IoError::from)?;
    tracing::debug!("wrote {}x{} texture {}", texture.width, texture.height, path.display());
    Ok(())
}

/// Encode texels as PNG bytes
pub fn encode_png(texture: &TextureImage, format: PixelFormat) -> Result<Vec<u8>> {
    let image = to_dynamic_image(texture, format)?;
    let mut bytes = Cursor::new(Vec::new());
    image
        .write_to(&mut bytes, ImageFormat::Png)
        .map_err(IoError::from)?;
    Ok(bytes.into_inner())
}

/// Decode every texture of the scene that has a file path but no image yet.
/// Relative paths resolve against `base_dir`. Missing files are skipped with
/// a warning. Returns the number of textures loaded.
pub fn load_textures(scene: &mut Scene, base_dir: &Path) -> Result<usize> {
    let mut loaded = 0;
    for texture in scene.textures.iter_mut() {
        if texture.image.is_some() {
            continue;
        }
        let Some(file) = texture.file_path.as_ref() else {
            continue;
        };
        let path = if file.is_absolute() {
            file.clone()
        } else {
            base_dir.join(file)
        };
        if !path.exists() {
            tracing::warn!("texture '{}' not found at {}", texture.name, path.display());
            continue;
        }
        texture.image = Some(load_texture_image(&path)?);
        loaded += 1;
    }
    Ok(loaded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use lodcrate_core::Texture;

    fn checker() -> TextureImage {
        let mut image = TextureImage::new(4, 4, Color::BLACK);
        for y in 0..4 {
            for x in 0..4 {
                if (x + y) % 2 == 0 {
                    image.set(x, y, Color::new(1.0, 0.5, 0.0, 1.0));
                }
            }
        }
        image
    }

    #[test]
    fn test_png_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checker.png");
        save_texture_image(&checker(), &path, PixelFormat::R8G8B8A8).unwrap();
        let back = load_texture_image(&path).unwrap();
        assert_eq!((back.width, back.height), (4, 4));
        assert_relative_eq!(back.get(0, 0).g, 0.5, epsilon = 1.0 / 255.0);
        assert_eq!(back.get(1, 0), Color::BLACK);
    }

    #[test]
    fn test_single_channel_and_16_bit() {
        let dir = tempfile::tempdir().unwrap();
        let r8 = dir.path().join("ao.png");
        save_texture_image(&checker(), &r8, PixelFormat::R8).unwrap();
        let back = load_texture_image(&r8).unwrap();
        assert_relative_eq!(back.get(0, 0).g, 1.0);

        let wide = dir.path().join("normals.png");
        save_texture_image(&checker(), &wide, PixelFormat::R16G16B16).unwrap();
        assert!(load_texture_image(&wide).is_ok());
    }

    #[test]
    fn test_load_textures_skips_missing() {
        let dir = tempfile::tempdir().unwrap();
        save_texture_image(&checker(), &dir.path().join("a.png"), PixelFormat::R8G8B8).unwrap();
        let mut scene = Scene::new();
        scene.textures.add(Texture::from_file("A", "a.png"));
        scene.textures.add(Texture::from_file("B", "missing.png"));
        assert_eq!(load_textures(&mut scene, dir.path()).unwrap(), 1);
        assert!(scene.textures.find_by_name("A").unwrap().image.is_some());
        assert!(scene.textures.find_by_name("B").unwrap().image.is_none());
    }

    #[test]
    fn test_encode_png_magic() {
        let bytes = encode_png(&checker(), PixelFormat::R8G8B8A8).unwrap();
        assert_eq!(&bytes[1..4], b"PNG");
        let decoded = decode_texture_image(&bytes).unwrap();
        assert_eq!(decoded.width, 4);
    }
}
