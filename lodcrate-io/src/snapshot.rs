//! Binary scene snapshots
//!
//! Snapshots are the bincode encoding of a [`Scene`] with texture images
//! inlined. They carry scenes between a caller and an out-of-process worker.

use crate::error::IoError;
use lodcrate_core::{Result, Scene};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

const SNAPSHOT_MAGIC: &[u8; 8] = b"LODSNAP1";

pub fn write_snapshot(scene: &Scene, path: &Path) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    writer.write_all(SNAPSHOT_MAGIC)?;
    bincode::serialize_into(&mut writer, scene).map_err(IoError::from)?;
    writer.flush()?;
    Ok(())
}

pub fn read_snapshot(path: &Path) -> Result<Scene> {
    if !path.exists() {
        return Err(IoError::FileNotFound {
            path: path.display().to_string(),
        }
        .into());
    }
    let mut reader = BufReader::new(File::open(path)?);
    let mut magic = [0u8; 8];
    std::io::Read::read_exact(&mut reader, &mut magic)?;
    if &magic != SNAPSHOT_MAGIC {
        return Err(IoError::InvalidFormat {
            format: format!("{} is not a scene snapshot", path.display()),
        }
        .into());
    }
    let scene = bincode::deserialize_from(reader).map_err(IoError::from)?;
    Ok(scene)
}

/// True when the file starts with the snapshot magic
pub fn is_snapshot(header: &[u8]) -> bool {
    header.starts_with(SNAPSHOT_MAGIC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lodcrate_core::{Color, GeometryData, Material, Point3f, Texture, TextureImage};

    #[test]
    fn test_snapshot_round_trip() {
        let mut scene = Scene::new();
        let id = scene.add_mesh(
            "Tri",
            GeometryData::from_triangles(
                vec![
                    Point3f::new(0.0, 0.0, 0.0),
                    Point3f::new(1.0, 0.0, 0.0),
                    Point3f::new(0.0, 1.0, 0.0),
                ],
                vec![[0, 1, 2]],
            ),
        );
        scene.materials.add(Material::with_color("M", "Diffuse", Color::WHITE));
        scene
            .textures
            .add(Texture::from_image("T", TextureImage::new(2, 2, Color::BLACK)));
        scene.add_selection_set("Set", [id]);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scene.lodsnap");
        write_snapshot(&scene, &path).unwrap();
        let back = read_snapshot(&path).unwrap();
        assert_eq!(back, scene);
    }

    #[test]
    fn test_rejects_foreign_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("other.bin");
        std::fs::write(&path, b"not a snapshot at all").unwrap();
        assert!(read_snapshot(&path).is_err());
    }
}
