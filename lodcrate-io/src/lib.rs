//! Scene import and export for lodcrate
//!
//! This crate reads OBJ (with MTL materials), glTF and GLB files into a
//! [`Scene`], writes scenes back as OBJ or GLB, loads and saves texture
//! images, and stores bincode scene snapshots for out-of-process runs.
//! FBX files are recognized and rejected.

pub mod error;
pub mod gltf;
pub mod obj;
pub mod registry;
pub mod snapshot;
pub mod texture;

pub use error::*;
pub use gltf::{scene_to_glb, GlbWriter, GltfReader};
pub use obj::{ObjReader, ObjWriter, OBJ_TEX_COORD_LEVEL};
pub use registry::{IoRegistry, SceneReader, SceneWriter};
pub use snapshot::{is_snapshot, read_snapshot, write_snapshot};
pub use texture::{
    decode_texture_image, encode_png, load_texture_image, load_textures, save_texture_image,
    to_dynamic_image, PixelFormat,
};

use lodcrate_core::{Result, Scene};
use std::path::Path;

/// Read a scene with the built-in formats and decode the textures it
/// references by file
pub fn load_scene<P: AsRef<Path>>(path: P) -> Result<Scene> {
    let path = path.as_ref();
    let mut scene = IoRegistry::with_default_formats().read_scene(path)?;
    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
    let loaded = load_textures(&mut scene, base_dir)?;
    if loaded > 0 {
        tracing::debug!("loaded {} texture files for {}", loaded, path.display());
    }
    Ok(scene)
}

/// Write a scene; the format comes from the extension (`.obj` or `.glb`)
pub fn save_scene<P: AsRef<Path>>(scene: &Scene, path: P) -> Result<()> {
    IoRegistry::with_default_formats().write_scene(scene, path.as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lodcrate_core::{GeometryData, Point3f};

    fn triangle_scene() -> Scene {
        let mut scene = Scene::new();
        scene.add_mesh(
            "Tri",
            GeometryData::from_triangles(
                vec![
                    Point3f::new(0.0, 0.0, 0.0),
                    Point3f::new(1.0, 0.0, 0.0),
                    Point3f::new(0.5, 1.0, 0.0),
                ],
                vec![[0, 1, 2]],
            ),
        );
        scene
    }

    #[test]
    fn test_auto_detect_functions() {
        let dir = tempfile::tempdir().unwrap();
        let scene = triangle_scene();
        for name in ["tri.obj", "tri.glb"] {
            let path = dir.path().join(name);
            save_scene(&scene, &path).unwrap();
            let loaded = load_scene(&path).unwrap();
            assert_eq!(loaded.vertex_count(), 3, "{}", name);
            assert_eq!(loaded.triangle_count(), 1, "{}", name);
        }
    }

    #[test]
    fn test_unsupported_format() {
        let dir = tempfile::tempdir().unwrap();
        assert!(save_scene(&triangle_scene(), dir.path().join("tri.stl")).is_err());
        assert!(save_scene(&triangle_scene(), dir.path().join("tri.fbx")).is_err());
    }
}
