//! Unified IO registry for format-agnostic scene reading and writing
//!
//! Readers and writers are registered per lowercase extension. Reading
//! first looks at the file header (magic bytes) and falls back to the
//! extension.

use crate::error::IoError;
use crate::gltf::{GlbWriter, GltfReader};
use crate::obj::{ObjReader, ObjWriter};
use lodcrate_core::{Error, Result, Scene};
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Trait for reading scenes from files
pub trait SceneReader: Send + Sync {
    /// Read a scene from the given path
    fn read_scene(&self, path: &Path) -> Result<Scene>;

    /// Check if this reader can handle the given file by examining its header
    fn can_read(&self, path: &Path) -> bool;

    /// Get the format name this reader handles
    fn format_name(&self) -> &'static str;
}

/// Trait for writing scenes to files
pub trait SceneWriter: Send + Sync {
    /// Write a scene to the given path
    fn write_scene(&self, scene: &Scene, path: &Path) -> Result<()>;

    /// Get the format name this writer handles
    fn format_name(&self) -> &'static str;
}

/// IO registry that manages format handlers and provides unified access
pub struct IoRegistry {
    readers: HashMap<String, Box<dyn SceneReader>>,
    writers: HashMap<String, Box<dyn SceneWriter>>,
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default()
}

fn fbx_rejected(path: &Path) -> Error {
    Error::UnsupportedFormat(format!(
        "FBX is not supported ({}); convert the scene to glTF or OBJ",
        path.display()
    ))
}

impl IoRegistry {
    /// Create a new empty IO registry
    pub fn new() -> Self {
        Self {
            readers: HashMap::new(),
            writers: HashMap::new(),
        }
    }

    /// Registry with the built-in OBJ and glTF handlers
    pub fn with_default_formats() -> Self {
        let mut registry = Self::new();
        registry.register_reader("obj", Box::new(ObjReader));
        registry.register_reader("gltf", Box::new(GltfReader));
        registry.register_reader("glb", Box::new(GltfReader));
        registry.register_writer("obj", Box::new(ObjWriter));
        registry.register_writer("glb", Box::new(GlbWriter));
        registry
    }

    /// Register a reader for a specific extension
    pub fn register_reader(&mut self, format: &str, handler: Box<dyn SceneReader>) {
        self.readers.insert(format.to_lowercase(), handler);
    }

    /// Register a writer for a specific extension
    pub fn register_writer(&mut self, format: &str, handler: Box<dyn SceneWriter>) {
        self.writers.insert(format.to_lowercase(), handler);
    }

    /// Read a scene, detecting the format from the header or the extension
    pub fn read_scene(&self, path: &Path) -> Result<Scene> {
        if !path.exists() {
            return Err(IoError::FileNotFound {
                path: path.display().to_string(),
            }
            .into());
        }
        let extension = extension_of(path);
        let detected = self.detect_format(path);
        if extension == "fbx" || detected.as_deref() == Some("fbx") {
            return Err(fbx_rejected(path));
        }

        if let Some(reader) = detected.as_ref().and_then(|f| self.readers.get(f)) {
            tracing::debug!("reading {} as {}", path.display(), reader.format_name());
            return reader.read_scene(path);
        }
        if let Some(reader) = self.readers.get(&extension) {
            tracing::debug!("reading {} as {} (by extension)", path.display(), reader.format_name());
            return reader.read_scene(path);
        }

        Err(Error::UnsupportedFormat(format!(
            "No scene reader found for {}",
            path.display()
        )))
    }

    /// Write a scene using the writer registered for the path's extension
    pub fn write_scene(&self, scene: &Scene, path: &Path) -> Result<()> {
        let extension = extension_of(path);
        if extension == "fbx" {
            return Err(fbx_rejected(path));
        }
        match self.writers.get(&extension) {
            Some(writer) => {
                tracing::debug!("writing {} as {}", path.display(), writer.format_name());
                writer.write_scene(scene, path)
            }
            None => Err(Error::UnsupportedFormat(format!(
                "No scene writer found for format: {}",
                extension
            ))),
        }
    }

    /// Detect file format by examining the header/magic bytes
    pub fn detect_format(&self, path: &Path) -> Option<String> {
        let mut file = File::open(path).ok()?;
        let mut header = [0u8; 64];
        let bytes_read = file.read(&mut header).ok()?;
        let header = &header[..bytes_read];
        if bytes_read < 4 {
            return None;
        }

        if header.starts_with(b"glTF") {
            return Some("glb".to_string());
        }
        if header.starts_with(b"Kaydara FBX Binary") || header.starts_with(b"; FBX") {
            return Some("fbx".to_string());
        }
        let text = String::from_utf8_lossy(header);
        let trimmed = text.trim_start();
        if trimmed.starts_with('{') {
            return Some("gltf".to_string());
        }

        // OBJ files have no magic; look for vertex statements
        let mut content = String::new();
        File::open(path).ok()?.read_to_string(&mut content).ok()?;
        if content.lines().any(|line| line.trim_start().starts_with("v ")) {
            return Some("obj".to_string());
        }

        None
    }

    /// Extensions with a registered reader
    pub fn supported_read_formats(&self) -> Vec<String> {
        let mut formats: Vec<String> = self.readers.keys().cloned().collect();
        formats.sort();
        formats
    }

    /// Extensions with a registered writer
    pub fn supported_write_formats(&self) -> Vec<String> {
        let mut formats: Vec<String> = self.writers.keys().cloned().collect();
        formats.sort();
        formats
    }

    pub fn supports_reading(&self, format: &str) -> bool {
        self.readers.contains_key(&format.to_lowercase())
    }

    pub fn supports_writing(&self, format: &str) -> bool {
        self.writers.contains_key(&format.to_lowercase())
    }
}

impl Default for IoRegistry {
    fn default() -> Self {
        Self::with_default_formats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    struct MockReader;

    impl SceneReader for MockReader {
        fn read_scene(&self, _path: &Path) -> Result<Scene> {
            let mut scene = Scene::new();
            scene.root.name = "Mock".to_string();
            Ok(scene)
        }

        fn can_read(&self, _path: &Path) -> bool {
            true
        }

        fn format_name(&self) -> &'static str {
            "mock"
        }
    }

    #[test]
    fn test_registry_registration() {
        let mut registry = IoRegistry::new();
        registry.register_reader("MOCK", Box::new(MockReader));
        assert!(registry.supports_reading("mock"));
        assert!(!registry.supports_writing("mock"));

        let defaults = IoRegistry::with_default_formats();
        assert_eq!(defaults.supported_read_formats(), vec!["glb", "gltf", "obj"]);
        assert_eq!(defaults.supported_write_formats(), vec!["glb", "obj"]);
    }

    #[test]
    fn test_extension_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scene.mock");
        fs::write(&path, "opaque").unwrap();
        let mut registry = IoRegistry::new();
        registry.register_reader("mock", Box::new(MockReader));
        assert_eq!(registry.read_scene(&path).unwrap().root.name, "Mock");
    }

    #[test]
    fn test_format_detection() {
        let dir = tempfile::tempdir().unwrap();
        let registry = IoRegistry::with_default_formats();

        let obj = dir.path().join("noext");
        fs::write(&obj, "# comment\nv 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 3\n").unwrap();
        assert_eq!(registry.detect_format(&obj).as_deref(), Some("obj"));

        let glb = dir.path().join("x.bin");
        fs::write(&glb, b"glTF\x02\x00\x00\x00").unwrap();
        assert_eq!(registry.detect_format(&glb).as_deref(), Some("glb"));
    }

    #[test]
    fn test_fbx_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Teapot.fbx");
        fs::write(&path, b"Kaydara FBX Binary  \x00").unwrap();
        let registry = IoRegistry::with_default_formats();
        assert!(matches!(registry.read_scene(&path), Err(Error::UnsupportedFormat(_))));
        assert!(matches!(
            registry.write_scene(&Scene::new(), &path),
            Err(Error::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        let registry = IoRegistry::with_default_formats();
        assert!(matches!(
            registry.read_scene(Path::new("does/not/exist.obj")),
            Err(Error::Io(_))
        ));
    }
}
