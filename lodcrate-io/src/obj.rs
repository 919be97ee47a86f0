//! OBJ format support
//!
//! Reading uses the raw parser of the `obj` crate so groups, `usemtl`
//! ranges and material libraries are all visible. Every `g` group becomes
//! one mesh node below the root. Writing bakes world transforms into the
//! vertex positions and emits one group per mesh node plus an MTL library.

use crate::error::IoError;
use crate::registry::{SceneReader, SceneWriter};
use crate::texture::{save_texture_image, PixelFormat};
use lodcrate_core::material::channels;
use lodcrate_core::{
    BlendMode, Color, CornerValue, GeometryData, Material, Point2f, Point3f, Result, Scene,
    ShadingNetwork, Texture, Transformable, Vector3f,
};
use obj::raw::material::{parse_mtl, Material as MtlMaterial, MtlColor};
use obj::raw::object::{parse_obj, Polygon, RawObj};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Name of the texture coordinate level OBJ `vt` data is read into
pub const OBJ_TEX_COORD_LEVEL: &str = "TexCoords0";

pub struct ObjReader;
pub struct ObjWriter;

/// One polygon corner: position, texture coordinate and normal indices
type ObjCorner = (usize, Option<usize>, Option<usize>);

fn polygon_corners(polygon: &Polygon) -> Vec<ObjCorner> {
    match polygon {
        Polygon::P(ps) => ps.iter().map(|&p| (p, None, None)).collect(),
        Polygon::PT(ps) => ps.iter().map(|&(p, t)| (p, Some(t), None)).collect(),
        Polygon::PN(ps) => ps.iter().map(|&(p, n)| (p, None, Some(n))).collect(),
        Polygon::PTN(ps) => ps.iter().map(|&(p, t, n)| (p, Some(t), Some(n))).collect(),
    }
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("Mesh")
        .to_string()
}

fn mtl_rgb(color: &Option<MtlColor>) -> Option<Color> {
    match color {
        Some(MtlColor::Rgb(r, g, b)) => Some(Color::new(*r, *g, *b, 1.0)),
        _ => None,
    }
}

/// Load every material library referenced by the file. Missing libraries
/// are skipped with a warning.
fn load_material_libraries(raw: &RawObj, dir: &Path) -> Result<HashMap<String, MtlMaterial>> {
    let mut materials = HashMap::new();
    for library in &raw.material_libraries {
        let path = dir.join(library);
        if !path.exists() {
            tracing::warn!("material library {} not found", path.display());
            continue;
        }
        let reader = BufReader::new(File::open(&path)?);
        let mtl = parse_mtl(reader).map_err(|e| IoError::parse(format!("{}: {}", path.display(), e)))?;
        materials.extend(mtl.materials);
    }
    Ok(materials)
}

/// Add a texture for a map file and return its name
fn texture_for_map(scene: &mut Scene, dir: &Path, file: &str) -> String {
    let file_path = dir.join(file);
    let name = file_stem(&file_path);
    if scene.textures.find_by_name(&name).is_none() {
        scene.textures.add(Texture::from_file(&name, file_path));
    }
    name
}

fn material_from_mtl(scene: &mut Scene, name: &str, mtl: Option<&MtlMaterial>, dir: &Path) -> Material {
    let mut material = Material::new(name);
    let Some(mtl) = mtl else {
        material.set_shading_network(channels::DIFFUSE, ShadingNetwork::constant(Color::WHITE));
        return material;
    };

    match &mtl.diffuse_map {
        Some(map) => {
            let texture = texture_for_map(scene, dir, &map.file);
            material.set_shading_network(channels::DIFFUSE, ShadingNetwork::texture(&texture, 0));
        }
        None => {
            let color = mtl_rgb(&mtl.diffuse).unwrap_or(Color::WHITE);
            material.set_shading_network(channels::DIFFUSE, ShadingNetwork::constant(color));
        }
    }
    if let Some(color) = mtl_rgb(&mtl.specular) {
        material.set_shading_network(channels::SPECULAR, ShadingNetwork::constant(color));
    }
    if let Some(map) = &mtl.bump_map {
        let texture = texture_for_map(scene, dir, &map.file);
        material.set_shading_network(channels::NORMALS, ShadingNetwork::texture(&texture, 0));
    }
    if let Some(dissolve) = mtl.dissolve.filter(|d| *d < 1.0) {
        material.set_shading_network(channels::OPACITY, ShadingNetwork::constant(Color::splat(dissolve)));
        material.blend_mode = BlendMode::Blend;
    }
    material
}

/// Material id of every polygon, from the `usemtl` ranges
fn polygon_materials(
    raw: &RawObj,
    scene: &mut Scene,
    libraries: &HashMap<String, MtlMaterial>,
    dir: &Path,
) -> Option<Vec<i32>> {
    if raw.meshes.is_empty() {
        return None;
    }
    let mut used: Vec<(&String, usize)> = raw
        .meshes
        .iter()
        .filter_map(|(name, group)| group.polygons.iter().map(|r| r.start).min().map(|s| (name, s)))
        .collect();
    used.sort_by_key(|(_, start)| *start);

    let mut ids = vec![-1i32; raw.polygons.len()];
    for (name, _) in used {
        let material = material_from_mtl(scene, name, libraries.get(name.as_str()), dir);
        let id = scene.materials.add(material) as i32;
        for range in &raw.meshes[name.as_str()].polygons {
            for polygon in range.start..range.end.min(ids.len()) {
                ids[polygon] = id;
            }
        }
    }

    if ids.iter().any(|&id| id < 0) {
        let default = match scene.materials.find_by_name("Default") {
            Some(id) => id as i32,
            None => scene.materials.add(Material::with_color("Default", channels::DIFFUSE, Color::WHITE)) as i32,
        };
        for id in ids.iter_mut().filter(|id| **id < 0) {
            *id = default;
        }
    }
    Some(ids)
}

/// Polygon ranges of each named group, in file order
fn group_ranges(raw: &RawObj, fallback_name: &str) -> Vec<(String, Vec<std::ops::Range<usize>>)> {
    let mut groups: Vec<(String, Vec<std::ops::Range<usize>>)> = raw
        .groups
        .iter()
        .map(|(name, group)| {
            let ranges = group
                .polygons
                .iter()
                .filter(|r| r.end > r.start)
                .map(|r| r.start..r.end)
                .collect::<Vec<_>>();
            (name.clone(), ranges)
        })
        .filter(|(_, ranges)| !ranges.is_empty())
        .collect();
    groups.sort_by_key(|(_, ranges)| ranges.iter().map(|r| r.start).min().unwrap_or(usize::MAX));

    if groups.is_empty() && !raw.polygons.is_empty() {
        groups.push((fallback_name.to_string(), vec![0..raw.polygons.len()]));
    } else if groups.len() == 1 && groups[0].0 == "default" {
        groups[0].0 = fallback_name.to_string();
    }
    groups
}

fn build_group_geometry(
    raw: &RawObj,
    ranges: &[std::ops::Range<usize>],
    material_ids: Option<&[i32]>,
) -> Result<GeometryData> {
    let polygons: Vec<usize> = ranges.iter().flat_map(|r| r.clone()).collect();
    let has_tex_coords = polygons
        .iter()
        .any(|&p| matches!(raw.polygons[p], Polygon::PT(_) | Polygon::PTN(_)));
    let has_normals = polygons
        .iter()
        .any(|&p| matches!(raw.polygons[p], Polygon::PN(_) | Polygon::PTN(_)));

    let mut geometry = GeometryData::new();
    if has_tex_coords {
        geometry.add_tex_coords(OBJ_TEX_COORD_LEVEL);
    }
    if has_normals {
        geometry.add_normals();
    }
    if material_ids.is_some() {
        geometry.add_material_ids();
    }

    let mut local: HashMap<usize, u32> = HashMap::new();
    let mut vertex = |p: usize, coords: &mut Vec<Point3f>| -> Result<u32> {
        if let Some(&v) = local.get(&p) {
            return Ok(v);
        }
        let &(x, y, z, _) = raw
            .positions
            .get(p)
            .ok_or_else(|| IoError::parse(format!("position index {} out of range", p + 1)))?;
        let v = coords.len() as u32;
        coords.push(Point3f::new(x, y, z));
        local.insert(p, v);
        Ok(v)
    };

    for &p in &polygons {
        let corners = polygon_corners(&raw.polygons[p]);
        if corners.len() < 3 {
            continue;
        }
        let mut values = Vec::with_capacity(corners.len());
        let mut ids = Vec::with_capacity(corners.len());
        for &(pos, tex, normal) in &corners {
            ids.push(vertex(pos, &mut geometry.coords)?);
            let mut value = CornerValue::default();
            if has_tex_coords {
                let uv = tex
                    .and_then(|t| raw.tex_coords.get(t))
                    .map(|&(u, v, _)| Point2f::new(u, v))
                    .unwrap_or_else(Point2f::origin);
                value.tex_coords.push(uv);
            }
            if has_normals {
                value.normal = Some(
                    normal
                        .and_then(|n| raw.normals.get(n))
                        .map(|&(x, y, z)| Vector3f::new(x, y, z))
                        .unwrap_or_else(Vector3f::zeros),
                );
            }
            values.push(value);
        }
        let material = material_ids.map(|m| m[p]).unwrap_or(0);
        // Fan triangulation
        for k in 1..corners.len() - 1 {
            geometry.push_triangle(
                [ids[0], ids[k], ids[k + 1]],
                [&values[0], &values[k], &values[k + 1]],
                material,
            );
        }
    }
    Ok(geometry)
}

impl SceneReader for ObjReader {
    fn read_scene(&self, path: &Path) -> Result<Scene> {
        let file = File::open(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                IoError::FileNotFound {
                    path: path.display().to_string(),
                }
            } else {
                IoError::Io(e)
            }
        })?;
        let raw = parse_obj(BufReader::new(file))
            .map_err(|e| IoError::parse(format!("{}: {}", path.display(), e)))?;
        let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();

        let mut scene = Scene::new();
        let libraries = load_material_libraries(&raw, &dir)?;
        let material_ids = polygon_materials(&raw, &mut scene, &libraries, &dir);

        let stem = file_stem(path);
        for (name, ranges) in group_ranges(&raw, &stem) {
            let geometry = build_group_geometry(&raw, &ranges, material_ids.as_deref())?;
            if geometry.triangle_count() == 0 {
                continue;
            }
            scene.add_mesh(&name, geometry);
        }

        tracing::info!(
            "read {}: {} meshes, {} vertices, {} triangles",
            path.display(),
            scene.mesh_nodes().len(),
            scene.vertex_count(),
            scene.triangle_count()
        );
        Ok(scene)
    }

    fn can_read(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("obj"))
            .unwrap_or(false)
    }

    fn format_name(&self) -> &'static str {
        "obj"
    }
}

/// OBJ and MTL names cannot contain whitespace
fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .collect();
    if cleaned.is_empty() {
        "unnamed".to_string()
    } else {
        cleaned
    }
}

/// File referenced by the MTL for a texture. In-memory images are written
/// next to the library as PNG.
fn texture_file(scene: &Scene, texture_name: &str, dir: &Path) -> Result<Option<String>> {
    let Some(texture) = scene.textures.find_by_name(texture_name) else {
        tracing::warn!("material references unknown texture '{}'", texture_name);
        return Ok(None);
    };
    if let Some(image) = &texture.image {
        let file = format!("{}.png", sanitize_name(&texture.name));
        save_texture_image(image, &dir.join(&file), PixelFormat::R8G8B8A8)?;
        return Ok(Some(file));
    }
    Ok(texture
        .file_path
        .as_ref()
        .map(|p: &PathBuf| p.display().to_string()))
}

fn write_mtl(scene: &Scene, path: &Path) -> Result<()> {
    let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
    let mut out = BufWriter::new(File::create(path)?);
    writeln!(out, "# lodcrate material library")?;
    for material in scene.materials.iter() {
        writeln!(out)?;
        writeln!(out, "newmtl {}", sanitize_name(&material.name))?;

        let diffuse = material.shading_network(channels::DIFFUSE);
        let kd = diffuse.and_then(|n| n.constant_color()).unwrap_or(Color::WHITE);
        writeln!(out, "Kd {} {} {}", kd.r, kd.g, kd.b)?;
        if let Some(ks) = material
            .shading_network(channels::SPECULAR)
            .and_then(|n| n.constant_color())
        {
            writeln!(out, "Ks {} {} {}", ks.r, ks.g, ks.b)?;
        }
        if let Some(opacity) = material
            .shading_network(channels::OPACITY)
            .and_then(|n| n.constant_color())
        {
            writeln!(out, "d {}", opacity.r)?;
        }
        if let Some((texture, _)) = diffuse.and_then(|n| n.primary_texture()) {
            if let Some(file) = texture_file(scene, texture, &dir)? {
                writeln!(out, "map_Kd {}", file)?;
            }
        }
        if let Some((texture, _)) = material
            .shading_network(channels::NORMALS)
            .and_then(|n| n.primary_texture())
        {
            if let Some(file) = texture_file(scene, texture, &dir)? {
                writeln!(out, "bump {}", file)?;
            }
        }
    }
    out.flush()?;
    Ok(())
}

impl SceneWriter for ObjWriter {
    fn write_scene(&self, scene: &Scene, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let mtl_name = format!("{}.mtl", file_stem(path));
        let has_materials = !scene.materials.is_empty();
        if has_materials {
            write_mtl(scene, &path.with_file_name(&mtl_name))?;
        }

        let mut out = BufWriter::new(File::create(path)?);
        writeln!(out, "# lodcrate")?;
        if has_materials {
            writeln!(out, "mtllib {}", mtl_name)?;
        }

        let (mut v_offset, mut vt_offset, mut vn_offset) = (1usize, 1usize, 1usize);
        for instance in scene.mesh_nodes() {
            let (Some(node), Some(source)) = (scene.node(instance.id), scene.geometry(instance.id)) else {
                continue;
            };
            let mut geometry = source.clone();
            geometry.transform(&instance.world);

            writeln!(out, "g {}", sanitize_name(&node.name))?;
            for p in &geometry.coords {
                writeln!(out, "v {} {} {}", p.x, p.y, p.z)?;
            }
            let uvs = geometry.tex_coords(0).map(|l| &l.values);
            if let Some(uvs) = uvs {
                for uv in uvs {
                    writeln!(out, "vt {} {}", uv.x, uv.y)?;
                }
            }
            if let Some(normals) = &geometry.normals {
                for n in normals {
                    writeln!(out, "vn {} {} {}", n.x, n.y, n.z)?;
                }
            }

            let mut current_material = None;
            for (t, ids) in geometry.vertex_ids.iter().enumerate() {
                if geometry.material_ids.is_some() {
                    let id = geometry.material_id(t);
                    if current_material != Some(id) {
                        if let Some(material) = usize::try_from(id).ok().and_then(|i| scene.materials.get(i)) {
                            writeln!(out, "usemtl {}", sanitize_name(&material.name))?;
                        }
                        current_material = Some(id);
                    }
                }
                write!(out, "f")?;
                for k in 0..3 {
                    let corner = t * 3 + k;
                    let v = ids[k] as usize + v_offset;
                    match (uvs.is_some(), geometry.normals.is_some()) {
                        (true, true) => write!(out, " {}/{}/{}", v, corner + vt_offset, corner + vn_offset)?,
                        (true, false) => write!(out, " {}/{}", v, corner + vt_offset)?,
                        (false, true) => write!(out, " {}//{}", v, corner + vn_offset)?,
                        (false, false) => write!(out, " {}", v)?,
                    }
                }
                writeln!(out)?;
            }

            v_offset += geometry.vertex_count();
            if uvs.is_some() {
                vt_offset += geometry.corner_count();
            }
            if geometry.normals.is_some() {
                vn_offset += geometry.corner_count();
            }
        }
        out.flush()?;
        tracing::info!("wrote {}", path.display());
        Ok(())
    }

    fn format_name(&self) -> &'static str {
        "obj"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::fs;

    const CUBE_FACE: &str = "\
mtllib box.mtl
v 0 0 0
v 1 0 0
v 1 1 0
v 0 1 0
v 0 0 1
vt 0 0
vt 1 0
vt 1 1
vt 0 1
vn 0 0 1
g Front
usemtl Red
f 1/1/1 2/2/1 3/3/1 4/4/1
g Side
usemtl Blue
f 1 2 5
";

    const BOX_MTL: &str = "\
newmtl Red
Kd 1 0 0
newmtl Blue
Kd 0 0 1
d 0.5
";

    #[test]
    fn test_read_groups_and_materials() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("box.obj"), CUBE_FACE).unwrap();
        fs::write(dir.path().join("box.mtl"), BOX_MTL).unwrap();

        let scene = ObjReader.read_scene(&dir.path().join("box.obj")).unwrap();
        let front = scene.find_node_by_path("Root/Front").unwrap();
        let geometry = front.geometry().unwrap();
        assert_eq!(geometry.vertex_count(), 4);
        assert_eq!(geometry.triangle_count(), 2);
        assert!(geometry.validate().is_ok());
        assert_relative_eq!(geometry.tex_coords[0].values[2].x, 1.0);

        let side = scene.find_node_by_path("Root/Side").unwrap().geometry().unwrap();
        assert_eq!(side.vertex_count(), 3);
        assert!(side.tex_coords.is_empty());

        assert_eq!(scene.materials.len(), 2);
        let red = scene.materials.find_by_name("Red").unwrap();
        assert_eq!(geometry.material_id(0), red as i32);
        let blue = scene.materials.get(scene.materials.find_by_name("Blue").unwrap()).unwrap();
        assert_eq!(blue.blend_mode, BlendMode::Blend);
    }

    #[test]
    fn test_ungrouped_file_uses_stem() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Tri.obj");
        fs::write(&path, "v 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 3\n").unwrap();
        let scene = ObjReader.read_scene(&path).unwrap();
        assert!(scene.find_node_by_path("Root/Tri").is_some());
        assert!(scene.materials.is_empty());
    }

    #[test]
    fn test_write_read_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("box.obj"), CUBE_FACE).unwrap();
        fs::write(dir.path().join("box.mtl"), BOX_MTL).unwrap();
        let scene = ObjReader.read_scene(&dir.path().join("box.obj")).unwrap();

        let out = dir.path().join("out/copy.obj");
        ObjWriter.write_scene(&scene, &out).unwrap();
        assert!(dir.path().join("out/copy.mtl").exists());
        let back = ObjReader.read_scene(&out).unwrap();
        assert_eq!(back.vertex_count(), scene.vertex_count());
        assert_eq!(back.triangle_count(), scene.triangle_count());
        assert_eq!(back.materials.len(), 2);
    }
}
