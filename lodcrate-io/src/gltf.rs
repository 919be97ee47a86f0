//! glTF 2.0 support
//!
//! `.gltf` and `.glb` files are read with `gltf::import`, which resolves
//! external and embedded buffers and decodes images. Scenes are written as
//! self-contained GLB: one binary chunk holds vertex data and PNG encoded
//! textures.

use crate::error::IoError;
use crate::registry::{SceneReader, SceneWriter};
use crate::texture::{encode_png, load_texture_image, PixelFormat};
use gltf_json as json;
use gltf_json::validation::Checked::Valid;
use lodcrate_core::material::channels;
use lodcrate_core::{
    BlendMode, CameraNode, CameraType, CameraViewpoint, Color, GeometryData, Material, Matrix4,
    NodeId, NodeKind, Point2f, Point3f, Result, Scene, SceneNode, ShadingNetwork, Texture,
    TextureImage, Transform3D, Vector3f,
};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

pub struct GltfReader;
pub struct GlbWriter;

const GLB_MAGIC: &[u8; 4] = b"glTF";
const CHUNK_JSON: u32 = 0x4E4F534A;
const CHUNK_BIN: u32 = 0x004E4942;

fn tex_coord_level_name(set: usize) -> String {
    format!("TexCoords{}", set)
}

// ---------------------------------------------------------------------------
// Reading
// ---------------------------------------------------------------------------

fn read_error(path: &Path, err: gltf::Error) -> IoError {
    match err {
        gltf::Error::Io(e) if e.kind() == std::io::ErrorKind::NotFound => IoError::FileNotFound {
            path: path.display().to_string(),
        },
        gltf::Error::Io(e) => IoError::Io(e),
        other => IoError::parse(format!("{}: {}", path.display(), other)),
    }
}

/// Convert decoded glTF image data to linear float texels
fn image_from_data(data: &gltf::image::Data) -> Option<TextureImage> {
    use gltf::image::Format;

    #[derive(Clone, Copy)]
    enum Component {
        U8,
        U16,
        F32,
    }

    let (channels, component) = match data.format {
        Format::R8 => (1, Component::U8),
        Format::R8G8 => (2, Component::U8),
        Format::R8G8B8 => (3, Component::U8),
        Format::R8G8B8A8 => (4, Component::U8),
        Format::R16 => (1, Component::U16),
        Format::R16G16 => (2, Component::U16),
        Format::R16G16B16 => (3, Component::U16),
        Format::R16G16B16A16 => (4, Component::U16),
        Format::R32G32B32FLOAT => (3, Component::F32),
        Format::R32G32B32A32FLOAT => (4, Component::F32),
        #[allow(unreachable_patterns)]
        _ => return None,
    };
    let width = match component {
        Component::U8 => 1,
        Component::U16 => 2,
        Component::F32 => 4,
    };
    let stride = channels * width;
    let texel_count = data.width as usize * data.height as usize;
    if data.pixels.len() < texel_count * stride {
        return None;
    }

    let read = |bytes: &[u8]| -> f32 {
        match component {
            Component::U8 => bytes[0] as f32 / 255.0,
            Component::U16 => u16::from_ne_bytes([bytes[0], bytes[1]]) as f32 / 65535.0,
            Component::F32 => f32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
        }
    };
    let pixels = data
        .pixels
        .chunks_exact(stride)
        .take(texel_count)
        .map(|texel| {
            let c: Vec<f32> = texel.chunks_exact(width).map(read).collect();
            match channels {
                1 => Color::new(c[0], c[0], c[0], 1.0),
                2 => Color::new(c[0], c[0], c[0], c[1]),
                3 => Color::new(c[0], c[1], c[2], 1.0),
                _ => Color::new(c[0], c[1], c[2], c[3]),
            }
        })
        .collect();
    Some(TextureImage {
        width: data.width,
        height: data.height,
        pixels,
    })
}

struct ImportState<'a> {
    buffers: &'a [gltf::buffer::Data],
    node_ids: Vec<NodeId>,
    /// Per skin: scene bone index of each joint
    skin_bones: Vec<Vec<i32>>,
    joints: std::collections::HashSet<usize>,
    /// glTF material index to scene material id
    material_ids: Vec<i32>,
    default_material: Option<i32>,
}

impl ImportState<'_> {
    fn material_id(&mut self, scene: &mut Scene, index: Option<usize>) -> i32 {
        if let Some(id) = index.and_then(|i| self.material_ids.get(i)) {
            return *id;
        }
        *self.default_material.get_or_insert_with(|| {
            scene
                .materials
                .add(Material::with_color("Default", channels::DIFFUSE, Color::WHITE)) as i32
        })
    }
}

fn import_textures(document: &gltf::Document, images: &[gltf::image::Data], scene: &mut Scene) -> Vec<String> {
    document
        .textures()
        .map(|texture| {
            let source = texture.source();
            let name = texture
                .name()
                .or_else(|| source.name())
                .map(str::to_string)
                .unwrap_or_else(|| format!("Texture{}", texture.index()));
            if scene.textures.find_by_name(&name).is_none() {
                match images.get(source.index()).and_then(image_from_data) {
                    Some(image) => {
                        scene.textures.add(Texture::from_image(&name, image));
                    }
                    None => {
                        tracing::warn!("texture '{}' uses an unsupported pixel format", name);
                        scene.textures.add(Texture::new(&name));
                    }
                }
            }
            name
        })
        .collect()
}

fn import_materials(document: &gltf::Document, texture_names: &[String], scene: &mut Scene) -> Vec<i32> {
    document
        .materials()
        .map(|m| {
            let name = m
                .name()
                .map(str::to_string)
                .unwrap_or_else(|| format!("Material{}", m.index().unwrap_or(0)));
            let mut material = Material::new(&name);
            let pbr = m.pbr_metallic_roughness();
            let factor = pbr.base_color_factor();

            let texture = pbr
                .base_color_texture()
                .and_then(|info| texture_names.get(info.texture().index()).map(|n| (n, info.tex_coord())));
            let diffuse = match texture {
                Some((texture, set)) => ShadingNetwork::texture(texture, set as usize),
                None => ShadingNetwork::constant(Color::new(factor[0], factor[1], factor[2], 1.0)),
            };
            material.set_shading_network(channels::DIFFUSE, diffuse);

            if let Some(normal) = m.normal_texture() {
                if let Some(texture) = texture_names.get(normal.texture().index()) {
                    material.set_shading_network(
                        channels::NORMALS,
                        ShadingNetwork::texture(texture, normal.tex_coord() as usize),
                    );
                }
            }
            let emissive = m.emissive_factor();
            if emissive.iter().any(|c| *c > 0.0) {
                material.set_shading_network(
                    channels::EMISSIVE,
                    ShadingNetwork::constant(Color::new(emissive[0], emissive[1], emissive[2], 1.0)),
                );
            }
            material.blend_mode = match m.alpha_mode() {
                gltf::material::AlphaMode::Opaque => BlendMode::Opaque,
                gltf::material::AlphaMode::Mask => BlendMode::Mask,
                gltf::material::AlphaMode::Blend => BlendMode::Blend,
            };
            if factor[3] < 1.0 {
                material.set_shading_network(channels::OPACITY, ShadingNetwork::constant(Color::splat(factor[3])));
            }
            scene.materials.add(material) as i32
        })
        .collect()
}

/// Geometry of one triangle primitive, per-vertex attributes spread to corners
fn import_primitive(
    primitive: &gltf::Primitive,
    state: &ImportState,
    skin: Option<usize>,
    material_id: i32,
) -> Result<Option<GeometryData>> {
    if primitive.mode() != gltf::mesh::Mode::Triangles {
        tracing::warn!("skipping non-triangle primitive ({:?})", primitive.mode());
        return Ok(None);
    }
    let reader = primitive.reader(|buffer| state.buffers.get(buffer.index()).map(|d| &d[..]));
    let positions: Vec<[f32; 3]> = reader
        .read_positions()
        .ok_or_else(|| IoError::parse("primitive has no positions"))?
        .collect();
    let indices: Vec<u32> = match reader.read_indices() {
        Some(iter) => iter.into_u32().collect(),
        None => (0..positions.len() as u32).collect(),
    };
    if let Some(bad) = indices.iter().find(|&&i| i as usize >= positions.len()) {
        return Err(IoError::parse(format!("index {} out of range for {} vertices", bad, positions.len())).into());
    }

    let triangles: Vec<[u32; 3]> = indices
        .chunks_exact(3)
        .map(|c| [c[0], c[1], c[2]])
        .collect();
    let corners = || triangles.iter().flat_map(|t| t.iter().map(|&v| v as usize));

    let mut geometry = GeometryData::from_triangles(
        positions.iter().map(|p| Point3f::new(p[0], p[1], p[2])).collect(),
        triangles.clone(),
    );

    let normals: Option<Vec<[f32; 3]>> = reader.read_normals().map(|iter| iter.collect());
    if let Some(normals) = &normals {
        geometry.normals = Some(corners().map(|v| Vector3f::from(normals[v])).collect());
        if let Some(tangents) = reader.read_tangents().map(|iter| iter.collect::<Vec<[f32; 4]>>()) {
            geometry.tangents = Some(
                corners()
                    .map(|v| Vector3f::new(tangents[v][0], tangents[v][1], tangents[v][2]))
                    .collect(),
            );
            geometry.bitangents = Some(
                corners()
                    .map(|v| {
                        let n = Vector3f::from(normals[v]);
                        let t = Vector3f::new(tangents[v][0], tangents[v][1], tangents[v][2]);
                        n.cross(&t) * tangents[v][3]
                    })
                    .collect(),
            );
        }
    }

    let mut set = 0u32;
    while let Some(uvs) = reader.read_tex_coords(set) {
        let uvs: Vec<[f32; 2]> = uvs.into_f32().collect();
        let level = geometry.add_tex_coords(&tex_coord_level_name(set as usize));
        // glTF puts the texture origin at the top left
        geometry.tex_coords[level].values = corners()
            .map(|v| Point2f::new(uvs[v][0], 1.0 - uvs[v][1]))
            .collect();
        set += 1;
    }

    if let Some(colors) = reader.read_colors(0) {
        let colors: Vec<[f32; 4]> = colors.into_rgba_f32().collect();
        let index = geometry.add_colors("Colors0");
        geometry.colors[index].values = corners().map(|v| Color::from_array(colors[v])).collect();
    }

    if let (Some(skin), Some(joints), Some(weights)) = (skin, reader.read_joints(0), reader.read_weights(0)) {
        let joints: Vec<[u16; 4]> = joints.into_u16().collect();
        let weights: Vec<[f32; 4]> = weights.into_f32().collect();
        let bones = &state.skin_bones[skin];
        let bone_weights = geometry.add_bone_weights(4);
        for (v, (j, w)) in joints.iter().zip(&weights).enumerate().take(positions.len()) {
            let influences: Vec<(i32, f32)> = (0..4)
                .filter(|&k| w[k] > 0.0)
                .filter_map(|k| bones.get(j[k] as usize).map(|&bone| (bone, w[k])))
                .collect();
            bone_weights.set_influences(v, &influences);
        }
    }

    geometry.material_ids = Some(vec![material_id; geometry.triangle_count()]);
    Ok(Some(geometry))
}

/// Merges vertices the exporter split per corner attribute or material.
/// Corner attributes stay per corner, so only position and skinning must match.
fn weld_split_vertices(geometry: &mut GeometryData) -> usize {
    let mut first: HashMap<([u32; 3], Vec<(i32, u32)>), u32> = HashMap::new();
    let remap: Vec<u32> = (0..geometry.vertex_count())
        .map(|v| {
            let p = geometry.coords[v];
            let skin = geometry
                .bone_weights
                .as_ref()
                .map(|b| b.influences(v).into_iter().map(|(bone, w)| (bone, w.to_bits())).collect())
                .unwrap_or_default();
            *first
                .entry(([p.x.to_bits(), p.y.to_bits(), p.z.to_bits()], skin))
                .or_insert(v as u32)
        })
        .collect();
    if remap.iter().enumerate().all(|(v, &r)| r as usize == v) {
        return 0;
    }
    for ids in &mut geometry.vertex_ids {
        *ids = ids.map(|v| remap[v as usize]);
    }
    geometry.remove_unused_vertices()
}

fn import_node(node: gltf::Node, scene: &mut Scene, state: &mut ImportState) -> Result<SceneNode> {
    let m = node.transform().matrix();
    let transform = Transform3D {
        matrix: Matrix4::from_fn(|r, c| m[c][r]),
    };
    let name = node
        .name()
        .map(str::to_string)
        .unwrap_or_else(|| format!("Node{}", node.index()));

    let kind = if let Some(mesh) = node.mesh() {
        let mut geometry: Option<GeometryData> = None;
        let skin = node.skin().map(|s| s.index());
        for primitive in mesh.primitives() {
            let material_id = state.material_id(scene, primitive.material().index());
            if let Some(part) = import_primitive(&primitive, state, skin, material_id)? {
                match geometry.as_mut() {
                    Some(g) => g.append(&part),
                    None => geometry = Some(part),
                }
            }
        }
        if let Some(g) = geometry.as_mut() {
            let welded = weld_split_vertices(g);
            if welded > 0 {
                tracing::debug!("welded {} split vertices in '{}'", welded, name);
            }
        }
        NodeKind::Mesh(lodcrate_core::MeshNode {
            geometry: geometry.unwrap_or_default(),
        })
    } else if let Some(camera) = node.camera() {
        let mut data = CameraNode::default();
        match camera.projection() {
            gltf::camera::Projection::Perspective(p) => {
                data.camera_type = CameraType::Perspective;
                data.field_of_view = p.yfov();
            }
            gltf::camera::Projection::Orthographic(o) => {
                data.camera_type = CameraType::Orthographic;
                data.orthographic_size = o.ymag();
            }
        }
        // glTF cameras look down -Z
        data.viewpoints.push(CameraViewpoint {
            position: Point3f::origin(),
            direction: Vector3f::new(0.0, 0.0, -1.0),
        });
        NodeKind::Camera(data)
    } else if state.joints.contains(&node.index()) {
        NodeKind::Bone
    } else {
        NodeKind::Transform
    };

    let mut scene_node = SceneNode::new(&name, kind).with_transform(transform);
    scene_node.id = state.node_ids[node.index()];
    for child in node.children() {
        scene_node.children.push(import_node(child, scene, state)?);
    }
    Ok(scene_node)
}

impl SceneReader for GltfReader {
    fn read_scene(&self, path: &Path) -> Result<Scene> {
        let (document, buffers, images) = gltf::import(path).map_err(|e| read_error(path, e))?;
        let mut scene = Scene::new();

        let texture_names = import_textures(&document, &images, &mut scene);
        let material_ids = import_materials(&document, &texture_names, &mut scene);

        let node_ids: Vec<NodeId> = document.nodes().map(|_| NodeId::new()).collect();
        let mut joints = std::collections::HashSet::new();
        let skin_bones = document
            .skins()
            .map(|skin| {
                skin.joints()
                    .map(|joint| {
                        joints.insert(joint.index());
                        scene.bones.add(node_ids[joint.index()]) as i32
                    })
                    .collect()
            })
            .collect();

        let mut state = ImportState {
            buffers: &buffers,
            node_ids,
            skin_bones,
            joints,
            material_ids,
            default_material: None,
        };

        let gltf_scene = document.default_scene().or_else(|| document.scenes().next());
        if let Some(gltf_scene) = gltf_scene {
            for node in gltf_scene.nodes() {
                let imported = import_node(node, &mut scene, &mut state)?;
                scene.root.children.push(imported);
            }
        }

        tracing::info!(
            "read {}: {} nodes, {} vertices, {} triangles",
            path.display(),
            scene.node_count(),
            scene.vertex_count(),
            scene.triangle_count()
        );
        Ok(scene)
    }

    fn can_read(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("gltf") || e.eq_ignore_ascii_case("glb"))
            .unwrap_or(false)
    }

    fn format_name(&self) -> &'static str {
        "gltf"
    }
}

// ---------------------------------------------------------------------------
// Writing
// ---------------------------------------------------------------------------

/// Compute bounding box for positions
fn compute_bounds(positions: &[[f32; 3]]) -> (Vec<f32>, Vec<f32>) {
    let mut min = [f32::MAX; 3];
    let mut max = [f32::MIN; 3];
    for pos in positions {
        for i in 0..3 {
            min[i] = min[i].min(pos[i]);
            max[i] = max[i].max(pos[i]);
        }
    }
    (min.to_vec(), max.to_vec())
}

/// Align buffer to 4-byte boundary
fn align_buffer(buffer: &mut Vec<u8>) {
    while buffer.len() % 4 != 0 {
        buffer.push(0);
    }
}

/// Binary chunk under construction with its views and accessors
#[derive(Default)]
struct GlbBuffer {
    data: Vec<u8>,
    views: Vec<json::buffer::View>,
    accessors: Vec<json::Accessor>,
}

impl GlbBuffer {
    fn push_view(&mut self, bytes: &[u8], target: Option<json::buffer::Target>) -> json::Index<json::buffer::View> {
        let offset = self.data.len();
        self.data.extend_from_slice(bytes);
        self.views.push(json::buffer::View {
            buffer: json::Index::new(0),
            byte_length: bytes.len().into(),
            byte_offset: Some((offset as u64).into()),
            byte_stride: None,
            extensions: Default::default(),
            extras: Default::default(),
            name: None,
            target: target.map(Valid),
        });
        align_buffer(&mut self.data);
        json::Index::new(self.views.len() as u32 - 1)
    }

    fn push_accessor<T: bytemuck::Pod>(
        &mut self,
        data: &[T],
        component: json::accessor::ComponentType,
        type_: json::accessor::Type,
        target: json::buffer::Target,
        bounds: Option<(Vec<f32>, Vec<f32>)>,
    ) -> json::Index<json::Accessor> {
        let view = self.push_view(bytemuck::cast_slice(data), Some(target));
        let (min, max) = match bounds {
            Some((min, max)) => (
                Some(json::Value::Array(min.into_iter().map(json::Value::from).collect())),
                Some(json::Value::Array(max.into_iter().map(json::Value::from).collect())),
            ),
            None => (None, None),
        };
        self.accessors.push(json::Accessor {
            buffer_view: Some(view),
            byte_offset: Some(0u64.into()),
            count: data.len().into(),
            component_type: Valid(json::accessor::GenericComponentType(component)),
            extensions: Default::default(),
            extras: Default::default(),
            type_: Valid(type_),
            min,
            max,
            name: None,
            normalized: false,
            sparse: None,
        });
        json::Index::new(self.accessors.len() as u32 - 1)
    }

    fn pack_positions(&mut self, positions: &[[f32; 3]]) -> json::Index<json::Accessor> {
        let bounds = compute_bounds(positions);
        self.push_accessor(
            positions,
            json::accessor::ComponentType::F32,
            json::accessor::Type::Vec3,
            json::buffer::Target::ArrayBuffer,
            Some(bounds),
        )
    }

    fn pack_vec2(&mut self, data: &[[f32; 2]]) -> json::Index<json::Accessor> {
        self.push_accessor(
            data,
            json::accessor::ComponentType::F32,
            json::accessor::Type::Vec2,
            json::buffer::Target::ArrayBuffer,
            None,
        )
    }

    fn pack_vec3(&mut self, data: &[[f32; 3]]) -> json::Index<json::Accessor> {
        self.push_accessor(
            data,
            json::accessor::ComponentType::F32,
            json::accessor::Type::Vec3,
            json::buffer::Target::ArrayBuffer,
            None,
        )
    }

    fn pack_vec4(&mut self, data: &[[f32; 4]]) -> json::Index<json::Accessor> {
        self.push_accessor(
            data,
            json::accessor::ComponentType::F32,
            json::accessor::Type::Vec4,
            json::buffer::Target::ArrayBuffer,
            None,
        )
    }

    fn pack_joints(&mut self, joints: &[[u16; 4]]) -> json::Index<json::Accessor> {
        self.push_accessor(
            joints,
            json::accessor::ComponentType::U16,
            json::accessor::Type::Vec4,
            json::buffer::Target::ArrayBuffer,
            None,
        )
    }

    fn pack_indices(&mut self, indices: &[u32]) -> json::Index<json::Accessor> {
        self.push_accessor(
            indices,
            json::accessor::ComponentType::U32,
            json::accessor::Type::Scalar,
            json::buffer::Target::ElementArrayBuffer,
            None,
        )
    }

    fn pack_mat4(&mut self, matrices: &[[f32; 16]]) -> json::Index<json::Accessor> {
        let view = self.push_view(bytemuck::cast_slice(matrices), None);
        self.accessors.push(json::Accessor {
            buffer_view: Some(view),
            byte_offset: Some(0u64.into()),
            count: matrices.len().into(),
            component_type: Valid(json::accessor::GenericComponentType(
                json::accessor::ComponentType::F32,
            )),
            extensions: Default::default(),
            extras: Default::default(),
            type_: Valid(json::accessor::Type::Mat4),
            min: None,
            max: None,
            name: None,
            normalized: false,
            sparse: None,
        });
        json::Index::new(self.accessors.len() as u32 - 1)
    }
}

/// Vertex attributes of one exported glTF vertex
#[derive(Default)]
struct VertexStreams {
    positions: Vec<[f32; 3]>,
    normals: Vec<[f32; 3]>,
    tangents: Vec<[f32; 4]>,
    tex_coords: Vec<Vec<[f32; 2]>>,
    colors: Vec<[f32; 4]>,
    joints: Vec<[u16; 4]>,
    weights: Vec<[f32; 4]>,
    indices: Vec<u32>,
}

/// Split geometry into one vertex stream per material. Corners sharing a
/// vertex and bit-identical attributes become one glTF vertex.
fn build_streams(geometry: &GeometryData) -> BTreeMap<i32, VertexStreams> {
    let mut streams: BTreeMap<i32, VertexStreams> = BTreeMap::new();
    let mut lookup: HashMap<(i32, Vec<u32>), u32> = HashMap::new();
    let has_tangents = geometry.normals.is_some() && geometry.tangents.is_some();

    for t in 0..geometry.triangle_count() {
        let material = geometry.material_id(t);
        for k in 0..3 {
            let corner = t * 3 + k;
            let vertex = geometry.corner_vertex(corner);
            let value = geometry.corner_value(corner);

            let mut key = vec![vertex as u32];
            let mut bits = |v: &[f32]| key.extend(v.iter().map(|f| f.to_bits()));
            if let Some(n) = value.normal {
                bits(n.as_slice());
            }
            if has_tangents {
                if let Some(t) = value.tangent {
                    bits(t.as_slice());
                }
                if let Some(b) = value.bitangent {
                    bits(b.as_slice());
                }
            }
            for uv in &value.tex_coords {
                bits(&[uv.x, uv.y]);
            }
            for c in &value.colors {
                bits(&c.to_array());
            }

            let stream = streams.entry(material).or_insert_with(|| VertexStreams {
                tex_coords: vec![Vec::new(); geometry.tex_coords.len()],
                ..VertexStreams::default()
            });
            let index = *lookup.entry((material, key)).or_insert_with(|| {
                let p = geometry.coords[vertex];
                stream.positions.push([p.x, p.y, p.z]);
                if let Some(n) = value.normal {
                    stream.normals.push([n.x, n.y, n.z]);
                    if has_tangents {
                        let t = value.tangent.unwrap_or_else(Vector3f::zeros);
                        let b = value.bitangent.unwrap_or_else(Vector3f::zeros);
                        let w = if n.cross(&t).dot(&b) < 0.0 { -1.0 } else { 1.0 };
                        stream.tangents.push([t.x, t.y, t.z, w]);
                    }
                }
                for (level, uv) in value.tex_coords.iter().enumerate() {
                    stream.tex_coords[level].push([uv.x, 1.0 - uv.y]);
                }
                if let Some(c) = value.colors.first() {
                    stream.colors.push(c.to_array());
                }
                if let Some(bones) = &geometry.bone_weights {
                    let mut joints = [0u16; 4];
                    let mut weights = [0f32; 4];
                    for (slot, (bone, weight)) in bones.influences(vertex).into_iter().take(4).enumerate() {
                        joints[slot] = bone as u16;
                        weights[slot] = weight;
                    }
                    stream.joints.push(joints);
                    stream.weights.push(weights);
                }
                stream.positions.len() as u32 - 1
            });
            stream.indices.push(index);
        }
    }
    streams
}

struct GlbBuilder<'a> {
    scene: &'a Scene,
    buffer: GlbBuffer,
    nodes: Vec<json::Node>,
    meshes: Vec<json::Mesh>,
    materials: Vec<json::Material>,
    images: Vec<json::Image>,
    textures: Vec<json::Texture>,
    texture_indices: HashMap<String, u32>,
    node_indices: HashMap<NodeId, u32>,
    skinned_nodes: Vec<u32>,
}

impl<'a> GlbBuilder<'a> {
    fn new(scene: &'a Scene) -> Self {
        Self {
            scene,
            buffer: GlbBuffer::default(),
            nodes: Vec::new(),
            meshes: Vec::new(),
            materials: Vec::new(),
            images: Vec::new(),
            textures: Vec::new(),
            texture_indices: HashMap::new(),
            node_indices: HashMap::new(),
            skinned_nodes: Vec::new(),
        }
    }

    /// Texture index for a texture name, embedding its image on first use
    fn texture_index(&mut self, name: &str) -> Result<Option<u32>> {
        if let Some(&index) = self.texture_indices.get(name) {
            return Ok(Some(index));
        }
        let scene = self.scene;
        let Some(texture) = scene.textures.find_by_name(name) else {
            tracing::warn!("material references unknown texture '{}'", name);
            return Ok(None);
        };
        let loaded;
        let image = match (&texture.image, &texture.file_path) {
            (Some(image), _) => image,
            (None, Some(path)) if path.exists() => {
                loaded = load_texture_image(path)?;
                &loaded
            }
            _ => {
                tracing::warn!("texture '{}' has no image data, skipped", name);
                return Ok(None);
            }
        };
        let png = encode_png(image, PixelFormat::R8G8B8A8)?;
        let view = self.buffer.push_view(&png, None);
        self.images.push(json::Image {
            buffer_view: Some(view),
            mime_type: Some(json::image::MimeType("image/png".to_string())),
            name: Some(name.to_string()),
            uri: None,
            extensions: Default::default(),
            extras: Default::default(),
        });
        self.textures.push(json::Texture {
            name: Some(name.to_string()),
            sampler: None,
            source: json::Index::new(self.images.len() as u32 - 1),
            extensions: Default::default(),
            extras: Default::default(),
        });
        let index = self.textures.len() as u32 - 1;
        self.texture_indices.insert(name.to_string(), index);
        Ok(Some(index))
    }

    fn add_materials(&mut self) -> Result<()> {
        let scene = self.scene;
        for material in scene.materials.iter() {
            let mut out = json::Material {
                name: Some(material.name.clone()),
                ..Default::default()
            };
            let mut factor = [1.0f32; 4];
            if let Some(diffuse) = material.shading_network(channels::DIFFUSE) {
                if let Some(color) = diffuse.constant_color() {
                    factor = [color.r, color.g, color.b, 1.0];
                }
                if let Some((texture, level)) = diffuse.primary_texture() {
                    if let Some(index) = self.texture_index(texture)? {
                        out.pbr_metallic_roughness.base_color_texture = Some(json::texture::Info {
                            index: json::Index::new(index),
                            tex_coord: level as u32,
                            extensions: Default::default(),
                            extras: Default::default(),
                        });
                    }
                }
            }
            if let Some(opacity) = material
                .shading_network(channels::OPACITY)
                .and_then(|n| n.constant_color())
            {
                factor[3] = opacity.r;
            }
            out.pbr_metallic_roughness.base_color_factor = json::material::PbrBaseColorFactor(factor);

            if let Some((texture, level)) = material
                .shading_network(channels::NORMALS)
                .and_then(|n| n.primary_texture())
            {
                if let Some(index) = self.texture_index(texture)? {
                    out.normal_texture = Some(json::material::NormalTexture {
                        index: json::Index::new(index),
                        scale: 1.0,
                        tex_coord: level as u32,
                        extensions: Default::default(),
                        extras: Default::default(),
                    });
                }
            }
            if let Some(emissive) = material
                .shading_network(channels::EMISSIVE)
                .and_then(|n| n.constant_color())
            {
                out.emissive_factor = json::material::EmissiveFactor([emissive.r, emissive.g, emissive.b]);
            }
            out.alpha_mode = Valid(match material.blend_mode {
                BlendMode::Opaque => json::material::AlphaMode::Opaque,
                BlendMode::Mask => json::material::AlphaMode::Mask,
                BlendMode::Blend => json::material::AlphaMode::Blend,
            });
            self.materials.push(out);
        }
        Ok(())
    }

    fn add_mesh(&mut self, name: &str, geometry: &GeometryData) -> Option<json::Index<json::Mesh>> {
        if geometry.triangle_count() == 0 {
            return None;
        }
        let mut primitives = Vec::new();
        for (material, streams) in build_streams(geometry) {
            let mut attributes = BTreeMap::new();
            attributes.insert(
                Valid(json::mesh::Semantic::Positions),
                self.buffer.pack_positions(&streams.positions),
            );
            if !streams.normals.is_empty() {
                attributes.insert(Valid(json::mesh::Semantic::Normals), self.buffer.pack_vec3(&streams.normals));
            }
            if !streams.tangents.is_empty() {
                attributes.insert(Valid(json::mesh::Semantic::Tangents), self.buffer.pack_vec4(&streams.tangents));
            }
            for (set, uvs) in streams.tex_coords.iter().enumerate() {
                attributes.insert(
                    Valid(json::mesh::Semantic::TexCoords(set as u32)),
                    self.buffer.pack_vec2(uvs),
                );
            }
            if !streams.colors.is_empty() {
                attributes.insert(Valid(json::mesh::Semantic::Colors(0)), self.buffer.pack_vec4(&streams.colors));
            }
            if !streams.joints.is_empty() {
                attributes.insert(Valid(json::mesh::Semantic::Joints(0)), self.buffer.pack_joints(&streams.joints));
                attributes.insert(Valid(json::mesh::Semantic::Weights(0)), self.buffer.pack_vec4(&streams.weights));
            }
            let material = usize::try_from(material)
                .ok()
                .filter(|&m| m < self.materials.len())
                .map(|m| json::Index::new(m as u32));
            primitives.push(json::mesh::Primitive {
                attributes,
                extensions: Default::default(),
                extras: Default::default(),
                indices: Some(self.buffer.pack_indices(&streams.indices)),
                material,
                mode: Valid(json::mesh::Mode::Triangles),
                targets: None,
            });
        }
        self.meshes.push(json::Mesh {
            extensions: Default::default(),
            extras: Default::default(),
            name: Some(name.to_string()),
            primitives,
            weights: None,
        });
        Some(json::Index::new(self.meshes.len() as u32 - 1))
    }

    /// Append a node and its subtree; `transform` is the node's local transform
    fn add_node(&mut self, node: &SceneNode, transform: Transform3D) -> u32 {
        let mesh = node.geometry().and_then(|g| self.add_mesh(&node.name, g));
        if node.camera_data().is_some() {
            tracing::debug!("camera '{}' written as a plain node", node.name);
        }
        let matrix = if transform.is_identity(1e-7) {
            None
        } else {
            let mut m = [0f32; 16];
            m.copy_from_slice(transform.matrix.as_slice());
            Some(m)
        };

        let index = self.nodes.len() as u32;
        self.nodes.push(json::Node {
            camera: None,
            children: None,
            extensions: Default::default(),
            extras: Default::default(),
            matrix,
            mesh,
            name: Some(node.name.clone()),
            rotation: None,
            scale: None,
            skin: None,
            translation: None,
            weights: None,
        });
        self.node_indices.insert(node.id, index);
        if node.geometry().is_some_and(|g| g.bone_weights.is_some()) && mesh.is_some() {
            self.skinned_nodes.push(index);
        }

        let children: Vec<json::Index<json::Node>> = node
            .children
            .iter()
            .map(|child| json::Index::new(self.add_node(child, child.transform)))
            .collect();
        if !children.is_empty() {
            self.nodes[index as usize].children = Some(children);
        }
        index
    }

    /// One skin over the scene bone table, shared by every skinned mesh
    fn add_skin(&mut self) -> Vec<json::Skin> {
        if self.skinned_nodes.is_empty() || self.scene.bones.is_empty() {
            return Vec::new();
        }
        let scene = self.scene;
        let mut joints = Vec::new();
        let mut inverse_binds = Vec::new();
        for bone in scene.bones.iter() {
            let (Some(&index), Some(world)) = (self.node_indices.get(bone), scene.world_transform(*bone)) else {
                tracing::warn!("bone {} is not part of the scene tree, skin dropped", bone);
                return Vec::new();
            };
            joints.push(json::Index::new(index));
            let inverse = world.inverse().unwrap_or_else(Transform3D::identity);
            let mut m = [0f32; 16];
            m.copy_from_slice(inverse.matrix.as_slice());
            inverse_binds.push(m);
        }
        let inverse_bind_matrices = Some(self.buffer.pack_mat4(&inverse_binds));
        for &node in &self.skinned_nodes {
            self.nodes[node as usize].skin = Some(json::Index::new(0));
        }
        vec![json::Skin {
            extensions: Default::default(),
            extras: Default::default(),
            inverse_bind_matrices,
            joints,
            name: Some("Skin".to_string()),
            skeleton: None,
        }]
    }

    fn build(mut self) -> Result<Vec<u8>> {
        self.add_materials()?;
        let scene = self.scene;
        let root = &scene.root;
        let top_level: Vec<json::Index<json::Node>> = root
            .children
            .iter()
            .map(|child| json::Index::new(self.add_node(child, root.transform * child.transform)))
            .collect();
        let skins = self.add_skin();

        let document = json::Root {
            accessors: self.buffer.accessors,
            animations: Vec::new(),
            asset: json::Asset {
                copyright: None,
                extensions: Default::default(),
                extras: Default::default(),
                generator: Some(format!("lodcrate {}", env!("CARGO_PKG_VERSION"))),
                min_version: None,
                version: "2.0".to_string(),
            },
            buffers: vec![json::Buffer {
                byte_length: self.buffer.data.len().into(),
                extensions: Default::default(),
                extras: Default::default(),
                name: None,
                uri: None,
            }],
            buffer_views: self.buffer.views,
            cameras: Vec::new(),
            extensions: Default::default(),
            extensions_required: Vec::new(),
            extensions_used: Vec::new(),
            extras: Default::default(),
            images: self.images,
            materials: self.materials,
            meshes: self.meshes,
            nodes: self.nodes,
            samplers: Vec::new(),
            scene: Some(json::Index::new(0)),
            scenes: vec![json::Scene {
                extensions: Default::default(),
                extras: Default::default(),
                name: Some(root.name.clone()),
                nodes: top_level,
            }],
            skins,
            textures: self.textures,
        };
        assemble_glb(&document, &self.buffer.data)
    }
}

/// Assemble GLB binary from JSON and buffer data
fn assemble_glb(root: &json::Root, buffer_data: &[u8]) -> Result<Vec<u8>> {
    let json_string = json::serialize::to_string(root).map_err(|e| IoError::write(e.to_string()))?;
    let json_bytes = json_string.as_bytes();

    let json_padding = (4 - (json_bytes.len() % 4)) % 4;
    let json_chunk_length = json_bytes.len() + json_padding;
    let buffer_padding = (4 - (buffer_data.len() % 4)) % 4;
    let buffer_chunk_length = buffer_data.len() + buffer_padding;
    let total_length = 12 + 8 + json_chunk_length + 8 + buffer_chunk_length;

    let mut glb = Vec::with_capacity(total_length);
    glb.extend_from_slice(GLB_MAGIC);
    glb.extend_from_slice(&2u32.to_le_bytes());
    glb.extend_from_slice(&(total_length as u32).to_le_bytes());

    glb.extend_from_slice(&(json_chunk_length as u32).to_le_bytes());
    glb.extend_from_slice(&CHUNK_JSON.to_le_bytes());
    glb.extend_from_slice(json_bytes);
    glb.extend(std::iter::repeat(0x20).take(json_padding));

    glb.extend_from_slice(&(buffer_chunk_length as u32).to_le_bytes());
    glb.extend_from_slice(&CHUNK_BIN.to_le_bytes());
    glb.extend_from_slice(buffer_data);
    glb.extend(std::iter::repeat(0).take(buffer_padding));
    Ok(glb)
}

/// Encode a scene as GLB bytes
pub fn scene_to_glb(scene: &Scene) -> Result<Vec<u8>> {
    GlbBuilder::new(scene).build()
}

impl SceneWriter for GlbWriter {
    fn write_scene(&self, scene: &Scene, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let bytes = scene_to_glb(scene)?;
        std::fs::write(path, &bytes)?;
        tracing::info!("wrote {} ({} bytes)", path.display(), bytes.len());
        Ok(())
    }

    fn format_name(&self) -> &'static str {
        "glb"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn textured_quad() -> Scene {
        let mut scene = Scene::new();
        let mut geometry = GeometryData::from_triangles(
            vec![
                Point3f::new(0.0, 0.0, 0.0),
                Point3f::new(1.0, 0.0, 0.0),
                Point3f::new(1.0, 1.0, 0.0),
                Point3f::new(0.0, 1.0, 0.0),
            ],
            vec![[0, 1, 2], [0, 2, 3]],
        );
        let level = geometry.add_tex_coords("TexCoords0");
        geometry.tex_coords[level].values = vec![
            Point2f::new(0.0, 0.0),
            Point2f::new(1.0, 0.0),
            Point2f::new(1.0, 1.0),
            Point2f::new(0.0, 0.0),
            Point2f::new(1.0, 1.0),
            Point2f::new(0.0, 1.0),
        ];
        geometry.add_material_ids();
        let id = scene.add_mesh("Quad", geometry);
        if let Some(node) = scene.node_mut(id) {
            node.transform = Transform3D::translation(Vector3f::new(0.0, 2.0, 0.0));
        }
        scene
            .textures
            .add(Texture::from_image("Checker", TextureImage::new(2, 2, Color::new(0.0, 1.0, 0.0, 1.0))));
        let mut material = Material::new("Checker");
        material.set_shading_network(channels::DIFFUSE, ShadingNetwork::texture("Checker", 0));
        scene.materials.add(material);
        scene
    }

    #[test]
    fn test_glb_header() {
        let bytes = scene_to_glb(&textured_quad()).unwrap();
        assert_eq!(&bytes[0..4], b"glTF");
        assert_eq!(u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]), 2);
        let length = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize;
        assert_eq!(length, bytes.len());
        assert_eq!(bytes.len() % 4, 0);
    }

    #[test]
    fn test_glb_round_trip() {
        let scene = textured_quad();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quad.glb");
        GlbWriter.write_scene(&scene, &path).unwrap();

        let back = GltfReader.read_scene(&path).unwrap();
        assert_eq!(back.vertex_count(), 4);
        assert_eq!(back.triangle_count(), 2);
        let node = back.find_node_by_path("Root/Quad").unwrap();
        assert_relative_eq!(node.transform.matrix[(1, 3)], 2.0);

        let geometry = node.geometry().unwrap();
        assert_relative_eq!(geometry.tex_coords[0].values[5].y, 1.0);
        let material = back.materials.get(geometry.material_id(0) as usize).unwrap();
        assert_eq!(material.name, "Checker");
        let texture = back.textures.find_by_name("Checker").unwrap();
        assert_relative_eq!(texture.image.as_ref().unwrap().get(0, 0).g, 1.0);
    }

    #[test]
    fn test_material_split_is_welded_on_import() {
        let mut scene = Scene::new();
        let mut geometry = GeometryData::from_triangles(
            vec![
                Point3f::new(0.0, 0.0, 0.0),
                Point3f::new(1.0, 0.0, 0.0),
                Point3f::new(1.0, 1.0, 0.0),
                Point3f::new(0.0, 1.0, 0.0),
            ],
            vec![[0, 1, 2], [0, 2, 3]],
        );
        geometry.material_ids = Some(vec![0, 1]);
        scene.add_mesh("Split", geometry);
        scene.materials.add(Material::new("A"));
        scene.materials.add(Material::new("B"));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("split.glb");
        GlbWriter.write_scene(&scene, &path).unwrap();
        let back = GltfReader.read_scene(&path).unwrap();
        assert_eq!(back.vertex_count(), 4);
        let geometry = back.find_node_by_path("Root/Split").unwrap().geometry().unwrap();
        assert_eq!(geometry.triangle_positions(1)[0], Point3f::new(0.0, 0.0, 0.0));
        assert_ne!(geometry.material_id(0), geometry.material_id(1));
    }

    #[test]
    fn test_streams_split_by_material() {
        let mut geometry = GeometryData::from_triangles(
            vec![
                Point3f::new(0.0, 0.0, 0.0),
                Point3f::new(1.0, 0.0, 0.0),
                Point3f::new(1.0, 1.0, 0.0),
                Point3f::new(0.0, 1.0, 0.0),
            ],
            vec![[0, 1, 2], [0, 2, 3]],
        );
        geometry.material_ids = Some(vec![0, 1]);
        let streams = build_streams(&geometry);
        assert_eq!(streams.len(), 2);
        assert_eq!(streams[&0].positions.len(), 3);
        assert_eq!(streams[&1].indices, vec![0, 1, 2]);
    }
}
