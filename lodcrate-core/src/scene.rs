//! Scene graph
//!
//! A [`Scene`] owns a tree of [`SceneNode`]s (each child owned by its parent)
//! together with the material, texture, selection set and bone tables the
//! nodes refer to.

use crate::error::{Error, Result};
use crate::geometry::GeometryData;
use crate::material::{MaterialTable, TextureTable};
use crate::point::*;
use crate::selection::{SelectionSet, SelectionSetTable};
use crate::traits::{Aabb, Bounded};
use crate::transform::Transform3D;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use uuid::Uuid;

/// Globally unique node id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub Uuid);

impl NodeId {
    /// Fresh random id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(text: &str) -> Result<Self> {
        Uuid::parse_str(text)
            .map(Self)
            .map_err(|e| Error::InvalidData(format!("invalid node id '{}': {}", text, e)))
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

/// Projection used by a camera node
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CameraType {
    #[default]
    Perspective,
    Orthographic,
}

/// One camera position and the direction it looks in
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraViewpoint {
    pub position: Point3f,
    pub direction: Vector3f,
}

/// Camera data. With normalized coordinates viewpoint positions are
/// expressed relative to the scene bounding sphere (center at the origin,
/// radius 1) instead of node space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraNode {
    pub camera_type: CameraType,
    /// Vertical field of view in radians
    pub field_of_view: f32,
    pub orthographic_size: f32,
    pub uses_normalized_coordinates: bool,
    pub viewpoints: Vec<CameraViewpoint>,
}

impl Default for CameraNode {
    fn default() -> Self {
        Self {
            camera_type: CameraType::Perspective,
            field_of_view: 60f32.to_radians(),
            orthographic_size: 1.0,
            uses_normalized_coordinates: false,
            viewpoints: Vec::new(),
        }
    }
}

impl CameraNode {
    /// Distance of sphere path cameras from the scene center, in scene radii
    pub const SPHERE_PATH_DISTANCE: f32 = 2.0;

    /// Cameras spread over a spherical cap around the scene, all looking at
    /// its center.
    ///
    /// `fidelity` controls the density (`10 * fidelity² + 2` candidate
    /// directions over the whole sphere), `pitch_deg` and `yaw_deg` orient
    /// the cap center (pitch 90 looks from straight above) and
    /// `coverage_deg` is the opening angle of the cap (360 covers the
    /// sphere).
    pub fn sphere_path(fidelity: u32, pitch_deg: f32, yaw_deg: f32, coverage_deg: f32) -> Self {
        let pitch = pitch_deg.to_radians();
        let yaw = yaw_deg.to_radians();
        let axis = Vector3f::new(pitch.cos() * yaw.sin(), pitch.sin(), pitch.cos() * yaw.cos());
        let half_angle = (coverage_deg.clamp(0.0, 360.0) * 0.5).to_radians();
        let min_dot = half_angle.cos();

        let count = (10 * fidelity.max(1) * fidelity.max(1) + 2) as usize;
        let golden = std::f32::consts::PI * (3.0 - 5f32.sqrt());
        let mut viewpoints = Vec::new();
        for i in 0..count {
            let y = 1.0 - 2.0 * (i as f32 + 0.5) / count as f32;
            let r = (1.0 - y * y).max(0.0).sqrt();
            let theta = golden * i as f32;
            let dir = Vector3f::new(r * theta.cos(), y, r * theta.sin());
            if dir.dot(&axis) >= min_dot - 1e-6 {
                viewpoints.push(CameraViewpoint {
                    position: Point3f::from(dir * Self::SPHERE_PATH_DISTANCE),
                    direction: -dir,
                });
            }
        }
        if viewpoints.is_empty() {
            viewpoints.push(CameraViewpoint {
                position: Point3f::from(axis * Self::SPHERE_PATH_DISTANCE),
                direction: -axis,
            });
        }
        Self {
            uses_normalized_coordinates: true,
            viewpoints,
            ..Self::default()
        }
    }

    /// Viewpoints resolved to world space
    pub fn world_viewpoints(&self, world: &Transform3D, scene_bounds: &Aabb) -> Vec<CameraViewpoint> {
        self.viewpoints
            .iter()
            .map(|vp| {
                if self.uses_normalized_coordinates {
                    let radius = scene_bounds.radius().max(f32::EPSILON);
                    CameraViewpoint {
                        position: scene_bounds.center() + vp.position.coords * radius,
                        direction: vp.direction.normalize(),
                    }
                } else {
                    CameraViewpoint {
                        position: world.transform_point(&vp.position),
                        direction: world.transform_vector(&vp.direction).normalize(),
                    }
                }
            })
            .collect()
    }
}

/// Geometry payload of a mesh node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MeshNode {
    pub geometry: GeometryData,
}

/// What a scene node carries besides its transform
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum NodeKind {
    #[default]
    Transform,
    Mesh(MeshNode),
    Camera(CameraNode),
    Bone,
}

/// A node of the scene tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneNode {
    pub id: NodeId,
    pub name: String,
    /// Transform relative to the parent
    pub transform: Transform3D,
    pub kind: NodeKind,
    pub children: Vec<SceneNode>,
}

impl SceneNode {
    pub fn new(name: &str, kind: NodeKind) -> Self {
        Self {
            id: NodeId::new(),
            name: name.to_string(),
            transform: Transform3D::identity(),
            kind,
            children: Vec::new(),
        }
    }

    pub fn transform_node(name: &str) -> Self {
        Self::new(name, NodeKind::Transform)
    }

    pub fn mesh(name: &str, geometry: GeometryData) -> Self {
        Self::new(name, NodeKind::Mesh(MeshNode { geometry }))
    }

    pub fn camera(name: &str, camera: CameraNode) -> Self {
        Self::new(name, NodeKind::Camera(camera))
    }

    pub fn bone(name: &str) -> Self {
        Self::new(name, NodeKind::Bone)
    }

    pub fn with_transform(mut self, transform: Transform3D) -> Self {
        self.transform = transform;
        self
    }

    pub fn geometry(&self) -> Option<&GeometryData> {
        match &self.kind {
            NodeKind::Mesh(mesh) => Some(&mesh.geometry),
            _ => None,
        }
    }

    pub fn geometry_mut(&mut self) -> Option<&mut GeometryData> {
        match &mut self.kind {
            NodeKind::Mesh(mesh) => Some(&mut mesh.geometry),
            _ => None,
        }
    }

    pub fn camera_data(&self) -> Option<&CameraNode> {
        match &self.kind {
            NodeKind::Camera(camera) => Some(camera),
            _ => None,
        }
    }

    pub fn is_mesh(&self) -> bool {
        matches!(self.kind, NodeKind::Mesh(_))
    }

    /// Number of nodes in this subtree, including this one
    pub fn subtree_len(&self) -> usize {
        1 + self.children.iter().map(|c| c.subtree_len()).sum::<usize>()
    }
}

/// Skinning bones referenced by index from geometry bone ids
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BoneTable {
    bones: Vec<NodeId>,
}

impl BoneTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, node: NodeId) -> usize {
        if let Some(i) = self.index_of(&node) {
            return i;
        }
        self.bones.push(node);
        self.bones.len() - 1
    }

    pub fn get(&self, index: usize) -> Option<NodeId> {
        self.bones.get(index).copied()
    }

    pub fn index_of(&self, node: &NodeId) -> Option<usize> {
        self.bones.iter().position(|b| b == node)
    }

    pub fn len(&self) -> usize {
        self.bones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bones.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, NodeId> {
        self.bones.iter()
    }

    /// Replace the table; used after bone reduction remaps ids
    pub fn set_bones(&mut self, bones: Vec<NodeId>) {
        self.bones = bones;
    }
}

/// A mesh node with its accumulated world transform
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeshInstance {
    pub id: NodeId,
    pub world: Transform3D,
}

/// The scene: a node tree plus the tables its nodes refer to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scene {
    pub root: SceneNode,
    pub materials: MaterialTable,
    pub textures: TextureTable,
    pub selection_sets: SelectionSetTable,
    pub bones: BoneTable,
}

impl Default for Scene {
    fn default() -> Self {
        Self::new()
    }
}

impl Scene {
    /// Empty scene with a root transform node named `Root`
    pub fn new() -> Self {
        Self {
            root: SceneNode::transform_node("Root"),
            materials: MaterialTable::new(),
            textures: TextureTable::new(),
            selection_sets: SelectionSetTable::new(),
            bones: BoneTable::new(),
        }
    }

    pub fn root_id(&self) -> NodeId {
        self.root.id
    }

    /// Attach `node` below `parent` and return its id
    pub fn add_node(&mut self, parent: NodeId, node: SceneNode) -> Result<NodeId> {
        let id = node.id;
        let parent_node = self
            .node_mut(parent)
            .ok_or_else(|| Error::NodeNotFound(parent.to_string()))?;
        parent_node.children.push(node);
        Ok(id)
    }

    /// Attach a mesh node below the root
    pub fn add_mesh(&mut self, name: &str, geometry: GeometryData) -> NodeId {
        let node = SceneNode::mesh(name, geometry);
        let id = node.id;
        self.root.children.push(node);
        id
    }

    pub fn node(&self, id: NodeId) -> Option<&SceneNode> {
        fn find(node: &SceneNode, id: NodeId) -> Option<&SceneNode> {
            if node.id == id {
                return Some(node);
            }
            node.children.iter().find_map(|c| find(c, id))
        }
        find(&self.root, id)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut SceneNode> {
        fn find(node: &mut SceneNode, id: NodeId) -> Option<&mut SceneNode> {
            if node.id == id {
                return Some(node);
            }
            for child in &mut node.children {
                if let Some(found) = find(child, id) {
                    return Some(found);
                }
            }
            None
        }
        find(&mut self.root, id)
    }

    /// Look up a node by a `/` separated name path starting at the root,
    /// e.g. `Root/Teapot001`
    pub fn find_node_by_path(&self, path: &str) -> Option<&SceneNode> {
        let mut parts = path.split('/').filter(|p| !p.is_empty());
        let first = parts.next()?;
        if first != self.root.name {
            return None;
        }
        let mut current = &self.root;
        for part in parts {
            current = current.children.iter().find(|c| c.name == part)?;
        }
        Some(current)
    }

    /// Ids of all nodes with the given name, in pre-order
    pub fn find_nodes_by_name(&self, name: &str) -> Vec<NodeId> {
        let mut ids = Vec::new();
        self.walk(|node, _| {
            if node.name == name {
                ids.push(node.id);
            }
        });
        ids
    }

    /// Detach a node (with its subtree). The root cannot be removed.
    pub fn remove_node(&mut self, id: NodeId) -> Result<SceneNode> {
        fn remove(node: &mut SceneNode, id: NodeId) -> Option<SceneNode> {
            if let Some(pos) = node.children.iter().position(|c| c.id == id) {
                return Some(node.children.remove(pos));
            }
            for child in &mut node.children {
                if let Some(removed) = remove(child, id) {
                    return Some(removed);
                }
            }
            None
        }
        if id == self.root.id {
            return Err(Error::InvalidData("the root node cannot be removed".to_string()));
        }
        let removed = remove(&mut self.root, id).ok_or_else(|| Error::NodeNotFound(id.to_string()))?;
        let mut stack = vec![&removed];
        while let Some(node) = stack.pop() {
            self.selection_sets.forget_node(&node.id);
            stack.extend(node.children.iter());
        }
        Ok(removed)
    }

    /// Nodes from the root down to `id`, both included
    pub fn path_to(&self, id: NodeId) -> Option<Vec<&SceneNode>> {
        fn search<'a>(node: &'a SceneNode, id: NodeId, path: &mut Vec<&'a SceneNode>) -> bool {
            path.push(node);
            if node.id == id {
                return true;
            }
            for child in &node.children {
                if search(child, id, path) {
                    return true;
                }
            }
            path.pop();
            false
        }
        let mut path = Vec::new();
        search(&self.root, id, &mut path).then_some(path)
    }

    /// Slash separated name path of a node
    pub fn node_path(&self, id: NodeId) -> Option<String> {
        self.path_to(id)
            .map(|nodes| nodes.iter().map(|n| n.name.as_str()).collect::<Vec<_>>().join("/"))
    }

    /// Accumulated transform from node space to world space
    pub fn world_transform(&self, id: NodeId) -> Option<Transform3D> {
        self.path_to(id).map(|nodes| {
            nodes
                .iter()
                .fold(Transform3D::identity(), |acc, n| acc * n.transform)
        })
    }

    /// Visit every node in pre-order with its world transform
    pub fn walk<F: FnMut(&SceneNode, &Transform3D)>(&self, mut f: F) {
        let mut stack = vec![(&self.root, self.root.transform)];
        while let Some((node, world)) = stack.pop() {
            f(node, &world);
            for child in node.children.iter().rev() {
                stack.push((child, world * child.transform));
            }
        }
    }

    /// All mesh nodes with their world transforms, in pre-order
    pub fn mesh_nodes(&self) -> Vec<MeshInstance> {
        let mut meshes = Vec::new();
        self.walk(|node, world| {
            if node.is_mesh() {
                meshes.push(MeshInstance {
                    id: node.id,
                    world: *world,
                });
            }
        });
        meshes
    }

    /// Ids in a selection set plus all their descendants
    pub fn selection_set_nodes(&self, name: &str) -> Option<HashSet<NodeId>> {
        let set = self.selection_sets.find_by_name(name)?;
        let mut selected = HashSet::new();
        for id in &set.nodes {
            if let Some(node) = self.node(*id) {
                let mut stack = vec![node];
                while let Some(n) = stack.pop() {
                    selected.insert(n.id);
                    stack.extend(n.children.iter());
                }
            }
        }
        Some(selected)
    }

    /// Mesh nodes a processing step should touch. `None` selects every mesh;
    /// a set name that does not exist is an error.
    pub fn selected_mesh_nodes(&self, selection_set: Option<&str>) -> Result<Vec<MeshInstance>> {
        let meshes = self.mesh_nodes();
        match selection_set.filter(|name| !name.is_empty()) {
            None => Ok(meshes),
            Some(name) => {
                let selected = self.selection_set_nodes(name).ok_or_else(|| {
                    Error::InvalidSettings(format!("selection set '{}' does not exist", name))
                })?;
                Ok(meshes.into_iter().filter(|m| selected.contains(&m.id)).collect())
            }
        }
    }

    /// Create (or replace) a selection set holding the given nodes
    pub fn add_selection_set(&mut self, name: &str, nodes: impl IntoIterator<Item = NodeId>) -> usize {
        let mut set = SelectionSet::new(name);
        for id in nodes {
            set.add(id);
        }
        self.selection_sets.add(set)
    }

    pub fn geometry(&self, id: NodeId) -> Option<&GeometryData> {
        self.node(id).and_then(|n| n.geometry())
    }

    pub fn geometry_mut(&mut self, id: NodeId) -> Option<&mut GeometryData> {
        self.node_mut(id).and_then(|n| n.geometry_mut())
    }

    pub fn node_count(&self) -> usize {
        self.root.subtree_len()
    }

    pub fn vertex_count(&self) -> usize {
        let mut count = 0;
        self.walk(|node, _| count += node.geometry().map_or(0, |g| g.vertex_count()));
        count
    }

    pub fn triangle_count(&self) -> usize {
        let mut count = 0;
        self.walk(|node, _| count += node.geometry().map_or(0, |g| g.triangle_count()));
        count
    }

    /// Camera nodes (with world transforms) of a selection set
    pub fn cameras_in_selection(&self, name: &str) -> Result<Vec<(CameraNode, Transform3D)>> {
        let selected = self
            .selection_set_nodes(name)
            .ok_or_else(|| Error::InvalidSettings(format!("selection set '{}' does not exist", name)))?;
        let mut cameras = Vec::new();
        self.walk(|node, world| {
            if let (true, Some(camera)) = (selected.contains(&node.id), node.camera_data()) {
                cameras.push((camera.clone(), *world));
            }
        });
        Ok(cameras)
    }
}

impl Bounded for Scene {
    fn bounding_box(&self) -> Aabb {
        let mut aabb = Aabb::empty();
        self.walk(|node, world| {
            if let Some(geometry) = node.geometry() {
                for p in &geometry.coords {
                    aabb.extend(&world.transform_point(p));
                }
            }
        });
        aabb
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn triangle() -> GeometryData {
        GeometryData::from_triangles(
            vec![
                Point3f::new(0.0, 0.0, 0.0),
                Point3f::new(1.0, 0.0, 0.0),
                Point3f::new(0.0, 1.0, 0.0),
            ],
            vec![[0, 1, 2]],
        )
    }

    fn make_scene() -> (Scene, NodeId, NodeId) {
        let mut scene = Scene::new();
        let group = scene
            .add_node(
                scene.root_id(),
                SceneNode::transform_node("Group")
                    .with_transform(Transform3D::translation(Vector3f::new(10.0, 0.0, 0.0))),
            )
            .unwrap();
        let teapot = scene
            .add_node(group, SceneNode::mesh("Teapot001", triangle()))
            .unwrap();
        (scene, group, teapot)
    }

    #[test]
    fn test_find_node_by_path() {
        let (scene, _, teapot) = make_scene();
        assert_eq!(scene.find_node_by_path("Root/Group/Teapot001").unwrap().id, teapot);
        assert!(scene.find_node_by_path("Root/Teapot001").is_none());
        assert!(scene.find_node_by_path("Other/Group").is_none());
        assert_eq!(scene.node_path(teapot).unwrap(), "Root/Group/Teapot001");
    }

    #[test]
    fn test_world_transform_and_bounds() {
        let (scene, _, teapot) = make_scene();
        let world = scene.world_transform(teapot).unwrap();
        let p = world.transform_point(&Point3f::origin());
        assert_relative_eq!(p.x, 10.0);
        let aabb = scene.bounding_box();
        assert_relative_eq!(aabb.min.x, 10.0);
        assert_relative_eq!(aabb.max.x, 11.0);
        assert_eq!(scene.triangle_count(), 1);
        assert_eq!(scene.vertex_count(), 3);
    }

    #[test]
    fn test_selection_includes_descendants() {
        let (mut scene, group, teapot) = make_scene();
        let other = scene.add_mesh("Other", triangle());
        scene.add_selection_set("ReductionTarget", [group]);

        let selected = scene.selected_mesh_nodes(Some("ReductionTarget")).unwrap();
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].id, teapot);
        assert_eq!(scene.selected_mesh_nodes(None).unwrap().len(), 2);
        assert!(scene.selected_mesh_nodes(Some("Missing")).is_err());
        assert!(scene.node(other).is_some());
    }

    #[test]
    fn test_remove_node_forgets_selection() {
        let (mut scene, group, teapot) = make_scene();
        scene.add_selection_set("Set", [teapot]);
        let removed = scene.remove_node(group).unwrap();
        assert_eq!(removed.subtree_len(), 2);
        assert!(scene.node(teapot).is_none());
        assert!(scene.selection_sets.find_by_name("Set").unwrap().is_empty());
        assert!(scene.remove_node(scene.root_id()).is_err());
    }

    #[test]
    fn test_sphere_path_cameras() {
        let camera = CameraNode::sphere_path(4, 90.0, 180.0, 90.0);
        assert!(camera.uses_normalized_coordinates);
        assert!(!camera.viewpoints.is_empty());
        for vp in &camera.viewpoints {
            // All cameras sit in the upper cap looking back at the center
            assert!(vp.position.y > 0.0);
            assert_relative_eq!(vp.position.coords.norm(), CameraNode::SPHERE_PATH_DISTANCE, epsilon = 1e-4);
            assert!(vp.direction.dot(&vp.position.coords) < 0.0);
        }
        let full = CameraNode::sphere_path(4, 0.0, 0.0, 360.0);
        assert_eq!(full.viewpoints.len(), 162);
    }

    #[test]
    fn test_scene_serde_round_trip() {
        let (scene, _, _) = make_scene();
        let json = serde_json::to_string(&scene).unwrap();
        let back: Scene = serde_json::from_str(&json).unwrap();
        assert_eq!(back, scene);
    }
}
