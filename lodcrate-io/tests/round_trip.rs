//! Load, save and reload scenes through every supported format

use lodcrate_core::{Error, GeometryData, Point2f, Point3f, Scene, Transform3D, Vector3f};
use lodcrate_io::{load_scene, save_scene, ObjReader, SceneReader};
use std::fs;

/// Two quads side by side with every corner its own vertex
fn two_quads_unshared() -> GeometryData {
    let quad = |x: f32| {
        [
            Point3f::new(x, 0.0, 0.0),
            Point3f::new(x + 1.0, 0.0, 0.0),
            Point3f::new(x + 1.0, 1.0, 0.0),
            Point3f::new(x, 0.0, 0.0),
            Point3f::new(x + 1.0, 1.0, 0.0),
            Point3f::new(x, 1.0, 0.0),
        ]
    };
    let coords: Vec<Point3f> = quad(0.0).into_iter().chain(quad(1.0)).collect();
    let triangles = (0..4u32).map(|t| [t * 3, t * 3 + 1, t * 3 + 2]).collect();
    GeometryData::from_triangles(coords, triangles)
}

/// The same two quads sharing vertices along the middle edge
fn two_quads_shared() -> GeometryData {
    GeometryData::from_triangles(
        vec![
            Point3f::new(0.0, 0.0, 0.0),
            Point3f::new(1.0, 0.0, 0.0),
            Point3f::new(2.0, 0.0, 0.0),
            Point3f::new(0.0, 1.0, 0.0),
            Point3f::new(1.0, 1.0, 0.0),
            Point3f::new(2.0, 1.0, 0.0),
        ],
        vec![[0, 1, 4], [0, 4, 3], [1, 2, 5], [1, 5, 4]],
    )
}

fn triangle_positions(scene: &Scene) -> Vec<[Point3f; 3]> {
    scene
        .mesh_nodes()
        .iter()
        .filter_map(|m| scene.geometry(m.id))
        .flat_map(|g| (0..g.triangle_count()).map(move |t| g.triangle_positions(t)))
        .collect()
}

fn sample_scene() -> Scene {
    let mut scene = Scene::new();
    let a = scene.add_mesh("Shared", two_quads_shared());
    scene.add_mesh("Unshared", two_quads_unshared());
    if let Some(node) = scene.node_mut(a) {
        node.transform = Transform3D::translation(Vector3f::new(0.0, 0.0, 3.0));
    }
    scene
}

#[test]
fn test_round_trip_preserves_counts() {
    let dir = tempfile::tempdir().unwrap();
    let scene = sample_scene();

    // glTF import welds the coincident corners of the unshared quads
    for (extension, vertices) in [("obj", scene.vertex_count()), ("glb", 12)] {
        let first = dir.path().join(format!("first.{}", extension));
        save_scene(&scene, &first).unwrap();
        let loaded = load_scene(&first).unwrap();
        assert_eq!(loaded.vertex_count(), vertices, "{}", extension);
        assert_eq!(loaded.triangle_count(), scene.triangle_count(), "{}", extension);

        let second = dir.path().join(format!("second.{}", extension));
        save_scene(&loaded, &second).unwrap();
        let reloaded = load_scene(&second).unwrap();
        assert_eq!(reloaded.vertex_count(), loaded.vertex_count(), "{}", extension);
        assert_eq!(reloaded.triangle_count(), loaded.triangle_count(), "{}", extension);
    }
}

#[test]
fn test_shared_and_unshared_quads_export_identically() {
    let dir = tempfile::tempdir().unwrap();

    let mut unshared = Scene::new();
    unshared.add_mesh("Quads", two_quads_unshared());
    let mut shared = Scene::new();
    shared.add_mesh("Quads", two_quads_shared());

    let a = dir.path().join("unshared.obj");
    let b = dir.path().join("shared.obj");
    save_scene(&unshared, &a).unwrap();
    save_scene(&shared, &b).unwrap();

    let a = ObjReader.read_scene(&a).unwrap();
    let b = ObjReader.read_scene(&b).unwrap();
    assert_eq!(a.vertex_count(), 12);
    assert_eq!(b.vertex_count(), 6);
    assert_eq!(triangle_positions(&a), triangle_positions(&b));
}

#[test]
fn test_obj_through_glb_keeps_vertex_count() {
    let dir = tempfile::tempdir().unwrap();
    let mut geometry = two_quads_shared();
    // a seam along the shared edge forces the exporter to split those vertices
    let level = geometry.add_tex_coords("TexCoords0");
    geometry.tex_coords[level].values = (0..geometry.triangle_count())
        .flat_map(|t| {
            let u = if t < 2 { 0.0 } else { 0.5 };
            [Point2f::new(u, 0.0), Point2f::new(u + 0.25, 0.0), Point2f::new(u + 0.25, 1.0)]
        })
        .collect();
    let mut scene = Scene::new();
    scene.add_mesh("Seam", geometry);

    let obj = dir.path().join("seam.obj");
    save_scene(&scene, &obj).unwrap();
    let from_obj = load_scene(&obj).unwrap();
    assert_eq!(from_obj.vertex_count(), 6);

    let glb = dir.path().join("seam.glb");
    save_scene(&from_obj, &glb).unwrap();
    let from_glb = load_scene(&glb).unwrap();
    assert_eq!(from_glb.vertex_count(), 6);

    let again = dir.path().join("again.obj");
    save_scene(&from_glb, &again).unwrap();
    let back = load_scene(&again).unwrap();
    assert_eq!(back.vertex_count(), 6);
    assert_eq!(triangle_positions(&back), triangle_positions(&from_obj));
}

#[test]
fn test_world_transform_is_baked_into_obj() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("moved.obj");
    save_scene(&sample_scene(), &path).unwrap();
    let loaded = load_scene(&path).unwrap();
    let shared = loaded.find_node_by_path("Root/Shared").unwrap();
    assert!(shared.transform.is_identity(1e-6));
    assert_eq!(shared.geometry().unwrap().coords[0], Point3f::new(0.0, 0.0, 3.0));
}

#[test]
fn test_fbx_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("Teapot.fbx");
    fs::write(&path, b"; FBX 7.4.0 project file\n").unwrap();
    assert!(matches!(load_scene(&path), Err(Error::UnsupportedFormat(_))));
    assert!(matches!(
        save_scene(&sample_scene(), dir.path().join("out.fbx")),
        Err(Error::UnsupportedFormat(_))
    ));
}

#[test]
fn test_missing_input_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    assert!(load_scene(dir.path().join("absent.glb")).is_err());
}
