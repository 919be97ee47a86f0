use lodcrate_casting::{ColorCaster, MappingImageSettings, NormalCaster};
use lodcrate_core::{
    channels, Color, Error, GeometryData, Material, Point2f, Point3f, ProcessContext, Scene, ShadingNetwork,
    ShadingNode, Texture, TextureImage,
};
use lodcrate_io::{load_scene, load_texture_image, save_scene};
use lodcrate_pipeline::{
    load_settings, save_settings, FlipbookPipeline, Pipeline, PipelineSettings, ReductionPipeline, RunMode,
};
use lodcrate_simplification::{ReductionSettings, ReductionTargets, SimplificationSettings};
use std::sync::Arc;

fn textured_scene() -> Scene {
    let cells = 8u32;
    let n = cells + 1;
    let mut coords = Vec::new();
    for y in 0..n {
        for x in 0..n {
            coords.push(Point3f::new(x as f32 / cells as f32, y as f32 / cells as f32, 0.0));
        }
    }
    let mut ids = Vec::new();
    for y in 0..cells {
        for x in 0..cells {
            let i = y * n + x;
            ids.push([i, i + 1, i + n + 1]);
            ids.push([i, i + n + 1, i + n]);
        }
    }
    let mut grid = GeometryData::from_triangles(coords, ids);
    let level = grid.add_tex_coords("uv");
    grid.tex_coords[level].values = grid
        .vertex_ids
        .iter()
        .flatten()
        .map(|&v| Point2f::new(grid.coords[v as usize].x, grid.coords[v as usize].y))
        .collect();

    let mut image = TextureImage::new(8, 8, Color::new(1.0, 0.0, 0.0, 1.0));
    for y in 4..8 {
        for x in 0..8 {
            image.set(x, y, Color::new(0.0, 1.0, 0.0, 1.0));
        }
    }
    let mut scene = Scene::new();
    scene.textures.add(Texture::from_image("stripes", image));
    let mut material = Material::new("source");
    material.set_shading_network(channels::DIFFUSE, ShadingNetwork::texture("stripes", 0));
    scene.materials.add(material);
    scene.add_mesh("grid", grid);
    scene
}

fn reduction(ratio: f32) -> ReductionPipeline {
    let mut pipeline = ReductionPipeline::default();
    pipeline.settings.simplification =
        SimplificationSettings::from_reduction(ReductionSettings::with_targets(ReductionTargets::triangle_ratio(ratio)));
    pipeline.settings.mapping_image = MappingImageSettings::with_texture_size(32, 32);
    pipeline
}

#[test]
fn test_reduction_casts_and_replaces_materials() {
    let dir = tempfile::tempdir().unwrap();
    let mut pipeline = reduction(0.5).with_output_dir(dir.path());
    pipeline.add_material_caster(ColorCaster::new(channels::DIFFUSE), 0);
    pipeline.add_material_caster(NormalCaster::default(), 0);

    let mut scene = textured_scene();
    let output = pipeline.run_scene(&mut scene, RunMode::RunInThisProcess).unwrap();
    assert!(!output.has_errors(), "{:?}", output.log.errors());
    assert!(scene.triangle_count() <= 64);

    assert_eq!(output.textures.len(), 2);
    assert_eq!(scene.materials.len(), 1);
    let material = scene.materials.get(0).unwrap();
    assert_eq!(material.name, "LODMaterial0");
    for texture in &output.textures {
        let path = texture.path.as_ref().unwrap();
        assert!(path.starts_with(dir.path()));
        let image = load_texture_image(path).unwrap();
        assert_eq!((image.width, image.height), (32, 32));
    }

    // The old texture is gone, the diffuse channel samples the new one
    assert!(scene.textures.find_by_name("stripes").is_none());
    let network = material.shading_network(channels::DIFFUSE).unwrap();
    let (name, _) = network.primary_texture().unwrap();
    assert!(scene.textures.find_by_name(name).is_some());
    assert!(network.nodes().iter().any(|node| matches!(
        node,
        ShadingNode::Texture { tex_coord_name: Some(level), .. } if level == "MaterialLOD"
    )));
}

#[test]
fn test_source_material_ids_never_dangle() {
    let mut scene = textured_scene();
    scene
        .materials
        .add(Material::with_color("plain", channels::DIFFUSE, Color::new(0.0, 0.0, 1.0, 1.0)));
    let grid = scene.mesh_nodes()[0].id;
    let geometry = scene.geometry_mut(grid).unwrap();
    let count = geometry.triangle_count();
    geometry.material_ids = Some((0..count).map(|t| (t % 2) as i32).collect());

    let mut pipeline = reduction(0.5);
    pipeline.settings.mapping_image.apply_new_material_ids = false;
    pipeline.add_material_caster(ColorCaster::new(channels::DIFFUSE), 0);
    let output = pipeline.run_scene(&mut scene, RunMode::RunInThisProcess).unwrap();
    assert!(!output.has_errors(), "{:?}", output.log.errors());

    assert_eq!(scene.materials.len(), 1);
    assert_eq!(scene.materials.get(0).unwrap().name, "LODMaterial0");
    for mesh in scene.mesh_nodes() {
        let geometry = scene.geometry(mesh.id).unwrap();
        for t in 0..geometry.triangle_count() {
            let id = geometry.material_id(t);
            assert!(id >= 0 && (id as usize) < scene.materials.len(), "dangling material id {}", id);
        }
    }
}

#[test]
fn test_unloaded_texture_is_a_warning() {
    let mut scene = textured_scene();
    scene.textures.clear();
    scene.textures.add(Texture::new("stripes"));

    let mut pipeline = reduction(0.5);
    pipeline.add_material_caster(ColorCaster::new(channels::DIFFUSE), 0);
    let output = pipeline.run_scene(&mut scene, RunMode::RunInThisProcess).unwrap();
    assert!(!output.has_errors(), "{:?}", output.log.errors());
    assert!(output.log.warnings().iter().any(|w| w.contains("stripes")));
    assert_eq!(output.textures.len(), 1);
    assert_eq!(scene.materials.get(0).unwrap().name, "LODMaterial0");
}

#[test]
fn test_casters_without_mapping_are_logged() {
    let mut pipeline = ReductionPipeline::default();
    pipeline.add_material_caster(ColorCaster::new(channels::DIFFUSE), 0);
    let mut scene = textured_scene();
    let output = pipeline.run_scene(&mut scene, RunMode::RunInThisProcess).unwrap();
    assert!(output.has_errors());
    assert_eq!(scene.materials.get(0).unwrap().name, "source");
}

#[test]
fn test_observer_cancels_run() {
    let mut pipeline = reduction(0.25).with_observer(Arc::new(|progress: f32| progress < 20.0));
    pipeline.add_material_caster(ColorCaster::new(channels::DIFFUSE), 0);
    let mut scene = textured_scene();
    let result = pipeline.run_scene(&mut scene, RunMode::RunInThisProcess);
    assert!(matches!(result, Err(Error::Cancelled)));
}

#[test]
fn test_run_scene_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("grid.obj");
    save_scene(&textured_scene(), &input).unwrap();

    let mut pipeline = reduction(0.5);
    pipeline.add_material_caster(ColorCaster::new(channels::DIFFUSE), 0);
    let output_path = dir.path().join("lod").join("grid_lod1.obj");
    std::fs::create_dir_all(output_path.parent().unwrap()).unwrap();
    let output = pipeline
        .run_scene_from_file(&input, &output_path, RunMode::RunInThisProcess)
        .unwrap();
    assert!(!output.has_errors(), "{:?}", output.log.errors());

    let texture = output.textures[0].path.as_ref().unwrap();
    assert_eq!(texture.parent(), output_path.parent());
    let reloaded = load_scene(&output_path).unwrap();
    assert!(reloaded.triangle_count() <= 64);
    assert_eq!(reloaded.materials.len(), 1);
}

#[test]
fn test_flipbook_pipeline_settings_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let mut pipeline = FlipbookPipeline::default();
    pipeline.add_material_caster(ColorCaster::new(channels::DIFFUSE), 0);
    let settings = pipeline.pipeline_settings();

    for name in ["flipbook.json", "flipbook.toml"] {
        let path = dir.path().join(name);
        save_settings(&settings, &path).unwrap();
        let loaded: PipelineSettings = load_settings(&path).unwrap();
        assert_eq!(loaded, settings, "{}", name);
    }
}
