use lodcrate_casting::{ColorCaster, MappingImageSettings};
use lodcrate_core::{channels, GeometryData, Point3f, Scene};
use lodcrate_io::{load_scene, save_scene};
use lodcrate_pipeline::{Pipeline, ReductionPipeline, RunMode, WORKER_ENV};
use lodcrate_simplification::{ReductionSettings, ReductionTargets, SimplificationSettings};
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

const LODCRATE: &str = env!("CARGO_BIN_EXE_lodcrate");

fn grid_scene(cells: u32) -> Scene {
    let n = cells + 1;
    let mut coords = Vec::new();
    for y in 0..n {
        for x in 0..n {
            let (fx, fy) = (x as f32, y as f32);
            coords.push(Point3f::new(fx, fy, 0.2 * (fx * 0.9).sin() * (fy * 0.6).cos()));
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
    let mut scene = Scene::new();
    scene.add_mesh("grid", GeometryData::from_triangles(coords, ids));
    scene
}

fn lodcrate(args: &[&str]) -> Output {
    Command::new(LODCRATE)
        .args(args)
        .env(WORKER_ENV, LODCRATE)
        .output()
        .unwrap()
}

fn png_count(dir: &Path) -> usize {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .filter(|e| e.path().extension().is_some_and(|ext| ext == "png"))
                .count()
        })
        .unwrap_or(0)
}

fn reduce(input: &Path, dir: &Path, name: &str, new_process: bool) -> (PathBuf, PathBuf) {
    let output = dir.join(format!("{}.obj", name));
    let textures = dir.join(format!("{}_textures", name));
    let mut args = vec![
        "reduce",
        input.to_str().unwrap(),
        output.to_str().unwrap(),
        "--ratio",
        "0.5",
        "--cast",
        "Diffuse,Normals",
        "--texture-size",
        "64",
        "--output-dir",
        textures.to_str().unwrap(),
    ];
    if new_process {
        args.push("--new-process");
    }
    let result = lodcrate(&args);
    assert!(
        result.status.success(),
        "lodcrate failed: {}",
        String::from_utf8_lossy(&result.stderr)
    );
    (output, textures)
}

#[test]
fn test_reduce_same_result_in_both_run_modes() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("grid.obj");
    save_scene(&grid_scene(8), &input).unwrap();

    let (here, here_textures) = reduce(&input, dir.path(), "here", false);
    let (worker, worker_textures) = reduce(&input, dir.path(), "worker", true);

    let here = load_scene(&here).unwrap();
    let worker = load_scene(&worker).unwrap();
    assert!(here.triangle_count() <= 64);
    assert_eq!(here.triangle_count(), worker.triangle_count());
    assert_eq!(here.materials.len(), 1);
    assert_eq!(here.materials.len(), worker.materials.len());
    assert!(png_count(&here_textures) >= 2);
    assert_eq!(png_count(&here_textures), png_count(&worker_textures));
}

#[test]
fn test_pipeline_runs_in_worker_process() {
    let mut pipeline = ReductionPipeline::default();
    pipeline.settings.simplification =
        SimplificationSettings::from_reduction(ReductionSettings::with_targets(ReductionTargets::triangle_ratio(0.5)));
    pipeline.settings.mapping_image = MappingImageSettings::with_texture_size(32, 32);
    pipeline.add_material_caster(ColorCaster::new(channels::DIFFUSE), 0);

    std::env::set_var(WORKER_ENV, LODCRATE);
    let mut here = grid_scene(8);
    let mut worker = grid_scene(8);
    let a = pipeline.run_scene(&mut here, RunMode::RunInThisProcess).unwrap();
    let b = pipeline.run_scene(&mut worker, RunMode::RunInNewProcess).unwrap();

    assert!(!a.has_errors() && !b.has_errors(), "{:?} {:?}", a.log.errors(), b.log.errors());
    assert_eq!(here.triangle_count(), worker.triangle_count());
    assert_eq!(here.materials.len(), worker.materials.len());
    assert_eq!(here.textures.len(), worker.textures.len());
    assert_eq!(a.textures.len(), b.textures.len());
}

#[test]
fn test_failures_exit_non_zero() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("missing.obj");
    let output = dir.path().join("out.obj");
    let result = lodcrate(&["reduce", missing.to_str().unwrap(), output.to_str().unwrap()]);
    assert!(!result.status.success());

    // A missing selection set is a processing log error
    let input = dir.path().join("grid.obj");
    save_scene(&grid_scene(4), &input).unwrap();
    let result = lodcrate(&[
        "reduce",
        input.to_str().unwrap(),
        output.to_str().unwrap(),
        "--selection",
        "NoSuchSet",
    ]);
    assert!(!result.status.success());
    assert!(String::from_utf8_lossy(&result.stderr).to_lowercase().contains("error"));
}

#[test]
fn test_info_lists_the_scene() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("grid.obj");
    save_scene(&grid_scene(2), &input).unwrap();
    let result = lodcrate(&["info", input.to_str().unwrap()]);
    assert!(result.status.success());
    let stdout = String::from_utf8_lossy(&result.stdout);
    assert!(stdout.contains("triangles: 8"), "{}", stdout);
}
