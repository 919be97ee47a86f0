//! Benchmarks for OBJ and GLB scene export and import

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use lodcrate_core::{GeometryData, Point3f, Scene};
use lodcrate_io::{load_scene, save_scene, scene_to_glb};

/// Generate a regular grid mesh with `n * n` quads
fn generate_grid_scene(n: usize) -> Scene {
    let mut coords = Vec::with_capacity((n + 1) * (n + 1));
    for y in 0..=n {
        for x in 0..=n {
            let (fx, fy) = (x as f32 / n as f32, y as f32 / n as f32);
            coords.push(Point3f::new(fx, fy, (fx * 6.0).sin() * (fy * 6.0).cos() * 0.1));
        }
    }
    let mut triangles = Vec::with_capacity(n * n * 2);
    let row = (n + 1) as u32;
    for y in 0..n as u32 {
        for x in 0..n as u32 {
            let i = y * row + x;
            triangles.push([i, i + 1, i + row + 1]);
            triangles.push([i, i + row + 1, i + row]);
        }
    }
    let mut scene = Scene::new();
    scene.add_mesh("Grid", GeometryData::from_triangles(coords, triangles));
    scene
}

fn benchmark_glb_encoding(c: &mut Criterion) {
    let mut group = c.benchmark_group("glb_encoding");
    for n in [32usize, 128, 256] {
        let scene = generate_grid_scene(n);
        group.throughput(Throughput::Elements((n * n * 2) as u64));
        group.bench_with_input(BenchmarkId::from_parameter(n * n * 2), &scene, |b, scene| {
            b.iter(|| black_box(scene_to_glb(scene).expect("encode")));
        });
    }
    group.finish();
}

fn benchmark_round_trip(c: &mut Criterion) {
    let dir = tempfile::tempdir().expect("temp dir");
    let scene = generate_grid_scene(128);
    let mut group = c.benchmark_group("scene_round_trip");
    for extension in ["obj", "glb"] {
        let path = dir.path().join(format!("grid.{}", extension));
        group.bench_function(extension, |b| {
            b.iter(|| {
                save_scene(&scene, &path).expect("save");
                black_box(load_scene(&path).expect("load"))
            });
        });
    }
    group.finish();
}

criterion_group!(benches, benchmark_glb_encoding, benchmark_round_trip);
criterion_main!(benches);
