use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use lodcrate_core::{GeometryData, Point3f, ProcessContext};
use lodcrate_remeshing::{Remesher, RemeshingSettings};

/// UV sphere with `rings` latitude bands
fn sphere(rings: u32) -> GeometryData {
    let segments = rings * 2;
    let mut coords = vec![Point3f::new(0.0, 0.0, 1.0)];
    for r in 1..rings {
        let theta = std::f32::consts::PI * r as f32 / rings as f32;
        for s in 0..segments {
            let phi = std::f32::consts::TAU * s as f32 / segments as f32;
            coords.push(Point3f::new(theta.sin() * phi.cos(), theta.sin() * phi.sin(), theta.cos()));
        }
    }
    coords.push(Point3f::new(0.0, 0.0, -1.0));
    let bottom = coords.len() as u32 - 1;
    let ring = |r: u32, s: u32| 1 + (r - 1) * segments + s % segments;
    let mut ids = Vec::new();
    for s in 0..segments {
        ids.push([0, ring(1, s), ring(1, s + 1)]);
        ids.push([bottom, ring(rings - 1, s + 1), ring(rings - 1, s)]);
    }
    for r in 1..rings - 1 {
        for s in 0..segments {
            ids.push([ring(r, s), ring(r + 1, s), ring(r + 1, s + 1)]);
            ids.push([ring(r, s), ring(r + 1, s + 1), ring(r, s + 1)]);
        }
    }
    GeometryData::from_triangles(coords, ids)
}

fn bench_remesh(c: &mut Criterion) {
    let mut group = c.benchmark_group("remesh_sphere");
    group.sample_size(10);
    let source = sphere(32);
    for size in [50u32, 100, 200] {
        let remesher = Remesher::new(RemeshingSettings::with_on_screen_size(size));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| {
                remesher
                    .remesh_geometry(black_box(&source), &ProcessContext::new())
                    .unwrap()
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_remesh);
criterion_main!(benches);
