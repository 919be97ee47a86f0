//! Benchmarks of the edge collapse reducer on curved grids

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use lodcrate_core::{GeometryData, Point2f, Point3f, ProcessContext};
use lodcrate_simplification::{
    EdgeCollapseReducer, MeshSimplifier, ReductionHeuristics, ReductionSettings, ReductionTargets,
};

fn generate_grid(size: u32, with_uvs: bool) -> GeometryData {
    let mut coords = Vec::with_capacity((size * size) as usize);
    for y in 0..size {
        for x in 0..size {
            let fx = x as f32 / (size - 1) as f32 * std::f32::consts::PI;
            let fy = y as f32 / (size - 1) as f32 * std::f32::consts::PI;
            coords.push(Point3f::new(x as f32, y as f32, fx.sin() * fy.sin() * 2.0));
        }
    }
    let mut ids = Vec::with_capacity(((size - 1) * (size - 1) * 2) as usize);
    for y in 0..size - 1 {
        for x in 0..size - 1 {
            let tl = y * size + x;
            let tr = tl + 1;
            let bl = (y + 1) * size + x;
            let br = bl + 1;
            ids.push([tl, bl, tr]);
            ids.push([tr, bl, br]);
        }
    }
    let mut geometry = GeometryData::from_triangles(coords, ids);
    if with_uvs {
        let level = geometry.add_tex_coords("TexCoords0");
        for c in 0..geometry.corner_count() {
            let p = geometry.coords[geometry.corner_vertex(c)];
            geometry.tex_coords[level].values[c] = Point2f::new(p.x / size as f32, p.y / size as f32);
        }
    }
    geometry
}

fn bench_reduction(c: &mut Criterion) {
    let mut group = c.benchmark_group("reduction");
    group.sample_size(10);
    let ctx = ProcessContext::new();

    for &size in &[20u32, 40, 80] {
        for &with_uvs in &[false, true] {
            let geometry = generate_grid(size, with_uvs);
            let label = format!("{}t{}", geometry.triangle_count(), if with_uvs { "_uv" } else { "" });
            for heuristics in [ReductionHeuristics::Fast, ReductionHeuristics::Consistent] {
                let reducer = EdgeCollapseReducer::new(ReductionSettings {
                    reduction_heuristics: heuristics,
                    ..ReductionSettings::with_targets(ReductionTargets::triangle_ratio(0.25))
                });
                group.bench_with_input(
                    BenchmarkId::new(format!("{:?}", heuristics), &label),
                    &geometry,
                    |b, geometry| {
                        b.iter(|| black_box(reducer.simplify(black_box(geometry), &ctx).unwrap()));
                    },
                );
            }
        }
    }
    group.finish();
}

criterion_group!(benches, bench_reduction);
criterion_main!(benches);
