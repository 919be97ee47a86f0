use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use lodcrate_casting::{
    build_mapping_images, CastInput, ColorCaster, MappingImageSettings, MaterialCaster,
};
use lodcrate_core::{channels, Color, GeometryData, Material, MaterialTable, Point3f, ProcessContext, TextureTable};

/// Height field grid over the unit square
fn terrain(cells: u32) -> GeometryData {
    let n = cells + 1;
    let mut coords = Vec::new();
    for y in 0..n {
        for x in 0..n {
            let (u, v) = (x as f32 / cells as f32, y as f32 / cells as f32);
            coords.push(Point3f::new(u, v, 0.05 * (u * 12.0).sin() * (v * 9.0).cos()));
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
    GeometryData::from_triangles(coords, ids)
}

fn bench_mapping_image(c: &mut Criterion) {
    let mut group = c.benchmark_group("mapping_image");
    group.sample_size(10);
    let source = terrain(64);
    let destination = terrain(16);
    for size in [128u32, 256, 512] {
        let settings = MappingImageSettings::with_texture_size(size, size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| {
                let mut processed = destination.clone();
                build_mapping_images(black_box(&source), &mut processed, &settings, None, &ProcessContext::new())
                    .unwrap()
            })
        });
    }
    group.finish();
}

fn bench_color_caster(c: &mut Criterion) {
    let source = terrain(64);
    let mut destination = terrain(16);
    let settings = MappingImageSettings::with_texture_size(256, 256);
    let mapping = build_mapping_images(&source, &mut destination, &settings, None, &ProcessContext::new())
        .unwrap()
        .remove(0);
    let mut materials = MaterialTable::new();
    materials.add(Material::with_color("ground", channels::DIFFUSE, Color::new(0.4, 0.3, 0.2, 1.0)));
    let textures = TextureTable::new();
    let caster = ColorCaster::new(channels::DIFFUSE);

    c.bench_function("color_caster_256", |b| {
        b.iter(|| {
            let input = CastInput {
                mapping: black_box(&mapping),
                materials: &materials,
                textures: &textures,
                output_dir: None,
            };
            caster.cast(&input, &ProcessContext::new()).unwrap()
        })
    });
}

criterion_group!(benches, bench_mapping_image, bench_color_caster);
criterion_main!(benches);
