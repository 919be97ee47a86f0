use lodcrate_casting::{
    build_mapping_images, flipbook, CastInput, Caster, ColorCaster, FlipbookSettings, MappingImageSettings,
    MaterialCaster, NormalCaster, OpacityCaster,
};
use lodcrate_core::{
    channels, Color, GeometryData, Material, MaterialTable, Point2f, Point3f, ProcessContext, ShadingNetwork,
    Texture, TextureImage, TextureTable,
};
use lodcrate_io::{load_texture_image, PixelFormat};
use lodcrate_simplification::{EdgeCollapseReducer, MeshSimplifier};

/// Flat grid over the unit square with texture coordinates equal to the
/// position
fn textured_grid(cells: u32) -> GeometryData {
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
        .map(|&v| {
            let p = grid.coords[v as usize];
            Point2f::new(p.x, p.y)
        })
        .collect();
    grid
}

fn two_tone_material() -> (MaterialTable, TextureTable) {
    let mut image = TextureImage::new(16, 16, Color::new(0.0, 0.0, 1.0, 1.0));
    for y in 0..16 {
        for x in 8..16 {
            image.set(x, y, Color::new(1.0, 1.0, 0.0, 1.0));
        }
    }
    let mut textures = TextureTable::new();
    textures.add(Texture::from_image("two_tone", image));
    let mut material = Material::new("ground");
    material.set_shading_network(channels::DIFFUSE, ShadingNetwork::texture("two_tone", 0));
    let mut materials = MaterialTable::new();
    materials.add(material);
    (materials, textures)
}

#[test]
fn test_reduced_grid_casts_to_png() {
    let source = textured_grid(16);
    let mut processed = EdgeCollapseReducer::with_triangle_ratio(0.25)
        .simplify(&source, &ProcessContext::new())
        .unwrap();
    assert!(processed.triangle_count() < source.triangle_count());

    let settings = MappingImageSettings::with_texture_size(64, 64);
    let images = build_mapping_images(&source, &mut processed, &settings, None, &ProcessContext::new()).unwrap();
    assert_eq!(images.len(), 1);
    let mapping = &images[0];
    assert!(mapping.occupied_texels() > 64 * 64 / 4);
    assert!(processed.tex_coords_by_name("MaterialLOD").is_some());
    assert!(processed.tangents.is_some());

    let dir = tempfile::tempdir().unwrap();
    let (materials, textures) = two_tone_material();
    let input = CastInput {
        mapping,
        materials: &materials,
        textures: &textures,
        output_dir: Some(dir.path()),
    };
    let casters = vec![
        Caster::from(ColorCaster::new(channels::DIFFUSE)),
        Caster::from(NormalCaster::default()),
    ];
    for caster in &casters {
        let output = caster.cast(&input, &ProcessContext::new()).unwrap();
        let path = output.path.unwrap();
        assert!(path.exists(), "{} was not written", path.display());
        let loaded = load_texture_image(&path).unwrap();
        assert_eq!((loaded.width, loaded.height), (64, 64));
    }

    // Both tones make it into the cast diffuse map
    let diffuse = load_texture_image(&dir.path().join("Diffuse.png")).unwrap();
    assert!(diffuse.pixels.iter().any(|p| p.b > 0.9 && p.r < 0.1));
    assert!(diffuse.pixels.iter().any(|p| p.r > 0.9 && p.b < 0.1));
    // A flat surface casts a flat tangent space normal map
    let normals = load_texture_image(&dir.path().join("Normals.png")).unwrap();
    assert!(normals.pixels.iter().all(|p| p.b > 0.95));
}

#[test]
fn test_flipbook_opacity_shows_silhouette() {
    let source = textured_grid(4);
    let settings = MappingImageSettings {
        maximum_layers: 4,
        ..MappingImageSettings::with_texture_size(64, 64)
    };
    let flip = FlipbookSettings {
        number_of_views: 4,
        view_direction: -lodcrate_core::Vector3f::z(),
        up_vector: lodcrate_core::Vector3f::y(),
    };
    let impostor = flipbook(&source, &flip, &settings).unwrap();
    let mapping = impostor.build_mapping_image(&source, &settings, &ProcessContext::new()).unwrap();
    let (materials, textures) = two_tone_material();
    let input = CastInput {
        mapping: &mapping,
        materials: &materials,
        textures: &textures,
        output_dir: None,
    };
    let caster = OpacityCaster {
        settings: lodcrate_casting::CasterSettings {
            output_pixel_format: PixelFormat::R8,
            fill_mode: lodcrate_casting::FillMode::NoFill,
            dilation: 0,
            ..OpacityCaster::default().settings
        },
    };
    let image = caster.cast(&input, &ProcessContext::new()).unwrap().image.unwrap();
    // The grid fills the middle of the front view tile, tile corners stay
    // empty
    let opaque = image.pixels.iter().filter(|p| p.r > 0.99).count();
    assert!(opaque > 200, "only {opaque} opaque texels");
    assert!(image.get(0, 0).r < 0.01);
}
