//! Texture coordinate generation
//!
//! Triangles are grouped into charts, every chart is flattened to 2D and
//! the charts are packed into the texture with a shelf packer. All charts of
//! one output material share a single scale, so texel density is uniform
//! over the surface.

use crate::settings::{ChartAggregatorMode, MappingImageOutputMaterialSettings, MappingImageSettings};
use lodcrate_core::{Error, GeometryData, Point2f, Point3f, Result, Vector3f};
use std::collections::{HashMap, VecDeque};

/// Largest angle between a triangle and the average normal of its chart
pub const CHART_NORMAL_ANGLE: f32 = 50.0;

/// Edge directions tried when orienting a flattened chart
const ROTATION_CANDIDATES: usize = 16;

/// A group of triangles flattened to 2D chart space
#[derive(Debug, Clone, PartialEq)]
pub struct Chart {
    pub triangles: Vec<usize>,
    /// Flattened corners of each triangle, with the chart minimum at the origin
    pub corners: Vec<[Point2f; 3]>,
    pub width: f32,
    pub height: f32,
}

impl Chart {
    fn from_corners(triangles: Vec<usize>, mut corners: Vec<[Point2f; 3]>) -> Self {
        let mut min = Point2f::new(f32::INFINITY, f32::INFINITY);
        let mut max = Point2f::new(f32::NEG_INFINITY, f32::NEG_INFINITY);
        for p in corners.iter().flatten() {
            min = Point2f::new(min.x.min(p.x), min.y.min(p.y));
            max = Point2f::new(max.x.max(p.x), max.y.max(p.y));
        }
        if triangles.is_empty() {
            min = Point2f::origin();
            max = Point2f::origin();
        }
        for p in corners.iter_mut().flatten() {
            *p = Point2f::new(p.x - min.x, p.y - min.y);
        }
        Self {
            triangles,
            corners,
            width: max.x - min.x,
            height: max.y - min.y,
        }
    }
}

/// Packed position of every rectangle, in texels, and the common scale
#[derive(Debug, Clone, PartialEq)]
pub struct Packing {
    pub scale: f32,
    pub offsets: Vec<[f32; 2]>,
}

/// Triangle neighbours across shared edges
fn triangle_neighbours(geometry: &GeometryData) -> Vec<Vec<usize>> {
    let mut neighbours = vec![Vec::new(); geometry.triangle_count()];
    for (_, triangles) in geometry.edge_triangles() {
        for &a in &triangles {
            for &b in &triangles {
                if a != b && !neighbours[a].contains(&b) {
                    neighbours[a].push(b);
                }
            }
        }
    }
    neighbours
}

/// Grow planar charts over `triangles`. Seeds are taken largest first and a
/// neighbour joins while it stays within [`CHART_NORMAL_ANGLE`] of the
/// chart's area weighted normal.
pub fn planar_charts(geometry: &GeometryData, triangles: &[usize]) -> Vec<Vec<usize>> {
    let neighbours = triangle_neighbours(geometry);
    let mut in_scope = vec![false; geometry.triangle_count()];
    for &t in triangles {
        in_scope[t] = true;
    }
    let mut order = triangles.to_vec();
    order.sort_by(|&a, &b| geometry.triangle_area(b).total_cmp(&geometry.triangle_area(a)));

    let cos_limit = CHART_NORMAL_ANGLE.to_radians().cos();
    let mut assigned = vec![false; geometry.triangle_count()];
    let mut charts = Vec::new();
    for &seed in &order {
        if assigned[seed] {
            continue;
        }
        assigned[seed] = true;
        let mut chart = vec![seed];
        let mut normal_sum = geometry.triangle_normal(seed) * geometry.triangle_area(seed);
        let mut queue = VecDeque::from([seed]);
        while let Some(t) = queue.pop_front() {
            for &n in &neighbours[t] {
                if assigned[n] || !in_scope[n] {
                    continue;
                }
                let normal = geometry.triangle_normal(n);
                let average = normal_sum.try_normalize(f32::EPSILON);
                let fits = match average {
                    Some(avg) => normal == Vector3f::zeros() || normal.dot(&avg) >= cos_limit,
                    None => true,
                };
                if fits {
                    assigned[n] = true;
                    normal_sum += normal * geometry.triangle_area(n);
                    chart.push(n);
                    queue.push_back(n);
                }
            }
        }
        charts.push(chart);
    }
    charts
}

/// Project a chart onto its best fit plane and turn it to a tight bounding
/// box
pub fn flatten_chart(geometry: &GeometryData, triangles: Vec<usize>) -> Chart {
    let normal = triangles
        .iter()
        .map(|&t| geometry.triangle_normal(t) * geometry.triangle_area(t))
        .sum::<Vector3f>()
        .try_normalize(f32::EPSILON)
        .unwrap_or_else(Vector3f::z);
    let helper = if normal.x.abs() < 0.9 { Vector3f::x() } else { Vector3f::y() };
    let u = normal.cross(&helper).normalize();
    let v = normal.cross(&u);
    let origin = triangles
        .first()
        .map(|&t| geometry.triangle_positions(t)[0])
        .unwrap_or_else(Point3f::origin);

    let project = |p: &Point3f| {
        let d = p - origin;
        Point2f::new(d.dot(&u), d.dot(&v))
    };
    let corners: Vec<[Point2f; 3]> = triangles
        .iter()
        .map(|&t| geometry.triangle_positions(t).map(|p| project(&p)))
        .collect();
    Chart::from_corners(triangles, rotate_to_smallest_box(corners))
}

/// Rotate flattened corners so the chart's bounding box is as small as the
/// direction of one of its longest edges can make it
fn rotate_to_smallest_box(mut corners: Vec<[Point2f; 3]>) -> Vec<[Point2f; 3]> {
    let mut edges: Vec<(f32, f32)> = corners
        .iter()
        .flat_map(|c| (0..3).map(move |k| c[(k + 1) % 3] - c[k]))
        .filter_map(|d| {
            let len = d.norm();
            (len > f32::EPSILON).then(|| (len, d.y.atan2(d.x)))
        })
        .collect();
    edges.sort_by(|a, b| b.0.total_cmp(&a.0));
    edges.truncate(ROTATION_CANDIDATES);

    let box_area = |angle: f32| {
        let (sin, cos) = (-angle).sin_cos();
        let mut min = (f32::INFINITY, f32::INFINITY);
        let mut max = (f32::NEG_INFINITY, f32::NEG_INFINITY);
        for p in corners.iter().flatten() {
            let (x, y) = (p.x * cos - p.y * sin, p.x * sin + p.y * cos);
            min = (min.0.min(x), min.1.min(y));
            max = (max.0.max(x), max.1.max(y));
        }
        (max.0 - min.0) * (max.1 - min.1)
    };
    let Some(best) = edges
        .iter()
        .map(|&(_, angle)| (box_area(angle), angle))
        .min_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(_, angle)| angle)
    else {
        return corners;
    };
    let (sin, cos) = (-best).sin_cos();
    for p in corners.iter_mut().flatten() {
        *p = Point2f::new(p.x * cos - p.y * sin, p.x * sin + p.y * cos);
    }
    corners
}

/// Charts taken from an existing texture coordinate level: triangles sharing
/// an edge whose texture coordinates agree on both ends belong together
pub fn tex_coord_charts(geometry: &GeometryData, level: usize, triangles: &[usize]) -> Vec<Chart> {
    let Some(uvs) = geometry.tex_coords(level).map(|l| &l.values) else {
        return Vec::new();
    };
    let corner_uv = |t: usize, v: u32| -> Option<Point2f> {
        let k = geometry.vertex_ids[t].iter().position(|&id| id == v)?;
        Some(uvs[t * 3 + k])
    };
    let mut in_scope = vec![false; geometry.triangle_count()];
    for &t in triangles {
        in_scope[t] = true;
    }
    let mut parent: Vec<usize> = (0..geometry.triangle_count()).collect();
    fn find(parent: &mut [usize], mut i: usize) -> usize {
        while parent[i] != i {
            parent[i] = parent[parent[i]];
            i = parent[i];
        }
        i
    }
    for ((a, b), tris) in geometry.edge_triangles() {
        for pair in tris.windows(2) {
            let (t0, t1) = (pair[0], pair[1]);
            if !in_scope[t0] || !in_scope[t1] {
                continue;
            }
            let same = |v: u32| match (corner_uv(t0, v), corner_uv(t1, v)) {
                (Some(x), Some(y)) => (x - y).norm() < 1e-6,
                _ => false,
            };
            if same(a) && same(b) {
                let (r0, r1) = (find(&mut parent, t0), find(&mut parent, t1));
                parent[r0] = r1;
            }
        }
    }
    let mut groups: HashMap<usize, Vec<usize>> = HashMap::new();
    for &t in triangles {
        let root = find(&mut parent, t);
        groups.entry(root).or_default().push(t);
    }
    let mut roots: Vec<usize> = groups.keys().copied().collect();
    roots.sort_unstable();
    roots
        .into_iter()
        .filter_map(|r| groups.remove(&r))
        .map(|tris| {
            let corners = tris
                .iter()
                .map(|&t| [uvs[t * 3], uvs[t * 3 + 1], uvs[t * 3 + 2]])
                .collect();
            Chart::from_corners(tris, corners)
        })
        .collect()
}

fn shelf_pack(sizes: &[(f32, f32)], order: &[usize], scale: f32, width: u32, height: u32, gutter: u32) -> Option<Vec<[f32; 2]>> {
    let margin = (gutter as f32 * 0.5).ceil();
    let gutter = gutter as f32;
    let (width, height) = (width as f32, height as f32);
    let mut offsets = vec![[0.0f32; 2]; sizes.len()];
    let mut x = margin;
    let mut y = margin;
    let mut shelf = 0.0f32;
    for &i in order {
        let w = (sizes[i].0 * scale).ceil().max(1.0);
        let h = (sizes[i].1 * scale).ceil().max(1.0);
        if x + w > width - margin {
            x = margin;
            y += shelf + gutter;
            shelf = 0.0;
        }
        if x + w > width - margin || y + h > height - margin {
            return None;
        }
        offsets[i] = [x, y];
        x += w + gutter;
        shelf = shelf.max(h);
    }
    Some(offsets)
}

/// Pack rectangles of the given chart-space sizes into a texture with one
/// common scale, as large as the texture allows
pub fn pack_rectangles(sizes: &[(f32, f32)], width: u32, height: u32, gutter: u32) -> Result<Packing> {
    if sizes.is_empty() {
        return Ok(Packing {
            scale: 1.0,
            offsets: Vec::new(),
        });
    }
    let mut order: Vec<usize> = (0..sizes.len()).collect();
    order.sort_by(|&a, &b| sizes[b].1.total_cmp(&sizes[a].1).then(sizes[b].0.total_cmp(&sizes[a].0)));

    let usable_w = width.saturating_sub(gutter).max(1) as f32;
    let usable_h = height.saturating_sub(gutter).max(1) as f32;
    let area: f32 = sizes.iter().map(|(w, h)| w * h).sum();
    let mut limit = f32::INFINITY;
    for &(w, h) in sizes {
        if w > 0.0 {
            limit = limit.min(usable_w / w);
        }
        if h > 0.0 {
            limit = limit.min(usable_h / h);
        }
    }
    let mut scale = if area > 0.0 {
        (usable_w * usable_h / area).sqrt().min(limit)
    } else if limit.is_finite() {
        limit
    } else {
        1.0
    };

    let mut attempts = 0;
    let mut fitted = loop {
        if let Some(offsets) = shelf_pack(sizes, &order, scale, width, height, gutter) {
            break (scale, offsets);
        }
        attempts += 1;
        if attempts > 200 || scale < 1e-12 {
            return Err(Error::Algorithm(format!(
                "{} charts do not fit into a {}x{} texture with gutter {}",
                sizes.len(),
                width,
                height,
                gutter
            )));
        }
        scale *= 0.9;
    };

    // Tighten between the fitting scale and the last failing one
    if attempts > 0 {
        let mut lo = fitted.0;
        let mut hi = fitted.0 / 0.9;
        for _ in 0..8 {
            let mid = 0.5 * (lo + hi);
            match shelf_pack(sizes, &order, mid, width, height, gutter) {
                Some(offsets) => {
                    lo = mid;
                    fitted = (mid, offsets);
                }
                None => hi = mid,
            }
        }
    }
    Ok(Packing {
        scale: fitted.0,
        offsets: fitted.1,
    })
}

/// Write packed chart coordinates into a texture coordinate level
fn write_charts(
    geometry: &mut GeometryData,
    level: usize,
    charts: &[Chart],
    output: &MappingImageOutputMaterialSettings,
) -> Result<()> {
    let sizes: Vec<(f32, f32)> = charts.iter().map(|c| (c.width, c.height)).collect();
    let packing = pack_rectangles(&sizes, output.texture_width, output.texture_height, output.gutter_space)?;
    let (w, h) = (output.texture_width as f32, output.texture_height as f32);
    let values = &mut geometry.tex_coords[level].values;
    for (chart, offset) in charts.iter().zip(&packing.offsets) {
        for (&t, corners) in chart.triangles.iter().zip(&chart.corners) {
            for (k, p) in corners.iter().enumerate() {
                let px = offset[0] + p.x * packing.scale;
                let py = offset[1] + p.y * packing.scale;
                values[t * 3 + k] = Point2f::new(px / w, 1.0 - py / h);
            }
        }
    }
    tracing::debug!(
        "packed {} charts into {}x{} at {:.3} texels per unit",
        charts.len(),
        output.texture_width,
        output.texture_height,
        packing.scale
    );
    Ok(())
}

/// Generate the texture coordinate level named by the settings for every
/// output material. Returns the level index.
pub fn generate_tex_coords(geometry: &mut GeometryData, settings: &MappingImageSettings) -> Result<usize> {
    let existing = geometry.tex_coords.first().map(|_| 0);
    let level = geometry.add_tex_coords(&settings.tex_coord_name);
    for output in 0..settings.output_material_count() {
        let output_settings = settings.output_material(output).cloned().unwrap_or_default();
        let triangles: Vec<usize> = (0..geometry.triangle_count())
            .filter(|&t| settings.output_for_material(geometry.material_id(t)) == output)
            .collect();
        if triangles.is_empty() {
            continue;
        }
        let charts = match (settings.chart_aggregator_mode, existing) {
            (ChartAggregatorMode::TexCoordProportions, Some(source_level)) if source_level != level => {
                tex_coord_charts(geometry, source_level, &triangles)
            }
            _ => planar_charts(geometry, &triangles)
                .into_iter()
                .map(|tris| flatten_chart(geometry, tris))
                .collect(),
        };
        write_charts(geometry, level, &charts, &output_settings)?;
    }
    Ok(level)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    pub(crate) fn unit_cube() -> GeometryData {
        let coords = vec![
            Point3f::new(0.0, 0.0, 0.0),
            Point3f::new(1.0, 0.0, 0.0),
            Point3f::new(1.0, 1.0, 0.0),
            Point3f::new(0.0, 1.0, 0.0),
            Point3f::new(0.0, 0.0, 1.0),
            Point3f::new(1.0, 0.0, 1.0),
            Point3f::new(1.0, 1.0, 1.0),
            Point3f::new(0.0, 1.0, 1.0),
        ];
        let ids = vec![
            [0, 2, 1],
            [0, 3, 2],
            [4, 5, 6],
            [4, 6, 7],
            [0, 1, 5],
            [0, 5, 4],
            [2, 3, 7],
            [2, 7, 6],
            [1, 2, 6],
            [1, 6, 5],
            [0, 4, 7],
            [0, 7, 3],
        ];
        GeometryData::from_triangles(coords, ids)
    }

    #[test]
    fn test_cube_faces_become_charts() {
        let cube = unit_cube();
        let all: Vec<usize> = (0..12).collect();
        let charts = planar_charts(&cube, &all);
        assert_eq!(charts.len(), 6);
        assert!(charts.iter().all(|c| c.len() == 2));
        let flat = flatten_chart(&cube, charts[0].clone());
        assert_relative_eq!(flat.width * flat.height, 1.0, epsilon = 1e-4);
    }

    #[test]
    fn test_packing_stays_inside_with_gutter() {
        let sizes = vec![(1.0, 1.0); 6];
        let packing = pack_rectangles(&sizes, 256, 256, 4).unwrap();
        let side = packing.scale.ceil();
        for (i, a) in packing.offsets.iter().enumerate() {
            assert!(a[0] >= 2.0 && a[1] >= 2.0);
            assert!(a[0] + side <= 254.0 && a[1] + side <= 254.0);
            for b in &packing.offsets[i + 1..] {
                let apart = (a[0] - b[0]).abs() >= side + 4.0 || (a[1] - b[1]).abs() >= side + 4.0;
                assert!(apart);
            }
        }
        assert!(packing.scale > 60.0);
    }

    #[test]
    fn test_too_many_charts_fail() {
        let sizes = vec![(1.0, 1.0); 500];
        assert!(pack_rectangles(&sizes, 16, 16, 4).is_err());
    }

    #[test]
    fn test_generated_coordinates_in_unit_square() {
        let mut cube = unit_cube();
        let settings = MappingImageSettings::with_texture_size(128, 128);
        let level = generate_tex_coords(&mut cube, &settings).unwrap();
        assert_eq!(cube.tex_coords[level].name, "MaterialLOD");
        for uv in &cube.tex_coords[level].values {
            assert!((0.0..=1.0).contains(&uv.x) && (0.0..=1.0).contains(&uv.y));
        }
        // Uniform texel density: every face maps to the same texture area
        let areas: Vec<f32> = (0..12)
            .map(|t| {
                let uv = &cube.tex_coords[level].values[t * 3..t * 3 + 3];
                ((uv[1] - uv[0]).perp(&(uv[2] - uv[0]))).abs() * 0.5
            })
            .collect();
        for a in &areas {
            assert_relative_eq!(*a, areas[0], epsilon = 1e-3);
        }
    }

    #[test]
    fn test_existing_charts_are_kept() {
        let mut quad = GeometryData::from_triangles(
            vec![
                Point3f::new(0.0, 0.0, 0.0),
                Point3f::new(1.0, 0.0, 0.0),
                Point3f::new(1.0, 1.0, 0.0),
                Point3f::new(0.0, 1.0, 0.0),
            ],
            vec![[0, 1, 2], [0, 2, 3]],
        );
        let level = quad.add_tex_coords("uv");
        quad.tex_coords[level].values = vec![
            Point2f::new(0.0, 0.0),
            Point2f::new(1.0, 0.0),
            Point2f::new(1.0, 1.0),
            Point2f::new(0.0, 0.0),
            Point2f::new(1.0, 1.0),
            Point2f::new(0.0, 1.0),
        ];
        let charts = tex_coord_charts(&quad, level, &[0, 1]);
        assert_eq!(charts.len(), 1);

        // Split the second triangle off in texture space
        quad.tex_coords[level].values[5] = Point2f::new(0.0, 2.0);
        quad.tex_coords[level].values[3] = Point2f::new(0.5, 0.0);
        assert_eq!(tex_coord_charts(&quad, level, &[0, 1]).len(), 2);
    }
}
