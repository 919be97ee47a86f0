use super::{check_source, output_material, rect_uvs, Impostor, QuadMesh};
use crate::casters::tangent_frame;
use crate::charts::{flatten_chart, pack_rectangles, planar_charts, Chart};
use crate::mapping::Projection;
use crate::settings::MappingImageSettings;
use lodcrate_core::{Bounded, Error, GeometryData, Point2f, Point3f, ProcessContext, Result, Vector3f};
use lodcrate_simplification::{EdgeCollapseReducer, MeshSimplifier};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum BillboardMode {
    /// Planes fitted to the outside of closed geometry
    #[default]
    OuterShell,
    /// Planes fitted to foliage, optionally keeping a reduced trunk
    Foliage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FoliageSettings {
    pub separate_trunk_and_foliage: bool,
    /// Components with fewer triangles than this share of the largest
    /// component are foliage
    pub separate_foliage_triangle_ratio: f32,
    /// Components with fewer triangles than this are foliage
    pub separate_foliage_triangle_threshold: u32,
    /// Components with less than this share of the total area are foliage
    pub separate_foliage_area_threshold: f32,
    /// Components smaller than this share of the whole diagonal are foliage
    pub separate_foliage_size_threshold: f32,
    /// Triangle ratio the trunk is reduced to
    pub trunk_reduction_ratio: f32,
}

impl Default for FoliageSettings {
    fn default() -> Self {
        Self {
            separate_trunk_and_foliage: false,
            separate_foliage_triangle_ratio: 0.5,
            separate_foliage_triangle_threshold: 10,
            separate_foliage_area_threshold: 0.1,
            separate_foliage_size_threshold: 0.1,
            trunk_reduction_ratio: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BillboardCloudSettings {
    pub billboard_mode: BillboardMode,
    /// Higher keeps planes that cover less of the surface
    pub billboard_density: f32,
    /// Higher fits planes with tighter angle and distance tolerances
    pub geometric_complexity: f32,
    pub max_plane_count: u32,
    /// Add a back facing quad for every plane
    pub two_sided: bool,
    pub foliage_settings: FoliageSettings,
}

impl Default for BillboardCloudSettings {
    fn default() -> Self {
        Self {
            billboard_mode: BillboardMode::OuterShell,
            billboard_density: 0.5,
            geometric_complexity: 0.5,
            max_plane_count: 10,
            two_sided: false,
            foliage_settings: FoliageSettings::default(),
        }
    }
}

impl BillboardCloudSettings {
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("billboard density", self.billboard_density),
            ("geometric complexity", self.geometric_complexity),
            ("trunk reduction ratio", self.foliage_settings.trunk_reduction_ratio),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(Error::InvalidSettings(format!("{} must be in [0, 1], got {}", name, value)));
            }
        }
        if self.max_plane_count == 0 {
            return Err(Error::InvalidSettings("billboard cloud needs at least one plane".to_string()));
        }
        Ok(())
    }

    /// Largest angle in degrees between a triangle and its plane
    pub fn angle_tolerance(&self) -> f32 {
        45.0 + (10.0 - 45.0) * self.geometric_complexity
    }

    /// Largest distance from a triangle to its plane, relative to the
    /// source diagonal
    pub fn distance_tolerance(&self) -> f32 {
        0.1 + (0.01 - 0.1) * self.geometric_complexity
    }
}

/// A fitted plane `normal · p = offset` and its triangles
#[derive(Debug, Clone)]
struct Plane {
    normal: Vector3f,
    offset: f32,
    triangles: Vec<usize>,
    area: f32,
}

impl Plane {
    fn accepts(&self, geometry: &GeometryData, t: usize, cos_tolerance: f32, distance: f32) -> bool {
        let normal = geometry.triangle_normal(t);
        normal.dot(&self.normal) >= cos_tolerance
            && geometry
                .triangle_positions(t)
                .iter()
                .all(|p| (self.normal.dot(&p.coords) - self.offset).abs() <= distance)
    }

    /// Area weighted refit to the current triangles
    fn refit(&mut self, geometry: &GeometryData) {
        let mut normal = Vector3f::zeros();
        let mut area = 0.0;
        for &t in &self.triangles {
            let a = geometry.triangle_area(t);
            normal += geometry.triangle_normal(t) * a;
            area += a;
        }
        let Some(normal) = normal.try_normalize(1e-20) else {
            return;
        };
        let offset = self
            .triangles
            .iter()
            .map(|&t| normal.dot(&geometry.triangle_centroid(t).coords) * geometry.triangle_area(t))
            .sum::<f32>()
            / area.max(f32::MIN_POSITIVE);
        self.normal = normal;
        self.offset = offset;
        self.area = area;
    }
}

/// Greedy plane fitting: repeatedly take the candidate plane that covers the
/// most unassigned area
fn fit_planes(geometry: &GeometryData, triangles: &[usize], settings: &BillboardCloudSettings) -> Vec<Plane> {
    let diagonal = geometry.bounding_box().diagonal();
    let cos_tolerance = settings.angle_tolerance().to_radians().cos();
    let distance = settings.distance_tolerance() * diagonal;
    let mut assigned = vec![false; geometry.triangle_count()];
    let mut planes: Vec<Plane> = Vec::new();

    // Candidate seeds, largest triangles first
    let mut seeds: Vec<usize> = triangles
        .iter()
        .copied()
        .filter(|&t| geometry.triangle_area(t) > 0.0)
        .collect();
    seeds.sort_by(|&a, &b| geometry.triangle_area(b).total_cmp(&geometry.triangle_area(a)));
    seeds.truncate(256);

    while planes.len() < settings.max_plane_count as usize {
        let mut best: Option<Plane> = None;
        for &seed in seeds.iter().filter(|&&t| !assigned[t]) {
            let normal = geometry.triangle_normal(seed);
            let candidate = Plane {
                normal,
                offset: normal.dot(&geometry.triangle_centroid(seed).coords),
                triangles: Vec::new(),
                area: 0.0,
            };
            let members: Vec<usize> = triangles
                .iter()
                .copied()
                .filter(|&t| !assigned[t] && candidate.accepts(geometry, t, cos_tolerance, distance))
                .collect();
            let area: f32 = members.iter().map(|&t| geometry.triangle_area(t)).sum();
            if best.as_ref().map_or(true, |b| area > b.area) {
                best = Some(Plane {
                    triangles: members,
                    area,
                    ..candidate
                });
            }
        }
        let Some(mut plane) = best.filter(|p| !p.triangles.is_empty()) else {
            break;
        };
        for &t in &plane.triangles {
            assigned[t] = true;
        }
        plane.refit(geometry);
        planes.push(plane);
    }

    // Leftover triangles join the plane facing them best
    for &t in triangles.iter().filter(|&&t| !assigned[t]) {
        let normal = geometry.triangle_normal(t);
        let facing = planes
            .iter_mut()
            .max_by(|a, b| normal.dot(&a.normal).total_cmp(&normal.dot(&b.normal)));
        if let Some(plane) = facing {
            plane.triangles.push(t);
            plane.area += geometry.triangle_area(t);
        }
    }

    // Sparse planes go first as density drops
    let total: f32 = planes.iter().map(|p| p.area).sum();
    let minimum = (1.0 - settings.billboard_density) * 0.1 * total;
    planes.sort_by(|a, b| b.area.total_cmp(&a.area));
    let keep = planes.iter().skip(1).take_while(|p| p.area >= minimum).count() + 1;
    planes.truncate(keep.min(planes.len()));
    planes
}

/// Rectangle of a plane's triangles in plane coordinates
struct PlaneRect {
    normal: Vector3f,
    offset: f32,
    u: Vector3f,
    v: Vector3f,
    min: Point2f,
    max: Point2f,
    /// Half thickness of the triangles around the plane
    depth: f32,
}

impl PlaneRect {
    fn new(geometry: &GeometryData, plane: &Plane) -> Self {
        let (u, v) = tangent_frame(&plane.normal);
        let mut min = Point2f::new(f32::INFINITY, f32::INFINITY);
        let mut max = Point2f::new(f32::NEG_INFINITY, f32::NEG_INFINITY);
        let mut depth = 0.0f32;
        for &t in &plane.triangles {
            for p in geometry.triangle_positions(t) {
                let (a, b) = (u.dot(&p.coords), v.dot(&p.coords));
                min = Point2f::new(min.x.min(a), min.y.min(b));
                max = Point2f::new(max.x.max(a), max.y.max(b));
                depth = depth.max((plane.normal.dot(&p.coords) - plane.offset).abs());
            }
        }
        Self {
            normal: plane.normal,
            offset: plane.offset,
            u,
            v,
            min,
            max,
            depth,
        }
    }

    fn size(&self) -> (f32, f32) {
        (self.max.x - self.min.x, self.max.y - self.min.y)
    }

    fn point(&self, a: f32, b: f32) -> Point3f {
        Point3f::from(self.u * a + self.v * b + self.normal * self.offset)
    }

    /// Corners counter-clockwise seen from the front, or from behind when
    /// `back` is set
    fn corners(&self, back: bool) -> [Point3f; 4] {
        let (min, max) = (self.min, self.max);
        if back {
            [
                self.point(max.x, min.y),
                self.point(min.x, min.y),
                self.point(min.x, max.y),
                self.point(max.x, max.y),
            ]
        } else {
            [
                self.point(min.x, min.y),
                self.point(max.x, min.y),
                self.point(max.x, max.y),
                self.point(min.x, max.y),
            ]
        }
    }
}

/// Split triangles into connected components and classify them as trunk
/// or foliage. Returns `(trunk, foliage)` triangle lists.
pub(crate) fn separate_trunk(geometry: &GeometryData, settings: &FoliageSettings) -> (Vec<usize>, Vec<usize>) {
    let all: Vec<usize> = (0..geometry.triangle_count()).collect();
    if !settings.separate_trunk_and_foliage {
        return (Vec::new(), all);
    }
    let mut parent: Vec<usize> = (0..geometry.vertex_count()).collect();
    fn find(parent: &mut [usize], v: usize) -> usize {
        let mut root = v;
        while parent[root] != root {
            root = parent[root];
        }
        let mut v = v;
        while parent[v] != root {
            let next = parent[v];
            parent[v] = root;
            v = next;
        }
        root
    }
    for ids in &geometry.vertex_ids {
        let a = find(&mut parent, ids[0] as usize);
        for &v in &ids[1..] {
            let b = find(&mut parent, v as usize);
            parent[b] = a;
        }
    }
    let mut components: std::collections::BTreeMap<usize, Vec<usize>> = std::collections::BTreeMap::new();
    for t in all {
        let root = find(&mut parent, geometry.vertex_ids[t][0] as usize);
        components.entry(root).or_default().push(t);
    }

    let total_area = geometry.surface_area().max(f32::MIN_POSITIVE);
    let diagonal = geometry.bounding_box().diagonal().max(f32::MIN_POSITIVE);
    let largest = components.values().map(Vec::len).max().unwrap_or(0);
    let (mut trunk, mut foliage) = (Vec::new(), Vec::new());
    for triangles in components.into_values() {
        let count = triangles.len();
        let area: f32 = triangles.iter().map(|&t| geometry.triangle_area(t)).sum();
        let size = lodcrate_core::Aabb::from_points(
            triangles.iter().flat_map(|&t| geometry.vertex_ids[t]).map(|v| &geometry.coords[v as usize]),
        )
        .diagonal();
        let is_foliage = count != largest
            && ((count as f32) < settings.separate_foliage_triangle_ratio * largest as f32
                || count < settings.separate_foliage_triangle_threshold as usize
                || area < settings.separate_foliage_area_threshold * total_area
                || size < settings.separate_foliage_size_threshold * diagonal);
        if is_foliage {
            foliage.extend(triangles);
        } else {
            trunk.extend(triangles);
        }
    }
    (trunk, foliage)
}

/// Billboard cloud impostor. Planes are fitted to the source, one quad per
/// plane (two when two sided) is packed into the atlas and mapped by
/// projection along the plane normal. In foliage mode a separated trunk is
/// reduced, kept as geometry and mapped to the closest source surface in
/// the same atlas.
pub fn billboard_cloud(
    source: &GeometryData,
    settings: &BillboardCloudSettings,
    mapping: &MappingImageSettings,
    ctx: &ProcessContext,
) -> Result<Impostor> {
    settings.validate()?;
    check_source(source)?;
    let output = output_material(mapping);

    let (trunk_triangles, foliage) = match settings.billboard_mode {
        BillboardMode::OuterShell => (Vec::new(), (0..source.triangle_count()).collect()),
        BillboardMode::Foliage => separate_trunk(source, &settings.foliage_settings),
    };
    let trunk = if trunk_triangles.is_empty() {
        None
    } else {
        let extracted = source.extract_triangles(&trunk_triangles);
        let reducer = EdgeCollapseReducer::with_triangle_ratio(settings.foliage_settings.trunk_reduction_ratio);
        Some(reducer.simplify(&extracted, &ctx.sub_range(0.0, 40.0))?)
    };
    ctx.step(40.0)?;

    let planes = if foliage.is_empty() {
        Vec::new()
    } else {
        fit_planes(source, &foliage, settings)
    };
    let rects: Vec<PlaneRect> = planes.iter().map(|p| PlaneRect::new(source, p)).collect();
    tracing::debug!(
        "billboard cloud: {} planes over {} triangles, trunk {} triangles",
        rects.len(),
        foliage.len(),
        trunk.as_ref().map_or(0, GeometryData::triangle_count)
    );
    ctx.step(70.0)?;

    // One atlas rectangle per quad side, then the trunk charts
    let sides: Vec<(usize, bool)> = (0..rects.len())
        .flat_map(|i| {
            let back = settings.two_sided.then_some((i, true));
            std::iter::once((i, false)).chain(back)
        })
        .collect();
    let trunk_charts: Vec<Chart> = match &trunk {
        Some(trunk) => {
            let all: Vec<usize> = (0..trunk.triangle_count()).collect();
            planar_charts(trunk, &all).into_iter().map(|c| flatten_chart(trunk, c)).collect()
        }
        None => Vec::new(),
    };
    let mut sizes: Vec<(f32, f32)> = sides.iter().map(|&(i, _)| rects[i].size()).collect();
    sizes.extend(trunk_charts.iter().map(|c| (c.width, c.height)));
    let packing = pack_rectangles(&sizes, output.texture_width, output.texture_height, output.gutter_space)?;

    let mut mesh = QuadMesh::default();
    let mut directions = Vec::new();
    let diagonal = source.bounding_box().diagonal();
    let mut depth = settings.distance_tolerance() * diagonal;
    for (k, &(i, back)) in sides.iter().enumerate() {
        let rect = &rects[i];
        let (w, h) = rect.size();
        let mut uvs = rect_uvs(packing.offsets[k], [w * packing.scale, h * packing.scale], &output);
        if back {
            uvs.swap(0, 1);
            uvs.swap(2, 3);
        }
        mesh.push_quad(rect.corners(back), uvs);
        let direction = if back { rect.normal } else { -rect.normal };
        directions.extend([Some(direction), Some(direction)]);
        depth = depth.max(rect.depth * 1.5);
    }

    if let Some(trunk) = &trunk {
        let (w, h) = (output.texture_width as f32, output.texture_height as f32);
        let mut uvs = vec![Point2f::origin(); trunk.corner_count()];
        for (k, chart) in trunk_charts.iter().enumerate() {
            let offset = packing.offsets[sides.len() + k];
            for (&t, corners) in chart.triangles.iter().zip(&chart.corners) {
                for (c, p) in corners.iter().enumerate() {
                    let px = offset[0] + p.x * packing.scale;
                    let py = offset[1] + p.y * packing.scale;
                    uvs[t * 3 + c] = Point2f::new(px / w, 1.0 - py / h);
                }
            }
        }
        mesh.push_triangles(trunk, &uvs);
        directions.extend(std::iter::repeat(None).take(trunk.triangle_count()));
    }
    if mesh.triangle_count() == 0 {
        return Err(Error::Algorithm("billboard cloud produced no geometry".to_string()));
    }

    let geometry = mesh.into_geometry(&mapping.tex_coord_name);
    Ok(Impostor::new(geometry.clone(), geometry, Projection { directions, depth }))
}

#[cfg(test)]
mod tests {
    use super::super::test_support::box_geometry;
    use super::*;
    use approx::assert_relative_eq;

    fn settings() -> BillboardCloudSettings {
        BillboardCloudSettings {
            billboard_density: 1.0,
            ..BillboardCloudSettings::default()
        }
    }

    #[test]
    fn test_tolerances_follow_complexity() {
        let low = BillboardCloudSettings {
            geometric_complexity: 0.0,
            ..BillboardCloudSettings::default()
        };
        assert_relative_eq!(low.angle_tolerance(), 45.0);
        assert_relative_eq!(low.distance_tolerance(), 0.1);
        let high = BillboardCloudSettings {
            geometric_complexity: 1.0,
            ..low
        };
        assert_relative_eq!(high.angle_tolerance(), 10.0);
        assert_relative_eq!(high.distance_tolerance(), 0.01);
    }

    #[test]
    fn test_box_gets_one_plane_per_face() {
        let source = box_geometry(Point3f::new(0.0, 0.0, 0.0), Point3f::new(1.0, 1.0, 1.0));
        let all: Vec<usize> = (0..12).collect();
        let planes = fit_planes(&source, &all, &settings());
        assert_eq!(planes.len(), 6);
        for plane in &planes {
            assert_eq!(plane.triangles.len(), 2);
            assert_relative_eq!(plane.area, 1.0, epsilon = 1e-5);
        }

        let capped = BillboardCloudSettings {
            max_plane_count: 4,
            ..settings()
        };
        let planes = fit_planes(&source, &all, &capped);
        assert_eq!(planes.len(), 4);
        assert_eq!(planes.iter().map(|p| p.triangles.len()).sum::<usize>(), 12);
    }

    #[test]
    fn test_billboard_cloud_maps_every_quad() {
        let source = box_geometry(Point3f::new(0.0, 0.0, 0.0), Point3f::new(1.0, 1.0, 1.0));
        let mapping = MappingImageSettings::with_texture_size(128, 128);
        let impostor = billboard_cloud(&source, &settings(), &mapping, &ProcessContext::new()).unwrap();
        assert_eq!(impostor.geometry.triangle_count(), 12);
        assert!(impostor.projection.directions.iter().all(Option::is_some));
        let image = impostor
            .build_mapping_image(&source, &mapping, &ProcessContext::new())
            .unwrap();
        // Six equal squares take a good share of the atlas
        assert!(image.occupied_texels() > 128 * 128 / 4);

        let two_sided = BillboardCloudSettings {
            two_sided: true,
            ..settings()
        };
        let impostor = billboard_cloud(&source, &two_sided, &mapping, &ProcessContext::new()).unwrap();
        assert_eq!(impostor.geometry.triangle_count(), 24);
    }

    #[test]
    fn test_foliage_keeps_the_trunk() {
        // A tall trunk box and two small leaf quads floating beside it
        let mut source = box_geometry(Point3f::new(0.0, 0.0, 0.0), Point3f::new(0.2, 2.0, 0.2));
        for x in [1.0f32, -1.0] {
            source.append(&GeometryData::from_triangles(
                vec![
                    Point3f::new(x, 1.5, 0.0),
                    Point3f::new(x + 0.2, 1.5, 0.0),
                    Point3f::new(x + 0.2, 1.7, 0.0),
                    Point3f::new(x, 1.7, 0.0),
                ],
                vec![[0, 1, 2], [0, 2, 3]],
            ));
        }
        let foliage_settings = FoliageSettings {
            separate_trunk_and_foliage: true,
            trunk_reduction_ratio: 1.0,
            ..FoliageSettings::default()
        };
        let (trunk, leaves) = separate_trunk(&source, &foliage_settings);
        assert_eq!(trunk.len(), 12);
        assert_eq!(leaves.len(), 4);

        let settings = BillboardCloudSettings {
            billboard_mode: BillboardMode::Foliage,
            foliage_settings,
            ..settings()
        };
        let mapping = MappingImageSettings::with_texture_size(128, 128);
        let impostor = billboard_cloud(&source, &settings, &mapping, &ProcessContext::new()).unwrap();
        let directions = &impostor.projection.directions;
        // Leaves share one plane: one quad, then the kept trunk triangles
        assert_eq!(directions.iter().filter(|d| d.is_some()).count(), 2);
        assert_eq!(directions.iter().filter(|d| d.is_none()).count(), 12);
    }
}
