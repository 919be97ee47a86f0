use super::{check_source, output_material, rect_uvs, view_frame, Impostor, QuadMesh};
use crate::mapping::Projection;
use crate::settings::MappingImageSettings;
use lodcrate_core::{Bounded, Error, GeometryData, Result, UnitQuaternion, Vector3f};
use nalgebra::Unit;
use serde::{Deserialize, Serialize};

/// Views captured at even angles around the up axis into one atlas
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlipbookSettings {
    pub number_of_views: u32,
    /// Direction the first view looks along
    pub view_direction: Vector3f,
    pub up_vector: Vector3f,
}

impl Default for FlipbookSettings {
    fn default() -> Self {
        Self {
            number_of_views: 9,
            view_direction: -Vector3f::z(),
            up_vector: Vector3f::y(),
        }
    }
}

impl FlipbookSettings {
    pub fn validate(&self) -> Result<()> {
        if self.number_of_views == 0 || self.number_of_views > 256 {
            return Err(Error::InvalidSettings(format!(
                "flipbook views must be in 1..=256, got {}",
                self.number_of_views
            )));
        }
        Ok(())
    }

    /// Atlas columns and rows
    pub fn grid(&self) -> (u32, u32) {
        let columns = (self.number_of_views as f32).sqrt().ceil().max(1.0) as u32;
        let rows = self.number_of_views.div_ceil(columns);
        (columns, rows)
    }
}

/// Flipbook impostor: one quad facing the first view, and an atlas of
/// `number_of_views` tiles mapped by square quads around the up axis
pub fn flipbook(
    source: &GeometryData,
    settings: &FlipbookSettings,
    mapping: &MappingImageSettings,
) -> Result<Impostor> {
    settings.validate()?;
    check_source(source)?;
    let output = output_material(mapping);
    let bounds = source.bounding_box();
    let center = bounds.center();
    let radius = bounds.radius();
    let (columns, rows) = settings.grid();
    let tile = [
        output.texture_width as f32 / columns as f32,
        output.texture_height as f32 / rows as f32,
    ];
    let up_axis = Unit::try_new(settings.up_vector, 1e-12)
        .ok_or_else(|| Error::InvalidSettings("flipbook up vector is zero".to_string()))?;

    let mut views = QuadMesh::default();
    let mut first = QuadMesh::default();
    let mut directions = Vec::new();
    for k in 0..settings.number_of_views {
        let angle = std::f32::consts::TAU * k as f32 / settings.number_of_views as f32;
        let direction = UnitQuaternion::from_axis_angle(&up_axis, angle) * settings.view_direction;
        let (d, right, up) = view_frame(&direction, &settings.up_vector)?;
        let corners = [
            center - right * radius - up * radius,
            center + right * radius - up * radius,
            center + right * radius + up * radius,
            center - right * radius + up * radius,
        ];
        let offset = [(k % columns) as f32 * tile[0], (k / columns) as f32 * tile[1]];
        let uvs = rect_uvs(offset, tile, &output);
        views.push_quad(corners, uvs);
        directions.extend([Some(d), Some(d)]);
        if k == 0 {
            first.push_quad(corners, uvs);
        }
    }
    tracing::debug!("flipbook with {} views in a {}x{} grid", settings.number_of_views, columns, rows);

    Ok(Impostor::new(
        first.into_geometry(&mapping.tex_coord_name),
        views.into_geometry(&mapping.tex_coord_name),
        Projection {
            directions,
            depth: radius * 1.01,
        },
    ))
}
