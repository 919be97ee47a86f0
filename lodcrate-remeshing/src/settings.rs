//! Remeshing settings

use lodcrate_core::{Error, Result};
use lodcrate_simplification::BoneSettings;
use serde::{Deserialize, Serialize};

/// How aggressively openings in the input are closed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum HoleFilling {
    #[default]
    Disabled,
    Low,
    Medium,
    High,
}

impl HoleFilling {
    /// Extra cells the flood fill keeps away from the surface
    pub fn fill_cells(self) -> u32 {
        match self {
            HoleFilling::Disabled => 0,
            HoleFilling::Low => 1,
            HoleFilling::Medium => 2,
            HoleFilling::High => 3,
        }
    }
}

/// How attributes are carried from the input surface to the new one
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SurfaceTransferMode {
    /// Closest source triangle, blended by barycentric coordinates
    #[default]
    Accurate,
    /// Closest source vertex of the closest triangle
    Fast,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemeshingSettings {
    /// Diameter in pixels the result is built for
    pub on_screen_size: u32,
    pub process_selection_set_name: Option<String>,
    pub hole_filling: HoleFilling,
    /// Scales the grid resolution; 2.0 halves the cell size
    pub geometrical_accuracy: f32,
    pub surface_transfer_mode: SurfaceTransferMode,
    /// Fill tessellated displacement on the result from the input surface
    pub populate_attribute_tessellation_displacement: bool,
    /// Upper bound on samples along the longest axis
    pub max_grid_resolution: u32,
    pub bones: BoneSettings,
}

impl Default for RemeshingSettings {
    fn default() -> Self {
        Self {
            on_screen_size: 300,
            process_selection_set_name: None,
            hole_filling: HoleFilling::Disabled,
            geometrical_accuracy: 1.0,
            surface_transfer_mode: SurfaceTransferMode::Accurate,
            populate_attribute_tessellation_displacement: false,
            max_grid_resolution: 256,
            bones: BoneSettings::default(),
        }
    }
}

/// Pixels covered by one grid cell at accuracy 1
const PIXELS_PER_CELL: f32 = 2.0;

impl RemeshingSettings {
    pub fn with_on_screen_size(on_screen_size: u32) -> Self {
        Self {
            on_screen_size,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.on_screen_size < 20 {
            return Err(Error::InvalidSettings(format!(
                "remeshing on-screen size must be at least 20 pixels, got {}",
                self.on_screen_size
            )));
        }
        if !(self.geometrical_accuracy > 0.0 && self.geometrical_accuracy.is_finite()) {
            return Err(Error::InvalidSettings(format!(
                "geometrical accuracy must be positive, got {}",
                self.geometrical_accuracy
            )));
        }
        if self.max_grid_resolution < 8 {
            return Err(Error::InvalidSettings(
                "max grid resolution must be at least 8".to_string(),
            ));
        }
        Ok(())
    }

    /// Cell size for an input of the given diameter and longest extent
    pub fn cell_size(&self, diameter: f32, longest_extent: f32) -> f32 {
        let pixel = diameter / self.on_screen_size.max(1) as f32;
        let by_screen = pixel * PIXELS_PER_CELL / self.geometrical_accuracy;
        let by_budget = longest_extent / self.max_grid_resolution.saturating_sub(1).max(1) as f32;
        by_screen.max(by_budget)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_cell_size() {
        let settings = RemeshingSettings::with_on_screen_size(100);
        assert_relative_eq!(settings.cell_size(10.0, 5.0), 0.2);

        let finer = RemeshingSettings {
            geometrical_accuracy: 2.0,
            ..settings.clone()
        };
        assert_relative_eq!(finer.cell_size(10.0, 5.0), 0.1);

        let capped = RemeshingSettings {
            max_grid_resolution: 11,
            ..settings
        };
        assert_relative_eq!(capped.cell_size(10.0, 5.0), 0.5);
    }

    #[test]
    fn test_validate() {
        assert!(RemeshingSettings::default().validate().is_ok());
        assert!(RemeshingSettings::with_on_screen_size(5).validate().is_err());
        let bad = RemeshingSettings {
            geometrical_accuracy: 0.0,
            ..RemeshingSettings::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_partial_json() {
        let settings: RemeshingSettings =
            serde_json::from_str(r#"{"on_screen_size": 500, "hole_filling": "Medium"}"#).unwrap();
        assert_eq!(settings.on_screen_size, 500);
        assert_eq!(settings.hole_filling.fill_cells(), 2);
        assert_eq!(settings.geometrical_accuracy, 1.0);
    }
}
