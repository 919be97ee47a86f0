//! Reduction settings and targets

use lodcrate_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// How several enabled targets combine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopCondition {
    /// Stop once every enabled target is reached
    #[default]
    All,
    /// Stop as soon as one enabled target is reached
    Any,
}

impl StopCondition {
    /// Combine the reached flags of the enabled targets. With no enabled
    /// target there is nothing to reach.
    pub fn is_satisfied(self, reached: &[bool]) -> bool {
        if reached.is_empty() {
            return true;
        }
        match self {
            StopCondition::All => reached.iter().all(|r| *r),
            StopCondition::Any => reached.iter().any(|r| *r),
        }
    }
}

/// Queue maintenance strategy of the reducer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReductionHeuristics {
    /// Neighbour costs are refreshed by periodic queue rebuilds
    #[default]
    Fast,
    /// Every popped entry is re-evaluated and neighbour costs are updated
    /// after each collapse
    Consistent,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SymmetryAxis {
    X,
    #[default]
    Y,
    Z,
}

impl SymmetryAxis {
    pub const ALL: [SymmetryAxis; 3] = [SymmetryAxis::X, SymmetryAxis::Y, SymmetryAxis::Z];

    pub fn index(self) -> usize {
        match self {
            SymmetryAxis::X => 0,
            SymmetryAxis::Y => 1,
            SymmetryAxis::Z => 2,
        }
    }
}

/// Reduction targets. Each target is enabled on its own; the enabled ones
/// are combined by `stop_condition`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReductionTargets {
    pub stop_condition: StopCondition,
    pub use_triangle_ratio: bool,
    pub use_triangle_count: bool,
    pub use_max_deviation: bool,
    pub use_on_screen_size: bool,
    /// Fraction of the input triangles to keep, in `[0, 1]`
    pub triangle_ratio: f32,
    pub triangle_count: u32,
    /// Largest allowed surface deviation in world units
    pub max_deviation: f32,
    /// Diameter in pixels; the allowed deviation is half a pixel
    pub on_screen_size: u32,
}

impl Default for ReductionTargets {
    fn default() -> Self {
        Self {
            stop_condition: StopCondition::All,
            use_triangle_ratio: true,
            use_triangle_count: false,
            use_max_deviation: false,
            use_on_screen_size: false,
            triangle_ratio: 0.5,
            triangle_count: 0,
            max_deviation: 0.0,
            on_screen_size: 300,
        }
    }
}

impl ReductionTargets {
    /// Only the triangle ratio target
    pub fn triangle_ratio(ratio: f32) -> Self {
        Self {
            triangle_ratio: ratio,
            ..Self::default()
        }
    }

    /// Only the triangle count target
    pub fn triangle_count(count: u32) -> Self {
        Self {
            use_triangle_ratio: false,
            use_triangle_count: true,
            triangle_count: count,
            ..Self::default()
        }
    }

    /// Only the on-screen size target
    pub fn on_screen_size(pixels: u32) -> Self {
        Self {
            use_triangle_ratio: false,
            use_on_screen_size: true,
            on_screen_size: pixels,
            ..Self::default()
        }
    }

    pub fn any_enabled(&self) -> bool {
        self.use_triangle_ratio || self.use_triangle_count || self.use_max_deviation || self.use_on_screen_size
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.triangle_ratio) {
            return Err(Error::InvalidSettings(format!(
                "triangle ratio must be between 0 and 1, got {}",
                self.triangle_ratio
            )));
        }
        if self.max_deviation < 0.0 || !self.max_deviation.is_finite() {
            return Err(Error::InvalidSettings(format!(
                "max deviation must be a finite non-negative distance, got {}",
                self.max_deviation
            )));
        }
        if self.use_on_screen_size && self.on_screen_size == 0 {
            return Err(Error::InvalidSettings(
                "on-screen size must be at least one pixel".to_string(),
            ));
        }
        Ok(())
    }

    /// Triangle budget for an input of `input` triangles, if a triangle
    /// target is enabled. Both triangle targets are folded by the stop
    /// condition.
    pub fn triangle_budget(&self, input: usize) -> Option<usize> {
        let ratio = self
            .use_triangle_ratio
            .then(|| (self.triangle_ratio as f64 * input as f64).ceil() as usize);
        let count = self.use_triangle_count.then_some(self.triangle_count as usize);
        match (ratio, count) {
            (Some(r), Some(c)) => Some(match self.stop_condition {
                StopCondition::All => r.min(c),
                StopCondition::Any => r.max(c),
            }),
            (r, c) => r.or(c),
        }
    }

    /// Allowed deviation for an object of the given world-space diameter,
    /// if a deviation target is enabled
    pub fn deviation_budget(&self, diameter: f32) -> Option<f32> {
        let explicit = self.use_max_deviation.then_some(self.max_deviation);
        let screen = self
            .use_on_screen_size
            .then(|| 0.5 * diameter / self.on_screen_size.max(1) as f32);
        match (explicit, screen) {
            (Some(a), Some(b)) => Some(match self.stop_condition {
                StopCondition::All => a.max(b),
                StopCondition::Any => a.min(b),
            }),
            (a, b) => a.or(b),
        }
    }
}

/// Settings of the edge collapse reducer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReductionSettings {
    pub targets: ReductionTargets,
    pub reduction_heuristics: ReductionHeuristics,
    /// Only meshes in this selection set (or below a node in it) are reduced
    pub process_selection_set_name: Option<String>,

    pub geometry_importance: f32,
    pub material_importance: f32,
    pub texture_importance: f32,
    pub shading_importance: f32,
    pub vertex_color_importance: f32,
    pub skinning_importance: f32,
    /// The geometry store has no triangle group channel; this weight scales
    /// how strongly open borders are held in place
    pub group_importance: f32,

    /// Never move or remove vertices on open borders
    pub lock_geometric_border: bool,
    /// Reject collapses that turn a triangle normal by more than this many
    /// degrees
    pub max_normal_flip_angle: f32,

    pub keep_symmetry: bool,
    pub use_automatic_symmetry_detection: bool,
    pub symmetry_axis: SymmetryAxis,
    pub symmetry_offset: f32,
    pub symmetry_detection_tolerance: f32,
}

impl Default for ReductionSettings {
    fn default() -> Self {
        Self {
            targets: ReductionTargets::default(),
            reduction_heuristics: ReductionHeuristics::Fast,
            process_selection_set_name: None,
            geometry_importance: 1.0,
            material_importance: 1.0,
            texture_importance: 1.0,
            shading_importance: 1.0,
            vertex_color_importance: 1.0,
            skinning_importance: 1.0,
            group_importance: 1.0,
            lock_geometric_border: false,
            max_normal_flip_angle: 90.0,
            keep_symmetry: false,
            use_automatic_symmetry_detection: false,
            symmetry_axis: SymmetryAxis::Y,
            symmetry_offset: 0.0,
            symmetry_detection_tolerance: 0.0004,
        }
    }
}

impl ReductionSettings {
    pub fn with_targets(targets: ReductionTargets) -> Self {
        Self {
            targets,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.targets.validate()?;
        let importances = [
            ("geometry", self.geometry_importance),
            ("material", self.material_importance),
            ("texture", self.texture_importance),
            ("shading", self.shading_importance),
            ("vertex color", self.vertex_color_importance),
            ("skinning", self.skinning_importance),
            ("group", self.group_importance),
        ];
        if let Some((name, value)) = importances.iter().find(|(_, v)| *v < 0.0 || !v.is_finite()) {
            return Err(Error::InvalidSettings(format!(
                "{} importance must be finite and non-negative, got {}",
                name, value
            )));
        }
        if self.symmetry_detection_tolerance < 0.0 {
            return Err(Error::InvalidSettings(
                "symmetry detection tolerance must be non-negative".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_condition() {
        assert!(StopCondition::All.is_satisfied(&[]));
        assert!(!StopCondition::All.is_satisfied(&[true, false]));
        assert!(StopCondition::Any.is_satisfied(&[true, false]));
        assert!(StopCondition::All.is_satisfied(&[true, true]));
    }

    #[test]
    fn test_triangle_budget() {
        let targets = ReductionTargets::triangle_ratio(0.5);
        assert_eq!(targets.triangle_budget(101), Some(51));
        assert_eq!(ReductionTargets::triangle_count(10).triangle_budget(100), Some(10));

        let both = ReductionTargets {
            use_triangle_count: true,
            triangle_count: 20,
            ..ReductionTargets::triangle_ratio(0.5)
        };
        assert_eq!(both.triangle_budget(100), Some(20));
        let any = ReductionTargets {
            stop_condition: StopCondition::Any,
            ..both
        };
        assert_eq!(any.triangle_budget(100), Some(50));
    }

    #[test]
    fn test_on_screen_deviation_is_half_a_pixel() {
        let targets = ReductionTargets::on_screen_size(100);
        assert_eq!(targets.deviation_budget(10.0), Some(0.05));
        assert_eq!(targets.triangle_budget(100), None);
    }

    #[test]
    fn test_validate() {
        assert!(ReductionSettings::default().validate().is_ok());
        let bad = ReductionSettings::with_targets(ReductionTargets::triangle_ratio(1.5));
        assert!(matches!(bad.validate(), Err(Error::InvalidSettings(_))));
        let bad = ReductionSettings {
            texture_importance: -1.0,
            ..ReductionSettings::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_partial_json() {
        let settings: ReductionSettings =
            serde_json::from_str(r#"{"targets": {"triangle_ratio": 0.25}, "keep_symmetry": true}"#).unwrap();
        assert_eq!(settings.targets.triangle_ratio, 0.25);
        assert!(settings.targets.use_triangle_ratio);
        assert!(settings.keep_symmetry);
        assert_eq!(settings.geometry_importance, 1.0);
    }
}
