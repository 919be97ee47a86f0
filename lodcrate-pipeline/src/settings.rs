//! Pipeline settings and settings files
//!
//! Every pipeline is fully described by one [`PipelineSettings`] value. The
//! same value is written to disk for out-of-process runs and read by the
//! `lodcrate run` command, as JSON or TOML depending on the extension.

use crate::error::PipelineError;
use lodcrate_casting::{
    AttributeTessellationSettings, BillboardCloudSettings, BillboardMode, Caster, FlipbookSettings,
    FromSingleViewSettings, MappingImageSettings,
};
use lodcrate_core::Result;
use lodcrate_remeshing::RemeshingSettings;
use lodcrate_simplification::{AggregationSettings, SimplificationSettings, VisibilitySettings};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Texture size used by impostor pipelines unless configured
pub const DEFAULT_IMPOSTOR_TEXTURE_SIZE: u32 = 1024;

/// A caster and the output material it writes to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CasterEntry {
    pub caster: Caster,
    #[serde(default)]
    pub output_index: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReductionPipelineSettings {
    pub simplification: SimplificationSettings,
    pub mapping_image: MappingImageSettings,
    pub attribute_tessellation: AttributeTessellationSettings,
    pub casters: Vec<CasterEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemeshingPipelineSettings {
    pub remeshing: RemeshingSettings,
    pub mapping_image: MappingImageSettings,
    pub attribute_tessellation: AttributeTessellationSettings,
    pub casters: Vec<CasterEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationPipelineSettings {
    pub aggregation: AggregationSettings,
    pub visibility: VisibilitySettings,
    pub mapping_image: MappingImageSettings,
    pub casters: Vec<CasterEntry>,
}

/// The impostor a processor builds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum ImpostorType {
    BillboardCloud(BillboardCloudSettings),
    Flipbook(FlipbookSettings),
    FromSingleView(FromSingleViewSettings),
}

impl Default for ImpostorType {
    fn default() -> Self {
        ImpostorType::BillboardCloud(BillboardCloudSettings::default())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImpostorPipelineSettings {
    pub impostor: ImpostorType,
    pub process_selection_set_name: Option<String>,
    pub mapping_image: MappingImageSettings,
    pub casters: Vec<CasterEntry>,
}

impl Default for ImpostorPipelineSettings {
    fn default() -> Self {
        Self {
            impostor: ImpostorType::default(),
            process_selection_set_name: None,
            mapping_image: MappingImageSettings::with_texture_size(
                DEFAULT_IMPOSTOR_TEXTURE_SIZE,
                DEFAULT_IMPOSTOR_TEXTURE_SIZE,
            ),
            casters: Vec::new(),
        }
    }
}

impl ImpostorPipelineSettings {
    pub fn billboard_cloud(settings: BillboardCloudSettings) -> Self {
        Self {
            impostor: ImpostorType::BillboardCloud(settings),
            ..Self::default()
        }
    }

    /// Billboard cloud in foliage mode
    pub fn vegetation() -> Self {
        Self::billboard_cloud(BillboardCloudSettings {
            billboard_mode: BillboardMode::Foliage,
            ..BillboardCloudSettings::default()
        })
    }

    pub fn flipbook(settings: FlipbookSettings) -> Self {
        Self {
            impostor: ImpostorType::Flipbook(settings),
            mapping_image: MappingImageSettings {
                maximum_layers: 1,
                ..Self::default().mapping_image
            },
            ..Self::default()
        }
    }
}

/// Settings of any pipeline, tagged by pipeline kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "pipeline")]
pub enum PipelineSettings {
    Reduction(ReductionPipelineSettings),
    Remeshing(RemeshingPipelineSettings),
    Aggregation(AggregationPipelineSettings),
    BillboardCloud(ImpostorPipelineSettings),
    BillboardCloudVegetation(ImpostorPipelineSettings),
    Flipbook(ImpostorPipelineSettings),
}

impl PipelineSettings {
    pub fn name(&self) -> &'static str {
        match self {
            PipelineSettings::Reduction(_) => "Reduction",
            PipelineSettings::Remeshing(_) => "Remeshing",
            PipelineSettings::Aggregation(_) => "Aggregation",
            PipelineSettings::BillboardCloud(_) => "BillboardCloud",
            PipelineSettings::BillboardCloudVegetation(_) => "BillboardCloudVegetation",
            PipelineSettings::Flipbook(_) => "Flipbook",
        }
    }

    pub fn casters(&self) -> &[CasterEntry] {
        match self {
            PipelineSettings::Reduction(s) => &s.casters,
            PipelineSettings::Remeshing(s) => &s.casters,
            PipelineSettings::Aggregation(s) => &s.casters,
            PipelineSettings::BillboardCloud(s)
            | PipelineSettings::BillboardCloudVegetation(s)
            | PipelineSettings::Flipbook(s) => &s.casters,
        }
    }

    pub fn casters_mut(&mut self) -> &mut Vec<CasterEntry> {
        match self {
            PipelineSettings::Reduction(s) => &mut s.casters,
            PipelineSettings::Remeshing(s) => &mut s.casters,
            PipelineSettings::Aggregation(s) => &mut s.casters,
            PipelineSettings::BillboardCloud(s)
            | PipelineSettings::BillboardCloudVegetation(s)
            | PipelineSettings::Flipbook(s) => &mut s.casters,
        }
    }

    pub fn mapping_image(&self) -> &MappingImageSettings {
        match self {
            PipelineSettings::Reduction(s) => &s.mapping_image,
            PipelineSettings::Remeshing(s) => &s.mapping_image,
            PipelineSettings::Aggregation(s) => &s.mapping_image,
            PipelineSettings::BillboardCloud(s)
            | PipelineSettings::BillboardCloudVegetation(s)
            | PipelineSettings::Flipbook(s) => &s.mapping_image,
        }
    }

    /// Fails on the first caster that cannot be written to a file
    pub fn check_serializable(&self) -> Result<()> {
        match self.casters().iter().find(|entry| !entry.caster.is_serializable()) {
            Some(entry) => Err(PipelineError::NotSerializable {
                channel: entry.caster.channel().to_string(),
            }
            .into()),
            None => Ok(()),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        self.check_serializable()?;
        Ok(serde_json::to_string_pretty(self).map_err(PipelineError::from)?)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text).map_err(PipelineError::from)?)
    }

    pub fn to_toml(&self) -> Result<String> {
        self.check_serializable()?;
        Ok(toml::to_string_pretty(self).map_err(PipelineError::from)?)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text).map_err(PipelineError::from)?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SettingsFormat {
    Json,
    Toml,
}

fn settings_format(path: &Path) -> Result<SettingsFormat> {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("json") => Ok(SettingsFormat::Json),
        Some("toml") => Ok(SettingsFormat::Toml),
        _ => Err(PipelineError::SettingsFormat {
            path: path.display().to_string(),
        }
        .into()),
    }
}

/// Write pipeline settings as JSON or TOML, chosen by extension
pub fn save_settings(settings: &PipelineSettings, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let text = match settings_format(path)? {
        SettingsFormat::Json => settings.to_json()?,
        SettingsFormat::Toml => settings.to_toml()?,
    };
    std::fs::write(path, text)?;
    Ok(())
}

/// Read pipeline settings written by [`save_settings`] or by hand
pub fn load_settings(path: impl AsRef<Path>) -> Result<PipelineSettings> {
    let path = path.as_ref();
    let format = settings_format(path)?;
    let text = std::fs::read_to_string(path)?;
    match format {
        SettingsFormat::Json => PipelineSettings::from_json(&text),
        SettingsFormat::Toml => PipelineSettings::from_toml(&text),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lodcrate_casting::{ColorCaster, ComputeCaster, NormalCaster};
    use lodcrate_core::{channels, Color};
    use lodcrate_simplification::{ReductionSettings, ReductionTargets};

    fn reduction_settings() -> PipelineSettings {
        PipelineSettings::Reduction(ReductionPipelineSettings {
            simplification: SimplificationSettings::from_reduction(ReductionSettings::with_targets(
                ReductionTargets::triangle_ratio(0.3),
            )),
            mapping_image: MappingImageSettings::with_texture_size(512, 256),
            casters: vec![
                CasterEntry {
                    caster: ColorCaster::new(channels::DIFFUSE).into(),
                    output_index: 0,
                },
                CasterEntry {
                    caster: NormalCaster::default().into(),
                    output_index: 0,
                },
            ],
            ..ReductionPipelineSettings::default()
        })
    }

    #[test]
    fn test_json_round_trip() {
        let settings = reduction_settings();
        let json = settings.to_json().unwrap();
        assert!(json.contains("\"pipeline\": \"Reduction\""));
        assert_eq!(PipelineSettings::from_json(&json).unwrap(), settings);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let settings = PipelineSettings::from_json(r#"{"pipeline": "Flipbook"}"#).unwrap();
        let PipelineSettings::Flipbook(flipbook) = settings else {
            panic!("wrong pipeline kind");
        };
        assert!(flipbook.casters.is_empty());
        assert!(flipbook.mapping_image.generate_mapping_image);
    }

    #[test]
    fn test_files_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let settings = reduction_settings();
        for name in ["pipeline.json", "pipeline.toml"] {
            let path = dir.path().join(name);
            save_settings(&settings, &path).unwrap();
            assert_eq!(load_settings(&path).unwrap(), settings, "{}", name);
        }
        assert!(save_settings(&settings, dir.path().join("pipeline.yaml")).is_err());
    }

    #[test]
    fn test_compute_caster_is_rejected() {
        let mut settings = reduction_settings();
        settings.casters_mut().push(CasterEntry {
            caster: ComputeCaster::new("Custom", |_| Ok(Color::WHITE)).into(),
            output_index: 0,
        });
        assert!(settings.check_serializable().is_err());
        assert!(settings.to_json().is_err());
    }
}
