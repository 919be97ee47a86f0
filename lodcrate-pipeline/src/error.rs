//! Errors specific to pipeline runs

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("worker executable not found; set {env} or install the lodcrate binary next to this program")]
    WorkerNotFound { env: &'static str },

    #[error("worker exited with {status}: {stderr}")]
    WorkerFailed { status: String, stderr: String },

    #[error("caster for channel '{channel}' cannot be sent to a worker process")]
    NotSerializable { channel: String },

    #[error("unsupported settings file '{path}': expected .json or .toml")]
    SettingsFormat { path: String },

    #[error("settings: {0}")]
    Settings(String),
}

impl From<PipelineError> for lodcrate_core::Error {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::NotSerializable { .. } => lodcrate_core::Error::InvalidSettings(err.to_string()),
            PipelineError::Settings(message) => lodcrate_core::Error::Serialization(message),
            PipelineError::SettingsFormat { .. } => lodcrate_core::Error::UnsupportedFormat(err.to_string()),
            PipelineError::WorkerNotFound { .. } | PipelineError::WorkerFailed { .. } => {
                lodcrate_core::Error::Algorithm(err.to_string())
            }
        }
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        PipelineError::Settings(err.to_string())
    }
}

impl From<toml::de::Error> for PipelineError {
    fn from(err: toml::de::Error) -> Self {
        PipelineError::Settings(err.to_string())
    }
}

impl From<toml::ser::Error> for PipelineError {
    fn from(err: toml::ser::Error) -> Self {
        PipelineError::Settings(err.to_string())
    }
}
