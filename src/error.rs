use std::path::PathBuf;
use thiserror::Error;

/// Failures visible to callers of this crate.
///
/// Model loading and inference errors never show up here: the engines recover
/// from those themselves and fall back to their heuristics.
#[derive(Error, Debug)]
pub enum MlError {
    #[error("failed to read config at {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config JSON in {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("coordinate out of range: lat={lat}, lng={lng}")]
    InvalidCoordinate { lat: f64, lng: f64 },

    #[error("invalid feature: {0}")]
    InvalidFeature(String),
}

pub type Result<T> = std::result::Result<T, MlError>;
