//! Error type for the Noah risk library.

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T, E = RiskError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum RiskError {
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid bundle JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("invalid rule for {marker}: {message}")]
    InvalidRule { marker: String, message: String },

    #[error("invalid category bounds: moderate {moderate} must be at least 1 and below high {high}")]
    InvalidBounds { moderate: u32, high: u32 },
}

impl RiskError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn rule(marker: &str, message: impl Into<String>) -> Self {
        Self::InvalidRule {
            marker: marker.to_string(),
            message: message.into(),
        }
    }
}
