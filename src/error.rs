use std::path::PathBuf;

/// Failures at the I/O edges. The calculations themselves never fail.
#[derive(Debug, thiserror::Error)]
pub enum RollupError {
    #[error("Failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid incident JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid incident CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("Invalid configuration: {0}")]
    Config(#[from] toml::de::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl RollupError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        RollupError::Io {
            path: path.into(),
            source,
        }
    }
}
