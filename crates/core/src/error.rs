use thiserror::Error;

/// Malformed or missing configuration. Fatal at startup.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },

    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),
}

impl ConfigError {
    pub fn invalid(key: &str, value: impl ToString, reason: impl ToString) -> Self {
        ConfigError::Invalid {
            key: key.to_string(),
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Errors raised by a tile service backend.
#[derive(Error, Debug)]
pub enum TileError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("tile dump parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("dataset not found: {0}")]
    DatasetNotFound(String),

    #[error("tile backend error: {0}")]
    Backend(String),
}

/// Errors raised when reading values out of [`crate::ComputeOptions`].
#[derive(Error, Debug, PartialEq, Eq)]
pub enum OptionsError {
    #[error("missing {0}")]
    MissingValue(&'static str),

    #[error("at least one dataset is required")]
    NoDataset,

    /// A recognised option the receiving algorithm cannot honour.
    #[error("unsupported {key}: {value}")]
    Unsupported { key: &'static str, value: String },
}
