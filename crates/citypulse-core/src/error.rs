use thiserror::Error;

/// Top-level error type for CityPulse.
///
/// Subsystem crates define their own error types and convert from
/// `CityPulseError` so that the `?` operator works across crate boundaries.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CityPulseError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<toml::de::Error> for CityPulseError {
    fn from(err: toml::de::Error) -> Self {
        CityPulseError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for CityPulseError {
    fn from(err: toml::ser::Error) -> Self {
        CityPulseError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for CityPulseError {
    fn from(err: serde_json::Error) -> Self {
        CityPulseError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for CityPulse operations.
pub type Result<T> = std::result::Result<T, CityPulseError>;
