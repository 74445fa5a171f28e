//! Error types for the fine-tuning pipeline.

use thiserror::Error;

/// Main error type for the fine-tuning pipeline.
#[derive(Error, Debug)]
pub enum Error {
    /// IO error occurred
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Image decoding or processing error
    #[error("Image processing error: {0}")]
    Image(String),

    /// Model construction or weight loading error
    #[error("Model error: {0}")]
    Model(String),

    /// Tensor shape mismatch
    #[error("Shape mismatch: {0}")]
    Shape(String),

    /// Network failure while fetching pretrained weights
    #[error("Network error: {0}")]
    Network(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid argument error
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}

impl From<image::ImageError> for Error {
    fn from(err: image::ImageError) -> Self {
        Error::Image(err.to_string())
    }
}

/// Specialized Result type for fine-tuning operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Shape("expected [N, 3, 224, 224]".to_string());
        assert_eq!(err.to_string(), "Shape mismatch: expected [N, 3, 224, 224]");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "no such directory");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_toml_error_conversion() {
        let parse_err = toml::from_str::<toml::Value>("epochs = ").unwrap_err();
        let err: Error = parse_err.into();
        assert!(matches!(err, Error::Config(_)));
    }
}
