//! Crate-wide error types.

use thiserror::Error;

pub type LensResult<T> = Result<T, LensError>;

#[derive(Debug, Error)]
pub enum LensError {
    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("decompression error: {0}")]
    Decompression(String),

    #[error("decode error in {section}: {message}")]
    Decode {
        section: &'static str,
        message: String,
    },

    #[error("ingestion cancelled")]
    Cancelled,
}

impl LensError {
    pub fn decode(section: &'static str, message: impl Into<String>) -> Self {
        Self::Decode {
            section,
            message: message.into(),
        }
    }
}
