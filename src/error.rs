use thiserror::Error;

/// Central error type for the stemgen crate.
#[derive(Debug, Error)]
pub enum StemError {
    // Generic fallback (wraps anyhow)
    #[error("{0}")]
    Anyhow(#[from] anyhow::Error),

    /// Invalid options or inputs, always raised before anything is written.
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Container error: {0}")]
    Container(String),

    #[error("Tag error: {0}")]
    Tag(String),

    #[error("Stem block error: {0}")]
    StemBlock(String),

    #[error("Separation error: {0}")]
    Separation(String),
}

impl StemError {
    pub fn config(msg: impl Into<String>) -> Self {
        StemError::Configuration(msg.into())
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, StemError::Configuration(_))
    }
}

// --- Implement From conversions for common errors ---
impl From<serde_json::Error> for StemError {
    fn from(e: serde_json::Error) -> Self {
        StemError::StemBlock(e.to_string())
    }
}

impl From<hound::Error> for StemError {
    fn from(e: hound::Error) -> Self {
        match e {
            hound::Error::IoError(io) => StemError::Io(io),
            other => StemError::Decode(other.to_string()),
        }
    }
}

impl From<symphonia::core::errors::Error> for StemError {
    fn from(e: symphonia::core::errors::Error) -> Self {
        match e {
            symphonia::core::errors::Error::IoError(io) => StemError::Io(io),
            other => StemError::Decode(other.to_string()),
        }
    }
}

impl From<lofty::error::LoftyError> for StemError {
    fn from(e: lofty::error::LoftyError) -> Self {
        StemError::Tag(e.to_string())
    }
}

impl From<id3::Error> for StemError {
    fn from(e: id3::Error) -> Self {
        StemError::Tag(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StemError>;
