//! Error handling for storage, transfer and composition

use thiserror::Error;

#[derive(Error, Debug)]
pub enum OciError {
    /// Content disagrees with a digest or size that is already on record
    #[error("Integrity error: {0}")]
    Integrity(String),

    /// Blob or manifest is absent from a store or registry
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unsupported media type \"{media_type}\" for {digest}")]
    UnsupportedMediaType { media_type: String, digest: String },

    /// Registry or network failure reported by the registry client
    #[error("Transport error{}: {message}", status.map(|s| format!(" (status {})", s)).unwrap_or_default())]
    Transport { status: Option<u16>, message: String },

    #[error("Invalid digest: {0}")]
    InvalidDigest(String),

    #[error("Invalid reference: {0}")]
    InvalidReference(String),

    #[error("Invalid image: {0}")]
    InvalidImage(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Credentials error: {0}")]
    Credentials(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl OciError {
    pub fn not_found(what: impl Into<String>) -> Self {
        OciError::NotFound(what.into())
    }

    pub fn unsupported_media_type(media_type: impl Into<String>, digest: impl ToString) -> Self {
        OciError::UnsupportedMediaType {
            media_type: media_type.into(),
            digest: digest.to_string(),
        }
    }

    /// Build a transport error from an HTTP status and response text
    pub fn transport(status: Option<u16>, message: impl Into<String>) -> Self {
        OciError::Transport {
            status,
            message: message.into(),
        }
    }

    /// True for the "absent" signal: `NotFound` or a transport-level 404
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            OciError::NotFound(_)
                | OciError::Transport {
                    status: Some(404),
                    ..
                }
        )
    }
}

impl From<base64::DecodeError> for OciError {
    fn from(err: base64::DecodeError) -> Self {
        OciError::Credentials(format!("Invalid base64 auth entry: {}", err))
    }
}

impl From<url::ParseError> for OciError {
    fn from(err: url::ParseError) -> Self {
        OciError::InvalidReference(err.to_string())
    }
}

impl From<tokio::task::JoinError> for OciError {
    fn from(err: tokio::task::JoinError) -> Self {
        OciError::Io(std::io::Error::other(err))
    }
}

pub type Result<T> = std::result::Result<T, OciError>;

/// Map the "absent" signal to `None`, propagating every other error
pub fn absent_if_not_found<T>(result: Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(err) if err.is_not_found() => Ok(None),
        Err(err) => Err(err),
    }
}
