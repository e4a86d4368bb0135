use std::path::PathBuf;

use thiserror::Error;

/// Every way an encrypt or decrypt call can fail.
///
/// Authentication failures deliberately carry no detail: a wrong password,
/// a flipped ciphertext bit and a forged MAC all look the same to callers.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid input format: {0}")]
    InvalidInputFormat(String),

    #[error("destination already exists: {} (use force to overwrite)", .0.display())]
    DestinationExists(PathBuf),

    #[error("malformed container: {0}")]
    MalformedContainer(String),

    #[error("wrong password or corrupted file")]
    AuthenticationFailure,

    #[error("content integrity check failed: {0}")]
    ContentIntegrityFailure(String),

    #[error("weak password (missing: {missing})")]
    WeakPassword { missing: String, confirmable: bool },

    #[error("invalid options: {0}")]
    InvalidOptions(String),

    #[error("segment too large for container: {len} bytes (max {})", u32::MAX)]
    SegmentTooLarge { len: usize },

    #[error("invalid document metadata: {0}")]
    Metadata(String),

    #[error("random number generation failed: {0}")]
    Rng(String),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedContainer(msg.into())
    }

    /// Short stable label, used as a structured logging field.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::InvalidInputFormat(_) => "invalid_input_format",
            Error::DestinationExists(_) => "destination_exists",
            Error::MalformedContainer(_) => "malformed_container",
            Error::AuthenticationFailure => "authentication_failure",
            Error::ContentIntegrityFailure(_) => "content_integrity_failure",
            Error::WeakPassword { .. } => "weak_password",
            Error::InvalidOptions(_) => "invalid_options",
            Error::SegmentTooLarge { .. } => "segment_too_large",
            Error::Metadata(_) => "metadata",
            Error::Rng(_) => "rng",
            Error::Io { .. } => "io",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
