//! Centralized error types for mimesift.

use std::path::PathBuf;

use thiserror::Error;

/// All errors produced by the mimesift library.
///
/// Most malformed input never reaches this type: encoded-words fall back to
/// their source text and broken media types are repaired. These variants are
/// reserved for cases where continued parsing would be meaningless.
#[derive(Error, Debug)]
pub enum MimeError {
    /// I/O error from the underlying byte source.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A line that is neither blank nor a boundary appeared after a part ended.
    #[error("expecting boundary {boundary:?}, got {line:?}")]
    NoTerminator { boundary: String, line: String },

    /// The byte source cannot look far enough ahead to recognize the boundary.
    #[error("peek capacity {capacity} is below the {needed} bytes the boundary needs")]
    PeekTooShallow { needed: usize, capacity: usize },

    /// The header value carries no media type at all.
    #[error("no media type")]
    NoMediaType,

    /// The `type/subtype` portion could not be parsed.
    #[error("invalid media type: {0}")]
    InvalidMediaType(String),

    /// A parameter could not be parsed or was repeated.
    #[error("invalid media parameter: {0}")]
    InvalidParameter(String),

    /// The character encoding is not supported.
    #[error("Unsupported encoding: {0}")]
    UnsupportedEncoding(String),

    /// The bytes are not valid in the declared character encoding.
    #[error("malformed {charset} text")]
    CharsetConversion { charset: String },

    /// The configuration file is not valid.
    #[error("invalid config {}: {source}", path.display())]
    InvalidConfig {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Convenience alias for `Result<T, MimeError>`.
pub type Result<T> = std::result::Result<T, MimeError>;

impl MimeError {
    /// Whether this error came from the strict media-type grammar.
    pub fn is_media_type_error(&self) -> bool {
        matches!(
            self,
            Self::NoMediaType | Self::InvalidMediaType(_) | Self::InvalidParameter(_)
        )
    }
}
