//! Registry error types

use thiserror::Error;

use crate::media::StreamKey;

/// Error type for registry operations
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// No source is registered under the key
    #[error("stream not found: {0}")]
    StreamNotFound(StreamKey),

    /// The key already has a bound publisher
    #[error("stream already has a publisher: {0}")]
    StreamAlreadyPublishing(StreamKey),

    /// Only origin sources are registered
    #[error("not an origin source: {0}")]
    NotOrigin(StreamKey),

    /// The registry has been closed
    #[error("registry is closed")]
    RegistryClosed,
}
