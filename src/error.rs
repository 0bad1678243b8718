//! Crate-level error type

use thiserror::Error;

use crate::bridge::TranslateError;
use crate::media::MediaType;
use crate::registry::RegistryError;
use crate::runtime::WorkerError;
use crate::source::AdmissionError;

/// Result type for hub operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the hub facade and its building blocks
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Admission(#[from] AdmissionError),

    #[error(transparent)]
    Worker(#[from] WorkerError),

    #[error(transparent)]
    Translate(#[from] TranslateError),

    /// No chain of enabled bridges converts between the two types
    #[error("no bridge route from {from} to {to}")]
    NoRoute { from: MediaType, to: MediaType },

    /// A bridge on the route could not be created
    #[error("bridge {0} is unavailable")]
    BridgeUnavailable(String),

    #[error("invalid bridge kind: {0}")]
    InvalidBridgeKind(String),

    #[error("unknown media type: {0}")]
    UnknownMediaType(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
