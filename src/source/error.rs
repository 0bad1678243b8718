//! Admission errors

use thiserror::Error;

use crate::media::PacketKind;

/// Why a packet was refused by a source
///
/// Admission errors are local: the packet is dropped and the source keeps
/// running.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("{0:?} packet has an empty payload")]
    EmptyPayload(PacketKind),

    #[error("source is closed")]
    SourceClosed,
}
