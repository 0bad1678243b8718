//! Packet translation between media types
//!
//! Wire-level repackaging (FLV tag framing, TS muxing, RTP packetization)
//! lives with the protocol layers; they register a [`Translator`] for each
//! conversion they provide.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use thiserror::Error;

use crate::error::Error;
use crate::media::{MediaPacket, MediaType, PacketKind};

/// Translation id: source media type to target media type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct BridgeKind {
    pub from: MediaType,
    pub to: MediaType,
}

impl BridgeKind {
    pub fn new(from: MediaType, to: MediaType) -> Self {
        Self { from, to }
    }
}

impl fmt::Display for BridgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.from, self.to)
    }
}

impl FromStr for BridgeKind {
    type Err = Error;

    /// Parse `"<from>-<to>"`, e.g. `"rtmp-flv"`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (from, to) = s
            .split_once('-')
            .ok_or_else(|| Error::InvalidBridgeKind(s.to_string()))?;
        let from = from
            .parse()
            .map_err(|_| Error::InvalidBridgeKind(s.to_string()))?;
        let to = to
            .parse()
            .map_err(|_| Error::InvalidBridgeKind(s.to_string()))?;
        Ok(Self { from, to })
    }
}

/// Error raised while translating a single packet
///
/// The packet is skipped; the bridge keeps running.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TranslateError {
    #[error("{0:?} packets are not supported by this translator")]
    Unsupported(PacketKind),

    #[error("malformed packet: {0}")]
    Malformed(String),
}

/// Converts packets of one media type into packets of another
///
/// A translator is owned by a single bridge and called from its delivery
/// task, one packet at a time, in index order.
pub trait Translator: Send {
    /// Append zero or more output packets for `pkt` to `out`
    fn translate(&mut self, pkt: &MediaPacket, out: &mut Vec<MediaPacket>)
        -> Result<(), TranslateError>;
}

/// Forwards packets unchanged
///
/// Used between types that share the same elementary stream framing, e.g.
/// RTMP messages and FLV tags.
#[derive(Debug, Default, Clone, Copy)]
pub struct Passthrough;

impl Translator for Passthrough {
    fn translate(
        &mut self,
        pkt: &MediaPacket,
        out: &mut Vec<MediaPacket>,
    ) -> Result<(), TranslateError> {
        out.push(pkt.repackage());
        Ok(())
    }
}
