//! Packet and stream identity types
//!
//! This module defines the key types for identifying streams and the packets
//! that flow from publishers through sources, bridges and sinks.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;

use crate::error::Error;

/// Shared handle to an admitted packet
///
/// The ring buffer slot and every sink currently reading it share the same
/// allocation. The packet is never mutated after admission.
pub type PacketRef = Arc<MediaPacket>;

/// Unique identifier for a stream (domain + app + stream name)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct StreamKey {
    /// Virtual host / tenant (e.g., "__defaultVhost__")
    pub domain: String,
    /// Application name (e.g., "live")
    pub app: String,
    /// Stream name (e.g., "abc")
    pub stream: String,
}

impl StreamKey {
    /// Create a new stream key
    pub fn new(
        domain: impl Into<String>,
        app: impl Into<String>,
        stream: impl Into<String>,
    ) -> Self {
        Self {
            domain: domain.into(),
            app: app.into(),
            stream: stream.into(),
        }
    }
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.domain, self.app, self.stream)
    }
}

/// Wire packaging a source carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Rtmp,
    Flv,
    Ts,
    Hls,
    Dash,
    WebRtc,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Rtmp => "rtmp",
            MediaType::Flv => "flv",
            MediaType::Ts => "ts",
            MediaType::Hls => "hls",
            MediaType::Dash => "dash",
            MediaType::WebRtc => "webrtc",
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rtmp" => Ok(MediaType::Rtmp),
            "flv" => Ok(MediaType::Flv),
            "ts" => Ok(MediaType::Ts),
            "hls" => Ok(MediaType::Hls),
            "dash" => Ok(MediaType::Dash),
            "webrtc" => Ok(MediaType::WebRtc),
            other => Err(Error::UnknownMediaType(other.to_string())),
        }
    }
}

/// Kind of packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PacketKind {
    /// Video frame or video decoder configuration
    Video,
    /// Audio frame or audio decoder configuration
    Audio,
    /// Stream metadata (e.g., onMetaData)
    Metadata,
    /// Fragmented-MP4 style initialization segment
    InitSegment,
}

/// A packet admitted into a source
///
/// Cheap to clone: the payload is reference counted.
#[derive(Debug, Clone)]
pub struct MediaPacket {
    /// Packet kind
    pub kind: PacketKind,
    /// Protocol-specific timestamp
    pub timestamp: u64,
    /// Opaque payload
    pub data: Bytes,
    /// Whether decoding can start at this packet
    pub is_keyframe: bool,
    /// Whether this packet carries decoder configuration
    pub is_header: bool,
    /// Sequence index, assigned by the ring buffer at admission
    pub index: u64,
}

impl MediaPacket {
    /// Create a video packet
    pub fn video(timestamp: u64, data: Bytes, is_keyframe: bool, is_header: bool) -> Self {
        Self {
            kind: PacketKind::Video,
            timestamp,
            data,
            is_keyframe,
            is_header,
            index: 0,
        }
    }

    /// Create an audio packet
    ///
    /// Audio frames decode independently, so every audio packet is a sync point.
    pub fn audio(timestamp: u64, data: Bytes, is_header: bool) -> Self {
        Self {
            kind: PacketKind::Audio,
            timestamp,
            data,
            is_keyframe: !is_header,
            is_header,
            index: 0,
        }
    }

    /// Create a metadata packet
    pub fn metadata(data: Bytes) -> Self {
        Self {
            kind: PacketKind::Metadata,
            timestamp: 0,
            data,
            is_keyframe: false,
            is_header: true,
            index: 0,
        }
    }

    /// Create an initialization segment packet
    pub fn init_segment(data: Bytes) -> Self {
        Self {
            kind: PacketKind::InitSegment,
            timestamp: 0,
            data,
            is_keyframe: false,
            is_header: true,
            index: 0,
        }
    }

    /// Copy of this packet ready for admission into another source
    pub fn repackage(&self) -> Self {
        Self {
            index: 0,
            ..self.clone()
        }
    }

    /// Payload size in bytes
    pub fn size(&self) -> usize {
        self.data.len()
    }
}
