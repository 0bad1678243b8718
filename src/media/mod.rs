//! Media model shared by sources, sinks and bridges
//!
//! This module provides:
//! - Packet, stream key and media type definitions
//! - Codec header caching for late-joiner support
//!
//! Codec parsing and container muxing live outside the core; packets are
//! opaque payloads tagged with the flags fan-out needs.

pub mod headers;
pub mod packet;

pub use headers::HeaderCache;
pub use packet::{MediaPacket, MediaType, PacketKind, PacketRef, StreamKey};
