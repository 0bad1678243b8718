//! Live media distribution core
//!
//! A publisher pushes an encoded stream into an origin [`MediaSource`]; any
//! number of subscribers read it through [`MediaSink`]s, in the publisher's
//! packaging or through on-demand [`MediaBridge`]s into another one.
//!
//! ```text
//!   publish session                       play sessions
//!        │                                     ▲   ▲
//!        ▼                                     │   │
//!   SourceManager ──► MediaSource (rtmp) ──► sink  │
//!                          │                       │
//!                          └─► MediaBridge ──► MediaSource (flv) ──► sink
//! ```
//!
//! Byte-level protocol handling stays outside the crate: protocol layers
//! feed opaque packets in and implement [`MediaConsumer`] to get them out.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use async_trait::async_trait;
//! use mediahub::{MediaConsumer, MediaServer, MediaSink, MediaType, PacketRef, ServerConfig, StreamKey};
//!
//! struct Player;
//!
//! #[async_trait]
//! impl MediaConsumer for Player {
//!     async fn on_packet(&self, pkt: PacketRef) -> bool {
//!         println!("packet {} ({} bytes)", pkt.index, pkt.size());
//!         true
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> mediahub::Result<()> {
//!     let server = MediaServer::new(ServerConfig::default())?;
//!     let key = StreamKey::new("__defaultVhost__", "live", "cam1");
//!
//!     let claim = server.publish(key.clone(), MediaType::Rtmp, server.next_session_id()).await?;
//!     let sink = MediaSink::lazy(server.next_worker(), Arc::new(Player), 64);
//!     server.play(&key, MediaType::Flv, sink).await?;
//!
//!     // feed claim.source.on_video_packet(...) from the publish session
//!     # drop(claim);
//!     server.close().await;
//!     Ok(())
//! }
//! ```

pub mod bridge;
pub mod buffer;
pub mod error;
pub mod media;
pub mod registry;
pub mod runtime;
pub mod server;
pub mod sink;
pub mod source;
pub mod stats;

#[cfg(test)]
pub(crate) mod testing;

pub use bridge::{BridgeConfig, BridgeFactory, BridgeKind, MediaBridge, Translator};
pub use buffer::{JoinPolicy, PacketRing, RingKind};
pub use error::{Error, Result};
pub use media::{MediaPacket, MediaType, PacketKind, PacketRef, StreamKey};
pub use registry::{PublishClaim, RegistryConfig, RepublishPolicy, SourceManager};
pub use runtime::{WaitGroup, Worker, WorkerPool};
pub use server::{MediaServer, ServerConfig};
pub use sink::{DeliveryMode, MediaConsumer, MediaSink};
pub use source::{AdmissionError, MediaSource, SourceConfig, SourceContext, SourceStatus};
