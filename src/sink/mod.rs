//! Consumer endpoints
//!
//! A [`MediaSink`] is what a play session or a bridge attaches to a source.
//! It owns the read position and the delivery task; the protocol layer only
//! implements [`MediaConsumer`].

pub mod consumer;
pub mod delivery;

pub use consumer::MediaConsumer;
pub use delivery::{DeliveryMode, MediaSink, SinkSnapshot};
