//! Consumer capability implemented by protocol layers

use async_trait::async_trait;

use crate::media::PacketRef;
use crate::source::SourceStatus;

/// Receives packets and lifecycle events from a sink
///
/// An RTMP player, an HTTP-FLV response writer or a bridge's translator all
/// implement this trait. Calls for one sink are never concurrent: packets
/// arrive in index order from a single delivery task.
#[async_trait]
pub trait MediaConsumer: Send + Sync + 'static {
    /// Deliver one packet
    ///
    /// Returning false stops delivery and closes the sink.
    async fn on_packet(&self, pkt: PacketRef) -> bool;

    /// Deliver a contiguous batch
    ///
    /// Defaults to calling [`MediaConsumer::on_packet`] for each packet.
    async fn on_packets(&self, pkts: &[PacketRef]) -> bool {
        for pkt in pkts {
            if !self.on_packet(PacketRef::clone(pkt)).await {
                return false;
            }
        }
        true
    }

    /// The source's status changed
    ///
    /// Must not call back into the source or the sink.
    fn on_source_status_changed(&self, _status: SourceStatus) {}

    /// The sink is closed; called exactly once
    fn on_close(&self) {}
}
