//! In-process fan-out demo
//!
//! Run with: cargo run --example fanout [PACKETS]
//!
//! Publishes a synthetic RTMP stream into the hub and plays it twice:
//! once as RTMP through an eager sink (the way an RTMP player session would
//! read it), once as HTTP-FLV through a lazy sink, which makes the hub
//! create an rtmp-flv bridge on demand. Prints the registry state at the
//! end.
//!
//! Set RUST_LOG=mediahub=trace to see every admitted packet.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use mediahub::{
    MediaConsumer, MediaPacket, MediaServer, MediaSink, MediaType, PacketKind, PacketRef,
    ServerConfig, SourceStatus, StreamKey,
};

/// Player stand-in that counts what it receives
struct Player {
    name: &'static str,
    packets: AtomicU64,
    keyframes: AtomicU64,
    bytes: AtomicU64,
}

impl Player {
    fn new(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            packets: AtomicU64::new(0),
            keyframes: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
        })
    }

    fn print_stats(&self) {
        println!(
            "[{}] packets={} keyframes={} bytes={}",
            self.name,
            self.packets.load(Ordering::Relaxed),
            self.keyframes.load(Ordering::Relaxed),
            self.bytes.load(Ordering::Relaxed),
        );
    }
}

#[async_trait]
impl MediaConsumer for Player {
    async fn on_packet(&self, pkt: PacketRef) -> bool {
        self.packets.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(pkt.size() as u64, Ordering::Relaxed);
        if pkt.kind == PacketKind::Video && pkt.is_keyframe {
            self.keyframes.fetch_add(1, Ordering::Relaxed);
        }
        true
    }

    fn on_source_status_changed(&self, status: SourceStatus) {
        println!("[{}] source status: {}", self.name, status);
    }

    fn on_close(&self) {
        println!("[{}] closed", self.name);
    }
}

/// One second of 25 fps video with a keyframe every 25 frames, plus audio
fn synthetic_packet(n: u64) -> MediaPacket {
    let ts = n * 40;
    if n % 2 == 1 {
        return MediaPacket::audio(ts, Bytes::from(vec![0xaf, 0x01, 0x21, 0x10]), false);
    }
    let frame = n / 2;
    let keyframe = frame % 25 == 0;
    let mut data = vec![if keyframe { 0x17 } else { 0x27 }, 0x01, 0x00, 0x00, 0x00];
    data.resize(if keyframe { 4096 } else { 512 }, 0);
    MediaPacket::video(ts, Bytes::from(data), keyframe, false)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let packets: u64 = std::env::args()
        .nth(1)
        .map(|arg| arg.parse())
        .transpose()?
        .unwrap_or(500);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("mediahub=info".parse()?)
                .add_directive("fanout=info".parse()?),
        )
        .init();

    let config = ServerConfig::default()
        .workers(2)
        .ring_capacity(256)
        .bridge_idle_timeout(Duration::from_secs(5));
    let server = MediaServer::new(config)?;
    let key = StreamKey::new("__defaultVhost__", "live", "demo");

    let session_id = server.next_session_id();
    let claim = server.publish(key.clone(), MediaType::Rtmp, session_id).await?;
    let origin = claim.source;

    // Decoder configuration first, as a real publisher would send it
    origin.on_metadata(Bytes::from_static(b"onMetaData"))?;
    origin.on_video_packet(MediaPacket::video(
        0,
        Bytes::from_static(&[0x17, 0x00, 0x00, 0x00, 0x00, 0x01, 0x64]),
        true,
        true,
    ))?;
    origin.on_audio_packet(MediaPacket::audio(
        0,
        Bytes::from_static(&[0xaf, 0x00, 0x12, 0x10]),
        true,
    ))?;

    let rtmp_player = Player::new("rtmp");
    let rtmp_sink = MediaSink::eager(
        server.next_worker(),
        Arc::clone(&rtmp_player) as Arc<dyn MediaConsumer>,
        server.config().source.eager_queue_capacity,
    );
    server.play(&key, MediaType::Rtmp, Arc::clone(&rtmp_sink)).await?;

    let flv_player = Player::new("http-flv");
    let flv_sink = MediaSink::lazy(
        server.next_worker(),
        Arc::clone(&flv_player) as Arc<dyn MediaConsumer>,
        server.config().source.sink_batch_size,
    );
    let flv_source = server.play(&key, MediaType::Flv, Arc::clone(&flv_sink)).await?;
    println!("playing {} as {} and {}", key, origin.media_type(), flv_source.media_type());

    for n in 0..packets {
        origin.on_packet(synthetic_packet(n))?;
        if n % 50 == 49 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    // Let both players drain
    tokio::time::sleep(Duration::from_millis(200)).await;

    rtmp_player.print_stats();
    flv_player.print_stats();

    let state = server.registry().sync_to_json().await?;
    println!("{}", serde_json::to_string_pretty(&state)?);

    server.unpublish(&origin, session_id);
    server.close().await;
    Ok(())
}
