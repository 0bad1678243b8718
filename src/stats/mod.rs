//! Statistics and metrics for sources and sinks

pub mod metrics;

pub use metrics::{SinkStats, SinkStatsSnapshot, SourceStats};
