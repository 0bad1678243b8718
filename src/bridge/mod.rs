//! On-demand format bridges
//!
//! A bridge converts one source's stream into another media type and
//! exposes the result as a derived source that sinks attach to like any
//! other. Bridges are created on first request, keyed by translation id
//! (`"<from>-<to>"`), and torn down when nobody reads their output.

pub mod config;
pub mod factory;
pub mod node;
pub mod translator;

pub use config::BridgeConfig;
pub use factory::BridgeFactory;
pub use node::{BridgeSnapshot, MediaBridge};
pub use translator::{BridgeKind, Passthrough, TranslateError, Translator};
