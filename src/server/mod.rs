//! Hub facade and its configuration

pub mod config;
pub mod hub;

pub use config::ServerConfig;
pub use hub::MediaServer;
