//! Stream registry: one origin source per stream key
//!
//! # Architecture
//!
//! ```text
//!                         Arc<SourceManager>
//!                    ┌───────────────────────────┐
//!                    │ sources: HashMap<Key,     │
//!                    │   Arc<MediaSource> {      │
//!                    │     session, ring,        │
//!                    │     sinks, bridges,       │
//!                    │   }                       │
//!                    │ >                         │
//!                    └─────────────┬─────────────┘
//!                                  │
//!        ┌─────────────────────────┼──────────────────────────┐
//!        │                         │                          │
//!        ▼                         ▼                          ▼
//!   [Publisher]               [Player]                  [Closing origin]
//!   claim(key, session)       get_source(key)           remove_source_if(key, id)
//!        │                         │
//!        └──► on_packet() ──► fan-out ──► sinks
//! ```
//!
//! A publisher that drops keeps its origin alive for the resume timeout;
//! reconnecting within it picks the same source (and its attached players)
//! back up.

pub mod config;
pub mod error;
pub mod store;

pub use config::{RegistryConfig, RepublishPolicy};
pub use error::RegistryError;
pub use store::{PublishClaim, SourceManager};
