//! Media sources: admission, fan-out, bridges and publisher binding

pub mod config;
pub mod error;
pub mod fanout;
pub mod status;

pub use config::SourceConfig;
pub use error::AdmissionError;
pub use fanout::{MediaSource, SourceContext, SourceSnapshot};
pub use status::SourceStatus;
