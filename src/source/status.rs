//! Source status
//!
//! ```text
//!   INIT ──(headers / first keyframe)──► OK ──► GONE | NOT_FOUND | FORBIDDEN
//!                                        ▲       UNAUTHORIZED | TIMEOUT | CONN_FAIL
//!                                        └──────── (upstream rebound) ─┘
//! ```
//!
//! Status changes are broadcast to every attached sink; each protocol layer
//! decides what the user sees (HTTP status, RTMP onStatus, ...).

use std::fmt;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SourceStatus {
    /// Created, no decodable media yet
    #[default]
    Init,
    /// Codec configuration or a keyframe has arrived
    Ok,
    /// Upstream ended the stream
    Gone,
    /// Upstream requires credentials
    Unauthorized,
    /// Upstream refused access
    Forbidden,
    /// Upstream has no such stream
    NotFound,
    /// Upstream did not answer in time
    Timeout,
    /// Upstream connection failed
    ConnFail,
}

impl SourceStatus {
    /// Whether this is a failure state
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SourceStatus::Init | SourceStatus::Ok)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceStatus::Init => "INIT",
            SourceStatus::Ok => "OK",
            SourceStatus::Gone => "GONE",
            SourceStatus::Unauthorized => "UNAUTHORIZED",
            SourceStatus::Forbidden => "FORBIDDEN",
            SourceStatus::NotFound => "NOT_FOUND",
            SourceStatus::Timeout => "TIMEOUT",
            SourceStatus::ConnFail => "CONN_FAIL",
        }
    }
}

impl fmt::Display for SourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
