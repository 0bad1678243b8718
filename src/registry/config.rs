//! Registry configuration

use std::time::Duration;

/// What a second publish to a live stream key does
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RepublishPolicy {
    /// Refuse while a publisher is bound
    #[default]
    Reject,
    /// Rebind the existing source to the new publisher
    Replace,
}

/// Configuration for the source registry
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// How long an origin waits for its publisher to come back
    pub stream_resume_timeout: Duration,

    /// Unbound origins older than this are reaped by cleanup
    pub idle_source_timeout: Duration,

    /// Interval between cleanup runs
    pub cleanup_interval: Duration,

    /// Second publish behaviour
    pub republish_policy: RepublishPolicy,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            stream_resume_timeout: Duration::from_secs(10),
            idle_source_timeout: Duration::from_secs(60),
            cleanup_interval: Duration::from_secs(10),
            republish_policy: RepublishPolicy::Reject,
        }
    }
}

impl RegistryConfig {
    /// Set the resume timeout
    pub fn stream_resume_timeout(mut self, timeout: Duration) -> Self {
        self.stream_resume_timeout = timeout;
        self
    }

    /// Set the idle source timeout
    pub fn idle_source_timeout(mut self, timeout: Duration) -> Self {
        self.idle_source_timeout = timeout;
        self
    }

    /// Set the cleanup interval
    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Set the republish policy
    pub fn republish_policy(mut self, policy: RepublishPolicy) -> Self {
        self.republish_policy = policy;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RegistryConfig::default();
        assert_eq!(config.stream_resume_timeout, Duration::from_secs(10));
        assert_eq!(config.idle_source_timeout, Duration::from_secs(60));
        assert_eq!(config.republish_policy, RepublishPolicy::Reject);
    }

    #[test]
    fn test_builder() {
        let config = RegistryConfig::default()
            .stream_resume_timeout(Duration::from_millis(500))
            .cleanup_interval(Duration::ZERO)
            .republish_policy(RepublishPolicy::Replace);

        assert_eq!(config.stream_resume_timeout, Duration::from_millis(500));
        assert_eq!(config.cleanup_interval, Duration::from_millis(1));
        assert_eq!(config.republish_policy, RepublishPolicy::Replace);
    }
}
