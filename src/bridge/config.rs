//! Bridge configuration

use std::collections::HashSet;
use std::time::Duration;

use super::translator::BridgeKind;

/// Bridge lifecycle options
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Tear a bridge down once its output has had no consumers this long
    pub idle_timeout: Duration,

    /// How often the idle condition is checked
    pub check_interval: Duration,

    /// Translations that must not be created even if registered
    pub disabled: HashSet<BridgeKind>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(30),
            check_interval: Duration::from_secs(5),
            disabled: HashSet::new(),
        }
    }
}

impl BridgeConfig {
    /// Set the idle timeout
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Set the idle check interval
    pub fn check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Disable a translation
    pub fn disable(mut self, kind: BridgeKind) -> Self {
        self.disabled.insert(kind);
        self
    }

    pub fn is_disabled(&self, kind: &BridgeKind) -> bool {
        self.disabled.contains(kind)
    }
}
