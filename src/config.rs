//! Operator Configuration

use crate::domain::ProtectionTag;
use crate::error::{Error, Result};
use crate::retry::RetryPolicy;
use std::time::Duration;

/// Default upper bound on one reconciliation pass
pub const DEFAULT_RUN_DEADLINE: Duration = Duration::from_secs(25);

/// Configuration for the reconciler
#[derive(Debug, Clone, PartialEq)]
pub struct ProtectorConfig {
    /// Tag marking the protected instance
    pub tag: ProtectionTag,
    /// Deadline for a whole pass
    pub run_deadline: Duration,
    /// Retry policy for node-group, instance and tag calls
    pub provider_retry: RetryPolicy,
    /// Retry policy for node annotation calls
    pub annotator_retry: RetryPolicy,
}

impl Default for ProtectorConfig {
    fn default() -> Self {
        Self {
            tag: ProtectionTag::default(),
            run_deadline: DEFAULT_RUN_DEADLINE,
            provider_retry: RetryPolicy::default(),
            annotator_retry: RetryPolicy::default(),
        }
    }
}

impl ProtectorConfig {
    /// Reject configurations the reconciler cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.tag.key.trim().is_empty() {
            return Err(Error::Configuration("protection tag key must not be empty".into()));
        }
        if self.run_deadline.is_zero() {
            return Err(Error::Configuration("run deadline must be positive".into()));
        }
        if self.provider_retry.max_attempts == 0 || self.annotator_retry.max_attempts == 0 {
            return Err(Error::Configuration("retry policies need at least one attempt".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_defaults() {
        let config = ProtectorConfig::default();
        assert_eq!(config.run_deadline, Duration::from_secs(25));
        assert_eq!(config.tag, ProtectionTag::new("protection", "NO_DELETE"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_empty_tag_key() {
        let config = ProtectorConfig {
            tag: ProtectionTag::new(" ", "NO_DELETE"),
            ..Default::default()
        };
        assert_matches!(config.validate(), Err(Error::Configuration(_)));
    }

    #[test]
    fn test_rejects_zero_deadline() {
        let config = ProtectorConfig {
            run_deadline: Duration::ZERO,
            ..Default::default()
        };
        assert_matches!(config.validate(), Err(Error::Configuration(_)));
    }
}
