//! Controller configuration
//!
//! All tunables carry the defaults of the reference hostpath deployment:
//! 15 s resync, fixed backoff, five failures before parking, 15 s lease,
//! 10 s renew deadline, 2 s retry period, 30 s leadership term.

use crate::error::ConfigError;
use hostpath_types::PROVISIONER_NAME;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Top-level controller configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Identity of this instance, stamped on every volume it creates
    #[serde(default)]
    pub identity: String,

    /// Provisioner name, recorded in the provisioned-by annotation
    #[serde(default = "default_provisioner_name")]
    pub provisioner_name: String,

    /// Claims must name this class to be eligible
    #[serde(default = "default_class_name")]
    pub class_name: String,

    /// Backend-selection parameters passed on every provision request
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,

    /// Full relist interval
    #[serde(default = "default_resync_period", with = "hostpath_types::duration_serde")]
    pub resync_period: Duration,

    /// Worker count per queue
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Deadline applied to each backend call, in milliseconds
    #[serde(default)]
    pub backend_timeout_ms: Option<u64>,

    /// Retry policy
    #[serde(default)]
    pub backoff: BackoffConfig,

    /// Leader election
    #[serde(default)]
    pub election: ElectionConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            identity: String::new(),
            provisioner_name: default_provisioner_name(),
            class_name: default_class_name(),
            parameters: BTreeMap::new(),
            resync_period: default_resync_period(),
            workers: default_workers(),
            backend_timeout_ms: None,
            backoff: BackoffConfig::default(),
            election: ElectionConfig::default(),
        }
    }
}

impl ControllerConfig {
    /// Configuration for the given instance identity with defaults elsewhere
    pub fn for_identity(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            ..Default::default()
        }
    }

    pub fn backend_timeout(&self) -> Option<Duration> {
        self.backend_timeout_ms.map(Duration::from_millis)
    }

    /// Name of the lease record replicas contend for
    pub fn lease_name(&self) -> String {
        self.election
            .lease_name
            .clone()
            .unwrap_or_else(|| self.provisioner_name.replace('/', "-"))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.identity.trim().is_empty() {
            return Err(ConfigError::Missing("identity"));
        }
        if self.provisioner_name.trim().is_empty() {
            return Err(ConfigError::Missing("provisioner name"));
        }
        if self.class_name.trim().is_empty() {
            return Err(ConfigError::Missing("class name"));
        }
        if self.workers == 0 {
            return Err(ConfigError::Invalid("workers must be at least 1".into()));
        }
        if self.resync_period.is_zero() {
            return Err(ConfigError::Invalid("resync period must be non-zero".into()));
        }
        self.backoff.validate()?;
        self.election.validate()
    }
}

/// How retry delays grow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffMode {
    /// Same delay for every attempt
    #[default]
    Fixed,
    /// Doubling delay up to a cap
    Exponential,
}

/// Retry and failure-threshold policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffConfig {
    #[serde(default)]
    pub mode: BackoffMode,

    /// Consecutive failures after which a claim is parked
    #[serde(default = "default_failed_retry_threshold")]
    pub failed_retry_threshold: u32,

    /// Delay used by fixed mode
    #[serde(default = "default_resync_period", with = "hostpath_types::duration_serde")]
    pub retry_delay: Duration,

    /// First delay in exponential mode
    #[serde(default = "default_base_delay", with = "hostpath_types::duration_serde")]
    pub base_delay: Duration,

    /// Cap in exponential mode
    #[serde(default = "default_max_delay", with = "hostpath_types::duration_serde")]
    pub max_delay: Duration,

    /// Delay after a not-ready signal from the backend
    #[serde(default = "default_not_ready_delay", with = "hostpath_types::duration_serde")]
    pub not_ready_delay: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            mode: BackoffMode::Fixed,
            failed_retry_threshold: default_failed_retry_threshold(),
            retry_delay: default_resync_period(),
            base_delay: default_base_delay(),
            max_delay: default_max_delay(),
            not_ready_delay: default_not_ready_delay(),
        }
    }
}

impl BackoffConfig {
    pub fn exponential() -> Self {
        Self {
            mode: BackoffMode::Exponential,
            ..Default::default()
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.failed_retry_threshold == 0 {
            return Err(ConfigError::Invalid(
                "failed retry threshold must be at least 1".into(),
            ));
        }
        if self.mode == BackoffMode::Exponential && self.base_delay > self.max_delay {
            return Err(ConfigError::Invalid(
                "base delay must not exceed max delay".into(),
            ));
        }
        Ok(())
    }
}

/// Leader election timing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionConfig {
    /// Disable to run as sole leader
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Lease record name; derived from the provisioner name when absent
    #[serde(default)]
    pub lease_name: Option<String>,

    #[serde(default = "default_lease_duration", with = "hostpath_types::duration_serde")]
    pub lease_duration: Duration,

    #[serde(default = "default_renew_deadline", with = "hostpath_types::duration_serde")]
    pub renew_deadline: Duration,

    #[serde(default = "default_retry_period", with = "hostpath_types::duration_serde")]
    pub retry_period: Duration,

    /// Voluntary rotation after this long as leader; zero disables rotation
    #[serde(default = "default_term_limit", with = "hostpath_types::duration_serde")]
    pub term_limit: Duration,
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            lease_name: None,
            lease_duration: default_lease_duration(),
            renew_deadline: default_renew_deadline(),
            retry_period: default_retry_period(),
            term_limit: default_term_limit(),
        }
    }
}

impl ElectionConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if !self.enabled {
            return Ok(());
        }
        if self.retry_period.is_zero() {
            return Err(ConfigError::Invalid("retry period must be non-zero".into()));
        }
        if self.renew_deadline <= self.retry_period {
            return Err(ConfigError::Invalid(
                "renew deadline must be greater than retry period".into(),
            ));
        }
        if self.lease_duration <= self.renew_deadline {
            return Err(ConfigError::Invalid(
                "lease duration must be greater than renew deadline".into(),
            ));
        }
        Ok(())
    }
}

// Default value helpers
fn default_true() -> bool {
    true
}

fn default_provisioner_name() -> String {
    PROVISIONER_NAME.to_string()
}

fn default_class_name() -> String {
    "hostpath".to_string()
}

fn default_resync_period() -> Duration {
    Duration::from_secs(15)
}

fn default_workers() -> usize {
    4
}

fn default_failed_retry_threshold() -> u32 {
    5
}

fn default_base_delay() -> Duration {
    Duration::from_millis(500)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(122)
}

fn default_not_ready_delay() -> Duration {
    Duration::from_secs(2)
}

fn default_lease_duration() -> Duration {
    Duration::from_secs(15)
}

fn default_renew_deadline() -> Duration {
    Duration::from_secs(10)
}

fn default_retry_period() -> Duration {
    Duration::from_secs(2)
}

fn default_term_limit() -> Duration {
    Duration::from_secs(30)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ControllerConfig::for_identity("node-a");
        assert_eq!(config.resync_period, Duration::from_secs(15));
        assert_eq!(config.backoff.mode, BackoffMode::Fixed);
        assert_eq!(config.backoff.failed_retry_threshold, 5);
        assert_eq!(config.election.lease_duration, Duration::from_secs(15));
        assert_eq!(config.election.renew_deadline, Duration::from_secs(10));
        assert_eq!(config.election.retry_period, Duration::from_secs(2));
        assert_eq!(config.election.term_limit, Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_identity_is_mandatory() {
        let config = ControllerConfig::default();
        assert_eq!(config.validate(), Err(ConfigError::Missing("identity")));

        let config = ControllerConfig::for_identity("   ");
        assert_eq!(config.validate(), Err(ConfigError::Missing("identity")));
    }

    #[test]
    fn test_election_timing_ordering() {
        let mut config = ControllerConfig::for_identity("node-a");
        config.election.renew_deadline = Duration::from_secs(20);
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        config.election.renew_deadline = Duration::from_secs(1);
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        // Timing is irrelevant when election is off
        config.election.enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_lease_name_derivation() {
        let mut config = ControllerConfig::for_identity("node-a");
        config.provisioner_name = "example.com/hostpath".into();
        assert_eq!(config.lease_name(), "example.com-hostpath");

        config.election.lease_name = Some("custom".into());
        assert_eq!(config.lease_name(), "custom");
    }

    #[test]
    fn test_zero_threshold_rejected() {
        let mut config = ControllerConfig::for_identity("node-a");
        config.backoff.failed_retry_threshold = 0;
        assert!(config.validate().is_err());
    }
}
