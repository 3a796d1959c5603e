//! rdj-room configuration
//!
//! Loaded from TOML; every field has a compiled default so a partial (or
//! missing) file still yields a complete configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub scheduler: SchedulerConfig,
    pub queue: QueueConfig,
    pub sync: SyncConfig,
    pub intake: IntakeConfig,
    pub auth: AuthConfig,
    pub store: StoreConfig,
}

impl ServiceConfig {
    /// Load from an optional TOML file, falling back to defaults
    pub fn load(path: Option<&Path>) -> crate::Result<Self> {
        let config: ServiceConfig = rdj_common::config::load_toml_or_default(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would disable scheduling or intake outright
    pub fn validate(&self) -> crate::Result<()> {
        if self.scheduler.poll_interval_ms == 0 {
            return Err(crate::Error::Config(
                "scheduler.poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.scheduler.guard_timeout_ms == 0 {
            return Err(crate::Error::Config(
                "scheduler.guard_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.queue.per_submitter_cap == 0 {
            return Err(crate::Error::Config(
                "queue.per_submitter_cap must be at least 1".to_string(),
            ));
        }
        if self.sync.heartbeat_interval_ms == 0 {
            return Err(crate::Error::Config(
                "sync.heartbeat_interval_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Autonomous scheduler tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Fixed-interval idle poll
    pub poll_interval_ms: u64,
    /// Poll/notification triggers this soon after the previous advance are dropped
    pub coalesce_window_ms: u64,
    /// A guard held longer than this is considered stuck and may be taken over
    pub guard_timeout_ms: u64,
    /// Optimistic-write retries within one advance
    pub max_conflict_retries: u32,
    /// A playing track this far past its known duration counts as finished
    pub overrun_grace_ms: u64,
    /// How long intake waits for its inline advance to finish
    pub inline_advance_timeout_ms: u64,
}

impl SchedulerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn coalesce_window(&self) -> Duration {
        Duration::from_millis(self.coalesce_window_ms)
    }

    pub fn guard_timeout(&self) -> Duration {
        Duration::from_millis(self.guard_timeout_ms)
    }

    pub fn inline_advance_timeout(&self) -> Duration {
        Duration::from_millis(self.inline_advance_timeout_ms)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 3000,
            coalesce_window_ms: 2000,
            guard_timeout_ms: 10_000,
            max_conflict_retries: 3,
            overrun_grace_ms: 5000,
            inline_advance_timeout_ms: 2000,
        }
    }
}

/// Queue ordering policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderingPolicy {
    /// Strict arrival order
    Append,
    /// Interleave submitters: everyone's k-th request before anyone's (k+1)-th
    RoundRobin,
}

/// Queue manager settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub per_submitter_cap: usize,
    pub ordering: OrderingPolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            per_submitter_cap: 3,
            ordering: OrderingPolicy::Append,
        }
    }
}

/// Viewer drift-correction settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub heartbeat_interval_ms: u64,
    pub drift_tolerance_ms: u64,
}

impl SyncConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 15_000,
            drift_tolerance_ms: 2000,
        }
    }
}

/// Request intake settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IntakeConfig {
    pub metadata_timeout_ms: u64,
    pub max_dedication_len: usize,
    pub max_title_len: usize,
}

impl IntakeConfig {
    pub fn metadata_timeout(&self) -> Duration {
        Duration::from_millis(self.metadata_timeout_ms)
    }
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            metadata_timeout_ms: 4000,
            max_dedication_len: 280,
            max_title_len: 200,
        }
    }
}

/// Static capability table
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Users holding the room-controller capability in every room
    pub controllers: Vec<String>,
    /// Users holding the moderator capability in every room
    pub moderators: Vec<String>,
}

/// Transient-error retry policy for store calls
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub retry_attempts: u32,
    pub retry_base_delay_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            retry_attempts: 4,
            retry_base_delay_ms: 50,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = ServiceConfig::default();
        assert_eq!(config.scheduler.poll_interval_ms, 3000);
        assert_eq!(config.scheduler.coalesce_window_ms, 2000);
        assert_eq!(config.queue.per_submitter_cap, 3);
        assert_eq!(config.queue.ordering, OrderingPolicy::Append);
        assert_eq!(config.sync.heartbeat_interval_ms, 15_000);
        assert_eq!(config.sync.drift_tolerance_ms, 2000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_overrides() {
        let config: ServiceConfig = rdj_common::config::parse_toml(
            r#"
            [queue]
            ordering = "round_robin"

            [sync]
            drift_tolerance_ms = 750

            [auth]
            controllers = ["dj-anna"]
            "#,
        )
        .unwrap();
        assert_eq!(config.queue.ordering, OrderingPolicy::RoundRobin);
        assert_eq!(config.queue.per_submitter_cap, 3);
        assert_eq!(config.sync.drift_tolerance_ms, 750);
        assert_eq!(config.sync.heartbeat_interval_ms, 15_000);
        assert_eq!(config.auth.controllers, vec!["dj-anna".to_string()]);
    }

    #[test]
    fn test_zero_cap_rejected() {
        let mut config = ServiceConfig::default();
        config.queue.per_submitter_cap = 0;
        assert!(config.validate().is_err());
    }
}
