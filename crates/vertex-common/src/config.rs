//! High-availability configuration.
//!
//! These structures define the configurable aspects of a VertexDB master
//! that are relevant to cluster coordination.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the HA master coordinator.
///
/// # Example
///
/// ```rust
/// use vertex_common::config::HaConfig;
///
/// let config = HaConfig::default();
/// assert_eq!(config.id_batch_size, 1000);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HaConfig {
    /// Logical name of the cluster this master serves.
    /// Default: "vertex.ha"
    pub cluster_name: String,

    /// How long a slave transaction may sit idle on the master before the
    /// reaper force-rolls it back. Must exceed the slowest legitimate
    /// request round-trip.
    /// Default: 20 s
    pub read_lock_timeout: Duration,

    /// Optional cap on how long one lock acquisition may wait on the
    /// master before the slave is told to re-send. `None` waits until
    /// granted or deadlocked.
    /// Default: None
    pub lock_wait_timeout: Option<Duration>,

    /// How many entity ids the master hands a slave per allocation request.
    /// Default: 1000
    pub id_batch_size: u64,

    /// Delay between reaper sweeps over the transaction registry.
    /// Default: 5 s
    pub reaper_interval: Duration,
}

impl Default for HaConfig {
    fn default() -> Self {
        Self {
            cluster_name: "vertex.ha".to_string(),
            read_lock_timeout: Duration::from_secs(20),
            lock_wait_timeout: None,
            id_batch_size: 1000,
            reaper_interval: Duration::from_secs(5),
        }
    }
}

impl HaConfig {
    /// Creates a configuration with aggressive timings for tests.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            cluster_name: "vertex.test".to_string(),
            read_lock_timeout: Duration::from_millis(200),
            lock_wait_timeout: None,
            id_batch_size: 10,
            reaper_interval: Duration::from_millis(25),
        }
    }

    /// Validates the configuration and returns an error if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.cluster_name.is_empty() {
            return Err("cluster_name must not be empty".to_string());
        }

        if self.read_lock_timeout.is_zero() {
            return Err("read_lock_timeout must be non-zero".to_string());
        }

        if matches!(self.lock_wait_timeout, Some(timeout) if timeout.is_zero()) {
            return Err("lock_wait_timeout must be non-zero when set".to_string());
        }

        if self.id_batch_size == 0 {
            return Err("id_batch_size must be non-zero".to_string());
        }

        if self.reaper_interval.is_zero() {
            return Err("reaper_interval must be non-zero".to_string());
        }

        if self.read_lock_timeout < self.reaper_interval {
            return Err(
                "read_lock_timeout must be at least as long as reaper_interval".to_string(),
            );
        }

        Ok(())
    }
}
