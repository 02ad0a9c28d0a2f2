//! Runtime configuration for the transaction core.
//!
//! Scoped to what this crate actually governs: lock acquisition, deadlock
//! scanning and cleanup. Storage, networking, clustering and security
//! configuration belong to the record store this core is embedded in.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::transaction::{DeadlockOptions, IsolationLevel};

/// Configuration for a [`crate::transaction::TransactionManager`] instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Isolation level used by `begin` when the caller doesn't specify one.
    pub default_isolation: IsolationLevel,

    /// How long a transaction waits for a single lock before failing with a
    /// `Concurrency` error.
    pub lock_timeout: Duration,

    /// Wall-clock lifetime of a transaction before operations on it start
    /// failing with a `timeout` state error.
    pub transaction_timeout: Duration,

    /// How often a background caller should invoke `detect_deadlocks`.
    pub deadlock_detection_interval: Duration,

    /// Options passed to `detect_deadlocks` on each scan.
    pub deadlock_options: DeadlockOptionsConfig,

    /// `max_age` passed to `cleanup` when run on a timer.
    pub cleanup_max_age: Duration,

    /// How often a background caller should invoke `cleanup`.
    pub cleanup_interval: Duration,
}

/// Serializable mirror of [`DeadlockOptions`] (which cannot derive
/// `Serialize` itself: it carries no closures, but keeping the wire form
/// distinct avoids coupling the config schema to the detector's internals).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DeadlockOptionsConfig {
    pub use_lock_graph: bool,
    pub use_resource_graph: bool,
    pub use_timeout_detection: bool,
    pub timeout_threshold: Duration,
}

impl From<DeadlockOptionsConfig> for DeadlockOptions {
    fn from(c: DeadlockOptionsConfig) -> Self {
        DeadlockOptions {
            use_lock_graph: c.use_lock_graph,
            use_resource_graph: c.use_resource_graph,
            use_timeout_detection: c.use_timeout_detection,
            timeout_threshold: c.timeout_threshold,
        }
    }
}

impl Default for DeadlockOptionsConfig {
    fn default() -> Self {
        let defaults = DeadlockOptions::default();
        Self {
            use_lock_graph: defaults.use_lock_graph,
            use_resource_graph: defaults.use_resource_graph,
            use_timeout_detection: defaults.use_timeout_detection,
            timeout_threshold: defaults.timeout_threshold,
        }
    }
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            default_isolation: IsolationLevel::ReadCommitted,
            lock_timeout: Duration::from_secs(30),
            transaction_timeout: Duration::from_secs(60),
            deadlock_detection_interval: Duration::from_secs(1),
            deadlock_options: DeadlockOptionsConfig::default(),
            cleanup_max_age: Duration::from_secs(3600),
            cleanup_interval: Duration::from_secs(300),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_lock_manager_and_deadlock_detector_defaults() {
        let config = CoreConfig::default();
        assert_eq!(config.lock_timeout, Duration::from_secs(30));
        let opts: DeadlockOptions = config.deadlock_options.into();
        assert_eq!(opts.timeout_threshold, DeadlockOptions::default().timeout_threshold);
    }
}
