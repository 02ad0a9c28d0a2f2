//! Transaction lifecycle statistics.
//!
//! Tracked by the transaction manager (C6) and merged with the lock
//! manager's own [`crate::transaction::lock_manager::LockStats`] to answer
//! `getStats()`/`getSystemHealth()`. Lock-specific counters (requests,
//! waits, escalations) live on the lock manager itself rather than here —
//! there is no escalation concept in the flat shared/exclusive lock model
//! this core uses.

use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Common trait for statistics components in the transaction layer.
pub trait ComponentStats: Send + Sync {
    type Summary: Clone + Send + Sync;

    fn get_summary(&self) -> Self::Summary;
    fn reset(&self);
    fn component_name(&self) -> &'static str;
}

#[derive(Debug, Default)]
struct Counters {
    total_transactions: u64,
    committed_transactions: u64,
    aborted_transactions: u64,
    active_transactions: u64,
    total_duration: Duration,
}

/// Thread-safe collector for C6's `totalTransactions, committedTransactions,
/// abortedTransactions, activeTransactions, averageDuration, totalDuration`.
pub struct TransactionStatistics {
    counters: Mutex<Counters>,
}

impl TransactionStatistics {
    pub fn new() -> Self {
        Self {
            counters: Mutex::new(Counters::default()),
        }
    }

    pub fn record_begin(&self) {
        let mut c = self.counters.lock();
        c.total_transactions += 1;
        c.active_transactions += 1;
    }

    pub fn record_commit(&self, duration: Duration) {
        let mut c = self.counters.lock();
        c.committed_transactions += 1;
        c.active_transactions = c.active_transactions.saturating_sub(1);
        c.total_duration += duration;
    }

    pub fn record_abort(&self, duration: Duration) {
        let mut c = self.counters.lock();
        c.aborted_transactions += 1;
        c.active_transactions = c.active_transactions.saturating_sub(1);
        c.total_duration += duration;
    }

    pub fn get_summary(&self) -> StatisticsSummary {
        let c = self.counters.lock();
        let terminated = c.committed_transactions + c.aborted_transactions;
        let average_duration = if terminated > 0 {
            c.total_duration / terminated as u32
        } else {
            Duration::ZERO
        };

        StatisticsSummary {
            total_transactions: c.total_transactions,
            committed_transactions: c.committed_transactions,
            aborted_transactions: c.aborted_transactions,
            active_transactions: c.active_transactions,
            total_duration: c.total_duration,
            average_duration,
        }
    }

    pub fn reset(&self) {
        *self.counters.lock() = Counters::default();
    }
}

impl Default for TransactionStatistics {
    fn default() -> Self {
        Self::new()
    }
}

impl ComponentStats for TransactionStatistics {
    type Summary = StatisticsSummary;

    fn get_summary(&self) -> Self::Summary {
        self.get_summary()
    }

    fn reset(&self) {
        self.reset();
    }

    fn component_name(&self) -> &'static str {
        "TransactionStatistics"
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatisticsSummary {
    pub total_transactions: u64,
    pub committed_transactions: u64,
    pub aborted_transactions: u64,
    pub active_transactions: u64,
    #[serde(with = "duration_millis")]
    pub total_duration: Duration,
    #[serde(with = "duration_millis")]
    pub average_duration: Duration,
}

impl StatisticsSummary {
    /// `committed / (committed + aborted)`, `0.0` when nothing has
    /// terminated yet.
    pub fn commit_rate(&self) -> f64 {
        let terminated = self.committed_transactions + self.aborted_transactions;
        if terminated == 0 {
            0.0
        } else {
            self.committed_transactions as f64 / terminated as f64
        }
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u128(d.as_millis())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(d)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_begin_commit_abort() {
        let stats = TransactionStatistics::new();
        stats.record_begin();
        stats.record_begin();
        stats.record_commit(Duration::from_millis(10));
        stats.record_abort(Duration::from_millis(20));

        let summary = stats.get_summary();
        assert_eq!(summary.total_transactions, 2);
        assert_eq!(summary.committed_transactions, 1);
        assert_eq!(summary.aborted_transactions, 1);
        assert_eq!(summary.active_transactions, 0);
        assert_eq!(summary.total_duration, Duration::from_millis(30));
        assert_eq!(summary.average_duration, Duration::from_millis(15));
        assert!((summary.commit_rate() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn average_duration_is_zero_before_any_termination() {
        let stats = TransactionStatistics::new();
        stats.record_begin();
        let summary = stats.get_summary();
        assert_eq!(summary.average_duration, Duration::ZERO);
        assert_eq!(summary.commit_rate(), 0.0);
    }

    #[test]
    fn reset_clears_all_counters() {
        let stats = TransactionStatistics::new();
        stats.record_begin();
        stats.record_commit(Duration::from_millis(5));
        stats.reset();
        let summary = stats.get_summary();
        assert_eq!(summary.total_transactions, 0);
        assert_eq!(summary.total_duration, Duration::ZERO);
    }
}
