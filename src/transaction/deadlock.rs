//! Deadlock detection.
//!
//! Pure and on-demand: given a snapshot of the active transactions and the
//! lock manager, reports cycles in a lock-based wait-for graph and in an
//! explicit resource-allocation graph, flags isolation-level conflicts that
//! look like they could be deadlocks without proving a cycle, and lists
//! transactions that have simply run too long. Detection never mutates
//! anything and never picks a victim — that decision belongs to the caller.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use crate::common::TransactionId;

use super::lock_manager::LockManager;
use super::types::{IsolationLevel, Transaction, TransactionState};

/// Which sub-detectors to run, and the timeout-victim threshold.
#[derive(Debug, Clone, Copy)]
pub struct DeadlockOptions {
    pub use_lock_graph: bool,
    pub use_resource_graph: bool,
    pub use_timeout_detection: bool,
    pub timeout_threshold: Duration,
}

impl Default for DeadlockOptions {
    fn default() -> Self {
        Self {
            use_lock_graph: true,
            use_resource_graph: true,
            use_timeout_detection: true,
            timeout_threshold: Duration::from_millis(10_000),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadlockEntry {
    pub kind: &'static str,
    pub transactions: Vec<TransactionId>,
    pub resources: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuspectedConflict {
    BidirectionalDependency,
    Tx1DependsOnTx2,
    Tx2DependsOnTx1,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuspectedDeadlock {
    pub transactions: (TransactionId, TransactionId),
    pub conflict: SuspectedConflict,
}

/// The resource-allocation graph: who holds what, who wants what.
#[derive(Debug, Clone, Default)]
pub struct ResourceGraph {
    pub held: HashMap<TransactionId, HashSet<String>>,
    pub holders: HashMap<String, HashSet<TransactionId>>,
    pub waiting: HashMap<TransactionId, HashSet<String>>,
}

#[derive(Debug, Clone, Default)]
pub struct DeadlockReport {
    pub deadlocks: Vec<DeadlockEntry>,
    pub suspected_deadlocks: Vec<SuspectedDeadlock>,
    pub timeout_victims: Vec<TransactionId>,
    pub wait_for_graph: Option<HashMap<TransactionId, HashSet<TransactionId>>>,
    pub resource_graph: Option<ResourceGraph>,
}

/// Runs the configured deadlock sub-detectors over a snapshot of the
/// currently ACTIVE transactions.
pub fn detect(transactions: &[Transaction], lock_manager: &LockManager, opts: &DeadlockOptions) -> DeadlockReport {
    if transactions.len() < 2 {
        return DeadlockReport::default();
    }

    let mut report = DeadlockReport::default();
    let mut seen = HashSet::new();

    if opts.use_lock_graph {
        let graph = build_lock_wait_for_graph(transactions, lock_manager);
        for cycle in find_cycles(&graph) {
            push_deduped(&mut report.deadlocks, &mut seen, "lock", cycle, transactions);
        }
        report.wait_for_graph = Some(graph);
    }

    if opts.use_resource_graph {
        let resource_graph = build_resource_graph(transactions, lock_manager);
        let wait_for = resource_graph_to_wait_for(&resource_graph);
        for cycle in find_cycles(&wait_for) {
            push_deduped(&mut report.deadlocks, &mut seen, "resource", cycle, transactions);
        }
        report.resource_graph = Some(resource_graph);
    }

    report.suspected_deadlocks = detect_isolation_suspicion(transactions);

    if opts.use_timeout_detection {
        report.timeout_victims = transactions
            .iter()
            .filter(|txn| {
                txn.get_duration()
                    .map(|d| d > opts.timeout_threshold)
                    .unwrap_or(false)
            })
            .map(|txn| txn.id)
            .collect();
    }

    report
}

fn push_deduped(
    out: &mut Vec<DeadlockEntry>,
    seen: &mut HashSet<String>,
    kind: &'static str,
    cycle: Vec<TransactionId>,
    transactions: &[Transaction],
) {
    let mut resources: Vec<String> = cycle
        .iter()
        .filter_map(|id| transactions.iter().find(|t| t.id == *id))
        .flat_map(|t| t.read_set.iter().chain(t.write_set.iter()).cloned())
        .collect();
    resources.sort();
    resources.dedup();

    let mut ids = cycle.clone();
    ids.sort_unstable();

    let key = format!(
        "{kind}:{}:{}",
        ids.iter().map(|i| i.to_string()).collect::<Vec<_>>().join(","),
        resources.join(",")
    );
    if seen.insert(key) {
        out.push(DeadlockEntry {
            kind,
            transactions: cycle,
            resources,
        });
    }
}

fn operation_keys(txn: &Transaction) -> HashSet<String> {
    txn.read_set.iter().chain(txn.write_set.iter()).cloned().collect()
}

fn build_lock_wait_for_graph(
    transactions: &[Transaction],
    lock_manager: &LockManager,
) -> HashMap<TransactionId, HashSet<TransactionId>> {
    let stats = lock_manager.get_stats();
    let mut holders_by_key: HashMap<&str, &[TransactionId]> = HashMap::new();
    for record in &stats.records_locked {
        holders_by_key.insert(record.record_key.as_str(), &record.holders);
    }

    let mut graph: HashMap<TransactionId, HashSet<TransactionId>> = HashMap::new();
    for txn in transactions {
        // "w" waits for holder "h" of key "k" iff w has an operation on k
        // and currently holds no locks at all. Preserved literally.
        if lock_manager.holds_locks(txn.id) {
            continue;
        }
        let mut waits_for = HashSet::new();
        for key in operation_keys(txn) {
            if let Some(holders) = holders_by_key.get(key.as_str()) {
                for &holder in holders.iter() {
                    if holder != txn.id {
                        waits_for.insert(holder);
                    }
                }
            }
        }
        if !waits_for.is_empty() {
            graph.insert(txn.id, waits_for);
        }
    }
    graph
}

fn build_resource_graph(transactions: &[Transaction], lock_manager: &LockManager) -> ResourceGraph {
    let stats = lock_manager.get_stats();
    let mut graph = ResourceGraph::default();

    for record in &stats.records_locked {
        graph
            .holders
            .insert(record.record_key.clone(), record.holders.iter().copied().collect());
        for &holder in &record.holders {
            graph
                .held
                .entry(holder)
                .or_default()
                .insert(record.record_key.clone());
        }
    }

    for txn in transactions {
        if lock_manager.holds_locks(txn.id) {
            continue;
        }
        let keys: HashSet<String> = operation_keys(txn)
            .into_iter()
            .filter(|k| graph.holders.contains_key(k))
            .collect();
        if !keys.is_empty() {
            graph.waiting.insert(txn.id, keys);
        }
    }

    graph
}

fn resource_graph_to_wait_for(graph: &ResourceGraph) -> HashMap<TransactionId, HashSet<TransactionId>> {
    let mut wait_for: HashMap<TransactionId, HashSet<TransactionId>> = HashMap::new();
    for (&waiter, resources) in &graph.waiting {
        let mut holders = HashSet::new();
        for resource in resources {
            if let Some(holder_set) = graph.holders.get(resource) {
                for &holder in holder_set {
                    if holder != waiter {
                        holders.insert(holder);
                    }
                }
            }
        }
        if !holders.is_empty() {
            wait_for.insert(waiter, holders);
        }
    }
    wait_for
}

/// One DFS-with-recursion-stack pass per start node; reports the first back
/// edge each start node finds.
fn find_cycles(graph: &HashMap<TransactionId, HashSet<TransactionId>>) -> Vec<Vec<TransactionId>> {
    let mut cycles = Vec::new();
    for &start in graph.keys() {
        let mut visited = HashSet::new();
        let mut stack = Vec::new();
        if let Some(cycle) = dfs_find_cycle(start, graph, &mut visited, &mut stack) {
            cycles.push(cycle);
        }
    }
    cycles
}

fn dfs_find_cycle(
    node: TransactionId,
    graph: &HashMap<TransactionId, HashSet<TransactionId>>,
    visited: &mut HashSet<TransactionId>,
    stack: &mut Vec<TransactionId>,
) -> Option<Vec<TransactionId>> {
    if let Some(pos) = stack.iter().position(|&n| n == node) {
        return Some(stack[pos..].to_vec());
    }
    if visited.contains(&node) {
        return None;
    }
    visited.insert(node);
    stack.push(node);

    if let Some(neighbors) = graph.get(&node) {
        let mut sorted: Vec<_> = neighbors.iter().copied().collect();
        sorted.sort_unstable();
        for next in sorted {
            if let Some(cycle) = dfs_find_cycle(next, graph, visited, stack) {
                return Some(cycle);
            }
        }
    }

    stack.pop();
    None
}

fn detect_isolation_suspicion(transactions: &[Transaction]) -> Vec<SuspectedDeadlock> {
    let active: Vec<&Transaction> = transactions
        .iter()
        .filter(|t| t.state == TransactionState::Active)
        .collect();

    let mut suspected = Vec::new();
    for i in 0..active.len() {
        for j in (i + 1)..active.len() {
            let a = active[i];
            let b = active[j];
            if a.isolation_level < IsolationLevel::RepeatableRead && b.isolation_level < IsolationLevel::RepeatableRead {
                continue;
            }

            let a_depends_b = a.read_set.iter().any(|k| b.write_set.contains(k));
            let b_depends_a = b.read_set.iter().any(|k| a.write_set.contains(k));

            let conflict = match (a_depends_b, b_depends_a) {
                (true, true) => Some(SuspectedConflict::BidirectionalDependency),
                (true, false) => Some(SuspectedConflict::Tx1DependsOnTx2),
                (false, true) => Some(SuspectedConflict::Tx2DependsOnTx1),
                (false, false) => None,
            };

            if let Some(conflict) = conflict {
                suspected.push(SuspectedDeadlock {
                    transactions: (a.id, b.id),
                    conflict,
                });
            }
        }
    }
    suspected
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::lock_manager::LockType;
    use crate::transaction::types::{OperationType, TransactionOptions};

    fn active_txn(id: TransactionId) -> Transaction {
        let mut txn = Transaction::new(id, TransactionOptions::default());
        txn.begin().unwrap();
        txn
    }

    #[test]
    fn fewer_than_two_transactions_yields_empty_report() {
        let lm = LockManager::new();
        let txns = vec![active_txn(1)];
        let report = detect(&txns, &lm, &DeadlockOptions::default());
        assert!(report.deadlocks.is_empty());
        assert!(report.wait_for_graph.is_none());
    }

    #[test]
    fn waiters_without_any_lock_hold_produce_a_wait_for_edge() {
        let lm = LockManager::new();
        lm.try_acquire(1, "a", LockType::Exclusive);

        let mut t1 = active_txn(1);
        t1.add_operation(OperationType::Set, "a", None, Some(serde_json::json!(1)), None)
            .unwrap();
        let mut t2 = active_txn(2);
        t2.add_operation(OperationType::Set, "a", None, Some(serde_json::json!(1)), None)
            .unwrap();

        let txns = vec![t1, t2];
        let report = detect(&txns, &lm, &DeadlockOptions::default());
        let graph = report.wait_for_graph.unwrap();
        assert_eq!(graph.get(&2), Some(&HashSet::from([1])));
        assert!(!graph.contains_key(&1));
    }

    #[test]
    fn timeout_victim_is_reported() {
        let lm = LockManager::new();
        let mut t1 = active_txn(1);
        t1.start_time = Some(std::time::SystemTime::now() - Duration::from_secs(20));
        let mut t2 = active_txn(2);
        t2.start_time = Some(std::time::SystemTime::now());

        let opts = DeadlockOptions {
            timeout_threshold: Duration::from_secs(10),
            ..Default::default()
        };
        let report = detect(&[t1, t2], &lm, &opts);
        assert_eq!(report.timeout_victims, vec![1]);
    }

    #[test]
    fn isolation_suspicion_flags_bidirectional_dependency() {
        let lm = LockManager::new();
        let mut opts1 = TransactionOptions::default();
        opts1.isolation_level = IsolationLevel::RepeatableRead;
        let mut t1 = Transaction::new(1, opts1);
        t1.begin().unwrap();
        t1.add_operation(OperationType::Read, "k1", None, None, None).unwrap();
        t1.add_operation(OperationType::Set, "k2", None, Some(serde_json::json!(1)), None)
            .unwrap();

        let mut opts2 = TransactionOptions::default();
        opts2.isolation_level = IsolationLevel::RepeatableRead;
        let mut t2 = Transaction::new(2, opts2);
        t2.begin().unwrap();
        t2.add_operation(OperationType::Read, "k2", None, None, None).unwrap();
        t2.add_operation(OperationType::Set, "k1", None, Some(serde_json::json!(1)), None)
            .unwrap();

        let report = detect(&[t1, t2], &lm, &DeadlockOptions::default());
        assert_eq!(report.suspected_deadlocks.len(), 1);
        assert_eq!(
            report.suspected_deadlocks[0].conflict,
            SuspectedConflict::BidirectionalDependency
        );
    }

    #[test]
    fn cycle_search_finds_three_way_cycle() {
        let graph: HashMap<TransactionId, HashSet<TransactionId>> = HashMap::from([
            (1, HashSet::from([2])),
            (2, HashSet::from([3])),
            (3, HashSet::from([1])),
        ]);
        let cycles = find_cycles(&graph);
        assert!(!cycles.is_empty());
        assert!(cycles.iter().any(|c| c.len() == 3));
    }
}
