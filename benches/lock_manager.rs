// Lock manager and transaction lifecycle benchmarks: begin/commit, lock
// acquisition under both lock types, and deadlock detection over a growing
// set of active transactions.

use std::sync::Arc;
use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use txn_core::transaction::{
    DeadlockOptions, IsolationLevel, LockManager, LockType, TransactionManager, TransactionOptions,
};

fn bench_transaction_lifecycle(c: &mut Criterion) {
    let manager = TransactionManager::new();

    c.bench_function("begin_commit", |b| {
        b.iter(|| {
            let txn_id = manager.begin(TransactionOptions::default()).unwrap();
            manager.commit(txn_id, &serde_json::json!({})).ok();
            black_box(txn_id);
        });
    });
}

fn bench_isolation_levels(c: &mut Criterion) {
    let mut group = c.benchmark_group("isolation_levels");

    for level in [
        IsolationLevel::ReadUncommitted,
        IsolationLevel::ReadCommitted,
        IsolationLevel::RepeatableRead,
        IsolationLevel::Serializable,
    ] {
        group.bench_with_input(BenchmarkId::from_parameter(format!("{level:?}")), &level, |b, &level| {
            let manager = TransactionManager::new();
            let mut opts = TransactionOptions::default();
            opts.isolation_level = level;
            b.iter(|| {
                let txn_id = manager.begin(opts.clone()).unwrap();
                black_box(txn_id);
                manager.commit(txn_id, &serde_json::json!({})).ok();
            });
        });
    }

    group.finish();
}

fn bench_lock_acquisition(c: &mut Criterion) {
    let mut group = c.benchmark_group("lock_acquisition");

    for lock_type in [LockType::Shared, LockType::Exclusive] {
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{lock_type:?}")),
            &lock_type,
            |b, &lock_type| {
                let lock_manager = Arc::new(LockManager::new());
                let mut next_txn_id = 0u64;

                b.iter(|| {
                    next_txn_id += 1;
                    let resource = format!("row_{next_txn_id}");
                    lock_manager
                        .acquire_lock(next_txn_id, &resource, lock_type, Duration::from_millis(50))
                        .ok();
                    lock_manager.release_all_locks(next_txn_id);
                    black_box(next_txn_id);
                });
            },
        );
    }

    group.finish();
}

fn bench_deadlock_detection(c: &mut Criterion) {
    let mut group = c.benchmark_group("deadlock_detection");

    for size in [10usize, 50, 200] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let manager = TransactionManager::new();
            for _ in 0..size {
                manager.begin(TransactionOptions::default()).unwrap();
            }

            b.iter(|| {
                let report = manager.detect_deadlocks(&DeadlockOptions::default());
                black_box(report);
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_transaction_lifecycle,
    bench_isolation_levels,
    bench_lock_acquisition,
    bench_deadlock_detection,
);
criterion_main!(benches);
