//! End-to-end extendible hash table scenarios.

use std::sync::Arc;

use ember_common::{PageId, Rid, Transaction};
use ember_index::page::bucket_array_size;
use ember_index::{ExtendibleHashTable, OrdComparator, SipKeyHasher};
use ember_storage::{FileDiskManager, ParallelBufferPool};
use tempfile::TempDir;

type U32Table = ExtendibleHashTable<u32, u32, OrdComparator<u32>, SipKeyHasher>;

fn make_table(num_instances: usize, pool_size: usize) -> (TempDir, Arc<U32Table>) {
    let dir = TempDir::new().unwrap();
    let disk = Arc::new(FileDiskManager::open(dir.path().join("index.db")).unwrap());
    let pool = Arc::new(ParallelBufferPool::new(num_instances, pool_size, disk, None));
    let table = Arc::new(ExtendibleHashTable::new(
        pool,
        OrdComparator::new(),
        SipKeyHasher,
    ));
    (dir, table)
}

#[test]
fn insert_then_lookup() {
    let (_dir, table) = make_table(2, 16);
    let txn = Transaction::default();

    for k in 0..=100u32 {
        assert!(table.insert(&txn, &k, &k).unwrap());
    }
    for k in 0..=100u32 {
        assert_eq!(table.get_value(&txn, &k).unwrap(), vec![k]);
    }
    assert!(table.get_value(&txn, &999).unwrap().is_empty());
    table.verify_integrity().unwrap();
}

#[test]
fn duplicate_pairs_are_rejected() {
    let (_dir, table) = make_table(2, 16);
    let txn = Transaction::default();

    assert!(table.insert(&txn, &1, &10).unwrap());
    assert!(!table.insert(&txn, &1, &10).unwrap());
    // Same key, different value: multi-map, accepted.
    assert!(table.insert(&txn, &1, &11).unwrap());
    assert_eq!(table.get_value(&txn, &1).unwrap(), vec![10, 11]);

    // Removing an absent pair is a no-op.
    assert!(!table.remove(&txn, &1, &12).unwrap());
    assert_eq!(table.get_value(&txn, &1).unwrap(), vec![10, 11]);
}

#[test]
fn multimap_removal_is_pairwise() {
    let (_dir, table) = make_table(2, 16);
    let txn = Transaction::default();

    for v in 0..5u32 {
        assert!(table.insert(&txn, &7, &v).unwrap());
    }
    assert!(table.remove(&txn, &7, &2).unwrap());

    let mut values = table.get_value(&txn, &7).unwrap();
    values.sort_unstable();
    assert_eq!(values, vec![0, 1, 3, 4]);
}

#[test]
fn overflow_splits_the_bucket() {
    let (_dir, table) = make_table(2, 16);
    let txn = Transaction::default();
    let capacity = bucket_array_size::<u32, u32>() as u32;

    assert_eq!(table.global_depth().unwrap(), 0);

    // One more key than a bucket holds forces at least one split.
    for k in 0..=capacity {
        assert!(table.insert(&txn, &k, &k).unwrap(), "insert of key {k}");
    }
    assert!(table.global_depth().unwrap() >= 1);

    // Both halves stay reachable.
    for k in 0..=capacity {
        assert_eq!(table.get_value(&txn, &k).unwrap(), vec![k], "lookup of key {k}");
    }
    table.verify_integrity().unwrap();
}

#[test]
fn removing_everything_shrinks_to_depth_zero() {
    let (_dir, table) = make_table(2, 16);
    let txn = Transaction::default();
    let capacity = bucket_array_size::<u32, u32>() as u32;

    for k in 0..=capacity {
        assert!(table.insert(&txn, &k, &k).unwrap());
    }
    assert!(table.global_depth().unwrap() >= 1);

    for k in 0..=capacity {
        assert!(table.remove(&txn, &k, &k).unwrap(), "remove of key {k}");
    }

    assert_eq!(table.global_depth().unwrap(), 0);
    for k in 0..=capacity {
        assert!(table.get_value(&txn, &k).unwrap().is_empty());
    }
    table.verify_integrity().unwrap();
}

#[test]
fn emptying_the_root_bucket_never_merges() {
    let (_dir, table) = make_table(2, 8);
    let txn = Transaction::default();

    // At depth zero there is no split image; repeated emptying must not
    // disturb the table.
    for round in 0..10u32 {
        assert!(table.insert(&txn, &round, &round).unwrap());
        assert!(table.remove(&txn, &round, &round).unwrap());
        assert_eq!(table.global_depth().unwrap(), 0);
    }
    table.verify_integrity().unwrap();
}

#[test]
fn grow_then_shrink_repeatedly() {
    let (_dir, table) = make_table(2, 16);
    let txn = Transaction::default();
    let n = bucket_array_size::<u32, u32>() as u32 * 2;

    for round in 0..3 {
        for k in 0..n {
            assert!(table.insert(&txn, &k, &k).unwrap(), "round {round}, key {k}");
        }
        assert!(table.global_depth().unwrap() >= 1);
        table.verify_integrity().unwrap();

        for k in 0..n {
            assert!(table.remove(&txn, &k, &k).unwrap(), "round {round}, key {k}");
        }
        for k in 0..n {
            assert!(table.get_value(&txn, &k).unwrap().is_empty());
        }
        table.verify_integrity().unwrap();
    }
}

#[test]
fn rid_values_round_trip() {
    let dir = TempDir::new().unwrap();
    let disk = Arc::new(FileDiskManager::open(dir.path().join("index.db")).unwrap());
    let pool = Arc::new(ParallelBufferPool::new(2, 16, disk, None));
    let table: ExtendibleHashTable<u64, Rid, OrdComparator<u64>, SipKeyHasher> =
        ExtendibleHashTable::new(pool, OrdComparator::new(), SipKeyHasher);
    let txn = Transaction::default();

    for k in 0..200u64 {
        let rid = Rid::new(PageId::new(k as u32 / 10), k as u32 % 10);
        assert!(table.insert(&txn, &k, &rid).unwrap());
    }
    for k in 0..200u64 {
        let rid = Rid::new(PageId::new(k as u32 / 10), k as u32 % 10);
        assert_eq!(table.get_value(&txn, &k).unwrap(), vec![rid]);
    }
}

#[test]
fn randomized_workload_round_trips() {
    use rand::prelude::*;
    use std::collections::BTreeSet;

    let (_dir, table) = make_table(2, 16);
    let txn = Transaction::default();
    let mut rng = StdRng::seed_from_u64(0x5EED);
    let mut live: BTreeSet<u32> = BTreeSet::new();

    for _ in 0..2000 {
        let k: u32 = rng.gen_range(0..500);
        if live.contains(&k) {
            assert!(table.remove(&txn, &k, &(k * 3)).unwrap());
            live.remove(&k);
        } else {
            assert!(table.insert(&txn, &k, &(k * 3)).unwrap());
            live.insert(k);
        }
    }

    for k in 0..500u32 {
        let values = table.get_value(&txn, &k).unwrap();
        if live.contains(&k) {
            assert_eq!(values, vec![k * 3]);
        } else {
            assert!(values.is_empty(), "key {k} was removed");
        }
    }
    table.verify_integrity().unwrap();
}

#[test]
fn concurrent_inserts_and_lookups() {
    let (_dir, table) = make_table(4, 32);
    const THREADS: u32 = 8;
    const PER_THREAD: u32 = 300;

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let table = Arc::clone(&table);
            std::thread::spawn(move || {
                let txn = Transaction::default();
                let base = t * 10_000;
                for k in base..base + PER_THREAD {
                    assert!(table.insert(&txn, &k, &k).unwrap());
                }
                for k in base..base + PER_THREAD {
                    assert_eq!(table.get_value(&txn, &k).unwrap(), vec![k]);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let txn = Transaction::default();
    for t in 0..THREADS {
        let base = t * 10_000;
        for k in base..base + PER_THREAD {
            assert_eq!(table.get_value(&txn, &k).unwrap(), vec![k]);
        }
    }
    table.verify_integrity().unwrap();
}

#[test]
fn concurrent_removal_keeps_the_rest() {
    let (_dir, table) = make_table(4, 32);
    const THREADS: u32 = 4;
    const PER_THREAD: u32 = 400;

    let txn = Transaction::default();
    for k in 0..THREADS * PER_THREAD {
        assert!(table.insert(&txn, &k, &k).unwrap());
    }

    // Each thread removes the odd keys of its stripe.
    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let table = Arc::clone(&table);
            std::thread::spawn(move || {
                let txn = Transaction::default();
                let base = t * PER_THREAD;
                for k in (base..base + PER_THREAD).filter(|k| k % 2 == 1) {
                    assert!(table.remove(&txn, &k, &k).unwrap());
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    for k in 0..THREADS * PER_THREAD {
        let values = table.get_value(&txn, &k).unwrap();
        if k % 2 == 1 {
            assert!(values.is_empty(), "key {k} should be gone");
        } else {
            assert_eq!(values, vec![k], "key {k} should remain");
        }
    }
    table.verify_integrity().unwrap();
}
