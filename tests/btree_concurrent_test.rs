//! Concurrency tests for the B+Tree: latch crabbing under parallel clients

use std::sync::Arc;
use std::thread;

use burrow::buffer::BufferPoolManager;
use burrow::common::{PageId, RecordId, SlotId};
use burrow::index::{BPlusTree, IndexKey, U64Comparator};
use burrow::storage::disk::DiskManager;

use tempfile::NamedTempFile;

fn create_tree(pool_size: usize, leaf_max: u16, internal_max: u16) -> (Arc<BufferPoolManager>, Arc<BPlusTree>, NamedTempFile) {
    let temp_file = NamedTempFile::new().unwrap();
    let disk_manager = Arc::new(DiskManager::new(temp_file.path()).unwrap());
    let bpm = Arc::new(BufferPoolManager::new(pool_size, 2, disk_manager));
    let tree = Arc::new(
        BPlusTree::new(
            "concurrent_pk",
            Arc::clone(&bpm),
            Arc::new(U64Comparator),
            leaf_max,
            internal_max,
        )
        .unwrap(),
    );
    (bpm, tree, temp_file)
}

fn key(v: u64) -> IndexKey {
    v.to_le_bytes()
}

fn rid(v: u64) -> RecordId {
    RecordId::new(PageId::new(v as u32), SlotId::new(0))
}

#[test]
fn test_concurrent_disjoint_inserts() {
    let (bpm, tree, _temp) = create_tree(256, 8, 8);

    let low = Arc::clone(&tree);
    let high = Arc::clone(&tree);
    let t1 = thread::spawn(move || {
        for v in 1..=1000u64 {
            assert!(low.insert(&key(v), rid(v)).unwrap());
        }
    });
    let t2 = thread::spawn(move || {
        for v in 1001..=2000u64 {
            assert!(high.insert(&key(v), rid(v)).unwrap());
        }
    });
    t1.join().unwrap();
    t2.join().unwrap();

    let keys: Vec<u64> = tree
        .iter()
        .unwrap()
        .map(|entry| u64::from_le_bytes(entry.unwrap().0))
        .collect();
    assert_eq!(keys, (1..=2000).collect::<Vec<_>>());

    // no frame leaks once the workload quiesces
    assert_eq!(bpm.pinned_frame_count(), 0);
}

#[test]
fn test_concurrent_readers_during_inserts() {
    let (bpm, tree, _temp) = create_tree(256, 8, 8);

    for v in 1..=500u64 {
        tree.insert(&key(v), rid(v)).unwrap();
    }

    let writer_tree = Arc::clone(&tree);
    let writer = thread::spawn(move || {
        for v in 501..=1500u64 {
            assert!(writer_tree.insert(&key(v), rid(v)).unwrap());
        }
    });

    let readers: Vec<_> = (0..3)
        .map(|_| {
            let tree = Arc::clone(&tree);
            thread::spawn(move || {
                for round in 0..4 {
                    for v in 1..=500u64 {
                        let found = tree.get_value(&key(v)).unwrap();
                        assert_eq!(found, Some(rid(v)), "round {round}: lost key {v}");
                    }
                }
            })
        })
        .collect();

    writer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }

    for v in 1..=1500u64 {
        assert_eq!(tree.get_value(&key(v)).unwrap(), Some(rid(v)));
    }
    assert_eq!(bpm.pinned_frame_count(), 0);
}

#[test]
fn test_concurrent_scans_during_inserts() {
    let (bpm, tree, _temp) = create_tree(256, 8, 8);

    for v in (1..=1000u64).filter(|v| v % 2 == 0) {
        tree.insert(&key(v), rid(v)).unwrap();
    }

    let writer_tree = Arc::clone(&tree);
    let writer = thread::spawn(move || {
        for v in (1..=1000u64).filter(|v| v % 2 == 1) {
            writer_tree.insert(&key(v), rid(v)).unwrap();
        }
    });

    let scanner_tree = Arc::clone(&tree);
    let scanner = thread::spawn(move || {
        // every scan must observe a sorted sequence containing at least
        // the even keys present from the start
        for _ in 0..10 {
            let keys: Vec<u64> = scanner_tree
                .iter()
                .unwrap()
                .map(|entry| u64::from_le_bytes(entry.unwrap().0))
                .collect();
            assert!(keys.windows(2).all(|w| w[0] < w[1]), "scan out of order");
            assert!(keys.len() >= 500, "scan dropped settled keys");
        }
    });

    writer.join().unwrap();
    scanner.join().unwrap();

    let keys: Vec<u64> = tree
        .iter()
        .unwrap()
        .map(|entry| u64::from_le_bytes(entry.unwrap().0))
        .collect();
    assert_eq!(keys, (1..=1000).collect::<Vec<_>>());
    assert_eq!(bpm.pinned_frame_count(), 0);
}
