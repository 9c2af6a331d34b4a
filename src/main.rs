use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use burrow::buffer::BufferPoolManager;
use burrow::common::{PageId, RecordId, SlotId};
use burrow::index::{BPlusTree, U64Comparator};
use burrow::storage::disk::DiskManager;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("Burrow - a disk-backed storage engine core");
    println!("==========================================\n");

    let db_path = "demo.db";
    let disk_manager = Arc::new(DiskManager::new(db_path).expect("failed to open database file"));
    let bpm = Arc::new(BufferPoolManager::new(16, 2, disk_manager));
    println!("Opened {} with a 16-frame buffer pool", db_path);

    let tree = BPlusTree::new("demo_pk", Arc::clone(&bpm), Arc::new(U64Comparator), 4, 4)
        .expect("failed to open index");

    for i in [5u64, 3, 8, 1, 9, 2, 7, 4, 6, 10] {
        let key = i.to_le_bytes();
        let record = RecordId::new(PageId::new(i as u32), SlotId::new(0));
        tree.insert(&key, record).expect("insert failed");
    }
    println!("Inserted keys 1..=10 (leaf/internal max size 4)");
    println!("Root page: {}", tree.root_page_id());

    let probe = 7u64.to_le_bytes();
    match tree.get_value(&probe).expect("lookup failed") {
        Some(record) => println!("get_value(7) = {}", record),
        None => println!("get_value(7) = <missing>"),
    }

    print!("Full scan:");
    for entry in tree.iter().expect("scan failed") {
        let (key, _record) = entry.expect("scan failed");
        print!(" {}", u64::from_le_bytes(key));
    }
    println!();

    for i in 1..=5u64 {
        tree.remove(&i.to_le_bytes()).expect("remove failed");
    }
    print!("After removing 1..=5:");
    for entry in tree.iter().expect("scan failed") {
        let (key, _record) = entry.expect("scan failed");
        print!(" {}", u64::from_le_bytes(key));
    }
    println!();

    bpm.flush_all_pages().expect("flush failed");
    println!("Flushed all pages");

    std::fs::remove_file(db_path).ok();
    println!("\nDemo completed successfully!");
}
