//! Burrow - a disk-backed storage engine core in Rust
//!
//! This crate provides the read/write path of a teaching-grade relational
//! storage engine: a fixed-size buffer pool that caches disk pages in
//! memory, and a clustered B+Tree index that stores sorted key/record-id
//! pairs on top of it.
//!
//! # Architecture
//!
//! The system is organized into several layers:
//!
//! - **Storage Layer** (`storage`): disk I/O and persisted metadata
//!   - `DiskManager`: block-aligned page reads and writes on a single file
//!   - `DiskScheduler`: background worker draining a disk request queue
//!   - `HeaderPage`: page 0, mapping index names to root page ids
//!
//! - **Buffer Pool** (`buffer`): memory management for database pages
//!   - `BufferPoolManager`: fetches pages from disk and caches them in frames
//!   - `LruKReplacer`: LRU-K eviction policy over unpinned frames
//!   - `FrameHeader`: per-frame metadata and page bytes
//!   - `ReadPageGuard`/`WritePageGuard`: RAII pin + page latch
//!
//! - **Index** (`index`): the clustered B+Tree
//!   - `BPlusTree`: search, insert with splits, remove with steal/merge
//!   - `TreeIterator`: range scans along the doubly linked leaf chain
//!   - `KeyComparator`: injected total order over fixed-size keys
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use burrow::buffer::BufferPoolManager;
//! use burrow::index::{BPlusTree, U64Comparator};
//! use burrow::storage::disk::DiskManager;
//! use burrow::common::{PageId, RecordId, SlotId};
//!
//! let disk_manager = Arc::new(DiskManager::new("test.db").unwrap());
//! let bpm = Arc::new(BufferPoolManager::new(100, 2, disk_manager));
//!
//! let tree = BPlusTree::new("demo_pk", bpm, Arc::new(U64Comparator), 64, 64).unwrap();
//! let key = 42u64.to_le_bytes();
//! tree.insert(&key, RecordId::new(PageId::new(7), SlotId::new(0))).unwrap();
//! assert!(tree.get_value(&key).unwrap().is_some());
//! for entry in tree.iter().unwrap() {
//!     let (key, record) = entry.unwrap();
//!     println!("{} -> {}", u64::from_le_bytes(key), record);
//! }
//! ```

pub mod buffer;
pub mod common;
pub mod index;
pub mod storage;

// Re-export commonly used types at the crate root
pub use common::{BurrowError, PageId, RecordId, Result, SlotId};
