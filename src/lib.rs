//! Quarry - the storage and concurrency core of an educational RDBMS
//!
//! The crate provides the pieces a disk-oriented database is built on: a
//! buffer pool that caches fixed-size pages in memory, an LRU-K policy that
//! picks eviction victims, an immutable copy-on-write trie with a versioned
//! store, and a B+ tree index that keeps its nodes in buffer-pooled pages.
//!
//! # Architecture
//!
//! - **Storage layer** (`storage`): page-granular disk I/O
//!   - `DiskManager`: reads and writes pages in a single database file
//!   - `DiskScheduler`: funnels I/O through a background worker thread
//!
//! - **Buffer pool** (`buffer`): memory management for database pages
//!   - `BufferPoolManager`: page table, free list, pinning, eviction
//!   - `LruKReplacer`: LRU-K replacement policy
//!   - `FrameHeader`: per-frame metadata plus the page latch
//!   - `BasicPageGuard`/`ReadPageGuard`/`WritePageGuard`: RAII pins/latches
//!
//! - **Trie** (`trie`): immutable copy-on-write key/value index
//!   - `Trie`: persistent byte-keyed prefix tree with structural sharing
//!   - `TrieStore`: snapshot reads and serialized writes over a `Trie`
//!
//! - **Index** (`index`): ordered secondary index
//!   - `BPlusTree`: latch-crabbing B+ tree over buffer-pooled pages
//!   - `IndexIterator`: forward scan along the leaf chain
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use quarry::buffer::BufferPoolManager;
//! use quarry::index::{BPlusTree, IntegerComparator};
//! use quarry::storage::disk::DiskManager;
//! use quarry::{RecordId, PageId, SlotId};
//!
//! let disk_manager = Arc::new(DiskManager::new("quarry.db").unwrap());
//! let bpm = Arc::new(BufferPoolManager::new(64, 2, disk_manager));
//!
//! let index = BPlusTree::new(Arc::clone(&bpm), IntegerComparator, 32, 32).unwrap();
//! let key = 42u64.to_le_bytes();
//! index
//!     .insert(&key, RecordId::new(PageId::new(7), SlotId::new(0)))
//!     .unwrap();
//! assert!(index.get_value(&key).unwrap().is_some());
//! ```

pub mod buffer;
pub mod common;
pub mod index;
pub mod storage;
pub mod trie;

// Re-export commonly used types at the crate root
pub use common::{PageId, RecordId, Result, SlotId, StorageError};
