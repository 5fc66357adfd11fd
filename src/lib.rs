//! Strata - the storage and indexing core of a disk-backed relational engine
//!
//! The crate caches fixed-size disk pages in a buffer pool and builds an
//! on-disk B+ tree index on top of it. Query execution, cataloging, and
//! recovery live elsewhere; what is here is the memory and concurrency
//! model, the on-disk shape, and the consistency guarantees they rest on.
//!
//! # Architecture
//!
//! - **Storage Layer** (`storage`): page-granular disk I/O
//!   - `DiskManager`: reads/writes pages in a single database file and
//!     allocates page ids
//!   - `DiskScheduler`: background worker thread that performs the I/O
//!   - `HeaderPage`: page 0, mapping index names to root page ids
//!
//! - **Buffer Pool** (`buffer`): memory management for database pages
//!   - `BufferPoolManager`: pins pages into frames and writes them back
//!   - `LruKReplacer`: LRU-K eviction policy
//!   - `ReadPageGuard`/`WritePageGuard`: RAII pin guards
//!
//! - **Containers** (`container`): `ExtendibleHashTable`, the concurrent
//!   page directory used by the buffer pool
//!
//! - **Index** (`index`): `BTreeIndex`, a rooted on-disk B+ tree with
//!   point lookup, insert, delete, and leaf-chained range iteration
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use strata::buffer::BufferPoolManager;
//! use strata::common::{PageId, RecordId, SlotId};
//! use strata::index::BTreeIndex;
//! use strata::storage::disk::DiskManager;
//!
//! let disk_manager = Arc::new(DiskManager::new("test.db").unwrap());
//! let bpm = Arc::new(BufferPoolManager::new(64, 2, disk_manager));
//!
//! let index = BTreeIndex::create("orders_pk", bpm.clone(), 64, 64).unwrap();
//! index
//!     .insert(42, RecordId::new(PageId::new(3), SlotId::new(0)))
//!     .unwrap();
//! assert!(index.get(42).unwrap().is_some());
//!
//! bpm.flush_all_pages().unwrap();
//! ```

pub mod buffer;
pub mod common;
pub mod container;
pub mod index;
pub mod storage;

// Re-export commonly used types at the crate root
pub use common::{PageId, RecordId, Result, SlotId, StrataError};
