//! # Fragstore - Content-Addressed Fragment Storage
//!
//! `fragstore-rs` persists arbitrary byte payloads exactly once per distinct
//! content, across pluggable backends whose containers carry hard limits on
//! entry count (photo albums, FAT directories, bucket shards):
//!
//! - **Deduplicating catalog**: transactional fingerprint -> metadata mapping
//!   with bounded-memory streaming enumeration, backed by embedded SQLite
//! - **Slot allocation**: an unbounded address space mapped onto a
//!   fixed-fanout, fixed-depth tree so no container ever exceeds its limit,
//!   with dense reuse of freed slots
//! - **Self-describing codec**: reversible padding transform whose header
//!   travels with the data, composable with encryption or compression
//! - **Synchronized backends**: a decorator serializing access to backends
//!   that are not internally thread-safe
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use fragstore_rs::{FragmentStoreBuilder, LocalBackend, Result};
//!
//! # fn main() -> Result<()> {
//! let backend = LocalBackend::new("/data/fragments")?;
//! let store = FragmentStoreBuilder::new(backend, "/data/fragments")
//!     .catalog_path("/data/catalog.db")
//!     .max_items(500)
//!     .max_depth(1)
//!     .build()?;
//!
//! // Identical payloads are stored once
//! let fragment = store.put(b"some payload")?;
//! let again = store.put(b"some payload")?;
//! assert_eq!(fragment.id, again.id);
//!
//! let payload = store.get(&fragment.fingerprint)?;
//! assert_eq!(payload, b"some payload");
//! # Ok(())
//! # }
//! ```

pub mod allocator;
pub mod backend;
pub mod catalog;
pub mod codec;
pub mod error;
pub mod store;

pub use crate::allocator::{SlotAddress, SlotAllocator};
pub use crate::backend::{LocalBackend, StorageBackend, SynchronizedBackend, WalkEntry};
pub use crate::catalog::{
    Fingerprint, Fragment, FragmentCatalog, FragmentFilter, FragmentOrder, FragmentStream,
    NewFragment,
};
pub use crate::codec::{unwrap, wrap, PadScheme};
pub use crate::error::{Result, StoreError};
pub use crate::store::{FragmentStore, FragmentStoreBuilder, StoreConfig, StoreManifest};
