//! Fragment store orchestration
//!
//! Composes the catalog, allocator, codec, and a synchronized backend into
//! the store API: fingerprint the payload, look it up or insert it, allocate
//! or reuse a slot, wrap, write, and record the mapping. Identical content
//! is written exactly once.

use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::allocator::{SlotAddress, SlotAllocator};
use crate::backend::{StorageBackend, SynchronizedBackend};
use crate::catalog::{
    Fingerprint, Fragment, FragmentCatalog, FragmentFilter, FragmentOrder, FragmentStream,
    NewFragment, DEFAULT_PAGE_SIZE,
};
use crate::codec::{self, PadScheme};
use crate::error::{Result, StoreError};

/// Manifest format version this build reads and writes.
const MANIFEST_VERSION: u32 = 1;

/// Manifest file name under the store base.
const MANIFEST_FILE: &str = "store.json";

/// Persisted store geometry, validated on reopen
///
/// Tree fanout and codec defaults must not drift between runs: addresses
/// recorded under one geometry are meaningless under another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreManifest {
    pub version: u32,
    pub max_items: u32,
    pub max_depth: u32,
    pub block_len: u16,
    pub scheme: PadScheme,
}

/// Tunables for a fragment store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Backend path the managed tree lives under
    pub base_path: PathBuf,
    /// Hard entry limit per backend container
    pub max_items: u32,
    /// Directory levels below the base
    pub max_depth: u32,
    /// Codec block length for new writes
    pub block_len: u16,
    /// Padding scheme for new writes
    pub scheme: PadScheme,
}

impl StoreConfig {
    fn manifest(&self) -> StoreManifest {
        StoreManifest {
            version: MANIFEST_VERSION,
            max_items: self.max_items,
            max_depth: self.max_depth,
            block_len: self.block_len,
            scheme: self.scheme,
        }
    }
}

/// Content-addressed fragment store
///
/// Thread-safe as a whole: the catalog carries its own reentrant guard, the
/// allocator is serialized here, and every backend call goes through the
/// synchronization decorator.
pub struct FragmentStore<B: StorageBackend> {
    catalog: FragmentCatalog,
    allocator: Mutex<SlotAllocator>,
    backend: SynchronizedBackend<B>,
    config: StoreConfig,
}

impl<B: StorageBackend> FragmentStore<B> {
    /// Open a store, rebuilding allocator state from persisted locations
    ///
    /// Validates the on-backend manifest against `config` (writing it on
    /// first open), then replays every cataloged address through the
    /// allocator so fresh allocations never collide with stored payloads.
    pub fn open(backend: B, catalog: FragmentCatalog, config: StoreConfig) -> Result<Self> {
        let backend = SynchronizedBackend::exclusive(backend);
        let store = FragmentStore {
            allocator: Mutex::new(SlotAllocator::new(config.max_items, config.max_depth)),
            catalog,
            backend,
            config,
        };
        store.check_manifest()?;
        store.replay_locations()?;
        info!(
            "opened fragment store at {:?} ({} fragments live)",
            store.config.base_path,
            store.allocator.lock().live()
        );
        Ok(store)
    }

    fn check_manifest(&self) -> Result<()> {
        let path = self.config.base_path.join(MANIFEST_FILE);
        let expected = self.config.manifest();
        match self.backend.load(&path) {
            Ok(bytes) => {
                let found: StoreManifest = serde_json::from_slice(&bytes)?;
                if found != expected {
                    return Err(StoreError::Manifest(format!(
                        "found {:?}, configured {:?}",
                        found, expected
                    )));
                }
                Ok(())
            }
            Err(StoreError::Load { .. }) => {
                debug!("writing fresh store manifest");
                let bytes = serde_json::to_vec(&expected)?;
                self.backend.save(&bytes, &path)?;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn replay_locations(&self) -> Result<()> {
        let mut allocator = self.allocator.lock();
        for row in self.catalog.locations(DEFAULT_PAGE_SIZE)? {
            allocator.reserve(&row?.address)?;
        }
        Ok(())
    }

    /// Persist a payload, writing it only on first occurrence
    ///
    /// Returns the fragment record either way. A racing insert of the same
    /// content is resolved by the catalog's uniqueness constraint: the loser
    /// retries as a lookup and performs no backend I/O.
    pub fn put(&self, payload: &[u8]) -> Result<Fragment> {
        let fingerprint = Fingerprint::of(payload);
        match self.catalog.get(&FragmentFilter::Fingerprint(fingerprint)) {
            Ok(existing) => {
                debug!("dedupe hit for {}", fingerprint);
                return Ok(existing);
            }
            Err(StoreError::NotFound) => {}
            Err(e) => return Err(e),
        }

        let wrapped = codec::wrap(payload, self.config.block_len, self.config.scheme)?;
        let new = NewFragment {
            fingerprint,
            raw_size: payload.len() as u64,
            stored_size: wrapped.len() as u64,
        };

        let fragment = match self.catalog.create(&new) {
            Ok(created) => created,
            Err(StoreError::AlreadyExists(_)) => {
                let existing = self.catalog.get(&FragmentFilter::Fingerprint(fingerprint))?;
                debug!("dedupe hit for {}", fingerprint);
                return Ok(existing);
            }
            Err(e) => return Err(e),
        };

        let address = self.allocator.lock().allocate()?;
        let path = address.to_path(&self.config.base_path);
        if let Err(e) = self
            .backend
            .save(&wrapped, &path)
            .and_then(|_| self.catalog.record_location(fragment.id, &address))
        {
            // Undo the half-completed insert so the catalog never points at
            // bytes that were not written.
            warn!("rolling back fragment {} after failed write: {}", fragment.id, e);
            let _ = self.backend.delete(&path);
            let _ = self.catalog.delete(&FragmentFilter::Id(fragment.id));
            let _ = self.allocator.lock().release(&address);
            return Err(e);
        }

        debug!(
            "stored fragment {} at {} ({} -> {} bytes)",
            fragment.id, address, fragment.raw_size, fragment.stored_size
        );
        Ok(fragment)
    }

    /// Read a payload back by fingerprint
    ///
    /// Unwraps the stored blob and verifies its fingerprint; a mismatch
    /// surfaces as [`StoreError::Corrupted`] rather than silently returning
    /// wrong bytes.
    pub fn get(&self, fingerprint: &Fingerprint) -> Result<Vec<u8>> {
        let fragment = self
            .catalog
            .get(&FragmentFilter::Fingerprint(*fingerprint))?;
        let address = self
            .catalog
            .location_of(fragment.id)?
            .ok_or(StoreError::NotFound)?;
        let wrapped = self.backend.load(&address.to_path(&self.config.base_path))?;
        let payload = codec::unwrap(&wrapped)?;
        if Fingerprint::of(&payload) != *fingerprint {
            return Err(StoreError::Corrupted(fingerprint.to_hex()));
        }
        Ok(payload)
    }

    /// Whether a payload with this fingerprint is cataloged
    pub fn contains(&self, fingerprint: &Fingerprint) -> Result<bool> {
        match self.catalog.get(&FragmentFilter::Fingerprint(*fingerprint)) {
            Ok(_) => Ok(true),
            Err(StoreError::NotFound) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Remove a fragment: backend object, slot, and catalog rows
    ///
    /// This is the administrative path an external garbage collector calls;
    /// nothing in the store invokes it on its own. The freed slot returns to
    /// the allocator's gap pool for dense reuse.
    pub fn remove(&self, fingerprint: &Fingerprint) -> Result<()> {
        let fragment = self
            .catalog
            .get(&FragmentFilter::Fingerprint(*fingerprint))?;
        if let Some(address) = self.catalog.location_of(fragment.id)? {
            self.backend
                .delete(&address.to_path(&self.config.base_path))?;
            self.allocator.lock().release(&address)?;
        }
        // Cascades to the location row
        self.catalog.delete(&FragmentFilter::Id(fragment.id))?;
        debug!("removed fragment {} ({})", fragment.id, fingerprint);
        Ok(())
    }

    /// Stream cataloged fragments in bounded pages
    pub fn fragments(
        &self,
        filter: FragmentFilter,
        order: FragmentOrder,
    ) -> Result<FragmentStream<'_>> {
        self.catalog.stream_all(filter, order, DEFAULT_PAGE_SIZE)
    }

    /// Estimated free backend capacity under the managed base
    pub fn remaining(&self) -> Result<u64> {
        self.backend.remaining(&self.config.base_path)
    }

    /// The catalog this store writes through
    pub fn catalog(&self) -> &FragmentCatalog {
        &self.catalog
    }

    /// The store configuration
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }
}

/// Builder for a [`FragmentStore`]
///
/// ```rust,no_run
/// use fragstore_rs::{FragmentStoreBuilder, LocalBackend, Result};
///
/// # fn main() -> Result<()> {
/// let backend = LocalBackend::new("/data/fragments")?;
/// let store = FragmentStoreBuilder::new(backend, "/data/fragments")
///     .max_items(500)
///     .max_depth(1)
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct FragmentStoreBuilder<B: StorageBackend> {
    backend: B,
    base_path: PathBuf,
    catalog_path: Option<PathBuf>,
    max_items: u32,
    max_depth: u32,
    block_len: u16,
    scheme: PadScheme,
}

impl<B: StorageBackend> FragmentStoreBuilder<B> {
    /// Start a builder for a store rooted at `base_path` on `backend`
    pub fn new<P: AsRef<Path>>(backend: B, base_path: P) -> Self {
        FragmentStoreBuilder {
            backend,
            base_path: base_path.as_ref().to_path_buf(),
            catalog_path: None,
            max_items: 500,
            max_depth: 1,
            block_len: 4096,
            scheme: PadScheme::Pkcs7,
        }
    }

    /// Catalog database location (defaults to in-memory, for tests)
    pub fn catalog_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.catalog_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Hard entry limit per backend container
    pub fn max_items(mut self, max_items: u32) -> Self {
        self.max_items = max_items;
        self
    }

    /// Directory levels below the base
    pub fn max_depth(mut self, max_depth: u32) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Codec block length for new writes
    pub fn block_len(mut self, block_len: u16) -> Self {
        self.block_len = block_len;
        self
    }

    /// Padding scheme for new writes
    pub fn scheme(mut self, scheme: PadScheme) -> Self {
        self.scheme = scheme;
        self
    }

    /// Open the store
    pub fn build(self) -> Result<FragmentStore<B>> {
        let catalog = match &self.catalog_path {
            Some(path) => FragmentCatalog::open(path)?,
            None => FragmentCatalog::open_in_memory()?,
        };
        FragmentStore::open(
            self.backend,
            catalog,
            StoreConfig {
                base_path: self.base_path,
                max_items: self.max_items,
                max_depth: self.max_depth,
                block_len: self.block_len,
                scheme: self.scheme,
            },
        )
    }
}
