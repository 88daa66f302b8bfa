//! Backend storage capability
//!
//! A backend is durable byte storage keyed by path, whose containers carry a
//! hard entry-count limit the allocator is responsible for respecting. The
//! trait is consumed by the orchestrator; connectors for remote services
//! implement it out of tree.

mod local;
mod sync;

pub use local::LocalBackend;
pub use sync::SynchronizedBackend;

use std::path::{Path, PathBuf};

use crate::error::Result;

/// One directory level yielded by [`StorageBackend::walk`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkEntry {
    /// The directory itself
    pub dir: PathBuf,
    /// Names of its immediate subdirectories
    pub subdirs: Vec<String>,
    /// Names of its immediate files
    pub files: Vec<String>,
}

/// Durable byte storage keyed by path
///
/// Contract for every implementation:
/// - Operations take `&self`; implementations that are not internally
///   thread-safe are wrapped in [`SynchronizedBackend`] by the caller.
/// - I/O failures surface as the `Save`/`Load`/`Delete` error taxonomy with
///   the failing path attached, unchanged and unretried - timeout and retry
///   policy belongs to the connector, not this layer.
/// - Paths are always rendered slot addresses below a managed base; the
///   backend never interprets payload bytes.
pub trait StorageBackend: Send {
    /// Write a payload at `path`, creating parent containers as needed.
    ///
    /// Returns `true` when a new object was created, `false` when an
    /// existing object at that path was overwritten.
    fn save(&self, data: &[u8], path: &Path) -> Result<bool>;

    /// Read the payload at `path`.
    fn load(&self, path: &Path) -> Result<Vec<u8>>;

    /// Remove the object at `path`.
    fn delete(&self, path: &Path) -> Result<()>;

    /// Yield `(dir, subdirs, files)` for every directory under `path`,
    /// parents before children.
    fn walk(&self, path: &Path) -> Result<Vec<WalkEntry>>;

    /// Size in bytes of the object at `path`.
    fn file_size(&self, path: &Path) -> Result<u64>;

    /// Remove everything under `path`, leaving an empty container.
    fn wipe(&self, path: &Path) -> Result<()>;

    /// Estimated free capacity in bytes: backend total, minus bytes used
    /// outside this system, minus this system's own tree usage under `path`.
    fn remaining(&self, path: &Path) -> Result<u64>;
}
