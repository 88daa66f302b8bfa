//! Local-filesystem backend
//!
//! Reference implementation of the storage capability, rooted at a base
//! directory. Container entry limits are the allocator's concern; this
//! backend just moves bytes. `remaining` is quota-based: a local directory
//! has no externally-used component to subtract, so free capacity is the
//! configured quota minus the managed tree's summed file sizes.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};
use walkdir::WalkDir;

use crate::error::{Result, StoreError};

use super::{StorageBackend, WalkEntry};

/// Byte storage on the local filesystem
pub struct LocalBackend {
    root: PathBuf,
    quota: Option<u64>,
}

impl LocalBackend {
    /// Create a backend rooted at `root`, with unlimited capacity
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        info!("local backend rooted at {:?}", root);
        Ok(LocalBackend { root, quota: None })
    }

    /// Create a backend with a byte quota for `remaining` accounting
    pub fn with_quota<P: AsRef<Path>>(root: P, quota: u64) -> Result<Self> {
        let mut backend = Self::new(root)?;
        backend.quota = Some(quota);
        Ok(backend)
    }

    /// The managed root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Summed size of every file under `path`
    fn tree_usage(&self, path: &Path) -> Result<u64> {
        let mut total = 0u64;
        for entry in WalkDir::new(path) {
            let entry = entry.map_err(|e| StoreError::Load {
                path: path.to_path_buf(),
                source: e.into(),
            })?;
            if entry.file_type().is_file() {
                total += entry
                    .metadata()
                    .map_err(|e| StoreError::Load {
                        path: entry.path().to_path_buf(),
                        source: e.into(),
                    })?
                    .len();
            }
        }
        Ok(total)
    }
}

impl StorageBackend for LocalBackend {
    fn save(&self, data: &[u8], path: &Path) -> Result<bool> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| StoreError::Save {
                path: path.to_path_buf(),
                source,
            })?;
        }
        let existed = path.exists();
        fs::write(path, data).map_err(|source| StoreError::Save {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(
            "saved {} bytes to {:?} ({})",
            data.len(),
            path,
            if existed { "overwrite" } else { "new" }
        );
        Ok(!existed)
    }

    fn load(&self, path: &Path) -> Result<Vec<u8>> {
        fs::read(path).map_err(|source| StoreError::Load {
            path: path.to_path_buf(),
            source,
        })
    }

    fn delete(&self, path: &Path) -> Result<()> {
        fs::remove_file(path).map_err(|source| StoreError::Delete {
            path: path.to_path_buf(),
            source,
        })
    }

    fn walk(&self, path: &Path) -> Result<Vec<WalkEntry>> {
        let mut entries = Vec::new();
        let mut pending = vec![path.to_path_buf()];
        while let Some(dir) = pending.pop() {
            let mut subdirs = Vec::new();
            let mut files = Vec::new();
            for child in fs::read_dir(&dir)? {
                let child = child?;
                let name = child.file_name().to_string_lossy().into_owned();
                if child.file_type()?.is_dir() {
                    subdirs.push(name);
                } else {
                    files.push(name);
                }
            }
            subdirs.sort();
            files.sort();
            pending.extend(subdirs.iter().map(|name| dir.join(name)));
            entries.push(WalkEntry { dir, subdirs, files });
        }
        Ok(entries)
    }

    fn file_size(&self, path: &Path) -> Result<u64> {
        let meta = fs::metadata(path).map_err(|source| StoreError::Load {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(meta.len())
    }

    fn wipe(&self, path: &Path) -> Result<()> {
        if path.exists() {
            fs::remove_dir_all(path).map_err(|source| StoreError::Delete {
                path: path.to_path_buf(),
                source,
            })?;
        }
        fs::create_dir_all(path)?;
        Ok(())
    }

    fn remaining(&self, path: &Path) -> Result<u64> {
        match self.quota {
            Some(quota) => Ok(quota.saturating_sub(self.tree_usage(path)?)),
            None => Ok(u64::MAX),
        }
    }
}
