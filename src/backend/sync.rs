//! Serialization decorator for backends
//!
//! Wraps any [`StorageBackend`] so that all calls against one decorated
//! instance are serialized by a single lock, exclusive or reentrant as
//! chosen at construction. The lock is held for the full duration of each
//! delegated call and released on every exit path, including failure.
//! Different decorated instances never share a lock.

use std::path::Path;

use parking_lot::{Mutex, ReentrantMutex};

use crate::error::Result;

use super::{StorageBackend, WalkEntry};

enum BackendLock {
    Exclusive(Mutex<()>),
    Reentrant(ReentrantMutex<()>),
}

enum BackendGuard<'a> {
    Exclusive(parking_lot::MutexGuard<'a, ()>),
    Reentrant(parking_lot::ReentrantMutexGuard<'a, ()>),
}

impl BackendLock {
    fn acquire(&self) -> BackendGuard<'_> {
        match self {
            BackendLock::Exclusive(m) => BackendGuard::Exclusive(m.lock()),
            BackendLock::Reentrant(m) => BackendGuard::Reentrant(m.lock()),
        }
    }
}

/// At-most-one-operation decorator around a backend instance
///
/// Use the exclusive flavor for plain mutual exclusion; the reentrant
/// flavor when a backend operation may re-enter the same decorated instance
/// on the same thread (a composed backend delegating to itself).
pub struct SynchronizedBackend<B> {
    inner: B,
    lock: BackendLock,
}

impl<B: StorageBackend> SynchronizedBackend<B> {
    /// Serialize with an exclusive lock
    pub fn exclusive(inner: B) -> Self {
        SynchronizedBackend {
            inner,
            lock: BackendLock::Exclusive(Mutex::new(())),
        }
    }

    /// Serialize with a reentrant lock
    pub fn reentrant(inner: B) -> Self {
        SynchronizedBackend {
            inner,
            lock: BackendLock::Reentrant(ReentrantMutex::new(())),
        }
    }

    /// The decorated backend
    pub fn inner(&self) -> &B {
        &self.inner
    }

    /// Unwrap, discarding the lock
    pub fn into_inner(self) -> B {
        self.inner
    }
}

impl<B: StorageBackend> StorageBackend for SynchronizedBackend<B> {
    fn save(&self, data: &[u8], path: &Path) -> Result<bool> {
        let _guard = self.lock.acquire();
        self.inner.save(data, path)
    }

    fn load(&self, path: &Path) -> Result<Vec<u8>> {
        let _guard = self.lock.acquire();
        self.inner.load(path)
    }

    fn delete(&self, path: &Path) -> Result<()> {
        let _guard = self.lock.acquire();
        self.inner.delete(path)
    }

    fn walk(&self, path: &Path) -> Result<Vec<WalkEntry>> {
        let _guard = self.lock.acquire();
        self.inner.walk(path)
    }

    fn file_size(&self, path: &Path) -> Result<u64> {
        let _guard = self.lock.acquire();
        self.inner.file_size(path)
    }

    fn wipe(&self, path: &Path) -> Result<()> {
        let _guard = self.lock.acquire();
        self.inner.wipe(path)
    }

    fn remaining(&self, path: &Path) -> Result<u64> {
        let _guard = self.lock.acquire();
        self.inner.remaining(path)
    }
}
