use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("fragment already exists: {0}")]
    AlreadyExists(String),

    #[error("no record matched the given filter")]
    NotFound,

    #[error("delete matched no records")]
    NotExisting,

    #[error("filter matched more than one record where exactly one was required")]
    AmbiguousMatch,

    #[error("allocation tree is full")]
    DirFull,

    #[error("invalid slot address: {0}")]
    InvalidAddress(String),

    #[error("invalid fingerprint: {0}")]
    InvalidFingerprint(String),

    #[error("invalid block length: {0} (must be in 16..=65535)")]
    InvalidBlockLen(u32),

    #[error("unwrap failed: {0}")]
    Unwrap(String),

    #[error("save failed for {path:?}: {source}")]
    Save {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("load failed for {path:?}: {source}")]
    Load {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("delete failed for {path:?}: {source}")]
    Delete {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("stored payload for {0} is corrupted: fingerprint mismatch")]
    Corrupted(String),

    #[error("store manifest mismatch: {0}")]
    Manifest(String),

    #[error("catalog error: {0}")]
    Catalog(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;
