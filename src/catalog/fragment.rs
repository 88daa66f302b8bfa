//! Fragment records and their query vocabulary
//!
//! A fragment is the catalog's unit of deduplication: one row per distinct
//! payload content, keyed by a SHA-256 fingerprint. Records handed out by the
//! catalog are detached snapshots, never live cursors.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::StoreError;

/// Length of a fingerprint digest in bytes.
pub const FINGERPRINT_LEN: usize = 32;

/// Content fingerprint: SHA-256 over the raw payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint([u8; FINGERPRINT_LEN]);

impl Fingerprint {
    /// Digest a payload
    pub fn of(payload: &[u8]) -> Self {
        let digest = Sha256::digest(payload);
        let mut bytes = [0u8; FINGERPRINT_LEN];
        bytes.copy_from_slice(&digest);
        Fingerprint(bytes)
    }

    /// Raw digest bytes
    pub fn as_bytes(&self) -> &[u8; FINGERPRINT_LEN] {
        &self.0
    }

    /// Lowercase hex rendering, the catalog's storage form
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for Fingerprint {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s)
            .ok()
            .filter(|b| b.len() == FINGERPRINT_LEN)
            .ok_or_else(|| StoreError::InvalidFingerprint(s.to_string()))?;
        let mut out = [0u8; FINGERPRINT_LEN];
        out.copy_from_slice(&bytes);
        Ok(Fingerprint(out))
    }
}

/// One catalog row: metadata for a distinct payload content
///
/// Created on the first occurrence of a fingerprint and immutable thereafter
/// except for administrative updates; only an external garbage collector
/// destroys fragment rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fragment {
    /// Sequential row id
    pub id: i64,
    /// Content digest, unique across the whole catalog
    pub fingerprint: Fingerprint,
    /// Payload size before wrapping
    pub raw_size: u64,
    /// Size actually written to the backend
    pub stored_size: u64,
}

/// Attributes for a fragment to be inserted or applied as an update
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewFragment {
    pub fingerprint: Fingerprint,
    pub raw_size: u64,
    pub stored_size: u64,
}

/// Closed predicate vocabulary for fragment queries
///
/// Compiled to parameterized SQL; there is deliberately no free-form filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FragmentFilter {
    /// Every row
    All,
    /// Match by row id
    Id(i64),
    /// Match by content fingerprint
    Fingerprint(Fingerprint),
    /// Match by raw payload size
    RawSize(u64),
}

impl FragmentFilter {
    /// WHERE clause and bound parameters for this predicate
    pub(crate) fn to_sql(&self) -> (&'static str, Vec<rusqlite::types::Value>) {
        use rusqlite::types::Value;
        match self {
            FragmentFilter::All => ("1 = 1", Vec::new()),
            FragmentFilter::Id(id) => ("id = ?", vec![Value::Integer(*id)]),
            FragmentFilter::Fingerprint(fp) => {
                ("fingerprint = ?", vec![Value::Text(fp.to_hex())])
            }
            FragmentFilter::RawSize(size) => {
                ("raw_size = ?", vec![Value::Integer(*size as i64)])
            }
        }
    }
}

/// Orderings accepted by streaming enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentOrder {
    Id,
    Fingerprint,
    RawSize,
}

impl FragmentOrder {
    pub(crate) fn column(&self) -> &'static str {
        match self {
            FragmentOrder::Id => "id",
            FragmentOrder::Fingerprint => "fingerprint",
            FragmentOrder::RawSize => "raw_size",
        }
    }
}
