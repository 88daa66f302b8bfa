//! Slot addresses
//!
//! An address identifies one leaf slot in the allocation tree as an ordered
//! integer sequence, one entry per tree level, leaf first. Rendering reverses
//! the sequence and joins it root-to-leaf, which is the shape backends and
//! the catalog's location table expect.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Position of one slot in the allocation tree
///
/// Stored leaf-to-root in memory; `[3, 0, 7]` is slot 3 of child 0 of root
/// child 7, rendered as `7/0/3`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SlotAddress(Vec<u32>);

impl SlotAddress {
    /// Create an address from leaf-to-root slot numbers
    pub fn new(slots: Vec<u32>) -> Self {
        SlotAddress(slots)
    }

    /// Slot numbers, leaf first
    pub fn slots(&self) -> &[u32] {
        &self.0
    }

    /// Number of tree levels this address spans
    pub fn levels(&self) -> usize {
        self.0.len()
    }

    /// Render to a backend path under the given base
    pub fn to_path(&self, base: &Path) -> PathBuf {
        let mut path = base.to_path_buf();
        for slot in self.0.iter().rev() {
            path.push(slot.to_string());
        }
        path
    }
}

impl fmt::Display for SlotAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for slot in self.0.iter().rev() {
            if !first {
                write!(f, "/")?;
            }
            write!(f, "{}", slot)?;
            first = false;
        }
        Ok(())
    }
}

impl FromStr for SlotAddress {
    type Err = StoreError;

    /// Parse the rendered (root-to-leaf) form back into an address
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut slots = s
            .split('/')
            .map(|part| {
                part.parse::<u32>()
                    .map_err(|_| StoreError::InvalidAddress(s.to_string()))
            })
            .collect::<Result<Vec<u32>, _>>()?;
        if slots.is_empty() {
            return Err(StoreError::InvalidAddress(s.to_string()));
        }
        slots.reverse();
        Ok(SlotAddress(slots))
    }
}
