//! Persisted fragment locations
//!
//! The allocation tree is never persisted; the only durable record of where
//! a fragment lives is its rendered slot address in the location table.
//! Replaying these rows through the allocator's `reserve` rebuilds the tree
//! after a restart.

use std::collections::VecDeque;

use crate::allocator::SlotAddress;
use crate::error::Result;

use super::FragmentCatalog;

/// One row of the location table: fragment id plus its slot address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredLocation {
    pub fragment_id: i64,
    pub address: SlotAddress,
}

/// Bounded-page iterator over every persisted location
///
/// Same paging discipline as fragment streaming: the matching count is taken
/// once up front, rows arrive in pages of `page_size`, and every yielded row
/// is detached before the next page is fetched.
pub struct LocationStream<'a> {
    pub(super) catalog: &'a FragmentCatalog,
    pub(super) page_size: usize,
    pub(super) total: u64,
    pub(super) yielded: u64,
    pub(super) offset: u64,
    pub(super) page: VecDeque<StoredLocation>,
}

impl LocationStream<'_> {
    /// Rows this stream will yield in total
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Rewind to the first row
    pub fn restart(&mut self) {
        self.yielded = 0;
        self.offset = 0;
        self.page.clear();
    }
}

impl Iterator for LocationStream<'_> {
    type Item = Result<StoredLocation>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.yielded >= self.total {
            return None;
        }
        if self.page.is_empty() {
            let fetched = self
                .catalog
                .fetch_location_page(self.offset, self.page_size, &mut self.page);
            match fetched {
                Ok(0) => return None,
                Ok(n) => self.offset += n as u64,
                Err(e) => return Some(Err(e)),
            }
        }
        let row = self.page.pop_front()?;
        self.yielded += 1;
        Some(Ok(row))
    }
}
