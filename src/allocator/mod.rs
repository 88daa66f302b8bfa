//! Slot allocation for container-limited backends
//!
//! Maps an unbounded logical address space onto a fixed-fanout, fixed-depth
//! tree so that no backend container ever holds more than `max_items`
//! entries. Numbering is dense: a freed slot is the first candidate for the
//! next allocation, because some backends cap the highest index ever used
//! rather than the live count.
//!
//! The tree is held as an arena of nodes addressed by dense indices; child
//! and free-child relations are stored as key sets, never as owning
//! references. The tree itself is not persisted - after a restart it is
//! rebuilt by replaying the catalog's stored addresses through [`SlotAllocator::reserve`].

mod address;

pub use address::SlotAddress;

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, warn};

use crate::error::{Result, StoreError};

/// Arena index of the root node.
const ROOT: usize = 0;

/// One container level in the backend tree
///
/// At `depth == max_depth` the occupant set holds leaf-slot numbers; above
/// it, child-folder numbers. A node never exceeds `max_items` occupants.
#[derive(Debug)]
struct Node {
    depth: u32,

    /// Occupied slot numbers at leaf depth (empty above it)
    occupied: BTreeSet<u32>,

    /// Child number -> arena index (empty at leaf depth)
    children: BTreeMap<u32, usize>,

    /// Children known to still have spare capacity, in the order they were
    /// added. A child that turns out full is evicted lazily when an
    /// allocation attempt fails into it.
    free_children: Vec<u32>,
}

impl Node {
    fn new(depth: u32) -> Self {
        Node {
            depth,
            occupied: BTreeSet::new(),
            children: BTreeMap::new(),
            free_children: Vec::new(),
        }
    }
}

/// Smallest non-negative integer not present in the (ordered) set
fn first_gap<'a>(used: impl Iterator<Item = &'a u32>) -> u32 {
    let mut expected = 0u32;
    for &n in used {
        if n != expected {
            return expected;
        }
        expected += 1;
    }
    expected
}

/// Hierarchical slot allocator
///
/// Allocates and reclaims positions in a `max_items`-fanout tree of depth
/// `max_depth`. Total capacity is `max_items^(max_depth + 1)` leaf slots.
///
/// Not internally synchronized: callers needing concurrent allocation must
/// serialize access externally, the same way a non-thread-safe backend is
/// wrapped in a synchronization decorator.
#[derive(Debug)]
pub struct SlotAllocator {
    max_items: u32,
    max_depth: u32,
    nodes: Vec<Node>,
    live: u64,
}

impl SlotAllocator {
    /// Create an empty allocator
    ///
    /// `max_items` is the hard entry limit per container; `max_depth` is the
    /// number of directory levels below the root (0 means the root itself
    /// holds the leaf slots).
    pub fn new(max_items: u32, max_depth: u32) -> Self {
        assert!(max_items > 0, "max_items must be at least 1");
        SlotAllocator {
            max_items,
            max_depth,
            nodes: vec![Node::new(0)],
            live: 0,
        }
    }

    /// Entry limit per container
    pub fn max_items(&self) -> u32 {
        self.max_items
    }

    /// Directory levels below the root
    pub fn max_depth(&self) -> u32 {
        self.max_depth
    }

    /// Total leaf slots this tree can ever hold
    pub fn capacity(&self) -> u64 {
        (self.max_items as u64).pow(self.max_depth + 1)
    }

    /// Currently occupied leaf slots
    pub fn live(&self) -> u64 {
        self.live
    }

    /// Nodes materialized so far (including the root)
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Allocate the densest free slot
    ///
    /// Descends from the root, preferring children already known to have
    /// spare capacity, materializing a new child only when no known-free
    /// child has room. Fails with [`StoreError::DirFull`] once every subtree
    /// is exhausted; the caller must route to a different root or backend,
    /// there is no automatic retry.
    pub fn allocate(&mut self) -> Result<SlotAddress> {
        let mut slots = Vec::with_capacity(self.max_depth as usize + 1);
        self.allocate_in(ROOT, &mut slots)?;
        self.live += 1;
        let addr = SlotAddress::new(slots);
        debug!("allocated slot {}", addr);
        Ok(addr)
    }

    fn allocate_in(&mut self, idx: usize, out: &mut Vec<u32>) -> Result<()> {
        if self.nodes[idx].depth == self.max_depth {
            if self.nodes[idx].occupied.len() as u32 >= self.max_items {
                return Err(StoreError::DirFull);
            }
            let slot = first_gap(self.nodes[idx].occupied.iter());
            self.nodes[idx].occupied.insert(slot);
            out.push(slot);
            return Ok(());
        }

        // Known-free children first, oldest entry first
        let mut i = 0;
        while i < self.nodes[idx].free_children.len() {
            let number = self.nodes[idx].free_children[i];
            let child = self.nodes[idx].children[&number];
            match self.allocate_in(child, out) {
                Ok(()) => {
                    out.push(number);
                    return Ok(());
                }
                Err(StoreError::DirFull) => {
                    // Stale entry: the subtree filled up since it was added
                    self.nodes[idx].free_children.remove(i);
                }
                Err(e) => return Err(e),
            }
        }

        // No known-free child has room; materialize a new one if allowed
        if (self.nodes[idx].children.len() as u32) < self.max_items {
            let number = first_gap(self.nodes[idx].children.keys());
            let child = self.materialize_child(idx, number);
            self.allocate_in(child, out)?;
            out.push(number);
            return Ok(());
        }

        Err(StoreError::DirFull)
    }

    fn materialize_child(&mut self, parent: usize, number: u32) -> usize {
        let depth = self.nodes[parent].depth + 1;
        let idx = self.nodes.len();
        self.nodes.push(Node::new(depth));
        self.nodes[parent].children.insert(number, idx);
        self.nodes[parent].free_children.push(number);
        idx
    }

    /// Release a previously allocated slot
    ///
    /// Returns the freed number to the gap pool and re-marks the whole
    /// ancestor chain as having capacity, so the next [`SlotAllocator::allocate`]
    /// prefers it. Nodes are never destroyed by release, only re-marked.
    pub fn release(&mut self, address: &SlotAddress) -> Result<()> {
        let path = self.walk(address)?;
        let (leaf, slot) = match path.last() {
            Some(&step) => step,
            None => return Err(StoreError::InvalidAddress(address.to_string())),
        };

        if !self.nodes[leaf].occupied.remove(&slot) {
            warn!("double release of slot {}", address);
            return Err(StoreError::NotExisting);
        }
        self.live -= 1;

        // Re-mark capacity up the chain: parent of each step learns its
        // child has room again.
        let mut parent = ROOT;
        for &(node, number) in &path[..path.len() - 1] {
            if !self.nodes[parent].free_children.contains(&number) {
                self.nodes[parent].free_children.push(number);
            }
            parent = node;
        }
        debug!("released slot {}", address);
        Ok(())
    }

    /// Mark a specific address occupied without allocating a fresh one
    ///
    /// Materializes any missing intermediate nodes along the way. Used to
    /// replay persisted addresses when rebuilding allocator state after a
    /// restart. Reserving an already-occupied slot is a no-op.
    pub fn reserve(&mut self, address: &SlotAddress) -> Result<()> {
        self.validate(address)?;

        let slots = address.slots();
        let mut idx = ROOT;
        // Root-to-leaf, leaf slot excluded
        for &number in slots.iter().skip(1).rev() {
            idx = match self.nodes[idx].children.get(&number).copied() {
                Some(child) => child,
                None => self.materialize_child(idx, number),
            };
        }

        if self.nodes[idx].occupied.insert(slots[0]) {
            self.live += 1;
        }
        Ok(())
    }

    /// Resolve an address to its arena path: `(node, occupant number)` per
    /// level, root first, ending at the leaf with its slot number.
    fn walk(&self, address: &SlotAddress) -> Result<Vec<(usize, u32)>> {
        self.validate(address)?;

        let slots = address.slots();
        let mut path = Vec::with_capacity(slots.len());
        let mut idx = ROOT;
        for &number in slots.iter().skip(1).rev() {
            match self.nodes[idx].children.get(&number) {
                Some(&child) => {
                    path.push((child, number));
                    idx = child;
                }
                None => return Err(StoreError::NotExisting),
            }
        }
        path.push((idx, slots[0]));
        Ok(path)
    }

    fn validate(&self, address: &SlotAddress) -> Result<()> {
        let slots = address.slots();
        if slots.len() != self.max_depth as usize + 1 {
            return Err(StoreError::InvalidAddress(format!(
                "{} ({} levels, tree has {})",
                address,
                slots.len(),
                self.max_depth + 1
            )));
        }
        if slots.iter().any(|&n| n >= self.max_items) {
            return Err(StoreError::InvalidAddress(format!(
                "{} (component exceeds max_items {})",
                address, self.max_items
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(slots: &[u32]) -> SlotAddress {
        SlotAddress::new(slots.to_vec())
    }

    #[test]
    fn test_flat_tree_saturation() {
        let mut alloc = SlotAllocator::new(3, 0);
        assert_eq!(alloc.allocate().unwrap(), addr(&[0]));
        assert_eq!(alloc.allocate().unwrap(), addr(&[1]));
        assert_eq!(alloc.allocate().unwrap(), addr(&[2]));
        assert!(matches!(alloc.allocate(), Err(StoreError::DirFull)));
    }

    #[test]
    fn test_dense_reuse_after_release() {
        let mut alloc = SlotAllocator::new(10, 0);
        assert_eq!(alloc.allocate().unwrap(), addr(&[0]));
        assert_eq!(alloc.allocate().unwrap(), addr(&[1]));
        alloc.release(&addr(&[0])).unwrap();
        assert_eq!(alloc.allocate().unwrap(), addr(&[0]));
        assert_eq!(alloc.allocate().unwrap(), addr(&[2]));
    }

    #[test]
    fn test_spills_into_new_child_when_full() {
        let mut alloc = SlotAllocator::new(2, 1);
        assert_eq!(alloc.allocate().unwrap(), addr(&[0, 0]));
        assert_eq!(alloc.allocate().unwrap(), addr(&[1, 0]));
        // First child is full; a sibling is materialized
        assert_eq!(alloc.allocate().unwrap(), addr(&[0, 1]));
        assert_eq!(alloc.allocate().unwrap(), addr(&[1, 1]));
        assert!(matches!(alloc.allocate(), Err(StoreError::DirFull)));
        assert_eq!(alloc.capacity(), 4);
    }

    #[test]
    fn test_release_reaches_root_free_list() {
        let mut alloc = SlotAllocator::new(2, 1);
        for _ in 0..4 {
            alloc.allocate().unwrap();
        }
        // Tree saturated; freeing a deep slot must make it allocatable again
        alloc.release(&addr(&[1, 0])).unwrap();
        assert_eq!(alloc.allocate().unwrap(), addr(&[1, 0]));
        assert!(matches!(alloc.allocate(), Err(StoreError::DirFull)));
    }

    #[test]
    fn test_released_nodes_are_retained() {
        let mut alloc = SlotAllocator::new(2, 1);
        let a = alloc.allocate().unwrap();
        let nodes_before = alloc.node_count();
        alloc.release(&a).unwrap();
        assert_eq!(alloc.node_count(), nodes_before);
        assert_eq!(alloc.live(), 0);
    }

    #[test]
    fn test_release_unallocated_fails() {
        let mut alloc = SlotAllocator::new(4, 1);
        alloc.allocate().unwrap();
        assert!(matches!(
            alloc.release(&addr(&[3, 0])),
            Err(StoreError::NotExisting)
        ));
        assert!(matches!(
            alloc.release(&addr(&[0, 2])),
            Err(StoreError::NotExisting)
        ));
    }

    #[test]
    fn test_reserve_replays_persisted_addresses() {
        let mut alloc = SlotAllocator::new(3, 1);
        alloc.reserve(&addr(&[0, 0])).unwrap();
        alloc.reserve(&addr(&[1, 0])).unwrap();
        alloc.reserve(&addr(&[0, 2])).unwrap();
        assert_eq!(alloc.live(), 3);
        // Fresh allocation fills the densest remaining gap
        assert_eq!(alloc.allocate().unwrap(), addr(&[2, 0]));
    }

    #[test]
    fn test_reserve_is_idempotent() {
        let mut alloc = SlotAllocator::new(3, 0);
        alloc.reserve(&addr(&[1])).unwrap();
        alloc.reserve(&addr(&[1])).unwrap();
        assert_eq!(alloc.live(), 1);
    }

    #[test]
    fn test_invalid_addresses_rejected() {
        let mut alloc = SlotAllocator::new(3, 1);
        assert!(matches!(
            alloc.reserve(&addr(&[0])),
            Err(StoreError::InvalidAddress(_))
        ));
        assert!(matches!(
            alloc.reserve(&addr(&[0, 3])),
            Err(StoreError::InvalidAddress(_))
        ));
        assert!(matches!(
            alloc.release(&addr(&[0, 0, 0])),
            Err(StoreError::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_deep_tree_addresses_render_root_first() {
        let mut alloc = SlotAllocator::new(2, 2);
        let a = alloc.allocate().unwrap();
        assert_eq!(a, addr(&[0, 0, 0]));
        assert_eq!(a.to_string(), "0/0/0");
        for _ in 0..7 {
            alloc.allocate().unwrap();
        }
        assert!(matches!(alloc.allocate(), Err(StoreError::DirFull)));
        assert_eq!(alloc.live(), 8);
    }

    #[test]
    fn test_full_drain_and_refill() {
        let mut alloc = SlotAllocator::new(2, 1);
        let mut addresses = Vec::new();
        for _ in 0..4 {
            addresses.push(alloc.allocate().unwrap());
        }
        for a in &addresses {
            alloc.release(a).unwrap();
        }
        assert_eq!(alloc.live(), 0);
        // Refill reuses every slot without growing the arena
        let nodes = alloc.node_count();
        for _ in 0..4 {
            alloc.allocate().unwrap();
        }
        assert_eq!(alloc.node_count(), nodes);
        assert!(matches!(alloc.allocate(), Err(StoreError::DirFull)));
    }
}
