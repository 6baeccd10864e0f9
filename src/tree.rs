//! The region tree and its address-range index.
//!
//! A tree is a closed universe: it owns the storage of every region it ever
//! created and keeps a dense index of the live ones, sorted by payload base
//! address. The index answers "which region owns this byte" in O(log N);
//! insertions and removals shift entries in O(N).
//!
//! The tree performs no synchronization. [`RegionTree`] is neither `Send`
//! nor `Sync`; callers that need concurrency must serialize externally.

use std::alloc::{self, Layout};
use std::cell::UnsafeCell;
use std::fmt;
use std::ptr::NonNull;

use tracing::trace;

use crate::error::RegionError;
use crate::flags::RegionFlags;
use crate::layout::REGION_PAYLOAD_BYTES;
use crate::region::{alloc_block, Region, RegionBlock};

/// One entry of the address-range index.
///
/// `[min, max]` is the inclusive address range of the region's payload.
/// Ranges never overlap, so sorting by `min` also sorts by `max`.
#[derive(Clone, Copy)]
struct IndexEntry {
    min: usize,
    max: usize,
    region: NonNull<RegionBlock>,
}

/// Counters kept by a tree over its lifetime.
///
/// Dropped regions stay counted in `regions_created`; the live count is
/// `regions_created - regions_dropped`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TreeStats {
    /// Regions created, root included.
    pub regions_created: u64,
    /// Regions dropped.
    pub regions_dropped: u64,
    /// Checked assignments that performed a write.
    pub assignments: u64,
    /// Checked assignments rejected by the legality predicate.
    pub rejected_assignments: u64,
}

/// Tree state behind the [`RegionTree`] cell.
pub(crate) struct TreeInner {
    /// Current root block, null when unset.
    pub(crate) root: *mut RegionBlock,
    /// Live regions sorted by payload base address.
    index: Vec<IndexEntry>,
    /// Every block this tree ever allocated; released when the tree drops.
    allocations: Vec<NonNull<RegionBlock>>,
    stats: TreeStats,
}

impl TreeInner {
    /// Record a freshly created block: index it and take ownership of its
    /// storage.
    pub(crate) fn register(&mut self, block: NonNull<RegionBlock>) {
        let min = payload_base(block);
        let max = min + REGION_PAYLOAD_BYTES - 1;
        let at = self.index.partition_point(|e| e.min < min);
        self.index.insert(
            at,
            IndexEntry {
                min,
                max,
                region: block,
            },
        );
        self.allocations.push(block);
        self.stats.regions_created += 1;
    }

    /// Remove a dropped block's index entry. Storage stays owned until the
    /// tree drops.
    pub(crate) fn unregister(&mut self, block: NonNull<RegionBlock>) {
        let min = payload_base(block);
        let at = self.index.partition_point(|e| e.min < min);
        debug_assert!(
            at < self.index.len() && self.index[at].region == block,
            "dropped region missing from index"
        );
        self.index.remove(at);
        self.stats.regions_dropped += 1;
    }

    /// Binary search for the live region whose payload contains `addr`.
    fn find(&self, addr: usize) -> Option<NonNull<RegionBlock>> {
        let at = self.index.partition_point(|e| e.max < addr);
        let entry = self.index.get(at)?;
        (entry.min <= addr).then_some(entry.region)
    }

    pub(crate) fn note_assignment(&mut self, allowed: bool) {
        if allowed {
            self.stats.assignments += 1;
        } else {
            self.stats.rejected_assignments += 1;
        }
    }
}

/// The payload base address of a block.
fn payload_base(block: NonNull<RegionBlock>) -> usize {
    // SAFETY: the block is a live allocation owned by some tree.
    unsafe { (*block.as_ptr()).payload.as_ptr() as usize }
}

/// A tree of regions sharing one lifetime universe.
///
/// The tree hands out [`Region`] handles that borrow it, owns the backing
/// storage of every region (released when the tree is dropped), and keeps
/// the address-range index used by [`find_region`](RegionTree::find_region).
///
/// # Example
///
/// ```
/// use region_tree::{RegionError, RegionTree};
///
/// let tree = RegionTree::new();
/// let root = tree.new_root()?;
/// let sub = root.new_subregion()?;
/// assert_eq!(tree.find_region(sub.payload_addr(100)), Some(sub));
/// # Ok::<(), RegionError>(())
/// ```
pub struct RegionTree {
    // Boxed so the per-region back-pointer survives moves of the tree value.
    inner: Box<UnsafeCell<TreeInner>>,
}

impl RegionTree {
    /// Create an empty tree: no root, empty index.
    pub fn new() -> Self {
        Self {
            inner: Box::new(UnsafeCell::new(TreeInner {
                root: std::ptr::null_mut(),
                index: Vec::new(),
                allocations: Vec::new(),
                stats: TreeStats::default(),
            })),
        }
    }

    /// Create the tree's root region with the default HEAP category.
    ///
    /// # Errors
    ///
    /// Returns [`RegionError::RootExists`] if a root is already present.
    pub fn new_root(&self) -> Result<Region<'_>, RegionError> {
        self.new_root_with(RegionFlags::HEAP)
    }

    /// Create the tree's root region with an explicit lifetime category.
    ///
    /// Every subregion in the tree inherits this category.
    ///
    /// # Errors
    ///
    /// Returns [`RegionError::RootExists`] if a root is already present.
    ///
    /// # Panics
    ///
    /// Panics unless `category` is exactly one of
    /// [`RegionFlags::STATIC`], [`RegionFlags::HEAP`], or
    /// [`RegionFlags::STACK`].
    pub fn new_root_with(&self, category: RegionFlags) -> Result<Region<'_>, RegionError> {
        assert!(
            category.is_category(),
            "root category must be exactly one of STATIC, HEAP, or STACK"
        );
        let inner = self.inner.get();
        // SAFETY: single-threaded access to the cell; no other reference to
        // the tree state is live during this call.
        let block = unsafe {
            if !(*inner).root.is_null() {
                return Err(RegionError::RootExists);
            }
            let block = alloc_block(inner, category);
            (*inner).root = block.as_ptr();
            (*inner).register(block);
            block
        };
        let root = Region::from_block(block);
        trace!(base = root.payload_addr(0), category = ?category, "root region created");
        Ok(root)
    }

    /// The tree's root region, if one is set.
    pub fn root(&self) -> Option<Region<'_>> {
        // SAFETY: see `new_root_with`.
        let root = unsafe { (*self.inner.get()).root };
        NonNull::new(root).map(Region::from_block)
    }

    /// Find the unique live region whose payload contains `addr`.
    ///
    /// Runs in O(log N) over the live regions of this tree. Addresses inside
    /// a region's header, or outside every region, return `None`.
    pub fn find_region(&self, addr: usize) -> Option<Region<'_>> {
        // SAFETY: shared read of the index; nothing mutates it during this
        // call (single-threaded contract).
        unsafe { (*self.inner.get()).find(addr) }.map(Region::from_block)
    }

    /// Number of live regions in the tree.
    pub fn live_regions(&self) -> usize {
        // SAFETY: see `find_region`.
        unsafe { (*self.inner.get()).index.len() }
    }

    /// The live regions in ascending payload-address order.
    pub fn regions(&self) -> Vec<Region<'_>> {
        // SAFETY: see `find_region`.
        let inner = unsafe { &*self.inner.get() };
        inner
            .index
            .iter()
            .map(|e| Region::from_block(e.region))
            .collect()
    }

    /// A copy of the tree's lifetime counters.
    pub fn stats(&self) -> TreeStats {
        // SAFETY: see `find_region`.
        unsafe { (*self.inner.get()).stats }
    }
}

impl Default for RegionTree {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for RegionTree {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        for block in inner.allocations.drain(..) {
            // SAFETY: every block was allocated by `alloc_block` with this
            // layout and is freed exactly once, here.
            unsafe { alloc::dealloc(block.as_ptr().cast::<u8>(), Layout::new::<RegionBlock>()) };
        }
    }
}

impl fmt::Debug for RegionTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegionTree")
            .field("has_root", &self.root().is_some())
            .field("live_regions", &self.live_regions())
            .field("stats", &self.stats())
            .finish()
    }
}
