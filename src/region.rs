//! Region storage and the region handle.
//!
//! A region is a fixed-size block: a 64-byte metadata record and a cell
//! bitmap fill the 4 KiB header, and the remaining 252 KiB are the payload.
//! Blocks are allocated zeroed and never move; the owning
//! [`RegionTree`](crate::tree::RegionTree) releases their storage when it is
//! dropped, so a handle to a dropped region stays inspectable for as long as
//! the tree lives.
//!
//! [`Region`] is a `Copy` handle over a raw block pointer, lifetime-bound to
//! the tree that owns the block. All mutation goes through raw pointer
//! writes; the handle API keeps those writes behind the tree's structural
//! invariants.

use std::alloc::{self, Layout};
use std::fmt;
use std::marker::PhantomData;
use std::mem;
use std::ptr::NonNull;

use tracing::trace;

use crate::error::RegionError;
use crate::flags::RegionFlags;
use crate::layout::{
    BITMAP_WORDS, CELL_COUNT, REGION_BYTES, REGION_HEADER_BYTES, REGION_META_BYTES,
    REGION_PAYLOAD_BYTES,
};
use crate::tree::{RegionTree, TreeInner};

// ============================================================================
// Block storage
// ============================================================================

/// The metadata record at the head of every region header.
///
/// The record is exactly [`REGION_META_BYTES`] on every supported target.
/// The sibling links form a doubly-linked list under `parent`;
/// `first_child` points at the most recently added child.
#[repr(C)]
pub(crate) struct RegionMeta {
    /// Owning tree.
    pub(crate) tree: *mut TreeInner,
    /// Enclosing region, null for the root.
    pub(crate) parent: *mut RegionBlock,
    /// Previous (more recently added) sibling.
    pub(crate) prev_sibling: *mut RegionBlock,
    /// Next (less recently added) sibling.
    pub(crate) next_sibling: *mut RegionBlock,
    /// Most recently added child.
    pub(crate) first_child: *mut RegionBlock,
    /// Lifetime category, plus the dropped bit once dropped.
    pub(crate) flags: RegionFlags,
    /// Integer extension slot, uninterpreted by the core.
    pub(crate) ext1: usize,
    /// Opaque pointer extension slot, uninterpreted by the core.
    pub(crate) ext2: *mut (),
    /// Widened extension slots keeping the record at 64 bytes on 32-bit
    /// targets.
    #[cfg(target_pointer_width = "32")]
    pub(crate) ext_wide: [u32; 8],
}

/// The region header: metadata record followed by the cell bitmap.
#[repr(C)]
pub(crate) struct RegionHeader {
    pub(crate) meta: RegionMeta,
    /// One bit per payload cell, zeroed at creation.
    pub(crate) bits: [u64; BITMAP_WORDS],
}

/// A region's backing storage: header plus payload.
#[repr(C)]
pub(crate) struct RegionBlock {
    pub(crate) header: RegionHeader,
    pub(crate) payload: [u8; REGION_PAYLOAD_BYTES],
}

const _: () = assert!(mem::size_of::<RegionMeta>() == REGION_META_BYTES);
const _: () = assert!(mem::size_of::<RegionHeader>() == REGION_HEADER_BYTES);
const _: () = assert!(mem::size_of::<RegionBlock>() == REGION_BYTES);

/// Allocate a zeroed block wired to `tree` with the given flags.
///
/// Links start null and the payload and bitmap start zeroed. Aborts via
/// [`alloc::handle_alloc_error`] if the host allocator fails.
pub(crate) fn alloc_block(tree: *mut TreeInner, flags: RegionFlags) -> NonNull<RegionBlock> {
    let layout = Layout::new::<RegionBlock>();
    // SAFETY: the layout has non-zero size.
    let raw = unsafe { alloc::alloc_zeroed(layout) }.cast::<RegionBlock>();
    let Some(block) = NonNull::new(raw) else {
        alloc::handle_alloc_error(layout);
    };
    // SAFETY: the block is freshly allocated and exclusively ours. All-zero
    // bytes are a valid RegionBlock: null links, cleared bitmap, zero payload.
    unsafe {
        let meta = &mut (*block.as_ptr()).header.meta;
        meta.tree = tree;
        meta.flags = flags;
    }
    block
}

// ============================================================================
// Region handle
// ============================================================================

/// A handle to a region owned by a [`RegionTree`].
///
/// Handles are `Copy` and borrow the tree, so they cannot outlive it and the
/// tree cannot move or be dropped while any handle is live. A handle to a
/// dropped region remains valid for inspection; every structural operation
/// and every assignment through it fails.
///
/// Handles compare equal when they refer to the same block.
#[derive(Clone, Copy)]
pub struct Region<'t> {
    block: NonNull<RegionBlock>,
    _tree: PhantomData<&'t RegionTree>,
}

impl<'t> Region<'t> {
    pub(crate) fn from_block(block: NonNull<RegionBlock>) -> Self {
        Self {
            block,
            _tree: PhantomData,
        }
    }

    pub(crate) fn block_ptr(&self) -> *mut RegionBlock {
        self.block.as_ptr()
    }

    /// The region's flags, dropped bit included.
    pub fn flags(&self) -> RegionFlags {
        // SAFETY: the block stays allocated for as long as the tree borrow
        // lives; metadata reads are plain loads of Copy fields.
        unsafe { (*self.block.as_ptr()).header.meta.flags }
    }

    /// Whether the region has been dropped.
    pub fn is_dropped(&self) -> bool {
        self.flags().is_dropped()
    }

    /// The enclosing region, if this is not the root.
    pub fn parent(&self) -> Option<Region<'t>> {
        // SAFETY: see `flags`.
        let parent = unsafe { (*self.block.as_ptr()).header.meta.parent };
        NonNull::new(parent).map(Region::from_block)
    }

    /// The previous sibling (added after this region).
    pub fn prev_sibling(&self) -> Option<Region<'t>> {
        // SAFETY: see `flags`.
        let prev = unsafe { (*self.block.as_ptr()).header.meta.prev_sibling };
        NonNull::new(prev).map(Region::from_block)
    }

    /// The next sibling (added before this region).
    pub fn next_sibling(&self) -> Option<Region<'t>> {
        // SAFETY: see `flags`.
        let next = unsafe { (*self.block.as_ptr()).header.meta.next_sibling };
        NonNull::new(next).map(Region::from_block)
    }

    /// The most recently added live child.
    pub fn first_child(&self) -> Option<Region<'t>> {
        // SAFETY: see `flags`.
        let child = unsafe { (*self.block.as_ptr()).header.meta.first_child };
        NonNull::new(child).map(Region::from_block)
    }

    /// Whether `other` belongs to the same tree.
    pub fn same_tree(&self, other: Region<'_>) -> bool {
        // SAFETY: see `flags`.
        unsafe {
            (*self.block.as_ptr()).header.meta.tree == (*other.block.as_ptr()).header.meta.tree
        }
    }

    /// The machine address of the payload byte at `offset`.
    ///
    /// # Panics
    ///
    /// Panics if `offset >= REGION_PAYLOAD_BYTES`.
    pub fn payload_addr(&self, offset: usize) -> usize {
        self.payload_ptr(offset) as usize
    }

    /// A raw pointer to the payload byte at `offset`.
    ///
    /// The pointer is valid for reads for as long as the tree lives. Callers
    /// interpret the payload bytes; the core only writes them through
    /// [`assign`](Region::assign).
    ///
    /// # Panics
    ///
    /// Panics if `offset >= REGION_PAYLOAD_BYTES`.
    pub fn payload_ptr(&self, offset: usize) -> *const u8 {
        assert!(
            offset < REGION_PAYLOAD_BYTES,
            "payload offset {offset} out of range"
        );
        // SAFETY: the offset was bounds-checked against the payload array.
        unsafe { (*self.block.as_ptr()).payload.as_ptr().add(offset) }
    }

    /// A raw mutable pointer to the payload byte at `offset`.
    ///
    /// # Panics
    ///
    /// Panics if `offset >= REGION_PAYLOAD_BYTES`.
    pub fn payload_mut_ptr(&self, offset: usize) -> *mut u8 {
        assert!(
            offset < REGION_PAYLOAD_BYTES,
            "payload offset {offset} out of range"
        );
        // SAFETY: the offset was bounds-checked against the payload array.
        unsafe { (*self.block.as_ptr()).payload.as_mut_ptr().add(offset) }
    }

    /// Whether `addr` lies within this region's payload.
    pub fn contains(&self, addr: usize) -> bool {
        let min = self.payload_addr(0);
        let max = min + (REGION_PAYLOAD_BYTES - 1);
        min <= addr && addr <= max
    }

    // ------------------------------------------------------------------
    // Cell bitmap
    // ------------------------------------------------------------------

    /// Set bit `index` of the cell bitmap.
    ///
    /// Bit semantics are the caller's; the core only guarantees bits start
    /// zeroed at creation and persist otherwise.
    ///
    /// # Panics
    ///
    /// Panics if `index >= CELL_COUNT`.
    pub fn set_bit(&self, index: usize) {
        assert!(index < CELL_COUNT, "cell index {index} out of range");
        // SAFETY: the word index was bounds-checked; no references to the
        // bitmap are held elsewhere.
        unsafe {
            (*self.block.as_ptr()).header.bits[index / 64] |= 1u64 << (index % 64);
        }
    }

    /// Clear bit `index` of the cell bitmap.
    ///
    /// # Panics
    ///
    /// Panics if `index >= CELL_COUNT`.
    pub fn clear_bit(&self, index: usize) {
        assert!(index < CELL_COUNT, "cell index {index} out of range");
        // SAFETY: see `set_bit`.
        unsafe {
            (*self.block.as_ptr()).header.bits[index / 64] &= !(1u64 << (index % 64));
        }
    }

    /// Read bit `index` of the cell bitmap.
    ///
    /// # Panics
    ///
    /// Panics if `index >= CELL_COUNT`.
    pub fn bit(&self, index: usize) -> bool {
        assert!(index < CELL_COUNT, "cell index {index} out of range");
        // SAFETY: see `set_bit`.
        unsafe { (*self.block.as_ptr()).header.bits[index / 64] >> (index % 64) & 1 == 1 }
    }

    // ------------------------------------------------------------------
    // Extension slots
    // ------------------------------------------------------------------

    /// The integer extension slot. Uninterpreted by the core; higher-level
    /// allocators may keep a bump offset or free-list head here.
    pub fn ext1(&self) -> usize {
        // SAFETY: see `flags`.
        unsafe { (*self.block.as_ptr()).header.meta.ext1 }
    }

    /// Store the integer extension slot.
    pub fn set_ext1(&self, value: usize) {
        // SAFETY: see `flags`; plain store, no aliasing references exist.
        unsafe { (*self.block.as_ptr()).header.meta.ext1 = value };
    }

    /// The opaque pointer extension slot.
    pub fn ext2(&self) -> *mut () {
        // SAFETY: see `flags`.
        unsafe { (*self.block.as_ptr()).header.meta.ext2 }
    }

    /// Store the opaque pointer extension slot.
    pub fn set_ext2(&self, value: *mut ()) {
        // SAFETY: see `set_ext1`.
        unsafe { (*self.block.as_ptr()).header.meta.ext2 = value };
    }

    // ------------------------------------------------------------------
    // Structural operations
    // ------------------------------------------------------------------

    /// Create a new subregion under this region.
    ///
    /// The subregion inherits this region's lifetime category, is linked in
    /// as the new first child, and starts with a zeroed payload and bitmap.
    ///
    /// # Errors
    ///
    /// Returns [`RegionError::ParentDropped`] if this region is dropped.
    pub fn new_subregion(&self) -> Result<Region<'t>, RegionError> {
        let parent = self.block.as_ptr();
        // SAFETY: see `flags`; the fields are copied out before any write.
        let (tree, flags, old_first) = unsafe {
            let meta = &(*parent).header.meta;
            (meta.tree, meta.flags, meta.first_child)
        };
        if flags.is_dropped() {
            return Err(RegionError::ParentDropped);
        }
        let block = alloc_block(tree, flags.category());
        // SAFETY: `block` is exclusively ours; `parent` and `old_first` are
        // live blocks of the same tree and nothing else references their
        // metadata while this runs (single-threaded contract).
        unsafe {
            let meta = &mut (*block.as_ptr()).header.meta;
            meta.parent = parent;
            meta.next_sibling = old_first;
            if !old_first.is_null() {
                (*old_first).header.meta.prev_sibling = block.as_ptr();
            }
            (*parent).header.meta.first_child = block.as_ptr();
            (*tree).register(block);
        }
        let sub = Region::from_block(block);
        trace!(base = sub.payload_addr(0), "subregion created");
        Ok(sub)
    }

    /// Drop this region, marking it dead and unlinking it from the tree.
    ///
    /// The region's entry leaves the address index and its sibling list is
    /// rewired around it; for the root, the tree's root becomes unset. The
    /// handle stays valid for inspection, but every further operation on the
    /// region fails. Backing storage is released when the tree is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`RegionError::AlreadyDropped`] if the region is already
    /// dropped, or [`RegionError::HasChildren`] while any live child
    /// remains. The tree is unchanged on error.
    pub fn drop_region(&self) -> Result<(), RegionError> {
        let block = self.block.as_ptr();
        // SAFETY: see `flags`; the fields are copied out before any write.
        let (tree, flags, first_child, parent, prev, next) = unsafe {
            let meta = &(*block).header.meta;
            (
                meta.tree,
                meta.flags,
                meta.first_child,
                meta.parent,
                meta.prev_sibling,
                meta.next_sibling,
            )
        };
        if flags.is_dropped() {
            return Err(RegionError::AlreadyDropped);
        }
        if !first_child.is_null() {
            return Err(RegionError::HasChildren);
        }
        // SAFETY: only this block's metadata, its neighbors' sibling links,
        // and the tree state are written, and no references alias them
        // (single-threaded contract). A non-root region always has a parent.
        unsafe {
            (*block).header.meta.flags = flags.union(RegionFlags::DROPPED);
            if (*tree).root == block {
                (*tree).root = std::ptr::null_mut();
            } else {
                if prev.is_null() {
                    (*parent).header.meta.first_child = next;
                } else {
                    (*prev).header.meta.next_sibling = next;
                }
                if !next.is_null() {
                    (*next).header.meta.prev_sibling = prev;
                }
            }
            (*tree).unregister(self.block);
        }
        trace!(base = self.payload_addr(0), "region dropped");
        Ok(())
    }
}

impl PartialEq for Region<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.block == other.block
    }
}

impl Eq for Region<'_> {}

impl fmt::Debug for Region<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Region")
            .field("payload_base", &format_args!("{:#x}", self.payload_addr(0)))
            .field("flags", &self.flags())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::RegionTree;

    #[test]
    fn test_record_sizes() {
        assert_eq!(mem::size_of::<RegionMeta>(), REGION_META_BYTES);
        assert_eq!(mem::size_of::<RegionHeader>(), REGION_HEADER_BYTES);
        assert_eq!(mem::size_of::<RegionBlock>(), REGION_BYTES);
    }

    #[test]
    fn test_subregion_inherits_category() {
        let tree = RegionTree::new();
        let root = tree.new_root_with(RegionFlags::STACK).unwrap();
        let sub = root.new_subregion().unwrap();
        let grand = sub.new_subregion().unwrap();
        assert_eq!(sub.flags(), RegionFlags::STACK);
        assert_eq!(grand.flags(), RegionFlags::STACK);
    }

    #[test]
    fn test_child_links() {
        let tree = RegionTree::new();
        let root = tree.new_root().unwrap();
        let a = root.new_subregion().unwrap();
        let b = root.new_subregion().unwrap();
        let c = root.new_subregion().unwrap();

        // Newest child heads the list.
        assert_eq!(root.first_child(), Some(c));
        assert_eq!(c.next_sibling(), Some(b));
        assert_eq!(b.next_sibling(), Some(a));
        assert_eq!(a.next_sibling(), None);
        assert_eq!(a.prev_sibling(), Some(b));
        assert_eq!(b.prev_sibling(), Some(c));
        assert_eq!(c.prev_sibling(), None);
        assert_eq!(a.parent(), Some(root));
    }

    #[test]
    fn test_drop_middle_child_rewires_siblings() {
        let tree = RegionTree::new();
        let root = tree.new_root().unwrap();
        let a = root.new_subregion().unwrap();
        let b = root.new_subregion().unwrap();
        let c = root.new_subregion().unwrap();

        b.drop_region().unwrap();
        assert_eq!(root.first_child(), Some(c));
        assert_eq!(c.next_sibling(), Some(a));
        assert_eq!(a.prev_sibling(), Some(c));
    }

    #[test]
    fn test_drop_first_child_rewires_head() {
        let tree = RegionTree::new();
        let root = tree.new_root().unwrap();
        let a = root.new_subregion().unwrap();
        let b = root.new_subregion().unwrap();

        b.drop_region().unwrap();
        assert_eq!(root.first_child(), Some(a));
        assert_eq!(a.prev_sibling(), None);
    }

    #[test]
    fn test_drop_order_enforced() {
        let tree = RegionTree::new();
        let root = tree.new_root().unwrap();
        let sub = root.new_subregion().unwrap();

        assert_eq!(root.drop_region(), Err(RegionError::HasChildren));
        assert_eq!(sub.drop_region(), Ok(()));
        assert_eq!(sub.drop_region(), Err(RegionError::AlreadyDropped));
        assert_eq!(root.drop_region(), Ok(()));
    }

    #[test]
    fn test_dropped_parent_rejects_subregions() {
        let tree = RegionTree::new();
        let root = tree.new_root().unwrap();
        let sub = root.new_subregion().unwrap();
        sub.drop_region().unwrap();

        assert_eq!(sub.new_subregion(), Err(RegionError::ParentDropped));
        assert!(sub.flags().is_heap(), "category survives the drop");
    }

    #[test]
    fn test_contains() {
        let tree = RegionTree::new();
        let root = tree.new_root().unwrap();
        let base = root.payload_addr(0);

        assert!(root.contains(base));
        assert!(root.contains(base + REGION_PAYLOAD_BYTES - 1));
        assert!(!root.contains(base + REGION_PAYLOAD_BYTES));
        assert!(!root.contains(base.wrapping_sub(1)));
    }

    #[test]
    fn test_payload_zeroed() {
        let tree = RegionTree::new();
        let root = tree.new_root().unwrap();
        for offset in [0, 1, 4095, REGION_PAYLOAD_BYTES - 1] {
            // SAFETY: in-bounds payload read.
            let byte = unsafe { *root.payload_ptr(offset) };
            assert_eq!(byte, 0);
        }
    }

    #[test]
    fn test_bitmap_set_clear() {
        let tree = RegionTree::new();
        let root = tree.new_root().unwrap();

        for index in [0, 1, 63, 64, CELL_COUNT - 1] {
            assert!(!root.bit(index));
            root.set_bit(index);
            assert!(root.bit(index));
        }
        root.clear_bit(64);
        assert!(!root.bit(64));
        assert!(root.bit(63));
        assert!(root.bit(CELL_COUNT - 1));
    }

    #[test]
    #[should_panic(expected = "cell index")]
    fn test_bitmap_bounds() {
        let tree = RegionTree::new();
        let root = tree.new_root().unwrap();
        root.set_bit(CELL_COUNT);
    }

    #[test]
    fn test_ext_slots() {
        let tree = RegionTree::new();
        let root = tree.new_root().unwrap();

        assert_eq!(root.ext1(), 0);
        assert!(root.ext2().is_null());
        root.set_ext1(0xdead);
        let mut slot = 7u32;
        let marker = &mut slot as *mut u32 as *mut ();
        root.set_ext2(marker);
        assert_eq!(root.ext1(), 0xdead);
        assert_eq!(root.ext2(), marker);
    }
}
