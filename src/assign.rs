//! The checked pointer-assignment primitive.
//!
//! A pointer stored inside region `src` may refer into region `dst` only
//! when `dst` is guaranteed to outlive `src` by structural dominance: `dst`
//! is static, is `src` itself, or is a proper ancestor of `src`. Because a
//! parent cannot be dropped while any descendant remains, such a pointer
//! cannot dangle. Sibling and cousin pointers are rejected; either party
//! could be dropped independently.
//!
//! Stack regions form an isolated lineage: only stack regions may hold
//! pointers into them.

use crate::layout::{CELL_BYTES, REGION_PAYLOAD_BYTES};
use crate::region::Region;

impl<'t> Region<'t> {
    /// May a pointer located in this region legally refer into `target`?
    ///
    /// Returns `true` exactly when all of the following hold:
    ///
    /// 1. both regions belong to the same tree;
    /// 2. neither region is dropped;
    /// 3. if `target` is a stack region, this region is one too;
    /// 4. `target` is static, or is this region itself, or is a proper
    ///    ancestor of this region.
    ///
    /// The ancestor walk costs O(depth); every other check is O(1).
    #[must_use]
    pub fn can_assign(&self, target: Region<'t>) -> bool {
        let src = self.block_ptr();
        let dst = target.block_ptr();
        // SAFETY: both blocks stay allocated for as long as their tree
        // borrows live; only metadata is read, as plain loads.
        unsafe {
            if (*src).header.meta.tree != (*dst).header.meta.tree {
                return false;
            }
            let src_flags = (*src).header.meta.flags;
            let dst_flags = (*dst).header.meta.flags;
            if src_flags.is_dropped()
                || dst_flags.is_dropped()
                || (dst_flags.is_stack() && !src_flags.is_stack())
            {
                return false;
            }
            if dst_flags.is_static() || src == dst {
                return true;
            }
            let mut up = (*src).header.meta.parent;
            while !up.is_null() {
                if up == dst {
                    return true;
                }
                up = (*up).header.meta.parent;
            }
            false
        }
    }

    /// Write a pointer to `target`'s payload into this region's payload.
    ///
    /// When [`can_assign`](Region::can_assign) permits it, the machine
    /// address of `target`'s payload byte at `target_offset` is written into
    /// the pointer-sized slot at `offset` of this region's payload, and
    /// `true` is returned. Otherwise nothing is written and `false` is
    /// returned.
    ///
    /// Offsets are byte offsets. Alignment of the slot is the caller's
    /// concern; the write itself tolerates any alignment.
    ///
    /// # Panics
    ///
    /// Panics if the slot would extend past the payload or `target_offset`
    /// is out of range.
    pub fn assign(&self, offset: usize, target: Region<'t>, target_offset: usize) -> bool {
        assert!(
            offset <= REGION_PAYLOAD_BYTES - CELL_BYTES,
            "pointer slot at offset {offset} exceeds the payload"
        );
        assert!(
            target_offset < REGION_PAYLOAD_BYTES,
            "target offset {target_offset} out of range"
        );
        let allowed = self.can_assign(target);
        // SAFETY: the tree back-pointer is valid for the tree borrow and no
        // references to the tree state are live (single-threaded contract).
        unsafe { (*(*self.block_ptr()).header.meta.tree).note_assignment(allowed) };
        if !allowed {
            return false;
        }
        let slot = self.payload_mut_ptr(offset);
        let pointee = target.payload_ptr(target_offset);
        // SAFETY: both regions were checked live and the slot lies fully
        // inside the source payload.
        unsafe { unchecked_assign(slot, pointee) };
        true
    }
}

/// Write the machine address of `target` into the pointer-sized slot at
/// `slot`, with no legality check.
///
/// This is the escape hatch for layout code that has already proven the
/// assignment legal. Pointers established through it are outside the
/// dominance invariant: nothing prevents them from dangling.
///
/// # Safety
///
/// `slot` must be valid for a pointer-sized write. The write is unaligned-
/// tolerant.
pub unsafe fn unchecked_assign(slot: *mut u8, target: *const u8) {
    // SAFETY: upheld by the caller.
    unsafe { slot.cast::<*const u8>().write_unaligned(target) };
}
