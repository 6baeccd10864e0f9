//! Property-based tests for the region tree.
//!
//! Uses proptest to generate random tree shapes and verify the structural
//! invariants hold: index integrity, lookup correctness, drop ordering,
//! flag inheritance, and the assignment dominance rule.

use proptest::prelude::*;
use region_tree::{RegionError, RegionFlags, RegionTree, CELL_BYTES, REGION_PAYLOAD_BYTES};

/// Strategy for a root lifetime category.
fn category() -> impl Strategy<Value = RegionFlags> {
    prop_oneof![
        Just(RegionFlags::STATIC),
        Just(RegionFlags::HEAP),
        Just(RegionFlags::STACK),
    ]
}

proptest! {
    /// In a chain, a pointer may target any ancestor or the region itself;
    /// in a static tree every target is legal.
    #[test]
    fn assignment_follows_dominance(
        cat in category(),
        depth in 1usize..10,
        a in 0usize..16,
        b in 0usize..16,
    ) {
        let tree = RegionTree::new();
        let mut chain = vec![tree.new_root_with(cat).unwrap()];
        for _ in 0..depth {
            let next = chain.last().unwrap().new_subregion().unwrap();
            chain.push(next);
        }

        let i = a % chain.len();
        let j = b % chain.len();
        let expected = cat == RegionFlags::STATIC || j <= i;
        prop_assert_eq!(chain[i].can_assign(chain[j]), expected);
    }

    /// Every payload byte of every live region resolves to that region.
    #[test]
    fn lookup_maps_every_payload_byte(
        extra in 0usize..8,
        offset in 0usize..REGION_PAYLOAD_BYTES,
    ) {
        let tree = RegionTree::new();
        let root = tree.new_root().unwrap();
        let mut regions = vec![root];
        for _ in 0..extra {
            regions.push(root.new_subregion().unwrap());
        }

        for region in &regions {
            prop_assert_eq!(tree.find_region(region.payload_addr(offset)), Some(*region));
        }
    }

    /// The index holds exactly the live regions, sorted by payload base,
    /// with disjoint ranges.
    #[test]
    fn index_is_sorted_disjoint_and_complete(n in 0usize..12) {
        let tree = RegionTree::new();
        let root = tree.new_root().unwrap();
        let mut live = vec![root];
        for i in 0..n {
            let parent = live[i % live.len()];
            live.push(parent.new_subregion().unwrap());
        }

        let indexed = tree.regions();
        prop_assert_eq!(indexed.len(), live.len());
        for pair in indexed.windows(2) {
            prop_assert!(
                pair[0].payload_addr(0) + REGION_PAYLOAD_BYTES <= pair[1].payload_addr(0)
            );
        }
        for region in &live {
            prop_assert!(indexed.contains(region));
        }
    }

    /// Dropping leaves first always drains the tree; dropping a parent with
    /// a live child always fails.
    #[test]
    fn leaves_first_drop_drains_tree(n in 1usize..12) {
        let tree = RegionTree::new();
        let root = tree.new_root().unwrap();
        let mut live = vec![root];
        for i in 0..n {
            let parent = live[i % live.len()];
            live.push(parent.new_subregion().unwrap());
        }

        prop_assert_eq!(root.drop_region(), Err(RegionError::HasChildren));

        while tree.live_regions() > 0 {
            let leaf = tree
                .regions()
                .into_iter()
                .find(|r| r.first_child().is_none())
                .expect("a live tree always has a leaf");
            prop_assert_eq!(leaf.drop_region(), Ok(()));
        }
        prop_assert!(tree.root().is_none());
        prop_assert_eq!(tree.stats().regions_dropped, (n + 1) as u64);
    }

    /// Subregions always carry their parent's category at creation.
    #[test]
    fn subregions_inherit_category(cat in category(), n in 1usize..10) {
        let tree = RegionTree::new();
        let root = tree.new_root_with(cat).unwrap();
        let mut live = vec![root];
        for i in 0..n {
            let parent = live[i % live.len()];
            live.push(parent.new_subregion().unwrap());
        }

        for region in &live {
            prop_assert_eq!(region.flags(), cat);
        }
    }

    /// A successful assign writes exactly the target payload address.
    #[test]
    fn assign_writes_target_address(
        slot in 0usize..=REGION_PAYLOAD_BYTES - CELL_BYTES,
        target in 0usize..REGION_PAYLOAD_BYTES,
    ) {
        let tree = RegionTree::new();
        let root = tree.new_root().unwrap();
        let sub = root.new_subregion().unwrap();

        prop_assert!(sub.assign(slot, root, target));
        // SAFETY: in-bounds read of the slot just written.
        let written = unsafe {
            sub.payload_ptr(slot).cast::<*const u8>().read_unaligned() as usize
        };
        prop_assert_eq!(written, root.payload_addr(target));
    }
}
