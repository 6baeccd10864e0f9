//! # Region Tree
//!
//! A region-based memory allocator that makes dangling pointers between
//! regions structurally impossible. Regions are fixed-size byte arenas
//! organized as a tree; a pointer stored in region `A` may refer into
//! region `B` only when `B` is guaranteed to outlive `A` by dominance:
//! `B` is an ancestor of `A`, or `B` is `A` itself, or `B` is static.
//!
//! The crate provides:
//!
//! - **Region tree**: root creation, subregion nesting, leaves-first drop
//!   ordering ([`tree`], [`region`])
//! - **Address-range index**: any byte address back to its owning region in
//!   O(log N) ([`RegionTree::find_region`])
//! - **Checked assignment**: the dominance rule enforced at the moment a
//!   pointer is written into a region's bytes ([`Region::assign`])
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                      RegionTree                      │
//! │  root ──► Region ◄─── sibling links ───► Region      │
//! │               │                                      │
//! │               ▼                                      │
//! │            Region  (header: meta + bitmap │ payload) │
//! │                                                      │
//! │  index: [(min, max, region), …]  sorted by min       │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use region_tree::{RegionError, RegionTree};
//!
//! let tree = RegionTree::new();
//! let root = tree.new_root()?;
//! let sub = root.new_subregion()?;
//!
//! // A subregion may point into its ancestor...
//! assert!(sub.assign(0, root, 0));
//! // ...but the ancestor may not point into the subregion, which could be
//! // dropped first.
//! assert!(!root.assign(0, sub, 0));
//!
//! assert_eq!(tree.find_region(sub.payload_addr(0)), Some(sub));
//!
//! sub.drop_region()?;
//! root.drop_region()?;
//! # Ok::<(), RegionError>(())
//! ```
//!
//! ## Safety model
//!
//! The core deliberately performs raw pointer writes into region payloads.
//! The safety argument is structural: a parent cannot be dropped while any
//! descendant remains, so a pointer written through [`Region::assign`] into
//! an ancestor (or a static region, or the region itself) still refers to a
//! live payload for as long as its own region lives. Pointers written
//! through [`unchecked_assign`], and payload bytes the caller repurposes,
//! are outside this guarantee.
//!
//! The library performs no synchronization: [`RegionTree`] and [`Region`]
//! are neither `Send` nor `Sync`, and callers that need concurrency must
//! serialize externally.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod assign;
pub mod error;
pub mod flags;
pub mod layout;
pub mod region;
pub mod tree;

pub use assign::unchecked_assign;
pub use error::RegionError;
pub use flags::RegionFlags;
pub use layout::{
    CELL_BYTES, CELL_COUNT, REGION_BYTES, REGION_HEADER_BYTES, REGION_META_BYTES,
    REGION_PAYLOAD_BYTES,
};
pub use region::Region;
pub use tree::{RegionTree, TreeStats};
