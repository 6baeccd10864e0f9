//! Error types for structural region operations.
//!
//! Assignment legality is reported as a boolean by
//! [`Region::can_assign`](crate::region::Region::can_assign), not as an
//! error: an illegal assignment is a routine query result, not an
//! exceptional condition. Only the structural operations (root creation,
//! subregion creation, drop) carry error kinds, and every failure leaves
//! the tree in its pre-call state.

use thiserror::Error;

/// Errors returned by structural operations on a region tree.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RegionError {
    /// A root region already exists in this tree.
    #[error("root region already exists")]
    RootExists,

    /// A subregion was requested under a dropped parent.
    #[error("parent region has already been dropped")]
    ParentDropped,

    /// A drop was requested on a region that is already dropped.
    #[error("region has already been dropped")]
    AlreadyDropped,

    /// A drop was requested on a region with live subregions.
    #[error("region cannot be dropped until all sub-regions are dropped")]
    HasChildren,
}
