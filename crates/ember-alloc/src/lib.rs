//! Slab allocator, ref translation and versioned snapshots.
//!
//! The allocator owns the database file. Committed data is memory-mapped
//! and read-only; allocations made inside a write transaction live in a
//! heap slab logically placed at the end of the committed region, so a
//! [`Ref`] is always a stable file offset whether or not it has been
//! committed yet. Copy-on-write works by allocating a fresh writable block
//! for any read-only block about to be mutated and letting the owner
//! rewrite its child ref.
//!
//! Two monotonic counters describe change: the *storage version* advances
//! whenever any block is relocated (COW, split, merge, commit), the
//! *content version* on any value change. Accessors cache the storage
//! version they last resolved against and re-resolve on mismatch.

mod header;
mod slab;

pub use header::{FileHeader, FILE_FORMAT_VERSION, FILE_HEADER_SIZE};
pub use slab::SlabAlloc;

use std::fmt;

/// A stable byte offset into the allocator's backing store.
///
/// Refs are 8-byte aligned and nonzero; [`Ref::NULL`] (offset zero, inside
/// the file header) means "no block".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Ref(u64);

impl Ref {
    pub const NULL: Ref = Ref(0);

    /// # Panics
    ///
    /// In debug builds, if the offset is not 8-byte aligned.
    pub fn new(offset: u64) -> Ref {
        debug_assert_eq!(offset % 8, 0, "refs are 8-byte aligned");
        Ref(offset)
    }

    pub const fn offset(self) -> u64 {
        self.0
    }

    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Encode for storage inside an array slot. Null encodes as zero.
    pub const fn to_raw(self) -> i64 {
        self.0 as i64
    }

    /// Decode from an array slot.
    pub fn from_raw(raw: i64) -> Ref {
        debug_assert!(raw >= 0, "stored refs are non-negative");
        Ref(raw as u64)
    }
}

impl fmt::Display for Ref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{:#x}", self.0)
    }
}
