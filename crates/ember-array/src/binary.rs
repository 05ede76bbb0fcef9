//! Binary leaf.

use ember_alloc::{Ref, SlabAlloc};
use ember_error::Result;

use crate::blob::VarBlob;

/// Binary leaf: byte payloads over the variable-size blob layout.
pub enum ArrayBinary {}

impl ArrayBinary {
    pub fn create(alloc: &mut SlabAlloc, count: usize) -> Result<Ref> {
        VarBlob::create(alloc, count)
    }

    pub fn len(alloc: &SlabAlloc, r: Ref) -> usize {
        VarBlob::len(alloc, r)
    }

    pub fn get(alloc: &SlabAlloc, r: Ref, idx: usize) -> Option<&[u8]> {
        VarBlob::get(alloc, r, idx)
    }

    pub fn is_null(alloc: &SlabAlloc, r: Ref, idx: usize) -> bool {
        VarBlob::is_null(alloc, r, idx)
    }

    pub fn set(
        alloc: &mut SlabAlloc,
        r: Ref,
        idx: usize,
        value: Option<&[u8]>,
    ) -> Result<Ref> {
        VarBlob::set(alloc, r, idx, value)
    }

    pub fn insert(
        alloc: &mut SlabAlloc,
        r: Ref,
        idx: usize,
        value: Option<&[u8]>,
    ) -> Result<Ref> {
        VarBlob::insert(alloc, r, idx, value)
    }

    pub fn erase(alloc: &mut SlabAlloc, r: Ref, idx: usize) -> Result<Ref> {
        VarBlob::erase(alloc, r, idx)
    }

    pub fn find_first(alloc: &SlabAlloc, r: Ref, value: Option<&[u8]>) -> Option<usize> {
        (0..Self::len(alloc, r)).find(|&i| Self::get(alloc, r, i) == value)
    }

    pub fn destroy(alloc: &mut SlabAlloc, r: Ref) {
        VarBlob::destroy(alloc, r);
    }
}
