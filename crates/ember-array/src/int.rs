//! Integer leaves, non-nullable and nullable.

use ember_alloc::{Ref, SlabAlloc};
use ember_error::Result;

use crate::core::{Array, ArraySpec};

/// Non-nullable integer leaf; a thin veneer over the core array.
pub enum ArrayInt {}

impl ArrayInt {
    pub fn create(alloc: &mut SlabAlloc, count: usize) -> Result<Ref> {
        Array::create(alloc, ArraySpec::default(), count, 0)
    }

    pub fn len(alloc: &SlabAlloc, r: Ref) -> usize {
        Array::len(alloc, r)
    }

    pub fn get(alloc: &SlabAlloc, r: Ref, idx: usize) -> i64 {
        Array::get(alloc, r, idx)
    }

    pub fn set(alloc: &mut SlabAlloc, r: Ref, idx: usize, value: i64) -> Result<Ref> {
        Array::set(alloc, r, idx, value)
    }

    pub fn insert(alloc: &mut SlabAlloc, r: Ref, idx: usize, value: i64) -> Result<Ref> {
        Array::insert(alloc, r, idx, value)
    }

    pub fn erase(alloc: &mut SlabAlloc, r: Ref, idx: usize) -> Result<Ref> {
        Array::erase(alloc, r, idx)
    }

    pub fn find_first(alloc: &SlabAlloc, r: Ref, value: i64) -> Option<usize> {
        Array::find_first(alloc, r, value)
    }
}

/// Nullable integer leaf.
///
/// Slot 0 of the underlying array holds a sentinel value that is not the
/// payload of any element; elements live in slots `1..=count` and compare
/// equal to the sentinel exactly when null. Storing a value equal to the
/// current sentinel forces re-selection of a fresh sentinel and a rewrite
/// of all null slots.
pub enum ArrayIntNull {}

const INITIAL_SENTINEL: i64 = i64::MAX;

impl ArrayIntNull {
    pub fn create(alloc: &mut SlabAlloc, count: usize) -> Result<Ref> {
        Array::create(alloc, ArraySpec::default(), count + 1, INITIAL_SENTINEL)
    }

    pub fn len(alloc: &SlabAlloc, r: Ref) -> usize {
        Array::len(alloc, r) - 1
    }

    pub fn get(alloc: &SlabAlloc, r: Ref, idx: usize) -> Option<i64> {
        let sentinel = Array::get(alloc, r, 0);
        let v = Array::get(alloc, r, idx + 1);
        (v != sentinel).then_some(v)
    }

    pub fn is_null(alloc: &SlabAlloc, r: Ref, idx: usize) -> bool {
        Self::get(alloc, r, idx).is_none()
    }

    pub fn set(
        alloc: &mut SlabAlloc,
        r: Ref,
        idx: usize,
        value: Option<i64>,
    ) -> Result<Ref> {
        let sentinel = Array::get(alloc, r, 0);
        match value {
            None => Array::set(alloc, r, idx + 1, sentinel),
            Some(v) if v != sentinel => Array::set(alloc, r, idx + 1, v),
            Some(v) => {
                let r = Self::reselect_sentinel(alloc, r, v)?;
                Array::set(alloc, r, idx + 1, v)
            }
        }
    }

    pub fn insert(
        alloc: &mut SlabAlloc,
        r: Ref,
        idx: usize,
        value: Option<i64>,
    ) -> Result<Ref> {
        let sentinel = Array::get(alloc, r, 0);
        match value {
            None => Array::insert(alloc, r, idx + 1, sentinel),
            Some(v) if v != sentinel => Array::insert(alloc, r, idx + 1, v),
            Some(v) => {
                let r = Self::reselect_sentinel(alloc, r, v)?;
                Array::insert(alloc, r, idx + 1, v)
            }
        }
    }

    pub fn erase(alloc: &mut SlabAlloc, r: Ref, idx: usize) -> Result<Ref> {
        Array::erase(alloc, r, idx + 1)
    }

    pub fn find_first(alloc: &SlabAlloc, r: Ref, value: Option<i64>) -> Option<usize> {
        (0..Self::len(alloc, r)).find(|&i| Self::get(alloc, r, i) == value)
    }

    /// Pick a sentinel that is neither a stored value nor `incoming`, and
    /// rewrite every null slot to it.
    fn reselect_sentinel(alloc: &mut SlabAlloc, r: Ref, incoming: i64) -> Result<Ref> {
        let values = Array::get_all(alloc, r);
        let old_sentinel = values[0];
        let mut candidate = incoming.wrapping_add(1);
        while candidate == incoming || values[1..].contains(&candidate) {
            candidate = candidate.wrapping_add(1);
        }
        let mut r = Array::set(alloc, r, 0, candidate)?;
        for (i, &v) in values.iter().enumerate().skip(1) {
            if v == old_sentinel {
                r = Array::set(alloc, r, i, candidate)?;
            }
        }
        Ok(r)
    }
}
