//! Link leaf: per-row object keys.

use ember_alloc::{Ref, SlabAlloc};
use ember_error::Result;
use ember_types::ObjKey;

use crate::core::{Array, ArraySpec};

/// Link leaf. Keys are stored with a `+1` bias so a zero slot reads as
/// the null key; unresolved (negative) key values survive the bias
/// unchanged in meaning.
pub enum ArrayKey {}

impl ArrayKey {
    pub fn create(alloc: &mut SlabAlloc, count: usize) -> Result<Ref> {
        Array::create(alloc, ArraySpec::default(), count, 0)
    }

    pub fn len(alloc: &SlabAlloc, r: Ref) -> usize {
        Array::len(alloc, r)
    }

    /// The stored key, unfiltered: may be null, live, or unresolved.
    pub fn get(alloc: &SlabAlloc, r: Ref, idx: usize) -> ObjKey {
        decode(Array::get(alloc, r, idx))
    }

    pub fn is_null(alloc: &SlabAlloc, r: Ref, idx: usize) -> bool {
        Array::get(alloc, r, idx) == 0
    }

    pub fn set(alloc: &mut SlabAlloc, r: Ref, idx: usize, key: ObjKey) -> Result<Ref> {
        Array::set(alloc, r, idx, encode(key))
    }

    pub fn insert(
        alloc: &mut SlabAlloc,
        r: Ref,
        idx: usize,
        key: ObjKey,
    ) -> Result<Ref> {
        Array::insert(alloc, r, idx, encode(key))
    }

    pub fn erase(alloc: &mut SlabAlloc, r: Ref, idx: usize) -> Result<Ref> {
        Array::erase(alloc, r, idx)
    }

    pub fn find_first(alloc: &SlabAlloc, r: Ref, key: ObjKey) -> Option<usize> {
        Array::find_first(alloc, r, encode(key))
    }
}

fn encode(key: ObjKey) -> i64 {
    if key.is_null() {
        0
    } else {
        key.value().wrapping_add(1)
    }
}

fn decode(stored: i64) -> ObjKey {
    if stored == 0 {
        ObjKey::NULL
    } else {
        ObjKey::new(stored.wrapping_sub(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_live_and_unresolved_round_trip() {
        let mut alloc = SlabAlloc::new_memory();
        let mut r = ArrayKey::create(&mut alloc, 3).unwrap();
        assert!(ArrayKey::get(&alloc, r, 0).is_null());
        let live = ObjKey::new(17);
        let dead = live.unresolved_twin();
        r = ArrayKey::set(&mut alloc, r, 0, live).unwrap();
        r = ArrayKey::set(&mut alloc, r, 1, dead).unwrap();
        assert_eq!(ArrayKey::get(&alloc, r, 0), live);
        assert_eq!(ArrayKey::get(&alloc, r, 1), dead);
        assert!(ArrayKey::get(&alloc, r, 1).is_unresolved());
        assert_eq!(ArrayKey::find_first(&alloc, r, dead), Some(1));
    }
}
