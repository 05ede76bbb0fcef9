//! Typed-link leaf: per-row `(table, key)` pairs.

use ember_alloc::{Ref, SlabAlloc};
use ember_error::Result;
use ember_types::{ObjKey, ObjLink, TableKey};

use crate::core::{Array, ArraySpec};

/// Typed-link leaf: two 64-bit-capable slots per element, the target
/// table key (biased by one, zero = null link) and the target object key
/// (same bias as the link leaf).
pub enum ArrayTypedLink {}

impl ArrayTypedLink {
    pub fn create(alloc: &mut SlabAlloc, count: usize) -> Result<Ref> {
        Array::create(alloc, ArraySpec::default(), count * 2, 0)
    }

    pub fn len(alloc: &SlabAlloc, r: Ref) -> usize {
        Array::len(alloc, r) / 2
    }

    pub fn get(alloc: &SlabAlloc, r: Ref, idx: usize) -> ObjLink {
        let table = Array::get(alloc, r, idx * 2);
        if table == 0 {
            return ObjLink::NULL;
        }
        let key = Array::get(alloc, r, idx * 2 + 1);
        ObjLink::new(
            TableKey::new((table - 1) as u32),
            decode_key(key),
        )
    }

    pub fn is_null(alloc: &SlabAlloc, r: Ref, idx: usize) -> bool {
        Array::get(alloc, r, idx * 2) == 0
    }

    pub fn set(
        alloc: &mut SlabAlloc,
        r: Ref,
        idx: usize,
        link: ObjLink,
    ) -> Result<Ref> {
        let (table, key) = encode(link);
        let r = Array::set(alloc, r, idx * 2, table)?;
        Array::set(alloc, r, idx * 2 + 1, key)
    }

    pub fn insert(
        alloc: &mut SlabAlloc,
        r: Ref,
        idx: usize,
        link: ObjLink,
    ) -> Result<Ref> {
        let (table, key) = encode(link);
        let r = Array::insert(alloc, r, idx * 2, key)?;
        Array::insert(alloc, r, idx * 2, table)
    }

    pub fn erase(alloc: &mut SlabAlloc, r: Ref, idx: usize) -> Result<Ref> {
        let r = Array::erase(alloc, r, idx * 2)?;
        Array::erase(alloc, r, idx * 2)
    }

    pub fn find_first(alloc: &SlabAlloc, r: Ref, link: ObjLink) -> Option<usize> {
        (0..Self::len(alloc, r)).find(|&i| Self::get(alloc, r, i) == link)
    }
}

fn encode(link: ObjLink) -> (i64, i64) {
    if link.is_null() {
        (0, 0)
    } else {
        (
            i64::from(link.table_key().value()) + 1,
            encode_key(link.obj_key()),
        )
    }
}

fn encode_key(key: ObjKey) -> i64 {
    if key.is_null() {
        0
    } else {
        key.value().wrapping_add(1)
    }
}

fn decode_key(stored: i64) -> ObjKey {
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
    fn test_round_trip_and_null() {
        let mut alloc = SlabAlloc::new_memory();
        let mut r = ArrayTypedLink::create(&mut alloc, 2).unwrap();
        assert!(ArrayTypedLink::get(&alloc, r, 0).is_null());
        let link = ObjLink::new(TableKey::new(3), ObjKey::new(11));
        r = ArrayTypedLink::set(&mut alloc, r, 1, link).unwrap();
        assert_eq!(ArrayTypedLink::get(&alloc, r, 1), link);
        assert_eq!(ArrayTypedLink::find_first(&alloc, r, link), Some(1));
        r = ArrayTypedLink::set(&mut alloc, r, 1, ObjLink::NULL).unwrap();
        assert!(ArrayTypedLink::is_null(&alloc, r, 1));
    }

    #[test]
    fn test_unresolved_target_round_trips() {
        let mut alloc = SlabAlloc::new_memory();
        let mut r = ArrayTypedLink::create(&mut alloc, 1).unwrap();
        let link = ObjLink::new(TableKey::new(1), ObjKey::new(5).unresolved_twin());
        r = ArrayTypedLink::set(&mut alloc, r, 0, link).unwrap();
        assert!(ArrayTypedLink::get(&alloc, r, 0).is_unresolved());
    }
}
