//! Backlink leaf: per-row sets of origin keys.
//!
//! Each row slot is one of:
//!
//! - `0` — no backlinks,
//! - a tagged integer — a single origin key (the common case),
//! - a child ref — a plain integer array of origin key values.
//!
//! The single-key form promotes to a child array on the second insertion
//! and never demotes; rows with one remaining key keep their array until
//! it empties.

use ember_alloc::{Ref, SlabAlloc};
use ember_error::Result;
use ember_types::ObjKey;

use crate::core::{is_ref_slot, tag_int, untag_int, Array, ArraySpec};

/// Backlink leaf handle.
pub enum ArrayBacklink {}

impl ArrayBacklink {
    pub fn create(alloc: &mut SlabAlloc, count: usize) -> Result<Ref> {
        Array::create(
            alloc,
            ArraySpec {
                has_refs: true,
                ..ArraySpec::default()
            },
            count,
            0,
        )
    }

    pub fn len(alloc: &SlabAlloc, r: Ref) -> usize {
        Array::len(alloc, r)
    }

    pub fn backlink_count(alloc: &SlabAlloc, r: Ref, idx: usize) -> usize {
        let stored = Array::get(alloc, r, idx);
        if stored == 0 {
            0
        } else if is_ref_slot(stored) {
            Array::len(alloc, Ref::from_raw(stored))
        } else {
            1
        }
    }

    pub fn get_backlink(alloc: &SlabAlloc, r: Ref, idx: usize, n: usize) -> ObjKey {
        let stored = Array::get(alloc, r, idx);
        if is_ref_slot(stored) {
            debug_assert!(stored != 0, "backlink index on empty row");
            ObjKey::new(Array::get(alloc, Ref::from_raw(stored), n))
        } else {
            debug_assert_eq!(n, 0);
            ObjKey::new(untag_int(stored))
        }
    }

    pub fn get_all(alloc: &SlabAlloc, r: Ref, idx: usize) -> Vec<ObjKey> {
        let stored = Array::get(alloc, r, idx);
        if stored == 0 {
            Vec::new()
        } else if is_ref_slot(stored) {
            Array::get_all(alloc, Ref::from_raw(stored))
                .into_iter()
                .map(ObjKey::new)
                .collect()
        } else {
            vec![ObjKey::new(untag_int(stored))]
        }
    }

    /// Record one more origin pointing at row `idx`.
    pub fn add(alloc: &mut SlabAlloc, r: Ref, idx: usize, origin: ObjKey) -> Result<Ref> {
        let stored = Array::get(alloc, r, idx);
        if stored == 0 {
            return Array::set(alloc, r, idx, tag_int(origin.value()));
        }
        if is_ref_slot(stored) {
            let child = Ref::from_raw(stored);
            let len = Array::len(alloc, child);
            let child = Array::insert(alloc, child, len, origin.value())?;
            return Array::set(alloc, r, idx, child.to_raw());
        }
        // Promote the single key to a child array.
        let first = untag_int(stored);
        let child = Array::create(alloc, ArraySpec::default(), 0, 0)?;
        let child = Array::insert(alloc, child, 0, first)?;
        let child = Array::insert(alloc, child, 1, origin.value())?;
        Array::set(alloc, r, idx, child.to_raw())
    }

    /// Remove one entry for `origin` from row `idx`. Returns the leaf ref
    /// and whether the row's backlink set became empty.
    pub fn remove(
        alloc: &mut SlabAlloc,
        r: Ref,
        idx: usize,
        origin: ObjKey,
    ) -> Result<(Ref, bool)> {
        let stored = Array::get(alloc, r, idx);
        debug_assert!(stored != 0, "removing backlink from empty row");
        if !is_ref_slot(stored) {
            debug_assert_eq!(untag_int(stored), origin.value(), "backlink mismatch");
            let r = Array::set(alloc, r, idx, 0)?;
            return Ok((r, true));
        }
        let child = Ref::from_raw(stored);
        let pos = Array::find_first(alloc, child, origin.value())
            .expect("backlink entry missing");
        if Array::len(alloc, child) == 1 {
            Array::destroy(alloc, child);
            let r = Array::set(alloc, r, idx, 0)?;
            return Ok((r, true));
        }
        let child = Array::erase(alloc, child, pos)?;
        let r = Array::set(alloc, r, idx, child.to_raw())?;
        Ok((r, false))
    }

    /// Insert an empty row before `idx` (row creation).
    pub fn insert_row(alloc: &mut SlabAlloc, r: Ref, idx: usize) -> Result<Ref> {
        Array::insert(alloc, r, idx, 0)
    }

    /// Remove row `idx`, dropping any child array.
    pub fn erase_row(alloc: &mut SlabAlloc, r: Ref, idx: usize) -> Result<Ref> {
        let stored = Array::get(alloc, r, idx);
        if stored != 0 && is_ref_slot(stored) {
            Array::destroy(alloc, Ref::from_raw(stored));
        }
        Array::erase(alloc, r, idx)
    }

    /// Move row `idx`'s whole backlink set into another leaf row.
    pub fn write_all(
        alloc: &mut SlabAlloc,
        r: Ref,
        idx: usize,
        keys: &[ObjKey],
    ) -> Result<Ref> {
        match keys {
            [] => Array::set(alloc, r, idx, 0),
            [single] => Array::set(alloc, r, idx, tag_int(single.value())),
            many => {
                let mut child = Array::create(alloc, ArraySpec::default(), 0, 0)?;
                for (i, k) in many.iter().enumerate() {
                    child = Array::insert(alloc, child, i, k.value())?;
                }
                Array::set(alloc, r, idx, child.to_raw())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_key_fast_path() {
        let mut alloc = SlabAlloc::new_memory();
        let mut r = ArrayBacklink::create(&mut alloc, 2).unwrap();
        assert_eq!(ArrayBacklink::backlink_count(&alloc, r, 0), 0);
        r = ArrayBacklink::add(&mut alloc, r, 0, ObjKey::new(7)).unwrap();
        assert_eq!(ArrayBacklink::backlink_count(&alloc, r, 0), 1);
        assert_eq!(ArrayBacklink::get_backlink(&alloc, r, 0, 0), ObjKey::new(7));
        let (r2, last) = ArrayBacklink::remove(&mut alloc, r, 0, ObjKey::new(7)).unwrap();
        assert!(last);
        assert_eq!(ArrayBacklink::backlink_count(&alloc, r2, 0), 0);
    }

    #[test]
    fn test_promotion_to_child_array() {
        let mut alloc = SlabAlloc::new_memory();
        let mut r = ArrayBacklink::create(&mut alloc, 1).unwrap();
        for v in [3, 5, 9] {
            r = ArrayBacklink::add(&mut alloc, r, 0, ObjKey::new(v)).unwrap();
        }
        assert_eq!(ArrayBacklink::backlink_count(&alloc, r, 0), 3);
        assert_eq!(
            ArrayBacklink::get_all(&alloc, r, 0),
            vec![ObjKey::new(3), ObjKey::new(5), ObjKey::new(9)]
        );
        let (r, last) = ArrayBacklink::remove(&mut alloc, r, 0, ObjKey::new(5)).unwrap();
        assert!(!last);
        assert_eq!(
            ArrayBacklink::get_all(&alloc, r, 0),
            vec![ObjKey::new(3), ObjKey::new(9)]
        );
    }

    #[test]
    fn test_write_all_round_trip() {
        let mut alloc = SlabAlloc::new_memory();
        let mut r = ArrayBacklink::create(&mut alloc, 1).unwrap();
        let keys = vec![ObjKey::new(1), ObjKey::new(2)];
        r = ArrayBacklink::write_all(&mut alloc, r, 0, &keys).unwrap();
        assert_eq!(ArrayBacklink::get_all(&alloc, r, 0), keys);
    }
}
