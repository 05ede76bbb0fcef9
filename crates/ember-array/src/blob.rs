//! Variable-size element storage: a leaf holding byte payloads.
//!
//! Strings, binaries and encoded mixed values share this layout. The leaf
//! is a two-slot `has_refs` parent:
//!
//! ```text
//! parent[0] -> offsets array, one slot per element: (end_offset << 1) | is_null
//! parent[1] -> byte blob holding all payloads back to back
//! ```
//!
//! End offsets are monotonic (null and empty elements contribute zero
//! bytes), so element `i` occupies `end[i-1]..end[i]` of the blob. The
//! null bit keeps "absent" distinct from "empty".

use ember_alloc::{Ref, SlabAlloc};
use ember_error::Result;

use crate::core::{Array, ArraySpec};
use crate::header::{Header, HEADER_SIZE};

/// Handle namespace for variable-size leaves.
pub enum VarBlob {}

impl VarBlob {
    /// Create a leaf of `count` null elements.
    pub fn create(alloc: &mut SlabAlloc, count: usize) -> Result<Ref> {
        let offsets = Array::create(alloc, ArraySpec::default(), count, 1)?;
        let blob = blob_create(alloc, &[])?;
        let parent = Array::create(
            alloc,
            ArraySpec {
                has_refs: true,
                ..ArraySpec::default()
            },
            2,
            0,
        )?;
        let parent = Array::set(alloc, parent, 0, offsets.to_raw())?;
        Array::set(alloc, parent, 1, blob.to_raw())
    }

    pub fn len(alloc: &SlabAlloc, r: Ref) -> usize {
        Array::len(alloc, Self::offsets_ref(alloc, r))
    }

    pub fn is_null(alloc: &SlabAlloc, r: Ref, idx: usize) -> bool {
        Array::get(alloc, Self::offsets_ref(alloc, r), idx) & 1 == 1
    }

    /// Element bytes, or `None` for a null element.
    pub fn get(alloc: &SlabAlloc, r: Ref, idx: usize) -> Option<&[u8]> {
        let offsets = Self::offsets_ref(alloc, r);
        let stored = Array::get(alloc, offsets, idx);
        if stored & 1 == 1 {
            return None;
        }
        let end = (stored >> 1) as usize;
        let start = if idx == 0 {
            0
        } else {
            (Array::get(alloc, offsets, idx - 1) >> 1) as usize
        };
        Some(&blob_bytes(alloc, Self::blob_ref(alloc, r))[start..end])
    }

    /// Overwrite element `idx`. Returns the leaf's current ref.
    pub fn set(
        alloc: &mut SlabAlloc,
        r: Ref,
        idx: usize,
        value: Option<&[u8]>,
    ) -> Result<Ref> {
        let mut elems = Self::read_all(alloc, r);
        elems[idx] = value.map(<[u8]>::to_vec);
        Self::write_all(alloc, r, &elems)
    }

    /// Insert an element before `idx`.
    pub fn insert(
        alloc: &mut SlabAlloc,
        r: Ref,
        idx: usize,
        value: Option<&[u8]>,
    ) -> Result<Ref> {
        let mut elems = Self::read_all(alloc, r);
        elems.insert(idx, value.map(<[u8]>::to_vec));
        Self::write_all(alloc, r, &elems)
    }

    /// Remove the element at `idx`.
    pub fn erase(alloc: &mut SlabAlloc, r: Ref, idx: usize) -> Result<Ref> {
        let mut elems = Self::read_all(alloc, r);
        elems.remove(idx);
        Self::write_all(alloc, r, &elems)
    }

    pub fn destroy(alloc: &mut SlabAlloc, r: Ref) {
        Array::destroy(alloc, r);
    }

    fn offsets_ref(alloc: &SlabAlloc, r: Ref) -> Ref {
        Ref::from_raw(Array::get(alloc, r, 0))
    }

    fn blob_ref(alloc: &SlabAlloc, r: Ref) -> Ref {
        Ref::from_raw(Array::get(alloc, r, 1))
    }

    fn read_all(alloc: &SlabAlloc, r: Ref) -> Vec<Option<Vec<u8>>> {
        (0..Self::len(alloc, r))
            .map(|i| Self::get(alloc, r, i).map(<[u8]>::to_vec))
            .collect()
    }

    /// Re-encode the whole leaf. Element edits change offsets globally, so
    /// mutation is a rebuild; leaves are bounded by the cluster row limit,
    /// keeping this O(payload bytes).
    fn write_all(
        alloc: &mut SlabAlloc,
        r: Ref,
        elems: &[Option<Vec<u8>>],
    ) -> Result<Ref> {
        let parent = Array::copy_on_write(alloc, r)?;
        let old_offsets = Self::offsets_ref(alloc, parent);
        let old_blob = Self::blob_ref(alloc, parent);

        let mut bytes = Vec::new();
        let mut stored = Vec::with_capacity(elems.len());
        for elem in elems {
            match elem {
                Some(payload) => {
                    bytes.extend_from_slice(payload);
                    stored.push((bytes.len() as i64) << 1);
                }
                None => stored.push(((bytes.len() as i64) << 1) | 1),
            }
        }

        let mut offsets = Array::truncate(alloc, old_offsets, 0)?;
        for (i, &v) in stored.iter().enumerate() {
            offsets = Array::insert(alloc, offsets, i, v)?;
        }
        alloc.free(old_blob);
        let blob = blob_create(alloc, &bytes)?;

        let parent = Array::set(alloc, parent, 0, offsets.to_raw())?;
        Array::set(alloc, parent, 1, blob.to_raw())
    }
}

/// Create a raw byte block: a headered leaf whose payload is opaque bytes.
pub fn blob_create(alloc: &mut SlabAlloc, bytes: &[u8]) -> Result<Ref> {
    let capacity = HEADER_SIZE + bytes.len().next_multiple_of(8);
    let r = alloc.alloc(capacity)?;
    let header = Header {
        width_index: 4, // 8-bit elements
        has_refs: false,
        context: true, // marks an opaque byte block
        inner_bptree: false,
        size: bytes.len() as u32,
        capacity: capacity as u32,
    };
    let block = alloc.translate_mut(r);
    block[..HEADER_SIZE].copy_from_slice(&header.encode());
    block[HEADER_SIZE..HEADER_SIZE + bytes.len()].copy_from_slice(bytes);
    Ok(r)
}

/// The bytes of a raw byte block.
pub fn blob_bytes(alloc: &SlabAlloc, r: Ref) -> &[u8] {
    let block = alloc.translate(r);
    let header = Header::decode(block).expect("corrupt block header");
    &block[HEADER_SIZE..HEADER_SIZE + header.size as usize]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_and_empty_are_distinct() {
        let mut alloc = SlabAlloc::new_memory();
        let mut r = VarBlob::create(&mut alloc, 2).unwrap();
        assert!(VarBlob::is_null(&alloc, r, 0));
        r = VarBlob::set(&mut alloc, r, 0, Some(b"")).unwrap();
        assert!(!VarBlob::is_null(&alloc, r, 0));
        assert_eq!(VarBlob::get(&alloc, r, 0), Some(&b""[..]));
        assert_eq!(VarBlob::get(&alloc, r, 1), None);
    }

    #[test]
    fn test_set_get_across_elements() {
        let mut alloc = SlabAlloc::new_memory();
        let mut r = VarBlob::create(&mut alloc, 3).unwrap();
        r = VarBlob::set(&mut alloc, r, 0, Some(b"alpha")).unwrap();
        r = VarBlob::set(&mut alloc, r, 2, Some(b"gamma!")).unwrap();
        r = VarBlob::set(&mut alloc, r, 1, Some(b"b")).unwrap();
        assert_eq!(VarBlob::get(&alloc, r, 0), Some(&b"alpha"[..]));
        assert_eq!(VarBlob::get(&alloc, r, 1), Some(&b"b"[..]));
        assert_eq!(VarBlob::get(&alloc, r, 2), Some(&b"gamma!"[..]));
    }

    #[test]
    fn test_insert_erase_shifts_payloads() {
        let mut alloc = SlabAlloc::new_memory();
        let mut r = VarBlob::create(&mut alloc, 0).unwrap();
        r = VarBlob::insert(&mut alloc, r, 0, Some(b"one")).unwrap();
        r = VarBlob::insert(&mut alloc, r, 1, Some(b"two")).unwrap();
        r = VarBlob::insert(&mut alloc, r, 1, None).unwrap();
        assert_eq!(VarBlob::len(&alloc, r), 3);
        assert_eq!(VarBlob::get(&alloc, r, 2), Some(&b"two"[..]));
        r = VarBlob::erase(&mut alloc, r, 0).unwrap();
        assert_eq!(VarBlob::get(&alloc, r, 0), None);
        assert_eq!(VarBlob::get(&alloc, r, 1), Some(&b"two"[..]));
    }
}
