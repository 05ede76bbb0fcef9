//! The core bit-packed integer array.
//!
//! Every leaf type in this crate is built out of this one block form: a
//! header followed by `size` elements of a uniform bit width. Widths
//! promote automatically when a stored value stops fitting; promotion,
//! growth and copy-on-write all relocate the block, so every mutating
//! operation returns the block's (possibly new) ref and the caller is
//! responsible for rewriting the parent slot.
//!
//! Arrays with the `has_refs` flag hold child refs in even slots and
//! tagged 63-bit integers in odd slots ([`tag_int`] / [`untag_int`]);
//! zero is the null ref in either reading.

use ember_alloc::{Ref, SlabAlloc};
use ember_error::Result;

use crate::header::{payload_bytes, width_index_for, Header, HEADER_SIZE, WIDTHS};

/// Tag a 63-bit integer for storage in a `has_refs` array.
pub fn tag_int(value: i64) -> i64 {
    (value << 1) | 1
}

/// Inverse of [`tag_int`].
pub fn untag_int(stored: i64) -> i64 {
    stored >> 1
}

/// True if a `has_refs` slot value is a child ref rather than a tagged int.
pub fn is_ref_slot(stored: i64) -> bool {
    stored & 1 == 0
}

/// Construction parameters for [`Array::create`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ArraySpec {
    pub has_refs: bool,
    pub context: bool,
    pub inner_bptree: bool,
}

/// Handle namespace for core array operations.
///
/// All operations are associated functions over `(alloc, ref)`; the
/// struct itself is never instantiated.
pub enum Array {}

impl Array {
    /// Create a block of `size` elements, all equal to `init`.
    pub fn create(
        alloc: &mut SlabAlloc,
        spec: ArraySpec,
        size: usize,
        init: i64,
    ) -> Result<Ref> {
        let width_index = width_index_for(init);
        let capacity = HEADER_SIZE + payload_bytes(WIDTHS[usize::from(width_index)], size);
        let r = alloc.alloc(capacity)?;
        let header = Header {
            width_index,
            has_refs: spec.has_refs,
            context: spec.context,
            inner_bptree: spec.inner_bptree,
            size: size as u32,
            capacity: capacity as u32,
        };
        let block = alloc.translate_mut(r);
        block[..HEADER_SIZE].copy_from_slice(&header.encode());
        if init != 0 {
            let width = header.width_bits();
            for i in 0..size {
                write_elem(&mut block[HEADER_SIZE..], width, i, init);
            }
        }
        Ok(r)
    }

    pub fn header(alloc: &SlabAlloc, r: Ref) -> Header {
        // Blocks are written by this module only; a decode failure here is
        // corruption, which translate already treats as fatal.
        Header::decode(alloc.translate(r)).expect("corrupt block header")
    }

    pub fn len(alloc: &SlabAlloc, r: Ref) -> usize {
        Self::header(alloc, r).size as usize
    }

    pub fn is_empty(alloc: &SlabAlloc, r: Ref) -> bool {
        Self::len(alloc, r) == 0
    }

    pub fn get(alloc: &SlabAlloc, r: Ref, idx: usize) -> i64 {
        let block = alloc.translate(r);
        let header = Header::decode(block).expect("corrupt block header");
        debug_assert!(idx < header.size as usize, "index {idx} out of bounds");
        read_elem(&block[HEADER_SIZE..], header.width_bits(), idx)
    }

    /// Read every element. Used by rebuilds and by O(n) structural edits.
    pub fn get_all(alloc: &SlabAlloc, r: Ref) -> Vec<i64> {
        let block = alloc.translate(r);
        let header = Header::decode(block).expect("corrupt block header");
        let width = header.width_bits();
        (0..header.size as usize)
            .map(|i| read_elem(&block[HEADER_SIZE..], width, i))
            .collect()
    }

    /// Write `value` at `idx`, promoting width and copying on write as
    /// needed. Returns the block's current ref.
    pub fn set(alloc: &mut SlabAlloc, r: Ref, idx: usize, value: i64) -> Result<Ref> {
        let header = Self::header(alloc, r);
        debug_assert!(idx < header.size as usize);
        if width_index_for(value) > header.width_index {
            let mut values = Self::get_all(alloc, r);
            values[idx] = value;
            return Self::rebuild(alloc, r, header, &values);
        }
        let r = Self::copy_on_write(alloc, r)?;
        let width = header.width_bits();
        let block = alloc.translate_mut(r);
        write_elem(&mut block[HEADER_SIZE..], width, idx, value);
        Ok(r)
    }

    /// Insert `value` before `idx` (or append when `idx == len`).
    pub fn insert(alloc: &mut SlabAlloc, r: Ref, idx: usize, value: i64) -> Result<Ref> {
        let header = Self::header(alloc, r);
        let mut values = Self::get_all(alloc, r);
        debug_assert!(idx <= values.len());
        values.insert(idx, value);
        Self::rebuild(alloc, r, header, &values)
    }

    /// Remove the element at `idx`.
    pub fn erase(alloc: &mut SlabAlloc, r: Ref, idx: usize) -> Result<Ref> {
        let header = Self::header(alloc, r);
        let mut values = Self::get_all(alloc, r);
        values.remove(idx);
        Self::rebuild(alloc, r, header, &values)
    }

    /// Drop elements from `new_len` to the end.
    pub fn truncate(alloc: &mut SlabAlloc, r: Ref, new_len: usize) -> Result<Ref> {
        let header = Self::header(alloc, r);
        debug_assert!(new_len <= header.size as usize);
        let r = Self::copy_on_write(alloc, r)?;
        let mut header = Self::header(alloc, r);
        header.size = new_len as u32;
        let block = alloc.translate_mut(r);
        block[..HEADER_SIZE].copy_from_slice(&header.encode());
        Ok(r)
    }

    /// Linear scan for `value`; first match or `None`.
    pub fn find_first(alloc: &SlabAlloc, r: Ref, value: i64) -> Option<usize> {
        let block = alloc.translate(r);
        let header = Header::decode(block).expect("corrupt block header");
        let width = header.width_bits();
        (0..header.size as usize).find(|&i| read_elem(&block[HEADER_SIZE..], width, i) == value)
    }

    /// If the block is read-only, clone it into writable memory and bump
    /// the storage version. The caller must store the returned ref in the
    /// owning parent.
    pub fn copy_on_write(alloc: &mut SlabAlloc, r: Ref) -> Result<Ref> {
        if !alloc.is_read_only(r) {
            return Ok(r);
        }
        let header = Self::header(alloc, r);
        let capacity = header.capacity as usize;
        let new_ref = alloc.alloc(capacity)?;
        let src: Vec<u8> = alloc.translate(r)[..capacity].to_vec();
        alloc.translate_mut(new_ref)[..capacity].copy_from_slice(&src);
        alloc.bump_storage_version();
        Ok(new_ref)
    }

    /// Free this block, recursing through child refs when `has_refs`.
    pub fn destroy(alloc: &mut SlabAlloc, r: Ref) {
        if r.is_null() {
            return;
        }
        let header = Self::header(alloc, r);
        if header.has_refs {
            for stored in Self::get_all(alloc, r) {
                if stored != 0 && is_ref_slot(stored) {
                    Self::destroy(alloc, Ref::from_raw(stored));
                }
            }
        }
        alloc.free(r);
    }

    /// Re-encode `values` into the block, relocating if the width or
    /// capacity must change. The old block is freed when relocated.
    fn rebuild(
        alloc: &mut SlabAlloc,
        r: Ref,
        old_header: Header,
        values: &[i64],
    ) -> Result<Ref> {
        let width_index = values
            .iter()
            .map(|&v| width_index_for(v))
            .max()
            .unwrap_or(0)
            .max(old_header.width_index);
        let width = WIDTHS[usize::from(width_index)];
        let needed = HEADER_SIZE + payload_bytes(width, values.len());
        let header = Header {
            width_index,
            size: values.len() as u32,
            ..old_header
        };
        let (target, header) = if needed > old_header.capacity as usize {
            // Grow with slack so repeated appends amortise.
            let capacity = (needed * 2).next_multiple_of(8);
            let new_ref = alloc.alloc(capacity)?;
            alloc.free(r);
            alloc.bump_storage_version();
            (
                new_ref,
                Header {
                    capacity: capacity as u32,
                    ..header
                },
            )
        } else {
            let new_ref = Self::copy_on_write(alloc, r)?;
            (new_ref, header)
        };
        let block = alloc.translate_mut(target);
        block[..HEADER_SIZE].copy_from_slice(&header.encode());
        block[HEADER_SIZE..].fill(0);
        for (i, &v) in values.iter().enumerate() {
            write_elem(&mut block[HEADER_SIZE..], width, i, v);
        }
        Ok(target)
    }
}

fn read_elem(payload: &[u8], width_bits: u8, idx: usize) -> i64 {
    match width_bits {
        0 => 0,
        1 | 2 | 4 => {
            let bit = idx * usize::from(width_bits);
            let mask = (1u8 << width_bits) - 1;
            i64::from((payload[bit / 8] >> (bit % 8)) & mask)
        }
        8 => i64::from(payload[idx] as i8),
        16 => {
            let at = idx * 2;
            i64::from(i16::from_le_bytes([payload[at], payload[at + 1]]))
        }
        32 => {
            let at = idx * 4;
            i64::from(i32::from_le_bytes(
                payload[at..at + 4].try_into().unwrap(),
            ))
        }
        64 => {
            let at = idx * 8;
            i64::from_le_bytes(payload[at..at + 8].try_into().unwrap())
        }
        _ => unreachable!("bad element width"),
    }
}

fn write_elem(payload: &mut [u8], width_bits: u8, idx: usize, value: i64) {
    match width_bits {
        0 => debug_assert_eq!(value, 0),
        1 | 2 | 4 => {
            debug_assert!(value >= 0 && value < (1 << width_bits));
            let bit = idx * usize::from(width_bits);
            let mask = ((1u8 << width_bits) - 1) << (bit % 8);
            let byte = &mut payload[bit / 8];
            *byte = (*byte & !mask) | (((value as u8) << (bit % 8)) & mask);
        }
        8 => payload[idx] = value as i8 as u8,
        16 => payload[idx * 2..idx * 2 + 2].copy_from_slice(&(value as i16).to_le_bytes()),
        32 => payload[idx * 4..idx * 4 + 4].copy_from_slice(&(value as i32).to_le_bytes()),
        64 => payload[idx * 8..idx * 8 + 8].copy_from_slice(&value.to_le_bytes()),
        _ => unreachable!("bad element width"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mem() -> SlabAlloc {
        SlabAlloc::new_memory()
    }

    #[test]
    fn test_create_get_set() {
        let mut alloc = mem();
        let r = Array::create(&mut alloc, ArraySpec::default(), 4, 0).unwrap();
        assert_eq!(Array::len(&alloc, r), 4);
        let r = Array::set(&mut alloc, r, 2, 3).unwrap();
        assert_eq!(Array::get(&alloc, r, 2), 3);
        assert_eq!(Array::get(&alloc, r, 0), 0);
    }

    #[test]
    fn test_width_promotion_preserves_values() {
        let mut alloc = mem();
        let mut r = Array::create(&mut alloc, ArraySpec::default(), 3, 0).unwrap();
        r = Array::set(&mut alloc, r, 0, 1).unwrap();
        r = Array::set(&mut alloc, r, 1, 3).unwrap();
        // Jump straight from 2-bit to 64-bit territory.
        r = Array::set(&mut alloc, r, 2, i64::MIN + 1).unwrap();
        assert_eq!(Array::get(&alloc, r, 0), 1);
        assert_eq!(Array::get(&alloc, r, 1), 3);
        assert_eq!(Array::get(&alloc, r, 2), i64::MIN + 1);
    }

    #[test]
    fn test_negative_values_promote_to_signed_width() {
        let mut alloc = mem();
        let mut r = Array::create(&mut alloc, ArraySpec::default(), 2, 0).unwrap();
        r = Array::set(&mut alloc, r, 0, -1).unwrap();
        assert_eq!(Array::get(&alloc, r, 0), -1);
        assert_eq!(Array::get(&alloc, r, 1), 0);
    }

    #[test]
    fn test_insert_erase() {
        let mut alloc = mem();
        let mut r = Array::create(&mut alloc, ArraySpec::default(), 0, 0).unwrap();
        for v in [10, 20, 30] {
            let len = Array::len(&alloc, r);
            r = Array::insert(&mut alloc, r, len, v).unwrap();
        }
        r = Array::insert(&mut alloc, r, 1, 15).unwrap();
        assert_eq!(Array::get_all(&alloc, r), vec![10, 15, 20, 30]);
        r = Array::erase(&mut alloc, r, 2).unwrap();
        assert_eq!(Array::get_all(&alloc, r), vec![10, 15, 30]);
        assert_eq!(Array::find_first(&alloc, r, 30), Some(2));
        assert_eq!(Array::find_first(&alloc, r, 99), None);
    }

    #[test]
    fn test_copy_on_write_after_commit_relocates() {
        let mut alloc = mem();
        let r = Array::create(&mut alloc, ArraySpec::default(), 1, 42).unwrap();
        alloc.commit(r).unwrap();
        assert!(alloc.is_read_only(r));
        let r2 = Array::set(&mut alloc, r, 0, 43).unwrap();
        assert_ne!(r, r2);
        // The committed block still reads the old value.
        assert_eq!(Array::get(&alloc, r, 0), 42);
        assert_eq!(Array::get(&alloc, r2, 0), 43);
    }

    #[test]
    fn test_tagged_ints_round_trip() {
        assert!(!is_ref_slot(tag_int(5)));
        assert_eq!(untag_int(tag_int(5)), 5);
        assert_eq!(untag_int(tag_int(-7)), -7);
    }
}
