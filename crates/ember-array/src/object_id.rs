//! ObjectId leaf.

use ember_alloc::{Ref, SlabAlloc};
use ember_error::Result;
use ember_types::ObjectId;

use crate::core::{Array, ArraySpec};

/// ObjectId leaf: two 64-bit slots per element. The first slot holds
/// bytes 0..8, the second bytes 8..12 in its low 32 bits; null is a
/// sentinel in the second slot, outside the 32-bit payload range.
pub enum ArrayObjectId {}

const NULL_WORD: i64 = i64::MIN;

impl ArrayObjectId {
    pub fn create(alloc: &mut SlabAlloc, count: usize) -> Result<Ref> {
        let mut r = Array::create(alloc, ArraySpec::default(), count * 2, 0)?;
        for i in 0..count {
            r = Array::set(alloc, r, i * 2 + 1, NULL_WORD)?;
        }
        Ok(r)
    }

    pub fn len(alloc: &SlabAlloc, r: Ref) -> usize {
        Array::len(alloc, r) / 2
    }

    pub fn get(alloc: &SlabAlloc, r: Ref, idx: usize) -> Option<ObjectId> {
        let tail = Array::get(alloc, r, idx * 2 + 1);
        if tail == NULL_WORD {
            return None;
        }
        let head = Array::get(alloc, r, idx * 2);
        let mut bytes = [0u8; 12];
        bytes[..8].copy_from_slice(&head.to_le_bytes());
        bytes[8..].copy_from_slice(&(tail as u32).to_le_bytes());
        Some(ObjectId::from_bytes(bytes))
    }

    pub fn is_null(alloc: &SlabAlloc, r: Ref, idx: usize) -> bool {
        Array::get(alloc, r, idx * 2 + 1) == NULL_WORD
    }

    pub fn set(
        alloc: &mut SlabAlloc,
        r: Ref,
        idx: usize,
        value: Option<ObjectId>,
    ) -> Result<Ref> {
        let (head, tail) = encode(value);
        let r = Array::set(alloc, r, idx * 2, head)?;
        Array::set(alloc, r, idx * 2 + 1, tail)
    }

    pub fn insert(
        alloc: &mut SlabAlloc,
        r: Ref,
        idx: usize,
        value: Option<ObjectId>,
    ) -> Result<Ref> {
        let (head, tail) = encode(value);
        let r = Array::insert(alloc, r, idx * 2, tail)?;
        Array::insert(alloc, r, idx * 2, head)
    }

    pub fn erase(alloc: &mut SlabAlloc, r: Ref, idx: usize) -> Result<Ref> {
        let r = Array::erase(alloc, r, idx * 2)?;
        Array::erase(alloc, r, idx * 2)
    }

    pub fn find_first(
        alloc: &SlabAlloc,
        r: Ref,
        value: Option<ObjectId>,
    ) -> Option<usize> {
        (0..Self::len(alloc, r)).find(|&i| Self::get(alloc, r, i) == value)
    }
}

fn encode(value: Option<ObjectId>) -> (i64, i64) {
    match value {
        None => (0, NULL_WORD),
        Some(id) => {
            let bytes = id.as_bytes();
            let head = i64::from_le_bytes(bytes[..8].try_into().unwrap());
            let tail = i64::from(u32::from_le_bytes(bytes[8..].try_into().unwrap()));
            (head, tail)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let mut alloc = SlabAlloc::new_memory();
        let mut r = ArrayObjectId::create(&mut alloc, 2).unwrap();
        let id = ObjectId::from_bytes([9, 8, 7, 6, 5, 4, 3, 2, 1, 0, 0xFF, 0xFE]);
        r = ArrayObjectId::set(&mut alloc, r, 1, Some(id)).unwrap();
        assert_eq!(ArrayObjectId::get(&alloc, r, 1), Some(id));
        assert_eq!(ArrayObjectId::get(&alloc, r, 0), None);
        assert_eq!(ArrayObjectId::find_first(&alloc, r, Some(id)), Some(1));
    }
}
