//! Boolean leaf.

use ember_alloc::{Ref, SlabAlloc};
use ember_error::Result;

use crate::core::{Array, ArraySpec};

/// Boolean leaf: false = 0, true = 1, null = 3. The encoding fits the
/// 2-bit width so a bool column costs two bits per row regardless of
/// nullability.
pub enum ArrayBool {}

const NULL: i64 = 3;

impl ArrayBool {
    pub fn create(alloc: &mut SlabAlloc, count: usize) -> Result<Ref> {
        Array::create(alloc, ArraySpec::default(), count, NULL)
    }

    pub fn len(alloc: &SlabAlloc, r: Ref) -> usize {
        Array::len(alloc, r)
    }

    pub fn get(alloc: &SlabAlloc, r: Ref, idx: usize) -> Option<bool> {
        match Array::get(alloc, r, idx) {
            NULL => None,
            v => Some(v != 0),
        }
    }

    pub fn is_null(alloc: &SlabAlloc, r: Ref, idx: usize) -> bool {
        Array::get(alloc, r, idx) == NULL
    }

    pub fn set(
        alloc: &mut SlabAlloc,
        r: Ref,
        idx: usize,
        value: Option<bool>,
    ) -> Result<Ref> {
        Array::set(alloc, r, idx, encode(value))
    }

    pub fn insert(
        alloc: &mut SlabAlloc,
        r: Ref,
        idx: usize,
        value: Option<bool>,
    ) -> Result<Ref> {
        Array::insert(alloc, r, idx, encode(value))
    }

    pub fn erase(alloc: &mut SlabAlloc, r: Ref, idx: usize) -> Result<Ref> {
        Array::erase(alloc, r, idx)
    }

    pub fn find_first(alloc: &SlabAlloc, r: Ref, value: Option<bool>) -> Option<usize> {
        Array::find_first(alloc, r, encode(value))
    }
}

fn encode(value: Option<bool>) -> i64 {
    match value {
        None => NULL,
        Some(v) => i64::from(v),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_three_states() {
        let mut alloc = SlabAlloc::new_memory();
        let mut r = ArrayBool::create(&mut alloc, 3).unwrap();
        r = ArrayBool::set(&mut alloc, r, 0, Some(true)).unwrap();
        r = ArrayBool::set(&mut alloc, r, 1, Some(false)).unwrap();
        assert_eq!(ArrayBool::get(&alloc, r, 0), Some(true));
        assert_eq!(ArrayBool::get(&alloc, r, 1), Some(false));
        assert_eq!(ArrayBool::get(&alloc, r, 2), None);
        assert_eq!(ArrayBool::find_first(&alloc, r, Some(false)), Some(1));
        assert_eq!(ArrayBool::find_first(&alloc, r, None), Some(2));
    }
}
