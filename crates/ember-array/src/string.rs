//! String leaf.

use ember_alloc::{Ref, SlabAlloc};
use ember_error::Result;

use crate::blob::VarBlob;

/// UTF-8 string leaf over the variable-size blob layout.
pub enum ArrayString {}

impl ArrayString {
    pub fn create(alloc: &mut SlabAlloc, count: usize) -> Result<Ref> {
        VarBlob::create(alloc, count)
    }

    pub fn len(alloc: &SlabAlloc, r: Ref) -> usize {
        VarBlob::len(alloc, r)
    }

    pub fn get(alloc: &SlabAlloc, r: Ref, idx: usize) -> Option<&str> {
        VarBlob::get(alloc, r, idx).map(|bytes| {
            // Only set() writes here, and set() takes &str.
            std::str::from_utf8(bytes).expect("invalid utf-8 in string leaf")
        })
    }

    pub fn is_null(alloc: &SlabAlloc, r: Ref, idx: usize) -> bool {
        VarBlob::is_null(alloc, r, idx)
    }

    pub fn set(
        alloc: &mut SlabAlloc,
        r: Ref,
        idx: usize,
        value: Option<&str>,
    ) -> Result<Ref> {
        VarBlob::set(alloc, r, idx, value.map(str::as_bytes))
    }

    pub fn insert(
        alloc: &mut SlabAlloc,
        r: Ref,
        idx: usize,
        value: Option<&str>,
    ) -> Result<Ref> {
        VarBlob::insert(alloc, r, idx, value.map(str::as_bytes))
    }

    pub fn erase(alloc: &mut SlabAlloc, r: Ref, idx: usize) -> Result<Ref> {
        VarBlob::erase(alloc, r, idx)
    }

    pub fn find_first(alloc: &SlabAlloc, r: Ref, value: Option<&str>) -> Option<usize> {
        (0..Self::len(alloc, r)).find(|&i| Self::get(alloc, r, i) == value)
    }

    pub fn destroy(alloc: &mut SlabAlloc, r: Ref) {
        VarBlob::destroy(alloc, r);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_null_and_values() {
        let mut alloc = SlabAlloc::new_memory();
        let mut r = ArrayString::create(&mut alloc, 2).unwrap();
        r = ArrayString::set(&mut alloc, r, 0, Some("hello")).unwrap();
        assert_eq!(ArrayString::get(&alloc, r, 0), Some("hello"));
        assert_eq!(ArrayString::get(&alloc, r, 1), None);
        r = ArrayString::set(&mut alloc, r, 0, Some("")).unwrap();
        assert_eq!(ArrayString::get(&alloc, r, 0), Some(""));
        assert!(!ArrayString::is_null(&alloc, r, 0));
    }

    #[test]
    fn test_find_first() {
        let mut alloc = SlabAlloc::new_memory();
        let mut r = ArrayString::create(&mut alloc, 3).unwrap();
        r = ArrayString::set(&mut alloc, r, 1, Some("x")).unwrap();
        assert_eq!(ArrayString::find_first(&alloc, r, Some("x")), Some(1));
        assert_eq!(ArrayString::find_first(&alloc, r, None), Some(0));
    }
}
