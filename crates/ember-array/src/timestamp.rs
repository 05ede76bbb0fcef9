//! Timestamp leaf.

use ember_alloc::{Ref, SlabAlloc};
use ember_error::Result;
use ember_types::Timestamp;

use crate::core::{Array, ArraySpec};
use crate::int::{ArrayInt, ArrayIntNull};

/// Timestamp leaf: a two-slot `has_refs` parent over a nullable seconds
/// array and a plain nanoseconds array. An element is null exactly when
/// its seconds slot is null.
pub enum ArrayTimestamp {}

impl ArrayTimestamp {
    pub fn create(alloc: &mut SlabAlloc, count: usize) -> Result<Ref> {
        let seconds = ArrayIntNull::create(alloc, count)?;
        let nanos = ArrayInt::create(alloc, count)?;
        let parent = Array::create(
            alloc,
            ArraySpec {
                has_refs: true,
                ..ArraySpec::default()
            },
            2,
            0,
        )?;
        let parent = Array::set(alloc, parent, 0, seconds.to_raw())?;
        Array::set(alloc, parent, 1, nanos.to_raw())
    }

    pub fn len(alloc: &SlabAlloc, r: Ref) -> usize {
        ArrayIntNull::len(alloc, Self::seconds_ref(alloc, r))
    }

    pub fn get(alloc: &SlabAlloc, r: Ref, idx: usize) -> Option<Timestamp> {
        let seconds = ArrayIntNull::get(alloc, Self::seconds_ref(alloc, r), idx)?;
        let nanos = ArrayInt::get(alloc, Self::nanos_ref(alloc, r), idx);
        Some(Timestamp::new(seconds, nanos as i32))
    }

    pub fn is_null(alloc: &SlabAlloc, r: Ref, idx: usize) -> bool {
        ArrayIntNull::is_null(alloc, Self::seconds_ref(alloc, r), idx)
    }

    pub fn set(
        alloc: &mut SlabAlloc,
        r: Ref,
        idx: usize,
        value: Option<Timestamp>,
    ) -> Result<Ref> {
        let parent = Array::copy_on_write(alloc, r)?;
        let seconds = ArrayIntNull::set(
            alloc,
            Self::seconds_ref(alloc, parent),
            idx,
            value.map(Timestamp::seconds),
        )?;
        let nanos = ArrayInt::set(
            alloc,
            Self::nanos_ref(alloc, parent),
            idx,
            value.map_or(0, |t| i64::from(t.nanoseconds())),
        )?;
        let parent = Array::set(alloc, parent, 0, seconds.to_raw())?;
        Array::set(alloc, parent, 1, nanos.to_raw())
    }

    pub fn insert(
        alloc: &mut SlabAlloc,
        r: Ref,
        idx: usize,
        value: Option<Timestamp>,
    ) -> Result<Ref> {
        let parent = Array::copy_on_write(alloc, r)?;
        let seconds = ArrayIntNull::insert(
            alloc,
            Self::seconds_ref(alloc, parent),
            idx,
            value.map(Timestamp::seconds),
        )?;
        let nanos = ArrayInt::insert(
            alloc,
            Self::nanos_ref(alloc, parent),
            idx,
            value.map_or(0, |t| i64::from(t.nanoseconds())),
        )?;
        let parent = Array::set(alloc, parent, 0, seconds.to_raw())?;
        Array::set(alloc, parent, 1, nanos.to_raw())
    }

    pub fn erase(alloc: &mut SlabAlloc, r: Ref, idx: usize) -> Result<Ref> {
        let parent = Array::copy_on_write(alloc, r)?;
        let seconds = ArrayIntNull::erase(alloc, Self::seconds_ref(alloc, parent), idx)?;
        let nanos = ArrayInt::erase(alloc, Self::nanos_ref(alloc, parent), idx)?;
        let parent = Array::set(alloc, parent, 0, seconds.to_raw())?;
        Array::set(alloc, parent, 1, nanos.to_raw())
    }

    pub fn find_first(
        alloc: &SlabAlloc,
        r: Ref,
        value: Option<Timestamp>,
    ) -> Option<usize> {
        (0..Self::len(alloc, r)).find(|&i| Self::get(alloc, r, i) == value)
    }

    pub fn destroy(alloc: &mut SlabAlloc, r: Ref) {
        Array::destroy(alloc, r);
    }

    fn seconds_ref(alloc: &SlabAlloc, r: Ref) -> Ref {
        Ref::from_raw(Array::get(alloc, r, 0))
    }

    fn nanos_ref(alloc: &SlabAlloc, r: Ref) -> Ref {
        Ref::from_raw(Array::get(alloc, r, 1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_then_value() {
        let mut alloc = SlabAlloc::new_memory();
        let mut r = ArrayTimestamp::create(&mut alloc, 2).unwrap();
        assert!(ArrayTimestamp::is_null(&alloc, r, 0));
        let t = Timestamp::new(-5, -250_000_000);
        r = ArrayTimestamp::set(&mut alloc, r, 0, Some(t)).unwrap();
        assert_eq!(ArrayTimestamp::get(&alloc, r, 0), Some(t));
        assert_eq!(ArrayTimestamp::get(&alloc, r, 1), None);
    }
}
