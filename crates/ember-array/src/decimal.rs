//! Decimal leaf.

use ember_alloc::{Ref, SlabAlloc};
use ember_error::Result;
use ember_types::Decimal128;

use crate::core::{Array, ArraySpec};

/// Decimal leaf: two 64-bit slots per element, `(mantissa, exponent)`.
/// The exponent slot doubles as the null marker with a sentinel outside
/// the 32-bit exponent range.
pub enum ArrayDecimal {}

const NULL_EXPONENT: i64 = i64::MIN;

impl ArrayDecimal {
    pub fn create(alloc: &mut SlabAlloc, count: usize) -> Result<Ref> {
        let r = Array::create(alloc, ArraySpec::default(), count * 2, 0)?;
        let mut r = r;
        for i in 0..count {
            r = Array::set(alloc, r, i * 2 + 1, NULL_EXPONENT)?;
        }
        Ok(r)
    }

    pub fn len(alloc: &SlabAlloc, r: Ref) -> usize {
        Array::len(alloc, r) / 2
    }

    pub fn get(alloc: &SlabAlloc, r: Ref, idx: usize) -> Option<Decimal128> {
        let exp = Array::get(alloc, r, idx * 2 + 1);
        if exp == NULL_EXPONENT {
            return None;
        }
        if exp == i64::from(i32::MAX) {
            return Some(Decimal128::NAN);
        }
        let mantissa = Array::get(alloc, r, idx * 2);
        Some(Decimal128::new(mantissa, exp as i32))
    }

    pub fn is_null(alloc: &SlabAlloc, r: Ref, idx: usize) -> bool {
        Array::get(alloc, r, idx * 2 + 1) == NULL_EXPONENT
    }

    pub fn set(
        alloc: &mut SlabAlloc,
        r: Ref,
        idx: usize,
        value: Option<Decimal128>,
    ) -> Result<Ref> {
        let (mantissa, exponent) = encode(value);
        let r = Array::set(alloc, r, idx * 2, mantissa)?;
        Array::set(alloc, r, idx * 2 + 1, exponent)
    }

    pub fn insert(
        alloc: &mut SlabAlloc,
        r: Ref,
        idx: usize,
        value: Option<Decimal128>,
    ) -> Result<Ref> {
        let (mantissa, exponent) = encode(value);
        let r = Array::insert(alloc, r, idx * 2, exponent)?;
        Array::insert(alloc, r, idx * 2, mantissa)
    }

    pub fn erase(alloc: &mut SlabAlloc, r: Ref, idx: usize) -> Result<Ref> {
        let r = Array::erase(alloc, r, idx * 2)?;
        Array::erase(alloc, r, idx * 2)
    }

    pub fn find_first(
        alloc: &SlabAlloc,
        r: Ref,
        value: Option<Decimal128>,
    ) -> Option<usize> {
        (0..Self::len(alloc, r)).find(|&i| match (Self::get(alloc, r, i), value) {
            (None, None) => true,
            (Some(a), Some(b)) => a == b,
            _ => false,
        })
    }
}

fn encode(value: Option<Decimal128>) -> (i64, i64) {
    match value {
        None => (0, NULL_EXPONENT),
        Some(d) => (d.mantissa(), i64::from(d.exponent())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_value_round_trip() {
        let mut alloc = SlabAlloc::new_memory();
        let mut r = ArrayDecimal::create(&mut alloc, 2).unwrap();
        assert!(ArrayDecimal::is_null(&alloc, r, 1));
        let d = Decimal128::new(12345, -2);
        r = ArrayDecimal::set(&mut alloc, r, 1, Some(d)).unwrap();
        assert_eq!(ArrayDecimal::get(&alloc, r, 1), Some(d));
        assert_eq!(ArrayDecimal::get(&alloc, r, 0), None);
    }

    #[test]
    fn test_insert_keeps_pairing() {
        let mut alloc = SlabAlloc::new_memory();
        let mut r = ArrayDecimal::create(&mut alloc, 1).unwrap();
        let d = Decimal128::from_int(7);
        r = ArrayDecimal::insert(&mut alloc, r, 0, Some(d)).unwrap();
        assert_eq!(ArrayDecimal::len(&alloc, r), 2);
        assert_eq!(ArrayDecimal::get(&alloc, r, 0), Some(d));
        assert_eq!(ArrayDecimal::get(&alloc, r, 1), None);
    }
}
