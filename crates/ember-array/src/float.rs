//! Float and double leaves.
//!
//! Values are stored as their IEEE 754 bit patterns in a 32- or 64-bit
//! core array. Null is a reserved NaN bit pattern; a user-supplied NaN
//! that happens to collide with it is normalised to the standard quiet
//! NaN, which preserves NaN-ness without ever reading back as null.

use ember_alloc::{Ref, SlabAlloc};
use ember_error::Result;

use crate::core::{Array, ArraySpec};

const NULL_F32_BITS: u32 = 0x7FC0_0001;
const QUIET_NAN_F32: u32 = 0x7FC0_0000;
const NULL_F64_BITS: u64 = 0x7FF8_0000_0000_0001;
const QUIET_NAN_F64: u64 = 0x7FF8_0000_0000_0000;

/// 32-bit float leaf.
pub enum ArrayFloat {}

impl ArrayFloat {
    pub fn create(alloc: &mut SlabAlloc, count: usize) -> Result<Ref> {
        // The null bit pattern exceeds small widths, forcing 32-bit slots.
        Array::create(alloc, ArraySpec::default(), count, i64::from(NULL_F32_BITS))
    }

    pub fn len(alloc: &SlabAlloc, r: Ref) -> usize {
        Array::len(alloc, r)
    }

    pub fn get(alloc: &SlabAlloc, r: Ref, idx: usize) -> Option<f32> {
        let bits = Array::get(alloc, r, idx) as u32;
        (bits != NULL_F32_BITS).then(|| f32::from_bits(bits))
    }

    pub fn is_null(alloc: &SlabAlloc, r: Ref, idx: usize) -> bool {
        Array::get(alloc, r, idx) as u32 == NULL_F32_BITS
    }

    pub fn set(
        alloc: &mut SlabAlloc,
        r: Ref,
        idx: usize,
        value: Option<f32>,
    ) -> Result<Ref> {
        Array::set(alloc, r, idx, i64::from(encode_f32(value) as i32))
    }

    pub fn insert(
        alloc: &mut SlabAlloc,
        r: Ref,
        idx: usize,
        value: Option<f32>,
    ) -> Result<Ref> {
        Array::insert(alloc, r, idx, i64::from(encode_f32(value) as i32))
    }

    pub fn erase(alloc: &mut SlabAlloc, r: Ref, idx: usize) -> Result<Ref> {
        Array::erase(alloc, r, idx)
    }

    pub fn find_first(alloc: &SlabAlloc, r: Ref, value: Option<f32>) -> Option<usize> {
        Array::find_first(alloc, r, i64::from(encode_f32(value) as i32))
    }
}

/// 64-bit double leaf.
pub enum ArrayDouble {}

impl ArrayDouble {
    pub fn create(alloc: &mut SlabAlloc, count: usize) -> Result<Ref> {
        Array::create(alloc, ArraySpec::default(), count, NULL_F64_BITS as i64)
    }

    pub fn len(alloc: &SlabAlloc, r: Ref) -> usize {
        Array::len(alloc, r)
    }

    pub fn get(alloc: &SlabAlloc, r: Ref, idx: usize) -> Option<f64> {
        let bits = Array::get(alloc, r, idx) as u64;
        (bits != NULL_F64_BITS).then(|| f64::from_bits(bits))
    }

    pub fn is_null(alloc: &SlabAlloc, r: Ref, idx: usize) -> bool {
        Array::get(alloc, r, idx) as u64 == NULL_F64_BITS
    }

    pub fn set(
        alloc: &mut SlabAlloc,
        r: Ref,
        idx: usize,
        value: Option<f64>,
    ) -> Result<Ref> {
        Array::set(alloc, r, idx, encode_f64(value) as i64)
    }

    pub fn insert(
        alloc: &mut SlabAlloc,
        r: Ref,
        idx: usize,
        value: Option<f64>,
    ) -> Result<Ref> {
        Array::insert(alloc, r, idx, encode_f64(value) as i64)
    }

    pub fn erase(alloc: &mut SlabAlloc, r: Ref, idx: usize) -> Result<Ref> {
        Array::erase(alloc, r, idx)
    }

    pub fn find_first(alloc: &SlabAlloc, r: Ref, value: Option<f64>) -> Option<usize> {
        Array::find_first(alloc, r, encode_f64(value) as i64)
    }
}

fn encode_f32(value: Option<f32>) -> u32 {
    match value {
        None => NULL_F32_BITS,
        Some(v) if v.to_bits() == NULL_F32_BITS => QUIET_NAN_F32,
        Some(v) => v.to_bits(),
    }
}

fn encode_f64(value: Option<f64>) -> u64 {
    match value {
        None => NULL_F64_BITS,
        Some(v) if v.to_bits() == NULL_F64_BITS => QUIET_NAN_F64,
        Some(v) => v.to_bits(),
    }
}
