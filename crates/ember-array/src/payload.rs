//! Type-erased leaf dispatch.
//!
//! A [`Payload`] describes one column's leaf: its element type and
//! nullability. It funnels the closed set of typed leaves through one
//! uniform surface so structural code (cluster split/merge, generic row
//! moves, comparison) does not monomorphise per type. Hot typed paths go
//! straight to the leaf modules and never come through here.

use ember_alloc::{Ref, SlabAlloc};
use ember_error::{EmberError, Result};
use ember_types::{ColumnType, Mixed};

use crate::binary::ArrayBinary;
use crate::boolean::ArrayBool;
use crate::decimal::ArrayDecimal;
use crate::float::{ArrayDouble, ArrayFloat};
use crate::int::{ArrayInt, ArrayIntNull};
use crate::key::ArrayKey;
use crate::mixed::ArrayMixed;
use crate::object_id::ArrayObjectId;
use crate::string::ArrayString;
use crate::timestamp::ArrayTimestamp;
use crate::typed_link::ArrayTypedLink;

/// Type-erased operations over a single leaf.
///
/// The one trait in this crate that is meant for dynamic dispatch; see
/// [`Payload`] for the closed-table implementation.
pub trait ArrayPayload {
    /// Create a leaf of `count` default elements (null where nullable,
    /// the type's zero value otherwise).
    fn create(&self, alloc: &mut SlabAlloc, count: usize) -> Result<Ref>;
    fn get_any(&self, alloc: &SlabAlloc, r: Ref, idx: usize) -> Mixed;
    fn set_any(&self, alloc: &mut SlabAlloc, r: Ref, idx: usize, value: &Mixed) -> Result<Ref>;
    fn insert_any(&self, alloc: &mut SlabAlloc, r: Ref, idx: usize, value: &Mixed) -> Result<Ref>;
    fn erase(&self, alloc: &mut SlabAlloc, r: Ref, idx: usize) -> Result<Ref>;
    fn is_null(&self, alloc: &SlabAlloc, r: Ref, idx: usize) -> bool;
    fn find_first(&self, alloc: &SlabAlloc, r: Ref, value: &Mixed) -> Option<usize>;
    fn len(&self, alloc: &SlabAlloc, r: Ref) -> usize;
    fn destroy(&self, alloc: &mut SlabAlloc, r: Ref);
}

/// A column leaf descriptor: element type plus nullability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Payload {
    pub col_type: ColumnType,
    pub nullable: bool,
}

impl Payload {
    pub fn new(col_type: ColumnType, nullable: bool) -> Payload {
        debug_assert!(
            col_type != ColumnType::Backlink,
            "backlink columns have their own leaf handling"
        );
        Payload { col_type, nullable }
    }

    fn check_type(&self, value: &Mixed) -> Result<()> {
        if value.is_null() {
            let link_like = matches!(self.col_type, ColumnType::Link | ColumnType::TypedLink);
            if self.nullable || link_like || self.col_type == ColumnType::Mixed {
                return Ok(());
            }
            return Err(EmberError::ColumnNotNullable);
        }
        if self.col_type == ColumnType::Mixed {
            return Ok(());
        }
        if value.value_type() != Some(self.col_type) {
            return Err(EmberError::IllegalType {
                expected: self.col_type.name(),
                actual: value.type_name(),
            });
        }
        Ok(())
    }
}

impl ArrayPayload for Payload {
    fn create(&self, alloc: &mut SlabAlloc, count: usize) -> Result<Ref> {
        match self.col_type {
            ColumnType::Int if self.nullable => ArrayIntNull::create(alloc, count),
            ColumnType::Int => ArrayInt::create(alloc, count),
            ColumnType::Bool => {
                let mut r = ArrayBool::create(alloc, count)?;
                if !self.nullable {
                    for i in 0..count {
                        r = ArrayBool::set(alloc, r, i, Some(false))?;
                    }
                }
                Ok(r)
            }
            ColumnType::Float => {
                let mut r = ArrayFloat::create(alloc, count)?;
                if !self.nullable {
                    for i in 0..count {
                        r = ArrayFloat::set(alloc, r, i, Some(0.0))?;
                    }
                }
                Ok(r)
            }
            ColumnType::Double => {
                let mut r = ArrayDouble::create(alloc, count)?;
                if !self.nullable {
                    for i in 0..count {
                        r = ArrayDouble::set(alloc, r, i, Some(0.0))?;
                    }
                }
                Ok(r)
            }
            ColumnType::String => {
                let mut r = ArrayString::create(alloc, count)?;
                if !self.nullable {
                    for i in 0..count {
                        r = ArrayString::set(alloc, r, i, Some(""))?;
                    }
                }
                Ok(r)
            }
            ColumnType::Binary => {
                let mut r = ArrayBinary::create(alloc, count)?;
                if !self.nullable {
                    for i in 0..count {
                        r = ArrayBinary::set(alloc, r, i, Some(&[]))?;
                    }
                }
                Ok(r)
            }
            ColumnType::Timestamp => {
                let mut r = ArrayTimestamp::create(alloc, count)?;
                if !self.nullable {
                    for i in 0..count {
                        r = ArrayTimestamp::set(alloc, r, i, Some(ember_types::Timestamp::EPOCH))?;
                    }
                }
                Ok(r)
            }
            ColumnType::Decimal => {
                let mut r = ArrayDecimal::create(alloc, count)?;
                if !self.nullable {
                    for i in 0..count {
                        r = ArrayDecimal::set(alloc, r, i, Some(ember_types::Decimal128::ZERO))?;
                    }
                }
                Ok(r)
            }
            ColumnType::ObjectId => {
                let mut r = ArrayObjectId::create(alloc, count)?;
                if !self.nullable {
                    for i in 0..count {
                        r = ArrayObjectId::set(
                            alloc,
                            r,
                            i,
                            Some(ember_types::ObjectId::default()),
                        )?;
                    }
                }
                Ok(r)
            }
            ColumnType::Mixed => ArrayMixed::create(alloc, count),
            ColumnType::Link => ArrayKey::create(alloc, count),
            ColumnType::TypedLink => ArrayTypedLink::create(alloc, count),
            ColumnType::Backlink => unreachable!("backlink leaves are created directly"),
        }
    }

    fn get_any(&self, alloc: &SlabAlloc, r: Ref, idx: usize) -> Mixed {
        match self.col_type {
            ColumnType::Int if self.nullable => ArrayIntNull::get(alloc, r, idx).into(),
            ColumnType::Int => Mixed::Int(ArrayInt::get(alloc, r, idx)),
            ColumnType::Bool => ArrayBool::get(alloc, r, idx).into(),
            ColumnType::Float => ArrayFloat::get(alloc, r, idx).into(),
            ColumnType::Double => ArrayDouble::get(alloc, r, idx).into(),
            ColumnType::String => ArrayString::get(alloc, r, idx)
                .map(str::to_owned)
                .into(),
            ColumnType::Binary => ArrayBinary::get(alloc, r, idx)
                .map(<[u8]>::to_vec)
                .into(),
            ColumnType::Timestamp => ArrayTimestamp::get(alloc, r, idx).into(),
            ColumnType::Decimal => ArrayDecimal::get(alloc, r, idx).into(),
            ColumnType::ObjectId => ArrayObjectId::get(alloc, r, idx).into(),
            ColumnType::Mixed => ArrayMixed::get(alloc, r, idx),
            ColumnType::Link => {
                let key = ArrayKey::get(alloc, r, idx);
                if key.is_null() {
                    Mixed::Null
                } else {
                    Mixed::Link(key)
                }
            }
            ColumnType::TypedLink => {
                let link = ArrayTypedLink::get(alloc, r, idx);
                if link.is_null() {
                    Mixed::Null
                } else {
                    Mixed::TypedLink(link)
                }
            }
            ColumnType::Backlink => unreachable!(),
        }
    }

    fn set_any(&self, alloc: &mut SlabAlloc, r: Ref, idx: usize, value: &Mixed) -> Result<Ref> {
        self.check_type(value)?;
        match self.col_type {
            ColumnType::Int if self.nullable => {
                ArrayIntNull::set(alloc, r, idx, value.as_int())
            }
            ColumnType::Int => ArrayInt::set(alloc, r, idx, value.as_int().unwrap_or(0)),
            ColumnType::Bool => ArrayBool::set(alloc, r, idx, value.as_bool()),
            ColumnType::Float => ArrayFloat::set(alloc, r, idx, value.as_float()),
            ColumnType::Double => ArrayDouble::set(alloc, r, idx, value.as_double()),
            ColumnType::String => ArrayString::set(alloc, r, idx, value.as_str()),
            ColumnType::Binary => ArrayBinary::set(alloc, r, idx, value.as_binary()),
            ColumnType::Timestamp => ArrayTimestamp::set(alloc, r, idx, value.as_timestamp()),
            ColumnType::Decimal => ArrayDecimal::set(alloc, r, idx, value.as_decimal()),
            ColumnType::ObjectId => ArrayObjectId::set(alloc, r, idx, value.as_object_id()),
            ColumnType::Mixed => ArrayMixed::set(alloc, r, idx, value),
            ColumnType::Link => ArrayKey::set(
                alloc,
                r,
                idx,
                value.as_obj_key().unwrap_or(ember_types::ObjKey::NULL),
            ),
            ColumnType::TypedLink => ArrayTypedLink::set(
                alloc,
                r,
                idx,
                value.as_obj_link().unwrap_or(ember_types::ObjLink::NULL),
            ),
            ColumnType::Backlink => unreachable!(),
        }
    }

    fn insert_any(&self, alloc: &mut SlabAlloc, r: Ref, idx: usize, value: &Mixed) -> Result<Ref> {
        self.check_type(value)?;
        match self.col_type {
            ColumnType::Int if self.nullable => {
                ArrayIntNull::insert(alloc, r, idx, value.as_int())
            }
            ColumnType::Int => ArrayInt::insert(alloc, r, idx, value.as_int().unwrap_or(0)),
            ColumnType::Bool => ArrayBool::insert(alloc, r, idx, value.as_bool()),
            ColumnType::Float => ArrayFloat::insert(alloc, r, idx, value.as_float()),
            ColumnType::Double => ArrayDouble::insert(alloc, r, idx, value.as_double()),
            ColumnType::String => ArrayString::insert(alloc, r, idx, value.as_str()),
            ColumnType::Binary => ArrayBinary::insert(alloc, r, idx, value.as_binary()),
            ColumnType::Timestamp => {
                ArrayTimestamp::insert(alloc, r, idx, value.as_timestamp())
            }
            ColumnType::Decimal => ArrayDecimal::insert(alloc, r, idx, value.as_decimal()),
            ColumnType::ObjectId => ArrayObjectId::insert(alloc, r, idx, value.as_object_id()),
            ColumnType::Mixed => ArrayMixed::insert(alloc, r, idx, value),
            ColumnType::Link => ArrayKey::insert(
                alloc,
                r,
                idx,
                value.as_obj_key().unwrap_or(ember_types::ObjKey::NULL),
            ),
            ColumnType::TypedLink => ArrayTypedLink::insert(
                alloc,
                r,
                idx,
                value.as_obj_link().unwrap_or(ember_types::ObjLink::NULL),
            ),
            ColumnType::Backlink => unreachable!(),
        }
    }

    fn erase(&self, alloc: &mut SlabAlloc, r: Ref, idx: usize) -> Result<Ref> {
        match self.col_type {
            ColumnType::Int if self.nullable => ArrayIntNull::erase(alloc, r, idx),
            ColumnType::Int => ArrayInt::erase(alloc, r, idx),
            ColumnType::Bool => ArrayBool::erase(alloc, r, idx),
            ColumnType::Float => ArrayFloat::erase(alloc, r, idx),
            ColumnType::Double => ArrayDouble::erase(alloc, r, idx),
            ColumnType::String => ArrayString::erase(alloc, r, idx),
            ColumnType::Binary => ArrayBinary::erase(alloc, r, idx),
            ColumnType::Timestamp => ArrayTimestamp::erase(alloc, r, idx),
            ColumnType::Decimal => ArrayDecimal::erase(alloc, r, idx),
            ColumnType::ObjectId => ArrayObjectId::erase(alloc, r, idx),
            ColumnType::Mixed => ArrayMixed::erase(alloc, r, idx),
            ColumnType::Link => ArrayKey::erase(alloc, r, idx),
            ColumnType::TypedLink => ArrayTypedLink::erase(alloc, r, idx),
            ColumnType::Backlink => unreachable!(),
        }
    }

    fn is_null(&self, alloc: &SlabAlloc, r: Ref, idx: usize) -> bool {
        match self.col_type {
            ColumnType::Int if self.nullable => ArrayIntNull::is_null(alloc, r, idx),
            ColumnType::Int => false,
            ColumnType::Bool => ArrayBool::is_null(alloc, r, idx),
            ColumnType::Float => ArrayFloat::is_null(alloc, r, idx),
            ColumnType::Double => ArrayDouble::is_null(alloc, r, idx),
            ColumnType::String => ArrayString::is_null(alloc, r, idx),
            ColumnType::Binary => ArrayBinary::is_null(alloc, r, idx),
            ColumnType::Timestamp => ArrayTimestamp::is_null(alloc, r, idx),
            ColumnType::Decimal => ArrayDecimal::is_null(alloc, r, idx),
            ColumnType::ObjectId => ArrayObjectId::is_null(alloc, r, idx),
            ColumnType::Mixed => ArrayMixed::is_null(alloc, r, idx),
            ColumnType::Link => ArrayKey::is_null(alloc, r, idx),
            ColumnType::TypedLink => ArrayTypedLink::is_null(alloc, r, idx),
            ColumnType::Backlink => unreachable!(),
        }
    }

    fn find_first(&self, alloc: &SlabAlloc, r: Ref, value: &Mixed) -> Option<usize> {
        (0..self.len(alloc, r)).find(|&i| self.get_any(alloc, r, i) == *value)
    }

    fn len(&self, alloc: &SlabAlloc, r: Ref) -> usize {
        match self.col_type {
            ColumnType::Int if self.nullable => ArrayIntNull::len(alloc, r),
            ColumnType::Int => ArrayInt::len(alloc, r),
            ColumnType::Bool => ArrayBool::len(alloc, r),
            ColumnType::Float => ArrayFloat::len(alloc, r),
            ColumnType::Double => ArrayDouble::len(alloc, r),
            ColumnType::String => ArrayString::len(alloc, r),
            ColumnType::Binary => ArrayBinary::len(alloc, r),
            ColumnType::Timestamp => ArrayTimestamp::len(alloc, r),
            ColumnType::Decimal => ArrayDecimal::len(alloc, r),
            ColumnType::ObjectId => ArrayObjectId::len(alloc, r),
            ColumnType::Mixed => ArrayMixed::len(alloc, r),
            ColumnType::Link => ArrayKey::len(alloc, r),
            ColumnType::TypedLink => ArrayTypedLink::len(alloc, r),
            ColumnType::Backlink => unreachable!(),
        }
    }

    fn destroy(&self, alloc: &mut SlabAlloc, r: Ref) {
        // Composite leaves carry the has_refs flag, so the core recursive
        // destroy reclaims children for every leaf kind.
        crate::core::Array::destroy(alloc, r);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_types::ObjKey;

    #[test]
    fn test_set_get_round_trip_per_type() {
        let mut alloc = SlabAlloc::new_memory();
        let cases: Vec<(Payload, Mixed)> = vec![
            (Payload::new(ColumnType::Int, false), Mixed::Int(-3)),
            (Payload::new(ColumnType::Int, true), Mixed::Null),
            (Payload::new(ColumnType::Bool, true), Mixed::Bool(true)),
            (Payload::new(ColumnType::Float, true), Mixed::Float(0.5)),
            (Payload::new(ColumnType::Double, false), Mixed::Double(9.25)),
            (Payload::new(ColumnType::String, true), Mixed::from("s")),
            (
                Payload::new(ColumnType::Binary, true),
                Mixed::Binary(vec![1, 2]),
            ),
            (Payload::new(ColumnType::Mixed, true), Mixed::Int(5)),
            (
                Payload::new(ColumnType::Link, false),
                Mixed::Link(ObjKey::new(3)),
            ),
        ];
        for (payload, value) in cases {
            let r = payload.create(&mut alloc, 2).unwrap();
            let r = payload.set_any(&mut alloc, r, 1, &value).unwrap();
            assert_eq!(payload.get_any(&alloc, r, 1), value, "{payload:?}");
            assert_eq!(payload.len(&alloc, r), 2);
        }
    }

    #[test]
    fn test_type_mismatch_is_rejected() {
        let mut alloc = SlabAlloc::new_memory();
        let payload = Payload::new(ColumnType::Int, false);
        let r = payload.create(&mut alloc, 1).unwrap();
        let err = payload
            .set_any(&mut alloc, r, 0, &Mixed::from("nope"))
            .unwrap_err();
        assert!(matches!(err, EmberError::IllegalType { .. }));
    }

    #[test]
    fn test_null_into_non_nullable_is_rejected() {
        let mut alloc = SlabAlloc::new_memory();
        let payload = Payload::new(ColumnType::String, false);
        let r = payload.create(&mut alloc, 1).unwrap();
        let err = payload.set_any(&mut alloc, r, 0, &Mixed::Null).unwrap_err();
        assert!(matches!(err, EmberError::ColumnNotNullable));
    }

    #[test]
    fn test_non_nullable_defaults_are_not_null() {
        let mut alloc = SlabAlloc::new_memory();
        for ct in [
            ColumnType::Int,
            ColumnType::Bool,
            ColumnType::String,
            ColumnType::Timestamp,
        ] {
            let payload = Payload::new(ct, false);
            let r = payload.create(&mut alloc, 1).unwrap();
            assert!(!payload.is_null(&alloc, r, 0), "{ct}");
        }
    }
}
