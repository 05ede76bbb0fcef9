//! Mixed leaf: tagged values of any storable type.
//!
//! Each element is encoded as a one-byte type tag followed by a fixed or
//! variable payload, stored in the variable-size blob layout. Mixed
//! columns are the cold path of the type system; the fixed-type leaves
//! keep their packed formats and this leaf trades density for uniformity.

use ember_alloc::{Ref, SlabAlloc};
use ember_error::Result;
use ember_types::{Decimal128, Mixed, ObjKey, ObjLink, ObjectId, TableKey, Timestamp};

use crate::blob::VarBlob;

/// Mixed leaf over the variable-size blob layout.
pub enum ArrayMixed {}

const TAG_INT: u8 = 1;
const TAG_BOOL: u8 = 2;
const TAG_FLOAT: u8 = 3;
const TAG_DOUBLE: u8 = 4;
const TAG_STRING: u8 = 5;
const TAG_BINARY: u8 = 6;
const TAG_TIMESTAMP: u8 = 7;
const TAG_DECIMAL: u8 = 8;
const TAG_OBJECT_ID: u8 = 9;
const TAG_LINK: u8 = 10;
const TAG_TYPED_LINK: u8 = 11;

impl ArrayMixed {
    pub fn create(alloc: &mut SlabAlloc, count: usize) -> Result<Ref> {
        VarBlob::create(alloc, count)
    }

    pub fn len(alloc: &SlabAlloc, r: Ref) -> usize {
        VarBlob::len(alloc, r)
    }

    pub fn get(alloc: &SlabAlloc, r: Ref, idx: usize) -> Mixed {
        match VarBlob::get(alloc, r, idx) {
            None => Mixed::Null,
            Some(bytes) => decode(bytes),
        }
    }

    pub fn is_null(alloc: &SlabAlloc, r: Ref, idx: usize) -> bool {
        VarBlob::is_null(alloc, r, idx)
    }

    pub fn set(
        alloc: &mut SlabAlloc,
        r: Ref,
        idx: usize,
        value: &Mixed,
    ) -> Result<Ref> {
        match encode(value) {
            None => VarBlob::set(alloc, r, idx, None),
            Some(bytes) => VarBlob::set(alloc, r, idx, Some(&bytes)),
        }
    }

    pub fn insert(
        alloc: &mut SlabAlloc,
        r: Ref,
        idx: usize,
        value: &Mixed,
    ) -> Result<Ref> {
        match encode(value) {
            None => VarBlob::insert(alloc, r, idx, None),
            Some(bytes) => VarBlob::insert(alloc, r, idx, Some(&bytes)),
        }
    }

    pub fn erase(alloc: &mut SlabAlloc, r: Ref, idx: usize) -> Result<Ref> {
        VarBlob::erase(alloc, r, idx)
    }

    pub fn find_first(alloc: &SlabAlloc, r: Ref, value: &Mixed) -> Option<usize> {
        (0..Self::len(alloc, r)).find(|&i| Self::get(alloc, r, i) == *value)
    }

    pub fn destroy(alloc: &mut SlabAlloc, r: Ref) {
        VarBlob::destroy(alloc, r);
    }
}

fn encode(value: &Mixed) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(16);
    match value {
        Mixed::Null => return None,
        Mixed::Int(v) => {
            out.push(TAG_INT);
            out.extend_from_slice(&v.to_le_bytes());
        }
        Mixed::Bool(v) => {
            out.push(TAG_BOOL);
            out.push(u8::from(*v));
        }
        Mixed::Float(v) => {
            out.push(TAG_FLOAT);
            out.extend_from_slice(&v.to_bits().to_le_bytes());
        }
        Mixed::Double(v) => {
            out.push(TAG_DOUBLE);
            out.extend_from_slice(&v.to_bits().to_le_bytes());
        }
        Mixed::String(v) => {
            out.push(TAG_STRING);
            out.extend_from_slice(v.as_bytes());
        }
        Mixed::Binary(v) => {
            out.push(TAG_BINARY);
            out.extend_from_slice(v);
        }
        Mixed::Timestamp(v) => {
            out.push(TAG_TIMESTAMP);
            out.extend_from_slice(&v.seconds().to_le_bytes());
            out.extend_from_slice(&v.nanoseconds().to_le_bytes());
        }
        Mixed::Decimal(v) => {
            out.push(TAG_DECIMAL);
            out.extend_from_slice(&v.to_bytes());
        }
        Mixed::ObjectId(v) => {
            out.push(TAG_OBJECT_ID);
            out.extend_from_slice(v.as_bytes());
        }
        Mixed::Link(v) => {
            out.push(TAG_LINK);
            out.extend_from_slice(&v.value().to_le_bytes());
        }
        Mixed::TypedLink(v) => {
            out.push(TAG_TYPED_LINK);
            out.extend_from_slice(&v.table_key().value().to_le_bytes());
            out.extend_from_slice(&v.obj_key().value().to_le_bytes());
        }
    }
    Some(out)
}

fn decode(bytes: &[u8]) -> Mixed {
    // Elements are written by encode() above; malformed bytes mean the
    // block itself is corrupt.
    let (tag, payload) = bytes.split_first().expect("empty mixed element");
    match *tag {
        TAG_INT => Mixed::Int(i64::from_le_bytes(payload.try_into().expect("int payload"))),
        TAG_BOOL => Mixed::Bool(payload[0] != 0),
        TAG_FLOAT => Mixed::Float(f32::from_bits(u32::from_le_bytes(
            payload.try_into().expect("float payload"),
        ))),
        TAG_DOUBLE => Mixed::Double(f64::from_bits(u64::from_le_bytes(
            payload.try_into().expect("double payload"),
        ))),
        TAG_STRING => Mixed::String(
            std::str::from_utf8(payload)
                .expect("invalid utf-8 in mixed element")
                .to_owned(),
        ),
        TAG_BINARY => Mixed::Binary(payload.to_vec()),
        TAG_TIMESTAMP => {
            let seconds = i64::from_le_bytes(payload[..8].try_into().expect("ts payload"));
            let nanos = i32::from_le_bytes(payload[8..12].try_into().expect("ts payload"));
            Mixed::Timestamp(Timestamp::new(seconds, nanos))
        }
        TAG_DECIMAL => Mixed::Decimal(Decimal128::from_bytes(
            payload.try_into().expect("decimal payload"),
        )),
        TAG_OBJECT_ID => Mixed::ObjectId(ObjectId::from_bytes(
            payload.try_into().expect("objectid payload"),
        )),
        TAG_LINK => Mixed::Link(ObjKey::new(i64::from_le_bytes(
            payload.try_into().expect("link payload"),
        ))),
        TAG_TYPED_LINK => {
            let table = u32::from_le_bytes(payload[..4].try_into().expect("link payload"));
            let key = i64::from_le_bytes(payload[4..12].try_into().expect("link payload"));
            Mixed::TypedLink(ObjLink::new(TableKey::new(table), ObjKey::new(key)))
        }
        _ => panic!("unknown mixed tag {tag}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_variant_round_trips() {
        let mut alloc = SlabAlloc::new_memory();
        let values = vec![
            Mixed::Null,
            Mixed::Int(-42),
            Mixed::Bool(true),
            Mixed::Float(2.5),
            Mixed::Double(-0.125),
            Mixed::from("text"),
            Mixed::Binary(vec![0, 1, 2]),
            Mixed::Timestamp(Timestamp::new(100, 5)),
            Mixed::Decimal(Decimal128::new(314, -2)),
            Mixed::ObjectId(ObjectId::from_bytes([1; 12])),
            Mixed::Link(ObjKey::new(9)),
            Mixed::TypedLink(ObjLink::new(TableKey::new(2), ObjKey::new(4))),
        ];
        let mut r = ArrayMixed::create(&mut alloc, values.len()).unwrap();
        for (i, v) in values.iter().enumerate() {
            r = ArrayMixed::set(&mut alloc, r, i, v).unwrap();
        }
        for (i, v) in values.iter().enumerate() {
            assert_eq!(ArrayMixed::get(&alloc, r, i), *v);
        }
    }

    #[test]
    fn test_find_first_matches_typed_links() {
        let mut alloc = SlabAlloc::new_memory();
        let mut r = ArrayMixed::create(&mut alloc, 2).unwrap();
        let link = Mixed::TypedLink(ObjLink::new(TableKey::new(1), ObjKey::new(2)));
        r = ArrayMixed::set(&mut alloc, r, 1, &link).unwrap();
        assert_eq!(ArrayMixed::find_first(&alloc, r, &link), Some(1));
        assert_eq!(ArrayMixed::find_first(&alloc, r, &Mixed::Null), Some(0));
    }
}
