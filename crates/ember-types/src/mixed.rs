//! The `Mixed` tagged value.

use std::cmp::Ordering;
use std::fmt;

use xxhash_rust::xxh3::xxh3_64;

use crate::decimal::Decimal128;
use crate::key::{ObjKey, ObjLink};
use crate::object_id::ObjectId;
use crate::schema::ColumnType;
use crate::timestamp::Timestamp;

/// A dynamically-typed value: any storable primitive, a link, or null.
///
/// This is the value representation used wherever a column's static type is
/// not known at the call site — `Mixed` columns, dictionary keys and
/// values, replication payloads, and the comparison utilities. Typed hot
/// paths bypass it entirely.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Mixed {
    Null,
    Int(i64),
    Bool(bool),
    Float(f32),
    Double(f64),
    String(String),
    Binary(Vec<u8>),
    Timestamp(Timestamp),
    Decimal(Decimal128),
    ObjectId(ObjectId),
    /// A link within the column's declared target table.
    Link(ObjKey),
    /// A link carrying its own target table.
    TypedLink(ObjLink),
}

impl Mixed {
    pub const fn is_null(&self) -> bool {
        matches!(self, Mixed::Null)
    }

    /// The column type this value would be stored under, or `None` for null.
    pub const fn value_type(&self) -> Option<ColumnType> {
        match self {
            Mixed::Null => None,
            Mixed::Int(_) => Some(ColumnType::Int),
            Mixed::Bool(_) => Some(ColumnType::Bool),
            Mixed::Float(_) => Some(ColumnType::Float),
            Mixed::Double(_) => Some(ColumnType::Double),
            Mixed::String(_) => Some(ColumnType::String),
            Mixed::Binary(_) => Some(ColumnType::Binary),
            Mixed::Timestamp(_) => Some(ColumnType::Timestamp),
            Mixed::Decimal(_) => Some(ColumnType::Decimal),
            Mixed::ObjectId(_) => Some(ColumnType::ObjectId),
            Mixed::Link(_) => Some(ColumnType::Link),
            Mixed::TypedLink(_) => Some(ColumnType::TypedLink),
        }
    }

    /// Static name of the payload type, for error messages.
    pub const fn type_name(&self) -> &'static str {
        match self.value_type() {
            Some(t) => t.name(),
            None => "null",
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Mixed::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Mixed::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f32> {
        match self {
            Mixed::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_double(&self) -> Option<f64> {
        match self {
            Mixed::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Mixed::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_binary(&self) -> Option<&[u8]> {
        match self {
            Mixed::Binary(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<Timestamp> {
        match self {
            Mixed::Timestamp(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_decimal(&self) -> Option<Decimal128> {
        match self {
            Mixed::Decimal(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_object_id(&self) -> Option<ObjectId> {
        match self {
            Mixed::ObjectId(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_obj_key(&self) -> Option<ObjKey> {
        match self {
            Mixed::Link(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_obj_link(&self) -> Option<ObjLink> {
        match self {
            Mixed::TypedLink(v) => Some(*v),
            _ => None,
        }
    }

    /// Order within a single value type. Values of different types (or any
    /// NaN operand) are unordered.
    pub fn partial_cmp_same_type(&self, other: &Mixed) -> Option<Ordering> {
        match (self, other) {
            (Mixed::Null, Mixed::Null) => Some(Ordering::Equal),
            (Mixed::Int(a), Mixed::Int(b)) => Some(a.cmp(b)),
            (Mixed::Bool(a), Mixed::Bool(b)) => Some(a.cmp(b)),
            (Mixed::Float(a), Mixed::Float(b)) => a.partial_cmp(b),
            (Mixed::Double(a), Mixed::Double(b)) => a.partial_cmp(b),
            (Mixed::String(a), Mixed::String(b)) => Some(a.cmp(b)),
            (Mixed::Binary(a), Mixed::Binary(b)) => Some(a.cmp(b)),
            (Mixed::Timestamp(a), Mixed::Timestamp(b)) => Some(a.cmp(b)),
            (Mixed::Decimal(a), Mixed::Decimal(b)) => a.partial_cmp(b),
            (Mixed::ObjectId(a), Mixed::ObjectId(b)) => Some(a.cmp(b)),
            (Mixed::Link(a), Mixed::Link(b)) => Some(a.cmp(b)),
            (Mixed::TypedLink(a), Mixed::TypedLink(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// A 63-bit hash of the value, used as the row key of dictionary
    /// entries. Stable across process runs; type-tagged so `1i64` and
    /// `true` hash apart.
    pub fn hash63(&self) -> i64 {
        let mut buf = Vec::with_capacity(24);
        match self {
            Mixed::Null => buf.push(0u8),
            Mixed::Int(v) => {
                buf.push(1);
                buf.extend_from_slice(&v.to_le_bytes());
            }
            Mixed::Bool(v) => {
                buf.push(2);
                buf.push(u8::from(*v));
            }
            Mixed::Float(v) => {
                buf.push(3);
                buf.extend_from_slice(&v.to_bits().to_le_bytes());
            }
            Mixed::Double(v) => {
                buf.push(4);
                buf.extend_from_slice(&v.to_bits().to_le_bytes());
            }
            Mixed::String(v) => {
                buf.push(5);
                buf.extend_from_slice(v.as_bytes());
            }
            Mixed::Binary(v) => {
                buf.push(6);
                buf.extend_from_slice(v);
            }
            Mixed::Timestamp(v) => {
                buf.push(7);
                buf.extend_from_slice(&v.seconds().to_le_bytes());
                buf.extend_from_slice(&v.nanoseconds().to_le_bytes());
            }
            Mixed::Decimal(v) => {
                buf.push(8);
                buf.extend_from_slice(&v.to_bytes());
            }
            Mixed::ObjectId(v) => {
                buf.push(9);
                buf.extend_from_slice(v.as_bytes());
            }
            Mixed::Link(v) => {
                buf.push(10);
                buf.extend_from_slice(&v.value().to_le_bytes());
            }
            Mixed::TypedLink(v) => {
                buf.push(11);
                buf.extend_from_slice(&v.table_key().value().to_le_bytes());
                buf.extend_from_slice(&v.obj_key().value().to_le_bytes());
            }
        }
        (xxh3_64(&buf) & 0x7FFF_FFFF_FFFF_FFFF) as i64
    }
}

impl Default for Mixed {
    fn default() -> Self {
        Mixed::Null
    }
}

impl fmt::Display for Mixed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mixed::Null => f.write_str("null"),
            Mixed::Int(v) => write!(f, "{v}"),
            Mixed::Bool(v) => write!(f, "{v}"),
            Mixed::Float(v) => write!(f, "{v}"),
            Mixed::Double(v) => write!(f, "{v}"),
            Mixed::String(v) => write!(f, "{v:?}"),
            Mixed::Binary(v) => write!(f, "<{} bytes>", v.len()),
            Mixed::Timestamp(v) => write!(f, "{v}"),
            Mixed::Decimal(v) => write!(f, "{v}"),
            Mixed::ObjectId(v) => write!(f, "{v}"),
            Mixed::Link(v) => write!(f, "link({v})"),
            Mixed::TypedLink(v) => write!(f, "link({v})"),
        }
    }
}

impl From<i64> for Mixed {
    fn from(v: i64) -> Self {
        Mixed::Int(v)
    }
}

impl From<bool> for Mixed {
    fn from(v: bool) -> Self {
        Mixed::Bool(v)
    }
}

impl From<f32> for Mixed {
    fn from(v: f32) -> Self {
        Mixed::Float(v)
    }
}

impl From<f64> for Mixed {
    fn from(v: f64) -> Self {
        Mixed::Double(v)
    }
}

impl From<&str> for Mixed {
    fn from(v: &str) -> Self {
        Mixed::String(v.to_owned())
    }
}

impl From<String> for Mixed {
    fn from(v: String) -> Self {
        Mixed::String(v)
    }
}

impl From<&[u8]> for Mixed {
    fn from(v: &[u8]) -> Self {
        Mixed::Binary(v.to_vec())
    }
}

impl From<Vec<u8>> for Mixed {
    fn from(v: Vec<u8>) -> Self {
        Mixed::Binary(v)
    }
}

impl From<Timestamp> for Mixed {
    fn from(v: Timestamp) -> Self {
        Mixed::Timestamp(v)
    }
}

impl From<Decimal128> for Mixed {
    fn from(v: Decimal128) -> Self {
        Mixed::Decimal(v)
    }
}

impl From<ObjectId> for Mixed {
    fn from(v: ObjectId) -> Self {
        Mixed::ObjectId(v)
    }
}

impl From<ObjKey> for Mixed {
    fn from(v: ObjKey) -> Self {
        Mixed::Link(v)
    }
}

impl From<ObjLink> for Mixed {
    fn from(v: ObjLink) -> Self {
        Mixed::TypedLink(v)
    }
}

impl<T: Into<Mixed>> From<Option<T>> for Mixed {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => Mixed::Null,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::TableKey;

    #[test]
    fn test_nan_compares_unequal_to_itself() {
        let nan = Mixed::Double(f64::NAN);
        assert_ne!(nan, nan.clone());
        assert!(nan.partial_cmp_same_type(&nan).is_none());
    }

    #[test]
    fn test_hash63_is_type_tagged_and_nonnegative() {
        let a = Mixed::Int(1);
        let b = Mixed::Bool(true);
        assert_ne!(a.hash63(), b.hash63());
        for v in [a, b, Mixed::from("key"), Mixed::Null] {
            assert!(v.hash63() >= 0);
        }
    }

    #[test]
    fn test_cross_type_comparison_is_unordered() {
        assert!(Mixed::Int(1)
            .partial_cmp_same_type(&Mixed::Double(1.0))
            .is_none());
    }

    #[test]
    fn test_typed_link_accessors() {
        let link = ObjLink::new(TableKey::new(7), ObjKey::new(3));
        let m = Mixed::from(link);
        assert_eq!(m.as_obj_link(), Some(link));
        assert_eq!(m.as_obj_key(), None);
        assert_eq!(m.value_type(), Some(ColumnType::TypedLink));
    }
}
