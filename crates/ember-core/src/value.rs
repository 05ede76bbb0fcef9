//! Conversion between Rust types and the tagged value representation.

use ember_types::{Decimal128, Mixed, ObjKey, ObjLink, ObjectId, Timestamp};

/// Types an accessor can read and write directly.
///
/// `from_mixed` returns `None` on a type mismatch, which the accessor
/// maps to an `IllegalType` error. Nullable columns are accessed as
/// `Option<T>`: null converts to `None` instead of failing.
pub trait ObjValue: Sized {
    const TYPE_NAME: &'static str;

    fn to_mixed(self) -> Mixed;
    fn from_mixed(value: Mixed) -> Option<Self>;
}

macro_rules! obj_value {
    ($ty:ty, $name:literal, $variant:ident) => {
        impl ObjValue for $ty {
            const TYPE_NAME: &'static str = $name;

            fn to_mixed(self) -> Mixed {
                Mixed::$variant(self)
            }

            fn from_mixed(value: Mixed) -> Option<Self> {
                match value {
                    Mixed::$variant(v) => Some(v),
                    _ => None,
                }
            }
        }
    };
}

obj_value!(i64, "int", Int);
obj_value!(bool, "bool", Bool);
obj_value!(f32, "float", Float);
obj_value!(f64, "double", Double);
obj_value!(String, "string", String);
obj_value!(Vec<u8>, "binary", Binary);
obj_value!(Timestamp, "timestamp", Timestamp);
obj_value!(Decimal128, "decimal", Decimal);
obj_value!(ObjectId, "objectid", ObjectId);

impl ObjValue for ObjKey {
    const TYPE_NAME: &'static str = "link";

    fn to_mixed(self) -> Mixed {
        if self.is_null() {
            Mixed::Null
        } else {
            Mixed::Link(self)
        }
    }

    fn from_mixed(value: Mixed) -> Option<Self> {
        match value {
            Mixed::Null => Some(ObjKey::NULL),
            Mixed::Link(k) => Some(k),
            _ => None,
        }
    }
}

impl ObjValue for ObjLink {
    const TYPE_NAME: &'static str = "typedlink";

    fn to_mixed(self) -> Mixed {
        if self.is_null() {
            Mixed::Null
        } else {
            Mixed::TypedLink(self)
        }
    }

    fn from_mixed(value: Mixed) -> Option<Self> {
        match value {
            Mixed::Null => Some(ObjLink::NULL),
            Mixed::TypedLink(l) => Some(l),
            _ => None,
        }
    }
}

impl ObjValue for Mixed {
    const TYPE_NAME: &'static str = "mixed";

    fn to_mixed(self) -> Mixed {
        self
    }

    fn from_mixed(value: Mixed) -> Option<Self> {
        Some(value)
    }
}

impl<T: ObjValue> ObjValue for Option<T> {
    const TYPE_NAME: &'static str = T::TYPE_NAME;

    fn to_mixed(self) -> Mixed {
        match self {
            Some(v) => v.to_mixed(),
            None => Mixed::Null,
        }
    }

    fn from_mixed(value: Mixed) -> Option<Self> {
        if value.is_null() {
            return Some(None);
        }
        T::from_mixed(value).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_option_absorbs_null() {
        assert_eq!(<Option<i64>>::from_mixed(Mixed::Null), Some(None));
        assert_eq!(<Option<i64>>::from_mixed(Mixed::Int(4)), Some(Some(4)));
        assert_eq!(i64::from_mixed(Mixed::Null), None);
    }

    #[test]
    fn test_null_key_round_trips_as_null() {
        assert_eq!(ObjKey::NULL.to_mixed(), Mixed::Null);
        assert_eq!(ObjKey::from_mixed(Mixed::Null), Some(ObjKey::NULL));
    }
}
