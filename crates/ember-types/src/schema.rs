//! Column types and attribute bits.

use std::fmt;

/// The type of the values stored in a column's cluster leaf.
///
/// A list-of-links column is a `Link` column with the `LIST` attribute set;
/// there is no separate link-list type. `Backlink` columns are hidden
/// bookkeeping columns and never appear in a public schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[repr(u8)]
pub enum ColumnType {
    Int = 0,
    Bool = 1,
    String = 2,
    Binary = 3,
    Mixed = 4,
    Timestamp = 5,
    Float = 6,
    Double = 7,
    Decimal = 8,
    ObjectId = 9,
    Link = 10,
    TypedLink = 11,
    Backlink = 12,
}

impl ColumnType {
    /// Decode from the raw value packed into a [`crate::ColKey`].
    pub const fn from_raw(raw: u8) -> Option<ColumnType> {
        match raw {
            0 => Some(ColumnType::Int),
            1 => Some(ColumnType::Bool),
            2 => Some(ColumnType::String),
            3 => Some(ColumnType::Binary),
            4 => Some(ColumnType::Mixed),
            5 => Some(ColumnType::Timestamp),
            6 => Some(ColumnType::Float),
            7 => Some(ColumnType::Double),
            8 => Some(ColumnType::Decimal),
            9 => Some(ColumnType::ObjectId),
            10 => Some(ColumnType::Link),
            11 => Some(ColumnType::TypedLink),
            12 => Some(ColumnType::Backlink),
            _ => None,
        }
    }

    /// Static name, used in error messages and diff reports.
    pub const fn name(self) -> &'static str {
        match self {
            ColumnType::Int => "int",
            ColumnType::Bool => "bool",
            ColumnType::String => "string",
            ColumnType::Binary => "binary",
            ColumnType::Mixed => "mixed",
            ColumnType::Timestamp => "timestamp",
            ColumnType::Float => "float",
            ColumnType::Double => "double",
            ColumnType::Decimal => "decimal",
            ColumnType::ObjectId => "objectid",
            ColumnType::Link => "link",
            ColumnType::TypedLink => "typedlink",
            ColumnType::Backlink => "backlink",
        }
    }

    /// True for the column types that hold cross-object references and
    /// therefore participate in the backlink protocol.
    pub const fn is_link_type(self) -> bool {
        matches!(
            self,
            ColumnType::Link | ColumnType::TypedLink | ColumnType::Mixed
        )
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Individual attribute bits for [`ColumnAttrMask`].
pub mod col_attr {
    /// Value may be null.
    pub const NULLABLE: u8 = 0x01;
    /// Column holds a list of the element type.
    pub const LIST: u8 = 0x02;
    /// Column holds a dictionary keyed by `Mixed`.
    pub const DICTIONARY: u8 = 0x04;
    /// Column is the table's primary key; values are unique.
    pub const PRIMARY_KEY: u8 = 0x08;
    /// Links through this column own their target (cascade on removal).
    pub const STRONG_LINKS: u8 = 0x10;
}

/// Attribute bits carried by a column key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
pub struct ColumnAttrMask(u8);

impl ColumnAttrMask {
    /// No attributes set.
    pub const EMPTY: ColumnAttrMask = ColumnAttrMask(0);

    /// Construct from raw bits (masked to the defined attribute range).
    pub const fn from_raw(raw: u8) -> ColumnAttrMask {
        ColumnAttrMask(raw & 0x1F)
    }

    /// Raw bits, for packing into a [`crate::ColKey`].
    pub const fn to_raw(self) -> u8 {
        self.0
    }

    /// Test a single attribute bit from [`col_attr`].
    pub const fn test(self, bit: u8) -> bool {
        self.0 & bit != 0
    }

    /// Return a copy with `bit` set.
    #[must_use]
    pub const fn with(self, bit: u8) -> ColumnAttrMask {
        ColumnAttrMask(self.0 | bit)
    }

    pub const fn is_nullable(self) -> bool {
        self.test(col_attr::NULLABLE)
    }

    pub const fn is_list(self) -> bool {
        self.test(col_attr::LIST)
    }

    pub const fn is_dictionary(self) -> bool {
        self.test(col_attr::DICTIONARY)
    }

    pub const fn is_primary_key(self) -> bool {
        self.test(col_attr::PRIMARY_KEY)
    }

    pub const fn has_strong_links(self) -> bool {
        self.test(col_attr::STRONG_LINKS)
    }

    /// A column is a collection if it is a list or a dictionary; collection
    /// columns store a ref to their payload rather than an inline value.
    pub const fn is_collection(self) -> bool {
        self.is_list() || self.is_dictionary()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_type_raw_round_trip() {
        for raw in 0..=12u8 {
            let ct = ColumnType::from_raw(raw).unwrap();
            assert_eq!(ct as u8, raw);
        }
        assert!(ColumnType::from_raw(13).is_none());
    }

    #[test]
    fn test_attr_mask_bits() {
        let attrs = ColumnAttrMask::EMPTY
            .with(col_attr::NULLABLE)
            .with(col_attr::LIST);
        assert!(attrs.is_nullable());
        assert!(attrs.is_list());
        assert!(!attrs.is_dictionary());
        assert!(attrs.is_collection());
        assert_eq!(ColumnAttrMask::from_raw(attrs.to_raw()), attrs);
    }
}
