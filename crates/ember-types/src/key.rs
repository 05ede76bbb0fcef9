//! Stable identifiers: tables, rows, columns, and cross-table links.

use std::fmt;

use crate::schema::{ColumnAttrMask, ColumnType};

/// Identifies a table within a group. Stable across schema changes.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[repr(transparent)]
pub struct TableKey(u32);

impl TableKey {
    pub const fn new(value: u32) -> TableKey {
        TableKey(value)
    }

    pub const fn value(self) -> u32 {
        self.0
    }
}

impl fmt::Display for TableKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

/// Identifies a row within a table.
///
/// The payload is a 63-bit signed integer. Three ranges matter:
///
/// - `value >= 0`: a resolved key, addressing a row in the live tree.
/// - `value == -1`: the null sentinel ([`ObjKey::NULL`]).
/// - `value <= -2`: an unresolved key, addressing a row in the tombstone
///   tree. [`ObjKey::unresolved_twin`] maps between the two ranges and is
///   its own inverse.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[repr(transparent)]
pub struct ObjKey(i64);

impl ObjKey {
    /// The null key. Stored in a link leaf it means "no target".
    pub const NULL: ObjKey = ObjKey(-1);

    pub const fn new(value: i64) -> ObjKey {
        ObjKey(value)
    }

    pub const fn value(self) -> i64 {
        self.0
    }

    pub const fn is_null(self) -> bool {
        self.0 == -1
    }

    /// True if this key addresses the tombstone tree.
    pub const fn is_unresolved(self) -> bool {
        self.0 <= -2
    }

    /// The tombstone twin of a live key, or the live twin of a tombstone
    /// key. `k.unresolved_twin().unresolved_twin() == k`.
    #[must_use]
    pub const fn unresolved_twin(self) -> ObjKey {
        ObjKey(-2 - self.0)
    }
}

impl Default for ObjKey {
    fn default() -> Self {
        ObjKey::NULL
    }
}

impl fmt::Debug for ObjKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            f.write_str("ObjKey(null)")
        } else {
            write!(f, "ObjKey({})", self.0)
        }
    }
}

impl fmt::Display for ObjKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An explicit cross-table reference: `(table, row)`.
///
/// The null link has a zero-valued table key and a null object key and is
/// falsy in the same places a null [`ObjKey`] is.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct ObjLink {
    table: TableKey,
    key: ObjKey,
}

impl ObjLink {
    pub const NULL: ObjLink = ObjLink {
        table: TableKey::new(0),
        key: ObjKey::NULL,
    };

    pub const fn new(table: TableKey, key: ObjKey) -> ObjLink {
        ObjLink { table, key }
    }

    pub const fn table_key(self) -> TableKey {
        self.table
    }

    pub const fn obj_key(self) -> ObjKey {
        self.key
    }

    pub const fn is_null(self) -> bool {
        self.key.is_null()
    }

    pub const fn is_unresolved(self) -> bool {
        self.key.is_unresolved()
    }
}

impl Default for ObjLink {
    fn default() -> Self {
        ObjLink::NULL
    }
}

impl fmt::Display for ObjLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.table, self.key)
    }
}

/// Position of a column's leaf within a cluster's field array.
///
/// This is distinct from the column's position in the public schema: leaf
/// indices are never reused while a cluster layout is live.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[repr(transparent)]
pub struct ColKeyIdx(pub u16);

/// Stable column identifier.
///
/// Packs, into one `i64`: the leaf index, the column type, the attribute
/// bits, and a tag disambiguating recreated columns. Opaque to callers;
/// equality and hashing are over the full packed value.
///
/// Bit layout, low to high:
///
/// ```text
/// [ 0..16)  leaf index
/// [16..22)  column type
/// [22..30)  attribute bits
/// [30..62)  tag
/// ```
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[repr(transparent)]
pub struct ColKey(i64);

impl ColKey {
    const IDX_BITS: u32 = 16;
    const TYPE_BITS: u32 = 6;
    const ATTR_BITS: u32 = 8;

    const TYPE_SHIFT: u32 = Self::IDX_BITS;
    const ATTR_SHIFT: u32 = Self::TYPE_SHIFT + Self::TYPE_BITS;
    const TAG_SHIFT: u32 = Self::ATTR_SHIFT + Self::ATTR_BITS;

    pub fn new(idx: ColKeyIdx, col_type: ColumnType, attrs: ColumnAttrMask, tag: u32) -> ColKey {
        let v = i64::from(idx.0)
            | (i64::from(col_type as u8) << Self::TYPE_SHIFT)
            | (i64::from(attrs.to_raw()) << Self::ATTR_SHIFT)
            | (i64::from(tag) << Self::TAG_SHIFT);
        ColKey(v)
    }

    /// Reconstruct from a raw packed value, e.g. read back from storage.
    /// Returns `None` if the type field does not decode.
    pub fn from_raw(raw: i64) -> Option<ColKey> {
        let key = ColKey(raw);
        ColumnType::from_raw(((raw >> Self::TYPE_SHIFT) & 0x3F) as u8).map(|_| key)
    }

    pub const fn to_raw(self) -> i64 {
        self.0
    }

    /// Position in each cluster's field array.
    pub const fn idx(self) -> ColKeyIdx {
        ColKeyIdx((self.0 & 0xFFFF) as u16)
    }

    pub fn col_type(self) -> ColumnType {
        // The constructor and from_raw both guarantee a decodable type field.
        ColumnType::from_raw(((self.0 >> Self::TYPE_SHIFT) & 0x3F) as u8).unwrap()
    }

    pub const fn attrs(self) -> ColumnAttrMask {
        ColumnAttrMask::from_raw(((self.0 >> Self::ATTR_SHIFT) & 0xFF) as u8)
    }

    pub const fn tag(self) -> u32 {
        ((self.0 >> Self::TAG_SHIFT) & 0xFFFF_FFFF) as u32
    }

    pub fn is_nullable(self) -> bool {
        self.attrs().is_nullable()
    }

    pub fn is_list(self) -> bool {
        self.attrs().is_list()
    }

    pub fn is_dictionary(self) -> bool {
        self.attrs().is_dictionary()
    }

    pub fn is_collection(self) -> bool {
        self.attrs().is_collection()
    }
}

impl fmt::Debug for ColKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ColKey(idx={}, type={}, attrs={:#04x}, tag={})",
            self.idx().0,
            self.col_type(),
            self.attrs().to_raw(),
            self.tag()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::col_attr;

    #[test]
    fn test_obj_key_unresolved_twin_is_involution() {
        for v in [0i64, 1, 7, 1 << 40] {
            let k = ObjKey::new(v);
            let t = k.unresolved_twin();
            assert!(t.is_unresolved());
            assert!(!t.is_null());
            assert_eq!(t.unresolved_twin(), k);
        }
    }

    #[test]
    fn test_null_key_is_neither_live_nor_unresolved() {
        assert!(ObjKey::NULL.is_null());
        assert!(!ObjKey::NULL.is_unresolved());
        assert_eq!(ObjKey::default(), ObjKey::NULL);
    }

    #[test]
    fn test_col_key_packing_round_trip() {
        let attrs = ColumnAttrMask::EMPTY
            .with(col_attr::NULLABLE)
            .with(col_attr::LIST);
        let key = ColKey::new(ColKeyIdx(513), ColumnType::Timestamp, attrs, 0xBEEF);
        assert_eq!(key.idx(), ColKeyIdx(513));
        assert_eq!(key.col_type(), ColumnType::Timestamp);
        assert_eq!(key.attrs(), attrs);
        assert_eq!(key.tag(), 0xBEEF);
        assert_eq!(ColKey::from_raw(key.to_raw()), Some(key));
    }

    #[test]
    fn test_null_link_is_falsy() {
        assert!(ObjLink::NULL.is_null());
        assert!(!ObjLink::new(TableKey::new(3), ObjKey::new(4)).is_null());
    }
}
