//! The cluster leaf: a fixed-capacity bundle of rows.
//!
//! Layout (a `has_refs` array):
//!
//! ```text
//! slot 0      tagged key base (absolute key value the offsets are relative to)
//! slot 1      ref to the key array (signed offsets from the base, ascending)
//! slot 2+i    ref to the leaf of the column with leaf index i
//! ```
//!
//! Rows are kept in ascending key order so lookups are a binary search on
//! the key array and iteration is positional.

use ember_alloc::{Ref, SlabAlloc};
use ember_array::{
    tag_int, untag_int, Array, ArrayBacklink, ArraySpec, ArrayPayload, Payload,
};
use ember_error::{EmberError, Result};
use ember_types::{ColKey, ColumnType, Mixed, ObjKey};

/// How a column's rows are materialised in the cluster.
#[derive(Debug, Clone, Copy)]
pub enum ColumnLeafKind {
    /// An inline typed value per row.
    Value(Payload),
    /// A ref per row to the root of a collection (list or dictionary);
    /// zero until the collection is first written.
    Collection,
    /// A backlink set per row.
    Backlink,
}

/// The leaf shape a column key dictates.
pub fn leaf_kind(col: ColKey) -> ColumnLeafKind {
    if col.col_type() == ColumnType::Backlink {
        ColumnLeafKind::Backlink
    } else if col.attrs().is_collection() {
        ColumnLeafKind::Collection
    } else {
        ColumnLeafKind::Value(Payload::new(col.col_type(), col.is_nullable()))
    }
}

/// Handle namespace for cluster leaf operations.
pub enum Cluster {}

impl Cluster {
    /// Create an empty cluster whose key offsets are relative to `base`.
    pub fn create(alloc: &mut SlabAlloc, cols: &[ColKey], base: i64) -> Result<Ref> {
        let keys = Array::create(alloc, ArraySpec::default(), 0, 0)?;
        let mut col_refs = Vec::with_capacity(cols.len());
        for col in cols {
            let r = match leaf_kind(*col) {
                ColumnLeafKind::Value(payload) => payload.create(alloc, 0)?,
                ColumnLeafKind::Collection => {
                    Array::create(
                        alloc,
                        ArraySpec {
                            has_refs: true,
                            ..ArraySpec::default()
                        },
                        0,
                        0,
                    )?
                }
                ColumnLeafKind::Backlink => ArrayBacklink::create(alloc, 0)?,
            };
            col_refs.push(r);
        }
        let mut leaf = Array::create(
            alloc,
            ArraySpec {
                has_refs: true,
                ..ArraySpec::default()
            },
            2 + cols.len(),
            0,
        )?;
        leaf = Array::set(alloc, leaf, 0, tag_int(base))?;
        leaf = Array::set(alloc, leaf, 1, keys.to_raw())?;
        for (i, r) in col_refs.iter().enumerate() {
            leaf = Array::set(alloc, leaf, 2 + i, r.to_raw())?;
        }
        Ok(leaf)
    }

    pub fn len(alloc: &SlabAlloc, leaf: Ref) -> usize {
        Array::len(alloc, Self::keys_ref(alloc, leaf))
    }

    pub fn key_base(alloc: &SlabAlloc, leaf: Ref) -> i64 {
        untag_int(Array::get(alloc, leaf, 0))
    }

    pub fn key_at(alloc: &SlabAlloc, leaf: Ref, row: usize) -> ObjKey {
        let base = Self::key_base(alloc, leaf);
        ObjKey::new(base + Array::get(alloc, Self::keys_ref(alloc, leaf), row))
    }

    pub fn keys(alloc: &SlabAlloc, leaf: Ref) -> Vec<ObjKey> {
        let base = Self::key_base(alloc, leaf);
        Array::get_all(alloc, Self::keys_ref(alloc, leaf))
            .into_iter()
            .map(|off| ObjKey::new(base + off))
            .collect()
    }

    /// Position of `key`, or the position it would be inserted at.
    pub fn lower_bound(alloc: &SlabAlloc, leaf: Ref, key: ObjKey) -> (usize, bool) {
        let base = Self::key_base(alloc, leaf);
        let target = key.value() - base;
        let keys = Self::keys_ref(alloc, leaf);
        let mut lo = 0;
        let mut hi = Array::len(alloc, keys);
        while lo < hi {
            let mid = (lo + hi) / 2;
            if Array::get(alloc, keys, mid) < target {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        let found = lo < Array::len(alloc, keys) && Array::get(alloc, keys, lo) == target;
        (lo, found)
    }

    /// Ref of the leaf serving the column with leaf index `idx`.
    pub fn column_ref(alloc: &SlabAlloc, leaf: Ref, idx: usize) -> Ref {
        Ref::from_raw(Array::get(alloc, leaf, 2 + idx))
    }

    /// Store a column leaf's (possibly relocated) ref back into the
    /// cluster. The cluster itself must already be writable.
    pub fn set_column_ref(
        alloc: &mut SlabAlloc,
        leaf: Ref,
        idx: usize,
        col_ref: Ref,
    ) -> Result<Ref> {
        debug_assert!(!alloc.is_read_only(leaf), "cluster not COW-promoted");
        Array::set(alloc, leaf, 2 + idx, col_ref.to_raw())
    }

    /// Insert a row for `key`, filling every column with its default and
    /// then applying `values`. The caller has verified capacity.
    pub fn insert_row(
        alloc: &mut SlabAlloc,
        leaf: Ref,
        cols: &[ColKey],
        key: ObjKey,
        values: &[(ColKey, Mixed)],
    ) -> Result<(Ref, usize)> {
        let (row, found) = Self::lower_bound(alloc, leaf, key);
        if found {
            return Err(EmberError::KeyAlreadyExists);
        }
        let leaf = Array::copy_on_write(alloc, leaf)?;
        let base = Self::key_base(alloc, leaf);
        let keys = Array::insert(alloc, Self::keys_ref(alloc, leaf), row, key.value() - base)?;
        let mut leaf = Array::set(alloc, leaf, 1, keys.to_raw())?;

        for (i, col) in cols.iter().enumerate() {
            let col_ref = Self::column_ref(alloc, leaf, i);
            let new_ref = match leaf_kind(*col) {
                ColumnLeafKind::Value(payload) => {
                    let r = payload_insert_default(&payload, alloc, col_ref, row)?;
                    let provided = values.iter().find(|(k, _)| k == col);
                    match provided {
                        Some((_, v)) => payload.set_any(alloc, r, row, v)?,
                        None => r,
                    }
                }
                ColumnLeafKind::Collection => Array::insert(alloc, col_ref, row, 0)?,
                ColumnLeafKind::Backlink => ArrayBacklink::insert_row(alloc, col_ref, row)?,
            };
            leaf = Self::set_column_ref(alloc, leaf, i, new_ref)?;
        }
        Ok((leaf, row))
    }

    /// Remove the row at `row`, destroying any collection payload it owns.
    pub fn erase_row(
        alloc: &mut SlabAlloc,
        leaf: Ref,
        cols: &[ColKey],
        row: usize,
    ) -> Result<Ref> {
        let leaf = Array::copy_on_write(alloc, leaf)?;
        let keys = Array::erase(alloc, Self::keys_ref(alloc, leaf), row)?;
        let mut leaf = Array::set(alloc, leaf, 1, keys.to_raw())?;
        for (i, col) in cols.iter().enumerate() {
            let col_ref = Self::column_ref(alloc, leaf, i);
            let new_ref = match leaf_kind(*col) {
                ColumnLeafKind::Value(payload) => payload.erase(alloc, col_ref, row)?,
                ColumnLeafKind::Collection => {
                    let child = Array::get(alloc, col_ref, row);
                    if child != 0 {
                        Array::destroy(alloc, Ref::from_raw(child));
                    }
                    Array::erase(alloc, col_ref, row)?
                }
                ColumnLeafKind::Backlink => ArrayBacklink::erase_row(alloc, col_ref, row)?,
            };
            leaf = Self::set_column_ref(alloc, leaf, i, new_ref)?;
        }
        Ok(leaf)
    }

    /// Move the rows `src_rows` out of `src` and splice them into `dst`
    /// before `dst_at`. Keys are rebased onto the destination's key base
    /// and the source rows are removed. Used by split, sibling merge and
    /// row borrowing; the caller keeps the key ranges disjoint so the
    /// result stays sorted. Returns the updated `(src, dst)` refs.
    pub fn transfer_rows(
        alloc: &mut SlabAlloc,
        src: Ref,
        dst: Ref,
        cols: &[ColKey],
        src_rows: std::ops::Range<usize>,
        dst_at: usize,
    ) -> Result<(Ref, Ref)> {
        let src = Array::copy_on_write(alloc, src)?;
        let dst = Array::copy_on_write(alloc, dst)?;

        // Keys: copy into the destination, then drop from the source.
        let dst_base = Self::key_base(alloc, dst);
        let mut dst_keys = Self::keys_ref(alloc, dst);
        for (n, row) in src_rows.clone().enumerate() {
            let abs = Self::key_at(alloc, src, row).value();
            dst_keys = Array::insert(alloc, dst_keys, dst_at + n, abs - dst_base)?;
        }
        let dst = Array::set(alloc, dst, 1, dst_keys.to_raw())?;
        let mut src_keys = Self::keys_ref(alloc, src);
        for row in src_rows.clone().rev() {
            src_keys = Array::erase(alloc, src_keys, row)?;
        }
        let mut src = Array::set(alloc, src, 1, src_keys.to_raw())?;
        let mut dst = dst;

        // Column payloads, same copy-then-drop order per column.
        for (i, col) in cols.iter().enumerate() {
            let mut s = Self::column_ref(alloc, src, i);
            let mut d = Self::column_ref(alloc, dst, i);
            match leaf_kind(*col) {
                ColumnLeafKind::Value(payload) => {
                    for (n, row) in src_rows.clone().enumerate() {
                        let v = payload.get_any(alloc, s, row);
                        d = payload_insert_raw(&payload, alloc, d, dst_at + n, &v)?;
                    }
                    for row in src_rows.clone().rev() {
                        s = payload.erase(alloc, s, row)?;
                    }
                }
                ColumnLeafKind::Collection => {
                    // Child roots move by ref; the slots must not destroy
                    // what they hand over.
                    for (n, row) in src_rows.clone().enumerate() {
                        let child = Array::get(alloc, s, row);
                        d = Array::insert(alloc, d, dst_at + n, child)?;
                    }
                    for row in src_rows.clone().rev() {
                        s = Array::erase(alloc, s, row)?;
                    }
                }
                ColumnLeafKind::Backlink => {
                    for (n, row) in src_rows.clone().enumerate() {
                        let set = ArrayBacklink::get_all(alloc, s, row);
                        d = ArrayBacklink::insert_row(alloc, d, dst_at + n)?;
                        d = ArrayBacklink::write_all(alloc, d, dst_at + n, &set)?;
                    }
                    // Sets were copied, so erase_row is right: it frees
                    // the originals' child arrays.
                    for row in src_rows.clone().rev() {
                        s = ArrayBacklink::erase_row(alloc, s, row)?;
                    }
                }
            }
            src = Self::set_column_ref(alloc, src, i, s)?;
            dst = Self::set_column_ref(alloc, dst, i, d)?;
        }
        Ok((src, dst))
    }

    /// Split a full cluster: move the upper half of the rows into a fresh
    /// cluster. Returns `(old, new, first key of new, rows moved)`.
    pub fn split(
        alloc: &mut SlabAlloc,
        leaf: Ref,
        cols: &[ColKey],
    ) -> Result<(Ref, Ref, i64, usize)> {
        let len = Self::len(alloc, leaf);
        let at = len / 2;
        let moved = len - at;
        let split_key = Self::key_at(alloc, leaf, at).value();
        let new_leaf = Cluster::create(alloc, cols, split_key)?;
        let (leaf, new_leaf) = Self::transfer_rows(alloc, leaf, new_leaf, cols, at..len, 0)?;
        Ok((leaf, new_leaf, split_key, moved))
    }

    /// Free the cluster and everything it owns.
    pub fn destroy(alloc: &mut SlabAlloc, leaf: Ref) {
        Array::destroy(alloc, leaf);
    }

    fn keys_ref(alloc: &SlabAlloc, leaf: Ref) -> Ref {
        Ref::from_raw(Array::get(alloc, leaf, 1))
    }
}

fn payload_insert_default(
    payload: &Payload,
    alloc: &mut SlabAlloc,
    r: Ref,
    idx: usize,
) -> Result<Ref> {
    let default = default_for(payload);
    payload.insert_any(alloc, r, idx, &default)
}

/// Insert during a split: the value came from a live row, so it is
/// type-correct by construction.
fn payload_insert_raw(
    payload: &Payload,
    alloc: &mut SlabAlloc,
    r: Ref,
    idx: usize,
    value: &Mixed,
) -> Result<Ref> {
    if value.is_null() {
        return payload_insert_default(payload, alloc, r, idx);
    }
    payload.insert_any(alloc, r, idx, value)
}

fn default_for(payload: &Payload) -> Mixed {
    if payload.nullable || payload.col_type.is_link_type() {
        return Mixed::Null;
    }
    match payload.col_type {
        ColumnType::Int => Mixed::Int(0),
        ColumnType::Bool => Mixed::Bool(false),
        ColumnType::Float => Mixed::Float(0.0),
        ColumnType::Double => Mixed::Double(0.0),
        ColumnType::String => Mixed::String(String::new()),
        ColumnType::Binary => Mixed::Binary(Vec::new()),
        ColumnType::Timestamp => Mixed::Timestamp(ember_types::Timestamp::EPOCH),
        ColumnType::Decimal => Mixed::Decimal(ember_types::Decimal128::ZERO),
        ColumnType::ObjectId => Mixed::ObjectId(ember_types::ObjectId::default()),
        ColumnType::Mixed => Mixed::Null,
        ColumnType::Link | ColumnType::TypedLink | ColumnType::Backlink => unreachable!(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_types::{col_attr, ColKeyIdx, ColumnAttrMask};

    fn int_col(idx: u16) -> ColKey {
        ColKey::new(ColKeyIdx(idx), ColumnType::Int, ColumnAttrMask::EMPTY, 0)
    }

    fn string_col(idx: u16) -> ColKey {
        ColKey::new(
            ColKeyIdx(idx),
            ColumnType::String,
            ColumnAttrMask::EMPTY.with(col_attr::NULLABLE),
            0,
        )
    }

    #[test]
    fn test_insert_rows_in_key_order() {
        let mut alloc = SlabAlloc::new_memory();
        let cols = vec![int_col(0), string_col(1)];
        let mut leaf = Cluster::create(&mut alloc, &cols, 0).unwrap();
        for k in [5i64, 1, 3] {
            let (l, _) = Cluster::insert_row(&mut alloc, leaf, &cols, ObjKey::new(k), &[]).unwrap();
            leaf = l;
        }
        assert_eq!(
            Cluster::keys(&alloc, leaf),
            vec![ObjKey::new(1), ObjKey::new(3), ObjKey::new(5)]
        );
        let (row, found) = Cluster::lower_bound(&alloc, leaf, ObjKey::new(3));
        assert!(found);
        assert_eq!(row, 1);
    }

    #[test]
    fn test_duplicate_key_rejected() {
        let mut alloc = SlabAlloc::new_memory();
        let cols = vec![int_col(0)];
        let leaf = Cluster::create(&mut alloc, &cols, 0).unwrap();
        let (leaf, _) =
            Cluster::insert_row(&mut alloc, leaf, &cols, ObjKey::new(7), &[]).unwrap();
        let err = Cluster::insert_row(&mut alloc, leaf, &cols, ObjKey::new(7), &[]).unwrap_err();
        assert!(matches!(err, EmberError::KeyAlreadyExists));
    }

    #[test]
    fn test_insert_applies_field_values() {
        let mut alloc = SlabAlloc::new_memory();
        let cols = vec![int_col(0), string_col(1)];
        let leaf = Cluster::create(&mut alloc, &cols, 0).unwrap();
        let values = vec![
            (cols[0], Mixed::Int(99)),
            (cols[1], Mixed::from("hello")),
        ];
        let (leaf, row) =
            Cluster::insert_row(&mut alloc, leaf, &cols, ObjKey::new(1), &values).unwrap();
        let p0 = Payload::new(ColumnType::Int, false);
        let p1 = Payload::new(ColumnType::String, true);
        assert_eq!(
            p0.get_any(&alloc, Cluster::column_ref(&alloc, leaf, 0), row),
            Mixed::Int(99)
        );
        assert_eq!(
            p1.get_any(&alloc, Cluster::column_ref(&alloc, leaf, 1), row),
            Mixed::from("hello")
        );
    }

    #[test]
    fn test_split_partitions_rows() {
        let mut alloc = SlabAlloc::new_memory();
        let cols = vec![int_col(0)];
        let mut leaf = Cluster::create(&mut alloc, &cols, 0).unwrap();
        let p0 = Payload::new(ColumnType::Int, false);
        for k in 0..8i64 {
            let (l, row) =
                Cluster::insert_row(&mut alloc, leaf, &cols, ObjKey::new(k), &[]).unwrap();
            leaf = l;
            let col = Cluster::column_ref(&alloc, leaf, 0);
            let col = p0.set_any(&mut alloc, col, row, &Mixed::Int(k * 10)).unwrap();
            leaf = Cluster::set_column_ref(&mut alloc, leaf, 0, col).unwrap();
        }
        let (old, new, split_key, moved) = Cluster::split(&mut alloc, leaf, &cols).unwrap();
        assert_eq!(split_key, 4);
        assert_eq!(moved, 4);
        assert_eq!(Cluster::len(&alloc, old), 4);
        assert_eq!(Cluster::len(&alloc, new), 4);
        assert_eq!(Cluster::key_at(&alloc, new, 0), ObjKey::new(4));
        assert_eq!(
            p0.get_any(&alloc, Cluster::column_ref(&alloc, new, 0), 0),
            Mixed::Int(40)
        );
        assert_eq!(
            p0.get_any(&alloc, Cluster::column_ref(&alloc, old, 3), 3),
            Mixed::Int(30)
        );
    }

    #[test]
    fn test_erase_row_removes_key_and_values() {
        let mut alloc = SlabAlloc::new_memory();
        let cols = vec![int_col(0)];
        let mut leaf = Cluster::create(&mut alloc, &cols, 0).unwrap();
        for k in 0..3i64 {
            let (l, _) = Cluster::insert_row(&mut alloc, leaf, &cols, ObjKey::new(k), &[]).unwrap();
            leaf = l;
        }
        leaf = Cluster::erase_row(&mut alloc, leaf, &cols, 1).unwrap();
        assert_eq!(
            Cluster::keys(&alloc, leaf),
            vec![ObjKey::new(0), ObjKey::new(2)]
        );
    }
}
