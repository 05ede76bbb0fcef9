//! The object accessor and the link/backlink engine.
//!
//! An [`Obj`] is a lightweight handle `{table, key}` plus a cache of the
//! row's current cluster and index, stamped with the storage version the
//! cache was resolved against. Before any access the cache is checked
//! against the allocator's storage version and lazily re-resolved through
//! the cluster tree; an object whose key stops resolving becomes
//! permanently invalid.
//!
//! Every write that changes a link value runs the full protocol: validate
//! the new target, remove the backlink for the old target (collecting
//! cascade work), add the backlink for the new target, write the origin
//! leaf, emit the replication instruction, then drain the cascade.

use std::cell::Cell;

use tracing::trace;

use ember_alloc::{Ref, SlabAlloc};
use ember_array::{
    ArrayBacklink, ArrayInt, ArrayIntNull, ArrayKey, ArrayMixed, ArrayPayload, ArrayTypedLink,
    Payload,
};
use ember_cluster::{CascadeMode, CascadeState, Cluster, NullifyEntry};
use ember_error::{EmberError, Result};
use ember_types::{
    limits, ColKey, ColumnType, Mixed, ObjKey, ObjLink, TableKey,
};

use crate::group::Group;
use crate::replication::Instruction;
use crate::value::ObjValue;

#[derive(Debug, Clone, Copy)]
struct ObjCache {
    mem: Ref,
    row: usize,
    version: u64,
    valid: bool,
}

/// Accessor for one row, live or tombstoned.
#[derive(Debug, Clone)]
pub struct Obj {
    table: TableKey,
    key: ObjKey,
    cache: Cell<ObjCache>,
}

/// Which replication instruction a write emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SetKind {
    Set,
    SetDefault,
    SetNull,
}

impl Obj {
    pub(crate) fn new(table: TableKey, key: ObjKey) -> Obj {
        Obj {
            table,
            key,
            cache: Cell::new(ObjCache {
                mem: Ref::NULL,
                row: 0,
                version: 0,
                valid: true,
            }),
        }
    }

    pub fn table_key(&self) -> TableKey {
        self.table
    }

    pub fn key(&self) -> ObjKey {
        self.key
    }

    /// This object as a link value.
    pub fn get_link(&self) -> ObjLink {
        ObjLink::new(self.table, self.key)
    }

    /// Check liveness without erroring. Once false, always false.
    pub fn is_valid(&self, g: &Group) -> bool {
        self.resolve(g).is_ok()
    }

    pub fn check_valid(&self, g: &Group) -> Result<()> {
        self.resolve(g).map(|_| ())
    }

    /// Re-resolve the row if the storage version moved. Returns the
    /// current `(cluster, row)` location.
    fn resolve(&self, g: &Group) -> Result<(Ref, usize)> {
        let mut cache = self.cache.get();
        if !cache.valid {
            return Err(EmberError::InvalidObject);
        }
        let current = g.alloc.storage_version();
        if cache.version == current && !cache.mem.is_null() {
            return Ok((cache.mem, cache.row));
        }
        let table = g.get_table(self.table).ok_or(EmberError::InvalidObject)?;
        match table.tree_for(self.key).get(&g.alloc, self.key) {
            Ok(state) => {
                trace!(key = %self.key, "accessor re-resolved");
                cache.mem = state.mem;
                cache.row = state.index;
                cache.version = current;
                self.cache.set(cache);
                Ok((state.mem, state.index))
            }
            Err(_) => {
                cache.valid = false;
                self.cache.set(cache);
                Err(EmberError::InvalidObject)
            }
        }
    }

    fn col_idx(col: ColKey) -> usize {
        usize::from(col.idx().0)
    }

    /// Column leaf ref plus this object's row index.
    pub(crate) fn col_leaf(&self, g: &Group, col: ColKey) -> Result<(Ref, usize)> {
        let (mem, row) = self.resolve(g)?;
        Ok((Cluster::column_ref(&g.alloc, mem, Self::col_idx(col)), row))
    }

    fn check_column(&self, g: &Group, col: ColKey) -> Result<()> {
        g.tbl(self.table).column_meta(col).map(|_| ())
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// The value of a non-collection column as a tagged value. Null and
    /// unresolved links both read as null.
    pub fn get_any(&self, g: &Group, col: ColKey) -> Result<Mixed> {
        self.check_column(g, col)?;
        if col.is_collection() {
            return Err(EmberError::IllegalCombination {
                detail: "collection column read through scalar accessor",
            });
        }
        let (leaf, row) = self.col_leaf(g, col)?;
        let value = match col.col_type() {
            ColumnType::Link => {
                let key = ArrayKey::get(&g.alloc, leaf, row);
                if key.is_null() || key.is_unresolved() {
                    Mixed::Null
                } else {
                    Mixed::Link(key)
                }
            }
            ColumnType::TypedLink => {
                let link = ArrayTypedLink::get(&g.alloc, leaf, row);
                if link.is_null() || link.is_unresolved() {
                    Mixed::Null
                } else {
                    Mixed::TypedLink(link)
                }
            }
            ColumnType::Mixed => {
                let value = ArrayMixed::get(&g.alloc, leaf, row);
                match value {
                    Mixed::TypedLink(l) if l.is_unresolved() => Mixed::Null,
                    other => other,
                }
            }
            ColumnType::Backlink => {
                return Err(EmberError::IllegalCombination {
                    detail: "backlink column read through scalar accessor",
                })
            }
            ct => Payload::new(ct, col.is_nullable()).get_any(&g.alloc, leaf, row),
        };
        Ok(value)
    }

    /// Typed read. Nullable columns are read as `Option<T>`; a null in a
    /// plain `T` read is an error.
    pub fn get<T: ObjValue>(&self, g: &Group, col: ColKey) -> Result<T> {
        let value = self.get_any(g, col)?;
        let actual = value.type_name();
        T::from_mixed(value).ok_or(EmberError::IllegalType {
            expected: T::TYPE_NAME,
            actual,
        })
    }

    pub fn is_null(&self, g: &Group, col: ColKey) -> Result<bool> {
        Ok(self.get_any(g, col)?.is_null())
    }

    /// True if a link column points into the tombstone tree.
    pub fn is_unresolved(&self, g: &Group, col: ColKey) -> Result<bool> {
        self.check_column(g, col)?;
        let (leaf, row) = self.col_leaf(g, col)?;
        let unresolved = match col.col_type() {
            ColumnType::Link => ArrayKey::get(&g.alloc, leaf, row).is_unresolved(),
            ColumnType::TypedLink => ArrayTypedLink::get(&g.alloc, leaf, row).is_unresolved(),
            ColumnType::Mixed => matches!(
                ArrayMixed::get(&g.alloc, leaf, row),
                Mixed::TypedLink(l) if l.is_unresolved()
            ),
            _ => {
                return Err(EmberError::IllegalType {
                    expected: "link",
                    actual: col.col_type().name(),
                })
            }
        };
        Ok(unresolved)
    }

    /// The stored link value of a single link column, unfiltered: may be
    /// null, live, or unresolved.
    pub fn get_unfiltered_link(&self, g: &Group, col: ColKey) -> Result<ObjKey> {
        self.check_column(g, col)?;
        let (leaf, row) = self.col_leaf(g, col)?;
        Ok(ArrayKey::get(&g.alloc, leaf, row))
    }

    fn raw_typed_link(&self, g: &Group, col: ColKey) -> Result<ObjLink> {
        let (leaf, row) = self.col_leaf(g, col)?;
        Ok(ArrayTypedLink::get(&g.alloc, leaf, row))
    }

    fn raw_mixed(&self, g: &Group, col: ColKey) -> Result<Mixed> {
        let (leaf, row) = self.col_leaf(g, col)?;
        Ok(ArrayMixed::get(&g.alloc, leaf, row))
    }

    /// Number of entries in a link list column.
    pub fn get_link_count(&self, g: &Group, col: ColKey) -> Result<usize> {
        self.get_linklist(col).size(g)
    }

    /// The object a single link column points at, if any.
    pub fn get_linked_object(&self, g: &Group, col: ColKey) -> Result<Option<Obj>> {
        let target_table = g.tbl(self.table).link_target(col)?;
        let key = self.get::<ObjKey>(g, col)?;
        if key.is_null() {
            return Ok(None);
        }
        Ok(Some(Obj::new(target_table, key)))
    }

    // ------------------------------------------------------------------
    // Backlinks
    // ------------------------------------------------------------------

    /// Backlink count under the hidden column paired with
    /// `(origin_table, origin_col)`.
    pub fn get_backlink_count(
        &self,
        g: &Group,
        origin_table: TableKey,
        origin_col: ColKey,
    ) -> Result<usize> {
        match g.tbl(self.table).find_backlink_column(origin_col, origin_table) {
            Some(bc) => Ok(self.get_all_backlinks(g, bc)?.len()),
            None => Ok(0),
        }
    }

    /// One backlink under the paired column.
    pub fn get_backlink(
        &self,
        g: &Group,
        origin_table: TableKey,
        origin_col: ColKey,
        n: usize,
    ) -> Result<ObjKey> {
        let bc = g
            .tbl(self.table)
            .find_backlink_column(origin_col, origin_table)
            .ok_or(EmberError::KeyNotFound)?;
        let (leaf, row) = self.col_leaf(g, bc)?;
        if n >= ArrayBacklink::backlink_count(&g.alloc, leaf, row) {
            return Err(EmberError::KeyNotFound);
        }
        Ok(ArrayBacklink::get_backlink(&g.alloc, leaf, row, n))
    }

    /// All origin keys recorded under a specific backlink column.
    pub fn get_all_backlinks(&self, g: &Group, backlink_col: ColKey) -> Result<Vec<ObjKey>> {
        let (leaf, row) = self.col_leaf(g, backlink_col)?;
        Ok(ArrayBacklink::get_all(&g.alloc, leaf, row))
    }

    /// Total backlink count across every backlink column.
    pub fn get_total_backlink_count(&self, g: &Group) -> Result<usize> {
        let cols: Vec<ColKey> = g
            .tbl(self.table)
            .backlink_columns()
            .map(|c| c.key)
            .collect();
        let mut count = 0;
        for bc in cols {
            let (leaf, row) = self.col_leaf(g, bc)?;
            count += ArrayBacklink::backlink_count(&g.alloc, leaf, row);
        }
        Ok(count)
    }

    /// Does any backlink exist? With `only_strong`, only links that own
    /// this object count, which for a non-embedded table is never.
    pub fn has_backlinks(&self, g: &Group, only_strong: bool) -> Result<bool> {
        if only_strong && !g.tbl(self.table).is_embedded() {
            return Ok(false);
        }
        Ok(self.get_total_backlink_count(g)? > 0)
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Write a value. Dispatches per column type; link-bearing values run
    /// the full backlink protocol.
    pub fn set_any(
        &self,
        g: &mut Group,
        col: ColKey,
        value: Mixed,
        is_default: bool,
    ) -> Result<()> {
        let kind = if is_default {
            SetKind::SetDefault
        } else {
            SetKind::Set
        };
        self.do_set(g, col, value, kind)
    }

    /// Typed write.
    pub fn set<T: ObjValue>(&self, g: &mut Group, col: ColKey, value: T) -> Result<()> {
        self.set_any(g, col, value.to_mixed(), false)
    }

    /// Null a nullable column. For a link column this is equivalent to
    /// setting the null key.
    pub fn set_null(&self, g: &mut Group, col: ColKey) -> Result<()> {
        self.do_set(g, col, Mixed::Null, SetKind::SetNull)
    }

    fn do_set(&self, g: &mut Group, col: ColKey, value: Mixed, kind: SetKind) -> Result<()> {
        self.check_column(g, col)?;
        if col.is_collection() {
            return Err(EmberError::IllegalCombination {
                detail: "collection column written through scalar accessor",
            });
        }
        if col.attrs().is_primary_key() {
            return Err(EmberError::IllegalCombination {
                detail: "primary key values are immutable",
            });
        }
        match col.col_type() {
            ColumnType::Link => self.set_link(g, col, value, kind),
            ColumnType::TypedLink => self.set_typed_link(g, col, value, kind),
            ColumnType::Mixed => self.set_mixed(g, col, value, kind),
            ColumnType::Backlink => Err(EmberError::IllegalCombination {
                detail: "backlink columns are maintained internally",
            }),
            _ => self.set_plain(g, col, value, kind),
        }
    }

    fn set_plain(&self, g: &mut Group, col: ColKey, value: Mixed, kind: SetKind) -> Result<()> {
        if value.is_null() && !col.is_nullable() {
            return Err(EmberError::ColumnNotNullable);
        }
        check_size_limits(&value)?;
        self.resolve(g)?;
        let payload = Payload::new(col.col_type(), col.is_nullable());
        with_writable_col(g, self.table, self.key, Self::col_idx(col), |alloc, r, row| {
            payload.set_any(alloc, r, row, &value)
        })?;
        self.emit_set(g, col, value, kind);
        Ok(())
    }

    fn set_link(&self, g: &mut Group, col: ColKey, value: Mixed, kind: SetKind) -> Result<()> {
        let target_key = match &value {
            Mixed::Null => ObjKey::NULL,
            Mixed::Link(k) => *k,
            other => {
                return Err(EmberError::IllegalType {
                    expected: "link",
                    actual: other.type_name(),
                })
            }
        };
        let target_table = g.tbl(self.table).link_target(col)?;
        if !target_key.is_null() {
            let table = g.tbl(target_table);
            if !table.is_valid(&g.alloc, target_key) {
                return Err(EmberError::TargetOutOfRange);
            }
            if table.is_embedded() {
                return Err(EmberError::WrongKindOfTable {
                    detail: "direct link to embedded target",
                });
            }
        }
        let old_key = self.get_unfiltered_link(g, col)?;
        if old_key == target_key {
            return Ok(());
        }
        let mut state = CascadeState::new(CascadeMode::Strong);
        let recurse = replace_backlink(
            g,
            self.table,
            self.key,
            col,
            ObjLink::new(target_table, old_key),
            ObjLink::new(target_table, target_key),
            &mut state,
        )?;
        with_writable_col(g, self.table, self.key, Self::col_idx(col), |alloc, r, row| {
            ArrayKey::set(alloc, r, row, target_key)
        })?;
        self.emit_set(g, col, value, kind);
        if recurse {
            remove_recursive(g, &mut state)?;
        }
        Ok(())
    }

    fn set_typed_link(
        &self,
        g: &mut Group,
        col: ColKey,
        value: Mixed,
        kind: SetKind,
    ) -> Result<()> {
        let target_link = match &value {
            Mixed::Null => ObjLink::NULL,
            Mixed::TypedLink(l) => *l,
            other => {
                return Err(EmberError::IllegalType {
                    expected: "typedlink",
                    actual: other.type_name(),
                })
            }
        };
        check_typed_target(g, target_link)?;
        let old_link = self.raw_typed_link(g, col)?;
        if old_link == target_link {
            return Ok(());
        }
        let mode = if old_link.is_unresolved() {
            CascadeMode::All
        } else {
            CascadeMode::Strong
        };
        let mut state = CascadeState::new(mode);
        let recurse = replace_backlink(
            g,
            self.table,
            self.key,
            col,
            old_link,
            target_link,
            &mut state,
        )?;
        with_writable_col(g, self.table, self.key, Self::col_idx(col), |alloc, r, row| {
            ArrayTypedLink::set(alloc, r, row, target_link)
        })?;
        self.emit_set(g, col, value, kind);
        if recurse {
            remove_recursive(g, &mut state)?;
        }
        Ok(())
    }

    fn set_mixed(&self, g: &mut Group, col: ColKey, value: Mixed, kind: SetKind) -> Result<()> {
        if value.is_null() && !col.is_nullable() {
            return Err(EmberError::ColumnNotNullable);
        }
        check_size_limits(&value)?;
        let new_link = match &value {
            Mixed::TypedLink(l) => {
                check_typed_target(g, *l)?;
                *l
            }
            _ => ObjLink::NULL,
        };
        let old_value = self.raw_mixed(g, col)?;
        let old_link = match &old_value {
            Mixed::TypedLink(l) => *l,
            _ => ObjLink::NULL,
        };
        if old_value == value && old_link == new_link {
            return Ok(());
        }
        let mut state = CascadeState::new(CascadeMode::Strong);
        let recurse = replace_backlink(
            g,
            self.table,
            self.key,
            col,
            old_link,
            new_link,
            &mut state,
        )?;
        with_writable_col(g, self.table, self.key, Self::col_idx(col), |alloc, r, row| {
            ArrayMixed::set(alloc, r, row, &value)
        })?;
        self.emit_set(g, col, value, kind);
        if recurse {
            remove_recursive(g, &mut state)?;
        }
        Ok(())
    }

    fn emit_set(&self, g: &mut Group, col: ColKey, value: Mixed, kind: SetKind) {
        let instr = match kind {
            SetKind::Set => Instruction::Set {
                table: self.table,
                col,
                obj: self.key,
                value,
            },
            SetKind::SetDefault => Instruction::SetDefault {
                table: self.table,
                col,
                obj: self.key,
                value,
            },
            SetKind::SetNull => Instruction::SetNull {
                table: self.table,
                col,
                obj: self.key,
            },
        };
        g.emit(instr);
    }

    /// Wrap-around addition on the stored bit pattern. Adding to a null
    /// value is an error, kept from the original semantics.
    pub fn add_int(&self, g: &mut Group, col: ColKey, delta: i64) -> Result<()> {
        self.check_column(g, col)?;
        if col.col_type() != ColumnType::Int || col.is_collection() {
            return Err(EmberError::IllegalType {
                expected: "int",
                actual: col.col_type().name(),
            });
        }
        self.resolve(g)?;
        let nullable = col.is_nullable();
        with_writable_col(g, self.table, self.key, Self::col_idx(col), |alloc, r, row| {
            if nullable {
                let old = ArrayIntNull::get(alloc, r, row).ok_or(
                    EmberError::IllegalCombination {
                        detail: "add_int on null value",
                    },
                )?;
                ArrayIntNull::set(alloc, r, row, Some(add_wrap(old, delta)))
            } else {
                let old = ArrayInt::get(alloc, r, row);
                ArrayInt::set(alloc, r, row, add_wrap(old, delta))
            }
        })?;
        g.emit(Instruction::AddInt {
            table: self.table,
            col,
            obj: self.key,
            value: delta,
        });
        Ok(())
    }

    /// Create a fresh object in the link column's target table and link
    /// it. For an embedded target, a previously linked child is removed
    /// (it was owned); for a non-embedded target an existing link is an
    /// error, since the old object would be left dangling.
    pub fn create_and_set_linked_object(&self, g: &mut Group, col: ColKey) -> Result<Obj> {
        self.check_column(g, col)?;
        if col.col_type() != ColumnType::Link || col.is_collection() {
            return Err(EmberError::IllegalType {
                expected: "link",
                actual: col.col_type().name(),
            });
        }
        let target_table = g.tbl(self.table).link_target(col)?;
        let embedded = g.tbl(target_table).is_embedded();
        let old_key = self.get_unfiltered_link(g, col)?;
        if !embedded && !old_key.is_null() {
            return Err(EmberError::WrongKindOfTable {
                detail: "column already links a non-embedded object",
            });
        }
        let new_key = g.tbl_mut(target_table).allocate_key();
        let new_obj = g.create_object_with_key_inner(target_table, new_key)?;

        let mut state = CascadeState::new(CascadeMode::Strong);
        let recurse = replace_backlink(
            g,
            self.table,
            self.key,
            col,
            ObjLink::new(target_table, old_key),
            ObjLink::new(target_table, new_key),
            &mut state,
        )?;
        with_writable_col(g, self.table, self.key, Self::col_idx(col), |alloc, r, row| {
            ArrayKey::set(alloc, r, row, new_key)
        })?;
        self.emit_set(g, col, Mixed::Link(new_key), SetKind::Set);
        if recurse {
            remove_recursive(g, &mut state)?;
        }
        Ok(new_obj)
    }

    /// Delete this object, cascading into owned targets.
    pub fn remove(&self, g: &mut Group) -> Result<()> {
        self.check_valid(g)?;
        g.remove_object(self.table, self.key)
    }

    /// Turn this object into a tombstone if links to it exist, delete it
    /// outright otherwise.
    pub fn invalidate(&self, g: &mut Group) -> Result<()> {
        self.check_valid(g)?;
        g.invalidate_object(self.table, self.key)
    }

    /// Internal primary-key write used at creation and resurrection; the
    /// public set path rejects pk columns.
    pub(crate) fn set_pk_internal(&self, g: &mut Group, col: ColKey, pk: &Mixed) -> Result<()> {
        self.resolve(g)?;
        let payload = Payload::new(col.col_type(), col.is_nullable());
        with_writable_col(g, self.table, self.key, Self::col_idx(col), |alloc, r, row| {
            payload.set_any(alloc, r, row, pk)
        })?;
        self.emit_set(g, col, pk.clone(), SetKind::Set);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Bulk operations
    // ------------------------------------------------------------------

    /// Deep-copy every public column value (list and dictionary contents
    /// included) from another row of the same table.
    pub fn assign(&self, g: &mut Group, other: &Obj) -> Result<()> {
        debug_assert_eq!(self.table, other.table);
        let cols = g.tbl(self.table).column_keys();
        for col in cols {
            if col.is_dictionary() {
                let src = other.get_dictionary(col);
                let dst = self.get_dictionary(col);
                for (k, v) in src.entries(g)? {
                    dst.insert(g, k, v)?;
                }
            } else if col.is_list() {
                let src = other.get_list_any(col);
                let dst = self.get_list_any(col);
                dst.clear(g)?;
                for i in 0..src.size(g)? {
                    let v = src.get(g, i)?;
                    dst.insert(g, i, v)?;
                }
            } else if col.attrs().is_primary_key() {
                continue;
            } else {
                let value = other.get_any(g, col)?;
                match value {
                    Mixed::Null if !col.is_nullable() => continue,
                    Mixed::Null => self.set_null(g, col)?,
                    value => self.set_any(g, col, value, false)?,
                }
            }
        }
        Ok(())
    }

    /// Take over another row's identity: copy its primary key and rewrite
    /// every incoming link that pointed at `other` to point here. Used
    /// when a tombstone is promoted back to a live object.
    pub fn assign_pk_and_backlinks(&self, g: &mut Group, other: &Obj) -> Result<()> {
        debug_assert_eq!(self.table, other.table);
        let backlink_cols: Vec<(ColKey, TableKey, ColKey)> = g
            .tbl(self.table)
            .backlink_columns()
            .map(|c| {
                (
                    c.key,
                    c.target_table.expect("backlink column has origin table"),
                    c.origin_col.expect("backlink column has origin column"),
                )
            })
            .collect();
        for (bc, origin_table, origin_col) in backlink_cols {
            let origins = other.get_all_backlinks(g, bc)?;
            for origin_key in origins {
                let origin = Obj::new(origin_table, origin_key);
                if origin_col.is_dictionary() {
                    let dict = origin.get_dictionary(origin_col);
                    for (k, v) in dict.entries_unfiltered(g)? {
                        if v == Mixed::TypedLink(other.get_link()) {
                            dict.insert(g, k, Mixed::TypedLink(self.get_link()))?;
                        }
                    }
                } else if origin_col.is_list() {
                    let list = origin.get_list_any(origin_col);
                    let size = list.size(g)?;
                    for i in 0..size {
                        let elem = list.get_unfiltered(g, i)?;
                        if link_targets_key(&elem, other.key) {
                            list.set(g, i, relink(&elem, self.get_link()))?;
                        }
                    }
                } else {
                    match origin_col.col_type() {
                        ColumnType::Link => {
                            let current = origin.get_unfiltered_link(g, origin_col)?;
                            debug_assert_eq!(current, other.key);
                            origin.set_any(g, origin_col, Mixed::Link(self.key), false)?;
                        }
                        ColumnType::TypedLink => {
                            origin.set_any(
                                g,
                                origin_col,
                                Mixed::TypedLink(self.get_link()),
                                false,
                            )?;
                        }
                        ColumnType::Mixed => {
                            origin.set_any(
                                g,
                                origin_col,
                                Mixed::TypedLink(self.get_link()),
                                false,
                            )?;
                        }
                        _ => {}
                    }
                }
            }
        }
        Ok(())
    }

    /// Positional bulk set across the public non-collection columns, in
    /// declaration order.
    pub fn set_all(&self, g: &mut Group, values: &[Mixed]) -> Result<()> {
        let cols: Vec<ColKey> = g
            .tbl(self.table)
            .column_keys()
            .into_iter()
            .filter(|c| !c.is_collection())
            .collect();
        for (col, value) in cols.into_iter().zip(values.iter()) {
            self.set_any(g, col, value.clone(), false)?;
        }
        Ok(())
    }

    /// Column-wise equality over public, non-collection columns.
    pub fn eq_values(&self, g: &Group, other: &Obj) -> Result<bool> {
        let cols = g.tbl(self.table).column_keys();
        for col in cols {
            if col.is_collection() {
                continue;
            }
            if self.get_any(g, col)? != other.get_any(g, col)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

fn add_wrap(a: i64, b: i64) -> i64 {
    (a as u64).wrapping_add(b as u64) as i64
}

fn check_size_limits(value: &Mixed) -> Result<()> {
    match value {
        Mixed::String(s) if s.len() > limits::MAX_STRING_SIZE => Err(EmberError::StringTooBig {
            size: s.len(),
            limit: limits::MAX_STRING_SIZE,
        }),
        Mixed::Binary(b) if b.len() > limits::MAX_BINARY_SIZE => Err(EmberError::BinaryTooBig {
            size: b.len(),
            limit: limits::MAX_BINARY_SIZE,
        }),
        _ => Ok(()),
    }
}

/// Element-level link validation shared by lists and dictionaries: the
/// target must exist and must not be embedded.
pub(crate) fn check_link_value(
    g: &Group,
    origin_table: TableKey,
    col: ColKey,
    value: &Mixed,
) -> Result<()> {
    match value {
        Mixed::Link(k) if !k.is_null() => {
            let target = g.tbl(origin_table).link_target(col)?;
            let table = g.tbl(target);
            if !table.is_valid(&g.alloc, *k) {
                return Err(EmberError::TargetOutOfRange);
            }
            if table.is_embedded() {
                return Err(EmberError::WrongKindOfTable {
                    detail: "direct link to embedded target",
                });
            }
            Ok(())
        }
        Mixed::TypedLink(l) => check_typed_target(g, *l),
        _ => Ok(()),
    }
}

fn check_typed_target(g: &Group, link: ObjLink) -> Result<()> {
    if link.is_null() {
        return Ok(());
    }
    g.validate(link)?;
    if g.tbl(link.table_key()).is_embedded() {
        return Err(EmberError::WrongKindOfTable {
            detail: "direct link to embedded target",
        });
    }
    Ok(())
}

fn link_targets_key(value: &Mixed, key: ObjKey) -> bool {
    match value {
        Mixed::Link(k) => *k == key,
        Mixed::TypedLink(l) => l.obj_key() == key,
        _ => false,
    }
}

fn relink(value: &Mixed, to: ObjLink) -> Mixed {
    match value {
        Mixed::Link(_) => Mixed::Link(to.obj_key()),
        Mixed::TypedLink(_) => Mixed::TypedLink(to),
        other => other.clone(),
    }
}

// ----------------------------------------------------------------------
// Write plumbing
// ----------------------------------------------------------------------

/// COW-promote the path to a row and run `f` against one of its column
/// leaves, storing the leaf's new ref back into the cluster. The one
/// funnel every field write goes through.
pub(crate) fn with_writable_col(
    g: &mut Group,
    table: TableKey,
    key: ObjKey,
    col_idx: usize,
    f: impl FnOnce(&mut SlabAlloc, Ref, usize) -> Result<Ref>,
) -> Result<()> {
    let Group { alloc, tables, .. } = g;
    let t = &mut tables[table.value() as usize];
    let leaf = t.tree_for_mut(key).ensure_writeable(alloc, key)?;
    let row = t.tree_for(key).get(alloc, key)?.index;
    let col_ref = Cluster::column_ref(alloc, leaf, col_idx);
    let new_ref = f(alloc, col_ref, row)?;
    Cluster::set_column_ref(alloc, leaf, col_idx, new_ref)?;
    alloc.bump_content_version();
    Ok(())
}

// ----------------------------------------------------------------------
// Backlink engine
// ----------------------------------------------------------------------

/// Add the paired backlink entry for a newly written link.
pub(crate) fn set_backlink(
    g: &mut Group,
    origin_table: TableKey,
    origin_key: ObjKey,
    origin_col: ColKey,
    new_link: ObjLink,
) -> Result<()> {
    if new_link.is_null() {
        return Ok(());
    }
    let bc = g.backlink_column_for(new_link.table_key(), origin_col, origin_table)?;
    with_writable_col(
        g,
        new_link.table_key(),
        new_link.obj_key(),
        usize::from(bc.idx().0),
        |alloc, r, row| ArrayBacklink::add(alloc, r, row, origin_key),
    )
}

/// Remove the paired backlink entry for a link being overwritten or
/// severed. Tombstone targets whose last backlink goes away are erased on
/// the spot; live targets are offered to the cascade state. Returns true
/// when the state picked up work.
pub(crate) fn remove_backlink(
    g: &mut Group,
    origin_table: TableKey,
    origin_key: ObjKey,
    origin_col: ColKey,
    old_link: ObjLink,
    state: &mut CascadeState,
) -> Result<bool> {
    if old_link.is_null() {
        return Ok(false);
    }
    let target_table = old_link.table_key();
    let bc = g.backlink_column_for(target_table, origin_col, origin_table)?;
    let strong = g.tbl(target_table).is_embedded() || origin_col.attrs().has_strong_links();

    let mut last_removed = false;
    with_writable_col(
        g,
        target_table,
        old_link.obj_key(),
        usize::from(bc.idx().0),
        |alloc, r, row| {
            let (r, last) = ArrayBacklink::remove(alloc, r, row, origin_key)?;
            last_removed = last;
            Ok(r)
        },
    )?;

    let target = Obj::new(target_table, old_link.obj_key());
    if old_link.is_unresolved() {
        if last_removed && !target.has_backlinks(g, false)? {
            // Tombstones die with their last backlink, no cascade needed.
            let Group { alloc, tables, .. } = g;
            tables[target_table.value() as usize]
                .tombstones
                .erase(alloc, old_link.obj_key())?;
            alloc.bump_content_version();
            trace!(target = %old_link, "tombstone reaped");
        }
        return Ok(false);
    }
    let orphaned = last_removed && !target.has_backlinks(g, false)?;
    Ok(state.enqueue_for_cascade(old_link, strong, orphaned))
}

/// Swap one link value's backlink bookkeeping: remove for the old target,
/// add for the new.
pub(crate) fn replace_backlink(
    g: &mut Group,
    origin_table: TableKey,
    origin_key: ObjKey,
    origin_col: ColKey,
    old_link: ObjLink,
    new_link: ObjLink,
    state: &mut CascadeState,
) -> Result<bool> {
    let recurse = remove_backlink(g, origin_table, origin_key, origin_col, old_link, state)?;
    set_backlink(g, origin_table, origin_key, origin_col, new_link)?;
    Ok(recurse)
}

/// Drain the cascade queues: sever link slots whose targets are dying,
/// then delete enqueued objects, which may enqueue further work. Each
/// deletion strictly shrinks the live+tombstone population, so the loop
/// terminates.
pub(crate) fn remove_recursive(g: &mut Group, state: &mut CascadeState) -> Result<()> {
    while state.has_work() {
        let nullifications = std::mem::take(&mut state.to_nullify);
        for entry in nullifications {
            nullify_link(g, entry)?;
        }
        let deletions = std::mem::take(&mut state.to_delete);
        for link in deletions {
            let still_there = g
                .get_table(link.table_key())
                .is_some_and(|t| t.is_valid(&g.alloc, link.obj_key()));
            if still_there {
                remove_object_with_state(g, link.table_key(), link.obj_key(), state)?;
            }
        }
    }
    Ok(())
}

/// Sever one link slot whose target is being deleted. Bypasses the
/// normal backlink protocol: the target's row (and its backlink sets) is
/// already gone or going.
fn nullify_link(g: &mut Group, entry: NullifyEntry) -> Result<()> {
    let origin = Obj::new(entry.origin.table_key(), entry.origin.obj_key());
    if !origin.is_valid(g) {
        // The origin itself was cascaded away first.
        return Ok(());
    }
    let col = entry.origin_col;
    let origin_table = entry.origin.table_key();
    let origin_key = entry.origin.obj_key();

    if col.is_dictionary() {
        let dict = origin.get_dictionary(col);
        let target_value = Mixed::TypedLink(entry.target);
        for (k, v) in dict.entries_unfiltered(g)? {
            if v == target_value {
                dict.nullify(g, &k)?;
                g.emit(Instruction::DictInsert {
                    table: origin_table,
                    col,
                    obj: origin_key,
                    key: k,
                    value: Mixed::Null,
                });
            }
        }
        return Ok(());
    }
    if col.is_list() {
        let list = origin.get_list_any(col);
        let index = list
            .find_link_target(g, entry.target)?
            .ok_or_else(|| EmberError::corrupt("nullified link missing from list"))?;
        list.erase_raw(g, index)?;
        g.emit(Instruction::LinkListNullify {
            table: origin_table,
            col,
            obj: origin_key,
            index,
        });
        return Ok(());
    }
    match col.col_type() {
        ColumnType::Link => {
            with_writable_col(g, origin_table, origin_key, usize::from(col.idx().0), {
                let target = entry.target.obj_key();
                move |alloc, r, row| {
                    debug_assert_eq!(ArrayKey::get(alloc, r, row), target);
                    ArrayKey::set(alloc, r, row, ObjKey::NULL)
                }
            })?;
        }
        ColumnType::TypedLink => {
            with_writable_col(
                g,
                origin_table,
                origin_key,
                usize::from(col.idx().0),
                |alloc, r, row| ArrayTypedLink::set(alloc, r, row, ObjLink::NULL),
            )?;
        }
        ColumnType::Mixed => {
            with_writable_col(
                g,
                origin_table,
                origin_key,
                usize::from(col.idx().0),
                |alloc, r, row| ArrayMixed::set(alloc, r, row, &Mixed::Null),
            )?;
        }
        _ => return Err(EmberError::corrupt("nullify on non-link column")),
    }
    g.emit(Instruction::SetNull {
        table: origin_table,
        col,
        obj: origin_key,
    });
    Ok(())
}

/// Remove every backlink this object's outgoing links established.
fn remove_outgoing_links(
    g: &mut Group,
    obj: &Obj,
    state: &mut CascadeState,
) -> Result<()> {
    let cols = g.tbl(obj.table).column_keys();
    for col in cols {
        if col.is_dictionary() {
            let dict = obj.get_dictionary(col);
            for (_, v) in dict.entries_unfiltered(g)? {
                if let Mixed::TypedLink(link) = v {
                    remove_backlink(g, obj.table, obj.key, col, link, state)?;
                }
            }
        } else if col.is_list() {
            let list = obj.get_list_any(col);
            let size = list.size(g)?;
            for i in 0..size {
                let elem = list.get_unfiltered(g, i)?;
                if let Some(link) = elem_as_link(g, obj.table, col, &elem)? {
                    remove_backlink(g, obj.table, obj.key, col, link, state)?;
                }
            }
        } else {
            match col.col_type() {
                ColumnType::Link => {
                    let target_table = g.tbl(obj.table).link_target(col)?;
                    let key = obj.get_unfiltered_link(g, col)?;
                    remove_backlink(
                        g,
                        obj.table,
                        obj.key,
                        col,
                        ObjLink::new(target_table, key),
                        state,
                    )?;
                }
                ColumnType::TypedLink => {
                    let link = obj.raw_typed_link(g, col)?;
                    remove_backlink(g, obj.table, obj.key, col, link, state)?;
                }
                ColumnType::Mixed => {
                    if let Mixed::TypedLink(link) = obj.raw_mixed(g, col)? {
                        remove_backlink(g, obj.table, obj.key, col, link, state)?;
                    }
                }
                _ => {}
            }
        }
    }
    Ok(())
}

pub(crate) fn elem_as_link(
    g: &Group,
    origin_table: TableKey,
    col: ColKey,
    elem: &Mixed,
) -> Result<Option<ObjLink>> {
    Ok(match elem {
        Mixed::Link(k) if !k.is_null() => {
            let target = g.tbl(origin_table).link_target(col)?;
            Some(ObjLink::new(target, *k))
        }
        Mixed::TypedLink(l) if !l.is_null() => Some(*l),
        _ => None,
    })
}

/// Queue nullification of every incoming link before this object's row
/// disappears.
fn enqueue_incoming_nullifications(
    g: &mut Group,
    obj: &Obj,
    state: &mut CascadeState,
) -> Result<()> {
    let backlink_cols: Vec<(ColKey, TableKey, ColKey)> = g
        .tbl(obj.table)
        .backlink_columns()
        .map(|c| {
            (
                c.key,
                c.target_table.expect("backlink column has origin table"),
                c.origin_col.expect("backlink column has origin column"),
            )
        })
        .collect();
    for (bc, origin_table, origin_col) in backlink_cols {
        for origin_key in obj.get_all_backlinks(g, bc)? {
            state.enqueue_for_nullify(
                ObjLink::new(origin_table, origin_key),
                origin_col,
                obj.get_link(),
            );
        }
    }
    Ok(())
}

/// The removal protocol body: detach outgoing links, queue incoming
/// nullifications, erase the row, report to replication.
pub(crate) fn remove_object_with_state(
    g: &mut Group,
    table: TableKey,
    key: ObjKey,
    state: &mut CascadeState,
) -> Result<()> {
    let obj = Obj::new(table, key);
    if !key.is_unresolved() {
        remove_outgoing_links(g, &obj, state)?;
    }
    enqueue_incoming_nullifications(g, &obj, state)?;
    {
        let Group { alloc, tables, .. } = g;
        tables[table.value() as usize]
            .tree_for_mut(key)
            .erase(alloc, key)?;
        alloc.bump_content_version();
    }
    if !key.is_unresolved() {
        g.emit(Instruction::RemoveObject { table, obj: key });
    }
    Ok(())
}

impl Group {
    /// Delete an object, driving cascades.
    pub fn remove_object(&mut self, table: TableKey, key: ObjKey) -> Result<()> {
        let mut state = CascadeState::new(CascadeMode::Strong);
        remove_object_with_state(self, table, key, &mut state)?;
        remove_recursive(self, &mut state)
    }

    /// Move an object to the tombstone tree if backlinks exist, keeping
    /// its key identity in bit-flipped unresolved form; delete it
    /// outright otherwise.
    pub fn invalidate_object(&mut self, table: TableKey, key: ObjKey) -> Result<()> {
        let obj = Obj::new(table, key);
        obj.check_valid(self)?;
        if !obj.has_backlinks(self, false)? {
            return self.remove_object(table, key);
        }
        let tombstone_key = key.unresolved_twin();

        // Capture incoming link sets before the live row is disturbed.
        let backlink_cols: Vec<(ColKey, TableKey, ColKey)> = self
            .tbl(table)
            .backlink_columns()
            .map(|c| {
                (
                    c.key,
                    c.target_table.expect("backlink column has origin table"),
                    c.origin_col.expect("backlink column has origin column"),
                )
            })
            .collect();
        let mut captured: Vec<(ColKey, Vec<ObjKey>)> = Vec::new();
        for (bc, _, _) in &backlink_cols {
            captured.push((*bc, obj.get_all_backlinks(self, *bc)?));
        }

        // Materialise the tombstone row and move the backlink sets over.
        {
            let Group { alloc, tables, .. } = self;
            tables[table.value() as usize]
                .tombstones
                .insert(alloc, tombstone_key, &[])?;
        }
        for (bc, origins) in &captured {
            let idx = usize::from(bc.idx().0);
            let origins = origins.clone();
            with_writable_col(self, table, tombstone_key, idx, move |alloc, r, row| {
                ArrayBacklink::write_all(alloc, r, row, &origins)
            })?;
        }

        // Retarget every incoming link slot at the unresolved twin.
        for ((_, origin_table, origin_col), (_, origins)) in
            backlink_cols.iter().zip(&captured)
        {
            for origin_key in origins {
                retarget_link(
                    self,
                    *origin_table,
                    *origin_key,
                    *origin_col,
                    key,
                    tombstone_key,
                )?;
            }
        }

        // Outgoing links are dropped like in a plain removal; owned
        // children cascade.
        let mut state = CascadeState::new(CascadeMode::Strong);
        remove_outgoing_links(self, &obj, &mut state)?;
        {
            let Group { alloc, tables, .. } = self;
            tables[table.value() as usize].clusters.erase(alloc, key)?;
            alloc.bump_content_version();
        }
        self.emit(Instruction::RemoveObject { table, obj: key });
        remove_recursive(self, &mut state)
    }
}

/// Rewrite one origin's stored link value from `from` to `to` without
/// touching backlinks (the set was moved wholesale) or replication (the
/// logical link did not change, only its resolution state).
fn retarget_link(
    g: &mut Group,
    origin_table: TableKey,
    origin_key: ObjKey,
    col: ColKey,
    from: ObjKey,
    to: ObjKey,
) -> Result<()> {
    let origin = Obj::new(origin_table, origin_key);
    if col.is_dictionary() {
        let dict = origin.get_dictionary(col);
        for (k, v) in dict.entries_unfiltered(g)? {
            if link_targets_key(&v, from) {
                let new_value = retargeted(&v, to);
                dict.insert_raw(g, &k, &new_value)?;
            }
        }
        return Ok(());
    }
    if col.is_list() {
        let list = origin.get_list_any(col);
        let size = list.size(g)?;
        for i in 0..size {
            let elem = list.get_unfiltered(g, i)?;
            if link_targets_key(&elem, from) {
                list.set_raw(g, i, &retargeted(&elem, to))?;
            }
        }
        return Ok(());
    }
    match col.col_type() {
        ColumnType::Link => {
            with_writable_col(
                g,
                origin_table,
                origin_key,
                usize::from(col.idx().0),
                move |alloc, r, row| ArrayKey::set(alloc, r, row, to),
            )?;
        }
        ColumnType::TypedLink => {
            let current = origin.raw_typed_link(g, col)?;
            with_writable_col(
                g,
                origin_table,
                origin_key,
                usize::from(col.idx().0),
                move |alloc, r, row| {
                    ArrayTypedLink::set(alloc, r, row, ObjLink::new(current.table_key(), to))
                },
            )?;
        }
        ColumnType::Mixed => {
            let current = origin.raw_mixed(g, col)?;
            let new_value = retargeted(&current, to);
            with_writable_col(
                g,
                origin_table,
                origin_key,
                usize::from(col.idx().0),
                move |alloc, r, row| ArrayMixed::set(alloc, r, row, &new_value),
            )?;
        }
        _ => return Err(EmberError::corrupt("retarget on non-link column")),
    }
    Ok(())
}

fn retargeted(value: &Mixed, to: ObjKey) -> Mixed {
    match value {
        Mixed::Link(_) => Mixed::Link(to),
        Mixed::TypedLink(l) => Mixed::TypedLink(ObjLink::new(l.table_key(), to)),
        other => other.clone(),
    }
}
