//! Lists: ordered collections backed by a typed leaf per row.
//!
//! A list column's cluster leaf holds one ref per row, pointing at the
//! list's element leaf (zero until first write). [`AnyList`] is the
//! untyped engine; [`Lst`] is the typed veneer and [`LnkLst`] the link
//! list with backlink maintenance and a tombstone-filtered public view.

use std::marker::PhantomData;

use ember_array::{Array, ArrayPayload, Payload};
use ember_cluster::{CascadeMode, CascadeState};
use ember_error::{EmberError, Result};
use ember_types::{ColKey, ColumnType, Mixed, ObjKey, ObjLink};

use crate::group::Group;
use crate::obj::{
    check_link_value, elem_as_link, remove_backlink, remove_recursive, replace_backlink,
    set_backlink, with_writable_col, Obj,
};
use crate::replication::Instruction;
use crate::value::ObjValue;

impl Obj {
    /// Untyped handle to a list column.
    pub fn get_list_any(&self, col: ColKey) -> AnyList {
        AnyList {
            obj: self.clone(),
            col,
        }
    }

    /// Typed handle to a list column.
    pub fn get_list<T: ObjValue>(&self, col: ColKey) -> Lst<T> {
        Lst {
            inner: self.get_list_any(col),
            _marker: PhantomData,
        }
    }

    /// Link list handle.
    pub fn get_linklist(&self, col: ColKey) -> LnkLst {
        LnkLst {
            inner: self.get_list_any(col),
        }
    }

    /// Bulk-write a whole list column.
    pub fn set_list_values<T: ObjValue>(
        &self,
        g: &mut Group,
        col: ColKey,
        values: Vec<T>,
    ) -> Result<()> {
        let list = self.get_list::<T>(col);
        list.clear(g)?;
        for (i, v) in values.into_iter().enumerate() {
            list.insert(g, i, v)?;
        }
        Ok(())
    }

    /// Bulk-read a whole list column.
    pub fn get_list_values<T: ObjValue>(&self, g: &Group, col: ColKey) -> Result<Vec<T>> {
        let list = self.get_list::<T>(col);
        let mut out = Vec::with_capacity(list.size(g)?);
        for i in 0..list.size(g)? {
            out.push(list.get(g, i)?);
        }
        Ok(out)
    }
}

/// The untyped list engine.
#[derive(Debug, Clone)]
pub struct AnyList {
    obj: Obj,
    col: ColKey,
}

impl AnyList {
    fn payload(&self) -> Payload {
        Payload::new(self.col.col_type(), self.col.is_nullable())
    }

    fn col_idx(&self) -> usize {
        usize::from(self.col.idx().0)
    }

    fn is_link_elem(&self) -> bool {
        self.col.col_type().is_link_type()
    }

    pub fn owner(&self) -> &Obj {
        &self.obj
    }

    pub fn col_key(&self) -> ColKey {
        self.col
    }

    pub fn size(&self, g: &Group) -> Result<usize> {
        let root = self.root(g)?;
        if root == 0 {
            return Ok(0);
        }
        Ok(self
            .payload()
            .len(&g.alloc, ember_alloc::Ref::from_raw(root)))
    }

    fn root(&self, g: &Group) -> Result<i64> {
        let (col_leaf, row) = self.obj.col_leaf(g, self.col)?;
        Ok(Array::get(&g.alloc, col_leaf, row))
    }

    /// Element value; unresolved link elements read as null.
    pub fn get(&self, g: &Group, index: usize) -> Result<Mixed> {
        let value = self.get_unfiltered(g, index)?;
        Ok(match value {
            Mixed::Link(k) if k.is_unresolved() => Mixed::Null,
            Mixed::TypedLink(l) if l.is_unresolved() => Mixed::Null,
            other => other,
        })
    }

    /// Element value exactly as stored.
    pub(crate) fn get_unfiltered(&self, g: &Group, index: usize) -> Result<Mixed> {
        let root = self.root(g)?;
        if root == 0 {
            return Err(EmberError::KeyNotFound);
        }
        let root = ember_alloc::Ref::from_raw(root);
        if index >= self.payload().len(&g.alloc, root) {
            return Err(EmberError::KeyNotFound);
        }
        Ok(self.payload().get_any(&g.alloc, root, index))
    }

    fn check_element(&self, g: &Group, value: &Mixed) -> Result<()> {
        if value.is_null() {
            let nullable = self.col.is_nullable() || self.is_link_elem();
            if !nullable {
                return Err(EmberError::ColumnNotNullable);
            }
            return Ok(());
        }
        let ct = self.col.col_type();
        if ct != ColumnType::Mixed
            && !(ct == ColumnType::Link && value.as_obj_key().is_some())
            && !(ct == ColumnType::TypedLink && value.as_obj_link().is_some())
            && value.value_type() != Some(ct)
        {
            return Err(EmberError::IllegalType {
                expected: ct.name(),
                actual: value.type_name(),
            });
        }
        check_link_value(g, self.obj.table_key(), self.col, value)
    }

    /// Overwrite an element, running the backlink protocol for link
    /// values.
    pub fn set(&self, g: &mut Group, index: usize, value: Mixed) -> Result<()> {
        self.check_element(g, &value)?;
        let old = self.get_unfiltered(g, index)?;
        if old == value {
            return Ok(());
        }
        let mut recurse = false;
        let mut state = CascadeState::new(CascadeMode::Strong);
        if self.is_link_elem() {
            let old_link =
                elem_as_link(g, self.obj.table_key(), self.col, &old)?.unwrap_or(ObjLink::NULL);
            let new_link =
                elem_as_link(g, self.obj.table_key(), self.col, &value)?.unwrap_or(ObjLink::NULL);
            if old_link.is_unresolved() {
                state.mode = CascadeMode::All;
            }
            recurse = replace_backlink(
                g,
                self.obj.table_key(),
                self.obj.key(),
                self.col,
                old_link,
                new_link,
                &mut state,
            )?;
        }
        self.write_raw(g, |payload, alloc, root| {
            payload.set_any(alloc, root, index, &value)
        })?;
        g.emit(Instruction::SetList {
            table: self.obj.table_key(),
            col: self.col,
            obj: self.obj.key(),
            index,
            value,
        });
        if recurse {
            remove_recursive(g, &mut state)?;
        }
        Ok(())
    }

    /// Insert an element before `index`.
    pub fn insert(&self, g: &mut Group, index: usize, value: Mixed) -> Result<()> {
        if index > self.size(g)? {
            return Err(EmberError::KeyNotFound);
        }
        self.check_element(g, &value)?;
        if self.is_link_elem() {
            if let Some(link) = elem_as_link(g, self.obj.table_key(), self.col, &value)? {
                set_backlink(g, self.obj.table_key(), self.obj.key(), self.col, link)?;
            }
        }
        self.write_raw(g, |payload, alloc, root| {
            payload.insert_any(alloc, root, index, &value)
        })?;
        g.emit(Instruction::Insert {
            table: self.obj.table_key(),
            col: self.col,
            obj: self.obj.key(),
            index,
            value,
        });
        Ok(())
    }

    pub fn add(&self, g: &mut Group, value: Mixed) -> Result<()> {
        let at = self.size(g)?;
        self.insert(g, at, value)
    }

    /// Remove the element at `index`.
    pub fn remove(&self, g: &mut Group, index: usize) -> Result<()> {
        let old = self.get_unfiltered(g, index)?;
        let mut recurse = false;
        let mut state = CascadeState::new(CascadeMode::Strong);
        if self.is_link_elem() {
            if let Some(link) = elem_as_link(g, self.obj.table_key(), self.col, &old)? {
                if link.is_unresolved() {
                    state.mode = CascadeMode::All;
                }
                recurse = remove_backlink(
                    g,
                    self.obj.table_key(),
                    self.obj.key(),
                    self.col,
                    link,
                    &mut state,
                )?;
            }
        }
        self.erase_raw(g, index)?;
        g.emit(Instruction::Erase {
            table: self.obj.table_key(),
            col: self.col,
            obj: self.obj.key(),
            index,
        });
        if recurse {
            remove_recursive(g, &mut state)?;
        }
        Ok(())
    }

    /// Remove all elements.
    pub fn clear(&self, g: &mut Group) -> Result<()> {
        let mut state = CascadeState::new(CascadeMode::Strong);
        let mut recurse = false;
        if self.is_link_elem() {
            for i in (0..self.size(g)?).rev() {
                let old = self.get_unfiltered(g, i)?;
                if let Some(link) = elem_as_link(g, self.obj.table_key(), self.col, &old)? {
                    recurse |= remove_backlink(
                        g,
                        self.obj.table_key(),
                        self.obj.key(),
                        self.col,
                        link,
                        &mut state,
                    )?;
                }
            }
        }
        for i in (0..self.size(g)?).rev() {
            self.erase_raw(g, i)?;
        }
        g.emit(Instruction::Clear {
            table: self.obj.table_key(),
            col: self.col,
            obj: self.obj.key(),
        });
        if recurse {
            remove_recursive(g, &mut state)?;
        }
        Ok(())
    }

    /// Grow with defaults (nulls where legal) or shrink from the tail.
    pub fn resize(&self, g: &mut Group, new_size: usize) -> Result<()> {
        let size = self.size(g)?;
        if new_size < size {
            for i in (new_size..size).rev() {
                self.remove(g, i)?;
            }
        } else {
            let default = if self.col.is_nullable() || self.is_link_elem() {
                Mixed::Null
            } else {
                default_element(self.col.col_type())
            };
            for i in size..new_size {
                self.insert(g, i, default.clone())?;
            }
        }
        Ok(())
    }

    /// Move an element to another position, preserving the others'
    /// order.
    pub fn move_elem(&self, g: &mut Group, from: usize, to: usize) -> Result<()> {
        if from == to {
            return Ok(());
        }
        let value = self.get_unfiltered(g, from)?;
        self.erase_raw(g, from)?;
        self.write_raw(g, |payload, alloc, root| {
            payload.insert_any(alloc, root, to, &value)
        })?;
        g.emit(Instruction::Move {
            table: self.obj.table_key(),
            col: self.col,
            obj: self.obj.key(),
            from,
            to,
        });
        Ok(())
    }

    pub fn find_first(&self, g: &Group, value: &Mixed) -> Result<Option<usize>> {
        for i in 0..self.size(g)? {
            if self.get_unfiltered(g, i)? == *value {
                return Ok(Some(i));
            }
        }
        Ok(None)
    }

    /// Index of the element linking at `target`, if any.
    pub(crate) fn find_link_target(&self, g: &Group, target: ObjLink) -> Result<Option<usize>> {
        for i in 0..self.size(g)? {
            let elem = self.get_unfiltered(g, i)?;
            if let Some(link) = elem_as_link(g, self.obj.table_key(), self.col, &elem)? {
                if link == target {
                    return Ok(Some(i));
                }
            }
        }
        Ok(None)
    }

    /// Write an element without backlink or replication side effects.
    /// Cascade internals only.
    pub(crate) fn set_raw(&self, g: &mut Group, index: usize, value: &Mixed) -> Result<()> {
        self.write_raw(g, |payload, alloc, root| {
            payload.set_any(alloc, root, index, value)
        })
    }

    /// Erase an element without backlink or replication side effects.
    pub(crate) fn erase_raw(&self, g: &mut Group, index: usize) -> Result<()> {
        self.write_raw(g, |payload, alloc, root| payload.erase(alloc, root, index))
    }

    fn write_raw(
        &self,
        g: &mut Group,
        f: impl FnOnce(
            &Payload,
            &mut ember_alloc::SlabAlloc,
            ember_alloc::Ref,
        ) -> Result<ember_alloc::Ref>,
    ) -> Result<()> {
        let payload = self.payload();
        with_writable_col(
            g,
            self.obj.table_key(),
            self.obj.key(),
            self.col_idx(),
            move |alloc, col_leaf, row| {
                let stored = Array::get(alloc, col_leaf, row);
                let root = if stored == 0 {
                    payload.create(alloc, 0)?
                } else {
                    ember_alloc::Ref::from_raw(stored)
                };
                let new_root = f(&payload, alloc, root)?;
                Array::set(alloc, col_leaf, row, new_root.to_raw())
            },
        )
    }
}

fn default_element(ct: ColumnType) -> Mixed {
    match ct {
        ColumnType::Int => Mixed::Int(0),
        ColumnType::Bool => Mixed::Bool(false),
        ColumnType::Float => Mixed::Float(0.0),
        ColumnType::Double => Mixed::Double(0.0),
        ColumnType::String => Mixed::String(String::new()),
        ColumnType::Binary => Mixed::Binary(Vec::new()),
        ColumnType::Timestamp => Mixed::Timestamp(ember_types::Timestamp::EPOCH),
        ColumnType::Decimal => Mixed::Decimal(ember_types::Decimal128::ZERO),
        ColumnType::ObjectId => Mixed::ObjectId(ember_types::ObjectId::default()),
        _ => Mixed::Null,
    }
}

/// Typed list veneer.
#[derive(Debug, Clone)]
pub struct Lst<T: ObjValue> {
    inner: AnyList,
    _marker: PhantomData<T>,
}

impl<T: ObjValue> Lst<T> {
    pub fn size(&self, g: &Group) -> Result<usize> {
        self.inner.size(g)
    }

    pub fn is_empty(&self, g: &Group) -> Result<bool> {
        Ok(self.size(g)? == 0)
    }

    pub fn get(&self, g: &Group, index: usize) -> Result<T> {
        let value = self.inner.get(g, index)?;
        let actual = value.type_name();
        T::from_mixed(value).ok_or(EmberError::IllegalType {
            expected: T::TYPE_NAME,
            actual,
        })
    }

    pub fn set(&self, g: &mut Group, index: usize, value: T) -> Result<()> {
        self.inner.set(g, index, value.to_mixed())
    }

    pub fn insert(&self, g: &mut Group, index: usize, value: T) -> Result<()> {
        self.inner.insert(g, index, value.to_mixed())
    }

    pub fn add(&self, g: &mut Group, value: T) -> Result<()> {
        self.inner.add(g, value.to_mixed())
    }

    pub fn remove(&self, g: &mut Group, index: usize) -> Result<()> {
        self.inner.remove(g, index)
    }

    pub fn clear(&self, g: &mut Group) -> Result<()> {
        self.inner.clear(g)
    }

    pub fn resize(&self, g: &mut Group, new_size: usize) -> Result<()> {
        self.inner.resize(g, new_size)
    }

    pub fn move_elem(&self, g: &mut Group, from: usize, to: usize) -> Result<()> {
        self.inner.move_elem(g, from, to)
    }

    pub fn find_first(&self, g: &Group, value: T) -> Result<Option<usize>> {
        self.inner.find_first(g, &value.to_mixed())
    }
}

/// A list of links with backlink maintenance. The public view hides
/// unresolved entries; storage keeps them so targets can resurrect.
#[derive(Debug, Clone)]
pub struct LnkLst {
    inner: AnyList,
}

impl LnkLst {
    /// Visible (resolved) entry count.
    pub fn size(&self, g: &Group) -> Result<usize> {
        let mut count = 0;
        for i in 0..self.inner.size(g)? {
            if !self.stored_key(g, i)?.is_unresolved() {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Entry count including unresolved keys.
    pub fn unfiltered_size(&self, g: &Group) -> Result<usize> {
        self.inner.size(g)
    }

    fn stored_key(&self, g: &Group, storage_index: usize) -> Result<ObjKey> {
        match self.inner.get_unfiltered(g, storage_index)? {
            Mixed::Link(k) => Ok(k),
            Mixed::Null => Ok(ObjKey::NULL),
            other => Err(EmberError::IllegalType {
                expected: "link",
                actual: other.type_name(),
            }),
        }
    }

    fn storage_index(&self, g: &Group, index: usize) -> Result<usize> {
        let mut seen = 0;
        for i in 0..self.inner.size(g)? {
            if !self.stored_key(g, i)?.is_unresolved() {
                if seen == index {
                    return Ok(i);
                }
                seen += 1;
            }
        }
        Err(EmberError::KeyNotFound)
    }

    pub fn get(&self, g: &Group, index: usize) -> Result<ObjKey> {
        let at = self.storage_index(g, index)?;
        self.stored_key(g, at)
    }

    pub fn get_object(&self, g: &Group, index: usize) -> Result<Obj> {
        let key = self.get(g, index)?;
        let target = g
            .tbl(self.inner.owner().table_key())
            .link_target(self.inner.col_key())?;
        g.get_object(ObjLink::new(target, key))
    }

    pub fn set(&self, g: &mut Group, index: usize, key: ObjKey) -> Result<()> {
        let at = self.storage_index(g, index)?;
        self.inner.set(g, at, key.to_mixed_link())
    }

    pub fn insert(&self, g: &mut Group, index: usize, key: ObjKey) -> Result<()> {
        let at = if index == self.size(g)? {
            self.inner.size(g)?
        } else {
            self.storage_index(g, index)?
        };
        self.inner.insert(g, at, key.to_mixed_link())
    }

    pub fn add(&self, g: &mut Group, key: ObjKey) -> Result<()> {
        let at = self.inner.size(g)?;
        self.inner.insert(g, at, key.to_mixed_link())
    }

    pub fn remove(&self, g: &mut Group, index: usize) -> Result<()> {
        let at = self.storage_index(g, index)?;
        self.inner.remove(g, at)
    }

    pub fn clear(&self, g: &mut Group) -> Result<()> {
        self.inner.clear(g)
    }

    pub fn find_first(&self, g: &Group, key: ObjKey) -> Result<Option<usize>> {
        let mut visible = 0;
        for i in 0..self.inner.size(g)? {
            let stored = self.stored_key(g, i)?;
            if stored.is_unresolved() {
                continue;
            }
            if stored == key {
                return Ok(Some(visible));
            }
            visible += 1;
        }
        Ok(None)
    }

    /// Create an object in the (embedded) target table and insert a link
    /// to it. The only way to forge links into embedded tables.
    pub fn create_and_insert_linked_object(&self, g: &mut Group, index: usize) -> Result<Obj> {
        let owner = self.inner.owner().clone();
        let col = self.inner.col_key();
        let target = g.tbl(owner.table_key()).link_target(col)?;
        let new_key = g.tbl_mut(target).allocate_key();
        let new_obj = g.create_object_with_key_inner(target, new_key)?;
        set_backlink(
            g,
            owner.table_key(),
            owner.key(),
            col,
            ObjLink::new(target, new_key),
        )?;
        let at = if index == self.size(g)? {
            self.inner.size(g)?
        } else {
            self.storage_index(g, index)?
        };
        self.inner.write_raw(g, |payload, alloc, root| {
            payload.insert_any(alloc, root, at, &Mixed::Link(new_key))
        })?;
        g.emit(Instruction::Insert {
            table: owner.table_key(),
            col,
            obj: owner.key(),
            index: at,
            value: Mixed::Link(new_key),
        });
        Ok(new_obj)
    }

    pub(crate) fn as_any(&self) -> &AnyList {
        &self.inner
    }
}

trait ToMixedLink {
    fn to_mixed_link(self) -> Mixed;
}

impl ToMixedLink for ObjKey {
    fn to_mixed_link(self) -> Mixed {
        if self.is_null() {
            Mixed::Null
        } else {
            Mixed::Link(self)
        }
    }
}
