//! Dictionaries: unordered `Mixed -> Mixed` maps.
//!
//! A dictionary is its own cluster tree hanging off one row slot. The
//! row key of an entry is the 63-bit hash of the user key; the cluster
//! stores the original key and the value as two mixed columns, so
//! distinct keys that collide stay distinguishable. Collisions are
//! resolved by open addressing over the row-key space, with backward
//! repair of probe chains on erase.
//!
//! Link values follow the same backlink discipline as everywhere else;
//! the paired backlink column is found-or-added per value.

use ember_alloc::Ref;
use ember_array::{Array, ArrayMixed};
use ember_cluster::{CascadeMode, CascadeState, Cluster, ClusterTree};
use ember_error::{EmberError, Result};
use ember_types::{
    col_attr, ColKey, ColKeyIdx, ColumnAttrMask, ColumnType, Mixed, ObjKey,
};

use crate::group::Group;
use crate::obj::{
    check_link_value, remove_backlink, remove_recursive, set_backlink, with_writable_col, Obj,
};
use crate::replication::Instruction;

/// Leaf index of the stored user key within a dictionary cluster.
const KEY_COL: usize = 0;
/// Leaf index of the stored value.
const VALUE_COL: usize = 1;

fn dict_cols() -> Vec<ColKey> {
    let attrs = ColumnAttrMask::EMPTY.with(col_attr::NULLABLE);
    vec![
        ColKey::new(ColKeyIdx(KEY_COL as u16), ColumnType::Mixed, attrs, 0),
        ColKey::new(ColKeyIdx(VALUE_COL as u16), ColumnType::Mixed, attrs, 0),
    ]
}

fn next_probe(key: ObjKey) -> ObjKey {
    ObjKey::new(key.value().wrapping_add(1) & i64::MAX)
}

/// Row-key hash of a user key. Tests can pin this to a constant to
/// exercise the collision path, which real 63-bit hashes never hit.
fn hash_key(key: &Mixed) -> i64 {
    #[cfg(test)]
    if let Some(f) = test_hash::OVERRIDE.with(std::cell::Cell::get) {
        return f(key);
    }
    key.hash63()
}

#[cfg(test)]
pub(crate) mod test_hash {
    use super::Mixed;
    use std::cell::Cell;

    thread_local! {
        pub static OVERRIDE: Cell<Option<fn(&Mixed) -> i64>> = const { Cell::new(None) };
    }
}

impl Obj {
    /// Dictionary handle for a dictionary column.
    pub fn get_dictionary(&self, col: ColKey) -> Dictionary {
        debug_assert!(col.is_dictionary());
        Dictionary {
            obj: self.clone(),
            col,
        }
    }
}

/// Handle to one object's dictionary column.
#[derive(Debug, Clone)]
pub struct Dictionary {
    obj: Obj,
    col: ColKey,
}

impl Dictionary {
    fn col_idx(&self) -> usize {
        usize::from(self.col.idx().0)
    }

    fn root(&self, g: &Group) -> Result<i64> {
        let (col_leaf, row) = self.obj.col_leaf(g, self.col)?;
        Ok(Array::get(&g.alloc, col_leaf, row))
    }

    pub fn size(&self, g: &Group) -> Result<usize> {
        let root = self.root(g)?;
        if root == 0 {
            return Ok(0);
        }
        Ok(ClusterTree::from_ref(Ref::from_raw(root), dict_cols()).size(&g.alloc))
    }

    pub fn is_empty(&self, g: &Group) -> Result<bool> {
        Ok(self.size(g)? == 0)
    }

    /// Probe for `key`. Returns the entry's row key and stored value.
    fn locate(&self, g: &Group, key: &Mixed) -> Result<Option<(ObjKey, Mixed)>> {
        let root = self.root(g)?;
        if root == 0 {
            return Ok(None);
        }
        let tree = ClusterTree::from_ref(Ref::from_raw(root), dict_cols());
        let mut candidate = ObjKey::new(hash_key(key));
        loop {
            let Ok(state) = tree.get(&g.alloc, candidate) else {
                return Ok(None);
            };
            let stored_key = ArrayMixed::get(
                &g.alloc,
                Cluster::column_ref(&g.alloc, state.mem, KEY_COL),
                state.index,
            );
            if stored_key == *key {
                let value = ArrayMixed::get(
                    &g.alloc,
                    Cluster::column_ref(&g.alloc, state.mem, VALUE_COL),
                    state.index,
                );
                return Ok(Some((candidate, value)));
            }
            candidate = next_probe(candidate);
        }
    }

    /// The value stored under `key`. Fails with `KeyNotFound` when
    /// absent; unresolved link values read as null.
    pub fn get(&self, g: &Group, key: &Mixed) -> Result<Mixed> {
        match self.locate(g, key)? {
            Some((_, value)) => Ok(filter_unresolved(value)),
            None => Err(EmberError::KeyNotFound),
        }
    }

    pub fn contains(&self, g: &Group, key: &Mixed) -> Result<bool> {
        Ok(self.locate(g, key)?.is_some())
    }

    /// Insert or overwrite. Returns true when a new entry was created,
    /// false on overwrite.
    pub fn insert(&self, g: &mut Group, key: Mixed, value: Mixed) -> Result<bool> {
        self.check_value(g, &value)?;
        let existing = self.locate(g, &key)?;
        let new_link = value.as_obj_link();
        match existing {
            Some((row_key, old_value)) => {
                let mut state = CascadeState::new(CascadeMode::Strong);
                let mut recurse = false;
                if let Some(old_link) = old_value.as_obj_link() {
                    if old_link.is_unresolved() {
                        state.mode = CascadeMode::All;
                    }
                    recurse = remove_backlink(
                        g,
                        self.obj.table_key(),
                        self.obj.key(),
                        self.col,
                        old_link,
                        &mut state,
                    )?;
                }
                if let Some(link) = new_link {
                    set_backlink(g, self.obj.table_key(), self.obj.key(), self.col, link)?;
                }
                self.write_value(g, row_key, &value)?;
                g.emit(Instruction::DictInsert {
                    table: self.obj.table_key(),
                    col: self.col,
                    obj: self.obj.key(),
                    key,
                    value,
                });
                if recurse {
                    remove_recursive(g, &mut state)?;
                }
                Ok(false)
            }
            None => {
                if let Some(link) = new_link {
                    set_backlink(g, self.obj.table_key(), self.obj.key(), self.col, link)?;
                }
                self.insert_entry(g, &key, &value)?;
                g.emit(Instruction::DictInsert {
                    table: self.obj.table_key(),
                    col: self.col,
                    obj: self.obj.key(),
                    key,
                    value,
                });
                Ok(true)
            }
        }
    }

    /// The historical indexing behaviour: a miss inserts a null-valued
    /// entry, and the *prior* value is returned (`None` on miss).
    pub fn get_or_insert_null(&self, g: &mut Group, key: Mixed) -> Result<Option<Mixed>> {
        if let Some((_, value)) = self.locate(g, &key)? {
            return Ok(Some(filter_unresolved(value)));
        }
        self.insert_entry(g, &key, &Mixed::Null)?;
        g.emit(Instruction::DictInsert {
            table: self.obj.table_key(),
            col: self.col,
            obj: self.obj.key(),
            key,
            value: Mixed::Null,
        });
        Ok(None)
    }

    /// Remove the entry for `key`, repairing the probe chain behind it.
    pub fn erase(&self, g: &mut Group, key: &Mixed) -> Result<()> {
        let Some((row_key, old_value)) = self.locate(g, key)? else {
            return Err(EmberError::KeyNotFound);
        };
        let mut state = CascadeState::new(CascadeMode::Strong);
        let mut recurse = false;
        if let Some(old_link) = old_value.as_obj_link() {
            if old_link.is_unresolved() {
                state.mode = CascadeMode::All;
            }
            recurse = remove_backlink(
                g,
                self.obj.table_key(),
                self.obj.key(),
                self.col,
                old_link,
                &mut state,
            )?;
        }
        self.with_tree(g, |alloc, tree| {
            tree.erase(alloc, row_key)?;
            repair_chain(alloc, tree, row_key)
        })?;
        g.emit(Instruction::DictErase {
            table: self.obj.table_key(),
            col: self.col,
            obj: self.obj.key(),
            key: key.clone(),
        });
        if recurse {
            remove_recursive(g, &mut state)?;
        }
        Ok(())
    }

    /// Sever a link value without removing its entry and without
    /// touching the (dying) target's backlinks. Cascade internals only.
    pub(crate) fn nullify(&self, g: &mut Group, key: &Mixed) -> Result<()> {
        let Some((row_key, _)) = self.locate(g, key)? else {
            return Err(EmberError::corrupt("nullified dictionary entry missing"));
        };
        self.write_value(g, row_key, &Mixed::Null)
    }

    /// Overwrite a value without backlink or replication side effects.
    /// Used when links are retargeted at a tombstone.
    pub(crate) fn insert_raw(&self, g: &mut Group, key: &Mixed, value: &Mixed) -> Result<()> {
        let Some((row_key, _)) = self.locate(g, key)? else {
            return Err(EmberError::corrupt("retargeted dictionary entry missing"));
        };
        self.write_value(g, row_key, value)
    }

    /// Drop every entry.
    pub fn clear(&self, g: &mut Group) -> Result<()> {
        let mut state = CascadeState::new(CascadeMode::Strong);
        let mut recurse = false;
        for (_, value) in self.entries_unfiltered(g)? {
            if let Some(link) = value.as_obj_link() {
                if link.is_unresolved() {
                    state.mode = CascadeMode::All;
                }
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
        self.with_tree(g, |alloc, tree| tree.clear(alloc))?;
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

    /// All `(key, value)` pairs in row-key order; unresolved link values
    /// read as null.
    pub fn entries(&self, g: &Group) -> Result<Vec<(Mixed, Mixed)>> {
        Ok(self
            .entries_unfiltered(g)?
            .into_iter()
            .map(|(k, v)| (k, filter_unresolved(v)))
            .collect())
    }

    pub(crate) fn entries_unfiltered(&self, g: &Group) -> Result<Vec<(Mixed, Mixed)>> {
        let root = self.root(g)?;
        if root == 0 {
            return Ok(Vec::new());
        }
        let tree = ClusterTree::from_ref(Ref::from_raw(root), dict_cols());
        let mut out = Vec::with_capacity(tree.size(&g.alloc));
        for (_, state) in tree.iter(&g.alloc) {
            let key = ArrayMixed::get(
                &g.alloc,
                Cluster::column_ref(&g.alloc, state.mem, KEY_COL),
                state.index,
            );
            let value = ArrayMixed::get(
                &g.alloc,
                Cluster::column_ref(&g.alloc, state.mem, VALUE_COL),
                state.index,
            );
            out.push((key, value));
        }
        Ok(out)
    }

    fn check_value(&self, g: &Group, value: &Mixed) -> Result<()> {
        if matches!(value, Mixed::Link(_)) {
            // Dictionary values carry their own target table.
            return Err(EmberError::IllegalType {
                expected: "typedlink",
                actual: "link",
            });
        }
        check_link_value(g, self.obj.table_key(), self.col, value)
    }

    fn insert_entry(&self, g: &mut Group, key: &Mixed, value: &Mixed) -> Result<()> {
        let cols = dict_cols();
        let field_values = vec![(cols[KEY_COL], key.clone()), (cols[VALUE_COL], value.clone())];
        let hash = ObjKey::new(hash_key(key));
        self.with_tree(g, move |alloc, tree| {
            let mut candidate = hash;
            while tree.is_valid(alloc, candidate) {
                candidate = next_probe(candidate);
            }
            tree.insert(alloc, candidate, &field_values)?;
            Ok(())
        })
    }

    fn write_value(&self, g: &mut Group, row_key: ObjKey, value: &Mixed) -> Result<()> {
        self.with_tree(g, move |alloc, tree| {
            let leaf = tree.ensure_writeable(alloc, row_key)?;
            let state = tree.get(alloc, row_key)?;
            let col_ref = Cluster::column_ref(alloc, leaf, VALUE_COL);
            let new_ref = ArrayMixed::set(alloc, col_ref, state.index, value)?;
            Cluster::set_column_ref(alloc, leaf, VALUE_COL, new_ref)?;
            Ok(())
        })
    }

    /// Run a mutation against the dictionary's tree, creating it on
    /// first use and persisting the (possibly moved) root back into the
    /// owning row slot.
    fn with_tree<R>(
        &self,
        g: &mut Group,
        f: impl FnOnce(&mut ember_alloc::SlabAlloc, &mut ClusterTree) -> Result<R>,
    ) -> Result<R> {
        let mut out = None;
        with_writable_col(
            g,
            self.obj.table_key(),
            self.obj.key(),
            self.col_idx(),
            |alloc, col_leaf, row| {
                let stored = Array::get(alloc, col_leaf, row);
                let mut tree = if stored == 0 {
                    ClusterTree::create(alloc, dict_cols())?
                } else {
                    ClusterTree::from_ref(Ref::from_raw(stored), dict_cols())
                };
                out = Some(f(alloc, &mut tree)?);
                Array::set(alloc, col_leaf, row, tree.root_ref().to_raw())
            },
        )?;
        // The closure either ran to completion or the call above failed.
        Ok(out.expect("dictionary mutation closure did not run"))
    }
}

fn filter_unresolved(value: Mixed) -> Mixed {
    match value {
        Mixed::TypedLink(l) if l.is_unresolved() => Mixed::Null,
        other => other,
    }
}

/// After removing an entry, rehash the contiguous run of entries that
/// follows it so open-addressed lookups keep finding displaced keys.
fn repair_chain(
    alloc: &mut ember_alloc::SlabAlloc,
    tree: &mut ClusterTree,
    removed: ObjKey,
) -> Result<()> {
    let cols = dict_cols();
    let mut slot = next_probe(removed);
    loop {
        let Ok(state) = tree.get(alloc, slot) else {
            return Ok(());
        };
        let key = ArrayMixed::get(
            alloc,
            Cluster::column_ref(alloc, state.mem, KEY_COL),
            state.index,
        );
        let value = ArrayMixed::get(
            alloc,
            Cluster::column_ref(alloc, state.mem, VALUE_COL),
            state.index,
        );
        tree.erase(alloc, slot)?;
        let mut candidate = ObjKey::new(hash_key(&key));
        while tree.is_valid(alloc, candidate) {
            candidate = next_probe(candidate);
        }
        tree.insert(
            alloc,
            candidate,
            &[(cols[KEY_COL], key), (cols[VALUE_COL], value)],
        )?;
        slot = next_probe(slot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::Group;

    /// Pins the dictionary hash for the duration of a test.
    struct HashGuard;

    impl HashGuard {
        fn pin(f: fn(&Mixed) -> i64) -> HashGuard {
            test_hash::OVERRIDE.with(|h| h.set(Some(f)));
            HashGuard
        }
    }

    impl Drop for HashGuard {
        fn drop(&mut self) {
            test_hash::OVERRIDE.with(|h| h.set(None));
        }
    }

    fn dict_fixture() -> (Group, Dictionary) {
        let mut g = Group::new();
        let t = g.add_table("holder").unwrap();
        let col = g.add_column_dictionary(t, "props").unwrap();
        let obj = g.create_object(t).unwrap();
        let dict = obj.get_dictionary(col);
        (g, dict)
    }

    #[test]
    fn test_colliding_keys_are_both_retrievable() {
        let _guard = HashGuard::pin(|_| 42);
        let (mut g, dict) = dict_fixture();
        assert!(dict.insert(&mut g, Mixed::from("a"), Mixed::Int(1)).unwrap());
        assert!(dict.insert(&mut g, Mixed::from("b"), Mixed::Int(2)).unwrap());
        assert_eq!(dict.size(&g).unwrap(), 2);
        assert_eq!(dict.get(&g, &Mixed::from("a")).unwrap(), Mixed::Int(1));
        assert_eq!(dict.get(&g, &Mixed::from("b")).unwrap(), Mixed::Int(2));
    }

    #[test]
    fn test_erase_repairs_probe_chain() {
        let _guard = HashGuard::pin(|_| 7);
        let (mut g, dict) = dict_fixture();
        for (k, v) in [("a", 1), ("b", 2), ("c", 3)] {
            dict.insert(&mut g, Mixed::from(k), Mixed::Int(v)).unwrap();
        }
        // "b" and "c" are displaced past their ideal slot; removing "a"
        // must not strand them behind a vacancy.
        dict.erase(&mut g, &Mixed::from("a")).unwrap();
        assert_eq!(dict.get(&g, &Mixed::from("b")).unwrap(), Mixed::Int(2));
        assert_eq!(dict.get(&g, &Mixed::from("c")).unwrap(), Mixed::Int(3));
        assert!(matches!(
            dict.get(&g, &Mixed::from("a")),
            Err(EmberError::KeyNotFound)
        ));
    }

    #[test]
    fn test_overwrite_on_collision_slot_keeps_distinct_keys() {
        let _guard = HashGuard::pin(|_| 99);
        let (mut g, dict) = dict_fixture();
        dict.insert(&mut g, Mixed::from("x"), Mixed::Int(1)).unwrap();
        dict.insert(&mut g, Mixed::from("y"), Mixed::Int(2)).unwrap();
        // Overwriting through a collision chain updates the right entry.
        assert!(!dict.insert(&mut g, Mixed::from("y"), Mixed::Int(20)).unwrap());
        assert_eq!(dict.get(&g, &Mixed::from("x")).unwrap(), Mixed::Int(1));
        assert_eq!(dict.get(&g, &Mixed::from("y")).unwrap(), Mixed::Int(20));
        assert_eq!(dict.size(&g).unwrap(), 2);
    }
}
