//! The group: owner of the allocator and the table registry.
//!
//! The group is the transaction façade's view of the storage core. It
//! owns the allocator (and with it both version counters), hands out
//! object accessors, coordinates schema changes that span tables, and
//! persists everything on commit. Writer serialisation is the caller's
//! duty: a write transaction is simply exclusive `&mut Group` access.

use tracing::debug;

use ember_alloc::{Ref, SlabAlloc};
use ember_array::{Array, ArraySpec};
use ember_error::{EmberError, Result};
use ember_types::{
    col_attr, ColKey, ColumnAttrMask, ColumnType, Mixed, ObjKey, ObjLink, TableKey,
};

use crate::obj::Obj;
use crate::replication::{Instruction, Replication};
use crate::table::{value_attrs, Table};

/// Shape of a link column added via [`Group::add_column_link`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkType {
    Single,
    List,
}

pub struct Group {
    pub(crate) alloc: SlabAlloc,
    pub(crate) tables: Vec<Table>,
    pub(crate) repl: Option<Box<dyn Replication>>,
}

impl Group {
    /// An ephemeral in-memory group.
    pub fn new() -> Group {
        Group {
            alloc: SlabAlloc::new_memory(),
            tables: Vec::new(),
            repl: None,
        }
    }

    /// Open or create a group backed by a file.
    pub fn open(path: &std::path::Path) -> Result<Group> {
        let alloc = SlabAlloc::open(path)?;
        let mut group = Group {
            alloc,
            tables: Vec::new(),
            repl: None,
        };
        let top = group.alloc.top_ref();
        if !top.is_null() {
            let count = Array::len(&group.alloc, top);
            for i in 0..count {
                let block = Ref::from_raw(Array::get(&group.alloc, top, i));
                let table = Table::load(&group.alloc, TableKey::new(i as u32), block)?;
                group.tables.push(table);
            }
        }
        debug!(tables = group.tables.len(), "group opened");
        Ok(group)
    }

    /// Install the replication sink mutations are reported to.
    pub fn set_replication(&mut self, repl: Box<dyn Replication>) {
        self.repl = Some(repl);
    }

    pub(crate) fn emit(&mut self, instr: Instruction) {
        if let Some(repl) = &mut self.repl {
            repl.emit(instr);
        }
    }

    pub fn storage_version(&self) -> u64 {
        self.alloc.storage_version()
    }

    pub fn content_version(&self) -> u64 {
        self.alloc.content_version()
    }

    pub fn alloc(&self) -> &SlabAlloc {
        &self.alloc
    }

    // ------------------------------------------------------------------
    // Tables
    // ------------------------------------------------------------------

    pub fn add_table(&mut self, name: &str) -> Result<TableKey> {
        self.add_table_inner(name, false)
    }

    /// An embedded table: its objects live and die with their single
    /// incoming link.
    pub fn add_embedded_table(&mut self, name: &str) -> Result<TableKey> {
        self.add_table_inner(name, true)
    }

    fn add_table_inner(&mut self, name: &str, embedded: bool) -> Result<TableKey> {
        if self.find_table(name).is_some() {
            return Err(EmberError::KeyAlreadyExists);
        }
        let key = TableKey::new(self.tables.len() as u32);
        let table = Table::new(&mut self.alloc, key, name.to_owned(), embedded)?;
        self.tables.push(table);
        debug!(name, %key, embedded, "table added");
        Ok(key)
    }

    /// Find a table by name, creating it when absent.
    pub fn get_or_add_table(&mut self, name: &str) -> Result<TableKey> {
        match self.find_table(name) {
            Some(key) => Ok(key),
            None => self.add_table(name),
        }
    }

    pub fn find_table(&self, name: &str) -> Option<TableKey> {
        self.tables.iter().find(|t| t.name == name).map(|t| t.key)
    }

    pub fn get_table(&self, key: TableKey) -> Option<&Table> {
        self.tables.get(key.value() as usize)
    }

    pub fn table_keys(&self) -> Vec<TableKey> {
        self.tables.iter().map(|t| t.key).collect()
    }

    pub(crate) fn tbl(&self, key: TableKey) -> &Table {
        &self.tables[key.value() as usize]
    }

    pub(crate) fn tbl_mut(&mut self, key: TableKey) -> &mut Table {
        &mut self.tables[key.value() as usize]
    }

    // ------------------------------------------------------------------
    // Columns
    // ------------------------------------------------------------------

    /// Add a plain value column.
    pub fn add_column(
        &mut self,
        table: TableKey,
        name: &str,
        col_type: ColumnType,
        nullable: bool,
    ) -> Result<ColKey> {
        debug_assert!(!matches!(
            col_type,
            ColumnType::Link | ColumnType::Backlink
        ));
        let attrs = value_attrs(nullable, false);
        self.add_column_checked(table, name, col_type, attrs, None, None)
    }

    /// Add the table's primary-key column.
    pub fn add_primary_key_column(
        &mut self,
        table: TableKey,
        name: &str,
        col_type: ColumnType,
    ) -> Result<ColKey> {
        let attrs = value_attrs(false, true);
        self.add_column_checked(table, name, col_type, attrs, None, None)
    }

    /// Add a list column of a non-link element type.
    pub fn add_column_list(
        &mut self,
        table: TableKey,
        name: &str,
        elem_type: ColumnType,
        nullable: bool,
    ) -> Result<ColKey> {
        debug_assert!(!matches!(elem_type, ColumnType::Link | ColumnType::Backlink));
        let attrs = value_attrs(nullable, false).with(col_attr::LIST);
        self.add_column_checked(table, name, elem_type, attrs, None, None)
    }

    /// Add a dictionary column (`Mixed` keys, `Mixed` values).
    pub fn add_column_dictionary(&mut self, table: TableKey, name: &str) -> Result<ColKey> {
        let attrs = ColumnAttrMask::EMPTY
            .with(col_attr::DICTIONARY)
            .with(col_attr::NULLABLE);
        self.add_column_checked(table, name, ColumnType::Mixed, attrs, None, None)
    }

    /// Add a link or link-list column targeting `target`, and the paired
    /// backlink column on the target table. Links into an embedded table
    /// are implicitly strong.
    pub fn add_column_link(
        &mut self,
        table: TableKey,
        name: &str,
        link_type: LinkType,
        target: TableKey,
    ) -> Result<ColKey> {
        let mut attrs = ColumnAttrMask::EMPTY.with(col_attr::NULLABLE);
        if link_type == LinkType::List {
            attrs = attrs.with(col_attr::LIST);
        }
        if self.tbl(target).is_embedded() {
            attrs = attrs.with(col_attr::STRONG_LINKS);
        }
        let col =
            self.add_column_checked(table, name, ColumnType::Link, attrs, Some(target), None)?;
        self.add_backlink_column(target, col, table)?;
        Ok(col)
    }

    fn add_column_checked(
        &mut self,
        table: TableKey,
        name: &str,
        col_type: ColumnType,
        attrs: ColumnAttrMask,
        target: Option<TableKey>,
        origin_col: Option<ColKey>,
    ) -> Result<ColKey> {
        if self.tbl(table).column_by_name(name).is_some() {
            return Err(EmberError::KeyAlreadyExists);
        }
        let col = {
            let Group { alloc, tables, .. } = self;
            tables[table.value() as usize].add_column_raw(
                alloc,
                name.to_owned(),
                col_type,
                attrs,
                target,
                origin_col,
            )?
        };
        self.emit(Instruction::InsertColumn { table, col });
        Ok(col)
    }

    fn add_backlink_column(
        &mut self,
        target: TableKey,
        origin_col: ColKey,
        origin_table: TableKey,
    ) -> Result<ColKey> {
        let name = format!(
            "!backlink:{}:{}",
            origin_table.value(),
            origin_col.to_raw()
        );
        let Group { alloc, tables, .. } = self;
        tables[target.value() as usize].add_column_raw(
            alloc,
            name,
            ColumnType::Backlink,
            ColumnAttrMask::EMPTY,
            Some(origin_table),
            Some(origin_col),
        )
    }

    /// The backlink column on `target` mirroring `(origin_table,
    /// origin_col)`, creating it if this is the first link of that shape.
    /// Used for typed-link, mixed and dictionary values, whose target
    /// tables are discovered per value.
    pub(crate) fn find_or_add_backlink_column(
        &mut self,
        target: TableKey,
        origin_col: ColKey,
        origin_table: TableKey,
    ) -> Result<ColKey> {
        if let Some(col) = self.tbl(target).find_backlink_column(origin_col, origin_table) {
            return Ok(col);
        }
        debug!(%target, %origin_table, "backlink column discovered");
        self.add_backlink_column(target, origin_col, origin_table)
    }

    /// The backlink column pairing rule: schema-declared for strict link
    /// columns, find-or-add for per-value targets.
    pub(crate) fn backlink_column_for(
        &mut self,
        target: TableKey,
        origin_col: ColKey,
        origin_table: TableKey,
    ) -> Result<ColKey> {
        let by_value = origin_col.col_type() != ColumnType::Link || origin_col.is_dictionary();
        if by_value {
            self.find_or_add_backlink_column(target, origin_col, origin_table)
        } else {
            self.tbl(target)
                .find_backlink_column(origin_col, origin_table)
                .ok_or_else(|| EmberError::corrupt("missing paired backlink column"))
        }
    }

    // ------------------------------------------------------------------
    // Objects
    // ------------------------------------------------------------------

    /// Create an object with a fresh key. Rejected on embedded tables,
    /// whose objects can only be created through an owning link.
    pub fn create_object(&mut self, table: TableKey) -> Result<Obj> {
        if self.tbl(table).is_embedded() {
            return Err(EmberError::WrongKindOfTable {
                detail: "objects in an embedded table are created through their parent link",
            });
        }
        let key = self.tbl_mut(table).allocate_key();
        self.create_object_with_key_inner(table, key)
    }

    /// Create an object with a caller-chosen key.
    pub fn create_object_with_key(&mut self, table: TableKey, key: ObjKey) -> Result<Obj> {
        if self.tbl(table).is_embedded() {
            return Err(EmberError::WrongKindOfTable {
                detail: "objects in an embedded table are created through their parent link",
            });
        }
        let obj = self.create_object_with_key_inner(table, key)?;
        let t = self.tbl_mut(table);
        if key.value() >= t.next_key {
            t.next_key = key.value() + 1;
        }
        Ok(obj)
    }

    pub(crate) fn create_object_with_key_inner(
        &mut self,
        table: TableKey,
        key: ObjKey,
    ) -> Result<Obj> {
        debug_assert!(!key.is_null() && !key.is_unresolved());
        {
            let Group { alloc, tables, .. } = self;
            tables[table.value() as usize]
                .clusters
                .insert(alloc, key, &[])?;
            alloc.bump_content_version();
        }
        self.emit(Instruction::CreateObject { table, obj: key });
        Ok(Obj::new(table, key))
    }

    /// Create an object identified by a primary key. The object key is
    /// derived from the key value's hash, probing past occupied keys on
    /// collision. A matching tombstone is resurrected: the fresh object
    /// takes over the tombstone's identity and incoming links.
    pub fn create_object_with_primary_key(
        &mut self,
        table: TableKey,
        pk: Mixed,
    ) -> Result<Obj> {
        let pk_col = self
            .tbl(table)
            .primary_key_column()
            .ok_or(EmberError::IllegalCombination {
                detail: "table has no primary key column",
            })?;
        if self.tbl(table).is_embedded() {
            return Err(EmberError::WrongKindOfTable {
                detail: "objects in an embedded table are created through their parent link",
            });
        }

        let mut candidate = ObjKey::new(pk.hash63());
        loop {
            let live = self.tbl(table).clusters.is_valid(&self.alloc, candidate);
            if live {
                let existing = Obj::new(table, candidate);
                if existing.get_any(self, pk_col)? == pk {
                    return Err(EmberError::KeyAlreadyExists);
                }
                // Distinct key hashed onto an occupied slot: probe on.
                candidate = ObjKey::new(candidate.value().wrapping_add(1) & i64::MAX);
                continue;
            }
            let tombstone_key = candidate.unresolved_twin();
            let had_tombstone = self
                .tbl(table)
                .tombstones
                .is_valid(&self.alloc, tombstone_key);

            let obj = self.create_object_with_key_inner(table, candidate)?;
            obj.set_pk_internal(self, pk_col, &pk)?;
            if had_tombstone {
                let tombstone = Obj::new(table, tombstone_key);
                obj.assign_pk_and_backlinks(self, &tombstone)?;
            }
            let t = self.tbl_mut(table);
            if candidate.value() >= t.next_key {
                t.next_key = candidate.value() + 1;
            }
            return Ok(obj);
        }
    }

    /// Accessor for a live or tombstoned object.
    pub fn get_object(&self, link: ObjLink) -> Result<Obj> {
        self.validate(link)?;
        Ok(Obj::new(link.table_key(), link.obj_key()))
    }

    /// Check that a link's target exists (in its table's live or
    /// tombstone tree). Null links validate trivially.
    pub fn validate(&self, link: ObjLink) -> Result<()> {
        if link.is_null() {
            return Ok(());
        }
        let table = self
            .get_table(link.table_key())
            .ok_or(EmberError::TargetOutOfRange)?;
        if !table.is_valid(&self.alloc, link.obj_key()) {
            return Err(EmberError::TargetOutOfRange);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Commit
    // ------------------------------------------------------------------

    /// Persist all tables and atomically advance the file's root. After
    /// return every ref handed out so far is part of an immutable
    /// snapshot.
    pub fn commit(&mut self) -> Result<()> {
        let mut blocks = Vec::with_capacity(self.tables.len());
        for table in &self.tables {
            blocks.push(table.save(&mut self.alloc)?);
        }
        let mut top = Array::create(
            &mut self.alloc,
            ArraySpec {
                has_refs: true,
                ..ArraySpec::default()
            },
            blocks.len(),
            0,
        )?;
        for (i, block) in blocks.iter().enumerate() {
            top = Array::set(&mut self.alloc, top, i, block.to_raw())?;
        }
        self.alloc.commit(top)?;
        debug!(top = %top, "group committed");
        Ok(())
    }
}

impl Default for Group {
    fn default() -> Self {
        Group::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_table_name_rejected() {
        let mut g = Group::new();
        g.add_table("T").unwrap();
        assert!(matches!(
            g.add_table("T"),
            Err(EmberError::KeyAlreadyExists)
        ));
        assert_eq!(g.get_or_add_table("T").unwrap(), g.find_table("T").unwrap());
    }

    #[test]
    fn test_duplicate_column_name_rejected() {
        let mut g = Group::new();
        let t = g.add_table("T").unwrap();
        g.add_column(t, "n", ColumnType::Int, false).unwrap();
        assert!(matches!(
            g.add_column(t, "n", ColumnType::String, false),
            Err(EmberError::KeyAlreadyExists)
        ));
    }

    #[test]
    fn test_column_added_after_rows_reads_defaults() {
        let mut g = Group::new();
        let t = g.add_table("T").unwrap();
        let obj = g.create_object(t).unwrap();
        let late = g.add_column(t, "late", ColumnType::Int, true).unwrap();
        assert!(obj.is_null(&g, late).unwrap());
        obj.set(&mut g, late, Some(5i64)).unwrap();
        assert_eq!(obj.get::<Option<i64>>(&g, late).unwrap(), Some(5));
    }

    #[test]
    fn test_second_primary_key_column_rejected() {
        let mut g = Group::new();
        let t = g.add_table("T").unwrap();
        g.add_primary_key_column(t, "id", ColumnType::Int).unwrap();
        assert!(matches!(
            g.add_primary_key_column(t, "id2", ColumnType::Int),
            Err(EmberError::IllegalCombination { .. })
        ));
    }

    #[test]
    fn test_validate_checks_table_and_key() {
        let mut g = Group::new();
        let t = g.add_table("T").unwrap();
        let obj = g.create_object(t).unwrap();
        assert!(g.validate(ObjLink::new(t, obj.key())).is_ok());
        assert!(g.validate(ObjLink::NULL).is_ok());
        assert!(matches!(
            g.validate(ObjLink::new(t, ObjKey::new(404))),
            Err(EmberError::TargetOutOfRange)
        ));
        assert!(matches!(
            g.validate(ObjLink::new(TableKey::new(9), obj.key())),
            Err(EmberError::TargetOutOfRange)
        ));
    }
}
