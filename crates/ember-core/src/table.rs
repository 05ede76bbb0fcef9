//! Tables: schema, live and tombstone row stores.

use ember_alloc::{Ref, SlabAlloc};
use ember_array::blob::{blob_bytes, blob_create};
use ember_array::{Array, ArraySpec};
use ember_cluster::ClusterTree;
use ember_error::{EmberError, Result};
use ember_types::{col_attr, ColKey, ColKeyIdx, ColumnAttrMask, ColumnType, ObjKey, TableKey};

use crate::schema::Column;

/// A table: ordered columns, one live cluster tree, one tombstone tree.
///
/// Schema changes and object lifecycle operations that touch more than
/// one table (link columns, cascades) live on [`crate::Group`]; the table
/// itself owns only its local state.
pub struct Table {
    pub(crate) key: TableKey,
    pub(crate) name: String,
    pub(crate) embedded: bool,
    pub(crate) columns: Vec<Column>,
    pub(crate) clusters: ClusterTree,
    pub(crate) tombstones: ClusterTree,
    pub(crate) next_key: i64,
    pub(crate) next_tag: u32,
    pub(crate) pk_col: Option<ColKey>,
}

/// The serialised part of a table's state; roots are stored as refs
/// alongside so the group destroy/commit machinery sees them.
#[derive(serde::Serialize, serde::Deserialize)]
struct TableMeta {
    name: String,
    embedded: bool,
    columns: Vec<Column>,
    next_key: i64,
    next_tag: u32,
    pk_col: Option<ColKey>,
}

impl Table {
    pub(crate) fn new(
        alloc: &mut SlabAlloc,
        key: TableKey,
        name: String,
        embedded: bool,
    ) -> Result<Table> {
        Ok(Table {
            key,
            name,
            embedded,
            columns: Vec::new(),
            clusters: ClusterTree::create(alloc, Vec::new())?,
            tombstones: ClusterTree::create(alloc, Vec::new())?,
            next_key: 0,
            next_tag: 1,
            pk_col: None,
        })
    }

    pub fn key(&self) -> TableKey {
        self.key
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Embedded tables' objects are owned by their single incoming link.
    pub fn is_embedded(&self) -> bool {
        self.embedded
    }

    pub fn size(&self, alloc: &SlabAlloc) -> usize {
        self.clusters.size(alloc)
    }

    pub fn tombstone_count(&self, alloc: &SlabAlloc) -> usize {
        self.tombstones.size(alloc)
    }

    pub fn primary_key_column(&self) -> Option<ColKey> {
        self.pk_col
    }

    /// All columns, hidden backlink columns included.
    pub fn all_columns(&self) -> &[Column] {
        &self.columns
    }

    /// The user-declared columns, in declaration order.
    pub fn public_columns(&self) -> impl Iterator<Item = &Column> {
        self.columns.iter().filter(|c| c.is_public())
    }

    pub fn column_keys(&self) -> Vec<ColKey> {
        self.public_columns().map(|c| c.key).collect()
    }

    pub fn column_by_name(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.is_public() && c.name == name)
    }

    pub fn column_meta(&self, col: ColKey) -> Result<&Column> {
        self.columns
            .iter()
            .find(|c| c.key == col)
            .ok_or(EmberError::IllegalCombination {
                detail: "column does not belong to this table",
            })
    }

    /// Declared target table of a link-bearing column.
    pub fn link_target(&self, col: ColKey) -> Result<TableKey> {
        self.column_meta(col)?
            .target_table
            .ok_or(EmberError::IllegalCombination {
                detail: "column has no link target",
            })
    }

    pub fn backlink_columns(&self) -> impl Iterator<Item = &Column> {
        self.columns.iter().filter(|c| c.is_backlink())
    }

    /// The hidden backlink column mirroring `(origin_table, origin_col)`,
    /// if it has been established.
    pub fn find_backlink_column(
        &self,
        origin_col: ColKey,
        origin_table: TableKey,
    ) -> Option<ColKey> {
        self.backlink_columns()
            .find(|c| c.origin_col == Some(origin_col) && c.target_table == Some(origin_table))
            .map(|c| c.key)
    }

    /// Keys of all live objects, in key order.
    pub fn object_keys(&self, alloc: &SlabAlloc) -> Vec<ObjKey> {
        self.clusters.keys(alloc)
    }

    pub fn is_valid(&self, alloc: &SlabAlloc, key: ObjKey) -> bool {
        self.tree_for(key).is_valid(alloc, key)
    }

    /// The tree a key resolves through: tombstones for unresolved keys,
    /// the live tree otherwise.
    pub(crate) fn tree_for(&self, key: ObjKey) -> &ClusterTree {
        if key.is_unresolved() {
            &self.tombstones
        } else {
            &self.clusters
        }
    }

    pub(crate) fn tree_for_mut(&mut self, key: ObjKey) -> &mut ClusterTree {
        if key.is_unresolved() {
            &mut self.tombstones
        } else {
            &mut self.clusters
        }
    }

    pub(crate) fn allocate_key(&mut self) -> ObjKey {
        let key = ObjKey::new(self.next_key);
        self.next_key += 1;
        key
    }

    /// Append a column to the schema and to every existing cluster of
    /// both trees. All column creation funnels through here.
    pub(crate) fn add_column_raw(
        &mut self,
        alloc: &mut SlabAlloc,
        name: String,
        col_type: ColumnType,
        attrs: ColumnAttrMask,
        target_table: Option<TableKey>,
        origin_col: Option<ColKey>,
    ) -> Result<ColKey> {
        if attrs.is_primary_key() && self.pk_col.is_some() {
            return Err(EmberError::IllegalCombination {
                detail: "table already has a primary key column",
            });
        }
        let idx = ColKeyIdx(self.columns.len() as u16);
        let key = ColKey::new(idx, col_type, attrs, self.next_tag);
        self.next_tag += 1;
        self.clusters.insert_column(alloc, key)?;
        self.tombstones.insert_column(alloc, key)?;
        self.columns.push(Column {
            key,
            name,
            target_table,
            origin_col,
        });
        if attrs.is_primary_key() {
            self.pk_col = Some(key);
        }
        Ok(key)
    }

    /// Persist the table into allocator memory; returns the table block
    /// ref for the group root.
    pub(crate) fn save(&self, alloc: &mut SlabAlloc) -> Result<Ref> {
        let meta = TableMeta {
            name: self.name.clone(),
            embedded: self.embedded,
            columns: self.columns.clone(),
            next_key: self.next_key,
            next_tag: self.next_tag,
            pk_col: self.pk_col,
        };
        let meta_bytes = serde_json::to_vec(&meta)
            .map_err(|e| EmberError::corrupt(format!("table meta encode: {e}")))?;
        let meta_blob = blob_create(alloc, &meta_bytes)?;
        let block = Array::create(
            alloc,
            ArraySpec {
                has_refs: true,
                ..ArraySpec::default()
            },
            3,
            0,
        )?;
        let block = Array::set(alloc, block, 0, self.clusters.root_ref().to_raw())?;
        let block = Array::set(alloc, block, 1, self.tombstones.root_ref().to_raw())?;
        Array::set(alloc, block, 2, meta_blob.to_raw())
    }

    /// Re-attach a table persisted by [`Table::save`].
    pub(crate) fn load(alloc: &SlabAlloc, key: TableKey, block: Ref) -> Result<Table> {
        let clusters_root = Ref::from_raw(Array::get(alloc, block, 0));
        let tombstones_root = Ref::from_raw(Array::get(alloc, block, 1));
        let meta_blob = Ref::from_raw(Array::get(alloc, block, 2));
        let meta: TableMeta = serde_json::from_slice(blob_bytes(alloc, meta_blob))
            .map_err(|e| EmberError::corrupt(format!("table meta decode: {e}")))?;
        let cols: Vec<ColKey> = meta.columns.iter().map(|c| c.key).collect();
        Ok(Table {
            key,
            name: meta.name,
            embedded: meta.embedded,
            columns: meta.columns,
            clusters: ClusterTree::from_ref(clusters_root, cols.clone()),
            tombstones: ClusterTree::from_ref(tombstones_root, cols),
            next_key: meta.next_key,
            next_tag: meta.next_tag,
            pk_col: meta.pk_col,
        })
    }
}

/// Attribute mask builders used by the public column-adding API.
pub(crate) fn value_attrs(nullable: bool, primary_key: bool) -> ColumnAttrMask {
    let mut attrs = ColumnAttrMask::EMPTY;
    if nullable {
        attrs = attrs.with(col_attr::NULLABLE);
    }
    if primary_key {
        attrs = attrs.with(col_attr::PRIMARY_KEY);
    }
    attrs
}
