//! Column metadata.

use ember_types::{ColKey, TableKey};

/// One column of a table: the stable key plus the metadata the key does
/// not carry.
///
/// Backlink columns are hidden bookkeeping: `target_table` names the
/// origin table and `origin_col` the origin column they mirror. Link and
/// link-list columns record their declared target in `target_table`.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Column {
    pub key: ColKey,
    pub name: String,
    pub target_table: Option<TableKey>,
    pub origin_col: Option<ColKey>,
}

impl Column {
    pub fn is_backlink(&self) -> bool {
        self.key.col_type() == ember_types::ColumnType::Backlink
    }

    /// Public columns are the ones a schema owner declared; backlink
    /// columns never show up in user-facing iteration or comparison.
    pub fn is_public(&self) -> bool {
        !self.is_backlink()
    }
}
