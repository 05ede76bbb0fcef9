//! JSON export.
//!
//! Objects export as JSON objects keyed by column name, with `_key`
//! carrying the row key. Link columns follow `link_depth`: at depth zero
//! a non-embedded target prints as a `{table, key}` reference, deeper
//! values recurse with the depth decremented. Embedded targets always
//! recurse, since a reference to them has no meaning outside their
//! owner. Binary payloads encode as base64.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::{json, Map, Value};

use ember_error::Result;
use ember_types::{ColumnType, Mixed};

use crate::group::Group;
use crate::obj::Obj;

/// Column renames applied on export: `(stored name, exported name)`.
pub type Renames = [(String, String)];

fn rename(name: &str, renames: &Renames) -> String {
    renames
        .iter()
        .find(|(from, _)| from == name)
        .map(|(_, to)| to.clone())
        .unwrap_or_else(|| name.to_owned())
}

fn mixed_to_json(value: &Mixed) -> Value {
    match value {
        Mixed::Null => Value::Null,
        Mixed::Int(v) => json!(v),
        Mixed::Bool(v) => json!(v),
        Mixed::Float(v) => json!(v),
        Mixed::Double(v) => json!(v),
        Mixed::String(v) => json!(v),
        Mixed::Binary(v) => json!(STANDARD.encode(v)),
        Mixed::Timestamp(v) => json!(v.to_string()),
        Mixed::Decimal(v) => json!(v.to_string()),
        Mixed::ObjectId(v) => json!(v.to_string()),
        Mixed::Link(v) => json!(v.value()),
        Mixed::TypedLink(v) => json!(v.to_string()),
    }
}

impl Obj {
    /// Export this object. See the module docs for link handling.
    pub fn to_json(&self, g: &Group, link_depth: usize, renames: &Renames) -> Result<Value> {
        let mut out = Map::new();
        out.insert(
            rename("_key", renames),
            json!(self.key().value()),
        );
        let cols: Vec<_> = g
            .tbl(self.table_key())
            .public_columns()
            .map(|c| (c.key, c.name.clone()))
            .collect();
        for (col, name) in cols {
            let name = rename(&name, renames);
            let value = if col.is_dictionary() {
                let mut dict_out = Map::new();
                for (k, v) in self.get_dictionary(col).entries(g)? {
                    dict_out.insert(k.to_string(), mixed_to_json(&v));
                }
                Value::Object(dict_out)
            } else if col.is_list() {
                if col.col_type() == ColumnType::Link {
                    self.linklist_to_json(g, col, link_depth, renames)?
                } else {
                    let list = self.get_list_any(col);
                    let mut items = Vec::with_capacity(list.size(g)?);
                    for i in 0..list.size(g)? {
                        items.push(mixed_to_json(&list.get(g, i)?));
                    }
                    Value::Array(items)
                }
            } else if col.col_type() == ColumnType::Link {
                self.link_to_json(g, col, link_depth, renames)?
            } else {
                mixed_to_json(&self.get_any(g, col)?)
            };
            out.insert(name, value);
        }
        Ok(Value::Object(out))
    }

    fn link_to_json(
        &self,
        g: &Group,
        col: ember_types::ColKey,
        link_depth: usize,
        renames: &Renames,
    ) -> Result<Value> {
        let Some(target) = self.get_linked_object(g, col)? else {
            return Ok(Value::Null);
        };
        let target_table = g.tbl(target.table_key());
        if target_table.is_embedded() || link_depth > 0 {
            let next = if target_table.is_embedded() {
                link_depth
            } else {
                link_depth - 1
            };
            target.to_json(g, next, renames)
        } else {
            Ok(json!({
                "table": target_table.name(),
                "key": target.key().value(),
            }))
        }
    }

    fn linklist_to_json(
        &self,
        g: &Group,
        col: ember_types::ColKey,
        link_depth: usize,
        renames: &Renames,
    ) -> Result<Value> {
        let list = self.get_linklist(col);
        let target_key = g.tbl(self.table_key()).link_target(col)?;
        let target_table = g.tbl(target_key);
        if target_table.is_embedded() || link_depth > 0 {
            let next = if target_table.is_embedded() {
                link_depth
            } else {
                link_depth - 1
            };
            let mut items = Vec::with_capacity(list.size(g)?);
            for i in 0..list.size(g)? {
                items.push(list.get_object(g, i)?.to_json(g, next, renames)?);
            }
            Ok(Value::Array(items))
        } else {
            let mut keys = Vec::with_capacity(list.size(g)?);
            for i in 0..list.size(g)? {
                keys.push(json!(list.get(g, i)?.value()));
            }
            Ok(json!({
                "table": target_table.name(),
                "keys": keys,
            }))
        }
    }

    /// One-shot JSON string at depth zero.
    pub fn to_json_string(&self, g: &Group) -> Result<String> {
        let value = self.to_json(g, 0, &[])?;
        serde_json::to_string(&value)
            .map_err(|e| ember_error::EmberError::corrupt(format!("json encode: {e}")))
    }
}

impl Group {
    /// Export every public table as `{table name: [objects...]}`.
    pub fn to_json(&self) -> Result<Value> {
        let mut out = Map::new();
        for table_key in self.table_keys() {
            let table = self.tbl(table_key);
            let mut objects = Vec::with_capacity(table.size(self.alloc()));
            for key in table.object_keys(self.alloc()) {
                let obj = self.get_object(ember_types::ObjLink::new(table_key, key))?;
                objects.push(obj.to_json(self, 0, &[])?);
            }
            out.insert(table.name().to_owned(), Value::Array(objects));
        }
        Ok(Value::Object(out))
    }
}
