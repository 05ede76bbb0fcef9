//! Structural comparison of two groups.
//!
//! Tables are matched by name (internal tables and caller-filtered names
//! excluded), objects by primary key where the table has one and by
//! object key otherwise, and values column by column. Link values
//! compare by target identity — primary key, never raw object key — and
//! links into embedded tables compare by full structural recursion.
//! Differences are reported with table and object prefixes.

use tracing::error;

use ember_error::Result;
use ember_types::{ColKey, ColumnType, Mixed, ObjLink};

use crate::group::Group;
use crate::obj::Obj;

/// Where difference descriptions go.
pub trait DiffReporter {
    fn report(&mut self, message: &str);
}

/// Reports through the `tracing` error level.
#[derive(Debug, Default)]
pub struct TracingReporter;

impl DiffReporter for TracingReporter {
    fn report(&mut self, message: &str) {
        error!(target: "ember_core::compare", "{message}");
    }
}

/// Collects messages, for tests and tooling.
#[derive(Debug, Default)]
pub struct CollectingReporter {
    pub messages: Vec<String>,
}

impl DiffReporter for CollectingReporter {
    fn report(&mut self, message: &str) {
        self.messages.push(message.to_owned());
    }
}

/// Internal bookkeeping tables excluded from comparison by default.
pub fn default_table_filter(name: &str) -> bool {
    !name.starts_with("pk") && !name.starts_with("metadata")
}

struct ColumnPair {
    name: String,
    col_1: ColKey,
    col_2: ColKey,
}

impl Group {
    /// Compare with the default filter, reporting diffs through tracing.
    pub fn compare(&self, other: &Group) -> Result<bool> {
        compare_groups(self, other, &default_table_filter, &mut TracingReporter)
    }
}

/// Recursively compare two groups. Returns true when no differences were
/// reported.
pub fn compare_groups(
    g1: &Group,
    g2: &Group,
    filter: &dyn Fn(&str) -> bool,
    reporter: &mut dyn DiffReporter,
) -> Result<bool> {
    let mut equal = true;

    let names_1 = table_names(g1, filter);
    let names_2 = table_names(g2, filter);
    for name in &names_1 {
        if !names_2.contains(name) {
            reporter.report(&format!("Table '{name}' not found in right-hand side"));
            equal = false;
        }
    }
    for name in &names_2 {
        if !names_1.contains(name) {
            reporter.report(&format!("Table '{name}' not found in left-hand side"));
            equal = false;
        }
    }

    for name in names_1.iter().filter(|n| names_2.contains(*n)) {
        if !compare_tables(g1, g2, name, reporter)? {
            equal = false;
        }
    }
    Ok(equal)
}

fn table_names(g: &Group, filter: &dyn Fn(&str) -> bool) -> Vec<String> {
    g.table_keys()
        .into_iter()
        .map(|k| g.tbl(k))
        .filter(|t| !t.is_embedded() && filter(t.name()))
        .map(|t| t.name().to_owned())
        .collect()
}

fn compare_tables(
    g1: &Group,
    g2: &Group,
    name: &str,
    reporter: &mut dyn DiffReporter,
) -> Result<bool> {
    let prefix = format!("Table[{name}]");
    let tk1 = g1.find_table(name).expect("caller matched names");
    let tk2 = g2.find_table(name).expect("caller matched names");
    let t1 = g1.tbl(tk1);
    let t2 = g2.tbl(tk2);

    let mut equal = true;
    let mut columns = Vec::new();
    for c1 in t1.public_columns() {
        let Some(c2) = t2.column_by_name(&c1.name) else {
            reporter.report(&format!(
                "{prefix}: column '{}' not found in right-hand side",
                c1.name
            ));
            equal = false;
            continue;
        };
        if c1.key.col_type() != c2.key.col_type() {
            reporter.report(&format!("{prefix}: type mismatch on column '{}'", c1.name));
            equal = false;
            continue;
        }
        if c1.key.is_nullable() != c2.key.is_nullable() {
            reporter.report(&format!(
                "{prefix}: nullability mismatch on column '{}'",
                c1.name
            ));
            equal = false;
            continue;
        }
        if c1.key.is_list() != c2.key.is_list()
            || c1.key.is_dictionary() != c2.key.is_dictionary()
        {
            reporter.report(&format!(
                "{prefix}: collection kind mismatch on column '{}'",
                c1.name
            ));
            equal = false;
            continue;
        }
        if c1.key.col_type() == ColumnType::Link {
            let target_1 = g1.tbl(t1.link_target(c1.key)?).name().to_owned();
            let target_2 = g2.tbl(t2.link_target(c2.key)?).name().to_owned();
            if target_1 != target_2 {
                reporter.report(&format!(
                    "{prefix}: link target mismatch on column '{}'",
                    c1.name
                ));
                equal = false;
                continue;
            }
        }
        columns.push(ColumnPair {
            name: c1.name.clone(),
            col_1: c1.key,
            col_2: c2.key,
        });
    }
    for c2 in t2.public_columns() {
        if t1.column_by_name(&c2.name).is_none() {
            reporter.report(&format!(
                "{prefix}: column '{}' not found in left-hand side",
                c2.name
            ));
            equal = false;
        }
    }
    if !equal {
        return Ok(false);
    }

    // Pair objects by primary key, or by object key without one.
    let pairs: Vec<(Obj, Obj, String)> = if let (Some(pk1), Some(_)) =
        (t1.primary_key_column(), t2.primary_key_column())
    {
        let mut out = Vec::new();
        for key in t1.object_keys(g1.alloc()) {
            let o1 = Obj::new(tk1, key);
            let pk = o1.get_any(g1, pk1)?;
            match find_by_pk(g2, tk2, &pk)? {
                Some(o2) => out.push((o1, o2, format!("{pk}"))),
                None => {
                    reporter.report(&format!(
                        "{prefix}: object {pk} not found in right-hand side"
                    ));
                    equal = false;
                }
            }
        }
        let t2_size = t2.size(g2.alloc());
        if t2_size != t1.size(g1.alloc()) && equal {
            reporter.report(&format!("{prefix}: row count mismatch"));
            equal = false;
        }
        out
    } else {
        let keys_1 = t1.object_keys(g1.alloc());
        let keys_2 = t2.object_keys(g2.alloc());
        if keys_1 != keys_2 {
            reporter.report(&format!("{prefix}: object keys differ"));
            return Ok(false);
        }
        keys_1
            .into_iter()
            .map(|k| (Obj::new(tk1, k), Obj::new(tk2, k), format!("{k}")))
            .collect()
    };

    for (o1, o2, oid) in pairs {
        if !compare_objects(g1, g2, &o1, &o2, &columns, &format!("{prefix} {oid}"), reporter)? {
            equal = false;
        }
    }
    Ok(equal)
}

fn find_by_pk(g: &Group, table: ember_types::TableKey, pk: &Mixed) -> Result<Option<Obj>> {
    let t = g.tbl(table);
    let pk_col = t.primary_key_column().expect("caller checked pk column");
    for key in t.object_keys(g.alloc()) {
        let obj = Obj::new(table, key);
        if obj.get_any(g, pk_col)? == *pk {
            return Ok(Some(obj));
        }
    }
    Ok(None)
}

fn compare_objects(
    g1: &Group,
    g2: &Group,
    o1: &Obj,
    o2: &Obj,
    columns: &[ColumnPair],
    prefix: &str,
    reporter: &mut dyn DiffReporter,
) -> Result<bool> {
    let mut equal = true;
    for pair in columns {
        if !compare_column(g1, g2, o1, o2, pair, prefix, reporter)? {
            equal = false;
        }
    }
    Ok(equal)
}

fn compare_column(
    g1: &Group,
    g2: &Group,
    o1: &Obj,
    o2: &Obj,
    pair: &ColumnPair,
    prefix: &str,
    reporter: &mut dyn DiffReporter,
) -> Result<bool> {
    let name = &pair.name;
    if pair.col_1.is_dictionary() {
        let mut e1 = o1.get_dictionary(pair.col_1).entries(g1)?;
        let mut e2 = o2.get_dictionary(pair.col_2).entries(g2)?;
        let sort_key = |(k, _): &(Mixed, Mixed)| format!("{k}");
        e1.sort_by_key(sort_key);
        e2.sort_by_key(sort_key);
        let keys_match = e1.len() == e2.len()
            && e1.iter().zip(&e2).all(|((k1, _), (k2, _))| k1 == k2);
        if !keys_match {
            reporter.report(&format!("{prefix}: dictionary keys differ in '{name}'"));
            return Ok(false);
        }
        for ((key, v1), (_, v2)) in e1.iter().zip(&e2) {
            if !values_equal(g1, g2, v1, v2)? {
                reporter.report(&format!(
                    "{prefix}: dictionary value mismatch in '{name}' at key {key}"
                ));
                return Ok(false);
            }
        }
        return Ok(true);
    }
    if pair.col_1.is_list() {
        if pair.col_1.col_type() == ColumnType::Link {
            let l1 = o1.get_linklist(pair.col_1);
            let l2 = o2.get_linklist(pair.col_2);
            if l1.size(g1)? != l2.size(g2)? {
                reporter.report(&format!("{prefix}: link list size mismatch in '{name}'"));
                return Ok(false);
            }
            let target_1 = g1.tbl(o1.table_key()).link_target(pair.col_1)?;
            let target_2 = g2.tbl(o2.table_key()).link_target(pair.col_2)?;
            for i in 0..l1.size(g1)? {
                let link_1 = ObjLink::new(target_1, l1.get(g1, i)?);
                let link_2 = ObjLink::new(target_2, l2.get(g2, i)?);
                if !links_equal(g1, g2, link_1, link_2, reporter)? {
                    reporter.report(&format!(
                        "{prefix}: link list mismatch in '{name}' at index {i}"
                    ));
                    return Ok(false);
                }
            }
            return Ok(true);
        }
        let l1 = o1.get_list_any(pair.col_1);
        let l2 = o2.get_list_any(pair.col_2);
        if l1.size(g1)? != l2.size(g2)? {
            reporter.report(&format!("{prefix}: list size mismatch in '{name}'"));
            return Ok(false);
        }
        for i in 0..l1.size(g1)? {
            if !values_equal(g1, g2, &l1.get(g1, i)?, &l2.get(g2, i)?)? {
                reporter.report(&format!(
                    "{prefix}: list mismatch in '{name}' at index {i}"
                ));
                return Ok(false);
            }
        }
        return Ok(true);
    }
    if pair.col_1.col_type() == ColumnType::Link {
        let target_1 = g1.tbl(o1.table_key()).link_target(pair.col_1)?;
        let target_2 = g2.tbl(o2.table_key()).link_target(pair.col_2)?;
        let link_1 = ObjLink::new(target_1, o1.get::<ember_types::ObjKey>(g1, pair.col_1)?);
        let link_2 = ObjLink::new(target_2, o2.get::<ember_types::ObjKey>(g2, pair.col_2)?);
        if !links_equal(g1, g2, link_1, link_2, reporter)? {
            reporter.report(&format!("{prefix}: link mismatch in '{name}'"));
            return Ok(false);
        }
        return Ok(true);
    }
    let v1 = o1.get_any(g1, pair.col_1)?;
    let v2 = o2.get_any(g2, pair.col_2)?;
    if !values_equal(g1, g2, &v1, &v2)? {
        reporter.report(&format!(
            "{prefix}: value mismatch in '{name}' ({v1} vs {v2})"
        ));
        return Ok(false);
    }
    Ok(true)
}

/// Value equality with link awareness: typed links compare by target
/// identity, everything else by value.
fn values_equal(g1: &Group, g2: &Group, v1: &Mixed, v2: &Mixed) -> Result<bool> {
    match (v1, v2) {
        (Mixed::TypedLink(l1), Mixed::TypedLink(l2)) => {
            links_equal(g1, g2, *l1, *l2, &mut NullReporter)
        }
        _ => Ok(v1 == v2),
    }
}

struct NullReporter;

impl DiffReporter for NullReporter {
    fn report(&mut self, _message: &str) {}
}

/// Link identity: table name plus primary key where available; embedded
/// targets compare structurally.
fn links_equal(
    g1: &Group,
    g2: &Group,
    link_1: ObjLink,
    link_2: ObjLink,
    reporter: &mut dyn DiffReporter,
) -> Result<bool> {
    if link_1.is_null() || link_2.is_null() {
        return Ok(link_1.is_null() == link_2.is_null());
    }
    let t1 = g1.tbl(link_1.table_key());
    let t2 = g2.tbl(link_2.table_key());
    if t1.name() != t2.name() {
        return Ok(false);
    }
    let o1 = Obj::new(link_1.table_key(), link_1.obj_key());
    let o2 = Obj::new(link_2.table_key(), link_2.obj_key());
    if t1.is_embedded() {
        let columns: Vec<ColumnPair> = t1
            .public_columns()
            .filter_map(|c1| {
                t2.column_by_name(&c1.name).map(|c2| ColumnPair {
                    name: c1.name.clone(),
                    col_1: c1.key,
                    col_2: c2.key,
                })
            })
            .collect();
        if columns.len() != t1.public_columns().count() {
            return Ok(false);
        }
        let prefix = format!("Embedded[{}]", t1.name());
        return compare_objects(g1, g2, &o1, &o2, &columns, &prefix, reporter);
    }
    match (t1.primary_key_column(), t2.primary_key_column()) {
        (Some(pk1), Some(pk2)) => Ok(o1.get_any(g1, pk1)? == o2.get_any(g2, pk2)?),
        _ => Ok(link_1.obj_key() == link_2.obj_key()),
    }
}
