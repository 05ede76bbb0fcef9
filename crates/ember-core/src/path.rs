//! Paths from embedded objects up to their top-level owner.

use std::cell::RefCell;

use ember_error::{EmberError, Result};
use ember_types::{ColKey, ObjKey, TableKey};

use crate::group::Group;
use crate::obj::Obj;

/// One hop on the way down from the top-level owner: the column holding
/// the owning link, and the index within it for link lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathElement {
    pub col: ColKey,
    pub index: usize,
}

/// The slim path: top-level identity plus the hops from the top.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Path {
    pub top_table: TableKey,
    pub top_key: ObjKey,
    pub from_top: Vec<PathElement>,
}

/// A hop carrying a live accessor for the owning object.
#[derive(Debug, Clone)]
pub struct FatPathElement {
    pub obj: Obj,
    pub col: ColKey,
    pub index: usize,
}

impl Obj {
    /// For an embedded object, walk the chain of single owners up to the
    /// top-level object. The sizer is called once with the path length,
    /// then the visitor once per hop starting from the top. A top-level
    /// object has an empty path.
    pub fn traverse_path(
        &self,
        g: &Group,
        visitor: &mut dyn FnMut(&Obj, ColKey, usize),
        sizer: &mut dyn FnMut(usize),
    ) -> Result<()> {
        self.traverse_path_at(g, visitor, sizer, 0)
    }

    fn traverse_path_at(
        &self,
        g: &Group,
        visitor: &mut dyn FnMut(&Obj, ColKey, usize),
        sizer: &mut dyn FnMut(usize),
        depth: usize,
    ) -> Result<()> {
        if !g.tbl(self.table_key()).is_embedded() {
            sizer(depth);
            return Ok(());
        }
        debug_assert_eq!(self.get_total_backlink_count(g)?, 1);
        let backlink_cols: Vec<(ColKey, TableKey, ColKey)> = g
            .tbl(self.table_key())
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
            let origins = self.get_all_backlinks(g, bc)?;
            if origins.len() != 1 {
                continue;
            }
            let owner = g.get_object(ember_types::ObjLink::new(origin_table, origins[0]))?;
            let index = if origin_col.is_list() {
                owner
                    .get_linklist(origin_col)
                    .find_first(g, self.key())?
                    .ok_or_else(|| EmberError::corrupt("owning link missing from list"))?
            } else {
                0
            };
            owner.traverse_path_at(g, visitor, sizer, depth + 1)?;
            visitor(&owner, origin_col, index);
            return Ok(());
        }
        Err(EmberError::corrupt("embedded object without owner"))
    }

    /// The path in its minimal form.
    pub fn get_path(&self, g: &Group) -> Result<Path> {
        let result = RefCell::new(Path {
            top_table: self.table_key(),
            top_key: self.key(),
            from_top: Vec::new(),
        });
        let top_seen = RefCell::new(false);
        self.traverse_path(
            g,
            &mut |obj, col, index| {
                let mut top_seen = top_seen.borrow_mut();
                if !*top_seen {
                    *top_seen = true;
                    let mut result = result.borrow_mut();
                    result.top_table = obj.table_key();
                    result.top_key = obj.key();
                }
                result.borrow_mut().from_top.push(PathElement { col, index });
            },
            &mut |size| result.borrow_mut().from_top.reserve(size),
        )?;
        Ok(result.into_inner())
    }

    /// The path with an accessor per hop. Empty for top-level objects.
    pub fn get_fat_path(&self, g: &Group) -> Result<Vec<FatPathElement>> {
        let result: RefCell<Vec<FatPathElement>> = RefCell::new(Vec::new());
        self.traverse_path(
            g,
            &mut |obj, col, index| {
                result.borrow_mut().push(FatPathElement {
                    obj: obj.clone(),
                    col,
                    index,
                });
            },
            &mut |size| result.borrow_mut().reserve(size),
        )?;
        Ok(result.into_inner())
    }
}
