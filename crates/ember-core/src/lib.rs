//! EmberDB storage core: tables, object accessors, link maintenance and
//! collections.
//!
//! The [`Group`] owns the allocator and the table registry and is the
//! write-serialisation boundary: a write transaction is exclusive `&mut
//! Group` access, a read snapshot is any `&Group`. [`Obj`] accessors are
//! cheap handles that re-resolve themselves when storage moves
//! underneath them. Every mutation that touches a cross-object reference
//! runs the backlink protocol and drives cascades to completion, so the
//! backlink symmetry and embedded-cardinality invariants hold at every
//! public API boundary.

pub mod compare;
pub mod dictionary;
pub mod group;
pub mod json;
pub mod list;
pub mod obj;
pub mod path;
pub mod replication;
pub mod schema;
pub mod table;
pub mod value;

pub use compare::{
    compare_groups, default_table_filter, CollectingReporter, DiffReporter, TracingReporter,
};
pub use dictionary::Dictionary;
pub use group::{Group, LinkType};
pub use list::{AnyList, LnkLst, Lst};
pub use obj::Obj;
pub use path::{FatPathElement, Path, PathElement};
pub use replication::{Instruction, InstructionLog, Replication};
pub use schema::Column;
pub use table::Table;
pub use value::ObjValue;

pub use ember_error::{EmberError, Result};
pub use ember_types::limits;
pub use ember_types::{
    ColKey, ColumnType, Decimal128, Mixed, ObjKey, ObjLink, ObjectId, TableKey, Timestamp,
};
