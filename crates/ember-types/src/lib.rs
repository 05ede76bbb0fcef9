//! Key, column and value types shared across the EmberDB storage core.
//!
//! Everything here is a plain value type: cheap to copy (or clone, for the
//! owned payload carriers), hashable, orderable where the data model calls
//! for an order, and free of any reference back into storage. Accessors and
//! trees hold these by value and re-resolve storage locations through them.

pub mod decimal;
pub mod key;
pub mod limits;
pub mod mixed;
pub mod object_id;
pub mod schema;
pub mod timestamp;

pub use decimal::Decimal128;
pub use key::{ColKey, ColKeyIdx, ObjKey, ObjLink, TableKey};
pub use mixed::Mixed;
pub use object_id::ObjectId;
pub use schema::{ColumnAttrMask, ColumnType, col_attr};
pub use timestamp::Timestamp;
