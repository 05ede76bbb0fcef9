//! Bit-packed array leaves for the EmberDB storage core.
//!
//! A leaf is a self-describing block in allocator memory: an 8-byte
//! header (element width, flags, count, capacity) followed by bit-packed
//! payload. The [`core::Array`] module implements the integer substrate;
//! the typed leaf modules specialise it per column type; [`payload`]
//! funnels the closed set of leaves through one type-erased surface for
//! structural code.
//!
//! Mutating operations return the leaf's possibly-new ref: width
//! promotion, growth and copy-on-write all relocate blocks, and the owner
//! of a leaf must always store the returned ref back into its parent
//! slot.

pub mod backlink;
pub mod binary;
pub mod blob;
pub mod boolean;
pub mod core;
pub mod decimal;
pub mod float;
pub mod header;
pub mod int;
pub mod key;
pub mod mixed;
pub mod object_id;
pub mod payload;
pub mod string;
pub mod timestamp;
pub mod typed_link;

pub use crate::core::{is_ref_slot, tag_int, untag_int, Array, ArraySpec};
pub use backlink::ArrayBacklink;
pub use binary::ArrayBinary;
pub use blob::VarBlob;
pub use boolean::ArrayBool;
pub use decimal::ArrayDecimal;
pub use float::{ArrayDouble, ArrayFloat};
pub use header::{Header, HEADER_SIZE};
pub use int::{ArrayInt, ArrayIntNull};
pub use key::ArrayKey;
pub use mixed::ArrayMixed;
pub use object_id::ArrayObjectId;
pub use payload::{ArrayPayload, Payload};
pub use string::ArrayString;
pub use timestamp::ArrayTimestamp;
pub use typed_link::ArrayTypedLink;
