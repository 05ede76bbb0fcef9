//! The 8-byte self-describing block header.
//!
//! Every block addressable by a ref starts with this header. Layout:
//!
//! ```text
//! byte 0      low nibble: width index into {0,1,2,4,8,16,32,64} bits
//!             high nibble: flags (has_refs, context, inner B+-tree node)
//! bytes 1..4  element count, little-endian u24
//! bytes 4..8  total block capacity in bytes (header included), u32
//! ```

use ember_error::{EmberError, Result};

/// Element widths in bits, indexed by the header's width field.
pub const WIDTHS: [u8; 8] = [0, 1, 2, 4, 8, 16, 32, 64];

pub const HEADER_SIZE: usize = 8;

const FLAG_HAS_REFS: u8 = 0x10;
const FLAG_CONTEXT: u8 = 0x20;
const FLAG_INNER_BPTREE: u8 = 0x40;

const MAX_SIZE: u32 = 0x00FF_FFFF;

/// Decoded block header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Index into [`WIDTHS`].
    pub width_index: u8,
    /// Slots hold child refs (even) or tagged 63-bit ints (odd).
    pub has_refs: bool,
    /// Spare flag; leaf types use it to mark alternative encodings.
    pub context: bool,
    /// Interior node of a B+-tree.
    pub inner_bptree: bool,
    /// Element count.
    pub size: u32,
    /// Total block size in bytes, header included.
    pub capacity: u32,
}

impl Header {
    pub fn width_bits(&self) -> u8 {
        WIDTHS[usize::from(self.width_index & 7)]
    }

    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        debug_assert!(self.size <= MAX_SIZE);
        let mut flags = self.width_index & 0x0F;
        if self.has_refs {
            flags |= FLAG_HAS_REFS;
        }
        if self.context {
            flags |= FLAG_CONTEXT;
        }
        if self.inner_bptree {
            flags |= FLAG_INNER_BPTREE;
        }
        let mut out = [0u8; HEADER_SIZE];
        out[0] = flags;
        out[1..4].copy_from_slice(&self.size.to_le_bytes()[..3]);
        out[4..8].copy_from_slice(&self.capacity.to_le_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Header> {
        if bytes.len() < HEADER_SIZE {
            return Err(EmberError::corrupt("block too small for header"));
        }
        let flags = bytes[0];
        let width_index = flags & 0x0F;
        if width_index >= 8 {
            return Err(EmberError::corrupt("bad width index in block header"));
        }
        let size = u32::from_le_bytes([bytes[1], bytes[2], bytes[3], 0]);
        let capacity = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
        Ok(Header {
            width_index,
            has_refs: flags & FLAG_HAS_REFS != 0,
            context: flags & FLAG_CONTEXT != 0,
            inner_bptree: flags & FLAG_INNER_BPTREE != 0,
            size,
            capacity,
        })
    }
}

/// Payload bytes needed to hold `count` elements of `width` bits, rounded
/// up to the 8-byte block granularity.
pub fn payload_bytes(width_bits: u8, count: usize) -> usize {
    let bits = usize::from(width_bits) * count;
    let bytes = bits.div_ceil(8);
    (bytes + 7) & !7
}

/// Smallest width index whose width can represent `value`.
///
/// Widths below 8 bits are unsigned; any negative value needs at least a
/// full signed byte.
pub fn width_index_for(value: i64) -> u8 {
    match value {
        0 => 0,
        1 => 1,
        2..=3 => 2,
        4..=15 => 3,
        -128..=127 => 4,
        -32768..=32767 => 5,
        -2147483648..=2147483647 => 6,
        _ => 7,
    }
}
