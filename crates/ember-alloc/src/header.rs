//! On-disk file header.
//!
//! The header occupies the first [`FILE_HEADER_SIZE`] bytes of the file and
//! carries two top-ref slots plus a selector byte. A commit writes the new
//! top ref into the inactive slot, syncs, then flips the selector with a
//! single byte write, so a crash at any point leaves one valid root.

use ember_error::{EmberError, Result};

use crate::Ref;

/// Magic prefix identifying an EmberDB file.
pub const FILE_MAGIC: [u8; 8] = *b"emberdb\0";

/// Current file format version.
pub const FILE_FORMAT_VERSION: u8 = 1;

/// Size of the file header in bytes. Refs never point below this.
pub const FILE_HEADER_SIZE: u64 = 32;

/// Decoded view of the file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHeader {
    pub top_refs: [Ref; 2],
    pub format_version: u8,
    /// Which of `top_refs` is current (0 or 1).
    pub selector: u8,
}

impl FileHeader {
    pub fn new_empty() -> FileHeader {
        FileHeader {
            top_refs: [Ref::NULL, Ref::NULL],
            format_version: FILE_FORMAT_VERSION,
            selector: 0,
        }
    }

    pub fn current_top_ref(&self) -> Ref {
        self.top_refs[usize::from(self.selector & 1)]
    }

    pub fn encode(&self) -> [u8; FILE_HEADER_SIZE as usize] {
        let mut out = [0u8; FILE_HEADER_SIZE as usize];
        out[..8].copy_from_slice(&FILE_MAGIC);
        out[8..16].copy_from_slice(&self.top_refs[0].offset().to_le_bytes());
        out[16..24].copy_from_slice(&self.top_refs[1].offset().to_le_bytes());
        out[24] = self.format_version;
        out[25] = self.selector & 1;
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<FileHeader> {
        if bytes.len() < FILE_HEADER_SIZE as usize {
            return Err(EmberError::corrupt("file too small for header"));
        }
        if bytes[..8] != FILE_MAGIC {
            return Err(EmberError::corrupt("bad file magic"));
        }
        let format_version = bytes[24];
        if format_version != FILE_FORMAT_VERSION {
            return Err(EmberError::corrupt(format!(
                "unsupported file format version {format_version}"
            )));
        }
        let slot_a = u64::from_le_bytes(bytes[8..16].try_into().unwrap());
        let slot_b = u64::from_le_bytes(bytes[16..24].try_into().unwrap());
        if slot_a % 8 != 0 || slot_b % 8 != 0 {
            return Err(EmberError::corrupt("misaligned top ref"));
        }
        Ok(FileHeader {
            top_refs: [Ref::new(slot_a), Ref::new(slot_b)],
            format_version,
            selector: bytes[25] & 1,
        })
    }

    /// The slot a commit should write into, and the selector value that
    /// makes it current afterwards.
    pub fn next_slot(&self) -> (usize, u8) {
        let next = (self.selector & 1) ^ 1;
        (usize::from(next), next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_round_trip() {
        let mut hdr = FileHeader::new_empty();
        hdr.top_refs[1] = Ref::new(4096);
        hdr.selector = 1;
        let decoded = FileHeader::decode(&hdr.encode()).unwrap();
        assert_eq!(decoded, hdr);
        assert_eq!(decoded.current_top_ref(), Ref::new(4096));
    }

    #[test]
    fn test_slot_flip_alternates() {
        let hdr = FileHeader::new_empty();
        let (slot, sel) = hdr.next_slot();
        assert_eq!((slot, sel), (1, 1));
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut bytes = FileHeader::new_empty().encode();
        bytes[0] = b'x';
        assert!(FileHeader::decode(&bytes).is_err());
    }
}
