//! The slab allocator.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;

use memmap2::Mmap;
use tracing::{debug, trace};

use ember_error::{EmberError, Result};

use crate::header::{FileHeader, FILE_HEADER_SIZE};
use crate::Ref;

/// Committed bytes live either in an anonymous heap image (ephemeral
/// groups) or in a memory-mapped file.
enum Backing {
    Memory(Vec<u8>),
    File { file: File, map: Mmap },
}

/// Owns the backing store and hands out stable [`Ref`]s.
///
/// The committed region `[0, baseline)` is immutable; everything at or
/// above `baseline` is the current transaction's slab and writable. See
/// the crate docs for the versioning contract.
pub struct SlabAlloc {
    backing: Backing,
    header: FileHeader,
    /// First offset above the committed image. Slab offsets start here.
    baseline: u64,
    /// In-transaction allocations, logically at `[baseline, baseline + len)`.
    slab: Vec<u8>,
    /// Live slab blocks: ref offset -> block size.
    allocations: BTreeMap<u64, usize>,
    /// Freed slab ranges available for reuse: (offset, size).
    free_list: Vec<(u64, usize)>,
    top_ref: Ref,
    storage_version: u64,
    content_version: u64,
    capacity_limit: Option<u64>,
}

fn round_up8(n: usize) -> usize {
    (n + 7) & !7
}

impl SlabAlloc {
    /// An ephemeral allocator with no file behind it. Commits move slab
    /// data into the in-memory committed image, so snapshot and
    /// read-only semantics are identical to the file-backed form.
    pub fn new_memory() -> SlabAlloc {
        let header = FileHeader::new_empty();
        let mut image = vec![0u8; FILE_HEADER_SIZE as usize];
        image.copy_from_slice(&header.encode());
        SlabAlloc {
            backing: Backing::Memory(image),
            header,
            baseline: FILE_HEADER_SIZE,
            slab: Vec::new(),
            allocations: BTreeMap::new(),
            free_list: Vec::new(),
            top_ref: Ref::NULL,
            storage_version: 1,
            content_version: 1,
            capacity_limit: None,
        }
    }

    /// Open or create a database file and map its committed region.
    pub fn open(path: &Path) -> Result<SlabAlloc> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        let len = file.metadata()?.len();
        let header = if len == 0 {
            let header = FileHeader::new_empty();
            file.write_all(&header.encode())?;
            file.sync_data()?;
            header
        } else {
            let probe = {
                // Map once just to decode the header; remapped below.
                let map = unsafe { Mmap::map(&file)? };
                FileHeader::decode(&map)?
            };
            probe
        };
        let map = unsafe { Mmap::map(&file)? };
        let baseline = map.len() as u64;
        debug_assert!(baseline >= FILE_HEADER_SIZE);
        let top_ref = header.current_top_ref();
        debug!(path = %path.display(), baseline, top = %top_ref, "attached file");
        Ok(SlabAlloc {
            backing: Backing::File { file, map },
            header,
            baseline,
            slab: Vec::new(),
            allocations: BTreeMap::new(),
            free_list: Vec::new(),
            top_ref,
            storage_version: 1,
            content_version: 1,
            capacity_limit: None,
        })
    }

    /// Root ref of the last committed group state.
    pub fn top_ref(&self) -> Ref {
        self.top_ref
    }

    /// Cap the total backing size. Allocations beyond the cap fail with
    /// [`EmberError::OutOfSpace`], which is recoverable by aborting.
    pub fn set_capacity_limit(&mut self, limit: Option<u64>) {
        self.capacity_limit = limit;
    }

    pub fn storage_version(&self) -> u64 {
        self.storage_version
    }

    pub fn content_version(&self) -> u64 {
        self.content_version
    }

    pub fn bump_storage_version(&mut self) {
        self.storage_version += 1;
    }

    pub fn bump_content_version(&mut self) {
        self.content_version += 1;
    }

    /// True if the block at `r` is part of the committed image and must be
    /// copied before mutation.
    pub fn is_read_only(&self, r: Ref) -> bool {
        r.offset() < self.baseline
    }

    fn committed_bytes(&self) -> &[u8] {
        match &self.backing {
            Backing::Memory(image) => image,
            Backing::File { map, .. } => map,
        }
    }

    /// Resolve a ref to the bytes of its region.
    ///
    /// For committed refs the slice runs to the end of the committed
    /// image; for slab refs it covers exactly the allocated block. The
    /// caller reads the block header to learn the block's true extent.
    ///
    /// # Panics
    ///
    /// On a null ref or a ref that does not address a live block; both
    /// indicate structural corruption and are not recoverable.
    pub fn translate(&self, r: Ref) -> &[u8] {
        assert!(!r.is_null(), "translate of null ref");
        let off = r.offset();
        if off < self.baseline {
            &self.committed_bytes()[off as usize..]
        } else {
            let size = *self
                .allocations
                .get(&off)
                .expect("translate of dangling slab ref");
            let start = (off - self.baseline) as usize;
            &self.slab[start..start + size]
        }
    }

    /// Resolve a writable ref to its block's bytes.
    ///
    /// # Panics
    ///
    /// If the ref is read-only (the caller skipped copy-on-write) or does
    /// not address a live slab block.
    pub fn translate_mut(&mut self, r: Ref) -> &mut [u8] {
        assert!(
            !self.is_read_only(r),
            "translate_mut of read-only ref {r}"
        );
        let off = r.offset();
        let size = *self
            .allocations
            .get(&off)
            .expect("translate_mut of dangling slab ref");
        let start = (off - self.baseline) as usize;
        &mut self.slab[start..start + size]
    }

    /// Allocate a zero-filled writable block of at least `size` bytes.
    pub fn alloc(&mut self, size: usize) -> Result<Ref> {
        let size = round_up8(size.max(8));
        if let Some(limit) = self.capacity_limit {
            let in_use = self.baseline + self.slab.len() as u64;
            if in_use + size as u64 > limit {
                return Err(EmberError::OutOfSpace);
            }
        }
        // First-fit reuse of freed slab space.
        if let Some(pos) = self.free_list.iter().position(|&(_, sz)| sz >= size) {
            let (off, sz) = self.free_list.swap_remove(pos);
            if sz > size {
                self.free_list.push((off + size as u64, sz - size));
            }
            let start = (off - self.baseline) as usize;
            self.slab[start..start + size].fill(0);
            self.allocations.insert(off, size);
            trace!(r = %Ref::new(off), size, "alloc (reused)");
            return Ok(Ref::new(off));
        }
        let off = self.baseline + self.slab.len() as u64;
        self.slab.resize(self.slab.len() + size, 0);
        self.allocations.insert(off, size);
        trace!(r = %Ref::new(off), size, "alloc");
        Ok(Ref::new(off))
    }

    /// Release a block. Slab blocks become reusable immediately;
    /// committed blocks stay in the file until compaction (out of scope
    /// here) and are merely forgotten.
    pub fn free(&mut self, r: Ref) {
        if r.is_null() || self.is_read_only(r) {
            return;
        }
        let off = r.offset();
        if let Some(size) = self.allocations.remove(&off) {
            self.free_list.push((off, size));
            trace!(r = %r, size, "free");
        } else {
            debug_assert!(false, "double free of {r}");
        }
    }

    /// Move a block to a fresh writable allocation of `new_size` bytes,
    /// copying `min(old_size, new_size)` bytes of payload. The old block
    /// is freed (if it was writable) and the storage version advances, as
    /// the block has been relocated.
    pub fn realloc(&mut self, r: Ref, old_size: usize, new_size: usize) -> Result<Ref> {
        let new_ref = self.alloc(new_size)?;
        let n = old_size.min(new_size);
        if n > 0 {
            // The fresh block cannot alias the old one: reuse candidates
            // came off the free list, which never contains live blocks.
            let src: Vec<u8> = self.translate(r)[..n].to_vec();
            self.translate_mut(new_ref)[..n].copy_from_slice(&src);
        }
        self.free(r);
        self.bump_storage_version();
        Ok(new_ref)
    }

    /// Append the transaction's slab to the backing store, atomically
    /// swap the header's top ref, and advance the read-only baseline.
    /// After return every previously writable ref is read-only and both
    /// version counters have advanced.
    pub fn commit(&mut self, top_ref: Ref) -> Result<()> {
        let slab_len = self.slab.len();
        match &mut self.backing {
            Backing::Memory(image) => {
                image.extend_from_slice(&self.slab);
            }
            Backing::File { file, map } => {
                file.seek(SeekFrom::Start(self.baseline))?;
                file.write_all(&self.slab)?;
                file.sync_data()?;
                let _ = map; // remapped below, after the header flip
            }
        }
        let (slot, selector) = self.header.next_slot();
        self.header.top_refs[slot] = top_ref;
        self.header.selector = selector;
        match &mut self.backing {
            Backing::Memory(image) => {
                image[..FILE_HEADER_SIZE as usize].copy_from_slice(&self.header.encode());
            }
            Backing::File { file, .. } => {
                // Two ordered writes: new root into the inactive slot,
                // sync, then the one-byte selector flip, sync.
                file.seek(SeekFrom::Start(8 + 8 * slot as u64))?;
                file.write_all(&self.header.top_refs[slot].offset().to_le_bytes())?;
                file.sync_data()?;
                file.seek(SeekFrom::Start(25))?;
                file.write_all(&[selector])?;
                file.sync_data()?;
            }
        }
        if let Backing::File { file, map } = &mut self.backing {
            *map = unsafe { Mmap::map(&*file)? };
        }
        self.baseline += slab_len as u64;
        self.slab.clear();
        self.allocations.clear();
        self.free_list.clear();
        self.top_ref = top_ref;
        self.bump_storage_version();
        self.bump_content_version();
        debug!(baseline = self.baseline, top = %top_ref, "commit");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_translate_round_trip() {
        let mut alloc = SlabAlloc::new_memory();
        let r = alloc.alloc(16).unwrap();
        assert!(!alloc.is_read_only(r));
        alloc.translate_mut(r)[..4].copy_from_slice(&[1, 2, 3, 4]);
        assert_eq!(&alloc.translate(r)[..4], &[1, 2, 3, 4]);
    }

    #[test]
    fn test_alloc_is_aligned_and_zeroed() {
        let mut alloc = SlabAlloc::new_memory();
        let a = alloc.alloc(3).unwrap();
        let b = alloc.alloc(9).unwrap();
        assert_eq!(a.offset() % 8, 0);
        assert_eq!(b.offset() % 8, 0);
        assert_eq!(b.offset() - a.offset(), 8);
        assert!(alloc.translate(b).iter().all(|&x| x == 0));
    }

    #[test]
    fn test_free_then_alloc_reuses_space() {
        let mut alloc = SlabAlloc::new_memory();
        let a = alloc.alloc(32).unwrap();
        alloc.translate_mut(a).fill(0xAA);
        alloc.free(a);
        let b = alloc.alloc(16).unwrap();
        assert_eq!(b, a);
        assert!(alloc.translate(b).iter().all(|&x| x == 0));
    }

    #[test]
    fn test_commit_makes_refs_read_only() {
        let mut alloc = SlabAlloc::new_memory();
        let r = alloc.alloc(8).unwrap();
        alloc.translate_mut(r).copy_from_slice(&7i64.to_le_bytes());
        let v0 = alloc.storage_version();
        alloc.commit(r).unwrap();
        assert!(alloc.is_read_only(r));
        assert!(alloc.storage_version() > v0);
        assert_eq!(alloc.top_ref(), r);
        assert_eq!(&alloc.translate(r)[..8], &7i64.to_le_bytes());
    }

    #[test]
    fn test_capacity_limit_is_recoverable() {
        let mut alloc = SlabAlloc::new_memory();
        alloc.set_capacity_limit(Some(64));
        assert!(alloc.alloc(16).is_ok());
        let err = alloc.alloc(4096).unwrap_err();
        assert!(matches!(err, EmberError::OutOfSpace));
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_realloc_copies_and_bumps_storage_version() {
        let mut alloc = SlabAlloc::new_memory();
        let r = alloc.alloc(8).unwrap();
        alloc.translate_mut(r).copy_from_slice(&[9; 8]);
        let v0 = alloc.storage_version();
        let r2 = alloc.realloc(r, 8, 24).unwrap();
        assert_ne!(r, r2);
        assert_eq!(&alloc.translate(r2)[..8], &[9; 8]);
        assert!(alloc.storage_version() > v0);
    }

    #[test]
    fn test_file_reopen_preserves_top_ref_and_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.ember");
        let r;
        {
            let mut alloc = SlabAlloc::open(&path).unwrap();
            r = alloc.alloc(16).unwrap();
            alloc.translate_mut(r)[..8].copy_from_slice(b"persist!");
            alloc.commit(r).unwrap();
        }
        let alloc = SlabAlloc::open(&path).unwrap();
        assert_eq!(alloc.top_ref(), r);
        assert!(alloc.is_read_only(r));
        assert_eq!(&alloc.translate(r)[..8], b"persist!");
    }
}
