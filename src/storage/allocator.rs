//! Bitmap block allocator with upward-only growth.

use crate::error::{Error, Result};
use crate::storage::block_store::BlockStore;
use bitvec::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// A contiguous run of blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extent {
    /// First block of the run.
    pub start: u32,
    /// Number of blocks in the run.
    pub len: u32,
}

impl Extent {
    pub fn new(start: u32, len: u32) -> Self {
        Self { start, len }
    }

    /// Block numbers covered by this extent, in order.
    pub fn blocks(&self) -> impl Iterator<Item = u32> {
        self.start..self.start + self.len
    }

    /// One past the last block.
    pub fn end(&self) -> u32 {
        self.start + self.len
    }
}

/// Tracks used blocks, one bit per block (set = allocated).
///
/// The bitmap is sized for `max_blocks` so growth never has to move it.
/// Bits at or past `total_blocks` stay clear.
#[derive(Debug, Clone)]
pub struct Allocator {
    bitmap: BitVec<u8, Lsb0>,
    total_blocks: u32,
    max_blocks: u32,
    free_blocks: u32,
}

impl Allocator {
    /// Fresh allocator with every block free.
    pub fn new(total_blocks: u32, max_blocks: u32, bitmap_bytes: usize) -> Self {
        Self {
            bitmap: bitvec![u8, Lsb0; 0; bitmap_bytes * 8],
            total_blocks,
            max_blocks,
            free_blocks: total_blocks,
        }
    }

    /// Rebuild from the on-disk bitmap region.
    ///
    /// `stored_free` is the superblock's counter; a disagreement with the
    /// bitmap is repaired from the bitmap and logged.
    pub fn load(bytes: &[u8], total_blocks: u32, max_blocks: u32, stored_free: u32) -> Result<Self> {
        let bitmap = BitVec::<u8, Lsb0>::from_slice(bytes);
        if bitmap.len() < max_blocks as usize {
            return Err(Error::Corrupt(format!(
                "bitmap covers {} blocks, volume allows {}",
                bitmap.len(),
                max_blocks
            )));
        }
        if bitmap[total_blocks as usize..].any() {
            return Err(Error::Corrupt(
                "bitmap marks blocks past the end of the volume".to_string(),
            ));
        }

        let used = bitmap[..total_blocks as usize].count_ones() as u32;
        let free_blocks = total_blocks - used;
        if free_blocks != stored_free {
            warn!(
                stored = stored_free,
                actual = free_blocks,
                "free block count disagrees with bitmap, using bitmap"
            );
        }

        Ok(Self {
            bitmap,
            total_blocks,
            max_blocks,
            free_blocks,
        })
    }

    /// Bitmap bytes as persisted.
    pub fn as_bytes(&self) -> &[u8] {
        self.bitmap.as_raw_slice()
    }

    pub fn total_blocks(&self) -> u32 {
        self.total_blocks
    }

    pub fn free_blocks(&self) -> u32 {
        self.free_blocks
    }

    pub fn max_blocks(&self) -> u32 {
        self.max_blocks
    }

    /// Number of set bits below the end of the volume.
    pub fn used_blocks(&self) -> u32 {
        self.bitmap[..self.total_blocks as usize].count_ones() as u32
    }

    pub fn is_allocated(&self, block: u32) -> bool {
        block < self.total_blocks && self.bitmap[block as usize]
    }

    fn check_range(&self, block: u32) -> Result<()> {
        if block >= self.total_blocks {
            return Err(Error::OutOfRange {
                block,
                total: self.total_blocks,
            });
        }
        Ok(())
    }

    /// Mark a specific block used. Used for metadata regions and rollback.
    pub fn claim(&mut self, block: u32) -> Result<()> {
        self.check_range(block)?;
        if !self.bitmap[block as usize] {
            self.bitmap.set(block as usize, true);
            self.free_blocks -= 1;
        }
        Ok(())
    }

    /// Allocate the lowest free block.
    pub fn allocate(&mut self, store: &mut BlockStore) -> Result<u32> {
        self.ensure_free(1, store)?;
        let block = self.bitmap[..self.total_blocks as usize]
            .first_zero()
            .ok_or_else(|| Error::Corrupt("free count says space, bitmap disagrees".to_string()))?
            as u32;
        self.bitmap.set(block as usize, true);
        self.free_blocks -= 1;
        Ok(block)
    }

    /// Allocate `count` blocks.
    ///
    /// Prefers the first single run long enough; otherwise gathers runs
    /// first-fit from the lowest free block.
    pub fn allocate_n(&mut self, count: u32, store: &mut BlockStore) -> Result<Vec<Extent>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        self.ensure_free(count, store)?;

        let extents = match self.find_run(count) {
            Some(start) => vec![Extent::new(start, count)],
            None => self.gather_runs(count),
        };

        for extent in &extents {
            self.bitmap[extent.start as usize..extent.end() as usize].fill(true);
        }
        self.free_blocks -= count;
        debug!(count, runs = extents.len(), "allocated blocks");
        Ok(extents)
    }

    /// Release one block. Freeing a free block is an error.
    pub fn free(&mut self, block: u32) -> Result<()> {
        self.check_range(block)?;
        if !self.bitmap[block as usize] {
            return Err(Error::AlreadyFree(block));
        }
        self.bitmap.set(block as usize, false);
        self.free_blocks += 1;
        Ok(())
    }

    /// Release every block of an extent.
    pub fn free_extent(&mut self, extent: Extent) -> Result<()> {
        for block in extent.blocks() {
            self.free(block)?;
        }
        Ok(())
    }

    /// Grow the store until `needed` blocks are free.
    ///
    /// Growth doubles the volume (or covers the shortfall if larger), capped
    /// at `max_blocks`. Nothing happens when enough blocks are already free.
    fn ensure_free(&mut self, needed: u32, store: &mut BlockStore) -> Result<()> {
        if self.free_blocks >= needed {
            return Ok(());
        }
        let shortfall = needed - self.free_blocks;
        let headroom = self.max_blocks - self.total_blocks;
        if shortfall > headroom {
            return Err(Error::OutOfSpace {
                needed: u64::from(needed),
                available: u64::from(self.free_blocks) + u64::from(headroom),
            });
        }

        let by = shortfall.max(self.total_blocks).min(headroom);
        store.grow(by)?;
        self.total_blocks += by;
        self.free_blocks += by;
        debug!(by, total = self.total_blocks, "allocator grew volume");
        Ok(())
    }

    fn find_run(&self, count: u32) -> Option<u32> {
        let bits = &self.bitmap[..self.total_blocks as usize];
        let mut start = 0usize;
        while start < bits.len() {
            let free_from = start + bits[start..].first_zero()?;
            let run_end = bits[free_from..]
                .first_one()
                .map_or(bits.len(), |i| free_from + i);
            if run_end - free_from >= count as usize {
                return Some(free_from as u32);
            }
            start = run_end;
        }
        None
    }

    fn gather_runs(&self, count: u32) -> Vec<Extent> {
        let mut extents: Vec<Extent> = Vec::new();
        let mut remaining = count;
        for block in self.bitmap[..self.total_blocks as usize].iter_zeros() {
            if remaining == 0 {
                break;
            }
            let block = block as u32;
            match extents.last_mut() {
                Some(last) if last.end() == block => last.len += 1,
                _ => extents.push(Extent::new(block, 1)),
            }
            remaining -= 1;
        }
        extents
    }
}
