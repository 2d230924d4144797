//! Fixed-slot inode table.

use crate::config::{DIRECT_BLOCKS, INODE_SIZE};
use crate::error::{Error, Result};
use crate::storage::BlockStore;
use crate::vfs::types::{Inode, InodeId, InodeKind, Layout};
use bitvec::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

const LAYOUT_DIRECT: u8 = 0;
const LAYOUT_EXTENTS: u8 = 1;

/// Inode as laid out on disk, padded to `INODE_SIZE` bytes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct InodeRecord {
    kind: u8,
    layout: u8,
    size: u64,
    created: u64,
    modified: u64,
    block_count: u32,
    direct: [u32; DIRECT_BLOCKS],
    extent_head: u32,
    extent_count: u32,
}

impl InodeRecord {
    fn from_inode(inode: &Inode) -> Self {
        let mut record = Self {
            kind: inode.kind.tag(),
            size: inode.size,
            created: inode.created,
            modified: inode.modified,
            block_count: inode.layout.block_count(),
            ..Default::default()
        };
        match &inode.layout {
            Layout::Direct(blocks) => {
                record.layout = LAYOUT_DIRECT;
                record.direct[..blocks.len()].copy_from_slice(blocks);
            }
            Layout::Extents {
                head, extent_count, ..
            } => {
                record.layout = LAYOUT_EXTENTS;
                record.extent_head = *head;
                record.extent_count = *extent_count;
            }
        }
        record
    }

    fn to_inode(&self, n: InodeId) -> Result<Inode> {
        let kind = InodeKind::from_tag(self.kind).ok_or(Error::InodeFree(n))?;
        let layout = match self.layout {
            LAYOUT_DIRECT if self.block_count as usize <= DIRECT_BLOCKS => {
                Layout::Direct(self.direct[..self.block_count as usize].to_vec())
            }
            LAYOUT_EXTENTS => Layout::Extents {
                head: self.extent_head,
                extent_count: self.extent_count,
                block_count: self.block_count,
            },
            other => {
                return Err(Error::Corrupt(format!(
                    "inode {} has layout {} with {} blocks",
                    n, other, self.block_count
                )))
            }
        };
        Ok(Inode {
            kind,
            size: self.size,
            created: self.created,
            modified: self.modified,
            layout,
        })
    }
}

/// Table of inode slots stored in the clear after the bitmap.
///
/// Slot usage is cached in memory and rebuilt by scanning at open.
#[derive(Debug, Clone)]
pub struct InodeTable {
    start: u32,
    capacity: u32,
    per_block: u32,
    used: BitVec,
}

impl InodeTable {
    /// Empty table. The on-disk region must already be zeroed.
    pub fn new(start: u32, capacity: u32, block_size: u32) -> Self {
        Self {
            start,
            capacity,
            per_block: block_size / INODE_SIZE,
            used: bitvec![0; capacity as usize],
        }
    }

    /// Scan the on-disk table and rebuild slot usage.
    pub fn load(store: &BlockStore, start: u32, capacity: u32) -> Result<Self> {
        let mut table = Self::new(start, capacity, store.block_size());
        let blocks = capacity.div_ceil(table.per_block);
        for b in 0..blocks {
            let block = store.read_block(start + b)?;
            for slot in 0..table.per_block {
                let n = b * table.per_block + slot;
                if n >= capacity {
                    break;
                }
                let offset = (slot * INODE_SIZE) as usize;
                if block[offset] != 0 {
                    table.used.set(n as usize, true);
                }
            }
        }
        Ok(table)
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Number of slots in use.
    pub fn count(&self) -> u32 {
        self.used.count_ones() as u32
    }

    pub fn is_allocated(&self, n: InodeId) -> bool {
        n < self.capacity && self.used[n as usize]
    }

    fn check_range(&self, n: InodeId) -> Result<()> {
        if n >= self.capacity {
            return Err(Error::InvalidInode {
                inode: n,
                capacity: self.capacity,
            });
        }
        Ok(())
    }

    /// Block number and byte offset of slot `n`.
    fn locate(&self, n: InodeId) -> (u32, usize) {
        let block = self.start + n / self.per_block;
        let offset = ((n % self.per_block) * INODE_SIZE) as usize;
        (block, offset)
    }

    /// Take the lowest free slot and write an empty inode of `kind` into it.
    pub fn allocate_inode(&mut self, kind: InodeKind, store: &mut BlockStore) -> Result<InodeId> {
        let n = self
            .used
            .first_zero()
            .ok_or(Error::NoFreeInodes(self.capacity))? as InodeId;
        self.write_record(n, &InodeRecord::from_inode(&Inode::new(kind)), store)?;
        self.used.set(n as usize, true);
        debug!(inode = n, ?kind, "allocated inode");
        Ok(n)
    }

    /// Read a live inode.
    pub fn read_inode(&self, n: InodeId, store: &BlockStore) -> Result<Inode> {
        self.check_range(n)?;
        let (block, offset) = self.locate(n);
        let data = store.read_block(block)?;
        let record: InodeRecord =
            bincode::deserialize(&data[offset..offset + INODE_SIZE as usize])?;
        record.to_inode(n)
    }

    /// Overwrite a live inode.
    pub fn write_inode(&mut self, n: InodeId, inode: &Inode, store: &mut BlockStore) -> Result<()> {
        self.check_range(n)?;
        if !self.used[n as usize] {
            return Err(Error::InodeFree(n));
        }
        if let Layout::Direct(blocks) = &inode.layout {
            if blocks.len() > DIRECT_BLOCKS {
                return Err(Error::Corrupt(format!(
                    "inode {} given {} direct blocks",
                    n,
                    blocks.len()
                )));
            }
        }
        self.write_record(n, &InodeRecord::from_inode(inode), store)
    }

    /// Clear a slot so it can be reused. The caller releases its blocks first.
    pub fn free_inode(&mut self, n: InodeId, store: &mut BlockStore) -> Result<()> {
        self.check_range(n)?;
        if !self.used[n as usize] {
            return Err(Error::InodeFree(n));
        }
        let (block, offset) = self.locate(n);
        let mut data = store.read_block(block)?;
        data[offset..offset + INODE_SIZE as usize].fill(0);
        store.write_block(block, &data)?;
        self.used.set(n as usize, false);
        debug!(inode = n, "freed inode");
        Ok(())
    }

    fn write_record(&self, n: InodeId, record: &InodeRecord, store: &mut BlockStore) -> Result<()> {
        let bytes = bincode::serialize(record)?;
        let (block, offset) = self.locate(n);
        let mut data = store.read_block(block)?;
        let slot = &mut data[offset..offset + INODE_SIZE as usize];
        slot.fill(0);
        slot[..bytes.len()].copy_from_slice(&bytes);
        store.write_block(block, &data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempfile;

    const BS: u32 = 512;

    fn setup(capacity: u32) -> (InodeTable, BlockStore) {
        let blocks = 1 + capacity.div_ceil(BS / INODE_SIZE);
        let file = tempfile().unwrap();
        file.set_len(u64::from(blocks) * u64::from(BS)).unwrap();
        let store = BlockStore::new(file, BS, blocks);
        (InodeTable::new(1, capacity, BS), store)
    }

    #[test]
    fn test_record_fits_slot() {
        let size = bincode::serialized_size(&InodeRecord::default()).unwrap();
        assert!(size <= u64::from(INODE_SIZE));
    }

    #[test]
    fn test_allocate_read_write() {
        let (mut table, mut store) = setup(8);
        let n = table.allocate_inode(InodeKind::File, &mut store).unwrap();
        assert_eq!(n, 0);

        let mut inode = table.read_inode(n, &store).unwrap();
        assert!(inode.is_file());

        inode.size = 1000;
        inode.layout = Layout::Direct(vec![20, 21]);
        table.write_inode(n, &inode, &mut store).unwrap();
        assert_eq!(table.read_inode(n, &store).unwrap(), inode);
    }

    #[test]
    fn test_extent_layout_roundtrip() {
        let (mut table, mut store) = setup(8);
        let n = table.allocate_inode(InodeKind::File, &mut store).unwrap();
        let mut inode = table.read_inode(n, &store).unwrap();
        inode.layout = Layout::Extents {
            head: 77,
            extent_count: 3,
            block_count: 40,
        };
        table.write_inode(n, &inode, &mut store).unwrap();
        assert_eq!(table.read_inode(n, &store).unwrap().layout, inode.layout);
    }

    #[test]
    fn test_capacity_exhausted() {
        let (mut table, mut store) = setup(3);
        for _ in 0..3 {
            table.allocate_inode(InodeKind::File, &mut store).unwrap();
        }
        assert!(matches!(
            table.allocate_inode(InodeKind::File, &mut store),
            Err(Error::NoFreeInodes(3))
        ));
    }

    #[test]
    fn test_free_and_reuse() {
        let (mut table, mut store) = setup(4);
        let a = table.allocate_inode(InodeKind::File, &mut store).unwrap();
        let b = table.allocate_inode(InodeKind::Directory, &mut store).unwrap();
        assert_eq!((a, b), (0, 1));

        table.free_inode(a, &mut store).unwrap();
        assert!(matches!(table.read_inode(a, &store), Err(Error::InodeFree(0))));
        assert!(matches!(table.free_inode(a, &mut store), Err(Error::InodeFree(0))));

        assert_eq!(table.allocate_inode(InodeKind::File, &mut store).unwrap(), 0);
        assert_eq!(table.count(), 2);
    }

    #[test]
    fn test_out_of_range_inode() {
        let (table, store) = setup(4);
        assert!(matches!(
            table.read_inode(4, &store),
            Err(Error::InvalidInode { inode: 4, capacity: 4 })
        ));
    }

    #[test]
    fn test_load_rebuilds_usage() {
        let (mut table, mut store) = setup(8);
        for _ in 0..5 {
            table.allocate_inode(InodeKind::File, &mut store).unwrap();
        }
        table.free_inode(2, &mut store).unwrap();

        let loaded = InodeTable::load(&store, 1, 8).unwrap();
        assert_eq!(loaded.count(), 4);
        assert!(!loaded.is_allocated(2));
        assert!(loaded.is_allocated(4));
    }
}
