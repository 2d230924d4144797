//! Mapping of inode content onto blocks and extents.
//!
//! Content of up to `DIRECT_BLOCKS` blocks is referenced straight from the
//! inode. Anything larger is described by a chain of extent-list blocks:
//!
//! ```text
//! +----------+-----------+-----------------------------------+
//! | next u32 | count u32 | count x (start u32, len u32)      |
//! +----------+-----------+-----------------------------------+
//! ```
//!
//! `next == 0` ends the chain. Extent-list blocks are data blocks and are
//! encrypted like file content.

use crate::crypto::KeyTable;
use crate::error::{Error, Result};
use crate::storage::{Allocator, BlockStore, Extent};
use crate::vfs::types::{Inode, Layout};
use tracing::debug;

const LIST_HEADER: usize = 8;
const LIST_ENTRY: usize = 8;

/// Number of extents one list block can hold.
pub fn extents_per_block(block_size: u32) -> usize {
    (block_size as usize - LIST_HEADER) / LIST_ENTRY
}

/// Blocks an inode holds: its data runs plus any extent-list blocks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockMap {
    /// Data runs in file order.
    pub extents: Vec<Extent>,
    /// Extent-list chain blocks.
    pub list_blocks: Vec<u32>,
}

impl BlockMap {
    /// Data block numbers in file order.
    pub fn data_blocks(&self) -> impl Iterator<Item = u32> + '_ {
        self.extents.iter().flat_map(|e| e.blocks())
    }

    /// Every block held, data and list alike.
    pub fn all_blocks(&self) -> Vec<u32> {
        let mut blocks: Vec<u32> = self.data_blocks().collect();
        blocks.extend_from_slice(&self.list_blocks);
        blocks
    }
}

/// Read-only access to inode content.
#[derive(Clone, Copy)]
pub struct ContentReader<'a> {
    store: &'a BlockStore,
    key: &'a KeyTable,
}

impl<'a> ContentReader<'a> {
    pub fn new(store: &'a BlockStore, key: &'a KeyTable) -> Self {
        Self { store, key }
    }

    /// Resolve the blocks behind an inode, following the extent chain.
    pub fn block_map(&self, inode: &Inode) -> Result<BlockMap> {
        match &inode.layout {
            Layout::Direct(blocks) => {
                let mut extents: Vec<Extent> = Vec::new();
                for &block in blocks {
                    match extents.last_mut() {
                        Some(last) if last.end() == block => last.len += 1,
                        _ => extents.push(Extent::new(block, 1)),
                    }
                }
                Ok(BlockMap {
                    extents,
                    list_blocks: Vec::new(),
                })
            }
            Layout::Extents {
                head,
                extent_count,
                block_count,
            } => {
                let map = self.read_extent_chain(*head)?;
                let blocks: u64 = map.extents.iter().map(|e| u64::from(e.len)).sum();
                if map.extents.len() != *extent_count as usize || blocks != u64::from(*block_count) {
                    return Err(Error::Corrupt(format!(
                        "extent chain at {} holds {} extents / {} blocks, inode expects {} / {}",
                        head,
                        map.extents.len(),
                        blocks,
                        extent_count,
                        block_count
                    )));
                }
                Ok(map)
            }
        }
    }

    fn read_extent_chain(&self, head: u32) -> Result<BlockMap> {
        let per_block = extents_per_block(self.store.block_size());
        let mut map = BlockMap::default();
        let mut next = head;

        while next != 0 {
            if map.list_blocks.contains(&next) {
                return Err(Error::Corrupt(format!("extent chain loops at block {}", next)));
            }
            let block = self.store.read_data_block(next, self.key)?;
            map.list_blocks.push(next);

            let following = read_u32(&block, 0);
            let count = read_u32(&block, 4) as usize;
            if count > per_block {
                return Err(Error::Corrupt(format!(
                    "extent block {} claims {} entries",
                    next, count
                )));
            }
            for i in 0..count {
                let at = LIST_HEADER + i * LIST_ENTRY;
                map.extents
                    .push(Extent::new(read_u32(&block, at), read_u32(&block, at + 4)));
            }
            next = following;
        }
        Ok(map)
    }

    /// Read an inode's content, truncated to its recorded size.
    pub fn read(&self, inode: &Inode) -> Result<Vec<u8>> {
        let map = self.block_map(inode)?;
        let bs = u64::from(self.store.block_size());
        let expected = inode.size.div_ceil(bs);
        let held = map.data_blocks().count() as u64;
        if held != expected {
            return Err(Error::Corrupt(format!(
                "inode of {} bytes holds {} blocks, expected {}",
                inode.size, held, expected
            )));
        }

        let mut data = Vec::with_capacity(inode.size as usize);
        for block in map.data_blocks() {
            data.extend_from_slice(&self.store.read_data_block(block, self.key)?);
        }
        data.truncate(inode.size as usize);
        Ok(data)
    }
}

/// Reads and writes inode content through the allocator and block store.
pub struct ContentManager<'a> {
    store: &'a mut BlockStore,
    allocator: &'a mut Allocator,
    key: &'a KeyTable,
}

impl<'a> ContentManager<'a> {
    pub fn new(store: &'a mut BlockStore, allocator: &'a mut Allocator, key: &'a KeyTable) -> Self {
        Self {
            store,
            allocator,
            key,
        }
    }

    fn block_size(&self) -> usize {
        self.store.block_size() as usize
    }

    fn reader(&self) -> ContentReader<'_> {
        ContentReader::new(&*self.store, self.key)
    }

    /// Resolve the blocks behind an inode.
    pub fn block_map(&self, inode: &Inode) -> Result<BlockMap> {
        self.reader().block_map(inode)
    }

    /// Read an inode's content.
    pub fn read(&self, inode: &Inode) -> Result<Vec<u8>> {
        self.reader().read(inode)
    }

    /// Replace an inode's content.
    ///
    /// Blocks previously held are released first so rewrites reuse their
    /// space. If the new allocation fails they are claimed back and the
    /// inode is left untouched.
    pub fn write(&mut self, inode: &mut Inode, data: &[u8]) -> Result<()> {
        let old = self.block_map(inode)?;
        let old_blocks = old.all_blocks();
        for &block in &old_blocks {
            self.allocator.free(block)?;
        }

        let layout = match self.place(data) {
            Ok(layout) => layout,
            Err(e) => {
                for &block in &old_blocks {
                    self.allocator.claim(block)?;
                }
                return Err(e);
            }
        };

        inode.layout = layout;
        inode.size = data.len() as u64;
        inode.touch();
        Ok(())
    }

    /// Release every block an inode holds and reset it to empty.
    pub fn release(&mut self, inode: &mut Inode) -> Result<()> {
        let map = self.block_map(inode)?;
        for block in map.all_blocks() {
            self.allocator.free(block)?;
        }
        inode.layout = Layout::default();
        inode.size = 0;
        Ok(())
    }

    /// Allocate, write and describe blocks for `data`.
    ///
    /// Every block the new layout needs, extent-list blocks included, is
    /// reserved before anything is written. A reservation failure leaves
    /// the store untouched.
    fn place(&mut self, data: &[u8]) -> Result<Layout> {
        let bs = self.block_size();
        let needed = data.len().div_ceil(bs) as u32;
        let extents = self.allocator.allocate_n(needed, self.store)?;

        let list_blocks = if Inode::fits_direct(needed) {
            Vec::new()
        } else {
            let count = extents.len().div_ceil(extents_per_block(bs as u32));
            match self.reserve_list_blocks(count) {
                Ok(blocks) => blocks,
                Err(e) => {
                    self.release_reserved(&extents, &[])?;
                    return Err(e);
                }
            }
        };

        let result = self.write_data(&extents, data).and_then(|_| {
            if list_blocks.is_empty() {
                Ok(Layout::Direct(extents.iter().flat_map(|e| e.blocks()).collect()))
            } else {
                self.write_extent_chain(&extents, &list_blocks, needed)
            }
        });

        if result.is_err() {
            self.release_reserved(&extents, &list_blocks)?;
        }
        result
    }

    fn reserve_list_blocks(&mut self, count: usize) -> Result<Vec<u32>> {
        let mut blocks = Vec::with_capacity(count);
        for _ in 0..count {
            match self.allocator.allocate(self.store) {
                Ok(block) => blocks.push(block),
                Err(e) => {
                    self.release_reserved(&[], &blocks)?;
                    return Err(e);
                }
            }
        }
        Ok(blocks)
    }

    fn release_reserved(&mut self, extents: &[Extent], list_blocks: &[u32]) -> Result<()> {
        for extent in extents {
            self.allocator.free_extent(*extent)?;
        }
        for &block in list_blocks {
            self.allocator.free(block)?;
        }
        Ok(())
    }

    fn write_data(&mut self, extents: &[Extent], data: &[u8]) -> Result<()> {
        let bs = self.block_size();
        let mut chunks = data.chunks(bs);
        let mut buf = vec![0u8; bs];
        for block in extents.iter().flat_map(|e| e.blocks()) {
            let chunk = chunks
                .next()
                .ok_or_else(|| Error::Corrupt("allocated more blocks than data".to_string()))?;
            buf.fill(0);
            buf[..chunk.len()].copy_from_slice(chunk);
            self.store.write_data_block(block, &buf, self.key)?;
        }
        Ok(())
    }

    fn write_extent_chain(
        &mut self,
        extents: &[Extent],
        list_blocks: &[u32],
        block_count: u32,
    ) -> Result<Layout> {
        let bs = self.block_size();
        let per_block = extents_per_block(bs as u32);

        for (i, group) in extents.chunks(per_block).enumerate() {
            let next = list_blocks.get(i + 1).copied().unwrap_or(0);
            let mut buf = vec![0u8; bs];
            buf[0..4].copy_from_slice(&next.to_le_bytes());
            buf[4..8].copy_from_slice(&(group.len() as u32).to_le_bytes());
            for (j, extent) in group.iter().enumerate() {
                let at = LIST_HEADER + j * LIST_ENTRY;
                buf[at..at + 4].copy_from_slice(&extent.start.to_le_bytes());
                buf[at + 4..at + 8].copy_from_slice(&extent.len.to_le_bytes());
            }
            self.store.write_data_block(list_blocks[i], &buf, self.key)?;
        }

        debug!(
            extents = extents.len(),
            list_blocks = list_blocks.len(),
            "wrote extent chain"
        );
        Ok(Layout::Extents {
            head: list_blocks[0],
            extent_count: extents.len() as u32,
            block_count,
        })
    }
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}
