//! Volume superblock - the root metadata structure at block 0.

use crate::config::{RegionLayout, VolumeConfig, ROOT_INODE, VOLUME_MAGIC, VOLUME_VERSION};
use crate::config::{MAX_BLOCK_SIZE, MIN_BLOCK_SIZE};
use crate::error::{Error, Result};
use crate::vfs::types::current_timestamp;
use serde::{Deserialize, Serialize};

/// The superblock describes the volume geometry and usage counters.
///
/// Stored unencrypted so a volume can be validated without its secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Superblock {
    /// Magic number for identification.
    pub magic: [u8; 8],
    /// Format version.
    pub version: u32,
    /// Block size in bytes.
    pub block_size: u32,
    /// Blocks currently backed by the file.
    pub total_blocks: u32,
    /// Blocks not marked in the bitmap.
    pub free_blocks: u32,
    /// Growth ceiling; the bitmap covers this many blocks.
    pub max_blocks: u32,
    /// Inode slots in the table.
    pub inode_capacity: u32,
    /// Inode slots in use.
    pub inode_count: u32,
    /// Root directory inode number.
    pub root_inode: u32,
    pub bitmap_start: u32,
    pub bitmap_blocks: u32,
    pub inode_table_start: u32,
    pub inode_table_blocks: u32,
    /// First block available for data.
    pub data_start: u32,
    /// Regular files in the volume.
    pub file_count: u32,
    /// Directories in the volume, root included.
    pub dir_count: u32,
    /// Creation timestamp (Unix epoch seconds).
    pub created: u64,
    /// Last commit timestamp (Unix epoch seconds).
    pub modified: u64,
    /// CRC-32 over the encoding with this field zeroed.
    pub checksum: u32,
}

impl Superblock {
    /// Create a superblock for a fresh volume of `total_blocks` blocks.
    pub fn new(config: &VolumeConfig, total_blocks: u32) -> Self {
        let layout = config.layout();
        let now = current_timestamp();
        Self {
            magic: VOLUME_MAGIC,
            version: VOLUME_VERSION,
            block_size: config.block_size,
            total_blocks,
            free_blocks: total_blocks,
            max_blocks: config.max_blocks,
            inode_capacity: config.inode_capacity,
            inode_count: 0,
            root_inode: ROOT_INODE,
            bitmap_start: layout.bitmap_start,
            bitmap_blocks: layout.bitmap_blocks,
            inode_table_start: layout.inode_table_start,
            inode_table_blocks: layout.inode_table_blocks,
            data_start: layout.data_start,
            file_count: 0,
            dir_count: 0,
            created: now,
            modified: now,
            checksum: 0,
        }
    }

    /// Region layout recorded in this superblock.
    pub fn layout(&self) -> RegionLayout {
        RegionLayout {
            bitmap_start: self.bitmap_start,
            bitmap_blocks: self.bitmap_blocks,
            inode_table_start: self.inode_table_start,
            inode_table_blocks: self.inode_table_blocks,
            data_start: self.data_start,
        }
    }

    /// Validate identification and geometry.
    pub fn validate(&self) -> Result<()> {
        if self.magic != VOLUME_MAGIC {
            return Err(Error::InvalidMagic);
        }
        if self.version != VOLUME_VERSION {
            return Err(Error::VersionMismatch {
                expected: VOLUME_VERSION,
                found: self.version,
            });
        }
        if !self.block_size.is_power_of_two()
            || !(MIN_BLOCK_SIZE..=MAX_BLOCK_SIZE).contains(&self.block_size)
        {
            return Err(Error::Corrupt(format!("bad block size {}", self.block_size)));
        }
        let expected = RegionLayout::compute(self.block_size, self.inode_capacity, self.max_blocks);
        if self.layout() != expected {
            return Err(Error::Corrupt("region layout does not match geometry".to_string()));
        }
        if self.total_blocks < self.data_start || self.total_blocks > self.max_blocks {
            return Err(Error::Corrupt(format!(
                "total blocks {} outside [{}, {}]",
                self.total_blocks, self.data_start, self.max_blocks
            )));
        }
        if self.free_blocks > self.total_blocks {
            return Err(Error::Corrupt(format!(
                "free blocks {} exceed total {}",
                self.free_blocks, self.total_blocks
            )));
        }
        if self.root_inode >= self.inode_capacity {
            return Err(Error::Corrupt("root inode outside the inode table".to_string()));
        }
        Ok(())
    }

    fn compute_checksum(&self) -> Result<u32> {
        let mut copy = self.clone();
        copy.checksum = 0;
        let bytes = bincode::serialize(&copy)?;
        Ok(crc32fast::hash(&bytes))
    }

    /// Serialize into a zero-padded block, refreshing the checksum.
    pub fn to_block(&mut self) -> Result<Vec<u8>> {
        self.checksum = self.compute_checksum()?;
        let bytes = bincode::serialize(self)?;
        let mut block = vec![0u8; self.block_size as usize];
        if bytes.len() > block.len() {
            return Err(Error::Serialization(
                "superblock does not fit in one block".to_string(),
            ));
        }
        block[..bytes.len()].copy_from_slice(&bytes);
        Ok(block)
    }

    /// Deserialize and validate from the start of the volume.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < VOLUME_MAGIC.len() || data[..VOLUME_MAGIC.len()] != VOLUME_MAGIC {
            return Err(Error::InvalidMagic);
        }
        let sb: Superblock = bincode::deserialize(data)?;
        if sb.checksum != sb.compute_checksum()? {
            return Err(Error::ChecksumMismatch("superblock"));
        }
        sb.validate()?;
        Ok(sb)
    }

    /// Update the modification time.
    pub fn touch(&mut self) {
        self.modified = current_timestamp();
    }

    /// Bytes the backing file must hold.
    pub fn volume_len(&self) -> u64 {
        u64::from(self.total_blocks) * u64::from(self.block_size)
    }
}
