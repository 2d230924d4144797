//! Configuration constants and types for walnut volumes.

use serde::{Deserialize, Serialize};

/// Default block size (4KB, matching ext4's default).
pub const DEFAULT_BLOCK_SIZE: u32 = 4096;

/// Smallest supported block size.
pub const MIN_BLOCK_SIZE: u32 = 512;

/// Largest supported block size.
pub const MAX_BLOCK_SIZE: u32 = 65536;

/// Default requested volume size in blocks.
pub const DEFAULT_INITIAL_BLOCKS: u32 = 16;

/// Default number of inode slots.
pub const DEFAULT_INODE_CAPACITY: u32 = 256;

/// Default growth ceiling in blocks (1 GiB at 4KB blocks).
pub const DEFAULT_MAX_BLOCKS: u32 = 262_144;

/// Volume magic number.
pub const VOLUME_MAGIC: [u8; 8] = *b"WALNUTFS";

/// Current on-disk format version.
pub const VOLUME_VERSION: u32 = 1;

/// Size of one inode record in bytes.
pub const INODE_SIZE: u32 = 128;

/// Block numbers an inode can hold inline before switching to extents.
pub const DIRECT_BLOCKS: usize = 12;

/// Longest entry name in bytes.
pub const MAX_NAME_LEN: usize = 255;

/// Inode number of the root directory.
pub const ROOT_INODE: u32 = 0;

/// Configuration for volume initialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeConfig {
    /// Block size in bytes. Also the key table length.
    pub block_size: u32,

    /// Requested initial size in blocks.
    /// The volume is never smaller than its metadata regions.
    pub initial_blocks: u32,

    /// Number of inode slots. Fixed for the volume's lifetime.
    pub inode_capacity: u32,

    /// Upper bound on the block count; sizes the bitmap region.
    pub max_blocks: u32,
}

impl Default for VolumeConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            initial_blocks: DEFAULT_INITIAL_BLOCKS,
            inode_capacity: DEFAULT_INODE_CAPACITY,
            max_blocks: DEFAULT_MAX_BLOCKS,
        }
    }
}

impl VolumeConfig {
    /// Create a new volume configuration with custom settings.
    pub fn new(block_size: u32, initial_blocks: u32, inode_capacity: u32, max_blocks: u32) -> Self {
        Self {
            block_size,
            initial_blocks,
            inode_capacity,
            max_blocks,
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if !self.block_size.is_power_of_two()
            || self.block_size < MIN_BLOCK_SIZE
            || self.block_size > MAX_BLOCK_SIZE
        {
            return Err(format!(
                "Block size must be a power of 2 between {} and {}",
                MIN_BLOCK_SIZE, MAX_BLOCK_SIZE
            ));
        }
        if self.inode_capacity == 0 {
            return Err("Inode capacity must be greater than 0".to_string());
        }
        let layout = self.layout();
        if layout.data_start >= self.max_blocks {
            return Err(format!(
                "Max blocks ({}) leaves no room for data after {} metadata blocks",
                self.max_blocks, layout.data_start
            ));
        }
        if self.initial_blocks > self.max_blocks {
            return Err(format!(
                "Initial blocks ({}) exceed max blocks ({})",
                self.initial_blocks, self.max_blocks
            ));
        }
        Ok(())
    }

    /// Region layout implied by this configuration.
    pub fn layout(&self) -> RegionLayout {
        RegionLayout::compute(self.block_size, self.inode_capacity, self.max_blocks)
    }
}

/// Placement of the metadata regions, in block numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionLayout {
    pub bitmap_start: u32,
    pub bitmap_blocks: u32,
    pub inode_table_start: u32,
    pub inode_table_blocks: u32,
    pub data_start: u32,
}

impl RegionLayout {
    /// Superblock at 0, then bitmap, then the inode table.
    pub fn compute(block_size: u32, inode_capacity: u32, max_blocks: u32) -> Self {
        let bits_per_block = u64::from(block_size) * 8;
        let bitmap_blocks = u64::from(max_blocks).div_ceil(bits_per_block) as u32;
        let inodes_per_block = block_size / INODE_SIZE;
        let inode_table_blocks = inode_capacity.div_ceil(inodes_per_block);

        let bitmap_start = 1;
        let inode_table_start = bitmap_start + bitmap_blocks;
        Self {
            bitmap_start,
            bitmap_blocks,
            inode_table_start,
            inode_table_blocks,
            data_start: inode_table_start + inode_table_blocks,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(VolumeConfig::default().validate().is_ok());
    }

    #[test]
    fn test_default_layout() {
        let layout = VolumeConfig::default().layout();
        assert_eq!(layout.bitmap_start, 1);
        assert_eq!(layout.bitmap_blocks, 8);
        assert_eq!(layout.inode_table_start, 9);
        assert_eq!(layout.inode_table_blocks, 8);
        assert_eq!(layout.data_start, 17);
    }

    #[test]
    fn test_block_size_must_be_power_of_two() {
        let config = VolumeConfig::new(3000, 16, 16, 1024);
        assert!(config.validate().is_err());

        let config = VolumeConfig::new(256, 16, 16, 1024);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_max_blocks_must_leave_data_room() {
        let config = VolumeConfig::new(4096, 4, 256, 17);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_inodes_rejected() {
        let config = VolumeConfig::new(4096, 16, 0, 1024);
        assert!(config.validate().is_err());
    }
}
