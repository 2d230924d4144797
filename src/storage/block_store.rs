//! Fixed-size block access to the backing volume file.

use crate::crypto::KeyTable;
use crate::error::{Error, Result};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use tracing::debug;

/// Block-granular view of the backing file.
///
/// Raw reads and writes serve the metadata regions. Data blocks go through
/// the key table with their block number as the keystream offset, so equal
/// plaintext at different block numbers is stored differently.
#[derive(Debug)]
pub struct BlockStore {
    file: File,
    block_size: u32,
    total_blocks: u32,
}

impl BlockStore {
    /// Wrap an open backing file holding `total_blocks` blocks.
    pub fn new(file: File, block_size: u32, total_blocks: u32) -> Self {
        Self {
            file,
            block_size,
            total_blocks,
        }
    }

    /// Block size in bytes.
    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    /// Number of blocks backed by the file.
    pub fn total_blocks(&self) -> u32 {
        self.total_blocks
    }

    /// Byte length the backing file should have.
    pub fn byte_len(&self) -> u64 {
        u64::from(self.total_blocks) * u64::from(self.block_size)
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

    fn offset(&self, block: u32) -> u64 {
        u64::from(block) * u64::from(self.block_size)
    }

    /// Read a block as stored.
    pub fn read_block(&self, block: u32) -> Result<Vec<u8>> {
        self.check_range(block)?;
        let mut buf = vec![0u8; self.block_size as usize];
        let mut file = &self.file;
        file.seek(SeekFrom::Start(self.offset(block)))?;
        file.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Write a block as given.
    pub fn write_block(&mut self, block: u32, data: &[u8]) -> Result<()> {
        self.check_range(block)?;
        if data.len() != self.block_size as usize {
            return Err(Error::BadBlockLength {
                expected: self.block_size as usize,
                found: data.len(),
            });
        }
        let offset = self.offset(block);
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(data)?;
        Ok(())
    }

    /// Read and decrypt a data block.
    pub fn read_data_block(&self, block: u32, key: &KeyTable) -> Result<Vec<u8>> {
        let mut buf = self.read_block(block)?;
        key.apply(&mut buf, u64::from(block));
        Ok(buf)
    }

    /// Encrypt and write a data block.
    pub fn write_data_block(&mut self, block: u32, data: &[u8], key: &KeyTable) -> Result<()> {
        let mut buf = data.to_vec();
        key.apply(&mut buf, u64::from(block));
        self.write_block(block, &buf)
    }

    /// Append `by` zero-filled blocks. The file never shrinks.
    pub fn grow(&mut self, by: u32) -> Result<()> {
        if by == 0 {
            return Ok(());
        }
        let new_total = self.total_blocks.checked_add(by).ok_or(Error::OutOfSpace {
            needed: u64::from(by),
            available: u64::from(u32::MAX - self.total_blocks),
        })?;
        let new_len = u64::from(new_total) * u64::from(self.block_size);
        self.file.set_len(new_len)?;
        debug!(from = self.total_blocks, to = new_total, "grew volume");
        self.total_blocks = new_total;
        Ok(())
    }

    /// Current length of the backing file in bytes.
    pub fn file_len(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    /// Flush file contents and metadata to disk.
    pub fn sync(&self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::derive_table;
    use tempfile::tempfile;

    fn store(blocks: u32) -> BlockStore {
        let file = tempfile().unwrap();
        file.set_len(u64::from(blocks) * 512).unwrap();
        BlockStore::new(file, 512, blocks)
    }

    #[test]
    fn test_raw_roundtrip() {
        let mut store = store(4);
        let data = vec![0xAB; 512];
        store.write_block(2, &data).unwrap();
        assert_eq!(store.read_block(2).unwrap(), data);
        assert_eq!(store.read_block(1).unwrap(), vec![0u8; 512]);
    }

    #[test]
    fn test_out_of_range() {
        let mut store = store(4);
        assert!(matches!(
            store.read_block(4),
            Err(Error::OutOfRange { block: 4, total: 4 })
        ));
        assert!(matches!(
            store.write_block(9, &[0u8; 512]),
            Err(Error::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_wrong_buffer_length() {
        let mut store = store(4);
        assert!(matches!(
            store.write_block(0, &[0u8; 100]),
            Err(Error::BadBlockLength { expected: 512, found: 100 })
        ));
    }

    #[test]
    fn test_data_blocks_are_encrypted() {
        let mut store = store(4);
        let key = derive_table(b"pw", 512).unwrap();
        let plain = vec![7u8; 512];

        store.write_data_block(1, &plain, &key).unwrap();
        store.write_data_block(2, &plain, &key).unwrap();

        let raw1 = store.read_block(1).unwrap();
        let raw2 = store.read_block(2).unwrap();
        assert_ne!(raw1, plain);
        assert_ne!(raw1, raw2);

        assert_eq!(store.read_data_block(1, &key).unwrap(), plain);
        assert_eq!(store.read_data_block(2, &key).unwrap(), plain);
    }

    #[test]
    fn test_grow_appends_zero_blocks() {
        let mut store = store(2);
        store.grow(3).unwrap();

        assert_eq!(store.total_blocks(), 5);
        assert_eq!(store.file_len().unwrap(), 5 * 512);
        assert_eq!(store.read_block(4).unwrap(), vec![0u8; 512]);
    }

    #[test]
    fn test_grow_by_zero_is_noop() {
        let mut store = store(2);
        store.grow(0).unwrap();
        assert_eq!(store.file_len().unwrap(), 2 * 512);
    }
}
