//! Positional XOR keystream over a secret-derived lookup table.
//!
//! The table is one block long and is rebuilt from the secret every time a
//! volume is opened. Nothing derived from the secret is ever written to disk.

use crate::error::{Error, Result};
use std::fmt;

/// Block-sized lookup table derived from a secret.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyTable {
    table: Vec<u8>,
}

impl KeyTable {
    /// Derive a table of `len` bytes from `secret`.
    ///
    /// Byte `i` is `secret[i & (secret.len() - 1)]`. The mask only walks the
    /// whole secret when its length is a power of two; for other lengths some
    /// secret bytes never reach the table.
    pub fn derive(secret: &[u8], len: usize) -> Result<Self> {
        if secret.is_empty() {
            return Err(Error::EmptySecret);
        }
        let mask = secret.len() - 1;
        let table = (0..len).map(|i| secret[i & mask]).collect();
        Ok(Self { table })
    }

    /// Table length in bytes.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Raw table bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.table
    }

    /// XOR `data` in place, starting at table position `block_offset`.
    ///
    /// Applying it twice with the same offset restores the input.
    pub fn apply(&self, data: &mut [u8], block_offset: u64) {
        if self.table.is_empty() {
            return;
        }
        let len = self.table.len();
        let start = (block_offset % len as u64) as usize;
        for (i, byte) in data.iter_mut().enumerate() {
            *byte ^= self.table[(start + i) % len];
        }
    }

    /// Copying form of [`KeyTable::apply`].
    pub fn transform(&self, data: &[u8], block_offset: u64) -> Vec<u8> {
        let mut out = data.to_vec();
        self.apply(&mut out, block_offset);
        out
    }
}

// Keep the table out of logs.
impl fmt::Debug for KeyTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyTable")
            .field("len", &self.table.len())
            .finish_non_exhaustive()
    }
}

/// Derive a key table from a secret.
pub fn derive_table(secret: &[u8], len: usize) -> Result<KeyTable> {
    KeyTable::derive(secret, len)
}

/// XOR `data` against `table` starting at `block_offset`.
pub fn transform(data: &[u8], table: &KeyTable, block_offset: u64) -> Vec<u8> {
    table.transform(data, block_offset)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_deterministic() {
        let a = derive_table(b"pw", 4096).unwrap();
        let b = derive_table(b"pw", 4096).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 4096);
    }

    #[test]
    fn test_derive_power_of_two_secret_repeats() {
        let table = derive_table(b"abcd", 8).unwrap();
        assert_eq!(table.as_bytes(), b"abcdabcd");
    }

    #[test]
    fn test_derive_masking_skips_bytes() {
        // len 3 -> mask 0b10, index 1 never selected
        let table = derive_table(b"xyz", 6).unwrap();
        assert_eq!(table.as_bytes(), b"xxzzxx");
    }

    #[test]
    fn test_empty_secret_rejected() {
        assert!(matches!(derive_table(b"", 4096), Err(Error::EmptySecret)));
    }

    #[test]
    fn test_transform_self_inverse() {
        let table = derive_table(b"secret-key", 4096).unwrap();
        let data: Vec<u8> = (0..10_000).map(|i| (i * 7 % 251) as u8).collect();

        for offset in [0u64, 1, 17, 4095, 4096, 123_456] {
            let once = transform(&data, &table, offset);
            assert_ne!(once, data);
            assert_eq!(transform(&once, &table, offset), data);
        }
    }

    #[test]
    fn test_offset_changes_ciphertext() {
        let table = derive_table(b"pw", 4096).unwrap();
        let data = vec![0u8; 64];
        let at_one = transform(&data, &table, 1);
        let at_two = transform(&data, &table, 2);
        assert_ne!(at_one, at_two);
        // Period of the table is the secret length.
        assert_eq!(at_one, transform(&data, &table, 3));
    }

    #[test]
    fn test_empty_data() {
        let table = derive_table(b"pw", 4096).unwrap();
        assert!(transform(&[], &table, 5).is_empty());
    }

    #[test]
    fn test_debug_hides_table() {
        let table = derive_table(b"topsecret", 16).unwrap();
        let debug = format!("{:?}", table);
        assert!(!debug.contains("116"));
        assert!(debug.contains("len"));
    }
}
