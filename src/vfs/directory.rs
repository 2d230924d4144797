//! Directory content: an ordered list of (name, inode, kind) entries.
//!
//! Each entry is encoded as
//!
//! ```text
//! inode u32 LE | kind u8 | name_len u8 | name bytes
//! ```
//!
//! and entries are packed back to back in insertion order.

use crate::config::MAX_NAME_LEN;
use crate::error::{Error, Result};
use crate::vfs::types::{DirEntry, InodeId, InodeKind};

const ENTRY_HEADER: usize = 6;

/// Decoded directory content.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Directory {
    entries: Vec<DirEntry>,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entries in stored order.
    pub fn entries(&self) -> &[DirEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Linear scan for `name`.
    pub fn lookup(&self, name: &str) -> Option<&DirEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// Append an entry. Names are unique within a directory.
    pub fn add_entry(&mut self, name: &str, inode: InodeId, kind: InodeKind) -> Result<()> {
        validate_name(name)?;
        if self.lookup(name).is_some() {
            return Err(Error::AlreadyExists(name.to_string()));
        }
        self.entries.push(DirEntry::new(name, inode, kind));
        Ok(())
    }

    /// Remove and return the entry for `name`.
    pub fn remove_entry(&mut self, name: &str) -> Result<DirEntry> {
        let pos = self
            .entries
            .iter()
            .position(|e| e.name == name)
            .ok_or_else(|| Error::NotFound(name.to_string()))?;
        Ok(self.entries.remove(pos))
    }

    /// Encode for storage as directory content.
    pub fn to_bytes(&self) -> Vec<u8> {
        let size = self
            .entries
            .iter()
            .map(|e| ENTRY_HEADER + e.name.len())
            .sum();
        let mut out = Vec::with_capacity(size);
        for entry in &self.entries {
            out.extend_from_slice(&entry.inode.to_le_bytes());
            out.push(entry.kind.tag());
            out.push(entry.name.len() as u8);
            out.extend_from_slice(entry.name.as_bytes());
        }
        out
    }

    /// Decode directory content.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut entries = Vec::new();
        let mut pos = 0;
        while pos < data.len() {
            if data.len() - pos < ENTRY_HEADER {
                return Err(Error::Corrupt("truncated directory entry".to_string()));
            }
            let inode = u32::from_le_bytes([data[pos], data[pos + 1], data[pos + 2], data[pos + 3]]);
            let kind = InodeKind::from_tag(data[pos + 4]).ok_or_else(|| {
                Error::Corrupt(format!("directory entry with kind {}", data[pos + 4]))
            })?;
            let name_len = data[pos + 5] as usize;
            let start = pos + ENTRY_HEADER;
            let end = start + name_len;
            if name_len == 0 || end > data.len() {
                return Err(Error::Corrupt("directory entry name out of bounds".to_string()));
            }
            let name = std::str::from_utf8(&data[start..end])
                .map_err(|_| Error::Corrupt("directory entry name is not UTF-8".to_string()))?;
            entries.push(DirEntry::new(name, inode, kind));
            pos = end;
        }
        Ok(Self { entries })
    }
}

/// Check an entry name: 1..=255 bytes, no '/', not '.' or '..'.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains('/') || name.contains('\0')
    {
        return Err(Error::InvalidName(name.to_string()));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(Error::InvalidName(format!(
            "{}... ({} bytes, max {})",
            &name[..name.char_indices().nth(16).map_or(name.len(), |(i, _)| i)],
            name.len(),
            MAX_NAME_LEN
        )));
    }
    Ok(())
}
