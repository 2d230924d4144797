//! VFS types: inodes, directory entries, etc.

use crate::config::DIRECT_BLOCKS;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Inode number, an index into the inode table.
pub type InodeId = u32;

/// Kind of object an inode describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InodeKind {
    /// A regular file.
    File,
    /// A directory whose content is a list of entries.
    Directory,
}

impl InodeKind {
    /// On-disk tag. Zero marks a free inode slot.
    pub fn tag(self) -> u8 {
        match self {
            InodeKind::File => 1,
            InodeKind::Directory => 2,
        }
    }

    /// Parse an on-disk tag; `None` for anything but a live kind.
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(InodeKind::File),
            2 => Some(InodeKind::Directory),
            _ => None,
        }
    }
}

/// Where an inode's content lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Layout {
    /// Up to `DIRECT_BLOCKS` block numbers held in the inode itself.
    Direct(Vec<u32>),
    /// A chain of extent-list blocks starting at `head`.
    Extents {
        head: u32,
        extent_count: u32,
        block_count: u32,
    },
}

impl Layout {
    /// Data blocks referenced, excluding extent-list blocks.
    pub fn block_count(&self) -> u32 {
        match self {
            Layout::Direct(blocks) => blocks.len() as u32,
            Layout::Extents { block_count, .. } => *block_count,
        }
    }

    pub fn is_direct(&self) -> bool {
        matches!(self, Layout::Direct(_))
    }
}

impl Default for Layout {
    fn default() -> Self {
        Layout::Direct(Vec::new())
    }
}

/// An inode representing a file or directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inode {
    /// Type of inode (file or directory).
    pub kind: InodeKind,
    /// Size of the content in bytes.
    pub size: u64,
    /// Creation timestamp (Unix epoch seconds).
    pub created: u64,
    /// Last modification timestamp (Unix epoch seconds).
    pub modified: u64,
    /// Block placement of the content.
    pub layout: Layout,
}

impl Inode {
    /// Create an empty inode of the given kind.
    pub fn new(kind: InodeKind) -> Self {
        let now = current_timestamp();
        Self {
            kind,
            size: 0,
            created: now,
            modified: now,
            layout: Layout::default(),
        }
    }

    /// Check if this is a file.
    pub fn is_file(&self) -> bool {
        self.kind == InodeKind::File
    }

    /// Check if this is a directory.
    pub fn is_directory(&self) -> bool {
        self.kind == InodeKind::Directory
    }

    /// Update modification time.
    pub fn touch(&mut self) {
        self.modified = current_timestamp();
    }

    /// Whether content of `blocks` blocks can be stored without an extent list.
    pub fn fits_direct(blocks: u32) -> bool {
        blocks as usize <= DIRECT_BLOCKS
    }
}

/// A directory entry for listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    /// Name of the entry.
    pub name: String,
    /// Inode number.
    pub inode: InodeId,
    /// Kind of the referenced inode.
    pub kind: InodeKind,
}

impl DirEntry {
    pub fn new(name: impl Into<String>, inode: InodeId, kind: InodeKind) -> Self {
        Self {
            name: name.into(),
            inode,
            kind,
        }
    }

    /// Whether this is a directory.
    pub fn is_dir(&self) -> bool {
        self.kind == InodeKind::Directory
    }
}

/// Metadata returned by `stat`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileStat {
    pub inode: InodeId,
    pub kind: InodeKind,
    pub size: u64,
    pub created: u64,
    pub modified: u64,
    /// Data blocks held.
    pub blocks: u32,
    /// Contiguous runs the data occupies.
    pub extents: u32,
}

/// Get current Unix timestamp.
pub(crate) fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_file() {
        let file = Inode::new(InodeKind::File);
        assert!(file.is_file());
        assert!(!file.is_directory());
        assert_eq!(file.size, 0);
        assert_eq!(file.layout, Layout::Direct(Vec::new()));
    }

    #[test]
    fn test_kind_tags() {
        for kind in [InodeKind::File, InodeKind::Directory] {
            assert_eq!(InodeKind::from_tag(kind.tag()), Some(kind));
        }
        assert_eq!(InodeKind::from_tag(0), None);
        assert_eq!(InodeKind::from_tag(7), None);
    }

    #[test]
    fn test_layout_block_count() {
        assert_eq!(Layout::Direct(vec![4, 5, 9]).block_count(), 3);
        let extents = Layout::Extents {
            head: 30,
            extent_count: 2,
            block_count: 40,
        };
        assert_eq!(extents.block_count(), 40);
        assert!(!extents.is_direct());
    }

    #[test]
    fn test_fits_direct() {
        assert!(Inode::fits_direct(0));
        assert!(Inode::fits_direct(12));
        assert!(!Inode::fits_direct(13));
    }
}
