//! Virtual file system inside a single volume file.
//!
//! Provides inodes, directories and paths on top of the block store and
//! allocator, exposed through [`Volume`].

mod content;
mod directory;
mod inode;
mod path;
mod superblock;
mod types;
mod volume;

pub use content::{extents_per_block, BlockMap, ContentManager, ContentReader};
pub use directory::{validate_name, Directory};
pub use inode::InodeTable;
pub use path::VolumePath;
pub use superblock::Superblock;
pub use types::{DirEntry, FileStat, Inode, InodeId, InodeKind, Layout};
pub use volume::{Volume, VolumeInfo};
