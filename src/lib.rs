//! Walnut - an encrypted, single-file virtual file system.
//!
//! A volume is one host file divided into fixed-size blocks, laid out like a
//! small ext4: a superblock, an allocation bitmap, an inode table and data
//! blocks. File content, directory entries and extent lists are encrypted
//! with a key table derived from a secret. Volume metadata stays readable
//! without it.
//!
//! # Architecture
//!
//! ```text
//! Volume → paths / directories → inodes → extents → allocator → block store
//!                                                      (key table on data blocks)
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use walnut::{Volume, VolumeConfig};
//! use std::path::Path;
//!
//! // Create a new volume
//! let mut vol = Volume::init(Path::new("./vault.img"), "secret", VolumeConfig::default()).unwrap();
//!
//! // Store a file
//! vol.mkdir("/docs").unwrap();
//! vol.add("/docs", "note.txt", b"Hidden data").unwrap();
//!
//! // Read it back
//! let data = vol.export("/docs", "note.txt").unwrap();
//! assert_eq!(data, b"Hidden data");
//! ```

pub mod config;
pub mod crypto;
pub mod error;
pub mod storage;
pub mod vfs;

pub use config::VolumeConfig;
pub use error::{Error, Result};
pub use vfs::{Volume, VolumeInfo};
