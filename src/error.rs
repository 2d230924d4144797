//! Error types for walnut volumes.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for volume operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in volume operations.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error on the backing file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid volume magic number.
    #[error("Invalid volume format: expected magic 'WALNUTFS'")]
    InvalidMagic,

    /// Version mismatch.
    #[error("Volume version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },

    /// Stored checksum does not match the structure.
    #[error("Checksum mismatch in {0}")]
    ChecksumMismatch(&'static str),

    /// On-disk structure is inconsistent.
    #[error("Corrupt volume: {0}")]
    Corrupt(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The volume cannot grow any further.
    #[error("Out of space: need {needed} blocks, {available} can be made available")]
    OutOfSpace { needed: u64, available: u64 },

    /// Every inode slot is in use.
    #[error("No free inodes (capacity {0})")]
    NoFreeInodes(u32),

    /// Path or entry not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Not a directory.
    #[error("Not a directory: {0}")]
    NotADirectory(String),

    /// Not a file.
    #[error("Not a file: {0}")]
    NotAFile(String),

    /// Entry already exists.
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Block was freed twice.
    #[error("Block {0} is already free")]
    AlreadyFree(u32),

    /// Inode slot is not allocated.
    #[error("Inode {0} is not allocated")]
    InodeFree(u32),

    /// Block access past the end of the volume.
    #[error("Block {block} out of range (volume has {total} blocks)")]
    OutOfRange { block: u32, total: u32 },

    /// Inode number outside the table.
    #[error("Inode {inode} out of range (capacity {capacity})")]
    InvalidInode { inode: u32, capacity: u32 },

    /// Buffer handed to the block store has the wrong length.
    #[error("Block buffer has {found} bytes, expected {expected}")]
    BadBlockLength { expected: usize, found: usize },

    /// Invalid path format.
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Invalid entry name.
    #[error("Invalid name: {0}")]
    InvalidName(String),

    /// Invalid volume configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Secrets must be at least one byte long.
    #[error("Secret must not be empty")]
    EmptySecret,

    /// Something already exists at the volume path.
    #[error("Volume path already exists: {0}")]
    VolumeExists(PathBuf),
}

impl Error {
    /// Whether this error means the backing file is not a readable volume.
    pub fn is_format_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidMagic
                | Error::VersionMismatch { .. }
                | Error::ChecksumMismatch(_)
                | Error::Corrupt(_)
                | Error::Serialization(_)
        )
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
