//! Storage layer for the backing volume file.
//!
//! This module handles:
//! - Fixed-size block reads/writes, with data blocks passing through the cipher
//! - Growth-only resizing of the backing file
//! - Bitmap block allocation

mod allocator;
mod block_store;

pub use allocator::{Allocator, Extent};
pub use block_store::BlockStore;
