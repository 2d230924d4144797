//! Cryptographic transform for data blocks.
//!
//! This module provides:
//! - Key table derivation from the volume secret
//! - Positional XOR keystream applied to every data block

mod keystream;

pub use keystream::{derive_table, transform, KeyTable};
