// SPDX-License-Identifier: Apache-2.0
//! Block hash types shared across the finalization protocol.

use crate::Height;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of bytes in a block hash.
pub const BLOCK_HASH_LENGTH: usize = 32;

/// First four little-endian bytes of a message digest.
///
/// Used to cheaply advertise known messages between peers.
pub type ShortHash = u32;

/// A 32-byte block hash.
#[derive(
    Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct BlockHash([u8; BLOCK_HASH_LENGTH]);

impl BlockHash {
    /// Create a block hash from raw bytes.
    pub fn new(bytes: [u8; BLOCK_HASH_LENGTH]) -> Self {
        Self(bytes)
    }

    /// A hash with every byte set to `byte`. Useful for tests.
    pub fn repeat_byte(byte: u8) -> Self {
        Self([byte; BLOCK_HASH_LENGTH])
    }

    /// The raw hash bytes.
    pub fn as_bytes(&self) -> &[u8; BLOCK_HASH_LENGTH] {
        &self.0
    }
}

impl AsRef<[u8]> for BlockHash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; BLOCK_HASH_LENGTH]> for BlockHash {
    fn from(bytes: [u8; BLOCK_HASH_LENGTH]) -> Self {
        Self(bytes)
    }
}

impl fmt::Debug for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&bs58::encode(self.0).into_string())
    }
}

impl fmt::Display for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let encoded = bs58::encode(self.0).into_string();
        f.write_str(encoded.get(0..8).unwrap_or(&encoded))
    }
}

/// A (height, hash) pair identifying one block in a prevote chain.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct HeightHashPair {
    /// The block height.
    pub height: Height,
    /// The block hash.
    pub hash: BlockHash,
}

impl HeightHashPair {
    /// Create a new pair.
    pub fn new(height: Height, hash: BlockHash) -> Self {
        Self { height, hash }
    }
}

impl fmt::Display for HeightHashPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} @ {}", self.hash, self.height)
    }
}
