// SPDX-License-Identifier: Apache-2.0
//! Binary codec used for wire and disk encoding.

use serde::{de::DeserializeOwned, Serialize};

/// Encode a value with the canonical binary codec.
///
/// All model types in this crate are plain data, so encoding cannot fail for
/// well-formed values.
pub fn encode<T: Serialize>(value: &T) -> Vec<u8> {
    bincode::serialize(value).expect("model types serialize infallibly")
}

/// Decode a value previously produced by [`encode`].
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> eyre::Result<T> {
    Ok(bincode::deserialize(bytes)?)
}
