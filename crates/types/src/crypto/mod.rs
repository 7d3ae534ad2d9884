// SPDX-License-Identifier: Apache-2.0
//! Cryptographic primitives for the finalization protocol.
//!
//! Votes are signed with a two-level forward-secure one-time-signature tree
//! built over Ed25519 keys; see [`ots`].

mod ots;

pub use ots::*;

use fastcrypto::{
    ed25519::{Ed25519PublicKey, Ed25519Signature},
    traits::{ToFromBytes, VerifyingKey},
};
use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use std::fmt;

/// Number of bytes in a digest.
pub const DIGEST_LENGTH: usize = 32;

/// The default hash function for message digests.
pub type DefaultHashFunction = blake3::Hasher;

/// Number of bytes in an OTS public key.
pub const OTS_PUBLIC_KEY_LENGTH: usize = 32;

/// Number of bytes in an OTS signature.
pub const OTS_SIGNATURE_LENGTH: usize = 64;

/// An Ed25519 public key used within the one-time-signature tree.
///
/// The root public key doubles as the voter's identity within an epoch's
/// voting committee.
#[derive(
    Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct OtsPublicKey([u8; OTS_PUBLIC_KEY_LENGTH]);

impl OtsPublicKey {
    /// Create a public key from raw bytes.
    pub fn new(bytes: [u8; OTS_PUBLIC_KEY_LENGTH]) -> Self {
        Self(bytes)
    }

    /// The raw key bytes.
    pub fn as_bytes(&self) -> &[u8; OTS_PUBLIC_KEY_LENGTH] {
        &self.0
    }
}

impl From<&Ed25519PublicKey> for OtsPublicKey {
    fn from(key: &Ed25519PublicKey) -> Self {
        let mut bytes = [0u8; OTS_PUBLIC_KEY_LENGTH];
        bytes.copy_from_slice(key.as_bytes());
        Self(bytes)
    }
}

impl fmt::Debug for OtsPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&bs58::encode(self.0).into_string())
    }
}

impl fmt::Display for OtsPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let encoded = bs58::encode(self.0).into_string();
        f.write_str(encoded.get(0..8).unwrap_or(&encoded))
    }
}

/// An Ed25519 signature produced by a key within the one-time-signature tree.
#[serde_as]
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtsSignature(#[serde_as(as = "[_; OTS_SIGNATURE_LENGTH]")] [u8; OTS_SIGNATURE_LENGTH]);

impl OtsSignature {
    /// Create a signature from raw bytes.
    pub fn new(bytes: [u8; OTS_SIGNATURE_LENGTH]) -> Self {
        Self(bytes)
    }

    /// The raw signature bytes.
    pub fn as_bytes(&self) -> &[u8; OTS_SIGNATURE_LENGTH] {
        &self.0
    }
}

impl Default for OtsSignature {
    fn default() -> Self {
        Self([0u8; OTS_SIGNATURE_LENGTH])
    }
}

impl From<&Ed25519Signature> for OtsSignature {
    fn from(signature: &Ed25519Signature) -> Self {
        let mut bytes = [0u8; OTS_SIGNATURE_LENGTH];
        bytes.copy_from_slice(signature.as_ref());
        Self(bytes)
    }
}

impl fmt::Debug for OtsSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&bs58::encode(self.0).into_string())
    }
}

/// Identifies one key within the one-time-signature tree.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct OtsKeyIdentifier {
    /// The batch id (top-level key index).
    pub batch_id: u64,
    /// The key id within the batch.
    pub key_id: u64,
}

impl OtsKeyIdentifier {
    /// Create a new key identifier.
    pub fn new(batch_id: u64, key_id: u64) -> Self {
        Self { batch_id, key_id }
    }
}

impl fmt::Display for OtsKeyIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.batch_id, self.key_id)
    }
}

/// Options governing the shape of a one-time-signature tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtsOptions {
    /// Number of keys per batch.
    pub dilution: u64,
    /// First usable key identifier.
    pub start_key_identifier: OtsKeyIdentifier,
    /// Last usable key identifier.
    pub end_key_identifier: OtsKeyIdentifier,
}

/// A public key together with its parent's signature binding it to a key
/// identifier.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtsSignaturePair {
    /// The public key.
    pub public_key: OtsPublicKey,
    /// The signature.
    pub signature: OtsSignature,
}

/// A complete one-time signature: the certification chain from the root key
/// down to the message key.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtsTreeSignature {
    /// Root key and its signature over the batch key.
    pub root: OtsSignaturePair,
    /// Batch key and its signature over the message key.
    pub top: OtsSignaturePair,
    /// Message key and its signature over the payload.
    pub bottom: OtsSignaturePair,
}

fn ed25519_verify(public_key: &OtsPublicKey, message: &[u8], signature: &OtsSignature) -> bool {
    let Ok(key) = Ed25519PublicKey::from_bytes(public_key.as_bytes()) else {
        return false;
    };
    let Ok(signature) = Ed25519Signature::from_bytes(signature.as_bytes()) else {
        return false;
    };
    key.verify(message, &signature).is_ok()
}

/// The message a parent key signs to certify a child key for `identifier`.
pub(crate) fn bound_key_message(public_key: &OtsPublicKey, identifier: u64) -> Vec<u8> {
    let mut message = Vec::with_capacity(OTS_PUBLIC_KEY_LENGTH + 8);
    message.extend_from_slice(public_key.as_bytes());
    message.extend_from_slice(&identifier.to_le_bytes());
    message
}

fn verify_bound_signature(pair: &OtsSignaturePair, signed_key: &OtsPublicKey, bound: u64) -> bool {
    ed25519_verify(&pair.public_key, &bound_key_message(signed_key, bound), &pair.signature)
}

/// Verify a one-time signature over `data` at `key_identifier`.
///
/// Checks the full certification chain: the root key must certify the batch
/// key for the batch id, the batch key must certify the message key for the
/// key id, and the message key must have signed the data.
pub fn verify_ots_signature(
    signature: &OtsTreeSignature,
    key_identifier: &OtsKeyIdentifier,
    data: &[u8],
) -> bool {
    if !verify_bound_signature(&signature.root, &signature.top.public_key, key_identifier.batch_id)
    {
        return false;
    }

    if !verify_bound_signature(&signature.top, &signature.bottom.public_key, key_identifier.key_id)
    {
        return false;
    }

    ed25519_verify(&signature.bottom.public_key, data, &signature.bottom.signature)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_identifier_ordering_is_batch_major() {
        let id = OtsKeyIdentifier::new(3, 5);
        assert!(id < OtsKeyIdentifier::new(4, 0));
        assert!(id < OtsKeyIdentifier::new(3, 6));
        assert!(id > OtsKeyIdentifier::new(3, 4));
        assert!(id > OtsKeyIdentifier::new(2, 100));
    }

    #[test]
    fn ots_signature_bincode_roundtrip() {
        let pair = OtsSignaturePair {
            public_key: OtsPublicKey::new([7u8; OTS_PUBLIC_KEY_LENGTH]),
            signature: OtsSignature::new([9u8; OTS_SIGNATURE_LENGTH]),
        };
        let bytes = crate::encode(&pair);
        assert_eq!(bytes.len(), OTS_PUBLIC_KEY_LENGTH + OTS_SIGNATURE_LENGTH);
        let decoded: OtsSignaturePair = crate::decode(&bytes).unwrap();
        assert_eq!(pair, decoded);
    }
}
