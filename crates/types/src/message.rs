// SPDX-License-Identifier: Apache-2.0
//! The wire message validators exchange during finalization voting.

use crate::{
    crypto::{self, verify_ots_signature, OtsError, OtsStorage, OtsTree, OtsTreeSignature},
    encode, BlockHash, Height, ShortHash, StepIdentifier,
};
use fastcrypto::hash::{Digest, Hash};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Current finalization message version.
pub const FINALIZATION_MESSAGE_VERSION: u8 = 1;

/// A signed prevote or precommit.
///
/// A prevote carries the hashes of consecutive heights starting at `height`;
/// a precommit carries exactly one hash at `height`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizationMessage {
    /// Message version.
    pub version: u8,
    /// The voting step this message belongs to.
    pub step_identifier: StepIdentifier,
    /// Block height corresponding to the first hash.
    pub height: Height,
    /// The voted block hashes.
    pub hashes: Vec<BlockHash>,
    /// One-time signature over the verifiable data.
    pub signature: OtsTreeSignature,
}

impl FinalizationMessage {
    /// Number of hashes carried by this message.
    pub fn hashes_count(&self) -> u32 {
        self.hashes.len() as u32
    }

    /// Returns true if this message is a prevote.
    pub fn is_prevote(&self) -> bool {
        self.step_identifier.stage == crate::FinalizationStage::Prevote
    }

    /// The signed portion of the message: everything except the signature.
    pub fn verifiable_data(&self) -> Vec<u8> {
        encode(&(self.version, &self.step_identifier, self.height, &self.hashes))
    }

    /// First four bytes of the message digest.
    pub fn short_hash(&self) -> ShortHash {
        let digest = self.digest();
        let bytes: &[u8] = digest.as_ref();
        u32::from_le_bytes(bytes[..4].try_into().expect("digest holds at least four bytes"))
    }

    /// Size of the message when encoded for the wire.
    pub fn serialized_size(&self) -> usize {
        encode(self).len()
    }
}

impl Hash<{ crypto::DIGEST_LENGTH }> for FinalizationMessage {
    type TypedDigest = MessageDigest;

    fn digest(&self) -> MessageDigest {
        let mut hasher = crypto::DefaultHashFunction::new();
        hasher.update(&self.verifiable_data());
        MessageDigest(Digest { digest: hasher.finalize().into() })
    }
}

/// Digest of a [`FinalizationMessage`]'s verifiable data.
///
/// The signature is excluded so byte-identical votes resubmitted with a
/// fresh signature chain still collapse to one digest.
#[derive(
    Clone, Copy, PartialEq, Eq, std::hash::Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct MessageDigest(Digest<{ crypto::DIGEST_LENGTH }>);

impl Default for MessageDigest {
    fn default() -> Self {
        MessageDigest(Digest { digest: [0u8; crypto::DIGEST_LENGTH] })
    }
}

impl AsRef<[u8]> for MessageDigest {
    fn as_ref(&self) -> &[u8] {
        &self.0.digest
    }
}

impl From<MessageDigest> for Digest<{ crypto::DIGEST_LENGTH }> {
    fn from(digest: MessageDigest) -> Self {
        digest.0
    }
}

impl fmt::Debug for MessageDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for MessageDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        write!(f, "{}", self.0.to_string().get(0..16).ok_or(fmt::Error)?)
    }
}

/// Build and sign a finalization message.
///
/// The one-time-signature key identifier is derived from the step, so a
/// message for a step at or before the tree's last-used step is an error.
pub fn prepare_message<S: OtsStorage>(
    ots_tree: &mut OtsTree<S>,
    step_identifier: StepIdentifier,
    height: Height,
    hashes: Vec<BlockHash>,
    dilution: u64,
) -> Result<FinalizationMessage, OtsError> {
    let payload = encode(&(FINALIZATION_MESSAGE_VERSION, &step_identifier, height, &hashes));
    let key_identifier = step_identifier.to_ots_key_identifier(dilution);
    let signature = ots_tree.sign(&key_identifier, &payload)?;

    Ok(FinalizationMessage {
        version: FINALIZATION_MESSAGE_VERSION,
        step_identifier,
        height,
        hashes,
        signature,
    })
}

/// Verify a message's one-time signature against the key identifier derived
/// from its step.
pub fn verify_message_signature(message: &FinalizationMessage, dilution: u64) -> bool {
    let key_identifier = message.step_identifier.to_ots_key_identifier(dilution);
    verify_ots_signature(&message.signature, &key_identifier, &message.verifiable_data())
}
