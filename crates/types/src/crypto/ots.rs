// SPDX-License-Identifier: Apache-2.0
//! Two-level forward-secure one-time-signature tree.
//!
//! The root key certifies a level of batch keys, each batch key certifies
//! `dilution` message keys, and every message key signs exactly one payload.
//! Keys are consumed in strictly increasing identifier order; signing wipes
//! the consumed key and every earlier key from both memory and backing
//! storage, so a compromised tree cannot equivocate on past steps.

use super::{
    bound_key_message, OtsKeyIdentifier, OtsOptions, OtsPublicKey, OtsSignature, OtsSignaturePair,
    OtsTreeSignature, OTS_PUBLIC_KEY_LENGTH, OTS_SIGNATURE_LENGTH,
};
use fastcrypto::{
    ed25519::{Ed25519KeyPair, Ed25519PrivateKey},
    traits::{KeyPair as _, Signer as _, ToFromBytes},
};
use rand::RngCore;
use std::io::{Read, Seek, SeekFrom, Write};
use thiserror::Error;

/// Number of bytes in an OTS private key.
const OTS_PRIVATE_KEY_LENGTH: usize = 32;

/// Serialized size of the tree header: options plus the last-used identifier.
const TREE_HEADER_SIZE: u64 = 56;

/// Serialized size of a level header: parent public key plus identifier bounds.
const LEVEL_HEADER_SIZE: u64 = (OTS_PUBLIC_KEY_LENGTH + 8 + 8) as u64;

/// Serialized size of one signed private key entry.
const ENTRY_SIZE: u64 = (OTS_PRIVATE_KEY_LENGTH + OTS_SIGNATURE_LENGTH) as u64;

/// Batch id sentinel marking a tree that has never signed.
const INVALID_BATCH_ID: u64 = u64::MAX;

/// Errors raised by the one-time-signature tree.
#[derive(Debug, Error)]
pub enum OtsError {
    /// The requested key identifier cannot be used for signing.
    #[error("cannot sign with key identifier {0}")]
    InvalidKeyIdentifier(OtsKeyIdentifier),

    /// The backing storage failed.
    #[error("ots storage failure: {0}")]
    Storage(#[from] std::io::Error),

    /// The backing storage holds data that is not a valid tree.
    #[error("corrupt ots storage: {0}")]
    Corrupt(String),

    /// A key operation failed.
    #[error("ots crypto failure: {0}")]
    Crypto(String),
}

/// Seekable byte storage backing a tree.
pub trait OtsStorage: Read + Write + Seek + Send {}

impl<S: Read + Write + Seek + Send> OtsStorage for S {}

fn keypair_from_private(bytes: &[u8; OTS_PRIVATE_KEY_LENGTH]) -> Result<Ed25519KeyPair, OtsError> {
    let private = Ed25519PrivateKey::from_bytes(bytes.as_slice())
        .map_err(|e| OtsError::Crypto(e.to_string()))?;
    Ok(Ed25519KeyPair::from(private))
}

fn read_u64<R: Read>(reader: &mut R) -> std::io::Result<u64> {
    let mut bytes = [0u8; 8];
    reader.read_exact(&mut bytes)?;
    Ok(u64::from_le_bytes(bytes))
}

fn write_u64<W: Write>(writer: &mut W, value: u64) -> std::io::Result<()> {
    writer.write_all(&value.to_le_bytes())
}

fn read_key_identifier<R: Read>(reader: &mut R) -> std::io::Result<OtsKeyIdentifier> {
    let batch_id = read_u64(reader)?;
    let key_id = read_u64(reader)?;
    Ok(OtsKeyIdentifier { batch_id, key_id })
}

fn write_key_identifier<W: Write>(
    writer: &mut W,
    identifier: &OtsKeyIdentifier,
) -> std::io::Result<()> {
    write_u64(writer, identifier.batch_id)?;
    write_u64(writer, identifier.key_id)
}

/// A private key together with the parent signature certifying its public key.
struct SignedPrivateKey {
    private_key: [u8; OTS_PRIVATE_KEY_LENGTH],
    signature: OtsSignature,
}

impl SignedPrivateKey {
    /// Generate a random key certified by `parent` for `identifier`.
    fn create_random(parent: &Ed25519KeyPair, identifier: u64) -> Result<Self, OtsError> {
        let mut private_key = [0u8; OTS_PRIVATE_KEY_LENGTH];
        rand::thread_rng().fill_bytes(&mut private_key);

        let public_key = OtsPublicKey::from(keypair_from_private(&private_key)?.public());
        let signature = parent.sign(&bound_key_message(&public_key, identifier));

        Ok(Self { private_key, signature: OtsSignature::from(&signature) })
    }

    fn read_from<R: Read>(reader: &mut R) -> std::io::Result<Self> {
        let mut private_key = [0u8; OTS_PRIVATE_KEY_LENGTH];
        reader.read_exact(&mut private_key)?;
        let mut signature = [0u8; OTS_SIGNATURE_LENGTH];
        reader.read_exact(&mut signature)?;
        Ok(Self { private_key, signature: OtsSignature::new(signature) })
    }

    fn write_to<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        writer.write_all(&self.private_key)?;
        writer.write_all(self.signature.as_bytes())
    }
}

/// One level of the tree: private keys for a contiguous identifier range,
/// each certified by the level's parent key.
///
/// Entries are held in descending identifier order so that consuming key `k`
/// can drop every entry for identifiers below `k` with a truncate.
struct OtsLevel {
    parent_public_key: OtsPublicKey,
    start_identifier: u64,
    end_identifier: u64,
    entries: Vec<SignedPrivateKey>,
}

impl OtsLevel {
    fn create(
        parent: &Ed25519KeyPair,
        start_identifier: u64,
        end_identifier: u64,
    ) -> Result<Self, OtsError> {
        let mut entries = Vec::with_capacity((end_identifier - start_identifier + 1) as usize);
        for i in 0..=(end_identifier - start_identifier) {
            entries.push(SignedPrivateKey::create_random(parent, end_identifier - i)?);
        }

        Ok(Self {
            parent_public_key: OtsPublicKey::from(parent.public()),
            start_identifier,
            end_identifier,
            entries,
        })
    }

    fn read_from<R: Read>(reader: &mut R) -> Result<Self, OtsError> {
        let mut public_key = [0u8; OTS_PUBLIC_KEY_LENGTH];
        reader.read_exact(&mut public_key)?;
        let start_identifier = read_u64(reader)?;
        let end_identifier = read_u64(reader)?;
        if end_identifier < start_identifier {
            return Err(OtsError::Corrupt("level identifier bounds are reversed".into()));
        }

        let mut entries = Vec::with_capacity((end_identifier - start_identifier + 1) as usize);
        for _ in 0..=(end_identifier - start_identifier) {
            entries.push(SignedPrivateKey::read_from(reader)?);
        }

        Ok(Self {
            parent_public_key: OtsPublicKey::new(public_key),
            start_identifier,
            end_identifier,
            entries,
        })
    }

    fn write_to<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        writer.write_all(self.parent_public_key.as_bytes())?;
        write_u64(writer, self.start_identifier)?;
        write_u64(writer, self.end_identifier)?;
        for entry in &self.entries {
            entry.write_to(writer)?;
        }
        Ok(())
    }

    /// Serialized size of this level at full capacity. The bounds never
    /// change, so offsets stay valid as entries are consumed.
    fn serialized_size(&self) -> u64 {
        LEVEL_HEADER_SIZE + (self.end_identifier - self.start_identifier + 1) * ENTRY_SIZE
    }

    fn index_of(&self, identifier: u64) -> usize {
        (self.end_identifier - identifier) as usize
    }

    /// The level's parent public key paired with the certification signature
    /// for `identifier`.
    fn public_key_signature(&self, identifier: u64) -> OtsSignaturePair {
        OtsSignaturePair {
            public_key: self.parent_public_key,
            signature: self.entries[self.index_of(identifier)].signature,
        }
    }

    /// Drop every entry for identifiers below `identifier`.
    fn wipe_until(&mut self, identifier: u64) {
        self.entries.truncate(self.index_of(identifier) + 1);
    }

    /// Take the private key for `identifier`, leaving zeroes behind.
    fn detach_private_key(&mut self, identifier: u64) -> [u8; OTS_PRIVATE_KEY_LENGTH] {
        let index = self.index_of(identifier);
        std::mem::take(&mut self.entries[index].private_key)
    }
}

/// The forward-secure one-time-signature tree.
///
/// Owned exclusively by its signer; every signature mutates the tree and its
/// backing storage.
pub struct OtsTree<S> {
    storage: S,
    options: OtsOptions,
    last_key_identifier: Option<OtsKeyIdentifier>,
    top: OtsLevel,
    low: Option<OtsLevel>,
}

impl<S: OtsStorage> OtsTree<S> {
    /// Create a fresh tree rooted at `root` and persist it to `storage`.
    pub fn create(
        root: Ed25519KeyPair,
        mut storage: S,
        options: OtsOptions,
    ) -> Result<Self, OtsError> {
        if options.dilution == 0 {
            return Err(OtsError::Corrupt("dilution must be non-zero".into()));
        }

        storage.seek(SeekFrom::Start(0))?;
        write_u64(&mut storage, options.dilution)?;
        write_key_identifier(&mut storage, &options.start_key_identifier)?;
        write_key_identifier(&mut storage, &options.end_key_identifier)?;
        write_key_identifier(&mut storage, &OtsKeyIdentifier::new(INVALID_BATCH_ID, 0))?;

        let top = OtsLevel::create(
            &root,
            options.start_key_identifier.batch_id,
            options.end_key_identifier.batch_id,
        )?;
        storage.seek(SeekFrom::Start(TREE_HEADER_SIZE))?;
        top.write_to(&mut storage)?;
        storage.flush()?;

        Ok(Self { storage, options, last_key_identifier: None, top, low: None })
    }

    /// Load a previously persisted tree from `storage`.
    pub fn from_storage(mut storage: S) -> Result<Self, OtsError> {
        storage.seek(SeekFrom::Start(0))?;
        let dilution = read_u64(&mut storage)?;
        let start_key_identifier = read_key_identifier(&mut storage)?;
        let end_key_identifier = read_key_identifier(&mut storage)?;
        let options = OtsOptions { dilution, start_key_identifier, end_key_identifier };
        if options.dilution == 0 {
            return Err(OtsError::Corrupt("dilution must be non-zero".into()));
        }

        let last = read_key_identifier(&mut storage)?;
        let mut top = OtsLevel::read_from(&mut storage)?;

        // if any sign() was issued prior to saving, the low level follows the
        // top level in storage; consumed entries were zeroed and are dropped
        // here for a consistent in-memory view
        let (last_key_identifier, low) = if last.batch_id == INVALID_BATCH_ID {
            (None, None)
        } else {
            top.wipe_until(last.batch_id);
            let mut low = OtsLevel::read_from(&mut storage)?;
            low.wipe_until(last.key_id);
            (Some(last), Some(low))
        };

        Ok(Self { storage, options, last_key_identifier, top, low })
    }

    /// The root public key. This is the signer's voting identity.
    pub fn root_public_key(&self) -> OtsPublicKey {
        self.top.parent_public_key
    }

    /// The options the tree was created with.
    pub fn options(&self) -> &OtsOptions {
        &self.options
    }

    /// Returns true if `key_identifier` is still usable for signing.
    pub fn can_sign(&self, key_identifier: &OtsKeyIdentifier) -> bool {
        if let Some(last) = &self.last_key_identifier {
            if key_identifier <= last {
                return false;
            }
        }

        if *key_identifier < self.options.start_key_identifier
            || *key_identifier > self.options.end_key_identifier
        {
            return false;
        }

        key_identifier.key_id < self.options.dilution
    }

    /// Sign `data` with the key at `key_identifier`.
    ///
    /// Consumes the key: the identifier must be strictly greater than the
    /// last one used, and all earlier key material is wiped.
    pub fn sign(
        &mut self,
        key_identifier: &OtsKeyIdentifier,
        data: &[u8],
    ) -> Result<OtsTreeSignature, OtsError> {
        if !self.can_sign(key_identifier) {
            return Err(OtsError::InvalidKeyIdentifier(*key_identifier));
        }

        let crosses_batch = self
            .last_key_identifier
            .map_or(true, |last| last.batch_id != key_identifier.batch_id);
        if crosses_batch {
            let end_key_id = if self.options.end_key_identifier.batch_id == key_identifier.batch_id
            {
                self.options.end_key_identifier.key_id
            } else {
                self.options.dilution - 1
            };

            let batch_key_pair = Self::detach_key_pair(
                &mut self.storage,
                &mut self.top,
                TREE_HEADER_SIZE,
                key_identifier.batch_id,
            )?;
            let low = OtsLevel::create(&batch_key_pair, key_identifier.key_id, end_key_id)?;
            self.storage.seek(SeekFrom::Start(self.low_level_offset()))?;
            low.write_to(&mut self.storage)?;
            self.low = Some(low);
        }

        let low_level_offset = self.low_level_offset();
        let low = self.low.as_mut().expect("low level exists after batch creation");
        let message_key_pair = Self::detach_key_pair(
            &mut self.storage,
            low,
            low_level_offset,
            key_identifier.key_id,
        )?;
        let message_signature = message_key_pair.sign(data);

        self.last_key_identifier = Some(*key_identifier);
        self.storage.seek(SeekFrom::Start(40))?;
        write_key_identifier(&mut self.storage, key_identifier)?;
        self.storage.flush()?;

        Ok(OtsTreeSignature {
            root: self.top.public_key_signature(key_identifier.batch_id),
            top: low.public_key_signature(key_identifier.key_id),
            bottom: OtsSignaturePair {
                public_key: OtsPublicKey::from(message_key_pair.public()),
                signature: OtsSignature::from(&message_signature),
            },
        })
    }

    fn low_level_offset(&self) -> u64 {
        TREE_HEADER_SIZE + self.top.serialized_size()
    }

    /// Take the key pair for `identifier` out of `level`, wiping it and all
    /// earlier entries from memory and storage.
    fn detach_key_pair(
        storage: &mut S,
        level: &mut OtsLevel,
        level_offset: u64,
        identifier: u64,
    ) -> Result<Ed25519KeyPair, OtsError> {
        let zeroes = [0u8; OTS_PRIVATE_KEY_LENGTH];
        let entry_offset =
            |index: usize| level_offset + LEVEL_HEADER_SIZE + index as u64 * ENTRY_SIZE;

        let index = level.index_of(identifier);
        for i in index + 1..level.entries.len() {
            storage.seek(SeekFrom::Start(entry_offset(i)))?;
            storage.write_all(&zeroes)?;
        }
        level.wipe_until(identifier);

        storage.seek(SeekFrom::Start(entry_offset(index)))?;
        storage.write_all(&zeroes)?;

        keypair_from_private(&level.detach_private_key(identifier))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::verify_ots_signature;
    use assert_matches::assert_matches;
    use rand::{rngs::StdRng, SeedableRng};
    use std::io::Cursor;

    fn test_options(dilution: u64, num_batches: u64) -> OtsOptions {
        OtsOptions {
            dilution,
            start_key_identifier: OtsKeyIdentifier::new(0, 0),
            end_key_identifier: OtsKeyIdentifier::new(num_batches - 1, dilution - 1),
        }
    }

    fn test_tree(dilution: u64, num_batches: u64) -> OtsTree<Cursor<Vec<u8>>> {
        let mut rng = StdRng::seed_from_u64(7);
        let root = Ed25519KeyPair::generate(&mut rng);
        OtsTree::create(root, Cursor::new(Vec::new()), test_options(dilution, num_batches))
            .unwrap()
    }

    #[test]
    fn sign_produces_verifiable_signature() {
        let mut tree = test_tree(4, 3);
        let key_identifier = OtsKeyIdentifier::new(1, 2);

        let signature = tree.sign(&key_identifier, b"payload").unwrap();

        assert!(verify_ots_signature(&signature, &key_identifier, b"payload"));
        assert_eq!(signature.root.public_key, tree.root_public_key());
    }

    #[test]
    fn verification_fails_for_wrong_identifier_or_payload() {
        let mut tree = test_tree(4, 3);
        let key_identifier = OtsKeyIdentifier::new(1, 2);
        let signature = tree.sign(&key_identifier, b"payload").unwrap();

        assert!(!verify_ots_signature(&signature, &OtsKeyIdentifier::new(1, 3), b"payload"));
        assert!(!verify_ots_signature(&signature, &OtsKeyIdentifier::new(2, 2), b"payload"));
        assert!(!verify_ots_signature(&signature, &key_identifier, b"other payload"));
    }

    #[test]
    fn identifiers_must_strictly_increase() {
        let mut tree = test_tree(4, 3);
        tree.sign(&OtsKeyIdentifier::new(1, 1), b"first").unwrap();

        assert_matches!(
            tree.sign(&OtsKeyIdentifier::new(1, 1), b"again"),
            Err(OtsError::InvalidKeyIdentifier(_))
        );
        assert_matches!(
            tree.sign(&OtsKeyIdentifier::new(0, 3), b"earlier"),
            Err(OtsError::InvalidKeyIdentifier(_))
        );

        // later identifiers still work
        tree.sign(&OtsKeyIdentifier::new(1, 2), b"later").unwrap();
    }

    #[test]
    fn rejects_identifiers_outside_bounds() {
        let mut tree = test_tree(4, 2);

        assert!(!tree.can_sign(&OtsKeyIdentifier::new(2, 0)));
        assert!(!tree.can_sign(&OtsKeyIdentifier::new(1, 4)));
        assert_matches!(
            tree.sign(&OtsKeyIdentifier::new(2, 0), b"payload"),
            Err(OtsError::InvalidKeyIdentifier(_))
        );
    }

    #[test]
    fn signing_across_batches_creates_fresh_levels() {
        let mut tree = test_tree(2, 3);

        for key_identifier in
            [OtsKeyIdentifier::new(0, 0), OtsKeyIdentifier::new(0, 1), OtsKeyIdentifier::new(2, 1)]
        {
            let signature = tree.sign(&key_identifier, b"payload").unwrap();
            assert!(verify_ots_signature(&signature, &key_identifier, b"payload"));
        }
    }

    #[test]
    fn reload_resumes_after_last_signature() {
        let mut rng = StdRng::seed_from_u64(42);
        let root = Ed25519KeyPair::generate(&mut rng);
        let mut tree =
            OtsTree::create(root, Cursor::new(Vec::new()), test_options(4, 3)).unwrap();
        let root_public_key = tree.root_public_key();
        tree.sign(&OtsKeyIdentifier::new(0, 2), b"payload").unwrap();

        let OtsTree { storage, .. } = tree;
        let mut reloaded = OtsTree::from_storage(storage).unwrap();

        assert_eq!(reloaded.root_public_key(), root_public_key);
        assert!(!reloaded.can_sign(&OtsKeyIdentifier::new(0, 2)));
        assert!(!reloaded.can_sign(&OtsKeyIdentifier::new(0, 1)));

        let key_identifier = OtsKeyIdentifier::new(1, 0);
        let signature = reloaded.sign(&key_identifier, b"payload").unwrap();
        assert!(verify_ots_signature(&signature, &key_identifier, b"payload"));
        assert_eq!(signature.root.public_key, root_public_key);
    }

    #[test]
    fn reload_of_unused_tree_starts_at_the_beginning() {
        let mut rng = StdRng::seed_from_u64(42);
        let root = Ed25519KeyPair::generate(&mut rng);
        let tree = OtsTree::create(root, Cursor::new(Vec::new()), test_options(4, 3)).unwrap();
        let OtsTree { storage, .. } = tree;

        let mut reloaded = OtsTree::from_storage(storage).unwrap();

        let key_identifier = OtsKeyIdentifier::new(0, 0);
        let signature = reloaded.sign(&key_identifier, b"payload").unwrap();
        assert!(verify_ots_signature(&signature, &key_identifier, b"payload"));
    }

    #[test]
    fn consumed_private_keys_are_zeroed_in_storage() {
        let mut tree = test_tree(4, 1);
        tree.sign(&OtsKeyIdentifier::new(0, 1), b"payload").unwrap();

        // low level holds key ids 3, 2, 1 at indexes 0, 1, 2
        let entries_offset = TREE_HEADER_SIZE + tree.top.serialized_size() + LEVEL_HEADER_SIZE;
        let entry = |index: u64| {
            let start = (entries_offset + index * ENTRY_SIZE) as usize;
            &tree.storage.get_ref()[start..start + OTS_PRIVATE_KEY_LENGTH]
        };

        // the consumed key is wiped; the unconsumed ones remain
        assert_eq!(entry(2), &[0u8; OTS_PRIVATE_KEY_LENGTH]);
        assert_ne!(entry(0), &[0u8; OTS_PRIVATE_KEY_LENGTH]);
        assert_ne!(entry(1), &[0u8; OTS_PRIVATE_KEY_LENGTH]);
    }
}
