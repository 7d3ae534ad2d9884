// SPDX-License-Identifier: Apache-2.0
//! Read/write cached access to proof storage.

use crate::{ProofStorage, StoreResult};
use mn_types::{
    FinalizationEpoch, FinalizationProof, FinalizationStatistics, Height, HeightHashPair,
};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Shares one [`ProofStorage`] between readers and writers.
///
/// Readers take a [`ProofStorageView`], writers a [`ProofStorageModifier`];
/// while either handle is alive the other side is locked out, and the lock
/// is released when the handle drops.
pub struct ProofStorageCache {
    storage: RwLock<Box<dyn ProofStorage>>,
}

impl ProofStorageCache {
    /// Wrap `storage` for shared access.
    pub fn new(storage: Box<dyn ProofStorage>) -> Self {
        Self { storage: RwLock::new(storage) }
    }

    /// Acquire a read-locked view.
    pub fn view(&self) -> ProofStorageView<'_> {
        ProofStorageView { guard: self.storage.read() }
    }

    /// Acquire a write-locked modifier.
    pub fn modifier(&self) -> ProofStorageModifier<'_> {
        ProofStorageModifier { guard: self.storage.write() }
    }
}

/// Read-locked access to proof storage.
pub struct ProofStorageView<'a> {
    guard: RwLockReadGuard<'a, Box<dyn ProofStorage>>,
}

impl ProofStorageView<'_> {
    /// The latest finalized statistics.
    pub fn statistics(&self) -> FinalizationStatistics {
        self.guard.statistics()
    }

    /// Load the proof finalizing `epoch`.
    pub fn load_proof_at_epoch(&self, epoch: FinalizationEpoch) -> StoreResult<FinalizationProof> {
        self.guard.load_proof_at_epoch(epoch)
    }

    /// Load the proof that finalized exactly `height`.
    pub fn load_proof_at_height(&self, height: Height) -> StoreResult<Option<FinalizationProof>> {
        self.guard.load_proof_at_height(height)
    }

    /// Load up to `max_count` finalized (height, hash) pairs from `epoch`.
    pub fn load_finalized_hashes_from(
        &self,
        epoch: FinalizationEpoch,
        max_count: usize,
    ) -> StoreResult<Vec<HeightHashPair>> {
        self.guard.load_finalized_hashes_from(epoch, max_count)
    }
}

/// Write-locked access to proof storage.
pub struct ProofStorageModifier<'a> {
    guard: RwLockWriteGuard<'a, Box<dyn ProofStorage>>,
}

impl ProofStorageModifier<'_> {
    /// Persist `proof` and advance the statistics.
    pub fn save_proof(&mut self, proof: &FinalizationProof) -> StoreResult<()> {
        self.guard.save_proof(proof)
    }
}
