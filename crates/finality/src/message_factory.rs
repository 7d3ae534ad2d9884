// SPDX-License-Identifier: Apache-2.0
//! Builds and signs this node's own prevote and precommit messages.

use crate::{BlockStore, FinalityResult};
use mn_config::FinalizationConfig;
use mn_storage::ProofStorageCache;
use mn_types::{
    crypto::{OtsStorage, OtsTree},
    prepare_message, BlockHash, FinalizationMessage, FinalizationRound, FinalizationStage, Height,
    StepIdentifier,
};
use std::sync::Arc;
use tracing::debug;

/// Builds signed local votes.
///
/// The orchestrator owns a factory through this trait; tests substitute one
/// that does not touch real key material.
pub trait MessageFactory: Send {
    /// Build this node's prevote for the upcoming point of `round`'s epoch.
    fn create_prevote(&mut self, round: FinalizationRound) -> FinalityResult<FinalizationMessage>;

    /// Build this node's precommit for (`height`, `hash`).
    fn create_precommit(
        &mut self,
        round: FinalizationRound,
        height: Height,
        hash: BlockHash,
    ) -> FinalityResult<FinalizationMessage>;
}

/// Largest multiple of `multiple` at or below `value`.
fn clamp_down(value: u64, multiple: u64) -> u64 {
    (value / multiple) * multiple
}

/// Smallest multiple of `multiple` at or above `value`.
fn clamp_up(value: u64, multiple: u64) -> u64 {
    if value % multiple == 0 {
        value
    } else {
        (value / multiple + 1) * multiple
    }
}

/// The default factory: derives the prevote hash window from block storage
/// and signs with the exclusively owned one-time-signature tree.
pub struct DefaultMessageFactory<S> {
    config: FinalizationConfig,
    block_store: Arc<dyn BlockStore>,
    proof_storage: Arc<ProofStorageCache>,
    ots_tree: OtsTree<S>,
}

impl<S: OtsStorage> DefaultMessageFactory<S> {
    /// Create a factory; the tree is moved in and owned exclusively.
    pub fn new(
        config: FinalizationConfig,
        block_store: Arc<dyn BlockStore>,
        proof_storage: Arc<ProofStorageCache>,
        ots_tree: OtsTree<S>,
    ) -> Self {
        Self { config, block_store, proof_storage, ots_tree }
    }

    /// The hash window `[start_height, tail]` where the tail is the chain
    /// height clamped down to the prevote blocks multiple, bounded by the
    /// per-point maximum.
    fn load_prevote_hashes(&self, start_height: Height) -> Vec<BlockHash> {
        let multiple = self.config.prevote_blocks_multiple as u64;
        let clamped_chain_height = clamp_down(self.block_store.chain_height(), multiple);

        let mut num_hashes = if clamped_chain_height > start_height {
            clamped_chain_height - start_height + 1
        } else {
            1
        };

        let max_hashes = self.config.max_hashes_per_point as u64;
        if num_hashes > max_hashes {
            num_hashes -= clamp_up(num_hashes - max_hashes, multiple);
        }

        self.block_store.load_hashes_from(start_height, num_hashes as usize)
    }
}

impl<S: OtsStorage> MessageFactory for DefaultMessageFactory<S> {
    fn create_prevote(&mut self, round: FinalizationRound) -> FinalityResult<FinalizationMessage> {
        let statistics = self.proof_storage.view().statistics();

        let mut hashes = self.load_prevote_hashes(statistics.height);
        if hashes.is_empty() {
            // chain shorter than the finalized height; vote for what is final
            hashes = vec![statistics.hash];
        }

        let step_identifier = StepIdentifier::new(
            round.epoch,
            statistics.round.point + 1,
            FinalizationStage::Prevote,
        );
        debug!(
            target: "finality::factory",
            step = %step_identifier,
            height = statistics.height,
            num_hashes = hashes.len(),
            "creating prevote",
        );

        Ok(prepare_message(
            &mut self.ots_tree,
            step_identifier,
            statistics.height,
            hashes,
            self.config.ots_key_dilution,
        )?)
    }

    fn create_precommit(
        &mut self,
        round: FinalizationRound,
        height: Height,
        hash: BlockHash,
    ) -> FinalityResult<FinalizationMessage> {
        let statistics = self.proof_storage.view().statistics();

        let step_identifier = StepIdentifier::new(
            round.epoch,
            statistics.round.point + 1,
            FinalizationStage::Precommit,
        );
        debug!(target: "finality::factory", step = %step_identifier, height, "creating precommit");

        Ok(prepare_message(
            &mut self.ots_tree,
            step_identifier,
            height,
            vec![hash],
            self.config.ots_key_dilution,
        )?)
    }
}
