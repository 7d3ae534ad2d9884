// SPDX-License-Identifier: Apache-2.0
//! Pulls missing finality proofs from remote peers.

use crate::{BlockStore, RemoteProofClient};
use mn_storage::ProofStorageCache;
use mn_types::{grouped_height, FinalizationProof};
use std::sync::Arc;
use tracing::{debug, warn};

/// Outcome of one synchronization attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Nothing to pull right now.
    Neutral,
    /// A proof was pulled and saved.
    Success,
    /// The peer misbehaved or the attempt failed.
    Failure,
}

/// Validates a proof pulled from a peer before it is persisted.
pub type ProofValidator = Box<dyn Fn(&FinalizationProof) -> bool + Send + Sync>;

/// Pulls the proof for the next voting-set boundary once the local chain has
/// grown past it.
pub struct ProofSynchronizer {
    voting_set_grouping: u64,
    block_store: Arc<dyn BlockStore>,
    proof_storage: Arc<ProofStorageCache>,
    proof_validator: ProofValidator,
}

impl ProofSynchronizer {
    /// Create a synchronizer persisting into `proof_storage`.
    pub fn new(
        voting_set_grouping: u64,
        block_store: Arc<dyn BlockStore>,
        proof_storage: Arc<ProofStorageCache>,
        proof_validator: ProofValidator,
    ) -> Self {
        Self { voting_set_grouping, block_store, proof_storage, proof_validator }
    }

    /// Attempt to pull the next proof from `client`.
    pub async fn synchronize<C: RemoteProofClient>(&self, client: &C) -> SyncOutcome {
        let local_chain_height = self.block_store.chain_height();
        let local_finalized_height = self.proof_storage.view().statistics().height;
        let next_proof_height = grouped_height(
            local_finalized_height + self.voting_set_grouping,
            self.voting_set_grouping,
        );

        if next_proof_height >= local_chain_height {
            return SyncOutcome::Neutral;
        }

        let remote_statistics = match client.finalization_statistics().await {
            Ok(statistics) => statistics,
            Err(error) => {
                warn!(target: "finality::sync", %error, "failed to pull remote finalization statistics");
                return SyncOutcome::Failure;
            }
        };

        if remote_statistics.height < next_proof_height {
            return SyncOutcome::Neutral;
        }

        let proof = match client.proof_at(next_proof_height).await {
            Ok(proof) => proof,
            Err(error) => {
                warn!(
                    target: "finality::sync",
                    %error,
                    next_proof_height,
                    "failed to pull proof from peer",
                );
                return SyncOutcome::Failure;
            }
        };

        debug!(target: "finality::sync", next_proof_height, "peer returned proof");

        if proof.height != next_proof_height {
            warn!(target: "finality::sync", height = proof.height, "peer returned proof with wrong height");
            return SyncOutcome::Failure;
        }

        if !(self.proof_validator)(&proof) {
            warn!(target: "finality::sync", height = proof.height, "peer returned proof that failed validation");
            return SyncOutcome::Failure;
        }

        if let Err(error) = self.proof_storage.modifier().save_proof(&proof) {
            warn!(target: "finality::sync", %error, "failed to save pulled proof");
            return SyncOutcome::Failure;
        }

        SyncOutcome::Success
    }
}
