// SPDX-License-Identifier: Apache-2.0
//! Interfaces of the collaborators the finalization core consumes.

use mn_types::{
    BlockHash, FinalizationProof, FinalizationRound, FinalizationStatistics, Height,
};
use std::future::Future;

/// Read access to the host's block storage.
pub trait BlockStore: Send + Sync {
    /// The current chain height.
    fn chain_height(&self) -> Height;

    /// Block hashes for up to `max_count` consecutive heights starting at
    /// `height`. Returns fewer (possibly none) when the range runs past the
    /// chain tip or before its pruning horizon.
    fn load_hashes_from(&self, height: Height, max_count: usize) -> Vec<BlockHash>;
}

/// Observer notified whenever a block becomes final.
pub trait FinalizationSubscriber: Send + Sync {
    /// Called after a proof for (`height`, `hash`) decided in `round` has
    /// been persisted.
    fn notify_finalized_block(&self, round: FinalizationRound, height: Height, hash: BlockHash);
}

/// Remote peer API for pulling finality proofs.
pub trait RemoteProofClient: Send + Sync {
    /// The peer's latest finalization statistics.
    fn finalization_statistics(
        &self,
    ) -> impl Future<Output = eyre::Result<FinalizationStatistics>> + Send;

    /// The proof finalizing exactly `height`.
    fn proof_at(&self, height: Height) -> impl Future<Output = eyre::Result<FinalizationProof>> + Send;
}
