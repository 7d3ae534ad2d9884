// SPDX-License-Identifier: Apache-2.0
//! Drives the local voter through rounds and finalizes decided blocks.

use crate::{
    FinalityResult, FinalizationStageAdvancer, FinalizationSubscriber, MessageFactory,
    MultiRoundMessageAggregator,
};
use mn_storage::ProofStorageCache;
use mn_types::{
    assemble_proof, FinalizationEpoch, FinalizationMessage, FinalizationRound,
    FinalizationStatistics, TimestampMs, VotingStatus,
};
use std::sync::Arc;
use tracing::debug;

/// Creates the stage advancer for a freshly started round.
pub type StageAdvancerFactory =
    Box<dyn Fn(FinalizationRound, TimestampMs) -> Box<dyn FinalizationStageAdvancer> + Send + Sync>;

/// Receives this node's outbound votes.
pub type MessageSink = Box<dyn Fn(Arc<FinalizationMessage>) + Send + Sync>;

/// Orchestrates finalization progress.
///
/// Polled periodically; emits at most one prevote and one precommit per
/// round and advances the point once the round can no longer flip.
pub struct FinalizationOrchestrator {
    voting_status: VotingStatus,
    stage_advancer_factory: StageAdvancerFactory,
    message_sink: MessageSink,
    message_factory: Box<dyn MessageFactory>,
    stage_advancer: Option<Box<dyn FinalizationStageAdvancer>>,
}

impl FinalizationOrchestrator {
    /// Create an orchestrator resuming from `voting_status`.
    pub fn new(
        voting_status: VotingStatus,
        stage_advancer_factory: StageAdvancerFactory,
        message_sink: MessageSink,
        message_factory: Box<dyn MessageFactory>,
    ) -> Self {
        debug!(
            target: "finality::orchestrator",
            round = %voting_status.round,
            has_sent_prevote = voting_status.has_sent_prevote,
            has_sent_precommit = voting_status.has_sent_precommit,
            "creating finalization orchestrator",
        );

        Self {
            voting_status,
            stage_advancer_factory,
            message_sink,
            message_factory,
            stage_advancer: None,
        }
    }

    /// The current voting status.
    pub fn voting_status(&self) -> VotingStatus {
        self.voting_status
    }

    /// Move to `epoch`, resetting the point.
    ///
    /// A no-op for the current epoch; panics on a decrease, which is a
    /// programming error in the caller.
    pub fn set_epoch(&mut self, epoch: FinalizationEpoch) {
        assert!(
            epoch >= self.voting_status.round.epoch,
            "cannot decrease epoch from {} to {epoch}",
            self.voting_status.round.epoch,
        );

        if epoch == self.voting_status.round.epoch {
            return;
        }

        self.voting_status = VotingStatus::new(FinalizationRound::new(epoch, 1));
        self.stage_advancer = None;
    }

    /// Check progress given the current `time`.
    pub fn poll(&mut self, time: TimestampMs) -> FinalityResult<()> {
        // on the first poll keep the restored flags instead of starting the
        // round over
        if self.stage_advancer.is_none() {
            self.stage_advancer =
                Some((self.stage_advancer_factory)(self.voting_status.round, time));
        }

        let advancer = self.stage_advancer.as_ref().expect("stage advancer was just created");

        if !self.voting_status.has_sent_prevote && advancer.can_send_prevote(time) {
            let message = self.message_factory.create_prevote(self.voting_status.round)?;
            (self.message_sink)(Arc::new(message));
            self.voting_status.has_sent_prevote = true;
        }

        if !self.voting_status.has_sent_precommit {
            if let Some(target) = advancer.can_send_precommit(time) {
                let message = self.message_factory.create_precommit(
                    self.voting_status.round,
                    target.height,
                    target.hash,
                )?;
                (self.message_sink)(Arc::new(message));
                self.voting_status.has_sent_precommit = true;
            }
        }

        if self.voting_status.has_sent_precommit && advancer.can_start_next_round() {
            self.voting_status.round = self.voting_status.round.next_point();
            self.start_round(time);
        }

        Ok(())
    }

    fn start_round(&mut self, time: TimestampMs) {
        debug!(target: "finality::orchestrator", round = %self.voting_status.round, "starting round");
        self.voting_status = VotingStatus::new(self.voting_status.round);
        self.stage_advancer = Some((self.stage_advancer_factory)(self.voting_status.round, time));
    }
}

/// Periodic action finalizing as many blocks as the aggregated votes allow.
pub struct Finalizer {
    message_aggregator: Arc<MultiRoundMessageAggregator>,
    subscriber: Arc<dyn FinalizationSubscriber>,
    proof_storage: Arc<ProofStorageCache>,
}

impl Finalizer {
    /// Create a finalizer over `message_aggregator` persisting into
    /// `proof_storage`.
    pub fn new(
        message_aggregator: Arc<MultiRoundMessageAggregator>,
        subscriber: Arc<dyn FinalizationSubscriber>,
        proof_storage: Arc<ProofStorageCache>,
    ) -> Self {
        Self { message_aggregator, subscriber, proof_storage }
    }

    /// Persist a proof for the current best precommit, if it moves finality
    /// forward, then prune the rounds it supersedes.
    pub fn poll(&self) -> FinalityResult<()> {
        let Some(descriptor) = self.message_aggregator.view().try_find_best_precommit() else {
            return Ok(());
        };

        if self.proof_storage.view().statistics().height == descriptor.target.height {
            return Ok(());
        }

        let statistics = FinalizationStatistics {
            round: descriptor.round,
            height: descriptor.target.height,
            hash: descriptor.target.hash,
        };
        let proof = assemble_proof(statistics, descriptor.proof);
        self.proof_storage.modifier().save_proof(&proof)?;

        self.subscriber.notify_finalized_block(
            descriptor.round,
            descriptor.target.height,
            descriptor.target.hash,
        );

        self.message_aggregator.modifier().prune();
        Ok(())
    }
}
