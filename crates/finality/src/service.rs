// SPDX-License-Identifier: Apache-2.0
//! Wires the finalization core into the host's task scheduler.

use crate::{
    BlockStore, FinalityResult, Finalizer, FinalizationOrchestrator, MultiRoundMessageAggregator,
    ProofSynchronizer, RemoteProofClient,
};
use mn_config::FinalizationConfig;
use mn_storage::{ProofStorageCache, VotingStatusFile};
use mn_types::{
    now_ms, voting_set_end_height, FinalizationEpoch, FinalizationMessage, TaskManager,
    TimestampMs,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Epoch transition decision for one poll.
enum EpochStatus {
    /// Keep voting in the current epoch.
    Continue,
    /// The epoch is finished but the local chain has not caught up yet.
    Wait,
    /// Finality crossed the epoch's voting-set boundary; advance.
    Advance,
}

/// One poll's worth of finalization work: epoch transitions, the voting
/// orchestrator, voting-status persistence and the finalizer.
pub struct FinalizationDriver {
    voting_set_grouping: u64,
    message_aggregator: Arc<MultiRoundMessageAggregator>,
    proof_storage: Arc<ProofStorageCache>,
    block_store: Arc<dyn BlockStore>,
    orchestrator: FinalizationOrchestrator,
    voting_status_file: VotingStatusFile,
    finalizer: Finalizer,
}

impl FinalizationDriver {
    /// Assemble a driver from its wired collaborators.
    pub fn new(
        voting_set_grouping: u64,
        message_aggregator: Arc<MultiRoundMessageAggregator>,
        proof_storage: Arc<ProofStorageCache>,
        block_store: Arc<dyn BlockStore>,
        orchestrator: FinalizationOrchestrator,
        voting_status_file: VotingStatusFile,
        finalizer: Finalizer,
    ) -> Self {
        Self {
            voting_set_grouping,
            message_aggregator,
            proof_storage,
            block_store,
            orchestrator,
            voting_status_file,
            finalizer,
        }
    }

    /// Run one poll at `time`.
    pub fn poll(&mut self, time: TimestampMs) -> FinalityResult<()> {
        let round = self.orchestrator.voting_status().round;

        match self.calculate_epoch_status(round.epoch) {
            EpochStatus::Wait => return Ok(()),
            EpochStatus::Advance => {
                self.orchestrator.set_epoch(round.epoch + 1);
                debug!(
                    target: "finality::service",
                    round = %self.orchestrator.voting_status().round,
                    "advancing to next epoch",
                );
            }
            EpochStatus::Continue => {}
        }

        let round = self.orchestrator.voting_status().round;
        if round > self.message_aggregator.view().max_finalization_round() {
            self.message_aggregator.modifier().set_max_finalization_round(round);
        }

        self.orchestrator.poll(time)?;
        self.voting_status_file.save(&self.orchestrator.voting_status())?;
        self.finalizer.poll()
    }

    /// Decide whether `epoch` is finished.
    ///
    /// The epoch ends once the voting-set end height is finalized; voting in
    /// the next epoch has to wait until the local chain holds that block.
    fn calculate_epoch_status(&self, epoch: FinalizationEpoch) -> EpochStatus {
        let statistics = self.proof_storage.view().statistics();
        let voting_set_end = voting_set_end_height(epoch, self.voting_set_grouping);
        if statistics.height != voting_set_end {
            return EpochStatus::Continue;
        }

        let local_chain_height = self.block_store.chain_height();
        if local_chain_height < statistics.height {
            warn!(
                target: "finality::service",
                epoch,
                local_chain_height,
                finalized_height = statistics.height,
                "waiting for sync before transitioning epoch",
            );
            return EpochStatus::Wait;
        }

        let local_hashes = self.block_store.load_hashes_from(statistics.height, 1);
        if local_hashes.first() != Some(&statistics.hash) {
            warn!(
                target: "finality::service",
                epoch,
                finalized_height = statistics.height,
                "waiting for sync before transitioning epoch, local hash differs",
            );
            return EpochStatus::Wait;
        }

        EpochStatus::Advance
    }
}

/// Spawn the finalization tasks on `task_manager`:
///
/// - message ingestion feeding the aggregator
/// - the voting poll (when voting is enabled)
/// - periodic proof synchronization from a remote peer
pub fn spawn_finalization_tasks<C>(
    config: &FinalizationConfig,
    task_manager: &TaskManager,
    message_aggregator: Arc<MultiRoundMessageAggregator>,
    mut driver: FinalizationDriver,
    synchronizer: ProofSynchronizer,
    remote_client: C,
    mut message_rx: mpsc::Receiver<Arc<FinalizationMessage>>,
) where
    C: RemoteProofClient + 'static,
{
    let mut rx_shutdown = task_manager.subscribe_shutdown();
    task_manager.spawn_task("pull finalization messages", async move {
        loop {
            tokio::select! {
                message = message_rx.recv() => {
                    let Some(message) = message else { break };
                    let result = message_aggregator.modifier().add(message);
                    if result.is_success() {
                        debug!(target: "finality::service", %result, "processed finalization message");
                    } else {
                        warn!(target: "finality::service", %result, "rejected finalization message");
                    }
                }
                _ = rx_shutdown.wait() => break,
            }
        }
    });

    if config.enable_voting {
        let mut rx_shutdown = task_manager.subscribe_shutdown();
        let poll_interval = config.step_duration / 4;
        task_manager.spawn_task("finalization voting", async move {
            let mut interval = tokio::time::interval(poll_interval);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(error) = driver.poll(now_ms()) {
                            warn!(target: "finality::service", %error, "finalization poll failed");
                        }
                    }
                    _ = rx_shutdown.wait() => break,
                }
            }
        });
    }

    let mut rx_shutdown = task_manager.subscribe_shutdown();
    let sync_interval = config.step_duration;
    task_manager.spawn_task("finalization proof sync", async move {
        let mut interval = tokio::time::interval(sync_interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let outcome = synchronizer.synchronize(&remote_client).await;
                    debug!(target: "finality::service", ?outcome, "proof synchronization attempt");
                }
                _ = rx_shutdown.wait() => break,
            }
        }
    });
}
