// SPDX-License-Identifier: Apache-2.0
//! Gates deciding when the local voter may advance through a round's stages.

use crate::MultiRoundMessageAggregator;
use mn_config::FinalizationConfig;
use mn_types::{
    is_voting_set_end, FinalizationRound, HeightHashPair, TimestampMs,
};
use std::sync::Arc;
use tracing::debug;

/// Per-round predicate trio gating the local voter's progress.
///
/// One advancer lives for exactly one round; the orchestrator recreates it
/// on every round start. Tests inject fakes through this abstraction.
pub trait FinalizationStageAdvancer: Send + Sync {
    /// Returns true if the local prevote may be sent at `time`.
    fn can_send_prevote(&self, time: TimestampMs) -> bool;

    /// Returns the precommit target if the local precommit may be sent at
    /// `time`.
    fn can_send_precommit(&self, time: TimestampMs) -> Option<HeightHashPair>;

    /// Returns true if the next round may start.
    fn can_start_next_round(&self) -> bool;
}

struct PollingTimer {
    start_time: TimestampMs,
    step_duration_ms: u64,
}

impl PollingTimer {
    fn is_elapsed(&self, time: TimestampMs, num_steps: u64) -> bool {
        time >= self.start_time + num_steps * self.step_duration_ms
    }
}

/// The default advancer: combines the step timer with round completability
/// and holds rounds at voting-set boundaries until finality crosses them.
pub struct DefaultStageAdvancer {
    round: FinalizationRound,
    timer: PollingTimer,
    voting_set_grouping: u64,
    message_aggregator: Arc<MultiRoundMessageAggregator>,
}

impl DefaultStageAdvancer {
    /// Create an advancer for `round` started at `start_time`.
    pub fn new(
        config: &FinalizationConfig,
        round: FinalizationRound,
        start_time: TimestampMs,
        message_aggregator: Arc<MultiRoundMessageAggregator>,
    ) -> Self {
        debug!(target: "finality::advancer", %round, start_time, "creating stage advancer");
        Self {
            round,
            timer: PollingTimer { start_time, step_duration_ms: config.step_duration_ms() },
            voting_set_grouping: config.voting_set_grouping,
            message_aggregator,
        }
    }
}

impl FinalizationStageAdvancer for DefaultStageAdvancer {
    fn can_send_prevote(&self, time: TimestampMs) -> bool {
        if self.timer.is_elapsed(time, 1) {
            return true;
        }

        let view = self.message_aggregator.view();
        view.try_get_round_context(self.round)
            .is_some_and(|context| context.is_completable())
    }

    fn can_send_precommit(&self, time: TimestampMs) -> Option<HeightHashPair> {
        let view = self.message_aggregator.view();
        let context = view.try_get_round_context(self.round)?;

        let best_prevote = context.try_find_best_prevote()?;

        let previous_round =
            FinalizationRound::new(self.round.epoch, self.round.point.saturating_sub(1));
        let estimate = view.find_estimate(previous_round);
        if !context.is_descendant(&estimate, &best_prevote) {
            debug!(
                target: "finality::advancer",
                round = %self.round,
                %estimate,
                %best_prevote,
                "cannot send precommit, best prevote does not extend previous estimate",
            );
            return None;
        }

        if !self.timer.is_elapsed(time, 2) && !context.is_completable() {
            return None;
        }

        Some(best_prevote)
    }

    fn can_start_next_round(&self) -> bool {
        let view = self.message_aggregator.view();
        let Some(context) = view.try_get_round_context(self.round) else {
            return false;
        };

        if !context.is_completable() {
            return false;
        }

        // the next voting set must not start until finality has crossed the
        // voting set boundary
        let estimate = view.find_estimate(self.round);
        if !is_voting_set_end(estimate.height, self.voting_set_grouping) {
            return true;
        }

        context
            .try_find_best_precommit()
            .is_some_and(|best_precommit| {
                is_voting_set_end(best_precommit.height, self.voting_set_grouping)
            })
    }
}
