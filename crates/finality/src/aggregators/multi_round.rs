// SPDX-License-Identifier: Apache-2.0
//! The ordered collection of round aggregators.

use crate::{RoundContext, RoundMessageAddResult, RoundMessageAggregator};
use mn_types::{FinalizationMessage, FinalizationRound, Height, HeightHashPair, ShortHash};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::{collections::{BTreeMap, HashSet}, sync::Arc};
use tracing::debug;

/// Builds the aggregator for a newly observed round, given the round and the
/// height carried by its first message.
pub type RoundAggregatorFactory =
    Box<dyn Fn(FinalizationRound, Height) -> RoundMessageAggregator + Send + Sync>;

/// Result of the cross-round best-precommit search.
#[derive(Clone, Debug)]
pub struct BestPrecommitDescriptor {
    /// The round holding the best precommit.
    pub round: FinalizationRound,
    /// The finalizable (height, hash).
    pub target: HeightHashPair,
    /// The round's full message payload, witnessing the decision.
    pub proof: Vec<Arc<FinalizationMessage>>,
}

struct MultiRoundAggregatorState {
    max_response_size: u64,
    min_finalization_round: FinalizationRound,
    max_finalization_round: FinalizationRound,
    previous_finalized: HeightHashPair,
    round_aggregator_factory: RoundAggregatorFactory,
    rounds: BTreeMap<FinalizationRound, RoundMessageAggregator>,
}

/// Collects votes across rounds behind a reader/writer lock.
///
/// Queries go through a read-locked [`MultiRoundAggregatorView`], mutations
/// through a write-locked [`MultiRoundAggregatorModifier`]; both are scoped
/// handles that release the lock on drop.
pub struct MultiRoundMessageAggregator {
    state: RwLock<MultiRoundAggregatorState>,
}

impl MultiRoundMessageAggregator {
    /// Create an aggregator admitting rounds starting at `round`, with
    /// `previous_finalized` as the estimate fallback.
    pub fn new(
        max_response_size: u64,
        round: FinalizationRound,
        previous_finalized: HeightHashPair,
        round_aggregator_factory: RoundAggregatorFactory,
    ) -> Self {
        Self {
            state: RwLock::new(MultiRoundAggregatorState {
                max_response_size,
                min_finalization_round: round,
                max_finalization_round: round,
                previous_finalized,
                round_aggregator_factory,
                rounds: BTreeMap::new(),
            }),
        }
    }

    /// Acquire a read-locked view.
    pub fn view(&self) -> MultiRoundAggregatorView<'_> {
        MultiRoundAggregatorView { state: self.state.read() }
    }

    /// Acquire a write-locked modifier.
    pub fn modifier(&self) -> MultiRoundAggregatorModifier<'_> {
        MultiRoundAggregatorModifier { state: self.state.write() }
    }
}

/// Read-locked snapshot of the aggregator.
pub struct MultiRoundAggregatorView<'a> {
    state: RwLockReadGuard<'a, MultiRoundAggregatorState>,
}

impl MultiRoundAggregatorView<'_> {
    /// Number of tracked rounds.
    pub fn size(&self) -> usize {
        self.state.rounds.len()
    }

    /// The lowest admissible round.
    pub fn min_finalization_round(&self) -> FinalizationRound {
        self.state.min_finalization_round
    }

    /// The highest admissible round.
    pub fn max_finalization_round(&self) -> FinalizationRound {
        self.state.max_finalization_round
    }

    /// The round context for `round`, if any message arrived for it.
    pub fn try_get_round_context(&self, round: FinalizationRound) -> Option<&RoundContext> {
        self.state.rounds.get(&round).map(|aggregator| aggregator.round_context())
    }

    /// The estimate of the latest round at or before `round` that has one,
    /// falling back to the previously finalized block.
    pub fn find_estimate(&self, round: FinalizationRound) -> HeightHashPair {
        for aggregator in self.state.rounds.range(..=round).rev().map(|(_, a)| a) {
            if let Some(estimate) = aggregator.round_context().try_find_estimate() {
                return estimate;
            }
        }

        self.state.previous_finalized
    }

    /// The best precommit of the latest round that has one, with the round's
    /// messages as proof payload.
    pub fn try_find_best_precommit(&self) -> Option<BestPrecommitDescriptor> {
        for (round, aggregator) in self.state.rounds.iter().rev() {
            if let Some(target) = aggregator.round_context().try_find_best_precommit() {
                return Some(BestPrecommitDescriptor {
                    round: *round,
                    target,
                    proof: aggregator.unknown_messages(&HashSet::new()),
                });
            }
        }

        None
    }

    /// Short hashes of every message across all rounds.
    pub fn short_hashes(&self) -> Vec<ShortHash> {
        self.state
            .rounds
            .values()
            .flat_map(|aggregator| aggregator.short_hashes())
            .collect()
    }

    /// Messages from rounds at or after `round` whose short hashes are not
    /// in `known_short_hashes`, stopping before the response byte budget is
    /// exceeded.
    pub fn unknown_messages(
        &self,
        round: FinalizationRound,
        known_short_hashes: &HashSet<ShortHash>,
    ) -> Vec<Arc<FinalizationMessage>> {
        let mut total_size = 0u64;
        let mut all_messages = Vec::new();
        for aggregator in self.state.rounds.range(round..).map(|(_, a)| a) {
            for message in aggregator.unknown_messages(known_short_hashes) {
                total_size += message.serialized_size() as u64;
                if total_size > self.state.max_response_size {
                    return all_messages;
                }

                all_messages.push(message);
            }
        }

        all_messages
    }
}

/// Write-locked handle mutating the aggregator.
pub struct MultiRoundAggregatorModifier<'a> {
    state: RwLockWriteGuard<'a, MultiRoundAggregatorState>,
}

impl MultiRoundAggregatorModifier<'_> {
    /// Raise the highest admissible round.
    ///
    /// Panics if `round` is below the minimum; that is a programming error
    /// in the caller.
    pub fn set_max_finalization_round(&mut self, round: FinalizationRound) {
        assert!(
            round >= self.state.min_finalization_round,
            "cannot set max finalization round {round} below min {}",
            self.state.min_finalization_round,
        );

        self.state.max_finalization_round = round;
    }

    /// Route `message` to its round's aggregator, creating the aggregator on
    /// first contact.
    pub fn add(&mut self, message: Arc<FinalizationMessage>) -> RoundMessageAddResult {
        let round = message.step_identifier.round();
        if round < self.state.min_finalization_round || round > self.state.max_finalization_round {
            return RoundMessageAddResult::FailureInvalidPoint;
        }

        let state = &mut *self.state;
        let aggregator = state.rounds.entry(round).or_insert_with(|| {
            (state.round_aggregator_factory)(round, message.height)
        });

        aggregator.add(message)
    }

    /// Drop rounds made irrelevant by the last best precommit.
    ///
    /// The estimate of the nearest earlier round becomes the new fallback,
    /// preserving estimate continuity for the rounds that remain.
    pub fn prune(&mut self) {
        let last_with_best_precommit = self
            .state
            .rounds
            .iter()
            .filter(|(_, aggregator)| {
                aggregator.round_context().try_find_best_precommit().is_some()
            })
            .map(|(round, _)| *round)
            .next_back();

        let Some(prune_round) = last_with_best_precommit else {
            return;
        };

        if let Some(estimate) = self
            .state
            .rounds
            .range(..prune_round)
            .rev()
            .find_map(|(_, aggregator)| aggregator.round_context().try_find_estimate())
        {
            self.state.previous_finalized = estimate;
        }

        self.state.rounds.retain(|round, _| *round >= prune_round);
        self.state.min_finalization_round = prune_round;

        debug!(
            target: "finality::aggregator",
            min_round = %prune_round,
            remaining = self.state.rounds.len(),
            "pruned finalized rounds",
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{TestCommittee, TEST_ROUND};
    use mn_types::BlockHash;

    const LAST_FINALIZED_HEIGHT: Height = 120;

    fn previous_finalized() -> HeightHashPair {
        HeightHashPair::new(LAST_FINALIZED_HEIGHT, BlockHash::repeat_byte(0x77))
    }

    fn setup() -> (TestCommittee, MultiRoundMessageAggregator) {
        let committee = TestCommittee::new(&[400, 350, 250], LAST_FINALIZED_HEIGHT);
        let aggregator = MultiRoundMessageAggregator::new(
            committee.config().message_synchronization_max_response_size,
            TEST_ROUND,
            previous_finalized(),
            committee.round_aggregator_factory(),
        );
        (committee, aggregator)
    }

    fn round(point_offset: u32) -> FinalizationRound {
        FinalizationRound::new(TEST_ROUND.epoch, TEST_ROUND.point + point_offset)
    }

    /// Drive `round` to a best precommit at `height`.
    fn reach_best_precommit(
        committee: &TestCommittee,
        aggregator: &MultiRoundMessageAggregator,
        round: FinalizationRound,
        height: Height,
    ) {
        let hash = BlockHash::repeat_byte(height as u8);
        for voter in 0..2 {
            let window = (height - LAST_FINALIZED_HEIGHT + 1) as usize;
            assert!(aggregator
                .modifier()
                .add(committee.prevote(voter, round, LAST_FINALIZED_HEIGHT, window))
                .is_success());
            assert!(aggregator
                .modifier()
                .add(committee.precommit(voter, round, height, hash))
                .is_success());
        }
    }

    #[test]
    fn add_creates_round_aggregators_lazily() {
        let (committee, aggregator) = setup();
        assert_eq!(aggregator.view().size(), 0);

        let result = aggregator
            .modifier()
            .add(committee.prevote(0, TEST_ROUND, LAST_FINALIZED_HEIGHT, 3));
        assert_eq!(result, RoundMessageAddResult::SuccessPrevote);

        assert_eq!(aggregator.view().size(), 1);
        assert!(aggregator.view().try_get_round_context(TEST_ROUND).is_some());
        assert!(aggregator.view().try_get_round_context(round(1)).is_none());
    }

    #[test]
    fn add_rejects_rounds_outside_bounds() {
        let (committee, aggregator) = setup();
        aggregator.modifier().set_max_finalization_round(round(2));

        let below = FinalizationRound::new(TEST_ROUND.epoch, TEST_ROUND.point - 1);
        assert_eq!(
            aggregator
                .modifier()
                .add(committee.prevote(0, below, LAST_FINALIZED_HEIGHT, 2)),
            RoundMessageAddResult::FailureInvalidPoint
        );

        assert_eq!(
            aggregator
                .modifier()
                .add(committee.prevote(0, round(3), LAST_FINALIZED_HEIGHT, 2)),
            RoundMessageAddResult::FailureInvalidPoint
        );

        assert!(aggregator
            .modifier()
            .add(committee.prevote(0, round(2), LAST_FINALIZED_HEIGHT, 2))
            .is_success());
    }

    #[test]
    fn add_is_idempotent_for_identical_messages() {
        let (committee, aggregator) = setup();

        let message = committee.prevote(0, TEST_ROUND, LAST_FINALIZED_HEIGHT, 3);
        assert!(aggregator.modifier().add(message.clone()).is_success());

        let size_before = aggregator.view().size();
        let hashes_before = aggregator.view().short_hashes();

        assert_eq!(
            aggregator.modifier().add(message),
            RoundMessageAddResult::NeutralRedundant
        );
        assert_eq!(aggregator.view().size(), size_before);
        assert_eq!(aggregator.view().short_hashes(), hashes_before);
    }

    #[test]
    #[should_panic(expected = "cannot set max finalization round")]
    fn set_max_below_min_panics() {
        let (_, aggregator) = setup();
        aggregator
            .modifier()
            .set_max_finalization_round(FinalizationRound::new(TEST_ROUND.epoch, TEST_ROUND.point - 1));
    }

    #[test]
    fn find_estimate_searches_descending_with_fallback() {
        let (committee, aggregator) = setup();
        aggregator.modifier().set_max_finalization_round(round(5));

        // nothing tracked: fallback
        assert_eq!(aggregator.view().find_estimate(round(5)), previous_finalized());

        // round +1 acquires an estimate at height 123
        for voter in 0..3 {
            assert!(aggregator
                .modifier()
                .add(committee.prevote(voter, round(1), LAST_FINALIZED_HEIGHT, 4))
                .is_success());
        }
        let estimate = aggregator.view().find_estimate(round(5));
        assert_eq!(estimate.height, LAST_FINALIZED_HEIGHT + 3);

        // searches only rounds at or before the requested one
        assert_eq!(aggregator.view().find_estimate(TEST_ROUND), previous_finalized());
    }

    #[test]
    fn best_precommit_search_prefers_latest_round() {
        let (committee, aggregator) = setup();
        aggregator.modifier().set_max_finalization_round(round(5));

        assert!(aggregator.view().try_find_best_precommit().is_none());

        reach_best_precommit(&committee, &aggregator, round(1), LAST_FINALIZED_HEIGHT + 2);
        reach_best_precommit(&committee, &aggregator, round(3), LAST_FINALIZED_HEIGHT + 4);

        let descriptor = aggregator.view().try_find_best_precommit().unwrap();
        assert_eq!(descriptor.round, round(3));
        assert_eq!(descriptor.target.height, LAST_FINALIZED_HEIGHT + 4);
        // both voters' prevote and precommit are carried as proof
        assert_eq!(descriptor.proof.len(), 4);
    }

    #[test]
    fn unknown_messages_start_at_requested_round() {
        let (committee, aggregator) = setup();
        aggregator.modifier().set_max_finalization_round(round(5));

        for offset in [0u32, 1, 2] {
            assert!(aggregator
                .modifier()
                .add(committee.prevote(0, round(offset), LAST_FINALIZED_HEIGHT, 2))
                .is_success());
        }

        assert_eq!(aggregator.view().unknown_messages(round(0), &HashSet::new()).len(), 3);
        assert_eq!(aggregator.view().unknown_messages(round(1), &HashSet::new()).len(), 2);
        assert_eq!(aggregator.view().unknown_messages(round(3), &HashSet::new()).len(), 0);
    }

    #[test]
    fn unknown_messages_respect_total_budget() {
        let committee = TestCommittee::new(&[400, 350, 250], LAST_FINALIZED_HEIGHT);
        let sample = committee.prevote(0, TEST_ROUND, LAST_FINALIZED_HEIGHT, 2);
        let message_size = sample.serialized_size() as u64;

        let aggregator = MultiRoundMessageAggregator::new(
            2 * message_size,
            TEST_ROUND,
            previous_finalized(),
            committee.round_aggregator_factory(),
        );
        aggregator.modifier().set_max_finalization_round(round(5));

        for offset in [0u32, 1, 2] {
            assert!(aggregator
                .modifier()
                .add(committee.prevote(0, round(offset), LAST_FINALIZED_HEIGHT, 2))
                .is_success());
        }

        let messages = aggregator.view().unknown_messages(round(0), &HashSet::new());
        assert_eq!(messages.len(), 2);
    }

    #[test]
    fn prune_drops_rounds_before_last_best_precommit() {
        let (committee, aggregator) = setup();
        aggregator.modifier().set_max_finalization_round(round(5));

        reach_best_precommit(&committee, &aggregator, round(0), LAST_FINALIZED_HEIGHT + 2);
        reach_best_precommit(&committee, &aggregator, round(2), LAST_FINALIZED_HEIGHT + 4);
        assert!(aggregator
            .modifier()
            .add(committee.prevote(0, round(4), LAST_FINALIZED_HEIGHT, 2))
            .is_success());

        aggregator.modifier().prune();

        let view = aggregator.view();
        assert_eq!(view.min_finalization_round(), round(2));
        assert!(view.try_get_round_context(round(0)).is_none());
        assert!(view.try_get_round_context(round(2)).is_some());
        assert!(view.try_get_round_context(round(4)).is_some());

        // the estimate of the nearest earlier round becomes the fallback
        drop(view);
        let expected_fallback = LAST_FINALIZED_HEIGHT + 2;
        assert_eq!(
            aggregator.view().find_estimate(round(1)).height,
            expected_fallback
        );
    }

    #[test]
    fn prune_without_best_precommit_is_a_no_op() {
        let (committee, aggregator) = setup();
        assert!(aggregator
            .modifier()
            .add(committee.prevote(0, TEST_ROUND, LAST_FINALIZED_HEIGHT, 2))
            .is_success());

        aggregator.modifier().prune();

        assert_eq!(aggregator.view().size(), 1);
        assert_eq!(aggregator.view().min_finalization_round(), TEST_ROUND);
    }
}
