// SPDX-License-Identifier: Apache-2.0
//! Validation and deduplication of votes for one round.

use crate::RoundContext;
use mn_config::FinalizationConfig;
use mn_types::{
    crypto::OtsPublicKey, verify_message_signature, FinalizationMessage, FinalizationRound,
    FinalizationStage, Height, MessageDigest, ShortHash, VotingCommittee,
};
use fastcrypto::hash::Hash as _;
use std::{
    collections::{BTreeMap, HashSet},
    fmt,
    sync::Arc,
};
use tracing::warn;

/// Outcome of feeding one message to a round aggregator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoundMessageAddResult {
    /// A prevote was accepted.
    SuccessPrevote,
    /// A precommit was accepted.
    SuccessPrecommit,
    /// A byte-identical message was already accepted.
    NeutralRedundant,
    /// The message belongs to a different round.
    FailureInvalidPoint,
    /// The message's hash window lies entirely below the finalized height.
    FailureInvalidHeight,
    /// The message carries no hashes, or the wrong number for its stage.
    FailureInvalidHashes,
    /// The voter is ineligible or the signature does not verify.
    FailureProcessing,
    /// The voter already voted differently at this stage.
    FailureConflicting,
}

impl RoundMessageAddResult {
    /// Returns true if the message contributed weight.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::SuccessPrevote | Self::SuccessPrecommit)
    }
}

impl fmt::Display for RoundMessageAddResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::SuccessPrevote => "accepted prevote",
            Self::SuccessPrecommit => "accepted precommit",
            Self::NeutralRedundant => "redundant",
            Self::FailureInvalidPoint => "invalid point",
            Self::FailureInvalidHeight => "invalid height",
            Self::FailureInvalidHashes => "invalid hashes",
            Self::FailureProcessing => "processing failure",
            Self::FailureConflicting => "conflicting",
        };
        f.write_str(text)
    }
}

struct MessageDescriptor {
    message: Arc<FinalizationMessage>,
    digest: MessageDigest,
    short_hash: ShortHash,
    serialized_size: usize,
}

/// Aggregates validated votes for one (epoch, point).
///
/// Each voter may contribute one prevote and one precommit; accepted weight
/// is delegated to the [`RoundContext`].
pub struct RoundMessageAggregator {
    round: FinalizationRound,
    committee: VotingCommittee,
    config: FinalizationConfig,
    round_context: RoundContext,
    messages: BTreeMap<(OtsPublicKey, FinalizationStage), MessageDescriptor>,
}

impl RoundMessageAggregator {
    /// Create an aggregator for `round` with the epoch's `committee`.
    pub fn new(round: FinalizationRound, committee: VotingCommittee, config: FinalizationConfig) -> Self {
        let threshold_weight = committee.threshold_weight(config.threshold, config.size);
        let round_context = RoundContext::new(committee.total_voting_power(), threshold_weight);

        Self { round, committee, config, round_context, messages: BTreeMap::new() }
    }

    /// The round this aggregator collects votes for.
    pub fn round(&self) -> FinalizationRound {
        self.round
    }

    /// Number of accepted messages.
    pub fn size(&self) -> usize {
        self.messages.len()
    }

    /// The accumulated round state.
    pub fn round_context(&self) -> &RoundContext {
        &self.round_context
    }

    /// Validate `message` and accumulate its weight.
    pub fn add(&mut self, message: Arc<FinalizationMessage>) -> RoundMessageAddResult {
        if message.step_identifier.round() != self.round {
            return RoundMessageAddResult::FailureInvalidPoint;
        }

        let hashes_count = message.hashes_count();
        if hashes_count == 0 {
            return RoundMessageAddResult::FailureInvalidHashes;
        }

        let is_prevote = message.is_prevote();
        if !is_prevote && hashes_count != 1 {
            return RoundMessageAddResult::FailureInvalidHashes;
        }

        if is_prevote && hashes_count > self.config.max_hashes_per_point {
            return RoundMessageAddResult::FailureInvalidHashes;
        }

        // only consider messages whose window reaches the unfinalized chain
        let last_finalized_height = self.committee.height();
        if last_finalized_height > message.height + (hashes_count as Height - 1) {
            return RoundMessageAddResult::FailureInvalidHeight;
        }

        let voter = message.signature.root.public_key;
        let stage = message.step_identifier.stage;
        if let Some(existing) = self.messages.get(&(voter, stage)) {
            return if existing.digest == message.digest() {
                RoundMessageAddResult::NeutralRedundant
            } else {
                RoundMessageAddResult::FailureConflicting
            };
        }

        let weight = self.committee.voting_power(&voter);
        if weight == 0 {
            warn!(target: "finality::aggregator", %voter, "rejecting message from ineligible voter");
            return RoundMessageAddResult::FailureProcessing;
        }

        if !verify_message_signature(&message, self.config.ots_key_dilution) {
            warn!(target: "finality::aggregator", %voter, "rejecting message with invalid signature");
            return RoundMessageAddResult::FailureProcessing;
        }

        let descriptor = MessageDescriptor {
            digest: message.digest(),
            short_hash: message.short_hash(),
            serialized_size: message.serialized_size(),
            message: message.clone(),
        };
        self.messages.insert((voter, stage), descriptor);

        if is_prevote {
            self.round_context.accept_prevote(message.height, &message.hashes, weight);
            RoundMessageAddResult::SuccessPrevote
        } else {
            self.round_context.accept_precommit(message.height, message.hashes[0], weight);
            RoundMessageAddResult::SuccessPrecommit
        }
    }

    /// Short hashes of every accepted message.
    pub fn short_hashes(&self) -> Vec<ShortHash> {
        self.messages.values().map(|descriptor| descriptor.short_hash).collect()
    }

    /// Accepted messages whose short hash is not in `known_short_hashes`,
    /// stopping before the configured response byte budget is exceeded.
    pub fn unknown_messages(
        &self,
        known_short_hashes: &HashSet<ShortHash>,
    ) -> Vec<Arc<FinalizationMessage>> {
        let mut total_size = 0u64;
        let mut messages = Vec::new();
        for descriptor in self.messages.values() {
            if known_short_hashes.contains(&descriptor.short_hash) {
                continue;
            }

            total_size += descriptor.serialized_size as u64;
            if total_size > self.config.message_synchronization_max_response_size {
                return messages;
            }

            messages.push(descriptor.message.clone());
        }

        messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{TestCommittee, TEST_ROUND};
    use mn_types::BlockHash;

    const LAST_FINALIZED_HEIGHT: Height = 120;

    fn setup() -> (TestCommittee, RoundMessageAggregator) {
        let committee = TestCommittee::new(&[400, 350, 250], LAST_FINALIZED_HEIGHT);
        let aggregator = RoundMessageAggregator::new(
            TEST_ROUND,
            committee.committee(),
            committee.config().clone(),
        );
        (committee, aggregator)
    }

    #[test]
    fn accepts_valid_prevote_and_precommit() {
        let (committee, mut aggregator) = setup();

        let prevote = committee.prevote(0, TEST_ROUND, LAST_FINALIZED_HEIGHT, 4);
        assert_eq!(aggregator.add(prevote), RoundMessageAddResult::SuccessPrevote);

        let precommit =
            committee.precommit(0, TEST_ROUND, LAST_FINALIZED_HEIGHT + 3, BlockHash::repeat_byte(3));
        assert_eq!(aggregator.add(precommit), RoundMessageAddResult::SuccessPrecommit);

        assert_eq!(aggregator.size(), 2);
    }

    #[test]
    fn rejects_foreign_round() {
        let (committee, mut aggregator) = setup();

        let other_round = FinalizationRound::new(TEST_ROUND.epoch, TEST_ROUND.point + 1);
        let message = committee.prevote(0, other_round, LAST_FINALIZED_HEIGHT, 2);

        assert_eq!(aggregator.add(message), RoundMessageAddResult::FailureInvalidPoint);
        assert_eq!(aggregator.size(), 0);
    }

    #[test]
    fn rejects_bad_hash_counts() {
        let (committee, mut aggregator) = setup();

        let mut empty = (*committee.prevote(0, TEST_ROUND, LAST_FINALIZED_HEIGHT, 2)).clone();
        empty.hashes.clear();
        assert_eq!(
            aggregator.add(Arc::new(empty)),
            RoundMessageAddResult::FailureInvalidHashes
        );

        // precommit must carry exactly one hash
        let mut wide_precommit = (*committee.precommit(
            0,
            TEST_ROUND,
            LAST_FINALIZED_HEIGHT,
            BlockHash::repeat_byte(1),
        ))
        .clone();
        wide_precommit.hashes.push(BlockHash::repeat_byte(2));
        assert_eq!(
            aggregator.add(Arc::new(wide_precommit)),
            RoundMessageAddResult::FailureInvalidHashes
        );

        // prevote window above the configured bound
        let max = committee.config().max_hashes_per_point;
        let oversized = committee.prevote(0, TEST_ROUND, LAST_FINALIZED_HEIGHT, max as usize + 1);
        assert_eq!(aggregator.add(oversized), RoundMessageAddResult::FailureInvalidHashes);
    }

    #[test]
    fn rejects_fully_finalized_window() {
        let (committee, mut aggregator) = setup();

        // window [110, 113] ends below the finalized height 120
        let stale = committee.prevote(0, TEST_ROUND, 110, 4);
        assert_eq!(aggregator.add(stale), RoundMessageAddResult::FailureInvalidHeight);

        // window [118, 121] still reaches unfinalized heights
        let fresh = committee.prevote(0, TEST_ROUND, 118, 4);
        assert_eq!(aggregator.add(fresh), RoundMessageAddResult::SuccessPrevote);
    }

    #[test]
    fn redundant_resubmission_is_neutral() {
        let (committee, mut aggregator) = setup();

        let message = committee.prevote(0, TEST_ROUND, LAST_FINALIZED_HEIGHT, 3);
        assert_eq!(aggregator.add(message.clone()), RoundMessageAddResult::SuccessPrevote);
        assert_eq!(aggregator.add(message), RoundMessageAddResult::NeutralRedundant);
        assert_eq!(aggregator.size(), 1);
    }

    #[test]
    fn conflicting_same_stage_vote_is_rejected() {
        let (committee, mut aggregator) = setup();

        let first = committee.prevote_for_hashes(
            0,
            TEST_ROUND,
            124,
            vec![BlockHash::repeat_byte(0xaa)],
        );
        assert_eq!(aggregator.add(first), RoundMessageAddResult::SuccessPrevote);

        let second = committee.prevote_for_hashes(
            0,
            TEST_ROUND,
            124,
            vec![BlockHash::repeat_byte(0xbb)],
        );
        assert_eq!(aggregator.add(second), RoundMessageAddResult::FailureConflicting);
        assert_eq!(aggregator.size(), 1);
    }

    #[test]
    fn voter_may_prevote_and_precommit_once_each() {
        let (committee, mut aggregator) = setup();

        let prevote = committee.prevote(0, TEST_ROUND, LAST_FINALIZED_HEIGHT, 3);
        let precommit =
            committee.precommit(0, TEST_ROUND, LAST_FINALIZED_HEIGHT + 1, BlockHash::repeat_byte(1));

        assert_eq!(aggregator.add(prevote), RoundMessageAddResult::SuccessPrevote);
        assert_eq!(aggregator.add(precommit), RoundMessageAddResult::SuccessPrecommit);

        let second_precommit =
            committee.precommit(0, TEST_ROUND, LAST_FINALIZED_HEIGHT + 2, BlockHash::repeat_byte(2));
        assert_eq!(
            aggregator.add(second_precommit),
            RoundMessageAddResult::FailureConflicting
        );
    }

    #[test]
    fn rejects_ineligible_voter() {
        let (committee, mut aggregator) = setup();

        let outsider = committee.outsider_prevote(TEST_ROUND, LAST_FINALIZED_HEIGHT, 2);
        assert_eq!(aggregator.add(outsider), RoundMessageAddResult::FailureProcessing);
    }

    #[test]
    fn rejects_invalid_signature() {
        let (committee, mut aggregator) = setup();

        let mut message = (*committee.prevote(0, TEST_ROUND, LAST_FINALIZED_HEIGHT, 2)).clone();
        message.signature.bottom.signature = Default::default();

        assert_eq!(
            aggregator.add(Arc::new(message)),
            RoundMessageAddResult::FailureProcessing
        );
    }

    #[test]
    fn accepted_weight_reaches_round_context() {
        let (committee, mut aggregator) = setup();

        aggregator.add(committee.prevote(0, TEST_ROUND, LAST_FINALIZED_HEIGHT, 4));
        aggregator.add(committee.prevote(1, TEST_ROUND, LAST_FINALIZED_HEIGHT, 4));

        // 400 + 350 = 750 reaches the test committee's 750/1000 threshold
        let best_prevote = aggregator.round_context().try_find_best_prevote().unwrap();
        assert_eq!(best_prevote.height, LAST_FINALIZED_HEIGHT + 3);
    }

    #[test]
    fn unknown_messages_filters_known_and_respects_budget() {
        let (committee, mut aggregator) = setup();

        let messages: Vec<_> =
            (0..3).map(|i| committee.prevote(i, TEST_ROUND, LAST_FINALIZED_HEIGHT, 2)).collect();
        for message in &messages {
            assert!(aggregator.add(message.clone()).is_success());
        }

        // all unknown
        let unknown = aggregator.unknown_messages(&HashSet::new());
        assert_eq!(unknown.len(), 3);

        // known short hashes are filtered
        let known: HashSet<_> = vec![messages[0].short_hash()].into_iter().collect();
        let unknown = aggregator.unknown_messages(&known);
        assert_eq!(unknown.len(), 2);
        assert!(unknown.iter().all(|m| m.short_hash() != messages[0].short_hash()));

        // a budget fitting two messages truncates the response
        let message_size = messages[0].serialized_size() as u64;
        let mut small_config = committee.config().clone();
        small_config.message_synchronization_max_response_size = 2 * message_size;
        let mut budgeted =
            RoundMessageAggregator::new(TEST_ROUND, committee.committee(), small_config);
        for message in &messages {
            assert!(budgeted.add(message.clone()).is_success());
        }
        assert_eq!(budgeted.unknown_messages(&HashSet::new()).len(), 2);
    }
}
