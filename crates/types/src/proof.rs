// SPDX-License-Identifier: Apache-2.0
//! Finality proofs and finalization statistics.

use crate::{BlockHash, FinalizationMessage, FinalizationRound, Height};
use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc};
use tracing::warn;

/// The latest finalized state: the round that decided it and the finalized
/// block.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizationStatistics {
    /// The round that finalized the block.
    pub round: FinalizationRound,
    /// The finalized height.
    pub height: Height,
    /// The finalized block hash.
    pub hash: BlockHash,
}

impl fmt::Display for FinalizationStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "round {} finalized {} @ {}", self.round, self.hash, self.height)
    }
}

/// An irrevocable finality proof: the finalized block plus the votes
/// witnessing threshold weight for it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizationProof {
    /// The round that finalized the block.
    pub round: FinalizationRound,
    /// The finalized height.
    pub height: Height,
    /// The finalized block hash.
    pub hash: BlockHash,
    /// The witnessing votes.
    pub messages: Vec<FinalizationMessage>,
}

impl FinalizationProof {
    /// The statistics this proof attests to.
    pub fn statistics(&self) -> FinalizationStatistics {
        FinalizationStatistics { round: self.round, height: self.height, hash: self.hash }
    }
}

/// Assemble a proof for `statistics` out of `messages`.
///
/// Messages from other rounds are skipped; the aggregator hands over its
/// full round payload and only the finalizing round's votes belong in the
/// proof.
pub fn assemble_proof(
    statistics: FinalizationStatistics,
    messages: Vec<Arc<FinalizationMessage>>,
) -> FinalizationProof {
    let messages = messages
        .into_iter()
        .filter(|message| {
            let round = message.step_identifier.round();
            if round != statistics.round {
                warn!(
                    target: "finality",
                    %round,
                    proof_round = %statistics.round,
                    "skipping message with unexpected round when assembling proof",
                );
                return false;
            }
            true
        })
        .map(|message| (*message).clone())
        .collect();

    FinalizationProof {
        round: statistics.round,
        height: statistics.height,
        hash: statistics.hash,
        messages,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FinalizationStage, StepIdentifier};

    fn test_message(round: FinalizationRound) -> Arc<FinalizationMessage> {
        Arc::new(FinalizationMessage {
            version: crate::FINALIZATION_MESSAGE_VERSION,
            step_identifier: StepIdentifier::new(
                round.epoch,
                round.point,
                FinalizationStage::Precommit,
            ),
            height: 10,
            hashes: vec![BlockHash::repeat_byte(1)],
            signature: Default::default(),
        })
    }

    #[test]
    fn assemble_filters_foreign_rounds() {
        let round = FinalizationRound::new(2, 5);
        let statistics =
            FinalizationStatistics { round, height: 10, hash: BlockHash::repeat_byte(1) };

        let proof = assemble_proof(
            statistics,
            vec![test_message(round), test_message(FinalizationRound::new(2, 4))],
        );

        assert_eq!(proof.messages.len(), 1);
        assert_eq!(proof.statistics(), statistics);
    }

    #[test]
    fn proof_bincode_roundtrip() {
        let round = FinalizationRound::new(1, 3);
        let statistics =
            FinalizationStatistics { round, height: 7, hash: BlockHash::repeat_byte(9) };
        let proof = assemble_proof(statistics, vec![test_message(round)]);

        let bytes = crate::encode(&proof);
        let decoded: FinalizationProof = crate::decode(&bytes).unwrap();
        assert_eq!(proof, decoded);
    }
}
