// SPDX-License-Identifier: Apache-2.0
//! Step identifiers: the (epoch, point, stage) coordinate of a vote.

use crate::{
    crypto::OtsKeyIdentifier, FinalizationEpoch, FinalizationPoint, FinalizationRound,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Upper bound on points per epoch used when flattening a step identifier
/// into a one-time-signature key index. Must never be exceeded by a live
/// point counter for step order and key order to agree.
pub const MAX_POINTS_PER_EPOCH: u64 = 1 << 16;

/// The voting stage within a round.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[repr(u8)]
pub enum FinalizationStage {
    /// Prevote stage.
    Prevote = 1,
    /// Precommit stage.
    Precommit = 2,
}

impl fmt::Display for FinalizationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Prevote => f.write_str("prevote"),
            Self::Precommit => f.write_str("precommit"),
        }
    }
}

/// Identifies one voting step: an (epoch, point, stage) triple with
/// lexicographic order.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct StepIdentifier {
    /// The finalization epoch.
    pub epoch: FinalizationEpoch,
    /// The finalization point.
    pub point: FinalizationPoint,
    /// The voting stage.
    pub stage: FinalizationStage,
}

impl StepIdentifier {
    /// Create a new step identifier.
    pub fn new(epoch: FinalizationEpoch, point: FinalizationPoint, stage: FinalizationStage) -> Self {
        Self { epoch, point, stage }
    }

    /// The round this step belongs to.
    pub fn round(&self) -> FinalizationRound {
        FinalizationRound::new(self.epoch, self.point)
    }

    /// Map this step to its one-time-signature key identifier.
    ///
    /// Steps are flattened in lexicographic order (two stages per point,
    /// [`MAX_POINTS_PER_EPOCH`] points per epoch) and split into batch and
    /// key ids by `dilution`.
    pub fn to_ots_key_identifier(&self, dilution: u64) -> OtsKeyIdentifier {
        debug_assert!(dilution > 0, "ots key dilution must be non-zero");
        let raw = self.epoch as u64 * 2 * MAX_POINTS_PER_EPOCH
            + self.point as u64 * 2
            + (self.stage as u64 - 1);
        OtsKeyIdentifier::new(raw / dilution, raw % dilution)
    }
}

impl fmt::Display for StepIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.epoch, self.point, self.stage)
    }
}
