// SPDX-License-Identifier: Apache-2.0
//! The voting committee: eligibility and weight for one epoch.

use crate::{crypto::OtsPublicKey, FinalizationEpoch, Height, VotingPower};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt, sync::Arc};

/// Immutable snapshot of the voters eligible for an epoch.
///
/// Built by the host from its account state at the last finalized height and
/// shared read-only; the committee never changes within an epoch.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VotingCommittee {
    inner: Arc<CommitteeInner>,
}

impl Serialize for VotingCommittee {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.inner.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for VotingCommittee {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let inner = CommitteeInner::deserialize(deserializer)?;
        Ok(Self { inner: Arc::new(inner) })
    }
}

#[derive(Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
struct CommitteeInner {
    /// The epoch this committee votes in.
    epoch: FinalizationEpoch,
    /// The height the committee was derived at (the last finalized height).
    height: Height,
    /// Voting weight per eligible voting key.
    voters: BTreeMap<OtsPublicKey, VotingPower>,
    /// Sum of all voting weights.
    total_voting_power: VotingPower,
}

impl VotingCommittee {
    /// Create a committee for `epoch` derived at `height`.
    ///
    /// Voters with zero weight are not eligible and are dropped.
    pub fn new(
        epoch: FinalizationEpoch,
        height: Height,
        voters: BTreeMap<OtsPublicKey, VotingPower>,
    ) -> Self {
        let voters: BTreeMap<_, _> =
            voters.into_iter().filter(|(_, weight)| *weight > 0).collect();
        let total_voting_power = voters.values().sum();

        Self { inner: Arc::new(CommitteeInner { epoch, height, voters, total_voting_power }) }
    }

    /// The epoch this committee votes in.
    pub fn epoch(&self) -> FinalizationEpoch {
        self.inner.epoch
    }

    /// The height the committee was derived at.
    pub fn height(&self) -> Height {
        self.inner.height
    }

    /// Number of eligible voters.
    pub fn size(&self) -> usize {
        self.inner.voters.len()
    }

    /// Sum of all voting weights.
    pub fn total_voting_power(&self) -> VotingPower {
        self.inner.total_voting_power
    }

    /// The weight of `voting_key`, or zero for an ineligible voter.
    pub fn voting_power(&self, voting_key: &OtsPublicKey) -> VotingPower {
        self.inner.voters.get(voting_key).copied().unwrap_or(0)
    }

    /// Returns true if `voting_key` is eligible to vote in this epoch.
    pub fn is_voter(&self, voting_key: &OtsPublicKey) -> bool {
        self.inner.voters.contains_key(voting_key)
    }

    /// The weight a decision must accumulate, for a `threshold`/`size` ratio.
    pub fn threshold_weight(&self, threshold: u64, size: u64) -> VotingPower {
        debug_assert!(size > 0, "threshold denominator must be non-zero");
        (self.inner.total_voting_power * threshold).div_ceil(size)
    }
}

impl fmt::Display for VotingCommittee {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "VotingCommittee E{} ({} voters, total weight {})",
            self.inner.epoch,
            self.inner.voters.len(),
            self.inner.total_voting_power
        )
    }
}
