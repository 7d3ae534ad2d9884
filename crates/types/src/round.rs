// SPDX-License-Identifier: Apache-2.0
//! Finalization rounds and height arithmetic.

use serde::{Deserialize, Serialize};
use std::{
    fmt,
    time::{Duration, SystemTime},
};

/// The finalization epoch number.
/// Increments when the voting committee rotates.
pub type FinalizationEpoch = u32;

/// The finalization point number.
/// Fine-grained round counter within an epoch.
pub type FinalizationPoint = u32;

/// A block height.
pub type Height = u64;

/// The voting power a voter has within the committee.
pub type VotingPower = u64;

/// A millisecond UNIX timestamp.
pub type TimestampMs = u64;

/// Returns the current time expressed as UNIX timestamp in milliseconds.
pub fn now_ms() -> TimestampMs {
    match SystemTime::now().duration_since(SystemTime::UNIX_EPOCH) {
        Ok(n) => n.as_millis() as TimestampMs,
        Err(_) => panic!("SystemTime before UNIX EPOCH!"),
    }
}

/// Timestamp trait for calculating the amount of time that elapsed between
/// a timestamp and "now".
pub trait Timestamp {
    /// Returns the time elapsed between the timestamp and "now".
    fn elapsed(&self) -> Duration;
}

impl Timestamp for TimestampMs {
    fn elapsed(&self) -> Duration {
        Duration::from_millis(now_ms().saturating_sub(*self))
    }
}

/// The unit of voting: an (epoch, point) pair with lexicographic order.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct FinalizationRound {
    /// The finalization epoch.
    pub epoch: FinalizationEpoch,
    /// The finalization point within the epoch.
    pub point: FinalizationPoint,
}

impl FinalizationRound {
    /// Create a new round.
    pub fn new(epoch: FinalizationEpoch, point: FinalizationPoint) -> Self {
        Self { epoch, point }
    }

    /// The round with the next point in the same epoch.
    pub fn next_point(&self) -> Self {
        Self { epoch: self.epoch, point: self.point + 1 }
    }
}

impl fmt::Display for FinalizationRound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.epoch, self.point)
    }
}

/// The orchestrator's persistent voting state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VotingStatus {
    /// Current finalization round.
    pub round: FinalizationRound,
    /// True if a prevote has been sent for the current round.
    pub has_sent_prevote: bool,
    /// True if a precommit has been sent for the current round.
    pub has_sent_precommit: bool,
}

impl VotingStatus {
    /// A fresh status at `round` with nothing sent yet.
    pub fn new(round: FinalizationRound) -> Self {
        Self { round, has_sent_prevote: false, has_sent_precommit: false }
    }
}

/// Returns the end height of the voting set that contains `height`.
///
/// Voting sets span `grouping` consecutive heights; set `k` covers heights
/// `((k-1)*grouping, k*grouping]`.
pub fn grouped_height(height: Height, grouping: u64) -> Height {
    debug_assert!(grouping > 0, "voting set grouping must be non-zero");
    height.div_ceil(grouping) * grouping
}

/// Returns true if `height` is the last height of its voting set.
pub fn is_voting_set_end(height: Height, grouping: u64) -> bool {
    grouped_height(height, grouping) != grouped_height(height + 1, grouping)
}

/// Returns the last height of `epoch`'s voting set.
///
/// Epoch `e` covers heights `((e-1)*grouping, e*grouping]`; finality must
/// reach the end height before the next epoch's committee may vote.
pub fn voting_set_end_height(epoch: FinalizationEpoch, grouping: u64) -> Height {
    epoch as u64 * grouping
}
