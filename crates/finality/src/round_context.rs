// SPDX-License-Identifier: Apache-2.0
//! Weighted vote accumulation for a single round.

use mn_types::{BlockHash, Height, HeightHashPair, VotingPower};
use std::collections::{BTreeMap, HashMap};

/// Weights accumulated for one (height, hash) candidate.
#[derive(Clone, Copy, Debug, Default)]
struct CandidateWeights {
    prevote: VotingPower,
    precommit: VotingPower,
}

/// Accumulates prevote and precommit weight for one round and answers the
/// protocol's three questions: best-prevote, best-precommit and estimate.
///
/// Prevote messages carry hash chains, so every candidate a message covers
/// receives the voter's full weight and consecutive candidates are linked
/// into a parent chain. Inputs are trusted; the round message aggregator
/// validates messages before they reach this context.
#[derive(Debug)]
pub struct RoundContext {
    total_weight: VotingPower,
    threshold_weight: VotingPower,
    /// Candidates ordered by (height, hash); iteration in reverse visits the
    /// deepest candidate first.
    candidates: BTreeMap<HeightHashPair, CandidateWeights>,
    /// Child -> parent links recovered from prevote hash chains.
    parents: HashMap<HeightHashPair, HeightHashPair>,
    /// Total precommit weight cast so far, over all candidates.
    cast_precommit_weight: VotingPower,
}

impl RoundContext {
    /// Create a context for a round with `total_weight` at stake and
    /// decisions at `threshold_weight`.
    pub fn new(total_weight: VotingPower, threshold_weight: VotingPower) -> Self {
        Self {
            total_weight,
            threshold_weight,
            candidates: BTreeMap::new(),
            parents: HashMap::new(),
            cast_precommit_weight: 0,
        }
    }

    /// Record `weight` prevoting for the chain `[height, height + len - 1]`
    /// described by `hashes`.
    pub fn accept_prevote(&mut self, height: Height, hashes: &[BlockHash], weight: VotingPower) {
        let mut previous: Option<HeightHashPair> = None;
        for (i, hash) in hashes.iter().enumerate() {
            let candidate = HeightHashPair::new(height + i as Height, *hash);
            self.candidates.entry(candidate).or_default().prevote += weight;

            if let Some(parent) = previous {
                self.parents.insert(candidate, parent);
            }
            previous = Some(candidate);
        }
    }

    /// Record `weight` precommitting to (`height`, `hash`).
    pub fn accept_precommit(&mut self, height: Height, hash: BlockHash, weight: VotingPower) {
        let candidate = HeightHashPair::new(height, hash);
        self.candidates.entry(candidate).or_default().precommit += weight;
        self.cast_precommit_weight += weight;
    }

    /// Returns true if `descendant` lies on a chain through `ancestor`.
    /// Equal pairs count as descendants.
    pub fn is_descendant(&self, ancestor: &HeightHashPair, descendant: &HeightHashPair) -> bool {
        let mut current = *descendant;
        while current.height > ancestor.height {
            match self.parents.get(&current) {
                Some(parent) => current = *parent,
                None => return false,
            }
        }

        current == *ancestor
    }

    /// The deepest candidate whose prevote weight reaches the threshold.
    pub fn try_find_best_prevote(&self) -> Option<HeightHashPair> {
        self.candidates
            .iter()
            .rev()
            .find(|(_, weights)| weights.prevote >= self.threshold_weight)
            .map(|(candidate, _)| *candidate)
    }

    /// The deepest candidate on the best-prevote chain whose accumulated
    /// precommit weight reaches the threshold.
    ///
    /// A precommit for a candidate also backs every ancestor of that
    /// candidate, so the accumulated weight of a candidate sums the
    /// precommits of its whole subtree.
    pub fn try_find_best_precommit(&self) -> Option<HeightHashPair> {
        let best_prevote = self.try_find_best_prevote()?;
        self.candidates
            .keys()
            .rev()
            .filter(|candidate| self.is_descendant(candidate, &best_prevote))
            .find(|candidate| self.subtree_precommit_weight(candidate) >= self.threshold_weight)
            .copied()
    }

    /// The deepest candidate on the best-prevote chain that could still
    /// accumulate threshold precommit weight, counting voters that have not
    /// precommitted yet.
    pub fn try_find_estimate(&self) -> Option<HeightHashPair> {
        let best_prevote = self.try_find_best_prevote()?;
        let uncast_weight = self.total_weight.saturating_sub(self.cast_precommit_weight);
        self.candidates
            .keys()
            .rev()
            .filter(|candidate| self.is_descendant(candidate, &best_prevote))
            .find(|candidate| {
                self.subtree_precommit_weight(candidate) + uncast_weight >= self.threshold_weight
            })
            .copied()
    }

    /// Returns true if the round's decision can no longer flip: a
    /// best-precommit exists and no candidate incompatible with it can still
    /// reach the threshold.
    pub fn is_completable(&self) -> bool {
        let Some(best_precommit) = self.try_find_best_precommit() else {
            return false;
        };

        let uncast_weight = self.total_weight.saturating_sub(self.cast_precommit_weight);
        !self.candidates.keys().any(|candidate| {
            let compatible = self.is_descendant(candidate, &best_precommit)
                || self.is_descendant(&best_precommit, candidate);
            !compatible
                && self.subtree_precommit_weight(candidate) + uncast_weight
                    >= self.threshold_weight
        })
    }

    /// Precommit weight of `candidate` and all its descendants.
    fn subtree_precommit_weight(&self, candidate: &HeightHashPair) -> VotingPower {
        self.candidates
            .iter()
            .filter(|(other, _)| self.is_descendant(candidate, other))
            .map(|(_, weights)| weights.precommit)
            .sum()
    }

    #[cfg(test)]
    pub(crate) fn prevote_weight(&self, candidate: &HeightHashPair) -> VotingPower {
        self.candidates.get(candidate).map_or(0, |weights| weights.prevote)
    }
}
