// SPDX-License-Identifier: Apache-2.0
//! Shared fixtures for finalization tests.

use crate::{
    BlockStore, FinalityResult, FinalizationStageAdvancer, FinalizationSubscriber, MessageFactory,
    MessageSink, RoundAggregatorFactory, RoundMessageAggregator, StageAdvancerFactory,
};
use mn_config::FinalizationConfig;
use mn_storage::{ProofStorage, StoreResult};
use mn_types::{
    crypto::{OtsOptions, OtsPublicKey, OtsTree},
    prepare_message, BlockHash, FinalizationEpoch, FinalizationMessage, FinalizationProof,
    FinalizationRound, FinalizationStage, FinalizationStatistics, Height, HeightHashPair,
    StepIdentifier, TimestampMs, VotingCommittee, VotingPower, FINALIZATION_MESSAGE_VERSION,
};
use eyre::ensure;
use fastcrypto::{
    ed25519::{Ed25519KeyPair, Ed25519PrivateKey},
    traits::{KeyPair as _, ToFromBytes},
};
use parking_lot::Mutex;
use rand::{rngs::StdRng, SeedableRng};
use std::{
    collections::{BTreeMap, HashMap},
    io::Cursor,
    sync::Arc,
};

/// The round most tests vote in.
pub(crate) const TEST_ROUND: FinalizationRound = FinalizationRound { epoch: 1, point: 5 };

struct TestVoter {
    private_key: [u8; 32],
    public_key: OtsPublicKey,
}

fn generate_voter(seed: u64) -> TestVoter {
    let mut rng = StdRng::seed_from_u64(seed);
    let keypair = Ed25519KeyPair::generate(&mut rng);
    let public_key = OtsPublicKey::from(keypair.public());
    let mut private_key = [0u8; 32];
    private_key.copy_from_slice(keypair.private().as_bytes());
    TestVoter { private_key, public_key }
}

/// A committee of test voters able to sign real messages.
pub(crate) struct TestCommittee {
    voters: Vec<TestVoter>,
    outsider: TestVoter,
    committee: VotingCommittee,
    config: FinalizationConfig,
}

impl TestCommittee {
    /// Create voters with `weights`, eligible at `last_finalized_height`.
    ///
    /// The test config uses a 750/1000 threshold ratio, so weights that sum
    /// to 1000 need 750 behind a decision.
    pub fn new(weights: &[VotingPower], last_finalized_height: Height) -> Self {
        let voters: Vec<_> =
            (0..weights.len()).map(|i| generate_voter(1000 + i as u64)).collect();
        let outsider = generate_voter(9999);

        let entries: BTreeMap<_, _> = voters
            .iter()
            .zip(weights)
            .map(|(voter, weight)| (voter.public_key, *weight))
            .collect();
        let committee = VotingCommittee::new(TEST_ROUND.epoch, last_finalized_height, entries);

        let config = FinalizationConfig {
            size: 1000,
            threshold: 750,
            max_hashes_per_point: 16,
            prevote_blocks_multiple: 2,
            voting_set_grouping: 100,
            ots_key_dilution: 8,
            ..Default::default()
        };

        Self { voters, outsider, committee, config }
    }

    pub fn committee(&self) -> VotingCommittee {
        self.committee.clone()
    }

    pub fn config(&self) -> &FinalizationConfig {
        &self.config
    }

    /// A factory producing round aggregators over this committee.
    pub fn round_aggregator_factory(&self) -> RoundAggregatorFactory {
        let committee = self.committee.clone();
        let config = self.config.clone();
        Box::new(move |round, _height| {
            RoundMessageAggregator::new(round, committee.clone(), config.clone())
        })
    }

    fn sign(
        &self,
        voter: &TestVoter,
        step_identifier: StepIdentifier,
        height: Height,
        hashes: Vec<BlockHash>,
    ) -> Arc<FinalizationMessage> {
        let private = Ed25519PrivateKey::from_bytes(&voter.private_key).expect("valid test key");
        let keypair = Ed25519KeyPair::from(private);

        // a fresh single-key tree per message lets tests sign conflicting
        // votes at one step, which a voter's real tree forbids
        let key_identifier =
            step_identifier.to_ots_key_identifier(self.config.ots_key_dilution);
        let options = OtsOptions {
            dilution: self.config.ots_key_dilution,
            start_key_identifier: key_identifier,
            end_key_identifier: key_identifier,
        };
        let mut tree =
            OtsTree::create(keypair, Cursor::new(Vec::new()), options).expect("create test tree");

        let message = prepare_message(
            &mut tree,
            step_identifier,
            height,
            hashes,
            self.config.ots_key_dilution,
        )
        .expect("sign test message");
        Arc::new(message)
    }

    /// A prevote from `voter_index` covering `count` heights from `height`,
    /// with the canonical per-height test hashes.
    pub fn prevote(
        &self,
        voter_index: usize,
        round: FinalizationRound,
        height: Height,
        count: usize,
    ) -> Arc<FinalizationMessage> {
        let hashes = (0..count).map(|i| test_block_hash(height + i as Height)).collect();
        self.prevote_for_hashes(voter_index, round, height, hashes)
    }

    pub fn prevote_for_hashes(
        &self,
        voter_index: usize,
        round: FinalizationRound,
        height: Height,
        hashes: Vec<BlockHash>,
    ) -> Arc<FinalizationMessage> {
        let step = StepIdentifier::new(round.epoch, round.point, FinalizationStage::Prevote);
        self.sign(&self.voters[voter_index], step, height, hashes)
    }

    pub fn precommit(
        &self,
        voter_index: usize,
        round: FinalizationRound,
        height: Height,
        hash: BlockHash,
    ) -> Arc<FinalizationMessage> {
        let step = StepIdentifier::new(round.epoch, round.point, FinalizationStage::Precommit);
        self.sign(&self.voters[voter_index], step, height, vec![hash])
    }

    /// A structurally valid prevote from a voter outside the committee.
    pub fn outsider_prevote(
        &self,
        round: FinalizationRound,
        height: Height,
        count: usize,
    ) -> Arc<FinalizationMessage> {
        let step = StepIdentifier::new(round.epoch, round.point, FinalizationStage::Prevote);
        let hashes = (0..count).map(|i| test_block_hash(height + i as Height)).collect();
        self.sign(&self.outsider, step, height, hashes)
    }
}

/// The canonical test hash for `height`.
pub(crate) fn test_block_hash(height: Height) -> BlockHash {
    BlockHash::repeat_byte(height as u8)
}

/// In-memory [`BlockStore`] serving the canonical test hashes.
pub(crate) struct MemoryBlockStore {
    inner: Mutex<BlockStoreState>,
}

struct BlockStoreState {
    chain_height: Height,
    overrides: HashMap<Height, BlockHash>,
}

impl MemoryBlockStore {
    pub fn new(chain_height: Height) -> Self {
        Self { inner: Mutex::new(BlockStoreState { chain_height, overrides: HashMap::new() }) }
    }

    pub fn set_hash(&self, height: Height, hash: BlockHash) {
        self.inner.lock().overrides.insert(height, hash);
    }
}

impl BlockStore for MemoryBlockStore {
    fn chain_height(&self) -> Height {
        self.inner.lock().chain_height
    }

    fn load_hashes_from(&self, height: Height, max_count: usize) -> Vec<BlockHash> {
        let state = self.inner.lock();
        if height > state.chain_height {
            return Vec::new();
        }

        let end = state.chain_height.min(height + max_count as Height - 1);
        (height..=end)
            .map(|h| state.overrides.get(&h).copied().unwrap_or_else(|| test_block_hash(h)))
            .collect()
    }
}

/// In-memory [`ProofStorage`] with shared handles for inspection.
#[derive(Clone, Default)]
pub(crate) struct MemoryProofStorage {
    inner: Arc<Mutex<MemoryProofState>>,
}

#[derive(Default)]
struct MemoryProofState {
    statistics: FinalizationStatistics,
    proofs: BTreeMap<FinalizationEpoch, FinalizationProof>,
    saved: Vec<FinalizationProof>,
}

impl MemoryProofStorage {
    pub fn set_statistics(&self, statistics: FinalizationStatistics) {
        self.inner.lock().statistics = statistics;
    }

    pub fn saved_proofs(&self) -> Vec<FinalizationProof> {
        self.inner.lock().saved.clone()
    }
}

impl ProofStorage for MemoryProofStorage {
    fn statistics(&self) -> FinalizationStatistics {
        self.inner.lock().statistics
    }

    fn load_proof_at_epoch(&self, epoch: FinalizationEpoch) -> StoreResult<FinalizationProof> {
        let state = self.inner.lock();
        state.proofs.get(&epoch).cloned().ok_or_else(|| eyre::eyre!("no proof for epoch {epoch}"))
    }

    fn load_proof_at_height(&self, height: Height) -> StoreResult<Option<FinalizationProof>> {
        let state = self.inner.lock();
        ensure!(height <= state.statistics.height, "height {height} beyond finalized span");
        Ok(state.proofs.values().find(|proof| proof.height == height).cloned())
    }

    fn load_finalized_hashes_from(
        &self,
        epoch: FinalizationEpoch,
        max_count: usize,
    ) -> StoreResult<Vec<HeightHashPair>> {
        let state = self.inner.lock();
        Ok(state
            .proofs
            .range(epoch..)
            .take(max_count)
            .map(|(_, proof)| HeightHashPair::new(proof.height, proof.hash))
            .collect())
    }

    fn save_proof(&mut self, proof: &FinalizationProof) -> StoreResult<()> {
        let mut state = self.inner.lock();
        state.statistics = proof.statistics();
        state.proofs.insert(proof.round.epoch, proof.clone());
        state.saved.push(proof.clone());
        Ok(())
    }
}

/// Subscriber recording every finalized-block notification.
#[derive(Clone, Default)]
pub(crate) struct RecordingSubscriber {
    events: Arc<Mutex<Vec<(FinalizationRound, Height, BlockHash)>>>,
}

impl RecordingSubscriber {
    pub fn events(&self) -> Vec<(FinalizationRound, Height, BlockHash)> {
        self.events.lock().clone()
    }
}

impl FinalizationSubscriber for RecordingSubscriber {
    fn notify_finalized_block(&self, round: FinalizationRound, height: Height, hash: BlockHash) {
        self.events.lock().push((round, height, hash));
    }
}

/// A message sink capturing everything sent through it.
pub(crate) fn recording_sink() -> (MessageSink, Arc<Mutex<Vec<Arc<FinalizationMessage>>>>) {
    let sent = Arc::new(Mutex::new(Vec::new()));
    let sent_clone = sent.clone();
    let sink: MessageSink = Box::new(move |message| sent_clone.lock().push(message));
    (sink, sent)
}

/// Remote-controls the advancers handed to an orchestrator under test.
#[derive(Clone, Default)]
pub(crate) struct ManualAdvancerControl {
    inner: Arc<Mutex<ManualAdvancerState>>,
}

#[derive(Default)]
struct ManualAdvancerState {
    can_send_prevote: bool,
    precommit_target: Option<HeightHashPair>,
    can_start_next_round: bool,
    created: Vec<(FinalizationRound, TimestampMs)>,
}

impl ManualAdvancerControl {
    pub fn allow_prevote(&self) {
        self.inner.lock().can_send_prevote = true;
    }

    pub fn set_precommit_target(&self, target: Option<HeightHashPair>) {
        self.inner.lock().precommit_target = target;
    }

    pub fn allow_next_round(&self, allowed: bool) {
        self.inner.lock().can_start_next_round = allowed;
    }

    /// Advancers created so far, with their start times.
    pub fn created(&self) -> Vec<(FinalizationRound, TimestampMs)> {
        self.inner.lock().created.clone()
    }

    pub fn advancer_factory(&self) -> StageAdvancerFactory {
        let control = self.clone();
        Box::new(move |round, time| {
            control.inner.lock().created.push((round, time));
            Box::new(ManualAdvancer { control: control.clone() })
        })
    }
}

struct ManualAdvancer {
    control: ManualAdvancerControl,
}

impl FinalizationStageAdvancer for ManualAdvancer {
    fn can_send_prevote(&self, _time: TimestampMs) -> bool {
        self.control.inner.lock().can_send_prevote
    }

    fn can_send_precommit(&self, _time: TimestampMs) -> Option<HeightHashPair> {
        self.control.inner.lock().precommit_target
    }

    fn can_start_next_round(&self) -> bool {
        self.control.inner.lock().can_start_next_round
    }
}

/// A [`MessageFactory`] producing unsigned placeholder votes.
pub(crate) struct StubMessageFactory;

impl MessageFactory for StubMessageFactory {
    fn create_prevote(&mut self, round: FinalizationRound) -> FinalityResult<FinalizationMessage> {
        Ok(FinalizationMessage {
            version: FINALIZATION_MESSAGE_VERSION,
            step_identifier: StepIdentifier::new(
                round.epoch,
                round.point,
                FinalizationStage::Prevote,
            ),
            height: 1,
            hashes: vec![test_block_hash(1)],
            signature: Default::default(),
        })
    }

    fn create_precommit(
        &mut self,
        round: FinalizationRound,
        height: Height,
        hash: BlockHash,
    ) -> FinalityResult<FinalizationMessage> {
        Ok(FinalizationMessage {
            version: FINALIZATION_MESSAGE_VERSION,
            step_identifier: StepIdentifier::new(
                round.epoch,
                round.point,
                FinalizationStage::Precommit,
            ),
            height,
            hashes: vec![hash],
            signature: Default::default(),
        })
    }
}
