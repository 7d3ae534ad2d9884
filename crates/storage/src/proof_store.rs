// SPDX-License-Identifier: Apache-2.0
//! File-backed finality proof storage.

use crate::StoreResult;
use eyre::{bail, ensure};
use mn_types::{
    decode, encode, BlockHash, FinalizationEpoch, FinalizationProof, FinalizationStatistics,
    Height, HeightHashPair, BLOCK_HASH_LENGTH,
};
use std::{
    fs,
    io::{Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};
use tracing::debug;

/// Serialized size of the statistics index record.
const INDEX_RECORD_SIZE: usize = 4 + 4 + 8 + BLOCK_HASH_LENGTH;

/// Number of proof files per storage directory.
const PROOFS_PER_DIRECTORY: u32 = 10_000;

const INDEX_FILE: &str = "proof.index.dat";
const HEIGHTS_FILE: &str = "proof.heights";
const PROOF_FILE_EXTENSION: &str = "proof";

/// Durable storage of finality proofs.
///
/// Implementations persist one proof per epoch and track the latest
/// finalized statistics.
pub trait ProofStorage: Send + Sync {
    /// The latest finalized statistics, or the default when nothing has been
    /// finalized yet.
    fn statistics(&self) -> FinalizationStatistics;

    /// Load the proof finalizing `epoch`.
    fn load_proof_at_epoch(&self, epoch: FinalizationEpoch) -> StoreResult<FinalizationProof>;

    /// Load the proof that finalized exactly `height`, or `None` when the
    /// height lies inside the finalized span but no proof landed on it.
    fn load_proof_at_height(&self, height: Height) -> StoreResult<Option<FinalizationProof>>;

    /// Load up to `max_count` finalized (height, hash) pairs starting at
    /// `epoch`.
    fn load_finalized_hashes_from(
        &self,
        epoch: FinalizationEpoch,
        max_count: usize,
    ) -> StoreResult<Vec<HeightHashPair>>;

    /// Persist `proof` and advance the statistics.
    fn save_proof(&mut self, proof: &FinalizationProof) -> StoreResult<()>;
}

/// [`ProofStorage`] over a flat-file layout:
///
/// - `proof.index.dat` — fixed 48-byte statistics record
/// - `proof.heights` — finalized height per epoch, 8 bytes each
/// - `<group>/<epoch>.proof` — proof payloads, grouped in zero-padded
///   directories of [`PROOFS_PER_DIRECTORY`] epochs
#[derive(Debug)]
pub struct FileProofStorage {
    data_dir: PathBuf,
}

impl FileProofStorage {
    /// Open proof storage rooted at `data_dir`, creating it if needed.
    pub fn open<P: AsRef<Path>>(data_dir: P) -> StoreResult<Self> {
        fs::create_dir_all(data_dir.as_ref())?;
        Ok(Self { data_dir: data_dir.as_ref().to_path_buf() })
    }

    fn index_path(&self) -> PathBuf {
        self.data_dir.join(INDEX_FILE)
    }

    fn heights_path(&self) -> PathBuf {
        self.data_dir.join(HEIGHTS_FILE)
    }

    fn proof_path(&self, epoch: FinalizationEpoch) -> PathBuf {
        let group = epoch / PROOFS_PER_DIRECTORY;
        self.data_dir.join(format!("{group:05}")).join(format!(
            "{epoch:05}.{PROOF_FILE_EXTENSION}"
        ))
    }

    fn write_statistics(&self, statistics: &FinalizationStatistics) -> StoreResult<()> {
        let mut record = Vec::with_capacity(INDEX_RECORD_SIZE);
        record.extend_from_slice(&statistics.round.epoch.to_le_bytes());
        record.extend_from_slice(&statistics.round.point.to_le_bytes());
        record.extend_from_slice(&statistics.height.to_le_bytes());
        record.extend_from_slice(statistics.hash.as_bytes());
        fs::write(self.index_path(), record)?;
        Ok(())
    }

    fn write_epoch_height(&self, epoch: FinalizationEpoch, height: Height) -> StoreResult<()> {
        let mut file =
            fs::OpenOptions::new().read(true).write(true).create(true).open(self.heights_path())?;
        file.seek(SeekFrom::Start((epoch as u64 - 1) * 8))?;
        file.write_all(&height.to_le_bytes())?;
        Ok(())
    }

    /// Finalized heights for epochs `1..=current`, in epoch order.
    fn load_epoch_heights(&self) -> StoreResult<Vec<Height>> {
        let path = self.heights_path();
        if !path.is_file() {
            return Ok(Vec::new());
        }

        let bytes = fs::read(path)?;
        Ok(bytes
            .chunks_exact(8)
            .map(|chunk| Height::from_le_bytes(chunk.try_into().expect("eight byte chunk")))
            .collect())
    }

    /// The epoch whose proof finalized exactly `height`, if any.
    fn find_epoch_for_height(&self, height: Height) -> StoreResult<Option<FinalizationEpoch>> {
        let heights = self.load_epoch_heights()?;
        match heights.binary_search(&height) {
            Ok(index) => Ok(Some(index as FinalizationEpoch + 1)),
            Err(_) => {
                debug!(target: "storage::proofs", height, "no proof lands on requested height");
                Ok(None)
            }
        }
    }
}

impl ProofStorage for FileProofStorage {
    fn statistics(&self) -> FinalizationStatistics {
        let path = self.index_path();
        if !path.is_file() {
            return FinalizationStatistics::default();
        }

        let Ok(mut file) = fs::File::open(path) else {
            return FinalizationStatistics::default();
        };
        let mut record = [0u8; INDEX_RECORD_SIZE];
        if file.read_exact(&mut record).is_err() {
            return FinalizationStatistics::default();
        }

        let mut statistics = FinalizationStatistics::default();
        statistics.round.epoch =
            u32::from_le_bytes(record[0..4].try_into().expect("four byte field"));
        statistics.round.point =
            u32::from_le_bytes(record[4..8].try_into().expect("four byte field"));
        statistics.height = u64::from_le_bytes(record[8..16].try_into().expect("eight byte field"));
        statistics.hash =
            BlockHash::new(record[16..].try_into().expect("thirty-two byte field"));
        statistics
    }

    fn load_proof_at_epoch(&self, epoch: FinalizationEpoch) -> StoreResult<FinalizationProof> {
        ensure!(epoch != 0, "load_proof_at_epoch called with epoch 0");

        let current_epoch = self.statistics().round.epoch;
        ensure!(
            epoch <= current_epoch,
            "cannot load proof with epoch {epoch} when storage epoch is {current_epoch}",
        );

        let bytes = fs::read(self.proof_path(epoch))?;
        decode(&bytes)
    }

    fn load_proof_at_height(&self, height: Height) -> StoreResult<Option<FinalizationProof>> {
        ensure!(height != 0, "load_proof_at_height called with height 0");

        let current_height = self.statistics().height;
        ensure!(
            height <= current_height,
            "cannot load proof with height {height} when storage height is {current_height}",
        );

        match self.find_epoch_for_height(height)? {
            Some(epoch) => Ok(Some(self.load_proof_at_epoch(epoch)?)),
            None => Ok(None),
        }
    }

    fn load_finalized_hashes_from(
        &self,
        epoch: FinalizationEpoch,
        max_count: usize,
    ) -> StoreResult<Vec<HeightHashPair>> {
        ensure!(epoch != 0, "load_finalized_hashes_from called with epoch 0");

        let current_epoch = self.statistics().round.epoch;
        let mut pairs = Vec::new();
        for epoch in epoch..=current_epoch {
            if pairs.len() == max_count {
                break;
            }

            let proof = self.load_proof_at_epoch(epoch)?;
            pairs.push(HeightHashPair::new(proof.height, proof.hash));
        }

        Ok(pairs)
    }

    fn save_proof(&mut self, proof: &FinalizationProof) -> StoreResult<()> {
        ensure!(proof.round.epoch != 0, "cannot save proof with epoch 0");

        let current = self.statistics();
        if proof.round <= current.round {
            bail!(
                "cannot save proof with round {} when storage round is {}",
                proof.round,
                current.round,
            );
        }

        if proof.round.epoch > current.round.epoch + 1 {
            bail!(
                "cannot save proof with epoch {} when storage epoch is {}",
                proof.round.epoch,
                current.round.epoch,
            );
        }

        if proof.height < current.height {
            bail!(
                "cannot save proof with height {} when storage height is {}",
                proof.height,
                current.height,
            );
        }

        let path = self.proof_path(proof.round.epoch);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, encode(proof))?;

        self.write_epoch_height(proof.round.epoch, proof.height)?;
        self.write_statistics(&proof.statistics())?;

        debug!(target: "storage::proofs", statistics = %proof.statistics(), "saved finality proof");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mn_types::{FinalizationRound, FinalizationStage, StepIdentifier};
    use tempfile::TempDir;

    fn proof(
        epoch: FinalizationEpoch,
        point: u32,
        height: Height,
        hash_byte: u8,
    ) -> FinalizationProof {
        FinalizationProof {
            round: FinalizationRound::new(epoch, point),
            height,
            hash: BlockHash::repeat_byte(hash_byte),
            messages: vec![mn_types::FinalizationMessage {
                version: mn_types::FINALIZATION_MESSAGE_VERSION,
                step_identifier: StepIdentifier::new(epoch, point, FinalizationStage::Precommit),
                height,
                hashes: vec![BlockHash::repeat_byte(hash_byte)],
                signature: Default::default(),
            }],
        }
    }

    fn open_storage(dir: &TempDir) -> FileProofStorage {
        FileProofStorage::open(dir.path()).unwrap()
    }

    #[test]
    fn statistics_default_before_first_save() {
        let dir = TempDir::new().unwrap();
        let storage = open_storage(&dir);
        assert_eq!(storage.statistics(), FinalizationStatistics::default());
    }

    #[test]
    fn save_then_load_returns_identical_proof() {
        let dir = TempDir::new().unwrap();
        let mut storage = open_storage(&dir);
        let proof = proof(1, 5, 100, 0xab);

        storage.save_proof(&proof).unwrap();

        assert_eq!(storage.statistics(), proof.statistics());
        assert_eq!(storage.load_proof_at_epoch(1).unwrap(), proof);
    }

    #[test]
    fn statistics_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let proof = proof(1, 5, 100, 0xab);
        {
            let mut storage = open_storage(&dir);
            storage.save_proof(&proof).unwrap();
        }

        let reopened = open_storage(&dir);
        assert_eq!(reopened.statistics(), proof.statistics());
        assert_eq!(reopened.load_proof_at_epoch(1).unwrap(), proof);
    }

    #[test]
    fn save_requires_increasing_round() {
        let dir = TempDir::new().unwrap();
        let mut storage = open_storage(&dir);
        storage.save_proof(&proof(1, 5, 100, 1)).unwrap();

        // same round
        assert!(storage.save_proof(&proof(1, 5, 110, 2)).is_err());
        // earlier round
        assert!(storage.save_proof(&proof(1, 4, 110, 2)).is_err());
        // later point succeeds
        storage.save_proof(&proof(1, 6, 110, 2)).unwrap();
    }

    #[test]
    fn save_rejects_epoch_gap() {
        let dir = TempDir::new().unwrap();
        let mut storage = open_storage(&dir);
        storage.save_proof(&proof(1, 5, 100, 1)).unwrap();

        assert!(storage.save_proof(&proof(3, 1, 110, 2)).is_err());
        storage.save_proof(&proof(2, 1, 110, 2)).unwrap();
    }

    #[test]
    fn save_rejects_height_regression() {
        let dir = TempDir::new().unwrap();
        let mut storage = open_storage(&dir);
        storage.save_proof(&proof(1, 5, 100, 1)).unwrap();

        assert!(storage.save_proof(&proof(1, 6, 99, 2)).is_err());
        // equal height is allowed
        storage.save_proof(&proof(1, 6, 100, 2)).unwrap();
    }

    #[test]
    fn load_proof_at_height_is_exact_match_or_none() {
        let dir = TempDir::new().unwrap();
        let mut storage = open_storage(&dir);
        storage.save_proof(&proof(1, 5, 100, 1)).unwrap();
        storage.save_proof(&proof(2, 1, 150, 2)).unwrap();

        assert_eq!(storage.load_proof_at_height(100).unwrap().unwrap().round.epoch, 1);
        assert_eq!(storage.load_proof_at_height(150).unwrap().unwrap().round.epoch, 2);
        // inside the finalized span but no proof at that height
        assert!(storage.load_proof_at_height(120).unwrap().is_none());
        // beyond the finalized span
        assert!(storage.load_proof_at_height(151).is_err());
        // height zero is invalid
        assert!(storage.load_proof_at_height(0).is_err());
    }

    #[test]
    fn load_proof_at_epoch_validates_bounds() {
        let dir = TempDir::new().unwrap();
        let mut storage = open_storage(&dir);
        storage.save_proof(&proof(1, 5, 100, 1)).unwrap();

        assert!(storage.load_proof_at_epoch(0).is_err());
        assert!(storage.load_proof_at_epoch(2).is_err());
    }

    #[test]
    fn load_finalized_hashes_walks_epochs() {
        let dir = TempDir::new().unwrap();
        let mut storage = open_storage(&dir);
        storage.save_proof(&proof(1, 5, 100, 1)).unwrap();
        storage.save_proof(&proof(2, 1, 150, 2)).unwrap();
        storage.save_proof(&proof(3, 1, 200, 3)).unwrap();

        let pairs = storage.load_finalized_hashes_from(2, 10).unwrap();
        assert_eq!(
            pairs,
            vec![
                HeightHashPair::new(150, BlockHash::repeat_byte(2)),
                HeightHashPair::new(200, BlockHash::repeat_byte(3)),
            ]
        );

        let limited = storage.load_finalized_hashes_from(1, 2).unwrap();
        assert_eq!(limited.len(), 2);
        assert_eq!(limited[0].height, 100);
    }
}
