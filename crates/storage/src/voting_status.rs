// SPDX-License-Identifier: Apache-2.0
//! Persistence for the orchestrator's voting status.

use crate::StoreResult;
use mn_types::{decode, encode, FinalizationRound, VotingStatus};
use std::{fs, path::PathBuf};

/// Stores the orchestrator's [`VotingStatus`] in a single file so a restarted
/// node resumes voting where it left off.
#[derive(Debug)]
pub struct VotingStatusFile {
    path: PathBuf,
}

impl VotingStatusFile {
    /// Create a store backed by `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Load the stored status, or a fresh status at `default_round` when the
    /// file does not exist yet.
    pub fn load(&self, default_round: FinalizationRound) -> StoreResult<VotingStatus> {
        if !self.path.is_file() {
            return Ok(VotingStatus::new(default_round));
        }

        decode(&fs::read(&self.path)?)
    }

    /// Persist `status`.
    pub fn save(&self, status: &VotingStatus) -> StoreResult<()> {
        fs::write(&self.path, encode(status))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_yields_default_status() {
        let dir = TempDir::new().unwrap();
        let file = VotingStatusFile::new(dir.path().join("voting_status.dat"));

        let round = FinalizationRound::new(3, 9);
        assert_eq!(file.load(round).unwrap(), VotingStatus::new(round));
    }

    #[test]
    fn save_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let file = VotingStatusFile::new(dir.path().join("voting_status.dat"));

        let status = VotingStatus {
            round: FinalizationRound::new(2, 11),
            has_sent_prevote: true,
            has_sent_precommit: false,
        };
        file.save(&status).unwrap();

        assert_eq!(file.load(FinalizationRound::default()).unwrap(), status);
    }
}
