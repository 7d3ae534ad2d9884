// SPDX-License-Identifier: Apache-2.0
//! Error types for the finalization core.

use mn_types::crypto::OtsError;
use thiserror::Error;

/// Result alias for [`FinalityError`].
pub type FinalityResult<T> = Result<T, FinalityError>;

/// Failures surfaced by the voting and finalization paths.
///
/// Vote-path rejections are not errors; they are reported as
/// [`RoundMessageAddResult`](crate::RoundMessageAddResult) codes.
#[derive(Debug, Error)]
pub enum FinalityError {
    /// Signing a local message failed.
    #[error("failed to sign finalization message: {0}")]
    Signing(#[from] OtsError),

    /// Proof storage rejected or failed an operation.
    #[error("proof storage failure: {0}")]
    Storage(#[from] eyre::Report),
}
