// SPDX-License-Identifier: Apache-2.0
//! Persistent storage for finality proofs and voting state.

mod cache;
mod proof_store;
mod voting_status;

pub use cache::*;
pub use proof_store::*;
pub use voting_status::*;

pub use mn_types::error::{StoreError, StoreResult};
