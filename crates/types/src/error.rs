// SPDX-License-Identifier: Apache-2.0
//! Shared error plumbing for the finalization crates.

/// Convenience type to propagate storage errors.
pub type StoreError = eyre::Report;

/// Result alias for storage operations.
pub type StoreResult<T> = eyre::Result<T>;
