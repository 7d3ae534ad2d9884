// SPDX-License-Identifier: Apache-2.0
//! Crate for configuring the finalization subsystem.

mod finalization;
pub use finalization::*;
