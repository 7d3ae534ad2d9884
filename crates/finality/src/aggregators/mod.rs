// SPDX-License-Identifier: Apache-2.0
//! Vote aggregation: per-round validation and the multi-round collection.

mod multi_round;
mod round;

pub use multi_round::*;
pub use round::*;
