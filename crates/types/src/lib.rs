// SPDX-License-Identifier: Apache-2.0
//! Core types for the meridian finalization protocol.

mod codec;
mod committee;
pub mod crypto;
pub mod error;
mod hash;
mod message;
mod notifier;
mod proof;
mod round;
mod step;
mod task;

pub use codec::*;
pub use committee::*;
pub use hash::*;
pub use message::*;
pub use notifier::*;
pub use proof::*;
pub use round::*;
pub use step::*;
pub use task::*;
