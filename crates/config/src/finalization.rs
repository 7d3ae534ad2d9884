// SPDX-License-Identifier: Apache-2.0
//! Finalization configuration settings.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Errors raised when validating a [`FinalizationConfig`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A field that must be non-zero is zero.
    #[error("'{0}' must be non-zero")]
    Zero(&'static str),

    /// The threshold numerator exceeds the denominator.
    #[error("threshold ({threshold}) cannot exceed size ({size})")]
    ThresholdAboveSize {
        /// Configured threshold numerator.
        threshold: u64,
        /// Configured size denominator.
        size: u64,
    },
}

/// Finalization configuration settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FinalizationConfig {
    /// True if this node should participate in voting.
    pub enable_voting: bool,

    /// Denominator of the decision weight ratio.
    pub size: u64,

    /// Numerator of the decision weight ratio.
    pub threshold: u64,

    /// Duration of one finalization step.
    pub step_duration: Duration,

    /// Duration a message is remembered by the short lived dedup cache.
    pub short_lived_cache_message_duration: Duration,

    /// Maximum byte size of a message synchronization response.
    pub message_synchronization_max_response_size: u64,

    /// Maximum number of hashes to finalize per finalization point.
    pub max_hashes_per_point: u32,

    /// Height multiple of the last block in a prevote hash chain.
    pub prevote_blocks_multiple: u32,

    /// Number of blocks that share one voting set.
    pub voting_set_grouping: u64,

    /// Number of one-time-signature keys per batch.
    pub ots_key_dilution: u64,
}

impl Default for FinalizationConfig {
    fn default() -> Self {
        Self {
            enable_voting: true,
            size: 10_000,
            threshold: 7_750,
            step_duration: Duration::from_secs(4 * 60),
            short_lived_cache_message_duration: Duration::from_secs(10 * 60),
            message_synchronization_max_response_size: 20 * 1024 * 1024,
            max_hashes_per_point: 256,
            prevote_blocks_multiple: 4,
            voting_set_grouping: 720,
            ots_key_dilution: 128,
        }
    }
}

impl FinalizationConfig {
    /// Check the configuration for inconsistencies.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("size", self.size),
            ("threshold", self.threshold),
            ("max_hashes_per_point", self.max_hashes_per_point as u64),
            ("prevote_blocks_multiple", self.prevote_blocks_multiple as u64),
            ("voting_set_grouping", self.voting_set_grouping),
            ("ots_key_dilution", self.ots_key_dilution),
        ] {
            if value == 0 {
                return Err(ConfigError::Zero(name));
            }
        }

        if self.step_duration.is_zero() {
            return Err(ConfigError::Zero("step_duration"));
        }

        if self.threshold > self.size {
            return Err(ConfigError::ThresholdAboveSize {
                threshold: self.threshold,
                size: self.size,
            });
        }

        Ok(())
    }

    /// One step worth of milliseconds.
    pub fn step_duration_ms(&self) -> u64 {
        self.step_duration.as_millis() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        FinalizationConfig::default().validate().unwrap();
    }

    #[test]
    fn validate_rejects_zero_fields() {
        let config = FinalizationConfig { voting_set_grouping: 0, ..Default::default() };
        assert_eq!(config.validate(), Err(ConfigError::Zero("voting_set_grouping")));

        let config = FinalizationConfig { ots_key_dilution: 0, ..Default::default() };
        assert_eq!(config.validate(), Err(ConfigError::Zero("ots_key_dilution")));

        let config =
            FinalizationConfig { step_duration: Duration::ZERO, ..Default::default() };
        assert_eq!(config.validate(), Err(ConfigError::Zero("step_duration")));
    }

    #[test]
    fn validate_rejects_threshold_above_size() {
        let config =
            FinalizationConfig { size: 100, threshold: 101, ..Default::default() };
        assert_eq!(
            config.validate(),
            Err(ConfigError::ThresholdAboveSize { threshold: 101, size: 100 })
        );
    }

    #[test]
    fn json_with_partial_fields_falls_back_to_defaults() {
        let config: FinalizationConfig =
            serde_json::from_str(r#"{"size": 500, "threshold": 400}"#).unwrap();

        assert_eq!(config.size, 500);
        assert_eq!(config.threshold, 400);
        assert_eq!(config.max_hashes_per_point, FinalizationConfig::default().max_hashes_per_point);
    }

    #[test]
    fn config_json_roundtrip() {
        let config = FinalizationConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: FinalizationConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, parsed);
    }
}
