// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ledgrid contributors

//! Delivery configuration.
//!
//! Supports both programmatic and TOML file-based configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Tunables of the frame delivery fabric.
///
/// Every field has a default; a config file only needs to name the options
/// it overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Upper bound on frames per batch.
    #[serde(default = "default_batch_size_max")]
    pub batch_size_max: usize,

    /// Upper bound on priority frames per batch.
    #[serde(default = "default_priority_batch_size_max")]
    pub priority_batch_size_max: usize,

    /// Auto-flush threshold in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Smallest partial-batch size worth flushing.
    #[serde(default = "default_min_flush_frames")]
    pub min_flush_frames: usize,

    /// Per-controller debounce for pull requests, milliseconds.
    #[serde(default = "default_min_request_interval_ms")]
    pub min_request_interval_ms: u64,

    /// Session death threshold, milliseconds without inbound traffic.
    #[serde(default = "default_heartbeat_timeout_ms")]
    pub heartbeat_timeout_ms: u64,

    /// How long a batch may stay unacknowledged before the session logs a
    /// replay warning. Frames are perishable; nothing is resent.
    #[serde(default = "default_ack_timeout_ms")]
    pub ack_timeout_ms: u64,

    /// Hard cap on queued frames (priority + regular).
    #[serde(default = "default_max_buffered")]
    pub max_buffered: usize,
}

fn default_batch_size_max() -> usize {
    120
}

fn default_priority_batch_size_max() -> usize {
    20
}

fn default_max_delay_ms() -> u64 {
    500
}

fn default_min_flush_frames() -> usize {
    5
}

fn default_min_request_interval_ms() -> u64 {
    50
}

fn default_heartbeat_timeout_ms() -> u64 {
    60_000
}

fn default_ack_timeout_ms() -> u64 {
    5_000
}

fn default_max_buffered() -> usize {
    // 2 * batch_size_max
    240
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            batch_size_max: default_batch_size_max(),
            priority_batch_size_max: default_priority_batch_size_max(),
            max_delay_ms: default_max_delay_ms(),
            min_flush_frames: default_min_flush_frames(),
            min_request_interval_ms: default_min_request_interval_ms(),
            heartbeat_timeout_ms: default_heartbeat_timeout_ms(),
            ack_timeout_ms: default_ack_timeout_ms(),
            max_buffered: default_max_buffered(),
        }
    }
}

impl DeliveryConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate option combinations.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size_max == 0 {
            return Err(ConfigError::Invalid("batch_size_max must be > 0".into()));
        }
        if self.priority_batch_size_max == 0 {
            return Err(ConfigError::Invalid(
                "priority_batch_size_max must be > 0".into(),
            ));
        }
        if self.max_buffered < self.batch_size_max {
            return Err(ConfigError::Invalid(format!(
                "max_buffered ({}) must be >= batch_size_max ({})",
                self.max_buffered, self.batch_size_max
            )));
        }
        if self.min_flush_frames == 0 {
            return Err(ConfigError::Invalid("min_flush_frames must be > 0".into()));
        }
        Ok(())
    }
}
