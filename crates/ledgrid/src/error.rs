// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ledgrid contributors

//! Crate-level error type.
//!
//! Errors are recovered locally at the layer that owns the resource; only
//! transport and protocol errors terminate a controller session. Nothing in
//! this enum aborts the frame buffer or the process.

use thiserror::Error;

use crate::config::ConfigError;
use crate::protocol::{DecodeError, EncodeError};

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by ledgrid operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Frame dimensions and pixel payload disagree, or exceed the grid limits.
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    /// Failure while building a batch body. The batch is aborted and the
    /// per-controller sequence is not advanced.
    #[error(transparent)]
    Encode(#[from] EncodeError),

    /// Malformed inbound bytes or message.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// Socket send/receive failure. The owning session transitions to CLOSED.
    #[error("transport error: {0}")]
    Transport(String),

    /// Unknown event, sequence mismatch, or repeated malformed input.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// The frame queues exceeded their hard cap and frames were dropped.
    #[error("buffer overflow: {dropped} frames dropped")]
    BufferOverflow { dropped: usize },

    /// An actor mailbox or reply channel closed before the operation finished.
    #[error("channel closed: {0}")]
    ChannelClosed(&'static str),

    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file or value problem.
    #[error(transparent)]
    Config(#[from] ConfigError),
}
