// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ledgrid contributors

//! # LEDGRID - Real-time LED matrix frame delivery fabric
//!
//! The delivery fabric that sits between pattern generation and the wire:
//! it accumulates pixel frames, prioritizes pattern changes, and streams
//! batches to hardware controllers under pull-based flow control.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ledgrid::{DeliveryConfig, EventBus, FrameBuffer, ProducerHandle, Frame};
//! use std::sync::Arc;
//!
//! # async fn run() -> ledgrid::Result<()> {
//! let bus = Arc::new(EventBus::new());
//! let buffer = FrameBuffer::spawn(DeliveryConfig::default());
//!
//! // A pattern runner publishes frames through the producer handle.
//! let producer = ProducerHandle::new(bus.clone());
//! let frame = Frame::new(1, 16, 16, vec![0u8; 3 * 16 * 16])?;
//! producer.send_frame(frame, "rainbow");
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +--------------------------------------------------------------+
//! |                       Pattern Runner                         |
//! |        ProducerHandle -> controller:frames topic             |
//! +--------------------------------------------------------------+
//! |                    Controller Interface                      |
//! |   frame routing | live controller set | pattern tracking     |
//! +--------------------------------------------------------------+
//! |                       Frame Buffer                           |
//! |  priority/regular queues | debounce | batch composition      |
//! |  dynamic batch sizing | auto-flush | bounded memory          |
//! +--------------------------------------------------------------+
//! |                   Controller Sessions                        |
//! |   per-controller mailbox -> wire (batch binary format)       |
//! +--------------------------------------------------------------+
//! ```
//!
//! Data flows producer -> interface -> buffer -> session -> wire.
//! Control (pull requests, acks, fullness reports) travels in reverse.
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Frame`] | One full RGB pixel image for the grid |
//! | [`FrameBuffer`] | Buffering actor; spawn it and keep the [`BufferHandle`] |
//! | [`EventBus`] | Process-wide pub/sub topics |
//! | [`ControllerInterface`] | Registry of attached controllers, frame router |
//! | [`ProducerHandle`] | The contract a pattern runner publishes through |

/// Frame buffer actor: queues, batch composition, flow control.
pub mod buffer;
/// Process-wide pub/sub topic registry.
pub mod bus;
/// Wall-clock helpers shared by buffer and sessions.
pub mod clock;
/// Delivery configuration (defaults, TOML loading, validation).
pub mod config;
/// Crate-level error type.
pub mod error;
/// Frame data model and pattern id hashing.
pub mod frame;
/// Controller interface: producer subscription and live controller set.
pub mod interface;
/// Binary wire format: frame and batch envelope codec.
pub mod protocol;
/// Producer adapter contract for pattern runners.
pub mod producer;

pub use buffer::{BufferHandle, BufferSnapshot, FrameBuffer, OutboundBatch};
pub use bus::{BusEvent, EventBus, TOPIC_EVENTS, TOPIC_FRAMES, TOPIC_SOCKET};
pub use config::{ConfigError, DeliveryConfig};
pub use error::{Error, Result};
pub use frame::{pattern_hash, Frame, PatternId};
pub use interface::{ControllerInterface, InterfaceStatus};
pub use producer::{ProducerEvent, ProducerHandle};
pub use protocol::{
    decode_batch, decode_frame, encode_batch, encode_frame, BatchEnvelope, DecodeError,
    EncodeError,
};
