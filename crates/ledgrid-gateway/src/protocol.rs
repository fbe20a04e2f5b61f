// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ledgrid contributors

//! JSON control protocol between controllers and the gateway.
//!
//! Control traffic is JSON text; frame payloads travel either as raw binary
//! WebSocket frames or base64 inside `display_batch`, chosen at join time.
//! Both paths carry the same underlying batch bytes.

use serde::{Deserialize, Serialize};

/// Default `space_available` assumed when a controller omits it and for the
/// server's synthetic priming requests.
pub const DEFAULT_SPACE_AVAILABLE: u32 = 60;

fn default_space_available() -> u32 {
    DEFAULT_SPACE_AVAILABLE
}

fn default_true() -> bool {
    true
}

/// Controller -> server messages.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Join handshake; must be the first message on the socket.
    Join {
        controller_id: String,
        /// Request raw binary WebSocket frames for batches instead of
        /// base64-in-JSON.
        #[serde(default)]
        binary: bool,
    },

    /// Liveness probe.
    Ping {
        #[serde(default, rename = "timestamp")]
        _timestamp: Option<u64>,
    },

    /// Free-form controller statistics (fps, frames_received, ...).
    Stats {
        #[serde(flatten)]
        payload: serde_json::Value,
    },

    /// Periodic buffer occupancy report driving flow control.
    DisplaySync { buffer_stats: BufferStats },

    /// Pull request: the controller has room for more frames.
    #[serde(alias = "request_batch")]
    BatchRequest {
        #[serde(default)]
        last_sequence: u32,
        #[serde(default = "default_space_available")]
        space_available: u32,
        #[serde(default)]
        urgent: bool,
    },

    /// Acknowledgment of a delivered batch.
    BatchAck {
        sequence: u32,
        #[serde(default, rename = "received_at")]
        _received_at: Option<u64>,
        #[serde(default = "default_true")]
        rendered: bool,
    },

    /// Response to a server `diagnostic_ping`.
    DiagnosticPong {
        #[serde(flatten)]
        _payload: serde_json::Value,
    },
}

/// Buffer occupancy as reported inside `display_sync`.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct BufferStats {
    #[serde(default)]
    pub fullness: f32,
    #[serde(default)]
    pub fps: f32,
    #[serde(default)]
    pub queue_length: u32,
    #[serde(default = "default_true")]
    pub can_receive: bool,
    #[serde(default)]
    pub sequence_received: u32,
}

/// Server -> controller pushed events.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ServerMessage {
    /// A batch of frames, base64 of the binary envelope.
    DisplayBatch {
        frames: String,
        count: u32,
        priority: bool,
        sequence: u32,
    },

    /// Legacy single-frame path for controllers that predate batching.
    Display { frame: LegacyFrame },

    /// Tells the controller to start issuing pull requests.
    InitiatePolling { message: String },

    /// Round-trip probe; the controller answers with `diagnostic_pong`.
    DiagnosticPing { timestamp: u64, message: String },

    /// A new pattern starts; sent before any batch carrying its frames.
    PatternChanged { pattern_id: String, timestamp: u64 },

    /// Operator asks the controller for a stats report.
    RequestStats {},

    /// Operator asks the controller for a detailed stats report.
    RequestDetailedStats {},

    /// Operator pushes simulator tuning.
    SimulationConfig { params: serde_json::Value },

    /// Protocol-level error.
    Error { code: ErrorCode, message: String },
}

/// Single frame on the legacy `display` path. The pattern travels as its
/// 31-bit FNV-1a hash because legacy receivers expect a fixed-width integer.
#[derive(Debug, Clone, Serialize)]
pub struct LegacyFrame {
    pub id: u32,
    pub width: u16,
    pub height: u16,
    /// Base64 of the raw RGB payload.
    pub pixels: String,
    pub pattern: u32,
}

/// Direct replies to controller messages (no event tag, matching what
/// controllers expect as request/response bodies).
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Reply {
    Joined {
        status: &'static str,
        controller_id: String,
        timestamp: u64,
    },
    Pong {
        status: &'static str,
    },
    RequestReceived {
        status: &'static str,
        timestamp: u64,
        server_sequence: u32,
    },
    Received {
        received: bool,
    },
    DiagnosticReceived {
        received: bool,
        server_time: u64,
    },
}

impl Reply {
    pub fn joined(controller_id: impl Into<String>, timestamp: u64) -> Self {
        Self::Joined {
            status: "joined",
            controller_id: controller_id.into(),
            timestamp,
        }
    }

    pub fn pong() -> Self {
        Self::Pong { status: "pong" }
    }

    pub fn request_received(timestamp: u64, server_sequence: u32) -> Self {
        Self::RequestReceived {
            status: "request_received",
            timestamp,
            server_sequence,
        }
    }

    pub fn received() -> Self {
        Self::Received { received: true }
    }

    pub fn diagnostic_received(server_time: u64) -> Self {
        Self::DiagnosticReceived {
            received: true,
            server_time,
        }
    }
}

/// Error codes carried in [`ServerMessage::Error`].
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[allow(dead_code)] // Some variants reserved for future use
pub enum ErrorCode {
    /// Unparseable or unknown message.
    InvalidMessage,
    /// Message other than `join` before the handshake completed.
    NotJoined,
    /// Repeated malformed input; the session is closing.
    ProtocolViolation,
    /// Server-side failure handling the message.
    InternalError,
}

/// Operator signals accepted on the REST `/signal` endpoint and fanned out
/// to every live session.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum OperatorSignal {
    RequestStats,
    RequestDetailedStats,
    SimulationConfig {
        #[serde(default)]
        params: serde_json::Value,
    },
}

// ============================================================================
// TESTS
// ============================================================================
