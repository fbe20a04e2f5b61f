// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ledgrid contributors

//! Per-controller server-side state.

use std::time::Instant;

use tokio::sync::mpsc;

use super::OutboundBatch;

/// A recorded pull request awaiting service.
///
/// At most one per controller; a newer request replaces the old one.
#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub last_acked_sequence: u32,
    pub space_available: usize,
    pub urgent: bool,
    pub received_at: Instant,
}

/// Server-side state for one attached controller.
#[derive(Debug)]
pub struct ControllerRecord {
    pub id: String,

    /// Sequence of the last batch successfully handed to the session.
    pub last_sent_sequence: u32,

    /// Highest sequence the controller has acknowledged.
    pub last_acked_sequence: u32,

    pub pending_request: Option<PendingRequest>,

    /// Buffer occupancy the controller last reported, 0.0..=1.0.
    pub reported_fullness: f32,

    pub reported_fps: f32,

    pub can_receive: bool,

    /// False until the first display_sync report; unreported controllers do
    /// not constrain the dynamic batch size.
    pub has_reported: bool,

    /// Arrival time of the most recent request, for debouncing.
    pub last_request_at: Option<Instant>,

    /// Session mailbox for composed batches. None when the controller has a
    /// record (e.g. from an early request) but no live session yet.
    pub mailbox: Option<mpsc::Sender<OutboundBatch>>,
}

impl ControllerRecord {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            last_sent_sequence: 0,
            last_acked_sequence: 0,
            pending_request: None,
            reported_fullness: 0.0,
            reported_fps: 0.0,
            can_receive: true,
            has_reported: false,
            last_request_at: None,
            mailbox: None,
        }
    }
}
